//! Wallet façade
//!
//! A deterministic pool of sixteen P2WPKH keys derived from a seed, watched
//! by the node as watch-only addresses. UTXO selection is deliberately
//! simple; the pool-random receive/change key is a test stub, not a wallet.

use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::{
    Address, Amount, CompressedPublicKey, EcdsaSighashType, Network, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use rand::Rng;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

use crate::crypto;
use crate::error::{Error, Result};
use crate::rpc::BtcRpc;
use crate::script;
use crate::types::{TXIN_SIZE, TXOUT_SIZE};

const POOL_SIZE: u32 = 16;

struct KeyInfo {
    sk: SecretKey,
    pub_key: PublicKey,
    address: String,
}

pub struct Wallet {
    rpc: BtcRpc,
    secp: Secp256k1<All>,
    infos: Vec<KeyInfo>,
}

/// A spendable coin, in the order the selector consumes them.
#[derive(Debug, Clone)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub address: String,
    pub value: i64,
    pub confirmations: i64,
}

impl Wallet {
    /// Derive the key pool at m/44'/coin'/0'/0/i from the seed.
    pub fn new(params: Network, rpc: BtcRpc, seed: &[u8]) -> Result<Wallet> {
        let secp = Secp256k1::new();
        let master = Xpriv::new_master(params, seed).map_err(|e| Error::Parse(e.to_string()))?;
        let coin = if params == Network::Bitcoin { 0 } else { 1 };
        let path = [
            ChildNumber::from_hardened_idx(44).expect("small index"),
            ChildNumber::from_hardened_idx(coin).expect("small index"),
            ChildNumber::from_hardened_idx(0).expect("small index"),
            ChildNumber::from_normal_idx(0).expect("small index"),
        ];
        let account = master
            .derive_priv(&secp, &path)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let mut infos = Vec::with_capacity(POOL_SIZE as usize);
        for i in 0..POOL_SIZE {
            let child = account
                .derive_priv(&secp, &[ChildNumber::from_normal_idx(i).expect("small index")])
                .map_err(|e| Error::Parse(e.to_string()))?;
            let sk = child.private_key;
            let pub_key = PublicKey::from_secret_key(&secp, &sk);
            let address = Address::p2wpkh(&CompressedPublicKey(pub_key), params).to_string();
            infos.push(KeyInfo {
                sk,
                pub_key,
                address,
            });
        }
        Ok(Wallet { rpc, secp, infos })
    }

    /// Register the pool with the node as watch-only addresses.
    pub fn watch(&self) -> Result<()> {
        for info in &self.infos {
            self.rpc.import_address(&info.address)?;
        }
        Ok(())
    }

    /// Unspent coins of the pool, most-confirmed first, smallest amount
    /// first within the same depth.
    pub fn list_unspent(&self) -> Result<Vec<Utxo>> {
        let addrs: Vec<String> = self.infos.iter().map(|i| i.address.clone()).collect();
        let mut utxos = Vec::new();
        for entry in self.rpc.list_unspent(1, 9_999_999, &addrs)? {
            let txid: Txid = entry
                .txid
                .parse()
                .map_err(|_| Error::Parse(format!("bad txid {}", entry.txid)))?;
            let value = Amount::from_btc(entry.amount)
                .map_err(|e| Error::Parse(e.to_string()))?
                .to_sat() as i64;
            utxos.push(Utxo {
                outpoint: OutPoint {
                    txid,
                    vout: entry.vout,
                },
                address: entry.address,
                value,
                confirmations: entry.confirmations,
            });
        }
        utxos.sort_by(|a, b| {
            b.confirmations
                .cmp(&a.confirmations)
                .then(a.value.cmp(&b.value))
        });
        Ok(utxos)
    }

    pub fn get_balance(&self) -> Result<i64> {
        Ok(self.list_unspent()?.iter().map(|u| u.value).sum())
    }

    /// Random key from the pool. Good enough for a demo; a real wallet
    /// would track usage.
    pub fn get_public_key(&self) -> PublicKey {
        let i = rand::thread_rng().gen_range(0..self.infos.len());
        self.infos[i].pub_key
    }

    pub fn get_address(&self) -> String {
        let i = rand::thread_rng().gen_range(0..self.infos.len());
        self.infos[i].address.clone()
    }

    pub fn p2wpkh_script(&self, pub_key: &PublicKey) -> ScriptBuf {
        script::p2wpkh_script(pub_key)
    }

    /// Greedy-add coins until `amount` plus the per-input fee is covered,
    /// appending a change output unless the total matches exactly.
    pub fn fund_tx(&self, tx: &mut Transaction, amount: i64, efee: i64) -> Result<()> {
        let list = self.list_unspent()?;
        let (outs, change) = select_utxos(&list, amount, efee)?;
        for out in outs {
            tx.input.push(TxIn {
                previous_output: out,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            });
        }
        if let Some(change) = change {
            tx.output.push(TxOut {
                value: Amount::from_sat(change as u64),
                script_pubkey: script::p2wpkh_script(&self.get_public_key()),
            });
        }
        Ok(())
    }

    /// Attach P2WPKH witnesses to every input whose prevout the pool owns.
    pub fn sign_tx(&self, tx: &mut Transaction) -> Result<()> {
        let list = self.list_unspent()?;
        for idx in 0..tx.input.len() {
            let op = tx.input[idx].previous_output;
            let Some(utxo) = list.iter().find(|u| u.outpoint == op) else {
                continue;
            };
            let Some(info) = self.infos.iter().find(|i| i.address == utxo.address) else {
                continue;
            };
            let spk = script::p2wpkh_script(&info.pub_key);
            let sighash = SighashCache::new(&*tx)
                .p2wpkh_signature_hash(
                    idx,
                    &spk,
                    Amount::from_sat(utxo.value as u64),
                    EcdsaSighashType::All,
                )
                .map_err(|e| Error::Parse(e.to_string()))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let mut sign = self.secp.sign_ecdsa(&msg, &info.sk).serialize_der().to_vec();
            sign.push(EcdsaSighashType::All as u8);
            tx.input[idx].witness = Witness::from_slice(&[sign, info.pub_key.serialize().to_vec()]);
        }
        Ok(())
    }

    /// BIP-143 signature over a P2WSH input under the pool key matching
    /// `pub_key`. Returns DER ++ SIGHASH_ALL byte.
    pub fn witness_signature(
        &self,
        tx: &Transaction,
        idx: usize,
        amount: i64,
        script: &ScriptBuf,
        pub_key: &PublicKey,
    ) -> Result<Vec<u8>> {
        self.witness_signature_add(tx, idx, amount, script, pub_key, None)
    }

    /// Same, with an attestation scalar added to the private key mod n.
    pub fn witness_signature_add(
        &self,
        tx: &Transaction,
        idx: usize,
        amount: i64,
        script: &ScriptBuf,
        pub_key: &PublicKey,
        add: Option<&SecretKey>,
    ) -> Result<Vec<u8>> {
        let info = self
            .infos
            .iter()
            .find(|i| i.pub_key == *pub_key)
            .ok_or_else(|| {
                Error::Parse(format!("unknown public key {}", hex::encode(pub_key.serialize())))
            })?;
        let sk = match add {
            None => info.sk,
            Some(delta) => crypto::add_secret(&info.sk, delta)?,
        };
        let sighash = SighashCache::new(tx)
            .p2wsh_signature_hash(idx, script, Amount::from_sat(amount as u64), EcdsaSighashType::All)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let msg = Message::from_digest(sighash.to_byte_array());
        let mut sign = self.secp.sign_ecdsa(&msg, &sk).serialize_der().to_vec();
        sign.push(EcdsaSighashType::All as u8);
        Ok(sign)
    }

    pub fn send_tx(&self, tx: &Transaction) -> Result<Txid> {
        let txid = self.rpc.send_raw_transaction(&hex::encode(serialize(tx)))?;
        txid.parse()
            .map_err(|_| Error::Rpc(format!("bad txid from node: {txid}")))
    }
}

/// Coin selection: walk the list in order, accumulating until the target
/// plus `149 * efee` per input is met. An exact match takes no change;
/// otherwise one change output is budgeted at `31 * efee` more.
fn select_utxos(list: &[Utxo], amount: i64, efee: i64) -> Result<(Vec<OutPoint>, Option<i64>)> {
    let mut outs = Vec::new();
    let mut total = 0i64;
    let mut addfee = 0i64;
    let mut with_change = false;
    for utxo in list {
        outs.push(utxo.outpoint);
        total += utxo.value;
        addfee = outs.len() as i64 * TXIN_SIZE * efee;
        with_change = false;
        if amount + addfee <= total {
            if amount + addfee == total {
                break;
            }
            addfee += TXOUT_SIZE * efee;
            with_change = true;
            if amount + addfee <= total {
                break;
            }
        }
    }
    if amount + addfee > total {
        return Err(Error::InsufficientFunds);
    }
    let change = total - (amount + addfee);
    if !with_change || change == 0 {
        return Ok((outs, None));
    }
    Ok((outs, Some(change)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn utxo(vout: u32, value: i64, confirmations: i64) -> Utxo {
        Utxo {
            outpoint: OutPoint {
                txid: Txid::from_str(
                    "9f36ba8114f19746a7a544f4dd598d9a1cbee2184a87c6309b157d4ac07604a0",
                )
                .unwrap(),
                vout,
            },
            address: String::new(),
            value,
            confirmations,
        }
    }

    #[test]
    fn selection_adds_change_sized_for_the_extra_output() {
        let list = vec![utxo(0, 1_000_000, 10)];
        let (outs, change) = select_utxos(&list, 500_000, 10).unwrap();
        assert_eq!(outs.len(), 1);
        // 1 input * 149 * 10 + 31 * 10 on top of the target.
        assert_eq!(change, Some(1_000_000 - 500_000 - 1_490 - 310));
    }

    #[test]
    fn selection_takes_exact_totals_without_change() {
        let target = 500_000;
        let list = vec![utxo(0, target + TXIN_SIZE * 10, 10)];
        let (outs, change) = select_utxos(&list, target, 10).unwrap();
        assert_eq!(outs.len(), 1);
        assert_eq!(change, None);
    }

    #[test]
    fn selection_accumulates_until_covered() {
        let list = vec![utxo(0, 300_000, 9), utxo(1, 300_000, 8), utxo(2, 300_000, 7)];
        let (outs, change) = select_utxos(&list, 500_000, 10).unwrap();
        assert_eq!(outs.len(), 2);
        let fee = 2 * TXIN_SIZE * 10 + TXOUT_SIZE * 10;
        assert_eq!(change, Some(600_000 - 500_000 - fee));
    }

    #[test]
    fn selection_fails_when_short() {
        let list = vec![utxo(0, 400_000, 1)];
        assert!(matches!(
            select_utxos(&list, 500_000, 10),
            Err(Error::InsufficientFunds)
        ));
    }

    #[test]
    fn pool_is_deterministic_per_seed() {
        let rpc = BtcRpc::new("http://localhost:18443", "user", "pass");
        let w1 = Wallet::new(Network::Regtest, rpc.clone(), &[7u8; 32]).unwrap();
        let w2 = Wallet::new(Network::Regtest, rpc.clone(), &[7u8; 32]).unwrap();
        let w3 = Wallet::new(Network::Regtest, rpc, &[8u8; 32]).unwrap();
        assert_eq!(w1.infos[0].address, w2.infos[0].address);
        assert_ne!(w1.infos[0].address, w3.infos[0].address);
        assert_eq!(w1.infos.len(), POOL_SIZE as usize);
    }

    #[test]
    fn delta_signature_uses_the_combined_key() {
        let rpc = BtcRpc::new("http://localhost:18443", "user", "pass");
        let wallet = Wallet::new(Network::Regtest, rpc, &[9u8; 32]).unwrap();
        let secp = Secp256k1::new();
        let pub_key = wallet.infos[0].pub_key;
        let delta = SecretKey::from_slice(&[0x42; 32]).unwrap();

        let tx = Transaction {
            version: bitcoin::transaction::Version::TWO,
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![TxIn {
                previous_output: utxo(0, 0, 0).outpoint,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![],
        };
        let script = script::p2wpkh_script(&pub_key);
        let sign = wallet
            .witness_signature_add(&tx, 0, 1_000, &script, &pub_key, Some(&delta))
            .unwrap();

        // The signature must verify under pub + delta*G.
        let combined = pub_key
            .combine(&PublicKey::from_secret_key(&secp, &delta))
            .unwrap();
        let sighash = SighashCache::new(&tx)
            .p2wsh_signature_hash(0, &script, Amount::from_sat(1_000), EcdsaSighashType::All)
            .unwrap();
        let msg = Message::from_digest(sighash.to_byte_array());
        let sig = secp256k1::ecdsa::Signature::from_der(&sign[..sign.len() - 1]).unwrap();
        secp.verify_ecdsa(&msg, &sig, &combined).unwrap();
    }
}
