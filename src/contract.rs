//! Contract state and the four transaction kinds
//!
//! A `Contract` holds everything both parties agree on: fund amounts, fee
//! reservations, fund-script keys, each side's fund inputs and change, the
//! refund signatures, and the `Game` (target height, oracle keys, payoff
//! table). The contract owns its game; nothing points back.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::sighash::SighashCache;
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, EcdsaSighashType, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness,
};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};

use crate::error::{Error, Result};
use crate::rates::{self, Rate, Side};
use crate::script;

/// Blocks between the target height and the refund locktime.
pub const REFUND_DELAY: u32 = 144;

/// Byte size charged for a forward spend on top of its output script.
const FORWARD_TX_BASE_SIZE: i64 = 216;

/// Game state: the attestation target and the payoff table bound to it.
#[derive(Debug)]
pub struct Game {
    height: u32,
    length: usize,
    pub_o: Option<PublicKey>,
    keys_r: Vec<PublicKey>,
    rates: Vec<Rate>,
    fixed: Option<usize>,
    /// Attested message bytes once the oracle has published.
    hash: Option<Vec<u8>>,
    osigns: Vec<SecretKey>,
}

impl Game {
    fn new(height: u32, length: usize, amount: i64) -> Game {
        Game {
            height,
            length,
            pub_o: None,
            keys_r: Vec::new(),
            rates: rates::rate_table(amount, length),
            fixed: None,
            hash: None,
            osigns: Vec::new(),
        }
    }
}

pub struct Contract {
    famt_a: i64,
    famt_b: i64,
    fefee: i64,
    sefee: i64,
    sfee_a: i64,
    sfee_b: i64,
    side: Side,
    locktime: u32,
    pub_a: Option<PublicKey>,
    pub_b: Option<PublicKey>,
    txins_a: Vec<TxIn>,
    txins_b: Vec<TxIn>,
    txout_a: Option<TxOut>,
    txout_b: Option<TxOut>,
    rsign_a: Option<Vec<u8>>,
    rsign_b: Option<Vec<u8>>,
    game: Option<Game>,
    secp: Secp256k1<All>,
}

impl Contract {
    pub fn new(
        famt_a: i64,
        famt_b: i64,
        fefee: i64,
        sefee: i64,
        sfee_a: i64,
        sfee_b: i64,
        side: Side,
    ) -> Contract {
        Contract {
            famt_a,
            famt_b,
            fefee,
            sefee,
            sfee_a,
            sfee_b,
            side,
            locktime: 0,
            pub_a: None,
            pub_b: None,
            txins_a: Vec::new(),
            txins_b: Vec::new(),
            txout_a: None,
            txout_b: None,
            rsign_a: None,
            rsign_b: None,
            game: None,
            secp: Secp256k1::new(),
        }
    }

    // ── Plain accessors ──────────────────────────────────────────────────────

    pub fn side(&self) -> Side {
        self.side
    }

    /// Total amount locked for the payoff (excludes the fee reservation).
    pub fn fund_amount(&self) -> i64 {
        self.famt_a + self.famt_b
    }

    /// Fee reserved in the fund output for the settlement transaction.
    pub fn settlement_fee(&self) -> i64 {
        self.sfee_a + self.sfee_b
    }

    pub fn fund_estimate_fee(&self) -> i64 {
        self.fefee
    }

    pub fn settlement_estimate_fee(&self) -> i64 {
        self.sefee
    }

    pub fn public_key(&self, side: Side) -> Option<PublicKey> {
        match side {
            Side::A => self.pub_a,
            Side::B => self.pub_b,
        }
    }

    pub fn set_public_key(&mut self, pub_key: PublicKey, side: Side) {
        match side {
            Side::A => self.pub_a = Some(pub_key),
            Side::B => self.pub_b = Some(pub_key),
        }
    }

    pub fn set_txins_txout(&mut self, txins: Vec<TxIn>, txout: Option<TxOut>, side: Side) {
        match side {
            Side::A => {
                self.txins_a = txins;
                self.txout_a = txout;
            }
            Side::B => {
                self.txins_b = txins;
                self.txout_b = txout;
            }
        }
    }

    pub fn fund_txins(&self, side: Side) -> &[TxIn] {
        match side {
            Side::A => &self.txins_a,
            Side::B => &self.txins_b,
        }
    }

    pub fn fund_txins_mut(&mut self, side: Side) -> &mut Vec<TxIn> {
        match side {
            Side::A => &mut self.txins_a,
            Side::B => &mut self.txins_b,
        }
    }

    pub fn set_refund_sign(&mut self, sign: Vec<u8>, side: Side) {
        match side {
            Side::A => self.rsign_a = Some(sign),
            Side::B => self.rsign_b = Some(sign),
        }
    }

    // ── Game ─────────────────────────────────────────────────────────────────

    /// Fix the attestation target. The refund becomes valid `REFUND_DELAY`
    /// blocks past the target height.
    pub fn set_game_conditions(&mut self, height: u32, length: usize) {
        self.game = Some(Game::new(height, length, self.fund_amount()));
        self.locktime = height + REFUND_DELAY;
    }

    fn game(&self) -> Result<&Game> {
        self.game
            .as_ref()
            .ok_or_else(|| Error::Parse("game conditions not set".into()))
    }

    fn game_mut(&mut self) -> Result<&mut Game> {
        self.game
            .as_mut()
            .ok_or_else(|| Error::Parse("game conditions not set".into()))
    }

    pub fn game_height(&self) -> Result<u32> {
        Ok(self.game()?.height)
    }

    pub fn game_length(&self) -> Result<usize> {
        Ok(self.game()?.length)
    }

    pub fn locktime(&self) -> u32 {
        self.locktime
    }

    pub fn rates(&self) -> &[Rate] {
        self.game.as_ref().map(|g| g.rates.as_slice()).unwrap_or(&[])
    }

    pub fn rates_mut(&mut self) -> &mut [Rate] {
        self.game.as_mut().map(|g| g.rates.as_mut_slice()).unwrap_or(&mut [])
    }

    pub fn set_oracle_keys(&mut self, pub_o: PublicKey, keys: Vec<PublicKey>) -> Result<()> {
        let secp = self.secp.clone();
        let game = self.game_mut()?;
        rates::set_oracle_keys(&secp, &mut game.rates, &pub_o, &keys)?;
        game.pub_o = Some(pub_o);
        game.keys_r = keys;
        Ok(())
    }

    /// Apply the oracle attestation: select and open the matching rate.
    pub fn set_oracle_signs(&mut self, msgs: Vec<Vec<u8>>, signs: Vec<SecretKey>) -> Result<usize> {
        let secp = self.secp.clone();
        let game = self.game_mut()?;
        let idx = rates::resolve(&secp, &mut game.rates, &msgs, &signs)?;
        game.fixed = Some(idx);
        game.hash = Some(msgs.iter().flat_map(|m| m.iter().copied()).collect());
        game.osigns = signs;
        Ok(idx)
    }

    pub fn fixed_rate(&self) -> Option<(usize, &Rate)> {
        let game = self.game.as_ref()?;
        let idx = game.fixed?;
        Some((idx, &game.rates[idx]))
    }

    pub fn oracle_pubkey(&self) -> Option<PublicKey> {
        self.game.as_ref()?.pub_o
    }

    pub fn oracle_nonces(&self) -> &[PublicKey] {
        self.game.as_ref().map(|g| g.keys_r.as_slice()).unwrap_or(&[])
    }

    /// Attested message bytes, once the oracle has published.
    pub fn attested_value(&self) -> Option<&[u8]> {
        self.game.as_ref()?.hash.as_deref()
    }

    pub fn oracle_signs(&self) -> &[SecretKey] {
        self.game.as_ref().map(|g| g.osigns.as_slice()).unwrap_or(&[])
    }

    // ── Scripts and transactions ─────────────────────────────────────────────

    pub fn fund_script(&self) -> Result<ScriptBuf> {
        match (self.pub_a, self.pub_b) {
            (Some(a), Some(b)) => Ok(script::fund_script(&a, &b)),
            _ => Err(Error::Parse("fund keys not exchanged".into())),
        }
    }

    /// Fund transaction: A's inputs then B's, one P2WSH output carrying the
    /// payoff plus the settlement-fee reservation, then each side's change.
    pub fn fund_tx(&self) -> Result<Transaction> {
        let script = self.fund_script()?;
        let mut output = vec![TxOut {
            value: Amount::from_sat((self.fund_amount() + self.settlement_fee()) as u64),
            script_pubkey: script::p2wsh_script(&script),
        }];
        if let Some(txout) = &self.txout_a {
            output.push(txout.clone());
        }
        if let Some(txout) = &self.txout_b {
            output.push(txout.clone());
        }
        let mut input = self.txins_a.clone();
        input.extend(self.txins_b.iter().cloned());
        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input,
            output,
        })
    }

    fn fund_outpoint(&self) -> Result<OutPoint> {
        Ok(OutPoint {
            txid: self.fund_tx()?.compute_txid(),
            vout: 0,
        })
    }

    /// Combined winner key for a rate: adaptor point plus the winner's
    /// static key.
    fn winner_key(&self, rate: &Rate, side: Side) -> Result<PublicKey> {
        let key = rate
            .key
            .ok_or_else(|| Error::Parse("oracle keys not set".into()))?;
        let own = self
            .public_key(side)
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        key.combine(&own)
            .map_err(|e| Error::AttestationInvalid(e.to_string()))
    }

    /// Settlement transaction for a rate as seen from `side`. `None` when
    /// that side's share is zero (no transaction to sign).
    pub fn settlement_tx(&self, rate: &Rate, side: Side) -> Result<Option<Transaction>> {
        let val1 = rate.amount(side);
        if val1 <= 0 {
            return Ok(None);
        }
        let val2 = rate.amount(side.other());
        let pub2 = self
            .public_key(side.other())
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let winner = self.winner_key(rate, side)?;

        let mut output = vec![TxOut {
            value: Amount::from_sat(val1 as u64),
            script_pubkey: script::p2wsh_script(&script::settlement_script(&winner, &pub2)),
        }];
        if val2 > 0 {
            output.push(TxOut {
                value: Amount::from_sat(val2 as u64),
                script_pubkey: script::p2wpkh_script(&pub2),
            });
        }
        Ok(Some(Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: self.fund_outpoint()?,
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output,
        }))
    }

    /// Refund transaction: returns both contributions, timelocked to
    /// `height + 144`. The witness is attached once both signatures exist.
    pub fn refund_tx(&self) -> Result<Transaction> {
        let pub_a = self
            .pub_a
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let pub_b = self
            .pub_b
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let mut txin = TxIn {
            previous_output: self.fund_outpoint()?,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
            witness: Witness::default(),
        };
        if let (Some(rsign_a), Some(rsign_b)) = (&self.rsign_a, &self.rsign_b) {
            txin.witness = Witness::from_slice(&[
                Vec::new(),
                rsign_a.clone(),
                rsign_b.clone(),
                self.fund_script()?.into_bytes(),
            ]);
        }
        Ok(Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(self.locktime),
            input: vec![txin],
            output: vec![
                TxOut {
                    value: Amount::from_sat(self.famt_a as u64),
                    script_pubkey: script::p2wpkh_script(&pub_a),
                },
                TxOut {
                    value: Amount::from_sat(self.famt_b as u64),
                    script_pubkey: script::p2wpkh_script(&pub_b),
                },
            ],
        })
    }

    /// Forward transaction: spend the settlement winner branch to an
    /// arbitrary script. Returns the transaction, the settlement output
    /// value, and the witness script for signing.
    pub fn forward_tx(
        &self,
        rate: &Rate,
        side: Side,
        pk_script: &ScriptBuf,
        efee: i64,
    ) -> Result<(Transaction, i64, ScriptBuf)> {
        let val1 = rate.amount(side);
        let pub2 = self
            .public_key(side.other())
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let stx = self
            .settlement_tx(rate, side)?
            .ok_or_else(|| Error::Parse("no settlement transaction for this side".into()))?;
        let fee = (FORWARD_TX_BASE_SIZE + pk_script.len() as i64) * efee;
        let val = val1 - fee;
        if val < 0 {
            return Err(Error::Overflow(format!("value {val1}, fee {fee}")));
        }
        let tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint {
                    txid: stx.compute_txid(),
                    vout: 0,
                },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(val as u64),
                script_pubkey: pk_script.clone(),
            }],
        };
        let winner = self.winner_key(rate, side)?;
        Ok((tx, val1, script::settlement_script(&winner, &pub2)))
    }

    // ── Signature verification ───────────────────────────────────────────────

    /// BIP-143 sighash of a fund-output spend.
    pub fn fund_spend_sighash(&self, tx: &Transaction) -> Result<[u8; 32]> {
        let script = self.fund_script()?;
        let amt = self.fund_amount() + self.settlement_fee();
        let sighash = SighashCache::new(tx)
            .p2wsh_signature_hash(0, &script, Amount::from_sat(amt as u64), EcdsaSighashType::All)
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(sighash.to_byte_array())
    }

    fn verify_fund_spend(&self, tx: &Transaction, sign: &[u8], pub_key: &PublicKey) -> Result<()> {
        if sign.len() < 2 {
            return Err(Error::SignatureInvalid);
        }
        // Witness signatures carry the sighash-type byte; strip it for DER.
        let der = &sign[..sign.len() - 1];
        let sig = Signature::from_der(der).map_err(|_| Error::SignatureInvalid)?;
        let msg = Message::from_digest(self.fund_spend_sighash(tx)?);
        self.secp
            .verify_ecdsa(&msg, &sig, pub_key)
            .map_err(|_| Error::SignatureInvalid)
    }

    /// Verify the counterparty's signature over the settlement transaction
    /// paying this side, and keep it for broadcast time.
    pub fn verify_settlement(&mut self, idx: usize, sign: &[u8], pub_key: &PublicKey) -> Result<()> {
        let side = self.side;
        let rate = self.rates()[idx].clone();
        let tx = self
            .settlement_tx(&rate, side)?
            .ok_or(Error::SignatureInvalid)?;
        self.verify_fund_spend(&tx, sign, pub_key)?;
        self.rates_mut()[idx].received_sign = Some(sign.to_vec());
        Ok(())
    }

    /// Verify a refund signature under the given key.
    pub fn verify_refund(&self, sign: &[u8], pub_key: &PublicKey) -> Result<()> {
        let tx = self.refund_tx()?;
        self.verify_fund_spend(&tx, sign, pub_key)
    }

    /// Remember the txid of a settlement transaction built for the
    /// counterparty (set while producing our signatures for their side).
    pub fn cache_counterparty_txid(&mut self, idx: usize, txid: Txid) {
        self.rates_mut()[idx].txid = Some(txid);
    }
}
