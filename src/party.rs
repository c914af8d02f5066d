//! Participant state machine
//!
//! A `Party` owns one wallet and at most one contract, and walks the
//! offer/accept/sign handshake strictly forward. Blobs go out and come in as
//! opaque bytes; how they travel is the driver's problem.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::transaction::Version;
use bitcoin::{Network, Transaction, Txid, Witness};
use secp256k1::SecretKey;

use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::rates::Side;
use crate::rpc::BtcRpc;
use crate::types::{
    self, AcceptData, OfferData, OracleKeys, OracleSigns, SignData, FUND_TX_BASE_SIZE,
    SETTLEMENT_TX_SIZE,
};
use crate::wallet::Wallet;

/// Handshake progress. Transitions are strictly monotonic; anything out of
/// order is an `IllegalStatus` error and fatal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    None,
    // offerer path
    WaitForAccept,
    CanGetSign,
    // acceptor path
    CanGetAccept,
    WaitForSign,
    // both
    WaitSendTx,
}

impl Status {
    fn name(self) -> &'static str {
        match self {
            Status::None => "None",
            Status::WaitForAccept => "WaitForAccept",
            Status::CanGetSign => "CanGetSign",
            Status::CanGetAccept => "CanGetAccept",
            Status::WaitForSign => "WaitForSign",
            Status::WaitSendTx => "WaitSendTx",
        }
    }
}

pub struct Party {
    name: String,
    wallet: Wallet,
    contract: Option<Contract>,
    status: Status,
}

fn half(value: i64) -> i64 {
    (value + 1) / 2
}

fn empty_tx() -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: Vec::new(),
        output: Vec::new(),
    }
}

impl Party {
    pub fn new(name: &str, params: Network, rpc: BtcRpc) -> Result<Party> {
        let seed = sha256d::Hash::hash(name.as_bytes());
        let wallet = Wallet::new(params, rpc, seed.as_byte_array())?;
        Ok(Party {
            name: name.to_string(),
            wallet,
            contract: None,
            status: Status::None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register the wallet pool with the node (watch-only).
    pub fn watch(&self) -> Result<()> {
        self.wallet.watch()
    }

    pub fn get_balance(&self) -> Result<i64> {
        self.wallet.get_balance()
    }

    pub fn get_address(&self) -> String {
        self.wallet.get_address()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn game_height(&self) -> Result<u32> {
        self.contract()?.game_height()
    }

    pub fn locktime(&self) -> Result<u32> {
        Ok(self.contract()?.locktime())
    }

    /// Whether the fixed rate pays this side the majority of the pot.
    pub fn is_winner(&self) -> Result<bool> {
        let c = self.contract()?;
        let (_, rate) = c
            .fixed_rate()
            .ok_or_else(|| Error::Parse("rate no fix".into()))?;
        Ok(rate.amount(c.side()) > c.fund_amount() / 2)
    }

    /// Abort: discard the contract and start over.
    pub fn clear(&mut self) {
        self.contract = None;
        self.status = Status::None;
    }

    fn expect_status(&self, want: Status) -> Result<()> {
        if self.status != want {
            return Err(Error::IllegalStatus(self.status.name()));
        }
        Ok(())
    }

    fn contract(&self) -> Result<&Contract> {
        self.contract
            .as_ref()
            .ok_or(Error::IllegalStatus("no contract"))
    }

    fn contract_mut(&mut self) -> Result<&mut Contract> {
        self.contract
            .as_mut()
            .ok_or(Error::IllegalStatus("no contract"))
    }

    // ── Step 1: offer ────────────────────────────────────────────────────────

    /// Take ownership of a prepared contract, fund this side's half and emit
    /// the offer blob.
    pub fn offer_data(&mut self, contract: Contract) -> Result<Vec<u8>> {
        self.expect_status(Status::None)?;
        let wallet = &self.wallet;
        let mut c = contract;
        let side = c.side();
        let pub_key = wallet.get_public_key();
        c.set_public_key(pub_key, side);

        let amt = half(c.fund_amount())
            + half(c.settlement_fee())
            + half(FUND_TX_BASE_SIZE * c.fund_estimate_fee());
        let mut tx = empty_tx();
        wallet.fund_tx(&mut tx, amt, c.fund_estimate_fee())?;
        let txins = tx.input.clone();
        let txout = tx.output.first().cloned();
        let inputs = types::encode_inputs(&txins);
        let output = types::encode_output(txout.as_ref());
        c.set_txins_txout(txins, txout, side);

        let blob = OfferData {
            high: side == Side::A,
            amount: c.fund_amount(),
            fefee: c.fund_estimate_fee(),
            sefee: c.settlement_estimate_fee(),
            height: c.game_height()?,
            length: c.game_length()?,
            pubkey: hex::encode(pub_key.serialize()),
            inputs,
            output,
        };
        self.contract = Some(c);
        self.status = Status::WaitForAccept;
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Mirror an incoming offer into a fresh contract on the opposite side.
    pub fn set_offer_data(&mut self, data: &[u8]) -> Result<()> {
        self.expect_status(Status::None)?;
        let odata: OfferData = serde_json::from_slice(data)?;
        if odata.length == 0 || odata.length > 2 {
            return Err(Error::Parse(format!(
                "unsupported message length {}",
                odata.length
            )));
        }
        let pub_key = types::str_to_pubkey(&odata.pubkey)?;
        let (txins, txout) = types::decode_inputs_output(&odata.inputs, &odata.output)?;
        let offerer = if odata.high { Side::A } else { Side::B };

        let sfee = odata.sefee * SETTLEMENT_TX_SIZE;
        let mut c = Contract::new(
            half(odata.amount),
            half(odata.amount),
            odata.fefee,
            odata.sefee,
            half(sfee),
            half(sfee),
            offerer.other(),
        );
        c.set_txins_txout(txins, txout, offerer);
        c.set_game_conditions(odata.height, odata.length);
        c.set_public_key(pub_key, offerer);
        self.contract = Some(c);
        self.status = Status::CanGetAccept;
        Ok(())
    }

    // ── Step 2: accept ───────────────────────────────────────────────────────

    /// Fund this side's half, sign every settlement transaction paying the
    /// offerer plus the refund, and emit the accept blob.
    pub fn accept_data(&mut self) -> Result<Vec<u8>> {
        self.expect_status(Status::CanGetAccept)?;
        let (inputs, output, pubkey) = {
            let wallet = &self.wallet;
            let c = self.contract.as_mut().ok_or(Error::IllegalStatus("no contract"))?;
            let side = c.side();
            let pub_key = wallet.get_public_key();
            c.set_public_key(pub_key, side);

            let amt = c.fund_amount() + c.settlement_fee();
            let mut tx = empty_tx();
            wallet.fund_tx(
                &mut tx,
                half(amt) + half(FUND_TX_BASE_SIZE * c.fund_estimate_fee()),
                c.fund_estimate_fee(),
            )?;
            let txins = tx.input.clone();
            let txout = tx.output.first().cloned();
            let inputs = types::encode_inputs(&txins);
            let output = types::encode_output(txout.as_ref());
            c.set_txins_txout(txins, txout, side);
            (inputs, output, hex::encode(pub_key.serialize()))
        };

        let signs = self.settlement_signs_for_other()?;
        let rsign = self.refund_sign_own()?;
        let blob = AcceptData {
            pubkey,
            inputs,
            output,
            signs,
            rsign: hex::encode(rsign),
        };
        self.status = Status::WaitForSign;
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Verify the acceptor's funding set and signatures.
    pub fn set_accept_data(&mut self, data: &[u8]) -> Result<()> {
        self.expect_status(Status::WaitForAccept)?;
        let adata: AcceptData = serde_json::from_slice(data)?;
        let pub_key = types::str_to_pubkey(&adata.pubkey)?;
        let (txins, txout) = types::decode_inputs_output(&adata.inputs, &adata.output)?;
        {
            let c = self.contract_mut()?;
            let other = c.side().other();
            c.set_public_key(pub_key, other);
            c.set_txins_txout(txins, txout, other);
        }
        self.verify_settlement_signs(&adata.signs)?;
        let rsign = hex::decode(&adata.rsign)?;
        {
            let c = self.contract_mut()?;
            c.verify_refund(&rsign, &pub_key)?;
            let other = c.side().other();
            c.set_refund_sign(rsign, other);
        }
        self.status = Status::CanGetSign;
        Ok(())
    }

    // ── Step 3: sign ─────────────────────────────────────────────────────────

    /// Sign every settlement transaction paying the acceptor, the refund,
    /// and this side's fund inputs; emit the sign blob.
    pub fn sign_data(&mut self) -> Result<Vec<u8>> {
        self.expect_status(Status::CanGetSign)?;
        let signs = self.settlement_signs_for_other()?;

        let ftws = {
            let wallet = &self.wallet;
            let c = self.contract.as_mut().ok_or(Error::IllegalStatus("no contract"))?;
            let side = c.side();
            let mut tx = c.fund_tx()?;
            wallet.sign_tx(&mut tx)?;
            // Our inputs come first when we are A, after A's otherwise.
            let offset = match side {
                Side::A => 0,
                Side::B => c.fund_txins(Side::A).len(),
            };
            let own = c.fund_txins(side).len();
            for i in 0..own {
                let witness = tx.input[offset + i].witness.clone();
                c.fund_txins_mut(side)[i].witness = witness;
            }
            tx.input
                .iter()
                .filter(|txin| !txin.witness.is_empty())
                .map(|txin| txin.witness.clone())
                .collect::<Vec<Witness>>()
        };

        let rsign = self.refund_sign_own()?;
        let blob = SignData {
            ftws: types::witnesses_to_hex(&ftws),
            signs,
            rsign: hex::encode(rsign),
        };
        self.status = Status::WaitSendTx;
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Verify the offerer's signatures and adopt its fund witnesses.
    pub fn set_sign_data(&mut self, data: &[u8]) -> Result<()> {
        self.expect_status(Status::WaitForSign)?;
        let sdata: SignData = serde_json::from_slice(data)?;
        let tws = types::hex_to_witnesses(&sdata.ftws)?;
        {
            let c = self.contract_mut()?;
            let other = c.side().other();
            let txins = c.fund_txins_mut(other);
            if tws.len() != txins.len() {
                return Err(Error::Parse(format!(
                    "{} witnesses for {} inputs",
                    tws.len(),
                    txins.len()
                )));
            }
            for (txin, tw) in txins.iter_mut().zip(tws) {
                txin.witness = tw;
            }
        }
        self.verify_settlement_signs(&sdata.signs)?;
        let rsign = hex::decode(&sdata.rsign)?;
        {
            let c = self.contract_mut()?;
            let other = c.side().other();
            let pub_key = c
                .public_key(other)
                .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
            c.verify_refund(&rsign, &pub_key)?;
            c.set_refund_sign(rsign, other);
        }
        self.status = Status::WaitSendTx;
        Ok(())
    }

    /// Sign this side's fund inputs and broadcast the fund transaction.
    pub fn send_fund_tx(&mut self) -> Result<Txid> {
        self.expect_status(Status::WaitSendTx)?;
        let wallet = &self.wallet;
        let c = self.contract.as_ref().ok_or(Error::IllegalStatus("no contract"))?;
        let mut tx = c.fund_tx()?;
        wallet.sign_tx(&mut tx)?;
        let txid = wallet.send_tx(&tx)?;
        println!("{} sends the Fund Transaction : {}", self.name, txid);
        println!(
            "txout[0]: {:>10} / {}",
            tx.output[0].value.to_sat(),
            hex::encode(tx.output[0].script_pubkey.as_bytes())
        );
        Ok(txid)
    }

    // ── Step 4: attestation ──────────────────────────────────────────────────

    pub fn set_oracle_keys(&mut self, data: &[u8]) -> Result<()> {
        let okeys: OracleKeys = serde_json::from_slice(data)?;
        let pub_o = types::str_to_pubkey(&okeys.pubkey)?;
        let mut keys = Vec::with_capacity(okeys.keys.len());
        for key in &okeys.keys {
            keys.push(types::str_to_pubkey(key)?);
        }
        self.contract_mut()?.set_oracle_keys(pub_o, keys)
    }

    pub fn set_oracle_signs(&mut self, data: &[u8]) -> Result<()> {
        self.expect_status(Status::WaitSendTx)?;
        let osigs: OracleSigns = serde_json::from_slice(data)?;
        let mut msgs = Vec::with_capacity(osigs.msgs.len());
        for m in &osigs.msgs {
            msgs.push(hex::decode(m)?);
        }
        let mut signs = Vec::with_capacity(osigs.signs.len());
        for s in &osigs.signs {
            signs.push(parse_scalar(s)?);
        }
        let name = self.name.clone();
        let c = self.contract_mut()?;
        let idx = c.set_oracle_signs(msgs, signs)?;
        let side = c.side();
        let fund_amount = c.fund_amount();
        let rate = &c.rates()[idx];
        let msgs_str: Vec<String> = rate
            .msgs()
            .iter()
            .map(|m| match m {
                Some(b) => format!("{b:02x}"),
                None => "--".into(),
            })
            .collect();
        let verdict = if rate.amount(side) > fund_amount / 2 {
            "Win "
        } else {
            "Lose"
        };
        println!(
            "{:<5} {} msgs:{} / amount_A,B:{},{}",
            name,
            verdict,
            msgs_str.join(","),
            rate.amount(Side::A),
            rate.amount(Side::B)
        );
        Ok(())
    }

    // ── Step 5: settlement ───────────────────────────────────────────────────

    /// Combine both settlement signatures into the 2-of-2 witness and
    /// broadcast. Witness order is A's signature then B's, regardless of
    /// which side broadcasts.
    pub fn send_settlement_tx(&mut self) -> Result<Txid> {
        let wallet = &self.wallet;
        let c = self.contract.as_ref().ok_or(Error::IllegalStatus("no contract"))?;
        let side = c.side();
        let (_, rate) = c
            .fixed_rate()
            .ok_or_else(|| Error::Parse("rate no fix".into()))?;
        let rate = rate.clone();
        let mut tx = c
            .settlement_tx(&rate, side)?
            .ok_or_else(|| Error::Parse("no settlement transaction for this side".into()))?;
        let sign1 = rate.received_sign.clone().ok_or(Error::SignatureInvalid)?;
        let own_pub = c
            .public_key(side)
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let script = c.fund_script()?;
        let amt = c.fund_amount() + c.settlement_fee();
        let sign2 = wallet.witness_signature(&tx, 0, amt, &script, &own_pub)?;
        let (sig_a, sig_b) = match side {
            Side::A => (sign2, sign1),
            Side::B => (sign1, sign2),
        };
        tx.input[0].witness =
            Witness::from_slice(&[Vec::new(), sig_a, sig_b, script.into_bytes()]);
        let txid = wallet.send_tx(&tx)?;
        self.dump_tx("Settlement Transaction", &txid, &tx);
        Ok(txid)
    }

    /// Spend the settlement winner branch to a fresh wallet key, signing
    /// with `private key + attestation scalar`.
    pub fn send_forward_tx(&mut self, efee: i64) -> Result<Txid> {
        let wallet = &self.wallet;
        let c = self.contract.as_ref().ok_or(Error::IllegalStatus("no contract"))?;
        let side = c.side();
        let (_, rate) = c
            .fixed_rate()
            .ok_or_else(|| Error::Parse("rate no fix".into()))?;
        let rate = rate.clone();
        let pk_script = wallet.p2wpkh_script(&wallet.get_public_key());
        let (mut tx, amt, script) = c.forward_tx(&rate, side, &pk_script, efee)?;
        let own_pub = c
            .public_key(side)
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let msign = rate
            .msign
            .ok_or_else(|| Error::AttestationInvalid("attestation scalar not set".into()))?;
        let sign =
            wallet.witness_signature_add(&tx, 0, amt, &script, &own_pub, Some(&msign))?;
        tx.input[0].witness =
            Witness::from_slice(&[sign, vec![0x01], script.into_bytes()]);
        let txid = wallet.send_tx(&tx)?;
        self.dump_tx("Forward Transaction", &txid, &tx);
        Ok(txid)
    }

    /// Broadcast the refund once the locktime has passed.
    pub fn send_refund_tx(&mut self) -> Result<Txid> {
        let tx = self.contract()?.refund_tx()?;
        let txid = self.wallet.send_tx(&tx)?;
        self.dump_tx("Refund Transaction", &txid, &tx);
        Ok(txid)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    /// Signatures for every settlement transaction paying the counterparty.
    /// Rates the counterparty cannot broadcast produce an empty entry.
    fn settlement_signs_for_other(&mut self) -> Result<Vec<String>> {
        let wallet = &self.wallet;
        let c = self.contract.as_mut().ok_or(Error::IllegalStatus("no contract"))?;
        let side = c.side();
        let other = side.other();
        let own_pub = c
            .public_key(side)
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let script = c.fund_script()?;
        let amt = c.fund_amount() + c.settlement_fee();
        let n = c.rates().len();
        let mut signs = Vec::with_capacity(n);
        for idx in 0..n {
            let rate = c.rates()[idx].clone();
            match c.settlement_tx(&rate, other)? {
                None => signs.push(String::new()),
                Some(tx) => {
                    c.cache_counterparty_txid(idx, tx.compute_txid());
                    let sign = wallet.witness_signature(&tx, 0, amt, &script, &own_pub)?;
                    signs.push(hex::encode(sign));
                }
            }
        }
        Ok(signs)
    }

    /// Verify the counterparty's per-rate signatures over the settlement
    /// transactions paying this side.
    fn verify_settlement_signs(&mut self, signs: &[String]) -> Result<()> {
        let c = self.contract.as_mut().ok_or(Error::IllegalStatus("no contract"))?;
        let side = c.side();
        let other_pub = c
            .public_key(side.other())
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        if c.rates().len() != signs.len() {
            return Err(Error::Parse(format!(
                "{} signatures for {} rates",
                signs.len(),
                c.rates().len()
            )));
        }
        for (idx, sign) in signs.iter().enumerate() {
            if sign.is_empty() {
                // A missing signature is only allowed where we take nothing.
                if c.rates()[idx].amount(side) != 0 {
                    return Err(Error::SignatureInvalid);
                }
                continue;
            }
            let bs = hex::decode(sign)?;
            c.verify_settlement(idx, &bs, &other_pub)?;
        }
        Ok(())
    }

    /// Sign the refund transaction and record our own signature.
    fn refund_sign_own(&mut self) -> Result<Vec<u8>> {
        let wallet = &self.wallet;
        let c = self.contract.as_mut().ok_or(Error::IllegalStatus("no contract"))?;
        let side = c.side();
        let own_pub = c
            .public_key(side)
            .ok_or_else(|| Error::Parse("fund keys not exchanged".into()))?;
        let script = c.fund_script()?;
        let amt = c.fund_amount() + c.settlement_fee();
        let rtx = c.refund_tx()?;
        let rsign = wallet.witness_signature(&rtx, 0, amt, &script, &own_pub)?;
        c.set_refund_sign(rsign.clone(), side);
        Ok(rsign)
    }

    fn dump_tx(&self, label: &str, txid: &Txid, tx: &Transaction) {
        println!("{} sends the {} : {}", self.name, label, txid);
        for (idx, txin) in tx.input.iter().enumerate() {
            println!("txin [{idx}]: {}", txin.previous_output);
        }
        for (idx, txout) in tx.output.iter().enumerate() {
            println!(
                "txout[{idx}]: {:>10} / {}",
                txout.value.to_sat(),
                hex::encode(txout.script_pubkey.as_bytes())
            );
        }
    }
}

fn parse_scalar(s: &str) -> Result<SecretKey> {
    let bs = hex::decode(s)?;
    if bs.len() > 32 {
        return Err(Error::Parse(format!("scalar too long: {} bytes", bs.len())));
    }
    // Scalars may arrive with leading zeros trimmed.
    let mut buf = [0u8; 32];
    buf[32 - bs.len()..].copy_from_slice(&bs);
    SecretKey::from_slice(&buf).map_err(|e| Error::AttestationInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{PublicKey, Secp256k1};

    fn party(name: &str) -> Party {
        let rpc = BtcRpc::new("http://localhost:18443", "user", "pass");
        Party::new(name, Network::Regtest, rpc).unwrap()
    }

    fn offer_blob(length: usize, pubkey: &str) -> Vec<u8> {
        serde_json::to_vec(&OfferData {
            high: true,
            amount: 100_000_000,
            fefee: 10,
            sefee: 10,
            height: 500,
            length,
            pubkey: pubkey.into(),
            inputs: vec![],
            output: String::new(),
        })
        .unwrap()
    }

    fn valid_pubkey() -> String {
        let secp = Secp256k1::new();
        let sk = secp256k1::SecretKey::from_slice(&[3u8; 32]).unwrap();
        hex::encode(PublicKey::from_secret_key(&secp, &sk).serialize())
    }

    #[test]
    fn operations_outside_their_status_are_rejected() {
        let mut bob = party("Bob");
        assert!(matches!(bob.accept_data(), Err(Error::IllegalStatus(_))));
        assert!(matches!(bob.sign_data(), Err(Error::IllegalStatus(_))));
        assert!(matches!(
            bob.set_accept_data(b"{}"),
            Err(Error::IllegalStatus(_))
        ));
        assert!(matches!(
            bob.set_sign_data(b"{}"),
            Err(Error::IllegalStatus(_))
        ));
        assert!(matches!(bob.send_fund_tx(), Err(Error::IllegalStatus(_))));
    }

    #[test]
    fn offer_intake_mirrors_the_contract() {
        let mut bob = party("Bob");
        bob.set_offer_data(&offer_blob(1, &valid_pubkey())).unwrap();
        assert_eq!(bob.status(), Status::CanGetAccept);
        assert_eq!(bob.game_height().unwrap(), 500);
        assert_eq!(bob.locktime().unwrap(), 644);

        // The handshake only moves forward.
        assert!(matches!(
            bob.set_offer_data(&offer_blob(1, &valid_pubkey())),
            Err(Error::IllegalStatus(_))
        ));
    }

    #[test]
    fn offer_intake_validates_inputs() {
        let mut bob = party("Bob");
        assert!(matches!(
            bob.set_offer_data(&offer_blob(0, &valid_pubkey())),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            bob.set_offer_data(&offer_blob(3, &valid_pubkey())),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            bob.set_offer_data(&offer_blob(1, "zz")),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            bob.set_offer_data(b"not json"),
            Err(Error::Parse(_))
        ));
        // Failed intake leaves the party reusable.
        assert_eq!(bob.status(), Status::None);
    }

    #[test]
    fn clear_resets_the_session() {
        let mut bob = party("Bob");
        bob.set_offer_data(&offer_blob(1, &valid_pubkey())).unwrap();
        bob.clear();
        assert_eq!(bob.status(), Status::None);
        bob.set_offer_data(&offer_blob(2, &valid_pubkey())).unwrap();
        assert_eq!(bob.status(), Status::CanGetAccept);
    }

    #[test]
    fn scalars_with_trimmed_leading_zeros_parse() {
        let full = parse_scalar(&format!("{:064}", 7)).unwrap();
        let trimmed = parse_scalar("07").unwrap();
        assert_eq!(full, trimmed);
        assert!(parse_scalar(&"00".repeat(33)).is_err());
    }
}
