//! Shared constants, wire blobs and byte codecs
//!
//! The three handshake blobs and the two oracle blobs are JSON with
//! hex-encoded binary fields. Blobs are exchanged out of band; nothing here
//! assumes a transport.

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, ScriptBuf, Sequence, TxIn, TxOut, Txid, Witness};
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ── Fee estimation constants ─────────────────────────────────────────────────
// Fixed byte sizes used only for fee math; they do not gate correctness.

/// Settlement transaction size (bytes).
pub const SETTLEMENT_TX_SIZE: i64 = 345;
/// Fund transaction base size including one output (bytes).
pub const FUND_TX_BASE_SIZE: i64 = 55;
/// Size per transaction input (bytes).
pub const TXIN_SIZE: i64 = 149;
/// Size per transaction output (bytes).
pub const TXOUT_SIZE: i64 = 31;

// ── Handshake blobs ──────────────────────────────────────────────────────────

/// Step 1, offerer -> acceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferData {
    /// Does the offerer take the high side?
    pub high: bool,
    /// Total fund amount (satoshi).
    pub amount: i64,
    /// Fund transaction fee estimate (satoshi/byte).
    pub fefee: i64,
    /// Settlement transaction fee estimate (satoshi/byte).
    pub sefee: i64,
    /// Target block height the oracle attests.
    pub height: u32,
    /// Outcome message length in bytes.
    pub length: usize,
    /// Offerer fund-script public key (compressed hex).
    pub pubkey: String,
    /// Offerer fund inputs (hex outpoints: txid bytes ++ vout LE).
    pub inputs: Vec<String>,
    /// Offerer change output (hex txout), empty if none.
    pub output: String,
}

/// Step 2, acceptor -> offerer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptData {
    pub pubkey: String,
    pub inputs: Vec<String>,
    pub output: String,
    /// Per-rate settlement signatures paying the offerer; empty string for
    /// rates where the offerer's share is zero.
    pub signs: Vec<String>,
    /// Refund signature.
    pub rsign: String,
}

/// Step 3, offerer -> acceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignData {
    /// Witness stack per offerer fund input.
    pub ftws: Vec<Vec<String>>,
    /// Per-rate settlement signatures paying the acceptor.
    pub signs: Vec<String>,
    pub rsign: String,
}

// ── Oracle blobs ─────────────────────────────────────────────────────────────

/// Published ahead of the game: fixed key O and per-position nonces R_i.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleKeys {
    pub pubkey: String,
    pub keys: Vec<String>,
}

/// Published at attestation time: per-position messages and scalars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleSigns {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub msgs: Vec<String>,
    pub signs: Vec<String>,
}

// ── Byte codecs ──────────────────────────────────────────────────────────────

/// Outpoint -> 36 bytes: txid as stored ++ 4-byte LE vout.
pub fn outpoint_to_bytes(op: &OutPoint) -> Vec<u8> {
    let mut bs = op.txid.to_byte_array().to_vec();
    bs.extend_from_slice(&op.vout.to_le_bytes());
    bs
}

pub fn bytes_to_outpoint(bs: &[u8]) -> Result<OutPoint> {
    if bs.len() != 36 {
        return Err(Error::Parse(format!("illegal outpoint size: {}", bs.len())));
    }
    let txid = Txid::from_byte_array(bs[..32].try_into().expect("32 bytes"));
    let vout = u32::from_le_bytes(bs[32..].try_into().expect("4 bytes"));
    Ok(OutPoint { txid, vout })
}

/// TxOut -> 8-byte LE value ++ compact-size script length ++ pkScript.
/// This is exactly the consensus encoding of a txout.
pub fn txout_to_bytes(txout: &TxOut) -> Vec<u8> {
    serialize(txout)
}

pub fn bytes_to_txout(bs: &[u8]) -> Result<TxOut> {
    deserialize(bs).map_err(|e| Error::Parse(format!("illegal txout: {e}")))
}

/// Parse the hex `inputs`/`output` fields of a handshake blob into bare
/// txins (no witness) and an optional change output.
pub fn decode_inputs_output(inputs: &[String], output: &str) -> Result<(Vec<TxIn>, Option<TxOut>)> {
    let mut txins = Vec::with_capacity(inputs.len());
    for input in inputs {
        let op = bytes_to_outpoint(&hex::decode(input)?)?;
        txins.push(TxIn {
            previous_output: op,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::default(),
        });
    }
    let txout = if output.is_empty() {
        None
    } else {
        Some(bytes_to_txout(&hex::decode(output)?)?)
    };
    Ok((txins, txout))
}

pub fn encode_inputs(txins: &[TxIn]) -> Vec<String> {
    txins
        .iter()
        .map(|txin| hex::encode(outpoint_to_bytes(&txin.previous_output)))
        .collect()
}

pub fn encode_output(txout: Option<&TxOut>) -> String {
    txout.map(|t| hex::encode(txout_to_bytes(t))).unwrap_or_default()
}

/// Witness stacks <-> nested hex arrays for the sign blob.
pub fn witnesses_to_hex(tws: &[Witness]) -> Vec<Vec<String>> {
    tws.iter()
        .map(|tw| tw.iter().map(hex::encode).collect())
        .collect()
}

pub fn hex_to_witnesses(sss: &[Vec<String>]) -> Result<Vec<Witness>> {
    let mut tws = Vec::with_capacity(sss.len());
    for ss in sss {
        let mut elems = Vec::with_capacity(ss.len());
        for s in ss {
            elems.push(hex::decode(s)?);
        }
        tws.push(Witness::from_slice(&elems));
    }
    Ok(tws)
}

pub fn str_to_pubkey(s: &str) -> Result<PublicKey> {
    Ok(PublicKey::from_slice(&hex::decode(s)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::Amount;
    use std::str::FromStr;

    fn sample_outpoint() -> OutPoint {
        OutPoint {
            txid: Txid::from_str(
                "9f36ba8114f19746a7a544f4dd598d9a1cbee2184a87c6309b157d4ac07604a0",
            )
            .unwrap(),
            vout: 7,
        }
    }

    #[test]
    fn outpoint_codec_round_trip() {
        let op = sample_outpoint();
        let bs = outpoint_to_bytes(&op);
        assert_eq!(bs.len(), 36);
        assert_eq!(bytes_to_outpoint(&bs).unwrap(), op);
        assert!(bytes_to_outpoint(&bs[..35]).is_err());
    }

    #[test]
    fn txout_codec_round_trip() {
        let txout = TxOut {
            value: Amount::from_sat(123_456),
            script_pubkey: ScriptBuf::from_bytes(vec![0x00, 0x14, 0xab]),
        };
        let bs = txout_to_bytes(&txout);
        assert_eq!(&bs[..8], &123_456u64.to_le_bytes());
        assert_eq!(bytes_to_txout(&bs).unwrap(), txout);

        let mut trailing = bs.clone();
        trailing.push(0x00);
        assert!(bytes_to_txout(&trailing).is_err());
    }

    #[test]
    fn offer_blob_round_trip_is_byte_identical() {
        let offer = OfferData {
            high: true,
            amount: 100_000_000,
            fefee: 10,
            sefee: 10,
            height: 500,
            length: 1,
            pubkey: "02".repeat(33),
            inputs: vec![hex::encode(outpoint_to_bytes(&sample_outpoint()))],
            output: String::new(),
        };
        let bs = serde_json::to_vec(&offer).unwrap();
        let back: OfferData = serde_json::from_slice(&bs).unwrap();
        assert_eq!(serde_json::to_vec(&back).unwrap(), bs);
    }

    #[test]
    fn accept_and_sign_blob_round_trips_are_byte_identical() {
        let accept = AcceptData {
            pubkey: "03".repeat(33),
            inputs: vec![],
            output: "ff".into(),
            signs: vec![String::new(), "3044".into()],
            rsign: "3045".into(),
        };
        let bs = serde_json::to_vec(&accept).unwrap();
        let back: AcceptData = serde_json::from_slice(&bs).unwrap();
        assert_eq!(serde_json::to_vec(&back).unwrap(), bs);

        let sign = SignData {
            ftws: vec![vec!["3044".into(), "02".repeat(33)]],
            signs: vec!["3044".into()],
            rsign: "3045".into(),
        };
        let bs = serde_json::to_vec(&sign).unwrap();
        let back: SignData = serde_json::from_slice(&bs).unwrap();
        assert_eq!(serde_json::to_vec(&back).unwrap(), bs);
    }

    #[test]
    fn witness_hex_round_trip() {
        let tw = Witness::from_slice(&[vec![0x30, 0x44], vec![0x02; 33]]);
        let sss = witnesses_to_hex(&[tw.clone()]);
        let back = hex_to_witnesses(&sss).unwrap();
        assert_eq!(back, vec![tw]);
    }
}
