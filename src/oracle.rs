//! Demo attestor
//!
//! Keys are derived deterministically from the oracle's name so that every
//! run of the demo meets the same oracle. For a target height the oracle
//! commits to a fixed key O and one nonce point R per message position, then
//! publishes `s_i = r_i - H(R_i, m_i) * o` once the outcome is known.

use std::collections::HashMap;

use bitcoin::bip32::{ChildNumber, Xpriv};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{BlockHash, Network};
use secp256k1::{All, PublicKey, Secp256k1, SecretKey};

use crate::error::{Error, Result};
use crate::rpc::BtcRpc;
use crate::types::{OracleKeys, OracleSigns};
use crate::crypto;

pub struct Oracle {
    rpc: BtcRpc,
    secp: Secp256k1<All>,
    base: Xpriv,
    values: HashMap<u32, Vec<u8>>,
}

impl Oracle {
    pub fn new(name: &str, params: Network, rpc: BtcRpc) -> Result<Oracle> {
        let secp = Secp256k1::new();
        let seed = sha256d::Hash::hash(name.as_bytes());
        let master =
            Xpriv::new_master(params, seed.as_byte_array()).map_err(|e| Error::Parse(e.to_string()))?;
        let path: Vec<ChildNumber> = [1u32, 2, 3, 4, 5]
            .iter()
            .map(|i| ChildNumber::from_normal_idx(*i).expect("small index"))
            .collect();
        let base = master
            .derive_priv(&secp, &path)
            .map_err(|e| Error::Parse(e.to_string()))?;
        Ok(Oracle {
            rpc,
            secp,
            base,
            values: HashMap::new(),
        })
    }

    fn key_at(&self, path: &[u32]) -> Result<(SecretKey, PublicKey)> {
        let children: Vec<ChildNumber> = path
            .iter()
            .map(|i| ChildNumber::from_normal_idx(*i))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Parse(e.to_string()))?;
        let node = self
            .base
            .derive_priv(&self.secp, &children)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let sk = node.private_key;
        Ok((sk, PublicKey::from_secret_key(&self.secp, &sk)))
    }

    /// Keys blob for a target height: the fixed key and one nonce per
    /// message position.
    pub fn keys(&self, height: u32, length: usize) -> Result<Vec<u8>> {
        let (_, pub_o) = self.key_at(&[height])?;
        let mut keys = Vec::with_capacity(length);
        for i in 0..length {
            let (_, r) = self.key_at(&[height, i as u32])?;
            keys.push(hex::encode(r.serialize()));
        }
        let blob = OracleKeys {
            pubkey: hex::encode(pub_o.serialize()),
            keys,
        };
        Ok(serde_json::to_vec(&blob)?)
    }

    /// Script the outcome for a height (scenario driving).
    pub fn set_value(&mut self, height: u32, value: Vec<u8>) {
        self.values.insert(height, value);
    }

    /// Attest from the chain: the outcome is the leading bytes of the block
    /// hash at the target height.
    pub fn attest_from_chain(&mut self, height: u32, length: usize) -> Result<Vec<u8>> {
        let hash: BlockHash = self
            .rpc
            .get_block_hash(height as i64)?
            .parse()
            .map_err(|_| Error::Parse("bad block hash from node".into()))?;
        let value = hash.to_byte_array()[..length].to_vec();
        self.values.insert(height, value.clone());
        Ok(value)
    }

    /// Signs blob for a height. Fails until the outcome is known.
    pub fn signs(&self, height: u32) -> Result<Vec<u8>> {
        let value = self
            .values
            .get(&height)
            .ok_or_else(|| Error::Parse(format!("not found value {height}")))?;
        let (o, _) = self.key_at(&[height])?;
        let mut msgs = Vec::with_capacity(value.len());
        let mut signs = Vec::with_capacity(value.len());
        for (i, byte) in value.iter().enumerate() {
            let (r, _) = self.key_at(&[height, i as u32])?;
            let m = [*byte];
            let s = crypto::oracle_sign(&r, &o, &m)?;
            msgs.push(hex::encode(m));
            signs.push(hex::encode(s.secret_bytes()));
        }
        let blob = OracleSigns {
            hash: None,
            value: Some(hex::encode(value)),
            msgs,
            signs,
        };
        Ok(serde_json::to_vec(&blob)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oracle(name: &str) -> Oracle {
        let rpc = BtcRpc::new("http://localhost:18443", "user", "pass");
        Oracle::new(name, Network::Regtest, rpc).unwrap()
    }

    #[test]
    fn keys_are_deterministic_per_name() {
        let a = oracle("Olivia").keys(500, 2).unwrap();
        let b = oracle("Olivia").keys(500, 2).unwrap();
        let c = oracle("Oscar").keys(500, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let blob: OracleKeys = serde_json::from_slice(&a).unwrap();
        assert_eq!(blob.keys.len(), 2);
    }

    #[test]
    fn published_scalars_open_the_commitments() {
        let secp = Secp256k1::new();
        let mut olivia = oracle("Olivia");
        olivia.set_value(500, vec![0xff, 0x02]);

        let keys: OracleKeys = serde_json::from_slice(&olivia.keys(500, 2).unwrap()).unwrap();
        let signs: OracleSigns = serde_json::from_slice(&olivia.signs(500).unwrap()).unwrap();
        assert_eq!(signs.value.as_deref(), Some("ff02"));
        assert_eq!(signs.msgs, vec!["ff", "02"]);

        let pub_o = PublicKey::from_slice(&hex::decode(&keys.pubkey).unwrap()).unwrap();
        for i in 0..2 {
            let r = PublicKey::from_slice(&hex::decode(&keys.keys[i]).unwrap()).unwrap();
            let m = hex::decode(&signs.msgs[i]).unwrap();
            let s = SecretKey::from_slice(&hex::decode(&signs.signs[i]).unwrap()).unwrap();
            let p = crypto::commit(&secp, &r, &pub_o, &m).unwrap();
            assert_eq!(PublicKey::from_secret_key(&secp, &s), p);
        }
    }

    #[test]
    fn signs_requires_a_known_outcome() {
        assert!(oracle("Olivia").signs(501).is_err());
    }
}
