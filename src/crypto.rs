//! secp256k1 primitives for the oracle commitment scheme
//!
//! The oracle publishes a fixed key O and per-position nonce points R. A
//! message m is committed to as `Commit(R, O, m) = R - H(R,m)*O`; the
//! matching attestation scalar is `s = r - H(R,m)*o`, so `s*G = Commit`.

use secp256k1::{constants, All, PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// H(R, m): SHA-256 over the uncompressed point followed by the message.
pub fn oracle_hash(r: &PublicKey, m: &[u8]) -> [u8; 32] {
    let mut s = Sha256::new();
    s.update(r.serialize_uncompressed());
    s.update(m);
    s.finalize().into()
}

/// H(R, m) reduced into the scalar field.
pub fn hash_scalar(r: &PublicKey, m: &[u8]) -> Scalar {
    reduce_mod_order(oracle_hash(r, m))
}

/// Reduce a 32-byte digest mod the curve order. A digest is always below
/// twice the order, so a single conditional subtract is exact.
fn reduce_mod_order(bytes: [u8; 32]) -> Scalar {
    if let Ok(s) = Scalar::from_be_bytes(bytes) {
        return s;
    }
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let d = bytes[i] as i16 - constants::CURVE_ORDER[i] as i16 - borrow;
        if d < 0 {
            out[i] = (d + 256) as u8;
            borrow = 1;
        } else {
            out[i] = d as u8;
            borrow = 0;
        }
    }
    Scalar::from_be_bytes(out).expect("value below the curve order after reduction")
}

/// Commit(R, O, m) = R + (-H(R,m))*O. The adaptor-point contribution of a
/// single message position.
pub fn commit(secp: &Secp256k1<All>, r: &PublicKey, o: &PublicKey, m: &[u8]) -> Result<PublicKey> {
    let h = hash_scalar(r, m);
    let h_o = o
        .mul_tweak(secp, &h)
        .map_err(|e| Error::AttestationInvalid(e.to_string()))?;
    r.combine(&h_o.negate(secp))
        .map_err(|e| Error::AttestationInvalid(e.to_string()))
}

/// Oracle-side attestation scalar: s = r - H(R,m)*o mod n.
pub fn oracle_sign(r: &SecretKey, o: &SecretKey, m: &[u8]) -> Result<SecretKey> {
    let secp = Secp256k1::new();
    let h = hash_scalar(&PublicKey::from_secret_key(&secp, r), m);
    let h_o = o
        .mul_tweak(&h)
        .map_err(|e| Error::AttestationInvalid(e.to_string()))?;
    r.add_tweak(&Scalar::from(h_o.negate()))
        .map_err(|e| Error::AttestationInvalid(e.to_string()))
}

/// Sum of attestation scalars mod n.
pub fn sum_scalars(parts: &[SecretKey]) -> Result<SecretKey> {
    let mut iter = parts.iter();
    let first = iter
        .next()
        .ok_or_else(|| Error::AttestationInvalid("empty scalar set".into()))?;
    let mut sum = *first;
    for part in iter {
        sum = sum
            .add_tweak(&Scalar::from(*part))
            .map_err(|e| Error::AttestationInvalid(e.to_string()))?;
    }
    Ok(sum)
}

/// Private key plus attestation scalar mod n, for spending the winner
/// branch of the settlement script.
pub fn add_secret(sk: &SecretKey, delta: &SecretKey) -> Result<SecretKey> {
    sk.add_tweak(&Scalar::from(*delta))
        .map_err(|e| Error::AttestationInvalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sk(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).unwrap()
    }

    #[test]
    fn attestation_scalar_matches_commitment() {
        let secp = Secp256k1::new();
        let o = sk(0x11);
        let r = sk(0x22);
        let o_pub = PublicKey::from_secret_key(&secp, &o);
        let r_pub = PublicKey::from_secret_key(&secp, &r);

        for m in [&[0x00u8][..], &[0x7f], &[0xff], &[0x01, 0x02]] {
            let p = commit(&secp, &r_pub, &o_pub, m).unwrap();
            let s = oracle_sign(&r, &o, m).unwrap();
            assert_eq!(PublicKey::from_secret_key(&secp, &s), p);
        }
    }

    #[test]
    fn hash_scalar_is_deterministic_and_message_bound() {
        let secp = Secp256k1::new();
        let r_pub = PublicKey::from_secret_key(&secp, &sk(0x33));
        let a = hash_scalar(&r_pub, &[0x01]);
        let b = hash_scalar(&r_pub, &[0x01]);
        let c = hash_scalar(&r_pub, &[0x02]);
        assert_eq!(a.to_be_bytes(), b.to_be_bytes());
        assert_ne!(a.to_be_bytes(), c.to_be_bytes());
    }

    #[test]
    fn reduce_handles_values_above_the_order() {
        let reduced = reduce_mod_order([0xff; 32]);
        let direct = Scalar::from_be_bytes(reduced.to_be_bytes()).unwrap();
        assert_eq!(reduced.to_be_bytes(), direct.to_be_bytes());
    }

    #[test]
    fn scalar_sum_matches_point_sum() {
        let secp = Secp256k1::new();
        let s1 = sk(0x44);
        let s2 = sk(0x55);
        let sum = sum_scalars(&[s1, s2]).unwrap();
        let expect = PublicKey::from_secret_key(&secp, &s1)
            .combine(&PublicKey::from_secret_key(&secp, &s2))
            .unwrap();
        assert_eq!(PublicKey::from_secret_key(&secp, &sum), expect);
    }
}
