//! Payoff table and adaptor engine
//!
//! A game over L message bytes has 256^L outcomes. The table collapses the
//! two extreme quarters into per-last-byte equivalence classes (don't-care
//! positions), pays linearly across the middle half, and binds every rate to
//! an adaptor point derived from the oracle keys.

use bitcoin::Txid;
use secp256k1::{All, PublicKey, Secp256k1, SecretKey};

use crate::crypto;
use crate::error::{Error, Result};

/// Which participant a value or key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// One outcome: message vector, payout split, and the attestation state that
/// accumulates as the protocol advances.
#[derive(Debug, Clone)]
pub struct Rate {
    /// Per-position message byte; `None` means any byte matches.
    msgs: Vec<Option<u8>>,
    amt_a: i64,
    amt_b: i64,
    /// Adaptor point, set once the oracle keys are known.
    pub key: Option<PublicKey>,
    /// Counterparty settlement signature for this rate (DER ++ sighash byte).
    pub received_sign: Option<Vec<u8>>,
    /// Recovered attestation scalar; `msign * G == key`.
    pub msign: Option<SecretKey>,
    /// Settlement txid as seen from the counterparty's perspective.
    pub txid: Option<Txid>,
}

impl Rate {
    fn new(msgs: Vec<Option<u8>>, amt_a: i64, amt_b: i64) -> Rate {
        Rate {
            msgs,
            amt_a,
            amt_b,
            key: None,
            received_sign: None,
            msign: None,
            txid: None,
        }
    }

    pub fn msgs(&self) -> &[Option<u8>] {
        &self.msgs
    }

    pub fn amount(&self, side: Side) -> i64 {
        match side {
            Side::A => self.amt_a,
            Side::B => self.amt_b,
        }
    }
}

/// Build the payoff curve for a fund amount and message length.
/// Both parties derive the table independently; it must match byte for byte,
/// so the linear ramp uses integer arithmetic only.
pub fn rate_table(amount: i64, length: usize) -> Vec<Rate> {
    let q: i64 = 256i64.pow(length as u32) / 4;
    let mut rates = Vec::with_capacity((q * 4) as usize);

    // First quarter: the low bettor takes everything. Only the last position
    // is pinned, so one rate covers every outcome sharing that byte.
    for x in 0..q {
        let mut msgs = vec![None; length];
        msgs[length - 1] = Some((x % 256) as u8);
        rates.push(Rate::new(msgs, 0, amount));
    }

    // Middle half: linear ramp from 0 at x = q-1 to `amount` at x = 3q.
    //   high = round(amount * (x - q + 1) / (2q + 1))
    let den = 2 * q as i128 + 1;
    for x in q..3 * q {
        let mut msgs = vec![None; length];
        let mut tmp = x;
        for m in msgs.iter_mut() {
            *m = Some((tmp % 256) as u8);
            tmp /= 256;
        }
        let num = amount as i128 * (x - q + 1) as i128;
        let high = ((2 * num + den) / (2 * den)) as i64;
        rates.push(Rate::new(msgs, high, amount - high));
    }

    // Last quarter: the high bettor takes everything.
    for x in 3 * q..4 * q {
        let mut msgs = vec![None; length];
        msgs[length - 1] = Some((x % 256) as u8);
        rates.push(Rate::new(msgs, amount, 0));
    }

    rates
}

/// Bind every rate to its adaptor point:
/// `P = sum of Commit(R_i, O, m_i)` over the specified positions.
pub fn set_oracle_keys(
    secp: &Secp256k1<All>,
    rates: &mut [Rate],
    pub_o: &PublicKey,
    keys: &[PublicKey],
) -> Result<()> {
    for rate in rates.iter_mut() {
        if keys.len() < rate.msgs.len() {
            return Err(Error::Parse(format!(
                "oracle published {} nonces for {} positions",
                keys.len(),
                rate.msgs.len()
            )));
        }
        let mut point: Option<PublicKey> = None;
        for (idx, m) in rate.msgs.iter().enumerate() {
            let Some(byte) = m else { continue };
            let p = crypto::commit(secp, &keys[idx], pub_o, &[*byte])?;
            point = Some(match point {
                None => p,
                Some(acc) => acc
                    .combine(&p)
                    .map_err(|e| Error::AttestationInvalid(e.to_string()))?,
            });
        }
        rate.key = point;
    }
    Ok(())
}

/// Find the rate matching an attested message vector. Positions are scanned
/// from the last down to the first; a stored `None` matches any byte. The
/// first rate in table order that matches at every position wins.
pub fn search(rates: &[Rate], msgs: &[Vec<u8>]) -> Option<usize> {
    rates.iter().position(|rate| {
        if rate.msgs.len() != msgs.len() {
            return false;
        }
        for i in (0..rate.msgs.len()).rev() {
            match rate.msgs[i] {
                None => continue,
                Some(b) if msgs[i].as_slice() == [b].as_slice() => continue,
                Some(_) => return false,
            }
        }
        true
    })
}

/// Apply an attestation: select the matching rate, sum the oracle scalars
/// over its specified positions and check the result against the adaptor
/// point. On success the scalar is stored on the rate and its index returned.
pub fn resolve(
    secp: &Secp256k1<All>,
    rates: &mut [Rate],
    msgs: &[Vec<u8>],
    signs: &[SecretKey],
) -> Result<usize> {
    if msgs.len() != signs.len() {
        return Err(Error::AttestationInvalid(format!(
            "{} messages, {} scalars",
            msgs.len(),
            signs.len()
        )));
    }
    let idx = search(rates, msgs)
        .ok_or_else(|| Error::AttestationInvalid("rate not found".into()))?;
    let rate = &mut rates[idx];
    let parts: Vec<SecretKey> = rate
        .msgs
        .iter()
        .zip(signs)
        .filter(|(m, _)| m.is_some())
        .map(|(_, s)| *s)
        .collect();
    let sign = crypto::sum_scalars(&parts)?;
    let key = rate
        .key
        .ok_or_else(|| Error::AttestationInvalid("oracle keys not set".into()))?;
    if PublicKey::from_secret_key(secp, &sign) != key {
        return Err(Error::AttestationInvalid("scalar does not open the rate key".into()));
    }
    rate.msign = Some(sign);
    Ok(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const AMOUNT: i64 = 100_000_000;

    #[test]
    fn table_has_full_outcome_space() {
        for length in [1usize, 2] {
            let rates = rate_table(AMOUNT, length);
            assert_eq!(rates.len(), 256usize.pow(length as u32));
            assert!(rates.iter().all(|r| r.amt_a + r.amt_b == AMOUNT));
        }
    }

    #[test]
    fn quarters_pay_all_or_nothing() {
        let rates = rate_table(AMOUNT, 1);
        for r in &rates[..64] {
            assert_eq!((r.amt_a, r.amt_b), (0, AMOUNT));
        }
        for r in &rates[192..] {
            assert_eq!((r.amt_a, r.amt_b), (AMOUNT, 0));
        }
    }

    #[test]
    fn linear_ramp_is_monotonic_with_tight_ends() {
        let rates = rate_table(AMOUNT, 1);
        let q = 64i64;
        // x = q: round(A * 1 / (2q+1))
        assert_eq!(rates[q as usize].amt_a, (2 * AMOUNT as i128 + 129) as i64 / 258);
        let mut prev = -1;
        for r in &rates[64..192] {
            assert!(r.amt_a >= prev);
            prev = r.amt_a;
        }
        // Last linear step sits just below the full amount.
        let last = rates[191].amt_a;
        assert!(AMOUNT - last < AMOUNT / 64);
    }

    #[test]
    fn fixed_point_matches_float_round_on_the_domain() {
        let q = 64f64;
        let a = AMOUNT as f64 / (2.0 * q + 1.0);
        let b = a * (q - 1.0);
        let rates = rate_table(AMOUNT, 1);
        for x in 64..192 {
            let expect = (a * x as f64 - b).round() as i64;
            assert_eq!(rates[x].amt_a, expect, "x = {x}");
        }
    }

    #[test]
    fn fully_specified_vectors_are_unique() {
        let rates = rate_table(AMOUNT, 2);
        let mut seen = HashSet::new();
        for r in &rates {
            if r.msgs.iter().all(|m| m.is_some()) {
                assert!(seen.insert(r.msgs.clone()));
            }
        }
        assert_eq!(seen.len(), 2 * 256 * 256 / 4);
    }

    #[test]
    fn search_selects_exactly_one_rate_per_outcome() {
        let rates = rate_table(AMOUNT, 1);
        for byte in 0u16..=255 {
            let idx = search(&rates, &[vec![byte as u8]]).unwrap();
            assert_eq!(idx, byte as usize);
        }
        assert!(search(&rates, &[vec![0x00], vec![0x00]]).is_none());
    }

    fn oracle_fixture(length: usize) -> (Secp256k1<All>, SecretKey, Vec<SecretKey>) {
        let secp = Secp256k1::new();
        let o = SecretKey::from_slice(&[0x51; 32]).unwrap();
        let nonces = (0..length)
            .map(|i| SecretKey::from_slice(&[0x61 + i as u8; 32]).unwrap())
            .collect();
        (secp, o, nonces)
    }

    fn attest(
        o: &SecretKey,
        nonces: &[SecretKey],
        value: &[u8],
    ) -> (Vec<Vec<u8>>, Vec<SecretKey>) {
        let msgs: Vec<Vec<u8>> = value.iter().map(|b| vec![*b]).collect();
        let signs = nonces
            .iter()
            .zip(value)
            .map(|(r, b)| crypto::oracle_sign(r, o, &[*b]).unwrap())
            .collect();
        (msgs, signs)
    }

    #[test]
    fn resolve_opens_the_adaptor_point() {
        let (secp, o, nonces) = oracle_fixture(1);
        let pub_o = PublicKey::from_secret_key(&secp, &o);
        let keys: Vec<PublicKey> = nonces
            .iter()
            .map(|r| PublicKey::from_secret_key(&secp, r))
            .collect();

        let mut rates = rate_table(AMOUNT, 1);
        set_oracle_keys(&secp, &mut rates, &pub_o, &keys).unwrap();
        assert!(rates.iter().all(|r| r.key.is_some()));

        // High outcome: the last-quarter rate pays everything to A.
        let (msgs, signs) = attest(&o, &nonces, &[0xff]);
        let idx = resolve(&secp, &mut rates, &msgs, &signs).unwrap();
        assert_eq!(rates[idx].amount(Side::A), AMOUNT);
        assert_eq!(rates[idx].amount(Side::B), 0);
        let msign = rates[idx].msign.unwrap();
        assert_eq!(PublicKey::from_secret_key(&secp, &msign), rates[idx].key.unwrap());

        // Low outcome mirrors it.
        let (msgs, signs) = attest(&o, &nonces, &[0x00]);
        let idx = resolve(&secp, &mut rates, &msgs, &signs).unwrap();
        assert_eq!(rates[idx].amount(Side::A), 0);
    }

    #[test]
    fn resolve_skips_dont_care_positions() {
        let (secp, o, nonces) = oracle_fixture(2);
        let pub_o = PublicKey::from_secret_key(&secp, &o);
        let keys: Vec<PublicKey> = nonces
            .iter()
            .map(|r| PublicKey::from_secret_key(&secp, r))
            .collect();

        // Only the tail quarters need adaptor points for this case; build a
        // small table slice to keep the EC work bounded.
        let mut rates: Vec<Rate> = rate_table(AMOUNT, 2)
            .into_iter()
            .take(256 * 256 / 4)
            .collect();
        set_oracle_keys(&secp, &mut rates, &pub_o, &keys).unwrap();

        // First-quarter match: position 0 is don't-care, so the scalar comes
        // from position 1 alone and still opens the rate key.
        let (msgs, signs) = attest(&o, &nonces, &[0x37, 0x05]);
        let idx = resolve(&secp, &mut rates, &msgs, &signs).unwrap();
        assert_eq!(rates[idx].msgs()[0], None);
        assert_eq!(rates[idx].msgs()[1], Some(0x05));
        let msign = rates[idx].msign.unwrap();
        assert_eq!(PublicKey::from_secret_key(&secp, &msign), rates[idx].key.unwrap());
    }

    #[test]
    fn resolve_rejects_scalars_that_do_not_open_the_key() {
        let (secp, o, nonces) = oracle_fixture(1);
        let pub_o = PublicKey::from_secret_key(&secp, &o);
        let keys: Vec<PublicKey> = nonces
            .iter()
            .map(|r| PublicKey::from_secret_key(&secp, r))
            .collect();
        let mut rates = rate_table(AMOUNT, 1);
        set_oracle_keys(&secp, &mut rates, &pub_o, &keys).unwrap();

        let (msgs, _) = attest(&o, &nonces, &[0x10]);
        let bogus = vec![SecretKey::from_slice(&[0x77; 32]).unwrap()];
        assert!(matches!(
            resolve(&secp, &mut rates, &msgs, &bogus),
            Err(Error::AttestationInvalid(_))
        ));
    }
}
