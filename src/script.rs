//! Locking scripts for the contract transactions

use bitcoin::opcodes::all::{
    OP_CHECKMULTISIG, OP_CHECKSIG, OP_CSV, OP_DROP, OP_ELSE, OP_ENDIF, OP_IF, OP_PUSHNUM_2,
};
use bitcoin::script::Builder;
use bitcoin::{CompressedPublicKey, ScriptBuf};
use secp256k1::PublicKey;

/// Relative delay (blocks) on the loser branch of the settlement script.
pub const SETTLEMENT_CSV_DELAY: i64 = 144;

/// Fund script: `OP_2 <pub_a> <pub_b> OP_2 OP_CHECKMULTISIG`.
/// Key order is fixed at A then B on both sides.
pub fn fund_script(pub_a: &PublicKey, pub_b: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_PUSHNUM_2)
        .push_slice(pub_a.serialize())
        .push_slice(pub_b.serialize())
        .push_opcode(OP_PUSHNUM_2)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script()
}

/// Settlement script:
/// ```text
/// OP_IF
///   <winner pub = adaptor point + winner key>
/// OP_ELSE
///   <144> OP_CHECKSEQUENCEVERIFY OP_DROP
///   <loser pub>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
/// The IF branch is only satisfiable once the oracle attestation reveals the
/// discrete log of the adaptor point; the ELSE branch lets the counterparty
/// sweep after the CSV delay.
pub fn settlement_script(winner: &PublicKey, loser: &PublicKey) -> ScriptBuf {
    Builder::new()
        .push_opcode(OP_IF)
        .push_slice(winner.serialize())
        .push_opcode(OP_ELSE)
        .push_int(SETTLEMENT_CSV_DELAY)
        .push_opcode(OP_CSV)
        .push_opcode(OP_DROP)
        .push_slice(loser.serialize())
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKSIG)
        .into_script()
}

/// P2WPKH: `OP_0 HASH160(<pubkey>)`.
pub fn p2wpkh_script(pub_key: &PublicKey) -> ScriptBuf {
    ScriptBuf::new_p2wpkh(&CompressedPublicKey(*pub_key).wpubkey_hash())
}

/// P2WSH: `OP_0 SHA256(<script>)`.
pub fn p2wsh_script(script: &ScriptBuf) -> ScriptBuf {
    ScriptBuf::new_p2wsh(&script.wscript_hash())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::{Secp256k1, SecretKey};

    fn keypair(byte: u8) -> PublicKey {
        let secp = Secp256k1::new();
        PublicKey::from_secret_key(&secp, &SecretKey::from_slice(&[byte; 32]).unwrap())
    }

    #[test]
    fn fund_script_layout() {
        let a = keypair(1);
        let b = keypair(2);
        let script = fund_script(&a, &b);
        let bytes = script.as_bytes();
        // OP_2, push 33 (x2), OP_2, OP_CHECKMULTISIG
        assert_eq!(bytes.len(), 71);
        assert_eq!(bytes[0], OP_PUSHNUM_2.to_u8());
        assert_eq!(bytes[1], 33);
        assert_eq!(&bytes[2..35], &a.serialize());
        assert_eq!(&bytes[36..69], &b.serialize());
        assert_eq!(bytes[70], OP_CHECKMULTISIG.to_u8());
    }

    #[test]
    fn fund_script_key_order_is_fixed() {
        let a = keypair(1);
        let b = keypair(2);
        assert_ne!(fund_script(&a, &b), fund_script(&b, &a));
    }

    #[test]
    fn settlement_script_contains_both_branches() {
        let winner = keypair(3);
        let loser = keypair(4);
        let script = settlement_script(&winner, &loser);
        let bytes = script.as_bytes();
        assert_eq!(bytes[0], OP_IF.to_u8());
        assert_eq!(&bytes[2..35], &winner.serialize());
        let loser_at = bytes
            .windows(33)
            .position(|w| w == loser.serialize())
            .unwrap();
        assert!(loser_at > 35);
        assert!(bytes.contains(&OP_CSV.to_u8()));
        assert_eq!(bytes[bytes.len() - 1], OP_CHECKSIG.to_u8());
    }

    #[test]
    fn wrappers_are_witness_programs() {
        let pk = keypair(5);
        assert!(p2wpkh_script(&pk).is_p2wpkh());
        let script = fund_script(&pk, &keypair(6));
        assert!(p2wsh_script(&script).is_p2wsh());
    }
}
