//! Two-party discreet log contract demo over Bitcoin regtest
//!
//! The protocol core: adaptor-point arithmetic binding oracle attestations
//! to per-outcome spending keys, the offer/accept/sign handshake, and the
//! Fund / Settlement / Refund / Forward transactions. The node RPC client,
//! wallet stub, oracle service and scenario driver live alongside as the
//! demo scaffolding.

pub mod commands;
pub mod contract;
pub mod crypto;
pub mod error;
pub mod oracle;
pub mod party;
pub mod rates;
pub mod rpc;
pub mod script;
pub mod types;
pub mod wallet;
