//! Protocol error kinds
//!
//! Every failure the core can produce is fatal for the current session; the
//! scenario driver logs it and either aborts or falls back to the refund path.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("illegal status: {0}")]
    IllegalStatus(&'static str),

    #[error("short of bitcoin")]
    InsufficientFunds,

    #[error("parse error: {0}")]
    Parse(String),

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("illegal oracle signs: {0}")]
    AttestationInvalid(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("value overflow: {0}")]
    Overflow(String),
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<bitcoin::consensus::encode::Error> for Error {
    fn from(e: bitcoin::consensus::encode::Error) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<bitcoin::hashes::FromSliceError> for Error {
    fn from(e: bitcoin::hashes::FromSliceError) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}
