//! Error types for sift-privacy
//!
//! Budget and anonymity errors are recoverable policy failures; crypto
//! errors are fatal to the specific operation but never corrupt engine
//! state.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BudgetError {
    #[error("privacy budget exhausted: requested {requested}, remaining {remaining}")]
    Exhausted { requested: f64, remaining: f64 },

    #[error("invalid epsilon request: {0} (must be positive and finite)")]
    InvalidRequest(f64),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("key not found: {0}")]
    KeyNotFound(&'static str),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("ciphertext dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("plaintext overflow: quantized value {value} exceeds ring capacity")]
    PlaintextOverflow { value: f64 },

    #[error("too many values for ring: {count} > {capacity}")]
    TooManyValues { count: usize, capacity: usize },

    #[error("key file version mismatch: expected v{expected}, got v{actual}")]
    KeyVersionMismatch { expected: u16, actual: u16 },

    #[error("bad key file magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key serialization error: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnonymityError {
    #[error(
        "suppression ceiling exceeded: rate {rate:.4} > ceiling {ceiling:.4} \
         after {rounds} coarsening rounds"
    )]
    SuppressionCeiling {
        rate: f64,
        ceiling: f64,
        rounds: usize,
    },

    #[error("k must be at least 1")]
    InvalidK,

    #[error("no quasi-identifiers named")]
    NoQuasiIdentifiers,
}

#[derive(Error, Debug)]
pub enum PrivacyError {
    #[error(transparent)]
    Budget(#[from] BudgetError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Anonymity(#[from] AnonymityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
