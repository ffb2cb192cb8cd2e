//! sift-privacy: the privacy engine
//!
//! Three mechanisms guard everything that leaves the pipeline:
//! - **Differential privacy**: a serialized epsilon budget with uniform and
//!   priority-weighted allocation, Laplace noise, and composition accounting
//! - **Approximate homomorphic aggregation**: a BFV-style RLWE scheme over
//!   a 60-bit NTT-friendly prime; values are quantized to fixed point
//!   before encryption, ciphertexts support component-wise addition
//! - **k-anonymity**: salted surrogate generalization, equivalence-class
//!   formation, bounded suppression with quasi-identifier coarsening
//!
//! # Threat model
//!
//! - **Adversary**: the downstream graph indexer and anything beyond it is
//!   honest-but-curious; it sees only sealed batches
//! - **Guarantee**: per-reset-interval epsilon budget is never exceeded;
//!   every published group is k-anonymous; numeric aggregates leave the
//!   engine only as ciphertexts
//! - **Non-goals**: network anonymity, integrity against a malicious host,
//!   exact encrypted arithmetic (quantization error is bounded, not zero)

mod anonymity;
mod bfv;
mod budget;
mod composition;
mod engine;
mod error;
mod keystore;
mod laplace;
mod quantize;
mod ring;

pub use anonymity::{
    apply_suppression, form_equivalence_classes, information_loss, validate_k_anonymity,
    AnonRecord, EquivalenceClass, Generalizer, KAnonymityReport, QuasiIdentifier,
    SuppressionOutcome,
};
pub use bfv::{
    decrypt_vector, encrypt_values, encrypt_values_compact, generate_keypair, homomorphic_add,
    homomorphic_sub, EncryptedVector, KeyPair, PublicKey, Scheme, SchemeParams, SecretKey,
    SecurityLevel, SCHEME_PARAMS_VERSION,
};
pub use budget::{
    AllocationStrategy, EpsilonGrant, Priority, PrivacyBudget, ResetEvent, ADAPTIVE_LOW_SHARE,
};
pub use composition::{advanced_composition, basic_composition, composition_bound, measure_spent};
pub use engine::{ClassSummary, PrivacyEngine, SealedBatch};
pub use error::{AnonymityError, BudgetError, CryptoError, PrivacyError};
pub use keystore::{KeyStore, KEY_FORMAT_VERSION, KEY_MAGIC};
pub use laplace::LaplaceNoise;
pub use quantize::{dequantize, dequantize_vec, quantize, quantize_vec, DEFAULT_SCALE};
pub use ring::{NttTable, MODULUS_Q};

pub type Result<T> = std::result::Result<T, PrivacyError>;
