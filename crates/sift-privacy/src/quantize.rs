//! Fixed-point quantization
//!
//! The lattice scheme does integer ring arithmetic only, so floats are
//! scaled and rounded before encryption. Worst-case round-trip error is
//! 1/(2*scale); the default scale keeps it at 5e-5, well under the 0.01
//! contract.

use crate::error::CryptoError;

pub const DEFAULT_SCALE: f64 = 10_000.0;

/// Plaintext ring capacity: quantized values must fit in (-2^31, 2^31)
/// so they pack into the p = 2^32 plaintext modulus as centered
/// representatives.
const PLAINTEXT_BOUND: i64 = 1 << 31;

pub fn quantize(value: f64, scale: f64) -> Result<i64, CryptoError> {
    if !value.is_finite() {
        return Err(CryptoError::PlaintextOverflow { value });
    }
    let scaled = (value * scale).round();
    if scaled.abs() >= PLAINTEXT_BOUND as f64 {
        return Err(CryptoError::PlaintextOverflow { value });
    }
    Ok(scaled as i64)
}

pub fn dequantize(quantized: i64, scale: f64) -> f64 {
    quantized as f64 / scale
}

pub fn quantize_vec(values: &[f64], scale: f64) -> Result<Vec<i64>, CryptoError> {
    values.iter().map(|&v| quantize(v, scale)).collect()
}

pub fn dequantize_vec(quantized: &[i64], scale: f64) -> Vec<f64> {
    quantized.iter().map(|&q| dequantize(q, scale)).collect()
}
