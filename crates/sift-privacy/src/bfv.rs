//! BFV-style approximate homomorphic encryption
//!
//! RLWE over Z_q[x]/(x^n + 1) with a ternary secret and sigma = 6.4
//! Gaussian noise. Quantized values are packed one per coefficient and
//! scaled to round(m * q / p); decryption rounds v * p / q back to the
//! plaintext ring. Addition is component-wise on ciphertexts, and the
//! noise margin (q / 2p ~ 1.3e8 vs. noise in the hundreds) leaves room
//! for thousands of additions before rounding can fail.
//!
//! Two ciphertext forms:
//! - `Full {c0, c1}`: standard public-key encryption
//! - `Compact {c0, seed}`: secret-key encryption where c1 is a uniform
//!   ring element re-derived from a 32-byte seed on expansion; half the
//!   size at rest, one extra sampling pass on use

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::ring::{self, poly_add, poly_sub, NttTable, MODULUS_Q};

/// Bump when sigma, the modulus chain, or the packing layout changes.
pub const SCHEME_PARAMS_VERSION: u16 = 1;

/// Plaintext modulus: quantized values live in (-2^31, 2^31)
const PLAINTEXT_P: u64 = 1 << 32;

/// Gaussian noise parameter
const SIGMA: f64 = 6.4;

/// Lattice security level. Both choices are conservative post-quantum
/// RLWE parameter sets for a 60-bit modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    Bits128,
    Bits192,
}

impl SecurityLevel {
    pub fn ring_dim(self) -> usize {
        match self {
            SecurityLevel::Bits128 => 2048,
            SecurityLevel::Bits192 => 4096,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            128 => Some(SecurityLevel::Bits128),
            192 => Some(SecurityLevel::Bits192),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemeParams {
    pub version: u16,
    pub ring_dim: usize,
    pub q: u64,
    pub p: u64,
    pub sigma: f64,
}

impl SchemeParams {
    pub fn for_level(level: SecurityLevel) -> Self {
        Self {
            version: SCHEME_PARAMS_VERSION,
            ring_dim: level.ring_dim(),
            q: MODULUS_Q,
            p: PLAINTEXT_P,
            sigma: SIGMA,
        }
    }

    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.version != SCHEME_PARAMS_VERSION {
            return Err(CryptoError::KeyVersionMismatch {
                expected: SCHEME_PARAMS_VERSION,
                actual: self.version,
            });
        }
        if self.q != MODULUS_Q || self.p != PLAINTEXT_P || !self.ring_dim.is_power_of_two() {
            return Err(CryptoError::MalformedCiphertext(
                "scheme parameters do not match the compiled ring".into(),
            ));
        }
        Ok(())
    }
}

/// RLWE secret key (ternary). Zeroized on drop; dropping the key is the
/// secure-deletion primitive the keystore builds on.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    pub(crate) s: Vec<u64>,
    #[zeroize(skip)]
    pub(crate) params: SchemeParams,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey")
            .field("ring_dim", &self.params.ring_dim)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKey {
    pub(crate) a: Vec<u64>,
    pub(crate) b: Vec<u64>,
    pub(crate) params: SchemeParams,
}

impl PublicKey {
    pub fn params(&self) -> &SchemeParams {
        &self.params
    }
}

pub struct KeyPair {
    pub public: PublicKey,
    pub secret: SecretKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheme {
    Bfv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum CiphertextBody {
    Full { c0: Vec<u64>, c1: Vec<u64> },
    Compact { c0: Vec<u64>, seed: [u8; 32] },
}

/// An encrypted vector of quantized values. Opaque outside this module:
/// produced by encryption, consumed by addition or decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedVector {
    pub scheme: Scheme,
    /// Number of packed values (<= ring_dim)
    pub dimension: usize,
    pub(crate) params_version: u16,
    pub(crate) ring_dim: usize,
    pub(crate) body: CiphertextBody,
}

impl EncryptedVector {
    /// Serialized ciphertext size in bytes
    pub fn ciphertext_len(&self) -> usize {
        match &self.body {
            CiphertextBody::Full { c0, c1 } => (c0.len() + c1.len()) * 8,
            CiphertextBody::Compact { c0, seed } => c0.len() * 8 + seed.len(),
        }
    }

    pub fn is_compact(&self) -> bool {
        matches!(self.body, CiphertextBody::Compact { .. })
    }

    /// Rebuild the full two-component form of a compact ciphertext by
    /// re-deriving c1 from the stored seed.
    pub fn expand(&self) -> EncryptedVector {
        match &self.body {
            CiphertextBody::Full { .. } => self.clone(),
            CiphertextBody::Compact { c0, seed } => {
                let mut rng = ChaCha20Rng::from_seed(*seed);
                let c1 = sample_uniform(self.ring_dim, &mut rng);
                EncryptedVector {
                    scheme: self.scheme,
                    dimension: self.dimension,
                    params_version: self.params_version,
                    ring_dim: self.ring_dim,
                    body: CiphertextBody::Full { c0: c0.clone(), c1 },
                }
            }
        }
    }
}

fn sample_uniform(n: usize, rng: &mut ChaCha20Rng) -> Vec<u64> {
    (0..n).map(|_| rng.gen_range(0..MODULUS_Q)).collect()
}

/// Ternary coefficients {-1, 0, 1} as ring elements
fn sample_ternary(n: usize, rng: &mut ChaCha20Rng) -> Vec<u64> {
    (0..n)
        .map(|_| match rng.gen_range(0..3u8) {
            0 => 0,
            1 => 1,
            _ => MODULUS_Q - 1,
        })
        .collect()
}

/// Rounded Gaussian via Box-Muller
fn sample_gaussian(n: usize, sigma: f64, rng: &mut ChaCha20Rng) -> Vec<u64> {
    (0..n)
        .map(|_| {
            let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
            let u2: f64 = rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
            let e = (z * sigma).round() as i64;
            if e >= 0 {
                e as u64 % MODULUS_Q
            } else {
                MODULUS_Q - (e.unsigned_abs() % MODULUS_Q)
            }
        })
        .collect()
}

/// Generate an RLWE key pair: ternary s, uniform a, b = -(a*s + e).
pub fn generate_keypair(level: SecurityLevel, rng: &mut ChaCha20Rng) -> KeyPair {
    let params = SchemeParams::for_level(level);
    let n = params.ring_dim;
    let table = NttTable::new(n);

    let s = sample_ternary(n, rng);
    let a = sample_uniform(n, rng);
    let e = sample_gaussian(n, params.sigma, rng);

    let b = ring::poly_neg(&poly_add(&table.poly_mul(&a, &s), &e));

    KeyPair {
        public: PublicKey {
            a,
            b,
            params: params.clone(),
        },
        secret: SecretKey { s, params },
    }
}

/// Map a centered value into the plaintext ring
fn to_ring(v: i64) -> u64 {
    if v >= 0 {
        v as u64
    } else {
        PLAINTEXT_P - v.unsigned_abs()
    }
}

fn encode(values: &[i64], params: &SchemeParams) -> Result<Vec<u64>, CryptoError> {
    if values.len() > params.ring_dim {
        return Err(CryptoError::TooManyValues {
            count: values.len(),
            capacity: params.ring_dim,
        });
    }
    let half = (PLAINTEXT_P / 2) as i64;
    let q = params.q as u128;
    let p = params.p as u128;
    let mut m = vec![0u64; params.ring_dim];
    for (slot, &v) in m.iter_mut().zip(values) {
        if v.abs() >= half {
            return Err(CryptoError::PlaintextOverflow { value: v as f64 });
        }
        // round(m * q / p) mod q: scaling error at most 1/2 per slot,
        // independent of the value's magnitude
        *slot = ((to_ring(v) as u128 * q + p / 2) / p % q) as u64;
    }
    Ok(m)
}

fn decode_coeff(v: u64, params: &SchemeParams) -> i64 {
    // m = round(v * p / q) mod p, then the centered representative
    let q = params.q as u128;
    let m = ((v as u128 * params.p as u128 + q / 2) / q) as u64 % PLAINTEXT_P;
    if m >= PLAINTEXT_P / 2 {
        m as i64 - PLAINTEXT_P as i64
    } else {
        m as i64
    }
}

/// Public-key encryption producing the full two-component ciphertext.
pub fn encrypt_values(
    values: &[i64],
    pk: &PublicKey,
    table: &NttTable,
    rng: &mut ChaCha20Rng,
) -> Result<EncryptedVector, CryptoError> {
    pk.params.validate()?;
    let n = pk.params.ring_dim;
    let m = encode(values, &pk.params)?;

    let u = sample_ternary(n, rng);
    let e1 = sample_gaussian(n, pk.params.sigma, rng);
    let e2 = sample_gaussian(n, pk.params.sigma, rng);

    let c0 = poly_add(&poly_add(&table.poly_mul(&pk.b, &u), &e1), &m);
    let c1 = poly_add(&table.poly_mul(&pk.a, &u), &e2);

    Ok(EncryptedVector {
        scheme: Scheme::Bfv,
        dimension: values.len(),
        params_version: pk.params.version,
        ring_dim: n,
        body: CiphertextBody::Full { c0, c1 },
    })
}

/// Secret-key encryption in the memory-efficient compact form: c1 is a
/// uniform ring element derived from a fresh seed, and only c0 plus the
/// seed are stored.
pub fn encrypt_values_compact(
    values: &[i64],
    sk: &SecretKey,
    table: &NttTable,
    rng: &mut ChaCha20Rng,
) -> Result<EncryptedVector, CryptoError> {
    sk.params.validate()?;
    let n = sk.params.ring_dim;
    let m = encode(values, &sk.params)?;

    let seed: [u8; 32] = rng.gen();
    let mut seed_rng = ChaCha20Rng::from_seed(seed);
    let a = sample_uniform(n, &mut seed_rng);
    let e = sample_gaussian(n, sk.params.sigma, rng);

    // c0 = -(a*s) + e + delta*m, so c0 + a*s decrypts like the full form
    let c0 = poly_add(&poly_add(&ring::poly_neg(&table.poly_mul(&a, &sk.s)), &e), &m);

    Ok(EncryptedVector {
        scheme: Scheme::Bfv,
        dimension: values.len(),
        params_version: sk.params.version,
        ring_dim: n,
        body: CiphertextBody::Compact { c0, seed },
    })
}

/// Decrypt an encrypted vector back to its quantized values.
pub fn decrypt_vector(
    ct: &EncryptedVector,
    sk: &SecretKey,
    table: &NttTable,
) -> Result<Vec<i64>, CryptoError> {
    sk.params.validate()?;
    if ct.ring_dim != sk.params.ring_dim {
        return Err(CryptoError::MalformedCiphertext(format!(
            "ciphertext ring dim {} does not match key ring dim {}",
            ct.ring_dim, sk.params.ring_dim
        )));
    }
    if ct.params_version != sk.params.version {
        return Err(CryptoError::KeyVersionMismatch {
            expected: sk.params.version,
            actual: ct.params_version,
        });
    }
    if ct.dimension > ct.ring_dim {
        return Err(CryptoError::MalformedCiphertext(format!(
            "dimension {} exceeds ring dim {}",
            ct.dimension, ct.ring_dim
        )));
    }

    let expanded = ct.expand();
    let (c0, c1) = match &expanded.body {
        CiphertextBody::Full { c0, c1 } => (c0, c1),
        CiphertextBody::Compact { .. } => unreachable!("expand always yields Full"),
    };
    if c0.len() != ct.ring_dim || c1.len() != ct.ring_dim {
        return Err(CryptoError::MalformedCiphertext(
            "component length does not match ring dim".into(),
        ));
    }

    let v = poly_add(c0, &table.poly_mul(c1, &sk.s));
    Ok(v[..ct.dimension]
        .iter()
        .map(|&coeff| decode_coeff(coeff, &sk.params))
        .collect())
}

/// Component-wise homomorphic addition. Compact operands are expanded
/// first (the seed is all that is needed; no key material).
pub fn homomorphic_add(
    a: &EncryptedVector,
    b: &EncryptedVector,
) -> Result<EncryptedVector, CryptoError> {
    if a.dimension != b.dimension {
        return Err(CryptoError::DimensionMismatch {
            left: a.dimension,
            right: b.dimension,
        });
    }
    if a.ring_dim != b.ring_dim || a.params_version != b.params_version {
        return Err(CryptoError::MalformedCiphertext(
            "operands come from different parameter sets".into(),
        ));
    }

    let ea = a.expand();
    let eb = b.expand();
    let (a0, a1) = match &ea.body {
        CiphertextBody::Full { c0, c1 } => (c0, c1),
        CiphertextBody::Compact { .. } => unreachable!("expand always yields Full"),
    };
    let (b0, b1) = match &eb.body {
        CiphertextBody::Full { c0, c1 } => (c0, c1),
        CiphertextBody::Compact { .. } => unreachable!("expand always yields Full"),
    };

    Ok(EncryptedVector {
        scheme: a.scheme,
        dimension: a.dimension,
        params_version: a.params_version,
        ring_dim: a.ring_dim,
        body: CiphertextBody::Full {
            c0: poly_add(a0, b0),
            c1: poly_add(a1, b1),
        },
    })
}

/// Subtraction counterpart of [`homomorphic_add`], used by tests to check
/// approximate-arithmetic bounds from both sides.
pub fn homomorphic_sub(
    a: &EncryptedVector,
    b: &EncryptedVector,
) -> Result<EncryptedVector, CryptoError> {
    if a.dimension != b.dimension {
        return Err(CryptoError::DimensionMismatch {
            left: a.dimension,
            right: b.dimension,
        });
    }
    let ea = a.expand();
    let eb = b.expand();
    let (a0, a1) = match &ea.body {
        CiphertextBody::Full { c0, c1 } => (c0, c1),
        CiphertextBody::Compact { .. } => unreachable!(),
    };
    let (b0, b1) = match &eb.body {
        CiphertextBody::Full { c0, c1 } => (c0, c1),
        CiphertextBody::Compact { .. } => unreachable!(),
    };
    Ok(EncryptedVector {
        scheme: a.scheme,
        dimension: a.dimension,
        params_version: a.params_version,
        ring_dim: a.ring_dim,
        body: CiphertextBody::Full {
            c0: poly_sub(a0, b0),
            c1: poly_sub(a1, b1),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (KeyPair, NttTable, ChaCha20Rng) {
        let mut rng = ChaCha20Rng::seed_from_u64(0xBF5);
        let keys = generate_keypair(SecurityLevel::Bits128, &mut rng);
        let table = NttTable::new(keys.public.params.ring_dim);
        (keys, table, rng)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let (keys, table, mut rng) = setup();
        let values: Vec<i64> = vec![0, 1, -1, 42, -9999, 1_000_000, -2_000_000_000];
        let ct = encrypt_values(&values, &keys.public, &table, &mut rng).unwrap();
        let back = decrypt_vector(&ct, &keys.secret, &table).unwrap();
        for (orig, dec) in values.iter().zip(&back) {
            assert!((orig - dec).abs() < 2, "decrypted {} as {}", orig, dec);
        }
    }

    #[test]
    fn test_negative_extremes_roundtrip() {
        // Negative values map near p in the plaintext ring, so any bias
        // in the encoding scale shows up magnified here.
        let (keys, table, mut rng) = setup();
        let values: Vec<i64> = vec![-1, -9999, -2_000_000_000, -(1i64 << 31) + 1, (1i64 << 31) - 1];
        let ct = encrypt_values(&values, &keys.public, &table, &mut rng).unwrap();
        let back = decrypt_vector(&ct, &keys.secret, &table).unwrap();
        for (orig, dec) in values.iter().zip(&back) {
            assert!((orig - dec).abs() < 2, "decrypted {} as {}", orig, dec);
        }
    }

    #[test]
    fn test_homomorphic_add() {
        let (keys, table, mut rng) = setup();
        let xs: Vec<i64> = vec![5, -3, 1000, 0, 123456];
        let ys: Vec<i64> = vec![7, 3, -500, -1, -123450];
        let cx = encrypt_values(&xs, &keys.public, &table, &mut rng).unwrap();
        let cy = encrypt_values(&ys, &keys.public, &table, &mut rng).unwrap();
        let sum = homomorphic_add(&cx, &cy).unwrap();
        let back = decrypt_vector(&sum, &keys.secret, &table).unwrap();
        for ((x, y), dec) in xs.iter().zip(&ys).zip(&back) {
            assert!((x + y - dec).abs() < 2, "{} + {} decrypted as {}", x, y, dec);
        }
    }

    #[test]
    fn test_compact_form_smaller_and_correct() {
        let (keys, table, mut rng) = setup();
        let values: Vec<i64> = vec![17, -4242, 65536];
        let full = encrypt_values(&values, &keys.public, &table, &mut rng).unwrap();
        let compact = encrypt_values_compact(&values, &keys.secret, &table, &mut rng).unwrap();

        assert!(compact.ciphertext_len() < full.ciphertext_len());
        assert!(compact.is_compact());

        let back = decrypt_vector(&compact, &keys.secret, &table).unwrap();
        for (orig, dec) in values.iter().zip(&back) {
            assert!((orig - dec).abs() < 2);
        }
    }

    #[test]
    fn test_compact_mixes_with_full_in_add() {
        let (keys, table, mut rng) = setup();
        let full = encrypt_values(&[10, 20], &keys.public, &table, &mut rng).unwrap();
        let compact = encrypt_values_compact(&[1, 2], &keys.secret, &table, &mut rng).unwrap();
        let sum = homomorphic_add(&full, &compact).unwrap();
        let back = decrypt_vector(&sum, &keys.secret, &table).unwrap();
        assert!((back[0] - 11).abs() < 2);
        assert!((back[1] - 22).abs() < 2);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let (keys, table, mut rng) = setup();
        let a = encrypt_values(&[1, 2, 3], &keys.public, &table, &mut rng).unwrap();
        let b = encrypt_values(&[1, 2], &keys.public, &table, &mut rng).unwrap();
        assert!(matches!(
            homomorphic_add(&a, &b),
            Err(CryptoError::DimensionMismatch { left: 3, right: 2 })
        ));
    }

    #[test]
    fn test_too_many_values_rejected() {
        let (keys, table, mut rng) = setup();
        let values = vec![1i64; keys.public.params.ring_dim + 1];
        assert!(matches!(
            encrypt_values(&values, &keys.public, &table, &mut rng),
            Err(CryptoError::TooManyValues { .. })
        ));
    }

    #[test]
    fn test_repeated_addition_stays_exact() {
        // Noise grows linearly with additions; 64 deep stays far inside
        // the q/2p rounding margin.
        let (keys, table, mut rng) = setup();
        let mut acc = encrypt_values(&[0], &keys.public, &table, &mut rng).unwrap();
        for _ in 0..64 {
            let one = encrypt_values(&[3], &keys.public, &table, &mut rng).unwrap();
            acc = homomorphic_add(&acc, &one).unwrap();
        }
        let back = decrypt_vector(&acc, &keys.secret, &table).unwrap();
        assert!((back[0] - 192).abs() < 2);
    }

    #[test]
    fn test_wrong_ring_key_rejected() {
        let (keys, _table, mut rng) = setup();
        let other = generate_keypair(SecurityLevel::Bits192, &mut rng);
        let other_table = NttTable::new(other.public.params.ring_dim);
        let ct = encrypt_values(&[5], &other.public, &other_table, &mut rng).unwrap();
        let small_table = NttTable::new(keys.secret.params.ring_dim);
        assert!(matches!(
            decrypt_vector(&ct, &keys.secret, &small_table),
            Err(CryptoError::MalformedCiphertext(_))
        ));
    }
}
