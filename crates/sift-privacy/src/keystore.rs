//! Key management
//!
//! Key material persists as a magic-tagged, versioned bincode file so a
//! parameter bump can never be confused with corruption. The secret key is
//! optional: `destroy_secret_key` zeroizes it in memory, overwrites the
//! on-disk copy, and every later secret-key operation fails with
//! `KeyNotFound` instead of touching stale state.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::RngCore;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::bfv::{
    self, generate_keypair, EncryptedVector, PublicKey, SchemeParams, SecretKey, SecurityLevel,
};
use crate::error::CryptoError;
use crate::ring::NttTable;

/// Magic bytes identifying a sift key file
pub const KEY_MAGIC: [u8; 4] = *b"SFK1";

/// Key file format version; bump when the layout or scheme params change
pub const KEY_FORMAT_VERSION: u16 = 1;

#[derive(Serialize, Deserialize)]
struct KeyFile {
    params: SchemeParams,
    surrogate_salt: [u8; 32],
    public: PublicKey,
    secret: Option<SecretKey>,
}

/// Holds the scheme key pair plus the surrogate-derivation salt shared
/// with the k-anonymity generalizer.
pub struct KeyStore {
    params: SchemeParams,
    table: NttTable,
    surrogate_salt: [u8; 32],
    public: PublicKey,
    secret: Option<SecretKey>,
    path: Option<PathBuf>,
}

impl KeyStore {
    /// Generate a fresh key pair and salt at the given security level.
    pub fn generate(level: SecurityLevel, rng: &mut ChaCha20Rng) -> Self {
        let pair = generate_keypair(level, rng);
        let params = pair.public.params().clone();
        let table = NttTable::new(params.ring_dim);
        let mut salt = [0u8; 32];
        rng.fill_bytes(&mut salt);
        Self {
            params,
            table,
            surrogate_salt: salt,
            public: pair.public,
            secret: Some(pair.secret),
            path: None,
        }
    }

    pub fn params(&self) -> &SchemeParams {
        &self.params
    }

    pub fn surrogate_salt(&self) -> [u8; 32] {
        self.surrogate_salt
    }

    pub fn has_secret_key(&self) -> bool {
        self.secret.is_some()
    }

    /// Short hex fingerprint of the public key, safe to log.
    pub fn fingerprint(&self) -> String {
        use tiny_keccak::{Hasher, Keccak};
        let mut hasher = Keccak::v256();
        for &coeff in &self.public.b {
            hasher.update(&coeff.to_le_bytes());
        }
        let mut digest = [0u8; 32];
        hasher.finalize(&mut digest);
        hex::encode(&digest[..8])
    }

    /// Encrypt quantized values with the public key (full form) or the
    /// secret key (compact form).
    pub fn encrypt(
        &self,
        values: &[i64],
        compact: bool,
        rng: &mut ChaCha20Rng,
    ) -> Result<EncryptedVector, CryptoError> {
        if compact {
            let sk = self
                .secret
                .as_ref()
                .ok_or(CryptoError::KeyNotFound("secret key destroyed"))?;
            bfv::encrypt_values_compact(values, sk, &self.table, rng)
        } else {
            bfv::encrypt_values(values, &self.public, &self.table, rng)
        }
    }

    pub fn decrypt(&self, ct: &EncryptedVector) -> Result<Vec<i64>, CryptoError> {
        let sk = self
            .secret
            .as_ref()
            .ok_or(CryptoError::KeyNotFound("secret key destroyed"))?;
        bfv::decrypt_vector(ct, sk, &self.table)
    }

    /// Save to a magic-tagged, versioned file (temp + rename).
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), CryptoError> {
        let path = path.as_ref();
        let file = KeyFile {
            params: self.params.clone(),
            surrogate_salt: self.surrogate_salt,
            public: self.public.clone(),
            secret: self.secret.as_ref().map(|sk| SecretKey {
                s: sk.s.clone(),
                params: sk.params.clone(),
            }),
        };
        let mut buf = Vec::new();
        buf.extend_from_slice(&KEY_MAGIC);
        buf.extend_from_slice(&KEY_FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&bincode::serialize(&file)?);

        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, path)?;
        self.path = Some(path.to_path_buf());
        tracing::debug!(fingerprint = %self.fingerprint(), "key file written");
        Ok(())
    }

    /// Load a key file, validating magic and version before parsing.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        if data.len() < 6 {
            return Err(CryptoError::MalformedCiphertext(
                "key file truncated".into(),
            ));
        }
        let magic: [u8; 4] = data[0..4].try_into().expect("length checked");
        if magic != KEY_MAGIC {
            return Err(CryptoError::BadMagic(magic));
        }
        let version = u16::from_le_bytes(data[4..6].try_into().expect("length checked"));
        if version != KEY_FORMAT_VERSION {
            return Err(CryptoError::KeyVersionMismatch {
                expected: KEY_FORMAT_VERSION,
                actual: version,
            });
        }
        let file: KeyFile = bincode::deserialize(&data[6..])?;
        file.params.validate()?;

        let table = NttTable::new(file.params.ring_dim);
        let store = Self {
            params: file.params,
            table,
            surrogate_salt: file.surrogate_salt,
            public: file.public,
            secret: file.secret,
            path: Some(path.to_path_buf()),
        };
        tracing::debug!(
            fingerprint = %store.fingerprint(),
            has_secret = store.has_secret_key(),
            "key file loaded"
        );
        Ok(store)
    }

    /// Securely delete the secret key: drop it (zeroize-on-drop wipes the
    /// coefficients), overwrite the on-disk copy with zeros, then rewrite
    /// the key file without the secret half.
    pub fn destroy_secret_key(&mut self) -> Result<(), CryptoError> {
        self.secret = None; // drop zeroizes

        if let Some(path) = self.path.clone() {
            if path.exists() {
                let len = fs::metadata(&path)?.len() as usize;
                let mut f = fs::OpenOptions::new().write(true).open(&path)?;
                f.write_all(&vec![0u8; len])?;
                f.sync_all()?;
                drop(f);
                self.save(&path)?;
            }
        }
        tracing::info!("secret key destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(0x5EED)
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");

        let mut store = KeyStore::generate(SecurityLevel::Bits128, &mut rng());
        let ct = store.encrypt(&[1, 2, 3], false, &mut rng()).unwrap();
        store.save(&path).unwrap();

        let restored = KeyStore::load(&path).unwrap();
        assert_eq!(restored.surrogate_salt(), store.surrogate_salt());
        assert!(restored.has_secret_key());
        // The restored secret key decrypts ciphertexts made before the save.
        let back = restored.decrypt(&ct).unwrap();
        assert!((back[0] - 1).abs() < 2 && (back[1] - 2).abs() < 2 && (back[2] - 3).abs() < 2);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");
        fs::write(&path, b"XXXX\x01\x00junk").unwrap();
        assert!(matches!(
            KeyStore::load(&path),
            Err(CryptoError::BadMagic(_))
        ));
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");
        let mut data = Vec::new();
        data.extend_from_slice(&KEY_MAGIC);
        data.extend_from_slice(&99u16.to_le_bytes());
        data.extend_from_slice(b"junk");
        fs::write(&path, data).unwrap();
        assert!(matches!(
            KeyStore::load(&path),
            Err(CryptoError::KeyVersionMismatch { expected: 1, actual: 99 })
        ));
    }

    #[test]
    fn test_destroyed_key_fails_distinctly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.bin");

        let mut store = KeyStore::generate(SecurityLevel::Bits128, &mut rng());
        store.save(&path).unwrap();
        let ct = store.encrypt(&[42], false, &mut rng()).unwrap();

        store.destroy_secret_key().unwrap();
        assert!(!store.has_secret_key());
        assert!(matches!(
            store.decrypt(&ct),
            Err(CryptoError::KeyNotFound(_))
        ));
        assert!(matches!(
            store.encrypt(&[1], true, &mut rng()),
            Err(CryptoError::KeyNotFound(_))
        ));

        // Public-key encryption still works after destruction.
        assert!(store.encrypt(&[1], false, &mut rng()).is_ok());

        // A reload sees the secret-free file, not the stale key.
        let reloaded = KeyStore::load(&path).unwrap();
        assert!(!reloaded.has_secret_key());
        assert!(reloaded.decrypt(&ct).is_err());
    }
}
