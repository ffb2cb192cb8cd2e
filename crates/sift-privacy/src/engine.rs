//! Privacy engine facade
//!
//! One entry point ties the three mechanisms together: a batch of events
//! goes in, a sealed batch (k-anonymous classes, noisy counts, encrypted
//! totals) comes out. Crypto paths are stateless behind `&self`; the only
//! mutable state is the budget (its own mutex) and the keystore (an
//! RwLock written only by key destruction and persistence).

use std::sync::RwLock;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use sift_core::{BatchId, Event, PrivacyConfig, StorageConfig, ACTION_CODE_LIMIT};

use crate::anonymity::{
    apply_suppression, validate_k_anonymity, Generalizer, QuasiIdentifier,
};
use crate::bfv::{EncryptedVector, SecurityLevel};
use crate::budget::{AllocationStrategy, EpsilonGrant, Priority, PrivacyBudget};
use crate::error::{CryptoError, PrivacyError};
use crate::keystore::KeyStore;
use crate::laplace::LaplaceNoise;
use crate::quantize::quantize;
use crate::{composition, Result};

/// Published summary of one equivalence class: the generalized key and a
/// Laplace-noised member count. Raw membership never leaves the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSummary {
    pub key: Vec<u64>,
    pub noisy_count: f64,
}

/// The privatized output handed to the graph sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedBatch {
    pub batch_id: BatchId,
    pub classes: Vec<ClassSummary>,
    /// Noisy event count per action code present in the batch
    pub noisy_action_counts: Vec<(u16, f64)>,
    /// Homomorphically aggregatable per-action totals (quantized counts)
    pub encrypted_totals: EncryptedVector,
    pub info_loss: f64,
    pub epsilon_spent: f64,
    pub suppressed: usize,
    pub record_count: usize,
}

pub struct PrivacyEngine {
    config: PrivacyConfig,
    storage: StorageConfig,
    budget: PrivacyBudget,
    keys: RwLock<KeyStore>,
    generalizer: Generalizer,
    quasi: Vec<QuasiIdentifier>,
}

impl PrivacyEngine {
    /// Open the engine against its persisted state: budget and keys are
    /// loaded when present, initialized and written when not.
    pub fn open(config: PrivacyConfig, storage: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&storage.base_dir)?;

        let key_path = storage.key_path();
        let keys = if key_path.exists() {
            KeyStore::load(&key_path)?
        } else {
            let level = SecurityLevel::from_bits(config.security_bits).ok_or_else(|| {
                PrivacyError::Crypto(CryptoError::MalformedCiphertext(format!(
                    "unsupported security level: {} bits",
                    config.security_bits
                )))
            })?;
            let mut store = KeyStore::generate(level, &mut entropy_rng());
            store.save(&key_path)?;
            tracing::info!(path = %key_path.display(), "generated new key pair");
            store
        };

        let budget_path = storage.budget_path();
        let budget = if budget_path.exists() {
            PrivacyBudget::load(&budget_path)?
        } else {
            PrivacyBudget::new(
                config.total_epsilon,
                std::time::Duration::from_secs(config.reset_interval_secs),
            )
        };

        let generalizer = Generalizer::new(keys.surrogate_salt(), config.time_window_secs);

        Ok(Self {
            config,
            storage,
            budget,
            keys: RwLock::new(keys),
            generalizer,
            quasi: vec![
                QuasiIdentifier::User,
                QuasiIdentifier::Document,
                QuasiIdentifier::TimeWindow,
            ],
        })
    }

    pub fn budget(&self) -> &PrivacyBudget {
        &self.budget
    }

    /// Request the per-batch epsilon slice under the configured strategy.
    pub fn request_allocation(
        &self,
        priority: Priority,
    ) -> std::result::Result<EpsilonGrant, crate::BudgetError> {
        let strategy = if self.config.adaptive_allocation {
            AllocationStrategy::Adaptive
        } else {
            AllocationStrategy::Uniform
        };
        self.budget
            .request(self.config.epsilon_per_batch, priority, strategy)
    }

    /// Privatize one batch. Consumes the grant by value: a grant pays for
    /// exactly one sealed batch, ever.
    pub fn privatize_batch(
        &self,
        batch_id: BatchId,
        events: &[Event],
        grant: EpsilonGrant,
    ) -> Result<SealedBatch> {
        let records: Vec<_> = events.iter().map(|e| self.generalizer.generalize(e)).collect();

        let outcome = apply_suppression(
            &records,
            self.config.k,
            &self.quasi,
            self.config.suppression_ceiling,
        )?;
        debug_assert!(validate_k_anonymity(&outcome.classes, self.config.k).is_compliant);

        if outcome.info_loss >= 0.30 {
            tracing::warn!(
                batch_id = %batch_id,
                info_loss = outcome.info_loss,
                "information loss above the 30% target"
            );
        }

        // Split the grant between the two count releases.
        let half_epsilon = grant.epsilon() / 2.0;
        let mut class_noise = LaplaceNoise::new(self.config.sensitivity, half_epsilon);
        let mut action_noise = LaplaceNoise::new(self.config.sensitivity, half_epsilon);

        let classes: Vec<ClassSummary> = outcome
            .classes
            .iter()
            .map(|class| ClassSummary {
                key: class.key.clone(),
                noisy_count: class_noise.noisy_count(class.records.len() as u64),
            })
            .collect();

        // Per-action counts over published (non-suppressed) records only.
        let mut action_counts = [0u64; ACTION_CODE_LIMIT as usize];
        for class in &outcome.classes {
            for &idx in &class.records {
                action_counts[records[idx].action as usize] += 1;
            }
        }
        let noisy_action_counts: Vec<(u16, f64)> = action_counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(code, &count)| (code as u16, action_noise.noisy_count(count)))
            .collect();

        // Encrypted totals: the same per-action counts, quantized then
        // sealed, so downstream consumers can sum batches homomorphically.
        let quantized: Vec<i64> = action_counts
            .iter()
            .map(|&count| quantize(count as f64, self.config.quant_scale))
            .collect::<std::result::Result<_, _>>()?;
        let encrypted_totals = {
            let keys = self.keys.read().expect("keystore lock poisoned");
            keys.encrypt(&quantized, false, &mut entropy_rng())?
        };

        let epsilon_spent = grant.epsilon();
        tracing::debug!(
            batch_id = %batch_id,
            records = records.len(),
            classes = classes.len(),
            suppressed = outcome.suppressed.len(),
            epsilon_spent,
            "sealed batch"
        );

        Ok(SealedBatch {
            batch_id,
            classes,
            noisy_action_counts,
            encrypted_totals,
            info_loss: outcome.info_loss,
            epsilon_spent,
            suppressed: outcome.suppressed.len(),
            record_count: records.len(),
        })
    }

    /// Total privacy loss over the grants in the current interval, using
    /// the advanced bound once the basic sum passes 1.0.
    pub fn privacy_loss_bound(&self, delta: f64) -> f64 {
        composition::composition_bound(&self.budget.ledger(), delta)
    }

    /// Decrypt an engine-produced vector (tests and trusted tooling only).
    pub fn decrypt(&self, ct: &EncryptedVector) -> std::result::Result<Vec<i64>, CryptoError> {
        self.keys.read().expect("keystore lock poisoned").decrypt(ct)
    }

    pub fn quant_scale(&self) -> f64 {
        self.config.quant_scale
    }

    /// Write budget and key state to the storage paths.
    pub fn persist(&self) -> Result<()> {
        self.budget.save(self.storage.budget_path())?;
        self.keys
            .write()
            .expect("keystore lock poisoned")
            .save(self.storage.key_path())?;
        Ok(())
    }

    /// Securely delete the secret key in memory and on disk.
    pub fn destroy_secret_key(&self) -> Result<()> {
        self.keys
            .write()
            .expect("keystore lock poisoned")
            .destroy_secret_key()?;
        Ok(())
    }
}

fn entropy_rng() -> ChaCha20Rng {
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    ChaCha20Rng::from_seed(seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::action;

    fn engine(dir: &std::path::Path) -> PrivacyEngine {
        let config = PrivacyConfig {
            epsilon_per_batch: 0.5,
            ..PrivacyConfig::default()
        };
        PrivacyEngine::open(config, StorageConfig::from_base_dir(dir)).unwrap()
    }

    fn batch_events(n: usize) -> Vec<Event> {
        // 4 quasi-identifier combinations, n records each
        let mut events = Vec::new();
        for combo in 1..=4u64 {
            for i in 0..n {
                let mut e = Event::new(
                    1_700_000_000 + (i as u32 % 60),
                    combo,
                    action::DOCUMENT_VIEWED,
                    combo * 100,
                );
                e.template_id = combo as u32;
                events.push(e);
            }
        }
        events
    }

    #[test]
    fn test_privatize_batch_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let events = batch_events(25);
        let grant = engine.request_allocation(Priority::High).unwrap();
        let sealed = engine.privatize_batch(BatchId(1), &events, grant).unwrap();

        assert_eq!(sealed.record_count, 100);
        assert_eq!(sealed.classes.len(), 4);
        assert_eq!(sealed.suppressed, 0);
        assert!(sealed.info_loss < 0.30);
        assert!((sealed.epsilon_spent - 0.5).abs() < 1e-12);

        // The noisy class counts sit near the true count of 25
        // (b = 4, so a 40-wide window holds with overwhelming probability).
        for class in &sealed.classes {
            assert!((class.noisy_count - 25.0).abs() < 40.0);
        }

        // Encrypted totals decrypt back to the per-action counts.
        let decrypted = engine.decrypt(&sealed.encrypted_totals).unwrap();
        let viewed = decrypted[action::DOCUMENT_VIEWED as usize] as f64 / engine.quant_scale();
        assert!((viewed - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_spent_epsilon_tracked_in_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(dir.path());

        let events = batch_events(10);
        let grant = engine.request_allocation(Priority::High).unwrap();
        engine.privatize_batch(BatchId(1), &events, grant).unwrap();

        assert!((engine.budget().consumed() - 0.5).abs() < 1e-12);
        assert!(engine.privacy_loss_bound(1e-6) <= 0.5 + 1e-12);
    }

    #[test]
    fn test_persist_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let salt_before;
        {
            let engine = engine(dir.path());
            salt_before = engine.keys.read().unwrap().surrogate_salt();
            let grant = engine.request_allocation(Priority::High).unwrap();
            engine
                .privatize_batch(BatchId(1), &batch_events(10), grant)
                .unwrap();
            engine.persist().unwrap();
        }

        let reopened = engine(dir.path());
        // Same salt, so surrogates stay consistent across restarts.
        assert_eq!(reopened.keys.read().unwrap().surrogate_salt(), salt_before);
        assert!((reopened.budget().consumed() - 0.5).abs() < 1e-12);
    }
}
