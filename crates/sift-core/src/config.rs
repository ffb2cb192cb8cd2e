//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result, EVENT_FOOTPRINT};

/// Configuration format version
pub const CONFIG_VERSION: &str = "1.0.0";

/// Hard ceiling on buffer memory (bytes)
const BUFFER_LIMIT_BYTES: usize = 5 * 1024 * 1024;

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub batch: BatchConfig,
    pub privacy: PrivacyConfig,
    pub storage: StorageConfig,
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,
    /// Hash for change detection
    #[serde(default)]
    pub config_hash: Option<String>,
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

/// Capture boundary settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Bounded channel capacity between capture and the processor
    pub channel_capacity: usize,
    /// Return `Deferred` when the memory pool's available fraction drops
    /// below this
    pub defer_below: f64,
    /// Return `Dropped(MemoryPressure)` below this
    pub drop_below: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 8192,
            defer_below: 0.25,
            drop_below: 0.10,
        }
    }
}

/// Batch processor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Bounded event buffer capacity (events)
    pub buffer_capacity: usize,
    /// Lower bound for the adaptive batch size
    pub min_batch: usize,
    /// Upper bound for the adaptive batch size
    pub max_batch: usize,
    /// Target the controller decays toward under steady load
    pub baseline_batch: usize,
    /// Recompute the target every this many flushed batches
    pub controller_period: u32,
    /// Flush even a partial buffer after this long (ms)
    pub flush_interval_ms: u64,
    /// Memory pool capacity (KiB) backing batch permits
    pub pool_kib: usize,
    /// Permit acquisition timeout (ms)
    pub permit_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 4096,
            min_batch: 256,
            max_batch: 2048,
            baseline_batch: 512,
            controller_period: 8,
            flush_interval_ms: 200,
            pool_kib: 4096,
            permit_timeout_ms: 500,
        }
    }
}

/// Privacy engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Total epsilon budget per reset interval
    pub total_epsilon: f64,
    /// Budget reset interval (seconds)
    pub reset_interval_secs: u64,
    /// Epsilon requested per sealed batch
    pub epsilon_per_batch: f64,
    /// Use the adaptive (priority-weighted) allocation strategy
    pub adaptive_allocation: bool,
    /// Query sensitivity for the Laplace mechanism
    pub sensitivity: f64,
    /// k for k-anonymity
    pub k: usize,
    /// Maximum fraction of records that may be suppressed
    pub suppression_ceiling: f64,
    /// Fixed-point quantization scale for encrypted aggregates
    pub quant_scale: f64,
    /// Temporal generalization window (seconds)
    pub time_window_secs: u32,
    /// Lattice security level in bits (128 or 192)
    pub security_bits: u16,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            total_epsilon: 1.0,
            reset_interval_secs: 3600,
            epsilon_per_batch: 0.1,
            adaptive_allocation: false,
            sensitivity: 1.0,
            k: 5,
            suppression_ceiling: 0.05,
            quant_scale: 10_000.0,
            time_window_secs: 3600,
            security_bits: 128,
        }
    }
}

/// Paths for persisted budget and key state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
}

impl StorageConfig {
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn budget_path(&self) -> PathBuf {
        self.base_dir.join("budget.json")
    }

    pub fn key_path(&self) -> PathBuf {
        self.base_dir.join("keys.bin")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::from_base_dir("./sift-data")
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            batch: BatchConfig::default(),
            privacy: PrivacyConfig::default(),
            storage: StorageConfig::default(),
            version: CONFIG_VERSION.to_string(),
            config_hash: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig::from_base_dir(base_dir),
            ..Self::default()
        }
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.batch.buffer_capacity = capacity;
        self
    }

    pub fn with_total_epsilon(mut self, epsilon: f64) -> Self {
        self.privacy.total_epsilon = epsilon;
        self
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.privacy.k = k;
        self
    }

    /// Validate cross-field consistency. Called before the pipeline spawns.
    pub fn validate(&self) -> Result<()> {
        let b = &self.batch;
        if b.buffer_capacity == 0 {
            return Err(Error::InvalidConfig("buffer_capacity must be > 0".into()));
        }
        let buffer_bytes = b.buffer_capacity * EVENT_FOOTPRINT;
        if buffer_bytes > BUFFER_LIMIT_BYTES {
            return Err(Error::InvalidConfig(format!(
                "buffer memory {} bytes exceeds hard limit {} bytes",
                buffer_bytes, BUFFER_LIMIT_BYTES
            )));
        }
        if b.min_batch == 0 || b.min_batch > b.max_batch {
            return Err(Error::InvalidConfig(format!(
                "batch bounds inverted: min {} > max {}",
                b.min_batch, b.max_batch
            )));
        }
        if b.baseline_batch < b.min_batch || b.baseline_batch > b.max_batch {
            return Err(Error::InvalidConfig(
                "baseline_batch outside [min_batch, max_batch]".into(),
            ));
        }
        if b.controller_period == 0 {
            return Err(Error::InvalidConfig("controller_period must be > 0".into()));
        }
        if b.pool_kib == 0 {
            return Err(Error::InvalidConfig("pool_kib must be > 0".into()));
        }

        let c = &self.capture;
        if c.channel_capacity == 0 {
            return Err(Error::InvalidConfig("channel_capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&c.defer_below) || !(0.0..=1.0).contains(&c.drop_below) {
            return Err(Error::InvalidConfig(
                "pressure thresholds must be in [0, 1]".into(),
            ));
        }
        if c.drop_below > c.defer_below {
            return Err(Error::InvalidConfig(
                "drop_below must not exceed defer_below".into(),
            ));
        }

        let p = &self.privacy;
        if p.total_epsilon <= 0.0 || p.epsilon_per_batch <= 0.0 || p.sensitivity <= 0.0 {
            return Err(Error::InvalidConfig(
                "epsilon and sensitivity must be positive".into(),
            ));
        }
        if p.k == 0 {
            return Err(Error::InvalidConfig("k must be at least 1".into()));
        }
        if p.suppression_ceiling <= 0.0 || p.suppression_ceiling > 1.0 {
            return Err(Error::InvalidConfig(
                "suppression_ceiling must be in (0, 1]".into(),
            ));
        }
        // 1/(2*scale) is the worst-case quantization error; keep it under
        // the 0.01 round-trip bound with margin.
        if p.quant_scale < 100.0 {
            return Err(Error::InvalidConfig(
                "quant_scale too small for the 0.01 round-trip bound".into(),
            ));
        }
        if p.time_window_secs == 0 {
            return Err(Error::InvalidConfig("time_window_secs must be > 0".into()));
        }
        if p.security_bits != 128 && p.security_bits != 192 {
            return Err(Error::InvalidConfig(format!(
                "unsupported security level: {} bits",
                p.security_bits
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file (temp file + rename so a crash
    /// cannot leave a torn file)
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Compute a hash of the fields that must match between a persisted
    /// budget/key state and the running pipeline.
    pub fn compute_hash(&self) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.batch.buffer_capacity.hash(&mut hasher);
        self.privacy.total_epsilon.to_bits().hash(&mut hasher);
        self.privacy.k.hash(&mut hasher);
        self.privacy.quant_scale.to_bits().hash(&mut hasher);
        self.privacy.security_bits.hash(&mut hasher);
        self.version.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn with_hash(mut self) -> Self {
        self.config_hash = Some(self.compute_hash());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_batch_bounds_rejected() {
        let mut config = PipelineConfig::default();
        config.batch.min_batch = 4096;
        config.batch.max_batch = 256;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_buffer_memory_hard_limit() {
        let mut config = PipelineConfig::default();
        config.batch.buffer_capacity = 200_000; // 200k * 32B = 6.1 MiB
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_k_rejected() {
        let mut config = PipelineConfig::default();
        config.privacy.k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = PipelineConfig::from_base_dir("/data/sift")
            .with_total_epsilon(2.0)
            .with_hash();
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.privacy.total_epsilon, 2.0);
        assert_eq!(loaded.config_hash, config.config_hash);
        assert_eq!(loaded.storage.budget_path(), PathBuf::from("/data/sift/budget.json"));
    }

    #[test]
    fn test_hash_changes_on_shape_change() {
        let base = PipelineConfig::default().with_hash();
        let changed = PipelineConfig::default().with_k(10).with_hash();
        assert_ne!(base.config_hash, changed.config_hash);
    }
}
