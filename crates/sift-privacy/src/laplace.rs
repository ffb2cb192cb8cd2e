//! Laplace mechanism
//!
//! Noise scaled to `b = sensitivity / epsilon` gives epsilon-DP for a query
//! with the given L1 sensitivity. The sampler is inverse-CDF over a
//! ChaCha20 stream so tests can pin a seed and the statistical contract
//! (mean ~ 0, variance ~ 2b^2) is reproducible.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub struct LaplaceNoise {
    scale: f64,
    rng: ChaCha20Rng,
}

impl LaplaceNoise {
    /// Sampler with entropy seeding for production use.
    pub fn new(sensitivity: f64, epsilon: f64) -> Self {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut seed);
        Self {
            scale: sensitivity / epsilon,
            rng: ChaCha20Rng::from_seed(seed),
        }
    }

    /// Deterministic sampler for tests and reproducible pipelines.
    pub fn seeded(sensitivity: f64, epsilon: f64, seed: u64) -> Self {
        Self {
            scale: sensitivity / epsilon,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// One Laplace(0, b) draw via inverse CDF.
    pub fn sample(&mut self) -> f64 {
        // u uniform in (-0.5, 0.5]; avoid u = -0.5 exactly where ln(0) blows up
        let u: f64 = self.rng.gen::<f64>() - 0.5;
        let u = if u <= -0.5 { -0.499_999_999 } else { u };
        -self.scale * u.signum() * (1.0 - 2.0 * u.abs()).ln()
    }

    pub fn noisy_count(&mut self, count: u64) -> f64 {
        count as f64 + self.sample()
    }

    pub fn noisy_sum(&mut self, values: &[f64]) -> f64 {
        values.iter().sum::<f64>() + self.sample()
    }

    pub fn noisy_mean(&mut self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return self.sample();
        }
        values.iter().sum::<f64>() / values.len() as f64 + self.sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_from_sensitivity_and_epsilon() {
        let noise = LaplaceNoise::seeded(2.0, 0.5, 1);
        assert!((noise.scale() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_mean_and_variance_contract() {
        // b = 1.0 / 0.5 = 2.0, expected variance 2b^2 = 8.0
        let mut noise = LaplaceNoise::seeded(1.0, 0.5, 42);
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| noise.sample()).collect();

        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64;

        assert!(mean.abs() < 0.1, "empirical mean {} too far from 0", mean);
        let expected = 2.0 * 2.0 * 2.0;
        assert!(
            (var - expected).abs() / expected < 0.2,
            "empirical variance {} outside 20% of {}",
            var,
            expected
        );
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let mut a = LaplaceNoise::seeded(1.0, 1.0, 7);
        let mut b = LaplaceNoise::seeded(1.0, 1.0, 7);
        for _ in 0..100 {
            assert_eq!(a.sample(), b.sample());
        }
    }

    #[test]
    fn test_noisy_count_near_count_for_large_epsilon() {
        let mut noise = LaplaceNoise::seeded(1.0, 100.0, 3);
        let noisy = noise.noisy_count(1000);
        assert!((noisy - 1000.0).abs() < 1.0);
    }
}
