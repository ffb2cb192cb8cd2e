//! Privacy-loss composition accounting
//!
//! Basic composition: k releases of eps_i compose to sum(eps_i). Past a
//! cumulative epsilon of 1.0 the advanced composition theorem gives a
//! tighter (eps, delta) bound, which `composition_bound` switches to.

/// Sum of per-release epsilons (basic composition).
pub fn basic_composition(epsilons: &[f64]) -> f64 {
    epsilons.iter().sum()
}

/// Advanced composition bound for k releases at eps_max each:
/// sqrt(2k ln(1/delta)) * eps_max + k * eps_max * (e^eps_max - 1)
pub fn advanced_composition(epsilons: &[f64], delta: f64) -> f64 {
    if epsilons.is_empty() {
        return 0.0;
    }
    let k = epsilons.len() as f64;
    let eps_max = epsilons.iter().cloned().fold(0.0_f64, f64::max);
    (2.0 * k * (1.0 / delta).ln()).sqrt() * eps_max + k * eps_max * (eps_max.exp() - 1.0)
}

/// Total privacy loss for the given releases: the basic bound below a
/// cumulative epsilon of 1.0, the tighter of basic/advanced above it.
pub fn composition_bound(epsilons: &[f64], delta: f64) -> f64 {
    let basic = basic_composition(epsilons);
    if basic <= 1.0 {
        basic
    } else {
        basic.min(advanced_composition(epsilons, delta))
    }
}

/// Estimate the epsilon actually spent on a privatized series.
///
/// The mean absolute deviation of (privatized - original) is the maximum
/// likelihood estimate of the Laplace scale b, and eps = sensitivity / b.
/// Returns 0 when the series carry no noise signal at all.
pub fn measure_spent(original: &[f64], privatized: &[f64], sensitivity: f64) -> f64 {
    debug_assert_eq!(original.len(), privatized.len());
    if original.is_empty() {
        return 0.0;
    }
    let mad: f64 = original
        .iter()
        .zip(privatized)
        .map(|(o, p)| (p - o).abs())
        .sum::<f64>()
        / original.len() as f64;
    if mad <= f64::EPSILON {
        return 0.0;
    }
    sensitivity / mad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::laplace::LaplaceNoise;

    #[test]
    fn test_basic_is_sum() {
        assert!((basic_composition(&[0.1, 0.2, 0.3]) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_bound_switches_above_one() {
        // 50 releases at 0.1: basic = 5.0, advanced is tighter
        let epsilons = vec![0.1; 50];
        let bound = composition_bound(&epsilons, 1e-6);
        assert!(bound < basic_composition(&epsilons));
        assert!(bound > 0.0);
    }

    #[test]
    fn test_bound_is_basic_below_one() {
        let epsilons = vec![0.1; 5];
        assert_eq!(composition_bound(&epsilons, 1e-6), 0.5);
    }

    #[test]
    fn test_measured_spend_never_exceeds_allocated() {
        // Noise a series at eps = 0.5 and check the estimate does not claim
        // more spend than was allocated (small-sample slack of 20%).
        let epsilon = 0.5;
        let mut noise = LaplaceNoise::seeded(1.0, epsilon, 11);
        let original: Vec<f64> = (0..5000).map(|i| (i % 100) as f64).collect();
        let privatized: Vec<f64> = original.iter().map(|v| v + noise.sample()).collect();

        let measured = measure_spent(&original, &privatized, 1.0);
        assert!(
            measured <= epsilon * 1.2,
            "measured {} exceeds allocated {}",
            measured,
            epsilon
        );
    }
}
