//! Combining base-model scores with attribute-predictor evidence.
//!
//! A predictor's logit is read as the log-odds that the attribute will hold. Fusion turns it into
//! a log-probability with `log_sigmoid` and adds it, weighted, to the base score.

/// Weight on the attribute term. Zero turns conditioning off entirely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeight(pub f32);

impl FusionWeight {
    /// True when predictor calls must be skipped.
    #[must_use]
    pub fn is_disabled(self) -> bool {
        self.0 == 0.0
    }

    #[must_use]
    pub fn value(self) -> f32 {
        self.0
    }
}

impl Default for FusionWeight {
    fn default() -> Self {
        Self(1.0)
    }
}

impl From<f32> for FusionWeight {
    fn from(w: f32) -> Self {
        Self(w)
    }
}

/// `x - ln(1 + e^x)` without overflow for large `|x|`.
#[must_use]
pub fn log_sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `base + weight * log_sigmoid(logit - baseline)`.
#[must_use]
pub fn fuse(base_score: f32, attribute_logit: f32, baseline_log_prob: f32, weight: FusionWeight) -> f32 {
    if weight.is_disabled() {
        return base_score;
    }
    base_score + weight.value() * log_sigmoid(attribute_logit - baseline_log_prob)
}

/// `base + weight * Σ log_probs` for several independent attributes.
#[must_use]
pub fn fuse_terms(base_score: f32, log_probs: &[f32], weight: FusionWeight) -> f32 {
    if weight.is_disabled() {
        return base_score;
    }
    base_score + weight.value() * log_probs.iter().sum::<f32>()
}

/// Mean of `log_sigmoid` over per-target logits, for multi-word topic conditioning.
///
/// Returns 0 for an empty row.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_log_sigmoid(logits: &[f32]) -> f32 {
    if logits.is_empty() {
        return 0.0;
    }
    logits.iter().map(|&l| log_sigmoid(l)).sum::<f32>() / logits.len() as f32
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn test_log_sigmoid_values() {
        assert_abs_diff_eq!(log_sigmoid(0.0), -std::f32::consts::LN_2, epsilon = 1e-6);
        assert_abs_diff_eq!(log_sigmoid(2.0), -(1.0 + (-2.0_f32).exp()).ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(log_sigmoid(-3.0), -3.0 - (1.0 + 3.0_f32.exp()).ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_log_sigmoid_is_stable_at_extremes() {
        assert!(log_sigmoid(1000.0).abs() < 1e-6);
        assert_abs_diff_eq!(log_sigmoid(-1000.0), -1000.0, epsilon = 1e-3);
        assert!(log_sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn test_fuse_monotone_in_attribute_logit() {
        let w = FusionWeight(1.5);
        let mut prev = f32::NEG_INFINITY;
        for l in [-8.0, -2.0, -0.5, 0.0, 0.5, 3.0, 9.0] {
            let s = fuse(-1.0, l, -2.0, w);
            assert!(s > prev, "{s} <= {prev} at logit {l}");
            prev = s;
        }
    }

    #[test]
    fn test_zero_weight_returns_base() {
        assert_eq!(fuse(-3.25, 100.0, 0.0, FusionWeight(0.0)), -3.25);
        assert_eq!(fuse_terms(-3.25, &[-1.0, -2.0], FusionWeight(0.0)), -3.25);
        assert!(FusionWeight(0.0).is_disabled());
        assert!(!FusionWeight::default().is_disabled());
    }

    #[test]
    fn test_fuse_terms_sums() {
        assert_abs_diff_eq!(fuse_terms(1.0, &[-0.5, -0.25], FusionWeight(2.0)), -0.5);
    }

    #[test]
    fn test_mean_log_sigmoid() {
        let m = mean_log_sigmoid(&[0.0, 0.0]);
        assert_abs_diff_eq!(m, -std::f32::consts::LN_2, epsilon = 1e-6);
        assert_eq!(mean_log_sigmoid(&[]), 0.0);
    }
}
