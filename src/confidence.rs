//! Confidence scoring for pattern rules.
//!
//! A rule's confidence is an explicit, tunable function of its support:
//! `min(1.0, support_count / saturation)`. It never decreases as support
//! grows, and it reaches 1.0 once `saturation` distinct corrections agree.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of distinct corrections at which confidence saturates.
pub const DEFAULT_SATURATION: u32 = 5;

/// Maps support counts to confidence values.
///
/// # Examples
///
/// ```
/// use feedback_learn::ConfidenceScale;
///
/// let scale = ConfidenceScale::new(4).unwrap();
/// assert_eq!(scale.confidence(2), 0.5);
/// assert_eq!(scale.confidence(9), 1.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceScale {
    /// Support count at which confidence reaches 1.0.
    pub saturation: u32,
}

impl Default for ConfidenceScale {
    fn default() -> Self {
        Self {
            saturation: DEFAULT_SATURATION,
        }
    }
}

impl ConfidenceScale {
    /// Creates a validated scale.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `saturation` is zero.
    pub fn new(saturation: u32) -> Result<Self, ConfigError> {
        Self { saturation }.validate()
    }

    /// Validates the scale.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `saturation` is zero.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.saturation == 0 {
            return Err(ConfigError::Invalid {
                field: "confidence.saturation",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(self)
    }

    /// Confidence for a given distinct support count, in [0.0, 1.0].
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn confidence(&self, support_count: u32) -> f32 {
        if self.saturation == 0 {
            return 1.0;
        }
        (support_count as f32 / self.saturation as f32).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scale() {
        let scale = ConfidenceScale::default();
        assert_eq!(scale.saturation, 5);
        assert!((scale.confidence(2) - 0.4).abs() < f32::EPSILON);
        assert_eq!(scale.confidence(5), 1.0);
    }

    #[test]
    fn test_zero_saturation_rejected() {
        assert!(ConfidenceScale::new(0).is_err());
    }

    #[test]
    fn test_confidence_is_monotonic() {
        let scale = ConfidenceScale::new(3).unwrap();
        let mut prev = 0.0;
        for support in 0..10 {
            let c = scale.confidence(support);
            assert!(c >= prev);
            assert!((0.0..=1.0).contains(&c));
            prev = c;
        }
    }

    #[test]
    fn test_zero_support() {
        assert_eq!(ConfidenceScale::default().confidence(0), 0.0);
    }
}
