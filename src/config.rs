//! Learning engine configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceScale;
use crate::error::ConfigError;

/// Default file name of the persisted knowledge base.
pub const DEFAULT_STORE_FILE: &str = "knowledge_base.json";

/// Default number of distinct corroborating corrections needed for a rule.
pub const DEFAULT_SUPPORT_THRESHOLD: u32 = 2;

/// Retention policy for superseded pattern rules.
///
/// Rules still produced by the abstractor are never pruned. Only rules that
/// have been superseded and have not matched for `max_idle_sessions`
/// sessions are eligible, and only when pruning is requested explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Sessions a superseded rule may stay unused. `None` keeps rules forever.
    #[serde(default)]
    pub max_idle_sessions: Option<u64>,
}

/// Configuration for the learning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Distinct corroborating corrections needed before a rule is emitted.
    pub support_threshold: u32,
    /// Support-to-confidence mapping.
    pub confidence: ConfidenceScale,
    /// Pruning of superseded rules.
    pub retention: RetentionPolicy,
    /// File name of the knowledge base inside the store directory.
    pub store_file: String,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            support_threshold: DEFAULT_SUPPORT_THRESHOLD,
            confidence: ConfidenceScale::default(),
            retention: RetentionPolicy::default(),
            store_file: DEFAULT_STORE_FILE.to_string(),
        }
    }
}

impl LearningConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a value is out of range.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.support_threshold < DEFAULT_SUPPORT_THRESHOLD {
            return Err(ConfigError::Invalid {
                field: "support_threshold",
                reason: format!(
                    "must be at least {DEFAULT_SUPPORT_THRESHOLD} (got {})",
                    self.support_threshold
                ),
            });
        }

        self.confidence.validate()?;

        if self.retention.max_idle_sessions == Some(0) {
            return Err(ConfigError::Invalid {
                field: "retention.max_idle_sessions",
                reason: "must be at least 1 when set".to_string(),
            });
        }

        let name = self.store_file.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(ConfigError::Invalid {
                field: "store_file",
                reason: format!("must be a plain file name (got '{}')", self.store_file),
            });
        }

        Ok(self)
    }

    /// Loads and validates a JSON configuration file.
    ///
    /// Missing keys take their default values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Unreadable` if the file cannot be read or parsed,
    /// or `ConfigError::Invalid` if validation fails.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let unreadable = |reason: String| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason,
        };

        let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let config: Self = serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = LearningConfig::default().validate().unwrap();
        assert_eq!(config.support_threshold, 2);
        assert_eq!(config.store_file, "knowledge_base.json");
        assert_eq!(config.retention.max_idle_sessions, None);
    }

    #[test]
    fn test_threshold_below_two_rejected() {
        let config = LearningConfig {
            support_threshold: 1,
            ..LearningConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("support_threshold"));
    }

    #[test]
    fn test_store_file_must_be_plain_name() {
        let config = LearningConfig {
            store_file: "../kb.json".to_string(),
            ..LearningConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idle_sessions_rejected() {
        let config = LearningConfig {
            retention: RetentionPolicy {
                max_idle_sessions: Some(0),
            },
            ..LearningConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learn.json");
        std::fs::write(&path, r#"{ "confidence": { "saturation": 4 } }"#).unwrap();

        let config = LearningConfig::from_json_file(&path).unwrap();
        assert_eq!(config.confidence.saturation, 4);
        assert_eq!(config.support_threshold, 2);
    }

    #[test]
    fn test_from_json_file_missing() {
        let err = LearningConfig::from_json_file("/nonexistent/learn.json").unwrap_err();
        assert!(matches!(err, ConfigError::Unreadable { .. }));
    }
}
