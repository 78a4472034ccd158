//! Sync controller configuration
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{MarkerCodec, MissingCommentPolicy, ResolutionPolicy, Result, SyncError};

pub const DEFAULT_METADATA_KEY: &str = "collab";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Metadata key the serialized thread map lives under
    pub metadata_key: String,

    /// Class-name prefix binding a block to its thread
    pub marker_prefix: String,

    /// Whether resolving deletes or keeps the thread
    pub resolution: ResolutionPolicy,

    /// Deleting an unknown comment id: no-op or error
    pub missing_comment: MissingCommentPolicy,

    /// Start from an empty map when the stored blob cannot be parsed
    pub recover_malformed: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            marker_prefix: threads::DEFAULT_MARKER_PREFIX.to_string(),
            resolution: ResolutionPolicy::default(),
            missing_comment: MissingCommentPolicy::default(),
            recover_malformed: true,
        }
    }
}

impl SyncConfig {
    pub fn with_resolution(mut self, resolution: ResolutionPolicy) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_missing_comment(mut self, policy: MissingCommentPolicy) -> Self {
        self.missing_comment = policy;
        self
    }

    pub fn with_recover_malformed(mut self, recover: bool) -> Self {
        self.recover_malformed = recover;
        self
    }

    pub fn codec(&self) -> MarkerCodec {
        MarkerCodec::new(self.marker_prefix.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.metadata_key.trim().is_empty() {
            return Err(SyncError::Config("metadata_key must not be empty".into()));
        }
        if self.marker_prefix.is_empty() || self.marker_prefix.contains(char::is_whitespace) {
            return Err(SyncError::Config(format!(
                "marker_prefix must be a single class-name token, got {:?}",
                self.marker_prefix
            )));
        }
        Ok(())
    }

    /// Load configuration from JSON. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SyncError::Config(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.metadata_key, "collab");
        assert_eq!(config.marker_prefix, "block-editor-collab__");
        assert_eq!(config.resolution, ResolutionPolicy::Delete);
        assert_eq!(config.missing_comment, MissingCommentPolicy::Ignore);
        assert!(config.recover_malformed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SyncConfig =
            serde_json::from_str(r#"{"resolution":"retain","missing_comment":"reject"}"#).unwrap();
        assert_eq!(config.resolution, ResolutionPolicy::Retain);
        assert_eq!(config.missing_comment, MissingCommentPolicy::Reject);
        assert_eq!(config.metadata_key, DEFAULT_METADATA_KEY);
    }

    #[test]
    fn test_validate_rejects_bad_prefix() {
        let mut config = SyncConfig::default();
        config.marker_prefix = "two words".into();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = SyncConfig::default();
        config.metadata_key = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("sync-config-{}.json", std::process::id()));
        let config = SyncConfig::default().with_resolution(ResolutionPolicy::Retain);
        config.save(&path).unwrap();
        let loaded = SyncConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
