//! Template section of the configuration

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};
use validator::Validate;

use crate::loader::ConfigError;
use crate::store::ConfigStore;

/// Values of the `template` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(default, rename_all = "camelCase")]
pub struct TemplateSettings {
    /// Behavior marker for unresolved template keys, passed through verbatim
    #[serde(alias = "missingkey")]
    pub missing_key: String,

    /// Where templates are read from
    #[serde(alias = "sourcepath")]
    #[validate(length(min = 1, message = "template source path is required"))]
    #[validate(custom(function = "crate::validation::validate_uri", message = "template source path must be a URL or path"))]
    pub source_path: String,

    /// Where rendered output goes; empty renders in place
    #[serde(alias = "targetpath")]
    #[validate(custom(function = "crate::validation::validate_uri", message = "template target path must be a URL or path"))]
    pub target_path: String,
}

/// Live, validated view over the `template` section
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    settings: Arc<RwLock<TemplateSettings>>,
    store: ConfigStore,
}

impl TemplateConfig {
    /// Load and validate the section, then register it for reloads
    pub fn new(store: &ConfigStore) -> Result<Self, ConfigError> {
        let config = Self {
            settings: Arc::new(RwLock::new(TemplateSettings::default())),
            store: store.clone(),
        };
        config.configure()?;
        let reload = config.clone();
        store.on_change(move |event| {
            debug!(path = %event.path.display(), "template configuration file changed");
            if let Err(err) = reload.configure() {
                warn!("changed config produced error: {err}, falling back to previous values");
            }
        });
        Ok(config)
    }

    /// Refresh from the store, committing only fully validated values
    fn configure(&self) -> Result<(), ConfigError> {
        let candidate: TemplateSettings = self.store.unmarshal_key("template")?;
        candidate
            .validate()
            .map_err(|source| ConfigError::Validation {
                key: "template".to_string(),
                source,
            })?;
        *self.settings.write() = candidate;
        Ok(())
    }

    /// Behavior marker for unresolved template keys
    pub fn missing_key(&self) -> String {
        self.settings.read().missing_key.clone()
    }

    /// Where templates are read from
    pub fn source_path(&self) -> String {
        self.settings.read().source_path.clone()
    }

    /// Where rendered output goes, empty when unset
    pub fn target_path(&self) -> String {
        self.settings.read().target_path.clone()
    }

    /// A copy of the whole section
    pub fn snapshot(&self) -> TemplateSettings {
        self.settings.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::fs;
    use tempfile::tempdir;

    fn store_with_config(prefix: &str, content: &str) -> (ConfigStore, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, content).expect("write config");
        let store = ConfigStore::new(prefix);
        store
            .load(path.to_str().expect("utf-8 path"))
            .expect("load config");
        (store, dir)
    }

    #[test]
    fn test_only_source() {
        let (store, _dir) =
            store_with_config("RETPL_TPL_A", "template:\n  sourcePath: \"/var/tmp/\"\n");
        let config = TemplateConfig::new(&store).expect("template config");
        assert_eq!(
            config.snapshot(),
            TemplateSettings {
                missing_key: String::new(),
                source_path: "/var/tmp/".into(),
                target_path: String::new(),
            }
        );
    }

    #[test]
    fn test_wrong_source_type() {
        let (store, _dir) = store_with_config("RETPL_TPL_B", "template:\n  sourcePath: 123\n");
        let err = TemplateConfig::new(&store).unwrap_err();
        assert!(matches!(err, ConfigError::Unmarshal { .. }));
    }

    #[test]
    fn test_wrong_target_type() {
        let (store, _dir) = store_with_config(
            "RETPL_TPL_C",
            "template:\n  sourcePath: \"/var/tmp/test\"\n  targetPath: 123\n",
        );
        let err = TemplateConfig::new(&store).unwrap_err();
        assert!(matches!(err, ConfigError::Unmarshal { .. }));
    }

    #[test]
    fn test_missing_source_is_rejected() {
        let (store, _dir) =
            store_with_config("RETPL_TPL_D", "template:\n  missingKey: error\n");
        let err = TemplateConfig::new(&store).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_url_source_and_target() {
        let (store, _dir) = store_with_config(
            "RETPL_TPL_E",
            "template:\n  sourcePath: \"https://example.com/t\"\n  targetPath: \"/srv/out\"\n",
        );
        let config = TemplateConfig::new(&store).expect("template config");
        assert_eq!(config.source_path(), "https://example.com/t");
        assert_eq!(config.target_path(), "/srv/out");
    }

    #[test]
    fn test_env_overrides_source_path() {
        let (store, _dir) =
            store_with_config("RETPL_TPL_F", "template:\n  sourcePath: \"/var/tmp/\"\n");
        env::set_var("RETPL_TPL_F_TEMPLATE_SOURCEPATH", "/srv/templates");
        let config = TemplateConfig::new(&store).expect("template config");
        assert_eq!(config.source_path(), "/srv/templates");
        env::remove_var("RETPL_TPL_F_TEMPLATE_SOURCEPATH");
    }

    #[test]
    fn test_reload_rolls_back_on_validation_failure() {
        let (store, dir) =
            store_with_config("RETPL_TPL_G", "template:\n  sourcePath: \"/var/tmp/\"\n");
        let config = TemplateConfig::new(&store).expect("template config");
        let before = config.snapshot();

        fs::write(
            dir.path().join("config.yaml"),
            "template:\n  missingKey: error\n",
        )
        .expect("rewrite config");
        store.reload();
        assert_eq!(config.snapshot(), before);

        fs::write(
            dir.path().join("config.yaml"),
            "template:\n  sourcePath: \"/srv/next\"\n",
        )
        .expect("rewrite config");
        store.reload();
        assert_eq!(config.source_path(), "/srv/next");
    }
}
