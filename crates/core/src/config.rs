use crate::error::Result;
use crate::facade::FacadeContract;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Top-level packages left alone by the shadower: the platform UI toolkit,
/// its extension libraries and the language runtime.
pub const DEFAULT_IGNORED_NAMESPACES: [&str; 3] = ["android", "androidx", "kotlin"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub facade: FacadeContract,
    pub ignored_namespaces: BTreeSet<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            facade: FacadeContract::default(),
            ignored_namespaces: DEFAULT_IGNORED_NAMESPACES
                .iter()
                .map(|ns| ns.to_string())
                .collect(),
        }
    }
}

impl TransformConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Whether the class's top-level package is exempt from shadowing.
    ///
    /// A class in the unnamed package is matched by its whole name.
    pub fn is_ignored(&self, internal_name: &str) -> bool {
        let top_level = internal_name.split('/').next().unwrap_or(internal_name);
        self.ignored_namespaces.contains(top_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_ignores_platform_namespaces() {
        let config = TransformConfig::default();
        assert!(config.is_ignored("android/widget/Widget"));
        assert!(config.is_ignored("kotlin/collections/CollectionsKt"));
        assert!(!config.is_ignored("com/x/App"));
        assert!(!config.is_ignored("androidxx/Foo"));
    }

    #[test]
    fn test_load_partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ignored_namespaces": ["platform"]}}"#).unwrap();

        let config = TransformConfig::load(file.path()).unwrap();
        assert!(config.is_ignored("platform/Widget"));
        assert!(!config.is_ignored("android/Widget"));
        assert_eq!(config.facade, FacadeContract::default());
    }
}
