// ABOUTME: Country registry: an external code-to-name mapping used only for validation.
// ABOUTME: Loaded from a YAML document; the engine does not own or edit it.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::ConfigError;

/// An ISO 3166-1 alpha-2 code to display-name mapping.
#[derive(Debug, Clone, Default)]
pub struct CountryRegistry {
    map: BTreeMap<String, String>,
}

impl CountryRegistry {
    /// Loads the registry from a YAML mapping of code to name.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: BTreeMap<String, String> =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let map = raw
            .into_iter()
            .map(|(code, name)| (code.trim().to_uppercase(), name))
            .collect();
        Ok(Self { map })
    }

    pub fn is_valid_code(&self, code: &str) -> bool {
        self.map.contains_key(&code.trim().to_uppercase())
    }

    pub fn name(&self, code: &str) -> Option<&str> {
        self.map
            .get(&code.trim().to_uppercase())
            .map(|s| s.as_str())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn loads_and_validates_codes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("countries.yaml");
        fs::write(&path, "US: United States\njp: Japan\nDE: Germany\n").unwrap();

        let registry = CountryRegistry::load(&path).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.is_valid_code("US"));
        assert!(registry.is_valid_code("us"));
        assert!(registry.is_valid_code("JP"));
        assert!(!registry.is_valid_code("ZZ"));
        assert_eq!(registry.name("de"), Some("Germany"));
    }

    #[test]
    fn malformed_registry_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("countries.yaml");
        fs::write(&path, "- just\n- a\n- list\n").unwrap();
        assert!(matches!(
            CountryRegistry::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
