use std::path::PathBuf;

use tracing::warn;

use super::storage::DEFAULT_STORAGE_FILE;

/// What to do when writing the graph to disk fails after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePolicy {
    /// Log the failure and still report the operation as successful.
    Lossy,
    /// Fail the operation. The in-memory change is kept and goes out with
    /// the next successful save.
    Strict,
}

impl SavePolicy {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "lossy" | "lenient" => Some(Self::Lossy),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lossy => "lossy",
            Self::Strict => "strict",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub storage_path: PathBuf,
    pub save_policy: SavePolicy,
}

impl MemoryConfig {
    pub fn defaults() -> Self {
        Self {
            storage_path: PathBuf::from(DEFAULT_STORAGE_FILE),
            save_policy: SavePolicy::Lossy,
        }
    }

    /// Defaults, then environment, then explicit command line values.
    pub fn load(storage_path: Option<PathBuf>, save_policy: Option<&str>) -> Self {
        let mut config = Self::defaults();
        config.apply_env_overrides();
        if let Some(path) = storage_path {
            config.storage_path = path;
        }
        if let Some(value) = save_policy {
            config.set_save_policy(value, "--save-policy");
        }
        config
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("MEMORY_FILE_PATH") {
            if !value.trim().is_empty() {
                self.storage_path = PathBuf::from(value);
            }
        }
        if let Ok(value) = std::env::var("MEMORY_SAVE_POLICY") {
            self.set_save_policy(&value, "MEMORY_SAVE_POLICY");
        }
    }

    fn set_save_policy(&mut self, value: &str, source: &str) {
        match SavePolicy::from_str(value) {
            Some(policy) => self.save_policy = policy,
            None => warn!(
                "Ignoring unknown save policy '{}' from {}; keeping {}",
                value,
                source,
                self.save_policy.as_str()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MemoryConfig::defaults();
        assert_eq!(config.storage_path, PathBuf::from("memory.json"));
        assert_eq!(config.save_policy, SavePolicy::Lossy);
    }

    #[test]
    fn test_save_policy_parsing() {
        assert_eq!(SavePolicy::from_str("strict"), Some(SavePolicy::Strict));
        assert_eq!(SavePolicy::from_str(" Lossy "), Some(SavePolicy::Lossy));
        assert_eq!(SavePolicy::from_str("sometimes"), None);
    }

    #[test]
    fn test_unknown_policy_keeps_current() {
        let mut config = MemoryConfig::defaults();
        config.set_save_policy("strict", "test");
        config.set_save_policy("bogus", "test");
        assert_eq!(config.save_policy, SavePolicy::Strict);
    }
}
