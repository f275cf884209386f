//! libSQL database location.

use serde::{Deserialize, Serialize};

fn default_path() -> String {
    ".ripple/ripple.db".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Path to the local database file, or `:memory:`.
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

impl DatabaseConfig {
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_file_backed() {
        let config = DatabaseConfig::default();
        assert_eq!(config.path, ".ripple/ripple.db");
        assert!(!config.is_in_memory());
    }

    #[test]
    fn detects_in_memory() {
        let config = DatabaseConfig {
            path: ":memory:".into(),
        };
        assert!(config.is_in_memory());
    }
}
