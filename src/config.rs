// ⚙️ Configuration - zscore.toml plus environment overrides
//
// Example zscore.toml:
//
//   database_path = "/var/lib/zscore/visitors.db"
//   cache_partition = false
//   server_addr = "0.0.0.0:3000"
//
// ZSCORE_DB and ZSCORE_CACHE override the file.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "zscore.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// SQLite database holding the visitors table
    pub database_path: PathBuf,

    /// Hold each brand in memory between the three passes
    pub cache_partition: bool,

    /// Bind address for the REST server
    pub server_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("visitors.db"),
            cache_partition: false,
            server_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse zscore.toml")
    }

    /// Read `path` if it exists, defaults otherwise
    pub fn load_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config = Self::from_toml(&contents)
                    .with_context(|| format!("Invalid config file {}", path.display()))?;
                log::debug!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    /// `zscore.toml` in the working directory, then the process environment
    pub fn load() -> Result<Self> {
        Self::load_file(Path::new(CONFIG_FILE))?.with_env(|key| std::env::var(key).ok())
    }

    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ZSCORE_DB") {
            self.database_path = PathBuf::from(path);
        }

        if let Some(value) = lookup("ZSCORE_CACHE") {
            self.cache_partition = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => bail!("ZSCORE_CACHE must be a boolean, got {:?}", other),
            };
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_file(&dir.path().join(CONFIG_FILE)).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_partition = true").unwrap();
        file.flush().unwrap();

        let config = Config::load_file(file.path()).unwrap();

        assert!(config.cache_partition);
        assert_eq!(config.database_path, PathBuf::from("visitors.db"));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(Config::from_toml("databse_path = \"typo.db\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("ZSCORE_DB", "/tmp/other.db"), ("ZSCORE_CACHE", "Yes")]
            .into_iter()
            .collect();

        let config = Config::default()
            .with_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert!(config.cache_partition);
    }

    #[test]
    fn test_bad_cache_flag() {
        let result = Config::default().with_env(|key| {
            (key == "ZSCORE_CACHE").then(|| "maybe".to_string())
        });

        assert!(result.is_err());
    }
}
