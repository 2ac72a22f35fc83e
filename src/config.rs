//! Engine configuration, loaded from TOML
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOBS: [&str; 8] = [
    "Markets",
    "Retail",
    "Wealth",
    "Operations",
    "Technology",
    "Risk",
    "Finance",
    "People",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of the sled database.
    pub db_path: PathBuf,
    /// `tracing` filter directive, e.g. `info` or `exchain=debug`.
    pub log_level: String,
    /// Display names of the lines of business; `lobID` indexes this list.
    pub lobs: Vec<String>,
    /// Flush sled after every operation.
    pub flush_on_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("exchain.db"),
            log_level: "info".to_string(),
            lobs: DEFAULT_LOBS.iter().map(|name| name.to_string()).collect(),
            flush_on_write: false,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text).context("invalid engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn lob_count(&self) -> u32 {
        self.lobs.len() as u32
    }

    pub fn lob_name(&self, lob_id: u32) -> Option<&str> {
        self.lobs.get(lob_id as usize).map(String::as_str)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.lobs.is_empty() {
            anyhow::bail!("at least one line of business must be configured");
        }
        if u32::try_from(self.lobs.len()).is_err() {
            anyhow::bail!("too many lines of business");
        }
        Ok(())
    }
}

/// Installs a global fmt subscriber. Later calls are ignored.
pub fn init_logging(config: &EngineConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_eight_lobs() {
        let config = EngineConfig::default();
        assert_eq!(config.lob_count(), 8);
        assert_eq!(config.lob_name(0), Some("Markets"));
        assert_eq!(config.lob_name(8), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            db_path = "/tmp/ledger"
            lobs = ["North", "South"]
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/ledger"));
        assert_eq!(config.lob_count(), 2);
        assert_eq!(config.log_level, "info");
        assert!(!config.flush_on_write);
    }

    #[test]
    fn empty_lob_list_is_rejected() {
        assert!(EngineConfig::from_toml_str("lobs = []").is_err());
    }

    #[test]
    fn logging_can_be_initialised_twice() {
        let config = EngineConfig {
            log_level: "not a [valid] filter".to_string(),
            ..EngineConfig::default()
        };
        init_logging(&config);
        init_logging(&EngineConfig::default());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchain.toml");
        std::fs::write(&path, "log_level = \"debug\"\nflush_on_write = true\n").unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.flush_on_write);
    }
}
