//! Daemon configuration: defaults < TOML file < command-line flags.

use crate::cli::DaemonOpts;
use crate::protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("no password configured (use --password or set `password` in the config file)")]
    MissingPassword,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub bind: String,
    pub root: PathBuf,
    pub password: Option<String>,
    /// Blacklisted addresses and host names
    pub deny: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            root: PathBuf::from("."),
            password: None,
            deny: Vec::new(),
        }
    }
}

impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("bind", &self.bind)
            .field("root", &self.root)
            .field("password", &self.password.as_ref().map(|_| "REDACTED"))
            .field("deny", &self.deny)
            .finish()
    }
}

impl DaemonConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Resolve the effective configuration for the daemon binary.
    pub fn from_opts(opts: &DaemonOpts) -> Result<Self, ConfigError> {
        let mut config = match &opts.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_flags(opts);
        Ok(config)
    }

    /// Flags win over file values. Deny entries from both are kept.
    pub fn apply_flags(&mut self, opts: &DaemonOpts) {
        if let Some(bind) = &opts.bind {
            self.bind = bind.clone();
        }
        if let Some(root) = &opts.root {
            self.root = root.clone();
        }
        if let Some(password) = &opts.password {
            self.password = Some(password.clone());
        }
        self.deny.extend(opts.deny.iter().cloned());
    }

    pub fn password(&self) -> Result<&str, ConfigError> {
        self.password.as_deref().ok_or(ConfigError::MissingPassword)
    }
}
