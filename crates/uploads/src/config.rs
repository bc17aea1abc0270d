//! Upload manager configuration.
//!
//! Configuration is plain TOML:
//!
//! ```toml
//! working_directory = "~/.local/share/repoload/uploads"
//! chunk_size = 1048576
//! request_timeout_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("chunk_size must be greater than zero")]
    InvalidChunkSize,

    #[error("working_directory must not be empty")]
    MissingWorkingDirectory,
}

/// Settings the upload manager needs; passed explicitly to
/// [`UploadManager::new`](crate::UploadManager::new).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadManagerConfig {
    /// Directory holding one record per open session.
    pub working_directory: PathBuf,

    /// Bytes sent per chunk.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Per-request limit for server calls; `None` waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_chunk_size() -> usize {
    repoload_transfer::DEFAULT_CHUNK_SIZE
}

impl UploadManagerConfig {
    /// Creates a config with the default chunk size and no timeout.
    pub fn new(working_directory: impl Into<PathBuf>) -> Self {
        Self {
            working_directory: working_directory.into(),
            chunk_size: default_chunk_size(),
            request_timeout_secs: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    /// Parses TOML, expands a leading `~/` and validates the result.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.working_directory = expand_home(&config.working_directory, home_dir().as_deref());
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(
            path = %path.display(),
            working_directory = %config.working_directory.display(),
            chunk_size = config.chunk_size,
            "upload configuration loaded"
        );
        Ok(config)
    }

    /// Serializes to TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.working_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingWorkingDirectory);
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Platform default for the working directory.
    pub fn default_working_directory() -> Option<PathBuf> {
        data_dir().map(|d| d.join("repoload").join("uploads"))
    }
}

/// Replaces a leading `~` component with `home`.
fn expand_home(path: &Path, home: Option<&Path>) -> PathBuf {
    let Some(home) = home else {
        return path.to_path_buf();
    };
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok().map(PathBuf::from)
    }
}

/// Returns the platform-specific data directory.
fn data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_DATA_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        home_dir().map(|h| h.join(".local").join("share"))
    }
}
