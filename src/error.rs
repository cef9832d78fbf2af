use std::path::PathBuf;

use reqwest::StatusCode;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Everything that can go wrong inside one reconciliation cycle.
///
/// None of these are fatal to the agent; the scheduler logs them and the
/// next cycle starts from whatever state is on disk.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("request to {url} failed: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("download from {url} incomplete: received {received} of {expected} bytes")]
    Truncated {
        url: String,
        received: u64,
        expected: u64,
    },

    #[error("{url} returned status {status}")]
    RemoteStatus { url: String, status: StatusCode },

    #[error("failed to decode manifest from {origin}: {message}")]
    Decode { origin: String, message: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checksum mismatch for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("refusing resource name {name:?}: not a plain file name")]
    InvalidName { name: String },
}

impl SyncError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub fn network(url: &str, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.to_owned(),
            source,
        }
    }

    /// Short, stable label used in event log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Network { .. } | SyncError::Truncated { .. } => "network",
            SyncError::RemoteStatus { .. } => "remote-status",
            SyncError::Decode { .. } => "decode",
            SyncError::Read { .. } => "read",
            SyncError::Write { .. } => "write",
            SyncError::IntegrityMismatch { .. } => "integrity-mismatch",
            SyncError::InvalidName { .. } => "invalid-name",
        }
    }
}

/// Startup configuration problems. These are the only fatal errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to open config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid server URL {url:?}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("invalid poll interval {value:?}: {message}")]
    InvalidInterval { value: String, message: String },

    #[error("invalid policy {value:?}: expected \"gate\" or \"diff\"")]
    InvalidPolicy { value: String },

    #[error("cannot locate executable directory: {0}")]
    ExecutableDir(#[source] std::io::Error),
}
