//! Store Configuration

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::StoreError;

/// Default location of the durable host store
pub const DEFAULT_LOCAL_PATH: &str = "./data/local_storage.json";

/// Which backend a store routes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Durable host storage (default)
    #[default]
    Local,
    /// Session-lifetime host storage
    Session,
    /// In-process map owned by the store
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Session => "session",
            Self::Memory => "memory",
        }
    }

    /// Whether the backend is a host-provided string store
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::Memory)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "session" => Ok(Self::Session),
            "memory" => Ok(Self::Memory),
            other => Err(StoreError::UnknownBackend(other.to_string())),
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Backend selected at construction
    pub backend: BackendKind,

    /// File backing the durable store (None = process-wide default)
    pub local_path: Option<PathBuf>,
}

impl StoreConfig {
    /// Read `STASHBOX_BACKEND` and `STASHBOX_LOCAL_PATH`
    pub fn from_env() -> Result<Self, StoreError> {
        let mut config = Self::default();
        if let Ok(kind) = std::env::var("STASHBOX_BACKEND") {
            config.backend = kind.parse()?;
        }
        if let Ok(path) = std::env::var("STASHBOX_LOCAL_PATH") {
            config.local_path = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    /// Resolved durable store location
    pub fn local_path(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_PATH))
    }
}
