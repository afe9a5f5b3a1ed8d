use std::{error::Error, fmt, io};

use trainer::TrainerErr;

use crate::session::SessionStatus;

/// Failures of the session registry and its storage.
#[derive(Debug)]
pub enum RegistryErr {
    NotFound(String),
    /// Another session already holds the active slot.
    ActiveSessionExists(String),
    /// The session already completed or failed.
    Finished { id: String, status: SessionStatus },
    Io(io::Error),
    Serde(serde_json::Error),
}

impl fmt::Display for RegistryErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "session {id} not found"),
            Self::ActiveSessionExists(id) => write!(f, "session {id} is already active"),
            Self::Finished { id, status } => write!(f, "session {id} is already {status}"),
            Self::Io(e) => write!(f, "session storage io error: {e}"),
            Self::Serde(e) => write!(f, "session storage format error: {e}"),
        }
    }
}

impl Error for RegistryErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RegistryErr {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for RegistryErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

/// Failures reported by a blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobErr {
    Network(String),
    NotFound(String),
}

impl fmt::Display for BlobErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(detail) => write!(f, "blob store unreachable: {detail}"),
            Self::NotFound(id) => write!(f, "blob {id} not found"),
        }
    }
}

impl Error for BlobErr {}

/// Failures reported by the backend training service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendErr {
    Network(String),
    NotFound(String),
    /// The backend refused the request.
    Rejected(String),
}

impl BackendErr {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl fmt::Display for BackendErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(detail) => write!(f, "backend unreachable: {detail}"),
            Self::NotFound(id) => write!(f, "backend session {id} not found"),
            Self::Rejected(detail) => write!(f, "backend rejected the request: {detail}"),
        }
    }
}

impl Error for BackendErr {}

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorErr {
    Registry(RegistryErr),
    Trainer(TrainerErr),
    Blob(BlobErr),
    Backend(BackendErr),
    /// A local run is already being driven for the given session.
    Busy(String),
    /// The configuration couldn't be loaded.
    InvalidConfig(String),
    Serde(serde_json::Error),
}

impl fmt::Display for OrchestratorErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "{e}"),
            Self::Trainer(e) => write!(f, "{e}"),
            Self::Blob(e) => write!(f, "{e}"),
            Self::Backend(e) => write!(f, "{e}"),
            Self::Busy(id) => write!(f, "session {id} is already training locally"),
            Self::InvalidConfig(detail) => write!(f, "invalid config: {detail}"),
            Self::Serde(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl Error for OrchestratorErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registry(e) => Some(e),
            Self::Trainer(e) => Some(e),
            Self::Blob(e) => Some(e),
            Self::Backend(e) => Some(e),
            Self::Serde(e) => Some(e),
            Self::Busy(_) | Self::InvalidConfig(_) => None,
        }
    }
}

impl From<RegistryErr> for OrchestratorErr {
    fn from(e: RegistryErr) -> Self {
        Self::Registry(e)
    }
}

impl From<TrainerErr> for OrchestratorErr {
    fn from(e: TrainerErr) -> Self {
        Self::Trainer(e)
    }
}

impl From<BlobErr> for OrchestratorErr {
    fn from(e: BlobErr) -> Self {
        Self::Blob(e)
    }
}

impl From<BackendErr> for OrchestratorErr {
    fn from(e: BackendErr) -> Self {
        Self::Backend(e)
    }
}

impl From<serde_json::Error> for OrchestratorErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}
