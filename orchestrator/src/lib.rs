pub mod backend;
pub mod blob;
pub mod config;
pub mod error;
mod orchestrator;
pub mod registry;
pub mod session;
pub mod sync;

pub use backend::{BackendRequest, BackendService, LocalBackend, RemoteState, RemoteStatus};
pub use blob::{BlobReceipt, BlobStore, MemoryBlobStore};
pub use config::{OrchestratorConfig, RetryPolicy};
pub use error::{BackendErr, BlobErr, OrchestratorErr, RegistryErr};
pub use orchestrator::{ModelArtifact, Orchestrator, Result, upload_with_retry};
pub use registry::{JsonFileStore, MemoryStore, SessionRegistry, SessionStore, Snapshot};
pub use session::{
    Completion, HistoryEntry, RegistryStats, SessionStatus, SessionUpdate, TrainingSession,
};
pub use sync::{BackendSync, SyncConfig, SyncOutcome};
