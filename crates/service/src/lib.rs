//! Async shell around the album tree core: configuration, the remote catalog
//! client, fetch coordination, and the per-screen tree session.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod session;
pub mod tags;
pub mod trees;
pub mod watch;

pub use catalog::{
    backup_order, normalize_work_code, CatalogClient, CatalogError, HttpCatalogClient,
    SearchResult, SearchTrace, WorkSummary,
};
pub use config::{ConfigError, ServiceConfig};
pub use coordinator::{FetchCoordinator, FetchOutcome, FetchPhase, FetchRequest, FetchState};
pub use session::TreeSession;
pub use tags::TagTrackResolver;
pub use trees::TreeService;
pub use watch::RootWatcher;

use library::LibraryError;

#[derive(Debug)]
pub enum ServiceError {
    Library(LibraryError),
    Join(String),
    Cancelled,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Library(err) => write!(f, "library error: {}", err),
            ServiceError::Join(err) => write!(f, "worker error: {}", err),
            ServiceError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<LibraryError> for ServiceError {
    fn from(err: LibraryError) -> Self {
        match err {
            LibraryError::Cancelled => ServiceError::Cancelled,
            other => ServiceError::Library(other),
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Join(err.to_string())
    }
}
