//! Unified album tree core: enumerates heterogeneous roots into leaves,
//! caches the expensive scan behind a content stamp, merges online copies,
//! and projects the result into a foldable tree.

pub mod cache;
pub mod flatten;
pub mod index;
pub mod memo;
pub mod merge;
pub mod source;
pub mod stamp;
pub mod stats;
pub mod subtitle;
pub mod tree;

pub use cache::{CacheRecord, CacheStore, MemoryCacheStore, RedbCacheStore};
pub use flatten::{flatten, Row, RowKind};
pub use index::{load_or_build, TreeIndex, TreeRequest};
pub use memo::TtlLru;
pub use merge::{merge_leaves, online_leaves};
pub use source::{
    catalog_entries, collect_leaves, parse_catalog, CatalogNode, Document, DocumentProvider,
    LocalFsSource, RemoteCatalogSource, SourceAdapter, Sources, StorageTreeSource, MIME_TYPE_DIR,
};
pub use stamp::{cache_key, compute_stamp, stamp_from_mtimes, FsMtime, MtimeResolver};
pub use stats::{collect_folder_stats, recommend_expand, FolderStats};
pub use subtitle::{
    match_all, match_folder, pick_subtitle_set, subtitles_for_audio, SubtitleAssociation,
};
pub use tree::{build_tree, AlbumTree, TrackIndex, TrackResolver, TreeNode};

pub use tokio_util::sync::CancellationToken;

use redb::{CommitError, DatabaseError, StorageError, TableError, TransactionError};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Json(serde_json::Error),
    Source { root: String, message: String },
    UnknownRoot(String),
    Cancelled,
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::Source { root, message } => {
                write!(f, "source error for {}: {}", root, message)
            }
            LibraryError::UnknownRoot(root) => write!(f, "no source snapshot for {}", root),
            LibraryError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}
