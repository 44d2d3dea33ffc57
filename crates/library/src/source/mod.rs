//! Source adapters turn one root into a flat list of raw entries.
//!
//! Each adapter walks its own backing store; [`collect_leaves`] runs them over
//! a whole root set, classifies the entries, and keeps going when a single
//! root fails.

mod local;
mod remote;
mod storage;

pub use local::LocalFsSource;
pub use remote::{catalog_entries, parse_catalog, CatalogNode, RemoteCatalogSource};
pub use storage::{Document, DocumentProvider, StorageTreeSource, MIME_TYPE_DIR};

use std::collections::HashSet;

use common::{
    classify, file_type_for_ext, is_url, normalize_relpath, root_kind, FileType, Leaf, RawEntry,
    RootKind,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stamp::{normalized_roots, MtimeResolver};
use crate::LibraryError;

pub trait SourceAdapter: Send + Sync {
    /// Enumerates every entry under `root`. Bad entries are skipped; an error
    /// means the root itself could not be read.
    fn enumerate(&self, root: &str) -> Result<Vec<RawEntry>, LibraryError>;

    /// Last-modified time of the root in epoch milliseconds, 0 when unknown.
    fn last_modified(&self, _root: &str) -> i64 {
        0
    }

    /// Remote leaves get the permissive audio default during classification.
    fn is_remote(&self) -> bool {
        false
    }
}

/// The adapter set used for one build, dispatched by root kind.
pub struct Sources {
    pub local: Box<dyn SourceAdapter>,
    pub storage: Option<Box<dyn SourceAdapter>>,
    pub remote: Option<Box<dyn SourceAdapter>>,
}

impl Sources {
    pub fn local_only() -> Self {
        Self {
            local: Box::new(LocalFsSource::new()),
            storage: None,
            remote: None,
        }
    }

    pub fn with_storage(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.storage = Some(Box::new(adapter));
        self
    }

    pub fn with_remote(mut self, adapter: impl SourceAdapter + 'static) -> Self {
        self.remote = Some(Box::new(adapter));
        self
    }

    pub fn adapter_for(&self, root: &str) -> Option<&dyn SourceAdapter> {
        match root_kind(root) {
            RootKind::LocalFilesystem => Some(self.local.as_ref()),
            RootKind::StorageTree => self.storage.as_deref(),
            RootKind::RemoteCatalog => self.remote.as_deref(),
        }
    }
}

impl MtimeResolver for Sources {
    fn last_modified(&self, root: &str) -> i64 {
        self.adapter_for(root)
            .map(|adapter| adapter.last_modified(root))
            .unwrap_or(0)
    }
}

/// Enumerates every root and returns the classified, relative-path-unique
/// leaves. `Other` entries are dropped here; subtitles are kept for matching.
pub fn collect_leaves(
    sources: &Sources,
    roots: &[String],
    cancel: &CancellationToken,
) -> Result<Vec<Leaf>, LibraryError> {
    let mut seen = HashSet::new();
    let mut leaves = Vec::new();

    for root in normalized_roots(roots) {
        if cancel.is_cancelled() {
            return Err(LibraryError::Cancelled);
        }
        let adapter = match sources.adapter_for(&root) {
            Some(adapter) => adapter,
            None => {
                warn!("No source adapter for {}; skipping", root);
                continue;
            }
        };
        let entries = match adapter.enumerate(&root) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("Failed to enumerate {}: {}", root, err);
                continue;
            }
        };
        let remote = adapter.is_remote();
        let mut added = 0usize;
        for entry in entries {
            let Some(leaf) = leaf_from_entry(entry, remote) else {
                continue;
            };
            if !seen.insert(leaf.relative_path.clone()) {
                debug!("Duplicate relative path {} from {}", leaf.relative_path, root);
                continue;
            }
            leaves.push(leaf);
            added += 1;
        }
        debug!("Enumerated {} leaves from {}", added, root);
    }

    Ok(leaves)
}

pub fn leaf_from_entry(entry: RawEntry, remote: bool) -> Option<Leaf> {
    if entry.is_directory {
        return None;
    }
    let relative_path = normalize_relpath(&entry.relative_path);
    if relative_path.is_empty() || entry.absolute_ref.trim().is_empty() {
        return None;
    }
    let url = if remote || is_url(&entry.absolute_ref) {
        Some(entry.absolute_ref.as_str())
    } else {
        None
    };
    let mut file_type = classify(&relative_path, url, remote);
    if file_type == FileType::Other {
        if let Some(hint) = entry.hint.as_deref() {
            file_type = file_type_from_hint(hint);
        }
    }
    if file_type == FileType::Other {
        return None;
    }
    Some(Leaf {
        relative_path,
        absolute_path: entry.absolute_ref,
        file_type,
    })
}

/// A hint is either a bare extension or a MIME type.
fn file_type_from_hint(hint: &str) -> FileType {
    let hint = hint.trim();
    if !hint.contains('/') {
        return file_type_for_ext(hint.trim_start_matches('.'));
    }
    mime_guess::get_mime_extensions_str(hint)
        .into_iter()
        .flatten()
        .map(|ext| file_type_for_ext(ext))
        .find(|file_type| *file_type != FileType::Other)
        .unwrap_or(FileType::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    impl SourceAdapter for Failing {
        fn enumerate(&self, root: &str) -> Result<Vec<RawEntry>, LibraryError> {
            Err(LibraryError::Source {
                root: root.to_string(),
                message: "permission denied".to_string(),
            })
        }
    }

    struct Fixed(Vec<RawEntry>);

    impl SourceAdapter for Fixed {
        fn enumerate(&self, _root: &str) -> Result<Vec<RawEntry>, LibraryError> {
            Ok(self.0.clone())
        }
    }

    fn file(rel: &str, abs: &str) -> RawEntry {
        RawEntry {
            relative_path: rel.to_string(),
            absolute_ref: abs.to_string(),
            is_directory: false,
            hint: None,
        }
    }

    #[test]
    fn failing_root_does_not_abort_siblings() {
        let sources = Sources {
            local: Box::new(Fixed(vec![file("a/01.mp3", "/m/a/01.mp3")])),
            storage: Some(Box::new(Failing)),
            remote: None,
        };
        let roots = vec!["content://tree/x".to_string(), "/m".to_string()];
        let leaves = collect_leaves(&sources, &roots, &CancellationToken::new()).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].relative_path, "a/01.mp3");
    }

    #[test]
    fn drops_directories_and_other_files() {
        let mut dir = file("a", "/m/a");
        dir.is_directory = true;
        let sources = Sources {
            local: Box::new(Fixed(vec![
                dir,
                file("a/archive.zip", "/m/a/archive.zip"),
                file("a/01.lrc", "/m/a/01.lrc"),
                file("a/01.wav", "/m/a/01.wav"),
            ])),
            storage: None,
            remote: None,
        };
        let leaves =
            collect_leaves(&sources, &["/m".to_string()], &CancellationToken::new()).unwrap();
        let types: Vec<FileType> = leaves.iter().map(|leaf| leaf.file_type).collect();
        assert_eq!(types, vec![FileType::Subtitle, FileType::Audio]);
    }

    #[test]
    fn first_root_wins_on_duplicate_paths() {
        let sources = Sources {
            local: Box::new(Fixed(vec![file("01.mp3", "/first/01.mp3")])),
            storage: Some(Box::new(Fixed(vec![file("01.mp3", "content://doc/01.mp3")]))),
            remote: None,
        };
        let roots = vec!["/first".to_string(), "content://tree".to_string()];
        let leaves = collect_leaves(&sources, &roots, &CancellationToken::new()).unwrap();
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].absolute_path, "/first/01.mp3");
    }

    #[test]
    fn cancelled_before_first_root() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = collect_leaves(&Sources::local_only(), &["/m".to_string()], &cancel).unwrap_err();
        assert!(matches!(err, LibraryError::Cancelled));
    }

    #[test]
    fn mime_hint_classifies_extensionless_documents() {
        let mut entry = file("a/track", "content://doc/77");
        entry.hint = Some("audio/mpeg".to_string());
        let leaf = leaf_from_entry(entry, false).unwrap();
        assert_eq!(leaf.file_type, FileType::Audio);

        let mut entry = file("a/blob", "content://doc/78");
        entry.hint = Some("application/octet-stream".to_string());
        assert!(leaf_from_entry(entry, false).is_none());
    }
}
