use std::path::Path;

use common::{relpath_from, RawEntry};
use walkdir::WalkDir;

use super::SourceAdapter;
use crate::stamp::fs_last_modified;
use crate::LibraryError;

/// Walks a directory on the local filesystem. Symlinks are not followed.
#[derive(Clone, Debug, Default)]
pub struct LocalFsSource {
    max_depth: Option<usize>,
}

impl LocalFsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
        }
    }
}

impl SourceAdapter for LocalFsSource {
    fn enumerate(&self, root: &str) -> Result<Vec<RawEntry>, LibraryError> {
        let root_path = Path::new(root);
        if !root_path.is_dir() {
            return Err(LibraryError::Source {
                root: root.to_string(),
                message: "not a readable directory".to_string(),
            });
        }

        let mut walker = WalkDir::new(root_path).follow_links(false).min_depth(1);
        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut entries = Vec::new();
        for entry in walker.into_iter().filter_map(Result::ok) {
            let path = entry.path();
            let Some(relative_path) = relpath_from(root_path, path) else {
                continue;
            };
            let is_directory = entry.file_type().is_dir();
            let hint = if is_directory {
                None
            } else {
                mime_guess::from_path(path).first_raw().map(str::to_string)
            };
            entries.push(RawEntry {
                relative_path,
                absolute_ref: path.to_string_lossy().to_string(),
                is_directory,
                hint,
            });
        }
        entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(entries)
    }

    fn last_modified(&self, root: &str) -> i64 {
        fs_last_modified(Path::new(root))
    }
}
