use common::{join_relpath_str, RawEntry};
use tracing::debug;

use super::SourceAdapter;
use crate::LibraryError;

pub const MIME_TYPE_DIR: &str = "vnd.android.document/directory";

/// One child row of a storage-tree listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub display_name: String,
    pub mime_type: String,
}

impl Document {
    pub fn is_directory(&self) -> bool {
        self.mime_type == MIME_TYPE_DIR
    }
}

/// Access to a document tree addressed by opaque ids.
pub trait DocumentProvider: Send + Sync {
    /// Document id the tree URI points at.
    fn root_document_id(&self, tree_uri: &str) -> Result<String, LibraryError>;

    fn list_children(&self, tree_uri: &str, parent_id: &str) -> Result<Vec<Document>, LibraryError>;

    /// Addressable URI of a document inside the tree.
    fn document_uri(&self, tree_uri: &str, document_id: &str) -> String;

    /// Last-modified column of the tree root in epoch milliseconds.
    fn last_modified(&self, tree_uri: &str) -> Option<i64>;
}

/// Walks a document tree through its provider, depth first.
pub struct StorageTreeSource<P> {
    provider: P,
}

impl<P: DocumentProvider> StorageTreeSource<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: DocumentProvider> SourceAdapter for StorageTreeSource<P> {
    fn enumerate(&self, root: &str) -> Result<Vec<RawEntry>, LibraryError> {
        let root_id = self.provider.root_document_id(root)?;
        let top = self.provider.list_children(root, &root_id)?;

        let mut entries = Vec::new();
        let mut stack: Vec<(String, Document)> =
            top.into_iter().rev().map(|doc| (String::new(), doc)).collect();

        while let Some((prefix, doc)) = stack.pop() {
            let name = doc.display_name.trim();
            if name.is_empty() {
                continue;
            }
            let relative_path = join_relpath_str(&prefix, name);
            let uri = self.provider.document_uri(root, &doc.id);
            if doc.is_directory() {
                match self.provider.list_children(root, &doc.id) {
                    Ok(children) => {
                        for child in children.into_iter().rev() {
                            stack.push((relative_path.clone(), child));
                        }
                    }
                    Err(err) => {
                        debug!("Skipping unreadable folder {}: {}", relative_path, err);
                    }
                }
                entries.push(RawEntry {
                    relative_path,
                    absolute_ref: uri,
                    is_directory: true,
                    hint: Some(doc.mime_type),
                });
            } else {
                entries.push(RawEntry {
                    relative_path,
                    absolute_ref: uri,
                    is_directory: false,
                    hint: Some(doc.mime_type),
                });
            }
        }
        Ok(entries)
    }

    fn last_modified(&self, root: &str) -> i64 {
        self.provider.last_modified(root).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeProvider {
        children: HashMap<String, Vec<Document>>,
        broken: Vec<String>,
        mtime: Option<i64>,
    }

    impl FakeProvider {
        fn add(&mut self, parent: &str, id: &str, name: &str, mime: &str) {
            self.children.entry(parent.to_string()).or_default().push(Document {
                id: id.to_string(),
                display_name: name.to_string(),
                mime_type: mime.to_string(),
            });
        }
    }

    impl DocumentProvider for FakeProvider {
        fn root_document_id(&self, tree_uri: &str) -> Result<String, LibraryError> {
            if tree_uri.ends_with("revoked") {
                return Err(LibraryError::Source {
                    root: tree_uri.to_string(),
                    message: "permission revoked".to_string(),
                });
            }
            Ok("root".to_string())
        }

        fn list_children(
            &self,
            tree_uri: &str,
            parent_id: &str,
        ) -> Result<Vec<Document>, LibraryError> {
            if self.broken.iter().any(|id| id == parent_id) {
                return Err(LibraryError::Source {
                    root: tree_uri.to_string(),
                    message: "listing failed".to_string(),
                });
            }
            Ok(self.children.get(parent_id).cloned().unwrap_or_default())
        }

        fn document_uri(&self, tree_uri: &str, document_id: &str) -> String {
            format!("{}/document/{}", tree_uri, document_id)
        }

        fn last_modified(&self, _tree_uri: &str) -> Option<i64> {
            self.mtime
        }
    }

    const TREE: &str = "content://provider/tree/primary%3AASMR";

    #[test]
    fn walks_folders_with_paths_built_from_display_names() {
        let mut provider = FakeProvider::default();
        provider.add("root", "d1", "RJ01", MIME_TYPE_DIR);
        provider.add("root", "f0", "cover.jpg", "image/jpeg");
        provider.add("d1", "f1", "01.mp3", "audio/mpeg");
        provider.add("d1", "f2", "01.lrc", "application/octet-stream");

        let source = StorageTreeSource::new(provider);
        let entries = source.enumerate(TREE).unwrap();
        let paths: Vec<(&str, bool)> = entries
            .iter()
            .map(|entry| (entry.relative_path.as_str(), entry.is_directory))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("RJ01", true),
                ("RJ01/01.mp3", false),
                ("RJ01/01.lrc", false),
                ("cover.jpg", false)
            ]
        );
        assert_eq!(entries[1].absolute_ref, format!("{}/document/f1", TREE));
    }

    #[test]
    fn unreadable_subfolder_is_skipped() {
        let mut provider = FakeProvider::default();
        provider.add("root", "bad", "Locked", MIME_TYPE_DIR);
        provider.add("root", "ok", "Open", MIME_TYPE_DIR);
        provider.add("bad", "x", "hidden.mp3", "audio/mpeg");
        provider.add("ok", "y", "01.wav", "audio/wav");
        provider.broken.push("bad".to_string());

        let entries = StorageTreeSource::new(provider).enumerate(TREE).unwrap();
        assert!(entries.iter().any(|entry| entry.relative_path == "Open/01.wav"));
        assert!(!entries.iter().any(|entry| entry.relative_path.contains("hidden")));
    }

    #[test]
    fn revoked_root_fails_and_mtime_defaults_to_zero() {
        let source = StorageTreeSource::new(FakeProvider::default());
        assert!(source.enumerate("content://provider/tree/revoked").is_err());
        assert_eq!(SourceAdapter::last_modified(&source, TREE), 0);

        let source = StorageTreeSource::new(FakeProvider {
            mtime: Some(1_700_000_000_000),
            ..FakeProvider::default()
        });
        assert_eq!(SourceAdapter::last_modified(&source, TREE), 1_700_000_000_000);
    }
}
