use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use common::{join_relpath_str, sanitize_segment, RawEntry};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::SourceAdapter;
use crate::LibraryError;

/// One node of a crawled catalog tree. Providers disagree on field names, so
/// the common spellings are accepted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogNode {
    #[serde(default, alias = "name", alias = "fileName")]
    pub title: Option<String>,
    #[serde(default, alias = "child", alias = "items", alias = "tracks")]
    pub children: Option<Vec<CatalogNode>>,
    #[serde(
        default,
        alias = "mediaDownloadUrl",
        alias = "mediaUrl",
        alias = "downloadUrl",
        alias = "download_url",
        alias = "url"
    )]
    pub media_url: Option<String>,
    #[serde(default, alias = "streamUrl", alias = "mediaStreamUrl")]
    pub stream_url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl CatalogNode {
    pub fn folder(title: &str, children: Vec<CatalogNode>) -> Self {
        Self {
            title: Some(title.to_string()),
            children: Some(children),
            ..Self::default()
        }
    }

    pub fn file(title: &str, url: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            media_url: Some(url.to_string()),
            ..Self::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        self.children.as_ref().map(|c| !c.is_empty()).unwrap_or(false)
    }

    /// Download URL when present, else the stream URL.
    pub fn url(&self) -> Option<&str> {
        [self.media_url.as_deref(), self.stream_url.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|url| !url.is_empty())
    }

    pub fn safe_title(&self) -> String {
        sanitize_segment(self.title.as_deref().unwrap_or_default())
    }
}

pub fn parse_catalog(json: &str) -> Result<Vec<CatalogNode>, LibraryError> {
    Ok(serde_json::from_str(json)?)
}

/// Depth-first flattening of a catalog tree into raw entries.
pub fn catalog_entries(nodes: &[CatalogNode]) -> Vec<RawEntry> {
    let mut out = Vec::new();
    walk(nodes, "", &mut out);
    out
}

fn walk(nodes: &[CatalogNode], parent: &str, out: &mut Vec<RawEntry>) {
    for node in nodes {
        let path = join_relpath_str(parent, &node.safe_title());
        if node.is_folder() {
            out.push(RawEntry {
                relative_path: path.clone(),
                absolute_ref: String::new(),
                is_directory: true,
                hint: None,
            });
            if let Some(children) = node.children.as_deref() {
                walk(children, &path, out);
            }
            continue;
        }
        let Some(url) = node.url() else {
            continue;
        };
        out.push(RawEntry {
            relative_path: path,
            absolute_ref: url.to_string(),
            is_directory: false,
            hint: None,
        });
    }
}

struct Snapshot {
    nodes: Arc<Vec<CatalogNode>>,
    fetched_at: i64,
}

/// Serves catalog trees fetched elsewhere, keyed by root identifier.
#[derive(Clone, Default)]
pub struct RemoteCatalogSource {
    snapshots: Arc<RwLock<HashMap<String, Snapshot>>>,
}

impl RemoteCatalogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, root: &str, nodes: Vec<CatalogNode>) {
        let snapshot = Snapshot {
            nodes: Arc::new(nodes),
            fetched_at: now_ms(),
        };
        self.snapshots.write().insert(root.trim().to_string(), snapshot);
    }

    pub fn remove(&self, root: &str) -> bool {
        self.snapshots.write().remove(root.trim()).is_some()
    }

    pub fn nodes(&self, root: &str) -> Option<Arc<Vec<CatalogNode>>> {
        self.snapshots.read().get(root.trim()).map(|snap| snap.nodes.clone())
    }
}

impl SourceAdapter for RemoteCatalogSource {
    fn enumerate(&self, root: &str) -> Result<Vec<RawEntry>, LibraryError> {
        let nodes = self
            .nodes(root)
            .ok_or_else(|| LibraryError::UnknownRoot(root.to_string()))?;
        Ok(catalog_entries(&nodes))
    }

    fn last_modified(&self, root: &str) -> i64 {
        self.snapshots
            .read()
            .get(root.trim())
            .map(|snap| snap.fetched_at)
            .unwrap_or(0)
    }

    fn is_remote(&self) -> bool {
        true
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|value| value.as_millis() as i64)
        .unwrap_or(0)
}
