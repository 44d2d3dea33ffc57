use std::collections::{BTreeMap, HashMap};

use common::{normalize_relpath, parent_path, FileType, Leaf, Track};
use tracing::debug;

/// Looks up the domain track record behind a leaf.
pub trait TrackResolver: Send + Sync {
    fn resolve(&self, leaf: &Leaf) -> Option<Track>;
}

/// Track lookup over a repository snapshot, by absolute path or URL first and
/// by relative path second.
#[derive(Clone, Debug, Default)]
pub struct TrackIndex {
    by_path: HashMap<String, Track>,
    by_relpath: HashMap<String, Track>,
}

impl TrackIndex {
    pub fn new(tracks: &[Track]) -> Self {
        let mut index = Self::default();
        for track in tracks {
            index.insert(track.clone());
        }
        index
    }

    pub fn insert(&mut self, track: Track) {
        if let Some(rel) = track.relative_path.as_deref() {
            let rel = normalize_relpath(rel);
            if !rel.is_empty() {
                self.by_relpath.entry(rel).or_insert_with(|| track.clone());
            }
        }
        let path = track.path.trim().to_string();
        if !path.is_empty() {
            self.by_path.entry(path).or_insert(track);
        }
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty() && self.by_relpath.is_empty()
    }
}

impl TrackResolver for TrackIndex {
    fn resolve(&self, leaf: &Leaf) -> Option<Track> {
        self.by_path
            .get(leaf.absolute_path.trim())
            .or_else(|| self.by_relpath.get(&leaf.relative_path))
            .cloned()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub children: BTreeMap<String, TreeNode>,
    pub leaf: Option<Leaf>,
    pub track: Option<Track>,
}

impl TreeNode {
    fn new(name: &str, path: String) -> Self {
        Self {
            name: name.to_string(),
            path,
            ..Self::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_file(&self) -> bool {
        self.children.is_empty() && self.leaf.is_some()
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.leaf.as_ref().map(|leaf| leaf.file_type)
    }

    /// Playable means video, or audio backed by a track.
    pub fn is_playable(&self) -> bool {
        match self.file_type() {
            Some(FileType::Video) => self.is_file(),
            Some(FileType::Audio) => self.is_file() && self.track.is_some(),
            _ => false,
        }
    }
}

/// A published tree plus the full leaf list it was built from. Subtitle leaves
/// only live in `leaves`; they never become nodes.
#[derive(Clone, Debug, Default)]
pub struct AlbumTree {
    pub root: TreeNode,
    pub leaves: Vec<Leaf>,
}

impl AlbumTree {
    /// Node at `folder_path`; blank resolves to the root.
    pub fn find_node(&self, folder_path: &str) -> Option<&TreeNode> {
        let normalized = normalize_relpath(folder_path);
        let mut current = &self.root;
        for segment in normalized.split('/').filter(|s| !s.is_empty()) {
            current = current.children.get(segment)?;
        }
        Some(current)
    }

    /// Playable files sharing a folder with `entry_path`, sorted by name
    /// ignoring case. Falls back to the root when the folder is unknown.
    pub fn siblings_of(&self, entry_path: &str) -> Vec<&TreeNode> {
        let normalized = normalize_relpath(entry_path);
        let folder = self
            .find_node(parent_path(&normalized))
            .unwrap_or(&self.root);
        let mut out: Vec<&TreeNode> = folder
            .children
            .values()
            .filter(|node| node.is_playable())
            .collect();
        out.sort_by_cached_key(|node| node.name.to_lowercase());
        out
    }

    /// Every file node, depth first.
    pub fn files(&self) -> Vec<&TreeNode> {
        let mut out = Vec::new();
        collect_files(&self.root, &mut out);
        out
    }

    pub fn folder_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_folders(&self.root, &mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.root.children.is_empty()
    }
}

fn collect_files<'a>(node: &'a TreeNode, out: &mut Vec<&'a TreeNode>) {
    for child in node.children.values() {
        if child.is_folder() {
            collect_files(child, out);
        } else if child.is_file() {
            out.push(child);
        }
    }
}

fn collect_folders(node: &TreeNode, out: &mut Vec<String>) {
    for child in node.children.values() {
        if child.is_folder() {
            out.push(child.path.clone());
            collect_folders(child, out);
        }
    }
}

/// Builds the navigable tree. Subtitle and `Other` leaves, and audio leaves
/// with no track record, are left out of the node graph.
pub fn build_tree(leaves: &[Leaf], resolver: &dyn TrackResolver) -> AlbumTree {
    let mut root = TreeNode::default();
    let mut skipped = 0usize;

    for leaf in leaves {
        if matches!(leaf.file_type, FileType::Subtitle | FileType::Other) {
            continue;
        }
        let track = resolver.resolve(leaf);
        if leaf.file_type == FileType::Audio && track.is_none() {
            skipped += 1;
            continue;
        }
        let segments: Vec<&str> = leaf
            .relative_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        let Some((last, folders)) = segments.split_last() else {
            continue;
        };

        let mut current = &mut root;
        for segment in folders {
            let path = child_path(&current.path, segment);
            current = current
                .children
                .entry(segment.to_string())
                .or_insert_with(|| TreeNode::new(segment, path));
        }
        let path = child_path(&current.path, last);
        let node = current
            .children
            .entry(last.to_string())
            .or_insert_with(|| TreeNode::new(last, path));
        node.leaf = Some(leaf.clone());
        node.track = track;
    }

    if skipped > 0 {
        debug!("Left {} audio leaves without a track out of the tree", skipped);
    }

    AlbumTree {
        root,
        leaves: leaves.to_vec(),
    }
}

fn child_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", parent, segment)
    }
}
