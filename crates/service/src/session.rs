use std::collections::HashSet;
use std::sync::Arc;

use common::{folder_prefixes, normalize_relpath};
use library::{flatten, Row, TreeIndex, TreeNode};

/// What one album screen holds: the published tree and which folders are
/// open. The expand recommendation is applied once, on the first publish.
#[derive(Clone, Debug, Default)]
pub struct TreeSession {
    index: Option<Arc<TreeIndex>>,
    expanded: HashSet<String>,
    initialized: bool,
}

impl TreeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> Option<&Arc<TreeIndex>> {
        self.index.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Swaps in a freshly built tree. Returns the recommended folder when
    /// this was the first publish and one was expanded.
    pub fn publish(&mut self, index: Arc<TreeIndex>) -> Option<String> {
        let mut opened = None;
        if !self.initialized {
            if let Some(folder) = index.recommended_expand() {
                self.expanded.extend(folder_prefixes(&folder));
                opened = Some(folder);
            }
            self.initialized = true;
        }
        self.index = Some(index);
        opened
    }

    /// Forgets the tree and the open folders, as for a different album.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_expanded(&self, folder: &str) -> bool {
        self.expanded.contains(&normalize_relpath(folder))
    }

    /// Flips `folder`; returns whether it is now open.
    pub fn toggle(&mut self, folder: &str) -> bool {
        let folder = normalize_relpath(folder);
        if folder.is_empty() {
            return false;
        }
        if self.expanded.remove(&folder) {
            false
        } else {
            self.expanded.insert(folder);
            true
        }
    }

    pub fn expand_all(&mut self) {
        if let Some(index) = &self.index {
            self.expanded.extend(index.tree.folder_paths());
        }
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    pub fn expanded(&self) -> &HashSet<String> {
        &self.expanded
    }

    pub fn rows(&self) -> Vec<Row> {
        match &self.index {
            Some(index) => flatten(&index.tree.root, &self.expanded),
            None => Vec::new(),
        }
    }

    /// Playable files next to `entry_path`, in play order.
    pub fn queue_around(&self, entry_path: &str) -> Vec<TreeNode> {
        match &self.index {
            Some(index) => index
                .tree
                .siblings_of(entry_path)
                .into_iter()
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{FileType, Leaf, Track};
    use library::{build_tree, collect_folder_stats, match_all, TrackIndex};

    fn index(paths: &[&str]) -> Arc<TreeIndex> {
        let leaves: Vec<Leaf> = paths
            .iter()
            .map(|path| Leaf::new(*path, format!("/m/{}", path), common::file_type_for_name(path)))
            .collect();
        let tracks: Vec<Track> = leaves
            .iter()
            .enumerate()
            .map(|(i, leaf)| Track {
                id: i as i64,
                title: String::new(),
                path: leaf.absolute_path.clone(),
                group: String::new(),
                relative_path: None,
                duration_ms: None,
            })
            .collect();
        let tree = build_tree(&leaves, &TrackIndex::new(&tracks));
        let published: Vec<&Leaf> = tree
            .files()
            .into_iter()
            .filter_map(|n| n.leaf.as_ref())
            .collect();
        Arc::new(TreeIndex {
            entity_id: 1,
            cache_key: "/m".to_string(),
            stamp: 1,
            folder_stats: collect_folder_stats(published.iter().copied()),
            subtitles: match_all(&tree.leaves),
            tree,
            from_cache: false,
        })
    }

    fn paths(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|row| row.path.as_str()).collect()
    }

    #[test]
    fn first_publish_opens_the_recommendation_and_its_ancestors() {
        let mut session = TreeSession::new();
        let built = index(&["Work/WAV/01.wav", "Work/WAV/02.wav", "Work/MP3/01.mp3", "cover.jpg"]);
        assert_eq!(session.publish(built.clone()).as_deref(), Some("Work/WAV"));
        assert!(session.is_expanded("Work"));
        assert!(session.is_expanded("Work/WAV/"));
        assert_eq!(
            paths(&session.rows()),
            vec!["Work", "Work/MP3", "Work/WAV", "Work/WAV/01.wav", "Work/WAV/02.wav", "cover.jpg"]
        );

        session.toggle("Work/WAV");
        assert_eq!(session.publish(built), None);
        assert!(!session.is_expanded("Work/WAV"));
    }

    #[test]
    fn toggle_and_bulk_operations() {
        let mut session = TreeSession::new();
        assert!(session.rows().is_empty());
        session.publish(index(&["A/x.mp4", "B/C/y.mp3"]));

        session.collapse_all();
        assert_eq!(paths(&session.rows()), vec!["A", "B"]);
        assert!(session.toggle("B"));
        assert_eq!(paths(&session.rows()), vec!["A", "B", "B/C"]);
        assert!(!session.toggle("B"));
        assert!(!session.toggle(""));

        session.expand_all();
        assert_eq!(session.rows().len(), 5);
        assert_eq!(session.queue_around("B/C/y.mp3").len(), 1);

        session.reset();
        assert!(!session.is_initialized());
        assert!(session.expanded().is_empty());
    }

    #[test]
    fn leaf_types_come_from_names() {
        let built = index(&["a.mp3", "a.lrc"]);
        assert_eq!(built.tree.files().len(), 1);
        assert_eq!(built.tree.leaves[1].file_type, FileType::Subtitle);
    }
}
