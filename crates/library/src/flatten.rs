use std::collections::HashSet;

use common::{strip_ext, FileType};

use crate::tree::TreeNode;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowKind {
    Folder {
        expanded: bool,
    },
    File {
        file_type: FileType,
        absolute_path: String,
        track_id: Option<i64>,
    },
}

/// One visible line of a flattened tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub path: String,
    pub name: String,
    pub title: String,
    pub depth: usize,
    pub kind: RowKind,
}

impl Row {
    pub fn is_folder(&self) -> bool {
        matches!(self.kind, RowKind::Folder { .. })
    }
}

/// Visible rows for `root` given the expanded folder paths. Folders come
/// before files at every level, each sorted by name ignoring case.
pub fn flatten(root: &TreeNode, expanded: &HashSet<String>) -> Vec<Row> {
    let mut rows = Vec::new();
    push_children(root, expanded, 0, &mut rows);
    rows
}

fn push_children(node: &TreeNode, expanded: &HashSet<String>, depth: usize, rows: &mut Vec<Row>) {
    let mut folders: Vec<&TreeNode> = Vec::new();
    let mut files: Vec<&TreeNode> = Vec::new();
    for child in node.children.values() {
        if child.is_folder() {
            folders.push(child);
        } else if child.is_file() {
            files.push(child);
        }
    }
    sort_by_display_name(&mut folders);
    sort_by_display_name(&mut files);

    for folder in folders {
        let is_expanded = expanded.contains(&folder.path);
        rows.push(Row {
            path: folder.path.clone(),
            name: folder.name.clone(),
            title: folder.name.clone(),
            depth,
            kind: RowKind::Folder {
                expanded: is_expanded,
            },
        });
        if is_expanded {
            push_children(folder, expanded, depth + 1, rows);
        }
    }

    for file in files {
        let Some(leaf) = file.leaf.as_ref() else {
            continue;
        };
        let title = file
            .track
            .as_ref()
            .map(|track| track.title.trim())
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| strip_ext(&file.name))
            .to_string();
        rows.push(Row {
            path: file.path.clone(),
            name: file.name.clone(),
            title,
            depth,
            kind: RowKind::File {
                file_type: leaf.file_type,
                absolute_path: leaf.absolute_path.clone(),
                track_id: file.track.as_ref().map(|track| track.id),
            },
        });
    }
}

fn sort_by_display_name(nodes: &mut [&TreeNode]) {
    nodes.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{build_tree, TrackIndex};
    use common::{Leaf, Track};

    fn tree() -> crate::tree::AlbumTree {
        let leaves = vec![
            Leaf::new("b/02.mp3", "/m/b/02.mp3", FileType::Audio),
            Leaf::new("B2/x.mp4", "/m/B2/x.mp4", FileType::Video),
            Leaf::new("a/Sub/01.mp3", "/m/a/Sub/01.mp3", FileType::Audio),
            Leaf::new("a/readme.txt", "/m/a/readme.txt", FileType::Text),
            Leaf::new("a/01.lrc", "/m/a/01.lrc", FileType::Subtitle),
            Leaf::new("Cover.png", "/m/Cover.png", FileType::Image),
            Leaf::new("archive.bin", "/m/archive.bin", FileType::Other),
        ];
        let tracks = TrackIndex::new(&[
            Track {
                id: 7,
                title: "Second".to_string(),
                path: "/m/b/02.mp3".to_string(),
                group: String::new(),
                relative_path: None,
                duration_ms: None,
            },
            Track {
                id: 8,
                title: "  ".to_string(),
                path: "/m/a/Sub/01.mp3".to_string(),
                group: String::new(),
                relative_path: None,
                duration_ms: None,
            },
        ]);
        build_tree(&leaves, &tracks)
    }

    fn paths(rows: &[Row]) -> Vec<&str> {
        rows.iter().map(|row| row.path.as_str()).collect()
    }

    #[test]
    fn collapsed_tree_shows_top_level_only() {
        let tree = tree();
        let rows = flatten(&tree.root, &HashSet::new());
        assert_eq!(paths(&rows), vec!["a", "b", "B2", "Cover.png"]);
        assert!(rows.iter().take(3).all(Row::is_folder));
        assert_eq!(rows[3].title, "Cover");
    }

    #[test]
    fn expanded_folders_recurse_with_depth() {
        let tree = tree();
        let expanded: HashSet<String> = ["a", "a/Sub", "b"].iter().map(|s| s.to_string()).collect();
        let rows = flatten(&tree.root, &expanded);
        assert_eq!(
            paths(&rows),
            vec!["a", "a/Sub", "a/Sub/01.mp3", "a/readme.txt", "b", "b/02.mp3", "B2", "Cover.png"]
        );
        let second = rows.iter().find(|row| row.path == "b/02.mp3").unwrap();
        assert_eq!(second.title, "Second");
        assert_eq!(second.depth, 1);
        let first = rows.iter().find(|row| row.path == "a/Sub/01.mp3").unwrap();
        assert_eq!(first.title, "01");
        assert_eq!(first.depth, 2);
        assert!(matches!(
            first.kind,
            RowKind::File { track_id: Some(8), .. }
        ));
    }

    #[test]
    fn fully_expanded_rows_cover_every_node_once() {
        let tree = tree();
        let expanded: HashSet<String> = tree.folder_paths().into_iter().collect();
        let rows = flatten(&tree.root, &expanded);
        let folders = rows.iter().filter(|row| row.is_folder()).count();
        let files = rows.len() - folders;
        assert_eq!(folders, tree.folder_paths().len());
        assert_eq!(files, tree.files().len());
        let unique: HashSet<&str> = paths(&rows).into_iter().collect();
        assert_eq!(unique.len(), rows.len());
        assert!(!rows.iter().any(|row| row.path.ends_with(".lrc") || row.path.ends_with(".bin")));

        assert_eq!(rows, flatten(&tree.root, &expanded));
    }
}
