use std::collections::{HashMap, HashSet};

use common::{is_url, sanitize_segment, FileType, Leaf, Track, VIDEO_EXTS};

/// Leaves for the online tracks of an entity. Tracks whose path is not an
/// http(s) URL are ignored.
pub fn online_leaves(tracks: &[Track]) -> Vec<Leaf> {
    tracks
        .iter()
        .filter_map(|track| {
            let url = track.path.trim();
            if !is_url(url) {
                return None;
            }
            let ext = guess_ext_from_url(url);
            let file_type = if VIDEO_EXTS.contains(&ext.as_str()) {
                FileType::Video
            } else {
                FileType::Audio
            };

            let group = track
                .group
                .split('/')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(sanitize_segment)
                .collect::<Vec<_>>()
                .join("/");
            let title = if track.title.trim().is_empty() {
                "track"
            } else {
                track.title.as_str()
            };
            let base = sanitize_segment(title);
            let suffix = format!(".{}", ext);
            let name = if !ext.is_empty()
                && !base.to_ascii_lowercase().ends_with(&suffix)
            {
                format!("{}{}", base, suffix)
            } else {
                base
            };
            let relative_path = if group.is_empty() {
                name
            } else {
                format!("{}/{}", group, name)
            };
            Some(Leaf::new(relative_path, url, file_type))
        })
        .collect()
}

/// Lowercased extension of a URL path; empty when missing, longer than six
/// characters, or spanning a path separator.
pub fn guess_ext_from_url(url: &str) -> String {
    let path = url.split('?').next().unwrap_or(url).trim();
    let Some(idx) = path.rfind('.') else {
        return String::new();
    };
    let ext = path[idx + 1..].to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 6 || ext.contains('/') || ext.contains('\\') {
        return String::new();
    }
    ext
}

/// Reconciles cached or scanned leaves with the currently known online leaves.
///
/// Local URL leaves that are no longer online are dropped. A local file entry
/// beats an online duplicate; a stale URL entry is replaced by the fresh one.
pub fn merge_leaves(local: &[Leaf], online: &[Leaf]) -> Vec<Leaf> {
    let online_urls: HashSet<&str> = online
        .iter()
        .map(|leaf| leaf.absolute_path.trim())
        .filter(|url| !url.is_empty())
        .collect();

    let mut merged: Vec<Leaf> = Vec::with_capacity(local.len() + online.len());
    let mut by_path: HashMap<String, usize> = HashMap::new();

    for leaf in local {
        let abs = leaf.absolute_path.trim();
        if is_url(abs) && !online_urls.contains(abs) {
            continue;
        }
        if by_path.contains_key(&leaf.relative_path) {
            continue;
        }
        by_path.insert(leaf.relative_path.clone(), merged.len());
        merged.push(leaf.clone());
    }

    for leaf in online {
        match by_path.get(&leaf.relative_path) {
            None => {
                by_path.insert(leaf.relative_path.clone(), merged.len());
                merged.push(leaf.clone());
            }
            Some(&idx) => {
                if is_url(&merged[idx].absolute_path) {
                    merged[idx] = leaf.clone();
                }
            }
        }
    }

    merged
}
