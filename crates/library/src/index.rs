use std::collections::{BTreeMap, HashSet};

use common::{Leaf, Track};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{CacheRecord, CacheStore};
use crate::merge::{merge_leaves, online_leaves};
use crate::source::{collect_leaves, Sources};
use crate::stamp::{cache_key, compute_stamp};
use crate::stats::{collect_folder_stats, recommend_expand, FolderStats};
use crate::subtitle::{match_all, SubtitleAssociation};
use crate::tree::{build_tree, AlbumTree, TrackResolver};
use crate::LibraryError;

/// What to build: one entity, its roots, and the tracks the repository knows.
#[derive(Clone, Debug, Default)]
pub struct TreeRequest {
    pub entity_id: i64,
    pub roots: Vec<String>,
    pub tracks: Vec<Track>,
}

impl TreeRequest {
    pub fn new(entity_id: i64, roots: Vec<String>, tracks: Vec<Track>) -> Self {
        Self {
            entity_id,
            roots,
            tracks,
        }
    }

    pub fn cache_key(&self) -> String {
        cache_key(&self.roots)
    }
}

/// A published tree with everything derived from it.
#[derive(Clone, Debug)]
pub struct TreeIndex {
    pub entity_id: i64,
    pub cache_key: String,
    pub stamp: u64,
    pub tree: AlbumTree,
    pub folder_stats: BTreeMap<String, FolderStats>,
    pub subtitles: BTreeMap<String, Vec<SubtitleAssociation>>,
    pub from_cache: bool,
}

impl TreeIndex {
    pub fn recommended_expand(&self) -> Option<String> {
        recommend_expand(&self.folder_stats)
    }

    pub fn subtitles_for(&self, audio_relative_path: &str) -> &[SubtitleAssociation] {
        self.subtitles
            .get(audio_relative_path)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Read-through build: trusts the cached scan when key and stamp still match,
/// otherwise enumerates the roots and replaces the record.
pub fn load_or_build(
    request: &TreeRequest,
    sources: &Sources,
    cache: &dyn CacheStore,
    resolver: &dyn TrackResolver,
    cancel: &CancellationToken,
) -> Result<TreeIndex, LibraryError> {
    let key = request.cache_key();
    let stamp = compute_stamp(&request.roots, sources);
    let online = online_leaves(&request.tracks);

    match cache.get(request.entity_id, &key) {
        Ok(Some(record)) if record.is_fresh(&key, stamp) && !record.payload.is_empty() => {
            let merged = merge_leaves(&record.payload, &online);
            if !merged.is_empty() {
                debug!(
                    "Tree cache hit for entity {} ({} leaves)",
                    request.entity_id,
                    merged.len()
                );
                return Ok(finish(request.entity_id, key, stamp, merged, resolver, true));
            }
        }
        Ok(_) => {}
        Err(err) => {
            warn!(
                "Tree cache read failed for entity {}: {}",
                request.entity_id, err
            );
        }
    }

    if cancel.is_cancelled() {
        return Err(LibraryError::Cancelled);
    }
    let scanned = collect_leaves(sources, &request.roots, cancel)?;
    let merged = merge_leaves(&scanned, &online);
    if cancel.is_cancelled() {
        return Err(LibraryError::Cancelled);
    }

    let record = CacheRecord::new(request.entity_id, &key, stamp, merged.clone());
    if let Err(err) = cache.put(&record) {
        warn!(
            "Tree cache write failed for entity {}: {}",
            request.entity_id, err
        );
    }
    info!(
        "Built tree for entity {} from {} roots ({} leaves)",
        request.entity_id,
        request.roots.len(),
        merged.len()
    );
    Ok(finish(request.entity_id, key, stamp, merged, resolver, false))
}

fn finish(
    entity_id: i64,
    cache_key: String,
    stamp: u64,
    leaves: Vec<Leaf>,
    resolver: &dyn TrackResolver,
    from_cache: bool,
) -> TreeIndex {
    let tree = build_tree(&leaves, resolver);
    let published: Vec<&Leaf> = tree
        .files()
        .into_iter()
        .filter_map(|node| node.leaf.as_ref())
        .collect();
    let folder_stats = collect_folder_stats(published.iter().copied());
    let in_tree: HashSet<&str> = published
        .iter()
        .map(|leaf| leaf.relative_path.as_str())
        .collect();
    let mut subtitles = match_all(&tree.leaves);
    subtitles.retain(|audio, _| in_tree.contains(audio.as_str()));

    TreeIndex {
        entity_id,
        cache_key,
        stamp,
        tree,
        folder_stats,
        subtitles,
        from_cache,
    }
}
