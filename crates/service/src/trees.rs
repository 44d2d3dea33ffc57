use std::path::Path;
use std::sync::Arc;

use common::{stable_id, Track};
use library::{
    compute_stamp, load_or_build, CacheStore, CancellationToken, LibraryError, RedbCacheStore,
    Sources, TrackResolver, TreeIndex, TreeRequest, TtlLru,
};
use tracing::{debug, info};

use crate::config::{resolve_path, ServiceConfig};
use crate::ServiceError;

type MirrorKey = (i64, String);

#[derive(Clone)]
struct Mirrored {
    tracks: String,
    index: Arc<TreeIndex>,
}

/// Builds trees off the async runtime and keeps the recent ones in memory.
/// A mirrored tree is reused only while its roots still stamp the same and
/// the request carries the same tracks.
#[derive(Clone)]
pub struct TreeService {
    sources: Arc<Sources>,
    cache: Arc<dyn CacheStore>,
    mirror: Arc<TtlLru<MirrorKey, Mirrored>>,
}

impl TreeService {
    pub fn new(sources: Sources, cache: Arc<dyn CacheStore>, config: &ServiceConfig) -> Self {
        Self {
            sources: Arc::new(sources),
            cache,
            mirror: Arc::new(TtlLru::new(
                config.tree_mirror_capacity,
                config.tree_mirror_ttl(),
            )),
        }
    }

    /// Opens the redb cache named by the config, relative to the config file.
    pub fn open(
        config_path: &Path,
        config: &ServiceConfig,
        sources: Sources,
    ) -> Result<Self, ServiceError> {
        let cache_path = resolve_path(config_path, &config.cache_path);
        let cache = RedbCacheStore::open(&cache_path)?;
        info!("Tree cache at {}", cache_path.display());
        Ok(Self::new(sources, Arc::new(cache), config))
    }

    pub fn sources(&self) -> &Sources {
        &self.sources
    }

    pub async fn load(
        &self,
        request: TreeRequest,
        resolver: Arc<dyn TrackResolver>,
        cancel: CancellationToken,
    ) -> Result<Arc<TreeIndex>, ServiceError> {
        let mirror_key = (request.entity_id, request.cache_key());
        let tracks = tracks_fingerprint(&request.tracks);
        let mirrored = self
            .mirror
            .get(&mirror_key)
            .filter(|entry| entry.tracks == tracks)
            .map(|entry| entry.index);
        let sources = self.sources.clone();
        let cache = self.cache.clone();

        let index = tokio::task::spawn_blocking(move || -> Result<Arc<TreeIndex>, LibraryError> {
            if let Some(index) = mirrored {
                if compute_stamp(&request.roots, sources.as_ref()) == index.stamp {
                    debug!("Serving mirrored tree for entity {}", request.entity_id);
                    return Ok(index);
                }
            }
            load_or_build(
                &request,
                sources.as_ref(),
                cache.as_ref(),
                resolver.as_ref(),
                &cancel,
            )
            .map(Arc::new)
        })
        .await??;

        self.mirror.insert(
            mirror_key,
            Mirrored {
                tracks,
                index: index.clone(),
            },
        );
        Ok(index)
    }

    /// Drops every mirrored tree of `entity_id`.
    pub fn invalidate_entity(&self, entity_id: i64) -> usize {
        self.mirror.retain_keys(|(id, _)| *id != entity_id)
    }

    /// Forgets the entity in memory and in the persistent cache.
    pub async fn delete_entity(&self, entity_id: i64) -> Result<usize, ServiceError> {
        self.invalidate_entity(entity_id);
        let cache = self.cache.clone();
        let removed = tokio::task::spawn_blocking(move || cache.delete_entity(entity_id)).await??;
        info!("Removed {} cached trees for entity {}", removed, entity_id);
        Ok(removed)
    }

    pub fn mirrored(&self) -> usize {
        self.mirror.len()
    }
}

fn tracks_fingerprint(tracks: &[Track]) -> String {
    let mut joined = String::new();
    for track in tracks {
        joined.push_str(&track.id.to_string());
        joined.push('\u{1f}');
        joined.push_str(track.path.trim());
        joined.push('\u{1f}');
        joined.push_str(track.group.trim());
        joined.push('\u{1f}');
        joined.push_str(track.title.trim());
        joined.push('\n');
    }
    stable_id(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use library::{MemoryCacheStore, TrackIndex};
    use std::fs;
    use std::time::{Duration, SystemTime};

    fn track(id: i64, path: &str) -> Track {
        Track {
            id,
            title: format!("Track {}", id),
            path: path.to_string(),
            group: String::new(),
            relative_path: None,
            duration_ms: None,
        }
    }

    fn service(cache: Arc<MemoryCacheStore>) -> TreeService {
        TreeService::new(Sources::local_only(), cache, &ServiceConfig::default())
    }

    #[tokio::test]
    async fn mirrors_and_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Main")).unwrap();
        let audio = dir.path().join("Main").join("01.mp3");
        fs::write(&audio, b"x").unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let tracks = vec![track(1, &audio.to_string_lossy())];
        let resolver: Arc<dyn TrackResolver> = Arc::new(TrackIndex::new(&tracks));

        let cache = Arc::new(MemoryCacheStore::new());
        let service = service(cache.clone());
        let request = TreeRequest::new(9, vec![root.clone()], tracks.clone());

        let first = service
            .load(request.clone(), resolver.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.tree.files().len(), 1);
        assert_eq!(service.mirrored(), 1);

        let second = service
            .load(request.clone(), resolver.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(service.invalidate_entity(9), 1);
        let third = service
            .load(request.clone(), resolver.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert!(third.from_cache);

        assert_eq!(service.delete_entity(9).await.unwrap(), 1);
        assert!(cache.is_empty());
        assert_eq!(service.mirrored(), 0);
    }

    #[tokio::test]
    async fn changed_root_mtime_bypasses_the_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("01.mp3");
        fs::write(&audio, b"x").unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let tracks = vec![track(1, &audio.to_string_lossy())];
        let resolver: Arc<dyn TrackResolver> = Arc::new(TrackIndex::new(&tracks));
        let service = service(Arc::new(MemoryCacheStore::new()));
        let request = TreeRequest::new(3, vec![root], tracks);

        let first = service
            .load(request.clone(), resolver.clone(), CancellationToken::new())
            .await
            .unwrap();

        let later = SystemTime::now() + Duration::from_secs(120);
        fs::File::open(dir.path()).unwrap().set_modified(later).unwrap();

        let second = service
            .load(request, resolver, CancellationToken::new())
            .await
            .unwrap();
        assert_ne!(first.stamp, second.stamp);
        assert!(!second.from_cache);
    }

    #[tokio::test]
    async fn cancelled_load_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(Arc::new(MemoryCacheStore::new()));
        let root = dir.path().to_string_lossy().to_string();
        let request = TreeRequest::new(1, vec![root], Vec::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = service
            .load(request, Arc::new(TrackIndex::default()), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = tracks_fingerprint(&[track(1, "/a.mp3")]);
        assert_eq!(a, tracks_fingerprint(&[track(1, "/a.mp3")]));
        assert_ne!(a, tracks_fingerprint(&[track(1, "/b.mp3")]));
    }
}
