use std::collections::HashMap;
use std::path::Path;

use common::{root_kind, stable_entity_id, strip_ext, FileType, Leaf, RootKind, Track};
use library::{TrackIndex, TrackResolver};
use metadata::read_tags;
use parking_lot::Mutex;
use tracing::debug;

/// Resolves leaves of ad hoc roots that have no track repository. Known
/// tracks win; local audio is titled from its tags, everything else from
/// its file name.
#[derive(Default)]
pub struct TagTrackResolver {
    known: TrackIndex,
    resolved: Mutex<HashMap<String, Track>>,
}

impl TagTrackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_known(known: TrackIndex) -> Self {
        Self {
            known,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    fn track_for(&self, leaf: &Leaf) -> Track {
        let mut track = Track {
            id: stable_entity_id(&leaf.absolute_path),
            title: strip_ext(leaf.name()).to_string(),
            path: leaf.absolute_path.clone(),
            group: String::new(),
            relative_path: Some(leaf.relative_path.clone()),
            duration_ms: None,
        };
        if leaf.file_type != FileType::Audio
            || root_kind(&leaf.absolute_path) != RootKind::LocalFilesystem
        {
            return track;
        }
        match read_tags(Path::new(&leaf.absolute_path)) {
            Ok(tags) => {
                if let Some(title) = tags.title {
                    track.title = title;
                }
                track.duration_ms = tags.duration_ms;
            }
            Err(err) => debug!("No tags for {}: {}", leaf.absolute_path, err),
        }
        track
    }
}

impl TrackResolver for TagTrackResolver {
    fn resolve(&self, leaf: &Leaf) -> Option<Track> {
        if let Some(track) = self.known.resolve(leaf) {
            return Some(track);
        }
        if !leaf.file_type.is_media() {
            return None;
        }
        if let Some(track) = self.resolved.lock().get(&leaf.absolute_path) {
            return Some(track.clone());
        }
        let track = self.track_for(leaf);
        self.resolved
            .lock()
            .insert(leaf.absolute_path.clone(), track.clone());
        Some(track)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn untagged_audio_is_titled_from_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("01 Opening.mp3");
        fs::write(&path, b"not really audio").unwrap();
        let leaf = Leaf::new("01 Opening.mp3", path.to_string_lossy(), FileType::Audio);

        let resolver = TagTrackResolver::new();
        let track = resolver.resolve(&leaf).unwrap();
        assert_eq!(track.title, "01 Opening");
        assert_eq!(track.relative_path.as_deref(), Some("01 Opening.mp3"));
        assert_eq!(resolver.resolve(&leaf).unwrap().id, track.id);
    }

    #[test]
    fn known_tracks_and_non_media() {
        let known = TrackIndex::new(&[Track {
            id: 7,
            title: "From repository".to_string(),
            path: "https://cdn/x/1.mp3".to_string(),
            group: String::new(),
            relative_path: None,
            duration_ms: Some(1_000),
        }]);
        let resolver = TagTrackResolver::with_known(known);
        let online = Leaf::new("x/1.mp3", "https://cdn/x/1.mp3", FileType::Audio);
        assert_eq!(resolver.resolve(&online).unwrap().id, 7);

        let stream = Leaf::new("x/2.mp3", "https://cdn/x/2.mp3", FileType::Audio);
        assert_eq!(resolver.resolve(&stream).unwrap().title, "2");

        let cover = Leaf::new("cover.jpg", "/m/cover.jpg", FileType::Image);
        assert!(resolver.resolve(&cover).is_none());
    }
}
