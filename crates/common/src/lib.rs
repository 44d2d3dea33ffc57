use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const AUDIO_EXTS: &[&str] = &["mp3", "wav", "flac", "m4a", "ogg", "aac", "opus"];
pub const VIDEO_EXTS: &[&str] = &["mp4", "mkv", "webm"];
pub const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp", "gif"];
pub const SUBTITLE_EXTS: &[&str] = &["lrc", "srt", "vtt"];
pub const TEXT_EXTS: &[&str] = &["txt", "md", "nfo"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Audio,
    Video,
    Image,
    Subtitle,
    Text,
    Pdf,
    Other,
}

impl FileType {
    pub fn is_media(self) -> bool {
        matches!(self, FileType::Audio | FileType::Video)
    }
}

/// A terminal file entry of a source tree. `relative_path` is its identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    pub relative_path: String,
    pub absolute_path: String,
    pub file_type: FileType,
}

impl Leaf {
    pub fn new(
        relative_path: impl Into<String>,
        absolute_path: impl Into<String>,
        file_type: FileType,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            absolute_path: absolute_path.into(),
            file_type,
        }
    }

    pub fn name(&self) -> &str {
        file_name(&self.relative_path)
    }

    pub fn ext(&self) -> String {
        ext_of(self.name())
    }

    pub fn is_online(&self) -> bool {
        is_url(&self.absolute_path)
    }
}

/// What a source adapter yields before classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub relative_path: String,
    pub absolute_ref: String,
    pub is_directory: bool,
    pub hint: Option<String>,
}

/// A domain track record as supplied by the track repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub title: String,
    /// Filesystem path, storage-tree URI, or streaming URL.
    pub path: String,
    /// Slash separated folder the track belongs to, used for online tracks.
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub relative_path: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootKind {
    LocalFilesystem,
    StorageTree,
    RemoteCatalog,
}

pub const STORAGE_TREE_SCHEME: &str = "content://";
pub const CATALOG_SCHEME: &str = "catalog:";

pub fn root_kind(root: &str) -> RootKind {
    let root = root.trim();
    if starts_with_ignore_case(root, STORAGE_TREE_SCHEME) {
        RootKind::StorageTree
    } else if is_url(root) || starts_with_ignore_case(root, CATALOG_SCHEME) {
        RootKind::RemoteCatalog
    } else {
        RootKind::LocalFilesystem
    }
}

pub fn is_url(value: &str) -> bool {
    let value = value.trim();
    starts_with_ignore_case(value, "http://") || starts_with_ignore_case(value, "https://")
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value.len() >= prefix.len()
        && value.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

pub fn file_type_for_ext(ext: &str) -> FileType {
    let ext = ext.to_ascii_lowercase();
    let ext = ext.as_str();
    if AUDIO_EXTS.contains(&ext) {
        FileType::Audio
    } else if VIDEO_EXTS.contains(&ext) {
        FileType::Video
    } else if IMAGE_EXTS.contains(&ext) {
        FileType::Image
    } else if SUBTITLE_EXTS.contains(&ext) {
        FileType::Subtitle
    } else if TEXT_EXTS.contains(&ext) {
        FileType::Text
    } else if ext == "pdf" {
        FileType::Pdf
    } else {
        FileType::Other
    }
}

pub fn file_type_for_name(name: &str) -> FileType {
    file_type_for_ext(&ext_of(name))
}

/// Classifies a leaf from its name, falling back to the last segment of its
/// URL. Remote leaves with a playable URL and no recognised extension at all
/// are treated as audio.
pub fn classify(relative_path: &str, url: Option<&str>, remote: bool) -> FileType {
    let from_name = file_type_for_name(file_name(relative_path));
    if from_name != FileType::Other {
        return from_name;
    }
    let url = url.map(str::trim).filter(|value| !value.is_empty());
    if let Some(url) = url {
        let from_url = file_type_for_name(url_file_name(url));
        if from_url != FileType::Other {
            return from_url;
        }
        if remote {
            return FileType::Audio;
        }
    }
    FileType::Other
}

/// Lowercased text after the last `.`, empty when there is none.
pub fn ext_of(name: &str) -> String {
    match name.rfind('.') {
        Some(idx) => name[idx + 1..].to_ascii_lowercase(),
        None => String::new(),
    }
}

pub fn strip_ext(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Last path segment of a URL with query and fragment removed.
pub fn url_file_name(url: &str) -> &str {
    let url = url.split('#').next().unwrap_or(url);
    let url = url.split('?').next().unwrap_or(url);
    let tail = url.rsplit('/').next().unwrap_or(url);
    tail.rsplit('\\').next().unwrap_or(tail)
}

pub fn file_name(relpath: &str) -> &str {
    relpath.rsplit('/').next().unwrap_or(relpath)
}

/// Folder part of a relative path; empty for top level entries.
pub fn parent_path(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(idx) => &relpath[..idx],
        None => "",
    }
}

pub fn normalize_relpath(raw: &str) -> String {
    raw.replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every ancestor folder path of `folder`, shallowest first, `folder` included.
pub fn folder_prefixes(folder: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for part in folder.split('/').filter(|part| !part.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(part);
        out.push(current.clone());
    }
    out
}

pub fn sanitize_segment(name: &str) -> String {
    let trimmed = name.trim();
    let trimmed = if trimmed.is_empty() { "item" } else { trimmed };
    trimmed
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

/// Stable 63-bit entity id for ad hoc roots that have no repository id.
pub fn stable_entity_id(input: &str) -> i64 {
    let hash = blake3::hash(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    (u64::from_le_bytes(bytes) >> 1) as i64
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = path_to_slash_string(rel);
    if rel.is_empty() {
        None
    } else {
        Some(rel)
    }
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

/// Joins a slash path prefix and a segment; an empty prefix yields the segment.
pub fn join_relpath_str(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}/{}", prefix, segment)
    }
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
