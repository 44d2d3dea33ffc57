use std::collections::BTreeMap;

use common::{ext_of, parent_path, strip_ext, url_file_name, FileType, Leaf, AUDIO_EXTS};

const LANGUAGE_PREFERENCE: &[&str] = &["default", "zh", "cn", "chs", "ja", "jp", "jpn"];
const DEFAULT_LANGUAGE: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubtitleAssociation {
    pub audio_relative_path: String,
    pub subtitle_url: String,
    pub language: String,
    pub ext: String,
}

impl SubtitleAssociation {
    pub fn rank(&self) -> usize {
        language_rank(&self.language)
    }
}

pub fn language_rank(language: &str) -> usize {
    let language = language.to_ascii_lowercase();
    LANGUAGE_PREFERENCE
        .iter()
        .position(|candidate| *candidate == language)
        .unwrap_or(usize::MAX)
}

/// A subtitle name split into the part that must match an audio file and
/// its language tag.
struct SubtitleName<'a> {
    base: &'a str,
    language: &'a str,
}

fn parse_subtitle_name(name: &str) -> SubtitleName<'_> {
    let stem = strip_ext(name);
    if let Some(idx) = stem.rfind('.') {
        let tag = &stem[idx + 1..];
        if idx > 0 && is_language_tag(tag) {
            return SubtitleName {
                base: &stem[..idx],
                language: tag,
            };
        }
    }
    SubtitleName {
        base: stem,
        language: DEFAULT_LANGUAGE,
    }
}

fn is_language_tag(tag: &str) -> bool {
    (2..=4).contains(&tag.len())
        && tag.bytes().all(|b| b.is_ascii_lowercase())
        && !AUDIO_EXTS.contains(&tag)
}

/// Subtitles among `siblings` that belong to `audio`, best language first.
///
/// `01.srt`, `01.zh.srt` and `01.mp3.lrc` all match `01.mp3`.
pub fn subtitles_for_audio(audio: &Leaf, siblings: &[Leaf]) -> Vec<SubtitleAssociation> {
    let audio_name = audio.name();
    let audio_base = strip_ext(audio_name);
    if audio_base.is_empty() {
        return Vec::new();
    }

    let mut out: Vec<SubtitleAssociation> = siblings
        .iter()
        .filter(|leaf| leaf.file_type == FileType::Subtitle)
        .filter_map(|sub| {
            let stem = strip_ext(sub.name());
            let parsed = parse_subtitle_name(sub.name());
            let language = if stem == audio_base {
                DEFAULT_LANGUAGE
            } else if parsed.base == audio_base || parsed.base == audio_name {
                parsed.language
            } else {
                return None;
            };
            Some(SubtitleAssociation {
                audio_relative_path: audio.relative_path.clone(),
                subtitle_url: sub.absolute_path.clone(),
                language: language.to_string(),
                ext: ext_of(sub.name()),
            })
        })
        .collect();
    sort_associations(&mut out);
    out
}

/// Matches every audio leaf of one folder against the folder's subtitles.
pub fn match_folder(leaves: &[Leaf]) -> BTreeMap<String, Vec<SubtitleAssociation>> {
    let mut out = BTreeMap::new();
    for audio in leaves.iter().filter(|leaf| leaf.file_type == FileType::Audio) {
        let matches = subtitles_for_audio(audio, leaves);
        if !matches.is_empty() {
            out.insert(audio.relative_path.clone(), matches);
        }
    }
    out
}

/// Groups leaves by folder and matches each group.
pub fn match_all(leaves: &[Leaf]) -> BTreeMap<String, Vec<SubtitleAssociation>> {
    let mut folders: BTreeMap<&str, Vec<Leaf>> = BTreeMap::new();
    for leaf in leaves {
        if matches!(leaf.file_type, FileType::Audio | FileType::Subtitle) {
            folders
                .entry(parent_path(&leaf.relative_path))
                .or_default()
                .push(leaf.clone());
        }
    }
    let mut out = BTreeMap::new();
    for group in folders.values() {
        out.extend(match_folder(group));
    }
    out
}

/// Chooses one of several independently fetched subtitle sets for the same
/// audio: the only non-empty one, else the one whose best language ranks
/// highest, tie-broken by that entry's file name.
pub fn pick_subtitle_set(sets: Vec<Vec<SubtitleAssociation>>) -> Vec<SubtitleAssociation> {
    let mut non_empty: Vec<Vec<SubtitleAssociation>> =
        sets.into_iter().filter(|set| !set.is_empty()).collect();
    if non_empty.len() <= 1 {
        return non_empty.pop().unwrap_or_default();
    }
    non_empty
        .into_iter()
        .min_by(|a, b| set_key(a).cmp(&set_key(b)))
        .unwrap_or_default()
}

fn set_key(set: &[SubtitleAssociation]) -> (usize, String) {
    set.iter()
        .map(|assoc| (assoc.rank(), url_file_name(&assoc.subtitle_url).to_string()))
        .min()
        .unwrap_or((usize::MAX, String::new()))
}

fn sort_associations(list: &mut [SubtitleAssociation]) {
    list.sort_by(|a, b| {
        a.rank()
            .cmp(&b.rank())
            .then_with(|| a.subtitle_url.cmp(&b.subtitle_url))
    });
}
