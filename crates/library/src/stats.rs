use std::collections::BTreeMap;

use common::{folder_prefixes, parent_path, FileType, Leaf};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FolderStats {
    pub audio_count: u32,
    pub video_count: u32,
    pub has_wav: bool,
    pub has_mp4: bool,
}

/// Media counts per folder, accumulated into every ancestor of each audio or
/// video leaf. Top-level files count towards no folder.
pub fn collect_folder_stats<'a>(
    leaves: impl IntoIterator<Item = &'a Leaf>,
) -> BTreeMap<String, FolderStats> {
    let mut stats: BTreeMap<String, FolderStats> = BTreeMap::new();
    for leaf in leaves {
        if !leaf.file_type.is_media() {
            continue;
        }
        let ext = leaf.ext();
        for folder in folder_prefixes(parent_path(&leaf.relative_path)) {
            let entry = stats.entry(folder).or_default();
            match leaf.file_type {
                FileType::Audio => {
                    entry.audio_count += 1;
                    if ext == "wav" {
                        entry.has_wav = true;
                    }
                }
                FileType::Video => {
                    entry.video_count += 1;
                    if ext == "mp4" {
                        entry.has_mp4 = true;
                    }
                }
                _ => {}
            }
        }
    }
    stats
}

/// Picks the folder most worth expanding by default, if any holds media.
pub fn recommend_expand(stats: &BTreeMap<String, FolderStats>) -> Option<String> {
    let audio = best_folder(stats, |s| s.audio_count, |s| s.has_wav);
    let video = best_folder(stats, |s| s.video_count, |s| s.has_mp4);

    let audio_count = audio.map(|(_, count)| count).unwrap_or(0);
    let video_count = video.map(|(_, count)| count).unwrap_or(0);

    let pick = if video_count > audio_count {
        video
    } else if audio_count > video_count {
        audio
    } else {
        video.or(audio)
    };
    pick.map(|(path, _)| path.to_string())
}

fn best_folder<'a>(
    stats: &'a BTreeMap<String, FolderStats>,
    count: impl Fn(&FolderStats) -> u32,
    flag: impl Fn(&FolderStats) -> bool,
) -> Option<(&'a str, u32)> {
    let entries: Vec<(&str, &FolderStats)> = stats
        .iter()
        .filter(|(_, s)| count(*s) > 0)
        .map(|(path, s)| (path.as_str(), s))
        .collect();
    let max = entries.iter().map(|(_, s)| count(*s)).max()?;
    let threshold = (max * 7 / 10).max(1);

    let mut candidates: Vec<(&str, &FolderStats)> = entries
        .iter()
        .copied()
        .filter(|(_, s)| count(*s) >= threshold)
        .collect();
    if candidates.is_empty() {
        candidates = entries;
    }

    candidates.sort_by(|a, b| {
        depth(b.0)
            .cmp(&depth(a.0))
            .then_with(|| count(b.1).cmp(&count(a.1)))
            .then_with(|| flag(b.1).cmp(&flag(a.1)))
            .then_with(|| a.0.cmp(b.0))
    });
    candidates
        .first()
        .map(|(path, s)| (*path, count(*s)))
}

fn depth(path: &str) -> usize {
    path.bytes().filter(|b| *b == b'/').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(path: &str) -> Leaf {
        Leaf::new(path, format!("/m/{}", path), FileType::Audio)
    }

    fn video(path: &str) -> Leaf {
        Leaf::new(path, format!("/m/{}", path), FileType::Video)
    }

    fn stats(audio_count: u32, video_count: u32, has_wav: bool, has_mp4: bool) -> FolderStats {
        FolderStats {
            audio_count,
            video_count,
            has_wav,
            has_mp4,
        }
    }

    #[test]
    fn counts_every_ancestor_folder() {
        let leaves = vec![
            audio("A/B/01.wav"),
            audio("A/02.mp3"),
            video("A/B/C/clip.mp4"),
            audio("top.mp3"),
            Leaf::new("A/cover.jpg", "/m/A/cover.jpg", FileType::Image),
        ];
        let stats = collect_folder_stats(&leaves);
        assert_eq!(stats.len(), 3);
        assert_eq!(
            stats["A"],
            FolderStats {
                audio_count: 2,
                video_count: 1,
                has_wav: true,
                has_mp4: true,
            }
        );
        assert_eq!(
            stats["A/B"],
            FolderStats {
                audio_count: 1,
                video_count: 1,
                has_wav: true,
                has_mp4: true,
            }
        );
        assert_eq!(
            stats["A/B/C"],
            FolderStats {
                audio_count: 0,
                video_count: 1,
                has_wav: false,
                has_mp4: true,
            }
        );
    }

    #[test]
    fn deeper_folder_wins_then_wav() {
        let mut map = BTreeMap::new();
        map.insert("x/A".to_string(), stats(10, 0, false, false));
        map.insert("x/y/B".to_string(), stats(10, 0, true, false));
        assert_eq!(recommend_expand(&map).as_deref(), Some("x/y/B"));

        let mut map = BTreeMap::new();
        map.insert("x/A".to_string(), stats(10, 0, false, false));
        map.insert("x/B".to_string(), stats(10, 0, true, false));
        assert_eq!(recommend_expand(&map).as_deref(), Some("x/B"));
    }

    #[test]
    fn small_folders_fall_below_the_threshold() {
        let mut map = BTreeMap::new();
        map.insert("Main".to_string(), stats(20, 0, false, false));
        map.insert("Main/Bonus/Extra".to_string(), stats(2, 0, true, false));
        map.insert("Main/Part".to_string(), stats(14, 0, false, false));
        assert_eq!(recommend_expand(&map).as_deref(), Some("Main/Part"));
    }

    #[test]
    fn video_wins_ties_and_larger_counts() {
        let mut map = BTreeMap::new();
        map.insert("Audio".to_string(), stats(3, 0, false, false));
        map.insert("Video".to_string(), stats(0, 3, false, true));
        assert_eq!(recommend_expand(&map).as_deref(), Some("Video"));

        map.insert("Audio/More".to_string(), stats(4, 0, false, false));
        assert_eq!(recommend_expand(&map).as_deref(), Some("Audio/More"));
    }

    #[test]
    fn nothing_to_recommend() {
        assert_eq!(recommend_expand(&BTreeMap::new()), None);
        let mut map = BTreeMap::new();
        map.insert("Empty".to_string(), FolderStats::default());
        assert_eq!(recommend_expand(&map), None);
    }
}
