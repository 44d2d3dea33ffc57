use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

const FNV_OFFSET_BASIS: u64 = 1469598103934665603;
const FNV_PRIME: u64 = 1099511628211;

/// Resolves a root's last-modified time in epoch milliseconds, 0 when unknown.
pub trait MtimeResolver {
    fn last_modified(&self, root: &str) -> i64;
}

/// Plain stat lookup for filesystem roots.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsMtime;

impl MtimeResolver for FsMtime {
    fn last_modified(&self, root: &str) -> i64 {
        fs_last_modified(Path::new(root))
    }
}

pub fn fs_last_modified(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|value| value.as_millis().min(i64::MAX as u128) as i64)
        .unwrap_or(0)
}

/// Trimmed, non-blank, sorted roots.
pub fn normalized_roots(roots: &[String]) -> Vec<String> {
    let mut out: Vec<String> = roots
        .iter()
        .map(|root| root.trim())
        .filter(|root| !root.is_empty())
        .map(str::to_string)
        .collect();
    out.sort();
    out
}

pub fn cache_key(roots: &[String]) -> String {
    normalized_roots(roots).join("|")
}

pub fn compute_stamp(roots: &[String], resolver: &dyn MtimeResolver) -> u64 {
    let items: Vec<(String, i64)> = normalized_roots(roots)
        .into_iter()
        .map(|root| {
            let mtime = resolver.last_modified(&root);
            (root, mtime)
        })
        .collect();
    stamp_from_mtimes(items)
}

/// FNV-1a fold over `(root, mtime)` pairs sorted by root.
pub fn stamp_from_mtimes(mut items: Vec<(String, i64)>) -> u64 {
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items.iter().fold(FNV_OFFSET_BASIS, |acc, (_, mtime)| {
        (acc ^ (*mtime as u64)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Fixed(HashMap<String, i64>);

    impl MtimeResolver for Fixed {
        fn last_modified(&self, root: &str) -> i64 {
            self.0.get(root).copied().unwrap_or(0)
        }
    }

    fn fixed(pairs: &[(&str, i64)]) -> Fixed {
        Fixed(
            pairs
                .iter()
                .map(|(root, mtime)| (root.to_string(), *mtime))
                .collect(),
        )
    }

    #[test]
    fn empty_root_set_is_offset_basis() {
        assert_eq!(compute_stamp(&[], &FsMtime), FNV_OFFSET_BASIS);
        assert_eq!(cache_key(&[" ".to_string()]), "");
    }

    #[test]
    fn single_root_matches_manual_fold() {
        let resolver = fixed(&[("/a", 42)]);
        let expected = (FNV_OFFSET_BASIS ^ 42).wrapping_mul(FNV_PRIME);
        assert_eq!(compute_stamp(&["/a".to_string()], &resolver), expected);
    }

    #[test]
    fn stamp_ignores_root_order() {
        let resolver = fixed(&[("/a", 1), ("/b", 2), ("content://x", 3)]);
        let forward = vec!["/a".to_string(), "/b".to_string(), "content://x".to_string()];
        let backward = vec![
            "content://x".to_string(),
            " /b ".to_string(),
            "/a".to_string(),
        ];
        assert_eq!(
            compute_stamp(&forward, &resolver),
            compute_stamp(&backward, &resolver)
        );
        assert_eq!(cache_key(&forward), cache_key(&backward));
        assert_eq!(cache_key(&forward), "/a|/b|content://x");
    }

    #[test]
    fn stamp_changes_with_mtime() {
        let roots = vec!["/a".to_string(), "/b".to_string()];
        let before = compute_stamp(&roots, &fixed(&[("/a", 1_000), ("/b", 2_000)]));
        let after = compute_stamp(&roots, &fixed(&[("/a", 1_000), ("/b", 2_001)]));
        assert_ne!(before, after);
    }

    #[test]
    fn stamp_changes_with_root_set() {
        let resolver = fixed(&[("/a", 5), ("/b", 5)]);
        let one = compute_stamp(&["/a".to_string()], &resolver);
        let two = compute_stamp(&["/a".to_string(), "/b".to_string()], &resolver);
        assert_ne!(one, two);
    }

    #[test]
    fn touching_a_root_invalidates_the_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let roots = vec![root.clone()];
        let first = compute_stamp(&roots, &FsMtime);
        assert_ne!(FsMtime.last_modified(&root), 0);

        let bumped = fixed(&[(root.as_str(), FsMtime.last_modified(&root) + 1)]);
        assert_ne!(first, compute_stamp(&roots, &bumped));
        assert_eq!(FsMtime.last_modified("/definitely/missing/root"), 0);
    }
}
