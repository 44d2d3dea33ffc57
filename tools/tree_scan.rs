use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::Path;

use common::stable_entity_id;
use library::{
    flatten, load_or_build, parse_catalog, CancellationToken, LocalFsSource, RedbCacheStore,
    RemoteCatalogSource, RowKind, Sources, TreeRequest,
};
use service::TagTrackResolver;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CATALOG_ROOT: &str = "catalog:local";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut roots: Vec<String> = env::args().skip(1).collect();
    if roots.is_empty() {
        roots.extend(env::var("TREE_ROOTS").ok().into_iter().flat_map(|value| {
            value
                .split(';')
                .map(str::to_string)
                .collect::<Vec<_>>()
        }));
    }
    if roots.iter().all(|root| root.trim().is_empty()) {
        return Err("no roots given (pass paths or set TREE_ROOTS)".into());
    }
    let cache_path =
        env::var("TREE_CACHE_PATH").unwrap_or_else(|_| "data/tree_cache.redb".to_string());
    if let Some(parent) = Path::new(&cache_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let remote = RemoteCatalogSource::new();
    if let Ok(catalog_path) = env::var("CATALOG_JSON") {
        let nodes = parse_catalog(&fs::read_to_string(&catalog_path)?)?;
        info!("Loaded {} catalog nodes from {}", nodes.len(), catalog_path);
        remote.insert(CATALOG_ROOT, nodes);
        roots.push(CATALOG_ROOT.to_string());
    }
    let sources = Sources {
        local: Box::new(LocalFsSource::new()),
        storage: None,
        remote: Some(Box::new(remote)),
    };

    let cache = RedbCacheStore::open(Path::new(&cache_path))?;
    let request = TreeRequest::new(stable_entity_id(&roots.join("|")), roots, Vec::new());
    let resolver = TagTrackResolver::new();
    let index = load_or_build(&request, &sources, &cache, &resolver, &CancellationToken::new())?;

    let expanded: HashSet<String> = index.tree.folder_paths().into_iter().collect();
    for row in flatten(&index.tree.root, &expanded) {
        let indent = "  ".repeat(row.depth);
        match row.kind {
            RowKind::Folder { .. } => println!("{}{}/", indent, row.name),
            RowKind::File { file_type, .. } => {
                let subs = index.subtitles_for(&row.path).len();
                if subs > 0 {
                    println!("{}{} [{:?}, {} subtitles]", indent, row.title, file_type, subs);
                } else {
                    println!("{}{} [{:?}]", indent, row.title, file_type);
                }
            }
        }
    }

    println!(
        "{} files, {} folders, stamp {:016x}{}",
        index.tree.files().len(),
        index.tree.folder_paths().len(),
        index.stamp,
        if index.from_cache { " (cached)" } else { "" }
    );
    if let Some(folder) = index.recommended_expand() {
        println!("Recommended: {}", folder);
    }

    Ok(())
}
