use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use common::{root_kind, RootKind};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::trees::TreeService;

/// Watches the local roots of open entities and drops their mirrored and
/// cached trees once changes settle, so the next load rebuilds.
#[derive(Clone)]
pub struct RootWatcher {
    trees: TreeService,
    debounce: Duration,
    watchers: Arc<Mutex<HashMap<i64, RecommendedWatcher>>>,
}

impl RootWatcher {
    pub fn new(trees: TreeService, debounce: Duration) -> Self {
        Self {
            trees,
            debounce,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// `None` when watching is switched off.
    pub fn configure(config: &ServiceConfig, trees: TreeService) -> Option<Self> {
        if !config.watch_roots {
            info!("Watcher disabled (watch_roots=false)");
            return None;
        }
        Some(Self::new(trees, config.watch_debounce()))
    }

    /// Starts watching the local directories among `roots`, replacing any
    /// previous watch of the entity. Returns how many roots are watched.
    pub fn watch(&self, entity_id: i64, roots: &[String]) -> Result<usize, notify::Error> {
        let dirs = local_dirs(roots);
        if dirs.is_empty() {
            self.unwatch(entity_id);
            return Ok(0);
        }
        let watcher = setup_watcher(self.trees.clone(), entity_id, &dirs, self.debounce)?;
        info!(
            "Watching {} roots of entity {} (debounce {}s)",
            dirs.len(),
            entity_id,
            self.debounce.as_secs()
        );
        self.watchers.lock().insert(entity_id, watcher);
        Ok(dirs.len())
    }

    pub fn unwatch(&self, entity_id: i64) -> bool {
        self.watchers.lock().remove(&entity_id).is_some()
    }

    pub fn watched(&self) -> usize {
        self.watchers.lock().len()
    }
}

fn local_dirs(roots: &[String]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = roots
        .iter()
        .map(|root| root.trim())
        .filter(|root| !root.is_empty() && root_kind(root) == RootKind::LocalFilesystem)
        .map(PathBuf::from)
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    dirs.dedup();
    dirs
}

fn setup_watcher(
    trees: TreeService,
    entity_id: i64,
    dirs: &[PathBuf],
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    for dir in dirs {
        if let Err(err) = watcher.watch(dir, RecursiveMode::Recursive) {
            warn!("Failed to watch {}: {}", dir.display(), err);
        }
    }

    tokio::spawn(async move {
        watch_loop(trees, entity_id, rx, debounce).await;
    });

    Ok(watcher)
}

async fn watch_loop(
    trees: TreeService,
    entity_id: i64,
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => {
                    drop_stale_trees(&trees, entity_id).await;
                    break;
                }
                maybe_event = rx.recv() => {
                    if let Some(event) = maybe_event {
                        if !is_relevant_event(&event) {
                            continue;
                        }
                    } else {
                        return;
                    }
                }
            }
        }
    }
    debug!("Watcher for entity {} stopped", entity_id);
}

/// Changes below a root leave the root's mtime, and so the stamp, untouched.
/// Both the mirror and the persistent records of the entity go.
async fn drop_stale_trees(trees: &TreeService, entity_id: i64) {
    match trees.delete_entity(entity_id).await {
        Ok(removed) => info!(
            "Roots of entity {} changed; dropped {} cached trees",
            entity_id, removed
        ),
        Err(err) => warn!("Failed to drop cached trees of entity {}: {}", entity_id, err),
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}
