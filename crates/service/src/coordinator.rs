use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::CATALOG_SCHEME;
use library::{CatalogNode, RemoteCatalogSource, TtlLru};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::{normalize_work_code, CatalogClient};
use crate::config::ServiceConfig;

const BASE_LANGUAGE: &str = "JPN";

/// Root under which a fetched catalog tree is served to the tree pipeline.
pub fn catalog_root(key: &str) -> String {
    format!("{}{}", CATALOG_SCHEME, key)
}

/// Load the remote tree of `key` into `target`. `editions` maps a language
/// to the key of that language's edition; `base_key` is the base edition's key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub target: String,
    pub key: String,
    pub base_key: String,
    pub editions: HashMap<String, String>,
}

impl FetchRequest {
    pub fn new(target: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_base_key(mut self, base_key: impl Into<String>) -> Self {
        self.base_key = base_key.into();
        self
    }

    pub fn with_edition(mut self, language: impl Into<String>, key: impl Into<String>) -> Self {
        self.editions.insert(language.into(), key.into());
        self
    }

    fn edition_key(&self, language: &str, base_key: &str) -> String {
        if language == BASE_LANGUAGE {
            return base_key.to_string();
        }
        self.editions
            .iter()
            .find(|(lang, _)| lang.trim().eq_ignore_ascii_case(language))
            .map(|(_, key)| key.trim().to_uppercase())
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FetchedTree {
    pub key: String,
    pub work_id: String,
    pub site: Option<u16>,
    pub root: String,
    pub nodes: Vec<CatalogNode>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum FetchPhase {
    #[default]
    Idle,
    Probing,
    FetchingExact,
    FetchingFallback,
    Done(Arc<FetchedTree>),
    Empty,
    Failed(String),
}

impl FetchPhase {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            FetchPhase::Probing | FetchPhase::FetchingExact | FetchPhase::FetchingFallback
        )
    }
}

/// Per-target state. `generation` goes up whenever the target changes hands.
/// `requested_key` is what the caller asked for; `key` is what is being
/// fetched, which differs after a switch to another edition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchState {
    pub generation: u64,
    pub requested_key: String,
    pub key: String,
    pub phase: FetchPhase,
    pub loading: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum FetchOutcome {
    Published(Arc<FetchedTree>),
    Empty,
    Failed(String),
    /// A newer request owns the target; this result was dropped.
    Superseded,
    /// The key is already loading or loaded for this target.
    Skipped,
}

enum Step {
    Finish(FetchPhase),
    SwitchTo(String),
    Stale,
}

struct Inner<C> {
    client: C,
    catalog: RemoteCatalogSource,
    probes: TtlLru<String, Option<bool>>,
    slots: Mutex<HashMap<String, FetchState>>,
    /// Shared by all targets so a reset slot never reuses a live token.
    generations: AtomicU64,
    /// Edition switches already made by the current request of each target.
    fallbacks_taken: Mutex<HashMap<String, HashSet<String>>>,
    probe_timeout: Duration,
    search_timeout: Duration,
    fallback_languages: Vec<String>,
}

impl<C> Inner<C> {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_current(&self, target: &str, token: u64) -> bool {
        self.slots
            .lock()
            .get(target)
            .map(|slot| slot.generation == token)
            .unwrap_or(false)
    }

    /// Records an edition switch for the target's current request. `None`
    /// when `token` is stale, `Some(false)` when the switch was made before.
    fn take_fallback(&self, target: &str, token: u64, transition: String) -> Option<bool> {
        let slots = self.slots.lock();
        if slots.get(target).map(|slot| slot.generation) != Some(token) {
            return None;
        }
        let mut taken = self.fallbacks_taken.lock();
        Some(taken.entry(target.to_string()).or_default().insert(transition))
    }

    fn set_phase(&self, target: &str, token: u64, phase: FetchPhase) -> bool {
        let mut slots = self.slots.lock();
        match slots.get_mut(target) {
            Some(slot) if slot.generation == token => {
                slot.phase = phase;
                true
            }
            _ => false,
        }
    }
}

/// Clears the loading flag if the request future ends without publishing,
/// including when it is dropped mid-flight.
struct LoadingGuard<C> {
    inner: Arc<Inner<C>>,
    target: String,
    token: u64,
}

impl<C> Drop for LoadingGuard<C> {
    fn drop(&mut self) {
        let mut slots = self.inner.slots.lock();
        if let Some(slot) = slots.get_mut(&self.target) {
            if slot.generation == self.token && slot.loading {
                slot.loading = false;
                if slot.phase.is_in_flight() {
                    slot.phase = FetchPhase::Idle;
                }
            }
        }
    }
}

/// Sequences remote tree fetches per target. Results are published only if
/// the generation they started under is still the target's current one.
pub struct FetchCoordinator<C> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for FetchCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: CatalogClient> FetchCoordinator<C> {
    pub fn new(client: C, catalog: RemoteCatalogSource, config: &ServiceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                catalog,
                probes: TtlLru::new(config.probe_cache_capacity, config.probe_cache_ttl()),
                slots: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
                fallbacks_taken: Mutex::new(HashMap::new()),
                probe_timeout: config.probe_timeout(),
                search_timeout: config.search_timeout(),
                fallback_languages: config.fallback_languages.clone(),
            }),
        }
    }

    /// The source fetched trees are published into.
    pub fn catalog(&self) -> &RemoteCatalogSource {
        &self.inner.catalog
    }

    pub fn state(&self, target: &str) -> Option<FetchState> {
        self.inner.slots.lock().get(target.trim()).cloned()
    }

    /// Abandons whatever is in flight for `target`.
    pub fn cancel(&self, target: &str) -> bool {
        let target = target.trim();
        let mut slots = self.inner.slots.lock();
        let Some(slot) = slots.get_mut(target) else {
            return false;
        };
        slot.generation = self.inner.next_generation();
        slot.loading = false;
        if slot.phase.is_in_flight() {
            slot.phase = FetchPhase::Idle;
        }
        self.inner.fallbacks_taken.lock().remove(target);
        true
    }

    /// Forgets `target` entirely, as when its screen goes away. A late
    /// result of an abandoned fetch finds no slot and is dropped.
    pub fn reset(&self, target: &str) -> bool {
        let target = target.trim();
        let mut slots = self.inner.slots.lock();
        self.inner.fallbacks_taken.lock().remove(target);
        slots.remove(target).is_some()
    }

    pub async fn request(&self, request: FetchRequest) -> FetchOutcome {
        let target = request.target.trim().to_string();
        let mut key = request.key.trim().to_uppercase();
        if key.is_empty() {
            return FetchOutcome::Skipped;
        }
        let base_key = request.base_key.trim().to_uppercase();
        let Some(mut token) = self.begin(&target, &key) else {
            debug!("Fetch of {} for {} already handled", key, target);
            return FetchOutcome::Skipped;
        };

        loop {
            let _guard = LoadingGuard {
                inner: self.inner.clone(),
                target: target.clone(),
                token,
            };
            match self.run(&target, &key, &base_key, &request, token).await {
                Step::Finish(phase) => return self.publish(&target, token, phase),
                Step::SwitchTo(next) => match self.switch(&target, token, &next) {
                    Some(next_token) => {
                        token = next_token;
                        key = next;
                    }
                    None => return self.stale(&target, &key),
                },
                Step::Stale => return self.stale(&target, &key),
            }
        }
    }

    fn begin(&self, target: &str, key: &str) -> Option<u64> {
        let mut slots = self.inner.slots.lock();
        let slot = slots.entry(target.to_string()).or_default();
        let handled = slot.loading || matches!(slot.phase, FetchPhase::Done(_) | FetchPhase::Empty);
        if handled && (slot.requested_key == key || slot.key == key) {
            return None;
        }
        slot.generation = self.inner.next_generation();
        slot.requested_key = key.to_string();
        slot.key = key.to_string();
        slot.loading = true;
        slot.phase = FetchPhase::Probing;
        self.inner.fallbacks_taken.lock().remove(target);
        Some(slot.generation)
    }

    fn switch(&self, target: &str, token: u64, next: &str) -> Option<u64> {
        let mut slots = self.inner.slots.lock();
        let slot = slots.get_mut(target)?;
        if slot.generation != token {
            return None;
        }
        slot.generation = self.inner.next_generation();
        slot.key = next.to_string();
        slot.phase = FetchPhase::Probing;
        Some(slot.generation)
    }

    fn publish(&self, target: &str, token: u64, phase: FetchPhase) -> FetchOutcome {
        let mut slots = self.inner.slots.lock();
        let slot = match slots.get_mut(target) {
            Some(slot) if slot.generation == token => slot,
            _ => {
                debug!("Dropping stale fetch result for {}", target);
                return FetchOutcome::Superseded;
            }
        };
        if let FetchPhase::Done(tree) = &phase {
            self.inner.catalog.insert(&tree.root, tree.nodes.clone());
            info!(
                "Loaded catalog tree for {} (work {}, {} top-level nodes)",
                tree.key,
                tree.work_id,
                tree.nodes.len()
            );
        }
        slot.phase = phase.clone();
        slot.loading = false;
        match phase {
            FetchPhase::Done(tree) => FetchOutcome::Published(tree),
            FetchPhase::Failed(message) => FetchOutcome::Failed(message),
            _ => FetchOutcome::Empty,
        }
    }

    fn stale(&self, target: &str, key: &str) -> FetchOutcome {
        debug!("Fetch of {} for {} was superseded", key, target);
        FetchOutcome::Superseded
    }

    async fn run(
        &self,
        target: &str,
        key: &str,
        base_key: &str,
        request: &FetchRequest,
        token: u64,
    ) -> Step {
        let indexed = self.probe(key).await;
        if !self.inner.is_current(target, token) {
            return Step::Stale;
        }

        match indexed {
            Some(false) => {
                if !self.inner.set_phase(target, token, FetchPhase::FetchingFallback) {
                    return Step::Stale;
                }
                self.find_fallback(target, key, base_key, request, token).await
            }
            None => {
                if !self.inner.set_phase(target, token, FetchPhase::FetchingExact) {
                    return Step::Stale;
                }
                let search = tokio::time::timeout(
                    self.inner.search_timeout,
                    self.inner.client.search(key),
                )
                .await;
                if !self.inner.is_current(target, token) {
                    return Step::Stale;
                }
                let Ok(result) = search else {
                    debug!("Catalog search for {} timed out", key);
                    return Step::Finish(FetchPhase::Empty);
                };
                if result.is_confirmed_empty() {
                    debug!("Catalog confirmed {} is not indexed", key);
                    self.inner.probes.insert(key.to_string(), Some(false));
                    return Step::Finish(FetchPhase::Empty);
                }
                match result.exact_match(key) {
                    Some(work) => {
                        self.inner.probes.insert(key.to_string(), Some(true));
                        let work_id = work.id.to_string();
                        let site = result.trace.fallback_site;
                        self.fetch_tracks(target, key, &work_id, site, token).await
                    }
                    None => Step::Finish(FetchPhase::Empty),
                }
            }
            Some(true) => {
                if !self.inner.set_phase(target, token, FetchPhase::FetchingExact) {
                    return Step::Stale;
                }
                let result = self.inner.client.search(key).await;
                if !self.inner.is_current(target, token) {
                    return Step::Stale;
                }
                match result.exact_match(key) {
                    Some(work) => {
                        let work_id = work.id.to_string();
                        let site = result.trace.fallback_site;
                        self.fetch_tracks(target, key, &work_id, site, token).await
                    }
                    None => Step::Finish(FetchPhase::Empty),
                }
            }
        }
    }

    async fn find_fallback(
        &self,
        target: &str,
        key: &str,
        base_key: &str,
        request: &FetchRequest,
        token: u64,
    ) -> Step {
        for language in &self.inner.fallback_languages {
            let candidate = request.edition_key(language, base_key);
            if candidate.is_empty() || candidate == key {
                continue;
            }
            let indexed = self.probe(&candidate).await;
            if !self.inner.is_current(target, token) {
                return Step::Stale;
            }
            if indexed != Some(true) {
                continue;
            }
            let transition = format!("base:{}|cur:{}|to:{}", base_key, key, language);
            let Some(first_time) = self.inner.take_fallback(target, token, transition) else {
                return Step::Stale;
            };
            if !first_time {
                debug!("Fallback {} -> {} already taken once", key, candidate);
                return Step::Finish(FetchPhase::Empty);
            }
            info!(
                "{} is not in the catalog; switching to the {} edition {}",
                key, language, candidate
            );
            return Step::SwitchTo(candidate);
        }
        Step::Finish(FetchPhase::Empty)
    }

    async fn fetch_tracks(
        &self,
        target: &str,
        key: &str,
        work_id: &str,
        site: Option<u16>,
        token: u64,
    ) -> Step {
        let result = self.inner.client.tracks(work_id, site).await;
        if !self.inner.is_current(target, token) {
            return Step::Stale;
        }
        match result {
            Ok(nodes) if nodes.is_empty() => Step::Finish(FetchPhase::Empty),
            Ok(nodes) => Step::Finish(FetchPhase::Done(Arc::new(FetchedTree {
                key: key.to_string(),
                work_id: work_id.to_string(),
                site,
                root: catalog_root(key),
                nodes,
            }))),
            Err(err) => {
                warn!("Failed to load catalog tracks for {}: {}", key, err);
                Step::Finish(FetchPhase::Failed(err.to_string()))
            }
        }
    }

    /// Memoised, time-bounded "is it indexed" check. Keys that are not work
    /// codes cannot be probed and count as ambiguous.
    async fn probe(&self, key: &str) -> Option<bool> {
        if normalize_work_code(key).as_deref() != Some(key) {
            return None;
        }
        let memo_key = key.to_string();
        if let Some(answer) = self.inner.probes.get(&memo_key) {
            return answer;
        }
        let answer = tokio::time::timeout(self.inner.probe_timeout, self.inner.client.probe(key))
            .await
            .unwrap_or(None);
        self.inner.probes.insert(memo_key, answer);
        answer
    }
}
