use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use library::CatalogNode;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::ServiceConfig;

static WORK_CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"RJ\d{6,}").expect("work code regex should compile"));

const RETRY_DELAY: Duration = Duration::from_millis(150);

/// Upper-cased work code found in `raw`, if any.
pub fn normalize_work_code(raw: &str) -> Option<String> {
    let upper = raw.trim().to_uppercase();
    WORK_CODE_REGEX
        .find(&upper)
        .map(|found| found.as_str().to_string())
}

/// Backup sites to try, preferred site first.
pub fn backup_order(preferred_site: u16) -> [u16; 3] {
    match preferred_site {
        100 => [100, 200, 300],
        300 => [300, 200, 100],
        _ => [200, 100, 300],
    }
}

#[derive(Debug)]
pub enum CatalogError {
    Http(reqwest::Error),
    Status(u16),
    Timeout,
    Decode(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::Http(err) => write!(f, "http error: {}", err),
            CatalogError::Status(code) => write!(f, "http {}", code),
            CatalogError::Timeout => write!(f, "timed out"),
            CatalogError::Decode(err) => write!(f, "decode error: {}", err),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CatalogError::Timeout
        } else {
            CatalogError::Http(err)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkSummary {
    pub id: i64,
    pub source_id: String,
}

/// Which site answered a search.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchTrace {
    pub keyword: String,
    pub primary_succeeded: bool,
    pub fallback_site: Option<u16>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchResult {
    pub works: Vec<WorkSummary>,
    pub trace: SearchTrace,
}

impl SearchResult {
    pub fn exact_match(&self, key: &str) -> Option<&WorkSummary> {
        let key = key.trim();
        self.works
            .iter()
            .find(|work| work.source_id.trim().eq_ignore_ascii_case(key))
    }

    /// The primary catalog answered and listed nothing.
    pub fn is_confirmed_empty(&self) -> bool {
        self.trace.primary_succeeded && self.works.is_empty()
    }
}

/// Remote work catalog. Implementations bound every call with a timeout.
pub trait CatalogClient: Send + Sync {
    /// `Some(true)` when some site lists `code`, `Some(false)` when a site
    /// answered without it, `None` when nothing answered.
    fn probe(&self, code: &str) -> impl Future<Output = Option<bool>> + Send;

    fn search(&self, keyword: &str) -> impl Future<Output = SearchResult> + Send;

    /// Track tree of a work, from `site` first when given.
    fn tracks(
        &self,
        work_id: &str,
        site: Option<u16>,
    ) -> impl Future<Output = Result<Vec<CatalogNode>, CatalogError>> + Send;
}

#[derive(Deserialize)]
struct SearchPayload {
    #[serde(default)]
    works: Vec<WorkPayload>,
}

#[derive(Deserialize)]
struct WorkPayload {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    language_editions: Option<Vec<EditionPayload>>,
}

#[derive(Deserialize)]
struct EditionPayload {
    #[serde(default)]
    workno: Option<String>,
}

fn primary_works(works: Vec<WorkPayload>) -> Vec<WorkSummary> {
    works
        .into_iter()
        .map(|work| WorkSummary {
            id: work.id,
            source_id: work.source_id.unwrap_or_default().trim().to_string(),
        })
        .collect()
}

/// Backup sites index editions under the base work; a work carrying the
/// searched code as one of its editions is reported under that code.
fn backup_works(works: Vec<WorkPayload>, code: &str) -> Vec<WorkSummary> {
    works
        .into_iter()
        .filter(|work| work.id > 0)
        .map(|work| {
            let has_edition = work.language_editions.iter().flatten().any(|edition| {
                edition
                    .workno
                    .as_deref()
                    .map(|workno| workno.trim().eq_ignore_ascii_case(code))
                    .unwrap_or(false)
            });
            let source_id = match work.source_id.as_deref().map(str::trim) {
                Some(id) if !has_edition && !id.is_empty() => id.to_string(),
                _ => code.to_string(),
            };
            WorkSummary {
                id: work.id,
                source_id,
            }
        })
        .collect()
}

async fn try_twice<T, F, Fut>(mut call: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CatalogError>>,
{
    for attempt in 0..2 {
        match call().await {
            Ok(value) => return Some(value),
            Err(err) => {
                debug!("Catalog call failed (attempt {}): {}", attempt + 1, err);
                if attempt == 0 {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
    None
}

/// Catalog over HTTP: one primary site plus numbered backup sites.
#[derive(Clone, Debug)]
pub struct HttpCatalogClient {
    client: Client,
    primary_url: String,
    backup_urls: BTreeMap<u16, String>,
    preferred_site: u16,
    call_timeout: Duration,
    tracks_timeout_short: Duration,
    tracks_timeout_long: Duration,
}

impl HttpCatalogClient {
    pub fn new(client: Client, config: &ServiceConfig) -> Self {
        Self {
            client,
            primary_url: config.catalog_primary_url.clone(),
            backup_urls: config.catalog_backup_urls.clone(),
            preferred_site: config.preferred_backup_site,
            call_timeout: config.call_timeout(),
            tracks_timeout_short: config.tracks_timeout_short(),
            tracks_timeout_long: config.tracks_timeout_long(),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(Client::new(), config)
    }

    /// Configured backup sites in preference order.
    pub fn backup_sites(&self) -> Vec<(u16, &str)> {
        backup_order(self.preferred_site)
            .into_iter()
            .filter_map(|site| {
                self.backup_urls
                    .get(&site)
                    .map(|url| (site, url.as_str()))
            })
            .collect()
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, CatalogError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|err| CatalogError::Decode(err.to_string()))
    }

    async fn search_site(
        &self,
        base: &str,
        keyword: &str,
    ) -> Result<Vec<WorkPayload>, CatalogError> {
        let url = format!("{}search/{}", base, keyword);
        let payload: SearchPayload = self.get_json(&url, self.call_timeout).await?;
        Ok(payload.works)
    }

    /// Short timeout first; the long one only after a timeout.
    async fn tracks_from(
        &self,
        base: &str,
        work_id: &str,
    ) -> Result<Vec<CatalogNode>, CatalogError> {
        let url = format!("{}tracks/{}", base, work_id);
        match self.get_json(&url, self.tracks_timeout_short).await {
            Err(CatalogError::Timeout) => self.get_json(&url, self.tracks_timeout_long).await,
            other => other,
        }
    }

    async fn tracks_any_site(&self, work_id: &str) -> Result<Vec<CatalogNode>, CatalogError> {
        let mut last = match self.tracks_from(&self.primary_url, work_id).await {
            Ok(nodes) => return Ok(nodes),
            Err(err) => err,
        };
        for (site, base) in self.backup_sites() {
            let url = format!("{}tracks/{}", base, work_id);
            match self.get_json(&url, self.tracks_timeout_long).await {
                Ok(nodes) => return Ok(nodes),
                Err(err) => {
                    debug!("Tracks for {} failed on site {}: {}", work_id, site, err);
                    last = err;
                }
            }
        }
        Err(last)
    }
}

impl CatalogClient for HttpCatalogClient {
    async fn probe(&self, code: &str) -> Option<bool> {
        let code = normalize_work_code(code)?;
        let spaced = format!(" {}", code);
        let mut answered = false;

        for (_, base) in self.backup_sites().into_iter().take(2) {
            if let Some(works) = try_twice(|| self.search_site(base, &spaced)).await {
                answered = true;
                if backup_works(works, &code)
                    .iter()
                    .any(|work| work.source_id.eq_ignore_ascii_case(&code))
                {
                    return Some(true);
                }
            }
        }

        for keyword in [code.as_str(), spaced.as_str()] {
            if let Some(works) = try_twice(|| self.search_site(&self.primary_url, keyword)).await {
                answered = true;
                let listed = works.iter().any(|work| {
                    work.source_id
                        .as_deref()
                        .and_then(normalize_work_code)
                        .as_deref()
                        == Some(code.as_str())
                });
                if listed {
                    return Some(true);
                }
            }
        }

        if answered {
            Some(false)
        } else {
            None
        }
    }

    async fn search(&self, keyword: &str) -> SearchResult {
        let keyword = keyword.trim().to_string();
        let primary = self.search_site(&self.primary_url, &keyword).await;
        let primary_succeeded = primary.is_ok();
        let primary_works = match primary {
            Ok(works) => primary_works(works),
            Err(err) => {
                debug!("Primary catalog search for {} failed: {}", keyword, err);
                Vec::new()
            }
        };
        let mut trace = SearchTrace {
            keyword: keyword.clone(),
            primary_succeeded,
            fallback_site: None,
        };
        if !primary_works.is_empty() {
            return SearchResult {
                works: primary_works,
                trace,
            };
        }

        let code = normalize_work_code(&keyword).filter(|code| *code == keyword.to_uppercase());
        if let Some(code) = code {
            let spaced = format!(" {}", code);
            for (site, base) in self.backup_sites() {
                let works = match self.search_site(base, &spaced).await {
                    Ok(works) => backup_works(works, &code),
                    Err(err) => {
                        debug!("Backup site {} search for {} failed: {}", site, code, err);
                        continue;
                    }
                };
                if !works.is_empty() {
                    trace.fallback_site = Some(site);
                    return SearchResult { works, trace };
                }
            }
        }

        SearchResult {
            works: primary_works,
            trace,
        }
    }

    async fn tracks(
        &self,
        work_id: &str,
        site: Option<u16>,
    ) -> Result<Vec<CatalogNode>, CatalogError> {
        let work_id = work_id.trim();
        let preferred = site.and_then(|site| self.backup_urls.get(&site).map(|url| (site, url)));
        if let Some((site, base)) = preferred {
            match self.tracks_from(base, work_id).await {
                Ok(nodes) => return Ok(nodes),
                Err(err) => debug!("Tracks for {} failed on site {}: {}", work_id, site, err),
            }
        }
        self.tracks_any_site(work_id).await
    }
}
