use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "ALBUM_TREE_CONFIG";

const DEFAULT_PRIMARY_URL: &str = "https://api.asmr.one/api/";
const DEFAULT_FALLBACK_LANGUAGES: &[&str] = &["CHI_HANS", "CHI_HANT", "JPN"];

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub version: u32,
    pub cache_path: String,
    pub catalog_primary_url: String,
    pub catalog_backup_urls: BTreeMap<u16, String>,
    pub preferred_backup_site: u16,
    pub call_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub probe_cache_ttl_secs: u64,
    pub probe_cache_capacity: usize,
    pub search_timeout_ms: u64,
    pub tracks_timeout_short_ms: u64,
    pub tracks_timeout_long_ms: u64,
    pub fallback_languages: Vec<String>,
    pub tree_mirror_capacity: usize,
    pub tree_mirror_ttl_secs: u64,
    pub watch_roots: bool,
    pub watch_debounce_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            cache_path: "tree_cache.redb".to_string(),
            catalog_primary_url: DEFAULT_PRIMARY_URL.to_string(),
            catalog_backup_urls: default_backup_urls(),
            preferred_backup_site: 200,
            call_timeout_ms: 1_500,
            probe_timeout_ms: 1_200,
            probe_cache_ttl_secs: 60,
            probe_cache_capacity: 300,
            search_timeout_ms: 1_800,
            tracks_timeout_short_ms: 2_000,
            tracks_timeout_long_ms: 6_000,
            fallback_languages: DEFAULT_FALLBACK_LANGUAGES
                .iter()
                .map(|lang| lang.to_string())
                .collect(),
            tree_mirror_capacity: 32,
            tree_mirror_ttl_secs: 600,
            watch_roots: true,
            watch_debounce_secs: 2,
        }
    }
}

impl ServiceConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_cache_ttl_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn tracks_timeout_short(&self) -> Duration {
        Duration::from_millis(self.tracks_timeout_short_ms)
    }

    pub fn tracks_timeout_long(&self) -> Duration {
        Duration::from_millis(self.tracks_timeout_long_ms)
    }

    pub fn tree_mirror_ttl(&self) -> Duration {
        Duration::from_secs(self.tree_mirror_ttl_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_secs(if self.watch_debounce_secs == 0 {
            2
        } else {
            self.watch_debounce_secs
        })
    }

    /// Puts blank or zero fields back to their defaults.
    fn normalize(&mut self) {
        let defaults = ServiceConfig::default();
        if self.version < CONFIG_VERSION {
            self.version = CONFIG_VERSION;
        }
        if self.cache_path.trim().is_empty() {
            self.cache_path = defaults.cache_path;
        }
        if self.catalog_primary_url.trim().is_empty() {
            self.catalog_primary_url = defaults.catalog_primary_url;
        }
        self.catalog_primary_url = with_trailing_slash(&self.catalog_primary_url);
        self.catalog_backup_urls.retain(|_, url| !url.trim().is_empty());
        for url in self.catalog_backup_urls.values_mut() {
            *url = with_trailing_slash(url);
        }
        if self.preferred_backup_site == 0 {
            self.preferred_backup_site = defaults.preferred_backup_site;
        }
        if self.call_timeout_ms == 0 {
            self.call_timeout_ms = defaults.call_timeout_ms;
        }
        if self.probe_timeout_ms == 0 {
            self.probe_timeout_ms = defaults.probe_timeout_ms;
        }
        if self.probe_cache_capacity == 0 {
            self.probe_cache_capacity = defaults.probe_cache_capacity;
        }
        if self.search_timeout_ms == 0 {
            self.search_timeout_ms = defaults.search_timeout_ms;
        }
        if self.tracks_timeout_short_ms == 0 {
            self.tracks_timeout_short_ms = defaults.tracks_timeout_short_ms;
        }
        if self.tracks_timeout_long_ms < self.tracks_timeout_short_ms {
            self.tracks_timeout_long_ms = self.tracks_timeout_short_ms;
        }
        self.fallback_languages = self
            .fallback_languages
            .iter()
            .map(|lang| lang.trim().to_uppercase())
            .filter(|lang| !lang.is_empty())
            .collect();
        if self.tree_mirror_capacity == 0 {
            self.tree_mirror_capacity = defaults.tree_mirror_capacity;
        }
    }
}

fn default_backup_urls() -> BTreeMap<u16, String> {
    let mut urls = BTreeMap::new();
    urls.insert(100, "https://api.asmr-100.com/api/".to_string());
    urls.insert(200, "https://api.asmr-200.com/api/".to_string());
    urls.insert(300, "https://api.asmr-300.com/api/".to_string());
    urls
}

fn with_trailing_slash(url: &str) -> String {
    let url = url.trim();
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Loads the config at `path`, writing defaults there first when it does not
/// exist. The flag is true when the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(ServiceConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServiceConfig = if contents.trim().is_empty() {
            ServiceConfig::default()
        } else {
            serde_yaml::from_str(&contents)?
        };
        config.normalize();
        return Ok((config, false));
    }

    let config = ServiceConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServiceConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.probe_timeout_ms, 1_200);
        assert_eq!(config.fallback_languages, vec!["CHI_HANS", "CHI_HANT", "JPN"]);

        let (again, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(again.catalog_backup_urls.len(), 3);
        assert_eq!(again.preferred_backup_site, 200);
    }

    #[test]
    fn normalizes_blank_and_zero_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "version: 0\ncache_path: \"  \"\ncatalog_primary_url: https://example.test/api\nprobe_timeout_ms: 0\ntracks_timeout_short_ms: 3000\ntracks_timeout_long_ms: 10\nfallback_languages: [\" jpn \", \"\"]\ncatalog_backup_urls:\n  100: https://b.test/api\n  200: \"\"\n",
        )
        .unwrap();

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.cache_path, "tree_cache.redb");
        assert_eq!(config.catalog_primary_url, "https://example.test/api/");
        assert_eq!(config.probe_timeout_ms, 1_200);
        assert_eq!(config.tracks_timeout_long_ms, 3_000);
        assert_eq!(config.fallback_languages, vec!["JPN"]);
        assert_eq!(config.catalog_backup_urls.len(), 1);
        assert_eq!(config.catalog_backup_urls[&100], "https://b.test/api/");
        assert_eq!(config.search_timeout_ms, 1_800);
    }

    #[test]
    fn resolves_relative_to_config_dir() {
        let config_path = Path::new("/etc/album/config.yaml");
        assert_eq!(
            resolve_path(config_path, "tree_cache.redb"),
            PathBuf::from("/etc/album/tree_cache.redb")
        );
        assert_eq!(
            resolve_path(config_path, "/var/cache/t.redb"),
            PathBuf::from("/var/cache/t.redb")
        );
        assert_eq!(
            resolve_path(Path::new("config.yaml"), "t.redb"),
            PathBuf::from("./t.redb")
        );
    }
}
