use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::fetcher::SymbolResolver;

pub const SCRIP_MASTER_URL: &str =
    "https://margincalculator.angelbroking.com/OpenAPI_File/files/OpenAPIScripMaster.json";
pub const SCRIP_MASTER_FILE: &str = "OpenAPIScripMaster.json";

const EQUITY_SEGMENT: &str = "NSE";
const EQUITY_SUFFIX: &str = "-EQ";

#[derive(Debug, Error)]
pub enum SymbolMasterError {
    #[error("scrip master download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("scrip master download returned HTTP {0}")]
    Status(u16),

    #[error("scrip master is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("scrip master cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One row of the scrip master file
#[derive(Debug, Clone, Deserialize)]
pub struct ScripEntry {
    pub token: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    pub exch_seg: String,
}

/// Immutable symbol → token mapping
///
/// Never mutated after construction; a refresh builds a new table and swaps
/// the `Arc`, so readers see either the old or the new table in full.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    by_symbol: HashMap<String, ScripEntry>,
    /// Every NSE row as downloaded, including series shadowed in `by_symbol`
    nse_entries: Vec<ScripEntry>,
    loaded_at: Option<DateTime<Utc>>,
}

impl SymbolTable {
    /// Index NSE entries by trading symbol
    ///
    /// `RELIANCE-EQ` is stored as `RELIANCE` and wins over any other NSE
    /// series with the same bare name.
    pub fn from_entries(entries: Vec<ScripEntry>, loaded_at: DateTime<Utc>) -> Self {
        let mut by_symbol: HashMap<String, ScripEntry> = HashMap::new();
        let mut nse_entries: Vec<ScripEntry> = entries
            .into_iter()
            .filter(|e| e.exch_seg == EQUITY_SEGMENT)
            .collect();

        for entry in &nse_entries {
            match entry.symbol.strip_suffix(EQUITY_SUFFIX) {
                Some(root) => {
                    by_symbol.insert(root.to_string(), entry.clone());
                }
                None => {
                    by_symbol
                        .entry(entry.symbol.clone())
                        .or_insert_with(|| entry.clone());
                }
            }
        }

        nse_entries.sort_by(|a, b| a.symbol.cmp(&b.symbol).then_with(|| a.token.cmp(&b.token)));

        Self {
            by_symbol,
            nse_entries,
            loaded_at: Some(loaded_at),
        }
    }

    pub fn resolve(&self, symbol: &str) -> Option<&str> {
        self.by_symbol.get(symbol.trim()).map(|e| e.token.as_str())
    }

    /// Every NSE row whose raw symbol contains `needle`, sorted by symbol
    ///
    /// Searches the full download, so series that lost to an `-EQ` entry
    /// still show up.
    pub fn search(&self, needle: &str) -> Vec<&ScripEntry> {
        self.nse_entries
            .iter()
            .filter(|e| e.symbol.contains(needle))
            .collect()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

/// Scrip master with an on-disk cache and a 24h freshness window
pub struct SymbolMaster {
    client: Client,
    url: String,
    cache_path: PathBuf,
    max_age: Duration,
    table: RwLock<Arc<SymbolTable>>,
}

impl SymbolMaster {
    pub fn new(url: impl Into<String>, cache_path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            cache_path: cache_path.into(),
            max_age,
            table: RwLock::new(Arc::new(SymbolTable::default())),
        }
    }

    /// Current table; cheap to clone and safe to hold across a refresh
    pub async fn snapshot(&self) -> Arc<SymbolTable> {
        self.table.read().await.clone()
    }

    /// Make sure a table younger than `max_age` is loaded
    ///
    /// Uses the cache file when it is fresh enough, downloads otherwise.
    pub async fn ensure_fresh(&self) -> Result<(), SymbolMasterError> {
        let current = self.snapshot().await;
        if let Some(loaded_at) = current.loaded_at() {
            let age = (Utc::now() - loaded_at).to_std().unwrap_or_default();
            if !current.is_empty() && age < self.max_age {
                return Ok(());
            }
        }

        match cache_age(&self.cache_path).await {
            Some(age) if age < self.max_age => {
                tracing::info!("Loading scrip master from {}", self.cache_path.display());
                let bytes = tokio::fs::read(&self.cache_path).await?;
                self.install(&bytes).await?;
                Ok(())
            }
            Some(_) => {
                tracing::info!("Scrip master older than {:?}, downloading...", self.max_age);
                self.refresh().await
            }
            None => {
                tracing::info!("Scrip master not cached, downloading...");
                self.refresh().await
            }
        }
    }

    /// Download the full table, write the cache and swap it in
    ///
    /// On failure the current table stays in place.
    pub async fn refresh(&self) -> Result<(), SymbolMasterError> {
        let response = self.client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(SymbolMasterError::Status(response.status().as_u16()));
        }
        let bytes = response.bytes().await?;

        // Parse before touching the cache so a bad download cannot replace a good file
        self.install(&bytes).await?;

        if let Err(e) = tokio::fs::write(&self.cache_path, &bytes).await {
            tracing::warn!(
                "Failed to write scrip master cache {}: {}",
                self.cache_path.display(),
                e
            );
        }

        Ok(())
    }

    pub async fn resolve(&self, symbol: &str) -> Option<String> {
        self.snapshot().await.resolve(symbol).map(str::to_string)
    }

    async fn install(&self, bytes: &[u8]) -> Result<(), SymbolMasterError> {
        let entries: Vec<ScripEntry> = serde_json::from_slice(bytes)?;
        let table = SymbolTable::from_entries(entries, Utc::now());
        tracing::info!("Loaded {} NSE symbols", table.len());

        *self.table.write().await = Arc::new(table);
        Ok(())
    }
}

async fn cache_age(path: &Path) -> Option<Duration> {
    let modified = tokio::fs::metadata(path).await.ok()?.modified().ok()?;
    Some(modified.elapsed().unwrap_or_default())
}

#[async_trait]
impl SymbolResolver for SymbolMaster {
    async fn resolve(&self, symbol: &str) -> Option<String> {
        SymbolMaster::resolve(self, symbol).await
    }

    async fn refresh(&self) -> Result<(), SymbolMasterError> {
        SymbolMaster::refresh(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(symbol: &str, token: &str, exch_seg: &str) -> ScripEntry {
        ScripEntry {
            token: token.to_string(),
            symbol: symbol.to_string(),
            name: String::new(),
            exch_seg: exch_seg.to_string(),
        }
    }

    fn scrip_json(reliance_token: &str) -> String {
        json!([
            {"token": reliance_token, "symbol": "RELIANCE-EQ", "name": "RELIANCE", "exch_seg": "NSE", "lotsize": "1"},
            {"token": "3045", "symbol": "SBIN-EQ", "name": "SBIN", "exch_seg": "NSE"},
            {"token": "500325", "symbol": "RELIANCE", "name": "RELIANCE", "exch_seg": "BSE"}
        ])
        .to_string()
    }

    #[test]
    fn test_equity_suffix_stripped() {
        let table = SymbolTable::from_entries(
            vec![entry("RELIANCE-EQ", "2885", "NSE"), entry("NIFTY", "26000", "NSE")],
            Utc::now(),
        );

        assert_eq!(table.resolve("RELIANCE"), Some("2885"));
        assert_eq!(table.resolve("NIFTY"), Some("26000"));
        assert_eq!(table.resolve("RELIANCE-EQ"), None);
    }

    #[test]
    fn test_other_segments_ignored() {
        let table = SymbolTable::from_entries(vec![entry("TCS", "532540", "BSE")], Utc::now());
        assert!(table.is_empty());
        assert_eq!(table.resolve("TCS"), None);
    }

    #[test]
    fn test_equity_series_wins_over_other_series() {
        // Regardless of file order
        let eq_last = SymbolTable::from_entries(
            vec![entry("SAIL", "1", "NSE"), entry("SAIL-EQ", "2963", "NSE")],
            Utc::now(),
        );
        let eq_first = SymbolTable::from_entries(
            vec![entry("SAIL-EQ", "2963", "NSE"), entry("SAIL", "1", "NSE")],
            Utc::now(),
        );

        assert_eq!(eq_last.resolve("SAIL"), Some("2963"));
        assert_eq!(eq_first.resolve("SAIL"), Some("2963"));
    }

    #[test]
    fn test_search() {
        let table = SymbolTable::from_entries(
            vec![
                entry("3MINDIA-EQ", "474", "NSE"),
                entry("SAIL-EQ", "2963", "NSE"),
                entry("SAIL-BL", "9", "NSE"),
            ],
            Utc::now(),
        );

        let found: Vec<&str> = table.search("SAIL").iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(found, vec!["SAIL-BL", "SAIL-EQ"]);
        assert!(table.search("XYZ").is_empty());
    }

    #[test]
    fn test_search_lists_shadowed_series() {
        let table = SymbolTable::from_entries(
            vec![
                entry("SAIL-EQ", "2963", "NSE"),
                entry("SAIL", "1", "NSE"),
                entry("SAIL", "500113", "BSE"),
            ],
            Utc::now(),
        );

        // Lookup prefers the equity series, the search still shows both NSE rows
        assert_eq!(table.resolve("SAIL"), Some("2963"));
        let found: Vec<(&str, &str)> = table
            .search("SAIL")
            .iter()
            .map(|e| (e.symbol.as_str(), e.token.as_str()))
            .collect();
        assert_eq!(found, vec![("SAIL", "1"), ("SAIL-EQ", "2963")]);
    }

    #[tokio::test]
    async fn test_refresh_downloads_and_caches() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/scrip.json")
            .with_status(200)
            .with_body(scrip_json("2885"))
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scrip.json");
        let master = SymbolMaster::new(
            format!("{}/scrip.json", server.url()),
            &cache,
            Duration::from_secs(86_400),
        );

        master.ensure_fresh().await.unwrap();
        // Fresh table in memory: no second download
        master.ensure_fresh().await.unwrap();

        mock.assert_async().await;
        assert!(cache.exists());
        assert_eq!(master.resolve("RELIANCE").await.as_deref(), Some("2885"));
        assert_eq!(master.resolve("SBIN").await.as_deref(), Some("3045"));
    }

    #[tokio::test]
    async fn test_fresh_cache_file_skips_download() {
        let server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scrip.json");
        std::fs::write(&cache, scrip_json("1111")).unwrap();

        // No mock registered: any request would fail
        let master = SymbolMaster::new(
            format!("{}/scrip.json", server.url()),
            &cache,
            Duration::from_secs(86_400),
        );
        master.ensure_fresh().await.unwrap();

        assert_eq!(master.resolve("RELIANCE").await.as_deref(), Some("1111"));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_current_table() {
        let mut server = mockito::Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scrip.json");
        std::fs::write(&cache, scrip_json("1111")).unwrap();

        let master = SymbolMaster::new(
            format!("{}/scrip.json", server.url()),
            &cache,
            Duration::from_secs(86_400),
        );
        master.ensure_fresh().await.unwrap();
        let before = master.snapshot().await;

        server
            .mock("GET", "/scrip.json")
            .with_status(500)
            .create_async()
            .await;

        let err = master.refresh().await.unwrap_err();
        assert!(matches!(err, SymbolMasterError::Status(500)));

        let after = master.snapshot().await;
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(master.resolve("RELIANCE").await.as_deref(), Some("1111"));
    }

    #[tokio::test]
    async fn test_refresh_swaps_whole_table() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/scrip.json")
            .with_status(200)
            .with_body(scrip_json("9999"))
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("scrip.json");
        std::fs::write(&cache, scrip_json("1111")).unwrap();

        let master = SymbolMaster::new(
            format!("{}/scrip.json", server.url()),
            &cache,
            Duration::from_secs(86_400),
        );
        master.ensure_fresh().await.unwrap();
        let old = master.snapshot().await;

        master.refresh().await.unwrap();

        // A reader holding the old snapshot still sees the old mapping in full
        assert_eq!(old.resolve("RELIANCE"), Some("1111"));
        assert_eq!(master.resolve("RELIANCE").await.as_deref(), Some("9999"));
        assert_eq!(std::fs::read_to_string(&cache).unwrap(), scrip_json("9999"));
    }
}
