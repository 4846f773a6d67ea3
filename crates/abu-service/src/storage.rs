//! Persistence.
//!
//! [`RulesStorage`] keeps each filter's rule lines, in order. [`StateStore`]
//! is a small synchronous key/value store for JSON documents (filter state,
//! custom filters, whitelist). Both come with a file-backed and an
//! in-memory implementation.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use abu_core::FilterId;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, ServiceError};

#[async_trait]
pub trait RulesStorage: Send + Sync {
    /// Stored lines of a filter; empty when nothing was stored.
    async fn read(&self, filter_id: FilterId) -> Result<Vec<String>>;

    async fn write(&self, filter_id: FilterId, lines: &[String]) -> Result<()>;
}

pub trait StateStore: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;
}

fn rules_file_name(filter_id: FilterId) -> String {
    format!("filterrules_{}.txt", filter_id)
}

// =============================================================================
// Files
// =============================================================================

/// One `filterrules_{id}.txt` per filter.
#[derive(Debug, Clone)]
pub struct FileRulesStorage {
    dir: PathBuf,
}

impl FileRulesStorage {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, filter_id: FilterId) -> PathBuf {
        self.dir.join(rules_file_name(filter_id))
    }
}

#[async_trait]
impl RulesStorage for FileRulesStorage {
    async fn read(&self, filter_id: FilterId) -> Result<Vec<String>> {
        match tokio::fs::read_to_string(self.path(filter_id)).await {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ServiceError::Storage {
                filter_id,
                reason: e.to_string(),
            }),
        }
    }

    async fn write(&self, filter_id: FilterId, lines: &[String]) -> Result<()> {
        let storage_err = |e: std::io::Error| ServiceError::Storage {
            filter_id,
            reason: e.to_string(),
        };
        tokio::fs::create_dir_all(&self.dir).await.map_err(storage_err)?;
        tokio::fs::write(self.path(filter_id), lines.join("\n"))
            .await
            .map_err(storage_err)
    }
}

/// All keys in one JSON object on disk, rewritten on every change.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStateStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    fn flush(&self, items: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string(items)?)?;
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.lock();
        items.insert(key.to_string(), value.to_string());
        self.flush(&items)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let mut items = self.items.lock();
        if items.remove(key).is_some() {
            self.flush(&items)?;
        }
        Ok(())
    }
}

// =============================================================================
// Memory
// =============================================================================

/// Rule storage in memory. Counts writes.
#[derive(Debug, Default)]
pub struct MemoryRulesStorage {
    rules: Mutex<HashMap<FilterId, Vec<String>>>,
    writes: AtomicUsize,
}

impl MemoryRulesStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a filter's lines without counting a write.
    pub fn insert<I, S>(&self, filter_id: FilterId, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.lock().insert(filter_id, lines.into_iter().map(Into::into).collect());
    }

    pub fn get(&self, filter_id: FilterId) -> Option<Vec<String>> {
        self.rules.lock().get(&filter_id).cloned()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RulesStorage for MemoryRulesStorage {
    async fn read(&self, filter_id: FilterId) -> Result<Vec<String>> {
        Ok(self.get(filter_id).unwrap_or_default())
    }

    async fn write(&self, filter_id: FilterId, lines: &[String]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.rules.lock().insert(filter_id, lines.to_vec());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.lock().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }
}
