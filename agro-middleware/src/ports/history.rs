use super::{select_latest, HistoryFilter, HistoryStore, StoreError};
use crate::models::HistoryRecord;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// History kept in a JSON-lines file, one record per line, with an in-memory
/// cache loaded at startup. Appends go to disk first, then to the cache.
pub struct JsonlHistoryStore {
    storage_path: PathBuf,
    cache: Mutex<Vec<HistoryRecord>>,
}

impl JsonlHistoryStore {
    pub fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let path = storage_path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let store = Self { storage_path: path, cache: Mutex::new(Vec::new()) };
        store.load_from_disk()?;
        let records = store.cache.lock().len();
        info!(path = ?store.storage_path, records, "history store opened");
        Ok(store)
    }

    fn load_from_disk(&self) -> Result<(), StoreError> {
        if !self.storage_path.exists() {
            fs::write(&self.storage_path, "")?;
        }

        let content = fs::read_to_string(&self.storage_path)?;
        let mut records = Vec::new();
        for (n, line) in content.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(line = n + 1, error = %e, "skipping unreadable history line"),
            }
        }

        *self.cache.lock() = records;
        Ok(())
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn insert(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        // the lock also serialises appends to the file
        let mut cache = self.cache.lock();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.storage_path)?;
        file.write_all(line.as_bytes())?;
        cache.push(record.clone());
        Ok(())
    }

    fn find_many(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        Ok(select_latest(&self.cache.lock(), filter, limit))
    }

    fn describe(&self) -> String {
        format!("jsonl:{}", self.storage_path.display())
    }
}

/// Volatile history, also the test double. `set_available(false)` makes
/// every call fail the way an unreachable database would.
#[derive(Default)]
pub struct MemoryHistoryStore {
    records: Mutex<Vec<HistoryRecord>>,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, std::sync::atomic::Ordering::Release);
    }

    pub fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(std::sync::atomic::Ordering::Acquire) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn insert(&self, record: &HistoryRecord) -> Result<(), StoreError> {
        self.check()?;
        self.records.lock().push(record.clone());
        Ok(())
    }

    fn find_many(
        &self,
        filter: &HistoryFilter,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, StoreError> {
        self.check()?;
        Ok(select_latest(&self.records.lock(), filter, limit))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}
