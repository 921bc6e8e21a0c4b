// src/cache.rs

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{MatchError, SkipLog, SkipReason};
use crate::models::CacheEntry;

/// Append-only JSONL store of fetched payloads.
///
/// Lines on disk are loaded once at open and then read without locking.
/// Entries appended during the run go through a single mutex that owns the
/// file handle, so concurrent writers never interleave lines.
pub struct ResultCache<T> {
    path: Option<PathBuf>,
    loaded: HashMap<String, T>,
    appended: Mutex<HashMap<String, T>>,
    writer: Mutex<Option<File>>,
    appended_count: AtomicUsize,
    skipped: SkipLog,
}

impl<T> ResultCache<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Cache that lives only for this process.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            loaded: HashMap::new(),
            appended: Mutex::new(HashMap::new()),
            writer: Mutex::new(None),
            appended_count: AtomicUsize::new(0),
            skipped: SkipLog::new(),
        }
    }

    /// Loads every readable line of `path` (if it exists) and opens it for
    /// appending. When a key appears on several lines the last one wins.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MatchError> {
        let path = path.as_ref().to_path_buf();
        let start = Instant::now();
        let mut loaded: HashMap<String, T> = HashMap::new();
        let mut skipped = SkipLog::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CacheEntry<T>>(&line) {
                    Ok(entry) => {
                        loaded.insert(entry.key, entry.payload);
                    }
                    Err(e) => skipped.record(SkipReason::MalformedCacheLine, line_no + 1, e.to_string()),
                }
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(
            "Loaded {} cached entries from {} in {:.2?} ({} malformed lines skipped)",
            loaded.len(),
            path.display(),
            start.elapsed(),
            skipped.len()
        );

        Ok(Self {
            path: Some(path),
            loaded,
            appended: Mutex::new(HashMap::new()),
            writer: Mutex::new(Some(file)),
            appended_count: AtomicUsize::new(0),
            skipped,
        })
    }

    pub fn get(&self, key: &str) -> Option<T> {
        if let Ok(appended) = self.appended.lock() {
            if let Some(payload) = appended.get(key) {
                return Some(payload.clone());
            }
        }
        self.loaded.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Writes one line and flushes before making the entry visible.
    pub fn append(&self, key: &str, payload: &T) -> Result<(), MatchError> {
        let entry = CacheEntry {
            key: key.to_string(),
            payload: payload.clone(),
            fetched_at: Some(Utc::now()),
        };
        let line = serde_json::to_string(&entry)
            .map_err(|e| MatchError::Cache(format!("cannot encode entry '{}': {}", key, e)))?;

        {
            let mut writer = self
                .writer
                .lock()
                .map_err(|_| MatchError::Cache("cache writer lock poisoned".to_string()))?;
            if let Some(file) = writer.as_mut() {
                writeln!(file, "{}", line)?;
                file.flush()?;
            }
        }

        self.appended
            .lock()
            .map_err(|_| MatchError::Cache("cache map lock poisoned".to_string()))?
            .insert(key.to_string(), entry.payload);
        self.appended_count.fetch_add(1, Ordering::Relaxed);
        debug!("Cached '{}'", key);
        Ok(())
    }

    /// Distinct keys currently readable.
    pub fn len(&self) -> usize {
        let appended = match self.appended.lock() {
            Ok(appended) => appended,
            Err(_) => return self.loaded.len(),
        };
        self.loaded.len()
            + appended
                .keys()
                .filter(|key| !self.loaded.contains_key(*key))
                .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lines written by this process.
    pub fn appended_count(&self) -> usize {
        self.appended_count.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> &SkipLog {
        &self.skipped
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
