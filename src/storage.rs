// File: ./src/storage.rs
// Durable persistence of the schedule record.
//
// The persistent store is a plain key-value facility (one JSON blob per key).
// `StateStore` layers the single `ScheduleState` record on top of it.
use crate::context::AppContext;
use crate::error::PrayerError;
use crate::model::{SCHEDULE_STATE_VERSION, ScheduleState};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[cfg(target_os = "android")]
use std::sync::OnceLock;

#[cfg(not(target_os = "android"))]
use fs2::FileExt;

pub const SCHEDULE_KEY: &str = "prayer_schedule";

// --- Android Global Lock Map ---
#[cfg(target_os = "android")]
static ANDROID_FILE_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

/// File helpers shared by every on-disk writer (config and key-value store).
pub struct LocalStorage;

impl LocalStorage {
    /// Helper to get a sidecar lock file path (Desktop only)
    #[cfg(not(target_os = "android"))]
    fn get_lock_path(file_path: &Path) -> PathBuf {
        let mut lock_path = file_path.to_path_buf();
        if let Some(ext) = lock_path.extension() {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        } else {
            lock_path.set_extension("lock");
        }
        lock_path
    }

    // --- DESKTOP IMPLEMENTATION (fs2) ---
    #[cfg(not(target_os = "android"))]
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let lock_path = Self::get_lock_path(file_path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        file.lock_exclusive()?;
        let result = f();
        file.unlock()?;
        result
    }

    // --- ANDROID IMPLEMENTATION (In-Memory Mutex) ---
    #[cfg(target_os = "android")]
    pub fn with_lock<F, T>(file_path: &Path, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let map_mutex = ANDROID_FILE_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
        let key = file_path.canonicalize().unwrap_or(file_path.to_path_buf());

        let file_mutex = {
            let mut map = map_mutex
                .lock()
                .map_err(|_| anyhow::anyhow!("file lock map poisoned"))?;
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let _guard = file_mutex
            .lock()
            .map_err(|_| anyhow::anyhow!("file lock poisoned"))?;
        f()
    }

    /// Atomic write: Write to .tmp file then rename
    pub fn atomic_write<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, contents)?;
        fs::rename(tmp_path, path)?;
        Ok(())
    }
}

/// The host's persistent key-value facility.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Missing keys are `Ok(None)`, never an error.
    async fn get(&self, key: &str) -> Result<Option<String>, PrayerError>;
    async fn set(&self, key: &str, value: String) -> Result<(), PrayerError>;
}

/// One JSON file per key under the context's store directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(ctx: &dyn AppContext) -> Result<Self> {
        Ok(Self {
            dir: ctx.get_store_dir()?,
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe_key: String = key
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{}.json", safe_key))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PrayerError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || {
            if !path.exists() {
                return Ok(None);
            }
            LocalStorage::with_lock(&path, || Ok(Some(fs::read_to_string(&path)?)))
        })
        .await
        .map_err(|e| PrayerError::Persistence(e.to_string()))?
        .map_err(|e| PrayerError::Persistence(e.to_string()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PrayerError> {
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || {
            LocalStorage::with_lock(&path, || LocalStorage::atomic_write(&path, value))
        })
        .await
        .map_err(|e| PrayerError::Persistence(e.to_string()))?
        .map_err(|e| PrayerError::Persistence(e.to_string()))
    }
}

/// Process-local store, for hosts without durable storage and for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PrayerError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| PrayerError::Persistence("memory store poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), PrayerError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PrayerError::Persistence("memory store poisoned".to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Reads and overwrites the single persisted `ScheduleState`.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn save(&self, state: &ScheduleState) -> Result<(), PrayerError> {
        let json = serde_json::to_string_pretty(state)?;
        self.kv.set(SCHEDULE_KEY, json).await?;
        log::debug!("Saved schedule for {}", state.schedule_date);
        Ok(())
    }

    /// Returns `Ok(None)` when there is no usable record.
    ///
    /// Unparseable records and records written by another format version are
    /// treated as absent, which makes the caller recompute the schedule.
    pub async fn load(&self) -> Result<Option<ScheduleState>, PrayerError> {
        let Some(json) = self.kv.get(SCHEDULE_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<ScheduleState>(&json) {
            Ok(state) if state.version == SCHEDULE_STATE_VERSION => Ok(Some(state)),
            Ok(state) => {
                log::warn!(
                    "Ignoring schedule record with version {} (expected {})",
                    state.version,
                    SCHEDULE_STATE_VERSION
                );
                Ok(None)
            }
            Err(e) => {
                log::warn!("Ignoring unreadable schedule record: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TestContext;
    use crate::testing::sample_state;
    use std::thread;

    #[test]
    fn test_locking_concurrency() {
        let ctx = TestContext::new();
        let file_path = ctx.get_data_dir().unwrap().join("lock_test.txt");
        let path_ref = Arc::new(file_path.clone());

        fs::write(&file_path, "0").unwrap();

        let mut handles = vec![];
        for _ in 0..10 {
            let p = path_ref.clone();
            handles.push(thread::spawn(move || {
                LocalStorage::with_lock(&p, || {
                    let content = fs::read_to_string(&*p).unwrap();
                    let num: i32 = content.parse().unwrap();
                    std::thread::sleep(std::time::Duration::from_millis(10));
                    fs::write(&*p, (num + 1).to_string()).unwrap();
                    Ok(())
                })
                .unwrap();
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(fs::read_to_string(&file_path).unwrap(), "10");
    }

    #[tokio::test]
    async fn test_file_store_missing_key_is_none() {
        let ctx = TestContext::new();
        let store = FileStore::new(&ctx).unwrap();
        assert_eq!(store.get("nothing_here").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_state_store_overwrites_single_record() {
        let ctx = TestContext::new();
        let store = StateStore::new(Arc::new(FileStore::new(&ctx).unwrap()));
        assert!(store.load().await.unwrap().is_none());

        let first = sample_state("2025-03-13");
        store.save(&first).await.unwrap();
        let second = sample_state("2025-03-14");
        store.save(&second).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(second));
        // No temp file is left behind by the atomic write.
        let leftovers: Vec<_> = fs::read_dir(ctx.get_store_dir().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_loads_as_absent() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(SCHEDULE_KEY, "{ not json".to_string()).await.unwrap();
        let store = StateStore::new(kv);
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_old_version_loads_as_absent() {
        let kv = Arc::new(MemoryStore::new());
        let mut state = sample_state("2025-03-14");
        state.version = 0;
        kv.set(SCHEDULE_KEY, serde_json::to_string(&state).unwrap())
            .await
            .unwrap();
        assert!(StateStore::new(kv).load().await.unwrap().is_none());
    }
}
