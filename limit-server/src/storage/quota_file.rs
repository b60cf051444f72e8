//! Quota table persistence.

use super::QuotaStore;
use crate::error::StorageError;
use async_trait::async_trait;
use edge_limit_types::BucketQuota;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Quota table stored as one JSON record per line.
///
/// Saves write `<path>.new` and rename it over `<path>`, so a crash leaves
/// either the old or the new table, never a torn one.
#[derive(Debug, Clone)]
pub struct FileQuotaStore {
    path: PathBuf,
}

impl FileQuotaStore {
    /// Store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push(".new");
        PathBuf::from(name)
    }
}

#[async_trait]
impl QuotaStore for FileQuotaStore {
    async fn load(&self) -> Result<Vec<BucketQuota>, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("Quota file {} not found, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match BucketQuota::from_line(line) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping quota record {}:{}: {}",
                    self.path.display(),
                    lineno + 1,
                    e
                ),
            }
        }
        Ok(records)
    }

    async fn save(&self, records: &[BucketQuota]) -> Result<(), StorageError> {
        let mut content = String::new();
        for record in records {
            content.push_str(&record.to_line()?);
            content.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// In-memory quota store for tests and for running without a quota file.
#[derive(Debug, Default, Clone)]
pub struct MemoryQuotaStore {
    inner: Arc<Mutex<MemoryQuotaInner>>,
}

#[derive(Debug, Default)]
struct MemoryQuotaInner {
    records: Vec<BucketQuota>,
    saves: usize,
    fail_next_save: Option<String>,
}

impl MemoryQuotaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with `records`.
    pub fn with_records(records: Vec<BucketQuota>) -> Self {
        let store = Self::default();
        store.lock().records = records;
        store
    }

    /// The last saved table.
    pub fn records(&self) -> Vec<BucketQuota> {
        self.lock().records.clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    /// Cause the next save to fail with the given message.
    pub fn fail_next_save(&self, error: &str) {
        self.lock().fail_next_save = Some(error.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryQuotaInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn load(&self) -> Result<Vec<BucketQuota>, StorageError> {
        Ok(self.records())
    }

    async fn save(&self, records: &[BucketQuota]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if let Some(error) = inner.fail_next_save.take() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                error,
            )));
        }
        inner.records = records.to_vec();
        inner.saves += 1;
        Ok(())
    }
}
