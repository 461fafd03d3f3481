use std::{
    fmt,
    path::{Component, Path, PathBuf},
    sync::{Arc, Mutex},
    time::SystemTime,
};

use async_trait::async_trait;
use mailq_common::{Message, Priority, internal};
use serde::{Serialize, de::DeserializeOwned};
use tokio::fs;

use crate::{
    FailedMessage, LogEntry, QueuedMessage, SerializationError, SpoolError, ValidationError,
    queue_order, r#trait::QueueStore, types::QueuedMessageId,
};

const QUEUE_DIR: &str = "queue";
const FAILED_DIR: &str = "failed";
const LOG_DIR: &str = "log";
const TEMP_PREFIX: &str = ".tmp_";

/// File-based queue store
///
/// Entries are kept as bincode records under the spool directory, one file
/// per entry, named by ULID:
/// - `queue/{id}.bin`: pending and deferred entries
/// - `failed/{id}.bin`: permanently failed entries
/// - `log/{ulid}.bin`: the delivery log, one record per attempt
///
/// # Atomicity
/// Every write goes to `.tmp_{name}` first and is renamed into place, so a
/// crash never leaves a half-written record where a listing would pick it up.
/// Moving an entry to `failed/` writes the failed record before removing the
/// queued one; a crash in between leaves the message queued, never lost.
///
/// # Security
/// Only files whose names parse as `{ulid}.bin` are read.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
    log_ids: LogIds,
}

impl Default for FileQueueStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/mailq"),
            log_ids: LogIds::default(),
        }
    }
}

/// Strictly increasing ids for delivery log records, so that listing the
/// log in id order keeps attempts made within the same millisecond in order
#[derive(Clone)]
struct LogIds(Arc<Mutex<ulid::Generator>>);

impl Default for LogIds {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(ulid::Generator::new())))
    }
}

impl fmt::Debug for LogIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LogIds")
    }
}

impl LogIds {
    fn next(&self) -> crate::Result<QueuedMessageId> {
        self.0
            .lock()?
            .generate()
            .map(QueuedMessageId::new)
            .map_err(|e| SpoolError::Internal(format!("Unable to allocate a log id: {e}")))
    }
}

fn encode<T: Serialize>(value: &T) -> crate::Result<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> crate::Result<T> {
    let (value, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    if read != bytes.len() {
        return Err(SerializationError::Corrupted(format!(
            "{} trailing bytes",
            bytes.len() - read
        ))
        .into());
    }
    Ok(value)
}

impl FileQueueStore {
    /// Validate a spool path
    ///
    /// Rejects relative paths, `..` components and system directories.
    fn validate_path(path: &Path) -> crate::Result<()> {
        let invalid = |reason: String| -> crate::Result<()> {
            Err(ValidationError::InvalidConfiguration(reason).into())
        };

        if path.components().any(|c| c == Component::ParentDir) {
            return invalid(format!(
                "Spool path cannot contain '..' components: {}",
                path.display()
            ));
        }

        if !path.is_absolute() {
            return invalid(format!("Spool path must be absolute: {}", path.display()));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return invalid(format!(
                "Spool path cannot be in system directory {prefix}: {}",
                path.display()
            ));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileQueueStoreBuilder {
        FileQueueStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the spool directories and sweep up interrupted writes
    ///
    /// # Errors
    /// If the directories cannot be created, or the spool path exists but is
    /// not a directory
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue spool at {}", self.path.display());

        if fs::try_exists(&self.path).await? && !fs::metadata(&self.path).await?.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        for dir in [QUEUE_DIR, FAILED_DIR, LOG_DIR] {
            let dir = self.path.join(dir);
            fs::create_dir_all(&dir).await?;
            self.cleanup_temp_files(&dir).await?;
        }

        Ok(())
    }

    async fn cleanup_temp_files(&self, dir: &Path) -> crate::Result<()> {
        let mut entries = fs::read_dir(dir).await?;
        let mut cleaned = 0;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} interrupted writes from {}",
                dir.display()
            );
        }

        Ok(())
    }

    fn record_path(&self, dir: &str, id: &QueuedMessageId) -> PathBuf {
        self.path.join(dir).join(id.filename())
    }

    async fn write_record<T: Serialize + Sync>(
        &self,
        dir: &str,
        id: &QueuedMessageId,
        value: &T,
    ) -> crate::Result<()> {
        let path = self.record_path(dir, id);
        let temp = self
            .path
            .join(dir)
            .join(format!("{TEMP_PREFIX}{}", id.filename()));

        fs::write(&temp, encode(value)?).await?;
        fs::rename(&temp, &path).await?;

        Ok(())
    }

    async fn read_record<T: DeserializeOwned>(
        &self,
        dir: &str,
        id: &QueuedMessageId,
    ) -> crate::Result<T> {
        match fs::read(self.record_path(dir, id)).await {
            Ok(bytes) => decode(&bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SpoolError::NotFound(*id))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn remove_record(&self, dir: &str, id: &QueuedMessageId) -> crate::Result<()> {
        match fs::remove_file(self.record_path(dir, id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SpoolError::NotFound(*id))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Ids of every record in `dir`, sorted
    async fn list_ids(&self, dir: &str) -> crate::Result<Vec<QueuedMessageId>> {
        let mut entries = fs::read_dir(self.path.join(dir)).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = QueuedMessageId::from_filename(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn read_all<T: DeserializeOwned>(&self, dir: &str) -> crate::Result<Vec<T>> {
        let mut records = Vec::new();

        for id in self.list_ids(dir).await? {
            match self.read_record(dir, &id).await {
                Ok(record) => records.push(record),
                // Removed between listing and reading
                Err(SpoolError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(&self, message: Message, priority: Priority) -> crate::Result<QueuedMessageId> {
        let entry = QueuedMessage::new(message, priority);

        if fs::try_exists(self.record_path(QUEUE_DIR, &entry.id)).await? {
            return Err(SpoolError::AlreadyExists(entry.id));
        }

        self.write_record(QUEUE_DIR, &entry.id, &entry).await?;
        internal!(level = DEBUG, "Queued message {}", entry.id);

        Ok(entry.id)
    }

    async fn get(&self, id: &QueuedMessageId) -> crate::Result<QueuedMessage> {
        self.read_record(QUEUE_DIR, id).await
    }

    async fn list_eligible(
        &self,
        now: SystemTime,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>> {
        let mut entries: Vec<QueuedMessage> = self.read_all(QUEUE_DIR).await?;
        entries.retain(|entry| entry.is_eligible(now));
        entries.sort_by(queue_order);

        if let Some(limit) = limit {
            entries.truncate(limit);
        }

        Ok(entries)
    }

    async fn list_all(&self) -> crate::Result<Vec<QueuedMessage>> {
        let mut entries: Vec<QueuedMessage> = self.read_all(QUEUE_DIR).await?;
        entries.sort_by(queue_order);
        Ok(entries)
    }

    async fn mark_sent(&self, id: &QueuedMessageId) -> crate::Result<()> {
        self.remove_record(QUEUE_DIR, id).await
    }

    async fn mark_deferred(
        &self,
        id: &QueuedMessageId,
        next_eligible_at: SystemTime,
        error: &str,
    ) -> crate::Result<()> {
        let mut entry: QueuedMessage = self.read_record(QUEUE_DIR, id).await?;

        entry.retries = entry.retries.saturating_add(1);
        entry.deferred_until = Some(next_eligible_at);
        entry.last_error = Some(error.to_string());

        self.write_record(QUEUE_DIR, id, &entry).await
    }

    async fn mark_failed(&self, id: &QueuedMessageId, error: &str) -> crate::Result<()> {
        let mut entry: QueuedMessage = self.read_record(QUEUE_DIR, id).await?;
        entry.last_error = Some(error.to_string());

        let failed = FailedMessage {
            entry,
            failed_at: SystemTime::now(),
        };

        self.write_record(FAILED_DIR, id, &failed).await?;
        self.remove_record(QUEUE_DIR, id).await
    }

    async fn list_failed(&self) -> crate::Result<Vec<FailedMessage>> {
        let mut failed: Vec<FailedMessage> = self.read_all(FAILED_DIR).await?;
        failed.sort_by(|a, b| queue_order(&a.entry, &b.entry));
        Ok(failed)
    }

    async fn requeue_failed(&self, id: &QueuedMessageId) -> crate::Result<()> {
        let failed: FailedMessage = self.read_record(FAILED_DIR, id).await?;

        let mut entry = failed.entry;
        entry.retries = 0;
        entry.deferred_until = None;

        self.write_record(QUEUE_DIR, id, &entry).await?;
        self.remove_record(FAILED_DIR, id).await
    }

    async fn retry_deferred(&self, max_retries: Option<u32>) -> crate::Result<usize> {
        let mut released = 0;

        for mut entry in self.read_all::<QueuedMessage>(QUEUE_DIR).await? {
            if entry.is_deferred() && max_retries.is_none_or(|max| entry.retries < max) {
                entry.deferred_until = None;
                self.write_record(QUEUE_DIR, &entry.id, &entry).await?;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn record_log(&self, entry: LogEntry) -> crate::Result<()> {
        let id = self.log_ids.next()?;
        self.write_record(LOG_DIR, &id, &entry).await
    }

    async fn list_logs(&self) -> crate::Result<Vec<LogEntry>> {
        self.read_all(LOG_DIR).await
    }
}

/// Builder for `FileQueueStore`
#[derive(Debug, Default)]
pub struct FileQueueStoreBuilder {
    path: PathBuf,
}

impl FileQueueStoreBuilder {
    /// Set the spool directory path
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Build the final `FileQueueStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> crate::Result<FileQueueStore> {
        FileQueueStore::validate_path(&self.path)?;
        Ok(FileQueueStore {
            path: self.path,
            log_ids: LogIds::default(),
        })
    }
}
