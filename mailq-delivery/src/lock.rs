//! Process-wide drain lock.
//!
//! A lock is a file created with `O_CREAT | O_EXCL` semantics that holds a
//! JSON owner record. Whoever creates the file holds the lock. A lock whose
//! owner died, or which is older than the staleness threshold, is broken and
//! taken over.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime},
};

use mailq_common::{Clock, SystemClock, internal};
use serde::{Deserialize, Serialize};
use tokio::{
    fs,
    io::{AsyncWrite, AsyncWriteExt},
};

use crate::error::LockError;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Identity written into the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub host: String,
    pub pid: u32,
    /// Distinguishes managers inside the same process
    pub token: String,
    pub acquired_at: SystemTime,
}

impl LockOwner {
    fn current() -> Self {
        Self {
            host: hostname::get().map_or_else(
                |_| String::from("localhost"),
                |host| host.to_string_lossy().into_owned(),
            ),
            pid: std::process::id(),
            token: ulid::Ulid::new().to_string(),
            acquired_at: SystemTime::UNIX_EPOCH,
        }
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.host == other.host && self.pid == other.pid && self.token == other.token
    }
}

impl fmt::Display for LockOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.host, self.pid, self.token)
    }
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // SAFETY: signal 0 only performs the existence and permission checks
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
const fn pid_alive(_pid: u32) -> bool {
    true
}

/// Upper bound on acquisition attempts for a given wait.
///
/// Independent of any clock reading, so a frozen or backwards clock still
/// terminates.
fn max_polls(timeout: Duration, poll_interval: Duration) -> u64 {
    let poll = poll_interval.max(Duration::from_millis(1)).as_nanos();
    let polls = timeout.as_nanos().div_ceil(poll);
    u64::try_from(polls).unwrap_or(u64::MAX).saturating_add(1)
}

/// Fill a freshly created lock file, removing it again if that fails
///
/// A half-written lock would otherwise read as unreadable and hold off
/// every other pass until it went stale.
async fn write_record<W>(mut file: W, path: &Path, record: &[u8]) -> Result<(), LockError>
where
    W: AsyncWrite + Unpin,
{
    let mut written = file.write_all(record).await;
    if written.is_ok() {
        written = file.flush().await;
    }
    drop(file);

    if let Err(err) = written {
        if let Err(remove) = fs::remove_file(path).await
            && remove.kind() != std::io::ErrorKind::NotFound
        {
            internal!(
                level = WARN,
                "Unable to remove partially written lock {}: {remove}",
                path.display()
            );
        }
        return Err(err.into());
    }

    Ok(())
}

/// Named, single-holder lock backed by a file
pub struct LockManager {
    path: PathBuf,
    poll_interval: Duration,
    stale_after: Duration,
    clock: Arc<dyn Clock>,
    owner: LockOwner,
    held: AtomicBool,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("path", &self.path)
            .field("owner", &self.owner)
            .field("held", &self.is_held())
            .finish_non_exhaustive()
    }
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            clock: Arc::new(SystemClock),
            owner: LockOwner::current(),
            held: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn owner(&self) -> &LockOwner {
        &self.owner
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn elapsed_since(&self, start: SystemTime) -> Duration {
        self.clock.now().duration_since(start).unwrap_or_default()
    }

    /// Acquire the lock, waiting up to `timeout` for the current holder
    ///
    /// With a zero timeout a held lock fails straight away with
    /// [`LockError::AlreadyLocked`]. Otherwise the lock is polled every
    /// `poll_interval` until it frees up or `timeout` has passed, giving
    /// [`LockError::Timeout`]. Stale locks are broken along the way.
    pub async fn acquire(&self, timeout: Duration) -> Result<(), LockError> {
        if self.is_held() {
            return Ok(());
        }

        let start = self.clock.now();
        let max_polls = max_polls(timeout, self.poll_interval);

        for poll in 0..max_polls {
            if self.try_create().await?
                || (self.break_if_stale().await? && self.try_create().await?)
            {
                self.held.store(true, Ordering::Release);
                internal!(level = DEBUG, "Acquired lock {}", self.path.display());
                return Ok(());
            }

            if timeout.is_zero() {
                return Err(LockError::AlreadyLocked);
            }

            let waited = self.elapsed_since(start);
            if waited >= timeout || poll + 1 == max_polls {
                return Err(LockError::Timeout { waited });
            }

            self.clock.sleep(self.poll_interval).await;
        }

        if timeout.is_zero() {
            Err(LockError::AlreadyLocked)
        } else {
            Err(LockError::Timeout {
                waited: self.elapsed_since(start),
            })
        }
    }

    /// Create the lock file if nobody else has
    async fn try_create(&self) -> Result<bool, LockError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let record = LockOwner {
            acquired_at: self.clock.now(),
            ..self.owner.clone()
        };
        let json =
            serde_json::to_vec(&record).map_err(|e| LockError::Corrupt(e.to_string()))?;

        let file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        write_record(file, &self.path, &json).await?;
        Ok(true)
    }

    async fn read_owner(&self) -> Result<Option<Result<LockOwner, String>>, LockError> {
        match fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| e.to_string()),
            )),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Remove the lock file if its holder is gone
    ///
    /// Breakers are serialised through a `create_new` marker next to the
    /// lock, and the owner record is judged while the marker is held, so a
    /// lock that was broken and re-taken by another contender is never
    /// removed on the strength of an older reading.
    ///
    /// Returns `true` when the caller should retry straight away.
    async fn break_if_stale(&self) -> Result<bool, LockError> {
        let marker = self.break_marker();

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                self.clear_abandoned_marker(&marker).await?;
                return Ok(false);
            }
            Err(err) => return Err(err.into()),
        }

        let broken = self.remove_if_stale().await;

        if let Err(err) = fs::remove_file(&marker).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            internal!(
                level = WARN,
                "Unable to remove lock break marker {}: {err}",
                marker.display()
            );
        }

        broken
    }

    fn break_marker(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".break");
        PathBuf::from(name)
    }

    /// A breaker that died mid-break leaves its marker behind
    async fn clear_abandoned_marker(&self, marker: &Path) -> Result<(), LockError> {
        let modified = match fs::metadata(marker).await {
            Ok(metadata) => metadata.modified()?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        if self.elapsed_since(modified) > self.stale_after {
            internal!(
                level = WARN,
                "Removing abandoned lock break marker {}",
                marker.display()
            );
            match fs::remove_file(marker).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }

    async fn remove_if_stale(&self) -> Result<bool, LockError> {
        let stale = match self.read_owner().await? {
            None => return Ok(true),
            Some(Ok(owner)) => {
                let dead = owner.host == self.owner.host && !pid_alive(owner.pid);
                let age = self.elapsed_since(owner.acquired_at);
                if dead || age > self.stale_after {
                    internal!(
                        level = WARN,
                        "Breaking stale lock {} held by {owner} (age {age:?}, alive: {})",
                        self.path.display(),
                        !dead
                    );
                    true
                } else {
                    false
                }
            }
            Some(Err(reason)) => {
                let modified = match fs::metadata(&self.path).await {
                    Ok(metadata) => metadata.modified()?,
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
                    Err(err) => return Err(err.into()),
                };
                let age = self.elapsed_since(modified);
                if age > self.stale_after {
                    internal!(
                        level = WARN,
                        "Breaking unreadable lock {} ({reason}), age {age:?}",
                        self.path.display()
                    );
                    true
                } else {
                    false
                }
            }
        };

        if !stale {
            return Ok(false);
        }

        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(err) => Err(err.into()),
        }
    }

    /// Release the lock if we still own it
    ///
    /// Calling this without holding the lock is a no-op. If the lock was
    /// broken and taken by someone else in the meantime, their file is left
    /// alone.
    pub async fn release(&self) -> Result<(), LockError> {
        if !self.held.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        match self.read_owner().await? {
            Some(Ok(owner)) if owner.same_identity(&self.owner) => {
                match fs::remove_file(&self.path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
                internal!(level = DEBUG, "Released lock {}", self.path.display());
            }
            Some(Ok(owner)) => {
                internal!(
                    level = WARN,
                    "Lock {} is now held by {owner}, leaving it in place",
                    self.path.display()
                );
            }
            Some(Err(reason)) => {
                internal!(
                    level = WARN,
                    "Lock {} is unreadable ({reason}), leaving it in place",
                    self.path.display()
                );
            }
            None => {
                internal!(
                    level = WARN,
                    "Lock {} disappeared while held",
                    self.path.display()
                );
            }
        }

        Ok(())
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        if !self.held.swap(false, Ordering::AcqRel) {
            return;
        }

        let ours = std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockOwner>(&bytes).ok())
            .is_some_and(|owner| owner.same_identity(&self.owner));

        if ours {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
