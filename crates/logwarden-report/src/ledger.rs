//! Durable record of the last successful send per report frequency
//!
//! The ledger is a small JSON file that survives restarts. Each frequency has
//! its own lock; holding it across the whole check, generate, send and record
//! sequence is what keeps two triggers from both sending.
//!
//! The locks are advisory `flock`s on sidecar files next to the ledger, so a
//! `logwarden report` run in another process contends with the daemon.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use logwarden_types::{Frequency, SendRecord};

use crate::error::Result;

/// On-disk layout
#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    records: Vec<SendRecord>,
}

impl LedgerFile {
    fn get(&self, frequency: Frequency) -> Option<&SendRecord> {
        self.records.iter().find(|r| r.frequency == frequency)
    }

    fn set(&mut self, frequency: Frequency, last_sent_at: DateTime<Utc>) {
        self.records.retain(|r| r.frequency != frequency);
        self.records.push(SendRecord {
            frequency,
            last_sent_at,
        });
    }
}

pub struct SendLedger {
    path: PathBuf,
    locks: [Mutex<()>; 4],
    /// Serializes read-modify-write of the file across frequencies
    file_lock: Mutex<()>,
    windows: [Duration; 4],
}

fn slot(frequency: Frequency) -> usize {
    match frequency {
        Frequency::Hourly => 0,
        Frequency::Daily => 1,
        Frequency::Weekly => 2,
        Frequency::Monthly => 3,
    }
}

impl SendLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            locks: Default::default(),
            file_lock: Mutex::new(()),
            windows: Frequency::ALL.map(|f| f.refractory_window()),
        }
    }

    /// Override the refractory window of one frequency
    pub fn with_refractory_window(mut self, frequency: Frequency, window: Duration) -> Self {
        self.windows[slot(frequency)] = window;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn refractory_window(&self, frequency: Frequency) -> Duration {
        self.windows[slot(frequency)]
    }

    /// Take the lock for one frequency. Other callers for the same frequency,
    /// in this process or another one, wait until the guard is dropped.
    pub async fn lock(&self, frequency: Frequency) -> Result<LedgerGuard<'_>> {
        let held = self.locks[slot(frequency)].lock().await;
        let file_lock = FileLock::acquire(self.lock_path(Some(frequency))).await?;
        Ok(LedgerGuard {
            ledger: self,
            frequency,
            _file_lock: file_lock,
            _held: held,
        })
    }

    /// `<ledger>.<frequency>.lock` per frequency, `<ledger>.lock` for writes
    fn lock_path(&self, frequency: Option<Frequency>) -> PathBuf {
        match frequency {
            Some(frequency) => self.path.with_extension(format!("{}.lock", frequency)),
            None => self.path.with_extension("lock"),
        }
    }

    /// Unlocked read, for display
    pub async fn last_sent(&self, frequency: Frequency) -> Option<SendRecord> {
        self.load().await.get(frequency).cloned()
    }

    /// A missing or unreadable file counts as "never sent"
    async fn load(&self) -> LedgerFile {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LedgerFile::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to read send ledger");
                return LedgerFile::default();
            }
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "send ledger is corrupt; ignoring it");
            LedgerFile::default()
        })
    }

    /// Write through a temp file and rename, so a crash never leaves a torn file
    async fn save(&self, file: &LedgerFile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(file)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// Exclusive `flock` on a lock file, released on drop.
///
/// The lock file itself is never removed, so every process locks the same inode.
struct FileLock {
    file: std::fs::File,
}

impl FileLock {
    async fn acquire(path: PathBuf) -> Result<Self> {
        let lock = tokio::task::spawn_blocking(move || Self::acquire_blocking(&path))
            .await
            .map_err(std::io::Error::other)??;
        Ok(lock)
    }

    fn acquire_blocking(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            loop {
                // Blocks until no other descriptor holds the lock
                let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
                if result == 0 {
                    break;
                }
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }

        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }
}

/// Exclusive access to one frequency's send record
pub struct LedgerGuard<'a> {
    ledger: &'a SendLedger,
    frequency: Frequency,
    _file_lock: FileLock,
    _held: MutexGuard<'a, ()>,
}

impl LedgerGuard<'_> {
    pub async fn last_sent(&self) -> Option<SendRecord> {
        self.ledger.last_sent(self.frequency).await
    }

    /// Whether a send at `now` would fall inside the refractory window
    pub async fn is_refractory(&self, now: DateTime<Utc>) -> bool {
        match self.last_sent().await {
            Some(record) => {
                now.signed_duration_since(record.last_sent_at)
                    < self.ledger.refractory_window(self.frequency)
            }
            None => false,
        }
    }

    /// Persist a successful send
    pub async fn record(&self, now: DateTime<Utc>) -> Result<()> {
        let _file = self.ledger.file_lock.lock().await;
        let _shared = FileLock::acquire(self.ledger.lock_path(None)).await?;
        let mut file = self.ledger.load().await;
        file.set(self.frequency, now);
        self.ledger.save(&file).await?;
        debug!(frequency = %self.frequency, at = %now, "send recorded");
        Ok(())
    }
}
