use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logwarden_backends::WorkQueue;
use logwarden_types::LogEvent;

use crate::filter::KeywordFilter;

/// Read position of one tailed file. Owned by that file's task alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TailState {
    pub path: PathBuf,
    pub byte_offset: u64,
}

impl TailState {
    /// Start at the current end of the file, so only new content is seen
    pub async fn at_end(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let byte_offset = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, byte_offset })
    }

    /// Read the bytes appended since the last successful read.
    ///
    /// The offset only moves once the whole range has been read, so a failed
    /// read is retried from the same place on the next call. A file that
    /// shrank below the offset is treated as truncated and read from the start.
    pub async fn read_new(&mut self) -> std::io::Result<Option<String>> {
        let size = tokio::fs::metadata(&self.path).await?.len();
        if size < self.byte_offset {
            warn!(
                path = %self.path.display(),
                previous_offset = self.byte_offset,
                current_size = size,
                "file truncated or rotated; reading from the start"
            );
            self.byte_offset = 0;
        }
        if size == self.byte_offset {
            return Ok(None);
        }

        let len = usize::try_from(size - self.byte_offset)
            .map_err(|_| std::io::Error::other("appended range too large"))?;
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.byte_offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;

        self.byte_offset = size;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Split a chunk into lines and keep the ones the filter accepts
pub fn qualifying_lines(chunk: &str, filter: &KeywordFilter) -> Vec<String> {
    chunk
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| filter.matches(line))
        .map(str::to_string)
        .collect()
}

/// A tailed file plus where its events go
pub struct TailedFile {
    state: TailState,
    filter: Arc<KeywordFilter>,
    queue: Arc<dyn WorkQueue>,
    queue_name: String,
}

impl TailedFile {
    pub fn new(
        state: TailState,
        filter: Arc<KeywordFilter>,
        queue: Arc<dyn WorkQueue>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            state,
            filter,
            queue,
            queue_name: queue_name.into(),
        }
    }

    pub fn state(&self) -> &TailState {
        &self.state
    }

    /// Handle one change notification. Returns how many events were queued.
    pub async fn on_change(&mut self) -> usize {
        let chunk = match self.state.read_new().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return 0,
            Err(e) => {
                warn!(
                    path = %self.state.path.display(),
                    offset = self.state.byte_offset,
                    error = %e,
                    "failed to read appended bytes; will retry on next change"
                );
                return 0;
            }
        };

        let source = self.state.path.to_string_lossy().into_owned();
        let mut queued = 0;
        for line in qualifying_lines(&chunk, &self.filter) {
            let event = LogEvent::new(source.clone(), line);
            let payload = match serde_json::to_value(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(error = %e, "failed to encode log event; dropping");
                    continue;
                }
            };
            match self.queue.push(&self.queue_name, payload).await {
                Ok(()) => {
                    debug!(path = %source, line = %event.raw_line, "queued error line");
                    queued += 1;
                }
                Err(e) => {
                    warn!(path = %source, error = %e, "failed to push log event; dropping");
                }
            }
        }
        queued
    }
}

/// Manages one tailing task per source file
pub struct Tailer {
    /// Cancellation token for stopping tasks
    cancel: CancellationToken,

    /// Active task handles
    tasks: Vec<tokio::task::JoinHandle<()>>,

    /// Paths currently being watched
    watched: Vec<PathBuf>,
}

impl Tailer {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            watched: Vec::new(),
        }
    }

    /// Start tailing every source that exists. Missing files are skipped.
    /// Returns the number of files being watched.
    pub async fn start(
        &mut self,
        sources: &[PathBuf],
        filter: KeywordFilter,
        queue: Arc<dyn WorkQueue>,
        queue_name: &str,
    ) -> usize {
        let filter = Arc::new(filter);

        for path in sources {
            let state = match TailState::at_end(path).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "log source unavailable; skipping");
                    continue;
                }
            };

            let (change_tx, change_rx) = mpsc::unbounded_channel();
            let watcher = match watch_file(path, change_tx) {
                Ok(watcher) => watcher,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to watch log source; skipping");
                    continue;
                }
            };

            info!(path = %path.display(), offset = state.byte_offset, "tailing log source");
            let file = TailedFile::new(state, Arc::clone(&filter), Arc::clone(&queue), queue_name);
            self.tasks.push(self.spawn_file_task(file, watcher, change_rx));
            self.watched.push(path.clone());
        }

        self.watched.len()
    }

    fn spawn_file_task(
        &self,
        mut file: TailedFile,
        watcher: RecommendedWatcher,
        mut change_rx: mpsc::UnboundedReceiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            // Dropping the watcher ends notifications, so the task keeps it
            let _watcher = watcher;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,

                    change = change_rx.recv() => {
                        if change.is_none() {
                            break;
                        }
                        // Collapse a burst of notifications into one read
                        while change_rx.try_recv().is_ok() {}
                        file.on_change().await;
                    }
                }
            }
        })
    }

    /// Paths with an active task
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    /// Stop all tasks
    pub fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.watched.clear();
        self.cancel = CancellationToken::new();
    }
}

impl Default for Tailer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch_file(
    path: &Path,
    change_tx: mpsc::UnboundedSender<()>,
) -> notify::Result<RecommendedWatcher> {
    let watched = path.to_path_buf();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
            ) {
                let _ = change_tx.send(());
            }
        }
        Err(e) => warn!(path = %watched.display(), error = ?e, "watch error"),
    })?;
    watcher.watch(path, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_backends::{Database, SqliteQueue};
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_growth_emits_only_new_error_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslog");
        std::fs::write(&path, format!("{}\n", "x".repeat(99))).unwrap();

        let mut state = TailState::at_end(&path).await.unwrap();
        assert_eq!(state.byte_offset, 100);

        let growth = format!("kernel: ERROR disk failure\n{}\n", "a".repeat(52));
        assert_eq!(growth.len(), 80);
        append(&path, &growth);

        let chunk = state.read_new().await.unwrap().unwrap();
        let lines = qualifying_lines(&chunk, &KeywordFilter::default());
        assert_eq!(lines, vec!["kernel: ERROR disk failure"]);
        assert_eq!(state.byte_offset, 180);

        // Nothing new, nothing emitted
        assert_eq!(state.read_new().await.unwrap(), None);
        assert_eq!(state.byte_offset, 180);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kern.log");
        std::fs::write(&path, "start\n").unwrap();

        let mut state = TailState::at_end(&path).await.unwrap();
        append(&path, "usb: Failed to reset\n");
        std::fs::remove_file(&path).unwrap();

        assert!(state.read_new().await.is_err());
        assert_eq!(state.byte_offset, 6);
    }

    #[tokio::test]
    async fn test_failed_read_is_retried_from_same_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kern.log");
        let moved = dir.path().join("kern.log.moved");
        std::fs::write(&path, "start\n").unwrap();

        let mut state = TailState::at_end(&path).await.unwrap();
        append(&path, "usb: Failed to reset\n");

        std::fs::rename(&path, &moved).unwrap();
        assert!(state.read_new().await.is_err());
        assert_eq!(state.byte_offset, 6);

        std::fs::rename(&moved, &path).unwrap();
        let chunk = state.read_new().await.unwrap().unwrap();
        assert_eq!(chunk, "usb: Failed to reset\n");
        assert_eq!(state.byte_offset, 27);
    }

    #[tokio::test]
    async fn test_truncation_resets_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.log");
        std::fs::write(&path, "0123456789\n").unwrap();

        let mut state = TailState::at_end(&path).await.unwrap();
        std::fs::write(&path, "sshd: fail\n").unwrap();

        let chunk = state.read_new().await.unwrap().unwrap();
        assert_eq!(chunk, "sshd: fail\n");
        assert_eq!(state.byte_offset, 11);
    }

    #[test]
    fn test_qualifying_lines_skips_blank_and_clean() {
        let filter = KeywordFilter::default();
        let chunk = "ok line\r\n\nnet: Retry later\r\npartial error";
        assert_eq!(
            qualifying_lines(chunk, &filter),
            vec!["net: Retry later", "partial error"]
        );
    }

    #[tokio::test]
    async fn test_on_change_pushes_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslog");
        std::fs::write(&path, "").unwrap();

        let queue = Arc::new(SqliteQueue::new(Database::open_in_memory().unwrap()));
        let state = TailState::at_end(&path).await.unwrap();
        let mut file = TailedFile::new(
            state,
            Arc::new(KeywordFilter::default()),
            queue.clone(),
            "logs",
        );

        append(&path, "wifi: error: auth timeout\nall good\nbluetooth: Failed to pair device\n");
        assert_eq!(file.on_change().await, 2);
        assert_eq!(file.on_change().await, 0);

        let first = queue.blocking_pop("logs").await.unwrap().unwrap();
        let event: LogEvent = serde_json::from_value(first).unwrap();
        assert_eq!(event.raw_line, "wifi: error: auth timeout");
        assert_eq!(event.source_path, path.to_string_lossy());
        assert_eq!(queue.len("logs").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_start_skips_missing_sources() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(SqliteQueue::new(Database::open_in_memory().unwrap()));
        let mut tailer = Tailer::new();
        let watched = tailer
            .start(
                &[dir.path().join("does-not-exist.log")],
                KeywordFilter::default(),
                queue,
                "logs",
            )
            .await;
        assert_eq!(watched, 0);
        assert!(tailer.watched().is_empty());
    }

    #[tokio::test]
    async fn test_appended_line_reaches_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("syslog");
        std::fs::write(&path, "boot ok\n").unwrap();

        let queue = Arc::new(SqliteQueue::new(Database::open_in_memory().unwrap()));
        let mut tailer = Tailer::new();
        let watched = tailer
            .start(
                std::slice::from_ref(&path),
                KeywordFilter::default(),
                queue.clone(),
                "logs",
            )
            .await;
        assert_eq!(watched, 1);

        append(&path, "all quiet\nkernel: ERROR disk failure\n");

        let payload = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            queue.blocking_pop("logs"),
        )
        .await
        .expect("no event queued after append")
        .unwrap()
        .unwrap();
        let event: LogEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.raw_line, "kernel: ERROR disk failure");
        assert_eq!(event.source_path, path.to_string_lossy());

        tailer.stop();
        assert!(tailer.watched().is_empty());
    }
}
