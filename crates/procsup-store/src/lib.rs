//! SQLite-backed persistence for per-process, per-stream output.
//!
//! Each registered process gets its own directory under the store's root
//! containing a single SQLite database (`process_output.db`) with one table
//! per stream. Writers and readers for distinct (pid, stream) pairs never
//! block each other; within a pair, access is serialized through a small
//! async mutex so concurrent writers can't interleave statements against the
//! same connection.

mod grep;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, TimeZone, Utc};
use procsup_core::{OutputEntry, ProcError, ProcessId, StreamKey};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use grep::GrepMode;

/// Options accepted by [`Store::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub tail: Option<usize>,
    pub grep: Option<String>,
    pub grep_mode: GrepMode,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("output store is shutting down")]
    ShuttingDown,
    #[error("process {0} not found")]
    ProcessNotFound(ProcessId),
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("invalid grep pattern: {0}")]
    InvalidPattern(String),
}

impl StoreError {
    /// Maps a store-level error onto the workspace-wide `ProcError`,
    /// filling in the pid the caller was operating on (the store itself
    /// only knows the pid for `ProcessNotFound`).
    pub fn into_proc_error(self, pid: ProcessId) -> ProcError {
        match self {
            StoreError::ProcessNotFound(pid) => ProcError::ProcessNotFound(pid),
            StoreError::ShuttingDown => ProcError::Storage {
                pid,
                reason: "output store is shutting down".to_string(),
            },
            StoreError::Io(reason) => ProcError::OutputRetrieval { pid, reason },
            StoreError::InvalidPattern(reason) => ProcError::Validation(reason),
        }
    }
}

type StreamLock = Arc<Mutex<()>>;

/// Output Store: append-only, per-process/per-stream SQLite persistence.
pub struct Store {
    root: PathBuf,
    locks: StdMutex<HashMap<(ProcessId, StreamKey), StreamLock>>,
    known: StdMutex<std::collections::HashSet<ProcessId>>,
    shutting_down: AtomicBool,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Store {
            root: root.into(),
            locks: StdMutex::new(HashMap::new()),
            known: StdMutex::new(std::collections::HashSet::new()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Registers a process with the store, creating its directory. Called
    /// by the supervisor at spawn time, before the first `store` call.
    pub async fn register(&self, pid: &ProcessId) -> Result<(), StoreError> {
        self.ensure_not_shutting_down()?;
        let dir = self.process_dir(pid);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.known.lock().unwrap().insert(pid.clone());
        Ok(())
    }

    fn process_dir(&self, pid: &ProcessId) -> PathBuf {
        self.root.join(pid.as_str())
    }

    fn db_path(&self, pid: &ProcessId) -> PathBuf {
        self.process_dir(pid).join("process_output.db")
    }

    fn stream_lock(&self, pid: &ProcessId, stream: StreamKey) -> StreamLock {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((pid.clone(), stream))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn ensure_not_shutting_down(&self) -> Result<(), StoreError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            Err(StoreError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn ensure_known(&self, pid: &ProcessId) -> Result<(), StoreError> {
        if self.known.lock().unwrap().contains(pid) {
            Ok(())
        } else {
            Err(StoreError::ProcessNotFound(pid.clone()))
        }
    }

    /// Appends one line to a process's stream log. A no-op is not possible
    /// for a single line (see `store_many` for batches); fails fast once
    /// the store has begun shutting down.
    pub async fn store(
        &self,
        pid: &ProcessId,
        stream: StreamKey,
        text: impl Into<String>,
    ) -> Result<(), StoreError> {
        self.store_many(pid, stream, vec![text.into()]).await
    }

    /// Appends a batch of lines, stamping each with the current time. An
    /// empty batch is a no-op and never touches the database.
    pub async fn store_many(
        &self,
        pid: &ProcessId,
        stream: StreamKey,
        lines: Vec<String>,
    ) -> Result<(), StoreError> {
        if lines.is_empty() {
            return Ok(());
        }
        self.ensure_not_shutting_down()?;
        self.ensure_known(pid)?;

        let lock = self.stream_lock(pid, stream);
        let _guard = lock.lock().await;

        let db_path = self.db_path(pid);
        let table = stream.sanitized_table_name().to_string();
        let now = Utc::now();
        tokio::task::spawn_blocking(move || store_blocking(&db_path, &table, &lines, now))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))??;
        Ok(())
    }

    /// Retrieves entries for one stream, applying time filtering, then
    /// tail, then grep, in that order (spec'd as `tail_N(filter_grep(filter_time(S)))`
    /// in reverse application order: time filter first, grep next, tail last).
    pub async fn get(
        &self,
        pid: &ProcessId,
        stream: StreamKey,
        opts: GetOptions,
    ) -> Result<Vec<OutputEntry>, StoreError> {
        self.ensure_known(pid)?;

        let lock = self.stream_lock(pid, stream);
        let _guard = lock.lock().await;

        let db_path = self.db_path(pid);
        let table = stream.sanitized_table_name().to_string();
        let entries = tokio::task::spawn_blocking(move || {
            query_blocking(&db_path, &table, opts.since, opts.until)
        })
        .await
        .map_err(|e| StoreError::Io(e.to_string()))??;

        let filtered = match &opts.grep {
            Some(pattern) => grep::apply(&entries, pattern, opts.grep_mode)
                .map_err(StoreError::InvalidPattern)?,
            None => entries,
        };

        Ok(match opts.tail {
            Some(n) if n < filtered.len() => filtered[filtered.len() - n..].to_vec(),
            Some(_) => filtered,
            None => filtered,
        })
    }

    /// Deletes all stream data for a process and removes its directory.
    /// Idempotent: calling `clear` twice in a row is only an error the
    /// second time because the pid is no longer known.
    pub async fn clear(&self, pid: &ProcessId) -> Result<(), StoreError> {
        self.ensure_known(pid)?;

        let dir = self.process_dir(pid);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        self.known.lock().unwrap().remove(pid);
        self.locks
            .lock()
            .unwrap()
            .retain(|(known_pid, _), _| known_pid != pid);
        debug!(%pid, "cleared output store directory");
        Ok(())
    }

    /// Flushes and closes the store. After this, `store`/`store_many` fail
    /// with `ShuttingDown`; any now-empty per-process or root directories
    /// are removed as housekeeping.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let pids: Vec<ProcessId> = self.known.lock().unwrap().iter().cloned().collect();
        let mut last_err = None;
        for pid in pids {
            let dir = self.process_dir(&pid);
            if is_dir_empty(&dir).await {
                if let Err(e) = tokio::fs::remove_dir(&dir).await {
                    warn!(%pid, error = %e, "failed to remove empty process directory on shutdown");
                    last_err = Some(StoreError::Io(e.to_string()));
                }
            }
        }
        if is_dir_empty(&self.root).await {
            let _ = tokio::fs::remove_dir(&self.root).await;
        }
        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn is_dir_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => entries.next_entry().await.ok().flatten().is_none(),
        Err(_) => false,
    }
}

fn store_blocking(
    db_path: &Path,
    table: &str,
    lines: &[String],
    timestamp: DateTime<Utc>,
) -> Result<(), StoreError> {
    let conn = Connection::open(db_path).map_err(|e| StoreError::Io(e.to_string()))?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (timestamp REAL NOT NULL, text TEXT NOT NULL)"
    ))
    .map_err(|e| StoreError::Io(e.to_string()))?;

    let ts = timestamp.timestamp() as f64 + timestamp.timestamp_subsec_nanos() as f64 / 1e9;
    let mut stmt = conn
        .prepare(&format!("INSERT INTO {table} (timestamp, text) VALUES (?1, ?2)"))
        .map_err(|e| StoreError::Io(e.to_string()))?;
    for line in lines {
        stmt.execute(rusqlite::params![ts, line])
            .map_err(|e| StoreError::Io(e.to_string()))?;
    }
    Ok(())
}

fn query_blocking(
    db_path: &Path,
    table: &str,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<Vec<OutputEntry>, StoreError> {
    if !db_path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open(db_path).map_err(|e| StoreError::Io(e.to_string()))?;

    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?1",
            rusqlite::params![table],
            |row| row.get::<_, i64>(0),
        )
        .map_err(|e| StoreError::Io(e.to_string()))?
        > 0;
    if !table_exists {
        return Ok(Vec::new());
    }

    let since_ts = since
        .map(|d| d.timestamp() as f64 + d.timestamp_subsec_nanos() as f64 / 1e9)
        .unwrap_or(f64::MIN);
    let until_ts = until
        .map(|d| d.timestamp() as f64 + d.timestamp_subsec_nanos() as f64 / 1e9)
        .unwrap_or(f64::MAX);

    let sql = format!(
        "SELECT timestamp, text FROM {table} WHERE timestamp >= ?1 AND timestamp <= ?2 ORDER BY timestamp ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| StoreError::Io(e.to_string()))?;
    let rows = stmt
        .query_map(rusqlite::params![since_ts, until_ts], |row| {
            let ts: f64 = row.get(0)?;
            let text: String = row.get(1)?;
            Ok((ts, text))
        })
        .map_err(|e| StoreError::Io(e.to_string()))?;

    let mut entries = Vec::new();
    for row in rows {
        let (ts, text) = row.map_err(|e| StoreError::Io(e.to_string()))?;
        let secs = ts.trunc() as i64;
        let nanos = ((ts.fract()) * 1e9).round() as u32;
        let timestamp = Utc
            .timestamp_opt(secs, nanos)
            .single()
            .unwrap_or_else(Utc::now);
        entries.push(OutputEntry { timestamp, text });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ProcessId {
        ProcessId::try_from(s).unwrap()
    }

    #[tokio::test]
    async fn store_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("aaaa1");
        store.register(&p).await.unwrap();
        store.store(&p, StreamKey::Stdout, "hello").await.unwrap();
        store.store(&p, StreamKey::Stdout, "world").await.unwrap();

        let entries = store
            .get(&p, StreamKey::Stdout, GetOptions::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "hello");
        assert_eq!(entries[1].text, "world");
    }

    #[tokio::test]
    async fn get_unknown_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("bbbb2");
        let err = store
            .get(&p, StreamKey::Stdout, GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn empty_stream_yields_zero_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("ccccc");
        store.register(&p).await.unwrap();
        let entries = store
            .get(&p, StreamKey::Stderr, GetOptions::default())
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn tail_returns_last_n_after_time_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("dddd4");
        store.register(&p).await.unwrap();
        for i in 0..5 {
            store
                .store(&p, StreamKey::Manager, format!("line{i}"))
                .await
                .unwrap();
        }
        let opts = GetOptions {
            tail: Some(2),
            ..Default::default()
        };
        let entries = store.get(&p, StreamKey::Manager, opts).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "line3");
        assert_eq!(entries[1].text, "line4");
    }

    #[tokio::test]
    async fn tail_zero_returns_no_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("eeeee");
        store.register(&p).await.unwrap();
        store.store(&p, StreamKey::Stdout, "only").await.unwrap();
        let opts = GetOptions {
            tail: Some(0),
            ..Default::default()
        };
        let entries = store.get(&p, StreamKey::Stdout, opts).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn clear_then_get_is_process_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("fffff");
        store.register(&p).await.unwrap();
        store.store(&p, StreamKey::Stdout, "x").await.unwrap();
        store.clear(&p).await.unwrap();
        assert!(!dir.path().join(p.as_str()).exists());
        let err = store
            .get(&p, StreamKey::Stdout, GetOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProcessNotFound(_)));
    }

    #[tokio::test]
    async fn distinct_streams_dont_block_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path()));
        let p = pid("gggg7");
        store.register(&p).await.unwrap();

        let s1 = store.clone();
        let p1 = p.clone();
        let h1 = tokio::spawn(async move {
            for i in 0..20 {
                s1.store(&p1, StreamKey::Stdout, format!("out{i}"))
                    .await
                    .unwrap();
            }
        });
        let s2 = store.clone();
        let p2 = p.clone();
        let h2 = tokio::spawn(async move {
            for i in 0..20 {
                s2.store(&p2, StreamKey::Stderr, format!("err{i}"))
                    .await
                    .unwrap();
            }
        });
        h1.await.unwrap();
        h2.await.unwrap();

        let out = store
            .get(&p, StreamKey::Stdout, GetOptions::default())
            .await
            .unwrap();
        let err = store
            .get(&p, StreamKey::Stderr, GetOptions::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 20);
        assert_eq!(err.len(), 20);
    }

    #[tokio::test]
    async fn store_after_shutdown_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let p = pid("hhhhh");
        store.register(&p).await.unwrap();
        store.shutdown().await.unwrap();
        let err = store.store(&p, StreamKey::Stdout, "x").await.unwrap_err();
        assert!(matches!(err, StoreError::ShuttingDown));
    }
}
