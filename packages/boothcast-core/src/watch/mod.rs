//! Snapshot watcher: observes a per-game ingest directory and emits one
//! arrival per new snapshot file.
//!
//! Delivery is at-least-once; downstream dedup (processed event ids and the
//! emitted watermark) absorbs duplicates. A file's arrival is withheld until
//! its size is stable for a grace period, so half-written snapshots are
//! never parsed. Files that never stabilize within a bounded window are
//! logged and skipped so downstream cannot block on them.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::game::snapshot::GameId;
use crate::game::time::{parse_snapshot_filename, GameTime};
use crate::utils::now_millis;

/// Consecutive backend errors tolerated before the stream fails.
const MAX_CONSECUTIVE_BACKEND_ERRORS: u32 = 5;

/// One new snapshot file, ready to read.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotArrival {
    pub game_id: GameId,
    pub game_time: GameTime,
    pub path: PathBuf,
    /// Unix millis when the arrival was observed.
    pub wall_time: u64,
}

/// Errors that end the watch stream.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The notify backend failed repeatedly.
    #[error("watch backend failed: {0}")]
    Backend(String),

    /// The per-game ingest directory does not exist.
    #[error("ingest directory missing: {0}")]
    IngestDirMissing(PathBuf),
}

/// Tuning for the stable-size check.
#[derive(Debug, Clone, Copy)]
pub struct WatchTuning {
    /// A file whose size is unchanged across this window is considered
    /// fully written.
    pub grace: Duration,
    /// Bound on waiting for a file to stabilize before skipping it.
    pub stabilize_timeout: Duration,
}

impl Default for WatchTuning {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(250),
            stabilize_timeout: Duration::from_secs(5),
        }
    }
}

enum RawEvent {
    Candidate(PathBuf),
    BackendError(String),
}

/// Starts watching `dir` for snapshots of `game_id`.
///
/// Existing directory contents are emitted first (in game-time order), then
/// the tail of new files as the producer writes them. The stream ends when
/// `cancel` fires or the backend fails persistently; it is not restartable -
/// a new watch starts again from current contents plus a tail.
pub fn watch(
    dir: PathBuf,
    game_id: GameId,
    tuning: WatchTuning,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<SnapshotArrival>, WatchError> {
    if !dir.is_dir() {
        return Err(WatchError::IngestDirMissing(dir));
    }

    let (raw_tx, raw_rx) = mpsc::channel::<RawEvent>(256);
    let (out_tx, out_rx) = mpsc::channel::<SnapshotArrival>(64);

    // The notify callback runs on the backend's own thread; blocking_send is
    // the correct bridge into the async side.
    let handler_tx = raw_tx.clone();
    let watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    for path in event.paths {
                        let _ = handler_tx.blocking_send(RawEvent::Candidate(path));
                    }
                }
            }
            Err(e) => {
                let _ = handler_tx.blocking_send(RawEvent::BackendError(e.to_string()));
            }
        }
    })
    .map_err(|e| WatchError::Backend(e.to_string()))?;

    tokio::spawn(watch_loop(
        dir, game_id, tuning, cancel, watcher, raw_rx, out_tx,
    ));

    Ok(out_rx)
}

async fn watch_loop(
    dir: PathBuf,
    game_id: GameId,
    tuning: WatchTuning,
    cancel: CancellationToken,
    mut watcher: notify::RecommendedWatcher,
    mut raw_rx: mpsc::Receiver<RawEvent>,
    out_tx: mpsc::Sender<SnapshotArrival>,
) {
    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        log::error!("[Watcher] {}: cannot watch {}: {}", game_id, dir.display(), e);
        return;
    }

    let mut emitted: HashSet<PathBuf> = HashSet::new();

    // Initial scan: everything already on disk, in game-time order.
    let mut existing = scan_dir(&dir, &game_id);
    existing.sort_by_key(|(time, _)| *time);
    for (time, path) in existing {
        if cancel.is_cancelled() {
            return;
        }
        emit_when_stable(&game_id, time, &path, &tuning, &out_tx, &mut emitted).await;
    }

    log::info!(
        "[Watcher] {}: tailing {} ({} files already present)",
        game_id,
        dir.display(),
        emitted.len()
    );

    let mut backend_errors: u32 = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                log::info!("[Watcher] {}: cancelled", game_id);
                return;
            }
            raw = raw_rx.recv() => {
                let Some(raw) = raw else { return };
                match raw {
                    RawEvent::Candidate(path) => {
                        backend_errors = 0;
                        let Some(time) = arrival_time(&path, &game_id) else { continue };
                        if emitted.contains(&path) {
                            continue;
                        }
                        emit_when_stable(&game_id, time, &path, &tuning, &out_tx, &mut emitted)
                            .await;
                    }
                    RawEvent::BackendError(msg) => {
                        backend_errors += 1;
                        log::warn!(
                            "[Watcher] {}: backend error ({}/{}): {}",
                            game_id, backend_errors, MAX_CONSECUTIVE_BACKEND_ERRORS, msg
                        );
                        if backend_errors >= MAX_CONSECUTIVE_BACKEND_ERRORS {
                            log::error!("[Watcher] {}: backend failed persistently, ending stream", game_id);
                            return;
                        }
                        // Exponential backoff before trusting the backend again.
                        let delay = Duration::from_millis(100 << backend_errors.min(6));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

/// Parses a candidate path, warning on names that don't match the snapshot
/// convention or belong to a different game.
fn arrival_time(path: &Path, game_id: &GameId) -> Option<GameTime> {
    let name = path.file_name()?.to_str()?;
    // Writers using temp-then-rename produce .tmp siblings; not worth a warning.
    if name.ends_with(".tmp") || name.starts_with('.') {
        return None;
    }
    match parse_snapshot_filename(name) {
        Some((id, time)) if id == game_id.as_str() => Some(time),
        Some((id, _)) => {
            log::warn!(
                "[Watcher] {}: ignoring snapshot for other game '{}': {}",
                game_id,
                id,
                name
            );
            None
        }
        None => {
            log::warn!("[Watcher] {}: unparseable snapshot name: {}", game_id, name);
            None
        }
    }
}

fn scan_dir(dir: &Path, game_id: &GameId) -> Vec<(GameTime, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| arrival_time(&e.path(), game_id).map(|t| (t, e.path())))
        .collect()
}

/// Waits for the file size to hold still across the grace window, then
/// emits the arrival. Gives up after the stabilize timeout.
async fn emit_when_stable(
    game_id: &GameId,
    game_time: GameTime,
    path: &Path,
    tuning: &WatchTuning,
    out_tx: &mpsc::Sender<SnapshotArrival>,
    emitted: &mut HashSet<PathBuf>,
) {
    let deadline = tokio::time::Instant::now() + tuning.stabilize_timeout;
    let mut last_len: Option<u64> = None;

    loop {
        let len = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                // Renamed away or deleted mid-check; nothing to deliver.
                log::debug!("[Watcher] {}: stat {} failed: {}", game_id, path.display(), e);
                return;
            }
        };

        if last_len == Some(len) && len > 0 {
            break;
        }
        last_len = Some(len);

        if tokio::time::Instant::now() >= deadline {
            log::warn!(
                "[Watcher] {}: {} never stabilized within {:?}, skipping",
                game_id,
                path.display(),
                tuning.stabilize_timeout
            );
            return;
        }
        tokio::time::sleep(tuning.grace).await;
    }

    emitted.insert(path.to_path_buf());
    let arrival = SnapshotArrival {
        game_id: game_id.clone(),
        game_time,
        path: path.to_path_buf(),
        wall_time: now_millis(),
    };
    log::debug!("[Watcher] {}: snapshot {} arrived", game_id, game_time);
    if out_tx.send(arrival).await.is_err() {
        log::debug!("[Watcher] {}: arrival receiver gone", game_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tuning() -> WatchTuning {
        WatchTuning {
            grace: Duration::from_millis(30),
            stabilize_timeout: Duration::from_millis(500),
        }
    }

    async fn next_arrival(rx: &mut mpsc::Receiver<SnapshotArrival>) -> SnapshotArrival {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for arrival")
            .expect("watch stream ended")
    }

    #[tokio::test]
    async fn existing_files_are_emitted_in_game_time_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("GAME_1_00_10.json"), b"{\"later\":1}").unwrap();
        std::fs::write(dir.path().join("GAME_1_00_05.json"), b"{\"earlier\":1}").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = watch(
            dir.path().to_path_buf(),
            GameId::from("GAME"),
            tuning(),
            cancel.clone(),
        )
        .unwrap();

        let first = next_arrival(&mut rx).await;
        let second = next_arrival(&mut rx).await;
        assert_eq!(first.game_time, GameTime::new(1, 0, 5));
        assert_eq!(second.game_time, GameTime::new(1, 0, 10));

        cancel.cancel();
    }

    #[tokio::test]
    async fn new_file_is_emitted_after_stabilizing() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut rx = watch(
            dir.path().to_path_buf(),
            GameId::from("GAME"),
            tuning(),
            cancel.clone(),
        )
        .unwrap();

        // Give the backend a moment to arm before writing.
        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(dir.path().join("GAME_1_00_15.json"), b"{\"x\":1}").unwrap();

        let arrival = next_arrival(&mut rx).await;
        assert_eq!(arrival.game_time, GameTime::new(1, 0, 15));
        assert!(arrival.path.ends_with("GAME_1_00_15.json"));

        cancel.cancel();
    }

    #[tokio::test]
    async fn unparseable_names_are_skipped_and_stream_continues() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a snapshot").unwrap();
        std::fs::write(dir.path().join("GAME_1_00_05.json"), b"{}").unwrap();

        let cancel = CancellationToken::new();
        let mut rx = watch(
            dir.path().to_path_buf(),
            GameId::from("GAME"),
            tuning(),
            cancel.clone(),
        )
        .unwrap();

        let arrival = next_arrival(&mut rx).await;
        assert_eq!(arrival.game_time, GameTime::new(1, 0, 5));

        cancel.cancel();
    }

    #[tokio::test]
    async fn missing_dir_is_an_error() {
        let cancel = CancellationToken::new();
        let result = watch(
            PathBuf::from("/nonexistent/boothcast-ingest"),
            GameId::from("GAME"),
            tuning(),
            cancel,
        );
        assert!(matches!(result, Err(WatchError::IngestDirMissing(_))));
    }
}
