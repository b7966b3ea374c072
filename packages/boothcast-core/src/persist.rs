//! Persistence layer: durable artifacts and crash recovery for one game.
//!
//! Every write goes through write-temp + atomic rename, so readers observe
//! either the previous version or a complete new one, never a torn file.
//! Layout per game:
//!
//! ```text
//! <root>/<game_id>/
//!   static.json
//!   board/latest.json
//!   board/history/<game_time>.json
//!   analyze/<game_time>.json
//!   narrate/<game_time>.json
//!   audio/<game_time>/<nn>_<speaker>_<emotion>.wav
//!   audio/<game_time>/manifest.json
//!   watermark.json
//!   poison/<original file name>
//! ```
//!
//! Files are small (boards are a few KB, audio segments a few hundred KB);
//! writes happen on the reducer/publisher paths where a short synchronous
//! write is acceptable.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::board::Board;
use crate::game::roster::StaticContext;
use crate::game::snapshot::GameId;
use crate::game::time::GameTime;
use crate::stages::{Analysis, AudioSegment, NarrationBatch};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("decode failed at {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

type Result<T> = std::result::Result<T, PersistError>;

/// Exactly-once emission watermark: the greatest game time already
/// broadcast (outputs and skip markers both advance it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Watermark {
    pub last_emitted: Option<GameTime>,
}

impl Watermark {
    /// Whether a game time is already covered by this watermark.
    #[must_use]
    pub fn covers(&self, game_time: GameTime) -> bool {
        self.last_emitted.is_some_and(|w| game_time <= w)
    }

    /// Advances the watermark (never backwards).
    pub fn advance(&mut self, game_time: GameTime) {
        if !self.covers(game_time) {
            self.last_emitted = Some(game_time);
        }
    }
}

/// Audio manifest entry: one rendered segment file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub speaker: String,
    pub emotion: String,
    pub duration_seconds: f32,
}

/// Per-snapshot audio manifest, written next to the segment files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioManifest {
    pub game_time: GameTime,
    pub segments: Vec<ManifestEntry>,
}

/// Durable artifact store for one game.
pub struct GameStore {
    game_id: GameId,
    dir: PathBuf,
}

impl GameStore {
    /// Opens (creating directories as needed) the store for one game.
    pub fn open(data_root: &Path, game_id: &GameId) -> Result<Self> {
        let dir = data_root.join(game_id.as_str());
        for sub in ["board/history", "analyze", "narrate", "audio", "poison"] {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path).map_err(|source| PersistError::Io { path, source })?;
        }
        Ok(Self {
            game_id: game_id.clone(),
            dir,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Static context
    // ─────────────────────────────────────────────────────────────────────────

    pub fn save_static(&self, ctx: &StaticContext) -> Result<()> {
        self.write_json(&self.dir.join("static.json"), ctx)
    }

    pub fn load_static(&self) -> Result<Option<StaticContext>> {
        self.read_json(&self.dir.join("static.json"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Board
    // ─────────────────────────────────────────────────────────────────────────

    /// Persists the Board after a successful reduce: `latest.json` plus a
    /// history entry keyed by the reduced game time.
    pub fn save_board(&self, board: &Board) -> Result<()> {
        self.write_json(&self.dir.join("board/latest.json"), board)?;
        if let Some(time) = board.last_game_time {
            self.write_json(
                &self
                    .dir
                    .join(format!("board/history/{}.json", time.file_key())),
                board,
            )?;
        }
        Ok(())
    }

    pub fn load_board(&self) -> Result<Option<Board>> {
        self.read_json(&self.dir.join("board/latest.json"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stage artifacts
    // ─────────────────────────────────────────────────────────────────────────

    pub fn save_analysis(&self, game_time: GameTime, analysis: &Analysis) -> Result<()> {
        self.write_json(
            &self.dir.join(format!("analyze/{}.json", game_time.file_key())),
            analysis,
        )
    }

    pub fn save_narration(&self, game_time: GameTime, batch: &NarrationBatch) -> Result<()> {
        self.write_json(
            &self.dir.join(format!("narrate/{}.json", game_time.file_key())),
            batch,
        )
    }

    /// Writes the rendered WAV files and the manifest listing them.
    pub fn save_audio(&self, game_time: GameTime, segments: &[AudioSegment]) -> Result<()> {
        let dir = self.dir.join(format!("audio/{}", game_time.file_key()));
        std::fs::create_dir_all(&dir).map_err(|source| PersistError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut manifest = AudioManifest {
            game_time,
            segments: Vec::with_capacity(segments.len()),
        };
        for segment in segments {
            let file = format!(
                "{:02}_{}_{}.wav",
                segment.index,
                segment.speaker.as_str(),
                segment.emotion.as_str()
            );
            self.write_bytes(&dir.join(&file), &segment.wav)?;
            manifest.segments.push(ManifestEntry {
                file,
                speaker: segment.speaker.as_str().to_string(),
                emotion: segment.emotion.as_str().to_string(),
                duration_seconds: segment.duration_seconds,
            });
        }
        self.write_json(&dir.join("manifest.json"), &manifest)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Watermark & recovery
    // ─────────────────────────────────────────────────────────────────────────

    pub fn save_watermark(&self, watermark: &Watermark) -> Result<()> {
        self.write_json(&self.dir.join("watermark.json"), watermark)
    }

    pub fn load_watermark(&self) -> Result<Option<Watermark>> {
        self.read_json(&self.dir.join("watermark.json"))
    }

    /// Moves a poison snapshot file into quarantine so it is never re-read.
    pub fn quarantine(&self, snapshot_path: &Path) -> Result<PathBuf> {
        let name = snapshot_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let target = self.dir.join("poison").join(name);
        std::fs::rename(snapshot_path, &target).map_err(|source| PersistError::Io {
            path: snapshot_path.to_path_buf(),
            source,
        })?;
        log::warn!(
            "[Persist] {}: quarantined poison snapshot at {}",
            self.game_id,
            target.display()
        );
        Ok(target)
    }

    /// Removes stage artifacts newer than the watermark.
    ///
    /// Artifacts at or before the watermark were fully emitted and stay;
    /// anything newer is a partial write from before the crash and will be
    /// regenerated when the snapshot replays.
    pub fn discard_after(&self, watermark: &Watermark) -> Result<usize> {
        let mut removed = 0;
        for sub in ["analyze", "narrate", "audio", "board/history"] {
            let dir = self.dir.join(sub);
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            for entry in entries.flatten() {
                let Some(time) = artifact_time(&entry.path()) else {
                    continue;
                };
                if watermark.covers(time) {
                    continue;
                }
                let path = entry.path();
                let result = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                match result {
                    Ok(()) => removed += 1,
                    Err(source) => return Err(PersistError::Io { path, source }),
                }
            }
        }
        if removed > 0 {
            log::info!(
                "[Persist] {}: discarded {} partial artifact(s) past the watermark",
                self.game_id,
                removed
            );
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Atomic write helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(path, &bytes)
    }

    fn write_bytes(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes).map_err(|source| PersistError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| PersistError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PersistError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PersistError::Decode {
                path: path.to_path_buf(),
                source,
            })
    }
}

/// Recovers the game time encoded in an artifact path
/// (`<period>_<mm>_<ss>` stem, file or directory).
fn artifact_time(path: &Path) -> Option<GameTime> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('_');
    let period: u8 = parts.next()?.parse().ok()?;
    let minute: u8 = parts.next()?.parse().ok()?;
    let second: u8 = parts.next()?.parse().ok()?;
    parts.next().is_none().then(|| GameTime::new(period, minute, second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::build_wav;
    use crate::game::roster::fixtures::edm_at_fla;
    use crate::stages::{
        CommentaryKind, Emotion, Speaker,
    };

    fn store(root: &Path) -> GameStore {
        GameStore::open(root, &GameId::from("GAME")).unwrap()
    }

    #[test]
    fn board_round_trips_via_latest() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);
        board.last_game_time = Some(GameTime::new(1, 5, 30));

        store.save_board(&board).unwrap();
        let loaded = store.load_board().unwrap().unwrap();
        assert_eq!(loaded, board);

        // History entry keyed by the reduced time exists too.
        assert!(store.dir().join("board/history/1_05_30.json").is_file());
    }

    #[test]
    fn missing_files_load_as_none() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        assert!(store.load_board().unwrap().is_none());
        assert!(store.load_watermark().unwrap().is_none());
        assert!(store.load_static().unwrap().is_none());
    }

    #[test]
    fn watermark_only_advances() {
        let mut watermark = Watermark::default();
        watermark.advance(GameTime::new(1, 5, 0));
        watermark.advance(GameTime::new(1, 2, 0));
        assert_eq!(watermark.last_emitted, Some(GameTime::new(1, 5, 0)));
        assert!(watermark.covers(GameTime::new(1, 5, 0)));
        assert!(!watermark.covers(GameTime::new(1, 5, 5)));
    }

    #[test]
    fn audio_writes_wavs_and_manifest() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        let time = GameTime::new(1, 5, 30);

        let segments = vec![AudioSegment {
            index: 0,
            speaker: Speaker::A,
            emotion: Emotion::Goal,
            duration_seconds: 1.0,
            wav: build_wav(&vec![0u8; 48_000]),
        }];
        store.save_audio(time, &segments).unwrap();

        let wav_path = store.dir().join("audio/1_05_30/00_A_goal.wav");
        assert!(wav_path.is_file());
        let manifest: AudioManifest = serde_json::from_slice(
            &std::fs::read(store.dir().join("audio/1_05_30/manifest.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(manifest.segments.len(), 1);
        assert_eq!(manifest.segments[0].file, "00_A_goal.wav");
    }

    #[test]
    fn discard_after_removes_only_newer_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        let analysis = Analysis {
            talking_points: vec![],
            momentum: 0.1,
            high_intensity_events: vec![],
        };
        let batch = NarrationBatch {
            kind: CommentaryKind::Filler,
            segments: vec![],
        };

        store.save_analysis(GameTime::new(1, 0, 5), &analysis).unwrap();
        store.save_analysis(GameTime::new(1, 0, 15), &analysis).unwrap();
        store.save_narration(GameTime::new(1, 0, 15), &batch).unwrap();

        let watermark = Watermark {
            last_emitted: Some(GameTime::new(1, 0, 5)),
        };
        let removed = store.discard_after(&watermark).unwrap();

        assert_eq!(removed, 2);
        assert!(store.dir().join("analyze/1_00_05.json").is_file());
        assert!(!store.dir().join("analyze/1_00_15.json").exists());
        assert!(!store.dir().join("narrate/1_00_15.json").exists());
    }

    #[test]
    fn quarantine_moves_the_file() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());

        let poison = root.path().join("GAME_1_00_05.json");
        std::fs::write(&poison, b"{broken").unwrap();

        let target = store.quarantine(&poison).unwrap();
        assert!(!poison.exists());
        assert!(target.is_file());
        assert!(target.starts_with(store.dir().join("poison")));
    }

    #[test]
    fn writes_are_atomic_over_existing_files() {
        let root = tempfile::tempdir().unwrap();
        let store = store(root.path());
        let ctx = edm_at_fla();

        store.save_static(&ctx).unwrap();
        store.save_static(&ctx).unwrap();
        // No stray temp file left behind.
        assert!(!store.dir().join("static.tmp").exists());
        assert_eq!(store.load_static().unwrap().unwrap(), ctx);
    }
}
