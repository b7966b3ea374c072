//! Per-game pipeline: the actor topology that turns snapshot files into
//! ordered broadcast output.
//!
//! ```text
//! watcher ──> reducer (single writer over the Board)
//!                │ expect(game_time)            ┌> stage worker 0 ─┐
//!                ├──> bounded job channel ──────┼> stage worker 1 ─┼─> ordering actor
//!                │                              └> stage worker 2 ─┘        │
//!                └─ persists board, refreshes sessions                      v
//!                                                            publisher (hub + watermark)
//! ```
//!
//! Only the reducer mutates the Board; stage workers read an immutable
//! projection taken at reduce time. Stages run sequentially within one
//! snapshot and concurrently across snapshots (the worker pool); the
//! ordering actor restores strict game-time order before anything reaches
//! subscribers.

pub mod ordering;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::agent::context::ContextManager;
use crate::agent::session::{RefreshPolicy, SessionManager};
use crate::agent::{CollaboratorError, LlmClient, TtsClient};
use crate::error::{BoothError, BoothResult};
use crate::events::{BoardEvent, EventEmitter, PipelineEvent};
use crate::game::board::{Board, BoardProjection, ReduceError, UpdateReport};
use crate::game::roster::{RosterLock, StaticContext};
use crate::game::snapshot::{GameId, Snapshot};
use crate::game::time::GameTime;
use crate::persist::{GameStore, Watermark};
use crate::pipeline::ordering::{OrderingCore, Release};
use crate::retry::with_retry;
use crate::services::hub::BroadcastHub;
use crate::stages::{AnalyzeStage, NarrateStage, PipelineOutput, Stage, SynthesizeStage};
use crate::state::Config;
use crate::utils::now_millis;
use crate::watch::{watch as watch_snapshots, SnapshotArrival, WatchTuning};

/// Dependencies shared by every game pipeline, wired once in bootstrap.
#[derive(Clone)]
pub struct PipelineDeps {
    pub config: Config,
    pub llm: Arc<dyn LlmClient>,
    pub tts: Arc<dyn TtsClient>,
    pub emitter: Arc<dyn EventEmitter>,
    pub hub: Arc<BroadcastHub>,
}

/// Work unit handed from the reducer to a stage worker.
struct StageJob {
    snapshot: Snapshot,
    report: UpdateReport,
    projection: BoardProjection,
    sequence: u64,
}

/// Commands into the ordering actor.
enum OrderingCmd {
    Expect {
        game_time: GameTime,
        reply: oneshot::Sender<u64>,
    },
    Submit(Box<PipelineOutput>),
    Fail {
        game_time: GameTime,
        reason: String,
    },
}

/// Live handle for one game pipeline.
pub struct GameHandle {
    game_id: GameId,
    static_context: StaticContext,
    projection: Arc<RwLock<BoardProjection>>,
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
    started_at: u64,
}

impl GameHandle {
    #[must_use]
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    #[must_use]
    pub fn static_context(&self) -> &StaticContext {
        &self.static_context
    }

    /// Current Board projection, by value.
    #[must_use]
    pub fn projection(&self) -> BoardProjection {
        self.projection.read().clone()
    }

    #[must_use]
    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Cooperative stop: signals end-of-game, then waits up to `grace` for
    /// in-flight snapshots to drain and the end frame to go out.
    pub async fn stop(&self, grace: Duration) {
        self.cancel.cancel();
        let mut finished = self.finished.clone();
        let drained = tokio::time::timeout(grace, async {
            while !*finished.borrow_and_update() {
                if finished.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if drained.is_err() {
            log::warn!(
                "[Pipeline] {}: drain grace {:?} elapsed before shutdown finished",
                self.game_id,
                grace
            );
        }
    }
}

/// Starts the pipeline for one game and returns its handle.
///
/// Recovery: if a Board and watermark are on disk, the Board resumes from
/// them, partial artifacts past the watermark are discarded, and nothing
/// at or before the watermark is ever re-emitted.
pub async fn start_game(deps: PipelineDeps, ctx: StaticContext) -> BoothResult<Arc<GameHandle>> {
    let game_id = ctx.game_id.clone();
    let config = deps.config.clone();

    let store = Arc::new(GameStore::open(&config.data_root, &game_id)?);
    store.save_static(&ctx)?;

    let board = match store.load_board()? {
        Some(board) => {
            log::info!(
                "[Pipeline] {}: recovered board at {:?}",
                game_id,
                board.last_game_time
            );
            board
        }
        None => Board::load(&ctx),
    };
    let watermark = store.load_watermark()?.unwrap_or_default();
    store.discard_after(&watermark)?;

    let cancel = CancellationToken::new();
    let ingest_dir = config.ingest_root.join(game_id.as_str());
    let arrivals = watch_snapshots(
        ingest_dir,
        game_id.clone(),
        WatchTuning {
            grace: Duration::from_millis(config.watcher_grace_ms),
            stabilize_timeout: Duration::from_millis(config.watcher_stabilize_timeout_ms),
        },
        cancel.clone(),
    )?;

    let lock = Arc::new(ctx.roster_lock());
    let projection = Arc::new(RwLock::new(board.project(&ctx)));

    let context_manager = ContextManager::new(config.context_soft_tokens, config.context_hard_tokens);
    let sessions = Arc::new(SessionManager::new(
        RefreshPolicy {
            soft_tokens: config.context_soft_tokens,
            every_n_snapshots: config.refresh_every_n_snapshots,
        },
        context_manager,
        Arc::clone(&deps.emitter),
    ));
    {
        let initial = projection.read().clone();
        for stage in [Stage::Analyze, Stage::Narrate] {
            sessions.install(stage, &context_manager.seed(stage, &initial, &lock));
        }
    }

    let analyze = Arc::new(AnalyzeStage::new(
        Arc::clone(&deps.llm),
        context_manager,
        config.llm_timeout(),
        Arc::clone(&deps.emitter),
    ));
    let narrate = Arc::new(NarrateStage::new(
        Arc::clone(&deps.llm),
        context_manager,
        config.llm_timeout(),
        config.momentum_low_max,
        config.momentum_high_min,
        Arc::clone(&deps.emitter),
    ));
    let synthesize = Arc::new(SynthesizeStage::new(
        Arc::clone(&deps.tts),
        config.tts_timeout(),
        config.narration_language.clone(),
        Arc::clone(&deps.emitter),
    ));

    let (job_tx, job_rx) = mpsc::channel::<StageJob>(config.stage_pool_size);
    let (ordering_tx, ordering_rx) = mpsc::channel::<OrderingCmd>(64);
    let (release_tx, release_rx) = mpsc::channel::<Release>(64);
    let (finished_tx, finished_rx) = watch::channel(false);

    // Stage worker pool: shared receiver, one task per slot.
    let job_rx = Arc::new(tokio::sync::Mutex::new(job_rx));
    let stage_finish_timeout = Duration::from_secs(config.stage_finish_timeout_secs);
    for worker in 0..config.stage_pool_size {
        let job_rx = Arc::clone(&job_rx);
        let ordering_tx = ordering_tx.clone();
        let sessions = Arc::clone(&sessions);
        let lock = Arc::clone(&lock);
        let store = Arc::clone(&store);
        let analyze = Arc::clone(&analyze);
        let narrate = Arc::clone(&narrate);
        let synthesize = Arc::clone(&synthesize);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let job = { job_rx.lock().await.recv().await };
                let Some(job) = job else { break };
                let game_time = job.snapshot.game_time;
                let work = run_stages(
                    job,
                    &sessions,
                    &lock,
                    &store,
                    &analyze,
                    &narrate,
                    &synthesize,
                    &ordering_tx,
                    &cancel,
                );
                tokio::pin!(work);
                tokio::select! {
                    _ = &mut work => {}
                    _ = cancel.cancelled() => {
                        // On cancel, committed work may finish within the
                        // per-stage bound; past that it is abandoned and
                        // ordering emits its skip marker.
                        if tokio::time::timeout(stage_finish_timeout, &mut work)
                            .await
                            .is_err()
                        {
                            log::warn!(
                                "[Pipeline] worker {}: abandoned {} after cancel",
                                worker,
                                game_time
                            );
                            let _ = ordering_tx
                                .send(OrderingCmd::Fail {
                                    game_time,
                                    reason: "cancelled mid-stage".to_string(),
                                })
                                .await;
                        }
                    }
                }
            }
            log::debug!("[Pipeline] stage worker {} finished", worker);
        });
    }
    tokio::spawn(reducer_loop(ReducerDeps {
        ctx: ctx.clone(),
        board,
        watermark: watermark.clone(),
        arrivals,
        job_tx,
        ordering_tx,
        store: Arc::clone(&store),
        sessions: Arc::clone(&sessions),
        context_manager,
        lock: Arc::clone(&lock),
        projection: Arc::clone(&projection),
        emitter: Arc::clone(&deps.emitter),
        cancel: cancel.clone(),
        fs_timeout: config.fs_timeout(),
    }));

    tokio::spawn(ordering_loop(
        OrderingCore::new(game_id.clone(), config.skip_after()),
        ordering_rx,
        release_tx,
    ));

    tokio::spawn(publisher_loop(
        game_id.clone(),
        watermark,
        release_rx,
        Arc::clone(&deps.hub),
        Arc::clone(&store),
        Arc::clone(&deps.emitter),
        cancel.clone(),
        finished_tx,
    ));

    log::info!("[Pipeline] {}: started", game_id);
    Ok(Arc::new(GameHandle {
        game_id,
        static_context: ctx,
        projection,
        cancel,
        finished: finished_rx,
        started_at: now_millis(),
    }))
}

struct ReducerDeps {
    ctx: StaticContext,
    board: Board,
    watermark: Watermark,
    arrivals: mpsc::Receiver<SnapshotArrival>,
    job_tx: mpsc::Sender<StageJob>,
    ordering_tx: mpsc::Sender<OrderingCmd>,
    store: Arc<GameStore>,
    sessions: Arc<SessionManager>,
    context_manager: ContextManager,
    lock: Arc<RosterLock>,
    projection: Arc<RwLock<BoardProjection>>,
    emitter: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
    fs_timeout: Duration,
}

/// Single-writer reducer actor: applies every arrival to the Board in
/// order, persists it, refreshes sessions, and dispatches stage jobs.
async fn reducer_loop(mut deps: ReducerDeps) {
    let game_id = deps.ctx.game_id.clone();
    // Greatest game time registered with the ordering actor. The reduce
    // guard keeps successful snapshots monotonic; poison snapshots register
    // too (for their skip marker), so track the union here.
    let mut last_expected: Option<GameTime> = None;

    while let Some(arrival) = deps.arrivals.recv().await {
        if deps.cancel.is_cancelled() {
            break;
        }

        // Exactly-once across restarts: anything at or before the persisted
        // watermark was already broadcast.
        if deps.watermark.covers(arrival.game_time) {
            log::debug!(
                "[Pipeline] {}: {} at or before watermark, skipping",
                game_id,
                arrival.game_time
            );
            continue;
        }

        let bytes = match with_retry("snapshot-read", deps.fs_timeout, || async {
            tokio::fs::read(&arrival.path)
                .await
                .map_err(|e| CollaboratorError::Transport(e.to_string()))
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!(
                    "[Pipeline] {}: cannot read {}: {}",
                    game_id,
                    arrival.path.display(),
                    e
                );
                continue;
            }
        };

        let snapshot =
            match Snapshot::parse(&game_id, arrival.game_time, &bytes, arrival.wall_time) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    poison(
                        &deps,
                        &arrival,
                        &format!("unparseable payload: {}", e),
                        &mut last_expected,
                    )
                    .await;
                    continue;
                }
            };

        let saved = deps.board.clone();
        let report = match deps.board.reduce(&snapshot, &deps.ctx) {
            Ok(report) => report,
            Err(ReduceError::OutOfOrder { game_time, last }) => {
                // Expected under at-least-once delivery.
                log::debug!(
                    "[Pipeline] {}: out-of-order snapshot {} (board at {})",
                    game_id,
                    game_time,
                    last
                );
                continue;
            }
            Err(e) => {
                deps.board = saved;
                poison(&deps, &arrival, &e.to_string(), &mut last_expected).await;
                continue;
            }
        };

        if let Err(e) = deps.store.save_board(&deps.board) {
            log::error!("[Pipeline] {}: board persist failed, stopping: {}", game_id, e);
            deps.cancel.cancel();
            break;
        }

        let projection = deps.board.project(&deps.ctx);
        *deps.projection.write() = projection.clone();

        deps.emitter.emit_board(BoardEvent::SnapshotReduced {
            game_id: game_id.to_string(),
            game_time: snapshot.game_time.to_string(),
            new_goals: report.new_goals.len(),
            anomalies: report.anomalies.len(),
            timestamp: now_millis(),
        });
        for anomaly in &report.anomalies {
            deps.emitter.emit_board(BoardEvent::AnomalyRecorded {
                game_id: game_id.to_string(),
                detail: format!("{:?}", anomaly),
                timestamp: now_millis(),
            });
        }

        deps.sessions.note_snapshot();
        for stage in [Stage::Analyze, Stage::Narrate] {
            let seed = deps.context_manager.seed(stage, &projection, &deps.lock);
            deps.sessions.maybe_refresh(stage, &report, &seed);
        }

        if last_expected.is_some_and(|t| t >= snapshot.game_time) {
            // A poison file carried a later clock than this snapshot; the
            // ordering contract is monotonic, so this one is dropped.
            log::warn!(
                "[Pipeline] {}: {} arrives behind registered {}; dropping",
                game_id,
                snapshot.game_time,
                last_expected.unwrap()
            );
            continue;
        }
        let Some(sequence) = register_expected(&deps.ordering_tx, snapshot.game_time).await else {
            break;
        };
        last_expected = Some(snapshot.game_time);

        let job = StageJob {
            snapshot,
            report,
            projection,
            sequence,
        };
        if deps.job_tx.send(job).await.is_err() {
            break;
        }
    }

    log::info!("[Pipeline] {}: reducer finished", game_id);
    // Dropping job_tx here closes the worker pool; once the workers drop
    // their ordering senders the ordering actor closes, which closes the
    // publisher.
}

/// Registers a game time with the ordering actor and returns its sequence.
async fn register_expected(
    ordering_tx: &mpsc::Sender<OrderingCmd>,
    game_time: GameTime,
) -> Option<u64> {
    let (reply, reply_rx) = oneshot::channel();
    ordering_tx
        .send(OrderingCmd::Expect { game_time, reply })
        .await
        .ok()?;
    reply_rx.await.ok()
}

/// One snapshot through Analyze → Narrate → Synthesize, then into ordering.
#[allow(clippy::too_many_arguments)]
async fn run_stages(
    job: StageJob,
    sessions: &SessionManager,
    lock: &RosterLock,
    store: &GameStore,
    analyze: &AnalyzeStage,
    narrate: &NarrateStage,
    synthesize: &SynthesizeStage,
    ordering_tx: &mpsc::Sender<OrderingCmd>,
    cancel: &CancellationToken,
) {
    let StageJob {
        snapshot,
        report,
        projection,
        sequence,
    } = job;
    let game_time = snapshot.game_time;

    let analysis_session = sessions.active(Stage::Analyze);
    let analysis = analyze
        .run(&analysis_session, &projection, &snapshot, &report, lock)
        .await;
    persist_or_cancel(store.save_analysis(game_time, &analysis), cancel);

    let narrate_session = sessions.active(Stage::Narrate);
    let batch = narrate
        .run(
            &narrate_session,
            &analysis,
            &projection,
            &snapshot,
            &report,
            lock,
        )
        .await;
    persist_or_cancel(store.save_narration(game_time, &batch), cancel);

    let (narration, audio) = synthesize
        .run(&snapshot.game_id, game_time, batch)
        .await;
    persist_or_cancel(store.save_audio(game_time, &audio), cancel);

    let output = PipelineOutput {
        game_id: snapshot.game_id.clone(),
        game_time,
        sequence,
        narration,
        audio,
        board: projection,
    };
    let _ = ordering_tx.send(OrderingCmd::Submit(Box::new(output))).await;
}

fn persist_or_cancel(result: Result<(), crate::persist::PersistError>, cancel: &CancellationToken) {
    if let Err(e) = result {
        // Disk trouble is fatal for the pipeline; drain and stop.
        log::error!("[Pipeline] artifact persist failed, stopping: {}", e);
        cancel.cancel();
    }
}

/// Ordering actor: wraps the synchronous core with command handling and
/// the deadline timer for bounded-wait skips.
async fn ordering_loop(
    mut core: OrderingCore,
    mut cmd_rx: mpsc::Receiver<OrderingCmd>,
    release_tx: mpsc::Sender<Release>,
) {
    loop {
        let deadline = core.next_deadline();
        let releases = tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(OrderingCmd::Expect { game_time, reply }) => {
                    let _ = reply.send(core.expect(game_time, Instant::now()));
                    continue;
                }
                Some(OrderingCmd::Submit(output)) => core.submit(*output, Instant::now()),
                Some(OrderingCmd::Fail { game_time, reason }) => {
                    core.fail(game_time, reason, Instant::now())
                }
                None => {
                    for release in core.close(Instant::now()) {
                        let _ = release_tx.send(release).await;
                    }
                    break;
                }
            },
            _ = sleep_until_or_forever(deadline) => core.poll(Instant::now()),
        };
        for release in releases {
            if release_tx.send(release).await.is_err() {
                return;
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Publisher: the single consumer of in-order releases. Feeds the hub,
/// advances the durable watermark, and emits release analytics.
#[allow(clippy::too_many_arguments)]
async fn publisher_loop(
    game_id: GameId,
    mut watermark: Watermark,
    mut release_rx: mpsc::Receiver<Release>,
    hub: Arc<BroadcastHub>,
    store: Arc<GameStore>,
    emitter: Arc<dyn EventEmitter>,
    cancel: CancellationToken,
    finished_tx: watch::Sender<bool>,
) {
    let feed = hub.feed(&game_id);

    while let Some(release) = release_rx.recv().await {
        let advanced = match &release {
            Release::Output { output, .. } => output.game_time,
            Release::Skip(marker) => marker.game_time,
        };

        match release {
            Release::Output {
                output,
                pending_wait,
            } => {
                feed.publish_output(&output);
                emitter.emit_pipeline(PipelineEvent::OutputReleased {
                    game_id: game_id.to_string(),
                    game_time: output.game_time.to_string(),
                    sequence: output.sequence,
                    segments: output.narration.segments.len(),
                    pending_wait_ms: pending_wait.as_millis() as u64,
                    timestamp: now_millis(),
                });
            }
            Release::Skip(marker) => {
                feed.publish_skip(&marker);
                emitter.emit_pipeline(PipelineEvent::SkipEmitted {
                    game_id: game_id.to_string(),
                    game_time: marker.game_time.to_string(),
                    reason: marker.reason.clone(),
                    timestamp: now_millis(),
                });
            }
        }

        watermark.advance(advanced);
        if let Err(e) = store.save_watermark(&watermark) {
            log::error!(
                "[Pipeline] {}: watermark persist failed, stopping: {}",
                game_id,
                e
            );
            cancel.cancel();
        }
    }

    feed.publish_end();
    emitter.emit_pipeline(PipelineEvent::GameEnded {
        game_id: game_id.to_string(),
        timestamp: now_millis(),
    });
    let _ = finished_tx.send(true);
    log::info!("[Pipeline] {}: publisher finished, end frame sent", game_id);
}

/// Poison handling: quarantine the file and emit a skip marker in order so
/// subscribers see the gap explicitly.
async fn poison(
    deps: &ReducerDeps,
    arrival: &SnapshotArrival,
    reason: &str,
    last_expected: &mut Option<GameTime>,
) {
    let game_id = &deps.ctx.game_id;
    log::error!(
        "[Pipeline] {}: poison snapshot {}: {}",
        game_id,
        arrival.game_time,
        reason
    );
    if let Err(e) = deps.store.quarantine(&arrival.path) {
        log::warn!("[Pipeline] {}: quarantine failed: {}", game_id, e);
    }
    deps.emitter.emit_board(BoardEvent::SnapshotPoisoned {
        game_id: game_id.to_string(),
        game_time: arrival.game_time.to_string(),
        reason: reason.to_string(),
        timestamp: now_millis(),
    });

    if last_expected.map_or(true, |t| t < arrival.game_time) {
        if register_expected(&deps.ordering_tx, arrival.game_time)
            .await
            .is_some()
        {
            *last_expected = Some(arrival.game_time);
            let _ = deps
                .ordering_tx
                .send(OrderingCmd::Fail {
                    game_time: arrival.game_time,
                    reason: format!("poison snapshot: {}", reason),
                })
                .await;
        }
    }
}
