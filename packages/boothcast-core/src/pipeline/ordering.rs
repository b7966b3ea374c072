//! Ordering queue: out-of-order stage completions in, strict game-time
//! order out.
//!
//! The reducer registers every accepted snapshot with [`OrderingCore::expect`]
//! in game-time order; stage workers later [`OrderingCore::submit`] or
//! [`OrderingCore::fail`] the same game times in whatever order they finish.
//! The core releases outputs only when everything earlier has been released,
//! with a bounded wait: a slot stuck past the skip window (or failed while
//! later work is already in flight) is released as an explicit skip marker
//! rather than stalling the stream.
//!
//! The core is a synchronous state machine; the async actor around it lives
//! in the pipeline module. That keeps every ordering rule testable without
//! timers.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

use crate::game::snapshot::GameId;
use crate::game::time::GameTime;
use crate::stages::PipelineOutput;

/// Explicit output record for a deliberately omitted game time.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipMarker {
    pub game_id: GameId,
    pub game_time: GameTime,
    pub sequence: u64,
    pub reason: String,
}

/// One in-order release from the queue.
#[derive(Debug)]
pub enum Release {
    Output {
        output: Box<PipelineOutput>,
        /// How long the completed output waited behind earlier game times.
        pending_wait: Duration,
    },
    Skip(SkipMarker),
}

struct Slot {
    game_time: GameTime,
    sequence: u64,
    since: Instant,
}

/// Synchronous ordering state machine for one game.
pub struct OrderingCore {
    game_id: GameId,
    skip_after: Duration,
    expected: VecDeque<Slot>,
    ready: HashMap<GameTime, (PipelineOutput, Instant)>,
    failed: HashMap<GameTime, String>,
    next_sequence: u64,
    closed: bool,
}

impl OrderingCore {
    #[must_use]
    pub fn new(game_id: GameId, skip_after: Duration) -> Self {
        Self {
            game_id,
            skip_after,
            expected: VecDeque::new(),
            ready: HashMap::new(),
            failed: HashMap::new(),
            next_sequence: 0,
            closed: false,
        }
    }

    /// Registers an accepted snapshot and assigns its sequence number.
    ///
    /// Must be called in strictly increasing game-time order (the reducer's
    /// order); the queue releases in exactly this order.
    pub fn expect(&mut self, game_time: GameTime, now: Instant) -> u64 {
        debug_assert!(
            self.expected.back().map_or(true, |s| s.game_time < game_time),
            "expect() must be called in game-time order"
        );
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.expected.push_back(Slot {
            game_time,
            sequence,
            since: now,
        });
        sequence
    }

    /// Accepts a completed output; returns everything now releasable.
    pub fn submit(&mut self, output: PipelineOutput, now: Instant) -> Vec<Release> {
        if !self.expected.iter().any(|s| s.game_time == output.game_time) {
            // Already skipped past (bounded wait expired) or never expected.
            log::warn!(
                "[Ordering] {}: dropping unexpected completion for {}",
                self.game_id,
                output.game_time
            );
            return self.drain(now);
        }
        self.ready.insert(output.game_time, (output, now));
        self.drain(now)
    }

    /// Marks a game time as failed; returns everything now releasable.
    pub fn fail(&mut self, game_time: GameTime, reason: impl Into<String>, now: Instant) -> Vec<Release> {
        self.failed.insert(game_time, reason.into());
        self.drain(now)
    }

    /// Releases whatever the clock allows (deadline-driven skips).
    pub fn poll(&mut self, now: Instant) -> Vec<Release> {
        self.drain(now)
    }

    /// The instant at which the head slot will be skipped, if it is still
    /// unfinished. Drives the actor's timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let front = self.expected.front()?;
        if self.ready.contains_key(&front.game_time) {
            return None;
        }
        Some(front.since + self.skip_after)
    }

    /// Closes the queue: remaining completed outputs drain in order and
    /// unfinished slots become skip markers.
    pub fn close(&mut self, now: Instant) -> Vec<Release> {
        self.closed = true;
        self.drain(now)
    }

    /// Whether every expected slot has been released.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.expected.is_empty()
    }

    fn drain(&mut self, now: Instant) -> Vec<Release> {
        let mut releases = Vec::new();

        while let Some(front) = self.expected.front() {
            let game_time = front.game_time;
            let sequence = front.sequence;
            let deadline = front.since + self.skip_after;

            if let Some((mut output, queued_at)) = self.ready.remove(&game_time) {
                output.sequence = sequence;
                releases.push(Release::Output {
                    output: Box::new(output),
                    pending_wait: now.saturating_duration_since(queued_at),
                });
                self.expected.pop_front();
                continue;
            }

            if let Some(reason) = self.failed.get(&game_time) {
                // A failed slot is skipped once later orchestration exists,
                // its window elapses, or the queue is closing.
                let later_in_flight = self.expected.len() > 1;
                if self.closed || later_in_flight || now >= deadline {
                    let reason = reason.clone();
                    self.failed.remove(&game_time);
                    releases.push(self.skip(game_time, sequence, reason));
                    self.expected.pop_front();
                    continue;
                }
                break;
            }

            // Still in flight.
            if self.closed {
                releases.push(self.skip(game_time, sequence, "pipeline closed".to_string()));
                self.expected.pop_front();
                continue;
            }
            if now >= deadline {
                releases.push(self.skip(
                    game_time,
                    sequence,
                    format!("no completion within {:?}", self.skip_after),
                ));
                self.expected.pop_front();
                continue;
            }
            break;
        }

        releases
    }

    fn skip(&self, game_time: GameTime, sequence: u64, reason: String) -> Release {
        log::warn!(
            "[Ordering] {}: skipping {} (seq {}): {}",
            self.game_id,
            game_time,
            sequence,
            reason
        );
        Release::Skip(SkipMarker {
            game_id: self.game_id.clone(),
            game_time,
            sequence,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::Board;
    use crate::game::roster::fixtures::edm_at_fla;
    use crate::stages::{CommentaryKind, NarrationBatch};

    fn output(time: GameTime) -> PipelineOutput {
        let ctx = edm_at_fla();
        PipelineOutput {
            game_id: GameId::from("GAME"),
            game_time: time,
            sequence: 0,
            narration: NarrationBatch {
                kind: CommentaryKind::Filler,
                segments: vec![],
            },
            audio: vec![],
            board: Board::load(&ctx).project(&ctx),
        }
    }

    fn core() -> OrderingCore {
        OrderingCore::new(GameId::from("GAME"), Duration::from_secs(10))
    }

    fn times(releases: &[Release]) -> Vec<GameTime> {
        releases
            .iter()
            .map(|r| match r {
                Release::Output { output, .. } => output.game_time,
                Release::Skip(marker) => marker.game_time,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn later_completion_is_withheld_until_earlier_finishes() {
        let mut core = core();
        let now = Instant::now();
        let t1 = GameTime::new(1, 0, 15);
        let t2 = GameTime::new(1, 0, 30);
        core.expect(t1, now);
        core.expect(t2, now);

        // T2's synthesis finishes first.
        assert!(core.submit(output(t2), now).is_empty());

        let later = now + Duration::from_secs(3);
        let releases = core.submit(output(t1), later);
        assert_eq!(times(&releases), vec![t1, t2]);

        // T2 sat in pending while T1 was in flight.
        match &releases[1] {
            Release::Output { pending_wait, .. } => {
                assert_eq!(*pending_wait, Duration::from_secs(3));
            }
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sequences_follow_expect_order() {
        let mut core = core();
        let now = Instant::now();
        let t1 = GameTime::new(1, 0, 5);
        let t2 = GameTime::new(1, 0, 10);
        assert_eq!(core.expect(t1, now), 0);
        assert_eq!(core.expect(t2, now), 1);

        let releases = core.submit(output(t1), now);
        match &releases[0] {
            Release::Output { output, .. } => assert_eq!(output.sequence, 0),
            other => panic!("expected output, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_head_is_skipped_at_the_deadline() {
        let mut core = core();
        let now = Instant::now();
        let t1 = GameTime::new(1, 0, 15);
        let t2 = GameTime::new(1, 0, 30);
        core.expect(t1, now);
        core.expect(t2, now);
        core.submit(output(t2), now);

        // Before the window: nothing moves.
        assert!(core.poll(now + Duration::from_secs(9)).is_empty());

        let releases = core.poll(now + Duration::from_secs(10));
        assert_eq!(times(&releases), vec![t1, t2]);
        assert!(matches!(releases[0], Release::Skip(_)));
        assert!(matches!(releases[1], Release::Output { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_head_skips_once_later_work_exists() {
        let mut core = core();
        let now = Instant::now();
        let t1 = GameTime::new(1, 0, 15);
        core.expect(t1, now);

        // Nothing behind it yet: the failure waits for its window.
        assert!(core.fail(t1, "analyze exploded", now).is_empty());

        // The next snapshot's orchestration begins: advance immediately.
        let t2 = GameTime::new(1, 0, 30);
        core.expect(t2, now + Duration::from_secs(1));
        let releases = core.poll(now + Duration::from_secs(1));
        assert_eq!(releases.len(), 1);
        match &releases[0] {
            Release::Skip(marker) => {
                assert_eq!(marker.game_time, t1);
                assert_eq!(marker.reason, "analyze exploded");
            }
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_drains_ready_and_skips_unfinished() {
        let mut core = core();
        let now = Instant::now();
        let t1 = GameTime::new(1, 0, 15);
        let t2 = GameTime::new(1, 0, 30);
        let t3 = GameTime::new(1, 0, 45);
        core.expect(t1, now);
        core.expect(t2, now);
        core.expect(t3, now);
        core.submit(output(t1), now);
        core.submit(output(t3), now);

        // t1 released on submit; close releases the rest.
        let releases = core.close(now);
        assert_eq!(times(&releases), vec![t2, t3]);
        assert!(matches!(releases[0], Release::Skip(_)));
        assert!(matches!(releases[1], Release::Output { .. }));
        assert!(core.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn released_times_are_strictly_increasing() {
        let mut core = core();
        let now = Instant::now();
        let all: Vec<GameTime> = (0..6).map(|i| GameTime::new(1, 0, i * 5)).collect();
        for t in &all {
            core.expect(*t, now);
        }

        // Completions in shuffled order.
        let mut released = Vec::new();
        for &i in &[3usize, 0, 5, 1, 2, 4] {
            released.extend(times(&core.submit(output(all[i]), now)));
        }

        assert_eq!(released, all);
        for pair in released.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_completion_is_dropped() {
        let mut core = core();
        let now = Instant::now();
        let never_expected = GameTime::new(2, 0, 0);
        assert!(core.submit(output(never_expected), now).is_empty());
        assert!(core.is_drained());
    }
}
