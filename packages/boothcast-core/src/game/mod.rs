//! Game domain model: time, snapshots, rosters, and the authoritative Board.

pub mod board;
pub mod roster;
pub mod snapshot;
pub mod summary;
pub mod time;

pub use board::{Anomaly, Board, BoardProjection, ReduceError, UpdateReport};
pub use roster::{RosterLock, StaticContext};
pub use snapshot::{Activity, GameId, ScorePair, Snapshot, TeamSide};
pub use time::GameTime;
