//! Deterministic narrative summary of the game so far.
//!
//! The summary re-seeds refreshed agent sessions, so it must be a pure
//! function of the Board - never produced by the language model - and
//! bounded so it cannot bloat prompt context.

use crate::game::board::Board;
use crate::game::roster::StaticContext;
use crate::protocol_constants::NARRATIVE_SUMMARY_MAX_CHARS;

/// Builds the bounded narrative summary for a Board.
///
/// Shape: score line, period/clock, goal log (most recent last), shot
/// totals, penalties in progress. Truncated at a char boundary to
/// [`NARRATIVE_SUMMARY_MAX_CHARS`].
#[must_use]
pub fn narrative_summary(board: &Board, ctx: &StaticContext) -> String {
    let mut out = format!(
        "{} {} - {} {}",
        ctx.away_team, board.score.away, board.score.home, ctx.home_team
    );

    match board.last_game_time {
        Some(t) => {
            out.push_str(&format!(
                ", period {}, {} left",
                board.period,
                t.remaining_in_period()
            ));
        }
        None => out.push_str(", pregame"),
    }

    out.push_str(&format!(
        ". Shots {}-{}.",
        board.shots.away, board.shots.home
    ));

    if !board.goals.is_empty() {
        out.push_str(" Goals:");
        for goal in &board.goals {
            let team = ctx.team(goal.team);
            out.push_str(&format!(" {} ({}, {})", goal.scorer, team, goal.game_time));
            if !goal.assists.is_empty() {
                out.push_str(&format!(" from {}", goal.assists.join(", ")));
            }
            out.push(';');
        }
        out.pop();
        out.push('.');
    }

    let now = board.last_game_time.unwrap_or_default();
    let active: Vec<String> = board
        .penalties
        .iter()
        .filter(|p| p.active_at(now))
        .map(|p| format!("{} ({}, {})", p.player, ctx.team(p.team), p.infraction))
        .collect();
    if !active.is_empty() {
        out.push_str(&format!(" Penalties: {}.", active.join("; ")));
    }

    truncate_chars(out, NARRATIVE_SUMMARY_MAX_CHARS)
}

fn truncate_chars(mut s: String, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s;
    }
    let cut = s
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.truncate(cut);
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::board::{Board, GoalRecord};
    use crate::game::roster::fixtures::edm_at_fla;
    use crate::game::snapshot::{ScorePair, TeamSide};
    use crate::game::time::GameTime;

    #[test]
    fn pregame_summary_names_both_teams() {
        let ctx = edm_at_fla();
        let board = Board::load(&ctx);
        let summary = narrative_summary(&board, &ctx);

        assert!(summary.contains("EDM 0 - 0 FLA"));
        assert!(summary.contains("pregame"));
    }

    #[test]
    fn summary_lists_goals_with_assists() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);
        board.score = ScorePair::new(1, 0);
        board.goals.push(GoalRecord {
            scorer: "Draisaitl".into(),
            team: TeamSide::Away,
            assists: vec!["McDavid".into()],
            game_time: GameTime::new(1, 5, 30),
        });
        board.last_game_time = Some(GameTime::new(1, 5, 30));

        let summary = narrative_summary(&board, &ctx);
        assert!(summary.contains("EDM 1 - 0 FLA"));
        assert!(summary.contains("Draisaitl (EDM, P1 05:30) from McDavid"));
    }

    #[test]
    fn summary_is_bounded() {
        let ctx = edm_at_fla();
        let mut board = Board::load(&ctx);
        for i in 0..60 {
            board.goals.push(GoalRecord {
                scorer: "Draisaitl".into(),
                team: TeamSide::Away,
                assists: vec!["McDavid".into(), "Skinner".into()],
                game_time: GameTime::new(1, (i % 20) as u8, 0),
            });
        }
        board.last_game_time = Some(GameTime::new(3, 10, 0));

        let summary = narrative_summary(&board, &ctx);
        assert!(summary.chars().count() <= NARRATIVE_SUMMARY_MAX_CHARS);
    }

    #[test]
    fn summary_is_deterministic() {
        let ctx = edm_at_fla();
        let board = Board::load(&ctx);
        assert_eq!(
            narrative_summary(&board, &ctx),
            narrative_summary(&board, &ctx)
        );
    }
}
