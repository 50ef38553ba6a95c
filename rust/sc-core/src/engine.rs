//! Game rules engine: state transitions for paper soccer.
//!
//! This module is the single place that mutates `GameState` via rules.

use crate::action::Direction;
use crate::legal::{can_kick, has_legal_move};
use crate::state::{border_lines, GameState, Outcome, BALL_START, COLS, ROWS};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("action index {action} out of range")]
    OutOfRange { action: usize },
    #[error("illegal kick {dir:?} from ({row},{col})")]
    IllegalAction { dir: Direction, row: u8, col: u8 },
    #[error("game is already over")]
    GameOver,
    #[error("invalid state: {msg}")]
    InvalidState { msg: &'static str },
}

/// Result of one kick.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub state: GameState,
    /// +1 / -1 / 0 from the kicker's point of view; non-zero only on terminal kicks.
    pub reward: f32,
    pub terminal: bool,
}

/// Kick-off position: ball in the centre, border drawn, player 0 to move.
pub fn initial_state(max_moves: u16) -> GameState {
    let mut s = GameState {
        edges: [[0u8; COLS]; ROWS],
        ball: BALL_START,
        player_to_move: 0,
        ply: 0,
        max_moves,
        outcome: None,
    };
    for (p, d) in border_lines() {
        s.draw_edge(p, d);
    }
    s
}

pub fn is_terminal(s: &GameState) -> bool {
    s.outcome.is_some()
}

/// Apply the kick with action index `action`.
///
/// Order of terminal checks: goal, kick cap (draw), stuck player (loses).
pub fn apply_move(state: &GameState, action: usize) -> Result<Transition, ApplyError> {
    validate_state(state)?;
    if state.outcome.is_some() {
        return Err(ApplyError::GameOver);
    }
    let dir = Direction::from_index(action).ok_or(ApplyError::OutOfRange { action })?;
    if !can_kick(state, dir) {
        return Err(ApplyError::IllegalAction {
            dir,
            row: state.ball.row,
            col: state.ball.col,
        });
    }
    let to = state.ball.step(dir).ok_or(ApplyError::InvalidState {
        msg: "legal kick leaves the grid",
    })?;

    let kicker = state.player_to_move;
    let mut next = *state;
    let bonus = next.grants_bonus(to);
    next.draw_edge(state.ball, dir);
    next.ball = to;
    next.ply = next.ply.saturating_add(1);

    if to.row == 0 {
        next.outcome = Some(Outcome::Winner(0));
    } else if to.row as usize == ROWS - 1 {
        next.outcome = Some(Outcome::Winner(1));
    } else {
        if !bonus {
            next.player_to_move = 1 - kicker;
        }
        if next.ply >= next.max_moves {
            next.outcome = Some(Outcome::Draw);
        } else if !has_legal_move(&next) {
            next.outcome = Some(Outcome::Winner(1 - next.player_to_move));
        }
    }

    let reward = next.outcome.map(|o| o.z_for(kicker)).unwrap_or(0.0);
    Ok(Transition {
        state: next,
        reward,
        terminal: next.outcome.is_some(),
    })
}

fn validate_state(s: &GameState) -> Result<(), ApplyError> {
    if s.player_to_move > 1 {
        return Err(ApplyError::InvalidState {
            msg: "player_to_move must be 0 or 1",
        });
    }
    if s.ball.row as usize >= ROWS || s.ball.col as usize >= COLS {
        return Err(ApplyError::InvalidState {
            msg: "ball outside the grid",
        });
    }
    if s.max_moves == 0 {
        return Err(ApplyError::InvalidState {
            msg: "max_moves must be > 0",
        });
    }
    Ok(())
}
