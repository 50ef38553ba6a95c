//! Legal kick generation.

use crate::action::{to_pov_action, Direction, A};
use crate::state::{is_playable, GameState, GOAL_COLS};

/// Whether the player to move may kick in direction `d`.
///
/// A kick follows an undrawn line to a playable neighbour. The goal rows can
/// only be entered from a column inside the goal mouth.
#[inline]
pub fn can_kick(s: &GameState, d: Direction) -> bool {
    let from = s.ball;
    let Some(to) = from.step(d) else {
        return false;
    };
    if !is_playable(to) || s.has_edge(from, d) {
        return false;
    }
    if to.is_goal() && !GOAL_COLS.contains(&(from.col as usize)) {
        return false;
    }
    true
}

/// Legality of each action index. All false once the game is over.
pub fn legal_moves(s: &GameState) -> [bool; A] {
    let mut out = [false; A];
    if s.outcome.is_some() {
        return out;
    }
    for d in Direction::ALL {
        out[d.index()] = can_kick(s, d);
    }
    out
}

/// Legal mask in the point-of-view frame of the player to move.
pub fn legal_moves_pov(s: &GameState) -> [bool; A] {
    let abs = legal_moves(s);
    let mut out = [false; A];
    for (a, &ok) in abs.iter().enumerate() {
        out[to_pov_action(a, s.player_to_move)] = ok;
    }
    out
}

pub fn has_legal_move(s: &GameState) -> bool {
    Direction::ALL.iter().any(|&d| can_kick(s, d))
}
