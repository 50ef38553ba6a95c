//! Shared fixtures for the benches.

use sc_core::{apply_move, initial_state, legal_moves, GameState};

/// Non-terminal positions reached by a fixed pseudo-random walk.
///
/// Walks restart from the kickoff whenever a game ends.
pub fn gen_states(n: usize, max_moves: u16) -> Vec<GameState> {
    let mut out = Vec::with_capacity(n);
    let mut x: u64 = 0xA5A5_A5A5_0123_4567;
    let mut s = initial_state(max_moves);
    while out.len() < n {
        if s.outcome.is_some() {
            s = initial_state(max_moves);
        }
        out.push(s);
        let legal = legal_moves(&s);
        let moves: Vec<usize> = (0..legal.len()).filter(|&a| legal[a]).collect();
        if moves.is_empty() {
            s = initial_state(max_moves);
            continue;
        }
        x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
        let a = moves[(x >> 33) as usize % moves.len()];
        s = match apply_move(&s, a) {
            Ok(t) => t.state,
            Err(_) => initial_state(max_moves),
        };
    }
    out
}
