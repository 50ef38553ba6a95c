//! Feature schema v1: planes over the 11x9 point grid.
//!
//! Encoding is from the POV of `player_to_move`. Player 1's view is the board
//! rotated 180 degrees, so the encoded player always attacks the top goal and a
//! line drawn in direction `d` appears in plane `(d + 4) % 8`.
//!
//! ### Layout (v1), channel-major `[C, ROWS, COLS]`
//! - **0..8**: line drawn from this point in direction `d`
//! - **8**: ball
//! - **9**: playable point
//! - **10**: point that grants a bonus kick
//! - **11**: constant `ply / max_moves`
//!
//! Total: F = 12 * 11 * 9 = 1188.

use crate::action::{to_pov_action, Direction};
use crate::state::{is_playable, GameState, Point, COLS, ROWS};

/// Increment this whenever the feature layout changes.
pub const FEATURE_SCHEMA_ID: u32 = 1;

pub const NUM_CHANNELS: usize = 12;

/// Feature vector length for schema v1.
pub const F: usize = NUM_CHANNELS * ROWS * COLS;

const CH_BALL: usize = 8;
const CH_PLAYABLE: usize = 9;
const CH_BONUS: usize = 10;
const CH_CLOCK: usize = 11;

#[inline]
fn idx(ch: usize, p: Point) -> usize {
    ch * ROWS * COLS + p.row as usize * COLS + p.col as usize
}

/// Encode `s` as a flat `[NUM_CHANNELS, ROWS, COLS]` vector.
pub fn encode_state(s: &GameState) -> Vec<f32> {
    let mut out = vec![0.0f32; F];
    encode_state_into(s, &mut out);
    out
}

/// Encode into a caller-provided buffer of length `F`.
pub fn encode_state_into(s: &GameState, out: &mut [f32]) {
    debug_assert_eq!(out.len(), F);
    out.fill(0.0);
    let me = s.player_to_move;
    let view = |p: Point| if me == 0 { p } else { p.rotated() };

    for r in 0..ROWS {
        for c in 0..COLS {
            let p = Point::new(r, c);
            let v = view(p);
            let bits = s.edge_bits(p);
            for d in Direction::ALL {
                if bits & (1u8 << d.index()) != 0 {
                    out[idx(to_pov_action(d.index(), me), v)] = 1.0;
                }
            }
            if is_playable(p) {
                out[idx(CH_PLAYABLE, v)] = 1.0;
            }
            if bits != 0 {
                out[idx(CH_BONUS, v)] = 1.0;
            }
        }
    }
    out[idx(CH_BALL, view(s.ball))] = 1.0;

    let clock = if s.max_moves == 0 {
        0.0
    } else {
        (s.ply as f32 / s.max_moves as f32).min(1.0)
    };
    let base = CH_CLOCK * ROWS * COLS;
    out[base..base + ROWS * COLS].fill(clock);
}
