//! Node and edge statistics for PUCT.

use sc_core::{GameState, A};

pub type NodeId = u32;

pub const NO_CHILD: NodeId = NodeId::MAX;

#[derive(Clone)]
pub struct Node {
    pub state: GameState,
    pub to_play: u8,
    pub is_terminal: bool,
    /// Exact value of a terminal node from `to_play`'s POV.
    pub terminal_z: f32,
    pub is_expanded: bool,
    pub legal: [bool; A],

    // Stats per action idx.
    pub n: [u32; A],
    pub w: [f32; A],
    pub p: [f32; A],
    pub n_sum: u32,
    pub children: [NodeId; A],
}

impl Node {
    pub fn new(state: GameState) -> Self {
        let terminal_z = state
            .outcome
            .map(|o| o.z_for(state.player_to_move))
            .unwrap_or(0.0);
        Self {
            state,
            to_play: state.player_to_move,
            is_terminal: state.outcome.is_some(),
            terminal_z,
            is_expanded: false,
            legal: sc_core::legal_moves(&state),
            n: [0u32; A],
            w: [0.0f32; A],
            p: [0.0f32; A],
            n_sum: 0,
            children: [NO_CHILD; A],
        }
    }

    pub fn q(&self, a: usize) -> f32 {
        let n = self.n[a];
        if n == 0 {
            0.0
        } else {
            self.w[a] / (n as f32)
        }
    }
}
