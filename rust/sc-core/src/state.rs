//! Canonical game state and outcome conventions.

use crate::action::Direction;

/// Grid rows, including the two goal rows.
pub const ROWS: usize = 11;
/// Grid columns.
pub const COLS: usize = 9;

/// Columns of the goal mouth (posts at the outer two).
pub const GOAL_COLS: std::ops::RangeInclusive<usize> = 3..=5;

/// Kick-off point.
pub const BALL_START: Point = Point { row: 5, col: 4 };

/// A grid point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub row: u8,
    pub col: u8,
}

impl Point {
    pub fn new(row: usize, col: usize) -> Self {
        Self {
            row: row as u8,
            col: col as u8,
        }
    }

    /// Neighbour in direction `d`, if it is on the grid.
    pub fn step(self, d: Direction) -> Option<Point> {
        let (dr, dc) = d.delta();
        let r = self.row as i16 + dr as i16;
        let c = self.col as i16 + dc as i16;
        if r < 0 || c < 0 || r >= ROWS as i16 || c >= COLS as i16 {
            return None;
        }
        Some(Point::new(r as usize, c as usize))
    }

    /// Point as seen after the 180 degree rotation.
    pub fn rotated(self) -> Point {
        Point::new(ROWS - 1 - self.row as usize, COLS - 1 - self.col as usize)
    }

    pub fn is_goal(self) -> bool {
        self.row == 0 || self.row as usize == ROWS - 1
    }
}

/// Whether the ball may ever occupy `p`.
pub fn is_playable(p: Point) -> bool {
    if p.is_goal() {
        GOAL_COLS.contains(&(p.col as usize))
    } else {
        true
    }
}

/// Terminal result of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Winner(u8),
    Draw,
}

impl Outcome {
    /// Value target from the POV of `pov_player`: +1 win, -1 loss, 0 draw.
    pub fn z_for(self, pov_player: u8) -> f32 {
        match self {
            Outcome::Winner(w) if w == pov_player => 1.0,
            Outcome::Winner(_) => -1.0,
            Outcome::Draw => 0.0,
        }
    }
}

/// Paper soccer position.
///
/// `edges[r][c]` holds one bit per direction for every line touching the point.
/// Lines are stored at both endpoints. Border lines are drawn from the start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameState {
    pub edges: [[u8; COLS]; ROWS],
    pub ball: Point,
    pub player_to_move: u8,
    /// Kicks played so far, bonus kicks included.
    pub ply: u16,
    /// Kick cap after which the game is drawn.
    pub max_moves: u16,
    pub outcome: Option<Outcome>,
}

impl GameState {
    #[inline]
    pub fn edge_bits(&self, p: Point) -> u8 {
        self.edges[p.row as usize][p.col as usize]
    }

    #[inline]
    pub fn has_edge(&self, p: Point, d: Direction) -> bool {
        self.edge_bits(p) & (1u8 << d.index()) != 0
    }

    /// Draw the line from `p` in direction `d`. Caller checks the neighbour exists.
    pub(crate) fn draw_edge(&mut self, p: Point, d: Direction) {
        self.edges[p.row as usize][p.col as usize] |= 1u8 << d.index();
        if let Some(q) = p.step(d) {
            self.edges[q.row as usize][q.col as usize] |= 1u8 << d.opposite().index();
        }
    }

    /// A point with any line touching it grants a bonus kick when the ball lands there.
    #[inline]
    pub fn grants_bonus(&self, p: Point) -> bool {
        self.edge_bits(p) != 0
    }

    /// Number of drawn lines, border included.
    pub fn drawn_lines(&self) -> usize {
        let ends: u32 = self
            .edges
            .iter()
            .flat_map(|row| row.iter())
            .map(|b| b.count_ones())
            .sum();
        (ends / 2) as usize
    }
}

/// Every line that is drawn before the first kick.
pub(crate) fn border_lines() -> Vec<(Point, Direction)> {
    let mut out = Vec::with_capacity(4 * (ROWS + COLS));
    // Side lines.
    for r in 1..(ROWS - 2) {
        out.push((Point::new(r, 0), Direction::S));
        out.push((Point::new(r, COLS - 1), Direction::S));
    }
    // End lines, open inside the goal mouth.
    for c in 0..(COLS - 1) {
        let inside_mouth = GOAL_COLS.contains(&c) && GOAL_COLS.contains(&(c + 1));
        if inside_mouth {
            continue;
        }
        out.push((Point::new(1, c), Direction::E));
        out.push((Point::new(ROWS - 2, c), Direction::E));
    }
    debug_assert!(out.iter().all(|(p, d)| p.step(*d).is_some()));
    out
}
