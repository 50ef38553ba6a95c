//! Fixed action space: the eight kick directions.

/// Action space size.
pub const A: usize = 8;

/// Kick direction. The discriminant is the action index.
///
/// Row 0 is the top of the board (player 0's target goal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    N = 0,
    NE = 1,
    E = 2,
    SE = 3,
    S = 4,
    SW = 5,
    W = 6,
    NW = 7,
}

impl Direction {
    pub const ALL: [Direction; A] = [
        Direction::N,
        Direction::NE,
        Direction::E,
        Direction::SE,
        Direction::S,
        Direction::SW,
        Direction::W,
        Direction::NW,
    ];

    pub fn from_index(idx: usize) -> Option<Direction> {
        Self::ALL.get(idx).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Row/column delta of a kick in this direction.
    pub fn delta(self) -> (i8, i8) {
        match self {
            Direction::N => (-1, 0),
            Direction::NE => (-1, 1),
            Direction::E => (0, 1),
            Direction::SE => (1, 1),
            Direction::S => (1, 0),
            Direction::SW => (1, -1),
            Direction::W => (0, -1),
            Direction::NW => (-1, -1),
        }
    }

    pub fn opposite(self) -> Direction {
        Self::ALL[flip_action(self.index())]
    }
}

/// Direction reversal, which is also the 180 degree board rotation.
#[inline]
pub fn flip_action(a: usize) -> usize {
    (a + 4) % A
}

/// Map an absolute action into the frame of `player`'s point of view.
#[inline]
pub fn to_pov_action(a: usize, player: u8) -> usize {
    if player == 0 {
        a
    } else {
        flip_action(a)
    }
}

/// Inverse of [`to_pov_action`]; the rotation is an involution.
#[inline]
pub fn from_pov_action(a: usize, player: u8) -> usize {
    to_pov_action(a, player)
}
