//! The game model the search consumes.
//!
//! Rules, capture logic and scoring live elsewhere; the search only needs to
//! ask a board for its candidate moves, check a move, and place a stone on
//! its own private copy.

use std::fmt;

use rand::Rng;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Player {
    Black,
    White,
}

impl Player {
    pub fn opponent(self) -> Self {
        match self {
            Player::Black => Player::White,
            Player::White => Player::Black,
        }
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Player::Black => write!(f, "B"),
            Player::White => write!(f, "W"),
        }
    }
}

/// A point on the board. Cells are numbered `x * height + y`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: usize,
    pub y: usize,
}

impl Point {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub fn from_index(index: usize, height: usize) -> Self {
        Self::new(index / height, index % height)
    }

    pub fn index(&self, height: usize) -> usize {
        self.x * height + self.y
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionStatus {
    Ok,
    Occupied,
    Suicide,
    Ko,
}

pub trait Board: Clone + Send + Sync {
    fn width(&self) -> usize;

    fn height(&self) -> usize;

    /// Number of moves played so far.
    fn step(&self) -> usize;

    /// The stone on `point`, if any.
    fn cell(&self, point: Point) -> Option<Player>;

    /// Legal moves for `player` that are worth searching (no filling of
    /// own eyes and the like), without duplicates.
    fn good_moves(&self, player: Player) -> Vec<Point>;

    fn status(&self, point: Point, player: Player) -> PositionStatus;

    fn place(&mut self, point: Point, player: Player);

    fn cells(&self) -> usize {
        self.width() * self.height()
    }
}

/// Scores a position by playing it out.
pub trait Rollout<B: Board>: Sync {
    /// Returns the outcome of the position with `player` to move. Higher
    /// values are better for White.
    fn run<R: Rng + ?Sized>(&self, board: &B, komi: f64, player: Player, rng: &mut R) -> f64;
}
