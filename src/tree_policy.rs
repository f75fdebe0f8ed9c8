use std::error::Error;
use std::fmt::Write;
use std::ptr;

use parking_lot::Mutex;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::atomics::*;
use crate::board::{Board, Player, Point, PositionStatus, Rollout};
use crate::evaluation::{EvaluationError, MoveEvaluator};
use crate::search_tree::{SearchNode, SearchTree};

/// The algorithm plugged into a [`SearchTree`].
///
/// The tree owns the nodes and drives the workers; the policy decides what
/// a node holds, which leaf to grow next, how to score it and which root
/// child to play in the end.
pub trait TreePolicy: Sync + Sized {
    /// Per-node statistics. The tree never looks inside.
    type NodeData: Send + Sync;
    /// Whatever selection hands over to simulation, e.g. the position
    /// reached at the new leaf.
    type State;
    /// Owned by one worker for the whole run.
    type ThreadLocalData;
    type Error: Error + Send + Sync + 'static;

    /// Maximum number of children of any node.
    fn children_capacity(&self) -> usize;

    fn root_data(&self) -> Self::NodeData;

    /// The state simulated once for the root when the tree is built.
    fn root_state(&self) -> Self::State;

    fn thread_local_data(&self, seed: u64) -> Self::ThreadLocalData;

    /// Walks down from the root and returns a freshly expanded leaf with its
    /// state, or `None` when this iteration should start over from the root.
    fn tree_policy<'a>(
        &self,
        tree: &'a SearchTree<Self>,
        tld: &mut Self::ThreadLocalData,
    ) -> Result<Option<(&'a SearchNode<Self::NodeData>, Self::State)>, Self::Error>;

    /// Simulates `leaf` and propagates the outcome up to the root.
    fn default_policy(
        &self,
        tree: &SearchTree<Self>,
        leaf: &SearchNode<Self::NodeData>,
        state: Self::State,
        tld: &mut Self::ThreadLocalData,
    ) -> Result<(), Self::Error>;

    /// The child of `node` to play after the search, `None` if it has none.
    fn final_index(&self, node: &SearchNode<Self::NodeData>) -> Option<usize>;

    /// One-line label used by the tree dump.
    fn describe(&self, _node: &SearchNode<Self::NodeData>) -> String {
        String::new()
    }
}

/// Statistics kept on every node by [`UctPolicy`].
pub struct UctNodeData {
    visits: AtomicUsize,
    q: FixedPointQ,
    action: Option<Point>,
    player: Player,
    candidates: Mutex<Option<Vec<Point>>>,
    simulated: AtomicBool,
}

impl UctNodeData {
    pub fn new(player: Player, action: Option<Point>) -> Self {
        Self {
            visits: AtomicUsize::new(0),
            q: FixedPointQ::new(),
            action,
            player,
            candidates: Mutex::new(None),
            simulated: AtomicBool::new(false),
        }
    }

    pub fn visits(&self) -> usize {
        self.visits.load(Ordering::Relaxed)
    }

    /// Accumulated outcome, from the point of view of the player who moved
    /// into this node.
    pub fn q(&self) -> f64 {
        self.q.get()
    }

    pub fn mean_q(&self) -> f64 {
        match self.visits() {
            0 => 0.0,
            visits => self.q() / visits as f64,
        }
    }

    /// The move that leads from the parent to this node; `None` for the root.
    pub fn action(&self) -> Option<Point> {
        self.action
    }

    /// The player to move at this node.
    pub fn player(&self) -> Player {
        self.player
    }

    /// Whether this node's own simulation has been propagated.
    pub fn is_simulated(&self) -> bool {
        self.simulated.load(Ordering::Acquire)
    }

    /// The moves not yet expanded, best last. `None` until the first
    /// expansion of this node has asked the evaluator.
    pub fn remaining_candidates(&self) -> Option<Vec<Point>> {
        self.candidates.lock().clone()
    }

    fn record(&self, value: f64) {
        self.q.add(value);
        self.visits.fetch_add(1, Ordering::Relaxed);
    }

    fn mark_simulated(&self) -> bool {
        !self.simulated.swap(true, Ordering::Release)
    }
}

/// Selection picks among simulated children only. Outcome of a node as seen
/// by the player who chose it, plus the usual exploration bonus.
pub fn uct_value(node: &SearchNode<UctNodeData>, exploration: f64) -> f64 {
    let data = node.data();
    if !data.is_simulated() {
        return f64::NEG_INFINITY;
    }
    let visits = data.visits().max(1) as f64;
    let explore = match node.parent() {
        Some(parent) => 2.0 * (parent.data().visits().max(1) as f64).ln() / visits,
        None => 2.0,
    };
    data.q() / visits + exploration * explore.sqrt()
}

/// Index of the first element with the highest key.
pub fn select_by_key<T, Iter, KeyFn>(elts: Iter, mut key_fn: KeyFn) -> Option<usize>
where
    Iter: Iterator<Item = T>,
    KeyFn: FnMut(&T) -> f64,
{
    let mut choice = None;
    let mut best_so_far = f64::NEG_INFINITY;
    for (index, elt) in elts.enumerate() {
        let score = key_fn(&elt);
        if choice.is_none() || score > best_so_far {
            choice = Some(index);
            best_so_far = score;
        }
    }
    choice
}

/// Every candidate list keeps at least this many moves, whatever their mass.
pub const MIN_CANDIDATES: usize = 2;

/// Probability mass the candidate list must cover, growing as the game
/// settles.
pub fn mass_threshold(step: usize) -> f64 {
    if step > 200 {
        0.95
    } else if step > 100 {
        0.9
    } else {
        0.8
    }
}

pub const DEFAULT_EXPLORATION: f64 = 0.707;

/// UCT over Go positions.
///
/// Nodes are expanded one move at a time, in the order proposed by the
/// move evaluator, and each new leaf is scored with a single rollout.
pub struct UctPolicy<B, E, R> {
    init_board: B,
    init_player: Player,
    komi: f64,
    evaluator: E,
    rollout: R,
    exploration: f64,
}

impl<B, E, R> UctPolicy<B, E, R>
where
    B: Board,
    E: MoveEvaluator<B>,
    R: Rollout<B>,
{
    pub fn new(init_board: B, init_player: Player, komi: f64, evaluator: E, rollout: R) -> Self {
        Self {
            init_board,
            init_player,
            komi,
            evaluator,
            rollout,
            exploration: DEFAULT_EXPLORATION,
        }
    }

    pub fn with_exploration(mut self, exploration_constant: f64) -> Self {
        assert!(
            exploration_constant > 0.0,
            "exploration constant is {} (must be positive)",
            exploration_constant
        );
        self.exploration = exploration_constant;
        self
    }

    pub fn exploration_constant(&self) -> f64 {
        self.exploration
    }

    pub fn komi(&self) -> f64 {
        self.komi
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn init_board(&self) -> &B {
        &self.init_board
    }

    /// Asks the evaluator for move probabilities and keeps the most likely
    /// good moves, ordered from worst to best.
    pub fn candidate_moves(&self, board: &B, player: Player) -> Result<Vec<Point>, EvaluationError> {
        let probabilities = self.evaluator.evaluate(board, player)?;
        let height = board.height();

        let mut ranked: Vec<(Point, f32)> = probabilities
            .iter()
            .enumerate()
            .map(|(i, &p)| (Point::from_index(i, height), if p.is_finite() { p } else { 0.0 }))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut good = vec![false; board.cells()];
        for point in board.good_moves(player) {
            if let Some(flag) = good.get_mut(point.index(height)) {
                *flag = true;
            }
        }

        let threshold = mass_threshold(board.step());
        let mut mass = 0.0;
        let mut kept = Vec::with_capacity(board.cells());
        for (point, p) in ranked {
            if mass >= threshold && kept.len() >= MIN_CANDIDATES {
                break;
            }
            if good.get(point.index(height)).copied().unwrap_or(false) {
                mass += p as f64;
                kept.push(point);
            }
        }

        kept.retain(|&point| board.status(point, player) == PositionStatus::Ok);
        kept.reverse();
        trace!(candidates = kept.len(), mass, threshold, "candidate moves ready");
        Ok(kept)
    }

    /// Appends the best remaining candidate of `node` as a new child, if the
    /// node has room and candidates left. The candidate list is computed on
    /// the first call for a node; if that fails it stays unset.
    fn expand<'a>(
        &self,
        tree: &'a SearchTree<Self>,
        node: &'a SearchNode<UctNodeData>,
        board: &B,
        player: Player,
    ) -> Result<Option<&'a SearchNode<UctNodeData>>, EvaluationError> {
        let mut guard = node.data().candidates.lock();
        if node.len() >= tree.child_capacity() {
            return Ok(None);
        }
        if guard.is_none() {
            *guard = Some(self.candidate_moves(board, player)?);
        }

        let candidates = match guard.as_mut() {
            Some(candidates) => candidates,
            None => return Ok(None),
        };
        let action = match candidates.last() {
            Some(&action) => action,
            None => return Ok(None),
        };

        let child = tree.push_child(node, UctNodeData::new(player.opponent(), Some(action)));
        if child.is_some() {
            candidates.pop();
        }
        Ok(child)
    }

    fn select_child(&self, node: &SearchNode<UctNodeData>) -> Option<usize> {
        let mut scores: SmallVec<[f64; 64]> = SmallVec::new();
        scores.extend(node.children().map(|child| uct_value(child, self.exploration)));
        select_by_key(scores.into_iter(), |&score| score)
    }
}

/// A worker's random generator, used by rollouts.
#[derive(Clone)]
pub struct PolicyRng {
    rng: ChaCha20Rng,
}

impl PolicyRng {
    pub fn new(seed: u64) -> Self {
        let rng = ChaCha20Rng::seed_from_u64(seed);
        Self { rng }
    }

    pub fn rng(&mut self) -> &mut ChaCha20Rng {
        &mut self.rng
    }
}

impl<B, E, R> TreePolicy for UctPolicy<B, E, R>
where
    B: Board,
    E: MoveEvaluator<B>,
    R: Rollout<B>,
{
    type NodeData = UctNodeData;
    type State = B;
    type ThreadLocalData = PolicyRng;
    type Error = EvaluationError;

    fn children_capacity(&self) -> usize {
        (self.init_board.cells() / 8).max(1)
    }

    fn root_data(&self) -> UctNodeData {
        UctNodeData::new(self.init_player, None)
    }

    fn root_state(&self) -> B {
        self.init_board.clone()
    }

    fn thread_local_data(&self, seed: u64) -> PolicyRng {
        PolicyRng::new(seed)
    }

    fn tree_policy<'a>(
        &self,
        tree: &'a SearchTree<Self>,
        _tld: &mut PolicyRng,
    ) -> Result<Option<(&'a SearchNode<UctNodeData>, B)>, EvaluationError> {
        let mut crnt = tree.root();
        let mut board = self.init_board.clone();
        let mut player = self.init_player;

        loop {
            // statistics of a node under simulation are not meaningful yet
            if !crnt.data().is_simulated() {
                return Ok(None);
            }

            if crnt.len() < tree.child_capacity() {
                if let Some(leaf) = self.expand(tree, crnt, &board, player)? {
                    if let Some(action) = leaf.data().action() {
                        board.place(action, player);
                    }
                    return Ok(Some((leaf, board)));
                }
            }

            let child = match self.select_child(crnt).and_then(|index| crnt.child(index)) {
                Some(child) => child,
                None => {
                    trace!(node = crnt.id(), "no candidates left, restarting from root");
                    return Ok(None);
                }
            };
            debug_assert!(child.parent().map_or(false, |parent| ptr::eq(parent, crnt)));

            if let Some(action) = child.data().action() {
                board.place(action, player);
            }
            player = player.opponent();
            crnt = child;
        }
    }

    fn default_policy(
        &self,
        _tree: &SearchTree<Self>,
        leaf: &SearchNode<UctNodeData>,
        board: B,
        tld: &mut PolicyRng,
    ) -> Result<(), EvaluationError> {
        // higher is better for white
        let outcome = self
            .rollout
            .run(&board, self.komi, leaf.data().player(), tld.rng());

        let mut crnt = Some(leaf);
        while let Some(node) = crnt {
            let data = node.data();
            // black to move here means white moved into this node
            match data.player() {
                Player::Black => data.record(outcome),
                Player::White => data.record(-outcome),
            }
            crnt = node.parent();
        }

        let first = leaf.data().mark_simulated();
        debug_assert!(first, "node {} simulated twice", leaf.id());
        Ok(())
    }

    fn final_index(&self, node: &SearchNode<UctNodeData>) -> Option<usize> {
        if node.is_root() {
            let mut summary = String::new();
            for child in node.children() {
                let data = child.data();
                let _ = write!(
                    summary,
                    "[visits={}, q={:.3}, uct={:.3}] ",
                    data.visits(),
                    data.q(),
                    uct_value(child, self.exploration)
                );
            }
            debug!(children = node.len(), %summary, "root children");
        }
        self.select_child(node)
    }

    fn describe(&self, node: &SearchNode<UctNodeData>) -> String {
        let data = node.data();
        let action = match data.action() {
            Some(point) => point.to_string(),
            None => "root".to_string(),
        };
        format!(
            "{} to={} visits={} mean_q={:.3}",
            action,
            data.player(),
            data.visits(),
            data.mean_q()
        )
    }
}
