#![allow(dead_code)]

use std::io::Write;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use prost::Message;
use rand::Rng;

use uct_search::evaluation::{read_frame, write_frame, EvaluationRequest, EvaluationResponse};
use uct_search::{Board, EvaluationError, MoveEvaluator, Player, Point, PositionStatus, Rollout};

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// An empty-point-only board: no captures, every empty point is good.
#[derive(Clone, Debug)]
pub struct GridBoard {
    width: usize,
    height: usize,
    stones: Vec<Option<Player>>,
    step: usize,
}

impl GridBoard {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            stones: vec![None; width * height],
            step: 0,
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }
}

impl Board for GridBoard {
    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn step(&self) -> usize {
        self.step
    }

    fn cell(&self, point: Point) -> Option<Player> {
        self.stones[point.index(self.height)]
    }

    fn good_moves(&self, _player: Player) -> Vec<Point> {
        (0..self.cells())
            .filter(|&i| self.stones[i].is_none())
            .map(|i| Point::from_index(i, self.height))
            .collect()
    }

    fn status(&self, point: Point, _player: Player) -> PositionStatus {
        if self.cell(point).is_none() {
            PositionStatus::Ok
        } else {
            PositionStatus::Occupied
        }
    }

    fn place(&mut self, point: Point, player: Player) {
        let index = point.index(self.height);
        assert!(self.stones[index].is_none(), "{} is already occupied", point);
        self.stones[index] = Some(player);
        self.step += 1;
    }
}

/// Same probability for every cell; counts calls.
#[derive(Default)]
pub struct UniformEvaluator {
    pub calls: AtomicUsize,
}

impl UniformEvaluator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<B: Board> MoveEvaluator<B> for UniformEvaluator {
    fn evaluate(&self, board: &B, _player: Player) -> Result<Vec<f32>, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0 / board.cells() as f32; board.cells()])
    }
}

/// Returns a fixed probability vector; counts calls.
pub struct FixedEvaluator {
    pub probabilities: Vec<f32>,
    pub calls: AtomicUsize,
}

impl FixedEvaluator {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self {
            probabilities,
            calls: AtomicUsize::new(0),
        }
    }
}

impl<B: Board> MoveEvaluator<B> for FixedEvaluator {
    fn evaluate(&self, _board: &B, _player: Player) -> Result<Vec<f32>, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.probabilities.clone())
    }
}

/// Scores every position with the same outcome.
pub struct FixedRollout(pub f64);

impl<B: Board> Rollout<B> for FixedRollout {
    fn run<R: Rng + ?Sized>(&self, _board: &B, _komi: f64, _player: Player, _rng: &mut R) -> f64 {
        self.0
    }
}

/// Uniform outcome in `[-1, 1]`.
pub struct RandomRollout;

impl<B: Board> Rollout<B> for RandomRollout {
    fn run<R: Rng + ?Sized>(&self, _board: &B, _komi: f64, _player: Player, rng: &mut R) -> f64 {
        rng.gen_range(-1.0..=1.0)
    }
}

/// How the stub service answers one connection.
#[derive(Clone, Debug)]
pub enum Reply {
    /// A valid response with uniform probabilities.
    Uniform,
    /// A valid response claiming a board of this many cells.
    WrongSize(u32),
    /// Announces a full response but closes after a few payload bytes.
    CloseMidResponse,
    /// A zero length field.
    Empty,
}

/// A single-threaded move-probability service on a random local port.
///
/// Connections are answered with `script` in order, then with
/// `Reply::Uniform` forever.
pub struct StubServer {
    pub addr: SocketAddr,
    pub requests: Arc<Mutex<Vec<EvaluationRequest>>>,
    pub connections: Arc<AtomicUsize>,
}

impl StubServer {
    pub fn spawn(script: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let seen = requests.clone();
        let count = connections.clone();
        thread::spawn(move || {
            let mut script = script.into_iter();
            for stream in listener.incoming() {
                let mut stream = match stream {
                    Ok(stream) => stream,
                    Err(_) => continue,
                };
                count.fetch_add(1, Ordering::SeqCst);

                let request = match read_frame(&mut stream) {
                    Ok(payload) => EvaluationRequest::decode(payload.as_slice()).unwrap(),
                    Err(_) => continue,
                };
                let cells = request.board_size;
                seen.lock().unwrap().push(request);

                let uniform = |board_size: u32| EvaluationResponse {
                    board_size,
                    possibility: vec![1.0 / cells as f32; cells as usize],
                };
                let _ = match script.next().unwrap_or(Reply::Uniform) {
                    Reply::Uniform => write_frame(&mut stream, &uniform(cells).encode_to_vec()),
                    Reply::WrongSize(size) => {
                        write_frame(&mut stream, &uniform(size).encode_to_vec())
                    }
                    Reply::CloseMidResponse => {
                        let payload = uniform(cells).encode_to_vec();
                        let _ = stream.write_all(&(payload.len() as u64).to_le_bytes());
                        let _ = stream.write_all(&payload[..4]);
                        Ok(())
                    }
                    Reply::Empty => stream
                        .write_all(&0u64.to_le_bytes())
                        .map_err(EvaluationError::from),
                };
            }
        });

        Self {
            addr,
            requests,
            connections,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}
