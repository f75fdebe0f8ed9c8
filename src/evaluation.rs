//! Client for the remote move-probability service.
//!
//! Every call opens a fresh TCP connection, sends one length-prefixed
//! request and reads one length-prefixed response. A length prefix is an
//! 8-byte little-endian count of the payload bytes that follow it; the
//! payloads are protobuf messages.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use prost::Message;
use thiserror::Error;
use tracing::trace;

use crate::board::{Board, Player, Point};
use crate::config::EndpointConfig;

/// Size of the length prefix in front of every frame.
pub const LENGTH_PREFIX: usize = 8;

/// Upper bound on an acceptable frame, far above a 19x19 response.
pub const MAX_FRAME_LEN: u64 = 16 << 20;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("I/O error talking to the evaluation service: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("zero-length frame")]
    EmptyFrame,

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: u64 },

    #[error("malformed response: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("response is for a board of {actual} cells, expected {expected}")]
    BoardSizeMismatch { expected: usize, actual: usize },

    #[error("response carries {actual} probabilities for {expected} cells")]
    ProbabilityCount { expected: usize, actual: usize },
}

#[derive(Clone, PartialEq, Message)]
pub struct EvaluationRequest {
    /// Number of cells on the board.
    #[prost(uint32, tag = "1")]
    pub board_size: u32,
    #[prost(uint32, tag = "2")]
    pub width: u32,
    #[prost(uint32, tag = "3")]
    pub height: u32,
    /// 1 for black, 2 for white.
    #[prost(int32, tag = "4")]
    pub player: i32,
    /// One entry per cell in index order: 0 empty, 1 black, 2 white.
    #[prost(int32, repeated, tag = "5")]
    pub cells: Vec<i32>,
    #[prost(uint32, tag = "6")]
    pub step: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct EvaluationResponse {
    #[prost(uint32, tag = "1")]
    pub board_size: u32,
    #[prost(float, repeated, tag = "2")]
    pub possibility: Vec<f32>,
}

fn player_code(player: Option<Player>) -> i32 {
    match player {
        None => 0,
        Some(Player::Black) => 1,
        Some(Player::White) => 2,
    }
}

impl EvaluationRequest {
    pub fn from_board<B: Board>(board: &B, player: Player) -> Self {
        let height = board.height();
        let cells = (0..board.cells())
            .map(|i| player_code(board.cell(Point::from_index(i, height))))
            .collect();

        Self {
            board_size: board.cells() as u32,
            width: board.width() as u32,
            height: height as u32,
            player: player_code(Some(player)),
            cells,
            step: board.step() as u32,
        }
    }
}

impl EvaluationResponse {
    /// Checks the response against the board it was requested for and
    /// returns the per-cell probabilities.
    pub fn into_probabilities(self, cells: usize) -> Result<Vec<f32>, EvaluationError> {
        if self.board_size as usize != cells {
            return Err(EvaluationError::BoardSizeMismatch {
                expected: cells,
                actual: self.board_size as usize,
            });
        }
        if self.possibility.len() != cells {
            return Err(EvaluationError::ProbabilityCount {
                expected: cells,
                actual: self.possibility.len(),
            });
        }
        Ok(self.possibility)
    }
}

/// Fills `buf` completely, failing instead of blocking forever when the peer
/// closes early.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), EvaluationError> {
    let mut received = 0;
    while received < buf.len() {
        match reader.read(&mut buf[received..]) {
            Ok(0) => {
                return Err(EvaluationError::Truncated {
                    expected: buf.len(),
                    received,
                })
            }
            Ok(n) => received += n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), EvaluationError> {
    if payload.is_empty() {
        return Err(EvaluationError::EmptyFrame);
    }
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, EvaluationError> {
    let mut prefix = [0u8; LENGTH_PREFIX];
    read_full(reader, &mut prefix)?;
    let len = u64::from_le_bytes(prefix);
    if len == 0 {
        return Err(EvaluationError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(EvaluationError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut payload = vec![0u8; len as usize];
    read_full(reader, &mut payload)?;
    Ok(payload)
}

/// Produces a probability for every cell of a board.
pub trait MoveEvaluator<B: Board>: Sync {
    /// Probabilities in cell index order, one per cell.
    fn evaluate(&self, board: &B, player: Player) -> Result<Vec<f32>, EvaluationError>;
}

/// Talks to the move-probability service over TCP, one connection per call.
#[derive(Debug, Clone)]
pub struct EvaluationClient {
    endpoint: EndpointConfig,
}

impl EvaluationClient {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    fn connect(&self) -> Result<TcpStream, EvaluationError> {
        let stream = match self.endpoint.timeout {
            Some(timeout) => TcpStream::connect_timeout(&self.endpoint.addr, timeout)?,
            None => TcpStream::connect(self.endpoint.addr)?,
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(self.endpoint.timeout)?;
        stream.set_write_timeout(self.endpoint.timeout)?;
        Ok(stream)
    }

    /// Sends `payload` as one frame and returns the payload of the reply.
    pub fn round_trip(&self, payload: &[u8]) -> Result<Vec<u8>, EvaluationError> {
        trace!(addr = %self.endpoint.addr, "starting evaluation call");
        let mut stream = self.connect()?;

        trace!(len = payload.len(), "writing request");
        write_frame(&mut stream, payload)?;
        let reply = read_frame(&mut stream)?;
        trace!(len = reply.len(), "read response");

        Ok(reply)
    }

    pub fn call(&self, request: &EvaluationRequest) -> Result<EvaluationResponse, EvaluationError> {
        let reply = self.round_trip(&request.encode_to_vec())?;
        Ok(EvaluationResponse::decode(reply.as_slice())?)
    }
}

impl<B: Board> MoveEvaluator<B> for EvaluationClient {
    fn evaluate(&self, board: &B, player: Player) -> Result<Vec<f32>, EvaluationError> {
        let request = EvaluationRequest::from_board(board, player);
        self.call(&request)?.into_probabilities(board.cells())
    }
}
