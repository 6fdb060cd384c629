//! The capture adapter contract (§6): `get(block)` fills a caller-owned
//! block of raw frames, reporting one of four outcomes per call.

use crate::types::{CaptureStats, Timestamp};

/// Frames per [`PacketBlock`]. Chosen to amortize the per-call overhead
/// of a capture adapter without holding an unbounded amount of memory.
pub const BLOCK_SIZE: usize = 32;

/// One captured frame before protocol parsing.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub ts: Timestamp,
    pub data: Vec<u8>,
    /// Original on-wire length, which may exceed `data.len()` if the
    /// capture snaplen truncated the frame.
    pub wire_len: usize,
}

/// A caller-owned, reusable buffer of captured frames. An adapter fills
/// the first `cnt` slots and leaves the rest untouched.
pub struct PacketBlock {
    frames: [Option<RawFrame>; BLOCK_SIZE],
    pub cnt: usize,
}

impl PacketBlock {
    pub fn new() -> Self {
        Self {
            frames: std::array::from_fn(|_| None),
            cnt: 0,
        }
    }

    pub fn clear(&mut self) {
        self.cnt = 0;
    }

    pub fn push(&mut self, frame: RawFrame) -> bool {
        if self.cnt >= BLOCK_SIZE {
            return false;
        }
        self.frames[self.cnt] = Some(frame);
        self.cnt += 1;
        true
    }

    pub fn filled(&self) -> &[Option<RawFrame>] {
        &self.frames[..self.cnt]
    }

    pub fn capacity() -> usize {
        BLOCK_SIZE
    }
}

impl Default for PacketBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one `get` call, matching §6's `{PARSED, NOT_PARSED, TIMEOUT,
/// ERROR}` contract.
#[derive(Debug)]
pub enum GetResult {
    /// `block.cnt` frames were filled.
    Parsed,
    /// The source is exhausted (end of file, interface closed).
    NotParsed,
    /// No frames were available within the adapter's poll interval; the
    /// caller should retry.
    Timeout,
    /// The adapter failed and should be treated as terminated by the
    /// caller; the message is logged by the core.
    Error(String),
}

/// Abstraction over a packet capture backend (file replay or a live
/// interface). One instance corresponds to one indexer mesh input.
pub trait CaptureSource: Send {
    fn get(&mut self, block: &mut PacketBlock) -> GetResult;

    fn stats(&self) -> CaptureStats;
}
