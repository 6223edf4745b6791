//! Per-sender stream reassembly: buffer datagrams, extract complete frames,
//! resynchronize on garbage.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::protocol::Frame;
use crate::wire::{decode_frame, FrameDecodeError};

/// Cap on buffered bytes per sender. A sender that overflows it is assumed
/// desynchronized beyond repair; its stale bytes are dropped and reassembly
/// restarts from the newest datagram.
pub const MAX_BUFFER_PER_SENDER: usize = 4096;

/// Reassembles frames from possibly fragmented, interleaved datagrams.
/// One buffer per sender IP; buffers are independent, so a malformed stream
/// from one sender never affects another.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffers: HashMap<IpAddr, Vec<u8>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` to the sender's buffer and extract every complete frame.
    /// Runs to exhaustion: on a complete frame the consumed bytes are removed,
    /// on bad magic one byte is skipped, on a short read it stops and waits.
    /// Consumed bytes are gone before the caller dispatches anything, so a
    /// dispatch failure cannot corrupt the buffer.
    pub fn feed(&mut self, sender: IpAddr, bytes: &[u8]) -> Vec<Frame> {
        let buf = self.buffers.entry(sender).or_default();
        if buf.len() + bytes.len() > MAX_BUFFER_PER_SENDER {
            buf.clear();
        }
        buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut consumed = 0;
        loop {
            match decode_frame(&buf[consumed..]) {
                Ok((frame, n)) => {
                    frames.push(frame);
                    consumed += n;
                }
                Err(FrameDecodeError::BadMagic) => consumed += 1,
                Err(FrameDecodeError::NeedMore) => break,
            }
        }
        buf.drain(..consumed);
        if buf.is_empty() {
            self.buffers.remove(&sender);
        }
        frames
    }

    /// Number of senders with bytes still buffered.
    pub fn sender_count(&self) -> usize {
        self.buffers.len()
    }

    /// Bytes currently buffered for `sender`.
    pub fn buffered(&self, sender: IpAddr) -> usize {
        self.buffers.get(&sender).map(Vec::len).unwrap_or(0)
    }
}
