// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::VecDeque;

/// Bounded window over a terminal's output stream.
///
/// The ring holds the most recent `capacity` bytes and remembers how many
/// older bytes it has already let go, so positions are global stream
/// offsets: offset `dropped` is the first byte still held, and
/// `dropped + len` is the end of the stream so far. Late joiners read their
/// catch-up snapshot in these terms.
#[derive(Debug)]
pub struct OutputRing {
    window: VecDeque<u8>,
    capacity: usize,
    /// Bytes that have aged out of the window.
    dropped: u64,
}

/// Result of a positioned read against the ring.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes from the requested offset up to the current end of stream.
    Bytes(Vec<u8>),
    /// The requested offset was overwritten; reading is only possible from
    /// `oldest` onward.
    Overwritten { oldest: u64 },
    /// The requested offset lies beyond what has been written so far.
    Future,
}

impl OutputRing {
    /// Create a ring with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        Self { window: VecDeque::with_capacity(capacity), capacity, dropped: 0 }
    }

    /// Append bytes, aging out the oldest data once the window is full.
    pub fn push(&mut self, data: &[u8]) {
        if data.len() >= self.capacity {
            // The new bytes alone fill the window; everything currently
            // held, plus the head of `data`, becomes history.
            self.dropped += (self.window.len() + data.len() - self.capacity) as u64;
            self.window.clear();
            self.window.extend(&data[data.len() - self.capacity..]);
            return;
        }

        let overflow = (self.window.len() + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.window.drain(..overflow);
            self.dropped += overflow as u64;
        }
        self.window.extend(data);
    }

    /// Total bytes ever pushed through this ring.
    pub fn total_written(&self) -> u64 {
        self.dropped + self.window.len() as u64
    }

    /// Oldest global offset still held.
    pub fn oldest_offset(&self) -> u64 {
        self.dropped
    }

    /// Everything currently retained, with the global offset of its first
    /// byte. This is the catch-up snapshot handed to a new subscriber.
    pub fn snapshot(&self) -> (u64, Vec<u8>) {
        let (front, back) = self.window.as_slices();
        let mut out = Vec::with_capacity(self.window.len());
        out.extend_from_slice(front);
        out.extend_from_slice(back);
        (self.dropped, out)
    }

    /// Read from a global offset to the end of the stream.
    pub fn read_from(&self, offset: u64) -> ReadOutcome {
        if offset > self.total_written() {
            return ReadOutcome::Future;
        }
        if offset < self.dropped {
            return ReadOutcome::Overwritten { oldest: self.dropped };
        }

        let skip = (offset - self.dropped) as usize;
        let (front, back) = self.window.as_slices();
        let mut out = Vec::with_capacity(self.window.len() - skip);
        if skip < front.len() {
            out.extend_from_slice(&front[skip..]);
            out.extend_from_slice(back);
        } else {
            out.extend_from_slice(&back[skip - front.len()..]);
        }
        ReadOutcome::Bytes(out)
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
