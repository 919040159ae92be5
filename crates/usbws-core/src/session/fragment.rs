//! FIFO holding area for received binary frames.
//!
//! Each WebSocket binary frame becomes one *fragment*.  Fragments are never
//! merged or split when they arrive; a reader that wants fewer bytes than the
//! head fragment holds consumes part of it, and the queue remembers how far
//! into the head fragment it got.
//!
//! ```text
//!            head_offset
//!                 │
//!   front ─▶ [ x x x . . . . ]  [ . . . . ]  [ . . ] ◀─ back
//!             consumed  unread
//! ```
//!
//! The queue is not synchronised; [`Session`](super::Session) wraps it in its
//! own mutex.

use std::collections::VecDeque;

/// Ordered byte fragments with partial consumption of the head.
#[derive(Debug, Default)]
pub struct FragmentQueue {
    fragments: VecDeque<Vec<u8>>,
    /// Bytes of the front fragment already handed to a reader.
    head_offset: usize,
    /// Unread bytes across all fragments.
    available: usize,
}

impl FragmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one fragment.  Empty fragments are ignored.
    pub fn enqueue(&mut self, data: Vec<u8>) {
        if data.is_empty() {
            return;
        }
        self.available += data.len();
        self.fragments.push_back(data);
    }

    /// Copies up to `buf.len()` unread bytes into `buf` in arrival order and
    /// returns how many were copied.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < buf.len() {
            let Some(front) = self.fragments.front() else {
                break;
            };

            let unread = &front[self.head_offset..];
            let n = unread.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&unread[..n]);
            copied += n;
            self.head_offset += n;

            if self.head_offset == front.len() {
                self.fragments.pop_front();
                self.head_offset = 0;
            }
        }

        self.available -= copied;
        copied
    }

    /// Discards every fragment and returns how many bytes were dropped.
    pub fn drain(&mut self) -> usize {
        let dropped = self.available;
        self.fragments.clear();
        self.head_offset = 0;
        self.available = 0;
        dropped
    }

    /// Unread bytes in the queue.
    pub fn available(&self) -> usize {
        self.available
    }

    /// Number of fragments still (partly) unread.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }
}
