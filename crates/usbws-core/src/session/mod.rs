//! Per-connection session: the blocking socket on top of an event loop.
//!
//! # Two sides of one session (for beginners)
//!
//! A [`Session`] is shared by exactly two parties:
//!
//! 1. **The event loop** that owns the WebSocket.  It must never block, so it
//!    only calls the short, non-blocking methods in the *event loop API*
//!    section below: [`Session::on_binary`], [`Session::next_write`],
//!    [`Session::data_flushed`] and friends.
//!
//! 2. **One worker thread** running the tunnelled protocol.  It calls the
//!    [`BlockingSocket`] methods, which park the thread on a condition
//!    variable until the event loop has made progress.
//!
//! ```text
//!  worker thread                      event loop
//!  ─────────────                      ──────────
//!  send(buf) ──▶ pending write ──wake──▶ next_write() ─▶ binary frame(s)
//!     ▲  (blocks)                           │
//!     └──────────── write_cond ◀── data_flushed()
//!
//!  recv(buf) ◀── FragmentQueue ◀── on_binary() ◀── binary frame
//!     (blocks on recv_cond)
//! ```
//!
//! # States
//!
//! A session is either **Active** or **Discontinued**.  Discontinued is
//! terminal.  The transition wakes every waiter, after which `send` and
//! `recv` fail instead of blocking.
//!
//! # Locks
//!
//! Each concern has its own mutex: the pending write (with `write_cond`), the
//! fragment queue (with `recv_cond`), and the keepalive bookkeeping.  When two
//! are held at once the order is always write → keepalive.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::debug;

pub mod error;
pub mod fragment;
pub mod health;
pub mod socket;

use error::{DiscontinueReason, SessionError};
use fragment::FragmentQueue;
use socket::{BlockingSocket, PeerAddr};

// ── Event-loop facing types ───────────────────────────────────────────────────

/// What the event loop should put on the wire at a write opportunity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// One binary frame holding the next slice of the pending write.
    Data(Vec<u8>),
    /// A keepalive ping.
    Ping,
}

/// Result of handling a pong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// The ping was answered; the session stays up.
    Answered,
    /// The session is already discontinued and should be closed now.
    CloseNow,
}

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PendingWrite {
    buf: Vec<u8>,
    flushed: usize,
}

#[derive(Debug, Default)]
struct WriteState {
    pending: Option<PendingWrite>,
    /// Set while a write opportunity is in progress: between handing out a
    /// frame and hearing whether it was flushed.
    writable: bool,
}

#[derive(Debug)]
struct Keepalive {
    last_activity: Instant,
    ping_pending: bool,
    ping_sent: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Session ───────────────────────────────────────────────────────────────────

/// State shared between the event loop and the worker of one connection.
#[derive(Debug)]
pub struct Session {
    id: u64,
    peer: PeerAddr,
    cont: AtomicBool,
    reason: Mutex<Option<DiscontinueReason>>,
    keepalive: Mutex<Keepalive>,
    write: Mutex<WriteState>,
    write_cond: Condvar,
    recv: Mutex<FragmentQueue>,
    recv_cond: Condvar,
    loop_wake: Notify,
}

impl Session {
    /// Creates an Active session.  Activity starts counting now.
    pub fn new(id: u64, peer: PeerAddr) -> Self {
        Self {
            id,
            peer,
            cont: AtomicBool::new(true),
            reason: Mutex::new(None),
            keepalive: Mutex::new(Keepalive {
                last_activity: Instant::now(),
                ping_pending: false,
                ping_sent: false,
            }),
            write: Mutex::new(WriteState::default()),
            write_cond: Condvar::new(),
            recv: Mutex::new(FragmentQueue::new()),
            recv_cond: Condvar::new(),
            loop_wake: Notify::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.cont.load(Ordering::SeqCst)
    }

    /// The first reason recorded by [`Session::discontinue`], if any.
    pub fn reason(&self) -> Option<DiscontinueReason> {
        *lock(&self.reason)
    }

    fn discontinued_error(&self) -> SessionError {
        SessionError::Discontinued(
            self.reason()
                .unwrap_or(DiscontinueReason::TransportClosed),
        )
    }

    /// Handle the event loop waits on.  Woken whenever the worker has
    /// something to write or the session is discontinued.
    pub fn loop_wake(&self) -> &Notify {
        &self.loop_wake
    }

    /// Moves the session to Discontinued and wakes everyone.
    ///
    /// Returns `true` only for the call that made the transition.
    pub fn discontinue(&self, reason: DiscontinueReason) -> bool {
        {
            let mut slot = lock(&self.reason);
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        let was_active = self.cont.swap(false, Ordering::SeqCst);
        if was_active {
            debug!(session = self.id, %reason, "discontinue");
        }

        // Taking each lock before notifying closes the window between a
        // waiter's flag check and its wait.
        drop(lock(&self.write));
        self.write_cond.notify_all();
        drop(lock(&self.recv));
        self.recv_cond.notify_all();
        self.loop_wake.notify_one();

        was_active
    }

    // ── Event loop API ────────────────────────────────────────────────────────

    /// Queues one received binary frame.  Returns `false` (and drops the
    /// data) once the session is discontinued.
    pub fn on_binary(&self, data: Vec<u8>) -> bool {
        let len = data.len();
        {
            // Checked under the queue lock: `discontinue` clears the flag
            // before taking it, so nothing is queued after the transition.
            let mut queue = lock(&self.recv);
            if !self.is_active() {
                return false;
            }
            queue.enqueue(data);
            self.recv_cond.notify_all();
        }
        self.touch();
        debug!(session = self.id, bytes = len, "received binary frame");
        true
    }

    /// Refreshes the last-activity timestamp.
    pub fn touch(&self) {
        lock(&self.keepalive).last_activity = Instant::now();
    }

    /// Handles a pong from the peer.
    pub fn on_pong(&self) -> PongOutcome {
        if !self.is_active() {
            return PongOutcome::CloseNow;
        }
        let mut keepalive = lock(&self.keepalive);
        keepalive.last_activity = Instant::now();
        keepalive.ping_sent = false;
        debug!(session = self.id, "pong");
        PongOutcome::Answered
    }

    /// Asks the event loop to send a ping at its next write opportunity.
    pub fn request_ping(&self) {
        lock(&self.keepalive).ping_pending = true;
        self.loop_wake.notify_one();
    }

    /// Called at a write opportunity.  Hands out at most `max` bytes of the
    /// pending write or, when there is none, a pending ping.
    ///
    /// The event loop must report the outcome with [`Session::data_flushed`]
    /// or [`Session::ping_flushed`] before asking again; until then this
    /// returns `None`.
    pub fn next_write(&self, max: usize) -> Option<Outgoing> {
        if !self.is_active() {
            return None;
        }
        let mut write = lock(&self.write);
        if write.writable {
            debug!(session = self.id, "write opportunity already in progress");
            return None;
        }

        let chunk = write.pending.as_ref().map(|pending| {
            let end = pending.buf.len().min(pending.flushed + max);
            pending.buf[pending.flushed..end].to_vec()
        });
        if let Some(chunk) = chunk {
            write.writable = true;
            // Data frames count as liveness from our side; drop a queued ping.
            lock(&self.keepalive).ping_pending = false;
            return Some(Outgoing::Data(chunk));
        }

        let mut keepalive = lock(&self.keepalive);
        if keepalive.ping_pending {
            keepalive.ping_pending = false;
            write.writable = true;
            return Some(Outgoing::Ping);
        }
        None
    }

    /// Records that `n` bytes handed out by [`Session::next_write`] reached
    /// the transport.  Wakes the sender once the whole buffer is out.
    pub fn data_flushed(&self, n: usize) {
        let mut write = lock(&self.write);
        write.writable = false;
        let done = match write.pending.as_mut() {
            Some(pending) => {
                pending.flushed += n;
                debug!(
                    session = self.id,
                    flushed = pending.flushed,
                    total = pending.buf.len(),
                    "sent binary frame"
                );
                pending.flushed >= pending.buf.len()
            }
            None => false,
        };
        if done {
            write.pending = None;
            self.write_cond.notify_all();
        }
    }

    /// Records the outcome of a ping handed out by [`Session::next_write`].
    pub fn ping_flushed(&self, sent: bool) {
        let mut write = lock(&self.write);
        write.writable = false;
        if sent {
            lock(&self.keepalive).ping_sent = true;
            debug!(session = self.id, "ping");
        } else {
            debug!(session = self.id, "ping error");
        }
    }

    /// `true` while there is unflushed data or a queued ping.
    pub fn wants_write(&self) -> bool {
        let write = lock(&self.write);
        write.pending.is_some() || lock(&self.keepalive).ping_pending
    }

    /// Time since the last frame or pong from the peer.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(lock(&self.keepalive).last_activity)
    }

    /// `true` while a ping is on the wire without a pong.
    pub fn ping_outstanding(&self) -> bool {
        lock(&self.keepalive).ping_sent
    }

    /// Unread received bytes.
    pub fn queued_input(&self) -> usize {
        lock(&self.recv).available()
    }

    /// Final teardown from the event loop: drops unread fragments and
    /// discontinues.  Returns the number of bytes dropped.
    pub fn close(&self) -> usize {
        let (fragments, dropped) = {
            let mut queue = lock(&self.recv);
            (queue.len(), queue.drain())
        };
        if dropped > 0 {
            debug!(
                session = self.id,
                fragments,
                bytes = dropped,
                "dropped unread input at close"
            );
        }
        self.discontinue(DiscontinueReason::TransportClosed);
        dropped
    }
}

// ── Blocking socket (worker thread) ───────────────────────────────────────────

impl BlockingSocket for Session {
    fn send(&self, buf: &[u8]) -> Result<usize, SessionError> {
        if !self.is_active() {
            return Err(self.discontinued_error());
        }
        if buf.is_empty() {
            return Ok(0);
        }

        {
            let mut write = lock(&self.write);
            if write.pending.is_some() {
                return Err(SessionError::SendInFlight);
            }
            write.pending = Some(PendingWrite {
                buf: buf.to_vec(),
                flushed: 0,
            });
        }
        debug!(session = self.id, bytes = buf.len(), "send requested");
        self.loop_wake.notify_one();

        let mut write = lock(&self.write);
        while self.is_active() && write.pending.is_some() {
            write = self
                .write_cond
                .wait(write)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if write.pending.take().is_some() {
            debug!(session = self.id, "send aborted");
            return Err(self.discontinued_error());
        }
        debug!(session = self.id, bytes = buf.len(), "send completed");
        Ok(buf.len())
    }

    fn recv(&self, buf: &mut [u8], all: bool) -> Result<usize, SessionError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let need = if all { buf.len() } else { 1 };

        let mut queue = lock(&self.recv);
        while queue.available() < need {
            if !self.is_active() {
                debug!(session = self.id, "returning read error");
                return Err(self.discontinued_error());
            }
            queue = self
                .recv_cond
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let n = queue.read_into(buf);
        debug!(session = self.id, bytes = n, "received");
        Ok(n)
    }

    fn shutdown(&self) {
        debug!(session = self.id, "shutdown session");
        self.discontinue(DiscontinueReason::LocalShutdown);
    }

    fn peer(&self) -> PeerAddr {
        self.peer.clone()
    }
}

impl io::Read for &Session {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        BlockingSocket::recv(*self, buf, false).map_err(io::Error::from)
    }
}

impl io::Write for &Session {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        BlockingSocket::send(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SEND_CONTENT;
    use std::sync::Arc;
    use std::thread;

    fn make_session() -> Arc<Session> {
        Arc::new(Session::new(1, PeerAddr::new("127.0.0.1", "5000")))
    }

    /// Plays the event loop for one pending write: hands out chunks until
    /// the write is fully flushed and returns the frames produced.
    fn flush_all(session: &Session) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while let Some(Outgoing::Data(chunk)) = session.next_write(SEND_CONTENT) {
            session.data_flushed(chunk.len());
            frames.push(chunk);
        }
        frames
    }

    #[test]
    fn test_recv_all_assembles_across_fragments() {
        // Arrange: 10 + 20 + 5 bytes arrive as separate frames
        let session = make_session();
        let stream: Vec<u8> = (0..35).collect();
        session.on_binary(stream[..10].to_vec());
        session.on_binary(stream[10..30].to_vec());
        session.on_binary(stream[30..].to_vec());

        // Act
        let mut buf = [0u8; 35];
        let n = session.recv(&mut buf, true).unwrap();

        // Assert
        assert_eq!(n, 35);
        assert_eq!(buf.to_vec(), stream);
    }

    #[test]
    fn test_recv_all_splits_head_fragment_exactly() {
        let session = make_session();
        session.on_binary(vec![1, 2, 3, 4, 5, 6]);

        let mut buf = [0u8; 4];
        assert_eq!(session.recv(&mut buf, true).unwrap(), 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(session.queued_input(), 2);
    }

    #[test]
    fn test_recv_partial_returns_what_is_available() {
        // Arrange: only 3 bytes queued
        let session = make_session();
        session.on_binary(vec![7, 8, 9]);

        // Act: ask for up to 16
        let mut buf = [0u8; 16];
        let n = session.recv(&mut buf, false).unwrap();

        // Assert
        assert_eq!(n, 3);
        assert_eq!(&buf[..3], &[7, 8, 9]);
    }

    #[test]
    fn test_recv_all_waits_for_later_fragments() {
        // Arrange
        let session = make_session();
        let reader = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut buf = [0u8; 8];
                session.recv(&mut buf, true).map(|n| (n, buf))
            })
        };

        // Act: deliver in two pieces after the reader is waiting
        thread::sleep(Duration::from_millis(50));
        session.on_binary(vec![1, 2, 3]);
        thread::sleep(Duration::from_millis(20));
        session.on_binary(vec![4, 5, 6, 7, 8]);

        // Assert
        let (n, buf) = reader.join().unwrap().unwrap();
        assert_eq!(n, 8);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_send_3000_bytes_goes_out_as_two_full_frames() {
        // Arrange
        let session = make_session();
        let payload: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        let sender = {
            let session = Arc::clone(&session);
            let payload = payload.clone();
            thread::spawn(move || session.send(&payload))
        };

        // Act: wait until the write is registered, then play the loop
        while !session.wants_write() {
            thread::sleep(Duration::from_millis(1));
        }
        let frames = flush_all(&session);

        // Assert
        assert_eq!(sender.join().unwrap(), Ok(3000));
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].len(), 1500);
        assert_eq!(frames[1].len(), 1500);
        assert_eq!(frames.concat(), payload);
        assert!(!session.wants_write());
    }

    #[test]
    fn test_send_short_buffer_is_one_frame() {
        let session = make_session();
        let sender = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send(b"hello"))
        };
        while !session.wants_write() {
            thread::sleep(Duration::from_millis(1));
        }

        let frames = flush_all(&session);

        assert_eq!(sender.join().unwrap(), Ok(5));
        assert_eq!(frames, vec![b"hello".to_vec()]);
    }

    #[test]
    fn test_shutdown_wakes_blocked_recv() {
        // Arrange: a reader blocked on an empty queue
        let session = make_session();
        let reader = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                session.recv(&mut buf, true)
            })
        };
        thread::sleep(Duration::from_millis(50));

        // Act
        session.shutdown();

        // Assert
        assert_eq!(
            reader.join().unwrap(),
            Err(SessionError::Discontinued(DiscontinueReason::LocalShutdown))
        );
    }

    #[test]
    fn test_shutdown_wakes_blocked_send() {
        let session = make_session();
        let sender = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send(&[0u8; 4000]))
        };
        while !session.wants_write() {
            thread::sleep(Duration::from_millis(1));
        }

        session.shutdown();

        assert!(sender.join().unwrap().is_err());
        assert!(!session.wants_write());
    }

    #[test]
    fn test_discontinued_session_rejects_io_and_frames() {
        // Arrange
        let session = make_session();
        session.discontinue(DiscontinueReason::TransportClosed);

        // Act / Assert
        assert!(!session.on_binary(vec![1, 2, 3]));
        assert_eq!(session.queued_input(), 0);
        assert_eq!(
            session.send(b"x"),
            Err(SessionError::Discontinued(DiscontinueReason::TransportClosed))
        );
        let mut buf = [0u8; 1];
        assert!(session.recv(&mut buf, false).is_err());
        assert_eq!(session.next_write(SEND_CONTENT), None);
    }

    #[test]
    fn test_first_discontinue_reason_wins() {
        let session = make_session();
        assert!(session.discontinue(DiscontinueReason::KeepaliveTimeout));
        assert!(!session.discontinue(DiscontinueReason::LocalShutdown));
        assert_eq!(session.reason(), Some(DiscontinueReason::KeepaliveTimeout));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let session = make_session();
        session.shutdown();
        session.shutdown();
        assert!(!session.is_active());
    }

    #[test]
    fn test_pending_ping_is_sent_when_no_data() {
        // Arrange
        let session = make_session();
        session.request_ping();

        // Act
        let out = session.next_write(SEND_CONTENT);
        session.ping_flushed(true);

        // Assert
        assert_eq!(out, Some(Outgoing::Ping));
        assert!(session.ping_outstanding());
    }

    #[test]
    fn test_unreported_write_blocks_next_opportunity() {
        // Arrange: a 3000-byte write in flight
        let session = make_session();
        let sender = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.send(&[9u8; 3000]))
        };
        while !session.wants_write() {
            thread::sleep(Duration::from_millis(1));
        }

        // Act: take a frame but do not report it yet
        let first = session.next_write(SEND_CONTENT);
        let while_in_flight = session.next_write(SEND_CONTENT);
        session.data_flushed(SEND_CONTENT);
        let after_report = session.next_write(SEND_CONTENT);
        session.data_flushed(SEND_CONTENT);

        // Assert
        assert!(matches!(first, Some(Outgoing::Data(ref c)) if c.len() == 1500));
        assert_eq!(while_in_flight, None);
        assert!(matches!(after_report, Some(Outgoing::Data(ref c)) if c.len() == 1500));
        assert_eq!(sender.join().unwrap(), Ok(3000));
    }

    #[test]
    fn test_no_frame_is_queued_after_shutdown() {
        // Arrange: an event loop feeding frames as fast as it can
        let session = make_session();
        let feeder = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut accepted = 0usize;
                while session.on_binary(vec![0u8; 64]) {
                    accepted += 1;
                }
                accepted
            })
        };
        thread::sleep(Duration::from_millis(5));

        // Act
        session.shutdown();
        let queued_at_shutdown = session.queued_input();
        let accepted = feeder.join().unwrap();

        // Assert: every accepted frame was queued before the transition
        assert_eq!(session.queued_input(), queued_at_shutdown);
        assert_eq!(queued_at_shutdown, accepted * 64);
    }

    #[test]
    fn test_pong_clears_outstanding_ping() {
        let session = make_session();
        session.request_ping();
        session.next_write(SEND_CONTENT);
        session.ping_flushed(true);

        assert_eq!(session.on_pong(), PongOutcome::Answered);
        assert!(!session.ping_outstanding());
    }

    #[test]
    fn test_pong_on_discontinued_session_requests_close() {
        let session = make_session();
        session.shutdown();
        assert_eq!(session.on_pong(), PongOutcome::CloseNow);
    }

    #[test]
    fn test_close_drains_queue_and_discontinues() {
        let session = make_session();
        session.on_binary(vec![0; 12]);

        let dropped = session.close();

        assert_eq!(dropped, 12);
        assert_eq!(session.queued_input(), 0);
        assert!(!session.is_active());
    }

    #[test]
    fn test_io_read_write_adapters() {
        use std::io::{Read, Write};

        // Arrange
        let session = make_session();
        session.on_binary(b"abc".to_vec());

        // Act
        let mut buf = [0u8; 8];
        let n = (&*session).read(&mut buf).unwrap();
        session.shutdown();
        let err = (&*session).write(b"x").unwrap_err();

        // Assert
        assert_eq!(&buf[..n], b"abc");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
