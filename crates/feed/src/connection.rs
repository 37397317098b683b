//! Connection lifecycle: state machine, backoff schedule, pending queue.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Result;

use crate::error::FeedError;
use crate::message::ControlMessage;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
    /// Reconnect budget spent; only an external connect request leaves
    /// this state.
    Exhausted,
}

/// Result of a send attempt. `Queued` is a soft failure: the frame waits
/// for the next successful connect, and callers decide whether the
/// logical operation should still be considered applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Queued,
}

/// Bounded outbound queue for control frames while disconnected.
///
/// A newer frame with the same (action, symbols) key replaces the queued
/// one; at capacity the oldest frame is evicted. The queue is never
/// replayed into a fresh connection: eviction could drop an unsubscribe
/// while its earlier subscribe survives, so a connect discards the queue
/// and the caller rebuilds the subscription set from scratch.
#[derive(Debug)]
struct PendingQueue {
    frames: VecDeque<ControlMessage>,
    cap: usize,
}

impl PendingQueue {
    fn new(cap: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    fn push(&mut self, frame: ControlMessage) {
        if let Some(i) = self.frames.iter().position(|f| *f == frame) {
            self.frames.remove(i);
            tracing::debug!(?frame, "Replacing queued duplicate control frame");
        }
        if self.frames.len() >= self.cap {
            let evicted = self.frames.pop_front();
            tracing::warn!(?evicted, cap = self.cap, "Pending queue full, evicting oldest");
        }
        self.frames.push_back(frame);
    }

    fn clear(&mut self) {
        self.frames.clear();
    }

    fn len(&self) -> usize {
        self.frames.len()
    }
}

/// Owns one transport for the lifetime of a broker session.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    state: ConnectionState,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    initial_reconnect_delay: Duration,
    pending: PendingQueue,
}

impl<T: Transport> ConnectionManager<T> {
    #[must_use]
    pub fn new(
        transport: T,
        initial_reconnect_delay: Duration,
        max_reconnect_attempts: u32,
        pending_queue_cap: usize,
    ) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            initial_reconnect_delay,
            pending: PendingQueue::new(pending_queue_cap),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Establish the connection. Idempotent: an existing connection is
    /// closed first. On success the attempt counter resets and stale
    /// queued frames are discarded — the feed does not remember
    /// subscriptions across connections, so the caller re-issues the
    /// full desired set instead of replaying the queue.
    ///
    /// # Errors
    ///
    /// Returns the transport error; the state is left in `Error` and the
    /// caller schedules a reconnect.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.close().await;
        self.state = ConnectionState::Connecting;

        match self.transport.connect().await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.reconnect_attempts = 0;
                let stale = self.pending.len();
                if stale > 0 {
                    tracing::debug!(frames = stale, "Discarding stale queued frames on fresh connection");
                }
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Error;
                Err(e)
            }
        }
    }

    /// Send a control frame, or queue it when not connected.
    pub async fn send(&mut self, frame: ControlMessage) -> SendOutcome {
        if self.state != ConnectionState::Connected {
            tracing::warn!(?frame, state = ?self.state, "Not connected, queueing control frame");
            self.pending.push(frame);
            return SendOutcome::Queued;
        }

        match self.transport.send(frame.to_wire()).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                tracing::warn!(error = %e, "Send failed, queueing frame");
                self.state = ConnectionState::Error;
                self.pending.push(frame);
                SendOutcome::Queued
            }
        }
    }

    /// Next inbound text frame. `None` means the connection dropped and
    /// the state moved to `Error`; the caller schedules a reconnect.
    pub async fn recv(&mut self) -> Option<String> {
        match self.transport.next_text().await {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                tracing::warn!("Feed connection closed");
                self.state = ConnectionState::Error;
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Feed receive error");
                self.state = ConnectionState::Error;
                None
            }
        }
    }

    /// Backoff delay for the next reconnect attempt:
    /// `initial_delay * 2^attempts`. Consumes one attempt. At the cap the
    /// state becomes `Exhausted` and no further delay is produced.
    ///
    /// # Errors
    ///
    /// `FeedError::Exhausted` once the attempt budget is spent.
    pub fn next_backoff(&mut self) -> Result<Duration, FeedError> {
        if self.reconnect_attempts >= self.max_reconnect_attempts {
            self.state = ConnectionState::Exhausted;
            return Err(FeedError::Exhausted {
                attempts: self.reconnect_attempts,
            });
        }
        let delay = self.initial_reconnect_delay * 2u32.pow(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        Ok(delay)
    }

    /// Restore the full reconnect budget. Used by explicit user connect
    /// requests, which also recover from `Exhausted`.
    pub fn reset_backoff(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// Close the transport and return to `Disconnected`.
    pub async fn close(&mut self) {
        self.transport.close().await;
        self.state = ConnectionState::Disconnected;
    }
}
