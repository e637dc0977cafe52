// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The client-facing console session (C5, §4.5).
//!
//! A [`ConsoleSession`] is the handle a subscriber-facing transport (a
//! websocket, a long-poll HTTP endpoint, the proxy relay) holds after
//! attaching to a node's [`ConsoleHandler`](crate::handler::ConsoleHandler).
//! It hides the handler's identity behind a [`Sink`] so the transport
//! never has to know which transport mode the handler thinks it's
//! talking to, and it is the one place that reacts to a node changing
//! collective-manager ownership mid-session — the handler only tells it
//! to leave (`SessionEvent::Rehome`); re-resolving through the registry
//! and reattaching is this module's job.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::error::ConsoleError;
use crate::handler::ConnectState;
use crate::registry::Handle;
use crate::replay::ReplayStatus;

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Identifies one attached subscriber within a handler's subscriber map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Everything a handler pushes at an attached subscriber (§4.4, §4.5).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Normalised, UTF-8 subscriber-facing bytes (replay or live).
    Bytes(Bytes),
    /// The backend connect state changed.
    Status { connectstate: ConnectState, error: Option<ConsoleError> },
    /// The node's attached-subscriber count changed.
    ClientCount(usize),
    /// The handler is being torn down; the session must detach.
    Deleting,
    /// `collective.manager` moved away from this process; the session
    /// must re-resolve the node through the registry and reattach.
    Rehome,
}

/// Delivery target a handler fans events out to.
///
/// Push mode hands events straight to an unbounded channel (a websocket
/// writer task, typically); poll mode buffers them for a client that
/// comes back to ask for what it missed (§4.5 "poll vs push sinks").
#[derive(Clone)]
pub enum Sink {
    Push(mpsc::UnboundedSender<SessionEvent>),
    Poll(Arc<PollQueue>),
}

#[derive(Debug)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("session sink closed")
    }
}

impl std::error::Error for SinkClosed {}

impl Sink {
    pub fn send(&self, event: SessionEvent) -> Result<(), SinkClosed> {
        match self {
            Sink::Push(tx) => tx.send(event).map_err(|_| SinkClosed),
            Sink::Poll(queue) => {
                queue.push(event);
                Ok(())
            }
        }
    }
}

#[derive(Debug)]
pub enum PollError {
    /// Another poll call is already outstanding on this session.
    AlreadyPolling,
    /// This session was not attached in poll mode.
    NotPollMode,
}

impl fmt::Display for PollError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPolling => f.write_str("a poll is already outstanding for this session"),
            Self::NotPollMode => f.write_str("session was not attached in poll mode"),
        }
    }
}

impl std::error::Error for PollError {}

/// Buffered events for a poll-mode subscriber.
///
/// Adjacent `Bytes` events are coalesced on push so a burst of small
/// backend writes collapses into one chunk by the time a client polls
/// (§4.5). Polling is non-reentrant: a second concurrent poll on the
/// same queue fails immediately rather than queueing up.
pub struct PollQueue {
    events: StdMutex<VecDeque<SessionEvent>>,
    notify: Notify,
    poll_lock: AsyncMutex<()>,
}

impl PollQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { events: StdMutex::new(VecDeque::new()), notify: Notify::new(), poll_lock: AsyncMutex::new(()) })
    }

    fn push(&self, event: SessionEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if let (SessionEvent::Bytes(next), Some(SessionEvent::Bytes(_))) = (&event, events.back()) {
            if let Some(SessionEvent::Bytes(prev)) = events.back_mut() {
                let mut merged = BytesMut::with_capacity(prev.len() + next.len());
                merged.extend_from_slice(prev);
                merged.extend_from_slice(next);
                *prev = merged.freeze();
                self.notify.notify_waiters();
                return;
            }
        }
        events.push_back(event);
        self.notify.notify_waiters();
    }

    /// Wait up to `wait` for at least one event, then drain and return
    /// everything buffered. Returns immediately if events are already
    /// queued.
    pub async fn poll(&self, wait: Duration) -> Result<Vec<SessionEvent>, PollError> {
        let _guard = self.poll_lock.try_lock().map_err(|_| PollError::AlreadyPolling)?;

        if self.is_empty() {
            let notified = self.notify.notified();
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        Ok(events.drain(..).collect())
    }

    fn is_empty(&self) -> bool {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

/// Resolves a node name to its current handler (implemented by the
/// registry, C7). Kept as a trait here rather than depending on the
/// registry module directly, so a session can be tested without one.
pub trait NodeResolver: Send + Sync + 'static {
    fn resolve(&self, node: &str) -> BoxFuture<'_, Option<Handle>>;
}

const IDLE_GRACE: Duration = Duration::from_secs(15);

struct IdleReaper {
    last_poll: Arc<StdMutex<Instant>>,
    threshold: Arc<StdMutex<Duration>>,
    cancel: CancellationToken,
}

impl IdleReaper {
    fn spawn(id: SessionId, handler: Arc<AsyncMutex<Handle>>) -> Self {
        let last_poll = Arc::new(StdMutex::new(Instant::now()));
        let threshold = Arc::new(StdMutex::new(IDLE_GRACE));
        let cancel = CancellationToken::new();

        let last_poll_task = last_poll.clone();
        let threshold_task = threshold.clone();
        let cancel_task = cancel.clone();
        tokio::spawn(async move {
            loop {
                let remaining = {
                    let last = *last_poll_task.lock().unwrap_or_else(|e| e.into_inner());
                    let th = *threshold_task.lock().unwrap_or_else(|e| e.into_inner());
                    th.saturating_sub(last.elapsed())
                };
                let sleep_for = remaining.max(Duration::from_millis(50));
                tokio::select! {
                    _ = tokio::time::sleep(sleep_for) => {}
                    _ = cancel_task.cancelled() => return,
                }
                let last = *last_poll_task.lock().unwrap_or_else(|e| e.into_inner());
                let th = *threshold_task.lock().unwrap_or_else(|e| e.into_inner());
                if last.elapsed() >= th {
                    let handler = handler.lock().await;
                    handler.detach(id).await;
                    return;
                }
            }
        });

        Self { last_poll, threshold, cancel }
    }

    fn record_poll(&self, wait: Duration) {
        *self.last_poll.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        *self.threshold.lock().unwrap_or_else(|e| e.into_inner()) = wait + IDLE_GRACE;
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// One subscriber's attachment to one node's console (§4.5).
pub struct ConsoleSession {
    id: SessionId,
    node: Arc<str>,
    username: String,
    handler: Arc<AsyncMutex<Handle>>,
    resolver: Arc<dyn NodeResolver>,
    sink: Sink,
    idle: Option<IdleReaper>,
}

impl ConsoleSession {
    /// Attach a new session to `handler` for `node`, delivering events
    /// through `sink`. Returns the session handle plus the replay bytes
    /// and status the caller should deliver to the subscriber first.
    /// `skip_replay` suppresses the returned replay bytes (and, for a
    /// proxied node, tells the remote owner not to bother sending them).
    pub async fn attach(
        node: impl Into<String>,
        username: impl Into<String>,
        handler: Handle,
        resolver: Arc<dyn NodeResolver>,
        sink: Sink,
        skip_replay: bool,
    ) -> (Arc<Self>, Bytes, ReplayStatus) {
        let id = SessionId::next();
        let username = username.into();
        let outcome = handler.attach(id, username.clone(), sink.clone(), skip_replay).await;

        let handler = Arc::new(AsyncMutex::new(handler));
        let idle = match &sink {
            Sink::Poll(_) => Some(IdleReaper::spawn(id, handler.clone())),
            Sink::Push(_) => None,
        };

        let session = Arc::new(Self { id, node: Arc::from(node.into()), username, handler, resolver, sink, idle });
        (session, outcome.replay_bytes, outcome.status)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub async fn write(&self, data: Bytes) {
        self.handler.lock().await.write(data).await;
    }

    pub async fn send_break(&self) {
        self.handler.lock().await.send_break().await;
    }

    pub async fn reopen(&self) {
        self.handler.lock().await.reopen().await;
    }

    pub async fn get_recent(&self) -> (Bytes, ReplayStatus) {
        self.handler.lock().await.get_recent().await
    }

    /// Poll mode only: wait up to `wait` and return the events buffered
    /// since the last poll.
    pub async fn poll(&self, wait: Duration) -> Result<Vec<SessionEvent>, PollError> {
        let Sink::Poll(queue) = &self.sink else {
            return Err(PollError::NotPollMode);
        };
        if let Some(idle) = &self.idle {
            idle.record_poll(wait);
        }
        queue.poll(wait).await
    }

    /// Re-resolve this session's node through the registry and reattach
    /// to whatever handler now owns it, in response to a
    /// [`SessionEvent::Rehome`]. Returns the fresh replay if a handler
    /// was found; `None` if the node has no local handler to reattach to.
    pub async fn rehome(&self) -> Option<(Bytes, ReplayStatus)> {
        let new_handler = self.resolver.resolve(&self.node).await?;
        let old = {
            let mut guard = self.handler.lock().await;
            std::mem::replace(&mut *guard, new_handler.clone())
        };
        old.detach(self.id).await;
        let outcome = new_handler.attach(self.id, self.username.clone(), self.sink.clone(), false).await;
        Some((outcome.replay_bytes, outcome.status))
    }

    pub async fn detach(&self) {
        if let Some(idle) = &self.idle {
            idle.cancel();
        }
        self.handler.lock().await.detach(self.id).await;
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
