// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Console handler (C4, §4.4): the per-node, per-tenant state machine.
//!
//! One [`ConsoleHandler`] owns the backend connection for a single node:
//! it connects the plugin-supplied backend, feeds bytes to the terminal
//! buffer and the subscriber-facing normaliser, persists the stream,
//! reconnects with backoff, and reacts to attribute changes. All mutable
//! state lives inside a single actor task (`Actor::run`), reached only
//! through `Command` messages sent over an unbounded channel — the same
//! shape as the reference crate's `WsBridge::run_loop`
//! (`upstream/bridge.rs`): one task owns the state, everything else is a
//! message. No field of [`Actor`] is ever touched from outside its task.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{BackendConsole, BackendEvent, ConsolePlugin};
use crate::collective::Collective;
use crate::config::{
    AttributeChange, ConfigStore, LoggingPolicy, WatchToken, ATTR_COLLECTIVE_MANAGER, ATTR_CONSOLE_LOGGING,
    ATTR_CONSOLE_METHOD,
};
use crate::error::{ConsoleError, PluginError};
use crate::event_log::{eventdata_bits, LogSink, TransitionEvent};
use crate::normalize::{self, Utf8CpDecoder};
use crate::replay::{self, ReplayStatus};
use crate::session::{SessionEvent, SessionId, Sink};
use crate::terminal::{self, Terminal};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The literal fragment fed into the emulator on every disconnect (§4.4,
/// §9 Open Questions). `ESC c` (RIS) resets the terminal; the trailing
/// prose is then the only thing on screen until new bytes arrive. This is
/// an intentionally preserved quirk of the reference implementation, not
/// a design choice made here.
const DISCONNECT_FRAGMENT: &[u8] =
    b"\x1bc[no replay buffer due to console.logging attribute set to none or interactive,\r\nconnection loss, or service restart]";

/// Bare `ESC c` (RIS) flushed into the emulator and to live subscribers on
/// the first byte chunk after a reconnect, draining `clear_pending` (§4.4
/// step 7). Unlike [`DISCONNECT_FRAGMENT`] this carries no prose: it only
/// needs to wipe the placeholder screen before new output lands.
const CLEAR_PENDING_RESET: &[u8] = b"\x1bc";

/// Lifecycle of the backend link (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Unconnected,
    Connecting,
    Connected,
}

impl ConnectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unconnected => "unconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// The attribute keys every handler always watches, regardless of what a
/// backend additionally declares via `config_attributes` (§4.4 Creation).
const BASE_WATCH_KEYS: [&str; 3] = [ATTR_CONSOLE_METHOD, ATTR_CONSOLE_LOGGING, ATTR_COLLECTIVE_MANAGER];

/// Collaborators a [`ConsoleHandler`] needs, bundled so callers (the
/// registry) don't have to thread five `Arc`s through every call site.
pub struct HandlerDeps {
    pub config: Arc<dyn ConfigStore>,
    pub collective: Arc<dyn Collective>,
    pub plugin: Arc<dyn ConsolePlugin>,
    pub log_sink: Arc<dyn LogSink>,
    /// Rough collective size, used by the retry backoff formula (§3
    /// invariant 5). A static estimate is fine: it only scales the delay,
    /// it does not need to track membership precisely.
    pub cluster_size: usize,
}

/// A lightweight handle to a running [`Actor`]. Cloning shares the same
/// underlying actor; dropping every clone (plus the registry's own copy)
/// lets the actor's `cmd_rx` drain and the task end.
#[derive(Clone)]
pub struct ConsoleHandler {
    cmd_tx: mpsc::UnboundedSender<Command>,
    node: Arc<str>,
}

/// Outcome of an `attach` call: the replay the newly-attached session must
/// deliver to its sink before returning, plus the connect status at that
/// moment (§4.5 — "replay bytes precede any live bytes").
pub struct AttachOutcome {
    pub replay_bytes: Bytes,
    pub status: ReplayStatus,
}

enum Command {
    Attach {
        session_id: SessionId,
        username: String,
        sink: Sink,
        reply: oneshot::Sender<AttachOutcome>,
    },
    Detach {
        session_id: SessionId,
    },
    Write(Bytes),
    SendBreak,
    Reopen,
    GetRecent(oneshot::Sender<(Bytes, ReplayStatus)>),
    GetBufferAge(oneshot::Sender<Option<Duration>>),
    AttributeChanged(AttributeChange),
    Close(oneshot::Sender<()>),
    BackendBytes {
        generation: u64,
        data: Bytes,
    },
    BackendDisconnected {
        generation: u64,
    },
    ConnectOutcome {
        generation: u64,
        outcome: Result<Box<dyn BackendConsole>, PluginError>,
    },
    RetryFire {
        generation: u64,
    },
}

impl ConsoleHandler {
    /// Create a handler for `node` and spawn its actor task.
    pub fn spawn(node: impl Into<String>, deps: HandlerDeps) -> Self {
        let node: Arc<str> = Arc::from(node.into());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let attrs = deps.config.get_node_attributes(
            &[node.to_string()],
            &[ATTR_CONSOLE_LOGGING.to_owned(), ATTR_COLLECTIVE_MANAGER.to_owned()],
        );
        let attrs = attrs.get(node.as_ref()).cloned().unwrap_or_default();

        let policy = LoggingPolicy::from_attribute(attrs.get(ATTR_CONSOLE_LOGGING).map(String::as_str));
        let myname = deps.collective.get_myname();
        let is_local = attrs.get(ATTR_COLLECTIVE_MANAGER).map(|m| m.is_empty() || m == &myname).unwrap_or(true);

        let mut actor = Actor {
            node: node.clone(),
            config: deps.config,
            collective: deps.collective,
            plugin: deps.plugin,
            log_sink: deps.log_sink,
            cluster_size: deps.cluster_size.max(1),
            cmd_tx: cmd_tx.clone(),
            connect_state: ConnectState::Unconnected,
            error: None,
            is_local,
            is_ondemand: policy.is_ondemand,
            do_logging: policy.do_logging,
            alive: true,
            retry_time: 0,
            terminal: Terminal::new(),
            decoder: Utf8CpDecoder::new(),
            app_mode: false,
            shift_in: None,
            last_time: Instant::now(),
            subscribers: HashMap::new(),
            backend: None,
            attrib_watch: None,
            generation: 0,
            retry_cancel: None,
            watched_keys: BASE_WATCH_KEYS.iter().map(|s| s.to_string()).collect(),
            clear_pending: false,
        };

        let (attr_tx, mut attr_rx) = mpsc::unbounded_channel();
        let watch_keys: Vec<String> = BASE_WATCH_KEYS.iter().map(|s| s.to_string()).collect();
        let token = actor.config.watch_attributes(&[node.to_string()], &watch_keys, attr_tx);
        actor.attrib_watch = Some(token);

        let forward_tx = cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(change) = attr_rx.recv().await {
                if forward_tx.send(Command::AttributeChanged(change)).is_err() {
                    break;
                }
            }
        });

        if actor.is_local && !actor.is_ondemand {
            actor.connect_state = ConnectState::Connecting;
            actor.begin_connect();
        }

        tokio::spawn(actor.run(cmd_rx));

        Self { cmd_tx, node }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn attach(
        &self,
        session_id: SessionId,
        username: impl Into<String>,
        sink: Sink,
    ) -> BoxFuture<'_, AttachOutcome> {
        let username = username.into();
        Box::pin(async move {
            let (reply_tx, reply_rx) = oneshot::channel();
            if self
                .cmd_tx
                .send(Command::Attach { session_id, username, sink, reply: reply_tx })
                .is_err()
            {
                return AttachOutcome { replay_bytes: Bytes::new(), status: dead_status() };
            }
            reply_rx.await.unwrap_or(AttachOutcome { replay_bytes: Bytes::new(), status: dead_status() })
        })
    }

    pub fn detach(&self, session_id: SessionId) -> BoxFuture<'_, ()> {
        let _ = self.cmd_tx.send(Command::Detach { session_id });
        Box::pin(async {})
    }

    pub fn write(&self, data: Bytes) -> BoxFuture<'_, ()> {
        let _ = self.cmd_tx.send(Command::Write(data));
        Box::pin(async {})
    }

    pub fn send_break(&self) -> BoxFuture<'_, ()> {
        let _ = self.cmd_tx.send(Command::SendBreak);
        Box::pin(async {})
    }

    pub fn reopen(&self) -> BoxFuture<'_, ()> {
        let _ = self.cmd_tx.send(Command::Reopen);
        Box::pin(async {})
    }

    pub fn get_recent(&self) -> BoxFuture<'_, (Bytes, ReplayStatus)> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            if self.cmd_tx.send(Command::GetRecent(tx)).is_err() {
                return (Bytes::new(), dead_status());
            }
            rx.await.unwrap_or((Bytes::new(), dead_status()))
        })
    }

    pub fn get_buffer_age(&self) -> BoxFuture<'_, Option<Duration>> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            if self.cmd_tx.send(Command::GetBufferAge(tx)).is_err() {
                return None;
            }
            rx.await.unwrap_or(None)
        })
    }

    /// Idempotent: safe to call more than once (§8 property 1).
    pub fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            if self.cmd_tx.send(Command::Close(tx)).is_ok() {
                let _ = rx.await;
            }
        })
    }
}

fn dead_status() -> ReplayStatus {
    ReplayStatus { connectstate: ConnectState::Unconnected.as_str().to_owned(), client_count: 0 }
}

struct Actor {
    node: Arc<str>,
    config: Arc<dyn ConfigStore>,
    collective: Arc<dyn Collective>,
    plugin: Arc<dyn ConsolePlugin>,
    log_sink: Arc<dyn LogSink>,
    cluster_size: usize,
    cmd_tx: mpsc::UnboundedSender<Command>,

    connect_state: ConnectState,
    error: Option<ConsoleError>,
    is_local: bool,
    is_ondemand: bool,
    do_logging: bool,
    alive: bool,
    retry_time: u32,
    terminal: Terminal,
    decoder: Utf8CpDecoder,
    app_mode: bool,
    shift_in: Option<u8>,
    last_time: Instant,
    subscribers: HashMap<SessionId, Subscriber>,
    backend: Option<Box<dyn BackendConsole>>,
    attrib_watch: Option<WatchToken>,
    /// Bumped on every connect attempt; backend events and retry timers
    /// tag themselves with the generation active when they were started,
    /// so a stale one arriving after a newer connect is silently dropped.
    generation: u64,
    retry_cancel: Option<CancellationToken>,
    watched_keys: Vec<String>,
    /// Set when a disconnect has fed [`DISCONNECT_FRAGMENT`] into the
    /// buffer; drained by the next [`Actor::on_backend_bytes`] call, which
    /// flushes a bare `ESC c` to the emulator and to live subscribers
    /// before processing the new bytes (§4.4 step 7).
    clear_pending: bool,
}

struct Subscriber {
    username: String,
    sink: Sink,
}

impl Actor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            self.handle(cmd).await;
        }
    }

    async fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Attach { session_id, username, sink, reply } => {
                self.do_attach(session_id, username, sink, reply).await;
            }
            Command::Detach { session_id } => self.do_detach(session_id),
            Command::Write(data) => self.do_write(data).await,
            Command::SendBreak => self.do_send_break().await,
            Command::Reopen => {
                self.cancel_backend().await;
                self.begin_connect();
            }
            Command::GetRecent(reply) => {
                let (bytes, status) = replay::generate(&self.terminal, self.connect_state.as_str(), self.subscribers.len());
                let _ = reply.send((bytes, status));
            }
            Command::GetBufferAge(reply) => {
                let age = if self.subscribers.is_empty() && self.connect_state != ConnectState::Connected {
                    None
                } else {
                    Some(self.last_time.elapsed())
                };
                let _ = reply.send(age);
            }
            Command::AttributeChanged(change) => self.on_attribute_change(change).await,
            Command::Close(reply) => {
                self.do_close().await;
                let _ = reply.send(());
            }
            Command::BackendBytes { generation, data } => {
                if generation == self.generation {
                    self.on_backend_bytes(data).await;
                }
            }
            Command::BackendDisconnected { generation } => {
                if generation == self.generation {
                    self.handle_disconnect().await;
                }
            }
            Command::ConnectOutcome { generation, outcome } => {
                if generation == self.generation {
                    self.on_connect_outcome(outcome).await;
                }
            }
            Command::RetryFire { generation } => {
                if generation == self.generation && self.alive && self.is_local {
                    self.begin_connect();
                }
            }
        }
    }

    async fn do_attach(&mut self, session_id: SessionId, username: String, sink: Sink, reply: oneshot::Sender<AttachOutcome>) {
        let existing_for_user = self.subscribers.values().filter(|s| s.username == username).count();
        self.subscribers.insert(session_id, Subscriber { username: username.clone(), sink });

        self.log_sink.log_transition(
            &self.node,
            TransitionEvent::ClientConnect,
            Some(&username),
            if existing_for_user > 0 { 2 } else { 1 },
        );

        let (replay_bytes, status) =
            replay::generate(&self.terminal, self.connect_state.as_str(), self.subscribers.len());
        let _ = reply.send(AttachOutcome { replay_bytes, status: status.clone() });

        self.notify_client_count();

        if self.connect_state == ConnectState::Unconnected {
            self.cancel_retry();
            self.begin_connect();
        }
    }

    fn do_detach(&mut self, session_id: SessionId) {
        let Some(removed) = self.subscribers.remove(&session_id) else {
            return; // already detached: idempotent
        };
        let remaining = self.subscribers.values().filter(|s| s.username == removed.username).count().min(2) as u32;
        self.log_sink.log_transition(&self.node, TransitionEvent::ClientDisconnect, Some(&removed.username), remaining);

        if self.is_ondemand && self.subscribers.is_empty() {
            self.disconnect_ondemand();
        } else {
            self.notify_client_count();
        }
    }

    async fn do_write(&mut self, data: Bytes) {
        if self.connect_state != ConnectState::Connected {
            return;
        }
        let Some(backend) = self.backend.as_ref() else { return };
        if let Err(err) = backend.write(data).await {
            warn!(node = %self.node, error = %err, "console write failed");
            self.handle_disconnect().await;
        }
    }

    async fn do_send_break(&mut self) {
        if self.connect_state != ConnectState::Connected {
            return;
        }
        if let Some(backend) = self.backend.as_ref() {
            if let Err(err) = backend.send_break().await {
                warn!(node = %self.node, error = %err, "console send_break failed");
            }
        }
    }

    fn disconnect_ondemand(&mut self) {
        if self.connect_state == ConnectState::Unconnected {
            return;
        }
        self.generation += 1;
        self.cancel_retry();
        let backend = self.backend.take();
        self.connect_state = ConnectState::Unconnected;
        self.error = None;
        if let Some(backend) = backend {
            tokio::spawn(async move {
                let _ = backend.close().await;
            });
        }
        self.notify_status();
    }

    /// Guard + kick off a connect attempt (§4.4 Connect procedure).
    fn begin_connect(&mut self) {
        if !self.is_local {
            return;
        }
        self.generation += 1;
        let generation = self.generation;
        self.cancel_retry();
        self.connect_state = ConnectState::Connecting;

        let attrs = self.config.get_node_attributes(&[self.node.to_string()], &[]);
        let attrs = attrs.get(self.node.as_ref()).cloned().unwrap_or_default();

        let created = self.plugin.create(&self.node, &attrs);
        let cmd_tx = self.cmd_tx.clone();
        let node = self.node.clone();

        match created {
            Ok(mut backend) => {
                tokio::spawn(async move {
                    let (events_tx, events_rx) = mpsc::channel(256);
                    let outcome = match backend.connect(events_tx).await {
                        Ok(()) => {
                            tokio::spawn(relay_backend_events(generation, events_rx, cmd_tx.clone()));
                            Ok(backend)
                        }
                        Err(err) => Err(err),
                    };
                    let _ = cmd_tx.send(Command::ConnectOutcome { generation, outcome });
                });
            }
            Err(err) => {
                debug!(node = %node, error = %err, "console plugin create failed");
                let _ = cmd_tx.send(Command::ConnectOutcome { generation, outcome: Err(err) });
            }
        }
    }

    async fn on_connect_outcome(&mut self, outcome: Result<Box<dyn BackendConsole>, PluginError>) {
        match outcome {
            Ok(backend) => {
                self.expand_watch_keys(backend.config_attributes());
                self.backend = Some(backend);
                self.connect_state = ConnectState::Connected;
                self.error = None;
                self.retry_time = 0;
                self.last_time = Instant::now();
                self.log_sink.log_transition(&self.node, TransitionEvent::ConsoleConnect, None, 0);
                self.notify_status();
            }
            Err(PluginError::NotImplemented) | Err(PluginError::NotFound) => {
                self.terminal.reset();
                self.error = Some(ConsoleError::Misconfigured);
                self.connect_state = ConnectState::Unconnected;
                self.notify_status();
                // misconfigured is terminal: no retry scheduled.
            }
            Err(err) => {
                self.error = Some(ConsoleError::from(&err));
                self.connect_state = ConnectState::Unconnected;
                self.notify_status();
                if !matches!(err, PluginError::Other(_)) {
                    debug!(node = %self.node, error = %err, "console connect failed, scheduling retry");
                } else {
                    warn!(node = %self.node, error = %err, "console connect failed, scheduling retry");
                }
                self.schedule_retry();
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.retry_time = (self.retry_time.saturating_mul(2) + 1).min(120);
        let delay = compute_retry_delay(self.retry_time, self.cluster_size);
        let cancel = CancellationToken::new();
        self.retry_cancel = Some(cancel.clone());
        let generation = self.generation;
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    let _ = cmd_tx.send(Command::RetryFire { generation });
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    fn cancel_retry(&mut self) {
        if let Some(cancel) = self.retry_cancel.take() {
            cancel.cancel();
        }
    }

    /// Re-register the attribute watch once a connected backend declares
    /// extra keys it cares about (§4.4 Creation), beyond the three every
    /// handler always watches.
    fn expand_watch_keys(&mut self, extra: &[&str]) {
        let new_keys: Vec<&str> = extra.iter().copied().filter(|k| !self.watched_keys.iter().any(|w| w == k)).collect();
        if new_keys.is_empty() {
            return;
        }
        self.watched_keys.extend(new_keys.iter().map(|s| s.to_string()));
        if let Some(old) = self.attrib_watch.take() {
            self.config.remove_watcher(old);
        }
        let (attr_tx, mut attr_rx) = mpsc::unbounded_channel();
        let token = self.config.watch_attributes(&[self.node.to_string()], &self.watched_keys, attr_tx);
        self.attrib_watch = Some(token);
        let forward_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(change) = attr_rx.recv().await {
                if forward_tx.send(Command::AttributeChanged(change)).is_err() {
                    break;
                }
            }
        });
    }

    async fn cancel_backend(&mut self) {
        self.generation += 1;
        self.cancel_retry();
        if let Some(backend) = self.backend.take() {
            let _ = backend.close().await;
        }
        self.connect_state = ConnectState::Unconnected;
    }

    async fn on_backend_bytes(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        terminal::scan_mode_latches(&data, &mut self.app_mode, &mut self.shift_in);
        let eventdata = eventdata_bits(self.app_mode, self.shift_in);
        let decoded = normalize::normalize(&mut self.decoder, &data, self.shift_in);
        self.last_time = Instant::now();

        if self.do_logging {
            self.log_sink.log_chunk(&self.node, &decoded, eventdata);
        }

        if self.clear_pending {
            self.clear_pending = false;
            feed_guarded(&mut self.terminal, CLEAR_PENDING_RESET);
            self.fanout(SessionEvent::Bytes(Bytes::from_static(CLEAR_PENDING_RESET)));
        }

        feed_guarded(&mut self.terminal, &data);

        self.fanout(SessionEvent::Bytes(Bytes::from(decoded.into_bytes())));
    }

    async fn handle_disconnect(&mut self) {
        self.generation += 1;
        self.cancel_retry();
        self.backend = None;
        self.connect_state = ConnectState::Unconnected;
        self.error = None;

        // The prose fragment only ever lands in the buffer (so a client
        // attaching while disconnected sees it in its replay); live
        // subscribers are told only the connect state, never the fragment
        // itself (§4.4 step 7, §9 Open Questions).
        feed_guarded(&mut self.terminal, DISCONNECT_FRAGMENT);
        self.clear_pending = true;

        self.log_sink.log_transition(&self.node, TransitionEvent::ConsoleDisconnect, None, 0);
        self.notify_status();

        if self.alive {
            self.begin_connect();
        } else {
            self.terminal.reset();
            self.clear_pending = false;
        }
    }

    async fn on_attribute_change(&mut self, change: AttributeChange) {
        let myname = self.collective.get_myname();
        let manager_changed = change.changed_keys.iter().any(|k| k == ATTR_COLLECTIVE_MANAGER);
        let logging_changed = change.changed_keys.iter().any(|k| k == ATTR_CONSOLE_LOGGING);
        let only_logging_changed = logging_changed && change.changed_keys.len() == 1;

        if manager_changed {
            let manager = change.attributes.get(ATTR_COLLECTIVE_MANAGER).map(String::as_str).unwrap_or("");
            let now_local = manager.is_empty() || manager == myname;
            if self.is_local && !now_local {
                self.is_local = false;
                self.cancel_backend().await;
                self.fanout(SessionEvent::Rehome);
                self.subscribers.clear();
            } else if !self.is_local && now_local {
                self.is_local = true;
            }
        }

        if logging_changed {
            let policy =
                LoggingPolicy::from_attribute(change.attributes.get(ATTR_CONSOLE_LOGGING).map(String::as_str));
            self.do_logging = policy.do_logging;
            self.is_ondemand = policy.is_ondemand;
        }

        if self.is_local {
            if only_logging_changed {
                if !self.is_ondemand && self.connect_state == ConnectState::Unconnected {
                    self.cancel_retry();
                    self.begin_connect();
                }
            } else if !self.is_ondemand {
                self.cancel_backend().await;
                self.begin_connect();
            } else if !self.subscribers.is_empty() {
                self.cancel_backend().await;
                self.begin_connect();
            }
        }
    }

    async fn do_close(&mut self) {
        if !self.alive {
            return; // idempotent
        }
        self.alive = false;
        self.cancel_retry();
        self.generation += 1;

        self.fanout(SessionEvent::Deleting);

        if let Some(backend) = self.backend.take() {
            let _ = backend.close().await;
        }
        self.connect_state = ConnectState::Unconnected;

        if let Some(token) = self.attrib_watch.take() {
            self.config.remove_watcher(token);
        }
    }

    fn notify_status(&mut self) {
        let event = SessionEvent::Status { connectstate: self.connect_state, error: self.error };
        self.fanout(event);
    }

    fn notify_client_count(&mut self) {
        let count = self.subscribers.len();
        self.fanout(SessionEvent::ClientCount(count));
    }

    /// Deliver `event` to every subscriber. A failing sink is logged and
    /// skipped; it is not detached here (§5 Fan-out — it's reaped by its
    /// own idle path instead).
    fn fanout(&mut self, event: SessionEvent) {
        for (id, sub) in self.subscribers.iter() {
            if let Err(err) = sub.sink.send(event.clone()) {
                warn!(node = %self.node, session = ?id, error = %err, "subscriber sink delivery failed");
            }
        }
    }
}

/// Feed bytes into the emulator, rebuilding it silently if it reports
/// itself unhealthy afterwards (§4.2, §7 — parser failures must not
/// propagate to the caller).
fn feed_guarded(terminal: &mut Terminal, bytes: &[u8]) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        terminal.feed(bytes);
    }));
    if result.is_err() || !terminal.is_healthy() {
        warn!("terminal emulator reported corrupted state; reinstantiating");
        *terminal = Terminal::new();
    }
}

async fn relay_backend_events(generation: u64, mut events: mpsc::Receiver<BackendEvent>, cmd_tx: mpsc::UnboundedSender<Command>) {
    while let Some(event) = events.recv().await {
        let sent = match event {
            BackendEvent::Bytes(data) => cmd_tx.send(Command::BackendBytes { generation, data }),
            BackendEvent::Disconnected => {
                let result = cmd_tx.send(Command::BackendDisconnected { generation });
                let _ = result;
                break;
            }
        };
        if sent.is_err() {
            break;
        }
    }
}

/// §3 invariant 5: `retry_time` is capped by the caller before this runs;
/// this just evaluates the delay formula and applies jitter.
fn compute_retry_delay(retry_time: u32, cluster_size: usize) -> Duration {
    let raw = (cluster_size as f64 * 0.05 * retry_time as f64).max(120.0);
    let jitter = rand::rng().random_range(1.0..2.0);
    Duration::from_secs_f64(raw * jitter)
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
