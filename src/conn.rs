//! The connection engine: one shared transport, one connection task,
//! many callers.
//!
//! A [`TorCtrl`] is a cheap clone-able handle. All I/O happens on a
//! spawned connection task that writes at most one command at a time
//! and matches each reply block to the oldest in-flight job. Event
//! blocks (650) are peeled off the stream and broadcast to observers
//! without consuming a job.
//!
//! Teardown is race-free: whether triggered by [`TorCtrl::destroy`],
//! end-of-stream, or a protocol violation, every job that ever entered
//! the pipeline resolves exactly once, and the lifecycle ends in
//! [`ConnState::Destroyed`].

use crate::auth::{self, AuthCredential};
use crate::cmd::{
    AddOnion, AuthChallenge, Authenticate, DelOnion, GetConf, GetInfo, QueryProtocolInfo,
    Quit, SendSignal, SetConf, SetEvents, TorCmd,
};
use crate::config::CtrlConfig;
use crate::error::{Result, TorCtrlError};
use crate::events::{
    EventKey, EventNotification, EventRegistry, EventType, Observer, ObserverId,
};
use crate::framing::Framer;
use crate::protocol::Reply;
use crate::queue::{JobHandle, JobOutcome, JobQueue};
use crate::transport;
use crate::types::{CreatedOnionService, OnionAddress, Signal, TorVersion};
use crate::uncaught;
use std::fmt;
use std::sync::Arc;
use tokio::io::{
    split, AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf,
};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Lifecycle of a connection. Transitions are monotonic; a connection
/// never returns to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnState {
    /// The transport is being established.
    Connecting,
    /// Commands are accepted and executed.
    Ready,
    /// Teardown has begun; no new commands are accepted.
    Disconnecting,
    /// Teardown is complete; every job has resolved.
    Destroyed,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::Connecting => "connecting",
            ConnState::Ready => "ready",
            ConnState::Disconnecting => "disconnecting",
            ConnState::Destroyed => "destroyed",
        };
        write!(f, "{s}")
    }
}

/// Monotonic state machine shared between handles and the connection
/// task.
struct Lifecycle {
    tx: watch::Sender<ConnState>,
}

impl Lifecycle {
    fn new() -> Self {
        Lifecycle {
            tx: watch::Sender::new(ConnState::Connecting),
        }
    }

    /// Move forward to `next`. Regressions are ignored.
    fn advance(&self, next: ConnState) {
        let changed = self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(state = %next, "connection state advanced");
        }
    }

    fn state(&self) -> ConnState {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnState> {
        self.tx.subscribe()
    }

    async fn wait_destroyed(&self) {
        let mut rx = self.tx.subscribe();
        while *rx.borrow_and_update() != ConnState::Destroyed {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Handle to a control connection.
///
/// Clones share the same connection; dropping every handle does not
/// close it. Call [`destroy`](Self::destroy) (or send
/// [`quit`](Self::quit)) to tear it down.
#[derive(Clone)]
pub struct TorCtrl {
    queue: Arc<JobQueue>,
    registry: Arc<EventRegistry>,
    lifecycle: Arc<Lifecycle>,
    shutdown: Arc<Notify>,
}

impl TorCtrl {
    /// Connect to the configured control listener and authenticate with
    /// the configured credentials.
    pub async fn connect(config: CtrlConfig) -> Result<Self> {
        let stream = transport::connect(&config.address, config.connect_timeout).await?;
        let ctrl = Self::launch(stream, config.uncaught.clone());
        ctrl.authenticate(&config.auth).await?;
        Ok(ctrl)
    }

    /// Connect to 127.0.0.1:9051 with NULL authentication.
    pub async fn connect_default() -> Result<Self> {
        Self::connect(CtrlConfig::default()).await
    }

    /// Drive an already-established transport. Does not authenticate.
    ///
    /// Useful for tests and for transports this crate does not know how
    /// to open itself.
    pub fn launch<S>(stream: S, uncaught: uncaught::Handler) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = split(stream);
        let (block_tx, block_rx) = mpsc::channel(32);
        let reader = tokio::spawn(read_loop(Framer::new(BufReader::new(read_half)), block_tx));

        let queue = JobQueue::new();
        let registry = Arc::new(EventRegistry::new(uncaught));
        let lifecycle = Arc::new(Lifecycle::new());
        let shutdown = Arc::new(Notify::new());

        let task = ConnTask {
            writer: write_half,
            blocks: block_rx,
            reader,
            queue: queue.clone(),
            registry: registry.clone(),
            lifecycle: lifecycle.clone(),
            shutdown: shutdown.clone(),
            inflight: None,
        };
        tokio::spawn(task.run());

        lifecycle.advance(ConnState::Ready);
        TorCtrl {
            queue,
            registry,
            lifecycle,
            shutdown,
        }
    }

    /// Enqueue a command without waiting for it.
    ///
    /// Jobs execute in enqueue order, one at a time. The returned
    /// handle resolves with the command's typed result, or with
    /// [`TorCtrlError::ConnectionLost`] / [`TorCtrlError::Cancelled`]
    /// if the connection goes away first.
    pub fn enqueue<C>(&self, cmd: C) -> Result<JobHandle<C::Output>>
    where
        C: TorCmd + 'static,
    {
        if self.lifecycle.state() >= ConnState::Disconnecting {
            return Err(TorCtrlError::Destroyed);
        }

        let command = cmd.command();
        let keyword = command.keyword().to_string();
        let wire = command.encode();

        let (tx, rx) = oneshot::channel();
        let complete = Box::new(move |outcome: JobOutcome| {
            let result = match outcome {
                JobOutcome::Reply(reply) => {
                    if reply.is_success() {
                        cmd.parse_reply(&reply)
                    } else {
                        Err(TorCtrlError::CommandRejected {
                            code: reply.code(),
                            message: reply.text(),
                        })
                    }
                }
                JobOutcome::Failed(e) => Err(e),
                JobOutcome::Cancelled => Err(TorCtrlError::Cancelled),
            };
            let _ = tx.send(result);
        });

        let id = self.queue.push(keyword, wire, complete)?;
        Ok(JobHandle::new(id, Arc::downgrade(&self.queue), rx))
    }

    /// Enqueue a command and wait for its result.
    pub async fn execute<C>(&self, cmd: C) -> Result<C::Output>
    where
        C: TorCmd + 'static,
    {
        self.enqueue(cmd)?.await
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnState {
        self.lifecycle.state()
    }

    /// Watch lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnState> {
        self.lifecycle.subscribe()
    }

    /// Whether teardown has completed.
    pub fn is_destroyed(&self) -> bool {
        self.lifecycle.state() == ConnState::Destroyed
    }

    /// Register an event observer. Remember to also
    /// [`set_events`](Self::set_events) so the daemon sends anything.
    pub fn subscribe(&self, observer: Observer) -> ObserverId {
        self.registry.subscribe(observer)
    }

    /// Remove a single observer.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Remove every observer carrying `tag`.
    pub fn unsubscribe_tag(&self, tag: &str) -> usize {
        self.registry.unsubscribe_tag(tag)
    }

    /// Remove every non-static observer for an event type.
    pub fn unsubscribe_event(&self, key: impl Into<EventKey>) -> usize {
        self.registry.unsubscribe_key(key.into())
    }

    /// Remove every non-static observer.
    pub fn clear_observers(&self) {
        self.registry.clear()
    }

    /// Tear the connection down and wait for it.
    ///
    /// Idempotent: later calls simply wait for the same teardown. Jobs
    /// not yet written resolve with [`TorCtrlError::Cancelled`]; after
    /// this returns, the state is [`ConnState::Destroyed`] and new
    /// enqueues fail with [`TorCtrlError::Destroyed`].
    pub async fn destroy(&self) {
        self.shutdown.notify_one();
        self.lifecycle.wait_destroyed().await;
    }

    // Convenience wrappers over `execute`.

    /// Query PROTOCOLINFO.
    pub async fn protocol_info(&self) -> Result<auth::ProtocolInfo> {
        self.execute(QueryProtocolInfo).await
    }

    /// Authenticate with the given credentials.
    ///
    /// SAFECOOKIE performs the AUTHCHALLENGE round trip and verifies
    /// the server's hash before revealing anything derived from the
    /// cookie.
    pub async fn authenticate(&self, credential: &AuthCredential) -> Result<()> {
        let token = match credential {
            AuthCredential::None => None,
            AuthCredential::Password(password) => Some(quote_password(password)),
            AuthCredential::CookieFile(path) => {
                Some(auth::encode_cookie(&auth::read_cookie_file(path)?))
            }
            AuthCredential::CookieData(cookie) => Some(auth::encode_cookie(cookie)),
            AuthCredential::SafeCookie { cookie_path } => {
                let cookie = auth::read_cookie_file(cookie_path)?;
                let client_nonce = auth::generate_client_nonce();
                let (server_hash, server_nonce) =
                    self.execute(AuthChallenge::new(&client_nonce)).await?;
                if !auth::verify_server_hash(&cookie, &client_nonce, &server_nonce, &server_hash)
                {
                    return Err(TorCtrlError::AuthenticationFailed(
                        "server hash mismatch: wrong cookie or hostile endpoint".to_string(),
                    ));
                }
                let client_hash =
                    auth::compute_client_hash(&cookie, &client_nonce, &server_nonce);
                Some(auth::encode_cookie(&client_hash))
            }
        };

        match self.execute(Authenticate { token }).await {
            Ok(()) => Ok(()),
            Err(TorCtrlError::CommandRejected { message, .. }) => {
                Err(TorCtrlError::AuthenticationFailed(message))
            }
            Err(e) => Err(e),
        }
    }

    /// Authenticate by whatever method PROTOCOLINFO advertises,
    /// preferring NULL, then SAFECOOKIE, then COOKIE.
    pub async fn auto_authenticate(&self) -> Result<()> {
        let info = self.protocol_info().await?;

        if info.supports_null() {
            return self.authenticate(&AuthCredential::None).await;
        }
        if let Some(cookie_file) = &info.cookie_file {
            if info.supports_safe_cookie() {
                return self
                    .authenticate(&AuthCredential::safe_cookie(cookie_file))
                    .await;
            }
            if info.supports_cookie() {
                return self
                    .authenticate(&AuthCredential::cookie_file(cookie_file))
                    .await;
            }
        }
        Err(TorCtrlError::AuthenticationFailed(format!(
            "no usable authentication method among {:?}",
            info.auth_methods
        )))
    }

    /// GETINFO version, parsed.
    pub async fn get_version(&self) -> Result<TorVersion> {
        self.execute(GetInfo::new("version")).await?.parse()
    }

    /// GETINFO for a single key.
    pub async fn get_info(&self, key: impl Into<String>) -> Result<String> {
        self.execute(GetInfo::new(key)).await
    }

    /// GETCONF for a single option; `None` means it is at its default.
    pub async fn get_conf(&self, name: impl Into<String>) -> Result<Option<String>> {
        self.execute(GetConf::new(name)).await
    }

    /// SETCONF a single option.
    pub async fn set_conf(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.execute(SetConf::new().set(key, value)).await
    }

    /// Send a SIGNAL.
    pub async fn signal(&self, signal: Signal) -> Result<()> {
        self.execute(SendSignal(signal)).await
    }

    /// Replace the set of subscribed event types.
    pub async fn set_events(
        &self,
        events: impl IntoIterator<Item = EventType>,
    ) -> Result<()> {
        self.execute(SetEvents::new(events)).await
    }

    /// Create an ephemeral onion service.
    pub async fn add_onion(&self, request: AddOnion) -> Result<CreatedOnionService> {
        self.execute(request).await
    }

    /// Remove an ephemeral onion service.
    pub async fn del_onion(&self, address: OnionAddress) -> Result<()> {
        self.execute(DelOnion::new(address)).await
    }

    /// Ask the daemon to close the connection, then wait for teardown.
    pub async fn quit(&self) -> Result<()> {
        self.execute(Quit).await?;
        self.destroy().await;
        Ok(())
    }
}

impl fmt::Debug for TorCtrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorCtrl")
            .field("state", &self.lifecycle.state())
            .finish_non_exhaustive()
    }
}

/// Passwords go on the wire as a QuotedString, always quoted so the
/// daemon cannot mistake them for hex cookie bytes.
fn quote_password(password: &str) -> String {
    let mut quoted = String::with_capacity(password.len() + 2);
    quoted.push('"');
    for c in password.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Decode reply blocks and forward them to the connection task.
///
/// Runs as its own task because line reads are not cancellation-safe;
/// the connection task selects over the channel instead.
async fn read_loop<R>(mut framer: Framer<R>, tx: mpsc::Sender<Result<Reply>>)
where
    R: AsyncBufRead + Unpin,
{
    loop {
        match framer.next_block().await {
            Ok(Some(reply)) => {
                if tx.send(Ok(reply)).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                let _ = tx.send(Err(TorCtrlError::ConnectionClosed)).await;
                return;
            }
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

/// The single task that owns the transport.
struct ConnTask<S> {
    writer: WriteHalf<S>,
    blocks: mpsc::Receiver<Result<Reply>>,
    reader: JoinHandle<()>,
    queue: Arc<JobQueue>,
    registry: Arc<EventRegistry>,
    lifecycle: Arc<Lifecycle>,
    shutdown: Arc<Notify>,
    inflight: Option<crate::queue::EnqueuedJob>,
}

impl<S> ConnTask<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(mut self) {
        let result = self.drive().await;
        self.teardown(result).await;
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.pump_write().await?;

            tokio::select! {
                block = self.blocks.recv() => match block {
                    Some(Ok(reply)) if reply.is_event() => {
                        self.registry.dispatch(&EventNotification::from_reply(&reply));
                    }
                    Some(Ok(reply)) => self.complete_inflight(reply)?,
                    Some(Err(e)) => return Err(e),
                    None => return Err(TorCtrlError::ConnectionClosed),
                },
                _ = self.queue.notified(), if self.inflight.is_none() => {}
                _ = self.shutdown.notified() => return Ok(()),
            }
        }
    }

    /// Write the next queued command if nothing is in flight.
    async fn pump_write(&mut self) -> Result<()> {
        if self.inflight.is_some() {
            return Ok(());
        }
        let Some(mut job) = self.queue.pop() else {
            return Ok(());
        };

        job.mark_executing();
        let wire = job.wire().to_string();
        // Park the job first so a failed write still resolves it in
        // teardown.
        self.inflight = Some(job);

        trace!(">> {}", wire.trim_end());
        self.writer.write_all(wire.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Match a reply block to the in-flight job.
    fn complete_inflight(&mut self, reply: Reply) -> Result<()> {
        match self.inflight.take() {
            Some(mut job) => {
                job.complete(JobOutcome::Reply(reply));
                Ok(())
            }
            None => Err(TorCtrlError::ProtocolViolation(format!(
                "unsolicited {} reply with no command in flight",
                reply.code()
            ))),
        }
    }

    /// Resolve everything still in the pipeline, exactly once per job,
    /// in FIFO order, then finish the lifecycle.
    async fn teardown(&mut self, result: Result<()>) {
        self.lifecycle.advance(ConnState::Disconnecting);
        self.reader.abort();

        match result {
            Ok(()) => {
                if let Some(mut job) = self.inflight.take() {
                    job.complete(JobOutcome::Cancelled);
                }
                self.queue.close(&|| JobOutcome::Cancelled);
            }
            Err(e) => {
                let msg = e.to_string();
                warn!("connection lost: {msg}");
                if let Some(mut job) = self.inflight.take() {
                    job.complete(JobOutcome::Failed(TorCtrlError::ConnectionLost(msg.clone())));
                }
                self.queue
                    .close(&|| JobOutcome::Failed(TorCtrlError::ConnectionLost(msg.clone())));
            }
        }

        // Events decoded before the stream ended still get delivered.
        while let Ok(block) = self.blocks.try_recv() {
            if let Ok(reply) = block {
                if reply.is_event() {
                    self.registry.dispatch(&EventNotification::from_reply(&reply));
                }
            }
        }

        let _ = self.writer.shutdown().await;
        self.lifecycle.advance(ConnState::Destroyed);
        debug!("connection task finished");
    }
}
