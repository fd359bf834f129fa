//! DisplaySession: the per-panel actor.
//!
//! Each panel gets one session task that exclusively owns its transport,
//! handshake state machine, ack watcher, and reconnect supervisor.  Callers
//! hold a cheap cloneable [`DisplaySession`] handle and talk to the task
//! over an mpsc request channel with oneshot replies; requests are serviced
//! strictly one at a time, which is what enforces the one-frame-in-flight
//! rule without any locking.
//!
//! A `send_frame` issued while the session is reconnecting or handshaking
//! simply queues behind that work.  Sends and appearance changes carry a
//! deadline: if the actor cannot service the request in time the caller
//! gets [`SessionError::Unavailable`], and the actor abandons the request
//! rather than finish it behind the caller's back.  `close` trips a cancel
//! latch the actor checks inside every long wait, so it cuts through a
//! reconnect backoff instead of queueing behind it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use blink_core::protocol::{commands, frame};
use blink_core::{
    AckKind, Bitmap, CommandError, FrameError, HandshakeError, HandshakeStateMachine, PanelVariant,
    Rotation,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{PanelTransport, TransportError, TransportEvent};

pub mod ack_watcher;
pub mod supervisor;

use ack_watcher::{AckWaitError, AckWatcher};
use supervisor::{ConnectionSupervisor, ReconnectPolicy};

/// Observable lifecycle state of a session, published on a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No link, and no bring-up in progress.
    Disconnected,
    /// Establishing the link.
    Connecting,
    /// Link up, running the handshake.
    Handshaking,
    /// Handshaken and idle; frames may be sent.
    Ready,
    /// A frame transfer is in flight.
    Sending,
    /// Backing off before the next reconnect attempt.
    ReconnectWait,
    /// Reconnect attempts exhausted; the session needs an explicit nudge.
    Failed,
}

/// Errors surfaced to session callers.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The panel did not acknowledge a stage in time.
    #[error("timed out after {timeout:?} waiting for {kind:?}")]
    AckTimeout { kind: AckKind, timeout: Duration },

    /// The link dropped mid-operation.
    #[error("link dropped")]
    LinkLost,

    /// The protocol was driven out of order.  A local bug, never a remote
    /// fault.
    #[error("protocol contract violation: {0}")]
    Contract(#[from] HandshakeError),

    /// The actor could not service the request before the caller's deadline.
    #[error("session busy; request not serviced in time")]
    Unavailable,

    /// The reconnect budget ran out.
    #[error("gave up after {attempts} consecutive failed connection attempts")]
    RetryExhausted { attempts: u32 },

    /// The session task has shut down.
    #[error("session closed")]
    Closed,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Whether reconnect-and-retry handling may absorb this error.
    fn transient(&self) -> bool {
        matches!(
            self,
            SessionError::AckTimeout { .. }
                | SessionError::LinkLost
                | SessionError::Transport(_)
        )
    }
}

/// Tunables for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub variant: PanelVariant,
    /// Largest single link-layer write; frames are chunked to this size.
    pub mtu: usize,
    /// Per-stage ack deadline.
    pub ack_timeout: Duration,
    /// Deadline for one queued send or appearance request.  `connect` is
    /// exempt; its bound is the reconnect policy.
    pub send_timeout: Duration,
    /// Handshake/frame retries absorbed before escalating to reconnect
    /// handling.
    pub max_stage_retries: u32,
    /// Whether to send the commit command after each acknowledged frame.
    pub send_commit: bool,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            variant: PanelVariant::Square32,
            mtu: 512,
            ack_timeout: Duration::from_secs(2),
            send_timeout: Duration::from_secs(10),
            max_stage_retries: 1,
            send_commit: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

type Reply = oneshot::Sender<Result<(), SessionError>>;

enum SessionRequest {
    Connect { reply: Reply },
    SendFrame { tile: Bitmap, reply: Reply },
    SetBrightness { level: u8, reply: Reply },
    SetRotation { rotation: Rotation, reply: Reply },
    Close { reply: oneshot::Sender<()> },
}

impl SessionRequest {
    /// Whether the caller's reply channel is already gone, meaning the
    /// request timed out or was dropped before the actor got to it.
    fn abandoned(&self) -> bool {
        match self {
            SessionRequest::Connect { reply }
            | SessionRequest::SendFrame { reply, .. }
            | SessionRequest::SetBrightness { reply, .. }
            | SessionRequest::SetRotation { reply, .. } => reply.is_closed(),
            SessionRequest::Close { .. } => false,
        }
    }
}

/// Handle to one panel's session task.  Cloning is cheap; all clones talk
/// to the same actor.
#[derive(Debug, Clone)]
pub struct DisplaySession {
    id: Uuid,
    name: String,
    cmd_tx: mpsc::Sender<SessionRequest>,
    cancel_tx: Arc<watch::Sender<bool>>,
    state_rx: watch::Receiver<SessionState>,
    request_timeout: Duration,
}

impl DisplaySession {
    /// Spawns the session task for `transport` and returns its handle.  The
    /// session starts disconnected; call [`DisplaySession::connect`] to
    /// bring it up.
    pub fn spawn(
        name: impl Into<String>,
        transport: Arc<dyn PanelTransport>,
        config: SessionConfig,
    ) -> Self {
        let name = name.into();
        let id = Uuid::new_v4();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let actor = SessionActor {
            id,
            name: name.clone(),
            machine: HandshakeStateMachine::new(config.variant),
            watcher: AckWatcher::new(config.variant, transport.subscribe()),
            supervisor: ConnectionSupervisor::new(config.reconnect.clone()),
            request_timeout: config.send_timeout,
            transport,
            config,
            state_tx,
            cancel_rx,
            connected: false,
        };
        let request_timeout = actor.request_timeout;
        tokio::spawn(actor.run(cmd_rx));

        Self {
            id,
            name,
            cmd_tx,
            cancel_tx: Arc::new(cancel_tx),
            state_rx,
            request_timeout,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Latest published lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Brings the link up and runs the handshake to READY.  Runs until
    /// READY, retry exhaustion, or close; bound it externally if the caller
    /// needs a deadline.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.request(None, |reply| SessionRequest::Connect { reply })
            .await
    }

    /// Transfers one tile and waits for the panel to acknowledge it.
    pub async fn send_frame(&self, tile: Bitmap) -> Result<(), SessionError> {
        self.request(Some(self.request_timeout), |reply| {
            SessionRequest::SendFrame { tile, reply }
        })
        .await
    }

    /// Sets the panel brightness (0 = off, 255 = full).
    pub async fn set_brightness(&self, level: u8) -> Result<(), SessionError> {
        self.request(Some(self.request_timeout), |reply| {
            SessionRequest::SetBrightness { level, reply }
        })
        .await
    }

    /// Sets the display rotation.
    pub async fn set_rotation(&self, rotation: Rotation) -> Result<(), SessionError> {
        self.request(Some(self.request_timeout), |reply| {
            SessionRequest::SetRotation { rotation, reply }
        })
        .await
    }

    /// Releases the link and stops the session task.  Cancels an in-flight
    /// wait or reconnect backoff rather than queueing behind it.  Idempotent:
    /// closing a session that is already gone does nothing.
    pub async fn close(&self) {
        // Trip the cancel latch first so the actor aborts whatever it is
        // waiting on before the Close request is serviced.
        let _ = self.cancel_tx.send(true);
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionRequest::Close { reply: tx })
            .await
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }

    async fn request(
        &self,
        deadline: Option<Duration>,
        build: impl FnOnce(Reply) -> SessionRequest,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        let fut = async {
            if self.cmd_tx.send(build(tx)).await.is_err() {
                return Err(SessionError::Closed);
            }
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Closed),
            }
        };
        match deadline {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Unavailable),
            },
            None => fut.await,
        }
    }
}

enum Wake {
    Request(Option<SessionRequest>),
    Link(Option<TransportEvent>),
}

struct SessionActor {
    id: Uuid,
    name: String,
    transport: Arc<dyn PanelTransport>,
    config: SessionConfig,
    machine: HandshakeStateMachine,
    watcher: AckWatcher,
    supervisor: ConnectionSupervisor,
    request_timeout: Duration,
    state_tx: watch::Sender<SessionState>,
    cancel_rx: watch::Receiver<bool>,
    connected: bool,
}

/// One in-flight operation, boxed so every request variant runs through the
/// same abandon-aware dispatch.
type Op<'a> = Pin<Box<dyn Future<Output = Result<(), SessionError>> + Send + 'a>>;

/// Resolves once `close` has been requested.  A dropped sender means every
/// handle is gone, which ends the session the same way.
async fn cancelled(cancel_rx: &mut watch::Receiver<bool>) {
    let _ = cancel_rx.wait_for(|flag| *flag).await;
}

impl SessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionRequest>) {
        debug!(panel = %self.name, id = %self.id, "session task started");
        loop {
            let connected = self.connected;
            let wake = tokio::select! {
                req = cmd_rx.recv() => Wake::Request(req),
                event = self.watcher.next_event(), if connected => Wake::Link(event),
            };
            match wake {
                // All handles dropped: release the link and stop.
                Wake::Request(None) => {
                    self.shutdown().await;
                    return;
                }
                Wake::Request(Some(SessionRequest::Close { reply })) => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
                Wake::Request(Some(req)) => self.dispatch(req).await,
                Wake::Link(Some(TransportEvent::Disconnected)) | Wake::Link(None) => {
                    warn!(panel = %self.name, "link dropped while idle");
                    self.connected = false;
                    self.machine.reset();
                    self.set_state(SessionState::Disconnected);
                }
                Wake::Link(Some(TransportEvent::Notification(wire))) => {
                    debug!(panel = %self.name, len = wire.len(), "unsolicited notification while idle");
                }
            }
        }
    }

    /// Services one request.  A request whose caller has already given up is
    /// dropped without touching the wire; one abandoned mid-operation is
    /// aborted and the link torn down, since its wire state is ambiguous.
    async fn dispatch(&mut self, req: SessionRequest) {
        if req.abandoned() {
            debug!(panel = %self.name, "dropping request whose caller already gave up");
            return;
        }
        let (op, mut reply): (Op<'_>, Reply) = match req {
            SessionRequest::Connect { reply } => (Box::pin(self.ensure_ready()), reply),
            SessionRequest::SendFrame { tile, reply } => (Box::pin(self.send_frame(tile)), reply),
            SessionRequest::SetBrightness { level, reply } => (
                Box::pin(self.send_command(commands::set_brightness(level))),
                reply,
            ),
            SessionRequest::SetRotation { rotation, reply } => (
                Box::pin(self.send_command(commands::set_rotation(rotation))),
                reply,
            ),
            SessionRequest::Close { .. } => unreachable!("Close is handled in run"),
        };
        let abandoned = tokio::select! {
            result = op => {
                let _ = reply.send(result);
                false
            }
            _ = reply.closed() => true,
        };
        if abandoned {
            warn!(panel = %self.name, "caller gave up mid-operation; releasing the link");
            self.machine.reset();
            self.teardown().await;
            self.set_state(SessionState::Disconnected);
        }
    }

    // ── Bring-up and recovery ─────────────────────────────────────────────────

    /// Drives the session to READY, reconnecting with backoff as needed.
    async fn ensure_ready(&mut self) -> Result<(), SessionError> {
        if self.connected && self.machine.is_ready() {
            return Ok(());
        }
        loop {
            match self.bring_up().await {
                Ok(()) => {
                    self.supervisor.record_ready();
                    self.set_state(SessionState::Ready);
                    info!(panel = %self.name, "session ready");
                    return Ok(());
                }
                Err(err) if err.transient() => {
                    self.teardown().await;
                    match self.supervisor.next_delay() {
                        Some(delay) => {
                            warn!(
                                panel = %self.name,
                                error = %err,
                                attempt = self.supervisor.attempts(),
                                delay_ms = delay.as_millis() as u64,
                                "bring-up failed, backing off"
                            );
                            self.set_state(SessionState::ReconnectWait);
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = cancelled(&mut self.cancel_rx) => {
                                    debug!(panel = %self.name, "close requested during reconnect backoff");
                                    self.set_state(SessionState::Disconnected);
                                    return Err(SessionError::Closed);
                                }
                            }
                        }
                        None => {
                            let attempts = self.supervisor.attempts();
                            warn!(panel = %self.name, attempts, "reconnect attempts exhausted");
                            self.set_state(SessionState::Failed);
                            return Err(SessionError::RetryExhausted { attempts });
                        }
                    }
                }
                Err(err) => {
                    self.teardown().await;
                    self.set_state(SessionState::Disconnected);
                    return Err(err);
                }
            }
        }
    }

    /// One connect-plus-handshake attempt.
    async fn bring_up(&mut self) -> Result<(), SessionError> {
        if !self.connected {
            self.set_state(SessionState::Connecting);
            // Subscribe before connecting so the first ack cannot be lost.
            self.watcher.resubscribe(self.transport.subscribe());
            tokio::select! {
                result = self.transport.connect() => result?,
                _ = cancelled(&mut self.cancel_rx) => return Err(SessionError::Closed),
            }
            self.connected = true;
            debug!(panel = %self.name, "link connected");
        }
        if !self.machine.is_ready() {
            self.set_state(SessionState::Handshaking);
            self.handshake().await?;
        }
        Ok(())
    }

    /// Runs the handshake, absorbing up to `max_stage_retries` stage
    /// timeouts by restarting the whole sequence before escalating.
    async fn handshake(&mut self) -> Result<(), SessionError> {
        let mut attempt = 0;
        loop {
            match self.handshake_once().await {
                Ok(()) => return Ok(()),
                Err(err @ SessionError::AckTimeout { .. })
                    if attempt < self.config.max_stage_retries =>
                {
                    attempt += 1;
                    warn!(
                        panel = %self.name,
                        error = %err,
                        attempt,
                        "handshake stage timed out, restarting handshake"
                    );
                    self.machine.reset();
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn handshake_once(&mut self) -> Result<(), SessionError> {
        let vocab = self.config.variant.vocabulary();
        self.machine.reset();

        self.machine.first_sent()?;
        self.write_payload(vocab.handshake_first).await?;
        self.await_ack(AckKind::AckOne).await?;

        self.machine.second_sent()?;
        self.write_payload(vocab.handshake_second).await?;
        self.await_ack(AckKind::AckTwo).await?;

        self.machine.mark_ready()?;
        Ok(())
    }

    async fn teardown(&mut self) {
        if self.connected {
            self.transport.disconnect().await;
        }
        self.connected = false;
        self.machine.reset();
    }

    async fn shutdown(&mut self) {
        self.teardown().await;
        self.set_state(SessionState::Disconnected);
        info!(panel = %self.name, "session closed");
    }

    // ── Operations ────────────────────────────────────────────────────────────

    /// Transfers one tile, retrying through reconnect handling on transient
    /// faults.
    async fn send_frame(&mut self, tile: Bitmap) -> Result<(), SessionError> {
        let payload = commands::bitmap_transfer(tile.as_bytes())?;
        let mut attempt = 0;
        loop {
            self.ensure_ready().await?;
            self.set_state(SessionState::Sending);
            match self.transfer(&payload).await {
                Ok(()) => {
                    self.set_state(SessionState::Ready);
                    return Ok(());
                }
                Err(err) if err.transient() && attempt < self.config.max_stage_retries => {
                    attempt += 1;
                    warn!(
                        panel = %self.name,
                        error = %err,
                        attempt,
                        "frame transfer failed, retrying"
                    );
                    self.recover_from(&err).await;
                }
                Err(err) => {
                    self.recover_from(&err).await;
                    return Err(err);
                }
            }
        }
    }

    /// One frame through the send loop: write, await ack-three, optional
    /// commit.
    async fn transfer(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let wire = frame::encode(payload)?;
        self.machine.frame_sent()?;
        self.write_wire(&wire).await?;
        self.await_ack(AckKind::AckThree).await?;
        self.machine.mark_ready()?;
        if self.config.send_commit {
            self.write_payload(commands::COMMIT).await?;
        }
        Ok(())
    }

    /// Brightness/rotation: same codec and readiness discipline as a frame,
    /// but the firmware does not acknowledge them.
    async fn send_command(&mut self, payload: Vec<u8>) -> Result<(), SessionError> {
        self.ensure_ready().await?;
        self.write_payload(&payload).await
    }

    async fn recover_from(&mut self, err: &SessionError) {
        self.machine.reset();
        if matches!(err, SessionError::LinkLost | SessionError::Transport(_)) {
            self.teardown().await;
        }
        self.settle_state();
    }

    // ── Wire helpers ──────────────────────────────────────────────────────────

    async fn write_payload(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let wire = frame::encode(payload)?;
        self.write_wire(&wire).await
    }

    /// Writes a frame in MTU-sized chunks; the panel reassembles from the
    /// length prefix.
    async fn write_wire(&mut self, wire: &[u8]) -> Result<(), SessionError> {
        let mtu = self.config.mtu.max(1);
        for chunk in wire.chunks(mtu) {
            self.transport.write(chunk).await?;
        }
        Ok(())
    }

    async fn await_ack(&mut self, kind: AckKind) -> Result<(), SessionError> {
        let timeout = self.config.ack_timeout;
        let wait = tokio::select! {
            result = self.watcher.wait_for(kind, timeout) => result,
            _ = cancelled(&mut self.cancel_rx) => return Err(SessionError::Closed),
        };
        match wait {
            Ok(()) => {
                self.machine.on_ack(kind);
                Ok(())
            }
            Err(AckWaitError::Timeout { .. }) => Err(SessionError::AckTimeout { kind, timeout }),
            Err(AckWaitError::LinkDropped { .. }) | Err(AckWaitError::StreamClosed) => {
                self.connected = false;
                Err(SessionError::LinkLost)
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let _ = self.state_tx.send(state);
    }

    fn settle_state(&self) {
        let state = if !self.connected {
            SessionState::Disconnected
        } else if self.machine.is_ready() {
            SessionState::Ready
        } else {
            // Link is up but the handshake must run again.
            SessionState::Handshaking
        };
        self.set_state(state);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.mtu, 512);
        assert_eq!(cfg.ack_timeout, Duration::from_secs(2));
        assert_eq!(cfg.max_stage_retries, 1);
        assert!(cfg.send_commit);
    }

    #[test]
    fn test_transient_classification() {
        assert!(SessionError::LinkLost.transient());
        assert!(SessionError::AckTimeout {
            kind: AckKind::AckOne,
            timeout: Duration::from_secs(1)
        }
        .transient());
        assert!(SessionError::Transport(TransportError::NotConnected).transient());
        assert!(!SessionError::Closed.transient());
        assert!(!SessionError::RetryExhausted { attempts: 6 }.transient());
        assert!(!SessionError::Unavailable.transient());
    }
}
