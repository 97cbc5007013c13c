//! Session lifecycle: one call at a time, from negotiation to teardown.
//!
//! The controller owns `idle -> connecting -> active -> terminating ->
//! closed`. Teardown has two racing triggers — sustained silence and the
//! fail-safe timer — both funneled into one idempotent [`ActiveCall::stop`];
//! whichever fires first wins and the loser observes the closed state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Local;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::errors::{SessionError, SignalingError};
use crate::media::LevelMeter;
use crate::protocol::{handler, ClientEvent};
use crate::session::silence::SilenceDetector;
use crate::session::{CallSummary, Role, SessionEvent, SessionPhase};
use crate::signaling::{Connection, SignalingClient};
use crate::usage::{CostEstimate, RateTable, UsageCounters};

/// Settling time between pushing settings and requesting the greeting.
const UPDATE_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Fail-safe bound: hang up this long after the agent requested termination
/// completes a response, regardless of what the audio level says.
const FAILSAFE_HANGUP_AFTER: Duration = Duration::from_secs(10);

/// How long the control channel may take to report open.
const CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(15);

// ---------------------------------------------------------------------------
// ActiveCall
// ---------------------------------------------------------------------------

/// Mutable state of the one live call.
///
/// Background tasks (event loop, silence sampler, fail-safe timer) read
/// state through atomics; only [`ActiveCall::stop`] writes the terminal
/// transition, guarded by a swap so the teardown race stays single-winner.
pub struct ActiveCall {
    id: Uuid,
    model: String,
    phase: StdMutex<SessionPhase>,
    /// First `stop()` caller wins; everyone else no-ops.
    stopping: AtomicBool,
    /// True until the call reaches `closed`. Gates the silence sampler.
    live: Arc<AtomicBool>,
    /// Set when the agent has called the `end_call` tool.
    pending_termination: Arc<AtomicBool>,
    usage: StdMutex<UsageCounters>,
    conn: Mutex<Option<Connection>>,
    mute: StdMutex<Option<Arc<AtomicBool>>>,
    level: StdMutex<Option<Arc<LevelMeter>>>,
    silence: SilenceDetector,
    failsafe: StdMutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    rates: RateTable,
    exchange_rate: f64,
}

impl ActiveCall {
    fn new(
        model: String,
        rates: RateTable,
        exchange_rate: f64,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            model,
            phase: StdMutex::new(SessionPhase::Connecting),
            stopping: AtomicBool::new(false),
            live: Arc::new(AtomicBool::new(true)),
            pending_termination: Arc::new(AtomicBool::new(false)),
            usage: StdMutex::new(UsageCounters::default()),
            conn: Mutex::new(None),
            mute: StdMutex::new(None),
            level: StdMutex::new(None),
            silence: SilenceDetector::new(),
            failsafe: StdMutex::new(None),
            events,
            rates,
            exchange_rate,
        })
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().expect("phase lock poisoned")
    }

    fn set_phase(&self, phase: SessionPhase) {
        *self.phase.lock().expect("phase lock poisoned") = phase;
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == SessionPhase::Closed
    }

    pub fn usage(&self) -> UsageCounters {
        *self.usage.lock().expect("usage lock poisoned")
    }

    pub fn termination_pending(&self) -> bool {
        self.pending_termination.load(Ordering::SeqCst)
    }

    /// Store the negotiated connection and its media handles.
    async fn attach(&self, conn: Connection) {
        *self.mute.lock().expect("mute lock poisoned") = Some(conn.mute_handle());
        *self.level.lock().expect("level lock poisoned") = Some(conn.level_meter());
        *self.conn.lock().await = Some(conn);
    }

    /// Send a protocol event over the control channel.
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), SignalingError> {
        let guard = self.conn.lock().await;
        match guard.as_ref() {
            Some(conn) => conn.send_event(event).await,
            None => Err(SignalingError::negotiation("no connection")),
        }
    }

    /// Merge one completed-response usage block. Applied in arrival order.
    pub(crate) fn merge_usage(&self, block: &UsageCounters) {
        self.usage.lock().expect("usage lock poisoned").merge(block);
    }

    pub(crate) fn emit_transcript(&self, role: Role, text: String) {
        let _ = self.events.send(SessionEvent::Transcript { role, text, at: Local::now() });
    }

    pub(crate) fn emit_notice(&self, text: impl Into<String>) {
        let _ = self.events.send(SessionEvent::Notice(text.into()));
    }

    /// The agent asked to hang up: mute the microphone right away so the
    /// caller cannot interrupt the goodbye, and mark termination pending.
    pub(crate) fn request_termination(&self) {
        self.pending_termination.store(true, Ordering::SeqCst);
        self.set_phase(SessionPhase::Terminating);
        if let Some(mute) = self.mute.lock().expect("mute lock poisoned").as_ref() {
            mute.store(true, Ordering::SeqCst);
        }
        info!("Agent requested end of call; microphone muted");
        self.emit_notice("Hanging up once the agent finishes speaking...");
    }

    /// Arm the silence sampler and the fail-safe timer.
    ///
    /// Called on `response.done` while termination is pending. Both triggers
    /// resolve into the same idempotent `stop()`; arming twice is a no-op.
    pub(crate) fn begin_silent_hangup(self: &Arc<Self>) {
        let level = self.level.lock().expect("level lock poisoned").clone();
        match level {
            Some(level) => {
                let (tx, rx) = oneshot::channel();
                self.silence.arm(level, self.live.clone(), self.pending_termination.clone(), tx);
                let call = self.clone();
                tokio::spawn(async move {
                    if rx.await.is_ok() {
                        call.stop().await;
                    }
                });
            }
            None => debug!("No level meter; relying on fail-safe timer"),
        }

        let mut guard = self.failsafe.lock().expect("failsafe lock poisoned");
        if guard.is_none() {
            let call = self.clone();
            *guard = Some(tokio::spawn(async move {
                tokio::time::sleep(FAILSAFE_HANGUP_AFTER).await;
                if call.live.load(Ordering::SeqCst) {
                    info!("Fail-safe timer elapsed, forcing hangup");
                    call.stop().await;
                }
            }));
        }
    }

    /// Tear the call down and emit the summary. Idempotent.
    pub async fn stop(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_phase(SessionPhase::Terminating);
        self.silence.disarm();
        if let Some(h) = self.failsafe.lock().expect("failsafe lock poisoned").take() {
            h.abort();
        }

        let usage = self.usage();
        let cost = CostEstimate::compute(&usage, &self.model, &self.rates, self.exchange_rate);
        let _ = self.events.send(SessionEvent::Summary(CallSummary { usage, cost }));

        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }
        self.live.store(false, Ordering::SeqCst);
        self.set_phase(SessionPhase::Closed);
        info!(call = %self.id, "Call closed (cost ${:.4})", cost.usd);
    }

    /// Teardown for a call that never became active: release resources and
    /// close without a summary.
    async fn abort(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        self.silence.disarm();
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }
        self.live.store(false, Ordering::SeqCst);
        self.set_phase(SessionPhase::Closed);
    }
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Public entry point for driving calls. One live call at a time.
pub struct SessionController {
    signaling: SignalingClient,
    rates: RateTable,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    call: Mutex<Option<Arc<ActiveCall>>>,
}

impl SessionController {
    /// Build a controller and the event stream its calls report into.
    pub fn new(signaling: SignalingClient) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                signaling,
                rates: RateTable::default(),
                events_tx,
                call: Mutex::new(None),
            },
            events_rx,
        )
    }

    /// Current lifecycle phase (`Idle` when no call exists or the last one
    /// closed).
    pub async fn phase(&self) -> SessionPhase {
        match self.call.lock().await.as_ref() {
            Some(call) if !call.is_closed() => call.phase(),
            _ => SessionPhase::Idle,
        }
    }

    /// Start a call with `config`.
    ///
    /// Refused while a previous call has not reached `closed`. Usage
    /// counters start from zero. On failure the error is surfaced on the
    /// event stream and the controller is back at idle.
    pub async fn start(&self, config: SessionConfig) -> Result<(), SessionError> {
        let call = {
            let mut slot = self.call.lock().await;
            if let Some(existing) = slot.as_ref() {
                if !existing.is_closed() {
                    return Err(SessionError::AlreadyActive);
                }
            }
            let exchange_rate = self.signaling.control_plane().fetch_exchange_rate().await;
            let call = ActiveCall::new(
                config.model.clone(),
                self.rates.clone(),
                exchange_rate,
                self.events_tx.clone(),
            );
            *slot = Some(call.clone());
            call
        };

        match self.connect(&call, &config).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Call setup failed: {}", e);
                let _ = self
                    .events_tx
                    .send(SessionEvent::Failed(format!("Could not start the call: {}", e)));
                call.abort().await;
                *self.call.lock().await = None;
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        call: &Arc<ActiveCall>,
        config: &SessionConfig,
    ) -> Result<(), SessionError> {
        let conn = self.signaling.negotiate(config).await?;
        let inbound = conn.take_inbound().expect("fresh connection has an inbound stream");
        call.attach(conn).await;

        call.wait_channel_open(CHANNEL_OPEN_TIMEOUT).await?;
        call.set_phase(SessionPhase::Active);
        handler::spawn_event_loop(call.clone(), inbound);

        // Settings go out first; the channel just reported open.
        call.send_event(&ClientEvent::session_update(config)).await?;
        call.emit_notice("Settings applied");

        // Greeting only at initial connect, after the update settles.
        if let Some(greeting) = config.initial_greeting.clone() {
            let call = call.clone();
            tokio::spawn(async move {
                tokio::time::sleep(UPDATE_SETTLE_DELAY).await;
                if call.is_closed() {
                    return;
                }
                if let Err(e) = call.send_event(&ClientEvent::greeting_request(&greeting)).await {
                    warn!("Greeting request failed: {}", e);
                }
            });
        }
        Ok(())
    }

    /// Re-apply settings mid-call. Does not reset usage, does not greet.
    pub async fn apply_config(&self, config: &SessionConfig) -> Result<(), SessionError> {
        let call = {
            let slot = self.call.lock().await;
            match slot.as_ref() {
                Some(call) if call.phase() == SessionPhase::Active => call.clone(),
                _ => return Err(SessionError::NotActive),
            }
        };
        call.send_event(&ClientEvent::session_update(config)).await?;
        call.emit_notice("Settings applied");
        Ok(())
    }

    /// Stop the current call. No-op when nothing is running.
    pub async fn stop(&self) {
        let call = self.call.lock().await.clone();
        if let Some(call) = call {
            call.stop().await;
        }
    }
}

impl ActiveCall {
    /// Wait for the control channel of the attached connection to open.
    async fn wait_channel_open(&self, timeout: Duration) -> Result<(), SessionError> {
        let guard = self.conn.lock().await;
        match guard.as_ref() {
            Some(conn) => conn.wait_channel_open(timeout).await,
            None => Err(SessionError::ChannelNotOpen("no connection".into())),
        }
    }
}

#[cfg(test)]
pub(crate) fn detached_call(
    model: &str,
    exchange_rate: f64,
) -> (Arc<ActiveCall>, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let call = ActiveCall::new(model.to_string(), RateTable::default(), exchange_rate, tx);
    call.set_phase(SessionPhase::Active);
    (call, rx)
}
