//! Relay engine
//!
//! One dispatch loop per relay. The loop owns every mutation of the session
//! manager, the pending-response ledger and the introductions: inbound
//! messages, payment events and deferred work (Delay holds, Exit service
//! replies) are all handled on it, one at a time.
//!
//! Sends started by the local client ([`Engine::buy_new_sessions`],
//! [`Engine::send_exit`], [`Engine::send_get_balance`]) only register a
//! pending response and hand bytes to the transport; the matching reply
//! completes them on the loop.

mod handlers;
mod send;


use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::intro::Introductions;
use crate::pending::PendingResponses;
use crate::session::{PendingPayment, Session, SessionManager};
use onionpay_core::crypto::Keys;
use onionpay_core::{Hash, Id, Nonce, REVERSE_HOPS};
use onionpay_net::{Node, Payment, PaymentSender, Service, ServiceLink, Transport};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{broadcast, mpsc};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    /// Inbound messages, payments and deferred work are discarded
    Paused,
    ShuttingDown,
}

/// Engine statistics
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub messages_received: u64,
    pub layers_peeled: u64,
    pub forwarded: u64,
    pub replies_relayed: u64,
    pub dropped: u64,
    pub exits_served: u64,
    pub sessions_created: u64,
    pub payments_received: u64,
    pub diagnostics: u64,
    pub responses_matched: u64,
    pub expired: u64,
}

/// External collaborators of one relay
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub payments: mpsc::UnboundedReceiver<Payment>,
    pub payer: Arc<dyn PaymentSender>,
}

enum Control {
    Pause,
    Resume,
}

/// What the layer before the current one established
#[derive(Clone, Debug)]
pub(crate) enum Prev {
    /// Decrypted with a session header key; that session pays
    Session(Session),
    /// Decrypted with the identity key; only a Session layer may follow
    Identity,
    /// A session was just bought; the rest of the purchase onion rides free
    Purchased,
}

/// Service reply waiting to be billed and sent back
pub(crate) struct ExitReply {
    pub session: Session,
    pub rate: u64,
    pub port: u16,
    pub id: Id,
    pub request: usize,
    pub ciphers: [Hash; REVERSE_HOPS],
    pub nonces: [Nonce; REVERSE_HOPS],
    pub header: Vec<u8>,
    pub reply: Vec<u8>,
}

/// Work finished off-loop
pub(crate) enum Deferred {
    ExitReply(Box<ExitReply>),
    /// A held message resuming after its Delay
    Inject { buf: Vec<u8>, prev: Option<Prev> },
}

struct Receivers {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    payments: mpsc::UnboundedReceiver<Payment>,
    control: mpsc::UnboundedReceiver<Control>,
    deferred: mpsc::UnboundedReceiver<Deferred>,
}

/// A relay: peels, bills and forwards onions, and sends its own
pub struct Engine {
    config: EngineConfig,
    local: Arc<Node>,
    transport: Arc<dyn Transport>,
    payer: Arc<dyn PaymentSender>,
    services: RwLock<HashMap<u16, ServiceLink>>,
    sessions: Arc<SessionManager>,
    pending: Arc<PendingResponses>,
    intros: Introductions,
    stats: RwLock<EngineStats>,
    state: RwLock<EngineState>,
    control_tx: mpsc::UnboundedSender<Control>,
    shutdown_tx: broadcast::Sender<()>,
    deferred_tx: mpsc::UnboundedSender<Deferred>,
    receivers: Mutex<Option<Receivers>>,
}

impl Engine {
    /// Create an engine for the relay reachable at the transport's address
    pub fn new(
        config: EngineConfig,
        identity: Keys,
        net: Collaborators,
        services: Vec<(Service, ServiceLink)>,
    ) -> Arc<Self> {
        let mut local = Node::new(net.transport.local_addr(), identity.public, config.relay_rate);
        let mut links = HashMap::new();
        for (service, link) in services {
            local = local.with_service(service.port, service.rate);
            links.insert(service.port, link);
        }
        let local = Arc::new(local);
        let sessions = Arc::new(SessionManager::new(
            identity,
            local.clone(),
            config.max_failures,
        ));

        let (control_tx, control) = mpsc::unbounded_channel();
        let (deferred_tx, deferred) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config,
            local,
            transport: net.transport,
            payer: net.payer,
            services: RwLock::new(links),
            sessions,
            pending: Arc::new(PendingResponses::new()),
            intros: Introductions::new(),
            stats: RwLock::new(EngineStats::default()),
            state: RwLock::new(EngineState::Running),
            control_tx,
            shutdown_tx,
            deferred_tx,
            receivers: Mutex::new(Some(Receivers {
                inbound: net.inbound,
                payments: net.payments,
                control,
                deferred,
            })),
        })
    }

    pub fn local_node(&self) -> &Arc<Node> {
        &self.local
    }

    /// A fresh descriptor of this relay for other relays' node lists
    pub fn descriptor(&self) -> Node {
        self.local.services.iter().fold(
            Node::new(self.local.addr, self.local.identity, self.local.relay_rate),
            |node, s| node.with_service(s.port, s.rate),
        )
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn pending(&self) -> &Arc<PendingResponses> {
        &self.pending
    }

    pub fn introductions(&self) -> &Introductions {
        &self.intros
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    /// Learn about other relays
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) {
        self.sessions.add_nodes(nodes);
    }

    /// Discard everything inbound until [`Engine::resume`]
    pub fn pause(&self) {
        let _ = self.control_tx.send(Control::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control_tx.send(Control::Resume);
    }

    /// Stop the dispatch loop at its next iteration
    pub fn shutdown(&self) {
        *self.state.write() = EngineState::ShuttingDown;
        let _ = self.shutdown_tx.send(());
    }

    // =========================================================================
    // DISPATCH LOOP
    // =========================================================================

    /// Run the dispatch loop until shutdown
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let Receivers {
            mut inbound,
            mut payments,
            mut control,
            mut deferred,
        } = self
            .receivers
            .lock()
            .take()
            .ok_or(EngineError::AlreadyRunning)?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut sweep = interval(self.config.sweep_interval);

        info!(
            "Relay {} running on {} (rate {})",
            self.local.id, self.local.addr, self.local.relay_rate
        );

        loop {
            let state = self.state();
            if state == EngineState::ShuttingDown {
                break;
            }
            let paused = state == EngineState::Paused;

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                Some(ctl) = control.recv() => {
                    self.on_control(ctl);
                }
                Some(buf) = inbound.recv() => {
                    if paused {
                        debug!("Paused, discarding {} byte message", buf.len());
                        continue;
                    }
                    self.handle_message(buf);
                }
                Some(payment) = payments.recv() => {
                    if paused {
                        debug!("Paused, discarding payment for {}", payment.id);
                        continue;
                    }
                    self.handle_payment(payment);
                }
                Some(work) = deferred.recv() => {
                    if paused {
                        continue;
                    }
                    self.handle_deferred(work);
                }
                _ = sweep.tick() => {
                    if !paused {
                        self.sweep();
                    }
                }
            }
        }

        *self.state.write() = EngineState::ShuttingDown;
        info!("Relay {} stopped", self.local.id);
        Ok(())
    }

    fn on_control(&self, ctl: Control) {
        let mut state = self.state.write();
        match (ctl, *state) {
            (Control::Pause, EngineState::Running) => {
                info!("Relay {} paused", self.local.id);
                *state = EngineState::Paused;
            }
            (Control::Resume, EngineState::Paused) => {
                info!("Relay {} resumed", self.local.id);
                *state = EngineState::Running;
            }
            _ => {}
        }
    }

    fn handle_message(&self, buf: Vec<u8>) {
        self.stats.write().messages_received += 1;
        let len = buf.len();
        if let Err(e) = self.process(buf, None) {
            self.drop_message(len, e);
        }
    }

    fn drop_message(&self, len: usize, e: EngineError) {
        warn!("Dropped {} byte message: {}", len, e);
        self.stats.write().dropped += 1;
    }

    /// Credit a live session (top-up) or hold the payment for its session.
    /// The payer is acknowledged after the payment is recorded.
    fn handle_payment(&self, payment: Payment) {
        self.stats.write().payments_received += 1;
        let Payment {
            id,
            preimage,
            amount,
            confirm,
        } = payment;

        let accepted = match self.sessions.find_by_preimage(&preimage) {
            Some(existing) => {
                info!("Session {} topped up by {}", existing, amount);
                self.sessions.inc_session(&existing, amount)
            }
            None => {
                let added = self
                    .sessions
                    .add_pending_payment(PendingPayment {
                        id,
                        preimage,
                        amount,
                    });
                if !added {
                    warn!("Duplicate payment for pre-image {}", preimage);
                }
                added
            }
        };

        if confirm.send(accepted).is_err() {
            debug!("Payer of {} stopped waiting", id);
        }
    }

    fn handle_deferred(&self, work: Deferred) {
        match work {
            Deferred::ExitReply(reply) => {
                if let Err(e) = self.on_exit_reply(*reply) {
                    warn!("Exit reply dropped: {}", e);
                    self.stats.write().dropped += 1;
                }
            }
            Deferred::Inject { buf, prev } => {
                let len = buf.len();
                if let Err(e) = self.process(buf, prev) {
                    self.drop_message(len, e);
                }
            }
        }
    }

    /// Expire sends that went unanswered for longer than the response
    /// timeout. Each node on the path takes a liveness failure; the callback
    /// is dropped without running.
    fn sweep(&self) {
        if let Some(cutoff) = Instant::now().checked_sub(self.config.response_timeout) {
            for stale in self.pending.find_older(cutoff) {
                if self.pending.take(&stale.id).is_none() {
                    continue;
                }
                for id in &stale.billable {
                    if let Some(session) = self.sessions.find(id) {
                        let failures = session.node.record_failure();
                        debug!("Node {} has {} failures", session.node.id, failures);
                    }
                }
                warn!("Send {} expired unanswered", stale.id);
                self.stats.write().expired += 1;
            }
        }

        let pruned = self.intros.prune(unix_now());
        if pruned > 0 {
            debug!("Pruned {} expired introductions", pruned);
        }
    }
}

/// Seconds since the unix epoch
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
