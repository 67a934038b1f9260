//! Sessions, circuits and the session manager
//!
//! A session is a pair of keys a relay holds for one client plus the credit
//! the client paid for. Relays hold sessions sold to others; clients hold
//! copies of the sessions they bought so they can build onions and mirror
//! the relays' billing.

use crate::error::{EngineError, Result};
use onionpay_core::builder::{ReplyPath, ReturnHop};
use onionpay_core::crypto::{preimage_hash, Cloak, Keys, PrivKey, PubKey};
use onionpay_core::{Hash, Id, CIRCUIT_LEN, RETURN_HOP};
use onionpay_net::Node;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Hop slots tracked per node: the five circuit positions plus the return
const HOP_SLOTS: usize = CIRCUIT_LEN + 1;

/// Per-hop credential and prepaid credit
#[derive(Clone, Debug)]
pub struct Session {
    pub id: Id,
    /// Relay that honours this session
    pub node: Arc<Node>,
    /// Position in the circuit, or [`RETURN_HOP`]
    pub hop: u8,
    pub header: Keys,
    pub payload: Keys,
    pub preimage: Hash,
    pub remaining: u64,
}

impl Session {
    pub fn new(
        id: Id,
        node: Arc<Node>,
        hop: u8,
        header: PrivKey,
        payload: PrivKey,
        remaining: u64,
    ) -> Self {
        let preimage = preimage_hash(&header, &payload);
        Self {
            id,
            node,
            hop,
            header: Keys::from_private(header),
            payload: Keys::from_private(payload),
            preimage,
            remaining,
        }
    }

    /// This session as one hop of a reply path
    pub fn return_hop(&self) -> ReturnHop {
        ReturnHop {
            addr: self.node.addr,
            header: self.header.public,
            payload: self.payload.public,
        }
    }
}

/// Five relay sessions plus the client's own return session
#[derive(Clone, Debug)]
pub struct Circuit {
    pub hops: [Session; CIRCUIT_LEN],
    pub ret: Session,
}

impl Circuit {
    /// Ids of the billable sessions, in hop order
    pub fn billable(&self) -> Vec<Id> {
        self.hops.iter().map(|s| s.id).collect()
    }

    /// Reply path through hops 3 and 4 back to the return session
    pub fn reply_path(&self) -> ReplyPath {
        ReplyPath::new([
            self.hops[3].return_hop(),
            self.hops[4].return_hop(),
            self.ret.return_hop(),
        ])
    }
}

/// A payment received before the session it funds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingPayment {
    pub id: Id,
    pub preimage: Hash,
    pub amount: u64,
}

/// Result of matching a cloak against local keys
#[derive(Clone, Debug)]
pub enum Cloaked {
    /// The relay identity key; only session deliveries use it
    Identity(PrivKey),
    Session(Session),
}

struct Inner {
    nodes: Vec<Arc<Node>>,
    sessions: HashMap<Id, Session>,
    /// Node id → session id cached at each hop position
    hops: HashMap<Id, [Option<Id>; HOP_SLOTS]>,
    pending: HashMap<Hash, PendingPayment>,
}

impl Inner {
    fn insert(&mut self, session: Session) {
        let slot = usize::from(session.hop).min(HOP_SLOTS - 1);
        self.hops.entry(session.node.id).or_insert([None; HOP_SLOTS])[slot] = Some(session.id);
        self.sessions.insert(session.id, session);
    }
}

/// Known nodes, live sessions and payments awaiting their session
pub struct SessionManager {
    identity: Keys,
    local: Arc<Node>,
    ret: Session,
    max_failures: u32,
    inner: Mutex<Inner>,
}

impl SessionManager {
    /// Create a manager for `local`. The return session is created here with
    /// zero credit.
    pub fn new(identity: Keys, local: Arc<Node>, max_failures: u32) -> Self {
        let ret = Session::new(
            Id::new(),
            local.clone(),
            RETURN_HOP,
            PrivKey::generate(),
            PrivKey::generate(),
            0,
        );
        let mut inner = Inner {
            nodes: vec![local.clone()],
            sessions: HashMap::new(),
            hops: HashMap::new(),
            pending: HashMap::new(),
        };
        inner.insert(ret.clone());

        Self {
            identity,
            local,
            ret,
            max_failures,
            inner: Mutex::new(inner),
        }
    }

    pub fn local_node(&self) -> &Arc<Node> {
        &self.local
    }

    /// The local return session. It is never billed, so the copy taken at
    /// construction stays current.
    pub fn return_session(&self) -> Session {
        self.ret.clone()
    }

    pub fn is_return_session(&self, id: &Id) -> bool {
        self.ret.id == *id
    }

    // =========================================================================
    // NODES
    // =========================================================================

    /// Register remote nodes, skipping ids already known
    pub fn add_nodes(&self, nodes: impl IntoIterator<Item = Node>) {
        let mut inner = self.inner.lock();
        for node in nodes {
            if inner.nodes.iter().any(|n| n.id == node.id) {
                continue;
            }
            debug!("Added node {} at {}", node.id, node.addr);
            inner.nodes.push(Arc::new(node));
        }
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.inner.lock().nodes.clone()
    }

    pub fn find_node(&self, id: &Id) -> Option<Arc<Node>> {
        self.inner.lock().nodes.iter().find(|n| n.id == *id).cloned()
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    pub fn add_session(&self, session: Session) {
        debug!(
            "Session {} hop {} on node {} with {}",
            session.id, session.hop, session.node.id, session.remaining
        );
        self.inner.lock().insert(session);
    }

    pub fn find(&self, id: &Id) -> Option<Session> {
        self.inner.lock().sessions.get(id).cloned()
    }

    pub fn remaining(&self, id: &Id) -> Option<u64> {
        self.inner.lock().sessions.get(id).map(|s| s.remaining)
    }

    pub fn find_by_preimage(&self, preimage: &Hash) -> Option<Id> {
        self.inner
            .lock()
            .sessions
            .values()
            .find(|s| s.preimage == *preimage)
            .map(|s| s.id)
    }

    pub fn find_by_header(&self, key: &PubKey) -> Option<Session> {
        self.inner
            .lock()
            .sessions
            .values()
            .find(|s| s.header.public == *key)
            .cloned()
    }

    /// Sessions bought at `hop`, excluding those sold by this relay
    pub fn sessions_at_hop(&self, hop: u8) -> Vec<Session> {
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.hop == hop && s.node.id != self.local.id)
            .cloned()
            .collect()
    }

    /// Match a cloak against the identity key, then every session this relay
    /// holds keys for. Linear in the session count.
    pub fn find_cloaked(&self, cloak: &Cloak) -> Option<Cloaked> {
        if cloak.matches(&self.identity.public) {
            return Some(Cloaked::Identity(self.identity.private.clone()));
        }
        self.inner
            .lock()
            .sessions
            .values()
            .filter(|s| s.node.id == self.local.id)
            .find(|s| cloak.matches(&s.header.public))
            .cloned()
            .map(Cloaked::Session)
    }

    /// Debit `amount` if the session can cover it
    pub fn dec_session(&self, id: &Id, amount: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(session) if session.remaining >= amount => {
                session.remaining -= amount;
                true
            }
            _ => false,
        }
    }

    /// Credit `amount`; false if the session is unknown
    pub fn inc_session(&self, id: &Id, amount: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(session) => {
                session.remaining = session.remaining.saturating_add(amount);
                true
            }
            None => false,
        }
    }

    /// Overwrite the balance with the relay's authoritative figure
    pub fn set_remaining(&self, id: &Id, amount: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(id) {
            Some(session) => {
                session.remaining = amount;
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // PAYMENTS
    // =========================================================================

    /// Record a payment awaiting its session; false if one is already
    /// recorded for the same pre-image
    pub fn add_pending_payment(&self, payment: PendingPayment) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending.contains_key(&payment.preimage) {
            return false;
        }
        inner.pending.insert(payment.preimage, payment);
        true
    }

    pub fn find_pending_payment(&self, preimage: &Hash) -> Option<PendingPayment> {
        self.inner.lock().pending.get(preimage).cloned()
    }

    /// Remove and return the payment for `preimage`
    pub fn delete_pending_payment(&self, preimage: &Hash) -> Option<PendingPayment> {
        self.inner.lock().pending.remove(preimage)
    }

    // =========================================================================
    // CIRCUITS
    // =========================================================================

    /// Pick a node for each hop position that holds no session at that
    /// position yet. Slots stay `None` when no node qualifies.
    pub fn select_unused_circuit(&self) -> [Option<Arc<Node>>; CIRCUIT_LEN] {
        let inner = self.inner.lock();
        let mut rng = rand::thread_rng();
        let mut chosen: [Option<Arc<Node>>; CIRCUIT_LEN] = Default::default();
        let mut used = HashSet::new();

        for (hop, slot) in chosen.iter_mut().enumerate() {
            let candidates: Vec<&Arc<Node>> = inner
                .nodes
                .iter()
                .filter(|n| n.id != self.local.id)
                .filter(|n| n.failures() < self.max_failures)
                .filter(|n| !used.contains(&n.id))
                .filter(|n| {
                    inner
                        .hops
                        .get(&n.id)
                        .map_or(true, |cached| cached[hop].is_none())
                })
                .collect();

            if let Some(node) = candidates.choose(&mut rng) {
                used.insert(node.id);
                *slot = Some(Arc::clone(node));
            }
        }
        chosen
    }

    /// Fill the unset slots of `preset` with live sessions of the matching
    /// hop on distinct nodes. The return session closes the circuit.
    pub fn select_hops(&self, preset: [Option<Id>; CIRCUIT_LEN]) -> Result<Circuit> {
        let inner = self.inner.lock();
        let mut rng = rand::thread_rng();
        let mut used = HashSet::new();

        let mut fixed: [Option<Session>; CIRCUIT_LEN] = Default::default();
        for (slot, id) in fixed.iter_mut().zip(preset.iter()) {
            if let Some(id) = id {
                let session = inner
                    .sessions
                    .get(id)
                    .ok_or(EngineError::UnknownSession(*id))?;
                used.insert(session.node.id);
                *slot = Some(session.clone());
            }
        }

        let mut hops = Vec::with_capacity(CIRCUIT_LEN);
        for (hop, slot) in fixed.into_iter().enumerate() {
            if let Some(session) = slot {
                hops.push(session);
                continue;
            }
            let candidates: Vec<&Session> = inner
                .sessions
                .values()
                .filter(|s| usize::from(s.hop) == hop)
                .filter(|s| s.node.id != self.local.id)
                .filter(|s| s.node.failures() < self.max_failures)
                .filter(|s| !used.contains(&s.node.id))
                .collect();
            let session = candidates
                .choose(&mut rng)
                .ok_or(EngineError::NoSessions(hop))?;
            used.insert(session.node.id);
            hops.push((*session).clone());
        }

        let hops: [Session; CIRCUIT_LEN] = hops
            .try_into()
            .map_err(|_| EngineError::NoSessions(CIRCUIT_LEN))?;
        Ok(Circuit {
            hops,
            ret: self.ret.clone(),
        })
    }
}
