//! Relay node descriptors

use onionpay_core::crypto::PubKey;
use onionpay_core::Id;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};

/// A service a node exposes to exit layers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Service {
    pub port: u16,
    /// Price per byte of request and reply
    pub rate: u64,
}

/// A known relay, local or remote
#[derive(Debug)]
pub struct Node {
    /// Derived from the identity key
    pub id: Id,
    pub addr: SocketAddr,
    /// x25519 identity key; session purchases are encrypted to it
    pub identity: PubKey,
    /// Price per byte relayed
    pub relay_rate: u64,
    pub services: Vec<Service>,
    /// Consecutive unanswered sends through this node
    failures: AtomicU32,
}

impl Node {
    /// Create a node without services
    pub fn new(addr: SocketAddr, identity: PubKey, relay_rate: u64) -> Self {
        Self {
            id: Self::id_for(&identity),
            addr,
            identity,
            relay_rate,
            services: Vec::new(),
            failures: AtomicU32::new(0),
        }
    }

    /// Node id for an identity key
    pub fn id_for(identity: &PubKey) -> Id {
        let hash = blake3::hash(identity.as_bytes());
        let mut id = [0u8; 16];
        id.copy_from_slice(&hash.as_bytes()[..16]);
        Id(id)
    }

    /// Expose a service
    pub fn with_service(mut self, port: u16, rate: u64) -> Self {
        self.services.retain(|s| s.port != port);
        self.services.push(Service { port, rate });
        self
    }

    /// Rate of the service on `port`
    pub fn service_rate(&self, port: u16) -> Option<u64> {
        self.services.iter().find(|s| s.port == port).map(|s| s.rate)
    }

    /// Current failure count
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Record an unanswered send, returning the new count
    pub fn record_failure(&self) -> u32 {
        self.failures.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    /// Clear the failure count after a successful round trip
    pub fn record_success(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}
