//! Payment events
//!
//! A relay learns about an incoming payment as a [`Payment`] event carrying
//! the pre-image hash the payer committed to. The relay acknowledges it on
//! the event's confirm channel.

use crate::node::Node;
use onionpay_core::{Hash, Id};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Payment errors
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("No payment route to node {0}")]
    NoRoute(Id),
    #[error("Payment channel closed")]
    ChannelClosed,
}

/// A payment received by a relay
#[derive(Debug)]
pub struct Payment {
    /// Session the payment funds
    pub id: Id,
    pub preimage: Hash,
    pub amount: u64,
    /// Acknowledgement back to the payer
    pub confirm: oneshot::Sender<bool>,
}

/// Outbound payments
pub trait PaymentSender: Send + Sync {
    /// Pay `amount` to `node` against `preimage`. The receiver resolves once
    /// the node acknowledges.
    fn pay(
        &self,
        node: &Node,
        id: Id,
        preimage: Hash,
        amount: u64,
    ) -> Result<oneshot::Receiver<bool>, PaymentError>;
}

/// In-memory payment network keyed by node id
#[derive(Clone, Default)]
pub struct PaymentHub {
    routes: Arc<RwLock<HashMap<Id, mpsc::UnboundedSender<Payment>>>>,
}

impl PaymentHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive payments addressed to `node`
    pub fn register(&self, node: Id) -> mpsc::UnboundedReceiver<Payment> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(node, tx);
        rx
    }
}

impl PaymentSender for PaymentHub {
    fn pay(
        &self,
        node: &Node,
        id: Id,
        preimage: Hash,
        amount: u64,
    ) -> Result<oneshot::Receiver<bool>, PaymentError> {
        let route = self
            .routes
            .read()
            .get(&node.id)
            .cloned()
            .ok_or(PaymentError::NoRoute(node.id))?;

        let (confirm, ack) = oneshot::channel();
        route
            .send(Payment {
                id,
                preimage,
                amount,
                confirm,
            })
            .map_err(|_| PaymentError::ChannelClosed)?;
        debug!("Paid {} to node {} for session {}", amount, node.id, id);
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use onionpay_core::crypto::PrivKey;

    #[tokio::test]
    async fn test_hub_routes_and_acknowledges() {
        let hub = PaymentHub::new();
        let node = Node::new("127.0.0.1:1".parse().unwrap(), PrivKey::generate().public(), 1);
        let mut payments = hub.register(node.id);

        let id = Id::new();
        let ack = hub.pay(&node, id, Hash([5; 32]), 1_000).unwrap();

        let payment = payments.recv().await.unwrap();
        assert_eq!(payment.id, id);
        assert_eq!(payment.amount, 1_000);
        payment.confirm.send(true).unwrap();
        assert!(ack.await.unwrap());
    }

    #[test]
    fn test_unregistered_node_has_no_route() {
        let hub = PaymentHub::new();
        let node = Node::new("127.0.0.1:1".parse().unwrap(), PrivKey::generate().public(), 1);
        assert!(matches!(
            hub.pay(&node, Id::new(), Hash::default(), 1),
            Err(PaymentError::NoRoute(_))
        ));
    }
}
