//! Collaborator seams for onionpay relays
//!
//! This crate provides:
//! - Relay node descriptors with liveness tracking
//! - Byte transports (in-memory mesh for tests, UDP for the daemon)
//! - Payment events and an in-memory payment hub
//! - Links to local services reached by exit layers

pub mod node;
pub mod payment;
pub mod service;
pub mod transport;

pub use node::{Node, Service};
pub use payment::{Payment, PaymentError, PaymentHub, PaymentSender};
pub use service::{ServiceError, ServiceLink, ServiceRequest};
pub use transport::{Mesh, MeshTransport, Transport, TransportError, UdpTransport};
