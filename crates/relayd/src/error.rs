//! Engine errors
//!
//! Every handler error drops the message it was raised for. None of them
//! are reported back to the sender.

use onionpay_core::{Hash, Id};
use onionpay_net::{PaymentError, TransportError};
use thiserror::Error;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Wire error: {0}")]
    Wire(#[from] onionpay_core::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),
    #[error("No local key matches the cloak")]
    NoMatchingKey,
    #[error("Insufficient credit on session {0}")]
    InsufficientCredit(Id),
    #[error("Malformed sequence: {0}")]
    MalformedSequence(&'static str),
    #[error("Request from outside is absurd: {0}")]
    Unsolicited(&'static str),
    #[error("No service on port {0}")]
    NoService(u16),
    #[error("No pending payment for pre-image {0}")]
    NoPendingPayment(Hash),
    #[error("No pending send {0}")]
    NoPendingResponse(Id),
    #[error("Send {0} is already pending")]
    DuplicateSend(Id),
    #[error("Unknown session {0}")]
    UnknownSession(Id),
    #[error("No eligible relay for hop {0}")]
    NoCircuit(usize),
    #[error("No session available for hop {0}")]
    NoSessions(usize),
    #[error("Payment to node {0} was not confirmed")]
    PaymentRefused(Id),
    #[error("Introduction expired")]
    IntroExpired,
    #[error("Engine already running")]
    AlreadyRunning,
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
