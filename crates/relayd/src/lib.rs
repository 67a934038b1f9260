//! relayd - onionpay relay daemon
//!
//! This crate provides:
//! - Sessions, circuits and the session manager
//! - The pending-response ledger matching replies to sends
//! - Hidden service introductions
//! - Onion recipes for purchases, exits and balance queries
//! - The engine: per-relay dispatch loop, billing and client sends

pub mod config;
pub mod engine;
pub mod error;
pub mod intro;
pub mod onions;
pub mod pending;
pub mod session;

pub use config::{Config, EngineConfig, NodeState};
pub use engine::{Collaborators, Engine, EngineState, EngineStats};
pub use error::{EngineError, Result};
pub use intro::Introductions;
pub use pending::{PendingResponse, PendingResponses};
pub use session::{Circuit, Session, SessionManager};
