//! relayd configuration

use anyhow::{bail, Context};
use clap::Parser;
use onionpay_core::crypto::{Keys, PrivKey, PubKey};
use onionpay_net::{Node, Service};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File holding the persisted [`NodeState`]
const STATE_FILE: &str = "identity.bin";

/// onionpay relay daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "relayd")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// UDP listen address
    #[arg(short, long, default_value = "0.0.0.0:9735")]
    pub listen: SocketAddr,

    /// Data directory for the relay identity
    #[arg(short, long, default_value = "./data/relayd", env = "RELAYD_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Price per byte relayed
    #[arg(long, default_value = "1")]
    pub relay_rate: u64,

    /// Known relay as <hex identity>@<addr> (repeatable)
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Local TCP service exposed to exits as <port>=<rate> (repeatable)
    #[arg(long = "service")]
    pub services: Vec<String>,

    /// Wait for a local service reply (milliseconds)
    #[arg(long, default_value = "5000")]
    pub exit_timeout_ms: u64,

    /// Give up on an unanswered send after this many seconds
    #[arg(long, default_value = "60")]
    pub response_timeout_secs: u64,

    /// Longest hold a Delay layer may ask for (milliseconds)
    #[arg(long, default_value = "60000")]
    pub max_delay_ms: u64,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.exit_timeout_ms == 0 {
            bail!("Exit timeout must be positive");
        }
        if self.response_timeout_secs == 0 {
            bail!("Response timeout must be positive");
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            bail!("Unknown log format: {}", self.log_format);
        }
        self.parse_peers()?;
        self.parse_services()?;
        Ok(())
    }

    /// Parse `--peer` values. Peers are assumed to charge our own relay rate
    /// until they tell us otherwise.
    pub fn parse_peers(&self) -> anyhow::Result<Vec<Node>> {
        self.peers
            .iter()
            .map(|peer| {
                let (key, addr) = peer
                    .split_once('@')
                    .with_context(|| format!("Peer {} is not <identity>@<addr>", peer))?;
                let bytes = hex::decode(key).with_context(|| format!("Peer key {}", key))?;
                let identity: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| anyhow::anyhow!("Peer key {} is not 32 bytes", key))?;
                let addr: SocketAddr = addr
                    .parse()
                    .with_context(|| format!("Peer address {}", addr))?;
                Ok(Node::new(addr, PubKey(identity), self.relay_rate))
            })
            .collect()
    }

    /// Parse `--service` values
    pub fn parse_services(&self) -> anyhow::Result<Vec<Service>> {
        self.services
            .iter()
            .map(|service| {
                let (port, rate) = service
                    .split_once('=')
                    .with_context(|| format!("Service {} is not <port>=<rate>", service))?;
                Ok(Service {
                    port: port.parse().with_context(|| format!("Service port {}", port))?,
                    rate: rate.parse().with_context(|| format!("Service rate {}", rate))?,
                })
            })
            .collect()
    }

    /// Engine settings derived from the command line
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            relay_rate: self.relay_rate,
            exit_timeout: Duration::from_millis(self.exit_timeout_ms),
            response_timeout: Duration::from_secs(self.response_timeout_secs),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..EngineConfig::default()
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Price per byte relayed
    pub relay_rate: u64,
    /// Bound on a local service call
    pub exit_timeout: Duration,
    /// Age at which an unanswered send is swept
    pub response_timeout: Duration,
    /// Bound on a payment acknowledgement
    pub payment_timeout: Duration,
    pub sweep_interval: Duration,
    /// Longest hold a Delay layer may ask for
    pub max_delay: Duration,
    /// Unanswered sends after which a node is left out of new circuits
    pub max_failures: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay_rate: 1,
            exit_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(60),
            payment_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            max_failures: 3,
        }
    }
}

/// Persisted node state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeState {
    /// x25519 identity secret
    pub identity_seed: [u8; 32],
}

impl NodeState {
    /// Load the state in `dir`, creating a fresh identity on first start
    pub fn load_or_create(dir: &Path) -> anyhow::Result<Self> {
        let path = dir.join(STATE_FILE);
        if path.exists() {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Reading {}", path.display()))?;
            return postcard::from_bytes(&bytes)
                .with_context(|| format!("Decoding {}", path.display()));
        }

        let state = Self {
            identity_seed: PrivKey::generate().to_bytes(),
        };
        std::fs::create_dir_all(dir).with_context(|| format!("Creating {}", dir.display()))?;
        let bytes = postcard::to_allocvec(&state)?;
        std::fs::write(&path, bytes).with_context(|| format!("Writing {}", path.display()))?;
        Ok(state)
    }

    /// The relay identity keypair
    pub fn identity(&self) -> Keys {
        Keys::from_private(PrivKey::from_bytes(self.identity_seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(args: &[&str]) -> Config {
        let mut argv = vec!["relayd"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn test_defaults_validate() {
        let config = config(&[]);
        assert!(config.validate().is_ok());
        assert_eq!(config.engine_config().exit_timeout, Duration::from_secs(5));
        assert_eq!(config.engine_config().max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_peers_and_services() {
        let identity = PrivKey::generate().public();
        let peer = format!("{}@10.0.0.7:9735", hex::encode(identity.0));
        let config = config(&[
            "--peer",
            &peer,
            "--service",
            "3455=2",
            "--relay-rate",
            "3",
        ]);
        assert!(config.validate().is_ok());

        let peers = config.parse_peers().unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].identity, identity);
        assert_eq!(peers[0].relay_rate, 3);
        assert_eq!(
            config.parse_services().unwrap(),
            vec![Service { port: 3455, rate: 2 }]
        );
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(config(&["--peer", "nothex@10.0.0.1:1"]).validate().is_err());
        assert!(config(&["--peer", "abcd@10.0.0.1:1"]).validate().is_err());
        assert!(config(&["--service", "3455"]).validate().is_err());
        assert!(config(&["--log-format", "xml"]).validate().is_err());
        assert!(config(&["--exit-timeout-ms", "0"]).validate().is_err());
    }

    #[test]
    fn test_identity_persists() {
        let dir = tempfile::tempdir().unwrap();
        let first = NodeState::load_or_create(dir.path()).unwrap();
        let second = NodeState::load_or_create(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.identity().public, second.identity().public);
    }
}
