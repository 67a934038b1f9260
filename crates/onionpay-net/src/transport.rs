//! Byte transports
//!
//! A transport hands opaque buffers to a peer address without blocking.
//! Inbound buffers arrive on an unbounded receiver returned when the
//! transport is created.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Largest payload a single UDP datagram can carry
pub const MAX_DATAGRAM: usize = 65_507;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Peer not found: {0}")]
    PeerNotFound(SocketAddr),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {0} bytes")]
    TooLarge(usize),
}

/// Outbound half of a transport
pub trait Transport: Send + Sync {
    /// Address peers reach this relay on
    fn local_addr(&self) -> SocketAddr;

    /// Queue `bytes` for delivery to `to`
    fn send(&self, to: SocketAddr, bytes: Vec<u8>) -> Result<(), TransportError>;
}

// =============================================================================
// IN-MEMORY MESH
// =============================================================================

/// In-process network of relays keyed by address
#[derive(Clone, Default)]
pub struct Mesh {
    peers: Arc<RwLock<HashMap<SocketAddr, mpsc::UnboundedSender<Vec<u8>>>>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a relay at `addr`
    pub fn join(&self, addr: SocketAddr) -> (MeshTransport, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.write().insert(addr, tx);
        let transport = MeshTransport {
            addr,
            mesh: self.clone(),
        };
        (transport, rx)
    }

    /// Detach the relay at `addr`
    pub fn leave(&self, addr: &SocketAddr) {
        self.peers.write().remove(addr);
    }
}

/// One relay's handle on a [`Mesh`]
#[derive(Clone)]
pub struct MeshTransport {
    addr: SocketAddr,
    mesh: Mesh,
}

impl Transport for MeshTransport {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn send(&self, to: SocketAddr, bytes: Vec<u8>) -> Result<(), TransportError> {
        let tx = self
            .mesh
            .peers
            .read()
            .get(&to)
            .cloned()
            .ok_or(TransportError::PeerNotFound(to))?;
        tx.send(bytes).map_err(|_| TransportError::ConnectionClosed)
    }
}

// =============================================================================
// UDP
// =============================================================================

/// Datagram transport: one reader task, one writer task
#[derive(Clone)]
pub struct UdpTransport {
    addr: SocketAddr,
    outbound: mpsc::UnboundedSender<(SocketAddr, Vec<u8>)>,
}

impl UdpTransport {
    /// Bind `addr` and start the socket tasks
    pub async fn bind(
        addr: SocketAddr,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>), TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        info!("UDP transport listening on {}", local);

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<(SocketAddr, Vec<u8>)>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        let writer = socket.clone();
        tokio::spawn(async move {
            while let Some((to, bytes)) = outbound_rx.recv().await {
                if let Err(e) = writer.send_to(&bytes, to).await {
                    warn!("Send to {} failed: {}", to, e);
                }
            }
        });

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((n, from)) => {
                        debug!("{} bytes from {}", n, from);
                        if inbound_tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Receive failed: {}", e),
                }
            }
        });

        let transport = Self {
            addr: local,
            outbound,
        };
        Ok((transport, inbound))
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    fn send(&self, to: SocketAddr, bytes: Vec<u8>) -> Result<(), TransportError> {
        if bytes.len() > MAX_DATAGRAM {
            return Err(TransportError::TooLarge(bytes.len()));
        }
        self.outbound
            .send((to, bytes))
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
