//! Links to local services
//!
//! An exit relay hands a request payload to the service behind a port and
//! waits for one reply. The caller bounds the wait.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// Queue depth of a service link
const LINK_CAPACITY: usize = 64;

/// Service errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Service unavailable")]
    Unavailable,
    #[error("Service dropped the request")]
    Dropped,
}

/// One request to a local service
#[derive(Debug)]
pub struct ServiceRequest {
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

/// Handle on a local service
#[derive(Clone, Debug)]
pub struct ServiceLink {
    tx: mpsc::Sender<ServiceRequest>,
}

impl ServiceLink {
    /// In-process service; the caller drains the receiver
    pub fn channel() -> (Self, mpsc::Receiver<ServiceRequest>) {
        let (tx, rx) = mpsc::channel(LINK_CAPACITY);
        (Self { tx }, rx)
    }

    /// In-process service answering every request with `handler`
    pub fn serve<F>(handler: F) -> Self
    where
        F: Fn(Vec<u8>) -> Vec<u8> + Send + 'static,
    {
        let (link, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let _ = req.reply.send(handler(req.payload));
            }
        });
        link
    }

    /// Proxy to a TCP service on `127.0.0.1:port`.
    ///
    /// Each request opens a connection, writes the payload, half-closes and
    /// reads until the service closes its side.
    pub fn tcp(port: u16) -> Self {
        let (link, mut rx) = Self::channel();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                tokio::spawn(async move {
                    match tcp_exchange(port, &req.payload).await {
                        Ok(reply) => {
                            let _ = req.reply.send(reply);
                        }
                        Err(e) => warn!("Service on port {} failed: {}", port, e),
                    }
                });
            }
        });
        link
    }

    /// Send a request and wait for its reply
    pub async fn call(&self, payload: Vec<u8>) -> Result<Vec<u8>, ServiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ServiceRequest { payload, reply })
            .await
            .map_err(|_| ServiceError::Unavailable)?;
        rx.await.map_err(|_| ServiceError::Dropped)
    }
}

async fn tcp_exchange(port: u16, payload: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
    stream.write_all(payload).await?;
    stream.shutdown().await?;
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_serve_answers() {
        let link = ServiceLink::serve(|mut p| {
            p.reverse();
            p
        });
        assert_eq!(link.call(b"abc".to_vec()).await.unwrap(), b"cba");
    }

    #[tokio::test]
    async fn test_dropped_request() {
        let (link, mut rx) = ServiceLink::channel();
        tokio::spawn(async move {
            // take the request and never answer
            let _req = rx.recv().await;
        });
        assert!(matches!(
            link.call(b"x".to_vec()).await,
            Err(ServiceError::Dropped)
        ));
    }

    #[tokio::test]
    async fn test_tcp_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = Vec::new();
            sock.read_to_end(&mut req).await.unwrap();
            sock.write_all(&req.to_ascii_uppercase()).await.unwrap();
        });

        let link = ServiceLink::tcp(port);
        assert_eq!(link.call(b"request".to_vec()).await.unwrap(), b"REQUEST");
    }
}
