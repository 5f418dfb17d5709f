use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::time::timeout;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not resolve address '{0}'")]
    Resolve(String),
    #[error("Dial to {address} failed: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("Dial to {address} timed out after {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },
    #[error("Write failed: {0}")]
    Write(#[from] io::Error),
    #[error("Write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("Short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// One datagram per record
    #[default]
    Udp,
    /// Persistent stream, records separated by newlines
    Tcp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Udp => f.write_str("udp"),
            TransportKind::Tcp => f.write_str("tcp"),
        }
    }
}

/// An open connection to the collector.
#[async_trait]
pub trait Connection: Send {
    /// Write one framed record in full.
    async fn write_record(&mut self, record: &[u8]) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Knows how to open connections to one destination.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn Connection>, TransportError>;
    /// `kind://address`, for logs.
    fn describe(&self) -> String;
}

pub fn transport_for(kind: TransportKind, address: &str, dial_timeout: Duration) -> Arc<dyn Transport> {
    match kind {
        TransportKind::Udp => Arc::new(UdpTransport::new(address, dial_timeout)),
        TransportKind::Tcp => Arc::new(TcpTransport::new(address, dial_timeout)),
    }
}

async fn resolve(address: &str, limit: Duration) -> Result<SocketAddr, TransportError> {
    let mut addrs = timeout(limit, lookup_host(address))
        .await
        .map_err(|_| TransportError::DialTimeout {
            address: address.to_string(),
            timeout: limit,
        })?
        .map_err(|source| TransportError::Dial {
            address: address.to_string(),
            source,
        })?;

    addrs
        .next()
        .ok_or_else(|| TransportError::Resolve(address.to_string()))
}

#[derive(Debug, Clone)]
pub struct UdpTransport {
    address: String,
    dial_timeout: Duration,
}

impl UdpTransport {
    pub fn new(address: impl Into<String>, dial_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            dial_timeout,
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn dial(&self) -> Result<Box<dyn Connection>, TransportError> {
        let peer = resolve(&self.address, self.dial_timeout).await?;
        let local: SocketAddr = if peer.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let dial_error = |source| TransportError::Dial {
            address: self.address.clone(),
            source,
        };
        let socket = UdpSocket::bind(local).await.map_err(dial_error)?;
        socket.connect(peer).await.map_err(dial_error)?;

        debug!("Connected udp socket to {}", peer);
        Ok(Box::new(UdpConnection { socket }))
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.address)
    }
}

struct UdpConnection {
    socket: UdpSocket,
}

#[async_trait]
impl Connection for UdpConnection {
    async fn write_record(&mut self, record: &[u8]) -> Result<(), TransportError> {
        let written = self.socket.send(record).await?;
        if written != record.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: record.len(),
            });
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    dial_timeout: Duration,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, dial_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            dial_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn dial(&self) -> Result<Box<dyn Connection>, TransportError> {
        let peer = resolve(&self.address, self.dial_timeout).await?;
        let stream = timeout(self.dial_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| TransportError::DialTimeout {
                address: self.address.clone(),
                timeout: self.dial_timeout,
            })?
            .map_err(|source| TransportError::Dial {
                address: self.address.clone(),
                source,
            })?;
        stream
            .set_nodelay(true)
            .map_err(|source| TransportError::Dial {
                address: self.address.clone(),
                source,
            })?;

        debug!("Connected tcp stream to {}", peer);
        Ok(Box::new(TcpConnection { stream }))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

struct TcpConnection {
    stream: TcpStream,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn write_record(&mut self, record: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(record).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
