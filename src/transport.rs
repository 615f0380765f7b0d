//! Datagram transport abstraction
//!
//! The core never opens sockets itself; it is handed a [`Transport`] chosen
//! once at construction. The binary injects [`UdpTransport`]; placeholder mode
//! uses [`NullTransport`]; tests use the scripted mock in [`testing`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info};

/// Maximum datagram size accepted from devices
const RECV_BUFFER_SIZE: usize = 2048;

/// Raw datagram transport
///
/// All methods take `&self`; implementations use interior mutability so a
/// single instance can be shared behind `Arc<dyn Transport>` by discovery and
/// dispatch without a global lock.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `addr:port`
    async fn send_to(&self, addr: IpAddr, port: u16, payload: &[u8]) -> Result<()>;

    /// Receive one datagram, or `None` once `timeout` elapses
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>>;

    /// Join a multicast group on the receive side
    async fn join_multicast(&self, group: Ipv4Addr, port: u16) -> Result<()>;
}

/// Host-side UDP transport
///
/// Two sockets, mirroring how the fixtures expect traffic: an ephemeral
/// broadcast-capable send socket, and a receive socket bound to the response
/// port where devices answer scans and status queries.
pub struct UdpTransport {
    send_socket: tokio::net::UdpSocket,
    recv_socket: tokio::net::UdpSocket,
}

impl UdpTransport {
    /// Bind the transport, listening for device responses on `response_port`
    pub async fn bind(response_port: u16) -> Result<Self> {
        let recv_socket = tokio::net::UdpSocket::bind(("0.0.0.0", response_port))
            .await
            .with_context(|| format!("Failed to bind response socket on port {}", response_port))?;

        let send_socket = tokio::net::UdpSocket::bind(("0.0.0.0", 0))
            .await
            .context("Failed to bind send socket")?;
        send_socket
            .set_broadcast(true)
            .context("Failed to enable broadcast on send socket")?;

        info!("🔌 UDP transport bound (responses on port {})", response_port);
        Ok(Self { send_socket, recv_socket })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, addr: IpAddr, port: u16, payload: &[u8]) -> Result<()> {
        self.send_socket
            .send_to(payload, (addr, port))
            .await
            .with_context(|| format!("Failed to send datagram to {}:{}", addr, port))?;
        Ok(())
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        match tokio::time::timeout(timeout, self.recv_socket.recv_from(&mut buffer)).await {
            Ok(Ok((size, from))) => Ok(Some((buffer[..size].to_vec(), from))),
            Ok(Err(e)) => Err(e).context("Failed to receive datagram"),
            Err(_) => Ok(None),
        }
    }

    async fn join_multicast(&self, group: Ipv4Addr, _port: u16) -> Result<()> {
        self.recv_socket
            .join_multicast_v4(group, Ipv4Addr::UNSPECIFIED)
            .with_context(|| format!("Failed to join multicast group {}", group))?;
        debug!("Joined multicast group {}", group);
        Ok(())
    }
}

/// Transport that goes nowhere
///
/// Backs the explicit placeholder mode: sends succeed silently, receives time
/// out empty. Never wired up implicitly.
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    async fn send_to(&self, addr: IpAddr, port: u16, payload: &[u8]) -> Result<()> {
        debug!(
            "NullTransport dropping {} byte datagram for {}:{}",
            payload.len(),
            addr,
            port
        );
        Ok(())
    }

    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        tokio::time::sleep(timeout).await;
        Ok(None)
    }

    async fn join_multicast(&self, _group: Ipv4Addr, _port: u16) -> Result<()> {
        Ok(())
    }
}
