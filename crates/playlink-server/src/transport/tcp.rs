//! TCP transport (the "WiFi" listener).
//!
//! Remote controls on the local network connect to [`DEFAULT_PORT`]. The
//! listener binds `[::]` so phones reach it over IPv4 and IPv6 alike.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

use super::{AcceptError, Accepted, Transport};

/// Well-known port clients look for.
pub const DEFAULT_PORT: u16 = 34271;

const LISTEN_BACKLOG: i32 = 128;

/// Options for the TCP listener and the client sockets it accepts.
///
/// Pushes are small and latency matters more than throughput, so Nagle is off
/// by default. Keepalive notices a phone that walked out of WiFi range without
/// closing its socket; the hub stops pushing to it once the read side errors.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub tcp_nodelay: bool,
    pub keepalive_enabled: bool,
    /// Silence before the first probe.
    pub keepalive_idle: Duration,
    pub keepalive_interval: Duration,
    /// Ignored on macOS.
    pub keepalive_retries: u32,
    /// Lets a restarted server rebind the port at once. Off on Windows, where
    /// it would let a second server steal the port.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Tune a freshly accepted client socket.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Open the listening socket for the TCP transport.
///
/// An IPv6 address is bound with `IPV6_V6ONLY` cleared, so one socket serves
/// both address families.
pub fn create_listener(addr: SocketAddr, config: &SocketConfig) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(config.reuse_addr)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}

/// `[::]:port`, reachable from every interface and both IP versions.
pub fn default_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
}

/// `0.0.0.0:port`, used when the host has IPv6 disabled.
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

/// Listens on a fixed TCP port.
pub struct TcpTransport {
    bind_addr: SocketAddr,
    socket: SocketConfig,
    listener: Option<TcpListener>,
}

impl TcpTransport {
    pub fn new(bind_addr: SocketAddr, socket: SocketConfig) -> Self {
        Self {
            bind_addr,
            socket,
            listener: None,
        }
    }

    /// Address actually bound, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }
}

impl Transport for TcpTransport {
    type Stream = TcpStream;

    fn type_name(&self) -> &'static str {
        "TCP"
    }

    async fn create_socket(&mut self) -> io::Result<()> {
        let listener = match create_listener(self.bind_addr, &self.socket) {
            Ok(listener) => listener,
            Err(e) if self.bind_addr.is_ipv6() && self.bind_addr.ip().is_unspecified() => {
                let fallback = ipv4_bind_address(self.bind_addr.port());
                tracing::warn!("Dual-stack bind failed ({e}), falling back to {fallback}");
                create_listener(fallback, &self.socket)?
            }
            Err(e) => return Err(e),
        };
        tracing::info!("Listening on tcp://{}", listener.local_addr()?);
        self.listener = Some(listener);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Accepted<TcpStream>, AcceptError> {
        let listener = self.listener.as_ref().ok_or_else(AcceptError::not_listening)?;
        let (stream, peer) = listener.accept().await.map_err(AcceptError::classify)?;
        if let Err(e) = configure_stream(&stream, &self.socket) {
            tracing::warn!("Failed to configure socket for {peer}: {e}");
        }
        Ok(Accepted {
            stream,
            peer: peer.to_string(),
        })
    }

    fn teardown(&mut self) {
        if self.listener.take().is_some() {
            tracing::debug!("Closed TCP listener on {}", self.bind_addr);
        }
    }
}
