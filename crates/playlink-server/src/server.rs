//! Server facade: wires transports, the sync hub and connections together.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::adapter::PlayerAdapter;
use crate::connection::{CLOSE_TIMEOUT, ConnectionContext, ConnectionSlots, IdGenerator};
use crate::sync::{SyncEvents, SyncHandle, SyncHub};
use crate::transport::{self, AcceptError, ListenerContext, SocketConfig, TcpTransport, Transport};

/// Default cap on simultaneous connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// TCP listener settings.
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub bind_addr: SocketAddr,
    pub socket: SocketConfig,
}

/// Bluetooth listener settings. Only honoured with the `bluetooth` feature.
#[derive(Debug, Clone)]
pub struct BluetoothSettings {
    pub service_uuid: String,
    pub service_name: String,
}

/// Which transports to run and how many clients to take.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tcp: Option<TcpSettings>,
    pub bluetooth: Option<BluetoothSettings>,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp: Some(TcpSettings {
                bind_addr: transport::tcp::default_bind_address(transport::tcp::DEFAULT_PORT),
                socket: SocketConfig::default(),
            }),
            bluetooth: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Errors raised while starting the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("no transport is enabled")]
    NoTransport,

    #[error("failed to start {transport} listener: {source}")]
    Listener {
        transport: &'static str,
        #[source]
        source: io::Error,
    },
}

type ListenerTask = JoinHandle<Result<(), AcceptError>>;

/// A configured, not yet running server.
pub struct Server {
    config: ServerConfig,
    adapter: Arc<dyn PlayerAdapter>,
    sync: SyncHandle,
    events: SyncEvents,
}

impl Server {
    /// `sync`/`events` come from [`SyncHandle::channel`]; the adapter usually
    /// holds a clone of `sync` to report changes.
    pub fn new(
        config: ServerConfig,
        adapter: Arc<dyn PlayerAdapter>,
        sync: SyncHandle,
        events: SyncEvents,
    ) -> Self {
        Self {
            config,
            adapter,
            sync,
            events,
        }
    }

    /// Open every enabled transport and start serving.
    ///
    /// A transport that fails to open is logged and skipped as long as another
    /// one comes up.
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut first_error = None;
        let mut tcp = None;

        if let Some(settings) = &self.config.tcp {
            let mut transport = TcpTransport::new(settings.bind_addr, settings.socket.clone());
            match transport.create_socket().await {
                Ok(()) => tcp = Some(transport),
                Err(source) => {
                    tracing::error!("TCP listener failed to start: {source}");
                    first_error = Some(ServerError::Listener {
                        transport: "TCP",
                        source,
                    });
                }
            }
        }

        #[cfg(feature = "bluetooth")]
        let bluetooth = match &self.config.bluetooth {
            Some(settings) => match open_bluetooth(settings).await {
                Ok(transport) => Some(transport),
                Err(source) => {
                    tracing::error!("Bluetooth listener failed to start: {source}");
                    if first_error.is_none() {
                        first_error = Some(ServerError::Listener {
                            transport: "Bluetooth",
                            source,
                        });
                    }
                    None
                }
            },
            None => None,
        };
        #[cfg(not(feature = "bluetooth"))]
        {
            if self.config.bluetooth.is_some() {
                tracing::warn!("Bluetooth requested but this build has no Bluetooth support");
            }
        }

        #[cfg(feature = "bluetooth")]
        let any_open = tcp.is_some() || bluetooth.is_some();
        #[cfg(not(feature = "bluetooth"))]
        let any_open = tcp.is_some();
        if !any_open {
            return Err(first_error.unwrap_or(ServerError::NoTransport));
        }

        let slots = Arc::new(ConnectionSlots::new(self.config.max_connections));
        let ctx = ListenerContext {
            connection: ConnectionContext {
                adapter: Arc::clone(&self.adapter),
                sync: self.sync.clone(),
            },
            slots: Arc::clone(&slots),
            ids: Arc::new(IdGenerator::new()),
        };

        let hub = tokio::spawn(SyncHub::new(self.adapter, self.events).run());

        let mut listeners: Vec<ListenerTask> = Vec::new();
        let tcp_addr = tcp.as_ref().and_then(TcpTransport::local_addr);
        if let Some(transport) = tcp {
            listeners.push(tokio::spawn(transport::run_listener(
                transport,
                ctx.clone(),
                shutdown_rx.clone(),
            )));
        }
        #[cfg(feature = "bluetooth")]
        {
            if let Some(transport) = bluetooth {
                listeners.push(tokio::spawn(transport::run_listener(
                    transport,
                    ctx.clone(),
                    shutdown_rx.clone(),
                )));
            }
        }

        Ok(ServerHandle {
            shutdown_tx,
            sync: self.sync,
            slots,
            hub,
            listeners,
            tcp_addr,
        })
    }
}

#[cfg(feature = "bluetooth")]
async fn open_bluetooth(
    settings: &BluetoothSettings,
) -> io::Result<transport::BluetoothTransport> {
    let mut transport =
        transport::BluetoothTransport::new(&settings.service_uuid, settings.service_name.clone())?;
    transport.create_socket().await?;
    Ok(transport)
}

/// Control over a running server.
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    sync: SyncHandle,
    slots: Arc<ConnectionSlots>,
    hub: JoinHandle<()>,
    listeners: Vec<ListenerTask>,
    tcp_addr: Option<SocketAddr>,
}

impl ServerHandle {
    /// Bound TCP address, if the TCP transport is running.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// Handle for reporting player changes.
    pub fn sync(&self) -> &SyncHandle {
        &self.sync
    }

    /// Number of registered clients.
    pub async fn client_count(&self) -> usize {
        self.sync.client_count().await
    }

    /// Number of open connections, registered or not.
    pub fn active_connections(&self) -> usize {
        self.slots.active()
    }

    /// Resolve once every listener has stopped.
    ///
    /// A listener that panicked (file descriptor exhaustion) re-raises its
    /// panic here. Cancel safe.
    pub async fn stopped(&mut self) {
        while let Some(listener) = self.listeners.last_mut() {
            let result = listener.await;
            self.listeners.pop();
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Listener ended: {e}"),
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => tracing::warn!("Listener task failed: {e}"),
            }
        }
    }

    /// Say goodbye to every client, stop accepting and wait for connections
    /// to flush.
    pub async fn shutdown(mut self) {
        tracing::info!("Server shutting down");
        self.sync.shutdown().await;
        let _ = self.shutdown_tx.send(true);
        self.stopped().await;
        if let Err(e) = self.hub.await {
            tracing::warn!("Sync hub task failed: {e}");
        }

        let deadline = tokio::time::Instant::now() + CLOSE_TIMEOUT * 2;
        while self.slots.active() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if self.slots.active() > 0 {
            tracing::warn!("{} connection(s) still open at shutdown", self.slots.active());
        }
    }
}
