//! Listening transports.
//!
//! A [`Transport`] owns one listening socket. [`run_listener`] accepts from it
//! until shutdown and hands every accepted stream to its own connection task;
//! the listener keeps nothing about the connection afterwards.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;

use crate::connection::{self, ConnectionContext, ConnectionSlots, IdGenerator};

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod tcp;

#[cfg(feature = "bluetooth")]
pub use bluetooth::BluetoothTransport;
pub use tcp::{SocketConfig, TcpTransport};

/// Pause after a transient accept failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// A freshly accepted stream.
pub struct Accepted<S> {
    pub stream: S,
    /// Peer address, for logs.
    pub peer: String,
}

/// Why an accept attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    /// Affects only the connection being accepted.
    #[error("accept failed: {0}")]
    Transient(#[source] io::Error),

    /// The process ran out of file descriptors.
    #[error("file descriptors exhausted: {0}")]
    Exhausted(#[source] io::Error),

    /// The listening socket itself is broken.
    #[error("listening socket failed: {0}")]
    Fatal(#[source] io::Error),
}

impl AcceptError {
    /// Sort an accept error by how much it takes down.
    pub fn classify(error: io::Error) -> Self {
        if is_fd_exhaustion(&error) {
            AcceptError::Exhausted(error)
        } else if is_broken_listener(&error) {
            AcceptError::Fatal(error)
        } else {
            AcceptError::Transient(error)
        }
    }

    /// The error reported when accepting before [`Transport::create_socket`].
    pub fn not_listening() -> Self {
        AcceptError::Fatal(io::Error::new(
            io::ErrorKind::NotConnected,
            "transport is not listening",
        ))
    }
}

#[cfg(unix)]
fn is_fd_exhaustion(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
}

#[cfg(not(unix))]
fn is_fd_exhaustion(_error: &io::Error) -> bool {
    false
}

fn is_broken_listener(error: &io::Error) -> bool {
    #[cfg(unix)]
    let os_fatal = matches!(
        error.raw_os_error(),
        Some(libc::EBADF | libc::ENOTSOCK | libc::EINVAL)
    );
    #[cfg(not(unix))]
    let os_fatal = false;

    os_fatal
        || matches!(
            error.kind(),
            io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected
        )
}

/// A listening socket on one transport.
pub trait Transport: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Short name for diagnostics.
    fn type_name(&self) -> &'static str;

    /// Bind and listen (or register with the system's stack).
    fn create_socket(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next incoming connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Accepted<Self::Stream>, AcceptError>> + Send;

    /// Close the listening socket. Idempotent.
    fn teardown(&mut self);
}

/// Everything a listener needs to start connections.
#[derive(Clone)]
pub struct ListenerContext {
    pub connection: ConnectionContext,
    pub slots: Arc<ConnectionSlots>,
    pub ids: Arc<IdGenerator>,
}

/// Accept connections until shutdown or until the listening socket breaks.
///
/// The transport must already be listening.
///
/// # Panics
///
/// Panics when the process runs out of file descriptors.
pub async fn run_listener<T: Transport>(
    mut transport: T,
    ctx: ListenerContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), AcceptError> {
    let name = transport.type_name();
    tracing::info!("{name} listener started");

    loop {
        let accepted = tokio::select! {
            result = transport.accept() => result,
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        match accepted {
            Ok(Accepted { stream, peer }) => {
                let Some(slot) = ctx.slots.try_acquire() else {
                    tracing::warn!("Connection limit reached, rejecting {name} peer {peer}");
                    continue;
                };
                let id = ctx.ids.next_id();
                tracing::info!("Accepted {name} connection {id:?} from {peer}");

                let connection_ctx = ctx.connection.clone();
                let task_shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _slot = slot;
                    connection::serve(stream, id, connection_ctx, task_shutdown).await;
                });
            }
            Err(e @ AcceptError::Transient(_)) => {
                tracing::warn!("{name}: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
            Err(e @ AcceptError::Exhausted(_)) => {
                tracing::error!("{name}: {e}");
                panic!("{name} listener: {e}; connections are leaking");
            }
            Err(e @ AcceptError::Fatal(_)) => {
                tracing::error!("{name} listener stopped: {e}");
                transport.teardown();
                return Err(e);
            }
        }
    }

    tracing::info!("{name} listener shutting down");
    transport.teardown();
    Ok(())
}
