//! Per-client connection: inbound frame assembly, outbound queue and lifecycle.
//!
//! Every accepted socket gets a reader (this module's [`serve`]) and a writer
//! task. The reader reads at most [`FrameDecoder::wanted`] bytes per receive and
//! hands complete frames to the dispatcher in receipt order. The writer drains a
//! FIFO of ready frames and sleeps while the queue is empty.
//!
//! A connection starts [`Registration::Unregistered`] and becomes
//! [`Registration::Registered`] on its first client-info frame. Teardown runs
//! at most once, whatever triggers it.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use playlink_wire::{ClientInfo, FrameDecoder, Progress, hello_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Notify, mpsc, oneshot, watch};

use crate::adapter::PlayerAdapter;
use crate::dispatch::{Flow, RequestQueue, dispatch};
use crate::sync::SyncHandle;

/// Bound on accept-side socket operations (the hello write).
pub const ACCEPT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a closing connection may spend flushing already queued frames.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound for a single receive.
const READ_CHUNK: usize = 4096;

/// Frames a connection may have waiting for its writer. A client that stops
/// reading is disconnected once this many pile up.
pub const OUTBOUND_QUEUE_LIMIT: usize = 256;

/// Key of a connection in the hub's client set, also used in every log line
/// about it. Never reused while the server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// Hands out [`ConnectionId`]s to every listener of one server, so ids stay
/// unique across TCP and Bluetooth.
#[derive(Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id for the next accepted connection. The first one is 1.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Caps the number of live connections across all transports.
pub struct ConnectionSlots {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionSlots {
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve a slot, or `None` if the server is full.
    pub fn try_acquire(self: &Arc<Self>) -> Option<SlotGuard> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()?;
        Some(SlotGuard(Arc::clone(self)))
    }

    /// Number of live connections.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

/// Releases its slot on drop.
pub struct SlotGuard(Arc<ConnectionSlots>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Cheap, cloneable sending side of a connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Bytes>,
    overflow: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    pub fn new(id: ConnectionId) -> (Self, mpsc::Receiver<Bytes>) {
        Self::with_limit(id, OUTBOUND_QUEUE_LIMIT)
    }

    /// Like [`ConnectionHandle::new`] with a custom queue limit.
    pub fn with_limit(id: ConnectionId, limit: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(limit);
        let handle = Self {
            id,
            tx,
            overflow: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Append a frame to the outbound queue. A no-op once the connection is
    /// gone. A full queue drops the frame and flags the connection for
    /// teardown.
    pub fn send(&self, frame: Bytes) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue of {:?} is full", self.id);
                self.overflow.notify_one();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Dropping frame for closed connection {:?}", self.id);
            }
        }
    }

    /// Resolves once a frame was dropped because the queue was full.
    pub async fn overflowed(&self) {
        self.overflow.notified().await;
    }

    /// Whether the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Registration state of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Connected, waiting for client info. Not a broadcast target.
    Unregistered,
    /// Client info received; member of the broadcast set.
    Registered(ClientInfo),
}

/// Shared collaborators every connection needs.
#[derive(Clone)]
pub struct ConnectionContext {
    pub adapter: Arc<dyn PlayerAdapter>,
    pub sync: SyncHandle,
}

/// Mutable per-connection session state.
pub(crate) struct Session {
    pub(crate) handle: ConnectionHandle,
    pub(crate) registration: Registration,
    pub(crate) requests: RequestQueue,
    pub(crate) adapter: Arc<dyn PlayerAdapter>,
    sync: SyncHandle,
    close_tx: Option<oneshot::Sender<()>>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(
        handle: ConnectionHandle,
        ctx: &ConnectionContext,
        close_tx: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            handle,
            registration: Registration::Unregistered,
            requests: RequestQueue::new(Arc::clone(&ctx.adapter)),
            adapter: Arc::clone(&ctx.adapter),
            sync: ctx.sync.clone(),
            close_tx,
            closed: false,
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub(crate) fn is_registered(&self) -> bool {
        matches!(self.registration, Registration::Registered(_))
    }

    /// Promote to registered on the first client info; later ones are ignored.
    pub(crate) fn register(&mut self, info: ClientInfo) {
        if self.is_registered() {
            tracing::warn!("Connection {:?} sent client info twice, ignoring", self.id());
            return;
        }
        tracing::info!(
            "Connection {:?} registered (device: {})",
            self.id(),
            info.device_name().unwrap_or("unknown")
        );
        self.sync.register(self.handle.clone(), info.clone());
        self.registration = Registration::Registered(info);
    }

    /// Tear the connection down. Returns `false` if it was already down.
    pub(crate) fn teardown(&mut self, reason: &str) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;

        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(());
        }
        if self.is_registered() {
            self.sync.unregister(self.id());
        }
        tracing::info!("Connection {:?} closed: {reason}", self.id());
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown("dropped");
    }
}

/// Drive one accepted connection until it closes.
pub async fn serve<S>(
    stream: S,
    id: ConnectionId,
    ctx: ConnectionContext,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    match tokio::time::timeout(ACCEPT_TIMEOUT, writer.write_all(&hello_frame())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tracing::warn!("Connection {id:?}: failed to send hello: {e}");
            return;
        }
        Err(_) => {
            tracing::warn!("Connection {id:?}: hello not accepted within {ACCEPT_TIMEOUT:?}");
            return;
        }
    }

    let (handle, rx) = ConnectionHandle::new(id);
    let (close_tx, close_rx) = oneshot::channel();
    let mut writer_task = tokio::spawn(async move {
        if let Err(e) = write_loop(writer, rx, close_rx).await {
            tracing::debug!("Connection {id:?} writer stopped: {e}");
        }
    });

    let mut session = Session::new(handle, &ctx, Some(close_tx));
    let reason = read_loop(&mut reader, &mut session, &mut shutdown).await;
    session.teardown(reason);
    drop(session);

    // A peer that stopped reading can stall the writer inside a write.
    if tokio::time::timeout(CLOSE_TIMEOUT * 2, &mut writer_task)
        .await
        .is_err()
    {
        tracing::debug!("Connection {id:?} writer did not finish, aborting it");
        writer_task.abort();
    }
}

/// Receive and dispatch frames until the connection must close. Returns the
/// reason.
pub(crate) async fn read_loop<R>(
    reader: &mut R,
    session: &mut Session,
    shutdown: &mut watch::Receiver<bool>,
) -> &'static str
where
    R: AsyncRead + Unpin,
{
    if *shutdown.borrow() {
        return "server shutdown";
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let handle = session.handle.clone();

    loop {
        let want = decoder.wanted().min(buf.len());
        tokio::select! {
            result = reader.read(&mut buf[..want]) => {
                let n = match result {
                    Ok(0) => return "peer hung up",
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!("Connection {:?} read error: {e}", session.id());
                        return "read error";
                    }
                };
                match decoder.push(&buf[..n]) {
                    Ok(Progress { frame: Some(frame), .. }) => {
                        tracing::trace!(
                            "Connection {:?} received {:?} ({} bytes)",
                            session.id(),
                            frame.msg_type,
                            frame.payload.len()
                        );
                        if dispatch(session, frame) == Flow::Close {
                            return "client said bye";
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Connection {:?} protocol violation: {e}", session.id());
                        return "protocol violation";
                    }
                }
            }
            Some(frame) = session.requests.next_reply(), if !session.requests.is_idle() => {
                session.handle.send(frame);
            }
            () = handle.overflowed() => {
                tracing::warn!("Connection {:?} is not reading, dropping it", session.id());
                return "outbound queue overflow";
            }
            result = shutdown.changed() => {
                if result.is_err() || *shutdown.borrow() {
                    return "server shutdown";
                }
            }
        }
    }
}

/// Drain the outbound queue into the socket. On close, frames that are already
/// queued get a bounded chance to go out.
pub(crate) async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Bytes>,
    mut close_rx: oneshot::Receiver<()>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => writer.write_all(&frame).await?,
                None => break,
            },
            _ = &mut close_rx => {
                let drain = async {
                    while let Ok(frame) = rx.try_recv() {
                        writer.write_all(&frame).await?;
                    }
                    Ok::<_, io::Error>(())
                };
                if let Ok(result) = tokio::time::timeout(CLOSE_TIMEOUT, drain).await {
                    result?;
                }
                break;
            }
        }
    }
    writer.shutdown().await
}


#[cfg(test)]
#[path = "connection_tests.rs"]
mod scenario_tests;
