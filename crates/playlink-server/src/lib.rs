//! Protocol engine: connections, transports, the sync hub and request dispatch.
//!
//! A [`Server`] owns the listeners and a [`SyncHub`]. Every accepted socket
//! becomes a connection task that assembles frames, dispatches them to the
//! [`PlayerAdapter`] and queues outbound frames for its writer. Player changes
//! reach clients through [`SyncHandle`].

pub mod adapter;
pub mod connection;
pub mod dispatch;
pub mod server;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use adapter::{AdapterError, PlayerAdapter, Reply};
pub use connection::{ConnectionHandle, ConnectionId, IdGenerator, Registration};
pub use dispatch::{ClientMessage, Flow};
pub use server::{
    BluetoothSettings, DEFAULT_MAX_CONNECTIONS, Server, ServerConfig, ServerError, ServerHandle,
    TcpSettings,
};
pub use sync::{Category, SyncEvents, SyncHandle, SyncHub};
pub use transport::{AcceptError, SocketConfig, TcpTransport, Transport};
