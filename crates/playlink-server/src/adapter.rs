//! The narrow interface through which the server talks to a concrete player.
//!
//! Adapters translate between the protocol and a player's native control
//! surface (D-Bus, plugin API, ...). State getters are pulled on demand when the
//! sync hub recomputes a category; adapters announce changes through
//! [`SyncHandle`](crate::sync::SyncHandle).

use playlink_wire::{Control, Item, ItemList, PlayerInfo, PlayerState, SimplePlaylist};
use tokio::sync::oneshot;

/// Errors reported by an adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The player is not running or not reachable.
    #[error("player unavailable: {0}")]
    Unavailable(String),

    /// The player cannot do what was asked.
    #[error("not supported by player: {0}")]
    Unsupported(String),

    /// The player reported a failure.
    #[error("player error: {0}")]
    Player(String),

    /// A deferred reply was abandoned without an answer.
    #[error("deferred reply dropped before completion")]
    ReplyDropped,
}

/// Answer to a request. Adapters either know the answer right away or hand out
/// a receiver that is completed later.
pub enum Reply<T> {
    Ready(Result<T, AdapterError>),
    Deferred(oneshot::Receiver<Result<T, AdapterError>>),
}

impl<T> Reply<T> {
    /// An immediate successful reply.
    pub fn ready(value: T) -> Self {
        Reply::Ready(Ok(value))
    }

    /// A reply completed later through the returned sender.
    pub fn deferred() -> (oneshot::Sender<Result<T, AdapterError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Reply::Deferred(rx))
    }

    /// Wait for the answer.
    pub async fn resolve(self) -> Result<T, AdapterError> {
        match self {
            Reply::Ready(result) => result,
            Reply::Deferred(rx) => rx.await.unwrap_or(Err(AdapterError::ReplyDropped)),
        }
    }
}

/// A media player as seen by the protocol core.
pub trait PlayerAdapter: Send + Sync + 'static {
    /// Static player description, sent to every client on registration.
    fn player_info(&self) -> PlayerInfo;

    fn current_state(&self) -> Result<PlayerState, AdapterError>;

    fn current_item(&self) -> Result<Item, AdapterError>;

    fn playlist(&self) -> Result<SimplePlaylist, AdapterError>;

    fn queue(&self) -> Result<SimplePlaylist, AdapterError>;

    /// Execute a control command. Fire-and-forget: errors are logged by the
    /// caller and never reported to the client.
    fn execute_control(&self, control: &Control) -> Result<(), AdapterError>;

    /// Look up a single item by id.
    fn answer_item_request(&self, id: &str) -> Reply<Item>;

    /// Look up a list (library folder, playlist, ...) by id.
    fn answer_list_request(&self, id: &str) -> Reply<ItemList>;
}
