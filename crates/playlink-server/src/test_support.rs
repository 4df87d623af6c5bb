//! Shared fixtures for the crate's unit tests.

use std::sync::Mutex;

use bytes::Bytes;
use playlink_wire::{
    Control, Frame, FrameDecoder, Item, ItemList, PlayerInfo, PlayerState, SimplePlaylist,
};
use tokio::sync::{mpsc, oneshot};

use crate::adapter::{AdapterError, PlayerAdapter, Reply};

/// Scriptable in-memory player.
#[derive(Default)]
pub(crate) struct MockAdapter {
    pub state: Mutex<PlayerState>,
    pub item: Mutex<Item>,
    pub playlist: Mutex<SimplePlaylist>,
    pub controls: Mutex<Vec<Control>>,
    pub state_queries: Mutex<usize>,
    pub fail_controls: bool,
    /// When set, list requests are answered later through this slot.
    pub defer_lists: bool,
    pub pending_lists: Mutex<Vec<(String, oneshot::Sender<Result<ItemList, AdapterError>>)>>,
}

impl MockAdapter {
    pub fn set_volume(&self, volume: i32) {
        self.state.lock().unwrap().volume = volume;
    }

    pub fn controls(&self) -> Vec<Control> {
        self.controls.lock().unwrap().clone()
    }

    pub fn state_queries(&self) -> usize {
        *self.state_queries.lock().unwrap()
    }
}

impl PlayerAdapter for MockAdapter {
    fn player_info(&self) -> PlayerInfo {
        PlayerInfo {
            name: "Mock".into(),
            flags: playlink_wire::messages::FLAG_VOLUME,
            max_rating: 5,
            mime_types: vec!["audio/mpeg".into()],
        }
    }

    fn current_state(&self) -> Result<PlayerState, AdapterError> {
        *self.state_queries.lock().unwrap() += 1;
        Ok(self.state.lock().unwrap().clone())
    }

    fn current_item(&self) -> Result<Item, AdapterError> {
        Ok(self.item.lock().unwrap().clone())
    }

    fn playlist(&self) -> Result<SimplePlaylist, AdapterError> {
        Ok(self.playlist.lock().unwrap().clone())
    }

    fn queue(&self) -> Result<SimplePlaylist, AdapterError> {
        Err(AdapterError::Unsupported("queue".into()))
    }

    fn execute_control(&self, control: &Control) -> Result<(), AdapterError> {
        self.controls.lock().unwrap().push(control.clone());
        if self.fail_controls {
            return Err(AdapterError::Player("boom".into()));
        }
        Ok(())
    }

    fn answer_item_request(&self, id: &str) -> Reply<Item> {
        if id == "missing" {
            return Reply::Ready(Err(AdapterError::Player("no such item".into())));
        }
        Reply::ready(Item {
            id: id.to_string(),
            info: vec![("title".into(), format!("Title of {id}"))],
            ..Item::none()
        })
    }

    fn answer_list_request(&self, id: &str) -> Reply<ItemList> {
        if self.defer_lists {
            let (tx, reply) = Reply::deferred();
            self.pending_lists.lock().unwrap().push((id.to_string(), tx));
            return reply;
        }
        Reply::ready(ItemList {
            id: id.to_string(),
            ids: vec![format!("{id}/1")],
            names: vec!["One".into()],
            ..ItemList::default()
        })
    }
}

/// Decode every frame queued on a connection's outbound channel so far.
pub(crate) fn drain_frames(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    while let Ok(bytes) = rx.try_recv() {
        frames.extend(decoder.feed(&bytes).unwrap());
    }
    frames
}
