//! In-memory player used when no real player is attached.
//!
//! Holds a fixed playlist and reacts to every control a client can send, so
//! the server can be exercised end to end with any client.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use playlink_server::{AdapterError, PlayerAdapter, Reply, SyncHandle};
use playlink_wire::messages::{FLAG_QUEUE, FLAG_SEEK, FLAG_VOLUME};
use playlink_wire::{
    Control, ControlOp, Item, ItemList, Playback, PlayerInfo, PlayerState, SimplePlaylist,
};

/// Delay before a library listing is answered.
const LISTING_DELAY: Duration = Duration::from_millis(20);

/// Root of the browsable library.
pub const LIBRARY_ROOT: &str = "library";

struct Track {
    id: &'static str,
    title: &'static str,
    artist: &'static str,
    album: &'static str,
}

const TRACKS: &[Track] = &[
    Track {
        id: "track/1",
        title: "Morning Fog",
        artist: "The Harbour Lights",
        album: "Low Tide",
    },
    Track {
        id: "track/2",
        title: "Signal Flare",
        artist: "The Harbour Lights",
        album: "Low Tide",
    },
    Track {
        id: "track/3",
        title: "Paper Satellites",
        artist: "Mira Kessel",
        album: "Orbit",
    },
    Track {
        id: "track/4",
        title: "Night Ferry",
        artist: "Mira Kessel",
        album: "Orbit",
    },
    Track {
        id: "track/5",
        title: "Last Train Home",
        artist: "Juniper Row",
        album: "Platforms",
    },
];

#[derive(Debug)]
struct DemoState {
    playback: Playback,
    volume: i32,
    current: usize,
    repeat: bool,
    shuffle: bool,
    from_queue: bool,
    queue: Vec<usize>,
}

/// A player that only exists in memory.
pub struct DemoPlayer {
    name: String,
    state: Mutex<DemoState>,
    sync: SyncHandle,
}

impl DemoPlayer {
    pub fn new(name: impl Into<String>, sync: SyncHandle) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(DemoState {
                playback: Playback::Stop,
                volume: 50,
                current: 0,
                repeat: false,
                shuffle: false,
                from_queue: false,
                queue: Vec::new(),
            }),
            sync,
        }
    }

    fn state(&self) -> MutexGuard<'_, DemoState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn skip(&self, forward: bool) {
        let mut state = self.state();
        let queue_changed = forward && !state.queue.is_empty();
        if queue_changed {
            state.current = state.queue.remove(0);
            state.from_queue = true;
        } else {
            let len = TRACKS.len();
            state.current = if forward {
                (state.current + 1) % len
            } else {
                (state.current + len - 1) % len
            };
            state.from_queue = false;
        }
        drop(state);

        self.sync.notify_state_changed();
        self.sync.notify_item_changed();
        if queue_changed {
            self.sync.notify_queue_changed();
        }
    }
}

fn track_index(id: &str) -> Option<usize> {
    TRACKS.iter().position(|t| t.id == id)
}

fn track_item(track: &Track) -> Item {
    Item {
        id: track.id.to_string(),
        info: vec![
            ("title".to_string(), track.title.to_string()),
            ("artist".to_string(), track.artist.to_string()),
            ("album".to_string(), track.album.to_string()),
        ],
        ..Item::none()
    }
}

fn playlist_of(indices: impl Iterator<Item = usize>) -> SimplePlaylist {
    let (ids, names) = indices
        .filter_map(|i| TRACKS.get(i))
        .map(|t| (t.id.to_string(), t.title.to_string()))
        .unzip();
    SimplePlaylist { ids, names }
}

/// Library listing: the root lists artists, an artist lists its tracks.
fn listing(id: &str) -> Option<ItemList> {
    if id == LIBRARY_ROOT {
        let mut artists: Vec<&str> = TRACKS.iter().map(|t| t.artist).collect();
        artists.dedup();
        return Some(ItemList {
            id: id.to_string(),
            nested_ids: artists.iter().map(|a| format!("artist/{a}")).collect(),
            nested_names: artists.iter().map(|a| a.to_string()).collect(),
            ids: Vec::new(),
            names: Vec::new(),
        });
    }

    let artist = id.strip_prefix("artist/")?;
    let tracks: Vec<&Track> = TRACKS.iter().filter(|t| t.artist == artist).collect();
    if tracks.is_empty() {
        return None;
    }
    Some(ItemList {
        id: id.to_string(),
        nested_ids: Vec::new(),
        nested_names: Vec::new(),
        ids: tracks.iter().map(|t| t.id.to_string()).collect(),
        names: tracks.iter().map(|t| t.title.to_string()).collect(),
    })
}

impl PlayerAdapter for DemoPlayer {
    fn player_info(&self) -> PlayerInfo {
        PlayerInfo {
            name: self.name.clone(),
            flags: FLAG_VOLUME | FLAG_QUEUE | FLAG_SEEK,
            max_rating: 0,
            mime_types: vec!["audio/mpeg".to_string(), "audio/ogg".to_string()],
        }
    }

    fn current_state(&self) -> Result<PlayerState, AdapterError> {
        let state = self.state();
        Ok(PlayerState {
            playback: state.playback,
            volume: state.volume,
            position: state.current as i32,
            repeat: state.repeat,
            shuffle: state.shuffle,
            queue: state.from_queue,
        })
    }

    fn current_item(&self) -> Result<Item, AdapterError> {
        let current = self.state().current;
        TRACKS
            .get(current)
            .map(track_item)
            .ok_or_else(|| AdapterError::Player(format!("no track at {current}")))
    }

    fn playlist(&self) -> Result<SimplePlaylist, AdapterError> {
        Ok(playlist_of(0..TRACKS.len()))
    }

    fn queue(&self) -> Result<SimplePlaylist, AdapterError> {
        let queue = self.state().queue.clone();
        Ok(playlist_of(queue.into_iter()))
    }

    fn execute_control(&self, control: &Control) -> Result<(), AdapterError> {
        let op = control
            .op()
            .ok_or_else(|| AdapterError::Unsupported(format!("opcode {}", control.opcode)))?;

        match op {
            ControlOp::PlayPause => {
                let mut state = self.state();
                state.playback = match state.playback {
                    Playback::Play => Playback::Pause,
                    Playback::Pause | Playback::Stop => Playback::Play,
                };
                tracing::info!("Demo player: {:?}", state.playback);
                drop(state);
                self.sync.notify_state_changed();
            }
            ControlOp::Next => self.skip(true),
            ControlOp::Prev => self.skip(false),
            ControlOp::Seek => {
                tracing::debug!("Demo player: seek by {}s", control.param_i);
            }
            ControlOp::Volume => {
                self.state().volume = control.param_i.clamp(0, 100);
                self.sync.notify_state_changed();
            }
            ControlOp::Repeat => {
                self.state().repeat = control.param_i != 0;
                self.sync.notify_state_changed();
            }
            ControlOp::Shuffle => {
                self.state().shuffle = control.param_i != 0;
                self.sync.notify_state_changed();
            }
            ControlOp::PlayItem => {
                let index = track_index(&control.param_s)
                    .ok_or_else(|| AdapterError::Player(format!("unknown item {}", control.param_s)))?;
                let mut state = self.state();
                state.current = index;
                state.playback = Playback::Play;
                state.from_queue = false;
                drop(state);
                self.sync.notify_state_changed();
                self.sync.notify_item_changed();
            }
            ControlOp::QueueItem => {
                let index = track_index(&control.param_s)
                    .ok_or_else(|| AdapterError::Player(format!("unknown item {}", control.param_s)))?;
                self.state().queue.push(index);
                self.sync.notify_queue_changed();
            }
            ControlOp::Rate | ControlOp::Tag | ControlOp::Fullscreen => {
                return Err(AdapterError::Unsupported(format!("{op:?}")));
            }
        }
        Ok(())
    }

    fn answer_item_request(&self, id: &str) -> Reply<Item> {
        match track_index(id) {
            Some(index) => Reply::ready(track_item(&TRACKS[index])),
            None => Reply::Ready(Err(AdapterError::Player(format!("unknown item {id}")))),
        }
    }

    fn answer_list_request(&self, id: &str) -> Reply<ItemList> {
        // Listings are answered from a background task, the way a real
        // library scan would be.
        let (tx, reply) = Reply::deferred();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(LISTING_DELAY).await;
            let result =
                listing(&id).ok_or_else(|| AdapterError::Player(format!("unknown list {id}")));
            let _ = tx.send(result);
        });
        reply
    }
}
