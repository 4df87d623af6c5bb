//! Message payload types.
//!
//! Every payload implements [`Serializable`]; the field order in `KINDS` is the
//! wire order and must not change without bumping
//! [`PROTOCOL_VERSION`](crate::frame::PROTOCOL_VERSION).

use std::path::PathBuf;

use crate::codec::{
    DecodeError, EncodeError, FieldKind, Fields, Serializable, Value, encode, flatten_pairs,
    unflatten_pairs,
};
use crate::frame::{FrameError, MessageType, build_frame};

/// Errors raised while turning a payload value into a ready-to-send frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] EncodeError),

    #[error("failed to frame payload: {0}")]
    Frame(#[from] FrameError),
}

/// Encode `value` and wrap it in a frame of type `msg_type`.
pub fn serialize_message<T: Serializable>(
    msg_type: MessageType,
    value: &T,
) -> Result<Vec<u8>, MessageError> {
    let payload = encode(value)?;
    Ok(build_frame(msg_type, &payload)?)
}

/// Frame an item, sending it without its thumbnail when the image pushes the
/// payload past [`MAX_FRAME_SIZE`](crate::frame::MAX_FRAME_SIZE).
///
/// An empty image reads as "no cover" on the client, so the id and metadata
/// still go out. Fails only when the item is too large even without it.
pub fn serialize_item(msg_type: MessageType, item: &Item) -> Result<Vec<u8>, MessageError> {
    match serialize_message(msg_type, item) {
        Err(MessageError::Frame(FrameError::PayloadTooLarge { .. })) if !item.image.is_empty() => {
            let without_image = Item {
                id: item.id.clone(),
                info: item.info.clone(),
                image: Vec::new(),
                art_path: item.art_path.clone(),
            };
            serialize_message(msg_type, &without_image)
        }
        result => result,
    }
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Player capability flag: the player can report and set a volume.
pub const FLAG_VOLUME: i32 = 1 << 0;
/// Player capability flag: the player exposes a queue.
pub const FLAG_QUEUE: i32 = 1 << 1;
/// Player capability flag: the player can rate items.
pub const FLAG_RATING: i32 = 1 << 2;
/// Player capability flag: the player supports seeking.
pub const FLAG_SEEK: i32 = 1 << 3;

/// Static information about the player, sent once on registration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerInfo {
    /// Display name.
    pub name: String,
    /// Capability bitmask (`FLAG_*`).
    pub flags: i32,
    /// Highest rating value, 0 if ratings are unsupported.
    pub max_rating: i32,
    /// MIME types the player can open.
    pub mime_types: Vec<String>,
}

impl Serializable for PlayerInfo {
    const KINDS: &'static [FieldKind] = &[
        FieldKind::Str,
        FieldKind::Int,
        FieldKind::Int,
        FieldKind::StrList,
    ];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Str(self.name.clone()),
            Value::Int(self.flags),
            Value::Int(self.max_rating),
            Value::StrList(self.mime_types.clone()),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        Ok(Self {
            name: f.str()?,
            flags: f.int()?,
            max_rating: f.int()?,
            mime_types: f.str_list()?,
        })
    }
}

/// Playback status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Playback {
    #[default]
    Stop,
    Pause,
    Play,
}

impl Playback {
    pub fn code(self) -> i32 {
        match self {
            Playback::Stop => 0,
            Playback::Pause => 1,
            Playback::Play => 2,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Playback::Stop),
            1 => Some(Playback::Pause),
            2 => Some(Playback::Play),
            _ => None,
        }
    }
}

/// Player state snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerState {
    pub playback: Playback,
    /// Volume in percent, 0–100.
    pub volume: i32,
    /// Position of the current item in the playlist (or queue), -1 if none.
    pub position: i32,
    pub repeat: bool,
    pub shuffle: bool,
    /// Whether the current item is played from the queue.
    pub queue: bool,
}

impl Serializable for PlayerState {
    const KINDS: &'static [FieldKind] = &[
        FieldKind::Int,
        FieldKind::Int,
        FieldKind::Int,
        FieldKind::Bool,
        FieldKind::Bool,
        FieldKind::Bool,
    ];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Int(self.playback.code()),
            Value::Int(self.volume),
            Value::Int(self.position),
            Value::Bool(self.repeat),
            Value::Bool(self.shuffle),
            Value::Bool(self.queue),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        let playback = Playback::from_code(f.int()?)
            .ok_or(DecodeError::Inconsistent("unknown playback code"))?;
        Ok(Self {
            playback,
            volume: f.int()?,
            position: f.int()?,
            repeat: f.bool()?,
            shuffle: f.bool()?,
            queue: f.bool()?,
        })
    }
}

/// A playable item ("plob").
///
/// `art_path` is local bookkeeping for adapters and never goes on the wire, so
/// two items that differ only in `art_path` compare equal.
#[derive(Debug, Clone, Default)]
pub struct Item {
    /// Player-specific identifier, empty when nothing is loaded.
    pub id: String,
    /// Metadata as ordered key/value pairs (artist, title, album, ...).
    pub info: Vec<(String, String)>,
    /// Scaled cover thumbnail, empty when absent.
    pub image: Vec<u8>,
    /// Where the adapter found the cover art.
    pub art_path: Option<PathBuf>,
}

impl Item {
    /// The "no information" item.
    pub fn none() -> Self {
        Self::default()
    }

    /// Look up a metadata value.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.info == other.info && self.image == other.image
    }
}

impl Eq for Item {}

impl Serializable for Item {
    const KINDS: &'static [FieldKind] = &[FieldKind::Str, FieldKind::StrList, FieldKind::Bytes];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Str(self.id.clone()),
            Value::StrList(flatten_pairs(&self.info)),
            Value::Bytes(self.image.clone()),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        Ok(Self {
            id: f.str()?,
            info: unflatten_pairs(f.str_list()?)?,
            image: f.bytes()?,
            art_path: None,
        })
    }
}

/// A flat list of items, used for the playlist and the queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SimplePlaylist {
    pub ids: Vec<String>,
    pub names: Vec<String>,
}

impl SimplePlaylist {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Serializable for SimplePlaylist {
    const KINDS: &'static [FieldKind] = &[FieldKind::StrList, FieldKind::StrList];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::StrList(self.ids.clone()),
            Value::StrList(self.names.clone()),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        let ids = f.str_list()?;
        let names = f.str_list()?;
        if ids.len() != names.len() {
            return Err(DecodeError::Inconsistent("playlist ids and names differ in length"));
        }
        Ok(Self { ids, names })
    }
}

/// Reply to a list request: nested lists plus the items of the requested list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemList {
    /// Identifier of the requested list.
    pub id: String,
    pub nested_ids: Vec<String>,
    pub nested_names: Vec<String>,
    pub ids: Vec<String>,
    pub names: Vec<String>,
}

impl ItemList {
    /// The "no information" reply for list `id`.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

impl Serializable for ItemList {
    const KINDS: &'static [FieldKind] = &[
        FieldKind::Str,
        FieldKind::StrList,
        FieldKind::StrList,
        FieldKind::StrList,
        FieldKind::StrList,
    ];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Str(self.id.clone()),
            Value::StrList(self.nested_ids.clone()),
            Value::StrList(self.nested_names.clone()),
            Value::StrList(self.ids.clone()),
            Value::StrList(self.names.clone()),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        let list = Self {
            id: f.str()?,
            nested_ids: f.str_list()?,
            nested_names: f.str_list()?,
            ids: f.str_list()?,
            names: f.str_list()?,
        };
        if list.nested_ids.len() != list.nested_names.len() || list.ids.len() != list.names.len()
        {
            return Err(DecodeError::Inconsistent("list ids and names differ in length"));
        }
        Ok(list)
    }
}

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Client capabilities, sent once to register.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    /// Preferred thumbnail width in pixels.
    pub image_width: i32,
    /// Preferred thumbnail height in pixels.
    pub image_height: i32,
    /// Free-form device description (name, model, ...).
    pub device: Vec<(String, String)>,
}

impl ClientInfo {
    /// The device name, if the client sent one.
    pub fn device_name(&self) -> Option<&str> {
        self.device
            .iter()
            .find(|(k, _)| k == "name")
            .map(|(_, v)| v.as_str())
    }
}

impl Serializable for ClientInfo {
    const KINDS: &'static [FieldKind] = &[FieldKind::Int, FieldKind::Int, FieldKind::StrList];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Int(self.image_width),
            Value::Int(self.image_height),
            Value::StrList(flatten_pairs(&self.device)),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        Ok(Self {
            image_width: f.int()?,
            image_height: f.int()?,
            device: unflatten_pairs(f.str_list()?)?,
        })
    }
}

/// Control opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    PlayPause,
    Next,
    Prev,
    /// `param_i`: relative seek in seconds.
    Seek,
    /// `param_i`: absolute volume 0–100.
    Volume,
    /// `param_i`: rating.
    Rate,
    Repeat,
    Shuffle,
    /// `param_i`: playlist position, `param_s`: item id.
    PlayItem,
    /// `param_i`: queue position, `param_s`: item id.
    QueueItem,
    /// `param_s`: comma separated tags for the current item.
    Tag,
    Fullscreen,
}

impl ControlOp {
    pub fn code(self) -> i32 {
        match self {
            ControlOp::PlayPause => 1,
            ControlOp::Next => 2,
            ControlOp::Prev => 3,
            ControlOp::Seek => 4,
            ControlOp::Volume => 5,
            ControlOp::Rate => 6,
            ControlOp::Repeat => 7,
            ControlOp::Shuffle => 8,
            ControlOp::PlayItem => 9,
            ControlOp::QueueItem => 10,
            ControlOp::Tag => 11,
            ControlOp::Fullscreen => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => ControlOp::PlayPause,
            2 => ControlOp::Next,
            3 => ControlOp::Prev,
            4 => ControlOp::Seek,
            5 => ControlOp::Volume,
            6 => ControlOp::Rate,
            7 => ControlOp::Repeat,
            8 => ControlOp::Shuffle,
            9 => ControlOp::PlayItem,
            10 => ControlOp::QueueItem,
            11 => ControlOp::Tag,
            12 => ControlOp::Fullscreen,
            _ => return None,
        })
    }
}

/// A control command exactly as it travels on the wire.
///
/// The opcode stays numeric here so an unknown opcode still decodes; see
/// [`Control::op`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Control {
    pub opcode: i32,
    pub param_i: i32,
    pub param_s: String,
}

impl Control {
    pub fn new(op: ControlOp, param_i: i32, param_s: impl Into<String>) -> Self {
        Self {
            opcode: op.code(),
            param_i,
            param_s: param_s.into(),
        }
    }

    /// The typed opcode, `None` if this build does not know it.
    pub fn op(&self) -> Option<ControlOp> {
        ControlOp::from_code(self.opcode)
    }
}

impl Serializable for Control {
    const KINDS: &'static [FieldKind] = &[FieldKind::Int, FieldKind::Int, FieldKind::Str];

    fn fields(&self) -> Vec<Value> {
        vec![
            Value::Int(self.opcode),
            Value::Int(self.param_i),
            Value::Str(self.param_s.clone()),
        ]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        let mut f = Fields::new(fields);
        Ok(Self {
            opcode: f.int()?,
            param_i: f.int()?,
            param_s: f.str()?,
        })
    }
}

/// Request for a single item, or for a list, by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    pub id: String,
}

impl Serializable for Request {
    const KINDS: &'static [FieldKind] = &[FieldKind::Str];

    fn fields(&self) -> Vec<Value> {
        vec![Value::Str(self.id.clone())]
    }

    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: Fields::new(fields).str()?,
        })
    }
}
