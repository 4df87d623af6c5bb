//! Message framing.
//!
//! Every message on the wire is wrapped in a fixed prefix and suffix:
//!
//! ```text
//! +----------+---------------+-----------------+-----------------+----------+
//! |  PREFIX  |  type (i32)   |  length (i32)   |    payload      |  SUFFIX  |
//! | 4 bytes  |  big-endian   |  big-endian     | (length bytes)  | 4 bytes  |
//! +----------+---------------+-----------------+-----------------+----------+
//! ```
//!
//! The only exception is the hello frame a server sends right after accepting a
//! connection: `PREFIX | protocol version (1 byte) | SUFFIX`.

use bytes::BufMut;

/// Marker preceding every frame.
pub const PREFIX: [u8; 4] = [0xFF, 0xFE, 0xFD, 0xFC];

/// Marker terminating every frame.
pub const SUFFIX: [u8; 4] = [0xFC, 0xFD, 0xFE, 0xFF];

/// Size of the type + length header.
pub const HEADER_LEN: usize = 8;

/// Maximum payload size in bytes.
pub const MAX_FRAME_SIZE: usize = 10 * 1024;

/// Protocol version announced in the hello frame.
pub const PROTOCOL_VERSION: u8 = 0x0A;

/// Frame type tag. The set is fixed and shared by client and server; tags this
/// build does not know are preserved as [`MessageType::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// No-op message, also used as a keepalive.
    Ignore,
    /// Server → client: player name, capabilities.
    PlayerInfo,
    /// Client → server: client capabilities. Registers the connection.
    ClientInfo,
    /// Either direction: orderly disconnect / server shutdown.
    Bye,
    /// Server → client: playback state.
    State,
    /// Server → client: current item.
    Item,
    /// Server → client: playlist.
    Playlist,
    /// Server → client: queue.
    Queue,
    /// Client → server: control command.
    Control,
    /// Client → server request for an item; the reply uses the same type.
    ItemRequest,
    /// Client → server request for a list; the reply uses the same type.
    ListRequest,
    /// A tag not known to this build.
    Unknown(u32),
}

impl MessageType {
    /// Numeric wire tag.
    pub fn code(self) -> u32 {
        match self {
            MessageType::Ignore => 0,
            MessageType::PlayerInfo => 110,
            MessageType::ClientInfo => 120,
            MessageType::Bye => 190,
            MessageType::State => 210,
            MessageType::Item => 220,
            MessageType::Playlist => 230,
            MessageType::Queue => 240,
            MessageType::Control => 310,
            MessageType::ItemRequest => 410,
            MessageType::ListRequest => 420,
            MessageType::Unknown(code) => code,
        }
    }

    /// Map a wire tag to a message type.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => MessageType::Ignore,
            110 => MessageType::PlayerInfo,
            120 => MessageType::ClientInfo,
            190 => MessageType::Bye,
            210 => MessageType::State,
            220 => MessageType::Item,
            230 => MessageType::Playlist,
            240 => MessageType::Queue,
            310 => MessageType::Control,
            410 => MessageType::ItemRequest,
            420 => MessageType::ListRequest,
            other => MessageType::Unknown(other),
        }
    }
}

/// A complete decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

/// Errors raised while building or parsing frames. All of them are protocol
/// violations: the stream cannot be resynchronised afterwards.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    /// The payload size exceeds [`MAX_FRAME_SIZE`].
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared or actual payload size.
        size: u64,
        /// The configured maximum.
        max: usize,
    },

    /// The bytes where a prefix was expected are something else.
    #[error("bad frame prefix {0:02x?}")]
    BadPrefix(Vec<u8>),

    /// The bytes where a suffix was expected are something else.
    #[error("bad frame suffix {0:02x?}")]
    BadSuffix(Vec<u8>),
}

/// Wrap a payload into a complete frame.
pub fn build_frame(msg_type: MessageType, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len() as u64,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut out = Vec::with_capacity(PREFIX.len() + HEADER_LEN + payload.len() + SUFFIX.len());
    out.put_slice(&PREFIX);
    out.put_u32(msg_type.code());
    out.put_u32(payload.len() as u32);
    out.put_slice(payload);
    out.put_slice(&SUFFIX);
    Ok(out)
}

/// The fixed hello frame sent on every new connection before anything else.
pub fn hello_frame() -> Vec<u8> {
    let mut out = Vec::with_capacity(PREFIX.len() + 1 + SUFFIX.len());
    out.put_slice(&PREFIX);
    out.put_u8(PROTOCOL_VERSION);
    out.put_slice(&SUFFIX);
    out
}
