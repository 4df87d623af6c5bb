//! Playlink wire protocol: typed payload codec, message framing and the
//! incremental frame decoder.

pub mod codec;
pub mod decoder;
pub mod frame;
pub mod messages;

pub use codec::{DecodeError, EncodeError, FieldKind, Serializable, Value, decode, encode, value_eq};
pub use decoder::{DecodeState, FrameDecoder, Progress};
pub use frame::{
    Frame, FrameError, HEADER_LEN, MAX_FRAME_SIZE, MessageType, PREFIX, PROTOCOL_VERSION, SUFFIX,
    build_frame, hello_frame,
};
pub use messages::{
    ClientInfo, Control, ControlOp, Item, ItemList, MessageError, Playback, PlayerInfo,
    PlayerState, Request, SimplePlaylist, serialize_item, serialize_message,
};
