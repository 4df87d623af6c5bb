//! Incremental frame decoder.
//!
//! The decoder never does I/O. A reader asks [`FrameDecoder::wanted`] how many
//! bytes it may read, reads at most that many, and hands them to
//! [`FrameDecoder::push`]. The decoder walks through
//! `AwaitPrefix → AwaitHeader → AwaitPayload → AwaitSuffix` and emits a
//! [`Frame`] when the suffix completes, then starts over.
//!
//! The header fully determines the payload size, and an oversized length is
//! rejected before a single payload byte is requested.

use crate::frame::{Frame, FrameError, HEADER_LEN, MAX_FRAME_SIZE, MessageType, PREFIX, SUFFIX};

/// Current position inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    AwaitPrefix,
    AwaitHeader,
    AwaitPayload,
    AwaitSuffix,
}

/// Result of a single [`FrameDecoder::push`].
#[derive(Debug, PartialEq, Eq)]
pub struct Progress {
    /// Bytes taken from the input slice.
    pub consumed: usize,
    /// A frame completed by this push, if any.
    pub frame: Option<Frame>,
}

/// Per-connection inbound assembly state.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    remaining: usize,
    buf: Vec<u8>,
    msg_type: MessageType,
    payload: Vec<u8>,
}

impl FrameDecoder {
    /// A decoder waiting for the first prefix byte.
    pub fn new() -> Self {
        Self {
            state: DecodeState::AwaitPrefix,
            remaining: PREFIX.len(),
            buf: Vec::with_capacity(HEADER_LEN),
            msg_type: MessageType::Ignore,
            payload: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Maximum number of bytes the next receive should read.
    ///
    /// Always at least 1.
    pub fn wanted(&self) -> usize {
        self.remaining
    }

    /// Feed at most [`Self::wanted`] bytes.
    ///
    /// Extra bytes beyond the current stage are left unconsumed. After an
    /// error the decoder is in an undefined position and must be dropped.
    pub fn push(&mut self, data: &[u8]) -> Result<Progress, FrameError> {
        let n = data.len().min(self.remaining);
        self.buf.extend_from_slice(&data[..n]);
        self.remaining -= n;

        let frame = if self.remaining == 0 {
            self.advance()?
        } else {
            None
        };
        Ok(Progress { consumed: n, frame })
    }

    /// Feed an arbitrary chunk, returning every frame it completes.
    pub fn feed(&mut self, mut data: &[u8]) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        while !data.is_empty() {
            let progress = self.push(data)?;
            data = &data[progress.consumed..];
            frames.extend(progress.frame);
        }
        Ok(frames)
    }

    fn advance(&mut self) -> Result<Option<Frame>, FrameError> {
        match self.state {
            DecodeState::AwaitPrefix => {
                if self.buf != PREFIX {
                    return Err(FrameError::BadPrefix(std::mem::take(&mut self.buf)));
                }
                self.enter(DecodeState::AwaitHeader, HEADER_LEN);
            }
            DecodeState::AwaitHeader => {
                let code = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
                let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
                if len as usize > MAX_FRAME_SIZE {
                    return Err(FrameError::PayloadTooLarge {
                        size: u64::from(len),
                        max: MAX_FRAME_SIZE,
                    });
                }
                self.msg_type = MessageType::from_code(code);
                if len == 0 {
                    self.payload = Vec::new();
                    self.enter(DecodeState::AwaitSuffix, SUFFIX.len());
                } else {
                    self.enter(DecodeState::AwaitPayload, len as usize);
                    self.buf.reserve(len as usize);
                }
            }
            DecodeState::AwaitPayload => {
                self.payload = std::mem::take(&mut self.buf);
                self.enter(DecodeState::AwaitSuffix, SUFFIX.len());
            }
            DecodeState::AwaitSuffix => {
                if self.buf != SUFFIX {
                    return Err(FrameError::BadSuffix(std::mem::take(&mut self.buf)));
                }
                let frame = Frame {
                    msg_type: self.msg_type,
                    payload: std::mem::take(&mut self.payload),
                };
                self.enter(DecodeState::AwaitPrefix, PREFIX.len());
                return Ok(Some(frame));
            }
        }
        Ok(None)
    }

    fn enter(&mut self, state: DecodeState, remaining: usize) {
        self.state = state;
        self.remaining = remaining;
        self.buf.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::build_frame;

    fn feed_byte_by_byte(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        for b in bytes {
            let progress = decoder.push(std::slice::from_ref(b)).unwrap();
            assert_eq!(progress.consumed, 1);
            frames.extend(progress.frame);
        }
        frames
    }

    #[test]
    fn test_byte_by_byte_yields_exactly_one_frame() {
        for len in [0usize, 1, 17, 1000, MAX_FRAME_SIZE] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let bytes = build_frame(MessageType::Playlist, &payload).unwrap();

            let mut decoder = FrameDecoder::new();
            let frames = feed_byte_by_byte(&mut decoder, &bytes);
            assert_eq!(
                frames,
                vec![Frame {
                    msg_type: MessageType::Playlist,
                    payload
                }]
            );
            assert_eq!(decoder.state(), DecodeState::AwaitPrefix);
        }
    }

    #[test]
    fn test_empty_ignore_frame_roundtrips() {
        let bytes = build_frame(MessageType::Ignore, &[]).unwrap();
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].msg_type, MessageType::Ignore);
        assert!(frames[0].payload.is_empty());
    }

    #[test]
    fn test_wanted_never_exceeds_stage() {
        let bytes = build_frame(MessageType::State, b"0123456789").unwrap();
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.wanted(), 4);

        let progress = decoder.push(&bytes).unwrap();
        assert_eq!(progress.consumed, 4);
        assert_eq!(decoder.state(), DecodeState::AwaitHeader);
        assert_eq!(decoder.wanted(), HEADER_LEN);

        decoder.push(&bytes[4..12]).unwrap();
        assert_eq!(decoder.state(), DecodeState::AwaitPayload);
        assert_eq!(decoder.wanted(), 10);
    }

    #[test]
    fn test_back_to_back_frames_dont_merge() {
        let mut bytes = build_frame(MessageType::State, b"aaa").unwrap();
        bytes.extend(build_frame(MessageType::Item, b"bbb").unwrap());

        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, b"aaa");
        assert_eq!(frames[1].msg_type, MessageType::Item);
        assert_eq!(frames[1].payload, b"bbb");
    }

    #[test]
    fn test_oversized_header_rejected_before_payload() {
        let mut bytes = PREFIX.to_vec();
        bytes.extend(210u32.to_be_bytes());
        bytes.extend(((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..4]).unwrap();
        let result = decoder.push(&bytes[4..]);
        assert_eq!(
            result,
            Err(FrameError::PayloadTooLarge {
                size: MAX_FRAME_SIZE as u64 + 1,
                max: MAX_FRAME_SIZE
            })
        );
    }

    #[test]
    fn test_negative_length_is_oversized() {
        let mut bytes = PREFIX.to_vec();
        bytes.extend(210u32.to_be_bytes());
        bytes.extend((-1i32).to_be_bytes());
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.feed(&bytes),
            Err(FrameError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_garbage_prefix_rejected() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(
            decoder.feed(b"GET / HTTP/1.1"),
            Err(FrameError::BadPrefix(b"GET ".to_vec()))
        );
    }

    #[test]
    fn test_trailing_garbage_instead_of_suffix_rejected() {
        let mut bytes = build_frame(MessageType::State, b"xyz").unwrap();
        let n = bytes.len();
        bytes[n - 1] = 0x00;
        let mut decoder = FrameDecoder::new();
        assert!(matches!(
            decoder.feed(&bytes),
            Err(FrameError::BadSuffix(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let bytes = build_frame(MessageType::Unknown(777), b"?").unwrap();
        let frames = FrameDecoder::new().feed(&bytes).unwrap();
        assert_eq!(frames[0].msg_type, MessageType::Unknown(777));
    }
}
