//! Typed binary codec shared by every message payload.
//!
//! A payload is the concatenation of its fields in declaration order. Each field
//! is written as a one-byte kind tag followed by its value:
//!
//! ```text
//! Int      | 0x01 | i32 big-endian                         |
//! Bool     | 0x02 | 0x00 or 0x01                           |
//! Str      | 0x03 | i32 length | UTF-8 bytes               |
//! StrList  | 0x04 | i32 count  | count x (i32 len | bytes) |
//! Bytes    | 0x05 | i32 length | raw bytes                 |
//! ```
//!
//! Encoding and decoding are driven only by [`Serializable::KINDS`]; the codec
//! never special-cases a concrete type. Decoding fails closed: any truncation,
//! bad length, tag mismatch or trailing byte rejects the whole payload.

use bytes::{Buf, BufMut};

/// Maximum number of entries accepted in a string list.
pub const MAX_LIST_LEN: usize = 1024;

/// Maximum byte length of a single string or blob.
///
/// Anything larger could never fit in a frame anyway.
pub const MAX_FIELD_LEN: usize = crate::frame::MAX_FRAME_SIZE;

/// The kind of a single serialized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Signed 32-bit integer.
    Int,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Str,
    /// List of UTF-8 strings.
    StrList,
    /// Raw byte blob (empty when absent).
    Bytes,
}

impl FieldKind {
    fn tag(self) -> u8 {
        match self {
            FieldKind::Int => 1,
            FieldKind::Bool => 2,
            FieldKind::Str => 3,
            FieldKind::StrList => 4,
            FieldKind::Bytes => 5,
        }
    }
}

/// An owned field value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    Bool(bool),
    Str(String),
    StrList(Vec<String>),
    Bytes(Vec<u8>),
}

impl Value {
    /// The kind of this value.
    pub fn kind(&self) -> FieldKind {
        match self {
            Value::Int(_) => FieldKind::Int,
            Value::Bool(_) => FieldKind::Bool,
            Value::Str(_) => FieldKind::Str,
            Value::StrList(_) => FieldKind::StrList,
            Value::Bytes(_) => FieldKind::Bytes,
        }
    }
}

/// A type that can describe its field layout and round-trip through the codec.
pub trait Serializable: Sized {
    /// Ordered field layout.
    const KINDS: &'static [FieldKind];

    /// Current field values, in the order of [`Self::KINDS`].
    fn fields(&self) -> Vec<Value>;

    /// Rebuild a value from decoded fields. The codec guarantees that
    /// `fields` matches [`Self::KINDS`] in length and kind.
    fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError>;
}

/// Errors produced while encoding a value.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EncodeError {
    /// `fields()` returned a different number of values than declared.
    #[error("expected {expected} fields, got {actual}")]
    FieldCount {
        /// Declared field count.
        expected: usize,
        /// Produced field count.
        actual: usize,
    },
    /// A value's kind differs from the declared kind.
    #[error("field {index}: expected {expected:?}, got {actual:?}")]
    KindMismatch {
        index: usize,
        expected: FieldKind,
        actual: FieldKind,
    },
    /// A string or blob exceeds [`MAX_FIELD_LEN`].
    #[error("field {index}: length {len} exceeds maximum {max}")]
    FieldTooLong { index: usize, len: usize, max: usize },
    /// A string list exceeds [`MAX_LIST_LEN`].
    #[error("field {index}: list of {len} entries exceeds maximum {max}")]
    ListTooLong { index: usize, len: usize, max: usize },
}

/// Errors produced while decoding a payload.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The payload ended in the middle of a field.
    #[error("payload truncated in field {index}")]
    Truncated { index: usize },
    /// The kind tag on the wire does not match the declared kind.
    #[error("field {index}: expected tag {expected}, got {actual}")]
    UnexpectedTag { index: usize, expected: u8, actual: u8 },
    /// A boolean byte other than 0 or 1.
    #[error("field {index}: invalid boolean byte {byte:#04x}")]
    InvalidBool { index: usize, byte: u8 },
    /// A negative or oversized length or count.
    #[error("field {index}: invalid length {len}")]
    InvalidLength { index: usize, len: i32 },
    /// String bytes are not valid UTF-8.
    #[error("field {index}: string is not valid UTF-8")]
    InvalidUtf8 { index: usize },
    /// Bytes left over after the last declared field.
    #[error("{0} trailing bytes after last field")]
    TrailingBytes(usize),
    /// Field values are well-formed but inconsistent with each other.
    #[error("inconsistent payload: {0}")]
    Inconsistent(&'static str),
}

/// Encode a value into its payload bytes.
pub fn encode<T: Serializable>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let fields = value.fields();
    if fields.len() != T::KINDS.len() {
        return Err(EncodeError::FieldCount {
            expected: T::KINDS.len(),
            actual: fields.len(),
        });
    }

    let mut out = Vec::new();
    for (index, (field, &kind)) in fields.iter().zip(T::KINDS).enumerate() {
        if field.kind() != kind {
            return Err(EncodeError::KindMismatch {
                index,
                expected: kind,
                actual: field.kind(),
            });
        }
        out.put_u8(kind.tag());
        match field {
            Value::Int(v) => out.put_i32(*v),
            Value::Bool(v) => out.put_u8(u8::from(*v)),
            Value::Str(s) => put_blob(&mut out, index, s.as_bytes())?,
            Value::Bytes(b) => put_blob(&mut out, index, b)?,
            Value::StrList(list) => {
                if list.len() > MAX_LIST_LEN {
                    return Err(EncodeError::ListTooLong {
                        index,
                        len: list.len(),
                        max: MAX_LIST_LEN,
                    });
                }
                out.put_i32(list.len() as i32);
                for s in list {
                    put_blob(&mut out, index, s.as_bytes())?;
                }
            }
        }
    }
    Ok(out)
}

fn put_blob(out: &mut Vec<u8>, index: usize, data: &[u8]) -> Result<(), EncodeError> {
    if data.len() > MAX_FIELD_LEN {
        return Err(EncodeError::FieldTooLong {
            index,
            len: data.len(),
            max: MAX_FIELD_LEN,
        });
    }
    out.put_i32(data.len() as i32);
    out.put_slice(data);
    Ok(())
}

/// Decode payload bytes into a value.
pub fn decode<T: Serializable>(mut buf: &[u8]) -> Result<T, DecodeError> {
    let mut fields = Vec::with_capacity(T::KINDS.len());
    for (index, &kind) in T::KINDS.iter().enumerate() {
        fields.push(read_field(&mut buf, index, kind)?);
    }
    if buf.has_remaining() {
        return Err(DecodeError::TrailingBytes(buf.remaining()));
    }
    T::from_fields(fields)
}

fn read_field(buf: &mut &[u8], index: usize, kind: FieldKind) -> Result<Value, DecodeError> {
    let tag = read_u8(buf, index)?;
    if tag != kind.tag() {
        return Err(DecodeError::UnexpectedTag {
            index,
            expected: kind.tag(),
            actual: tag,
        });
    }

    let value = match kind {
        FieldKind::Int => Value::Int(read_i32(buf, index)?),
        FieldKind::Bool => match read_u8(buf, index)? {
            0 => Value::Bool(false),
            1 => Value::Bool(true),
            byte => return Err(DecodeError::InvalidBool { index, byte }),
        },
        FieldKind::Str => Value::Str(read_str(buf, index)?),
        FieldKind::Bytes => Value::Bytes(read_blob(buf, index)?.to_vec()),
        FieldKind::StrList => {
            let count = read_len(buf, index, MAX_LIST_LEN)?;
            let mut list = Vec::with_capacity(count);
            for _ in 0..count {
                list.push(read_str(buf, index)?);
            }
            Value::StrList(list)
        }
    };
    Ok(value)
}

fn read_u8(buf: &mut &[u8], index: usize) -> Result<u8, DecodeError> {
    if buf.remaining() < 1 {
        return Err(DecodeError::Truncated { index });
    }
    Ok(buf.get_u8())
}

fn read_i32(buf: &mut &[u8], index: usize) -> Result<i32, DecodeError> {
    if buf.remaining() < 4 {
        return Err(DecodeError::Truncated { index });
    }
    Ok(buf.get_i32())
}

fn read_len(buf: &mut &[u8], index: usize, max: usize) -> Result<usize, DecodeError> {
    let len = read_i32(buf, index)?;
    match usize::try_from(len) {
        Ok(n) if n <= max => Ok(n),
        _ => Err(DecodeError::InvalidLength { index, len }),
    }
}

fn read_blob<'a>(buf: &mut &'a [u8], index: usize) -> Result<&'a [u8], DecodeError> {
    let len = read_len(buf, index, MAX_FIELD_LEN)?;
    if buf.remaining() < len {
        return Err(DecodeError::Truncated { index });
    }
    let (data, rest) = buf.split_at(len);
    *buf = rest;
    Ok(data)
}

fn read_str(buf: &mut &[u8], index: usize) -> Result<String, DecodeError> {
    let data = read_blob(buf, index)?;
    String::from_utf8(data.to_vec()).map_err(|_| DecodeError::InvalidUtf8 { index })
}

/// Compare two values by their declared fields only.
///
/// Transient state that is not part of [`Serializable::KINDS`] is ignored.
pub fn value_eq<T: Serializable>(a: &T, b: &T) -> bool {
    a.fields() == b.fields()
}

/// Pops typed values off a decoded field list.
///
/// Used by [`Serializable::from_fields`] implementations; the codec has already
/// checked kinds, so a mismatch here means the impl disagrees with its own
/// `KINDS` and is reported as [`DecodeError::Inconsistent`].
pub struct Fields(std::vec::IntoIter<Value>);

impl Fields {
    pub fn new(fields: Vec<Value>) -> Self {
        Self(fields.into_iter())
    }

    pub fn int(&mut self) -> Result<i32, DecodeError> {
        match self.0.next() {
            Some(Value::Int(v)) => Ok(v),
            _ => Err(DecodeError::Inconsistent("expected int field")),
        }
    }

    pub fn bool(&mut self) -> Result<bool, DecodeError> {
        match self.0.next() {
            Some(Value::Bool(v)) => Ok(v),
            _ => Err(DecodeError::Inconsistent("expected bool field")),
        }
    }

    pub fn str(&mut self) -> Result<String, DecodeError> {
        match self.0.next() {
            Some(Value::Str(v)) => Ok(v),
            _ => Err(DecodeError::Inconsistent("expected string field")),
        }
    }

    pub fn str_list(&mut self) -> Result<Vec<String>, DecodeError> {
        match self.0.next() {
            Some(Value::StrList(v)) => Ok(v),
            _ => Err(DecodeError::Inconsistent("expected string list field")),
        }
    }

    pub fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        match self.0.next() {
            Some(Value::Bytes(v)) => Ok(v),
            _ => Err(DecodeError::Inconsistent("expected bytes field")),
        }
    }
}

/// Flatten key/value pairs into an alternating string list.
pub fn flatten_pairs(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .flat_map(|(k, v)| [k.clone(), v.clone()])
        .collect()
}

/// Inverse of [`flatten_pairs`]. An odd number of entries is rejected.
pub fn unflatten_pairs(list: Vec<String>) -> Result<Vec<(String, String)>, DecodeError> {
    if list.len() % 2 != 0 {
        return Err(DecodeError::Inconsistent("odd number of key/value entries"));
    }
    let mut pairs = Vec::with_capacity(list.len() / 2);
    let mut it = list.into_iter();
    while let (Some(k), Some(v)) = (it.next(), it.next()) {
        pairs.push((k, v));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Sample {
        n: i32,
        flag: bool,
        name: String,
        tags: Vec<String>,
        blob: Vec<u8>,
        /// Not serialized.
        scratch: u32,
    }

    impl Serializable for Sample {
        const KINDS: &'static [FieldKind] = &[
            FieldKind::Int,
            FieldKind::Bool,
            FieldKind::Str,
            FieldKind::StrList,
            FieldKind::Bytes,
        ];

        fn fields(&self) -> Vec<Value> {
            vec![
                Value::Int(self.n),
                Value::Bool(self.flag),
                Value::Str(self.name.clone()),
                Value::StrList(self.tags.clone()),
                Value::Bytes(self.blob.clone()),
            ]
        }

        fn from_fields(fields: Vec<Value>) -> Result<Self, DecodeError> {
            let mut f = Fields::new(fields);
            Ok(Self {
                n: f.int()?,
                flag: f.bool()?,
                name: f.str()?,
                tags: f.str_list()?,
                blob: f.bytes()?,
                scratch: 0,
            })
        }
    }

    fn sample() -> Sample {
        Sample {
            n: -42,
            flag: true,
            name: "Blue in Green".to_string(),
            tags: vec!["jazz".to_string(), "".to_string(), "ñ".to_string()],
            blob: vec![0, 1, 2, 255],
            scratch: 7,
        }
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        let value = sample();
        let bytes = encode(&value).unwrap();
        let decoded: Sample = decode(&bytes).unwrap();
        assert!(value_eq(&value, &decoded));
        assert_eq!(decoded.scratch, 0);
    }

    #[test]
    fn test_int_is_big_endian() {
        let mut value = sample();
        value.n = 0x0102_0304;
        let bytes = encode(&value).unwrap();
        assert_eq!(&bytes[..5], &[1, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_absent_blob_is_zero_length() {
        let mut value = sample();
        value.blob.clear();
        let bytes = encode(&value).unwrap();
        assert_eq!(&bytes[bytes.len() - 5..], &[5, 0, 0, 0, 0]);
        let decoded: Sample = decode(&bytes).unwrap();
        assert!(decoded.blob.is_empty());
    }

    #[test]
    fn test_equality_ignores_transient_fields() {
        let a = sample();
        let mut b = sample();
        b.scratch = 99;
        assert!(value_eq(&a, &b));
        b.n += 1;
        assert!(!value_eq(&a, &b));
    }

    #[test]
    fn test_every_truncation_is_rejected() {
        let bytes = encode(&sample()).unwrap();
        for cut in 0..bytes.len() {
            let result: Result<Sample, _> = decode(&bytes[..cut]);
            assert!(result.is_err(), "truncation at {cut} should fail");
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes.push(0);
        let result: Result<Sample, _> = decode(&bytes);
        assert_eq!(result.unwrap_err(), DecodeError::TrailingBytes(1));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let mut value = sample();
        value.name = "ab".to_string();
        let mut bytes = encode(&value).unwrap();
        // Int field (5) + bool field (2) + str tag (1) + length (4) = offset 12.
        bytes[12] = 0xC3;
        bytes[13] = 0x28;
        let result: Result<Sample, _> = decode(&bytes);
        assert_eq!(result.unwrap_err(), DecodeError::InvalidUtf8 { index: 2 });
    }

    #[test]
    fn test_kind_tag_mismatch_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[0] = FieldKind::Str.tag();
        let result: Result<Sample, _> = decode(&bytes);
        assert!(matches!(
            result,
            Err(DecodeError::UnexpectedTag { index: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[6] = 2;
        let result: Result<Sample, _> = decode(&bytes);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::InvalidBool { index: 1, byte: 2 }
        );
    }

    #[test]
    fn test_oversized_list_count_rejected_without_allocating() {
        let mut value = sample();
        value.name.clear();
        let mut bytes = encode(&value).unwrap();
        // Int (5) + bool (2) + empty str (5) + list tag (1) = offset 13.
        bytes[13..17].copy_from_slice(&i32::MAX.to_be_bytes());
        let result: Result<Sample, _> = decode(&bytes);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::InvalidLength {
                index: 3,
                len: i32::MAX
            }
        );
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut bytes = encode(&sample()).unwrap();
        bytes[8..12].copy_from_slice(&(-1i32).to_be_bytes());
        let result: Result<Sample, _> = decode(&bytes);
        assert_eq!(
            result.unwrap_err(),
            DecodeError::InvalidLength { index: 2, len: -1 }
        );
    }

    #[test]
    fn test_encode_rejects_overlong_list() {
        let mut value = sample();
        value.tags = vec![String::new(); MAX_LIST_LEN + 1];
        assert!(matches!(
            encode(&value),
            Err(EncodeError::ListTooLong { index: 3, .. })
        ));
    }

    #[test]
    fn test_pairs_flatten_and_unflatten() {
        let pairs = vec![
            ("artist".to_string(), "Miles Davis".to_string()),
            ("title".to_string(), "So What".to_string()),
        ];
        let flat = flatten_pairs(&pairs);
        assert_eq!(flat.len(), 4);
        assert_eq!(unflatten_pairs(flat).unwrap(), pairs);
        assert!(unflatten_pairs(vec!["lonely".to_string()]).is_err());
    }
}
