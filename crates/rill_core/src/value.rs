//! Host-agnostic values crossing the script boundary.

use std::fmt;
use std::rc::Rc;

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::block::Block;

/// A value surfaced to (or received from) the scripting host.
///
/// The bridge moves bytes; whether a chunk reaches script as binary data or
/// as text is the owning generator's [`ValueCodec`] policy.
#[derive(Clone, PartialEq, Eq)]
pub enum ScriptValue {
    Binary(Block),
    Text(Rc<str>),
}

impl ScriptValue {
    pub fn binary(bytes: &[u8]) -> Self {
        Self::Binary(Block::copy_from(bytes))
    }

    pub fn text(s: &str) -> Self {
        Self::Text(Rc::from(s))
    }

    /// Size of the value in bytes, the unit flow accounting works in.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Binary(block) => block.len(),
            Self::Text(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.byte_len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Binary(block) => block.as_bytes(),
            Self::Text(s) => s.as_bytes(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Binary(_) => None,
            Self::Text(s) => Some(s),
        }
    }

    /// Encode back to a block. Binary values share their backing bytes,
    /// text is copied.
    pub fn to_block(&self) -> Block {
        match self {
            Self::Binary(block) => block.clone(),
            Self::Text(s) => Block::copy_from(s.as_bytes()),
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary(block) => write!(f, "Binary({} bytes)", block.len()),
            Self::Text(s) => write!(f, "Text({s:?})"),
        }
    }
}

impl Serialize for ScriptValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Binary(block) => serializer.serialize_bytes(block.as_bytes()),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for ScriptValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = ScriptValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a string or a byte sequence")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ScriptValue, E> {
                Ok(ScriptValue::text(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<ScriptValue, E> {
                Ok(ScriptValue::Text(Rc::from(v)))
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<ScriptValue, E> {
                Ok(ScriptValue::binary(v))
            }

            fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<ScriptValue, E> {
                Ok(ScriptValue::Binary(Block::from(v)))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<ScriptValue, A::Error> {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Ok(ScriptValue::Binary(Block::from(bytes)))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// Decode policy for blocks leaving the queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValueCodec {
    /// Chunks surface as raw bytes (arraybuffer-shaped).
    #[default]
    Binary,
    /// Chunks surface as text; invalid UTF-8 is replaced, not rejected.
    Text,
}

impl ValueCodec {
    pub fn decode(self, block: Block) -> ScriptValue {
        match self {
            Self::Binary => ScriptValue::Binary(block),
            Self::Text => ScriptValue::Text(Rc::from(
                String::from_utf8_lossy(block.as_bytes()).as_ref(),
            )),
        }
    }
}

/// One step of the async-iteration protocol: `{value, done}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IterResult {
    pub value: Option<ScriptValue>,
    pub done: bool,
}

impl IterResult {
    /// A delivered chunk; the stream continues.
    pub fn value(value: ScriptValue) -> Self {
        Self {
            value: Some(value),
            done: false,
        }
    }

    /// End of stream, optionally carrying a final value.
    pub fn end(final_value: Option<ScriptValue>) -> Self {
        Self {
            value: final_value,
            done: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_decodes_binary_without_copying() {
        let block = Block::copy_from(b"abc");
        let ScriptValue::Binary(decoded) = ValueCodec::Binary.decode(block.clone()) else {
            panic!("expected binary");
        };
        assert!(decoded.shares_backing(&block));
    }

    #[test]
    fn codec_decodes_text_lossily() {
        let value = ValueCodec::Text.decode(Block::copy_from(b"hi"));
        assert_eq!(value.as_text(), Some("hi"));

        let value = ValueCodec::Text.decode(Block::copy_from(&[0xff, b'a']));
        assert_eq!(value.as_text(), Some("\u{fffd}a"));
    }

    #[test]
    fn text_value_round_trips_through_block() {
        let value = ScriptValue::text("héllo");
        assert_eq!(value.byte_len(), 6);
        assert_eq!(value.to_block().as_bytes(), "héllo".as_bytes());
    }

    #[test]
    fn serde_shapes() {
        let text = serde_json::to_value(ScriptValue::text("hi")).unwrap();
        assert_eq!(text, serde_json::json!("hi"));

        let bin = serde_json::to_value(ScriptValue::binary(&[1, 2])).unwrap();
        assert_eq!(bin, serde_json::json!([1, 2]));

        let back: ScriptValue = serde_json::from_value(serde_json::json!("yo")).unwrap();
        assert_eq!(back, ScriptValue::text("yo"));

        let back: ScriptValue = serde_json::from_value(serde_json::json!([3, 4])).unwrap();
        assert_eq!(back, ScriptValue::binary(&[3, 4]));
    }

    #[test]
    fn iter_result_serializes_like_the_protocol_object() {
        let step = serde_json::to_value(IterResult::value(ScriptValue::text("x"))).unwrap();
        assert_eq!(step, serde_json::json!({"value": "x", "done": false}));

        let end = serde_json::to_value(IterResult::end(None)).unwrap();
        assert_eq!(end, serde_json::json!({"value": null, "done": true}));
    }
}
