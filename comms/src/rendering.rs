//! Opaque, server-produced images.

use std::{fmt, sync::Arc};

use base64::{DecodeError, Engine as _, engine::general_purpose::STANDARD};
use serde::{
    Deserialize, Deserializer,
    de::{self, SeqAccess, Visitor},
};

/// A display handle for an image produced by the service.
///
/// The service either sends raw image bytes (a byte array in JSON) or embeds them as
/// base64, optionally as a `data:` URI. Both are kept as they arrived and are cheap to clone, the
/// client never looks at the pixels.
#[derive(Clone, PartialEq, Eq)]
pub enum Rendering {
    Raw(Arc<[u8]>),
    Encoded(Arc<str>),
}

impl Rendering {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Raw(bytes.into())
    }

    pub fn from_encoded(text: impl Into<Arc<str>>) -> Self {
        Self::Encoded(text.into())
    }

    /// The media type of a `data:` URI payload, if the service sent one.
    pub fn media_type(&self) -> Option<&str> {
        let Self::Encoded(text) = self else {
            return None;
        };

        let rest = text.strip_prefix("data:")?;
        let (meta, _) = rest.split_once(',')?;
        meta.split(';').next().filter(|m| !m.is_empty())
    }

    /// Decodes the handle into image bytes.
    ///
    /// # Returns
    /// The raw image bytes or a `DecodeError` if the embedded base64 is malformed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DecodeError> {
        match self {
            Self::Raw(bytes) => Ok(bytes.to_vec()),
            Self::Encoded(text) => {
                let payload = match text.split_once(";base64,") {
                    Some((_, payload)) => payload,
                    None => text,
                };
                STANDARD.decode(payload.trim())
            }
        }
    }
}

impl fmt::Debug for Rendering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(bytes) => write!(f, "Rendering::Raw({} bytes)", bytes.len()),
            Self::Encoded(text) => write!(f, "Rendering::Encoded({} chars)", text.len()),
        }
    }
}

struct RenderingVisitor;

impl<'de> Visitor<'de> for RenderingVisitor {
    type Value = Rendering;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a base64 string or an array of bytes")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Ok(Rendering::from_encoded(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(Rendering::from_bytes(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Ok(Rendering::from_bytes(bytes))
    }
}

impl<'de> Deserialize<'de> for Rendering {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RenderingVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_uri_and_plain_base64() {
        let uri = Rendering::from_encoded("data:image/png;base64,aGVsbG8=");
        let plain = Rendering::from_encoded("aGVsbG8=");

        assert_eq!(uri.media_type(), Some("image/png"));
        assert_eq!(plain.media_type(), None);
        assert_eq!(uri.to_bytes().unwrap(), b"hello");
        assert_eq!(plain.to_bytes().unwrap(), b"hello");
    }

    #[test]
    fn deserializes_strings_and_byte_arrays() {
        let encoded: Rendering = serde_json::from_str(r#""aGVsbG8=""#).unwrap();
        let raw: Rendering = serde_json::from_str("[104, 105]").unwrap();

        assert_eq!(encoded, Rendering::from_encoded("aGVsbG8="));
        assert_eq!(raw, Rendering::from_bytes(b"hi".to_vec()));
        assert_eq!(raw.to_bytes().unwrap(), b"hi");
        assert!(serde_json::from_str::<Rendering>("[256]").is_err());
        assert!(serde_json::from_str::<Rendering>("42").is_err());
    }

    #[test]
    fn raw_bytes_pass_through() {
        let raw = Rendering::from_bytes(vec![1u8, 2, 3]);
        assert_eq!(raw.to_bytes().unwrap(), [1, 2, 3]);
        assert_eq!(format!("{raw:?}"), "Rendering::Raw(3 bytes)");
    }
}
