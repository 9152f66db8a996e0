//! Object identifiers assigned by the blob backend, and the record the
//! catalog keeps for every key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Width of every object identifier on the wire.
pub const OBJECT_ID_LEN: usize = 8;

/// Content type recorded when the client does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidObjectId {
    #[error("expected {OBJECT_ID_LEN} bytes, got {0}")]
    WrongLength(usize),
    #[error("identifier is not valid UTF-8")]
    NotUtf8,
    #[error("identifier is blank")]
    Blank,
}

/// Fixed-width opaque identifier of an immutable blob.
///
/// The backend hands out 8 raw bytes; the gateway stores them as text and
/// sends the same bytes back for GET and DELETE, so only UTF-8 identifiers
/// are accepted.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectId(String);

impl ObjectId {
    /// Validate identifier bytes read from the backend.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, InvalidObjectId> {
        if raw.len() != OBJECT_ID_LEN {
            return Err(InvalidObjectId::WrongLength(raw.len()));
        }
        if raw.iter().all(|b| *b == 0) {
            return Err(InvalidObjectId::Blank);
        }
        let text = std::str::from_utf8(raw).map_err(|_| InvalidObjectId::NotUtf8)?;
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl TryFrom<String> for ObjectId {
    type Error = InvalidObjectId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_bytes(value.as_bytes())
    }
}

impl From<ObjectId> for String {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({:?})", self.0)
    }
}

/// What the catalog knows about a key.
///
/// Stored as one JSON value so that size and current object never come from
/// two different writes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    /// Object holding the key's current content.
    pub object_id: ObjectId,

    /// Byte length of the current object.
    pub size: u64,

    /// MIME type supplied on upload, or [`DEFAULT_CONTENT_TYPE`].
    pub content_type: String,

    /// Hex MD5 of the payload.
    pub etag: String,

    /// When the current object was written.
    pub last_modified: DateTime<Utc>,
}

/// A key together with its record, as returned by bucket listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub record: KeyRecord,
}
