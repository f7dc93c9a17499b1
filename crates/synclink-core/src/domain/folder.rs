//! Folder identifier domain type.
//!
//! Every synchronized folder is identified by an opaque byte string.  Peers
//! agree on which folder a connection belongs to by placing the identifier,
//! lowercase hex encoded, into the URL path of the WebSocket upgrade request:
//!
//! ```text
//! wss://192.168.1.20:42345/3f9a0c…
//!                          └──── hex(folder_id)
//! ```
//!
//! The encoding must invert exactly: `FolderId::from_hex(&id.to_hex()) == id`
//! for every identifier, the empty one included (its URL path is a bare `/`).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when turning text back into a [`FolderId`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FolderIdError {
    /// The input had an odd number of hex digits.
    #[error("folder id has odd hex length {0}")]
    OddLength(usize),

    /// The input contained a character outside `[0-9a-fA-F]`.
    #[error("folder id contains invalid hex character {character:?} at index {index}")]
    InvalidCharacter { character: char, index: usize },

    /// The URL path was not a single `/<hex>` segment.
    #[error("request path {0:?} is not a single folder segment")]
    InvalidPath(String),
}

impl From<hex::FromHexError> for FolderIdError {
    fn from(e: hex::FromHexError) -> Self {
        match e {
            hex::FromHexError::OddLength => FolderIdError::OddLength(0),
            hex::FromHexError::InvalidHexCharacter { c, index } => {
                FolderIdError::InvalidCharacter {
                    character: c,
                    index,
                }
            }
            // Only produced by `decode_to_slice`, which is not used here.
            hex::FromHexError::InvalidStringLength => FolderIdError::OddLength(0),
        }
    }
}

/// Opaque identifier of a synchronized folder.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderId(Vec<u8>);

impl FolderId {
    /// Wraps raw identifier bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex encoding without separators.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Parses a hex string (either case) back into a folder id.
    ///
    /// # Errors
    ///
    /// Returns [`FolderIdError`] for odd-length or non-hex input.  The
    /// empty string decodes to the empty id.
    pub fn from_hex(text: &str) -> Result<Self, FolderIdError> {
        if text.len() % 2 != 0 {
            return Err(FolderIdError::OddLength(text.len()));
        }
        Ok(Self(hex::decode(text)?))
    }

    /// The URL path component for this folder: `/` followed by the hex id.
    pub fn to_url_path(&self) -> String {
        format!("/{}", self.to_hex())
    }

    /// Extracts the folder id from a request path such as `/abcd`.
    ///
    /// The path must be exactly one segment.  A query string, if present,
    /// is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`FolderIdError::InvalidPath`] when the path does not start
    /// with `/` or contains further separators, and the hex errors of
    /// [`FolderId::from_hex`] otherwise.
    pub fn from_url_path(path: &str) -> Result<Self, FolderIdError> {
        let path = path.split_once('?').map_or(path, |(p, _)| p);
        let segment = path
            .strip_prefix('/')
            .filter(|s| !s.contains('/'))
            .ok_or_else(|| FolderIdError::InvalidPath(path.to_string()))?;
        Self::from_hex(segment)
    }
}

impl fmt::Debug for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FolderId({})", self.to_hex())
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for FolderId {
    type Err = FolderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Folder ids appear in config files as hex strings.
impl Serialize for FolderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FolderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        FolderId::from_hex(&text).map_err(serde::de::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
