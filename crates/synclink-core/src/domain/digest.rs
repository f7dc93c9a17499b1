//! Node identity digest.
//!
//! A node is identified by a fixed-size fingerprint of its self-signed
//! certificate.  Peers are not validated through a CA chain; instead the
//! digest is compared at a higher layer.  The broker uses the same digest to
//! recognise connections to itself.

use std::fmt;

/// Length of a node digest in bytes (SHA-256 output).
pub const DIGEST_LEN: usize = 32;

/// Fingerprint of a node certificate.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeDigest([u8; DIGEST_LEN]);

impl NodeDigest {
    pub const fn new(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns `true` iff `other` is byte-for-byte this digest.
    ///
    /// Anything of the wrong length, including an empty slice, is never a
    /// match.
    pub fn matches(&self, other: &[u8]) -> bool {
        other.len() == DIGEST_LEN && self.0[..] == other[..]
    }
}

impl fmt::Debug for NodeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeDigest({})", self.to_hex())
    }
}

impl fmt::Display for NodeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
