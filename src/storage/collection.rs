//! Device identifier to collection name mapping.
//!
//! Readings of one device live under a [`CollectionName`] derived from the
//! device address. The derivation keeps digits and dots only, so two
//! identifiers that differ solely in other characters map to the same
//! collection (e.g. `1.2.3.4` and `1a.2b.3c.4d`). The registry refuses to
//! monitor a second device whose name collides with a live one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace tag prepended to every collection name.
pub const COLLECTION_PREFIX: &str = "dados_";

/// Storage-safe name of a per-device reading collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionName(String);

impl CollectionName {
    /// Wrap an already-derived name, e.g. one read back from the database.
    pub(crate) fn from_stored(name: String) -> Self {
        Self(name)
    }

    /// The name as stored in the `collection` column.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the identifier contributed no digits, so the name is the
    /// prefix followed by separators at most.
    pub fn is_bare(&self) -> bool {
        !self.0.bytes().any(|b| b.is_ascii_digit())
    }
}

impl AsRef<str> for CollectionName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the collection name for a device identifier.
///
/// Keeps ASCII digits and `.`, turns each `.` into `_` and prepends
/// [`COLLECTION_PREFIX`]. Total and deterministic.
///
/// ```
/// use regtrace::storage::sanitize;
///
/// assert_eq!(sanitize("192.168.0.10").as_str(), "dados_192_168_0_10");
/// ```
pub fn sanitize(raw: &str) -> CollectionName {
    let mut name = String::with_capacity(COLLECTION_PREFIX.len() + raw.len());
    name.push_str(COLLECTION_PREFIX);
    name.extend(raw.chars().filter_map(|c| match c {
        '0'..='9' => Some(c),
        '.' => Some('_'),
        _ => None,
    }));
    CollectionName(name)
}
