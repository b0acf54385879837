//! # pv-name
//!
//! Parses raw, user-typed process variable names into a canonical [`PvName`].
//!
//! A name may carry a field suffix after the first `.`, e.g. `IOC:m1.RBV`.
//! The prefix (`IOC:m1`) addresses the record and is what metadata lookups
//! use; the full name is the identity that gets persisted.
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    non_snake_case,
    non_upper_case_globals
)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::{
    borrow::Borrow,
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

/// Separates a record name from one of its fields
pub const FIELD_SEPARATOR: char = '.';

/// errors produced when resolving a raw name
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    /// nothing left after trimming whitespace
    #[error("pv name is empty")]
    Empty,
}

/// Canonical identity of a remote endpoint.
///
/// Names are case-sensitive and compared by exact string equality.
#[derive(Clone)]
pub struct PvName {
    full: String,
    // byte offset of the first separator, if any
    sep: Option<usize>,
}

impl PvName {
    /// Resolve a raw name: trim it, reject empty input and locate the
    /// field suffix.
    ///
    /// ```
    /// let name = pv_name::PvName::parse("  IOC:m1.RBV ").unwrap();
    /// assert_eq!(name.as_str(), "IOC:m1.RBV");
    /// assert_eq!(name.prefix(), "IOC:m1");
    /// assert_eq!(name.suffix(), Some("RBV"));
    /// ```
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let full = raw.trim();
        if full.is_empty() {
            return Err(NameError::Empty);
        }
        Ok(Self {
            sep: full.find(FIELD_SEPARATOR),
            full: full.to_owned(),
        })
    }

    /// the full name, suffix included
    pub fn as_str(&self) -> &str {
        &self.full
    }

    /// the record part of the name, everything before the first `.`
    pub fn prefix(&self) -> &str {
        match self.sep {
            Some(idx) => &self.full[..idx],
            None => &self.full,
        }
    }

    /// the field part of the name. A trailing `.` is treated as no suffix
    pub fn suffix(&self) -> Option<&str> {
        self.sep
            .map(|idx| &self.full[idx + FIELD_SEPARATOR.len_utf8()..])
            .filter(|s| !s.is_empty())
    }

    /// channel name used to read a metadata field of this record, `{prefix}.{field}`
    pub fn metadata_channel(&self, field: &str) -> String {
        format!("{}{FIELD_SEPARATOR}{field}", self.prefix())
    }

    /// consume and return the owned full name
    pub fn into_string(self) -> String {
        self.full
    }
}

// identity is the full string only, keeps `Borrow<str>` lookups consistent
impl PartialEq for PvName {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl Eq for PvName {}

impl Hash for PvName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl PartialOrd for PvName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PvName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.full.cmp(&other.full)
    }
}

impl fmt::Debug for PvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PvName").field(&self.full).finish()
    }
}

impl fmt::Display for PvName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}

impl FromStr for PvName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PvName {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl Borrow<str> for PvName {
    fn borrow(&self) -> &str {
        &self.full
    }
}

impl Serialize for PvName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full)
    }
}

impl<'de> Deserialize<'de> for PvName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        PvName::parse(&raw).map_err(de::Error::custom)
    }
}
