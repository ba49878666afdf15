//! Validated node paths.
//!
//! The coordination store's namespace is a tree of slash-separated names
//! rooted at `/`. [`NodePath`] is a normalized absolute path into that tree;
//! constructing one validates it once so every later store call can trust it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of decimal digits in a store-assigned sequence suffix.
///
/// Sequential create modes append a zero-padded ordinal of this width to the
/// requested path, e.g. `member-` becomes `member-0000000042`.
pub const SEQUENCE_DIGITS: usize = 10;

/// Reasons a candidate path or node name fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Paths must begin with `/`.
    #[error("path must be absolute: {0:?}")]
    NotAbsolute(String),

    /// A path contained `//` or ended with `/`.
    #[error("path has an empty segment: {0:?}")]
    EmptySegment(String),

    /// A child name was empty or contained `/`.
    #[error("invalid node name: {0:?}")]
    InvalidName(String),
}

/// A normalized absolute path to a node in the coordination store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(String);

impl NodePath {
    /// Validate and wrap an absolute path such as `/group/leader`.
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(PathError::NotAbsolute(path));
        }
        if path == "/" {
            return Ok(Self(path));
        }
        if path.ends_with('/') || path.contains("//") {
            return Err(PathError::EmptySegment(path));
        }
        Ok(Self(path))
    }

    /// The root of the namespace, `/`.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Append one child name, validating it.
    pub fn child(&self, name: &str) -> Result<Self, PathError> {
        if name.is_empty() || name.contains('/') {
            return Err(PathError::InvalidName(name.to_string()));
        }
        if self.0 == "/" {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0 == "/" {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// The final path segment, or `""` for the root.
    pub fn name(&self) -> &str {
        if self.0 == "/" {
            return "";
        }
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// The path as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the store-assigned sequence ordinal from this node's name.
    ///
    /// Returns `Some` only when the name ends in exactly the zero-padded
    /// [`SEQUENCE_DIGITS`]-wide suffix a sequential create appends.
    pub fn sequence(&self) -> Option<u64> {
        let name = self.name();
        if name.len() < SEQUENCE_DIGITS {
            return None;
        }
        let (_, tail) = name.split_at(name.len() - SEQUENCE_DIGITS);
        if !tail.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        tail.parse().ok()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for NodePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<NodePath> for String {
    fn from(path: NodePath) -> Self {
        path.0
    }
}

impl AsRef<str> for NodePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
