//! Paths into the state tree.
//!
//! A path is an ordered list of segments. On the wire it travels as an
//! RFC 6901 JSON pointer (`/package-data/bitcoind/status`).

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// One step of a [`JsonPath`].
///
/// Segments made only of digits (without a leading zero) are indices. An index
/// applied to an object addresses the key with the same decimal spelling, so
/// `Index(3)` and the key `"3"` reach the same object member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

impl PathSegment {
    /// Classifies a raw (unescaped) segment.
    pub fn parse(raw: &str) -> Self {
        let is_index = raw == "0"
            || (!raw.is_empty()
                && !raw.starts_with('0')
                && raw.bytes().all(|b| b.is_ascii_digit()));
        if is_index {
            if let Ok(index) = raw.parse() {
                return PathSegment::Index(index);
            }
        }
        PathSegment::Key(raw.to_string())
    }

    /// Returns the segment as an object key.
    pub fn to_key(&self) -> String {
        match self {
            PathSegment::Key(key) => key.clone(),
            PathSegment::Index(index) => index.to_string(),
        }
    }

    /// Returns true for the JSON-Patch "append" marker `-`.
    pub fn is_append(&self) -> bool {
        matches!(self, PathSegment::Key(key) if key == "-")
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(&key.replace('~', "~0").replace('/', "~1")),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(raw: &str) -> Self {
        PathSegment::parse(raw)
    }
}

impl From<String> for PathSegment {
    fn from(raw: String) -> Self {
        PathSegment::parse(&raw)
    }
}

impl From<&String> for PathSegment {
    fn from(raw: &String) -> Self {
        PathSegment::parse(raw)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// An ordered sequence of segments addressing a location in the tree.
///
/// The empty path is the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonPath {
    segments: Vec<PathSegment>,
}

impl JsonPath {
    /// Builds a path from anything that converts into segments.
    ///
    /// ```
    /// use patchsync_protocol::JsonPath;
    ///
    /// let path = JsonPath::new(["package-data", "bitcoind", "status"]);
    /// assert_eq!(path.to_string(), "/package-data/bitcoind/status");
    /// ```
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// The document root.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses an RFC 6901 pointer. The empty string is the root.
    pub fn parse(pointer: &str) -> Result<Self, ProtocolError> {
        if pointer.is_empty() {
            return Ok(Self::root());
        }
        let rest = pointer
            .strip_prefix('/')
            .ok_or_else(|| ProtocolError::InvalidPointer(pointer.to_string()))?;

        let mut segments = Vec::new();
        for raw in rest.split('/') {
            // ~1 must be decoded before ~0
            let unescaped = raw.replace("~1", "/").replace("~0", "~");
            segments.push(PathSegment::parse(&unescaped));
        }
        Ok(Self { segments })
    }

    /// Returns the segments.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Returns true for the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the root path.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `segment` appended.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Appends a segment in place.
    pub fn push(&mut self, segment: impl Into<PathSegment>) {
        self.segments.push(segment.into());
    }

    /// Splits into the parent segments and the last segment.
    pub fn split_last(&self) -> Option<(&[PathSegment], &PathSegment)> {
        self.segments
            .split_last()
            .map(|(last, parent)| (parent, last))
    }

    /// Returns true if `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &JsonPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// Returns true if either path is a prefix of the other.
    pub fn overlaps(&self, other: &JsonPath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

/// Formats a slice of segments as a JSON pointer.
pub(crate) fn pointer_of(segments: &[PathSegment]) -> String {
    let mut pointer = String::with_capacity(segments.len() * 8);
    for segment in segments {
        pointer.push('/');
        pointer.push_str(&segment.to_string());
    }
    pointer
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&pointer_of(&self.segments))
    }
}

impl FromStr for JsonPath {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for JsonPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for JsonPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pointer = String::deserialize(deserializer)?;
        JsonPath::parse(&pointer).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format() {
        let path = JsonPath::parse("/package-data/bitcoind/installed/0").unwrap();
        assert_eq!(path.len(), 4);
        assert_eq!(path.segments()[3], PathSegment::Index(0));
        assert_eq!(path.to_string(), "/package-data/bitcoind/installed/0");
    }

    #[test]
    fn root_pointer() {
        let path = JsonPath::parse("").unwrap();
        assert!(path.is_root());
        assert_eq!(path.to_string(), "");
    }

    #[test]
    fn pointer_must_start_with_slash() {
        assert!(matches!(
            JsonPath::parse("apps/x"),
            Err(ProtocolError::InvalidPointer(_))
        ));
    }

    #[test]
    fn escaping() {
        let path = JsonPath::new(["a/b", "c~d"]);
        assert_eq!(path.to_string(), "/a~1b/c~0d");
        assert_eq!(JsonPath::parse("/a~1b/c~0d").unwrap(), path);
        // ~01 decodes to ~1, not /
        let tricky = JsonPath::parse("/~01").unwrap();
        assert_eq!(tricky.segments()[0], PathSegment::Key("~1".into()));
    }

    #[test]
    fn segment_classification() {
        assert_eq!(PathSegment::parse("0"), PathSegment::Index(0));
        assert_eq!(PathSegment::parse("12"), PathSegment::Index(12));
        assert_eq!(PathSegment::parse("012"), PathSegment::Key("012".into()));
        assert_eq!(PathSegment::parse("-"), PathSegment::Key("-".into()));
        assert!(PathSegment::parse("-").is_append());
        assert_eq!(PathSegment::parse(""), PathSegment::Key("".into()));
    }

    #[test]
    fn built_and_parsed_paths_agree() {
        let built = JsonPath::new(["apps", "7", "status"]);
        let parsed: JsonPath = "/apps/7/status".parse().unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn prefix_relations() {
        let parent = JsonPath::new(["apps", "x"]);
        let child = parent.child("status");
        let other = JsonPath::new(["apps", "y"]);

        assert!(child.starts_with(&parent));
        assert!(!parent.starts_with(&child));
        assert!(parent.overlaps(&child));
        assert!(!child.overlaps(&other));
        assert!(child.starts_with(&JsonPath::root()));
    }

    #[test]
    fn serde_as_pointer_string() {
        let path = JsonPath::new(["server-info", "status"]);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"/server-info/status\"");
        let back: JsonPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
        assert!(serde_json::from_str::<JsonPath>("\"no-slash\"").is_err());
    }
}
