//! Response paths.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A path segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        Self::Field(s)
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        Self::Field(s.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        Self::Index(i)
    }
}

/// A location in a response, from the root down.
///
/// Serializes as the GraphQL `path` array, e.g. `["user", "friends", 0]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// The root path.
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path with a field segment appended.
    #[must_use]
    pub fn append_field(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Field(name.into()));
        Self(segments)
    }

    /// Returns a new path with an index segment appended.
    #[must_use]
    pub fn append_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    /// Returns the parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    /// Returns the last segment.
    #[must_use]
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Returns all segments.
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.0 {
            match segment {
                PathSegment::Field(name) => write!(f, "/{name}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append() {
        let path = Path::root().append_field("user").append_field("friends").append_index(0);
        assert_eq!(path.len(), 3);
        assert_eq!(path.last(), Some(&PathSegment::Index(0)));
        assert_eq!(path.to_string(), "/user/friends[0]");
    }

    #[test]
    fn test_parent() {
        let path: Path = ["user", "name"].into_iter().collect();
        assert_eq!(path.parent(), Some(Path::from_iter(["user"])));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn test_serialize() {
        let path = Path::root().append_field("feed").append_index(2);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["feed", 2]));
    }
}
