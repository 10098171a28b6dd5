use std::fmt;
use std::str::FromStr;

/// Identity key of a navigator node.
///
/// A path is the list of local names from the forest root down to the node.
/// It is rendered as slash-joined segments; each segment is percent-encoded so
/// names containing `/` (or `%`) round-trip through `Display`/`FromStr`.
///
/// The root of the forest is the empty path, rendered as `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Local name of the node (last segment). `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(name.to_string());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Prefix of this path with the given number of segments.
    pub fn prefix(&self, depth: usize) -> Self {
        Self {
            segments: self.segments[..depth.min(self.segments.len())].to_vec(),
        }
    }

    /// Returns `true` if `ancestor` is this path or one of its ancestors.
    pub fn starts_with(&self, ancestor: &NodePath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    /// Moves this path from under `from` to under `to`.
    ///
    /// Returns `None` if this path is not `from` or a descendant of it.
    pub fn rebase(&self, from: &NodePath, to: &NodePath) -> Option<Self> {
        if !self.starts_with(from) {
            return None;
        }

        let mut segments = to.segments.clone();
        segments.extend(self.segments[from.segments.len()..].iter().cloned());
        Some(Self { segments })
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&urlencoding::encode(segment))?;
        }
        Ok(())
    }
}

/// Error returned when parsing a `NodePath` from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNodePathError {
    pub input: String,
}

impl fmt::Display for ParseNodePathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid node path: {:?}", self.input)
    }
}

impl std::error::Error for ParseNodePathError {}

impl FromStr for NodePath {
    type Err = ParseNodePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseNodePathError {
            input: s.to_string(),
        };

        let trimmed = s.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for raw in trimmed.split('/') {
            if raw.is_empty() {
                return Err(err());
            }
            let decoded = urlencoding::decode(raw).map_err(|_| err())?;
            segments.push(decoded.into_owned());
        }

        Ok(Self { segments })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(path: NodePath) {
        let encoded = path.to_string();
        let decoded: NodePath = encoded.parse().unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(path, decoded, "roundtrip failed for {encoded}");
    }

    #[test]
    fn root_is_empty_string() {
        assert_eq!(NodePath::root().to_string(), "");
        assert_eq!("".parse::<NodePath>().unwrap(), NodePath::root());
        assert_eq!("/".parse::<NodePath>().unwrap(), NodePath::root());
    }

    #[test]
    fn roundtrips_names_with_separators() {
        roundtrip(NodePath::from_segments(["prod", "pg/main", "public"]));
        roundtrip(NodePath::from_segments(["100%", "a b"]));
        roundtrip(NodePath::root().child("users"));
    }

    #[test]
    fn rejects_empty_segments() {
        assert!("a//b".parse::<NodePath>().is_err());
    }

    #[test]
    fn parent_and_prefix() {
        let path = NodePath::from_segments(["a", "b", "c"]);
        assert_eq!(path.parent(), Some(NodePath::from_segments(["a", "b"])));
        assert_eq!(path.prefix(1), NodePath::from_segments(["a"]));
        assert_eq!(path.name(), Some("c"));
        assert_eq!(NodePath::root().parent(), None);
    }

    #[test]
    fn rebase_moves_subtree_paths() {
        let path = NodePath::from_segments(["a", "b", "c"]);
        let from = NodePath::from_segments(["a", "b"]);
        let to = NodePath::from_segments(["x", "b"]);

        assert_eq!(
            path.rebase(&from, &to),
            Some(NodePath::from_segments(["x", "b", "c"]))
        );
        assert_eq!(path.rebase(&to, &from), None);
    }
}
