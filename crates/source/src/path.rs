use crate::error::{Error, Result};
use faststr::FastStr;
use std::fmt;
use std::str::FromStr;

/// Slash-separated location in the tree, e.g. `users/chuck/groups`.
///
/// Segments are non-empty; the empty path is the tree root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<FastStr>,
}

impl TreePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse a slash-separated path. Leading and trailing slashes are
    /// tolerated (`/users/chuck/` equals `users/chuck`); empty segments in
    /// the middle are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(Error::InvalidPath(raw.to_string().into()));
            }
            segments.push(FastStr::new(segment));
        }
        Ok(Self { segments })
    }

    pub fn child(&self, key: impl Into<FastStr>) -> Self {
        let key = key.into();
        debug_assert!(!key.is_empty() && !key.contains('/'));
        let mut segments = self.segments.clone();
        segments.push(key);
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Last segment, `None` for the root.
    pub fn key(&self) -> Option<&FastStr> {
        self.segments.last()
    }

    pub fn segments(&self) -> &[FastStr] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// True when `self` is `other` or an ancestor of it.
    pub fn contains(&self, other: &TreePath) -> bool {
        other.segments.len() >= self.segments.len()
            && self.segments == other.segments[..self.segments.len()]
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
