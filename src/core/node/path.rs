// src/core/node/path.rs

//! Immutable addresses of nodes and properties in the device tree.

use std::fmt;

const SEPARATOR: char = '/';
const PROPERTY_SEPARATOR: char = '.';

/// A path in the device tree, stored as its segments.
///
/// The same value addresses a node (`/a/b/c`) or, read the other way, the
/// property `c` of node `/a/b` (`/a/b.c`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath {
    segments: Vec<String>,
}

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a slash-separated path. Empty segments are ignored, so `"/"`,
    /// `""` and `"//"` are all the root.
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split(SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Returns a new path with `name` appended.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.extend(self.segments.iter().cloned());
        segments.push(name.to_string());
        Self { segments }
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The last segment, or `/` for the root.
    pub fn name(&self) -> &str {
        self.segments.last().map_or("/", String::as_str)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, parent) = self.segments.split_last()?;
        Some(Self {
            segments: parent.to_vec(),
        })
    }

    /// `/a/b/c`; the root renders as `/`.
    pub fn as_node(&self) -> String {
        join(&self.segments)
    }

    /// `/a/b.c`. The root has no property form.
    pub fn as_property(&self) -> Option<String> {
        let (last, parent) = self.segments.split_last()?;
        let mut path = join(parent);
        path.push(PROPERTY_SEPARATOR);
        path.push_str(last);
        Some(path)
    }

    /// The node path of the parent, e.g. `/a/b` for `/a/b/c`.
    pub fn parent_node(&self) -> String {
        let parent = self.segments.split_last().map_or(&[][..], |(_, p)| p);
        join(parent)
    }
}

fn join(segments: &[String]) -> String {
    let mut path = String::from(SEPARATOR);
    path.push_str(&segments.join("/"));
    path
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_node())
    }
}

impl From<&str> for NodePath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}
