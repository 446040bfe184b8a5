use std::fmt::{Debug, Display};
use std::sync::Arc;

/// Atomic reference-counted string used for type descriptions and labels.
pub(crate) type ArcStr = Arc<str>;

/// The direction a conversion artifact crosses the boundary in.
///
/// Every type that appears in a bridged signature needs up to two artifacts,
/// one per direction. The two are independent: a type can be convertible into
/// a script value while the reverse conversion is impossible, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    /// Host value to script value.
    ToScript,
    /// Script value to host value.
    FromScript,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ToScript => write!(f, "to-script"),
            Direction::FromScript => write!(f, "from-script"),
        }
    }
}

/// The identity of one conversion artifact: a type description paired with a
/// [`Direction`].
///
/// Keys are the unit of memoization and the vertices of the dependency graph.
/// They are totally ordered (direction first, then description) so that every
/// map keyed by them iterates deterministically.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    dir: Direction,
    ty: ArcStr,
}

impl Key {
    pub fn new(dir: Direction, ty: impl Into<ArcStr>) -> Self {
        Self { dir, ty: ty.into() }
    }

    /// Shorthand for a host → script conversion key.
    pub fn to_script(ty: impl Into<ArcStr>) -> Self {
        Self::new(Direction::ToScript, ty)
    }

    /// Shorthand for a script → host conversion key.
    pub fn from_script(ty: impl Into<ArcStr>) -> Self {
        Self::new(Direction::FromScript, ty)
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// The type description this key converts, e.g. `*time.Duration`.
    pub fn description(&self) -> &str {
        &self.ty
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.dir, self.ty)
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key({self})")
    }
}

/// A request for one artifact: a [`Key`] plus human-readable debug labels.
///
/// Labels describe *why* the artifact was requested ("field `spec` of struct
/// `Pod`") and only ever surface in diagnostics. They never participate in
/// identity; requests from independent requesters for the same key accumulate
/// their labels on the single node computed for it.
#[derive(Debug, Clone)]
pub struct Request {
    pub key: Key,
    pub labels: Vec<String>,
}

impl Request {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            labels: Vec::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }
}
