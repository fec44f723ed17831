//! Entity kinds, actions and per-kind payloads carried by change records.

use std::{collections::BTreeMap, fmt, str::FromStr};

use geo::Coord;
use thiserror::Error;

/// Free-form OpenStreetMap key/value tags.
///
/// A `BTreeMap` keeps tag writes in a stable key order.
pub type Tags = BTreeMap<String, String>;

/// The three kinds of map entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ElementKind {
    /// A point with coordinates.
    Node,
    /// An ordered list of nodes.
    Way,
    /// An ordered list of typed, roled members.
    Relation,
}

impl ElementKind {
    /// Lower-case name used on the wire and in the member tables.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Way => "way",
            Self::Relation => "relation",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string does not name an [`ElementKind`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown element type {0:?}")]
pub struct UnknownElementKind(pub String);

impl FromStr for ElementKind {
    type Err = UnknownElementKind;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "node" => Ok(Self::Node),
            "way" => Ok(Self::Way),
            "relation" => Ok(Self::Relation),
            other => Err(UnknownElementKind(other.to_owned())),
        }
    }
}

/// The mutation requested for one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Action {
    /// Create a new element under a placeholder id.
    Create,
    /// Replace the state of an existing element.
    Modify,
    /// Retire an existing element.
    Delete,
}

impl Action {
    /// Lower-case name used on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed element identifier, possibly a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElementRef {
    /// Entity kind.
    pub kind: ElementKind,
    /// Identifier; negative values are batch-local placeholders.
    pub id: i64,
}

impl ElementRef {
    /// Construct a reference.
    #[must_use]
    pub const fn new(kind: ElementKind, id: i64) -> Self {
        Self { kind, id }
    }

    /// Whether the identifier is a batch-local placeholder.
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        self.id < 0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// One member of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// The referenced element.
    pub target: ElementRef,
    /// Free-form role, possibly empty.
    pub role: String,
}

impl Member {
    /// Construct a member.
    pub fn new(kind: ElementKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            target: ElementRef::new(kind, id),
            role: role.into(),
        }
    }
}

/// Kind-specific payload of a change record.
///
/// Coordinates are WGS84 with `x = longitude` and `y = latitude`. A node
/// only lacks a location when the record is a delete.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementBody {
    /// Node payload.
    Node {
        /// Position of the node.
        location: Option<Coord<f64>>,
    },
    /// Way payload.
    Way {
        /// Ordered node references.
        nodes: Vec<i64>,
    },
    /// Relation payload.
    Relation {
        /// Ordered members.
        members: Vec<Member>,
    },
}

impl ElementBody {
    /// The entity kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::Node { .. } => ElementKind::Node,
            Self::Way { .. } => ElementKind::Way,
            Self::Relation { .. } => ElementKind::Relation,
        }
    }

    /// Child references in payload order.
    ///
    /// Ways yield node references; relations yield their members' targets.
    #[must_use]
    pub fn children(&self) -> Vec<ElementRef> {
        match self {
            Self::Node { .. } => Vec::new(),
            Self::Way { nodes } => nodes
                .iter()
                .map(|id| ElementRef::new(ElementKind::Node, *id))
                .collect(),
            Self::Relation { members } => members.iter().map(|member| member.target).collect(),
        }
    }
}
