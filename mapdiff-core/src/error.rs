//! Errors raised before a batch reaches the store.

use thiserror::Error;

use crate::element::{Action, ElementRef};

/// Errors from parsing, placeholder validation and scheduling.
///
/// None of these ever involve the database; the batch is rejected as a
/// whole before any write.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    /// A record is structurally invalid.
    #[error("malformed change record {index}: {reason}")]
    MalformedBatch {
        /// Zero-based position of the offending record.
        index: usize,
        /// What was wrong with it.
        reason: MalformedReason,
    },
    /// A way or relation refers to a placeholder that no create defines.
    #[error("{parent} references {child}, which is not created in this batch")]
    UnresolvedReference {
        /// Element holding the reference.
        parent: ElementRef,
        /// The missing placeholder.
        child: ElementRef,
    },
    /// Newly created relations refer to each other in a loop.
    #[error("{relation} is part of a membership cycle through {member}")]
    CyclicReference {
        /// Relation whose placement could not be decided.
        relation: ElementRef,
        /// Member that closes the cycle.
        member: ElementRef,
    },
}

/// Reasons a change record is rejected as malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedReason {
    /// The action block name is not `create`, `modify` or `delete`.
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    /// A create used a non-negative id.
    #[error("create must use a negative placeholder id, got {id}")]
    CreateWithoutPlaceholder {
        /// The offending id.
        id: i64,
    },
    /// A modify or delete used a negative id.
    #[error("{action} must target an existing id, got placeholder {id}")]
    PlaceholderOnExisting {
        /// The action of the record.
        action: Action,
        /// The offending id.
        id: i64,
    },
    /// A modify or delete did not state the version it edits.
    #[error("version is required")]
    MissingVersion,
    /// The stated version is below 1.
    #[error("version {0} is not a valid version")]
    InvalidVersion(i64),
    /// A node create or modify carried no coordinates.
    #[error("node coordinates are required")]
    MissingCoordinates,
    /// A node's coordinates are not finite or out of range.
    #[error("coordinates lat={lat}, lon={lon} are out of range")]
    CoordinatesOutOfRange {
        /// Latitude as sent.
        lat: f64,
        /// Longitude as sent.
        lon: f64,
    },
    /// A way create or modify carried no nodes.
    #[error("way must reference at least one node")]
    EmptyWay,
    /// A way carries more nodes than allowed.
    #[error("way references {count} nodes, more than the maximum of {max}")]
    TooManyWayNodes {
        /// Node references sent.
        count: usize,
        /// Upper bound.
        max: usize,
    },
    /// A relation member names an unknown element type.
    #[error("unknown relation member type {0:?}")]
    UnknownMemberType(String),
    /// Two creates share one placeholder.
    #[error("placeholder {0} is created more than once")]
    DuplicatePlaceholder(ElementRef),
}
