//! Errors surfaced by changeset operations.

use mapdiff_core::{DiffError, ElementRef, MalformedReason};
use thiserror::Error;

use crate::exec::ExecError;

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The request itself is wrong and will fail again unchanged.
    ClientError,
    /// The request conflicts with the current state of the store.
    Conflict,
    /// The store failed; the request may succeed on retry.
    ServerError,
}

/// Why a changeset refused a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChangesetRejection {
    /// No changeset has the requested id.
    #[error("changeset does not exist")]
    NotFound,
    /// The changeset belongs to somebody else.
    #[error("changeset is owned by user {owner}")]
    NotOwner {
        /// Owning user.
        owner: i64,
    },
    /// The changeset was closed.
    #[error("changeset was closed at {closed_at}")]
    Closed {
        /// Closing timestamp.
        closed_at: String,
    },
    /// Applying the batch would exceed the per-changeset change limit.
    #[error("changeset holds {current} changes; {requested} more exceeds the limit of {limit}")]
    TooManyChanges {
        /// Changes already recorded.
        current: i64,
        /// Changes in the rejected batch.
        requested: i64,
        /// Configured maximum.
        limit: i64,
    },
}

/// Errors returned by the apply engine and changeset lifecycle operations.
///
/// Every variant aborts the whole batch. Store failures keep the backend
/// error as their source.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// A record is structurally invalid.
    #[error("malformed change record {index}: {reason}")]
    MalformedBatch {
        /// Zero-based position of the offending record.
        index: usize,
        /// What was wrong with it.
        reason: MalformedReason,
    },
    /// A placeholder reference has no matching create.
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
    /// The target changeset cannot accept the write.
    #[error("changeset {changeset_id} rejected the upload: {reason}")]
    ChangesetInvalid {
        /// Requested changeset.
        changeset_id: i64,
        /// Why it was rejected.
        reason: ChangesetRejection,
    },
    /// The element was changed or deleted since the client read it.
    #[error(
        "version mismatch for {element}: supplied {supplied}, current {current}{}",
        deleted_suffix(.visible)
    )]
    VersionConflict {
        /// Element being edited.
        element: ElementRef,
        /// Version stated by the client.
        supplied: i64,
        /// Version held by the store.
        current: i64,
        /// Whether the current version is visible.
        visible: bool,
    },
    /// A modify or delete targeted an element that never existed.
    #[error("{element} does not exist")]
    ElementNotFound {
        /// Requested element.
        element: ElementRef,
    },
    /// A delete targeted an element still referenced by a visible parent.
    #[error("{element} is still used by {used_by}")]
    ElementInUse {
        /// Element being deleted.
        element: ElementRef,
        /// A visible way or relation referencing it.
        used_by: ElementRef,
    },
    /// A way or relation referenced a missing or deleted element.
    #[error("{parent} references {child}, which does not exist or is deleted")]
    MissingReference {
        /// Element holding the reference.
        parent: ElementRef,
        /// The unusable child.
        child: ElementRef,
    },
    /// The store failed.
    #[error("failed to {operation}")]
    WriteFailure {
        /// Label of the failing operation.
        operation: &'static str,
        /// Backend error.
        #[source]
        source: ExecError,
    },
}

fn deleted_suffix(visible: &bool) -> &'static str {
    if *visible { "" } else { " (deleted)" }
}

impl ChangeError {
    /// Classification of the error.
    ///
    /// # Examples
    /// ```
    /// use mapdiff_core::{ElementKind, ElementRef};
    /// use mapdiff_data::{ChangeError, ErrorCategory};
    ///
    /// let err = ChangeError::ElementNotFound {
    ///     element: ElementRef::new(ElementKind::Node, 4),
    /// };
    /// assert_eq!(err.category(), ErrorCategory::Conflict);
    /// ```
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedBatch { .. }
            | Self::UnresolvedReference { .. }
            | Self::CyclicReference { .. } => ErrorCategory::ClientError,
            Self::ChangesetInvalid { reason, .. } => match reason {
                ChangesetRejection::NotFound | ChangesetRejection::NotOwner { .. } => {
                    ErrorCategory::ClientError
                }
                ChangesetRejection::Closed { .. } | ChangesetRejection::TooManyChanges { .. } => {
                    ErrorCategory::Conflict
                }
            },
            Self::VersionConflict { .. }
            | Self::ElementNotFound { .. }
            | Self::ElementInUse { .. }
            | Self::MissingReference { .. } => ErrorCategory::Conflict,
            Self::WriteFailure { .. } => ErrorCategory::ServerError,
        }
    }

    pub(crate) fn write_failure(operation: &'static str) -> impl FnOnce(ExecError) -> Self {
        move |source| Self::WriteFailure { operation, source }
    }
}

impl From<DiffError> for ChangeError {
    fn from(error: DiffError) -> Self {
        match error {
            DiffError::MalformedBatch { index, reason } => Self::MalformedBatch { index, reason },
            DiffError::UnresolvedReference { parent, child } => {
                Self::UnresolvedReference { parent, child }
            }
            DiffError::CyclicReference { relation, member } => {
                Self::CyclicReference { relation, member }
            }
        }
    }
}
