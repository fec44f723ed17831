//! Typed change records and their per-element results.

use crate::element::{Action, ElementBody, ElementKind, ElementRef, Tags};

/// One requested mutation, normalised from the raw batch.
///
/// Records are produced by [`crate::parse_batch`] and consumed exactly once
/// by the apply engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Zero-based position of the record in the batch.
    pub index: usize,
    /// Requested mutation.
    pub action: Action,
    /// Identifier as sent by the client. Negative for creates.
    pub client_id: i64,
    /// Version the client believes it is editing. `None` for creates.
    pub version: Option<i64>,
    /// Kind-specific payload.
    pub body: ElementBody,
    /// Tags to store with the new version.
    pub tags: Tags,
    /// Changeset the edit belongs to.
    pub changeset_id: i64,
    /// Authenticated user applying the edit.
    pub user_id: i64,
}

impl ChangeRecord {
    /// Entity kind of the record.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        self.body.kind()
    }

    /// The record's own element reference, using the client id.
    #[must_use]
    pub const fn element(&self) -> ElementRef {
        ElementRef::new(self.kind(), self.client_id)
    }

    /// Whether any child reference is a placeholder.
    #[must_use]
    pub fn references_placeholders(&self) -> bool {
        self.body
            .children()
            .iter()
            .any(|child| child.is_placeholder())
    }
}

/// Outcome of one successfully applied record.
///
/// `old_id` is the id as sent; for creates it is the placeholder. Deletes
/// report the retired version unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChangeResult {
    /// Entity kind.
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub kind: ElementKind,
    /// Identifier as sent by the client.
    pub old_id: i64,
    /// Persisted identifier.
    pub new_id: i64,
    /// Version after the change.
    pub new_version: i64,
}
