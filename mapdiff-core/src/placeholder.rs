//! Placeholder identifiers: up-front validation and late substitution.
//!
//! Resolution happens in two phases. [`validate_references`] runs over the
//! whole batch before anything is written, so a dangling placeholder aborts
//! the batch without touching the store. [`PlaceholderTable`] is then filled
//! in as creates are applied and consulted when later tiers write their
//! child lists.

use std::collections::{HashMap, HashSet};

use crate::{
    change::ChangeRecord,
    element::{Action, ElementBody, ElementKind, ElementRef, Member},
    error::{DiffError, MalformedReason},
};

/// Check that every placeholder reference in the batch is satisfiable.
///
/// Each `(kind, id)` placeholder may be created at most once, and every
/// negative child reference of a way or relation, whatever its action,
/// must match a create of the same kind and id.
///
/// # Errors
/// Returns [`DiffError::MalformedBatch`] with
/// [`MalformedReason::DuplicatePlaceholder`] for a repeated create and
/// [`DiffError::UnresolvedReference`] for a dangling reference.
pub fn validate_references(records: &[ChangeRecord]) -> Result<(), DiffError> {
    let mut created = HashSet::new();
    for record in records.iter().filter(|r| r.action == Action::Create) {
        let element = record.element();
        if !created.insert(element) {
            return Err(DiffError::MalformedBatch {
                index: record.index,
                reason: MalformedReason::DuplicatePlaceholder(element),
            });
        }
    }
    for record in records {
        let missing = record
            .body
            .children()
            .into_iter()
            .find(|child| child.is_placeholder() && !created.contains(child));
        if let Some(child) = missing {
            return Err(DiffError::UnresolvedReference {
                parent: record.element(),
                child,
            });
        }
    }
    Ok(())
}

/// Placeholder to persisted id mapping for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceholderTable {
    ids: HashMap<ElementRef, i64>,
}

impl PlaceholderTable {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the persisted id assigned to a placeholder.
    pub fn register(&mut self, placeholder: ElementRef, real_id: i64) {
        self.ids.insert(placeholder, real_id);
    }

    /// Number of registered placeholders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether nothing has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Map a child reference to a persisted id.
    ///
    /// Non-negative ids pass through unchanged.
    ///
    /// # Errors
    /// Returns [`DiffError::UnresolvedReference`] when `child` is a
    /// placeholder that has not been registered.
    ///
    /// # Examples
    /// ```
    /// use mapdiff_core::{ElementKind, ElementRef, PlaceholderTable};
    ///
    /// let way = ElementRef::new(ElementKind::Way, -1);
    /// let mut table = PlaceholderTable::new();
    /// table.register(ElementRef::new(ElementKind::Node, -1), 1001);
    ///
    /// assert_eq!(table.resolve(way, ElementRef::new(ElementKind::Node, -1))?, 1001);
    /// assert_eq!(table.resolve(way, ElementRef::new(ElementKind::Node, 7))?, 7);
    /// assert!(table.resolve(way, ElementRef::new(ElementKind::Way, -1)).is_err());
    /// # Ok::<(), mapdiff_core::DiffError>(())
    /// ```
    pub fn resolve(&self, parent: ElementRef, child: ElementRef) -> Result<i64, DiffError> {
        if !child.is_placeholder() {
            return Ok(child.id);
        }
        self.ids
            .get(&child)
            .copied()
            .ok_or(DiffError::UnresolvedReference { parent, child })
    }

    /// Rewrite every child reference of `body` to a persisted id.
    ///
    /// # Errors
    /// Propagates the first [`PlaceholderTable::resolve`] failure.
    pub fn resolve_body(
        &self,
        parent: ElementRef,
        body: &ElementBody,
    ) -> Result<ElementBody, DiffError> {
        match body {
            ElementBody::Node { location } => Ok(ElementBody::Node {
                location: *location,
            }),
            ElementBody::Way { nodes } => {
                let resolved = nodes
                    .iter()
                    .map(|id| self.resolve(parent, ElementRef::new(ElementKind::Node, *id)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ElementBody::Way { nodes: resolved })
            }
            ElementBody::Relation { members } => {
                let resolved = members
                    .iter()
                    .map(|member| {
                        self.resolve(parent, member.target).map(|id| Member {
                            target: ElementRef::new(member.target.kind, id),
                            role: member.role.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ElementBody::Relation { members: resolved })
            }
        }
    }
}
