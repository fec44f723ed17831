//! Execution order for a validated batch.
//!
//! Records are grouped by a lexicographic key of phase and entity kind:
//!
//! | phase            | kind order               |
//! |------------------|--------------------------|
//! | delete           | relation, way, node      |
//! | modify           | node, way, relation      |
//! | create           | node, way, relation      |
//! | deferred modify  | way, relation            |
//!
//! A modify whose children include a placeholder cannot run before the
//! create it points at, so it moves to the deferred phase. Each group is
//! then split into tiers: records within one tier are independent and may
//! run concurrently, and tiers run strictly in sequence.

use std::collections::HashMap;

use crate::{
    change::ChangeRecord,
    element::{Action, ElementKind, ElementRef},
    error::DiffError,
};

/// Records that may be applied concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    /// Action shared by every record in the tier.
    pub action: Action,
    /// Entity kind shared by every record in the tier.
    pub kind: ElementKind,
    /// Records in batch order.
    pub records: Vec<ChangeRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Delete,
    Modify,
    Create,
    DeferredModify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct GroupKey {
    phase: Phase,
    kind_rank: u8,
}

impl GroupKey {
    fn of(record: &ChangeRecord) -> Self {
        let phase = match record.action {
            Action::Delete => Phase::Delete,
            Action::Create => Phase::Create,
            Action::Modify if record.references_placeholders() => Phase::DeferredModify,
            Action::Modify => Phase::Modify,
        };
        let kind_rank = match (phase, record.kind()) {
            (Phase::Delete, ElementKind::Relation) => 0,
            (Phase::Delete, ElementKind::Way) => 1,
            (Phase::Delete, ElementKind::Node) => 2,
            (_, ElementKind::Node) => 0,
            (_, ElementKind::Way) => 1,
            (_, ElementKind::Relation) => 2,
        };
        Self { phase, kind_rank }
    }
}

/// Order validated records into execution tiers.
///
/// Records are expected to have passed
/// [`validate_references`](crate::validate_references). Within each group
/// a record lands in a later tier than any earlier record touching the same
/// element, and a created relation lands in a later tier than any created
/// relation it has as a member.
///
/// # Errors
/// Returns [`DiffError::CyclicReference`] when created relations refer to
/// each other in a loop.
///
/// # Examples
/// ```
/// use mapdiff_core::{Action, ElementKind, RawChangeBatch, RawElement, parse_batch, schedule};
///
/// let batch = RawChangeBatch::default()
///     .with("create", "way", RawElement::way(-1, vec![-1]))
///     .with("create", "node", RawElement::node(-1, 0.0, 0.0))
///     .with("delete", "node", RawElement::reference(5, 1));
/// let tiers = schedule(parse_batch(&batch, 1, 1)?)?;
///
/// let order: Vec<_> = tiers.iter().map(|t| (t.action, t.kind)).collect();
/// assert_eq!(
///     order,
///     [
///         (Action::Delete, ElementKind::Node),
///         (Action::Create, ElementKind::Node),
///         (Action::Create, ElementKind::Way),
///     ]
/// );
/// # Ok::<(), mapdiff_core::DiffError>(())
/// ```
pub fn schedule(records: Vec<ChangeRecord>) -> Result<Vec<Tier>, DiffError> {
    let mut keyed: Vec<_> = records
        .into_iter()
        .map(|record| (GroupKey::of(&record), record))
        .collect();
    keyed.sort_by_key(|(key, record)| (*key, record.index));

    let mut tiers = Vec::new();
    let mut group: Vec<ChangeRecord> = Vec::new();
    let mut current: Option<GroupKey> = None;
    for (key, record) in keyed {
        if current.is_some_and(|open| open != key) {
            tiers.extend(split_group(std::mem::take(&mut group))?);
        }
        current = Some(key);
        group.push(record);
    }
    tiers.extend(split_group(group)?);
    Ok(tiers)
}

fn split_group(group: Vec<ChangeRecord>) -> Result<Vec<Tier>, DiffError> {
    let Some(first) = group.first() else {
        return Ok(Vec::new());
    };
    let (action, kind) = (first.action, first.kind());
    let dependency_levels = if action == Action::Create && kind == ElementKind::Relation {
        relation_levels(&group)?
    } else {
        HashMap::new()
    };

    let mut levels: Vec<Vec<ChangeRecord>> = Vec::new();
    let mut last_level: HashMap<ElementRef, usize> = HashMap::new();
    for record in group {
        let element = record.element();
        let after_dependencies = dependency_levels.get(&element).copied().unwrap_or(0);
        let after_same_element = last_level.get(&element).map_or(0, |level| level + 1);
        let level = after_dependencies.max(after_same_element);
        last_level.insert(element, level);
        if levels.len() <= level {
            levels.resize_with(level + 1, Vec::new);
        }
        if let Some(tier) = levels.get_mut(level) {
            tier.push(record);
        }
    }
    Ok(levels
        .into_iter()
        .filter(|records| !records.is_empty())
        .map(|records| Tier {
            action,
            kind,
            records,
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Active,
    Done(usize),
}

/// Depth of each created relation in the graph of created relation members.
///
/// Walks the graph with an explicit stack so long membership chains do not
/// exhaust the call stack.
fn relation_levels(group: &[ChangeRecord]) -> Result<HashMap<ElementRef, usize>, DiffError> {
    let dependencies: HashMap<ElementRef, Vec<ElementRef>> = group
        .iter()
        .map(|record| {
            let members = record
                .body
                .children()
                .into_iter()
                .filter(|child| child.kind == ElementKind::Relation && child.is_placeholder())
                .collect();
            (record.element(), members)
        })
        .collect();

    let mut visits: HashMap<ElementRef, Visit> = HashMap::new();
    for record in group {
        let root = record.element();
        if visits.contains_key(&root) {
            continue;
        }
        visits.insert(root, Visit::Active);
        let mut stack = vec![(root, 0_usize)];
        while let Some(frame) = stack.last_mut() {
            let (relation, cursor) = *frame;
            let members = dependencies.get(&relation).map_or(&[][..], Vec::as_slice);
            if let Some(member) = members.get(cursor).copied() {
                frame.1 = cursor + 1;
                match visits.get(&member) {
                    Some(Visit::Active) => {
                        return Err(DiffError::CyclicReference { relation, member });
                    }
                    Some(Visit::Done(_)) => {}
                    None if dependencies.contains_key(&member) => {
                        visits.insert(member, Visit::Active);
                        stack.push((member, 0));
                    }
                    None => {}
                }
            } else {
                let level = members
                    .iter()
                    .filter_map(|member| match visits.get(member) {
                        Some(Visit::Done(level)) => Some(level + 1),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(0);
                visits.insert(relation, Visit::Done(level));
                stack.pop();
            }
        }
    }

    Ok(visits
        .into_iter()
        .filter_map(|(relation, visit)| match visit {
            Visit::Done(level) => Some((relation, level)),
            Visit::Active => None,
        })
        .collect())
}
