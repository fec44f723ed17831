//! Normalise a raw upload into typed change records.
//!
//! Parsing is pure: no store access happens here. The output preserves
//! document order and stamps every record with the uploading user and the
//! target changeset.

mod raw;

use geo::Coord;
use log::{debug, warn};

use crate::{
    change::ChangeRecord,
    element::{Action, ElementBody, ElementKind, Member, Tags},
    error::{DiffError, MalformedReason},
};

pub use raw::{RawActionBlock, RawChangeBatch, RawElement, RawMember, RawTag, RawTypeGroup};

/// Upper bound on node references per way.
pub const MAX_WAY_NODES: usize = 2000;

/// Parse a raw batch into change records in document order.
///
/// Groups whose element type is not `node`, `way` or `relation` are
/// skipped with a warning. Any structurally invalid element rejects the
/// whole batch.
///
/// # Examples
/// ```
/// use mapdiff_core::{Action, ElementKind, RawChangeBatch, RawElement, parse_batch};
///
/// let batch = RawChangeBatch::default()
///     .with("create", "node", RawElement::node(-1, 51.5, -0.1).with_tag("amenity", "cafe"))
///     .with("delete", "way", RawElement::reference(7, 3));
/// let records = parse_batch(&batch, 42, 9)?;
///
/// assert_eq!(records.len(), 2);
/// assert_eq!(records[0].action, Action::Create);
/// assert_eq!(records[1].kind(), ElementKind::Way);
/// assert!(records.iter().all(|r| r.user_id == 42 && r.changeset_id == 9));
/// # Ok::<(), mapdiff_core::DiffError>(())
/// ```
pub fn parse_batch(
    batch: &RawChangeBatch,
    user_id: i64,
    changeset_id: i64,
) -> Result<Vec<ChangeRecord>, DiffError> {
    let mut records = Vec::with_capacity(batch.len());
    for block in &batch.blocks {
        let action = parse_action(&block.action).map_err(|reason| DiffError::MalformedBatch {
            index: records.len(),
            reason,
        })?;
        for group in &block.groups {
            let Ok(kind) = group.element_type.parse::<ElementKind>() else {
                warn!(
                    "Dropped {} element(s) of unsupported type {:?} from {} block",
                    group.elements.len(),
                    group.element_type,
                    action
                );
                continue;
            };
            for element in &group.elements {
                let index = records.len();
                let stamp = Stamp {
                    index,
                    user_id,
                    changeset_id,
                };
                let record = parse_element(stamp, action, kind, element)
                    .map_err(|reason| DiffError::MalformedBatch { index, reason })?;
                records.push(record);
            }
        }
    }
    debug!(
        "Parsed {} change record(s) for changeset {changeset_id}",
        records.len()
    );
    Ok(records)
}

#[derive(Clone, Copy)]
struct Stamp {
    index: usize,
    user_id: i64,
    changeset_id: i64,
}

fn parse_action(raw: &str) -> Result<Action, MalformedReason> {
    match raw {
        "create" => Ok(Action::Create),
        "modify" => Ok(Action::Modify),
        "delete" => Ok(Action::Delete),
        other => Err(MalformedReason::UnknownAction(other.to_owned())),
    }
}

fn parse_element(
    stamp: Stamp,
    action: Action,
    kind: ElementKind,
    element: &RawElement,
) -> Result<ChangeRecord, MalformedReason> {
    let version = check_identity(action, element)?;
    let body = match kind {
        ElementKind::Node => parse_node(action, element)?,
        ElementKind::Way => parse_way(action, element)?,
        ElementKind::Relation => parse_relation(element)?,
    };
    Ok(ChangeRecord {
        index: stamp.index,
        action,
        client_id: element.id,
        version,
        body,
        tags: collect_tags(element),
        changeset_id: stamp.changeset_id,
        user_id: stamp.user_id,
    })
}

/// Enforce the id sign convention and return the asserted version.
fn check_identity(action: Action, element: &RawElement) -> Result<Option<i64>, MalformedReason> {
    match action {
        Action::Create if element.id >= 0 => {
            Err(MalformedReason::CreateWithoutPlaceholder { id: element.id })
        }
        Action::Create => Ok(None),
        Action::Modify | Action::Delete if element.id < 0 => {
            Err(MalformedReason::PlaceholderOnExisting {
                action,
                id: element.id,
            })
        }
        Action::Modify | Action::Delete => match element.version {
            None => Err(MalformedReason::MissingVersion),
            Some(version) if version < 1 => Err(MalformedReason::InvalidVersion(version)),
            Some(version) => Ok(Some(version)),
        },
    }
}

fn parse_node(action: Action, element: &RawElement) -> Result<ElementBody, MalformedReason> {
    if action == Action::Delete {
        return Ok(ElementBody::Node { location: None });
    }
    let (Some(lat), Some(lon)) = (element.lat, element.lon) else {
        return Err(MalformedReason::MissingCoordinates);
    };
    let in_range = lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon);
    if !in_range {
        return Err(MalformedReason::CoordinatesOutOfRange { lat, lon });
    }
    Ok(ElementBody::Node {
        location: Some(Coord { x: lon, y: lat }),
    })
}

fn parse_way(action: Action, element: &RawElement) -> Result<ElementBody, MalformedReason> {
    if action != Action::Delete {
        if element.nodes.is_empty() {
            return Err(MalformedReason::EmptyWay);
        }
        if element.nodes.len() > MAX_WAY_NODES {
            return Err(MalformedReason::TooManyWayNodes {
                count: element.nodes.len(),
                max: MAX_WAY_NODES,
            });
        }
    }
    Ok(ElementBody::Way {
        nodes: element.nodes.clone(),
    })
}

fn parse_relation(element: &RawElement) -> Result<ElementBody, MalformedReason> {
    let members = element
        .members
        .iter()
        .map(|member| {
            member
                .member_type
                .parse::<ElementKind>()
                .map(|kind| Member::new(kind, member.reference, member.role.as_str()))
                .map_err(|_| MalformedReason::UnknownMemberType(member.member_type.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ElementBody::Relation { members })
}

fn collect_tags(element: &RawElement) -> Tags {
    let mut tags = Tags::new();
    for tag in &element.tags {
        tags.insert(tag.k.clone(), tag.v.clone());
    }
    tags
}
