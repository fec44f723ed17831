//! Versioned writes for individual change records.
//!
//! Every create or modify appends an immutable history row, with its tags
//! and child list, and then replaces the current projection. Deletes only
//! retire the current row. All statements go through the batch's session
//! so they share its transaction.

use std::collections::BTreeSet;

use geo::{Coord, Rect};
use log::debug;
use mapdiff_core::{
    Action, ChangeRecord, ChangeResult, ElementBody, ElementKind, ElementRef, Member,
    PlaceholderTable, Tags, scale_coordinate, tile_for_point, unscale_coordinate,
};

use crate::{
    error::ChangeError,
    exec::{ExecError, Row, Session, Value},
};

/// State shared by every record of one batch.
#[derive(Debug, Clone)]
pub struct BatchContext {
    /// Placeholders registered by earlier tiers.
    pub placeholders: PlaceholderTable,
    /// Timestamp stamped on every row written by the batch.
    pub timestamp: String,
    /// Elements the batch deletes; they never hold a child in use.
    pub deleting: BTreeSet<ElementRef>,
}

/// Outcome of writing one record.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedChange {
    /// Per-element result for the caller.
    pub result: ChangeResult,
    /// Placeholder to register before the next tier, for creates.
    pub placeholder: Option<(ElementRef, i64)>,
    /// Node positions touched by the change, old and new.
    pub bounds: Option<Rect<f64>>,
}

/// Table and column names for one element kind.
#[derive(Debug, Clone, Copy)]
struct Tables {
    current: &'static str,
    history: &'static str,
    current_tags: &'static str,
    history_tags: &'static str,
    id_column: &'static str,
    sequence: &'static str,
}

const fn tables(kind: ElementKind) -> Tables {
    match kind {
        ElementKind::Node => Tables {
            current: "current_nodes",
            history: "nodes",
            current_tags: "current_node_tags",
            history_tags: "node_tags",
            id_column: "node_id",
            sequence: "node",
        },
        ElementKind::Way => Tables {
            current: "current_ways",
            history: "ways",
            current_tags: "current_way_tags",
            history_tags: "way_tags",
            id_column: "way_id",
            sequence: "way",
        },
        ElementKind::Relation => Tables {
            current: "current_relations",
            history: "relations",
            current_tags: "current_relation_tags",
            history_tags: "relation_tags",
            id_column: "relation_id",
            sequence: "relation",
        },
    }
}

/// Current row of an existing element.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CurrentState {
    version: i64,
    visible: bool,
    location: Option<Coord<f64>>,
}

/// Apply one record on `session`.
///
/// # Errors
/// Returns a conflict variant of [`ChangeError`] when the store state
/// forbids the change, and [`ChangeError::WriteFailure`] when a statement
/// fails.
pub async fn write_record<S>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
) -> Result<AppliedChange, ChangeError>
where
    S: Session + ?Sized,
{
    match record.action {
        Action::Create => create(session, context, record).await,
        Action::Modify => modify(session, context, record).await,
        Action::Delete => delete(session, context, record).await,
    }
}

async fn create<S: Session + ?Sized>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
) -> Result<AppliedChange, ChangeError> {
    let element = record.element();
    let body = context.placeholders.resolve_body(element, &record.body)?;
    ensure_children_visible(session, element, &body).await?;
    let id = allocate_id(session, record.kind()).await?;
    write_version(session, context, record, id, 1, &body).await?;
    debug!("Created {element} as {} {id}", record.kind());
    Ok(AppliedChange {
        result: ChangeResult {
            kind: record.kind(),
            old_id: record.client_id,
            new_id: id,
            new_version: 1,
        },
        placeholder: Some((element, id)),
        bounds: location_bounds([location_of(&body)]),
    })
}

async fn modify<S: Session + ?Sized>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
) -> Result<AppliedChange, ChangeError> {
    let element = record.element();
    let current = load_editable(session, record).await?;
    let body = context.placeholders.resolve_body(element, &record.body)?;
    ensure_children_visible(session, element, &body).await?;
    let version = latest_version(session, element).await? + 1;
    clear_current_state(session, element).await?;
    write_version(session, context, record, element.id, version, &body).await?;
    debug!("Modified {element} to version {version}");
    Ok(AppliedChange {
        result: ChangeResult {
            kind: record.kind(),
            old_id: element.id,
            new_id: element.id,
            new_version: version,
        },
        placeholder: None,
        bounds: location_bounds([current.location, location_of(&body)]),
    })
}

async fn delete<S: Session + ?Sized>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
) -> Result<AppliedChange, ChangeError> {
    let element = record.element();
    let current = load_editable(session, record).await?;
    if let Some(used_by) = find_visible_parent(session, element, &context.deleting).await? {
        return Err(ChangeError::ElementInUse { element, used_by });
    }
    let table = tables(element.kind);
    session
        .execute(
            &format!(
                "UPDATE {} SET visible = 0, changeset_id = ?1, timestamp = ?2 WHERE id = ?3",
                table.current
            ),
            &[
                Value::from(record.changeset_id),
                Value::from(context.timestamp.as_str()),
                Value::from(element.id),
            ],
        )
        .await
        .map_err(ChangeError::write_failure("retire current row"))?;
    debug!("Deleted {element} at version {}", current.version);
    Ok(AppliedChange {
        result: ChangeResult {
            kind: record.kind(),
            old_id: element.id,
            new_id: element.id,
            new_version: current.version,
        },
        placeholder: None,
        bounds: location_bounds([current.location]),
    })
}

/// Load the current row and check the version the client claims to edit.
async fn load_editable<S: Session + ?Sized>(
    session: &S,
    record: &ChangeRecord,
) -> Result<CurrentState, ChangeError> {
    let element = record.element();
    let current = load_current(session, element)
        .await?
        .ok_or(ChangeError::ElementNotFound { element })?;
    let supplied = record.version.unwrap_or_default();
    if !current.visible || current.version != supplied {
        return Err(ChangeError::VersionConflict {
            element,
            supplied,
            current: current.version,
            visible: current.visible,
        });
    }
    Ok(current)
}

async fn load_current<S: Session + ?Sized>(
    session: &S,
    element: ElementRef,
) -> Result<Option<CurrentState>, ChangeError> {
    let sql = match element.kind {
        ElementKind::Node => {
            "SELECT version, visible, latitude, longitude FROM current_nodes WHERE id = ?1"
        }
        ElementKind::Way => {
            "SELECT version, visible, NULL AS latitude, NULL AS longitude FROM current_ways WHERE id = ?1"
        }
        ElementKind::Relation => {
            "SELECT version, visible, NULL AS latitude, NULL AS longitude FROM current_relations WHERE id = ?1"
        }
    };
    let Some(row) = session
        .query_opt(sql, &[Value::from(element.id)])
        .await
        .map_err(ChangeError::write_failure("load current row"))?
    else {
        return Ok(None);
    };
    let read = || -> Result<CurrentState, ExecError> {
        let location = match (row.get_opt_i64("latitude")?, row.get_opt_i64("longitude")?) {
            (Some(lat), Some(lon)) => Some(Coord {
                x: unscale_coordinate(lon),
                y: unscale_coordinate(lat),
            }),
            _ => None,
        };
        Ok(CurrentState {
            version: row.get_i64("version")?,
            visible: row.get_bool("visible")?,
            location,
        })
    };
    read()
        .map(Some)
        .map_err(ChangeError::write_failure("read current row"))
}

async fn latest_version<S: Session + ?Sized>(
    session: &S,
    element: ElementRef,
) -> Result<i64, ChangeError> {
    let table = tables(element.kind);
    let sql = format!(
        "SELECT COALESCE(MAX(version), 0) AS latest FROM {} WHERE {} = ?1",
        table.history, table.id_column
    );
    session
        .query_one(&sql, &[Value::from(element.id)])
        .await
        .and_then(|row| row.get_i64("latest"))
        .map_err(ChangeError::write_failure("read latest version"))
}

async fn allocate_id<S: Session + ?Sized>(
    session: &S,
    kind: ElementKind,
) -> Result<i64, ChangeError> {
    allocate_from_sequence(session, tables(kind).sequence).await
}

/// Atomically advance a named sequence and return the new value.
pub(crate) async fn allocate_from_sequence<S: Session + ?Sized>(
    session: &S,
    sequence: &str,
) -> Result<i64, ChangeError> {
    session
        .query_one(
            "UPDATE id_sequences SET value = value + 1 WHERE name = ?1 RETURNING value",
            &[Value::from(sequence)],
        )
        .await
        .and_then(|row| row.get_i64("value"))
        .map_err(ChangeError::write_failure("allocate id"))
}

/// Every real child must exist and be visible.
async fn ensure_children_visible<S: Session + ?Sized>(
    session: &S,
    parent: ElementRef,
    body: &ElementBody,
) -> Result<(), ChangeError> {
    let children: BTreeSet<ElementRef> = body.children().into_iter().collect();
    for child in children {
        let visible = load_current(session, child)
            .await?
            .is_some_and(|state| state.visible);
        if !visible {
            return Err(ChangeError::MissingReference { parent, child });
        }
    }
    Ok(())
}

/// A visible way or relation that still references `element`.
///
/// Parents in `deleting` are retired by the same batch and are skipped, so
/// the outcome does not depend on which delete of a tier runs first.
async fn find_visible_parent<S: Session + ?Sized>(
    session: &S,
    element: ElementRef,
    deleting: &BTreeSet<ElementRef>,
) -> Result<Option<ElementRef>, ChangeError> {
    if element.kind == ElementKind::Node {
        let ways = session
            .query(
                "SELECT DISTINCT w.id AS parent FROM current_way_nodes AS wn
                    JOIN current_ways AS w ON w.id = wn.way_id
                    WHERE wn.node_id = ?1 AND w.visible = 1
                    ORDER BY w.id",
                &[Value::from(element.id)],
            )
            .await
            .map_err(ChangeError::write_failure("check way usage"))?;
        if let Some(way) = first_kept_parent(&ways, ElementKind::Way, deleting)
            .map_err(ChangeError::write_failure("read way usage"))?
        {
            return Ok(Some(way));
        }
    }
    let relations = session
        .query(
            "SELECT DISTINCT r.id AS parent FROM current_relation_members AS m
                JOIN current_relations AS r ON r.id = m.relation_id
                WHERE m.member_type = ?1 AND m.member_id = ?2 AND r.visible = 1
                ORDER BY r.id",
            &[Value::from(element.kind.as_str()), Value::from(element.id)],
        )
        .await
        .map_err(ChangeError::write_failure("check relation usage"))?;
    first_kept_parent(&relations, ElementKind::Relation, deleting)
        .map_err(ChangeError::write_failure("read relation usage"))
}

fn first_kept_parent(
    rows: &[Row],
    kind: ElementKind,
    deleting: &BTreeSet<ElementRef>,
) -> Result<Option<ElementRef>, ExecError> {
    for row in rows {
        let parent = ElementRef::new(kind, row.get_i64("parent")?);
        if !deleting.contains(&parent) {
            return Ok(Some(parent));
        }
    }
    Ok(None)
}

/// Remove the current tags and child list before a new version replaces them.
async fn clear_current_state<S: Session + ?Sized>(
    session: &S,
    element: ElementRef,
) -> Result<(), ChangeError> {
    let table = tables(element.kind);
    let id = [Value::from(element.id)];
    session
        .execute(
            &format!("DELETE FROM {} WHERE {} = ?1", table.current_tags, table.id_column),
            &id,
        )
        .await
        .map_err(ChangeError::write_failure("clear current tags"))?;
    let children = match element.kind {
        ElementKind::Node => None,
        ElementKind::Way => Some("DELETE FROM current_way_nodes WHERE way_id = ?1"),
        ElementKind::Relation => {
            Some("DELETE FROM current_relation_members WHERE relation_id = ?1")
        }
    };
    if let Some(sql) = children {
        session
            .execute(sql, &id)
            .await
            .map_err(ChangeError::write_failure("clear current children"))?;
    }
    Ok(())
}

/// Append the history row for `version` and make it the current state.
async fn write_version<S: Session + ?Sized>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
    id: i64,
    version: i64,
    body: &ElementBody,
) -> Result<(), ChangeError> {
    let element = ElementRef::new(record.kind(), id);
    write_history_row(session, context, record, element, version, body).await?;
    write_tags(session, element, Some(version), &record.tags).await?;
    write_children(session, element, Some(version), body).await?;
    write_current_row(session, context, record, element, version, body).await?;
    write_tags(session, element, None, &record.tags).await?;
    write_children(session, element, None, body).await
}

fn node_columns(body: &ElementBody) -> Option<[Value; 3]> {
    match body {
        ElementBody::Node {
            location: Some(location),
        } => Some([
            Value::from(scale_coordinate(location.y)),
            Value::from(scale_coordinate(location.x)),
            Value::from(tile_for_point(location.y, location.x)),
        ]),
        ElementBody::Node { location: None }
        | ElementBody::Way { .. }
        | ElementBody::Relation { .. } => None,
    }
}

async fn write_history_row<S: Session + ?Sized>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
    element: ElementRef,
    version: i64,
    body: &ElementBody,
) -> Result<(), ChangeError> {
    let common = [
        Value::from(element.id),
        Value::from(version),
        Value::from(record.changeset_id),
        Value::from(context.timestamp.as_str()),
    ];
    let result = match (element.kind, node_columns(body)) {
        (ElementKind::Node, Some(node)) => {
            let params: Vec<Value> = common.into_iter().chain(node).collect();
            session
                .execute(
                    "INSERT INTO nodes (node_id, version, changeset_id, timestamp, visible, latitude, longitude, tile)
                        VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)",
                    &params,
                )
                .await
        }
        (kind, _) => {
            let table = tables(kind);
            session
                .execute(
                    &format!(
                        "INSERT INTO {} ({}, version, changeset_id, timestamp, visible)
                            VALUES (?1, ?2, ?3, ?4, 1)",
                        table.history, table.id_column
                    ),
                    &common,
                )
                .await
        }
    };
    result
        .map(|_| ())
        .map_err(ChangeError::write_failure("insert history row"))
}

async fn write_current_row<S: Session + ?Sized>(
    session: &S,
    context: &BatchContext,
    record: &ChangeRecord,
    element: ElementRef,
    version: i64,
    body: &ElementBody,
) -> Result<(), ChangeError> {
    let common = [
        Value::from(element.id),
        Value::from(version),
        Value::from(record.changeset_id),
        Value::from(context.timestamp.as_str()),
    ];
    let result = match (element.kind, node_columns(body)) {
        (ElementKind::Node, Some(node)) => {
            let params: Vec<Value> = common.into_iter().chain(node).collect();
            session
                .execute(
                    "INSERT INTO current_nodes (id, version, changeset_id, timestamp, visible, latitude, longitude, tile)
                        VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7)
                        ON CONFLICT(id) DO UPDATE SET
                            version = excluded.version,
                            changeset_id = excluded.changeset_id,
                            timestamp = excluded.timestamp,
                            visible = 1,
                            latitude = excluded.latitude,
                            longitude = excluded.longitude,
                            tile = excluded.tile",
                    &params,
                )
                .await
        }
        (kind, _) => {
            let table = tables(kind);
            session
                .execute(
                    &format!(
                        "INSERT INTO {} (id, version, changeset_id, timestamp, visible)
                            VALUES (?1, ?2, ?3, ?4, 1)
                            ON CONFLICT(id) DO UPDATE SET
                                version = excluded.version,
                                changeset_id = excluded.changeset_id,
                                timestamp = excluded.timestamp,
                                visible = 1",
                        table.current
                    ),
                    &common,
                )
                .await
        }
    };
    result
        .map(|_| ())
        .map_err(ChangeError::write_failure("upsert current row"))
}

/// Write tags to the history table when `version` is set, else to current.
async fn write_tags<S: Session + ?Sized>(
    session: &S,
    element: ElementRef,
    version: Option<i64>,
    tags: &Tags,
) -> Result<(), ChangeError> {
    let table = tables(element.kind);
    let sql = match version {
        Some(_) => format!(
            "INSERT INTO {} ({}, version, k, v) VALUES (?1, ?2, ?3, ?4)",
            table.history_tags, table.id_column
        ),
        None => format!(
            "INSERT INTO {} ({}, k, v) VALUES (?1, ?2, ?3)",
            table.current_tags, table.id_column
        ),
    };
    for (key, value) in tags {
        let params: Vec<Value> = [Value::from(element.id)]
            .into_iter()
            .chain(version.map(Value::from))
            .chain([Value::from(key.as_str()), Value::from(value.as_str())])
            .collect();
        session
            .execute(&sql, &params)
            .await
            .map_err(ChangeError::write_failure("insert tag"))?;
    }
    Ok(())
}

/// Write way nodes or relation members, numbered from 1 in payload order.
async fn write_children<S: Session + ?Sized>(
    session: &S,
    element: ElementRef,
    version: Option<i64>,
    body: &ElementBody,
) -> Result<(), ChangeError> {
    match body {
        ElementBody::Node { .. } => Ok(()),
        ElementBody::Way { nodes } => {
            let sql = match version {
                Some(_) => "INSERT INTO way_nodes (way_id, version, node_id, sequence_id) VALUES (?1, ?2, ?3, ?4)",
                None => "INSERT INTO current_way_nodes (way_id, node_id, sequence_id) VALUES (?1, ?2, ?3)",
            };
            for (sequence, node) in (1_i64..).zip(nodes) {
                let params: Vec<Value> = [Value::from(element.id)]
                    .into_iter()
                    .chain(version.map(Value::from))
                    .chain([Value::from(*node), Value::from(sequence)])
                    .collect();
                session
                    .execute(sql, &params)
                    .await
                    .map_err(ChangeError::write_failure("insert way node"))?;
            }
            Ok(())
        }
        ElementBody::Relation { members } => {
            let sql = match version {
                Some(_) => "INSERT INTO relation_members (relation_id, version, member_type, member_id, member_role, sequence_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                None => "INSERT INTO current_relation_members (relation_id, member_type, member_id, member_role, sequence_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            };
            for (sequence, Member { target, role }) in (1_i64..).zip(members) {
                let params: Vec<Value> = [Value::from(element.id)]
                    .into_iter()
                    .chain(version.map(Value::from))
                    .chain([
                        Value::from(target.kind.as_str()),
                        Value::from(target.id),
                        Value::from(role.as_str()),
                        Value::from(sequence),
                    ])
                    .collect();
                session
                    .execute(sql, &params)
                    .await
                    .map_err(ChangeError::write_failure("insert relation member"))?;
            }
            Ok(())
        }
    }
}

const fn location_of(body: &ElementBody) -> Option<Coord<f64>> {
    match body {
        ElementBody::Node { location } => *location,
        ElementBody::Way { .. } | ElementBody::Relation { .. } => None,
    }
}

fn location_bounds<const N: usize>(locations: [Option<Coord<f64>>; N]) -> Option<Rect<f64>> {
    locations
        .into_iter()
        .flatten()
        .map(|coord| Rect::new(coord, coord))
        .reduce(merge_bounds)
}

/// Smallest rectangle covering both inputs.
pub(crate) fn merge_bounds(left: Rect<f64>, right: Rect<f64>) -> Rect<f64> {
    let (left_min, left_max) = (left.min(), left.max());
    let (right_min, right_max) = (right.min(), right.max());
    Rect::new(
        Coord {
            x: left_min.x.min(right_min.x),
            y: left_min.y.min(right_min.y),
        },
        Coord {
            x: left_max.x.max(right_max.x),
            y: left_max.y.max(right_max.y),
        },
    )
}
