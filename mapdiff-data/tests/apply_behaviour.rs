//! Behavioural tests for applying change batches against SQLite.

mod support;

use mapdiff_core::{
    ElementKind, RawChangeBatch, RawElement, RawMember, scale_coordinate, tile_for_point,
};
use mapdiff_data::{ChangeError, ChangesetRejection, exec::Value};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use support::{UPLOADER, World};

#[fixture]
fn world() -> World {
    World::new()
}

fn two_nodes_and_a_way() -> RawChangeBatch {
    RawChangeBatch::default()
        .with("create", "node", RawElement::node(-1, 51.5, -0.1))
        .with("create", "node", RawElement::node(-2, 51.6, -0.2))
        .with("create", "way", RawElement::way(-1, vec![-1, -2]))
}

// --- Given steps ---

#[given("an open changeset")]
fn open_changeset(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER);
}

#[given("an open changeset holding a node at version 1")]
fn changeset_with_node(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER);
    world.seed(&RawChangeBatch::default().with(
        "create",
        "node",
        RawElement::node(-1, 51.5, -0.1).with_tag("amenity", "bench"),
    ));
}

#[given("an open changeset holding a way over two nodes")]
fn changeset_with_way(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER);
    world.seed(&two_nodes_and_a_way());
}

#[given("an open changeset holding a deleted node")]
fn changeset_with_deleted_node(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER);
    world.seed(&RawChangeBatch::default().with("create", "node", RawElement::node(-1, 51.5, -0.1)));
    world.seed(&RawChangeBatch::default().with("delete", "node", RawElement::reference(1, 1)));
}

#[given("an open changeset holding a relation nested in another relation")]
fn changeset_with_nested_relations(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER);
    world.seed(
        &RawChangeBatch::default()
            .with("create", "node", RawElement::node(-1, 51.5, -0.1))
            .with(
                "create",
                "relation",
                RawElement::relation(-1, vec![RawMember::new("node", -1, "stop")]),
            )
            .with(
                "create",
                "relation",
                RawElement::relation(-2, vec![RawMember::new("relation", -1, "route")]),
            ),
    );
    assert_eq!(
        world.column("SELECT member_id FROM current_relation_members WHERE relation_id = 2"),
        vec![1]
    );
}

#[given("a closed changeset")]
fn closed_changeset(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER);
    world.close_changeset();
}

#[given("an open changeset owned by another user")]
fn foreign_changeset(#[from(world)] world: &World) {
    world.open_changeset_for(UPLOADER + 1);
}

#[given("an open changeset limited to {limit} changes")]
fn limited_changeset(#[from(world)] world: &World, limit: i64) {
    world.open_changeset_for(UPLOADER);
    world.limit.set(limit);
}

#[given("the store fails when writing the history of node {id}")]
fn failing_history(#[from(world)] world: &World, id: i64) {
    *world.fault.borrow_mut() = Some(("INSERT INTO nodes", Value::from(id)));
}

// --- When steps ---

#[when("I upload two new nodes and a way over them")]
fn upload_way(#[from(world)] world: &World) {
    world.upload(&two_nodes_and_a_way());
}

#[when("I move the node claiming version {version}")]
fn move_node(#[from(world)] world: &World, version: i64) {
    world.upload(&RawChangeBatch::default().with(
        "modify",
        "node",
        RawElement::node(1, 51.55, -0.12).with_version(version),
    ));
}

#[when("I create a node and move the existing node claiming version {version}")]
fn create_and_move(#[from(world)] world: &World, version: i64) {
    world.upload(
        &RawChangeBatch::default()
            .with("create", "node", RawElement::node(-1, 10.0, 10.0))
            .with(
                "modify",
                "node",
                RawElement::node(1, 51.55, -0.12).with_version(version),
            ),
    );
}

#[when("I delete the node claiming version {version}")]
fn delete_node(#[from(world)] world: &World, version: i64) {
    world.upload(&RawChangeBatch::default().with(
        "delete",
        "node",
        RawElement::reference(1, version),
    ));
}

#[when("I delete the outer relation and then the inner relation")]
fn delete_nested_relations(#[from(world)] world: &World) {
    world.upload(
        &RawChangeBatch::default()
            .with("delete", "relation", RawElement::reference(2, 1))
            .with("delete", "relation", RawElement::reference(1, 1)),
    );
}

#[when("I delete only the inner relation")]
fn delete_inner_relation(#[from(world)] world: &World) {
    world.upload(&RawChangeBatch::default().with(
        "delete",
        "relation",
        RawElement::reference(1, 1),
    ));
}

#[when("I upload a way over a placeholder node that is never created")]
fn way_over_unknown_placeholder(#[from(world)] world: &World) {
    world.upload(
        &RawChangeBatch::default()
            .with("create", "node", RawElement::node(-1, 51.5, -0.1))
            .with("create", "way", RawElement::way(-1, vec![-1, -2])),
    );
}

#[when("I delete the first node of the way")]
fn delete_way_node(#[from(world)] world: &World) {
    let first =
        world.scalar("SELECT node_id FROM current_way_nodes WHERE way_id = 1 AND sequence_id = 1");
    world.upload(&RawChangeBatch::default().with("delete", "node", RawElement::reference(first, 1)));
}

#[when("I create a way over the deleted node")]
fn way_over_deleted(#[from(world)] world: &World) {
    world.upload(
        &RawChangeBatch::default()
            .with("create", "node", RawElement::node(-1, 51.5, -0.1))
            .with("create", "way", RawElement::way(-1, vec![-1, 1])),
    );
}

#[when("I upload an empty batch")]
fn upload_empty(#[from(world)] world: &World) {
    world.upload(&RawChangeBatch::default());
}

#[when("I upload three new nodes")]
fn upload_three_nodes(#[from(world)] world: &World) {
    world.upload(
        &RawChangeBatch::default()
            .with("create", "node", RawElement::node(-1, 1.0, 1.0))
            .with("create", "node", RawElement::node(-2, 2.0, 2.0))
            .with("create", "node", RawElement::node(-3, 3.0, 3.0)),
    );
}

// --- Then steps ---

#[then("every placeholder maps to a fresh id at version 1")]
fn placeholders_mapped(#[from(world)] world: &World) {
    let results = world.results();
    let summary: Vec<(ElementKind, i64, i64)> = results
        .iter()
        .map(|r| (r.kind, r.old_id, r.new_version))
        .collect();
    assert_eq!(
        summary,
        vec![
            (ElementKind::Node, -1, 1),
            (ElementKind::Node, -2, 1),
            (ElementKind::Way, -1, 1),
        ]
    );
    let mut node_ids: Vec<i64> = results.iter().take(2).map(|r| r.new_id).collect();
    node_ids.sort_unstable();
    assert_eq!(node_ids, vec![1, 2]);
    assert_eq!(results.get(2).map(|r| r.new_id), Some(1));
}

#[then("the way lists the new nodes in order")]
fn way_nodes_in_order(#[from(world)] world: &World) {
    let expected: Vec<i64> = world.results().iter().take(2).map(|r| r.new_id).collect();
    let stored =
        world.column("SELECT node_id FROM current_way_nodes WHERE way_id = 1 ORDER BY sequence_id");
    assert_eq!(stored, expected);
    let history = world.column(
        "SELECT node_id FROM way_nodes WHERE way_id = 1 AND version = 1 ORDER BY sequence_id",
    );
    assert_eq!(history, expected);
}

#[then("the node is reported at version {version}")]
fn node_version(#[from(world)] world: &World, version: i64) {
    let results = world.results();
    let result = results.first().expect("one result");
    assert_eq!((result.old_id, result.new_id, result.new_version), (1, 1, version));
    assert_eq!(
        world.scalar("SELECT version FROM current_nodes WHERE id = 1"),
        version
    );
}

#[then("the node keeps both versions in history")]
fn node_history(#[from(world)] world: &World) {
    assert_eq!(
        world.column("SELECT version FROM nodes WHERE node_id = 1 ORDER BY version"),
        vec![1, 2]
    );
}

#[then("the first version is unchanged")]
fn first_version_unchanged(#[from(world)] world: &World) {
    let stored = world.column(
        "SELECT value FROM (
            SELECT 1 AS position, latitude AS value FROM nodes WHERE node_id = 1 AND version = 1
            UNION ALL
            SELECT 2, longitude FROM nodes WHERE node_id = 1 AND version = 1
            UNION ALL
            SELECT 3, tile FROM nodes WHERE node_id = 1 AND version = 1
        ) ORDER BY position",
    );
    assert_eq!(
        stored,
        vec![
            scale_coordinate(51.5),
            scale_coordinate(-0.1),
            i64::from(tile_for_point(51.5, -0.1)),
        ]
    );
    assert_eq!(
        world.pairs("SELECT k, v FROM node_tags WHERE node_id = 1 AND version = 1"),
        vec![("amenity".to_owned(), "bench".to_owned())]
    );
    assert!(
        world
            .pairs("SELECT k, v FROM current_node_tags WHERE node_id = 1")
            .is_empty(),
        "the new version carries no tags"
    );
}

#[then("the node is hidden without a new history row")]
fn node_hidden(#[from(world)] world: &World) {
    assert_eq!(
        world.scalar("SELECT visible FROM current_nodes WHERE id = 1"),
        0
    );
    assert_eq!(
        world.scalar("SELECT COUNT(*) FROM nodes WHERE node_id = 1"),
        world.history_before.get()
    );
    assert_eq!(
        world.column("SELECT version FROM nodes WHERE node_id = 1"),
        vec![1]
    );
}

#[then("the upload fails because the node is already deleted")]
fn node_already_deleted(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::VersionConflict {
                element,
                supplied: 1,
                current: 1,
                visible: false,
            } if element.kind == ElementKind::Node && element.id == 1
        )
    });
}

#[then("both relations are retired")]
fn relations_retired(#[from(world)] world: &World) {
    let results = world.results();
    let summary: Vec<(ElementKind, i64, i64)> = results
        .iter()
        .map(|r| (r.kind, r.new_id, r.new_version))
        .collect();
    assert_eq!(
        summary,
        vec![(ElementKind::Relation, 2, 1), (ElementKind::Relation, 1, 1)]
    );
    assert_eq!(
        world.scalar("SELECT COUNT(*) FROM current_relations WHERE visible = 1"),
        0
    );
    assert_eq!(
        world.scalar("SELECT visible FROM current_nodes WHERE id = 1"),
        1
    );
}

#[then("the upload fails because the outer relation still uses it")]
fn inner_relation_in_use(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::ElementInUse { element, used_by }
                if element.kind == ElementKind::Relation
                    && element.id == 1
                    && used_by.kind == ElementKind::Relation
                    && used_by.id == 2
        )
    });
    assert_eq!(
        world.scalar("SELECT COUNT(*) FROM current_relations WHERE visible = 1"),
        2
    );
}

#[then("the upload fails with an unresolved reference to node {id}")]
fn unresolved_reference(#[from(world)] world: &World, id: i64) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::UnresolvedReference { parent, child }
                if parent.kind == ElementKind::Way
                    && parent.id == -1
                    && child.kind == ElementKind::Node
                    && child.id == id
        )
    });
}

#[then("the upload fails with a version conflict")]
fn version_conflict(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::VersionConflict {
                supplied: 3,
                current: 1,
                visible: true,
                ..
            }
        )
    });
}

#[then("the batch left no new node behind")]
fn nothing_written(#[from(world)] world: &World) {
    assert_eq!(
        world.scalar("SELECT COUNT(*) FROM nodes"),
        world.history_before.get()
    );
    assert_eq!(
        world.statements.borrow().last().map(String::as_str),
        Some("ROLLBACK")
    );
}

#[then("the upload fails because the node is in use")]
fn node_in_use(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::ElementInUse { used_by, .. }
                if used_by.kind == ElementKind::Way && used_by.id == 1
        )
    });
    assert_eq!(
        world.scalar("SELECT COUNT(*) FROM current_nodes WHERE visible = 1"),
        2
    );
}

#[then("the upload fails with a missing reference")]
fn missing_reference(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::MissingReference { child, .. }
                if child.kind == ElementKind::Node && child.id == 1
        )
    });
    assert_eq!(world.scalar("SELECT COUNT(*) FROM current_ways"), 0);
}

#[then("the upload is refused because the changeset is closed")]
fn refused_closed(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::ChangesetInvalid {
                reason: ChangesetRejection::Closed { .. },
                ..
            }
        )
    });
}

#[then("the upload is refused because the changeset belongs to someone else")]
fn refused_foreign(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::ChangesetInvalid {
                reason: ChangesetRejection::NotOwner { owner },
                ..
            } if *owner == UPLOADER + 1
        )
    });
}

#[then("the upload is refused for holding too many changes")]
fn refused_limit(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::ChangesetInvalid {
                reason: ChangesetRejection::TooManyChanges {
                    current: 0,
                    requested: 3,
                    limit: 2
                },
                ..
            }
        )
    });
}

#[then("no transaction was opened")]
fn no_transaction(#[from(world)] world: &World) {
    let statements = world.statements.borrow();
    assert!(
        !statements.iter().any(|sql| sql == "BEGIN"),
        "unexpected transaction: {statements:?}"
    );
    assert_eq!(world.scalar("SELECT COUNT(*) FROM current_nodes"), 0);
}

#[then("the upload returns no results")]
fn no_results(#[from(world)] world: &World) {
    assert!(world.results().is_empty());
}

#[then("the upload fails with a write failure")]
fn write_failure(#[from(world)] world: &World) {
    world.assert_failed(|err| {
        matches!(
            err,
            ChangeError::WriteFailure {
                operation: "insert history row",
                ..
            }
        )
    });
}

#[then("the other two nodes finished before the rollback")]
fn siblings_finished(#[from(world)] world: &World) {
    let statements = world.statements.borrow();
    let current_writes = statements
        .iter()
        .filter(|sql| sql.starts_with("INSERT INTO current_nodes"))
        .count();
    assert_eq!(current_writes, 2, "statements: {statements:?}");
}

#[then("the changeset holds {count} changes")]
fn changeset_count(#[from(world)] world: &World, count: i64) {
    let id = world.changeset_id.get();
    assert_eq!(
        world.scalar(&format!("SELECT num_changes FROM changesets WHERE id = {id}")),
        count
    );
}

#[then("the changeset bounds cover both nodes")]
fn changeset_bounds(#[from(world)] world: &World) {
    let id = world.changeset_id.get();
    let corner = |column: &str| {
        world.scalar(&format!("SELECT {column} FROM changesets WHERE id = {id}"))
    };
    assert_eq!(
        (
            corner("min_lat"),
            corner("max_lat"),
            corner("min_lon"),
            corner("max_lon")
        ),
        (515_000_000, 516_000_000, -2_000_000, -1_000_000)
    );
}

// --- Scenario registrations ---

macro_rules! register_scenario {
    ($fn_name:ident, $index:literal) => {
        #[scenario(path = "tests/features/apply_changes.feature", index = $index)]
        fn $fn_name(world: World) {
            let _ = world;
        }
    };
}

register_scenario!(placeholders_resolve, 0);
register_scenario!(modify_appends_version, 1);
register_scenario!(stale_version_rolls_back, 2);
register_scenario!(in_use_delete_refused, 3);
register_scenario!(deleted_reference_refused, 4);
register_scenario!(closed_changeset_refused, 5);
register_scenario!(foreign_changeset_refused, 6);
register_scenario!(empty_batch_is_noop, 7);
register_scenario!(siblings_finish_before_rollback, 8);
register_scenario!(uploads_are_counted, 9);
register_scenario!(limit_is_enforced, 10);
register_scenario!(delete_hides_node, 11);
register_scenario!(deleted_node_refuses_delete, 12);
register_scenario!(deleted_node_refuses_modify, 13);
register_scenario!(nested_relations_delete_together, 14);
register_scenario!(inner_relation_in_use_refused, 15);
register_scenario!(unknown_placeholder_refused, 16);
