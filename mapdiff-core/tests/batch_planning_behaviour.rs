//! Behavioural tests for turning a raw batch into execution tiers.

use mapdiff_core::{
    Action, DiffError, ElementKind, ElementRef, RawChangeBatch, RawElement, RawMember, Tier,
    plan_batch,
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;

type Outcome = RefCell<Option<Result<Vec<Tier>, DiffError>>>;

#[fixture]
fn batch() -> RefCell<RawChangeBatch> {
    RefCell::new(RawChangeBatch::default())
}

#[fixture]
fn outcome() -> Outcome {
    RefCell::new(None)
}

fn planned(outcome: &Outcome) -> Vec<Tier> {
    outcome
        .borrow()
        .as_ref()
        .expect("planning was attempted")
        .as_ref()
        .expect("expected the batch to plan")
        .clone()
}

fn summary(tiers: &[Tier]) -> Vec<(Action, ElementKind, Vec<i64>)> {
    tiers
        .iter()
        .map(|tier| {
            let ids = tier.records.iter().map(|r| r.client_id).collect();
            (tier.action, tier.kind, ids)
        })
        .collect()
}

#[given("a batch that creates a node and a way over it and deletes an old node")]
fn mixed_batch(#[from(batch)] batch: &RefCell<RawChangeBatch>) {
    *batch.borrow_mut() = RawChangeBatch::default()
        .with("create", "way", RawElement::way(-1, vec![-1, 14]))
        .with("create", "node", RawElement::node(-1, 51.5, -0.1))
        .with("delete", "node", RawElement::reference(99, 4));
}

#[given("a batch whose way references an uncreated placeholder node")]
fn dangling_batch(#[from(batch)] batch: &RefCell<RawChangeBatch>) {
    *batch.borrow_mut() = RawChangeBatch::default()
        .with("create", "node", RawElement::node(-1, 0.0, 0.0))
        .with("create", "way", RawElement::way(-5, vec![-1, -2]));
}

#[given("a batch mixing a changeset element with a node create")]
fn unsupported_batch(#[from(batch)] batch: &RefCell<RawChangeBatch>) {
    *batch.borrow_mut() = RawChangeBatch::default()
        .with("create", "changeset", RawElement::reference(-1, 1))
        .with("create", "node", RawElement::node(-1, 1.0, 2.0));
}

#[given("a batch creating a relation that contains another new relation")]
fn nested_batch(#[from(batch)] batch: &RefCell<RawChangeBatch>) {
    *batch.borrow_mut() = RawChangeBatch::default()
        .with(
            "create",
            "relation",
            RawElement::relation(-1, vec![RawMember::new("relation", -2, "subarea")]),
        )
        .with(
            "create",
            "relation",
            RawElement::relation(-2, vec![RawMember::new("node", 8, "admin_centre")]),
        );
}

#[when("I plan the batch")]
fn plan(#[from(batch)] batch: &RefCell<RawChangeBatch>, #[from(outcome)] outcome: &Outcome) {
    let result = plan_batch(&batch.borrow(), 17, 3);
    *outcome.borrow_mut() = Some(result);
}

#[then("the tiers run delete node, create node, create way")]
fn tiers_in_order(#[from(outcome)] outcome: &Outcome) {
    assert_eq!(
        summary(&planned(outcome)),
        vec![
            (Action::Delete, ElementKind::Node, vec![99]),
            (Action::Create, ElementKind::Node, vec![-1]),
            (Action::Create, ElementKind::Way, vec![-1]),
        ]
    );
}

#[then("planning fails naming the way and the missing node")]
fn dangling_rejected(#[from(outcome)] outcome: &Outcome) {
    let guard = outcome.borrow();
    let result = guard.as_ref().expect("planning was attempted");
    assert_eq!(
        result.as_ref().expect_err("expected planning to fail"),
        &DiffError::UnresolvedReference {
            parent: ElementRef::new(ElementKind::Way, -5),
            child: ElementRef::new(ElementKind::Node, -2),
        }
    );
}

#[then("only the node create is planned")]
fn only_node(#[from(outcome)] outcome: &Outcome) {
    let tiers = planned(outcome);
    assert_eq!(
        summary(&tiers),
        vec![(Action::Create, ElementKind::Node, vec![-1])]
    );
    let record = tiers
        .first()
        .and_then(|tier| tier.records.first())
        .expect("one record planned");
    assert_eq!(record.index, 0, "dropped elements do not consume an index");
    assert_eq!((record.user_id, record.changeset_id), (17, 3));
}

#[then("the member relation is created in an earlier tier")]
fn member_first(#[from(outcome)] outcome: &Outcome) {
    assert_eq!(
        summary(&planned(outcome)),
        vec![
            (Action::Create, ElementKind::Relation, vec![-2]),
            (Action::Create, ElementKind::Relation, vec![-1]),
        ]
    );
}

#[scenario(path = "tests/features/batch_planning.feature", index = 0)]
fn scenario_dependency_order(batch: RefCell<RawChangeBatch>, outcome: Outcome) {
    let _ = (batch, outcome);
}

#[scenario(path = "tests/features/batch_planning.feature", index = 1)]
fn scenario_dangling_placeholder(batch: RefCell<RawChangeBatch>, outcome: Outcome) {
    let _ = (batch, outcome);
}

#[scenario(path = "tests/features/batch_planning.feature", index = 2)]
fn scenario_unsupported_types(batch: RefCell<RawChangeBatch>, outcome: Outcome) {
    let _ = (batch, outcome);
}

#[scenario(path = "tests/features/batch_planning.feature", index = 3)]
fn scenario_nested_relations(batch: RefCell<RawChangeBatch>, outcome: Outcome) {
    let _ = (batch, outcome);
}
