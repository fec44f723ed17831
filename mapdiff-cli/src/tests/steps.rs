//! Behaviour-driven step definitions driving the CLI command scenarios.

use super::helpers::{NODES_AND_WAY, Workspace, write_utf8};
use super::*;
use mapdiff_core::{ChangeResult, ElementKind};
use mapdiff_data::{ChangeError, ChangesetRejection};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::{Cell, RefCell};

/// Aggregates CLI scenario state so each step only needs a single world
/// argument.
#[derive(Debug)]
struct CliWorld {
    workspace: Workspace,
    changeset_id: Cell<i64>,
    stdout: RefCell<Vec<u8>>,
    result: RefCell<Option<Result<(), CliError>>>,
}

impl CliWorld {
    fn new() -> Self {
        Self {
            workspace: Workspace::new(),
            changeset_id: Cell::new(0),
            stdout: RefCell::new(Vec::new()),
            result: RefCell::new(None),
        }
    }

    fn database_args(&self) -> [String; 2] {
        [
            format!("--{ARG_DATABASE}"),
            self.workspace.database.as_str().to_owned(),
        ]
    }

    /// Parse and run `argv`, capturing stdout.
    fn invoke(&self, argv: Vec<String>) -> Result<Vec<u8>, CliError> {
        let cli = Cli::try_parse_from(argv)?;
        let mut buffer = Vec::new();
        dispatch(cli.command, &mut buffer)?;
        Ok(buffer)
    }

    fn error(&self) -> std::cell::Ref<'_, CliError> {
        std::cell::Ref::map(self.result.borrow(), |result| {
            result
                .as_ref()
                .expect("result recorded")
                .as_ref()
                .expect_err("expected error")
        })
    }

    fn rejection(&self) -> ChangesetRejection {
        match &*self.error() {
            CliError::Change(source) => match source.as_ref() {
                ChangeError::ChangesetInvalid { reason, .. } => reason.clone(),
                other => panic!("expected ChangesetInvalid, found {other:?}"),
            },
            other => panic!("expected a change error, found {other:?}"),
        }
    }
}

#[fixture]
fn world() -> CliWorld {
    CliWorld::new()
}

#[given("an initialised database")]
fn initialised_database(#[from(world)] world: &CliWorld) {
    let mut argv = vec!["mapdiff".to_owned(), "init".to_owned()];
    argv.extend(world.database_args());
    let output = world.invoke(argv).expect("init should succeed");
    let report: serde_json::Value = serde_json::from_slice(&output).expect("init prints JSON");
    assert_eq!(report["schema_version"], 1);
}

#[given("an open changeset for user {user}")]
fn open_changeset_for(#[from(world)] world: &CliWorld, user: i64) {
    let mut argv = vec!["mapdiff".to_owned(), "open-changeset".to_owned()];
    argv.extend(world.database_args());
    argv.extend([
        format!("--{ARG_USER}"),
        user.to_string(),
        format!("--{ARG_TAG}"),
        "comment=Add footpath".to_owned(),
    ]);
    let output = world.invoke(argv).expect("open-changeset should succeed");
    let report: serde_json::Value =
        serde_json::from_slice(&output).expect("open-changeset prints JSON");
    let id = report["changeset_id"].as_i64().expect("changeset id");
    world.changeset_id.set(id);
}

#[given("the changeset is closed by user {user}")]
fn close_changeset_by(#[from(world)] world: &CliWorld, user: i64) {
    let mut argv = vec!["mapdiff".to_owned(), "close-changeset".to_owned()];
    argv.extend(world.database_args());
    argv.extend([
        format!("--{ARG_USER}"),
        user.to_string(),
        format!("--{ARG_CHANGESET}"),
        world.changeset_id.get().to_string(),
    ]);
    world.invoke(argv).expect("close-changeset should succeed");
}

#[given("a diff creating two nodes and a way")]
fn diff_with_way(#[from(world)] world: &CliWorld) {
    write_utf8(&world.workspace.diff, NODES_AND_WAY.as_bytes());
}

#[given("a diff file containing invalid JSON")]
fn diff_invalid_json(#[from(world)] world: &CliWorld) {
    write_utf8(&world.workspace.diff, b"{ not valid json");
}

fn run_upload_command(world: &CliWorld, user: Option<i64>) {
    let mut argv = vec![
        "mapdiff".to_owned(),
        "upload".to_owned(),
        world.workspace.diff.as_str().to_owned(),
    ];
    argv.extend(world.database_args());
    argv.extend([
        format!("--{ARG_CHANGESET}"),
        world.changeset_id.get().to_string(),
    ]);
    if let Some(id) = user {
        argv.extend([format!("--{ARG_USER}"), id.to_string()]);
    }
    let outcome = world.invoke(argv).map(|output| {
        world.stdout.replace(output);
    });
    world.result.replace(Some(outcome));
}

#[when("I run the upload command as user {user}")]
fn upload_as(#[from(world)] world: &CliWorld, user: i64) {
    run_upload_command(world, Some(user));
}

#[when("I run the upload command without a user")]
fn upload_without_user(#[from(world)] world: &CliWorld) {
    run_upload_command(world, None);
}

#[then("the command prints a result for every element")]
fn prints_results(#[from(world)] world: &CliWorld) {
    let borrowed = world.result.borrow();
    borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect("expected success");
    let results: Vec<ChangeResult> =
        serde_json::from_slice(&world.stdout.borrow()).expect("output should be JSON results");
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
}

#[then("the command fails because the diff JSON is invalid")]
fn fails_invalid_json(#[from(world)] world: &CliWorld) {
    match &*world.error() {
        CliError::ParseDiff { path, .. } => assert_eq!(path, &world.workspace.diff),
        other => panic!("expected ParseDiff, found {other:?}"),
    }
}

#[then("the command reports that the \"user\" flag is missing")]
fn reports_missing_user(#[from(world)] world: &CliWorld) {
    match &*world.error() {
        CliError::MissingArgument { field, env } => {
            assert_eq!(*field, ARG_USER);
            assert_eq!(*env, ENV_UPLOAD_USER);
        }
        other => panic!("expected MissingArgument, found {other:?}"),
    }
}

#[then("the command fails because the changeset belongs to another user")]
fn fails_not_owner(#[from(world)] world: &CliWorld) {
    assert_eq!(world.rejection(), ChangesetRejection::NotOwner { owner: 7 });
}

#[then("the command fails because the changeset is closed")]
fn fails_closed(#[from(world)] world: &CliWorld) {
    assert!(matches!(
        world.rejection(),
        ChangesetRejection::Closed { .. }
    ));
}

macro_rules! register_cli_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/cli_commands.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: CliWorld) {
            let _ = world;
        }
    };
}

register_cli_scenario!(upload_happy_path, "Uploading a diff prints the element results");
register_cli_scenario!(upload_invalid_json, "Rejecting invalid diff JSON");
register_cli_scenario!(upload_missing_user, "Rejecting uploads without a user");
register_cli_scenario!(upload_foreign_changeset, "Rejecting uploads to another user's changeset");
register_cli_scenario!(upload_closed_changeset, "Rejecting uploads to a closed changeset");
