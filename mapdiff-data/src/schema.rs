//! SQLite schema for changesets and versioned map elements.
//!
//! Each element kind has a current projection keyed by id and an
//! append-only history keyed by `(id, version)`, each with tag and child
//! tables of the same shape. Coordinates are stored as degrees × 10⁷.

use rusqlite::{Connection, Error as SqliteError, OptionalExtension, Transaction};
use thiserror::Error;

/// Schema version written by [`initialise_schema`].
pub const SCHEMA_VERSION: i64 = 1;

/// Sequences seeded by [`initialise_schema`].
pub const SEQUENCES: [&str; 4] = ["changeset", "node", "way", "relation"];

/// Create the mapdiff tables inside an existing SQLite database.
///
/// The call is idempotent. An existing installation must already carry
/// [`SCHEMA_VERSION`]; anything else is rejected so migrations can be
/// applied explicitly.
///
/// # Examples
/// ```
/// use rusqlite::Connection;
/// use mapdiff_data::initialise_schema;
///
/// let mut conn = Connection::open_in_memory().expect("create in-memory database");
/// initialise_schema(&mut conn).expect("create schema");
/// initialise_schema(&mut conn).expect("second run is a no-op");
///
/// let next: i64 = conn
///     .query_row("SELECT value FROM id_sequences WHERE name = 'node'", [], |row| row.get(0))
///     .expect("read node sequence");
/// assert_eq!(next, 0);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), SchemaError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| SchemaError::ForeignKeys { source })?;

    let transaction = connection
        .transaction()
        .map_err(|source| SchemaError::Migration {
            step: "begin schema transaction",
            source,
        })?;

    create_changeset_tables(&transaction)?;
    create_node_tables(&transaction)?;
    create_way_tables(&transaction)?;
    create_relation_tables(&transaction)?;
    create_indexes(&transaction)?;
    seed_sequences(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction
        .commit()
        .map_err(|source| SchemaError::Migration {
            step: "commit schema transaction",
            source,
        })
}

fn create_changeset_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create id_sequences",
        "CREATE TABLE IF NOT EXISTS id_sequences (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL CHECK (value >= 0)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create changesets",
        "CREATE TABLE IF NOT EXISTS changesets (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            closed_at TEXT,
            min_lat INTEGER,
            max_lat INTEGER,
            min_lon INTEGER,
            max_lon INTEGER,
            num_changes INTEGER NOT NULL DEFAULT 0 CHECK (num_changes >= 0)
        )",
    )?;
    run_migration_step(
        transaction,
        "create changeset_tags",
        "CREATE TABLE IF NOT EXISTS changeset_tags (
            changeset_id INTEGER NOT NULL REFERENCES changesets(id) ON DELETE CASCADE,
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (changeset_id, k)
        ) WITHOUT ROWID",
    )
}

fn create_node_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create current_nodes",
        "CREATE TABLE IF NOT EXISTS current_nodes (
            id INTEGER PRIMARY KEY,
            latitude INTEGER NOT NULL,
            longitude INTEGER NOT NULL,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            visible INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            tile INTEGER NOT NULL,
            version INTEGER NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create nodes",
        "CREATE TABLE IF NOT EXISTS nodes (
            node_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            latitude INTEGER NOT NULL,
            longitude INTEGER NOT NULL,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            visible INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            tile INTEGER NOT NULL,
            PRIMARY KEY (node_id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create current_node_tags",
        "CREATE TABLE IF NOT EXISTS current_node_tags (
            node_id INTEGER NOT NULL REFERENCES current_nodes(id),
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (node_id, k)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create node_tags",
        "CREATE TABLE IF NOT EXISTS node_tags (
            node_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (node_id, version, k),
            FOREIGN KEY (node_id, version) REFERENCES nodes(node_id, version)
        ) WITHOUT ROWID",
    )
}

fn create_way_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create current_ways",
        "CREATE TABLE IF NOT EXISTS current_ways (
            id INTEGER PRIMARY KEY,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            visible INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            version INTEGER NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create ways",
        "CREATE TABLE IF NOT EXISTS ways (
            way_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            visible INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (way_id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create current_way_nodes",
        "CREATE TABLE IF NOT EXISTS current_way_nodes (
            way_id INTEGER NOT NULL REFERENCES current_ways(id),
            node_id INTEGER NOT NULL REFERENCES current_nodes(id),
            sequence_id INTEGER NOT NULL,
            PRIMARY KEY (way_id, sequence_id)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create way_nodes",
        "CREATE TABLE IF NOT EXISTS way_nodes (
            way_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            sequence_id INTEGER NOT NULL,
            PRIMARY KEY (way_id, version, sequence_id),
            FOREIGN KEY (way_id, version) REFERENCES ways(way_id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create current_way_tags",
        "CREATE TABLE IF NOT EXISTS current_way_tags (
            way_id INTEGER NOT NULL REFERENCES current_ways(id),
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (way_id, k)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create way_tags",
        "CREATE TABLE IF NOT EXISTS way_tags (
            way_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (way_id, version, k),
            FOREIGN KEY (way_id, version) REFERENCES ways(way_id, version)
        ) WITHOUT ROWID",
    )
}

fn create_relation_tables(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create current_relations",
        "CREATE TABLE IF NOT EXISTS current_relations (
            id INTEGER PRIMARY KEY,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            visible INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            version INTEGER NOT NULL
        )",
    )?;
    run_migration_step(
        transaction,
        "create relations",
        "CREATE TABLE IF NOT EXISTS relations (
            relation_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            changeset_id INTEGER NOT NULL REFERENCES changesets(id),
            visible INTEGER NOT NULL,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (relation_id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create current_relation_members",
        "CREATE TABLE IF NOT EXISTS current_relation_members (
            relation_id INTEGER NOT NULL REFERENCES current_relations(id),
            member_type TEXT NOT NULL CHECK (member_type IN ('node', 'way', 'relation')),
            member_id INTEGER NOT NULL,
            member_role TEXT NOT NULL,
            sequence_id INTEGER NOT NULL,
            PRIMARY KEY (relation_id, sequence_id)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create relation_members",
        "CREATE TABLE IF NOT EXISTS relation_members (
            relation_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            member_type TEXT NOT NULL CHECK (member_type IN ('node', 'way', 'relation')),
            member_id INTEGER NOT NULL,
            member_role TEXT NOT NULL,
            sequence_id INTEGER NOT NULL,
            PRIMARY KEY (relation_id, version, sequence_id),
            FOREIGN KEY (relation_id, version) REFERENCES relations(relation_id, version)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create current_relation_tags",
        "CREATE TABLE IF NOT EXISTS current_relation_tags (
            relation_id INTEGER NOT NULL REFERENCES current_relations(id),
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (relation_id, k)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create relation_tags",
        "CREATE TABLE IF NOT EXISTS relation_tags (
            relation_id INTEGER NOT NULL,
            version INTEGER NOT NULL,
            k TEXT NOT NULL,
            v TEXT NOT NULL,
            PRIMARY KEY (relation_id, version, k),
            FOREIGN KEY (relation_id, version) REFERENCES relations(relation_id, version)
        ) WITHOUT ROWID",
    )
}

fn create_indexes(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "index current_nodes tile",
        "CREATE INDEX IF NOT EXISTS idx_current_nodes_tile ON current_nodes(tile)",
    )?;
    run_migration_step(
        transaction,
        "index nodes tile",
        "CREATE INDEX IF NOT EXISTS idx_nodes_tile ON nodes(tile)",
    )?;
    run_migration_step(
        transaction,
        "index current_way_nodes node",
        "CREATE INDEX IF NOT EXISTS idx_current_way_nodes_node
            ON current_way_nodes(node_id, way_id)",
    )?;
    run_migration_step(
        transaction,
        "index current_relation_members member",
        "CREATE INDEX IF NOT EXISTS idx_current_relation_members_member
            ON current_relation_members(member_type, member_id, relation_id)",
    )?;
    run_migration_step(
        transaction,
        "index changesets user",
        "CREATE INDEX IF NOT EXISTS idx_changesets_user ON changesets(user_id, created_at)",
    )
}

fn seed_sequences(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    for name in SEQUENCES {
        transaction
            .execute(
                "INSERT OR IGNORE INTO id_sequences (name, value) VALUES (?1, 0)",
                [name],
            )
            .map_err(|source| SchemaError::Migration {
                step: "seed id sequence",
                source,
            })?;
    }
    Ok(())
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), SchemaError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS mapdiff_schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing_version: Option<i64> = transaction
        .query_row(
            "SELECT version FROM mapdiff_schema_version LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|source| SchemaError::Migration {
            step: "read schema version",
            source,
        })?;

    match existing_version {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(SchemaError::VersionMismatch {
            expected: SCHEMA_VERSION,
            found,
        }),
        None => transaction
            .execute(
                "INSERT INTO mapdiff_schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )
            .map(|_| ())
            .map_err(|source| SchemaError::Migration {
                step: "record schema version",
                source,
            }),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), SchemaError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| SchemaError::Migration { step, source })
}

/// Errors raised when initialising the schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Foreign key enforcement could not be enabled.
    #[error("failed to enable SQLite foreign keys")]
    ForeignKeys {
        /// Underlying SQLite error.
        #[source]
        source: SqliteError,
    },
    /// A migration statement failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Label of the failing step.
        step: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: SqliteError,
    },
    /// The database was created by a different schema version.
    #[error(
        "expected mapdiff schema version {expected} but found {found}; apply migrations before retrying"
    )]
    VersionMismatch {
        /// Version this build writes.
        expected: i64,
        /// Version recorded in the database.
        found: i64,
    },
}
