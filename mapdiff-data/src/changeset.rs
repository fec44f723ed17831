//! Changeset lifecycle: open, load, close and per-batch accounting.

use geo::{Coord, Rect};
use log::info;
use mapdiff_core::{Tags, scale_coordinate, unscale_coordinate};

use crate::{
    error::{ChangeError, ChangesetRejection},
    exec::{ExecError, Executor, Row, Session, Value},
    history::allocate_from_sequence,
    transaction::finish,
};

/// A changeset as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Changeset {
    /// Changeset id.
    pub id: i64,
    /// Owning user.
    pub user_id: i64,
    /// Creation timestamp.
    pub created_at: String,
    /// Closing timestamp; `None` while the changeset is open.
    pub closed_at: Option<String>,
    /// Number of element changes applied so far.
    pub num_changes: i64,
    /// Area touched by node edits, if any.
    pub bounds: Option<Rect<f64>>,
    /// Changeset tags.
    pub tags: Tags,
}

impl Changeset {
    /// Whether the changeset still accepts writes.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    fn from_row(row: &Row) -> Result<Self, ExecError> {
        let corners = (
            row.get_opt_i64("min_lat")?,
            row.get_opt_i64("max_lat")?,
            row.get_opt_i64("min_lon")?,
            row.get_opt_i64("max_lon")?,
        );
        let bounds = match corners {
            (Some(min_lat), Some(max_lat), Some(min_lon), Some(max_lon)) => Some(Rect::new(
                Coord {
                    x: unscale_coordinate(min_lon),
                    y: unscale_coordinate(min_lat),
                },
                Coord {
                    x: unscale_coordinate(max_lon),
                    y: unscale_coordinate(max_lat),
                },
            )),
            _ => None,
        };
        Ok(Self {
            id: row.get_i64("id")?,
            user_id: row.get_i64("user_id")?,
            created_at: row.get_str("created_at")?.to_owned(),
            closed_at: row.get_opt_str("closed_at")?.map(str::to_owned),
            num_changes: row.get_i64("num_changes")?,
            bounds,
            tags: Tags::new(),
        })
    }
}

/// Load a changeset with its tags.
///
/// # Errors
/// Returns [`ChangeError::WriteFailure`] when the store cannot be read.
pub async fn load_changeset<S: Session + ?Sized>(
    session: &S,
    changeset_id: i64,
) -> Result<Option<Changeset>, ChangeError> {
    let id = [Value::from(changeset_id)];
    let Some(row) = session
        .query_opt(
            "SELECT id, user_id, created_at, closed_at, num_changes,
                    min_lat, max_lat, min_lon, max_lon
                FROM changesets WHERE id = ?1",
            &id,
        )
        .await
        .map_err(ChangeError::write_failure("load changeset"))?
    else {
        return Ok(None);
    };
    let mut changeset =
        Changeset::from_row(&row).map_err(ChangeError::write_failure("read changeset"))?;
    let tags = session
        .query(
            "SELECT k, v FROM changeset_tags WHERE changeset_id = ?1 ORDER BY k",
            &id,
        )
        .await
        .map_err(ChangeError::write_failure("load changeset tags"))?;
    for tag in tags {
        let (key, value) = (tag.get_str("k"), tag.get_str("v"));
        let (key, value) = key
            .and_then(|k| value.map(|v| (k.to_owned(), v.to_owned())))
            .map_err(ChangeError::write_failure("read changeset tag"))?;
        changeset.tags.insert(key, value);
    }
    Ok(Some(changeset))
}

/// Check that `user_id` may write to the loaded changeset.
///
/// # Errors
/// Returns [`ChangeError::ChangesetInvalid`] when the changeset is
/// missing, owned by another user or closed.
pub fn ensure_writable(
    changeset_id: i64,
    user_id: i64,
    changeset: Option<&Changeset>,
) -> Result<&Changeset, ChangeError> {
    let reject = |reason| ChangeError::ChangesetInvalid {
        changeset_id,
        reason,
    };
    let changeset = changeset.ok_or_else(|| reject(ChangesetRejection::NotFound))?;
    if changeset.user_id != user_id {
        return Err(reject(ChangesetRejection::NotOwner {
            owner: changeset.user_id,
        }));
    }
    if let Some(closed_at) = &changeset.closed_at {
        return Err(reject(ChangesetRejection::Closed {
            closed_at: closed_at.clone(),
        }));
    }
    Ok(changeset)
}

/// Check that `requested` more changes fit under `limit`.
///
/// # Errors
/// Returns [`ChangesetRejection::TooManyChanges`] wrapped in
/// [`ChangeError::ChangesetInvalid`] when they do not.
pub fn ensure_capacity(
    changeset: &Changeset,
    requested: i64,
    limit: i64,
) -> Result<(), ChangeError> {
    if changeset.num_changes.saturating_add(requested) > limit {
        return Err(ChangeError::ChangesetInvalid {
            changeset_id: changeset.id,
            reason: ChangesetRejection::TooManyChanges {
                current: changeset.num_changes,
                requested,
                limit,
            },
        });
    }
    Ok(())
}

/// Open a new changeset for `user_id` with the given tags.
///
/// # Errors
/// Returns [`ChangeError::WriteFailure`] when the store rejects the write.
pub async fn open_changeset<E: Executor>(
    executor: &E,
    user_id: i64,
    tags: &Tags,
) -> Result<i64, ChangeError> {
    let session = executor
        .acquire()
        .await
        .map_err(ChangeError::write_failure("acquire session"))?;
    session
        .begin()
        .await
        .map_err(ChangeError::write_failure("begin changeset transaction"))?;
    let outcome = insert_changeset(&session, user_id, tags).await;
    let id = finish(&session, outcome).await?;
    info!("Opened changeset {id} for user {user_id}");
    Ok(id)
}

async fn insert_changeset<S: Session + ?Sized>(
    session: &S,
    user_id: i64,
    tags: &Tags,
) -> Result<i64, ChangeError> {
    let id = allocate_from_sequence(session, "changeset").await?;
    let created_at = session
        .now()
        .await
        .map_err(ChangeError::write_failure("read timestamp"))?;
    session
        .execute(
            "INSERT INTO changesets (id, user_id, created_at, closed_at, num_changes)
                VALUES (?1, ?2, ?3, NULL, 0)",
            &[Value::from(id), Value::from(user_id), Value::from(created_at)],
        )
        .await
        .map_err(ChangeError::write_failure("insert changeset"))?;
    for (key, value) in tags {
        session
            .execute(
                "INSERT INTO changeset_tags (changeset_id, k, v) VALUES (?1, ?2, ?3)
                    ON CONFLICT(changeset_id, k) DO UPDATE SET v = excluded.v",
                &[
                    Value::from(id),
                    Value::from(key.as_str()),
                    Value::from(value.as_str()),
                ],
            )
            .await
            .map_err(ChangeError::write_failure("insert changeset tag"))?;
    }
    Ok(id)
}

/// Close an open changeset owned by `user_id`.
///
/// # Errors
/// Returns [`ChangeError::ChangesetInvalid`] when the changeset is
/// missing, owned by another user or already closed, and
/// [`ChangeError::WriteFailure`] when the store fails.
pub async fn close_changeset<E: Executor>(
    executor: &E,
    changeset_id: i64,
    user_id: i64,
) -> Result<(), ChangeError> {
    let session = executor
        .acquire()
        .await
        .map_err(ChangeError::write_failure("acquire session"))?;
    session
        .begin()
        .await
        .map_err(ChangeError::write_failure("begin changeset transaction"))?;
    let outcome = mark_closed(&session, changeset_id, user_id).await;
    finish(&session, outcome).await?;
    info!("Closed changeset {changeset_id}");
    Ok(())
}

async fn mark_closed<S: Session + ?Sized>(
    session: &S,
    changeset_id: i64,
    user_id: i64,
) -> Result<(), ChangeError> {
    let changeset = load_changeset(session, changeset_id).await?;
    ensure_writable(changeset_id, user_id, changeset.as_ref())?;
    let closed_at = session
        .now()
        .await
        .map_err(ChangeError::write_failure("read timestamp"))?;
    session
        .execute(
            "UPDATE changesets SET closed_at = ?2 WHERE id = ?1 AND closed_at IS NULL",
            &[Value::from(changeset_id), Value::from(closed_at)],
        )
        .await
        .map_err(ChangeError::write_failure("close changeset"))?;
    Ok(())
}

/// Count `changes` against the changeset and widen its bounding box.
///
/// Runs inside the batch transaction. The counter update is guarded so a
/// changeset closed or filled since the pre-check rejects the batch.
pub(crate) async fn record_changes<S: Session + ?Sized>(
    session: &S,
    changeset_id: i64,
    user_id: i64,
    changes: i64,
    limit: i64,
    bounds: Option<Rect<f64>>,
) -> Result<(), ChangeError> {
    let updated = session
        .execute(
            "UPDATE changesets SET num_changes = num_changes + ?2
                WHERE id = ?1 AND closed_at IS NULL AND num_changes + ?2 <= ?3",
            &[
                Value::from(changeset_id),
                Value::from(changes),
                Value::from(limit),
            ],
        )
        .await
        .map_err(ChangeError::write_failure("count changeset changes"))?;
    if updated == 0 {
        let changeset = load_changeset(session, changeset_id).await?;
        let changeset = ensure_writable(changeset_id, user_id, changeset.as_ref())?;
        ensure_capacity(changeset, changes, limit)?;
    }
    let Some(bounds) = bounds else {
        return Ok(());
    };
    let (min, max) = (bounds.min(), bounds.max());
    session
        .execute(
            "UPDATE changesets SET
                min_lat = MIN(COALESCE(min_lat, ?2), ?2),
                max_lat = MAX(COALESCE(max_lat, ?3), ?3),
                min_lon = MIN(COALESCE(min_lon, ?4), ?4),
                max_lon = MAX(COALESCE(max_lon, ?5), ?5)
                WHERE id = ?1",
            &[
                Value::from(changeset_id),
                Value::from(scale_coordinate(min.y)),
                Value::from(scale_coordinate(max.y)),
                Value::from(scale_coordinate(min.x)),
                Value::from(scale_coordinate(max.x)),
            ],
        )
        .await
        .map_err(ChangeError::write_failure("widen changeset bounds"))?;
    Ok(())
}
