//! Transactional application of a change batch to a changeset.

use std::collections::BTreeSet;

use futures_util::future::join_all;
use geo::Rect;
use log::{debug, info, warn};
use mapdiff_core::{
    Action, ChangeRecord, ChangeResult, ElementRef, PlaceholderTable, RawChangeBatch, Tier,
    parse_batch, schedule, validate_references,
};

use crate::{
    changeset::{ensure_capacity, ensure_writable, load_changeset, record_changes},
    error::ChangeError,
    exec::{Executor, Session},
    history::{BatchContext, merge_bounds, write_record},
    transaction::finish,
};

/// Default cap on the number of changes one changeset may hold.
pub const DEFAULT_MAX_CHANGESET_CHANGES: i64 = 10_000;

/// Tunables for [`ChangesetEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of element changes a changeset may accumulate.
    pub max_changeset_changes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_changeset_changes: DEFAULT_MAX_CHANGESET_CHANGES,
        }
    }
}

impl EngineConfig {
    /// Set the per-changeset change limit.
    #[must_use]
    pub const fn with_max_changeset_changes(mut self, limit: i64) -> Self {
        self.max_changeset_changes = limit;
        self
    }
}

/// Applies change batches atomically through an [`Executor`].
///
/// A batch is checked against its changeset, parsed and scheduled before
/// any write happens. The writes then run in one transaction, tier by tier;
/// any failure rolls the whole batch back.
///
/// # Examples
/// ```no_run
/// use mapdiff_core::{RawChangeBatch, RawElement};
/// use mapdiff_data::{ChangesetEngine, exec::sqlite::SqliteExecutor};
///
/// # async fn demo() -> Result<(), mapdiff_data::ChangeError> {
/// let engine = ChangesetEngine::new(SqliteExecutor::open("mapdiff.db"));
/// let batch = RawChangeBatch::default()
///     .with("create", "node", RawElement::node(-1, 51.5, -0.12));
/// let results = engine.apply(1, 42, &batch).await?;
/// assert_eq!(results[0].old_id, -1);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChangesetEngine<E> {
    executor: E,
    config: EngineConfig,
}

impl<E: Executor> ChangesetEngine<E> {
    /// Engine with the default configuration.
    #[must_use]
    pub fn new(executor: E) -> Self {
        Self::with_config(executor, EngineConfig::default())
    }

    /// Engine with explicit configuration.
    #[must_use]
    pub const fn with_config(executor: E, config: EngineConfig) -> Self {
        Self { executor, config }
    }

    /// Executor used for every session.
    #[must_use]
    pub const fn executor(&self) -> &E {
        &self.executor
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply `batch` to `changeset_id` on behalf of `user_id`.
    ///
    /// Returns one [`ChangeResult`] per applied record, in batch order.
    /// An empty batch returns an empty list and writes nothing.
    ///
    /// # Errors
    /// Any [`ChangeError`] aborts the batch. Validation failures happen
    /// before the transaction opens; store conflicts and failures roll it
    /// back.
    pub async fn apply(
        &self,
        changeset_id: i64,
        user_id: i64,
        batch: &RawChangeBatch,
    ) -> Result<Vec<ChangeResult>, ChangeError> {
        let current = {
            let session = self
                .executor
                .acquire()
                .await
                .map_err(ChangeError::write_failure("acquire session"))?;
            load_changeset(&session, changeset_id).await?
        };
        let changeset = ensure_writable(changeset_id, user_id, current.as_ref())?;

        let records = parse_batch(batch, user_id, changeset_id)?;
        if records.is_empty() {
            debug!("Changeset {changeset_id} received an empty batch");
            return Ok(Vec::new());
        }
        let count = records.len();
        let requested = i64::try_from(count).unwrap_or(i64::MAX);
        ensure_capacity(changeset, requested, self.config.max_changeset_changes)?;
        validate_references(&records)?;
        let tiers = schedule(records)?;
        debug!(
            "Scheduled {count} changes for changeset {changeset_id} in {} tiers",
            tiers.len()
        );

        let session = self
            .executor
            .acquire()
            .await
            .map_err(ChangeError::write_failure("acquire session"))?;
        session
            .begin()
            .await
            .map_err(ChangeError::write_failure("begin batch transaction"))?;
        let outcome = self
            .write_tiers(&session, changeset_id, user_id, tiers, count)
            .await;
        let results = finish(&session, outcome).await.inspect_err(|err| {
            warn!("Rolled back batch for changeset {changeset_id}: {err}");
        })?;
        info!(
            "Applied {} changes to changeset {changeset_id}",
            results.len()
        );
        Ok(results)
    }

    async fn write_tiers(
        &self,
        session: &E::Session,
        changeset_id: i64,
        user_id: i64,
        tiers: Vec<Tier>,
        count: usize,
    ) -> Result<Vec<ChangeResult>, ChangeError> {
        let timestamp = session
            .now()
            .await
            .map_err(ChangeError::write_failure("read batch timestamp"))?;
        let mut context = BatchContext {
            placeholders: PlaceholderTable::new(),
            timestamp,
            deleting: deleted_elements(&tiers),
        };
        let mut slots: Vec<Option<ChangeResult>> = vec![None; count];
        let mut bounds: Option<Rect<f64>> = None;

        for tier in &tiers {
            debug!(
                "Writing {} {} {} records",
                tier.records.len(),
                tier.action,
                tier.kind
            );
            let outcomes = join_all(
                tier.records
                    .iter()
                    .map(|record| write_record(session, &context, record)),
            )
            .await;
            let mut failure = None;
            for (record, outcome) in tier.records.iter().zip(outcomes) {
                match outcome {
                    Ok(applied) => {
                        if let Some((placeholder, id)) = applied.placeholder {
                            context.placeholders.register(placeholder, id);
                        }
                        bounds = match (bounds, applied.bounds) {
                            (Some(left), Some(right)) => Some(merge_bounds(left, right)),
                            (left, right) => left.or(right),
                        };
                        if let Some(slot) = slots.get_mut(record.index) {
                            *slot = Some(applied.result);
                        }
                    }
                    Err(err) => {
                        failure.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = failure {
                return Err(err);
            }
        }

        let applied = i64::try_from(count).unwrap_or(i64::MAX);
        record_changes(
            session,
            changeset_id,
            user_id,
            applied,
            self.config.max_changeset_changes,
            bounds,
        )
        .await?;
        Ok(slots.into_iter().flatten().collect())
    }
}

/// Existing elements retired by `tiers`.
fn deleted_elements(tiers: &[Tier]) -> BTreeSet<ElementRef> {
    tiers
        .iter()
        .filter(|tier| tier.action == Action::Delete)
        .flat_map(|tier| tier.records.iter().map(ChangeRecord::element))
        .collect()
}
