//! Pure planning layer for applying OpenStreetMap-style change batches.
//!
//! Responsibilities:
//! - Model nodes, ways and relations and the edits requested on them.
//! - Normalise a raw upload into ordered, validated change records.
//! - Check placeholder ids and decide the order in which edits run.
//! - Compute quadtile keys for node coordinates.
//!
//! Boundaries:
//! - Never touch storage; persistence lives in `mapdiff-data`.
//! - Never install a logger; diagnostics go through the `log` facade.

mod change;
mod diff;
mod element;
mod error;
mod placeholder;
mod schedule;
mod tile;

pub use change::{ChangeRecord, ChangeResult};
pub use diff::{
    MAX_WAY_NODES, RawActionBlock, RawChangeBatch, RawElement, RawMember, RawTag, RawTypeGroup,
    parse_batch,
};
pub use element::{Action, ElementBody, ElementKind, ElementRef, Member, Tags, UnknownElementKind};
pub use error::{DiffError, MalformedReason};
pub use placeholder::{PlaceholderTable, validate_references};
pub use schedule::{Tier, schedule};
pub use tile::{
    COORDINATE_SCALE, scale_coordinate, tile_for_point, tile_for_xy, unscale_coordinate,
};

/// Parse, validate and schedule a raw batch in one step.
///
/// # Errors
/// Returns the first [`DiffError`] raised by [`parse_batch`],
/// [`validate_references`] or [`schedule`].
///
/// # Examples
/// ```
/// use mapdiff_core::{RawChangeBatch, RawElement, plan_batch};
///
/// let batch = RawChangeBatch::default()
///     .with("create", "node", RawElement::node(-1, 10.0, 20.0))
///     .with("create", "way", RawElement::way(-1, vec![-1, 3]));
/// let tiers = plan_batch(&batch, 7, 1)?;
/// assert_eq!(tiers.len(), 2);
/// # Ok::<(), mapdiff_core::DiffError>(())
/// ```
pub fn plan_batch(
    batch: &RawChangeBatch,
    user_id: i64,
    changeset_id: i64,
) -> Result<Vec<Tier>, DiffError> {
    let records = parse_batch(batch, user_id, changeset_id)?;
    validate_references(&records)?;
    schedule(records)
}
