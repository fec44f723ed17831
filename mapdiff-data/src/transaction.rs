//! Commit-or-rollback handling shared by every write path.

use log::warn;

use crate::{error::ChangeError, exec::Session};

/// Commit when `outcome` succeeded, roll back otherwise.
///
/// A failed rollback is logged and the original error is returned; the
/// connection discards the transaction when it closes.
pub(crate) async fn finish<S, T>(
    session: &S,
    outcome: Result<T, ChangeError>,
) -> Result<T, ChangeError>
where
    S: Session + ?Sized,
{
    match outcome {
        Ok(value) => {
            session
                .commit()
                .await
                .map_err(ChangeError::write_failure("commit transaction"))?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = session.rollback().await {
                warn!("Rollback after {error} failed: {rollback}");
            }
            Err(error)
        }
    }
}
