//! Mechanical-audit selector
//!
//! Both reporting windows are always queried. When both hold a record the
//! higher revision id wins, whichever window it was filed under; late
//! revisions are sometimes logged against the earlier window. Equal
//! revisions go to the newer window. Equipment instances are passed through
//! untouched; picking a "main" plant is left to narrative consumers.

use tracing::debug;

use crate::error::PipelineError;
use crate::keys::Bbl;
use crate::registries::{call_with_retry, names, AuditArchive};
use crate::types::MechanicalAuditRecord;
use crate::utils::retry::RetryPolicy;

/// Choose between the two windows' records
pub fn select(
    newer: Option<MechanicalAuditRecord>,
    older: Option<MechanicalAuditRecord>,
) -> Option<MechanicalAuditRecord> {
    match (newer, older) {
        (Some(newer), Some(older)) => {
            if older.revision_id > newer.revision_id {
                debug!(
                    newer_revision = newer.revision_id,
                    older_revision = older.revision_id,
                    "Older window holds the later revision"
                );
                Some(older)
            } else {
                Some(newer)
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

/// Query both archives concurrently and select
pub async fn select_audit(
    newer_archive: &dyn AuditArchive,
    older_archive: &dyn AuditArchive,
    key: &Bbl,
    policy: &RetryPolicy,
) -> Result<Option<MechanicalAuditRecord>, PipelineError> {
    let (newer, older) = tokio::try_join!(
        call_with_retry(names::AUDIT, policy, || newer_archive.lookup(key)),
        call_with_retry(names::AUDIT, policy, || older_archive.lookup(key)),
    )?;

    Ok(select(newer, older))
}
