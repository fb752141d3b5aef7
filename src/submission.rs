//! Batch submission: validate every record first, then store them

use crate::dns::{validate_named, RecordStore};
use crate::error::{RecordError, RequestError};
use crate::types::{PointerId, RecordPayload, RecordSubmission, RequestContext, RequestDomainId};
use std::str::FromStr;

/// What happens to records stored earlier in a batch when a later one
/// fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchPolicy {
    /// The whole batch shares one transaction; any failure rolls back all of it.
    #[default]
    Atomic,
    /// Each record commits on its own; records before the failure stay.
    PerRecord,
}

impl BatchPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchPolicy::Atomic => "atomic",
            BatchPolicy::PerRecord => "per_record",
        }
    }
}

impl FromStr for BatchPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "atomic" => Ok(BatchPolicy::Atomic),
            "per_record" | "per-record" => Ok(BatchPolicy::PerRecord),
            other => anyhow::bail!("invalid batch policy '{}' (expected atomic or per_record)", other),
        }
    }
}

#[derive(Debug)]
pub enum RecordStatus {
    Stored(PointerId),
    /// Staged successfully, then discarded because a later record failed.
    RolledBack,
    Failed(RecordError),
    NotProcessed,
}

#[derive(Debug)]
pub struct RecordOutcome {
    pub request_domain_id: RequestDomainId,
    pub kind: String,
    pub status: RecordStatus,
}

/// Per-record results, in submission order.
#[derive(Debug)]
pub struct BatchReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| matches!(o.status, RecordStatus::Stored(_)))
    }

    pub fn failure(&self) -> Option<(usize, &RecordOutcome, &RecordError)> {
        self.outcomes.iter().enumerate().find_map(|(i, o)| match &o.status {
            RecordStatus::Failed(e) => Some((i, o, e)),
            _ => None,
        })
    }

    pub fn stored(&self) -> Vec<PointerId> {
        self.outcomes
            .iter()
            .filter_map(|o| match o.status {
                RecordStatus::Stored(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

fn fail_at(outcomes: &mut [RecordOutcome], index: usize, error: RecordError) {
    tracing::warn!(
        "[submit] Record #{} ({} for requested domain {}) failed: {}",
        index + 1, outcomes[index].kind, outcomes[index].request_domain_id, error
    );
    outcomes[index].status = RecordStatus::Failed(error);
}

/// Validate and store a batch for one request.
///
/// Validation covers the whole batch before anything is written, and the
/// first invalid record stops the batch with nothing stored. Storage then
/// proceeds record by record and also stops at the first failure; what
/// survives of the records before it depends on `policy`.
pub async fn submit_batch(
    store: &RecordStore,
    ctx: &RequestContext,
    batch: &[RecordSubmission],
    policy: BatchPolicy,
) -> Result<BatchReport, RequestError> {
    let mut outcomes: Vec<RecordOutcome> = batch
        .iter()
        .map(|s| RecordOutcome {
            request_domain_id: s.request_domain_id,
            kind: s.kind.clone(),
            status: RecordStatus::NotProcessed,
        })
        .collect();

    let mut payloads: Vec<RecordPayload> = Vec::with_capacity(batch.len());
    for (i, sub) in batch.iter().enumerate() {
        match validate_named(&sub.kind, &sub.fields) {
            Ok(payload) => payloads.push(payload),
            Err(e) => {
                fail_at(&mut outcomes, i, e);
                return Ok(BatchReport { outcomes });
            }
        }
    }

    tracing::debug!(
        "[submit] Request {}: {} record(s) validated, storing with {} policy",
        ctx.request_id, payloads.len(), policy.as_str()
    );

    match policy {
        BatchPolicy::Atomic => {
            let mut tx = store.storage().begin().await?;
            let mut staged = Vec::with_capacity(payloads.len());
            for (i, payload) in payloads.into_iter().enumerate() {
                match store.write(tx.as_mut(), ctx, batch[i].request_domain_id, payload).await {
                    Ok(s) => staged.push(s),
                    Err(e) => {
                        drop(tx);
                        for o in &mut outcomes[..i] {
                            o.status = RecordStatus::RolledBack;
                        }
                        fail_at(&mut outcomes, i, e.into());
                        return Ok(BatchReport { outcomes });
                    }
                }
            }
            tx.commit().await.map_err(|e| {
                tracing::error!("[submit] Request {}: batch commit failed: {}", ctx.request_id, e);
                RequestError::Commit(e)
            })?;
            store.committed(ctx, &staged);
            for (o, s) in outcomes.iter_mut().zip(&staged) {
                o.status = RecordStatus::Stored(s.pointer_id);
            }
        }
        BatchPolicy::PerRecord => {
            for (i, payload) in payloads.into_iter().enumerate() {
                match store.store(ctx, batch[i].request_domain_id, payload).await {
                    Ok(pointer_id) => outcomes[i].status = RecordStatus::Stored(pointer_id),
                    Err(e) => {
                        fail_at(&mut outcomes, i, e.into());
                        break;
                    }
                }
            }
        }
    }

    Ok(BatchReport { outcomes })
}
