//! Write path: payload row, type-tagged pointer and domain link, atomically

use super::cache::AssemblyCache;
use super::metrics::{RECORDS_DELETED_TOTAL, RECORDS_STORED_TOTAL, STORE_FAILURES_TOTAL};
use super::registry;
use crate::error::{StorageError, StoreError};
use crate::storage::{Storage, Transaction};
use crate::types::{LinkRow, PointerId, RecordKind, RecordPayload, RequestContext, RequestDomainId};
use std::sync::Arc;

/// A record whose three rows have been staged in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedRecord {
    pub request_domain_id: RequestDomainId,
    pub kind: RecordKind,
    pub pointer_id: PointerId,
}

pub struct RecordStore {
    storage: Arc<dyn Storage>,
    cache: Arc<AssemblyCache>,
}

impl RecordStore {
    pub fn new(storage: Arc<dyn Storage>, cache: Arc<AssemblyCache>) -> Self {
        Self { storage, cache }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Store one validated record in a transaction of its own.
    pub async fn store(
        &self,
        ctx: &RequestContext,
        request_domain_id: RequestDomainId,
        payload: RecordPayload,
    ) -> Result<PointerId, StoreError> {
        let kind = payload.kind();
        let mut tx = self
            .storage
            .begin()
            .await
            .map_err(|source| fail(kind, request_domain_id, source))?;

        let staged = self.write(tx.as_mut(), ctx, request_domain_id, payload).await?;
        tx.commit().await.map_err(|source| fail(kind, request_domain_id, source))?;

        self.committed(ctx, &[staged]);
        Ok(staged.pointer_id)
    }

    /// Stage payload, pointer and link for one record inside a transaction
    /// owned by the caller. Nothing is visible until that transaction
    /// commits, and dropping it discards all three rows.
    pub async fn write(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        request_domain_id: RequestDomainId,
        payload: RecordPayload,
    ) -> Result<StagedRecord, StoreError> {
        let kind = payload.kind();
        let info = registry::info(kind);

        let owned = self
            .owns_domain(ctx, request_domain_id)
            .await
            .map_err(|source| fail(kind, request_domain_id, source))?;
        if !owned {
            return Err(StoreError::DomainNotFound(request_domain_id));
        }

        tracing::debug!(
            "[store] Dispatching {} record (type code {}) to table {}",
            kind, info.type_code, info.table
        );

        let staged = async {
            let payload_id = tx.insert_payload(payload).await?;
            let pointer_id = tx.insert_pointer(kind, payload_id).await?;
            tx.insert_link(request_domain_id, pointer_id).await?;
            Ok::<_, StorageError>(pointer_id)
        }
        .await;

        let pointer_id = staged.map_err(|source| fail(kind, request_domain_id, source))?;
        Ok(StagedRecord { request_domain_id, kind, pointer_id })
    }

    /// Bookkeeping once the transaction holding `records` has committed.
    pub fn committed(&self, ctx: &RequestContext, records: &[StagedRecord]) {
        for r in records {
            RECORDS_STORED_TOTAL.with_label_values(&[r.kind.as_str()]).inc();
            self.cache.invalidate(r.request_domain_id);
            tracing::info!(
                "[store] Request {}: stored {} record {} for requested domain {}",
                ctx.request_id, r.kind, r.pointer_id, r.request_domain_id
            );
        }
    }

    /// Remove one record of the caller's request: link, then pointer, then
    /// payload, in a single transaction.
    pub async fn delete_record(&self, ctx: &RequestContext, pointer_id: PointerId) -> Result<(), StoreError> {
        let domains = self
            .storage
            .request_domains(ctx.request_id)
            .await
            .map_err(StoreError::Lookup)?;

        for domain in domains {
            let links = self.links(domain.id).await?;
            let matching: Vec<LinkRow> = links.into_iter().filter(|l| l.pointer_id == pointer_id).collect();
            if !matching.is_empty() {
                return self.remove(domain.id, &matching).await.map(|_| ());
            }
        }
        Err(StoreError::RecordNotFound(pointer_id))
    }

    /// Remove every record linked to a requested domain. Returns how many
    /// records were removed.
    pub async fn purge_domain(&self, ctx: &RequestContext, request_domain_id: RequestDomainId) -> Result<usize, StoreError> {
        if !self.owns_domain(ctx, request_domain_id).await.map_err(StoreError::Lookup)? {
            return Err(StoreError::DomainNotFound(request_domain_id));
        }
        let links = self.links(request_domain_id).await?;
        self.remove(request_domain_id, &links).await
    }

    async fn links(&self, request_domain_id: RequestDomainId) -> Result<Vec<LinkRow>, StoreError> {
        self.storage
            .links_for_domain(request_domain_id)
            .await
            .map_err(|source| StoreError::Removal { request_domain_id, source })
    }

    async fn remove(&self, request_domain_id: RequestDomainId, links: &[LinkRow]) -> Result<usize, StoreError> {
        let removal = |source: StorageError| {
            tracing::error!("[store] Failed to remove records of requested domain {}: {}", request_domain_id, source);
            StoreError::Removal { request_domain_id, source }
        };

        let mut kinds = Vec::with_capacity(links.len());
        let mut tx = self.storage.begin().await.map_err(removal)?;
        for link in links {
            tx.delete_link(link.id).await.map_err(removal)?;
            // 悬空的 link 也一并清掉，但没有 pointer 可删
            if let Some(pointer) = self.storage.pointer(link.pointer_id).await.map_err(removal)? {
                tx.delete_pointer(pointer.id).await.map_err(removal)?;
                tx.delete_payload(pointer.kind, pointer.payload_id).await.map_err(removal)?;
                kinds.push(pointer.kind);
            }
        }
        tx.commit().await.map_err(removal)?;

        self.cache.invalidate(request_domain_id);
        for kind in &kinds {
            RECORDS_DELETED_TOTAL.with_label_values(&[kind.as_str()]).inc();
        }
        tracing::info!("[store] Removed {} record(s) from requested domain {}", kinds.len(), request_domain_id);
        Ok(kinds.len())
    }

    async fn owns_domain(&self, ctx: &RequestContext, request_domain_id: RequestDomainId) -> Result<bool, StorageError> {
        let domain = self.storage.request_domain(request_domain_id).await?;
        let owned = matches!(domain, Some(d) if d.request_id == ctx.request_id);
        if !owned {
            tracing::warn!(
                "[store] Requested domain {} not found under request {}",
                request_domain_id, ctx.request_id
            );
        }
        Ok(owned)
    }
}

fn fail(kind: RecordKind, request_domain_id: RequestDomainId, source: StorageError) -> StoreError {
    STORE_FAILURES_TOTAL.with_label_values(&[kind.as_str()]).inc();
    tracing::error!(
        "[store] Storage failure for {} record on requested domain {}: {}",
        kind, request_domain_id, source
    );
    StoreError::Storage { kind, request_domain_id, source }
}
