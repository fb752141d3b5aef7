//! Entry points used by the request-workflow API layer

use crate::dns::{AssemblyCache, RecordAssembler, RecordStore};
use crate::error::{AssemblyError, RequestError};
use crate::storage::Storage;
use crate::submission::{submit_batch, BatchPolicy, BatchReport};
use crate::summary::{DomainSummary, RequestSummary};
use crate::types::{
    FlattenedRecord, PointerId, RecordSubmission, RequestContext, RequestDomainId, RequestRow,
};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Wires the store and assembler to one storage handle and one cache.
pub struct DnsRecordService {
    storage: Arc<dyn Storage>,
    store: RecordStore,
    assembler: RecordAssembler,
    policy: BatchPolicy,
}

impl DnsRecordService {
    pub fn new(storage: Arc<dyn Storage>, cache: Arc<AssemblyCache>, policy: BatchPolicy) -> Self {
        tracing::info!(
            "[service] DNS record service ready (storage: {}, batch policy: {})",
            storage.name(), policy.as_str()
        );
        Self {
            store: RecordStore::new(storage.clone(), cache.clone()),
            assembler: RecordAssembler::new(storage.clone(), cache),
            storage,
            policy,
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    async fn request(&self, token: &str) -> Result<RequestRow, RequestError> {
        self.storage
            .request_by_token(token)
            .await?
            .ok_or(RequestError::RequestNotFound)
    }

    pub async fn context(&self, token: &str) -> Result<RequestContext, RequestError> {
        let row = self.request(token).await?;
        Ok(RequestContext { request_id: row.id, token: row.token })
    }

    pub async fn submit_records(&self, token: &str, batch: &[RecordSubmission]) -> Result<BatchReport, RequestError> {
        let ctx = self.context(token).await?;
        let report = submit_batch(&self.store, &ctx, batch, self.policy).await?;
        if report.is_success() {
            tracing::info!("[service] Request {}: {} DNS record(s) submitted", ctx.request_id, batch.len());
        }
        Ok(report)
    }

    pub async fn get_records_for_domain(&self, request_domain_id: RequestDomainId) -> Result<Vec<FlattenedRecord>, AssemblyError> {
        self.assembler.assemble_for_domain(request_domain_id).await
    }

    pub fn stream_records_for_domain(
        &self,
        request_domain_id: RequestDomainId,
    ) -> BoxStream<'static, Result<FlattenedRecord, AssemblyError>> {
        self.assembler.stream_for_domain(request_domain_id)
    }

    pub async fn delete_record(&self, token: &str, pointer_id: PointerId) -> Result<(), RequestError> {
        let ctx = self.context(token).await?;
        Ok(self.store.delete_record(&ctx, pointer_id).await?)
    }

    /// Drop every DNS record of a requested domain, as done when the domain
    /// is removed from the request.
    pub async fn purge_domain(&self, token: &str, request_domain_id: RequestDomainId) -> Result<usize, RequestError> {
        let ctx = self.context(token).await?;
        Ok(self.store.purge_domain(&ctx, request_domain_id).await?)
    }

    /// The workflow may only move past the DNS step once every requested
    /// domain has at least one record.
    pub async fn ensure_dns_step_complete(&self, token: &str) -> Result<(), RequestError> {
        let ctx = self.context(token).await?;
        let mut missing = Vec::new();
        for domain in self.storage.request_domains(ctx.request_id).await? {
            if self.storage.links_for_domain(domain.id).await?.is_empty() {
                missing.push(domain.fqdn);
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            tracing::info!("[service] Request {}: DNS step incomplete for {:?}", ctx.request_id, missing);
            Err(RequestError::MissingRecords(missing))
        }
    }

    pub async fn summarize_request(&self, token: &str) -> Result<RequestSummary, RequestError> {
        let request = self.request(token).await?;
        let mut requested_domains = Vec::new();
        for domain in self.storage.request_domains(request.id).await? {
            let dns_records = self.assembler.assemble_for_domain(domain.id).await?;
            requested_domains.push(DomainSummary {
                request_domain_id: domain.id,
                fqdn: domain.fqdn,
                dns_records,
            });
        }
        Ok(RequestSummary {
            request_id: request.id,
            site_code: request.site_code,
            requested_domains,
        })
    }
}
