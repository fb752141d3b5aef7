//! Read path: resolve a domain's links back into flat record views

use super::cache::AssemblyCache;
use super::metrics::ASSEMBLY_ERRORS_TOTAL;
use crate::error::{AssemblyError, StorageError};
use crate::storage::Storage;
use crate::types::{FieldValue, FlattenedRecord, LinkRow, RecordPayload, RequestDomainId};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;

type Fields = Vec<(&'static str, FieldValue)>;

fn text(fields: &mut Fields, name: &'static str, value: String) {
    fields.push((name, FieldValue::Text(value)));
}

fn int(fields: &mut Fields, name: &'static str, value: u32) {
    fields.push((name, FieldValue::Integer(value)));
}

fn ttl(fields: &mut Fields, value: Option<u32>) {
    if let Some(v) = value {
        int(fields, "ttl", v);
    }
}

/// Project a payload onto its named fields, leaving out absent optionals.
pub fn project(payload: RecordPayload) -> Fields {
    let mut f = Vec::with_capacity(8);
    match payload {
        RecordPayload::A(r) | RecordPayload::AAAA(r) => {
            text(&mut f, "address", r.address);
            ttl(&mut f, r.ttl);
        }
        RecordPayload::CNAME(r) | RecordPayload::TXT(r) | RecordPayload::PTR(r) | RecordPayload::NS(r) => {
            text(&mut f, "value", r.value);
            ttl(&mut f, r.ttl);
        }
        RecordPayload::MX(r) => {
            text(&mut f, "value", r.value);
            int(&mut f, "priority", r.priority);
            ttl(&mut f, r.ttl);
        }
        RecordPayload::SOA(r) => {
            text(&mut f, "m_name", r.m_name);
            text(&mut f, "r_name", r.r_name);
            int(&mut f, "serial", r.serial);
            int(&mut f, "refresh", r.refresh);
            int(&mut f, "retry", r.retry);
            int(&mut f, "expire", r.expire);
            int(&mut f, "min_ttl", r.min_ttl);
            ttl(&mut f, r.ttl);
        }
        RecordPayload::CCA(r) => {
            int(&mut f, "flag", r.flag);
            text(&mut f, "tag", r.tag);
            text(&mut f, "value", r.value);
            ttl(&mut f, r.ttl);
        }
        RecordPayload::SRV(r) => {
            text(&mut f, "service", r.service);
            text(&mut f, "target", r.target);
            int(&mut f, "weight", r.weight);
            int(&mut f, "port", r.port);
            ttl(&mut f, r.ttl);
        }
        RecordPayload::Other(r) => {
            text(&mut f, "content", r.content);
        }
    }
    f
}

async fn resolve(
    storage: &dyn Storage,
    request_domain_id: RequestDomainId,
    link: LinkRow,
) -> Result<FlattenedRecord, AssemblyError> {
    let read_err = |source: StorageError| AssemblyError::Storage { request_domain_id, source };

    let pointer = storage.pointer(link.pointer_id).await.map_err(read_err)?.ok_or(
        AssemblyError::MissingPointer { request_domain_id, link_id: link.id, pointer_id: link.pointer_id },
    )?;
    let payload = storage.payload(pointer.kind, pointer.payload_id).await.map_err(read_err)?.ok_or(
        AssemblyError::MissingPayload { kind: pointer.kind, pointer_id: pointer.id, payload_id: pointer.payload_id },
    )?;

    Ok(FlattenedRecord {
        kind: pointer.kind,
        pointer_id: pointer.id,
        payload_id: pointer.payload_id,
        fields: project(payload),
    })
}

pub struct RecordAssembler {
    storage: Arc<dyn Storage>,
    cache: Arc<AssemblyCache>,
}

impl RecordAssembler {
    pub fn new(storage: Arc<dyn Storage>, cache: Arc<AssemblyCache>) -> Self {
        Self { storage, cache }
    }

    /// Lazily resolve the records of a requested domain in link order.
    ///
    /// The stream reads storage only as it is polled and can be recreated
    /// at will; a dangling pointer or payload ends it with an error rather
    /// than being skipped.
    pub fn stream_for_domain(&self, request_domain_id: RequestDomainId) -> BoxStream<'static, Result<FlattenedRecord, AssemblyError>> {
        let storage = self.storage.clone();
        let links_from = self.storage.clone();

        stream::once(async move {
            links_from
                .links_for_domain(request_domain_id)
                .await
                .map_err(|source| AssemblyError::Storage { request_domain_id, source })
        })
        .map_ok(|links| stream::iter(links.into_iter().map(Ok::<_, AssemblyError>)))
        .try_flatten()
        .and_then(move |link| {
            let storage = storage.clone();
            async move { resolve(storage.as_ref(), request_domain_id, link).await }
        })
        .boxed()
    }

    /// Collect the records of a requested domain, served from the cache
    /// when an unchanged copy is available.
    pub async fn assemble_for_domain(&self, request_domain_id: RequestDomainId) -> Result<Vec<FlattenedRecord>, AssemblyError> {
        if let Some(records) = self.cache.get(request_domain_id) {
            return Ok(records.as_ref().clone());
        }

        // 先取代数再读存储，读取期间若有提交，这份结果不进缓存
        let generation = self.cache.generation(request_domain_id);
        let records: Vec<FlattenedRecord> = self
            .stream_for_domain(request_domain_id)
            .try_collect()
            .await
            .map_err(|e| {
                ASSEMBLY_ERRORS_TOTAL.inc();
                tracing::error!("[assembler] Requested domain {}: {}", request_domain_id, e);
                e
            })?;

        tracing::debug!("[assembler] Assembled {} record(s) for requested domain {}", records.len(), request_domain_id);
        self.cache.insert(request_domain_id, generation, Arc::new(records.clone()));
        Ok(records)
    }
}
