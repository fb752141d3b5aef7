use futures::StreamExt;
use govreg_dns::dns::{AssemblyCache, RecordAssembler};
use govreg_dns::error::{AssemblyError, Reason, RecordError, RequestError, StorageError, StoreError};
use govreg_dns::storage::memory::RowCounts;
use govreg_dns::storage::{FaultPoint, Storage, Transaction};
use govreg_dns::summary::render_notification_body;
use govreg_dns::types::{
    FieldValue, LinkRow, PayloadId, PointerId, PointerRow, RecordKind, RecordPayload,
    RecordSubmission, RequestDomainId, RequestDomainRow, RequestId, RequestRow, ValueRecord,
};
use govreg_dns::{BatchPolicy, DnsRecordService, MemoryStorage, RecordStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Fixture {
    storage: MemoryStorage,
    service: DnsRecordService,
    token: String,
    domain: u64,
}

fn fixture_on(storage: MemoryStorage, policy: BatchPolicy) -> Fixture {
    let request = storage.create_request("moe").unwrap();
    let domain = storage.add_request_domain(request.id, "example.gov.lk").unwrap();
    let service = DnsRecordService::new(Arc::new(storage.clone()), Arc::new(AssemblyCache::default()), policy);
    Fixture { storage, service, token: request.token, domain: domain.id }
}

fn fixture(policy: BatchPolicy) -> Fixture {
    fixture_on(MemoryStorage::new(), policy)
}

fn record(domain: u64, kind: &str, fields: &[(&str, &str)]) -> RecordSubmission {
    RecordSubmission {
        request_domain_id: domain,
        kind: kind.to_string(),
        fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

fn scenario_batch(domain: u64) -> Vec<RecordSubmission> {
    vec![
        record(domain, "a", &[("address", "10.0.0.1"), ("ttl", "3600")]),
        record(domain, "mx", &[("value", "mail.example.gov.lk"), ("priority", "10")]),
    ]
}

fn empty() -> RowCounts {
    RowCounts::default()
}

#[tokio::test]
async fn scenario_batch_is_assembled_in_submission_order() {
    let f = fixture(BatchPolicy::Atomic);
    let report = f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.stored().len(), 2);

    let records = f.service.get_records_for_domain(f.domain).await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].kind, RecordKind::A);
    assert_eq!(records[0].get("address"), Some(&FieldValue::Text("10.0.0.1".into())));
    assert_eq!(records[0].get("ttl"), Some(&FieldValue::Integer(3600)));
    assert_eq!(records[1].kind, RecordKind::MX);
    assert_eq!(records[1].get("value"), Some(&FieldValue::Text("mail.example.gov.lk".into())));
    assert_eq!(records[1].get("priority"), Some(&FieldValue::Integer(10)));
    assert_eq!(records[1].get("ttl"), None);

    let json = serde_json::to_value(&records[1]).unwrap();
    assert_eq!(json["kind"], "MX");
    assert_eq!(json["priority"], 10);
    assert!(json.get("ttl").is_none());
}

#[tokio::test]
async fn stored_fields_round_trip_without_empty_optionals() {
    let f = fixture(BatchPolicy::Atomic);
    let batch = vec![
        record(f.domain, "srv", &[
            ("service", "_sip._tcp"),
            ("target", "sip.example.gov.lk"),
            ("weight", "5"),
            ("port", "5060"),
            ("ttl", "  "),
        ]),
        record(f.domain, "CCA", &[("flag", "0"), ("tag", "issue"), ("value", "letsencrypt.org"), ("ttl", "0")]),
    ];
    assert!(f.service.submit_records(&f.token, &batch).await.unwrap().is_success());

    let records = f.service.get_records_for_domain(f.domain).await.unwrap();
    let srv: Vec<(&str, String)> = records[0].fields.iter().map(|(k, v)| (*k, v.to_string())).collect();
    assert_eq!(
        srv,
        vec![
            ("service", "_sip._tcp".to_string()),
            ("target", "sip.example.gov.lk".to_string()),
            ("weight", "5".to_string()),
            ("port", "5060".to_string()),
        ]
    );
    assert_eq!(records[1].kind, RecordKind::CCA);
    assert_eq!(records[1].get("ttl"), Some(&FieldValue::Integer(0)));
}

#[tokio::test]
async fn assembly_is_idempotent_with_and_without_cache() {
    let f = fixture(BatchPolicy::Atomic);
    f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();

    let first = f.service.get_records_for_domain(f.domain).await.unwrap();
    let second = f.service.get_records_for_domain(f.domain).await.unwrap();
    assert_eq!(first, second);

    let uncached = RecordAssembler::new(Arc::new(f.storage.clone()), Arc::new(AssemblyCache::default()));
    assert_eq!(uncached.assemble_for_domain(f.domain).await.unwrap(), first);
}

#[tokio::test]
async fn unknown_kind_stops_batch_before_any_write() {
    let f = fixture(BatchPolicy::PerRecord);
    let batch = vec![
        record(f.domain, "a", &[("address", "10.0.0.1")]),
        record(f.domain, "wks", &[("value", "x")]),
    ];
    let report = f.service.submit_records(&f.token, &batch).await.unwrap();

    let (index, outcome, error) = report.failure().unwrap();
    assert_eq!(index, 1);
    assert_eq!(outcome.kind, "wks");
    assert!(matches!(error, RecordError::UnknownKind(_)));
    assert!(matches!(report.outcomes[0].status, RecordStatus::NotProcessed));
    assert_eq!(f.storage.row_counts().unwrap(), empty());
}

#[tokio::test]
async fn invalid_field_names_record_and_field() {
    let f = fixture(BatchPolicy::Atomic);
    let batch = vec![
        record(f.domain, "a", &[("address", "192.168.1.1")]),
        record(f.domain, "mx", &[("value", "mail.example.gov.lk"), ("priority", "abc")]),
    ];
    let report = f.service.submit_records(&f.token, &batch).await.unwrap();

    match report.failure() {
        Some((1, _, RecordError::Validation(e))) => {
            assert_eq!(e.kind, RecordKind::MX);
            assert_eq!(e.field, "priority");
            assert_eq!(e.reason, Reason::NotInteger);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(f.storage.row_counts().unwrap(), empty());
}

#[tokio::test]
async fn atomic_batch_discards_earlier_records_when_a_later_one_fails() {
    let f = fixture(BatchPolicy::Atomic);
    let other = f.storage.create_request("mod").unwrap();
    let foreign = f.storage.add_request_domain(other.id, "army.gov.lk").unwrap();

    let batch = vec![
        record(f.domain, "a", &[("address", "10.0.0.1")]),
        record(foreign.id, "txt", &[("value", "v=spf1 -all")]),
    ];
    let report = f.service.submit_records(&f.token, &batch).await.unwrap();

    assert!(matches!(report.outcomes[0].status, RecordStatus::RolledBack));
    assert!(matches!(
        report.outcomes[1].status,
        RecordStatus::Failed(RecordError::Store(StoreError::DomainNotFound(id))) if id == foreign.id
    ));
    assert_eq!(f.storage.row_counts().unwrap(), empty());
    assert!(f.service.get_records_for_domain(f.domain).await.unwrap().is_empty());
}

#[tokio::test]
async fn per_record_batch_keeps_records_before_the_failure() {
    let f = fixture(BatchPolicy::PerRecord);
    let other = f.storage.create_request("mod").unwrap();
    let foreign = f.storage.add_request_domain(other.id, "army.gov.lk").unwrap();

    let batch = vec![
        record(f.domain, "a", &[("address", "10.0.0.1")]),
        record(foreign.id, "txt", &[("value", "v=spf1 -all")]),
        record(f.domain, "ns", &[("value", "ns1.example.gov.lk")]),
    ];
    let report = f.service.submit_records(&f.token, &batch).await.unwrap();

    assert!(matches!(report.outcomes[0].status, RecordStatus::Stored(_)));
    assert!(matches!(report.outcomes[1].status, RecordStatus::Failed(_)));
    assert!(matches!(report.outcomes[2].status, RecordStatus::NotProcessed));
    assert_eq!(f.storage.row_counts().unwrap(), RowCounts { payloads: 1, pointers: 1, links: 1 });
}

#[tokio::test]
async fn pointer_fault_leaves_no_orphan_payload() {
    for policy in [BatchPolicy::Atomic, BatchPolicy::PerRecord] {
        let f = fixture(policy);
        f.storage.inject_fault(FaultPoint::InsertPointer);
        let report = f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();
        assert!(matches!(
            report.outcomes[0].status,
            RecordStatus::Failed(RecordError::Store(StoreError::Storage { kind: RecordKind::A, .. }))
        ));
        assert_eq!(f.storage.row_counts().unwrap(), empty());

        // 故障只触发一次
        let retry = f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();
        assert!(retry.is_success());
        assert_eq!(f.storage.row_counts().unwrap(), RowCounts { payloads: 2, pointers: 2, links: 2 });
    }
}

#[tokio::test]
async fn link_fault_on_second_record_keeps_only_per_record_commits() {
    let f = fixture(BatchPolicy::PerRecord);
    f.service.submit_records(&f.token, &scenario_batch(f.domain)[..1]).await.unwrap();
    f.storage.inject_fault(FaultPoint::InsertLink);

    let report = f.service.submit_records(&f.token, &scenario_batch(f.domain)[1..]).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(f.storage.row_counts().unwrap(), RowCounts { payloads: 1, pointers: 1, links: 1 });

    let records = f.service.get_records_for_domain(f.domain).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, RecordKind::A);
}

#[tokio::test]
async fn commit_fault_fails_the_whole_atomic_batch() {
    let f = fixture(BatchPolicy::Atomic);
    f.storage.inject_fault(FaultPoint::Commit);
    let err = f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap_err();
    assert!(matches!(err, RequestError::Commit(_)));
    assert_eq!(f.storage.row_counts().unwrap(), empty());
}

#[tokio::test]
async fn store_rejects_domain_of_another_request() {
    let f = fixture(BatchPolicy::Atomic);
    let other = f.storage.create_request("mod").unwrap();
    let foreign = f.storage.add_request_domain(other.id, "army.gov.lk").unwrap();
    let ctx = f.service.context(&f.token).await.unwrap();

    let payload = RecordPayload::CNAME(ValueRecord { value: "www.example.gov.lk".into(), ttl: None });
    let err = f.service.store().store(&ctx, foreign.id, payload.clone()).await.unwrap_err();
    assert!(matches!(err, StoreError::DomainNotFound(id) if id == foreign.id));

    let err = f.service.store().store(&ctx, 999, payload).await.unwrap_err();
    assert!(matches!(err, StoreError::DomainNotFound(999)));
    assert_eq!(f.storage.row_counts().unwrap(), empty());
}

#[tokio::test]
async fn unknown_token_is_rejected() {
    let f = fixture(BatchPolicy::Atomic);
    let err = f.service.submit_records("zzzzzzzzzz", &scenario_batch(f.domain)).await.unwrap_err();
    assert!(matches!(err, RequestError::RequestNotFound));
}

#[tokio::test]
async fn delete_and_purge_remove_all_three_rows() {
    let f = fixture(BatchPolicy::Atomic);
    let batch = vec![
        record(f.domain, "a", &[("address", "10.0.0.1")]),
        record(f.domain, "aaaa", &[("address", "2001:db8::1")]),
        record(f.domain, "txt", &[("value", "hello")]),
    ];
    let stored = f.service.submit_records(&f.token, &batch).await.unwrap().stored();
    assert_eq!(f.service.get_records_for_domain(f.domain).await.unwrap().len(), 3);

    f.service.delete_record(&f.token, stored[1]).await.unwrap();
    let kinds: Vec<RecordKind> = f
        .service
        .get_records_for_domain(f.domain)
        .await
        .unwrap()
        .iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec![RecordKind::A, RecordKind::TXT]);
    assert_eq!(f.storage.row_counts().unwrap(), RowCounts { payloads: 2, pointers: 2, links: 2 });

    let err = f.service.delete_record(&f.token, stored[1]).await.unwrap_err();
    assert!(matches!(err, RequestError::Store(StoreError::RecordNotFound(_))));

    assert_eq!(f.service.purge_domain(&f.token, f.domain).await.unwrap(), 2);
    assert_eq!(f.storage.row_counts().unwrap(), empty());
    assert!(f.service.get_records_for_domain(f.domain).await.unwrap().is_empty());
}

#[tokio::test]
async fn dns_step_requires_records_on_every_domain() {
    let f = fixture(BatchPolicy::Atomic);
    let ctx = f.service.context(&f.token).await.unwrap();
    let second = f.storage.add_request_domain(ctx.request_id, "Mail.Example.gov.lk.").unwrap();

    f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();
    match f.service.ensure_dns_step_complete(&f.token).await {
        Err(RequestError::MissingRecords(missing)) => assert_eq!(missing, vec!["mail.example.gov.lk".to_string()]),
        other => panic!("unexpected result: {:?}", other),
    }

    let batch = vec![record(second.id, "cname", &[("value", "example.gov.lk")])];
    f.service.submit_records(&f.token, &batch).await.unwrap();
    f.service.ensure_dns_step_complete(&f.token).await.unwrap();
}

#[tokio::test]
async fn missing_payload_fails_assembly_instead_of_being_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");

    let f = fixture_on(MemoryStorage::open(&path).unwrap(), BatchPolicy::Atomic);
    f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();
    drop(f.service);
    drop(f.storage);

    let mut snapshot: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    snapshot["dns_mx_record"] = serde_json::json!({});
    std::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let storage = MemoryStorage::open(&path).unwrap();
    let service = DnsRecordService::new(Arc::new(storage), Arc::new(AssemblyCache::default()), BatchPolicy::Atomic);

    let err = service.get_records_for_domain(f.domain).await.unwrap_err();
    assert!(matches!(err, AssemblyError::MissingPayload { kind: RecordKind::MX, .. }));

    let streamed: Vec<_> = service.stream_records_for_domain(f.domain).collect().await;
    assert_eq!(streamed.len(), 2);
    assert_eq!(streamed[0].as_ref().unwrap().kind, RecordKind::A);
    assert!(streamed[1].is_err());

    let err = service.summarize_request(&f.token).await.unwrap_err();
    assert!(matches!(err, RequestError::Assembly(AssemblyError::MissingPayload { .. })));
}

#[tokio::test]
async fn summary_lists_every_domain_with_its_records() {
    let f = fixture(BatchPolicy::Atomic);
    let ctx = f.service.context(&f.token).await.unwrap();
    f.storage.add_request_domain(ctx.request_id, "portal.example.gov.lk").unwrap();
    f.service.submit_records(&f.token, &scenario_batch(f.domain)).await.unwrap();

    let summary = f.service.summarize_request(&f.token).await.unwrap();
    assert_eq!(summary.site_code, "moe");
    assert_eq!(summary.requested_domains.len(), 2);
    assert_eq!(summary.requested_domains[0].dns_records.len(), 2);
    assert!(summary.requested_domains[1].dns_records.is_empty());

    let body = render_notification_body(&summary);
    assert!(body.contains("example.gov.lk\n  A      address=10.0.0.1 ttl=3600\n"));
    assert!(body.contains("  MX     value=mail.example.gov.lk priority=10\n"));
    assert!(body.contains("portal.example.gov.lk\n  (no DNS records)\n"));
}

/// Delegates to `MemoryStorage`, but once armed, pauses the next
/// `links_for_domain` call after the links are read until released.
struct PausingStorage {
    inner: MemoryStorage,
    armed: AtomicBool,
    links_read: Notify,
    release: Notify,
}

#[async_trait::async_trait]
impl Storage for PausingStorage {
    fn name(&self) -> &str { "pausing" }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        self.inner.begin().await
    }

    async fn request_by_token(&self, token: &str) -> Result<Option<RequestRow>, StorageError> {
        self.inner.request_by_token(token).await
    }

    async fn request_domain(&self, id: RequestDomainId) -> Result<Option<RequestDomainRow>, StorageError> {
        self.inner.request_domain(id).await
    }

    async fn request_domains(&self, request_id: RequestId) -> Result<Vec<RequestDomainRow>, StorageError> {
        self.inner.request_domains(request_id).await
    }

    async fn links_for_domain(&self, id: RequestDomainId) -> Result<Vec<LinkRow>, StorageError> {
        let links = self.inner.links_for_domain(id).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.links_read.notify_one();
            self.release.notified().await;
        }
        Ok(links)
    }

    async fn pointer(&self, id: PointerId) -> Result<Option<PointerRow>, StorageError> {
        self.inner.pointer(id).await
    }

    async fn payload(&self, kind: RecordKind, id: PayloadId) -> Result<Option<RecordPayload>, StorageError> {
        self.inner.payload(kind, id).await
    }
}

#[tokio::test]
async fn read_overlapping_a_commit_does_not_cache_the_old_list() {
    let storage = MemoryStorage::new();
    let request = storage.create_request("moe").unwrap();
    let domain = storage.add_request_domain(request.id, "example.gov.lk").unwrap();

    let pausing = Arc::new(PausingStorage {
        inner: storage.clone(),
        armed: AtomicBool::new(true),
        links_read: Notify::new(),
        release: Notify::new(),
    });
    let service = Arc::new(DnsRecordService::new(
        pausing.clone(),
        Arc::new(AssemblyCache::default()),
        BatchPolicy::Atomic,
    ));

    let reader = tokio::spawn({
        let service = service.clone();
        async move { service.get_records_for_domain(domain.id).await }
    });
    pausing.links_read.notified().await;

    let batch = vec![record(domain.id, "a", &[("address", "10.0.0.1")])];
    assert!(service.submit_records(&request.token, &batch).await.unwrap().is_success());
    pausing.release.notify_one();

    // 读取开始于提交之前，返回旧列表本身没问题，但不能留在缓存里
    assert!(reader.await.unwrap().unwrap().is_empty());

    assert_eq!(storage.row_counts().unwrap(), RowCounts { payloads: 1, pointers: 1, links: 1 });
    let records = service.get_records_for_domain(domain.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, RecordKind::A);
}
