//! In-memory storage engine with optional JSON snapshot persistence

use super::{FaultPoint, Storage, Transaction};
use crate::dns::registry;
use crate::error::StorageError;
use crate::types::{
    AddressRecord, CcaRecord, LinkId, LinkRow, MxRecord, OtherRecord, PayloadId, PointerId,
    PointerRow, RecordKind, RecordPayload, RequestDomainId, RequestDomainRow, RequestId,
    RequestRow, SoaRecord, SrvRecord, ValueRecord,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Tables {
    requests: BTreeMap<RequestId, RequestRow>,
    request_domains: BTreeMap<RequestDomainId, RequestDomainRow>,
    dns_a_record: BTreeMap<PayloadId, AddressRecord>,
    dns_aaaa_record: BTreeMap<PayloadId, AddressRecord>,
    dns_cname_record: BTreeMap<PayloadId, ValueRecord>,
    dns_txt_record: BTreeMap<PayloadId, ValueRecord>,
    dns_ptr_record: BTreeMap<PayloadId, ValueRecord>,
    dns_ns_record: BTreeMap<PayloadId, ValueRecord>,
    dns_mx_record: BTreeMap<PayloadId, MxRecord>,
    dns_soa_record: BTreeMap<PayloadId, SoaRecord>,
    cca_record: BTreeMap<PayloadId, CcaRecord>,
    dns_srv_record: BTreeMap<PayloadId, SrvRecord>,
    dns_other_record: BTreeMap<PayloadId, OtherRecord>,
    dns_record: BTreeMap<PointerId, PointerRow>,
    request_dns_record: BTreeMap<LinkId, LinkRow>,
    sequences: Sequences,
}

/// Next id of every table, saved with the snapshot so ids freed by a
/// delete are not handed out again after a reload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
struct Sequences {
    payloads: [u64; 11],
    dns_record: u64,
    request_dns_record: u64,
    requests: u64,
    request_domains: u64,
}

/// Number of live rows, summed over the payload tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RowCounts {
    pub payloads: usize,
    pub pointers: usize,
    pub links: usize,
}

enum Op {
    InsertPayload(PayloadId, RecordPayload),
    InsertPointer(PointerRow),
    InsertLink(LinkRow),
    DeleteLink(LinkId),
    DeletePointer(PointerId),
    DeletePayload(RecordKind, PayloadId),
}

fn last_key<T>(table: &BTreeMap<u64, T>) -> u64 {
    table.keys().next_back().copied().unwrap_or(0)
}

fn constraint(table: &'static str, detail: String) -> StorageError {
    StorageError::Constraint { table, detail }
}

impl Tables {
    // 十一张记录表的分派全部集中在下面几个 match 里，新增类型时编译器会逐一提醒
    fn put_payload(&mut self, id: PayloadId, payload: RecordPayload) {
        match payload {
            RecordPayload::A(r) => { self.dns_a_record.insert(id, r); }
            RecordPayload::AAAA(r) => { self.dns_aaaa_record.insert(id, r); }
            RecordPayload::CNAME(r) => { self.dns_cname_record.insert(id, r); }
            RecordPayload::TXT(r) => { self.dns_txt_record.insert(id, r); }
            RecordPayload::PTR(r) => { self.dns_ptr_record.insert(id, r); }
            RecordPayload::NS(r) => { self.dns_ns_record.insert(id, r); }
            RecordPayload::MX(r) => { self.dns_mx_record.insert(id, r); }
            RecordPayload::SOA(r) => { self.dns_soa_record.insert(id, r); }
            RecordPayload::CCA(r) => { self.cca_record.insert(id, r); }
            RecordPayload::SRV(r) => { self.dns_srv_record.insert(id, r); }
            RecordPayload::Other(r) => { self.dns_other_record.insert(id, r); }
        }
    }

    fn get_payload(&self, kind: RecordKind, id: PayloadId) -> Option<RecordPayload> {
        match kind {
            RecordKind::A => self.dns_a_record.get(&id).cloned().map(RecordPayload::A),
            RecordKind::AAAA => self.dns_aaaa_record.get(&id).cloned().map(RecordPayload::AAAA),
            RecordKind::CNAME => self.dns_cname_record.get(&id).cloned().map(RecordPayload::CNAME),
            RecordKind::TXT => self.dns_txt_record.get(&id).cloned().map(RecordPayload::TXT),
            RecordKind::PTR => self.dns_ptr_record.get(&id).cloned().map(RecordPayload::PTR),
            RecordKind::NS => self.dns_ns_record.get(&id).cloned().map(RecordPayload::NS),
            RecordKind::MX => self.dns_mx_record.get(&id).cloned().map(RecordPayload::MX),
            RecordKind::SOA => self.dns_soa_record.get(&id).cloned().map(RecordPayload::SOA),
            RecordKind::CCA => self.cca_record.get(&id).cloned().map(RecordPayload::CCA),
            RecordKind::SRV => self.dns_srv_record.get(&id).cloned().map(RecordPayload::SRV),
            RecordKind::Other => self.dns_other_record.get(&id).cloned().map(RecordPayload::Other),
        }
    }

    fn has_payload(&self, kind: RecordKind, id: PayloadId) -> bool {
        match kind {
            RecordKind::A => self.dns_a_record.contains_key(&id),
            RecordKind::AAAA => self.dns_aaaa_record.contains_key(&id),
            RecordKind::CNAME => self.dns_cname_record.contains_key(&id),
            RecordKind::TXT => self.dns_txt_record.contains_key(&id),
            RecordKind::PTR => self.dns_ptr_record.contains_key(&id),
            RecordKind::NS => self.dns_ns_record.contains_key(&id),
            RecordKind::MX => self.dns_mx_record.contains_key(&id),
            RecordKind::SOA => self.dns_soa_record.contains_key(&id),
            RecordKind::CCA => self.cca_record.contains_key(&id),
            RecordKind::SRV => self.dns_srv_record.contains_key(&id),
            RecordKind::Other => self.dns_other_record.contains_key(&id),
        }
    }

    fn remove_payload(&mut self, kind: RecordKind, id: PayloadId) -> bool {
        match kind {
            RecordKind::A => self.dns_a_record.remove(&id).is_some(),
            RecordKind::AAAA => self.dns_aaaa_record.remove(&id).is_some(),
            RecordKind::CNAME => self.dns_cname_record.remove(&id).is_some(),
            RecordKind::TXT => self.dns_txt_record.remove(&id).is_some(),
            RecordKind::PTR => self.dns_ptr_record.remove(&id).is_some(),
            RecordKind::NS => self.dns_ns_record.remove(&id).is_some(),
            RecordKind::MX => self.dns_mx_record.remove(&id).is_some(),
            RecordKind::SOA => self.dns_soa_record.remove(&id).is_some(),
            RecordKind::CCA => self.cca_record.remove(&id).is_some(),
            RecordKind::SRV => self.dns_srv_record.remove(&id).is_some(),
            RecordKind::Other => self.dns_other_record.remove(&id).is_some(),
        }
    }

    fn last_payload_id(&self, kind: RecordKind) -> PayloadId {
        match kind {
            RecordKind::A => last_key(&self.dns_a_record),
            RecordKind::AAAA => last_key(&self.dns_aaaa_record),
            RecordKind::CNAME => last_key(&self.dns_cname_record),
            RecordKind::TXT => last_key(&self.dns_txt_record),
            RecordKind::PTR => last_key(&self.dns_ptr_record),
            RecordKind::NS => last_key(&self.dns_ns_record),
            RecordKind::MX => last_key(&self.dns_mx_record),
            RecordKind::SOA => last_key(&self.dns_soa_record),
            RecordKind::CCA => last_key(&self.cca_record),
            RecordKind::SRV => last_key(&self.dns_srv_record),
            RecordKind::Other => last_key(&self.dns_other_record),
        }
    }

    fn payload_count(&self) -> usize {
        self.dns_a_record.len()
            + self.dns_aaaa_record.len()
            + self.dns_cname_record.len()
            + self.dns_txt_record.len()
            + self.dns_ptr_record.len()
            + self.dns_ns_record.len()
            + self.dns_mx_record.len()
            + self.dns_soa_record.len()
            + self.cca_record.len()
            + self.dns_srv_record.len()
            + self.dns_other_record.len()
    }

    /// Apply one staged operation, enforcing link -> pointer -> payload
    /// references in both directions.
    fn apply(&mut self, op: Op) -> Result<(), StorageError> {
        match op {
            Op::InsertPayload(id, payload) => {
                let kind = payload.kind();
                if self.has_payload(kind, id) {
                    return Err(constraint(registry::info(kind).table, format!("duplicate id {}", id)));
                }
                self.put_payload(id, payload);
            }
            Op::InsertPointer(row) => {
                if !self.has_payload(row.kind, row.payload_id) {
                    return Err(constraint("dns_record", format!("{} payload {} does not exist", row.kind, row.payload_id)));
                }
                self.dns_record.insert(row.id, row);
            }
            Op::InsertLink(row) => {
                if !self.dns_record.contains_key(&row.pointer_id) {
                    return Err(constraint("request_dns_record", format!("dns_record {} does not exist", row.pointer_id)));
                }
                if !self.request_domains.contains_key(&row.request_domain_id) {
                    return Err(constraint("request_dns_record", format!("request_domain {} does not exist", row.request_domain_id)));
                }
                self.request_dns_record.insert(row.id, row);
            }
            Op::DeleteLink(id) => {
                if self.request_dns_record.remove(&id).is_none() {
                    return Err(constraint("request_dns_record", format!("link {} does not exist", id)));
                }
            }
            Op::DeletePointer(id) => {
                if self.request_dns_record.values().any(|l| l.pointer_id == id) {
                    return Err(constraint("dns_record", format!("dns_record {} is still linked", id)));
                }
                if self.dns_record.remove(&id).is_none() {
                    return Err(constraint("dns_record", format!("dns_record {} does not exist", id)));
                }
            }
            Op::DeletePayload(kind, id) => {
                let table = registry::info(kind).table;
                if self.dns_record.values().any(|p| p.kind == kind && p.payload_id == id) {
                    return Err(constraint(table, format!("payload {} is still referenced", id)));
                }
                if !self.remove_payload(kind, id) {
                    return Err(constraint(table, format!("payload {} does not exist", id)));
                }
            }
        }
        Ok(())
    }
}

struct Inner {
    tables: RwLock<Tables>,
    payload_seq: [AtomicU64; 11],
    pointer_seq: AtomicU64,
    link_seq: AtomicU64,
    request_seq: AtomicU64,
    request_domain_seq: AtomicU64,
    fault: Mutex<Option<FaultPoint>>,
    snapshot: Option<PathBuf>,
}

impl Inner {
    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::Poisoned)?;
        Ok(f(&tables))
    }

    /// Run `f` against a copy of the tables and publish it only if `f`
    /// and the snapshot write both succeed.
    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R, StorageError>) -> Result<R, StorageError> {
        let mut tables = self.tables.write().map_err(|_| StorageError::Poisoned)?;
        let mut next = tables.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.snapshot {
            next.sequences = self.sequences();
            persist(path, &next)?;
        }
        *tables = next;
        Ok(out)
    }

    fn sequences(&self) -> Sequences {
        Sequences {
            payloads: std::array::from_fn(|i| self.payload_seq[i].load(Ordering::SeqCst)),
            dns_record: self.pointer_seq.load(Ordering::SeqCst),
            request_dns_record: self.link_seq.load(Ordering::SeqCst),
            requests: self.request_seq.load(Ordering::SeqCst),
            request_domains: self.request_domain_seq.load(Ordering::SeqCst),
        }
    }

    fn trip(&self, point: FaultPoint) -> Result<(), StorageError> {
        let mut fault = self.fault.lock().map_err(|_| StorageError::Poisoned)?;
        if *fault == Some(point) {
            *fault = None;
            return Err(StorageError::Injected(point));
        }
        Ok(())
    }
}

/// Resume a sequence after whichever is higher: the saved counter or the
/// largest id still present.
fn resume(saved: u64, last: u64) -> AtomicU64 {
    AtomicU64::new(saved.max(last + 1))
}

fn next_id(seq: &AtomicU64) -> u64 {
    seq.fetch_add(1, Ordering::SeqCst)
}

fn persist(path: &Path, tables: &Tables) -> Result<(), StorageError> {
    let io = |source: std::io::Error| StorageError::Snapshot { path: path.to_path_buf(), source };
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
    }
    let bytes = serde_json::to_vec_pretty(tables)?;
    // 先写临时文件再 rename，避免进程中途退出留下半截快照
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(io)?;
    std::fs::rename(&tmp, path).map_err(io)
}

fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    (0..10).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
}

/// Storage engine that keeps every table in memory behind one lock.
///
/// Transactions stage their writes locally and publish them in a single
/// step at commit, so readers never observe half of a record. When opened
/// with a snapshot path the tables are reloaded from, and rewritten to,
/// that JSON file on every commit.
///
/// Commits run on the blocking pool. The whole snapshot is rewritten while
/// the table lock is held, so readers wait for the disk write; this engine
/// is sized for single-operator registries, not high write rates.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::from_tables(Tables::default(), None)
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a snapshot-backed store, starting empty when the file does not
    /// exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let tables = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(source) => return Err(StorageError::Snapshot { path, source }),
        };
        tracing::info!(
            "[storage] Loaded snapshot {} ({} request(s), {} DNS record(s))",
            path.display(), tables.requests.len(), tables.dns_record.len()
        );
        Ok(Self::from_tables(tables, Some(path)))
    }

    fn from_tables(tables: Tables, snapshot: Option<PathBuf>) -> Self {
        let saved = tables.sequences;
        let payload_seq = std::array::from_fn(|i| {
            resume(saved.payloads[i], tables.last_payload_id(RecordKind::ALL[i]))
        });
        let inner = Inner {
            payload_seq,
            pointer_seq: resume(saved.dns_record, last_key(&tables.dns_record)),
            link_seq: resume(saved.request_dns_record, last_key(&tables.request_dns_record)),
            request_seq: resume(saved.requests, last_key(&tables.requests)),
            request_domain_seq: resume(saved.request_domains, last_key(&tables.request_domains)),
            tables: RwLock::new(tables),
            fault: Mutex::new(None),
            snapshot,
        };
        Self { inner: Arc::new(inner) }
    }

    /// Make the next operation of the given kind fail. One-shot.
    pub fn inject_fault(&self, point: FaultPoint) {
        if let Ok(mut fault) = self.inner.fault.lock() {
            *fault = Some(point);
        }
    }

    /// Open a new registration request with a fresh 10-letter token.
    pub fn create_request(&self, site_code: &str) -> Result<RequestRow, StorageError> {
        let row = self.inner.write(|t| {
            let token = loop {
                let candidate = generate_token();
                if !t.requests.values().any(|r| r.token == candidate) {
                    break candidate;
                }
            };
            let row = RequestRow {
                id: next_id(&self.inner.request_seq),
                token,
                site_code: site_code.to_string(),
            };
            t.requests.insert(row.id, row.clone());
            Ok(row)
        })?;
        tracing::info!("[storage] Created request {} for site {}", row.id, row.site_code);
        Ok(row)
    }

    pub fn add_request_domain(&self, request_id: RequestId, fqdn: &str) -> Result<RequestDomainRow, StorageError> {
        let fqdn = fqdn.trim().trim_end_matches('.').to_ascii_lowercase();
        self.inner.write(|t| {
            if !t.requests.contains_key(&request_id) {
                return Err(constraint("request_domains", format!("request {} does not exist", request_id)));
            }
            let row = RequestDomainRow {
                id: next_id(&self.inner.request_domain_seq),
                request_id,
                fqdn,
            };
            t.request_domains.insert(row.id, row.clone());
            Ok(row)
        })
    }

    pub fn row_counts(&self) -> Result<RowCounts, StorageError> {
        self.inner.read(|t| RowCounts {
            payloads: t.payload_count(),
            pointers: t.dns_record.len(),
            links: t.request_dns_record.len(),
        })
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str { "memory" }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(MemoryTransaction {
            inner: self.inner.clone(),
            ops: Vec::new(),
            committed: false,
        }))
    }

    async fn request_by_token(&self, token: &str) -> Result<Option<RequestRow>, StorageError> {
        self.inner.read(|t| t.requests.values().find(|r| r.token == token).cloned())
    }

    async fn request_domain(&self, id: RequestDomainId) -> Result<Option<RequestDomainRow>, StorageError> {
        self.inner.read(|t| t.request_domains.get(&id).cloned())
    }

    async fn request_domains(&self, request_id: RequestId) -> Result<Vec<RequestDomainRow>, StorageError> {
        self.inner.read(|t| {
            t.request_domains.values().filter(|d| d.request_id == request_id).cloned().collect()
        })
    }

    async fn links_for_domain(&self, id: RequestDomainId) -> Result<Vec<LinkRow>, StorageError> {
        // BTreeMap 按 link id 升序遍历，即插入顺序
        self.inner.read(|t| {
            t.request_dns_record.values().filter(|l| l.request_domain_id == id).copied().collect()
        })
    }

    async fn pointer(&self, id: PointerId) -> Result<Option<PointerRow>, StorageError> {
        self.inner.read(|t| t.dns_record.get(&id).copied())
    }

    async fn payload(&self, kind: RecordKind, id: PayloadId) -> Result<Option<RecordPayload>, StorageError> {
        self.inner.read(|t| t.get_payload(kind, id))
    }
}

pub struct MemoryTransaction {
    inner: Arc<Inner>,
    ops: Vec<Op>,
    committed: bool,
}

#[async_trait::async_trait]
impl Transaction for MemoryTransaction {
    async fn insert_payload(&mut self, payload: RecordPayload) -> Result<PayloadId, StorageError> {
        self.inner.trip(FaultPoint::InsertPayload)?;
        let id = next_id(&self.inner.payload_seq[payload.kind().index()]);
        self.ops.push(Op::InsertPayload(id, payload));
        Ok(id)
    }

    async fn insert_pointer(&mut self, kind: RecordKind, payload_id: PayloadId) -> Result<PointerId, StorageError> {
        self.inner.trip(FaultPoint::InsertPointer)?;
        let id = next_id(&self.inner.pointer_seq);
        self.ops.push(Op::InsertPointer(PointerRow { id, kind, payload_id }));
        Ok(id)
    }

    async fn insert_link(&mut self, request_domain_id: RequestDomainId, pointer_id: PointerId) -> Result<LinkId, StorageError> {
        self.inner.trip(FaultPoint::InsertLink)?;
        let id = next_id(&self.inner.link_seq);
        self.ops.push(Op::InsertLink(LinkRow { id, request_domain_id, pointer_id }));
        Ok(id)
    }

    async fn delete_link(&mut self, id: LinkId) -> Result<(), StorageError> {
        self.ops.push(Op::DeleteLink(id));
        Ok(())
    }

    async fn delete_pointer(&mut self, id: PointerId) -> Result<(), StorageError> {
        self.ops.push(Op::DeletePointer(id));
        Ok(())
    }

    async fn delete_payload(&mut self, kind: RecordKind, id: PayloadId) -> Result<(), StorageError> {
        self.ops.push(Op::DeletePayload(kind, id));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut this = self;
        this.inner.trip(FaultPoint::Commit)?;
        let ops = std::mem::take(&mut this.ops);
        let inner = this.inner.clone();
        // 应用和写快照都是阻塞操作，放到 blocking 线程池，避免卡住 runtime worker
        tokio::task::spawn_blocking(move || {
            inner.write(|t| {
                for op in ops {
                    t.apply(op)?;
                }
                Ok(())
            })
        })
        .await??;
        this.committed = true;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.committed && !self.ops.is_empty() {
            tracing::debug!("[storage] Rolled back {} staged operation(s)", self.ops.len());
        }
    }
}
