pub mod memory;

pub use memory::MemoryStorage;

use crate::error::StorageError;
use crate::types::{
    LinkId, LinkRow, PayloadId, PointerId, PointerRow, RecordKind, RecordPayload, RequestDomainId,
    RequestDomainRow, RequestId, RequestRow,
};

/// Operations at which a storage engine can be told to fail, for
/// exercising rollback paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    InsertPayload,
    InsertPointer,
    InsertLink,
    Commit,
}

/// Handle to the storage engine. One instance is created at process start
/// and passed to every component that needs it.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &str;
    async fn begin(&self) -> Result<Box<dyn Transaction>, StorageError>;

    async fn request_by_token(&self, token: &str) -> Result<Option<RequestRow>, StorageError>;
    async fn request_domain(&self, id: RequestDomainId) -> Result<Option<RequestDomainRow>, StorageError>;
    async fn request_domains(&self, request_id: RequestId) -> Result<Vec<RequestDomainRow>, StorageError>;

    /// Links of a requested domain, in insertion order.
    async fn links_for_domain(&self, id: RequestDomainId) -> Result<Vec<LinkRow>, StorageError>;
    async fn pointer(&self, id: PointerId) -> Result<Option<PointerRow>, StorageError>;
    async fn payload(&self, kind: RecordKind, id: PayloadId) -> Result<Option<RecordPayload>, StorageError>;
}

/// A unit of work against the record tables. Nothing is visible to
/// readers until `commit`; dropping the transaction discards it.
#[async_trait::async_trait]
pub trait Transaction: Send {
    async fn insert_payload(&mut self, payload: RecordPayload) -> Result<PayloadId, StorageError>;
    async fn insert_pointer(&mut self, kind: RecordKind, payload_id: PayloadId) -> Result<PointerId, StorageError>;
    async fn insert_link(&mut self, request_domain_id: RequestDomainId, pointer_id: PointerId) -> Result<LinkId, StorageError>;

    async fn delete_link(&mut self, id: LinkId) -> Result<(), StorageError>;
    async fn delete_pointer(&mut self, id: PointerId) -> Result<(), StorageError>;
    async fn delete_payload(&mut self, kind: RecordKind, id: PayloadId) -> Result<(), StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
}
