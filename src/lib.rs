//! govreg-dns - DNS record sub-system of the government domain registration workflow
//!
//! Validates, stores and reassembles the DNS records an applicant attaches to
//! each requested domain.

pub mod config;
pub mod dns;
pub mod error;
pub mod service;
pub mod storage;
pub mod submission;
pub mod summary;
pub mod types;

pub use dns::{AssemblyCache, RecordAssembler, RecordStore};
pub use error::{AssemblyError, RecordError, RequestError, StoreError, ValidationError};
pub use service::DnsRecordService;
pub use storage::{MemoryStorage, Storage, Transaction};
pub use submission::{submit_batch, BatchPolicy, BatchReport, RecordStatus};
pub use types::{FlattenedRecord, RecordKind, RecordPayload, RecordSubmission, RequestContext};
