//! Error taxonomy for the DNS record sub-system

use crate::storage::FaultPoint;
use crate::types::{LinkId, PayloadId, PointerId, RecordKind, RequestDomainId};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The client named a kind outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid DNS record type: {0}")]
pub struct UnknownKind(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Required,
    NotInteger,
    OutOfRange,
    InvalidIpv4,
    InvalidIpv6,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Required => "required",
            Reason::NotInteger => "not_integer",
            Reason::OutOfRange => "out_of_range",
            Reason::InvalidIpv4 => "invalid_ipv4",
            Reason::InvalidIpv6 => "invalid_ipv6",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} record field '{field}': {reason}")]
pub struct ValidationError {
    pub kind: RecordKind,
    pub field: &'static str,
    pub reason: Reason,
}

/// Faults raised by the storage engine itself.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("constraint violation on {table}: {detail}")]
    Constraint { table: &'static str, detail: String },

    #[error("injected fault at {0:?}")]
    Injected(FaultPoint),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("snapshot I/O on {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("commit worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("requested domain {0} not found in this request")]
    DomainNotFound(RequestDomainId),

    #[error("DNS record {0} not found in this request")]
    RecordNotFound(PointerId),

    // 不向调用方泄露存储层细节，source 只进日志
    #[error("failed to store {kind} record for requested domain {request_domain_id}")]
    Storage {
        kind: RecordKind,
        request_domain_id: RequestDomainId,
        #[source]
        source: StorageError,
    },

    #[error("failed to look up DNS records of this request")]
    Lookup(#[source] StorageError),

    #[error("failed to remove DNS records of requested domain {request_domain_id}")]
    Removal {
        request_domain_id: RequestDomainId,
        #[source]
        source: StorageError,
    },
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("link {link_id} of requested domain {request_domain_id} references missing DNS record {pointer_id}")]
    MissingPointer {
        request_domain_id: RequestDomainId,
        link_id: LinkId,
        pointer_id: PointerId,
    },

    #[error("{kind} record {payload_id} referenced by DNS record {pointer_id} is missing")]
    MissingPayload {
        kind: RecordKind,
        pointer_id: PointerId,
        payload_id: PayloadId,
    },

    #[error("failed to read DNS records of requested domain {request_domain_id}")]
    Storage {
        request_domain_id: RequestDomainId,
        #[source]
        source: StorageError,
    },
}

/// Why one record of a batch was not stored.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    UnknownKind(#[from] UnknownKind),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures that concern the request as a whole rather than one record.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request not found")]
    RequestNotFound,

    #[error("no DNS records submitted for: {}", .0.join(", "))]
    MissingRecords(Vec<String>),

    #[error("failed to commit DNS record batch")]
    Commit(#[source] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("storage failure")]
    Storage(#[from] StorageError),
}
