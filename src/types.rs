//! Basic types for the DNS record sub-system

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

pub type RequestId = u64;
pub type RequestDomainId = u64;
pub type PayloadId = u64;
pub type PointerId = u64;
pub type LinkId = u64;

/// The closed set of record kinds a requested domain may carry.
///
/// The declaration order is significant: `type_code()` is the position
/// in this list plus one, which is the code the pointer table stores.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordKind { A, AAAA, CNAME, TXT, PTR, NS, MX, SOA, CCA, SRV, Other }

impl RecordKind {
    pub const ALL: [RecordKind; 11] = [
        RecordKind::A, RecordKind::AAAA, RecordKind::CNAME, RecordKind::TXT,
        RecordKind::PTR, RecordKind::NS, RecordKind::MX, RecordKind::SOA,
        RecordKind::CCA, RecordKind::SRV, RecordKind::Other,
    ];

    pub fn index(self) -> usize {
        match self {
            RecordKind::A => 0,
            RecordKind::AAAA => 1,
            RecordKind::CNAME => 2,
            RecordKind::TXT => 3,
            RecordKind::PTR => 4,
            RecordKind::NS => 5,
            RecordKind::MX => 6,
            RecordKind::SOA => 7,
            RecordKind::CCA => 8,
            RecordKind::SRV => 9,
            RecordKind::Other => 10,
        }
    }

    pub fn type_code(self) -> u8 {
        self.index() as u8 + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::A => "A",
            RecordKind::AAAA => "AAAA",
            RecordKind::CNAME => "CNAME",
            RecordKind::TXT => "TXT",
            RecordKind::PTR => "PTR",
            RecordKind::NS => "NS",
            RecordKind::MX => "MX",
            RecordKind::SOA => "SOA",
            RecordKind::CCA => "CCA",
            RecordKind::SRV => "SRV",
            RecordKind::Other => "Other",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// A 与 AAAA 共用同一结构，但各自落在独立的表里
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    pub ttl: Option<u32>,
}

/// Shared shape of CNAME, TXT, PTR and NS payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub value: String,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub value: String,
    pub priority: u32,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoaRecord {
    pub m_name: String,
    pub r_name: String,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub min_ttl: u32,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CcaRecord {
    pub flag: u32,
    pub tag: String,
    pub value: String,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrvRecord {
    pub service: String,
    pub target: String,
    pub weight: u32,
    pub port: u32,
    pub ttl: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherRecord {
    pub content: String,
}

/// A validated, type-specific record payload. Each variant is persisted
/// in its own table.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    A(AddressRecord),
    AAAA(AddressRecord),
    CNAME(ValueRecord),
    TXT(ValueRecord),
    PTR(ValueRecord),
    NS(ValueRecord),
    MX(MxRecord),
    SOA(SoaRecord),
    CCA(CcaRecord),
    SRV(SrvRecord),
    Other(OtherRecord),
}

impl RecordPayload {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordPayload::A(_) => RecordKind::A,
            RecordPayload::AAAA(_) => RecordKind::AAAA,
            RecordPayload::CNAME(_) => RecordKind::CNAME,
            RecordPayload::TXT(_) => RecordKind::TXT,
            RecordPayload::PTR(_) => RecordKind::PTR,
            RecordPayload::NS(_) => RecordKind::NS,
            RecordPayload::MX(_) => RecordKind::MX,
            RecordPayload::SOA(_) => RecordKind::SOA,
            RecordPayload::CCA(_) => RecordKind::CCA,
            RecordPayload::SRV(_) => RecordKind::SRV,
            RecordPayload::Other(_) => RecordKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRow {
    pub id: RequestId,
    pub token: String,
    pub site_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDomainRow {
    pub id: RequestDomainId,
    pub request_id: RequestId,
    pub fqdn: String,
}

/// Type-tagged reference to one payload row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerRow {
    pub id: PointerId,
    pub kind: RecordKind,
    pub payload_id: PayloadId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
    pub id: LinkId,
    pub request_domain_id: RequestDomainId,
    pub pointer_id: PointerId,
}

/// The request a caller is acting under, resolved from its token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub token: String,
}

/// One record as posted by the client form, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordSubmission {
    pub request_domain_id: RequestDomainId,
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(alias = "values", default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(u32),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.write_str(s),
            FieldValue::Integer(n) => write!(f, "{}", n),
        }
    }
}

/// Kind-agnostic view of a stored record. Only fields that hold a value
/// are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedRecord {
    pub kind: RecordKind,
    pub pointer_id: PointerId,
    pub payload_id: PayloadId,
    pub fields: Vec<(&'static str, FieldValue)>,
}

impl FlattenedRecord {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }
}

impl Serialize for FlattenedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        map.serialize_entry("kind", self.kind.as_str())?;
        map.serialize_entry("dns_record_id", &self.pointer_id)?;
        map.serialize_entry("type_record_id", &self.payload_id)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
