//! Static registry of record kinds: type code, storage table and field schema

use crate::error::UnknownKind;
use crate::types::RecordKind;
use lazy_static::lazy_static;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType { Text, Integer }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    pub required: bool,
}

#[derive(Debug)]
pub struct KindInfo {
    pub kind: RecordKind,
    pub type_code: u8,
    pub table: &'static str,
    pub schema: &'static [FieldSpec],
}

impl KindInfo {
    pub fn field(&self, name: &str) -> Option<&'static FieldSpec> {
        self.schema.iter().find(|f| f.name == name)
    }
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Text, required: true }
}

const fn int(name: &'static str) -> FieldSpec {
    FieldSpec { name, ty: FieldType::Integer, required: true }
}

const TTL: FieldSpec = FieldSpec { name: "ttl", ty: FieldType::Integer, required: false };

static ADDRESS_SCHEMA: [FieldSpec; 2] = [text("address"), TTL];
static VALUE_SCHEMA: [FieldSpec; 2] = [text("value"), TTL];
static MX_SCHEMA: [FieldSpec; 3] = [text("value"), int("priority"), TTL];
static SOA_SCHEMA: [FieldSpec; 8] = [
    text("m_name"), text("r_name"),
    int("serial"), int("refresh"), int("retry"), int("expire"), int("min_ttl"),
    TTL,
];
static CCA_SCHEMA: [FieldSpec; 4] = [int("flag"), text("tag"), text("value"), TTL];
static SRV_SCHEMA: [FieldSpec; 5] = [text("service"), text("target"), int("weight"), int("port"), TTL];
static OTHER_SCHEMA: [FieldSpec; 1] = [text("content")];

const fn entry(kind: RecordKind, type_code: u8, table: &'static str, schema: &'static [FieldSpec]) -> KindInfo {
    KindInfo { kind, type_code, table, schema }
}

// 下标与 RecordKind::index() 一一对应
static KINDS: [KindInfo; 11] = [
    entry(RecordKind::A, 1, "dns_a_record", &ADDRESS_SCHEMA),
    entry(RecordKind::AAAA, 2, "dns_aaaa_record", &ADDRESS_SCHEMA),
    entry(RecordKind::CNAME, 3, "dns_cname_record", &VALUE_SCHEMA),
    entry(RecordKind::TXT, 4, "dns_txt_record", &VALUE_SCHEMA),
    entry(RecordKind::PTR, 5, "dns_ptr_record", &VALUE_SCHEMA),
    entry(RecordKind::NS, 6, "dns_ns_record", &VALUE_SCHEMA),
    entry(RecordKind::MX, 7, "dns_mx_record", &MX_SCHEMA),
    entry(RecordKind::SOA, 8, "dns_soa_record", &SOA_SCHEMA),
    entry(RecordKind::CCA, 9, "cca_record", &CCA_SCHEMA),
    entry(RecordKind::SRV, 10, "dns_srv_record", &SRV_SCHEMA),
    entry(RecordKind::Other, 11, "dns_other_record", &OTHER_SCHEMA),
];

lazy_static! {
    static ref BY_NAME: HashMap<String, RecordKind> = RecordKind::ALL
        .iter()
        .map(|k| (k.as_str().to_ascii_lowercase(), *k))
        .collect();
}

pub fn info(kind: RecordKind) -> &'static KindInfo {
    &KINDS[kind.index()]
}

/// Look up a kind by name, ignoring case and surrounding whitespace.
pub fn resolve_kind(name: &str) -> Result<&'static KindInfo, UnknownKind> {
    BY_NAME
        .get(&name.trim().to_ascii_lowercase())
        .map(|kind| info(*kind))
        .ok_or_else(|| UnknownKind(name.to_string()))
}
