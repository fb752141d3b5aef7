//! Per-kind validation of raw form fields into typed record payloads

use super::metrics::{UNKNOWN_KIND_TOTAL, VALIDATION_FAILURES_TOTAL};
use super::registry::{self, FieldType};
use crate::error::{Reason, RecordError, UnknownKind, ValidationError};
use crate::types::{
    AddressRecord, CcaRecord, MxRecord, OtherRecord, RecordKind, RecordPayload, SoaRecord,
    SrvRecord, ValueRecord,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv6Addr;

lazy_static! {
    // regex 的 \d 匹配所有 Unicode 数字，这里只接受 ASCII
    static ref UNSIGNED: Regex = Regex::new(r"^[0-9]+$").unwrap();
    static ref IPV4: Regex = Regex::new(
        r"^(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)(\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)){3}$"
    ).unwrap();
}

enum Value {
    Text(String),
    Int(u32),
}

/// Schema fields that survived the checks, keyed by field name.
struct Checked {
    kind: RecordKind,
    values: HashMap<&'static str, Value>,
}

impl Checked {
    fn missing(&self, field: &'static str) -> ValidationError {
        ValidationError { kind: self.kind, field, reason: Reason::Required }
    }

    fn text(&mut self, field: &'static str) -> Result<String, ValidationError> {
        match self.values.remove(field) {
            Some(Value::Text(s)) => Ok(s),
            _ => Err(self.missing(field)),
        }
    }

    fn int(&self, field: &'static str) -> Result<u32, ValidationError> {
        self.opt_int(field).ok_or_else(|| self.missing(field))
    }

    fn opt_int(&self, field: &'static str) -> Option<u32> {
        match self.values.get(field) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }
}

fn check(kind: RecordKind, raw: &BTreeMap<String, String>) -> Result<Checked, ValidationError> {
    let info = registry::info(kind);

    // 空串（含纯空白）一律视为未填写；schema 之外的字段直接丢弃
    let present: Vec<(&'static str, FieldType, &str)> = info
        .schema
        .iter()
        .filter_map(|spec| {
            raw.get(spec.name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(|v| (spec.name, spec.ty, v))
        })
        .collect();

    for spec in info.schema.iter().filter(|s| s.required) {
        if !present.iter().any(|(name, _, _)| *name == spec.name) {
            return Err(ValidationError { kind, field: spec.name, reason: Reason::Required });
        }
    }

    let mut values = HashMap::with_capacity(present.len());
    for (field, ty, raw_value) in present {
        let value = match ty {
            FieldType::Text => Value::Text(raw_value.to_string()),
            FieldType::Integer => {
                if !UNSIGNED.is_match(raw_value) {
                    return Err(ValidationError { kind, field, reason: Reason::NotInteger });
                }
                let n = raw_value
                    .parse::<u32>()
                    .map_err(|_| ValidationError { kind, field, reason: Reason::OutOfRange })?;
                Value::Int(n)
            }
        };
        values.insert(field, value);
    }

    if let Some(Value::Text(address)) = values.get("address") {
        match kind {
            RecordKind::A if !IPV4.is_match(address) => {
                return Err(ValidationError { kind, field: "address", reason: Reason::InvalidIpv4 });
            }
            // 标准库的解析器覆盖 "::" 压缩与 IPv4 映射尾部两种写法
            RecordKind::AAAA if address.parse::<Ipv6Addr>().is_err() => {
                return Err(ValidationError { kind, field: "address", reason: Reason::InvalidIpv6 });
            }
            _ => {}
        }
    }

    Ok(Checked { kind, values })
}

fn build(mut c: Checked) -> Result<RecordPayload, ValidationError> {
    let payload = match c.kind {
        RecordKind::A => RecordPayload::A(AddressRecord { address: c.text("address")?, ttl: c.opt_int("ttl") }),
        RecordKind::AAAA => RecordPayload::AAAA(AddressRecord { address: c.text("address")?, ttl: c.opt_int("ttl") }),
        RecordKind::CNAME => RecordPayload::CNAME(ValueRecord { value: c.text("value")?, ttl: c.opt_int("ttl") }),
        RecordKind::TXT => RecordPayload::TXT(ValueRecord { value: c.text("value")?, ttl: c.opt_int("ttl") }),
        RecordKind::PTR => RecordPayload::PTR(ValueRecord { value: c.text("value")?, ttl: c.opt_int("ttl") }),
        RecordKind::NS => RecordPayload::NS(ValueRecord { value: c.text("value")?, ttl: c.opt_int("ttl") }),
        RecordKind::MX => RecordPayload::MX(MxRecord {
            value: c.text("value")?,
            priority: c.int("priority")?,
            ttl: c.opt_int("ttl"),
        }),
        RecordKind::SOA => RecordPayload::SOA(SoaRecord {
            m_name: c.text("m_name")?,
            r_name: c.text("r_name")?,
            serial: c.int("serial")?,
            refresh: c.int("refresh")?,
            retry: c.int("retry")?,
            expire: c.int("expire")?,
            min_ttl: c.int("min_ttl")?,
            ttl: c.opt_int("ttl"),
        }),
        RecordKind::CCA => RecordPayload::CCA(CcaRecord {
            flag: c.int("flag")?,
            tag: c.text("tag")?,
            value: c.text("value")?,
            ttl: c.opt_int("ttl"),
        }),
        RecordKind::SRV => RecordPayload::SRV(SrvRecord {
            service: c.text("service")?,
            target: c.text("target")?,
            weight: c.int("weight")?,
            port: c.int("port")?,
            ttl: c.opt_int("ttl"),
        }),
        RecordKind::Other => RecordPayload::Other(OtherRecord { content: c.text("content")? }),
    };
    Ok(payload)
}

/// Check raw form fields against the schema of `kind` and coerce them
/// into a typed payload.
pub fn validate(kind: RecordKind, raw: &BTreeMap<String, String>) -> Result<RecordPayload, ValidationError> {
    check(kind, raw).and_then(build).map_err(|e| {
        VALIDATION_FAILURES_TOTAL.with_label_values(&[e.kind.as_str(), e.reason.as_str()]).inc();
        tracing::warn!("[validator] Rejected {} record: field '{}' {}", e.kind, e.field, e.reason);
        e
    })
}

/// Resolve a client-supplied kind name, then validate.
pub fn validate_named(kind: &str, raw: &BTreeMap<String, String>) -> Result<RecordPayload, RecordError> {
    let info = registry::resolve_kind(kind).map_err(|e: UnknownKind| {
        UNKNOWN_KIND_TOTAL.inc();
        tracing::warn!("[validator] {}", e);
        e
    })?;
    Ok(validate(info.kind, raw)?)
}
