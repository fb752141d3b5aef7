use prometheus::{
    Encoder, TextEncoder, IntCounter, IntCounterVec,
    register_int_counter, register_int_counter_vec,
};
use lazy_static::lazy_static;

lazy_static! {
    pub static ref RECORDS_STORED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "govreg_dns_records_stored_total",
        "Counter of DNS records stored per record kind.",
        &["kind"]
    ).unwrap();

    pub static ref RECORDS_DELETED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "govreg_dns_records_deleted_total",
        "Counter of DNS records removed per record kind.",
        &["kind"]
    ).unwrap();

    pub static ref VALIDATION_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "govreg_dns_validation_failures_total",
        "Counter of rejected DNS record submissions per kind and reason.",
        &["kind", "reason"]
    ).unwrap();

    pub static ref UNKNOWN_KIND_TOTAL: IntCounter = register_int_counter!(
        "govreg_dns_unknown_kind_total",
        "Counter of submissions naming a record kind outside the supported set."
    ).unwrap();

    pub static ref STORE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "govreg_dns_store_failures_total",
        "Counter of storage failures while writing DNS records, per kind.",
        &["kind"]
    ).unwrap();

    pub static ref ASSEMBLY_ERRORS_TOTAL: IntCounter = register_int_counter!(
        "govreg_dns_assembly_errors_total",
        "Counter of DNS record pointers that could not be resolved to a payload."
    ).unwrap();

    pub static ref ASSEMBLY_CACHE_HITS_TOTAL: IntCounter = register_int_counter!(
        "govreg_dns_assembly_cache_hits_total",
        "The count of assembled record lists served from cache."
    ).unwrap();

    pub static ref ASSEMBLY_CACHE_MISSES_TOTAL: IntCounter = register_int_counter!(
        "govreg_dns_assembly_cache_misses_total",
        "The count of assembled record lists rebuilt from storage."
    ).unwrap();
}

/// Render every registered metric in the Prometheus text format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("[metrics] Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
