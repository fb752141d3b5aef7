//! Request summary used by the export view and the operations email

use crate::types::{FlattenedRecord, RequestDomainId, RequestId};
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainSummary {
    pub request_domain_id: RequestDomainId,
    pub fqdn: String,
    pub dns_records: Vec<FlattenedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub site_code: String,
    pub requested_domains: Vec<DomainSummary>,
}

/// One line per record: kind, then `name=value` pairs in schema order.
pub fn render_record(record: &FlattenedRecord) -> String {
    let mut line = format!("{:<6}", record.kind.as_str());
    for (name, value) in &record.fields {
        let _ = write!(line, " {}={}", name, value);
    }
    line
}

/// Plain-text body for the notification sent to operations staff once a
/// request is submitted.
pub fn render_notification_body(summary: &RequestSummary) -> String {
    let mut body = String::new();
    let _ = writeln!(
        body,
        "Domain request #{} from organization {} has been submitted.",
        summary.request_id, summary.site_code
    );

    for domain in &summary.requested_domains {
        let _ = writeln!(body);
        let _ = writeln!(body, "{}", domain.fqdn);
        if domain.dns_records.is_empty() {
            let _ = writeln!(body, "  (no DNS records)");
        }
        for record in &domain.dns_records {
            let _ = writeln!(body, "  {}", render_record(record));
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldValue, RecordKind};

    fn summary() -> RequestSummary {
        RequestSummary {
            request_id: 7,
            site_code: "moe".into(),
            requested_domains: vec![DomainSummary {
                request_domain_id: 1,
                fqdn: "school.gov.lk".into(),
                dns_records: vec![
                    FlattenedRecord {
                        kind: RecordKind::A,
                        pointer_id: 1,
                        payload_id: 1,
                        fields: vec![
                            ("address", FieldValue::Text("10.0.0.1".into())),
                            ("ttl", FieldValue::Integer(3600)),
                        ],
                    },
                    FlattenedRecord {
                        kind: RecordKind::MX,
                        pointer_id: 2,
                        payload_id: 1,
                        fields: vec![
                            ("value", FieldValue::Text("mail.school.gov.lk".into())),
                            ("priority", FieldValue::Integer(10)),
                        ],
                    },
                ],
            }],
        }
    }

    #[test]
    fn notification_lists_records_under_their_domain() {
        let body = render_notification_body(&summary());
        assert_eq!(
            body,
            "Domain request #7 from organization moe has been submitted.\n\
             \n\
             school.gov.lk\n  \
             A      address=10.0.0.1 ttl=3600\n  \
             MX     value=mail.school.gov.lk priority=10\n"
        );
    }

    #[test]
    fn summary_serializes_flat_records() {
        let json = serde_json::to_value(summary()).unwrap();
        assert_eq!(json["requested_domains"][0]["dns_records"][1]["priority"], 10);
        assert!(json["requested_domains"][0]["dns_records"][1].get("ttl").is_none());
    }
}
