use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::record::ExtractedRecord;
use crate::{email::parsed_message::ParsedMessage, extract::Extraction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Kind,
    Company,
    Role,
    Date,
}

/// Historical key names per field, in precedence order, and the default
/// used when none of them holds a non-empty string.
const ALIASES: &[(Field, &[&str], &str)] = &[
    (Field::Kind, &["type", "status"], "other"),
    (Field::Company, &["company", "company_name"], ""),
    (Field::Role, &["role", "role_applied_for"], ""),
    (Field::Date, &["date", "date_applied"], ""),
];

fn lookup(fields: &Value, field: Field) -> String {
    let Some((_, keys, default)) = ALIASES.iter().find(|(f, _, _)| *f == field) else {
        return String::new();
    };

    keys.iter()
        .filter_map(|key| fields.get(key).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(default)
        .to_string()
}

/// `YYYY-MM-DD`, a naive ISO timestamp, or RFC 3339. Anything else is `None`.
pub fn coerce_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Reconciles an extraction with the message it came from. Pure: the same
/// inputs always give the same record.
pub fn normalize(
    message: &ParsedMessage,
    extraction: &Extraction,
    today: NaiveDate,
) -> ExtractedRecord {
    let fields = &extraction.fields;
    let received = message.received_at.date_naive();
    let days_since = (today - received).num_days().clamp(0, i32::MAX as i64) as i32;

    ExtractedRecord {
        external_id: message.external_id.clone(),
        sender: message.sender.clone(),
        subject: message.subject.clone(),
        kind: lookup(fields, Field::Kind),
        company: lookup(fields, Field::Company),
        role: lookup(fields, Field::Role),
        event_date: coerce_date(&lookup(fields, Field::Date)),
        days_since,
        raw_extraction: fields.clone(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn message() -> ParsedMessage {
        ParsedMessage {
            external_id: "m-1".to_string(),
            sender: "Careers <careers@acme.com>".to_string(),
            sender_address: Some("careers@acme.com".to_string()),
            subject: "Your application".to_string(),
            received_at: Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap(),
            ..Default::default()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
    }

    #[test]
    fn test_coerce_date() {
        assert_eq!(coerce_date("2024-02-29"), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(coerce_date("2024-02-29T10:15:00"), NaiveDate::from_ymd_opt(2024, 2, 29));
        assert_eq!(
            coerce_date("2024-02-29T10:15:00.250"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(
            coerce_date("2024-02-29T23:15:00-05:00"),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(coerce_date("2024-13-40"), None);
        assert_eq!(coerce_date("2023-02-29"), None);
        assert_eq!(coerce_date("next tuesday"), None);
        assert_eq!(coerce_date(""), None);
    }

    #[test]
    fn test_first_convention() {
        let extraction = Extraction::new(json!({
            "type": "confirmation",
            "company": "Acme",
            "role": "SRE",
            "date": "2024-02-28"
        }));

        let record = normalize(&message(), &extraction, today());

        assert_eq!(record.external_id, "m-1");
        assert_eq!(record.sender, "Careers <careers@acme.com>");
        assert_eq!(record.subject, "Your application");
        assert_eq!(record.kind, "confirmation");
        assert_eq!(record.company, "Acme");
        assert_eq!(record.role, "SRE");
        assert_eq!(record.event_date, NaiveDate::from_ymd_opt(2024, 2, 28));
        assert_eq!(record.days_since, 7);
        assert_eq!(record.raw_extraction, extraction.fields);
    }

    #[test]
    fn test_second_convention() {
        let extraction = Extraction::new(json!({
            "status": "Interview Scheduled",
            "company_name": "Globex",
            "role_applied_for": "Unknown",
            "date_applied": "2024-03-01",
            "days_since_update": 99
        }));

        let record = normalize(&message(), &extraction, today());

        assert_eq!(record.kind, "Interview Scheduled");
        assert_eq!(record.company, "Globex");
        assert_eq!(record.role, "Unknown");
        assert_eq!(record.event_date, NaiveDate::from_ymd_opt(2024, 3, 1));
        // Always from the arrival date, never from the extraction
        assert_eq!(record.days_since, 7);
    }

    #[test]
    fn test_empty_alias_falls_through() {
        let extraction = Extraction::new(json!({
            "type": "",
            "status": "update",
            "company": "  ",
            "company_name": "Initech",
            "role": 42,
            "role_applied_for": "Analyst"
        }));

        let record = normalize(&message(), &extraction, today());

        assert_eq!(record.kind, "update");
        assert_eq!(record.company, "Initech");
        assert_eq!(record.role, "Analyst");
        assert_eq!(record.event_date, None);
    }

    #[test]
    fn test_defaults() {
        for fields in [json!({}), json!([1, 2]), json!("text"), Value::Null] {
            let record = normalize(&message(), &Extraction::new(fields), today());

            assert_eq!(record.kind, "other");
            assert_eq!(record.company, "");
            assert_eq!(record.role, "");
            assert_eq!(record.event_date, None);
        }
    }

    #[test]
    fn test_invalid_date_is_null() {
        let extraction = Extraction::new(json!({"date": "2024-13-40"}));
        assert_eq!(normalize(&message(), &extraction, today()).event_date, None);
    }

    #[test]
    fn test_future_arrival_clamps_to_zero() {
        let record = normalize(
            &message(),
            &Extraction::new(json!({})),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        assert_eq!(record.days_since, 0);
    }

    #[test]
    fn test_idempotent() {
        let extraction = Extraction::new(json!({"status": "Applied", "company_name": "Hooli"}));

        let first = normalize(&message(), &extraction, today());
        let second = normalize(&message(), &extraction, today());

        assert_eq!(first, second);
    }
}
