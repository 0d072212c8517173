use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{json, Value};

use super::{
    entities::{Entity, EntityLabel, EntityRecognizer},
    Extraction, FieldExtractor,
};
use crate::{
    email::parsed_message::ParsedMessage, error::PipelineResult, model::record::ApplicationStatus,
};

// Ordered, first match wins. Captures stop at " at", "." or end of text.
const COMPANY_PATTERNS: &[&str] = &[
    r"(?i)applied to\s+(.*?)(?:\s+at\b|\.|$)",
    r"(?i)applying to\s+(.*?)(?:\s+at\b|\.|$)",
    r"(?i)application to\s+(.*?)(?:\s+at\b|\.|$)",
];

const ROLE_PATTERNS: &[&str] = &[
    r"(?i)position of\s+(.*?)(?:\s+at\b|\.|$)",
    r"(?i)role of\s+(.*?)(?:\s+at\b|\.|$)",
    r"(?i)applied for\s+(.*?)(?:\s+at\b|\.|$)",
    r"(?i)application for\s+(?:the\s+)?(.*?)\s+(?:role|position)\b",
];

/// Checked top to bottom; the order settles texts that mention several
const STATUS_KEYWORDS: &[(&[&str], ApplicationStatus)] = &[
    (&["interview", "scheduled"], ApplicationStatus::InterviewScheduled),
    (&["shortlisted"], ApplicationStatus::Shortlisted),
    (&["reject", "not selected"], ApplicationStatus::Rejected),
    (&["applied", "application", "applying"], ApplicationStatus::Applied),
];

lazy_static::lazy_static!(
    static ref COMPANY_RES: Vec<Regex> = compile(COMPANY_PATTERNS);
    static ref ROLE_RES: Vec<Regex> = compile(ROLE_PATTERNS);
);

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().map(|p| Regex::new(p).unwrap()).collect()
}

fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

pub fn extract_company_name(text: &str) -> Option<String> {
    first_capture(&COMPANY_RES, text)
}

pub fn guess_role(text: &str) -> Option<String> {
    first_capture(&ROLE_RES, text)
}

pub fn guess_status(text: &str) -> ApplicationStatus {
    let text = text.to_lowercase();
    STATUS_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map(|(_, status)| *status)
        .unwrap_or(ApplicationStatus::Unknown)
}

pub fn days_since(date: NaiveDate, today: NaiveDate) -> i64 {
    (today - date).num_days().max(0)
}

/// Pattern matches first, then the sender's domain for the company, then
/// recognised entities. Every field has a default so this cannot fail.
pub fn extract_via_heuristics(
    body_text: &str,
    sender_domain: Option<&str>,
    received_date: NaiveDate,
    today: NaiveDate,
    entities: &[Entity],
) -> Value {
    let first_entity = |labels: &[EntityLabel]| {
        entities
            .iter()
            .find(|e| labels.contains(&e.label))
            .map(|e| e.text.clone())
    };

    let company_name = extract_company_name(body_text)
        .or_else(|| sender_domain.map(str::to_string))
        .or_else(|| first_entity(&[EntityLabel::Org]))
        .unwrap_or_default();
    let role = guess_role(body_text)
        .or_else(|| first_entity(&[EntityLabel::Role, EntityLabel::Misc]))
        .unwrap_or_else(|| "Unknown".to_string());
    let status = guess_status(body_text);

    json!({
        "company_name": company_name,
        "role_applied_for": role,
        "status": status.to_string(),
        "date_applied": received_date.format("%Y-%m-%d").to_string(),
        "days_since_update": days_since(received_date, today),
        "entities": entities,
    })
}

pub struct HeuristicExtractor {
    recognizer: Box<dyn EntityRecognizer>,
}

impl HeuristicExtractor {
    pub fn new(recognizer: Box<dyn EntityRecognizer>) -> Self {
        HeuristicExtractor { recognizer }
    }
}

#[async_trait]
impl FieldExtractor for HeuristicExtractor {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    async fn extract(
        &self,
        message: &ParsedMessage,
        today: NaiveDate,
    ) -> PipelineResult<Extraction> {
        let entities = match self.recognizer.recognize(&message.body_text).await {
            Ok(entities) => entities,
            Err(e) => {
                tracing::warn!(
                    "Entity recognition failed for {}, continuing without: {}",
                    message.external_id,
                    e
                );
                vec![]
            }
        };

        let fields = extract_via_heuristics(
            &message.body_text,
            message.sender_domain().as_deref(),
            message.received_at.date_naive(),
            today,
            &entities,
        );

        Ok(Extraction::new(fields))
    }
}
