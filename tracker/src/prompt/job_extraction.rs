use indoc::formatdoc;
use serde_json::{json, Value};

use super::hugging_face::TextGeneration;
use crate::{error::PipelineResult, extract::Extraction};

pub fn extraction_prompt(email_text: &str) -> String {
    formatdoc! {r#"
        You are an AI assistant that extracts structured job application information from emails.

        Extract the following fields in JSON format (exact keys):
        - type: "confirmation" | "update" | "other"
        - company: Company name mentioned or empty string
        - role: Job title mentioned or empty string
        - date: Date of application or update in YYYY-MM-DD or empty string

        Respond ONLY with the JSON object, nothing else.

        Email:
        """{email_text}""""#}
}

/// At most `max_chars` characters, never splitting a code point
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Sends the first `max_chars` of the body to the model and turns whatever
/// comes back into an extraction. Only the request itself can fail; an
/// unusable reply becomes the default record.
pub async fn extract_job_fields(
    generator: &dyn TextGeneration,
    body: &str,
    max_chars: usize,
) -> PipelineResult<Extraction> {
    let prompt = extraction_prompt(truncate_chars(body, max_chars));
    let reply = generator.generate(&prompt).await?;
    let text = response_text(&reply);

    Ok(parse_extraction(&text))
}

/// Text fragment of a reply: `generated_text`, then `summary_text`, then the
/// whole structure serialized.
pub fn response_text(reply: &Value) -> String {
    match reply {
        Value::Array(items) => match items.first() {
            Some(first @ Value::Object(_)) => {
                pick_text(first).unwrap_or_else(|| first.to_string())
            }
            _ => reply.to_string(),
        },
        Value::Object(_) => pick_text(reply).unwrap_or_else(|| reply.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn pick_text(obj: &Value) -> Option<String> {
    ["generated_text", "summary_text"]
        .iter()
        .filter_map(|key| obj.get(key).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First `{` to last `}`, then the whole fragment, then the default record
pub fn parse_extraction(text: &str) -> Extraction {
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            if let Ok(fields @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
                return Extraction::new(fields);
            }
        }
    }

    match serde_json::from_str::<Value>(text) {
        Ok(fields @ Value::Object(_)) => Extraction::new(fields),
        _ => {
            tracing::debug!("No JSON object in model reply, using default record");
            Extraction::defaulted(default_fields(text))
        }
    }
}

pub fn default_fields(raw: &str) -> Value {
    json!({
        "type": "other",
        "company": "",
        "role": "",
        "date": "",
        "raw": raw,
    })
}
