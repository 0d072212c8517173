use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::PipelineResult,
    prompt::{hugging_face::HuggingFaceClient, job_extraction::truncate_chars},
};

const RE_ORG_STR: &str = r"\b((?:[A-Z][A-Za-z0-9&'-]*\s+){1,3}(?:Inc|Corp|Corporation|Company|LLC|Ltd|Limited|GmbH|Technologies|Labs|Systems|Group|Solutions))\b";
const RE_ROLE_STR: &str = r"\b((?:[A-Z][A-Za-z0-9+#/-]*\s+){0,3}(?:Engineer|Developer|Manager|Analyst|Designer|Scientist|Intern|Consultant|Architect|Specialist|Administrator|Lead))\b";

lazy_static::lazy_static!(
    static ref RE_ORG: Regex = Regex::new(RE_ORG_STR).unwrap();
    static ref RE_ROLE: Regex = Regex::new(RE_ROLE_STR).unwrap();
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum EntityLabel {
    Org,
    Role,
    Per,
    Loc,
    Misc,
}

impl EntityLabel {
    fn from_tag(tag: &str) -> Option<Self> {
        // Token-level tags look like B-ORG / I-ORG
        let tag = tag
            .strip_prefix("B-")
            .or_else(|| tag.strip_prefix("I-"))
            .unwrap_or(tag);
        match tag {
            "ORG" => Some(EntityLabel::Org),
            "PER" => Some(EntityLabel::Per),
            "LOC" => Some(EntityLabel::Loc),
            "MISC" => Some(EntityLabel::Misc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub label: EntityLabel,
    pub text: String,
}

impl Entity {
    pub fn new(label: EntityLabel, text: impl Into<String>) -> Self {
        Entity {
            label,
            text: text.into(),
        }
    }
}

/// Candidate organisation and job-title spans
#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    async fn recognize(&self, text: &str) -> PipelineResult<Vec<Entity>>;
}

/// Capitalised spans ending in a corporate suffix or a job-title noun
pub struct RuleRecognizer;

#[async_trait]
impl EntityRecognizer for RuleRecognizer {
    async fn recognize(&self, text: &str) -> PipelineResult<Vec<Entity>> {
        Ok(recognize_by_rules(text))
    }
}

pub fn recognize_by_rules(text: &str) -> Vec<Entity> {
    let spans = |re: &Regex, label: EntityLabel| {
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| Entity::new(label, m.as_str().trim()))
            .collect::<Vec<_>>()
    };

    let mut entities = spans(&RE_ORG, EntityLabel::Org);
    entities.extend(spans(&RE_ROLE, EntityLabel::Role));
    entities
}

/// Hosted token-classification model
pub struct ServiceRecognizer {
    client: HuggingFaceClient,
    max_chars: usize,
}

impl ServiceRecognizer {
    pub fn new(client: HuggingFaceClient, max_chars: usize) -> Self {
        ServiceRecognizer { client, max_chars }
    }
}

#[derive(Debug, Deserialize)]
struct NerSpan {
    entity_group: Option<String>,
    entity: Option<String>,
    word: String,
}

#[async_trait]
impl EntityRecognizer for ServiceRecognizer {
    async fn recognize(&self, text: &str) -> PipelineResult<Vec<Entity>> {
        let payload = json!({
            "inputs": truncate_chars(text, self.max_chars),
            "parameters": { "aggregation_strategy": "simple" },
            "options": { "wait_for_model": true }
        });
        let reply = self.client.infer(&payload).await?;

        Ok(entities_from_reply(reply))
    }
}

fn entities_from_reply(reply: serde_json::Value) -> Vec<Entity> {
    let spans: Vec<NerSpan> = serde_json::from_value(reply).unwrap_or_else(|e| {
        tracing::warn!("Unexpected NER reply shape: {:?}", e);
        vec![]
    });

    spans
        .into_iter()
        .filter_map(|span| {
            let tag = span.entity_group.or(span.entity)?;
            let label = EntityLabel::from_tag(&tag)?;
            let word = span.word.trim();
            (!word.is_empty()).then(|| Entity::new(label, word))
        })
        .collect()
}
