pub mod entities;
pub mod heuristics;

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use config::ConfigError;
use serde_json::Value;

use crate::{
    app_config::{AppConfig, RecognizerKind, Strategy},
    email::parsed_message::ParsedMessage,
    error::PipelineResult,
    prompt::{
        hugging_face::{HuggingFaceClient, TextGeneration},
        job_extraction,
    },
    HttpClient,
};

use self::{
    entities::{EntityRecognizer, RuleRecognizer, ServiceRecognizer},
    heuristics::HeuristicExtractor,
};

/// What a strategy pulled out of a message, before normalization.
/// `fields` doubles as the audit blob stored with the record.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub fields: Value,
    /// True when the fields are the terminal fallback record
    pub defaulted: bool,
}

impl Extraction {
    pub fn new(fields: Value) -> Self {
        Extraction {
            fields,
            defaulted: false,
        }
    }

    pub fn defaulted(fields: Value) -> Self {
        Extraction {
            fields,
            defaulted: true,
        }
    }
}

#[async_trait]
pub trait FieldExtractor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        message: &ParsedMessage,
        today: NaiveDate,
    ) -> PipelineResult<Extraction>;
}

/// Delegates to the hosted text-generation model
pub struct ServiceExtractor {
    generator: Box<dyn TextGeneration>,
    max_body_chars: usize,
}

impl ServiceExtractor {
    pub fn new(generator: Box<dyn TextGeneration>, max_body_chars: usize) -> Self {
        ServiceExtractor {
            generator,
            max_body_chars,
        }
    }
}

#[async_trait]
impl FieldExtractor for ServiceExtractor {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn extract(
        &self,
        message: &ParsedMessage,
        _today: NaiveDate,
    ) -> PipelineResult<Extraction> {
        job_extraction::extract_job_fields(
            self.generator.as_ref(),
            &message.body_text,
            self.max_body_chars,
        )
        .await
    }
}

pub fn build_extractor(
    http_client: &HttpClient,
    app_config: &AppConfig,
) -> Result<Box<dyn FieldExtractor>, ConfigError> {
    let inference = &app_config.extraction.inference;
    let timeout = Duration::from_secs(inference.timeout_secs);
    let hf_token = || {
        app_config
            .secrets
            .hugging_face_token
            .clone()
            .ok_or_else(|| ConfigError::NotFound("HUGGING_FACE_API_TOKEN".to_string()))
    };

    let extractor: Box<dyn FieldExtractor> = match app_config.extraction.strategy {
        Strategy::Service => {
            let client = HuggingFaceClient::new(
                http_client.clone(),
                inference.endpoint.clone(),
                hf_token()?,
                timeout,
            );
            Box::new(ServiceExtractor::new(
                Box::new(client),
                inference.max_body_chars,
            ))
        }
        Strategy::Heuristic => {
            let entities = &app_config.extraction.entities;
            let recognizer: Box<dyn EntityRecognizer> = match entities.recognizer {
                RecognizerKind::Rules => Box::new(RuleRecognizer),
                RecognizerKind::Service => {
                    let client = HuggingFaceClient::new(
                        http_client.clone(),
                        entities.endpoint.clone(),
                        hf_token()?,
                        timeout,
                    );
                    Box::new(ServiceRecognizer::new(client, inference.max_body_chars))
                }
            };
            Box::new(HeuristicExtractor::new(recognizer))
        }
    };

    Ok(extractor)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        app_config::Secrets,
        testing::common::{parsed_message, ScriptedGeneration},
    };

    #[tokio::test]
    async fn test_service_extractor_uses_body() {
        let generator = ScriptedGeneration::replying(json!({
            "generated_text": r#"{"type": "update", "company": "Hooli", "role": "PM", "date": "2024-05-06"}"#
        }));
        let extractor = ServiceExtractor::new(Box::new(generator.clone()), 2000);
        let message = parsed_message("m-1", "talent@hooli.com", "Your interview with Hooli");

        let extraction = extractor
            .extract(&message, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap())
            .await
            .unwrap();

        assert_eq!(extraction.fields["company"], "Hooli");
        assert!(generator.prompts()[0].contains("Your interview with Hooli"));
    }

    #[test]
    fn test_build_extractor_by_strategy() {
        let secrets = Secrets {
            hugging_face_token: Some("hf_test".to_string()),
            gmail_access_token: Some("token".to_string()),
            ..Default::default()
        };
        let http_client = HttpClient::new();

        let cfg = AppConfig::from_toml_str("[mail]\nsource = \"gmail\"", secrets.clone()).unwrap();
        assert_eq!(build_extractor(&http_client, &cfg).unwrap().name(), "service");

        let cfg = AppConfig::from_toml_str(
            "[mail]\nsource = \"gmail\"\n[extraction]\nstrategy = \"heuristic\"",
            secrets,
        )
        .unwrap();
        assert_eq!(build_extractor(&http_client, &cfg).unwrap().name(), "heuristic");
    }
}
