use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use url::Url;

use crate::{
    error::{PipelineError, PipelineResult},
    HttpClient,
};

/// A black-box text-to-text model. The reply shape is not guaranteed.
#[async_trait]
pub trait TextGeneration: Send + Sync {
    async fn generate(&self, inputs: &str) -> PipelineResult<Value>;
}

/// Client for a single hosted inference model
#[derive(Debug, Clone)]
pub struct HuggingFaceClient {
    http_client: HttpClient,
    endpoint: Url,
    token: String,
    timeout: Duration,
}

impl HuggingFaceClient {
    pub fn new(http_client: HttpClient, endpoint: Url, token: String, timeout: Duration) -> Self {
        HuggingFaceClient {
            http_client,
            endpoint,
            token,
            timeout,
        }
    }

    /// One request, no retries. Anything but a 200 is a service fault.
    pub async fn infer(&self, payload: &Value) -> PipelineResult<Value> {
        let resp = self
            .http_client
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status != StatusCode::OK {
            return Err(PipelineError::Service { status, body });
        }

        // Some models answer with bare text
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

/// Request body for a text-to-text model; waits out a cold start instead of a 503
pub fn generation_payload(inputs: &str) -> Value {
    json!({
        "inputs": inputs,
        "options": { "wait_for_model": true }
    })
}

#[async_trait]
impl TextGeneration for HuggingFaceClient {
    async fn generate(&self, inputs: &str) -> PipelineResult<Value> {
        self.infer(&generation_payload(inputs)).await
    }
}
