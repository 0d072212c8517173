extern crate google_gmail1 as gmail1;

use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gmail1::api::{ListMessagesResponse, Message};
use leaky_bucket::RateLimiter;
use serde_json::json;
use url::Url;

use super::{MailSource, RawMessage};
use crate::app_config::GmailConfig;

/// Quota units per call, from the Gmail API usage limits table
struct GmailApiQuota {
    messages_list: usize,
    messages_get: usize,
    messages_modify: usize,
}

const GMAIL_API_QUOTA: GmailApiQuota = GmailApiQuota {
    messages_list: 5,
    messages_get: 5,
    messages_modify: 5,
};

/// The "list unread, process, mark read" source.
///
/// Irrelevant messages stay unread, so the keywords also go into the listing
/// query or they would fill every page.
#[derive(Debug, Clone)]
pub struct GmailSource {
    http_client: reqwest::Client,
    access_token: String,
    api_base: Url,
    search_query: Option<String>,
    rate_limiter: Arc<RateLimiter>,
}

impl GmailSource {
    pub fn new(
        http_client: reqwest::Client,
        config: &GmailConfig,
        access_token: String,
        keywords: &[String],
    ) -> Self {
        let rate_limiter = Arc::new(
            RateLimiter::builder()
                .initial(config.quota_per_second)
                .interval(Duration::from_secs(1))
                .refill(config.quota_per_second)
                .build(),
        );

        GmailSource {
            http_client,
            access_token,
            api_base: config.api_base.clone(),
            search_query: search_query(keywords),
            rate_limiter,
        }
    }

    fn gmail_url(&self, parts: &[&str]) -> String {
        format!(
            "{}/{}",
            self.api_base.as_str().trim_end_matches('/'),
            parts.join("/")
        )
    }
}

#[async_trait]
impl MailSource for GmailSource {
    async fn list_candidates(&self, limit: usize) -> anyhow::Result<Vec<String>> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_list)
            .await;

        let mut query = vec![
            ("labelIds", "INBOX".to_string()),
            ("labelIds", "UNREAD".to_string()),
            ("maxResults", limit.to_string()),
        ];
        if let Some(q) = &self.search_query {
            query.push(("q", q.clone()));
        }
        let resp = self
            .http_client
            .get(self.gmail_url(&["messages"]))
            .query(&query)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Error listing unread messages: {} {}", status, body));
        }

        let data = resp.json::<ListMessagesResponse>().await?;
        let ids = data
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .take(limit)
            .collect();

        Ok(ids)
    }

    async fn fetch_raw(&self, external_id: &str) -> anyhow::Result<RawMessage> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_get)
            .await;

        let resp = self
            .http_client
            .get(self.gmail_url(&["messages", external_id]))
            .bearer_auth(&self.access_token)
            .query(&[("format", "RAW")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "Error getting message {}: {}",
                external_id,
                resp.status()
            ));
        }

        let message = resp
            .json::<Message>()
            .await
            .context("Error getting message")?;

        raw_message_from_gmail(external_id, message)
    }

    async fn mark_processed(&self, external_id: &str) -> anyhow::Result<()> {
        self.rate_limiter
            .acquire(GMAIL_API_QUOTA.messages_modify)
            .await;

        let resp = self
            .http_client
            .post(self.gmail_url(&["messages", external_id, "modify"]))
            .bearer_auth(&self.access_token)
            .json(&json!({
                "removeLabelIds": ["UNREAD"],
                "addLabelIds": []
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(anyhow!(
                "Error marking {} as read: {}",
                external_id,
                resp.status()
            ));
        }

        Ok(())
    }
}

/// Gmail search expression matching any keyword; phrases are quoted
fn search_query(keywords: &[String]) -> Option<String> {
    let terms: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().replace('"', ""))
        .filter(|k| !k.is_empty())
        .map(|k| {
            if k.contains(char::is_whitespace) {
                format!("\"{}\"", k)
            } else {
                k
            }
        })
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn raw_message_from_gmail(external_id: &str, message: Message) -> anyhow::Result<RawMessage> {
    let received_at = message
        .internal_date
        .and_then(DateTime::<Utc>::from_timestamp_millis);
    let bytes = message.raw.context(format!(
        "No raw message found in message response: {}",
        external_id
    ))?;

    Ok(RawMessage {
        external_id: message.id.unwrap_or_else(|| external_id.to_string()),
        bytes,
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::common::{local_client, serve_once};

    fn source(base: &str) -> GmailSource {
        source_with_keywords(base, &[])
    }

    fn source_with_keywords(base: &str, keywords: &[&str]) -> GmailSource {
        let config = GmailConfig {
            api_base: Url::parse(base).unwrap(),
            quota_per_second: 10,
        };
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        GmailSource::new(local_client(), &config, "token".to_string(), &keywords)
    }

    #[test]
    fn test_search_query() {
        let keywords = |ks: &[&str]| ks.iter().map(|k| k.to_string()).collect::<Vec<_>>();

        assert_eq!(search_query(&[]), None);
        assert_eq!(search_query(&keywords(&["", "  "])), None);
        assert_eq!(
            search_query(&keywords(&["interview", "offer"])).as_deref(),
            Some("interview OR offer")
        );
        assert_eq!(
            search_query(&keywords(&["not selected", "offer"])).as_deref(),
            Some(r#""not selected" OR offer"#)
        );
    }

    #[tokio::test]
    async fn test_keywords_narrow_the_listing() {
        let (base_url, request) = serve_once(
            "200 OK",
            "application/json",
            r#"{"messages": [{"id": "18c2f0a1", "threadId": "t1"}, {"id": "18c2f0a2", "threadId": "t2"}], "resultSizeEstimate": 2}"#,
        )
        .await;
        let source = source_with_keywords(&base_url, &["interview", "offer"]);

        let ids = source.list_candidates(5).await.unwrap();
        let request = request.await.unwrap();

        assert_eq!(ids, vec!["18c2f0a1", "18c2f0a2"]);
        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("GET /messages?"));
        assert!(request_line.contains("labelIds=UNREAD"));
        assert!(request_line.contains("maxResults=5"));
        assert!(request_line.contains("q=interview+OR+offer"));
    }

    #[tokio::test]
    async fn test_no_keywords_lists_all_unread() {
        let (base_url, request) =
            serve_once("200 OK", "application/json", r#"{"resultSizeEstimate": 0}"#).await;
        let source = source(&base_url);

        let ids = source.list_candidates(5).await.unwrap();
        let request = request.await.unwrap();

        assert!(ids.is_empty());
        assert!(!request.lines().next().unwrap().contains("q="));
    }

    #[test]
    fn test_gmail_url() {
        let source = source("https://gmail.googleapis.com/gmail/v1/users/me/");
        assert_eq!(
            source.gmail_url(&["messages", "18c2f", "modify"]),
            "https://gmail.googleapis.com/gmail/v1/users/me/messages/18c2f/modify"
        );
    }

    #[test]
    fn test_raw_message_from_gmail() {
        let message = Message {
            id: Some("18c2f0a1".to_string()),
            raw: Some(b"Subject: hi\r\n\r\nbody".to_vec()),
            internal_date: Some(1_700_000_000_000),
            ..Default::default()
        };

        let raw = raw_message_from_gmail("18c2f0a1", message).unwrap();

        assert_eq!(raw.external_id, "18c2f0a1");
        assert_eq!(raw.bytes, b"Subject: hi\r\n\r\nbody".to_vec());
        assert_eq!(
            raw.received_at.map(|d| d.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn test_raw_message_without_payload() {
        let message = Message {
            id: Some("18c2f0a1".to_string()),
            ..Default::default()
        };

        assert!(raw_message_from_gmail("18c2f0a1", message).is_err());
    }
}
