pub mod gmail_source;
pub mod imap_source;
pub mod parsed_message;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::app_config::AppConfig;

/// A message exactly as the transport handed it over
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub external_id: String,
    pub bytes: Vec<u8>,
    /// Arrival time according to the mailbox, not the `Date` header
    pub received_at: Option<DateTime<Utc>>,
}

/// Where candidate messages come from.
///
/// `mark_processed` is only called once the message's record has been
/// written, so anything that fails before that stays eligible for the next run.
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn list_candidates(&self, limit: usize) -> anyhow::Result<Vec<String>>;

    async fn fetch_raw(&self, external_id: &str) -> anyhow::Result<RawMessage>;

    async fn mark_processed(&self, external_id: &str) -> anyhow::Result<()>;

    /// Ends the session, if the transport keeps one
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub async fn build_mail_source(
    http_client: &reqwest::Client,
    app_config: &AppConfig,
) -> anyhow::Result<Box<dyn MailSource>> {
    use crate::app_config::MailConfig;

    match &app_config.mail {
        MailConfig::Gmail(gmail) => {
            let token = app_config
                .secrets
                .gmail_access_token
                .clone()
                .ok_or_else(|| anyhow::anyhow!("GMAIL_ACCESS_TOKEN is required"))?;
            Ok(Box::new(gmail_source::GmailSource::new(
                http_client.clone(),
                gmail,
                token,
                &app_config.pipeline.keywords,
            )))
        }
        MailConfig::Imap(imap) => {
            let password = app_config
                .secrets
                .imap_password
                .clone()
                .ok_or_else(|| anyhow::anyhow!("IMAP_PASSWORD is required"))?;
            let source = imap_source::ImapSource::connect(imap.clone(), password).await?;
            Ok(Box::new(source))
        }
    }
}
