use chrono::NaiveDate;
use derive_more::derive::Display;

use crate::{
    app_config::PipelineConfig,
    email::{parsed_message::ParsedMessage, MailSource},
    error::{PipelineError, PipelineResult},
    extract::FieldExtractor,
    model::{
        job_application::{JobApplicationStore, UpsertOutcome},
        normalize::normalize,
    },
    observability::BatchSummary,
};

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum MessageOutcome {
    #[display("stored")]
    Stored,
    /// Stored from the terminal fallback record
    #[display("defaulted")]
    Defaulted,
    /// Already in the store; nothing written
    #[display("duplicate")]
    Duplicate,
    /// Did not mention any configured keyword
    #[display("irrelevant")]
    Irrelevant,
    #[display("skipped: {_0}")]
    Skipped(String),
}

const MAX_SKIP_REASON_CHARS: usize = 120;

impl MessageOutcome {
    /// Whitespace collapsed to single spaces and cut to a table-friendly width.
    /// Service bodies can be whole HTML error pages.
    pub fn skipped(reason: &str) -> Self {
        let reason = reason.split_whitespace().collect::<Vec<_>>().join(" ");
        let reason = match reason.char_indices().nth(MAX_SKIP_REASON_CHARS) {
            Some((end, _)) => format!("{}…", &reason[..end]),
            None => reason,
        };
        MessageOutcome::Skipped(reason)
    }
}

/// One sequential pass over a bounded batch of candidate messages.
pub struct Pipeline {
    source: Box<dyn MailSource>,
    extractor: Box<dyn FieldExtractor>,
    store: Box<dyn JobApplicationStore>,
    keywords: Vec<String>,
    batch_limit: usize,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn MailSource>,
        extractor: Box<dyn FieldExtractor>,
        store: Box<dyn JobApplicationStore>,
        config: &PipelineConfig,
    ) -> Self {
        Pipeline {
            source,
            extractor,
            store,
            keywords: config.keywords.iter().map(|k| k.to_lowercase()).collect(),
            batch_limit: config.batch_limit,
        }
    }

    /// Processes every candidate in order. A fault on one message is logged
    /// and the batch moves on; only a storage fault stops the run.
    pub async fn run(&self, today: NaiveDate) -> PipelineResult<BatchSummary> {
        let candidates = self.source.list_candidates(self.batch_limit).await?;
        tracing::info!(
            "Processing {} candidate messages with the {} extractor",
            candidates.len(),
            self.extractor.name()
        );

        let mut summary = BatchSummary::new();
        for external_id in candidates {
            match self.process_message(&external_id, today).await {
                Ok(outcome) => {
                    tracing::info!("Message {}: {}", external_id, outcome);
                    summary.record(&external_id, outcome);
                }
                Err(e) if e.is_batch_fatal() => {
                    tracing::error!(
                        "Aborting batch at message {} after {} messages: {}",
                        external_id,
                        summary.total(),
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!("Skipping message {}: {}", external_id, e);
                    summary.record(&external_id, MessageOutcome::skipped(&e.to_string()));
                }
            }
        }

        Ok(summary)
    }

    /// Releases the mail session; `run` leaves it open
    pub async fn close(&self) -> anyhow::Result<()> {
        self.source.close().await
    }

    async fn process_message(
        &self,
        external_id: &str,
        today: NaiveDate,
    ) -> PipelineResult<MessageOutcome> {
        let raw = self.source.fetch_raw(external_id).await?;
        let message = ParsedMessage::from_raw(&raw)?;
        tracing::debug!(
            "Message {} from {} dated {:?}: {}",
            external_id,
            message.sender,
            message.date,
            message.subject
        );

        if !self.is_relevant(&message) {
            tracing::debug!("Message {} mentions no keyword", external_id);
            return Ok(MessageOutcome::Irrelevant);
        }

        let extraction = self.extractor.extract(&message, today).await?;
        let record = normalize(&message, &extraction, today);

        let outcome = match self
            .store
            .upsert(&record)
            .await
            .map_err(PipelineError::Storage)?
        {
            UpsertOutcome::Inserted if extraction.defaulted => MessageOutcome::Defaulted,
            UpsertOutcome::Inserted => MessageOutcome::Stored,
            UpsertOutcome::AlreadyPresent => MessageOutcome::Duplicate,
        };

        // The row is written either way; a rerun will just see a duplicate
        if let Err(e) = self.source.mark_processed(external_id).await {
            tracing::warn!("Could not mark message {} as processed: {:?}", external_id, e);
        }

        Ok(outcome)
    }

    fn is_relevant(&self, message: &ParsedMessage) -> bool {
        if self.keywords.is_empty() {
            return true;
        }

        let subject = message.subject.to_lowercase();
        let body = message.body_text.to_lowercase();
        self.keywords
            .iter()
            .any(|k| subject.contains(k.as_str()) || body.contains(k.as_str()))
    }
}
