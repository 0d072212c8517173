use derive_more::derive::Display;
use reqwest::StatusCode;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Every fault the pipeline can hit, classified by how far it propagates.
///
/// Only `Storage` escapes the per-message boundary; everything else is
/// logged against the message and the batch moves on.
#[derive(Debug, Display)]
pub enum PipelineError {
    /// Could not list, fetch, parse or mark a message
    #[display("transport fault: {_0}")]
    Transport(anyhow::Error),
    /// The inference service answered with something other than 200
    #[display("inference service returned {status}: {body}")]
    Service { status: StatusCode, body: String },
    /// The inference request never got a response (timeout, connection)
    #[display("inference request failed: {_0}")]
    Http(reqwest::Error),
    #[display("storage fault: {_0}")]
    Storage(sea_orm::error::DbErr),
    #[display("configuration error: {_0}")]
    Config(config::ConfigError),
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, PipelineError::Storage(_))
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(error: anyhow::Error) -> Self {
        PipelineError::Transport(error)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(error: reqwest::Error) -> Self {
        tracing::debug!("Reqwest error: {:?}", error);
        match error.status() {
            Some(status) => PipelineError::Service {
                status,
                body: error.to_string(),
            },
            None => PipelineError::Http(error),
        }
    }
}

impl From<sea_orm::error::DbErr> for PipelineError {
    fn from(error: sea_orm::error::DbErr) -> Self {
        PipelineError::Storage(error)
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(error: config::ConfigError) -> Self {
        PipelineError::Config(error)
    }
}
