use config::{Config, ConfigError, Environment, FileFormat};
use serde::Deserialize;
use std::{env, path::Path};
use url::Url;

const DEFAULT_INFERENCE_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/philschmid/bart-large-cnn-samsum";
const DEFAULT_NER_ENDPOINT: &str =
    "https://api-inference.huggingface.co/models/dslim/bert-base-NER";
const DEFAULT_GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Empty means every candidate is relevant
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            keywords: vec![],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    #[serde(default = "default_gmail_api_base")]
    pub api_base: Url,
    #[serde(default = "default_gmail_quota")]
    pub quota_per_second: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    #[serde(default = "default_imap_port")]
    pub port: u16,
    pub username: String,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum MailConfig {
    Gmail(GmailConfig),
    Imap(ImapConfig),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Service,
    Heuristic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_endpoint")]
    pub endpoint: Url,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_body_chars")]
    pub max_body_chars: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_inference_endpoint(),
            timeout_secs: default_timeout_secs(),
            max_body_chars: default_max_body_chars(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    #[default]
    Rules,
    Service,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitiesConfig {
    #[serde(default)]
    pub recognizer: RecognizerKind,
    #[serde(default = "default_ner_endpoint")]
    pub endpoint: Url,
}

impl Default for EntitiesConfig {
    fn default() -> Self {
        Self {
            recognizer: RecognizerKind::default(),
            endpoint: default_ner_endpoint(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub entities: EntitiesConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub run_migrations: bool,
    #[serde(default)]
    pub sqlx_logging: bool,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    pipeline: PipelineConfig,
    mail: MailConfig,
    #[serde(default)]
    extraction: ExtractionConfig,
    #[serde(default)]
    database: DatabaseConfig,
}

/// Credentials are only ever read from the environment
#[derive(Clone, Default)]
pub struct Secrets {
    pub database_url: Option<String>,
    pub hugging_face_token: Option<String>,
    pub gmail_access_token: Option<String>,
    pub imap_password: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        let var = |name: &str| env::var(name).ok().filter(|v| !v.is_empty());
        Secrets {
            database_url: var("DATABASE_URL"),
            hugging_face_token: var("HUGGING_FACE_API_TOKEN"),
            gmail_access_token: var("GMAIL_ACCESS_TOKEN"),
            imap_password: var("IMAP_PASSWORD"),
        }
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("database_url", &mask(&self.database_url))
            .field("hugging_face_token", &mask(&self.hugging_face_token))
            .field("gmail_access_token", &mask(&self.gmail_access_token))
            .field("imap_password", &mask(&self.imap_password))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub mail: MailConfig,
    pub extraction: ExtractionConfig,
    pub database: DatabaseConfig,
    pub secrets: Secrets,
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.mail {
            MailConfig::Gmail(g) => format!("gmail ({})", g.api_base),
            MailConfig::Imap(i) => format!("imap ({}:{}/{})", i.host, i.port, i.mailbox),
        };
        write!(
            f,
            "Tracker Config:\nBatch limit: {}\nKeywords: [{}]\nMail source: {}\nStrategy: {:?}\nInference: {:?}\nEntities: {:?}\nDatabase: {:?}\nSecrets: {:?}",
            self.pipeline.batch_limit,
            self.pipeline.keywords.join(", "),
            source,
            self.extraction.strategy,
            self.extraction.inference,
            self.extraction.entities,
            self.database,
            self.secrets,
        )
    }
}

impl AppConfig {
    /// Loads `config.toml` from `APP_DIR`, or the workspace `config/` dir
    pub fn load() -> Result<Self, ConfigError> {
        let root = config_dir()?;
        let path = format!("{root}/config.toml");
        let builder = Config::builder().add_source(config::File::with_name(&path));
        Self::build(builder, Secrets::from_env())
    }

    pub fn from_toml_str(toml: &str, secrets: Secrets) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(config::File::from_str(toml, FileFormat::Toml));
        Self::build(builder, secrets)
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        secrets: Secrets,
    ) -> Result<Self, ConfigError> {
        let cfg_file: ConfigFile = builder
            .add_source(
                Environment::with_prefix("TRACKER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        let ConfigFile {
            pipeline,
            mail,
            extraction,
            database,
        } = cfg_file;

        let app_config = AppConfig {
            pipeline,
            mail,
            extraction,
            database,
            secrets,
        };
        app_config.validate()?;

        Ok(app_config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.batch_limit == 0 {
            return Err(ConfigError::Message(
                "pipeline.batch_limit must be at least 1".to_string(),
            ));
        }
        if self.extraction.inference.max_body_chars == 0 {
            return Err(ConfigError::Message(
                "extraction.inference.max_body_chars must be at least 1".to_string(),
            ));
        }
        let needs_hf_token = self.extraction.strategy == Strategy::Service
            || self.extraction.entities.recognizer == RecognizerKind::Service;
        if needs_hf_token && self.secrets.hugging_face_token.is_none() {
            return Err(ConfigError::NotFound("HUGGING_FACE_API_TOKEN".to_string()));
        }
        match &self.mail {
            MailConfig::Gmail(_) if self.secrets.gmail_access_token.is_none() => {
                Err(ConfigError::NotFound("GMAIL_ACCESS_TOKEN".to_string()))
            }
            MailConfig::Imap(_) if self.secrets.imap_password.is_none() => {
                Err(ConfigError::NotFound("IMAP_PASSWORD".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.secrets
            .database_url
            .as_deref()
            .ok_or_else(|| ConfigError::NotFound("DATABASE_URL".to_string()))
    }
}

fn config_dir() -> Result<String, ConfigError> {
    if let Ok(dir) = env::var("APP_DIR") {
        return Ok(dir);
    }
    let cargo_dir = env::var("CARGO_MANIFEST_DIR").map_err(|_| {
        ConfigError::Message("CARGO_MANIFEST_DIR or APP_DIR is required".to_string())
    })?;
    let parent_dir = Path::new(&cargo_dir)
        .parent()
        .ok_or_else(|| ConfigError::Message("Failed to get parent dir".to_string()))?
        .display()
        .to_string();

    Ok(format!("{parent_dir}/config"))
}

fn default_batch_limit() -> usize {
    5
}

fn default_gmail_api_base() -> Url {
    Url::parse(DEFAULT_GMAIL_API_BASE).expect("default gmail url is valid")
}

// Gmail allows 250 quota units per second per user
fn default_gmail_quota() -> usize {
    250
}

fn default_imap_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_inference_endpoint() -> Url {
    Url::parse(DEFAULT_INFERENCE_ENDPOINT).expect("default inference url is valid")
}

fn default_ner_endpoint() -> Url {
    Url::parse(DEFAULT_NER_ENDPOINT).expect("default ner url is valid")
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_body_chars() -> usize {
    2000
}
