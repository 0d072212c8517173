use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use sea_orm::{DbErr, RuntimeErr};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    email::{parsed_message::ParsedMessage, MailSource, RawMessage},
    error::{PipelineError, PipelineResult},
    model::{
        job_application::{JobApplicationStore, UpsertOutcome},
        record::ExtractedRecord,
    },
    prompt::hugging_face::TextGeneration,
};

pub fn raw_message(external_id: &str, text: &str) -> RawMessage {
    RawMessage {
        external_id: external_id.to_string(),
        bytes: text.as_bytes().to_vec(),
        received_at: None,
    }
}

/// RFC 5322 message dated Fri, 01 Mar 2024 09:30:00 +0000
pub fn single_part_message(from: &str, subject: &str, content_type: &str, body: &str) -> String {
    format!(
        "From: {from}\r\n\
         To: me@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Fri, 01 Mar 2024 09:30:00 +0000\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: {content_type}; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
}

pub fn multipart_message(from: &str, subject: &str, parts: &[(&str, &str)]) -> String {
    let boundary = "tracker-test-boundary";
    let mut message = format!(
        "From: {from}\r\n\
         To: me@example.com\r\n\
         Subject: {subject}\r\n\
         Date: Fri, 01 Mar 2024 09:30:00 +0000\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\
         \r\n"
    );
    for (content_type, body) in parts {
        message.push_str(&format!(
            "--{boundary}\r\nContent-Type: {content_type}\r\n\r\n{body}\r\n"
        ));
    }
    message.push_str(&format!("--{boundary}--\r\n"));
    message
}

pub fn parsed_message(external_id: &str, sender_address: &str, body: &str) -> ParsedMessage {
    let received_at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
    ParsedMessage {
        external_id: external_id.to_string(),
        sender: sender_address.to_string(),
        sender_address: Some(sender_address.to_string()),
        subject: "Application update".to_string(),
        date: Some(received_at),
        received_at,
        body_text: body.to_string(),
    }
}

/// Client that ignores proxy settings so requests reach the local server
pub fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Answers a single HTTP request on a free local port. Returns the base url
/// and a handle resolving to the raw request that was received.
pub async fn serve_once(
    status_line: &str,
    content_type: &str,
    body: &str,
) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status_line}\r\n\
         Content-Type: {content_type}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    );

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.ok();
        request
    });

    (base_url, handle)
}

async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(end) = text.find("\r\n\r\n") {
            let content_length = text[..end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Inference fake: a fixed reply, or a status code for prompts containing a marker
#[derive(Debug, Clone, Default)]
pub struct ScriptedGeneration {
    reply: Value,
    failures: Vec<(String, StatusCode)>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGeneration {
    pub fn replying(reply: Value) -> Self {
        ScriptedGeneration {
            reply,
            ..Default::default()
        }
    }

    pub fn failing_on(marker: &str, status: StatusCode) -> Self {
        Self::default().with_failure(marker, status)
    }

    pub fn with_failure(mut self, marker: &str, status: StatusCode) -> Self {
        self.failures.push((marker.to_string(), status));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGeneration for ScriptedGeneration {
    async fn generate(&self, inputs: &str) -> PipelineResult<Value> {
        self.prompts.lock().unwrap().push(inputs.to_string());

        match self.failures.iter().find(|(marker, _)| inputs.contains(marker.as_str())) {
            Some((_, status)) => Err(PipelineError::Service {
                status: *status,
                body: "scripted failure".to_string(),
            }),
            None => Ok(self.reply.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct Mailbox {
    messages: Vec<RawMessage>,
    marked: Vec<String>,
    failing: HashSet<String>,
    closed: bool,
}

/// Mailbox held in memory; clones share state
#[derive(Debug, Clone, Default)]
pub struct MemoryMailSource {
    mailbox: Arc<Mutex<Mailbox>>,
}

impl MemoryMailSource {
    pub fn add(&self, external_id: &str, text: &str) {
        self.mailbox
            .lock()
            .unwrap()
            .messages
            .push(raw_message(external_id, text));
    }

    /// Fetching `external_id` fails as if the connection dropped
    pub fn failing_fetch(self, external_id: &str) -> Self {
        self.mailbox
            .lock()
            .unwrap()
            .failing
            .insert(external_id.to_string());
        self
    }

    pub fn marked(&self) -> Vec<String> {
        self.mailbox.lock().unwrap().marked.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.lock().unwrap().closed
    }
}

#[async_trait]
impl MailSource for MemoryMailSource {
    async fn list_candidates(&self, limit: usize) -> anyhow::Result<Vec<String>> {
        let mailbox = self.mailbox.lock().unwrap();
        Ok(mailbox
            .messages
            .iter()
            .take(limit)
            .map(|m| m.external_id.clone())
            .collect())
    }

    async fn fetch_raw(&self, external_id: &str) -> anyhow::Result<RawMessage> {
        let mailbox = self.mailbox.lock().unwrap();
        if mailbox.failing.contains(external_id) {
            anyhow::bail!("connection reset while fetching {}", external_id);
        }
        mailbox
            .messages
            .iter()
            .find(|m| m.external_id == external_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no message {}", external_id))
    }

    async fn mark_processed(&self, external_id: &str) -> anyhow::Result<()> {
        self.mailbox
            .lock()
            .unwrap()
            .marked
            .push(external_id.to_string());
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.mailbox.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Store that keeps the first record per external id
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    rows: Arc<Mutex<Vec<ExtractedRecord>>>,
}

impl MemoryStore {
    pub fn rows(&self) -> Vec<ExtractedRecord> {
        self.rows.lock().unwrap().clone()
    }

    pub fn external_ids(&self) -> Vec<String> {
        self.rows()
            .into_iter()
            .map(|r| r.external_id)
            .collect()
    }
}

#[async_trait]
impl JobApplicationStore for MemoryStore {
    async fn upsert(&self, record: &ExtractedRecord) -> Result<UpsertOutcome, DbErr> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.external_id == record.external_id) {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        rows.push(record.clone());
        Ok(UpsertOutcome::Inserted)
    }
}

/// Store whose connection is gone
pub struct FailingStore;

#[async_trait]
impl JobApplicationStore for FailingStore {
    async fn upsert(&self, _record: &ExtractedRecord) -> Result<UpsertOutcome, DbErr> {
        Err(DbErr::Conn(RuntimeErr::Internal(
            "connection lost".to_string(),
        )))
    }
}
