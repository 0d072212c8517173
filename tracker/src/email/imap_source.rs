use std::{
    collections::HashSet,
    net::TcpStream,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use native_tls::{TlsConnector, TlsStream};

use super::{MailSource, RawMessage};
use crate::app_config::ImapConfig;

type ImapSession = imap::Session<TlsStream<TcpStream>>;

/// The "fetch last N" source. Relevance filtering happens in the pipeline
/// through the configured keywords.
pub struct ImapSource {
    session: Arc<Mutex<ImapSession>>,
    uid_validity: u32,
    mailbox: String,
}

impl ImapSource {
    pub async fn connect(config: ImapConfig, password: String) -> anyhow::Result<Self> {
        let mailbox = config.mailbox.clone();
        let (session, uid_validity) = tokio::task::spawn_blocking(move || {
            let tls = TlsConnector::builder()
                .build()
                .context("build TLS connector")?;
            let client = imap::connect((config.host.as_str(), config.port), &config.host, &tls)
                .context("connect IMAP")?;
            let mut session = client
                .login(&config.username, &password)
                .map_err(|(err, _client)| anyhow!("login IMAP: {err}"))?;
            let selected = session
                .select(&config.mailbox)
                .with_context(|| format!("select mailbox {}", config.mailbox))?;

            Ok::<_, anyhow::Error>((session, selected.uid_validity.unwrap_or_default()))
        })
        .await??;

        tracing::info!("IMAP session opened on {} (uid validity {})", mailbox, uid_validity);

        Ok(ImapSource {
            session: Arc::new(Mutex::new(session)),
            uid_validity,
            mailbox,
        })
    }

    async fn with_session<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ImapSession) -> anyhow::Result<T> + Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let mut session = session
                .lock()
                .map_err(|_| anyhow!("IMAP session lock poisoned"))?;
            op(&mut session)
        })
        .await?
    }

    fn uid_for(&self, external_id: &str) -> anyhow::Result<u32> {
        let (validity, uid) = parse_external_id(external_id)?;
        if validity != self.uid_validity {
            return Err(anyhow!(
                "Message {} belongs to a previous generation of {}",
                external_id,
                self.mailbox
            ));
        }
        Ok(uid)
    }
}

#[async_trait]
impl MailSource for ImapSource {
    async fn list_candidates(&self, limit: usize) -> anyhow::Result<Vec<String>> {
        let uids = self
            .with_session(|session| {
                session
                    .uid_search("ALL")
                    .context("IMAP uid_search failed")
            })
            .await?;

        Ok(last_n_uids(uids, limit)
            .into_iter()
            .map(|uid| external_id(self.uid_validity, uid))
            .collect())
    }

    async fn fetch_raw(&self, external_id: &str) -> anyhow::Result<RawMessage> {
        let uid = self.uid_for(external_id)?;
        let (bytes, received_at) = self
            .with_session(move |session| {
                let fetches = session
                    .uid_fetch(uid.to_string(), "(UID INTERNALDATE BODY.PEEK[])")
                    .with_context(|| format!("IMAP uid_fetch for {uid} failed"))?;
                let fetch = fetches
                    .iter()
                    .find(|f| f.body().is_some())
                    .ok_or_else(|| anyhow!("No body returned for uid {uid}"))?;
                let bytes = fetch.body().map(|b| b.to_vec()).unwrap_or_default();
                let received_at = fetch.internal_date().map(|d| d.with_timezone(&Utc));
                Ok((bytes, received_at))
            })
            .await?;

        Ok(RawMessage {
            external_id: external_id.to_string(),
            bytes,
            received_at,
        })
    }

    async fn mark_processed(&self, external_id: &str) -> anyhow::Result<()> {
        let uid = self.uid_for(external_id)?;
        self.with_session(move |session| {
            session
                .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
                .with_context(|| format!("IMAP uid_store for {uid} failed"))?;
            Ok(())
        })
        .await
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.with_session(|session| session.logout().context("IMAP logout failed"))
            .await?;
        tracing::info!("IMAP session on {} closed", self.mailbox);
        Ok(())
    }
}

fn external_id(uid_validity: u32, uid: u32) -> String {
    format!("{uid_validity}:{uid}")
}

fn parse_external_id(external_id: &str) -> anyhow::Result<(u32, u32)> {
    let (validity, uid) = external_id
        .split_once(':')
        .ok_or_else(|| anyhow!("Malformed IMAP message id: {}", external_id))?;
    let validity = validity
        .parse()
        .with_context(|| format!("Malformed uid validity in {external_id}"))?;
    let uid = uid
        .parse()
        .with_context(|| format!("Malformed uid in {external_id}"))?;
    Ok((validity, uid))
}

/// Highest `n` uids, oldest first
fn last_n_uids(uids: HashSet<u32>, n: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();
    if uids.len() > n {
        uids = uids.split_off(uids.len() - n);
    }
    uids
}
