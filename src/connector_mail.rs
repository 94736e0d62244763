//! IMAP mail connector.
//!
//! Connects over implicit TLS (rustls with the webpki root set), logs in
//! with credentials read from the environment, and fetches the most recent
//! messages of one mailbox as raw RFC 822 bytes keyed by UID.
//!
//! UIDs are stable for a mailbox, unlike sequence numbers, so they double as
//! document ids and as the watch-loop watermark.
//!
//! # Configuration
//!
//! ```toml
//! [connectors.mail]
//! host = "imap.mail.me.com"
//! port = 993
//! mailbox = "INBOX"
//! fetch_limit = 10
//! address_env = "APPLE_EMAIL"
//! key_env = "APPLE_MAIL_KEY"
//! ```
//!
//! The imap crate is synchronous, so each session runs on the blocking pool.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use memex_core::connector::Connector;
use memex_core::models::{RawBatch, RawMessage, SourceKind};
use memex_core::watch::Watermark;

use crate::config::MailConnectorConfig;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;
type ImapSession = imap::Session<TlsStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct MailConnector {
    config: MailConnectorConfig,
}

impl MailConnector {
    pub fn new(config: MailConnectorConfig) -> Self {
        Self { config }
    }

    fn credentials(&self) -> Result<(String, String)> {
        let address = std::env::var(&self.config.address_env)
            .map_err(|_| anyhow!("{} environment variable not set", self.config.address_env))?;
        let key = std::env::var(&self.config.key_env)
            .map_err(|_| anyhow!("{} environment variable not set", self.config.key_env))?;
        Ok((address, key))
    }

    /// Whether both credential variables are present.
    pub fn has_credentials(&self) -> bool {
        self.credentials().is_ok()
    }

    /// Highest UID in the mailbox, `None` when it is empty.
    pub async fn latest_uid(&self) -> Result<Option<u32>> {
        self.with_session(|session| {
            let uids = session.uid_search("ALL").map_err(imap_err)?;
            Ok(uids.into_iter().max())
        })
        .await
    }

    /// The `n` most recent messages, oldest first.
    pub async fn fetch_recent(&self, n: usize) -> Result<Vec<RawMessage>> {
        self.with_session(move |session| {
            let uids = session.uid_search("ALL").map_err(imap_err)?;
            let recent = most_recent(uids, n);
            if recent.is_empty() {
                return Ok(Vec::new());
            }

            let fetches = session
                .uid_fetch(uid_set(&recent), "(UID BODY.PEEK[])")
                .map_err(imap_err)?;

            let mut messages: Vec<RawMessage> = fetches
                .iter()
                .filter_map(|fetch| {
                    let uid = fetch.uid?;
                    let body = fetch.body()?;
                    Some(RawMessage {
                        id: uid.to_string(),
                        bytes: body.to_vec(),
                    })
                })
                .collect();
            messages.sort_by_key(|m| m.id.parse::<u32>().unwrap_or(0));
            Ok(messages)
        })
        .await
    }

    /// Open a session, select the mailbox, run `op`, log out.
    async fn with_session<F, R>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut ImapSession) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let (address, key) = self.credentials()?;
        let config = self.config.clone();

        tokio::task::spawn_blocking(move || {
            let mut session = open_session(&config, &address, &key)?;
            session.select(&config.mailbox).map_err(imap_err)?;
            let result = op(&mut session);
            if let Err(e) = session.logout() {
                tracing::debug!("IMAP logout failed: {}", e);
            }
            result
        })
        .await
        .context("IMAP task panicked")?
    }
}

fn imap_err(e: imap::Error) -> anyhow::Error {
    anyhow!("IMAP error: {}", e)
}

fn tls_config() -> Result<Arc<rustls::ClientConfig>> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(root_store)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

fn open_session(config: &MailConnectorConfig, address: &str, key: &str) -> Result<ImapSession> {
    let server_name = rustls::pki_types::ServerName::try_from(config.host.clone())
        .with_context(|| format!("Invalid IMAP host: {}", config.host))?;
    let connection = rustls::ClientConnection::new(tls_config()?, server_name)?;

    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .with_context(|| format!("Failed to connect to {}:{}", config.host, config.port))?;
    tcp.set_read_timeout(Some(CONNECT_TIMEOUT))?;
    tcp.set_write_timeout(Some(CONNECT_TIMEOUT))?;

    let mut client = imap::Client::new(rustls::StreamOwned::new(connection, tcp));
    client.read_greeting().map_err(imap_err)?;
    tracing::debug!("connected to {}:{}", config.host, config.port);

    client
        .login(address, key)
        .map_err(|(e, _)| anyhow!("IMAP login as {} failed: {}", address, e))
}

/// The `n` highest UIDs, ascending.
fn most_recent(uids: impl IntoIterator<Item = u32>, n: usize) -> Vec<u32> {
    let mut uids: Vec<u32> = uids.into_iter().collect();
    uids.sort_unstable();
    let skip = uids.len().saturating_sub(n);
    uids.split_off(skip)
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl Connector for MailConnector {
    fn name(&self) -> &str {
        "mail"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Mails
    }

    async fn probe(&self) -> Result<Watermark> {
        Ok(Watermark::LastId(self.latest_uid().await?.map(u64::from)))
    }

    async fn fetch(&self) -> Result<RawBatch> {
        let messages = self.fetch_recent(self.config.fetch_limit).await?;
        tracing::info!("fetched {} messages from {}", messages.len(), self.config.mailbox);
        Ok(RawBatch::Mails(messages))
    }
}
