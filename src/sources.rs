use anyhow::{bail, Result};
use std::sync::Arc;

use memex_core::connector::Connector;
use memex_core::models::SourceKind;

use crate::config::Config;
use crate::connector_mail::MailConnector;
use crate::connector_notes::NotesConnector;

/// Build the connector for `kind`, if it is configured.
pub fn connector_for(config: &Config, kind: SourceKind) -> Option<Arc<dyn Connector>> {
    match kind {
        SourceKind::Notes => config
            .connectors
            .notes
            .clone()
            .map(|c| Arc::new(NotesConnector::new(c)) as Arc<dyn Connector>),
        SourceKind::Mails => config
            .connectors
            .mail
            .clone()
            .map(|c| Arc::new(MailConnector::new(c)) as Arc<dyn Connector>),
    }
}

/// Every configured connector, notes first.
pub fn configured_connectors(config: &Config) -> Vec<Arc<dyn Connector>> {
    SourceKind::ALL
        .iter()
        .filter_map(|kind| connector_for(config, *kind))
        .collect()
}

/// Resolve a `sync`/`search` target (`notes`, `mails`, or `all`).
pub fn parse_targets(target: &str) -> Result<Vec<SourceKind>> {
    if target == "all" {
        return Ok(SourceKind::ALL.to_vec());
    }
    match target.parse::<SourceKind>() {
        Ok(kind) => Ok(vec![kind]),
        Err(_) => bail!(
            "Unknown source: '{}'. Available: notes, mails, all",
            target
        ),
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<10} {:<14} {:<12} DETAIL", "SOURCE", "COLLECTION", "STATUS");

    let (status, detail) = match &config.connectors.notes {
        Some(notes) => {
            let detail = match (&notes.command, &notes.script_path) {
                (Some(cmd), _) => format!("command: {}", cmd.join(" ")),
                (None, Some(path)) if !path.exists() => {
                    format!("script missing: {}", path.display())
                }
                (None, Some(path)) => format!("script: {}", path.display()),
                (None, None) => "built-in osascript export".to_string(),
            };
            ("OK", detail)
        }
        None => ("NOT CONFIGURED", String::new()),
    };
    println!(
        "{:<10} {:<14} {:<12} {}",
        "notes",
        SourceKind::Notes.collection_name(),
        status,
        detail
    );

    let (status, detail) = match &config.connectors.mail {
        Some(mail) => {
            let connector = MailConnector::new(mail.clone());
            let status = if connector.has_credentials() {
                "OK"
            } else {
                "NO CREDENTIALS"
            };
            (
                status,
                format!("{}:{} {} (last {})", mail.host, mail.port, mail.mailbox, mail.fetch_limit),
            )
        }
        None => ("NOT CONFIGURED", String::new()),
    };
    println!(
        "{:<10} {:<14} {:<12} {}",
        "mails",
        SourceKind::Mails.collection_name(),
        status,
        detail
    );

    Ok(())
}
