//! Apple Notes connector.
//!
//! Exports every note through `osascript` as one delimited text blob
//! (`|||SEP|||` between fields, `|||END|||` between notes). The export can
//! come from three places, checked in order:
//!
//! 1. `connectors.notes.command`: any command printing the blob on stdout
//! 2. `connectors.notes.script_path`: an AppleScript file run with `osascript`
//! 3. the built-in export script
//!
//! # Configuration
//!
//! ```toml
//! [connectors.notes]
//! ignore_empty_title = true
//! script_path = "./applescripts/fetch_notes.scpt"
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::process::Command;

use memex_core::connector::Connector;
use memex_core::models::{RawBatch, SourceKind};
use memex_core::normalize::normalize_notes;
use memex_core::watch::Watermark;

use crate::config::NotesConnectorConfig;

const EXPORT_SCRIPT: &str = r#"
set output to ""
tell application "Notes"
    repeat with theNote in notes
        set noteTitle to the name of theNote
        set noteBody to the body of theNote
        try
            set noteCreated to the creation date of theNote
        on error
            set noteCreated to ""
        end try
        try
            set noteModified to the modification date of theNote
        on error
            set noteModified to ""
        end try
        try
            set folderName to the name of the container of theNote
        on error
            set folderName to ""
        end try
        set output to output & noteTitle & "|||SEP|||" & noteBody & "|||SEP|||" & noteCreated & "|||SEP|||" & noteModified & "|||SEP|||" & folderName & "|||END|||"
    end repeat
end tell
return output
"#;

pub struct NotesConnector {
    config: NotesConnectorConfig,
}

impl NotesConnector {
    pub fn new(config: NotesConnectorConfig) -> Self {
        Self { config }
    }

    /// The program and arguments that produce the export blob.
    fn export_command(&self) -> Vec<String> {
        if let Some(cmd) = &self.config.command {
            return cmd.clone();
        }
        match &self.config.script_path {
            Some(path) => vec!["osascript".to_string(), path.display().to_string()],
            None => vec![
                "osascript".to_string(),
                "-e".to_string(),
                EXPORT_SCRIPT.to_string(),
            ],
        }
    }

    async fn export(&self) -> Result<String> {
        let argv = self.export_command();
        tokio::task::spawn_blocking(move || run_export(&argv))
            .await
            .context("Notes export task panicked")?
    }
}

fn run_export(argv: &[String]) -> Result<String> {
    let Some((program, args)) = argv.split_first() else {
        bail!("Notes export command is empty");
    };

    tracing::info!("Running '{}' to export notes", program);
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("Failed to execute '{}'", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("'{}' exited with {}: {}", program, output.status, stderr.trim());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl Connector for NotesConnector {
    fn name(&self) -> &str {
        "notes"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Notes
    }

    fn ignore_empty_primary(&self) -> bool {
        self.config.ignore_empty_title
    }

    /// Count of notes that would be stored, so it lines up with a count of
    /// the collection. Rejections stay at debug here; `scan` reports them.
    async fn probe(&self) -> Result<Watermark> {
        let blob = self.export().await?;
        let normalized = normalize_notes(&blob, self.config.ignore_empty_title);
        for err in &normalized.rejected {
            tracing::debug!("{} probe: {}", self.name(), err);
        }
        Ok(Watermark::Count(normalized.documents.len()))
    }

    async fn fetch(&self) -> Result<RawBatch> {
        Ok(RawBatch::Notes(self.export().await?))
    }
}
