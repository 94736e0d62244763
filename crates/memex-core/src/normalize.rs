//! Normalization of raw connector output into [`Document`]s.
//!
//! Each source has its own identity and cleanup rules:
//!
//! | Source | Identity | Content |
//! |--------|----------|---------|
//! | notes | `note_id(title, created)` | `title + "\n" + body` without tags |
//! | mails | IMAP UID, verbatim | first `text/plain` part, markup removed, whitespace collapsed |
//!
//! A record that cannot be normalized is rejected on its own; the rest of
//! the batch goes through. Within a batch the first occurrence of an id wins.

use std::collections::HashSet;
use std::sync::OnceLock;

use mail_parser::{MessageParser, PartType};
use regex::Regex;

use crate::error::SyncError;
use crate::identity::note_id;
use crate::models::{Document, RawBatch, RawMessage, SourceKind};

/// Separator between notes in the export blob.
pub const NOTE_RECORD_DELIMITER: &str = "|||END|||";
/// Separator between the fields of one note.
pub const NOTE_FIELD_DELIMITER: &str = "|||SEP|||";
/// title, body, created, modified, folder.
pub const NOTE_FIELD_COUNT: usize = 5;

/// Result of normalizing one batch.
#[derive(Debug, Default)]
pub struct Normalized {
    /// Accepted documents, in input order, ids unique.
    pub documents: Vec<Document>,
    /// Per-record rejections (always [`SyncError::RecordParse`]). Callers
    /// decide how loudly to log them.
    pub rejected: Vec<SyncError>,
}

impl Normalized {
    fn reject(&mut self, kind: SourceKind, index: usize, reason: impl Into<String>) {
        self.rejected.push(SyncError::RecordParse {
            kind,
            index,
            reason: reason.into(),
        });
    }
}

/// Normalize a raw batch according to its source's rules.
///
/// `ignore_empty_primary` drops notes whose title is blank. It has no
/// effect on mail, whose identity never depends on the subject.
pub fn normalize(raw: &RawBatch, ignore_empty_primary: bool) -> Normalized {
    match raw {
        RawBatch::Notes(blob) => normalize_notes(blob, ignore_empty_primary),
        RawBatch::Mails(messages) => normalize_mails(messages),
    }
}

/// Parse the notes export blob.
pub fn normalize_notes(blob: &str, ignore_empty_title: bool) -> Normalized {
    let mut out = Normalized::default();
    let mut seen: HashSet<String> = HashSet::new();

    let blocks = blob
        .split(NOTE_RECORD_DELIMITER)
        .filter(|block| !block.trim().is_empty());

    for (index, block) in blocks.enumerate() {
        let fields: Vec<&str> = block.split(NOTE_FIELD_DELIMITER).map(str::trim).collect();
        if fields.len() != NOTE_FIELD_COUNT {
            out.reject(
                SourceKind::Notes,
                index,
                format!(
                    "expected {} fields, found {}",
                    NOTE_FIELD_COUNT,
                    fields.len()
                ),
            );
            continue;
        }

        let (title, body, created, modified, folder) =
            (fields[0], fields[1], fields[2], fields[3], fields[4]);

        if ignore_empty_title && title.is_empty() {
            tracing::debug!("skipping untitled note #{}", index);
            continue;
        }

        let id = note_id(title, created);
        if !seen.insert(id.clone()) {
            tracing::debug!("duplicate note '{}' ({}) collapsed", title, created);
            continue;
        }

        let content = format!("{}\n{}", title, strip_tags(body));
        out.documents.push(
            Document::new(id, content)
                .with_meta("title", title)
                .with_meta("created", created)
                .with_meta("modified", modified)
                .with_meta("folder", folder),
        );
    }

    out
}

/// Parse raw MIME messages.
pub fn normalize_mails(messages: &[RawMessage]) -> Normalized {
    let mut out = Normalized::default();
    let mut seen: HashSet<String> = HashSet::new();
    let parser = MessageParser::default();

    for (index, raw) in messages.iter().enumerate() {
        let id = raw.id.trim();
        if id.is_empty() {
            out.reject(SourceKind::Mails, index, "message has no id");
            continue;
        }
        if seen.contains(id) {
            continue;
        }

        let message = match parser.parse(&raw.bytes) {
            Some(m) => m,
            None => {
                out.reject(
                    SourceKind::Mails,
                    index,
                    format!("message {} is not valid MIME", id),
                );
                continue;
            }
        };

        let plain = message.parts.iter().find_map(|part| match &part.body {
            PartType::Text(text) => Some(text.as_ref()),
            _ => None,
        });
        let html = message.parts.iter().find_map(|part| match &part.body {
            PartType::Html(html) => Some(html.as_ref()),
            _ => None,
        });
        let content = html_to_text(plain.or(html).unwrap_or_default());

        let from = message
            .from()
            .and_then(|addr| addr.first())
            .map(|a| match (a.name(), a.address()) {
                (Some(name), Some(address)) => format!("{} <{}>", name, address),
                (Some(name), None) => name.to_string(),
                (None, Some(address)) => address.to_string(),
                (None, None) => String::new(),
            })
            .unwrap_or_default();
        let date = message.date().map(|d| d.to_rfc3339()).unwrap_or_default();

        seen.insert(id.to_string());
        out.documents.push(
            Document::new(id, content)
                .with_meta("from", from)
                .with_meta("subject", message.subject().unwrap_or_default())
                .with_meta("date", date),
        );
    }

    out
}

fn tag_pattern() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    // `.` does not match newlines, so a stray `<` never swallows the next line.
    TAG.get_or_init(|| Regex::new("<.*?>").expect("static regex"))
}

fn whitespace_pattern() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("static regex"))
}

/// Remove `<...>` tags, keeping inner text untouched.
pub fn strip_tags(text: &str) -> String {
    tag_pattern().replace_all(text, "").into_owned()
}

/// Flatten markup into a single line of readable text.
///
/// Tags become spaces so adjacent block elements don't glue words together.
pub fn html_to_text(text: &str) -> String {
    let without_tags = tag_pattern().replace_all(text, " ");
    let decoded = decode_entities(&without_tags);
    whitespace_pattern()
        .replace_all(&decoded, " ")
        .trim()
        .to_string()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
