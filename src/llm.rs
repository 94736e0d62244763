//! Streaming chat client for OpenAI-compatible APIs.
//!
//! Posts to `{base_url}/chat/completions` with `stream: true` and turns the
//! server-sent events into a stream of text fragments. [`Conversation`]
//! keeps the message history so follow-up questions see earlier answers.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;

/// Template used when `[llm] prompt_template` is not set.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "\
Answer the question using the personal notes and mails below when they are relevant. \
If they don't contain the answer, say so.

{documents}
Question: {user_query}
";

/// Text fragments of one streamed answer.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Message history of one chat session, starting with the system prompt.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            messages: vec![ChatMessage::new("system", system_prompt)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::new("user", content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::new("assistant", content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Fill `{user_query}` and `{documents}` in a prompt template.
///
/// Single pass over the template: placeholder text that shows up inside a
/// note, a mail, or the question itself is copied through untouched.
pub fn render_prompt(template: &str, user_query: &str, documents: &str) -> String {
    let substitutions = [("{user_query}", user_query), ("{documents}", documents)];

    let mut out = String::with_capacity(template.len() + user_query.len() + documents.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match substitutions.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Load the configured prompt template, or the built-in one.
pub fn load_prompt_template(config: &LlmConfig) -> Result<String> {
    match &config.prompt_template {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt template: {}", path.display())),
        None => Ok(DEFAULT_PROMPT_TEMPLATE.to_string()),
    }
}

pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl ChatClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        Self::with_key(config, api_key)
    }

    /// `timeout_secs` bounds connecting and each read, never the whole
    /// response, so a long streamed answer is not cut off.
    pub fn with_key(config: &LlmConfig, api_key: String) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
        })
    }

    /// Start a streamed completion over `messages`.
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<TokenStream> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("LLM API error {}: {}", status, text);
        }

        let state = StreamState {
            bytes: Box::pin(response.bytes_stream().map(|r| r.map(|b| b.to_vec()))),
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for event in state.decoder.push(&chunk) {
                            match event {
                                SseEvent::Delta(text) => state.pending.push_back(Ok(text)),
                                SseEvent::Done => state.done = true,
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.pending.push_back(Err(anyhow!("LLM stream error: {}", e)));
                        state.done = true;
                    }
                    None => state.done = true,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Vec<u8>>> + Send>>;

struct StreamState {
    bytes: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    done: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Incremental parser for `data:` lines. Network chunks may split a line
/// anywhere, so incomplete tails are buffered until the next push.
#[derive(Default)]
struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }

            match serde_json::from_str::<serde_json::Value>(data) {
                Ok(json) => {
                    if let Some(text) = json["choices"][0]["delta"]["content"].as_str() {
                        if !text.is_empty() {
                            events.push(SseEvent::Delta(text.to_string()));
                        }
                    }
                }
                Err(e) => tracing::debug!("skipping malformed SSE payload: {}", e),
            }
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut dec = SseDecoder::default();
        let first = dec.push(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel");
        assert!(first.is_empty());
        let second = dec.push(b"lo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" there\"}}]}\n");
        assert_eq!(
            second,
            vec![
                SseEvent::Delta("Hello".to_string()),
                SseEvent::Delta(" there".to_string())
            ]
        );
    }

    #[test]
    fn decoder_stops_at_done_and_ignores_noise() {
        let mut dec = SseDecoder::default();
        let events = dec.push(
            b": keep-alive\n\
              data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\
              data: [DONE]\n\
              data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        );
        assert_eq!(events, vec![SseEvent::Done]);
    }

    #[test]
    fn conversation_keeps_history_in_order() {
        let mut conv = Conversation::new("You are a helpful AI assistant.");
        conv.push_user("q1");
        conv.push_assistant("a1");
        conv.push_user("q2");
        let roles: Vec<&str> = conv.messages().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
    }

    #[test]
    fn prompt_placeholders_are_filled() {
        let prompt = render_prompt("Q: {user_query}\n{documents}", "when?", "DOCS");
        assert_eq!(prompt, "Q: when?\nDOCS");
        assert!(DEFAULT_PROMPT_TEMPLATE.contains("{user_query}"));
        assert!(DEFAULT_PROMPT_TEMPLATE.contains("{documents}"));
    }

    #[test]
    fn placeholder_text_inside_values_is_not_expanded() {
        let prompt = render_prompt(
            "{user_query} | {documents} | {other}",
            "what does {documents} mean?",
            "note mentions {user_query}",
        );
        assert_eq!(
            prompt,
            "what does {documents} mean? | note mentions {user_query} | {other}"
        );
    }

    /// Serves one streamed completion whose chunks arrive over longer than
    /// `timeout_secs` in total, each well inside it.
    async fn slow_stream_server() -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            for word in ["one", " two", " three"] {
                let line = format!(
                    "data: {{\"choices\":[{{\"delta\":{{\"content\":\"{}\"}}}}]}}\n\n",
                    word
                );
                socket.write_all(line.as_bytes()).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(600)).await;
            }
            socket.write_all(b"data: [DONE]\n\n").await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn streamed_answer_may_outlast_the_timeout() {
        let config = LlmConfig {
            base_url: slow_stream_server().await,
            timeout_secs: 1,
            ..LlmConfig::default()
        };
        let client = ChatClient::with_key(&config, "test-key".to_string()).unwrap();

        let mut stream = client
            .stream_chat(&[ChatMessage::new("user", "hi")])
            .await
            .unwrap();
        let mut answer = String::new();
        while let Some(token) = stream.next().await {
            answer.push_str(&token.unwrap());
        }
        assert_eq!(answer, "one two three");
    }
}
