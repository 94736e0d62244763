use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_results")]
    pub n_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_results: default_n_results(),
        }
    }
}

fn default_n_results() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub notes: Option<NotesConnectorConfig>,
    pub mail: Option<MailConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotesConnectorConfig {
    #[serde(default = "default_true")]
    pub ignore_empty_title: bool,
    /// AppleScript file to run instead of the built-in export script.
    #[serde(default)]
    pub script_path: Option<PathBuf>,
    /// Arbitrary command whose stdout is the delimited export blob.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl Default for NotesConnectorConfig {
    fn default() -> Self {
        Self {
            ignore_empty_title: true,
            script_path: None,
            command: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct MailConnectorConfig {
    #[serde(default = "default_mail_host")]
    pub host: String,
    #[serde(default = "default_mail_port")]
    pub port: u16,
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
    #[serde(default = "default_address_env")]
    pub address_env: String,
    #[serde(default = "default_key_env")]
    pub key_env: String,
}

impl Default for MailConnectorConfig {
    fn default() -> Self {
        Self {
            host: default_mail_host(),
            port: default_mail_port(),
            mailbox: default_mailbox(),
            fetch_limit: default_fetch_limit(),
            address_env: default_address_env(),
            key_env: default_key_env(),
        }
    }
}

fn default_mail_host() -> String {
    "imap.mail.me.com".to_string()
}
fn default_mail_port() -> u16 {
    993
}
fn default_mailbox() -> String {
    "INBOX".to_string()
}
fn default_fetch_limit() -> usize {
    10
}
fn default_address_env() -> String {
    "APPLE_EMAIL".to_string()
}
fn default_key_env() -> String {
    "APPLE_MAIL_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    /// File containing `{user_query}` and `{documents}` placeholders.
    #[serde(default)]
    pub prompt_template: Option<PathBuf>,
    /// Connect and per-read timeout; a streamed answer may take longer overall.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            system_prompt: default_system_prompt(),
            prompt_template: None,
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com".to_string()
}
fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}
fn default_api_key_env() -> String {
    "API_KEY".to_string()
}
fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.watch.interval_secs == 0 {
        anyhow::bail!("watch.interval_secs must be > 0");
    }

    if config.retrieval.n_results < 1 {
        anyhow::bail!("retrieval.n_results must be >= 1");
    }

    if let Some(mail) = &config.connectors.mail {
        if mail.fetch_limit < 1 {
            anyhow::bail!("connectors.mail.fetch_limit must be >= 1");
        }
    }

    if let Some(notes) = &config.connectors.notes {
        if matches!(&notes.command, Some(cmd) if cmd.is_empty()) {
            anyhow::bail!("connectors.notes.command must not be empty");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse("[db]\npath = \"./data/memex.sqlite\"\n").unwrap();
        assert_eq!(config.retrieval.n_results, 3);
        assert_eq!(config.watch.interval_secs, 10);
        assert_eq!(config.embedding.provider, "disabled");
        assert_eq!(config.llm.model, "deepseek-chat");
        assert!(config.connectors.notes.is_none());
    }

    #[test]
    fn mail_section_defaults_to_icloud() {
        let config = parse("[db]\npath = \"x\"\n[connectors.mail]\n").unwrap();
        let mail = config.connectors.mail.unwrap();
        assert_eq!(mail.host, "imap.mail.me.com");
        assert_eq!(mail.port, 993);
        assert_eq!(mail.fetch_limit, 10);
        assert_eq!(mail.address_env, "APPLE_EMAIL");
    }

    #[test]
    fn rejects_zero_interval() {
        let err = parse("[db]\npath = \"x\"\n[watch]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn rejects_enabled_embedding_without_dims() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("dims"));
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
    }
}
