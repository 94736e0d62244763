//! `ask` command: retrieval-augmented chat.
//!
//! Every question retrieves fresh context from the index, is wrapped in
//! the prompt template, and goes to the chat model together with the
//! earlier turns. Answers stream to stdout as they arrive.

use anyhow::Result;
use futures::StreamExt;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::Config;
use crate::llm::{load_prompt_template, render_prompt, ChatClient, Conversation};
use crate::search::build_context;
use crate::sqlite_store::SqliteIndex;

pub struct AskOptions {
    pub k: Option<usize>,
    pub source: Option<String>,
    pub show_prompt: bool,
    pub interactive: bool,
}

pub async fn run_ask(config: &Config, question: &str, opts: AskOptions) -> Result<()> {
    let index = SqliteIndex::open(config).await?;
    let client = ChatClient::from_config(&config.llm)?;
    let template = load_prompt_template(&config.llm)?;
    let mut conversation = Conversation::new(&config.llm.system_prompt);

    let mut question = question.to_string();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let context = build_context(config, &index, &question, opts.k, opts.source.as_deref()).await?;
        let prompt = render_prompt(&template, &question, &context);
        if opts.show_prompt {
            println!("{}", prompt);
        }

        conversation.push_user(prompt);
        let answer = stream_answer(&client, &conversation).await?;
        conversation.push_assistant(answer);

        if !opts.interactive {
            break;
        }

        print!("\nYour turn ? ");
        std::io::stdout().flush()?;
        match lines.next_line().await? {
            Some(line) if !line.trim().is_empty() => question = line.trim().to_string(),
            _ => break,
        }
    }

    index.pool().close().await;
    Ok(())
}

/// Print the answer as it streams in and return the full text.
async fn stream_answer(client: &ChatClient, conversation: &Conversation) -> Result<String> {
    let mut stream = client.stream_chat(conversation.messages()).await?;
    let mut stdout = std::io::stdout();
    let mut answer = String::new();

    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
        answer.push_str(&fragment);
    }
    println!();

    tracing::debug!("answer: {} chars", answer.len());
    Ok(answer)
}
