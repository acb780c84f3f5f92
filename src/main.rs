// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use tandem_config::Config;
use tandem_core::executor::default_sessions_dir;
use tandem_core::{Executor, ExecutorConfig};
use tandem_protocol::{Event, Operation, ToolStatus, UserInputPayload};
use tandem_tools::{Question, UserInteraction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowConfig => {
                println!("{}", render_config(&config));
                return Ok(());
            }
            Commands::Sessions => {
                list_sessions();
                return Ok(());
            }
        }
    }

    let work_dir = match &cli.workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("cannot determine working directory")?,
    };

    let mut executor = Executor::new(ExecutorConfig {
        config,
        work_dir,
        sessions_dir: default_sessions_dir(),
        user_interaction: Some(Arc::new(StdinInteraction)),
        client_factory: None,
    });
    let events = executor.take_event_receiver();

    let (welcome_tx, mut welcome_rx) = mpsc::channel::<String>(4);
    let renderer = tokio::spawn(render_events(events, welcome_tx));

    let init = executor
        .submit(Operation::InitAgent { session_id: cli.resume.clone() })
        .await;
    executor.wait_for(&init).await;
    let session_id = match welcome_rx.recv().await {
        Some(id) if !id.is_empty() => id,
        _ => anyhow::bail!("agent failed to initialize; check the configuration"),
    };

    if let Some(prompt) = &cli.prompt {
        let id = executor
            .submit(Operation::UserInput {
                session_id,
                payload: UserInputPayload::text(prompt.clone()),
            })
            .await;
        executor.wait_for(&id).await;
        drop(executor);
        let _ = renderer.await;
        return Ok(());
    }

    // Line-oriented REPL: each line is one task; Ctrl-D exits.
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();
        let Ok(Some(line)) = lines.next_line().await else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }
        let id = executor
            .submit(Operation::UserInput {
                session_id: session_id.clone(),
                payload: UserInputPayload::text(line),
            })
            .await;
        executor.wait_for(&id).await;
    }

    drop(executor);
    let _ = renderer.await;
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn render_config(config: &Config) -> String {
    serde_json::to_string_pretty(config).unwrap_or_default()
}

fn list_sessions() {
    let Some(dir) = default_sessions_dir() else {
        eprintln!("no session directory available");
        return;
    };
    let Ok(entries) = std::fs::read_dir(&dir) else {
        println!("(no sessions)");
        return;
    };
    for entry in entries.flatten() {
        if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
            println!("{name}");
        }
    }
}

/// Consume the event queue and render a line-oriented transcript.  The
/// first `Welcome` per init is reported through `welcome_tx`.
async fn render_events(mut rx: mpsc::Receiver<Event>, welcome_tx: mpsc::Sender<String>) {
    let mut streaming = false;
    while let Some(event) = rx.recv().await {
        match event {
            Event::Welcome { session_id, model_name } => {
                println!("tandem | session {session_id} | model {model_name}");
                let _ = welcome_tx.send(session_id).await;
            }
            Event::ReplayHistory { events, .. } => {
                for replayed in events {
                    render_replay(&replayed);
                }
            }
            Event::AssistantMessageDelta { content, .. } => {
                streaming = true;
                print!("{content}");
                std::io::stdout().flush().ok();
            }
            Event::AssistantMessage { .. } => {
                if streaming {
                    println!();
                    streaming = false;
                }
            }
            Event::Thinking { content, .. } => {
                for line in content.lines() {
                    println!("  ∴ {line}");
                }
            }
            Event::ToolCall { tool_name, arguments, .. } => {
                let preview: String = arguments.chars().take(120).collect();
                println!("→ {tool_name}({preview})");
            }
            Event::ToolResult { tool_name, status, result, .. } => {
                let marker = match status {
                    ToolStatus::Success => "✓",
                    ToolStatus::Error => "✗",
                };
                let first_line = result.lines().next().unwrap_or("");
                println!("{marker} {tool_name}: {first_line}");
            }
            Event::TodoChange { todos, .. } => {
                for todo in &todos {
                    println!("  [{}] {}", todo.status, todo.content);
                }
            }
            Event::Error { message, can_retry } => {
                if can_retry {
                    eprintln!("warning: {message}");
                } else {
                    eprintln!("error: {message}");
                    // Unblock a caller waiting on initialization.
                    let _ = welcome_tx.try_send(String::new());
                }
            }
            Event::TaskFinish { .. } => {
                if streaming {
                    println!();
                    streaming = false;
                }
            }
            Event::End => break,
            _ => {}
        }
    }
}

fn render_replay(event: &Event) {
    match event {
        Event::UserMessage { content, .. } => println!("> {content}"),
        Event::AssistantMessage { content, .. } => println!("{content}"),
        Event::ToolCall { tool_name, .. } => println!("→ {tool_name}(…)"),
        _ => {}
    }
}

/// Answers `AskUserQuestion` from stdin.
struct StdinInteraction;

#[async_trait]
impl UserInteraction for StdinInteraction {
    async fn ask(&self, questions: Vec<Question>) -> Option<String> {
        for question in &questions {
            println!("? {}", question.question);
            for (index, option) in question.options.iter().enumerate() {
                match &option.description {
                    Some(description) => {
                        println!("  {}. {}: {description}", index + 1, option.label)
                    }
                    None => println!("  {}. {}", index + 1, option.label),
                }
            }
        }
        print!("answer: ");
        std::io::stdout().flush().ok();
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok().map(|_| line)
        })
        .await
        .ok()
        .flatten()?;
        let answer = answer.trim().to_string();
        if answer.is_empty() {
            None
        } else {
            Some(answer)
        }
    }
}
