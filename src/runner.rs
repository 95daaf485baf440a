//! `acp-chat` runner
//!
//! Initializes logging, creates or resumes one session, and drives it from a
//! line-based REPL on stdin while streamed events are printed to stdout.

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::Cli;
use crate::coordinator::{JsonlMessageStore, SessionCoordinator};
use crate::provider::ProviderRegistry;
use crate::session::{SessionChannel, SessionEvent, SessionHandle, Subscription};
use crate::settings::SettingsManager;
use crate::tracing::ErrorTraceExt;
use crate::transport::{ApprovalOutcome, ProcessLauncher};
use crate::types::{ClientConfig, Message, Part, Role, ToolCallState};

const FALLBACK_PROVIDER: &str = "claude";

/// Build an EnvFilter based on CLI args and RUST_LOG environment variable
///
/// Priority: RUST_LOG environment variable > CLI arguments (-v, -vv, -q)
fn build_env_filter(cli: &Cli) -> tracing_subscriber::EnvFilter {
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        if !rust_log.is_empty() {
            return tracing_subscriber::EnvFilter::new(rust_log);
        }
    }

    let level = cli.log_level();
    tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into())
}

/// Initialize logging with file output (diagnostic mode)
fn init_logging_to_file(cli: &Cli) -> anyhow::Result<()> {
    let filter = build_env_filter(cli);
    let log_path = cli.log_path();

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(&log_path)
        .with_context(|| format!("creating log file {}", log_path.display()))?;

    eprintln!("Diagnostic mode: logging to {}", log_path.display());

    let writer = std::sync::Mutex::new(file);
    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    }
    Ok(())
}

/// Initialize logging with stderr output (normal mode)
fn init_logging_to_stderr(cli: &Cli) {
    let filter = build_env_filter(cli);

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    if cli.is_diagnostic() {
        init_logging_to_file(cli)
    } else {
        init_logging_to_stderr(cli);
        Ok(())
    }
}

/// A line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Send(String),
    Interrupt(String),
    Cancel,
    Approve(String),
    Deny(String),
    ShowQueue,
    Remove(usize),
    Mode(String),
    Model(String),
    Reconnect,
    Status,
    Quit,
    Help,
    Empty,
    Invalid(String),
}

fn parse_command(line: &str) -> ReplCommand {
    let line = line.trim();
    if line.is_empty() {
        return ReplCommand::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplCommand::Send(line.to_string());
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let need_arg = |make: fn(String) -> ReplCommand| {
        if arg.is_empty() {
            ReplCommand::Invalid(format!("/{} needs an argument", name))
        } else {
            make(arg.to_string())
        }
    };

    match name {
        "cancel" => ReplCommand::Cancel,
        "interrupt" => need_arg(ReplCommand::Interrupt),
        "approve" => need_arg(ReplCommand::Approve),
        "deny" => need_arg(ReplCommand::Deny),
        "queue" => ReplCommand::ShowQueue,
        "remove" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => ReplCommand::Remove(n - 1),
            _ => ReplCommand::Invalid("/remove takes a 1-based queue position".to_string()),
        },
        "mode" => need_arg(ReplCommand::Mode),
        "model" => need_arg(ReplCommand::Model),
        "reconnect" => ReplCommand::Reconnect,
        "status" => ReplCommand::Status,
        "quit" | "exit" => ReplCommand::Quit,
        "help" => ReplCommand::Help,
        // "//text" sends a line starting with a slash
        _ if rest.starts_with('/') => ReplCommand::Send(rest.to_string()),
        other => ReplCommand::Invalid(format!("unknown command /{}", other)),
    }
}

const HELP: &str = "\
commands:
  <text>              send, or queue while a turn is running
  /interrupt <text>   cancel the running turn and send next
  /cancel             cancel the running turn
  /approve <id>       allow a pending tool call
  /deny <id>          reject a pending tool call
  /queue              list queued messages
  /remove <n>         drop queued message n
  /mode <id>          switch mode
  /model <id>         switch model
  /reconnect          restart the agent after an error
  /status             show session state
  /quit               close the session and exit";

/// Turns session events into terminal output
///
/// Assistant text is printed incrementally; tool calls get one line per
/// state change.
#[derive(Debug, Default)]
struct EventPrinter {
    printed_text: HashMap<String, usize>,
    tool_states: HashMap<String, ToolCallState>,
}

impl EventPrinter {
    fn render(&mut self, event: &SessionEvent) -> String {
        match event {
            SessionEvent::Status { status, failure } => match failure {
                Some(failure) => format!("\n[{}: {} ({})]\n", status, failure.message, failure.kind),
                None => format!("\n[{}]\n", status),
            },
            SessionEvent::MessageAppended(message) | SessionEvent::MessageUpdated(message) => {
                self.render_message(message)
            }
            SessionEvent::MessagesPruned { removed, remaining } => {
                format!("\n[pruned {} old messages, {} kept]\n", removed, remaining)
            }
            SessionEvent::ApprovalRequested {
                tool_call_id,
                tool_name,
                title,
                ..
            } => format!(
                "\n[approval needed] {} {}\n  /approve {} or /deny {}\n",
                tool_name,
                title.as_deref().unwrap_or(""),
                tool_call_id,
                tool_call_id
            ),
            SessionEvent::Usage(usage) => match usage.ratio() {
                Some(ratio) if ratio > 0.8 => format!("\n[context {:.0}% full]\n", ratio * 100.0),
                _ => String::new(),
            },
            SessionEvent::Plan(entries) => {
                let mut out = String::from("\n[plan]\n");
                for entry in entries {
                    out.push_str(&format!("  - {}\n", entry.content));
                }
                out
            }
            SessionEvent::Info { title: Some(title) } => format!("\n[title] {}\n", title),
            SessionEvent::Modes(modes) => match &modes.current_id {
                Some(id) => format!("\n[mode {}]\n", id),
                None => String::new(),
            },
            SessionEvent::Models(models) => match &models.current_id {
                Some(id) => format!("\n[model {}]\n", id),
                None => String::new(),
            },
            _ => String::new(),
        }
    }

    fn render_message(&mut self, message: &Message) -> String {
        if message.role == Role::User {
            return String::new();
        }
        let mut out = String::new();

        let text = message.text();
        let printed = self.printed_text.entry(message.id.clone()).or_insert(0);
        if let Some(fresh) = text.get(*printed..) {
            out.push_str(fresh);
            *printed = text.len();
        }

        for part in &message.parts {
            let Part::ToolCall(call) = part else {
                continue;
            };
            if self.tool_states.get(&call.tool_call_id) == Some(&call.state) {
                continue;
            }
            self.tool_states.insert(call.tool_call_id.clone(), call.state);
            out.push_str(&format!(
                "\n  [{} {} {}]",
                call.tool_name, call.tool_call_id, call.state
            ));
            if let Some(error) = &call.error_text {
                out.push_str(&format!(" {}", error));
            }
            out.push('\n');
        }

        if let Some(error) = &message.error {
            out.push_str(&format!("\n[turn failed: {}]\n", error));
        }
        out
    }
}

async fn print_events(mut subscription: Subscription) {
    let mut printer = EventPrinter::default();
    while let Some(event) = subscription.recv().await {
        let out = printer.render(&event);
        if out.is_empty() {
            continue;
        }
        let mut stdout = std::io::stdout().lock();
        drop(stdout.write_all(out.as_bytes()));
        drop(stdout.flush());
    }
}

/// Run one REPL command; returns false when the user quits
async fn execute(handle: &SessionHandle, command: ReplCommand) -> crate::types::Result<bool> {
    match command {
        ReplCommand::Empty => {}
        ReplCommand::Quit => return Ok(false),
        ReplCommand::Help => println!("{}", HELP),
        ReplCommand::Invalid(reason) => println!("{}", reason),
        ReplCommand::Send(text) => {
            handle.submit(text).await?;
        }
        ReplCommand::Interrupt(text) => {
            handle.interrupt_and_send(text).await?;
        }
        ReplCommand::Cancel => {
            if !handle.cancel().await? {
                println!("nothing to cancel");
            }
        }
        ReplCommand::Approve(id) => report_approval(handle.approve(&id, true).await?),
        ReplCommand::Deny(id) => report_approval(handle.approve(&id, false).await?),
        ReplCommand::ShowQueue => {
            let snapshot = handle.snapshot().await?;
            if let Some(entry) = &snapshot.pending_interrupt {
                println!("  next (interrupt): {}", entry.text);
            }
            for (i, entry) in snapshot.queued.iter().enumerate() {
                println!("  {}: {}", i + 1, entry.text);
            }
            if snapshot.queued.is_empty() && snapshot.pending_interrupt.is_none() {
                println!("queue is empty");
            }
        }
        ReplCommand::Remove(index) => match handle.remove_queued(index).await? {
            Some(entry) => println!("removed: {}", entry.text),
            None => println!("no queued message at {}", index + 1),
        },
        ReplCommand::Mode(id) => handle.set_mode(&id).await?,
        ReplCommand::Model(id) => handle.set_model(&id).await?,
        ReplCommand::Reconnect => handle.reconnect().await?,
        ReplCommand::Status => {
            let snapshot = handle.snapshot().await?;
            println!(
                "session {} ({}) status={} messages={} queued={}",
                snapshot.session_key,
                snapshot.provider_id,
                snapshot.status,
                snapshot.messages.len(),
                snapshot.queued.len()
            );
            if let Some(usage) = &snapshot.usage {
                println!("  tokens {}/{}", usage.used_tokens, usage.max_tokens);
            }
            if let Some(failure) = &snapshot.failure {
                println!("  failure: {} ({})", failure.message, failure.kind);
            }
        }
    }
    Ok(true)
}

fn report_approval(outcome: ApprovalOutcome) {
    if outcome == ApprovalOutcome::Ignored {
        println!("tool call is no longer waiting for approval");
    }
}

/// Run the chat client with CLI arguments
pub async fn run_with_cli(cli: &Cli) -> anyhow::Result<()> {
    init_logging(cli)?;

    let cwd = cli.working_dir().context("resolving working directory")?;
    let settings = SettingsManager::new(&cwd);
    let mut config = ClientConfig::from_env(settings.settings());
    if let Some(dir) = &cli.store_dir {
        config.store_dir.clone_from(dir);
    }
    let provider_id = cli
        .provider
        .clone()
        .or_else(|| config.default_provider.clone())
        .unwrap_or_else(|| FALLBACK_PROVIDER.to_string());
    let conversation_id = cli.conversation_id();

    tracing::info!(
        provider = %provider_id,
        conversation_id = %conversation_id,
        cwd = %cwd.display(),
        store_dir = %config.store_dir.display(),
        "Starting acp-chat"
    );

    let store = Arc::new(JsonlMessageStore::new(config.store_dir.clone()));
    let coordinator = SessionCoordinator::new(
        ProviderRegistry::from_settings(settings.settings()),
        config,
        Arc::new(ProcessLauncher::new()),
        store,
    );

    let handle = match &cli.resume {
        Some(prior) => {
            coordinator
                .resume_session(&conversation_id, &provider_id, &cwd, prior)
                .await
        }
        None => {
            coordinator
                .create_session(&conversation_id, &provider_id, &cwd)
                .await
        }
    }
    .map_err(|e| {
        e.trace_error();
        e
    })?;

    let subscription = handle.subscribe(&SessionChannel::ALL).await?;
    let printer = tokio::spawn(print_events(subscription));

    println!(
        "conversation {} with {} (type /help for commands)",
        conversation_id, provider_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match execute(&handle, parse_command(&line)).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                e.trace_error();
                println!("error: {}", e);
            }
        }
    }

    coordinator.shutdown_all().await;
    printer.abort();
    Ok(())
}
