//! Command-line interface definitions
//!
//! Provides CLI argument parsing using clap for the `acp-chat` binary.

use std::path::PathBuf;

use clap::Parser;

/// Chat with an ACP coding agent from the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "acp-chat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Provider to launch (claude, codex, gemini, or one from settings)
    #[arg(short, long, env = "ACP_CHAT_PROVIDER")]
    pub provider: Option<String>,

    /// Working directory the agent is bound to (defaults to the current one)
    #[arg(short = 'C', long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Conversation id used for persisted history
    #[arg(long, value_name = "ID")]
    pub conversation: Option<String>,

    /// Resume a previously recorded agent session
    #[arg(short, long, value_name = "AGENT_SESSION_ID")]
    pub resume: Option<String>,

    /// Directory for persisted conversations
    #[arg(long, value_name = "DIR", env = "ACP_CHAT_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Enable diagnostic mode (auto-log to temp file)
    #[arg(short, long)]
    pub diagnostic: bool,

    /// Log directory (implies diagnostic mode)
    #[arg(short = 'l', long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    /// Log file name (implies diagnostic mode)
    #[arg(short = 'f', long, value_name = "FILE")]
    pub log_file: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only errors)
    /// Note: RUST_LOG env var takes priority over this flag
    #[arg(short, long)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for Cli {
    fn default() -> Self {
        Self {
            provider: None,
            cwd: None,
            conversation: None,
            resume: None,
            store_dir: None,
            diagnostic: false,
            log_dir: None,
            log_file: None,
            verbose: 0,
            quiet: false,
            log_json: false,
        }
    }
}

impl Cli {
    /// Check if diagnostic mode is enabled (output to file)
    ///
    /// Returns true if `--diagnostic` is set, or if `--log-dir` or `--log-file` is specified.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic || self.log_dir.is_some() || self.log_file.is_some()
    }

    /// Get the log level based on CLI arguments
    ///
    /// Interactive chat keeps stderr quiet by default:
    /// - `--quiet`: ERROR
    /// - default: WARN
    /// - `-v`: INFO
    /// - `-vv`: DEBUG
    /// - `-vvv` or more: TRACE
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::WARN,
                1 => tracing::Level::INFO,
                2 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }

    /// Get the log file path for diagnostic mode
    ///
    /// Uses the specified log directory and file name, or defaults to:
    /// - Directory: system temp directory
    /// - File: `acp-chat-{timestamp}.log`
    pub fn log_path(&self) -> PathBuf {
        let dir = self.log_dir.clone().unwrap_or_else(std::env::temp_dir);

        let filename = self.log_file.clone().unwrap_or_else(|| {
            let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            format!("acp-chat-{timestamp}.log")
        });

        dir.join(filename)
    }

    /// Working directory, falling back to the process one
    pub fn working_dir(&self) -> std::io::Result<PathBuf> {
        match &self.cwd {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir(),
        }
    }

    /// Conversation id, generated when not given
    pub fn conversation_id(&self) -> String {
        self.conversation
            .clone()
            .unwrap_or_else(|| format!("conv-{}", uuid::Uuid::new_v4().simple()))
    }
}
