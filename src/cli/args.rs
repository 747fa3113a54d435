use clap::Parser;
use std::path::PathBuf;

use crate::config::{AppConfig, BackendKind};

#[derive(Debug, Parser, Clone, PartialEq, Eq)]
#[command(name = "offline-fc")]
#[command(
    about = "Function calling for local LLMs, executed in a sandbox",
    long_about = "Function calling for local LLMs, executed in a sandbox\n\nThe model answers in plain text; fenced ```python blocks in its replies are\nrun in a sandbox session and their output is sent back to it.\n\nWith a TASK argument the task runs once and the answer is printed.\nWithout it an interactive session starts.\n\nConfig file loading:\n  - --config <path> (explicit file, overrides default path discovery)\n  - Default probe path when --config is not provided:\n    1. $XDG_CONFIG_HOME/offline-fc/config.toml\n    2. ~/.config/offline-fc/config.toml"
)]
pub struct CliArgs {
    /// Load config from this file path instead of the default discovery path.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Chat model name, e.g. gemma3:27b.
    #[arg(long, value_name = "NAME")]
    pub model: Option<String>,

    /// Sandbox backend: microsandbox or local (unisolated).
    #[arg(long, value_name = "BACKEND")]
    pub sandbox: Option<BackendKind>,

    /// Maximum execute-and-follow-up rounds per task.
    #[arg(long, value_name = "N")]
    pub max_rounds: Option<usize>,

    /// Log redacted HTTP traffic to stderr.
    #[arg(short, long)]
    pub verbose: bool,

    /// Run this task once and exit instead of starting the REPL.
    #[arg(value_name = "TASK")]
    pub task: Option<String>,
}

impl CliArgs {
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(model) = self.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            config.model = model.to_string();
        }
        if let Some(backend) = self.sandbox {
            config.sandbox.backend = backend;
        }
        if let Some(max_rounds) = self.max_rounds {
            config.max_rounds = max_rounds;
        }
    }
}
