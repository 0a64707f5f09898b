//! CLI entry point for agentry.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::app::CommandOutput;
use crate::session::Reply;
use crate::types::Role;

/// Log filter variable read by [`init_logging`].
pub const LOG_ENV: &str = "AGENTRY_LOG";

/// Agentry: chat with manifest-defined agents
#[derive(Parser, Debug)]
#[command(name = "agentry", version, about = "Chat with manifest-defined agents")]
pub struct Cli {
    /// Agent to start with (manifest file stem)
    #[arg(short, long)]
    pub agent: Option<String>,

    /// Directory containing agent manifests
    #[arg(long)]
    pub agents_dir: Option<PathBuf>,

    /// Config file (defaults to agentry.toml in the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run a YAML/JSON script of questions and exit
    #[arg(long)]
    pub autotest: Option<PathBuf>,

    /// Comma-separated commands to run before the interactive loop
    #[arg(long)]
    pub run: Option<String>,

    /// Debug logging; failed turns report their error
    #[arg(short, long)]
    pub verbose: bool,

    /// User id for stored history
    #[arg(short, long)]
    pub user: Option<String>,

    /// Keep history in memory instead of on disk
    #[arg(long)]
    pub in_memory: bool,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Install the global subscriber. `AGENTRY_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "agentry=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Text to show for a reply: function results and the assistant's answer.
pub fn render_reply(bot: &str, reply: &Reply) -> String {
    reply
        .messages
        .iter()
        .map(|m| match m.role {
            Role::Function => format!(
                "  [{}] {}",
                m.name.as_deref().unwrap_or("function"),
                truncate(&m.content, 200)
            ),
            _ => format!("{bot}: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text to show for any command output. `None` means exit.
pub fn render_output(bot: &str, output: &CommandOutput) -> Option<String> {
    match output {
        CommandOutput::Text(text) => Some(text.clone()),
        CommandOutput::Reply(Some(reply)) => Some(render_reply(bot, reply)),
        CommandOutput::Reply(None) => Some("(the agent failed and was reset)".to_string()),
        CommandOutput::Exit => None,
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
