//! Commands shared by the interactive loop and `--run`.

use std::str::FromStr;

use crate::error::{AgentryError, Result};

/// One user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Agents,
    Switch(String),
    Model(String),
    Reset,
    Sessions,
    Load(String),
    /// `None` toggles.
    Verbose(Option<bool>),
    Exit,
    Ask(String),
}

impl Command {
    /// Parse a `--run` list item: a command name with or without the
    /// leading slash, otherwise a question.
    pub fn parse_item(item: &str) -> Result<Self> {
        let item = item.trim();
        let (head, _) = split_head(item.trim_start_matches('/'));
        if item.starts_with('/') || is_command_name(head) {
            item.trim_start_matches('/').parse()
        } else {
            Ok(Self::Ask(item.to_string()))
        }
    }

    /// Parse an interactive line: `/command args` or a question.
    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();
        match line.strip_prefix('/') {
            Some(rest) => rest.parse(),
            None => Ok(Self::Ask(line.to_string())),
        }
    }
}

fn split_head(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (text, ""),
    }
}

fn is_command_name(word: &str) -> bool {
    matches!(
        word,
        "agents" | "switch" | "model" | "reset" | "sessions" | "load" | "verbose" | "exit" | "quit"
    )
}

fn required(command: &str, arg: &str) -> Result<String> {
    if arg.is_empty() {
        return Err(AgentryError::InvalidArgument(format!(
            "/{command} needs an argument"
        )));
    }
    Ok(arg.to_string())
}

impl FromStr for Command {
    type Err = AgentryError;

    /// Parse `name [argument]` without the leading slash.
    fn from_str(s: &str) -> Result<Self> {
        let (head, arg) = split_head(s.trim());
        match head {
            "agents" => Ok(Self::Agents),
            "switch" => Ok(Self::Switch(required(head, arg)?)),
            "model" => Ok(Self::Model(required(head, arg)?)),
            "reset" => Ok(Self::Reset),
            "sessions" => Ok(Self::Sessions),
            "load" => Ok(Self::Load(required(head, arg)?)),
            "verbose" => match arg {
                "" => Ok(Self::Verbose(None)),
                "on" | "true" => Ok(Self::Verbose(Some(true))),
                "off" | "false" => Ok(Self::Verbose(Some(false))),
                other => Err(AgentryError::InvalidArgument(format!(
                    "/verbose expects on or off, got {other}"
                ))),
            },
            "exit" | "quit" => Ok(Self::Exit),
            other => Err(AgentryError::InvalidArgument(format!(
                "unknown command /{other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slash_commands() {
        assert_eq!(Command::parse_line("/agents").unwrap(), Command::Agents);
        assert_eq!(
            Command::parse_line("/switch chef").unwrap(),
            Command::Switch("chef".into())
        );
        assert_eq!(
            Command::parse_line("/model openai:gpt-4o-mini").unwrap(),
            Command::Model("openai:gpt-4o-mini".into())
        );
        assert_eq!(
            Command::parse_line("/verbose off").unwrap(),
            Command::Verbose(Some(false))
        );
        assert_eq!(Command::parse_line("/quit").unwrap(), Command::Exit);
    }

    #[test]
    fn plain_line_is_a_question() {
        assert_eq!(
            Command::parse_line("what is the weather?").unwrap(),
            Command::Ask("what is the weather?".into())
        );
    }

    #[test]
    fn missing_argument_is_rejected() {
        assert!(Command::parse_line("/switch").is_err());
        assert!(Command::parse_line("/frobnicate").is_err());
    }

    #[test]
    fn run_items_accept_bare_command_names() {
        assert_eq!(Command::parse_item("reset").unwrap(), Command::Reset);
        assert_eq!(
            Command::parse_item(" switch tutor ").unwrap(),
            Command::Switch("tutor".into())
        );
        assert_eq!(
            Command::parse_item("hello there").unwrap(),
            Command::Ask("hello there".into())
        );
    }
}
