use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::grammar::{CommandRule, default_rules, match_rules};
use super::{Action, CommandParams, ParsedCommand};

/// Error text attached to commands nothing could interpret.
pub const PARSE_FAILURE: &str = "Could not parse command";

/// Slow-path interpreter consulted when the grammar has no match.
/// Implementations return `None` for anything they cannot interpret.
#[async_trait]
pub trait AiCommandParser: Send + Sync {
    async fn parse_command(&self, text: &str) -> Option<ParsedCommand>;
}

/// Grammar-first command parser with an optional AI fallback.
pub struct CommandParser {
    rules: Vec<CommandRule>,
    fallback: Option<Arc<dyn AiCommandParser>>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    pub fn new() -> Self {
        Self::with_rules(default_rules())
    }

    pub fn with_rules(rules: Vec<CommandRule>) -> Self {
        Self {
            rules,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn AiCommandParser>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Grammar-only parse. Deterministic and never touches the fallback.
    pub fn parse_command(&self, text: &str) -> Option<ParsedCommand> {
        let (rule, params) = match_rules(&self.rules, text.trim())?;
        Some(ParsedCommand {
            action: rule.action,
            params,
            original_command: text.to_string(),
            confidence: 1.0,
            error: None,
        })
    }

    /// Full parse: grammar, then fallback, then `unknown`.
    pub async fn parse(&self, text: &str) -> ParsedCommand {
        if let Some(parsed) = self.parse_command(text) {
            debug!(action = %parsed.action, "parsed with grammar");
            return parsed;
        }

        if let Some(fallback) = &self.fallback {
            debug!("no grammar match, trying AI parser");
            if let Some(mut parsed) = fallback.parse_command(text).await {
                info!(action = %parsed.action, "parsed with AI");
                if parsed.original_command.is_empty() {
                    parsed.original_command = text.to_string();
                }
                return parsed;
            }
        }

        ParsedCommand {
            action: Action::Unknown,
            params: CommandParams::default(),
            original_command: text.to_string(),
            confidence: 0.0,
            error: Some(PARSE_FAILURE.to_string()),
        }
    }
}

/// Example phrasings for the page at `url`, most relevant first.
pub fn command_suggestions(url: &str) -> Vec<String> {
    let mut suggestions: Vec<String> = Vec::new();

    if url.contains("youtube.com") {
        suggestions.extend([
            "Search for lo-fi music on YouTube".to_string(),
            "Find cat videos on YouTube".to_string(),
        ]);
    } else if url.contains("google.com/forms") {
        suggestions.extend([
            "Fill form with name: John Doe, email: test@gmail.com".to_string(),
            "Submit this form".to_string(),
        ]);
    }

    suggestions.extend(
        [
            "Search for [query] on YouTube",
            "Fill form with name: [name], email: [email]",
            "Click the [button name] button",
            "Submit the form",
            "Fill the [field name] with [value]",
        ]
        .map(String::from),
    );
    suggestions
}
