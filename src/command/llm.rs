use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{Action, AiCommandParser, CommandParams, ParsedCommand};
use crate::config::LlmConfig;

const SYSTEM_PROMPT: &str = r#"You turn a user's browser instruction into ONE automation command as JSON.

Available commands:
- {"action":"youtube_search","params":{"query":"..."}}
- {"action":"google_form_fill","params":{"formData":{"field name":"value"}}}
- {"action":"submit_form","params":{}}
- {"action":"click","params":{"selector":"css selector or visible button text"}}
- {"action":"fill","params":{"selector":"css selector, placeholder or label","value":"..."}}
- {"action":"unknown","params":{}}

Rules:
1. Return ONLY a single JSON object. No markdown, no explanation.
2. Use "unknown" when the instruction is not one of the commands above."#;

#[derive(Debug, Deserialize)]
struct CommandReply {
    action: String,
    #[serde(default)]
    params: CommandParams,
}

/// [`AiCommandParser`] backed by an OpenAI-compatible chat completions API.
pub struct LlmCommandParser {
    client: Client,
    config: LlmConfig,
}

impl LlmCommandParser {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn request(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&json!({
                "model": self.config.model,
                "messages": [
                    {"role": "system", "content": SYSTEM_PROMPT},
                    {"role": "user", "content": text},
                ],
                "temperature": 0.0,
            }))
            .send()
            .await
            .context("LLM request failed")?;

        let status = response.status();
        let json_resp: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let err_msg = json_resp["error"]["message"]
                .as_str()
                .unwrap_or("Unknown API error");
            return Err(anyhow!("LLM API error ({}): {}", status, err_msg));
        }

        json_resp["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| anyhow!("No content in LLM response: {}", json_resp))
    }
}

#[async_trait]
impl AiCommandParser for LlmCommandParser {
    async fn parse_command(&self, text: &str) -> Option<ParsedCommand> {
        let content = match self.request(text).await {
            Ok(content) => content,
            Err(err) => {
                warn!("AI parsing failed: {:#}", err);
                return None;
            }
        };
        debug!(reply = %content, "LLM reply");
        interpret_reply(text, &content)
    }
}

/// Maps the model's reply onto a command. Anything unparseable, unknown, or
/// naming an action outside the fixed set counts as no result.
fn interpret_reply(text: &str, content: &str) -> Option<ParsedCommand> {
    // Strip possible markdown fences the LLM might add
    let cleaned = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let reply: CommandReply = match serde_json::from_str(cleaned) {
        Ok(reply) => reply,
        Err(err) => {
            warn!("AI reply is not a command: {}", err);
            return None;
        }
    };

    let action: Action = reply.action.parse().ok()?;
    if action == Action::Unknown {
        return None;
    }

    Some(ParsedCommand {
        action,
        params: reply.params,
        original_command: text.to_string(),
        confidence: 1.0,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_reply_is_accepted() {
        let reply = "```json\n{\"action\":\"click\",\"params\":{\"selector\":\"Sign in\"}}\n```";
        let parsed = interpret_reply("log me in", reply).unwrap();
        assert_eq!(parsed.action, Action::Click);
        assert_eq!(parsed.params.selector.as_deref(), Some("Sign in"));
        assert_eq!(parsed.original_command, "log me in");
    }

    #[test]
    fn form_reply_keeps_field_order() {
        let reply = r#"{"action":"google_form_fill","params":{"formData":{"Name":"Ann","age":"4"}}}"#;
        let parsed = interpret_reply("x", reply).unwrap();
        let fields: Vec<_> = parsed.params.form_data.unwrap().iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(fields, vec!["name", "age"]);
    }

    #[test]
    fn unknown_or_garbage_is_no_result() {
        assert!(interpret_reply("x", r#"{"action":"unknown","params":{}}"#).is_none());
        assert!(interpret_reply("x", r#"{"action":"dance"}"#).is_none());
        assert!(interpret_reply("x", "I cannot help with that").is_none());
    }
}
