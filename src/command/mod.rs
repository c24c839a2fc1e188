//! Natural-language command interpretation.
//!
//! Free text is matched against an ordered grammar ([`grammar`]); when no
//! rule fires, an optional AI fallback ([`AiCommandParser`]) gets a chance.
//! The result is a [`ParsedCommand`] that the engine can execute.

mod form_data;
mod grammar;
pub mod llm;
mod parser;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use form_data::{FormData, parse_form_data};
pub use grammar::{CommandRule, Extractor, default_rules};
pub use parser::{AiCommandParser, CommandParser, PARSE_FAILURE, command_suggestions};

/// The fixed set of intents the engine knows how to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    YoutubeSearch,
    GoogleFormFill,
    SubmitForm,
    Click,
    Fill,
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::YoutubeSearch => "youtube_search",
            Action::GoogleFormFill => "google_form_fill",
            Action::SubmitForm => "submit_form",
            Action::Click => "click",
            Action::Fill => "fill",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "youtube_search" => Ok(Action::YoutubeSearch),
            "google_form_fill" => Ok(Action::GoogleFormFill),
            "submit_form" => Ok(Action::SubmitForm),
            "click" => Ok(Action::Click),
            "fill" => Ok(Action::Fill),
            "unknown" => Ok(Action::Unknown),
            other => Err(other.to_string()),
        }
    }
}

/// Action-specific parameters. Only the members relevant to the action are
/// set; absent members are left out of the JSON form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_data: Option<FormData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl CommandParams {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    pub fn form(form_data: FormData) -> Self {
        Self {
            form_data: Some(form_data),
            ..Self::default()
        }
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Self::default()
        }
    }

    pub fn fill(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            value: Some(value.into()),
            ..Self::default()
        }
    }
}

/// Outcome of parsing one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedCommand {
    pub action: Action,
    #[serde(default)]
    pub params: CommandParams,
    #[serde(default)]
    pub original_command: String,
    /// 1.0 for a grammar match, 0.0 when nothing could be parsed.
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ParsedCommand {
    pub fn is_unknown(&self) -> bool {
        self.action == Action::Unknown
    }

    pub fn to_request(&self) -> AutomationRequest {
        AutomationRequest {
            action: self.action.to_string(),
            params: self.params.clone(),
        }
    }
}

/// What the messaging layer hands to the engine. The action stays a raw
/// string so the dispatcher can report one it does not recognise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationRequest {
    pub action: String,
    #[serde(default)]
    pub params: CommandParams,
}

impl AutomationRequest {
    pub fn new(action: Action, params: CommandParams) -> Self {
        Self {
            action: action.to_string(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names_round_trip_through_from_str() {
        for action in [
            Action::YoutubeSearch,
            Action::GoogleFormFill,
            Action::SubmitForm,
            Action::Click,
            Action::Fill,
            Action::Unknown,
        ] {
            assert_eq!(action.as_str().parse::<Action>(), Ok(action));
            assert_eq!(serde_json::to_value(action).unwrap(), json!(action.as_str()));
        }
        assert_eq!("dance".parse::<Action>(), Err("dance".to_string()));
    }

    #[test]
    fn submit_form_serializes_with_empty_params() {
        let parsed = ParsedCommand {
            action: Action::SubmitForm,
            params: CommandParams::default(),
            original_command: "submit the form".into(),
            confidence: 1.0,
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&parsed).unwrap(),
            json!({
                "action": "submit_form",
                "params": {},
                "originalCommand": "submit the form",
                "confidence": 1.0
            })
        );
    }

    #[test]
    fn request_accepts_camel_case_form_data() {
        let request: AutomationRequest = serde_json::from_value(json!({
            "action": "google_form_fill",
            "params": {"formData": {"name": "Ann"}}
        }))
        .unwrap();
        let form = request.params.form_data.unwrap();
        assert_eq!(form.get("name"), Some("Ann"));
    }
}
