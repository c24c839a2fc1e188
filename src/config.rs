use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default OpenAI-compatible chat completions endpoint for the fallback parser.
pub const DEFAULT_LLM_API_URL: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "llama-3.3-70b-versatile";

/// Timing knobs for the automation engine. All values are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound for `wait_for_element` when the caller gives no timeout.
    pub element_timeout_ms: u64,
    /// How long the YouTube executor waits for the search box to render.
    pub search_input_timeout_ms: u64,
    /// Pause after injecting a value so page scripts can react.
    pub input_settle_ms: u64,
    /// Pause between scrolling a target into view and clicking it.
    pub scroll_settle_ms: u64,
    /// Poll period of the element wait; backs up the mutation observer.
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            element_timeout_ms: 10_000,
            search_input_timeout_ms: 5_000,
            input_settle_ms: 500,
            scroll_settle_ms: 300,
            poll_interval_ms: 100,
        }
    }
}

impl EngineConfig {
    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }

    pub fn search_input_timeout(&self) -> Duration {
        Duration::from_millis(self.search_input_timeout_ms)
    }

    pub fn input_settle(&self) -> Duration {
        Duration::from_millis(self.input_settle_ms)
    }

    pub fn scroll_settle(&self) -> Duration {
        Duration::from_millis(self.scroll_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Settings for the LLM-backed command parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

impl LlmConfig {
    /// Reads `LLM_API_KEY`, `LLM_API_URL` and `LLM_MODEL` (after loading a
    /// `.env` file if one exists). Returns `None` when no key is configured,
    /// which disables the fallback.
    pub fn from_env() -> Option<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("LLM_API_KEY").filter(|key| !key.trim().is_empty())?;
        Some(Self {
            api_key,
            api_url: lookup("LLM_API_URL").unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string()),
            model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        })
    }
}
