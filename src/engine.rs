//! The action executors and their dispatcher.
//!
//! Every executor is a short pipeline: locate, act, report. Failures are
//! values; nothing raised inside an executor reaches the caller of
//! [`AutomationEngine::handle_command`].

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::command::{Action, AutomationRequest, FormData};
use crate::config::EngineConfig;
use crate::error::{AutomationError, PageError, Result};
use crate::input::{NativeValueSetter, ValueSetter, click_element, press_enter};
use crate::page::{NodeRef, Page, visible_text};
use crate::resolver::{self, FieldStrategy};

const YOUTUBE_SEARCH_INPUTS: [&str; 5] = [
    "input#search",
    r#"input[name="search_query"]"#,
    r#"input[aria-label*="Search"]"#,
    "#search-input input",
    "ytd-searchbox input",
];

const YOUTUBE_SEARCH_BUTTONS: [&str; 3] = [
    "#search-icon-legacy",
    r#"button[aria-label*="Search"]"#,
    r#"#search-form button[type="submit"]"#,
];

const SUBMIT_BUTTONS: [&str; 4] = [
    r#"button[type="submit"]"#,
    r#"input[type="submit"]"#,
    r#"button[aria-label*="Submit"]"#,
    ".freebirdFormviewerViewNavigationSubmitButton",
];

const SUBMIT_TEXT_CANDIDATES: &str = r#"button, input[type="button"]"#;

const CLICKABLES: &str = r#"button, a, input[type="button"], input[type="submit"]"#;

const FILLABLES: &str = "input, textarea";

static SUBMIT_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)submit|send|next").expect("valid regex"));

/// Outcome of one field in a form fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Filled,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOutcome {
    pub field: String,
    pub status: FieldStatus,
    pub value: String,
}

/// What an executor reports back to the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<FieldOutcome>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_fields: Option<usize>,
}

impl ActionResult {
    pub fn ok(action: Action, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            action: Some(action.to_string()),
            ..Self::default()
        }
    }

    /// A clean miss: the executor ran but found nothing to act on.
    pub fn miss(action: Action, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            action: Some(action.to_string()),
            ..Self::default()
        }
    }

    /// An executor that stopped on an error.
    pub fn failed(action: Action, context: &str, err: &AutomationError) -> Self {
        Self {
            success: false,
            message: format!("{context}: {err}"),
            action: Some(action.to_string()),
            error: Some(err.to_string()),
            ..Self::default()
        }
    }

    fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }
}

/// Runs automation actions against one page.
///
/// Holds no state between calls. The host serializes commands; two actions
/// must not run against the same page at once.
pub struct AutomationEngine {
    page: Arc<dyn Page>,
    config: EngineConfig,
    setter: Arc<dyn ValueSetter>,
}

impl AutomationEngine {
    pub fn new(page: Arc<dyn Page>) -> Self {
        Self {
            page,
            config: EngineConfig::default(),
            setter: Arc::new(NativeValueSetter),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_value_setter(mut self, setter: Arc<dyn ValueSetter>) -> Self {
        self.setter = setter;
        self
    }

    pub fn page(&self) -> &dyn Page {
        &*self.page
    }

    /// Waits up to the configured element timeout for `selector`.
    pub async fn wait_for(&self, selector: &str) -> Result<NodeRef> {
        resolver::wait_for_selector(
            self.page(),
            selector,
            self.config.element_timeout(),
            self.config.poll_interval(),
        )
        .await
    }

    /// Routes a request to its executor.
    pub async fn handle_command(&self, request: &AutomationRequest) -> ActionResult {
        let Ok(action) = request.action.parse::<Action>() else {
            return unknown_action(&request.action);
        };

        let params = &request.params;
        let outcome = match action {
            Action::YoutubeSearch => match required(params.query.as_deref(), "query") {
                Ok(query) => Ok(self.youtube_search(query).await),
                Err(err) => Err(err),
            },
            Action::GoogleFormFill => match &params.form_data {
                Some(form) => Ok(self.fill_google_form(form).await),
                None => Err(AutomationError::MissingParam("formData")),
            },
            Action::SubmitForm => Ok(self.submit_form().await),
            Action::Click => match required(params.selector.as_deref(), "selector") {
                Ok(selector) => Ok(self.click_action(selector).await),
                Err(err) => Err(err),
            },
            Action::Fill => match (
                required(params.selector.as_deref(), "selector"),
                params.value.as_deref(),
            ) {
                (Ok(selector), Some(value)) => Ok(self.fill_action(selector, value).await),
                (Err(err), _) => Err(err),
                (Ok(_), None) => Err(AutomationError::MissingParam("value")),
            },
            Action::Unknown => return unknown_action(&request.action),
        };

        outcome.unwrap_or_else(|err| {
            warn!(%action, "rejected request: {}", err);
            ActionResult::failed(action, "Invalid request", &err)
        })
    }

    /// Types `query` into YouTube's search box and submits it.
    pub async fn youtube_search(&self, query: &str) -> ActionResult {
        info!(query, "starting YouTube search");
        match self.try_youtube_search(query).await {
            Ok(()) => ActionResult::ok(
                Action::YoutubeSearch,
                format!("YouTube search completed for: \"{query}\""),
            )
            .with_query(query),
            Err(err) => {
                warn!("YouTube search failed: {}", err);
                ActionResult::failed(Action::YoutubeSearch, "Failed to search YouTube", &err)
            }
        }
    }

    async fn try_youtube_search(&self, query: &str) -> Result<()> {
        let page = self.page();
        let input = match first_present(page, &YOUTUBE_SEARCH_INPUTS)? {
            Some(input) => input,
            None => {
                debug!("search input not rendered yet, waiting");
                resolver::wait_for_selector(
                    page,
                    YOUTUBE_SEARCH_INPUTS[0],
                    self.config.search_input_timeout(),
                    self.config.poll_interval(),
                )
                .await?
            }
        };

        page.focus(input)?;
        self.setter.set_field_value(page, input, query)?;
        tokio::time::sleep(self.config.input_settle()).await;

        match first_present(page, &YOUTUBE_SEARCH_BUTTONS)? {
            Some(button) => {
                debug!("clicking search button");
                click_element(page, button, self.config.scroll_settle()).await?;
            }
            None => {
                debug!("no search button, pressing Enter");
                press_enter(page, input)?;
            }
        }
        Ok(())
    }

    /// Fills every field of `form` it can locate. Fields are independent:
    /// a miss or an error on one does not stop the others.
    pub async fn fill_google_form(&self, form: &FormData) -> ActionResult {
        info!(fields = form.len(), "filling form");
        let mut results = Vec::with_capacity(form.len());

        for (key, value) in form.iter() {
            let status = match self.fill_field(key, value) {
                Ok(Some(strategy)) => {
                    debug!(field = key, ?strategy, "filled field");
                    FieldStatus::Filled
                }
                Ok(None) => {
                    warn!(field = key, "could not find field");
                    FieldStatus::NotFound
                }
                Err(err) => {
                    warn!(field = key, "could not fill field: {}", err);
                    FieldStatus::NotFound
                }
            };
            results.push(FieldOutcome {
                field: key.to_string(),
                status,
                value: value.to_string(),
            });
        }

        let filled = results
            .iter()
            .filter(|r| r.status == FieldStatus::Filled)
            .count();
        let total = form.len();
        ActionResult {
            success: filled > 0,
            message: format!("Filled {filled} out of {total} fields"),
            action: Some(Action::GoogleFormFill.to_string()),
            results: Some(results),
            filled_count: Some(filled),
            total_fields: Some(total),
            ..ActionResult::default()
        }
    }

    fn fill_field(&self, key: &str, value: &str) -> Result<Option<FieldStrategy>> {
        let page = self.page();
        let Some((input, strategy)) = resolver::find_field(page, key)? else {
            return Ok(None);
        };
        page.focus(input)?;
        self.setter.set_field_value(page, input, value)?;
        Ok(Some(strategy))
    }

    /// Clicks the page's submit control.
    pub async fn submit_form(&self) -> ActionResult {
        info!("submitting form");
        match self.try_submit_form().await {
            Ok(true) => ActionResult::ok(Action::SubmitForm, "Form submitted successfully"),
            Ok(false) => ActionResult::miss(Action::SubmitForm, "Submit button not found"),
            Err(err) => {
                warn!("form submission failed: {}", err);
                ActionResult::failed(Action::SubmitForm, "Failed to submit form", &err)
            }
        }
    }

    async fn try_submit_form(&self) -> Result<bool> {
        let page = self.page();
        let mut button = first_present(page, &SUBMIT_BUTTONS)?;
        if button.is_none() {
            for candidate in page.query_selector_all(SUBMIT_TEXT_CANDIDATES)? {
                if SUBMIT_TEXT.is_match(&visible_text(page, candidate)?) {
                    button = Some(candidate);
                    break;
                }
            }
        }

        let Some(button) = button else {
            return Ok(false);
        };
        click_element(page, button, self.config.scroll_settle()).await?;
        Ok(true)
    }

    /// Clicks `target`, read first as a CSS selector and then as text shown
    /// on a button or link.
    pub async fn click_action(&self, target: &str) -> ActionResult {
        info!(element = target, "clicking");
        match self.try_click(target).await {
            Ok(true) => ActionResult::ok(Action::Click, format!("Clicked element: {target}")),
            Ok(false) => ActionResult::miss(Action::Click, format!("Element not found: {target}")),
            Err(err) => {
                warn!("click failed: {}", err);
                ActionResult::failed(Action::Click, "Failed to click", &err)
            }
        }
    }

    async fn try_click(&self, target: &str) -> Result<bool> {
        let page = self.page();
        let mut element = query_literal(page, target)?;

        if element.is_none() {
            let needle = target.to_lowercase();
            for candidate in page.query_selector_all(CLICKABLES)? {
                if visible_text(page, candidate)?.to_lowercase().contains(&needle) {
                    element = Some(candidate);
                    break;
                }
            }
        }

        let Some(element) = element else {
            return Ok(false);
        };
        click_element(page, element, self.config.scroll_settle()).await?;
        Ok(true)
    }

    /// Types `value` into the input named by `target`: a CSS selector, a
    /// placeholder fragment, or label text.
    pub async fn fill_action(&self, target: &str, value: &str) -> ActionResult {
        info!(element = target, "filling input");
        match self.try_fill(target, value) {
            Ok(true) => ActionResult::ok(
                Action::Fill,
                format!("Filled \"{target}\" with \"{value}\""),
            ),
            Ok(false) => ActionResult::miss(Action::Fill, format!("Input not found: {target}")),
            Err(err) => {
                warn!("fill failed: {}", err);
                ActionResult::failed(Action::Fill, "Failed to fill", &err)
            }
        }
    }

    fn try_fill(&self, target: &str, value: &str) -> Result<bool> {
        let page = self.page();
        let needle = target.to_lowercase();
        let mut input = query_literal(page, target)?;

        if input.is_none() {
            for candidate in page.query_selector_all(FILLABLES)? {
                if resolver::attribute_contains(page, candidate, "placeholder", &needle)? {
                    input = Some(candidate);
                    break;
                }
            }
        }

        if input.is_none() {
            input = labelled_input(page, &needle)?;
        }

        let Some(input) = input else {
            return Ok(false);
        };
        page.focus(input)?;
        self.setter.set_field_value(page, input, value)?;
        Ok(true)
    }
}

fn unknown_action(name: &str) -> ActionResult {
    warn!(action = name, "no executor for action");
    ActionResult {
        success: false,
        message: format!("Unknown action: {name}"),
        action: Some(name.to_string()),
        ..ActionResult::default()
    }
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(AutomationError::MissingParam(name))
}

fn first_present(page: &dyn Page, selectors: &[&str]) -> Result<Option<NodeRef>> {
    for selector in selectors {
        if let Some(node) = page.query_selector(selector)? {
            debug!(selector, "matched");
            return Ok(Some(node));
        }
    }
    Ok(None)
}

/// `target` as a CSS selector. Text that is not a valid selector is a miss.
fn query_literal(page: &dyn Page, target: &str) -> Result<Option<NodeRef>> {
    match page.query_selector(target) {
        Ok(node) => Ok(node),
        Err(PageError::InvalidSelector(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// The input behind the first `<label>` whose text contains `needle`: its
/// `for` target, or a control nested inside it.
fn labelled_input(page: &dyn Page, needle: &str) -> Result<Option<NodeRef>> {
    for label in page.query_selector_all("label")? {
        if !page.text_content(label)?.to_lowercase().contains(needle) {
            continue;
        }
        return match page.attribute(label, "for")?.filter(|id| !id.is_empty()) {
            Some(id) => Ok(page.element_by_id(&id)?),
            None => Ok(page.query_within(label, FILLABLES)?),
        };
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandParams;
    use crate::page::{MemoryPage, el};
    use serde_json::json;

    fn engine(page: &Arc<MemoryPage>) -> AutomationEngine {
        AutomationEngine::new(page.clone())
    }

    fn single_name_form() -> Arc<MemoryPage> {
        Arc::new(MemoryPage::with_body(
            "https://docs.google.com/forms/d/x/viewform",
            [el("div")
                .class("form-group")
                .child(el("label").text("Name"))
                .child(el("input").attr("type", "text").id("name"))],
        ))
    }

    #[tokio::test]
    async fn partial_form_fill_is_success() {
        let page = single_name_form();
        let form: FormData = [("name", "Ann"), ("missingField", "x")].into_iter().collect();

        let result = engine(&page).fill_google_form(&form).await;

        assert!(result.success);
        assert_eq!(result.filled_count, Some(1));
        assert_eq!(result.total_fields, Some(2));
        assert_eq!(result.message, "Filled 1 out of 2 fields");
        let results = result.results.unwrap();
        assert_eq!(results[0].status, FieldStatus::Filled);
        assert_eq!(results[1].status, FieldStatus::NotFound);
        assert_eq!(results[1].field, "missingfield");

        let input = page.element_by_id("name").unwrap().unwrap();
        assert_eq!(page.value(input).unwrap().as_deref(), Some("Ann"));
        assert_eq!(
            page.event_names(input),
            ["focus", "input", "change", "keydown", "keypress", "keyup"]
        );
    }

    #[tokio::test]
    async fn form_fill_with_no_hits_fails() {
        let page = single_name_form();
        let form: FormData = [("zip", "12345")].into_iter().collect();
        let result = engine(&page).fill_google_form(&form).await;
        assert!(!result.success);
        assert_eq!(result.filled_count, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn submit_prefers_explicit_button() {
        let page = Arc::new(MemoryPage::with_body(
            "about:blank",
            [
                el("button").attr("type", "button").text("Next").id("next"),
                el("button").attr("type", "submit").text("Go").id("go"),
            ],
        ));
        let result = engine(&page).submit_form().await;
        assert!(result.success);
        assert_eq!(result.message, "Form submitted successfully");

        let go = page.element_by_id("go").unwrap().unwrap();
        assert_eq!(page.event_names(go), ["scroll-into-view", "native-click", "click"]);
        let next = page.element_by_id("next").unwrap().unwrap();
        assert!(page.event_names(next).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn submit_falls_back_to_button_text() {
        let page = Arc::new(MemoryPage::with_body(
            "about:blank",
            [
                el("button").text("Cancel"),
                el("input").attr("type", "button").attr("value", "Send it").id("send"),
            ],
        ));
        let result = engine(&page).submit_form().await;
        assert!(result.success);
        let send = page.element_by_id("send").unwrap().unwrap();
        assert!(page.event_names(send).contains(&"native-click"));
    }

    #[tokio::test]
    async fn submit_without_button_reports_miss() {
        let page = Arc::new(MemoryPage::with_body("about:blank", [el("button").text("Cancel")]));
        let result = engine(&page).submit_form().await;
        assert!(!result.success);
        assert_eq!(result.message, "Submit button not found");
        assert_eq!(result.action.as_deref(), Some("submit_form"));
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn click_treats_bad_selector_as_text() {
        let page = Arc::new(MemoryPage::with_body(
            "about:blank",
            [el("a").attr("href", "/x").text("Sign in now").id("link")],
        ));
        let result = engine(&page).click_action("Sign in!").await;
        assert!(!result.success);
        assert_eq!(result.message, "Element not found: Sign in!");

        let result = engine(&page).click_action("SIGN IN").await;
        assert!(result.success);
        assert_eq!(result.message, "Clicked element: SIGN IN");
    }

    #[tokio::test]
    async fn fill_tries_selector_placeholder_then_label() {
        let page = Arc::new(MemoryPage::with_body(
            "about:blank",
            [
                el("input").id("first").attr("placeholder", "Search here"),
                el("label").attr("for", "city").text("Your City"),
                el("input").id("city"),
                el("label").text("Zip ").child(el("input").id("zip")),
            ],
        ));
        let engine = engine(&page);

        let result = engine.fill_action("#first", "a").await;
        assert!(result.success);
        assert_eq!(result.message, "Filled \"#first\" with \"a\"");

        assert!(engine.fill_action("search", "b").await.success);
        let first = page.element_by_id("first").unwrap().unwrap();
        assert_eq!(page.value(first).unwrap().as_deref(), Some("b"));

        assert!(engine.fill_action("city", "Oslo").await.success);
        let city = page.element_by_id("city").unwrap().unwrap();
        assert_eq!(page.value(city).unwrap().as_deref(), Some("Oslo"));

        assert!(engine.fill_action("zip", "0150").await.success);
        let zip = page.element_by_id("zip").unwrap().unwrap();
        assert_eq!(page.value(zip).unwrap().as_deref(), Some("0150"));

        let result = engine.fill_action("phone", "1").await;
        assert!(!result.success);
        assert_eq!(result.message, "Input not found: phone");
    }

    #[tokio::test]
    async fn unknown_action_is_reported_verbatim() {
        let page = Arc::new(MemoryPage::new("about:blank"));
        let request = AutomationRequest {
            action: "dance".to_string(),
            params: CommandParams::default(),
        };
        let result = engine(&page).handle_command(&request).await;
        assert!(!result.success);
        assert_eq!(result.message, "Unknown action: dance");
        assert_eq!(result.action.as_deref(), Some("dance"));

        let request = AutomationRequest::new(Action::Unknown, CommandParams::default());
        let result = engine(&page).handle_command(&request).await;
        assert_eq!(result.message, "Unknown action: unknown");
    }

    #[tokio::test]
    async fn missing_params_become_failures() {
        let page = Arc::new(MemoryPage::new("about:blank"));
        let engine = engine(&page);

        let result = engine
            .handle_command(&AutomationRequest::new(Action::Fill, CommandParams::selector("#a")))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Missing parameter: value"));
        assert_eq!(result.action.as_deref(), Some("fill"));

        let result = engine
            .handle_command(&AutomationRequest::new(Action::Click, CommandParams::selector("  ")))
            .await;
        assert_eq!(result.error.as_deref(), Some("Missing parameter: selector"));
    }

    #[tokio::test(start_paused = true)]
    async fn youtube_search_times_out_without_input() {
        let page = Arc::new(MemoryPage::new("https://www.youtube.com/"));
        let result = engine(&page).youtube_search("lofi").await;
        assert!(!result.success);
        assert_eq!(
            result.message,
            "Failed to search YouTube: Element not found within 5000ms: input#search"
        );
        assert_eq!(result.action.as_deref(), Some("youtube_search"));
        assert_eq!(
            result.error.as_deref(),
            Some("Element not found within 5000ms: input#search")
        );
        assert_eq!(page.live_observers(), 0);
    }

    struct Recording(std::sync::Mutex<Vec<String>>);

    impl ValueSetter for Recording {
        fn set_field_value(
            &self,
            page: &dyn Page,
            node: NodeRef,
            value: &str,
        ) -> std::result::Result<(), PageError> {
            self.0.lock().unwrap().push(value.to_string());
            page.set_value_native(node, value)
        }
    }

    #[tokio::test]
    async fn custom_value_setter_is_used() {
        let page = single_name_form();
        let recording = Arc::new(Recording(Default::default()));
        let engine = engine(&page).with_value_setter(recording.clone());

        assert!(engine.fill_action("#name", "Bo").await.success);
        assert_eq!(*recording.0.lock().unwrap(), ["Bo"]);
        let input = page.element_by_id("name").unwrap().unwrap();
        assert_eq!(page.event_names(input), ["focus"]);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_uses_configured_timeout() {
        let page = Arc::new(MemoryPage::new("about:blank"));
        let engine = engine(&page).with_config(EngineConfig {
            element_timeout_ms: 250,
            ..EngineConfig::default()
        });
        let err = engine.wait_for(".later").await.unwrap_err();
        assert_eq!(err.to_string(), "Element not found within 250ms: .later");
    }

    #[test]
    fn results_serialize_in_camel_case() {
        let result = ActionResult {
            success: true,
            message: "Filled 1 out of 1 fields".to_string(),
            action: Some("google_form_fill".to_string()),
            results: Some(vec![FieldOutcome {
                field: "name".to_string(),
                status: FieldStatus::NotFound,
                value: "Ann".to_string(),
            }]),
            filled_count: Some(1),
            total_fields: Some(1),
            ..ActionResult::default()
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "success": true,
                "message": "Filled 1 out of 1 fields",
                "action": "google_form_fill",
                "results": [{"field": "name", "status": "not_found", "value": "Ann"}],
                "filledCount": 1,
                "totalFields": 1,
            })
        );
    }
}
