//! Ordered phrase grammar.
//!
//! Rules are evaluated strictly in list order and the first match wins.
//! Specific phrasings sit above general ones that would also match them
//! ("click the X button" before bare "click X"); moving a rule changes
//! what the parser returns.

use regex::{Captures, Regex};

use super::form_data::parse_form_data;
use super::{Action, CommandParams};

/// How a rule turns its captures into parameters. Every variant reads only
/// groups that its patterns always capture, so extraction cannot fail on a
/// successful match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// Group 1 is the search query.
    Query,
    /// Group 1 is free-form field data for [`parse_form_data`].
    FormData,
    /// No parameters.
    Empty,
    /// Group 1 is the target selector or text.
    Selector,
    /// Group 1 is the target, group 2 the value.
    TargetThenValue,
    /// Group 1 is the value, group 2 the target.
    ValueThenTarget,
}

impl Extractor {
    pub fn extract(self, caps: &Captures<'_>) -> CommandParams {
        let group = |i: usize| caps.get(i).map_or("", |m| m.as_str()).trim();
        match self {
            Extractor::Query => CommandParams::query(group(1)),
            Extractor::FormData => CommandParams::form(parse_form_data(group(1))),
            Extractor::Empty => CommandParams::default(),
            Extractor::Selector => CommandParams::selector(group(1)),
            Extractor::TargetThenValue => CommandParams::fill(group(1), group(2)),
            Extractor::ValueThenTarget => CommandParams::fill(group(2), group(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRule {
    pub pattern: Regex,
    pub action: Action,
    pub extractor: Extractor,
}

impl CommandRule {
    /// Builds a case-insensitive rule. Panics on a malformed pattern, which
    /// only happens for a bug in the built-in rule table.
    pub fn new(pattern: &str, action: Action, extractor: Extractor) -> Self {
        let pattern = Regex::new(&format!("(?i){pattern}"))
            .unwrap_or_else(|err| panic!("invalid grammar pattern {pattern:?}: {err}"));
        Self {
            pattern,
            action,
            extractor,
        }
    }

    pub fn apply(&self, text: &str) -> Option<CommandParams> {
        self.pattern
            .captures(text)
            .map(|caps| self.extractor.extract(&caps))
    }
}

/// The built-in rule table, in precedence order.
pub fn default_rules() -> Vec<CommandRule> {
    use Action::*;
    use Extractor::*;

    vec![
        // YouTube search
        CommandRule::new(
            r"(?:search|find|look\s+for|lookup)\s+(?:for\s+)?(.+?)\s+on\s+(?:youtube|yt)",
            YoutubeSearch,
            Query,
        ),
        CommandRule::new(r"youtube\s+search[:\s]+(.+)", YoutubeSearch, Query),
        // Form fill
        CommandRule::new(
            r"fill\s+(?:this\s+)?(?:google\s+)?form\s+with[:\s]+(.+)",
            GoogleFormFill,
            FormData,
        ),
        CommandRule::new(r"complete\s+(?:the\s+)?form[:\s]+(.+)", GoogleFormFill, FormData),
        CommandRule::new(
            r"autofill\s+(?:form\s+)?(?:with\s+)?[:\s]*(.+)",
            GoogleFormFill,
            FormData,
        ),
        // Submit
        CommandRule::new(r"submit\s+(?:the\s+)?(?:this\s+)?form", SubmitForm, Empty),
        // Click: the "... button" form must precede bare "click X"
        CommandRule::new(
            r"click\s+(?:on\s+)?(?:the\s+)?(.+?)\s+button",
            Click,
            Selector,
        ),
        CommandRule::new(r"click\s+(.+)", Click, Selector),
        CommandRule::new(r"press\s+(?:the\s+)?(.+?)\s+button", Click, Selector),
        // Fill a single field
        CommandRule::new(
            r"fill\s+(?:the\s+)?(.+?)\s+(?:field|box|input)\s+with\s+(.+)",
            Fill,
            TargetThenValue,
        ),
        CommandRule::new(
            r"type\s+(.+?)\s+(?:in|into)\s+(?:the\s+)?(.+)",
            Fill,
            ValueThenTarget,
        ),
        CommandRule::new(
            r"enter\s+(.+?)\s+(?:in|into)\s+(?:the\s+)?(.+)",
            Fill,
            ValueThenTarget,
        ),
    ]
}

/// Runs `text` through `rules` and returns the first hit.
pub(crate) fn match_rules<'r>(
    rules: &'r [CommandRule],
    text: &str,
) -> Option<(&'r CommandRule, CommandParams)> {
    rules
        .iter()
        .find_map(|rule| rule.apply(text).map(|params| (rule, params)))
}
