//! Element lookup: bounded waiting and multi-strategy field resolution.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{AutomationError, PageError, Result};
use crate::page::{NodeRef, Page};

/// Elements whose text can name a form field.
pub const LABEL_SELECTOR: &str = "label, .freebirdFormviewerComponentsQuestionBaseTitle";

/// Containers that group a question's label with its input, nearest first.
pub const FIELD_CONTAINERS: [&str; 3] = [
    ".freebirdFormviewerComponentsQuestionBaseRoot",
    r#"div[role="listitem"]"#,
    ".form-group",
];

/// Inputs considered by the placeholder and aria-label strategies.
pub const TEXT_INPUTS: &str =
    r#"input[type="text"], input[type="email"], input[type="tel"], textarea"#;

const FIELD_CONTROLS: &str = "input, textarea";

/// Which strategy resolved a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    Label,
    Placeholder,
    AriaLabel,
}

/// Waits until `probe` finds an element.
///
/// Resolves immediately when the element already exists. Otherwise it
/// re-probes on every document mutation and on a fixed poll interval,
/// whichever comes first, and gives up after `timeout`. The mutation observer
/// and the interval are owned by this future, so they are released on every
/// exit path, including when the caller drops the future early.
///
/// Backend and stale-node errors while waiting count as "not there yet";
/// an invalid selector fails at once.
pub async fn wait_for_element<F>(
    page: &dyn Page,
    mut probe: F,
    timeout: Duration,
    poll_interval: Duration,
    description: &str,
) -> Result<NodeRef>
where
    F: FnMut(&dyn Page) -> std::result::Result<Option<NodeRef>, PageError>,
{
    if let Some(node) = found(probe(page), description)? {
        return Ok(node);
    }

    debug!(element = description, ?timeout, "waiting for element");
    let mut observer = page.observe_mutations();
    let poll_interval = poll_interval.max(Duration::from_millis(1));
    let mut ticker = time::interval_at(time::Instant::now() + poll_interval, poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                warn!(element = description, ?timeout, "element wait timed out");
                return Err(AutomationError::ElementTimeout {
                    target: description.to_string(),
                    timeout,
                });
            }
            _ = observer.changed() => {}
            _ = ticker.tick() => {}
        }

        if let Some(node) = found(probe(page), description)? {
            return Ok(node);
        }
    }
}

/// A probe result as the wait sees it. Only an invalid selector is final;
/// other page errors mean the document is not ready yet (often mid-navigation).
fn found(
    probed: std::result::Result<Option<NodeRef>, PageError>,
    description: &str,
) -> Result<Option<NodeRef>> {
    match probed {
        Ok(node) => Ok(node),
        Err(err @ PageError::InvalidSelector(_)) => Err(err.into()),
        Err(err) => {
            debug!(element = description, "probe failed, retrying: {}", err);
            Ok(None)
        }
    }
}

/// [`wait_for_element`] for a CSS selector.
pub async fn wait_for_selector(
    page: &dyn Page,
    selector: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<NodeRef> {
    wait_for_element(
        page,
        |page| page.query_selector(selector),
        timeout,
        poll_interval,
        selector,
    )
    .await
}

/// Two-way containment between label text and a key: the label contains
/// the key, or the key contains the label. Both sides are compared
/// lower-cased with punctuation and whitespace removed, so "E-mail Address"
/// answers to "email".
pub fn label_matches(label_text: &str, key: &str) -> bool {
    let label = fold(label_text);
    let key = fold(key);
    if label.is_empty() || key.is_empty() {
        return false;
    }
    label.contains(&key) || key.contains(&label)
}

fn fold(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Finds the input a label describes: its `for` target, then the first
/// control in the nearest known container, then the first control in or at
/// a following sibling.
pub fn associated_input(page: &dyn Page, label: NodeRef) -> Result<Option<NodeRef>> {
    if let Some(target) = page.attribute(label, "for")?.filter(|id| !id.is_empty()) {
        if let Some(input) = page.element_by_id(&target)? {
            return Ok(Some(input));
        }
    }

    for container in FIELD_CONTAINERS {
        if let Some(root) = page.closest(label, container)? {
            if let Some(input) = page.query_within(root, FIELD_CONTROLS)? {
                return Ok(Some(input));
            }
            break;
        }
    }

    let mut sibling = page.next_element_sibling(label)?;
    while let Some(node) = sibling {
        if let Some(input) = page.query_within(node, FIELD_CONTROLS)? {
            return Ok(Some(input));
        }
        if page.matches(node, FIELD_CONTROLS)? {
            return Ok(Some(node));
        }
        sibling = page.next_element_sibling(node)?;
    }

    Ok(None)
}

/// Locates the input for a form-data key. Strategies run in order and the
/// first structural hit wins; there is no ranking between candidates.
pub fn find_field(page: &dyn Page, key: &str) -> Result<Option<(NodeRef, FieldStrategy)>> {
    let wanted = key.trim().to_lowercase();

    for label in page.query_selector_all(LABEL_SELECTOR)? {
        let text = page.text_content(label)?;
        if !label_matches(&text, &wanted) {
            continue;
        }
        if let Some(input) = associated_input(page, label)? {
            return Ok(Some((input, FieldStrategy::Label)));
        }
    }

    let inputs = page.query_selector_all(TEXT_INPUTS)?;

    for &input in &inputs {
        if attribute_contains(page, input, "placeholder", &wanted)? {
            return Ok(Some((input, FieldStrategy::Placeholder)));
        }
    }

    for &input in &inputs {
        if attribute_contains(page, input, "aria-label", &wanted)? {
            return Ok(Some((input, FieldStrategy::AriaLabel)));
        }
    }

    Ok(None)
}

/// Whether `node`'s attribute, lower-cased, contains `needle` (already
/// lower-cased).
pub fn attribute_contains(
    page: &dyn Page,
    node: NodeRef,
    name: &str,
    needle: &str,
) -> Result<bool> {
    Ok(page
        .attribute(node, name)?
        .is_some_and(|value| value.to_lowercase().contains(needle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{MemoryPage, el};

    const POLL: Duration = Duration::from_millis(100);

    #[test]
    fn label_matching_is_substring_both_ways() {
        assert!(label_matches("E-mail Address", "email"));
        assert!(label_matches("Full Name", "name"));
        assert!(label_matches("Name", "name field"));
        assert!(!label_matches("Phone number", "email"));
        assert!(!label_matches("Name", "nick"));
        assert!(!label_matches("   ", "name"));
        assert!(!label_matches("Name", "--"));
    }

    #[test]
    fn label_for_attribute_wins() {
        let page = MemoryPage::with_body(
            "about:blank",
            [
                el("label").attr("for", "fn").text("Full Name"),
                el("input").attr("type", "text").id("other"),
                el("input").attr("type", "text").id("fn"),
            ],
        );
        let (node, strategy) = find_field(&page, "name").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("fn").unwrap().unwrap());
        assert_eq!(strategy, FieldStrategy::Label);
    }

    #[test]
    fn google_forms_container_is_used() {
        let page = MemoryPage::with_body(
            "https://docs.google.com/forms/d/x/viewform",
            [el("div").attr("role", "listitem").child(
                el("div")
                    .child(el("div").class("freebirdFormviewerComponentsQuestionBaseTitle").text("Your email"))
                    .child(el("div").child(el("input").attr("type", "email").id("q1"))),
            )],
        );
        let (node, strategy) = find_field(&page, "Email").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("q1").unwrap().unwrap());
        assert_eq!(strategy, FieldStrategy::Label);
    }

    #[test]
    fn sibling_scan_finds_following_control() {
        let page = MemoryPage::with_body(
            "about:blank",
            [el("section")
                .child(el("label").text("Phone"))
                .child(el("span").text("(optional)"))
                .child(el("input").attr("type", "tel").id("phone"))],
        );
        let (node, _) = find_field(&page, "phone").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("phone").unwrap().unwrap());
    }

    #[test]
    fn placeholder_then_aria_label() {
        let page = MemoryPage::with_body(
            "about:blank",
            [
                el("input").attr("type", "text").attr("aria-label", "City").id("a"),
                el("input").attr("type", "text").attr("placeholder", "Your city").id("p"),
            ],
        );
        let (node, strategy) = find_field(&page, "city").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("p").unwrap().unwrap());
        assert_eq!(strategy, FieldStrategy::Placeholder);

        let (node, strategy) = find_field(&page, "CITY").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("p").unwrap().unwrap());
        assert_eq!(strategy, FieldStrategy::Placeholder);

        let page = MemoryPage::with_body(
            "about:blank",
            [el("textarea").attr("aria-label", "Comments").id("c")],
        );
        let (node, strategy) = find_field(&page, "comments").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("c").unwrap().unwrap());
        assert_eq!(strategy, FieldStrategy::AriaLabel);
    }

    #[test]
    fn label_without_input_falls_through() {
        let page = MemoryPage::with_body(
            "about:blank",
            [
                el("label").text("Email"),
                el("input").attr("type", "email").attr("placeholder", "email").id("e"),
            ],
        );
        // the sibling scan from the label already reaches the input
        let (node, strategy) = find_field(&page, "email").unwrap().unwrap();
        assert_eq!(node, page.element_by_id("e").unwrap().unwrap());
        assert_eq!(strategy, FieldStrategy::Label);

        let page = MemoryPage::with_body("about:blank", [el("p").child(el("label").text("Email"))]);
        assert!(find_field(&page, "email").unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn existing_element_resolves_without_observing() {
        let page = MemoryPage::with_body("about:blank", [el("input").id("search")]);
        let mut probes = 0;
        let node = wait_for_element(
            &page,
            |page| {
                probes += 1;
                page.query_selector("#search")
            },
            Duration::from_secs(5),
            POLL,
            "#search",
        )
        .await
        .unwrap();
        assert_eq!(Some(node), page.query_selector("#search").unwrap());
        assert_eq!(probes, 1);
        assert_eq!(page.live_observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_element_times_out_and_cleans_up() {
        let page = MemoryPage::new("about:blank");
        let started = time::Instant::now();
        let err = wait_for_selector(&page, "#never", Duration::from_millis(1_000), POLL)
            .await
            .unwrap_err();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1_000));
        assert!(waited < Duration::from_millis(1_000) + POLL);
        assert_eq!(
            err.to_string(),
            "Element not found within 1000ms: #never"
        );
        assert_eq!(page.live_observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn late_element_is_found_through_mutation() {
        let page = std::sync::Arc::new(MemoryPage::new("about:blank"));
        let writer = page.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(250)).await;
            writer.append(writer.body(), el("button").id("late"));
        });

        let started = time::Instant::now();
        // a long poll interval shows the observer path is what fires
        let node = wait_for_selector(&*page, "#late", Duration::from_secs(5), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(Some(node), page.query_selector("#late").unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(page.live_observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn attribute_change_wakes_the_wait() {
        let page = std::sync::Arc::new(MemoryPage::with_body(
            "about:blank",
            [el("button").id("pay").attr("disabled", "")],
        ));
        let writer = page.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(400)).await;
            let button = writer.element_by_id("pay").unwrap().unwrap();
            writer.set_attribute(button, "data-ready", "yes");
        });

        let node = wait_for_selector(
            &*page,
            r#"button[data-ready="yes"]"#,
            Duration::from_secs(5),
            Duration::from_secs(60),
        )
        .await
        .unwrap();
        assert_eq!(Some(node), page.element_by_id("pay").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_wait_releases_the_observer() {
        let page = MemoryPage::new("about:blank");
        {
            let wait = wait_for_selector(&page, "#x", Duration::from_secs(5), POLL);
            tokio::pin!(wait);
            assert!(
                time::timeout(Duration::from_millis(300), &mut wait)
                    .await
                    .is_err()
            );
            assert_eq!(page.live_observers(), 1);
        }
        assert_eq!(page.live_observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_backend_error_keeps_waiting() {
        let page = MemoryPage::with_body("about:blank", [el("input").id("q")]);
        let mut probes = 0;
        let started = time::Instant::now();
        let node = wait_for_element(
            &page,
            |page| {
                probes += 1;
                match probes {
                    1 => Ok(None),
                    2 => Err(PageError::Backend("Cannot find context with specified id".into())),
                    3 => Err(PageError::StaleNode(7)),
                    _ => page.query_selector("#q"),
                }
            },
            Duration::from_secs(5),
            POLL,
            "#q",
        )
        .await
        .unwrap();
        assert_eq!(Some(node), page.element_by_id("q").unwrap());
        assert_eq!(probes, 4);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(page.live_observers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_backend_error_ends_in_timeout() {
        let page = MemoryPage::new("about:blank");
        let started = time::Instant::now();
        let err = wait_for_element(
            &page,
            |_| Err(PageError::Backend("gone".into())),
            Duration::from_millis(500),
            POLL,
            "#gone",
        )
        .await
        .unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(err.to_string(), "Element not found within 500ms: #gone");
        assert_eq!(page.live_observers(), 0);
    }

    #[tokio::test]
    async fn invalid_selector_fails_fast() {
        let page = MemoryPage::new("about:blank");
        let err = wait_for_selector(&page, "<<", Duration::from_secs(5), POLL)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Page(PageError::InvalidSelector(_))));
    }
}
