use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;
use tracing::{info, warn};

/// How to get hold of a browser.
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    /// DevTools endpoint of an already running Chrome (`http://host:port` or a
    /// `ws://` browser URL).
    pub chrome_url: String,
    pub headless: bool,
    pub start_url: Option<String>,
}

/// The browser and the one tab commands run against. Created once.
pub struct BrowserSession {
    _browser: Browser,
    pub tab: Arc<Tab>,
}

impl BrowserSession {
    /// Attaches to the Chrome at `ws_url` when given, otherwise launches a
    /// new one with a dedicated profile. Blocking.
    pub fn launch(config: &LaunchConfig, ws_url: Option<String>) -> Result<Self> {
        let session = match ws_url.map(Browser::connect) {
            Some(Ok(browser)) => {
                info!("attached to running Chrome");
                let tab = first_tab(&browser)?;
                Self {
                    _browser: browser,
                    tab,
                }
            }
            Some(Err(err)) => {
                warn!("could not attach to Chrome ({}), launching one", err);
                Self::spawn(config)?
            }
            None => Self::spawn(config)?,
        };

        if let Some(url) = &config.start_url {
            info!(url = %url, "opening start page");
            session
                .tab
                .navigate_to(url)
                .and_then(|tab| tab.wait_until_navigated())
                .with_context(|| format!("failed to open {url}"))?;
        }
        Ok(session)
    }

    fn spawn(config: &LaunchConfig) -> Result<Self> {
        let profile = profile_dir()?;
        std::fs::create_dir_all(&profile)
            .with_context(|| format!("cannot create Chrome profile at {}", profile.display()))?;
        info!(profile = %profile.display(), headless = config.headless, "starting Chrome");

        let options = LaunchOptions {
            headless: config.headless,
            user_data_dir: Some(profile),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--password-store=basic"),
            ],
            idle_browser_timeout: Duration::from_secs(3600),
            ..Default::default()
        };

        let browser = Browser::new(options).map_err(|e| anyhow!("Browser launch failed: {}", e))?;
        let tab = browser.new_tab()?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }
}

fn first_tab(browser: &Browser) -> Result<Arc<Tab>> {
    let existing = {
        let tabs = browser.get_tabs();
        let tabs = tabs.lock().map_err(|_| anyhow!("tab list lock poisoned"))?;
        tabs.first().cloned()
    };
    match existing {
        Some(tab) => Ok(tab),
        None => Ok(browser.new_tab()?),
    }
}

/// Profile kept between runs so logins survive restarts.
fn profile_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| anyhow!("no local data directory for the Chrome profile"))?;
    Ok(base.join("vynce").join("chrome-profile"))
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    web_socket_debugger_url: String,
}

/// Turns a DevTools HTTP endpoint into the browser's WebSocket URL.
/// Returns `None` when nothing answers there.
pub async fn resolve_ws_url(chrome_url: &str) -> Option<String> {
    if chrome_url.starts_with("ws://") || chrome_url.starts_with("wss://") {
        return Some(chrome_url.to_string());
    }

    let endpoint = format!("{}/json/version", chrome_url.trim_end_matches('/'));
    let reply = reqwest::Client::new()
        .get(&endpoint)
        .timeout(Duration::from_secs(2))
        .send()
        .await
        .ok()?;
    match reply.json::<VersionInfo>().await {
        Ok(info) => Some(info.web_socket_debugger_url),
        Err(err) => {
            warn!(endpoint = %endpoint, "unexpected DevTools reply: {}", err);
            None
        }
    }
}
