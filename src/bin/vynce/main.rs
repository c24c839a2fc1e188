mod face;
mod hands;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use face::{CommandReply, Job};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use vynce_automation::command::command_suggestions;
use vynce_automation::command::llm::LlmCommandParser;
use vynce_automation::{AutomationEngine, ChromePage, CommandParser, LlmConfig, Page};

/// Bridge between natural-language commands and a Chrome tab.
#[derive(Parser, Debug)]
#[command(name = "vynce", version)]
struct Args {
    /// First port to try; the next nine are used if it is taken.
    #[arg(long, default_value_t = 3000)]
    port: u16,

    /// DevTools endpoint of a running Chrome to attach to.
    #[arg(long, default_value = "http://127.0.0.1:9222")]
    chrome_url: String,

    /// Run a launched Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Page to open once the browser is ready.
    #[arg(long)]
    start_url: Option<String>,

    /// Disable the LLM fallback even when LLM_API_KEY is set.
    #[arg(long)]
    no_ai: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vynce=info,vynce_automation=info".into()),
        )
        .init();

    let args = Args::parse();

    let jobs = face::start_server(args.port).await?;

    let launch = hands::LaunchConfig {
        chrome_url: args.chrome_url.clone(),
        headless: args.headless,
        start_url: args.start_url.clone(),
    };
    let ws_url = hands::resolve_ws_url(&launch.chrome_url).await;
    let session = tokio::task::spawn_blocking(move || hands::BrowserSession::launch(&launch, ws_url))
        .await
        .context("browser launch panicked")??;
    info!("browser ready");

    let tab = session.tab.clone();
    let page = Arc::new(
        tokio::task::spawn_blocking(move || ChromePage::new(tab))
            .await
            .context("page setup panicked")?,
    );
    let engine = AutomationEngine::new(page.clone());
    let parser = build_parser(args.no_ai);

    // ChromePage blocks in place, which needs a worker thread of its own.
    let worker = tokio::spawn(run_worker(jobs, parser, engine, page));
    worker.await.context("worker panicked")?;

    drop(session);
    Ok(())
}

fn build_parser(no_ai: bool) -> CommandParser {
    let parser = CommandParser::new();
    if no_ai {
        info!("AI fallback disabled by flag");
        return parser;
    }
    match LlmConfig::from_env() {
        Some(config) => {
            info!(model = %config.model, "AI fallback enabled");
            parser.with_fallback(Arc::new(LlmCommandParser::new(config)))
        }
        None => {
            warn!("LLM_API_KEY not set, AI fallback disabled");
            parser
        }
    }
}

/// Runs jobs one at a time, in arrival order.
async fn run_worker(
    mut jobs: mpsc::Receiver<Job>,
    parser: CommandParser,
    engine: AutomationEngine,
    page: Arc<ChromePage>,
) {
    info!("waiting for commands");
    while let Some(job) = jobs.recv().await {
        match job {
            Job::Command { text, reply } => {
                info!(command = %text, "received command");
                let parsed = parser.parse(&text).await;
                let result = if parsed.is_unknown() {
                    None
                } else {
                    Some(engine.handle_command(&parsed.to_request()).await)
                };
                if let Some(result) = &result {
                    info!(success = result.success, "{}", result.message);
                }
                let reply = reply.send(CommandReply {
                    parsed_command: parsed,
                    result,
                });
                if reply.is_err() {
                    debug!("client left before the command reply");
                }
            }
            Job::Automation { request, reply } => {
                let result = engine.handle_command(&request).await;
                info!(action = %request.action, success = result.success, "{}", result.message);
                if reply.send(result).is_err() {
                    debug!("client left before the automation reply");
                }
            }
            Job::Suggestions { reply } => {
                let url = page.url().unwrap_or_else(|err| {
                    warn!("could not read tab URL: {}", err);
                    String::new()
                });
                if reply.send(command_suggestions(&url)).is_err() {
                    debug!("client left before the suggestions reply");
                }
            }
        }
    }
    info!("job queue closed");
}
