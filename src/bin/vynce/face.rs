use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};
use vynce_automation::{ActionResult, AutomationRequest, ParsedCommand};

/// Work handed from the HTTP side to the single automation worker.
pub enum Job {
    Command {
        text: String,
        reply: oneshot::Sender<CommandReply>,
    },
    Automation {
        request: AutomationRequest,
        reply: oneshot::Sender<ActionResult>,
    },
    Suggestions {
        reply: oneshot::Sender<Vec<String>>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReply {
    pub parsed_command: ParsedCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

/// Progress streamed to `/events` listeners.
#[derive(Clone, Debug)]
pub enum BridgeEvent {
    Parsed(ParsedCommand),
    Finished(ActionResult),
}

impl BridgeEvent {
    fn to_sse_event(&self) -> Event {
        let (name, data) = match self {
            BridgeEvent::Parsed(parsed) => ("parsed", serde_json::to_string(parsed)),
            BridgeEvent::Finished(result) => ("result", serde_json::to_string(result)),
        };
        Event::default()
            .event(name)
            .data(data.unwrap_or_else(|_| "{}".to_string()))
    }
}

#[derive(Clone)]
struct AppState {
    jobs: mpsc::Sender<Job>,
    events: broadcast::Sender<BridgeEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Binds the first free port from `port` to `port + 9` and serves the
/// bridge. Returns the queue the worker drains.
pub async fn start_server(port: u16) -> Result<mpsc::Receiver<Job>> {
    let (jobs, job_rx) = mpsc::channel::<Job>(16);
    let (events, _) = broadcast::channel::<BridgeEvent>(64);

    let state = Arc::new(AppState { jobs, events });

    let app = Router::new()
        .route("/command", post(command_handler))
        .route("/automation", post(automation_handler))
        .route("/suggestions", get(suggestions_handler))
        .route("/events", get(sse_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state);

    let mut bound = None;
    for candidate in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            Ok(listener) => {
                bound = Some((listener, candidate));
                break;
            }
            Err(err) => debug!(port = candidate, "port unavailable: {}", err),
        }
    }
    let (listener, port) = bound.ok_or_else(|| {
        anyhow!(
            "could not bind any port in {}-{}; is another bridge running?",
            port,
            port.saturating_add(9)
        )
    })?;

    info!("bridge listening on http://localhost:{}", port);

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("bridge server stopped: {}", err);
        }
    });

    Ok(job_rx)
}

/// Queues a job and waits for the worker's answer.
async fn submit<T>(
    state: &AppState,
    make: impl FnOnce(oneshot::Sender<T>) -> Job,
) -> Result<T, (StatusCode, String)> {
    let (reply, answer) = oneshot::channel();
    state
        .jobs
        .send(make(reply))
        .await
        .map_err(|_| (StatusCode::SERVICE_UNAVAILABLE, "worker stopped".to_string()))?;
    answer
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "worker dropped the request".to_string()))
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> Result<Json<CommandReply>, (StatusCode, String)> {
    debug!(command = %payload.command, "POST /command");
    let reply = submit(&state, |reply| Job::Command {
        text: payload.command,
        reply,
    })
    .await?;

    let _ = state.events.send(BridgeEvent::Parsed(reply.parsed_command.clone()));
    if let Some(result) = &reply.result {
        let _ = state.events.send(BridgeEvent::Finished(result.clone()));
    }
    Ok(Json(reply))
}

async fn automation_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AutomationRequest>,
) -> Result<Json<ActionResult>, (StatusCode, String)> {
    debug!(action = %request.action, "POST /automation");
    let result = submit(&state, |reply| Job::Automation { request, reply }).await?;
    let _ = state.events.send(BridgeEvent::Finished(result.clone()));
    Ok(Json(result))
}

async fn suggestions_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let suggestions = submit(&state, |reply| Job::Suggestions { reply }).await?;
    Ok(Json(suggestions))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|event| match event {
        Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
        Err(_) => None,
    });
    Sse::new(stream)
}
