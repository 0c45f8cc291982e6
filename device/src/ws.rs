use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    sync::{broadcast, watch},
};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use ortus_common::{
    CommandAdapter, CommandSink, DeviceCommand, DeviceState, LightSchedule, Millis, StatePayload,
};

const DEFAULT_PUMP_SECS: u32 = 60;
const UPDATE_BACKLOG: usize = 16;

#[derive(Clone)]
struct WsHub {
    sink: CommandSink,
    updates: broadcast::Sender<String>,
    latest: Arc<watch::Sender<Option<StatePayload>>>,
}

#[derive(Debug, Serialize)]
struct StateMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    state: &'a StatePayload,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Browser transport: a `/ws` socket for commands and live state, a
/// `GET /api/state` snapshot, and the static dashboard.
pub struct WebSocketCommandAdapter {
    port: u16,
    web_root: PathBuf,
    bind_retry: Duration,
    sink: Option<CommandSink>,
    updates: broadcast::Sender<String>,
    latest: Arc<watch::Sender<Option<StatePayload>>>,
    started: bool,
}

impl WebSocketCommandAdapter {
    pub fn new(port: u16, web_root: PathBuf, bind_retry: Duration) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        let (latest, _) = watch::channel(None);
        Self {
            port,
            web_root,
            bind_retry,
            sink: None,
            updates,
            latest: Arc::new(latest),
            started: false,
        }
    }
}

impl CommandAdapter for WebSocketCommandAdapter {
    fn name(&self) -> &'static str {
        "ws"
    }

    fn set_command_sink(&mut self, sink: CommandSink) {
        self.sink = Some(sink);
    }

    fn begin(&mut self) {
        if self.started {
            return;
        }
        let Some(sink) = self.sink.clone() else {
            warn!("websocket transport has no command sink; not starting");
            return;
        };
        self.started = true;

        let hub = WsHub {
            sink,
            updates: self.updates.clone(),
            latest: self.latest.clone(),
        };
        let app = Router::new()
            .route("/ws", get(handle_ws_upgrade))
            .route("/api/state", get(handle_get_state))
            .fallback_service(ServeDir::new(self.web_root.clone()))
            .with_state(hub);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let retry = self.bind_retry;
        tokio::spawn(async move {
            let listener = bind_with_retry(addr, retry).await;
            info!("websocket server listening on http://{addr}");
            if let Err(err) = axum::serve(listener, app).await {
                warn!("websocket server stopped: {err}");
            }
        });
    }

    fn tick(&mut self, _now: Millis) {}

    fn notify_state(&mut self, state: &DeviceState) {
        let payload = state.payload();
        let message = encode_state_message(&payload);
        self.latest.send_replace(Some(payload));
        // Nobody listening is fine.
        let _ = self.updates.send(message);
    }
}

/// Keeps trying until the port frees up.
async fn bind_with_retry(addr: SocketAddr, retry: Duration) -> TcpListener {
    loop {
        match TcpListener::bind(addr).await {
            Ok(listener) => return listener,
            Err(err) => {
                let retry_ms = retry.as_millis() as u64;
                warn!(%addr, retry_ms, "websocket bind failed: {err}");
                tokio::time::sleep(retry).await;
            }
        }
    }
}

async fn handle_ws_upgrade(ws: WebSocketUpgrade, State(hub): State<WsHub>) -> Response {
    ws.on_upgrade(move |socket| client_session(socket, hub))
}

async fn handle_get_state(State(hub): State<WsHub>) -> Response {
    let current = hub.latest.borrow().clone();
    match current {
        Some(payload) => Json(payload).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "state not available yet"),
    }
}

async fn client_session(mut socket: WebSocket, hub: WsHub) {
    let mut updates = hub.updates.subscribe();
    let current = hub.latest.borrow().as_ref().map(encode_state_message);
    if let Some(text) = current {
        if socket.send(Message::Text(text.into())).await.is_err() {
            return;
        }
    }
    hub.sink.subscriber_connected();
    debug!("websocket client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => match decode_ws_message(text.as_str()) {
                    Ok(command) => {
                        hub.sink.dispatch(command);
                    }
                    Err(err) => warn!("dropping websocket message: {err:#}"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("websocket receive failed: {err}");
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client fell behind; state updates dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!("websocket client disconnected");
}

fn encode_state_message(state: &StatePayload) -> String {
    serde_json::to_string(&StateMessage {
        kind: "state",
        state,
    })
    .unwrap_or_default()
}

/// Parses an inbound socket message. The type is matched without regard to
/// case and fields may sit at the top level or under `"payload"`.
pub fn decode_ws_message(text: &str) -> anyhow::Result<DeviceCommand> {
    let message: Value = serde_json::from_str(text).context("message is not JSON")?;
    let kind = message
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("message has no type"))?
        .to_ascii_lowercase();
    let fields = message
        .get("payload")
        .filter(|payload| payload.is_object())
        .unwrap_or(&message);

    let command = match kind.as_str() {
        "setbrightness" => {
            let value = fields
                .get("brightness")
                .or_else(|| fields.get("value"))
                .and_then(Value::as_i64)
                .ok_or_else(|| anyhow!("setBrightness needs an integer brightness"))?;
            DeviceCommand::SetBrightness {
                value: value.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            }
        }
        "schedulelights" => {
            let raw = fields.get("schedule").unwrap_or(fields).clone();
            let schedule: LightSchedule =
                serde_json::from_value(raw).context("invalid schedule")?;
            DeviceCommand::ScheduleLights { schedule }
        }
        "triggerpump" => {
            let duration_secs = match fields.get("duration") {
                None => DEFAULT_PUMP_SECS,
                Some(value) => value
                    .as_u64()
                    .map(|secs| u32::try_from(secs).unwrap_or(u32::MAX))
                    .ok_or_else(|| anyhow!("triggerPump duration must be a positive integer"))?,
            };
            DeviceCommand::TriggerPump { duration_secs }
        }
        "otaupdate" => {
            let url = fields
                .get("url")
                .and_then(Value::as_str)
                .filter(|url| !url.trim().is_empty())
                .ok_or_else(|| anyhow!("otaUpdate needs a url"))?;
            DeviceCommand::OtaUpdate {
                url: url.trim().to_string(),
            }
        }
        other => bail!("unknown message type {other:?}"),
    };
    Ok(command)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}
