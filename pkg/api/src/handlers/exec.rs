use axum::{
    Extension,
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use pkg_cluster::{ExecSession, TerminalSize};
use pkg_constants::network::{WS_PING_INTERVAL_SECS, WS_READ_DEADLINE_SECS, WS_READ_LIMIT_BYTES};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::handlers::watch::authorize_namespace;

const DEFAULT_SHELL: &str = "/bin/sh";

#[derive(Debug, Deserialize)]
pub struct ExecQuery {
    pub namespace: String,
    pub pod: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

/// Client to server terminal frames.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientFrame {
    Stdin { data: String },
    Resize { cols: u16, rows: u16 },
}

fn stdout_frame(data: &[u8]) -> String {
    json!({ "type": "stdout", "data": String::from_utf8_lossy(data) }).to_string()
}

/// WebSocket terminal attached to a container.
pub async fn exec_into_pod(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Query(q): Query<ExecQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult {
    authorize_namespace(&state, &auth, &q.namespace).await?;
    info!("{} exec into {}/{}", auth.username, q.namespace, q.pod);
    Ok(ws
        .max_message_size(WS_READ_LIMIT_BYTES)
        .on_upgrade(move |socket| run_exec(state, q, socket))
        .into_response())
}

async fn run_exec(state: AppState, q: ExecQuery, socket: WebSocket) {
    let command: Vec<String> = q
        .command
        .as_deref()
        .unwrap_or(DEFAULT_SHELL)
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let (sink, mut stream) = socket.split();
    let sink = Arc::new(Mutex::new(sink));

    let session = match state
        .engine
        .gateway
        .exec(&q.namespace, &q.pod, q.container.as_deref(), command)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!("Exec into {}/{} failed: {}", q.namespace, q.pod, e);
            let frame = json!({ "type": "error", "data": e.to_string() }).to_string();
            let mut sink = sink.lock().await;
            let _ = sink.send(Message::Text(frame.into())).await;
            let _ = sink.close().await;
            return;
        }
    };
    let ExecSession {
        mut stdin,
        mut stdout,
        resize,
        done,
    } = session;
    let cancel = CancellationToken::new();

    let pump = {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 8192];
            loop {
                let n = tokio::select! {
                    _ = cancel.cancelled() => break,
                    read = stdout.read(&mut buf) => match read {
                        Ok(0) | Err(_) => break,
                        Ok(n) => n,
                    },
                };
                let frame = stdout_frame(&buf[..n]);
                if sink.lock().await.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            cancel.cancel();
        })
    };

    let pinger = {
        let sink = sink.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(WS_PING_INTERVAL_SECS);
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if sink.lock().await.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            cancel.cancel();
        })
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = done.await;
            cancel.cancel();
        });
    }

    let deadline = Duration::from_secs(WS_READ_DEADLINE_SECS);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tokio::time::timeout(deadline, stream.next()) => next,
        };
        let msg = match next {
            Err(_) => {
                warn!("Exec session {}/{} idle past read deadline", q.namespace, q.pod);
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::Stdin { data }) => {
                    if stdin.write_all(data.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(ClientFrame::Resize { cols, rows }) => {
                    let _ = resize.try_send(TerminalSize { cols, rows });
                }
                Err(e) => debug!("Ignoring terminal frame: {}", e),
            },
            Message::Binary(data) => {
                if stdin.write_all(&data).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings and pongs only reset the read deadline.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    cancel.cancel();
    let _ = pump.await;
    let _ = pinger.await;
    let _ = sink.lock().await.close().await;
    debug!("Exec session {}/{} closed", q.namespace, q.pod);
}
