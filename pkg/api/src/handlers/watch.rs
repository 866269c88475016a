use axum::{
    Extension,
    extract::{
        Path as AxumPath, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use pkg_cluster::WatchKind;
use pkg_cluster::watch::spawn_watchers;
use pkg_constants::network::WATCH_CHANNEL_CAPACITY;
use pkg_manifest::naming::{format_namespace, parse_project_namespace, sanitise};
use pkg_types::{CoreError, CoreResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiResult;

/// Non-admins may only attach to their own `proj-<id>-<user>` namespaces.
pub(crate) async fn authorize_namespace(
    state: &AppState,
    auth: &AuthUser,
    namespace: &str,
) -> CoreResult<()> {
    if state.engine.gate.is_super_admin(auth.user_id).await? {
        return Ok(());
    }
    let owned = parse_project_namespace(namespace)
        .is_some_and(|pid| namespace == format_namespace(pid, &sanitise(&auth.username)));
    if owned {
        Ok(())
    } else {
        Err(CoreError::Forbidden(format!(
            "namespace '{}' does not belong to you",
            namespace
        )))
    }
}

/// WebSocket stream of object changes in one namespace.
pub async fn watch_namespace(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    AxumPath(namespace): AxumPath<String>,
    ws: WebSocketUpgrade,
) -> ApiResult {
    authorize_namespace(&state, &auth, &namespace).await?;
    info!("{} watching namespace {}", auth.username, namespace);
    Ok(ws
        .on_upgrade(move |socket| run_watch(state, namespace, socket))
        .into_response())
}

async fn run_watch(state: AppState, namespace: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(WATCH_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();
    let watchers = spawn_watchers(
        state.engine.gateway.clone(),
        namespace.clone(),
        &WatchKind::ALL,
        tx,
        cancel.clone(),
    );

    let writer = async {
        while let Some(envelope) = rx.recv().await {
            if sink.send(Message::Text(envelope.into())).await.is_err() {
                break;
            }
        }
    };
    let reader = async {
        while let Some(Ok(msg)) = stream.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    };
    tokio::select! {
        _ = writer => {}
        _ = reader => {}
    }

    cancel.cancel();
    for watcher in watchers {
        let _ = watcher.await;
    }
    debug!("Watch on {} closed", namespace);
}
