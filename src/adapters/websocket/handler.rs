//! WebSocket upgrade handler and connection lifecycle.
//!
//! Route: `GET /ws?token=<bearer>`. The token is verified once, before the
//! upgrade completes; a bad or slow verification rejects with 401 and no
//! socket is ever established. After the upgrade the connection runs two
//! tasks: a writer draining the socket's bounded outbound queue and a read
//! loop feeding the dispatcher. Either side ending tears both down and runs
//! disconnect handling (rooms, presence, calls).

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::application::{dispatcher, App};
use crate::domain::foundation::SocketId;
use crate::domain::user::UserProfile;
use crate::ports::Claims;

use super::protocol::AckCache;
use super::session::Session;

/// Ack-dedupe depth per socket.
const ACK_CACHE_CAPACITY: usize = 256;

#[derive(Debug, Deserialize)]
pub struct AuthParams {
    token: Option<String>,
}

/// Builds the realtime router.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(app)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<AuthParams>,
    State(app): State<Arc<App>>,
) -> Response {
    let Some(token) = params.token else {
        return (StatusCode::UNAUTHORIZED, "missing token").into_response();
    };

    let verification =
        tokio::time::timeout(app.timeouts.handshake, app.verifier.verify(&token)).await;
    let claims = match verification {
        Ok(Ok(claims)) => claims,
        Ok(Err(e)) => {
            tracing::debug!("handshake rejected: {}", e);
            return (StatusCode::UNAUTHORIZED, "unauthenticated").into_response();
        }
        Err(_) => {
            tracing::warn!("handshake verification timed out");
            return (StatusCode::UNAUTHORIZED, "unauthenticated").into_response();
        }
    };

    // Refresh the profile mirror so fan-out can render names.
    let mut profile = UserProfile::new(claims.user_id.clone(), claims.display_name());
    if let Some(avatar) = &claims.avatar_url {
        profile = profile.with_avatar(avatar.clone());
    }
    if let Err(e) = app.store.upsert_user(&profile).await {
        tracing::error!(user_id = %claims.user_id, "profile mirror upsert failed: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, "internal").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, claims, app))
}

async fn handle_socket(socket: WebSocket, claims: Claims, app: Arc<App>) {
    let socket_id = SocketId::new();
    let user_id = claims.user_id.clone();
    let session = Session::new(socket_id, claims);

    let (outbound_tx, mut outbound_rx) = mpsc::channel(app.registry.queue_capacity());
    let registration = app
        .registry
        .register(socket_id, user_id.clone(), outbound_tx)
        .await;

    app.presence
        .socket_connected(&user_id, registration.first_for_user)
        .await;
    app.calls.user_reconnected(&user_id).await;

    tracing::debug!(socket_id = %socket_id, user_id = %user_id, "socket connected");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut write_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("outbound event serialization failed: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        // Channel closed (disconnect or overflow shed): close the socket.
        let _ = ws_tx.close().await;
    });

    let mut read_task = {
        let app = app.clone();
        tokio::spawn(async move {
            let mut acks = AckCache::new(ACK_CACHE_CAPACITY);
            while let Some(frame) = ws_rx.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        dispatcher::dispatch(&app, &session, &text, &mut acks).await;
                    }
                    Ok(Message::Binary(_)) => {
                        tracing::warn!(socket_id = %session.socket_id, "binary frame ignored");
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) | Err(_) => break,
                }
            }
        })
    };

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    if let Some(unregistration) = app.registry.unregister(&socket_id).await {
        if unregistration.last_for_user {
            app.presence.socket_disconnected(&user_id).await;
            app.calls.user_disconnected(&user_id).await;
        }
    }
    tracing::debug!(socket_id = %socket_id, user_id = %user_id, "socket disconnected");
}
