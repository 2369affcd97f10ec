//! RPC transport over WebSocket
//!
//! Each text frame is one request envelope; each reply is one response frame.
//! Requests on the same socket run concurrently and are matched to replies by id.

use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket, Ws};
use warp::{Filter, Rejection, Reply};

use super::with_services;
use crate::auth::token::Claims;
use crate::authz::Transport;
use crate::constants::{AUTHORIZATION_METADATA_KEY, RPC_PATH};
use crate::error::{ErrorClass, FlagGateError, Result};
use crate::rpc::{RpcCall, RpcError, RpcRequest, RpcResponse, RpcStatus};
use crate::services::AppServices;

/// `GET /rpc` upgraded to a WebSocket
pub fn rpc_route(
    services: Arc<AppServices>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::path(RPC_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_services(services))
        .map(|ws: Ws, services: Arc<AppServices>| {
            info!("New RPC connection");
            ws.on_upgrade(move |socket| handle_rpc_socket(socket, services))
        })
}

/// Serves one RPC connection until the peer closes it
pub async fn handle_rpc_socket(ws: WebSocket, services: Arc<AppServices>) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    tokio::task::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_tx.send(message).await {
                error!("Failed to send RPC response: {}", e);
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                error!("WebSocket error: {}", e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_str() else {
            if msg.is_binary() {
                warn!("Ignoring binary frame on RPC socket");
            }
            continue;
        };

        let text = text.to_string();
        let services = services.clone();
        let tx = tx.clone();
        tokio::task::spawn(async move {
            let response = handle_frame(&services, &text).await;
            match serde_json::to_string(&response) {
                Ok(frame) => {
                    if tx.send(Message::text(frame)).is_err() {
                        debug!("RPC connection closed before response {}", response.id);
                    }
                }
                Err(e) => error!("Failed to serialize RPC response: {}", e),
            }
        });
    }

    debug!("RPC connection closed");
}

/// Parses and dispatches one text frame
pub async fn handle_frame(services: &AppServices, text: &str) -> RpcResponse {
    match serde_json::from_str::<RpcRequest>(text) {
        Ok(request) => dispatch(services, request).await,
        Err(e) => {
            warn!("Malformed RPC frame: {}", e);
            RpcResponse::error(
                "",
                RpcError {
                    status: RpcStatus::InvalidArgument,
                    message: "malformed request".to_string(),
                },
            )
        }
    }
}

/// Runs the enforcement gate, then the handler for `request.method`.
///
/// Usable without a socket.
pub async fn dispatch(services: &AppServices, request: RpcRequest) -> RpcResponse {
    let RpcRequest {
        id,
        method,
        metadata,
        payload,
    } = request;

    // keys are case-insensitive, so two spellings of the key are ambiguous
    let mut carriers = metadata
        .iter()
        .filter(|(key, _)| key.eq_ignore_ascii_case(AUTHORIZATION_METADATA_KEY))
        .map(|(_, value)| value.as_str());
    let carrier = match (carriers.next(), carriers.next()) {
        (first, None) => first,
        _ => {
            warn!("Rejecting RPC {} with duplicate authorization metadata", method);
            let err = FlagGateError::Validation("duplicate authorization metadata".to_string());
            return RpcResponse::error(id, RpcError::from(&err));
        }
    };

    let claims = match services
        .enforcer
        .authorize(Transport::Rpc, &method, carrier)
        .await
    {
        Ok(claims) => claims,
        Err(err) => return RpcResponse::error(id, RpcError::from(&err)),
    };

    let call = match RpcCall::decode(&method, payload) {
        Ok(call) => call,
        Err(err) => return RpcResponse::error(id, err),
    };

    match execute(services, call, claims.as_ref()).await {
        Ok(body) => RpcResponse::ok(id, body),
        Err(err) => {
            if err.class() == ErrorClass::Internal {
                error!("RPC {} failed: {}", method, err);
            } else {
                debug!("RPC {} rejected: {}", method, err);
            }
            RpcResponse::error(id, RpcError::from(&err))
        }
    }
}

fn to_body<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| FlagGateError::Internal(format!("failed to encode response: {}", e)))
}

async fn execute(services: &AppServices, call: RpcCall, claims: Option<&Claims>) -> Result<Value> {
    match call {
        RpcCall::Login(req) => to_body(services.lifecycle.login(&req.email, &req.password).await?),
        RpcCall::Refresh(req) => to_body(services.lifecycle.refresh(&req.refresh_token).await?),
        RpcCall::Activate(req) => to_body(
            services
                .lifecycle
                .activate(&req.email, &req.password, &req.new_password)
                .await?,
        ),
        RpcCall::CreateFlag(req) => to_body(
            services
                .flags
                .create(&req.name, &req.description, req.enabled)
                .await?,
        ),
        RpcCall::UpdateFlag(req) => to_body(
            services
                .flags
                .update(&req.id, &req.flag.name, &req.flag.description, req.flag.enabled)
                .await?,
        ),
        RpcCall::DeleteFlag(req) => {
            services.flags.delete(&req.id).await?;
            Ok(json!({ "id": req.id }))
        }
        RpcCall::GetFlag(req) => to_body(services.flags.get(&req.id).await?),
        RpcCall::ListFlags => Ok(json!({ "flags": to_body(services.flags.list().await)? })),
        RpcCall::CreateUser(req) => {
            let actor = claims.map(|c| c.sub.as_str()).unwrap_or("unknown");
            to_body(
                services
                    .users
                    .create_user(actor, &req.email, &req.name, &req.roles)
                    .await?,
            )
        }
        RpcCall::UpdateUser(req) => to_body(
            services
                .users
                .update_user(&req.id, req.name.as_deref(), req.roles.as_deref())
                .await?,
        ),
        RpcCall::DeleteUser(req) => {
            services.users.delete_user(&req.id).await?;
            Ok(json!({ "id": req.id }))
        }
        RpcCall::GetUser(req) => to_body(services.users.get_user(&req.id).await?),
        RpcCall::ListUsers => Ok(json!({ "users": to_body(services.users.list_users().await?)? })),
    }
}
