//! JSON-over-HTTP transport
//!
//! Every route passes through [`with_access`] before its handler runs, and
//! request bodies are only parsed once the caller has been let through.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use super::with_services;
use crate::auth::token::Claims;
use crate::authz::{routes as keys, Transport};
use crate::constants::{API_PREFIX, API_VERSION};
use crate::error::{AuthFailure, ErrorClass, FlagGateError, Result};
use crate::rpc::messages::{
    ActivateRequest, CreateUserRequest, FlagRequest, LoginRequest, RefreshRequest,
    UpdateUserRequest,
};
use crate::services::AppServices;

const MAX_BODY_BYTES: u64 = 64 * 1024;

/// Outcome of the enforcement gate for one request
pub type Access = std::result::Result<Option<Claims>, FlagGateError>;

/// Maps an error to its HTTP status and a body that reveals only its class
pub fn error_reply(err: &FlagGateError) -> Response {
    let status = match err.class() {
        ErrorClass::Validation => StatusCode::BAD_REQUEST,
        ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden => StatusCode::FORBIDDEN,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorClass::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        log::error!("Request failed: {}", err);
    }
    warp::reply::with_status(
        warp::reply::json(&json!({ "error": err.public_message() })),
        status,
    )
    .into_response()
}

fn reply<T: Serialize>(result: Result<T>, status: StatusCode) -> Response {
    match result {
        Ok(body) => warp::reply::with_status(warp::reply::json(&body), status).into_response(),
        Err(err) => error_reply(&err),
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| FlagGateError::Validation(format!("invalid request body: {}", e)))
}

fn caller(claims: Option<Claims>) -> Result<Claims> {
    claims.ok_or_else(|| AuthFailure::MissingToken.into())
}

/// Runs the enforcement gate for `key` and hands its outcome to the handler
pub fn with_access(
    services: Arc<AppServices>,
    key: &'static str,
) -> impl Filter<Extract = (Arc<AppServices>, Access), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(with_services(services))
        .then(move |header: Option<String>, services: Arc<AppServices>| async move {
            let access = services
                .enforcer
                .authorize(Transport::Http, key, header.as_deref())
                .await;
            (services, access)
        })
        .untuple_one()
}

fn json_body() -> impl Filter<Extract = (Bytes,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::bytes())
}

/// All HTTP routes, plus `/health`. Unmatched requests are rejected.
pub fn routes(
    services: Arc<AppServices>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let api = || warp::path(API_PREFIX).and(warp::path(API_VERSION));
    let s = || services.clone();

    let login = api()
        .and(warp::path!("auth" / "login"))
        .and(warp::post())
        .and(with_access(s(), keys::AUTH_LOGIN))
        .and(json_body())
        .then(login);
    let refresh = api()
        .and(warp::path!("auth" / "refresh"))
        .and(warp::post())
        .and(with_access(s(), keys::AUTH_REFRESH))
        .and(json_body())
        .then(refresh);
    let activate = api()
        .and(warp::path!("auth" / "activate"))
        .and(warp::post())
        .and(with_access(s(), keys::AUTH_ACTIVATE))
        .and(json_body())
        .then(activate);

    let me = api()
        .and(warp::path!("me"))
        .and(warp::get())
        .and(with_access(s(), keys::ME))
        .then(me);
    let me_roles = api()
        .and(warp::path!("me" / "roles"))
        .and(warp::get())
        .and(with_access(s(), keys::ME_ROLES))
        .then(me_roles);

    let list_users = api()
        .and(warp::path!("users"))
        .and(warp::get())
        .and(with_access(s(), keys::LIST_USERS))
        .then(list_users);
    let create_user = api()
        .and(warp::path!("users"))
        .and(warp::post())
        .and(with_access(s(), keys::CREATE_USER))
        .and(json_body())
        .then(create_user);
    let get_user = api()
        .and(warp::path!("users" / String))
        .and(warp::get())
        .and(with_access(s(), keys::GET_USER))
        .then(get_user);
    let update_user = api()
        .and(warp::path!("users" / String))
        .and(warp::put())
        .and(with_access(s(), keys::UPDATE_USER))
        .and(json_body())
        .then(update_user);
    let delete_user = api()
        .and(warp::path!("users" / String))
        .and(warp::delete())
        .and(with_access(s(), keys::DELETE_USER))
        .then(delete_user);

    let list_flags = api()
        .and(warp::path!("flags"))
        .and(warp::get())
        .and(with_access(s(), keys::LIST_FLAGS))
        .then(list_flags);
    let create_flag = api()
        .and(warp::path!("flags"))
        .and(warp::post())
        .and(with_access(s(), keys::CREATE_FLAG))
        .and(json_body())
        .then(create_flag);
    let get_flag = api()
        .and(warp::path!("flags" / String))
        .and(warp::get())
        .and(with_access(s(), keys::GET_FLAG))
        .then(get_flag);
    let update_flag = api()
        .and(warp::path!("flags" / String))
        .and(warp::put())
        .and(with_access(s(), keys::UPDATE_FLAG))
        .and(json_body())
        .then(update_flag);
    let delete_flag = api()
        .and(warp::path!("flags" / String))
        .and(warp::delete())
        .and(with_access(s(), keys::DELETE_FLAG))
        .then(delete_flag);

    let health = warp::path!("health").and(warp::get()).map(|| "OK");

    login
        .or(refresh)
        .or(activate)
        .or(me)
        .or(me_roles)
        .or(list_users)
        .or(create_user)
        .or(get_user)
        .or(update_user)
        .or(delete_user)
        .or(list_flags)
        .or(create_flag)
        .or(get_flag)
        .or(update_flag)
        .or(delete_flag)
        .or(health)
}

/// Unmatched requests get JSON errors like everything else
pub async fn handle_rejection(rejection: Rejection) -> std::result::Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
    } else {
        (StatusCode::BAD_REQUEST, "invalid request")
    };
    Ok(warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status).into_response())
}

async fn login(services: Arc<AppServices>, access: Access, body: Bytes) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = match parse_body::<LoginRequest>(&body) {
        Ok(req) => services.lifecycle.login(&req.email, &req.password).await,
        Err(err) => Err(err),
    };
    reply(result, StatusCode::OK)
}

async fn refresh(services: Arc<AppServices>, access: Access, body: Bytes) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = match parse_body::<RefreshRequest>(&body) {
        Ok(req) => services.lifecycle.refresh(&req.refresh_token).await,
        Err(err) => Err(err),
    };
    reply(result, StatusCode::OK)
}

async fn activate(services: Arc<AppServices>, access: Access, body: Bytes) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = match parse_body::<ActivateRequest>(&body) {
        Ok(req) => {
            services
                .lifecycle
                .activate(&req.email, &req.password, &req.new_password)
                .await
        }
        Err(err) => Err(err),
    };
    reply(result, StatusCode::OK)
}

async fn me(services: Arc<AppServices>, access: Access) -> Response {
    let claims = match access.and_then(caller) {
        Ok(claims) => claims,
        Err(err) => return error_reply(&err),
    };
    reply(services.users.me(&claims).await, StatusCode::OK)
}

async fn me_roles(services: Arc<AppServices>, access: Access) -> Response {
    let claims = match access.and_then(caller) {
        Ok(claims) => claims,
        Err(err) => return error_reply(&err),
    };
    reply(services.users.me_roles(&claims).await, StatusCode::OK)
}

async fn list_users(services: Arc<AppServices>, access: Access) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = services
        .users
        .list_users()
        .await
        .map(|users| json!({ "users": users }));
    reply(result, StatusCode::OK)
}

async fn create_user(services: Arc<AppServices>, access: Access, body: Bytes) -> Response {
    let claims = match access.and_then(caller) {
        Ok(claims) => claims,
        Err(err) => return error_reply(&err),
    };
    let result = match parse_body::<CreateUserRequest>(&body) {
        Ok(req) => {
            services
                .users
                .create_user(&claims.sub, &req.email, &req.name, &req.roles)
                .await
        }
        Err(err) => Err(err),
    };
    reply(result, StatusCode::CREATED)
}

async fn get_user(id: String, services: Arc<AppServices>, access: Access) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    reply(services.users.get_user(&id).await, StatusCode::OK)
}

async fn update_user(
    id: String,
    services: Arc<AppServices>,
    access: Access,
    body: Bytes,
) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = match parse_body::<UpdateUserRequest>(&body) {
        Ok(req) => {
            services
                .users
                .update_user(&id, req.name.as_deref(), req.roles.as_deref())
                .await
        }
        Err(err) => Err(err),
    };
    reply(result, StatusCode::OK)
}

async fn delete_user(id: String, services: Arc<AppServices>, access: Access) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    match services.users.delete_user(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_reply(&err),
    }
}

async fn list_flags(services: Arc<AppServices>, access: Access) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let flags = services.flags.list().await;
    reply(Ok(json!({ "flags": flags })), StatusCode::OK)
}

async fn create_flag(services: Arc<AppServices>, access: Access, body: Bytes) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = match parse_body::<FlagRequest>(&body) {
        Ok(req) => {
            services
                .flags
                .create(&req.name, &req.description, req.enabled)
                .await
        }
        Err(err) => Err(err),
    };
    reply(result, StatusCode::CREATED)
}

async fn get_flag(id: String, services: Arc<AppServices>, access: Access) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    reply(services.flags.get(&id).await, StatusCode::OK)
}

async fn update_flag(
    id: String,
    services: Arc<AppServices>,
    access: Access,
    body: Bytes,
) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    let result = match parse_body::<FlagRequest>(&body) {
        Ok(req) => {
            services
                .flags
                .update(&id, &req.name, &req.description, req.enabled)
                .await
        }
        Err(err) => Err(err),
    };
    reply(result, StatusCode::OK)
}

async fn delete_flag(id: String, services: Arc<AppServices>, access: Access) -> Response {
    if let Err(err) = access {
        return error_reply(&err);
    }
    match services.flags.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_reply(&err),
    }
}
