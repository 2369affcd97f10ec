//! Typed messages for the RPC transport
//!
//! Every WebSocket text frame carries one [`RpcRequest`] envelope. The method
//! name selects the payload type, decoded into an [`RpcCall`]. Replies are
//! [`RpcResponse`] envelopes correlated by `id`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ErrorClass, FlagGateError};

/// Fully qualified RPC method names
pub mod methods {
    pub const LOGIN: &str = "/AuthService/Login";
    pub const REFRESH: &str = "/AuthService/Refresh";
    pub const ACTIVATE: &str = "/AuthService/Activate";

    pub const CREATE_FLAG: &str = "/FlagService/CreateFlag";
    pub const UPDATE_FLAG: &str = "/FlagService/UpdateFlag";
    pub const DELETE_FLAG: &str = "/FlagService/DeleteFlag";
    pub const GET_FLAG: &str = "/FlagService/GetFlag";
    pub const LIST_FLAGS: &str = "/FlagService/ListFlags";

    pub const CREATE_USER: &str = "/RbacUserService/CreateUser";
    pub const UPDATE_USER: &str = "/RbacUserService/UpdateUser";
    pub const DELETE_USER: &str = "/RbacUserService/DeleteUser";
    pub const GET_USER: &str = "/RbacUserService/GetUser";
    pub const LIST_USERS: &str = "/RbacUserService/ListUsers";

    pub const RBAC_USER_METHODS: [&str; 5] =
        [CREATE_USER, UPDATE_USER, DELETE_USER, GET_USER, LIST_USERS];
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub email: String,
    /// Temporary password issued at provisioning
    pub password: String,
    pub new_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateFlagRequest {
    pub id: String,
    #[serde(flatten)]
    pub flag: FlagRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdRequest {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub id: String,
    pub name: Option<String>,
    pub roles: Option<Vec<String>>,
}

/// A decoded RPC invocation
#[derive(Debug, Clone)]
pub enum RpcCall {
    Login(LoginRequest),
    Refresh(RefreshRequest),
    Activate(ActivateRequest),
    CreateFlag(FlagRequest),
    UpdateFlag(UpdateFlagRequest),
    DeleteFlag(IdRequest),
    GetFlag(IdRequest),
    ListFlags,
    CreateUser(CreateUserRequest),
    UpdateUser(UpdateUserRequest),
    DeleteUser(IdRequest),
    GetUser(IdRequest),
    ListUsers,
}

fn payload<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError {
        status: RpcStatus::InvalidArgument,
        message: format!("invalid payload for {}: {}", method, e),
    })
}

impl RpcCall {
    /// Decodes `payload` into the message type of `method`
    pub fn decode(method: &str, value: Value) -> Result<Self, RpcError> {
        let call = match method {
            methods::LOGIN => RpcCall::Login(payload(method, value)?),
            methods::REFRESH => RpcCall::Refresh(payload(method, value)?),
            methods::ACTIVATE => RpcCall::Activate(payload(method, value)?),
            methods::CREATE_FLAG => RpcCall::CreateFlag(payload(method, value)?),
            methods::UPDATE_FLAG => RpcCall::UpdateFlag(payload(method, value)?),
            methods::DELETE_FLAG => RpcCall::DeleteFlag(payload(method, value)?),
            methods::GET_FLAG => RpcCall::GetFlag(payload(method, value)?),
            methods::LIST_FLAGS => RpcCall::ListFlags,
            methods::CREATE_USER => RpcCall::CreateUser(payload(method, value)?),
            methods::UPDATE_USER => RpcCall::UpdateUser(payload(method, value)?),
            methods::DELETE_USER => RpcCall::DeleteUser(payload(method, value)?),
            methods::GET_USER => RpcCall::GetUser(payload(method, value)?),
            methods::LIST_USERS => RpcCall::ListUsers,
            other => {
                return Err(RpcError {
                    status: RpcStatus::Unimplemented,
                    message: format!("unknown method {}", other),
                })
            }
        };
        Ok(call)
    }
}

/// Client-to-server envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id echoed in the response
    pub id: String,
    pub method: String,
    /// Call metadata; bearer tokens travel under `authorization`
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub payload: Value,
}

impl RpcRequest {
    pub fn new(method: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.to_string(),
            metadata: HashMap::new(),
            payload,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }
}

/// Status codes carried in responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcStatus {
    Ok,
    InvalidArgument,
    Unauthenticated,
    PermissionDenied,
    NotFound,
    DeadlineExceeded,
    Unavailable,
    Unimplemented,
    Internal,
}

impl From<ErrorClass> for RpcStatus {
    fn from(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Validation => RpcStatus::InvalidArgument,
            ErrorClass::Unauthenticated => RpcStatus::Unauthenticated,
            ErrorClass::Forbidden => RpcStatus::PermissionDenied,
            ErrorClass::NotFound => RpcStatus::NotFound,
            ErrorClass::Timeout => RpcStatus::DeadlineExceeded,
            ErrorClass::Unavailable => RpcStatus::Unavailable,
            ErrorClass::Internal => RpcStatus::Internal,
        }
    }
}

/// Error half of a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub status: RpcStatus,
    pub message: String,
}

impl From<&FlagGateError> for RpcError {
    fn from(err: &FlagGateError) -> Self {
        Self {
            status: err.class().into(),
            message: err.public_message(),
        }
    }
}

/// Server-to-client envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: String,
    pub status: RpcStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            status: RpcStatus::Ok,
            body: Some(body),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, err: RpcError) -> Self {
        Self {
            id: id.into(),
            status: err.status,
            body: None,
            error: Some(err.message),
        }
    }
}
