//! HTTP client for the flaggate API

use log::debug;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::auth::TokenPair;
use crate::constants::{API_PREFIX, API_VERSION};
use crate::error::{AuthFailure, FlagGateError, Result, StoreError};
use crate::flags::Flag;
use crate::rpc::messages::{
    ActivateRequest, CreateUserRequest, FlagRequest, LoginRequest, RefreshRequest,
    UpdateUserRequest,
};
use crate::users::{ProvisionedUser, RolesView, UserView};

#[derive(Debug, Deserialize)]
struct FlagList {
    flags: Vec<Flag>,
}

#[derive(Debug, Deserialize)]
struct UserList {
    users: Vec<UserView>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Thin typed wrapper over the JSON API
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| FlagGateError::Config(format!("invalid server url {}: {}", base_url, e)))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("featurectl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| FlagGateError::Config(format!("server url {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend([API_PREFIX, API_VERSION])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str], token: Option<&str>) -> Result<RequestBuilder> {
        let url = self.endpoint(segments)?;
        debug!("{} {}", method, url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T> {
        let response = check(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(builder: RequestBuilder, body: &B) -> Result<T> {
        Self::send(builder.json(body)).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenPair> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        Self::send_json(self.request(Method::POST, &["auth", "login"], None)?, &body).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        Self::send_json(self.request(Method::POST, &["auth", "refresh"], None)?, &body).await
    }

    pub async fn activate(&self, email: &str, password: &str, new_password: &str) -> Result<TokenPair> {
        let body = ActivateRequest {
            email: email.to_string(),
            password: password.to_string(),
            new_password: new_password.to_string(),
        };
        Self::send_json(self.request(Method::POST, &["auth", "activate"], None)?, &body).await
    }

    pub async fn me(&self, token: &str) -> Result<UserView> {
        Self::send(self.request(Method::GET, &["me"], Some(token))?).await
    }

    pub async fn me_roles(&self, token: &str) -> Result<RolesView> {
        Self::send(self.request(Method::GET, &["me", "roles"], Some(token))?).await
    }

    pub async fn list_flags(&self, token: &str) -> Result<Vec<Flag>> {
        let list: FlagList = Self::send(self.request(Method::GET, &["flags"], Some(token))?).await?;
        Ok(list.flags)
    }

    pub async fn get_flag(&self, token: &str, id: &str) -> Result<Flag> {
        Self::send(self.request(Method::GET, &["flags", id], Some(token))?).await
    }

    pub async fn create_flag(&self, token: &str, flag: &FlagRequest) -> Result<Flag> {
        Self::send_json(self.request(Method::POST, &["flags"], Some(token))?, flag).await
    }

    pub async fn update_flag(&self, token: &str, id: &str, flag: &FlagRequest) -> Result<Flag> {
        Self::send_json(self.request(Method::PUT, &["flags", id], Some(token))?, flag).await
    }

    pub async fn delete_flag(&self, token: &str, id: &str) -> Result<()> {
        let builder = self.request(Method::DELETE, &["flags", id], Some(token))?;
        check(builder.send().await?).await?;
        Ok(())
    }

    pub async fn list_users(&self, token: &str) -> Result<Vec<UserView>> {
        let list: UserList = Self::send(self.request(Method::GET, &["users"], Some(token))?).await?;
        Ok(list.users)
    }

    pub async fn get_user(&self, token: &str, id: &str) -> Result<UserView> {
        Self::send(self.request(Method::GET, &["users", id], Some(token))?).await
    }

    /// Provisions a user; the response carries the one-time temporary password
    pub async fn create_user(&self, token: &str, user: &CreateUserRequest) -> Result<ProvisionedUser> {
        Self::send_json(self.request(Method::POST, &["users"], Some(token))?, user).await
    }

    pub async fn update_user(&self, token: &str, id: &str, update: &UpdateUserRequest) -> Result<UserView> {
        Self::send_json(self.request(Method::PUT, &["users", id], Some(token))?, update).await
    }

    pub async fn delete_user(&self, token: &str, id: &str) -> Result<()> {
        let builder = self.request(Method::DELETE, &["users", id], Some(token))?;
        check(builder.send().await?).await?;
        Ok(())
    }
}

/// Turns a non-success response into the matching error class
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Option<Value> = response.json().await.ok();
    let message = body
        .and_then(|v| serde_json::from_value::<ErrorBody>(v).ok())
        .map(|b| b.error)
        .unwrap_or_else(|| status.to_string());

    Err(match status {
        StatusCode::BAD_REQUEST => FlagGateError::Validation(message),
        StatusCode::UNAUTHORIZED => AuthFailure::InvalidCredential.into(),
        StatusCode::FORBIDDEN => FlagGateError::Authorization(message),
        StatusCode::NOT_FOUND => FlagGateError::NotFound(message),
        StatusCode::GATEWAY_TIMEOUT => StoreError::Timeout.into(),
        StatusCode::SERVICE_UNAVAILABLE => StoreError::Unavailable(message).into(),
        _ => FlagGateError::Transport(format!("server returned {}: {}", status, message)),
    })
}
