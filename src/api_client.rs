//! Authenticated API client with bearer credentials and refresh-on-401

use crate::config::ClientConfig;
use crate::error::{parse_error_body, ApiError, ApiResult, ClientError, Result};
use crate::token_store::{
    CredentialStore, TokenStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEYS,
};
use crate::types::{ApiResponse, RefreshRequest, RefreshResponse};
use async_singleflight::Group;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::multipart::Form;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// A request is resent at most once, and only after a successful refresh
const MAX_AUTH_RETRIES: u8 = 1;

const REFRESH_PATH: &str = "auth/refresh";
const SESSION_EVENT_CAPACITY: usize = 16;

/// Per-call overrides merged over the client defaults
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers; these win over the client defaults
    pub headers: HeaderMap,
    /// Replaces the configured timeout for this call only
    pub timeout: Option<Duration>,
    pub query: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Session changes observable by the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh exchange stored a new access token
    TokenRefreshed,
    /// Refresh was impossible or denied; stored credentials were cleared
    SessionExpired,
}

struct Defaults {
    base_url: String,
    headers: HeaderMap,
}

enum Payload<'a> {
    Empty,
    Json(Vec<u8>),
    /// Forms are consumed on send, so a resend rebuilds from the factory
    Multipart(&'a (dyn Fn() -> Result<Form> + Send + Sync)),
}

struct OutgoingRequest<'a> {
    method: Method,
    path: &'a str,
    payload: Payload<'a>,
    options: &'a RequestOptions,
}

/// Where the Authorization header of an attempt comes from
enum Bearer {
    /// Read from the credential store right before sending; caller headers may override it
    Stored(Option<String>),
    /// Obtained by the refresh exchange; always attached to the resend
    Refreshed(String),
}

impl Bearer {
    fn token(&self) -> Option<&str> {
        match self {
            Self::Stored(token) => token.as_deref(),
            Self::Refreshed(token) => Some(token),
        }
    }
}

/// HTTP client for the driver API
///
/// Attaches the stored access token to every request, exchanges the refresh token once
/// when the server answers 401 and collapses every failure into [`ApiError`].
/// Construct one per application and share it by reference or `Arc`.
pub struct ApiClient<S: CredentialStore = TokenStore> {
    http_client: Client,
    store: S,
    defaults: RwLock<Defaults>,
    /// Singleflight group keyed by refresh token, so concurrent 401s share one exchange
    /// Error type is String because singleflight requires shared error type
    refresh_singleflight: Group<String, String>,
    events: broadcast::Sender<SessionEvent>,
}

impl<S: CredentialStore> ApiClient<S> {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `config` - Base URL, timeout ceiling and user agent
    /// * `store` - Credential store the access and refresh tokens are read from
    pub fn new(config: ClientConfig, store: S) -> Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.as_str());
        }
        let http_client = builder
            .build()
            .map_err(|e| ClientError::Configuration(format!("failed to build HTTP client: {e}")))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        Ok(Self {
            http_client,
            store,
            defaults: RwLock::new(Defaults {
                base_url: config.base_url,
                headers,
            }),
            refresh_singleflight: Group::new(),
            events,
        })
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> ApiResult<ApiResponse<T>> {
        self.execute(OutgoingRequest {
            method: Method::GET,
            path,
            payload: Payload::Empty,
            options,
        })
        .await
    }

    pub async fn post<T, B>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> ApiResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(OutgoingRequest {
            method: Method::POST,
            path,
            payload: json_payload(body)?,
            options,
        })
        .await
    }

    pub async fn put<T, B>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> ApiResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(OutgoingRequest {
            method: Method::PUT,
            path,
            payload: json_payload(body)?,
            options,
        })
        .await
    }

    pub async fn patch<T, B>(
        &self,
        path: &str,
        body: &B,
        options: &RequestOptions,
    ) -> ApiResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.execute(OutgoingRequest {
            method: Method::PATCH,
            path,
            payload: json_payload(body)?,
            options,
        })
        .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> ApiResult<ApiResponse<T>> {
        self.execute(OutgoingRequest {
            method: Method::DELETE,
            path,
            payload: Payload::Empty,
            options,
        })
        .await
    }

    /// POST a multipart form
    ///
    /// `build_form` is called once per attempt. Any `Content-Type` from the defaults or
    /// `options` is dropped so reqwest generates the multipart boundary itself.
    pub async fn upload<T, F>(
        &self,
        path: &str,
        build_form: F,
        options: &RequestOptions,
    ) -> ApiResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<Form> + Send + Sync,
    {
        self.execute(OutgoingRequest {
            method: Method::POST,
            path,
            payload: Payload::Multipart(&build_form),
            options,
        })
        .await
    }

    /// Attach a default bearer token to every request.
    ///
    /// A token found in the credential store still takes precedence.
    pub fn set_bearer_token(&self, token: &str) -> ApiResult<()> {
        let value = bearer_value(token)?;
        self.defaults.write().headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    pub fn clear_bearer_token(&self) {
        self.defaults.write().headers.remove(AUTHORIZATION);
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        info!(base_url = %base_url, "API base URL changed");
        self.defaults.write().base_url = base_url;
    }

    pub fn base_url(&self) -> String {
        self.defaults.read().base_url.clone()
    }

    /// Get the credential store (for advanced usage)
    pub fn credential_store(&self) -> &S {
        &self.store
    }

    /// Receive [`SessionEvent`]s, e.g. to route the user back to login
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Remove access token, refresh token and cached user from the store
    pub async fn clear_credentials(&self) -> Result<()> {
        self.store.multi_remove(&SESSION_KEYS).await
    }
}

impl<S: CredentialStore> ApiClient<S> {
    async fn execute<T: DeserializeOwned>(
        &self,
        req: OutgoingRequest<'_>,
    ) -> ApiResult<ApiResponse<T>> {
        self.execute_with_refresh(&req).await.map_err(|e| {
            let err = ApiError::from(e);
            debug!(
                method = %req.method,
                path = %req.path,
                status_code = err.status_code,
                error = %err.message,
                "Request failed"
            );
            err
        })
    }

    /// Send the request, refreshing the credential and resending once on 401
    async fn execute_with_refresh<T: DeserializeOwned>(
        &self,
        req: &OutgoingRequest<'_>,
    ) -> Result<ApiResponse<T>> {
        let mut attempt: u8 = 0;
        let mut bearer = Bearer::Stored(self.stored_access_token().await);

        loop {
            let request = self.build_request(req, &bearer)?;

            debug!(method = %req.method, path = %req.path, attempt, "Sending request");
            let response = request.send().await?;
            let status = response.status();
            debug!(method = %req.method, path = %req.path, attempt, %status, "Received response");

            if status.is_success() {
                return Ok(response.json::<ApiResponse<T>>().await?);
            }

            let error = error_from_response(response).await;

            if status != StatusCode::UNAUTHORIZED || attempt >= MAX_AUTH_RETRIES {
                return Err(error);
            }
            attempt += 1;

            let recovered = self.recover_session(bearer.token()).await;
            match recovered {
                Some(token) => bearer = Bearer::Refreshed(token),
                None => return Err(error),
            }
        }
    }

    fn build_request(&self, req: &OutgoingRequest<'_>, bearer: &Bearer) -> Result<RequestBuilder> {
        let (url, mut headers) = {
            let defaults = self.defaults.read();
            (join_url(&defaults.base_url, req.path), defaults.headers.clone())
        };

        if let Bearer::Stored(Some(token)) = bearer {
            headers.insert(AUTHORIZATION, bearer_value(token)?);
        }
        headers.extend(req.options.headers.clone());
        if let Bearer::Refreshed(token) = bearer {
            headers.insert(AUTHORIZATION, bearer_value(token)?);
        }

        let mut builder = self.http_client.request(req.method.clone(), url);
        if !req.options.query.is_empty() {
            builder = builder.query(&req.options.query);
        }
        if let Some(timeout) = req.options.timeout {
            builder = builder.timeout(timeout);
        }

        let builder = match &req.payload {
            Payload::Empty => builder.headers(headers),
            Payload::Json(body) => builder.headers(headers).body(body.clone()),
            Payload::Multipart(build_form) => {
                if req.options.headers.contains_key(CONTENT_TYPE) {
                    debug!(path = %req.path, "Ignoring caller Content-Type on multipart upload");
                }
                headers.remove(CONTENT_TYPE);
                builder.headers(headers).multipart(build_form()?)
            }
        };

        Ok(builder)
    }

    /// Read the access token, treating a store failure as "no token"
    async fn stored_access_token(&self) -> Option<String> {
        match self.store.get(ACCESS_TOKEN_KEY).await {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read access token, sending without credential");
                None
            }
        }
    }

    /// Obtain a token to resend with after a 401
    ///
    /// Returns `None` when the session cannot be recovered; stored credentials are cleared
    /// in that case.
    async fn recover_session(&self, rejected: Option<&str>) -> Option<String> {
        // Another request may have refreshed while this one was in flight
        if let Some(current) = self.stored_access_token().await {
            if rejected != Some(current.as_str()) {
                debug!("Access token changed since the request was sent, resending with it");
                return Some(current);
            }
        }

        let refresh_token = match self.store.get(REFRESH_TOKEN_KEY).await {
            Ok(Some(token)) if !token.is_empty() => token,
            Ok(_) => {
                info!("No refresh token stored, ending session");
                self.end_session().await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read refresh token, ending session");
                self.end_session().await;
                return None;
            }
        };

        match self.do_refresh_singleflight(&refresh_token).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Token refresh failed, ending session");
                self.end_session().await;
                None
            }
        }
    }

    async fn do_refresh_singleflight(&self, refresh_token: &str) -> Result<String> {
        let (success_opt, error_opt, _shared) = self
            .refresh_singleflight
            .work(refresh_token, async {
                self.do_refresh(refresh_token).await.map_err(|e| e.to_string())
            })
            .await;

        // Convert singleflight result to Result type
        match (success_opt, error_opt) {
            (Some(token), None) => Ok(token),
            (None, Some(err_str)) => Err(ClientError::Authentication(err_str)),
            _ => Err(ClientError::Authentication(
                "Unknown error during token refresh".to_string(),
            )),
        }
    }

    /// Exchange the refresh token for a new access token and persist it
    async fn do_refresh(&self, refresh_token: &str) -> Result<String> {
        let url = join_url(&self.defaults.read().base_url, REFRESH_PATH);

        let response = self
            .http_client
            .post(&url)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::Authentication(format!(
                "Token refresh failed with status {status}: {text}"
            )));
        }

        let tokens = response.json::<RefreshResponse>().await?.into_tokens();

        self.store
            .set(ACCESS_TOKEN_KEY, tokens.access_token.clone())
            .await?;
        if let Some(rotated) = tokens.refresh_token {
            self.store.set(REFRESH_TOKEN_KEY, rotated).await?;
        }

        info!("Access token refreshed successfully");
        let _ = self.events.send(SessionEvent::TokenRefreshed);

        Ok(tokens.access_token)
    }

    async fn end_session(&self) {
        if let Err(e) = self.clear_credentials().await {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        let _ = self.events.send(SessionEvent::SessionExpired);
    }
}

fn json_payload<B: Serialize + ?Sized>(body: &B) -> ApiResult<Payload<'static>> {
    serde_json::to_vec(body)
        .map(Payload::Json)
        .map_err(|e| ClientError::from(e).into())
}

fn bearer_value(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ClientError::InvalidHeader(format!("invalid bearer token: {e}")))?;
    value.set_sensitive(true);
    Ok(value)
}

/// Join a request path onto the base URL; absolute URLs are used as-is
fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let (message, field_errors) = parse_error_body(&body);

    ClientError::Api {
        status,
        message,
        field_errors,
    }
}
