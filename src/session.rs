//! Login and logout on top of the API client

use crate::api_client::{ApiClient, RequestOptions};
use crate::error::{ApiResult, ClientError};
use crate::token_store::{
    CredentialStore, TokenStore, ACCESS_TOKEN_KEY, DEVICE_ID_KEY, REFRESH_TOKEN_KEY, USER_KEY,
};
use crate::types::{AuthPayload, LoginRequest};
use tracing::{info, warn};

const LOGIN_PATH: &str = "auth/login";
const LOGOUT_PATH: &str = "auth/logout";

/// Driver session backed by the credential store of its [`ApiClient`]
pub struct AuthSession<S: CredentialStore = TokenStore> {
    client: ApiClient<S>,
}

impl<S: CredentialStore> AuthSession<S> {
    pub fn new(client: ApiClient<S>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient<S> {
        &self.client
    }

    /// Authenticate and persist the returned tokens and driver profile
    ///
    /// The device identifier is sent along when one is stored.
    pub async fn login(&self, email: &str, password: &str) -> ApiResult<AuthPayload> {
        let store = self.client.credential_store();
        let device_id = match store.get(DEVICE_ID_KEY).await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Failed to read device id, logging in without it");
                None
            }
        };

        let request = LoginRequest {
            email,
            password,
            device_id,
        };
        let response = self
            .client
            .post::<AuthPayload, _>(LOGIN_PATH, &request, &RequestOptions::new())
            .await?;
        let payload = response.data;

        store
            .set(ACCESS_TOKEN_KEY, payload.access_token.clone())
            .await?;
        store
            .set(REFRESH_TOKEN_KEY, payload.refresh_token.clone())
            .await?;
        store
            .set(USER_KEY, serde_json::to_string(&payload.user).map_err(ClientError::from)?)
            .await?;

        info!("Driver logged in");
        Ok(payload)
    }

    /// End the session
    ///
    /// The server is notified on a best-effort basis; its failure is logged and ignored.
    /// Local credentials are always cleared.
    pub async fn logout(&self) -> ApiResult<()> {
        if let Err(e) = self
            .client
            .post::<Option<serde_json::Value>, _>(
                LOGOUT_PATH,
                &serde_json::json!({}),
                &RequestOptions::new(),
            )
            .await
        {
            warn!(
                status_code = e.status_code,
                error = %e.message,
                "Remote logout failed, clearing local session anyway"
            );
        }

        self.client.clear_credentials().await?;
        info!("Driver logged out");
        Ok(())
    }

    /// Cached driver profile, if a user record is stored and parses
    pub async fn cached_user(&self) -> Option<serde_json::Value> {
        let raw = self
            .client
            .credential_store()
            .get(USER_KEY)
            .await
            .ok()
            .flatten()?;

        match serde_json::from_str(&raw) {
            Ok(user) => Some(user),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable cached user record");
                None
            }
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        matches!(
            self.client.credential_store().get(ACCESS_TOKEN_KEY).await,
            Ok(Some(token)) if !token.is_empty()
        )
    }
}
