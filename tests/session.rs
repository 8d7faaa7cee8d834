use driver_api_client::token_store::{
    ACCESS_TOKEN_KEY, DEVICE_ID_KEY, REFRESH_TOKEN_KEY, USER_KEY,
};
use driver_api_client::{ApiClient, AuthSession, ClientConfig, CredentialStore, TokenStore};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn session_for(server: &MockServer, store: TokenStore) -> AuthSession {
    let client = ApiClient::new(
        ClientConfig::with_base_url(format!("{}/api", server.uri())),
        store,
    )
    .unwrap();
    AuthSession::new(client)
}

#[tokio::test]
async fn login_persists_tokens_and_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .and(body_json(json!({
            "email": "sam@example.com",
            "password": "hunter2",
            "deviceId": "device-9"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Welcome back",
            "data": {
                "accessToken": "a1",
                "refreshToken": "r1",
                "user": {"id": 3, "name": "Sam"}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let store = TokenStore::new();
    store
        .set(DEVICE_ID_KEY, "device-9".to_string())
        .await
        .unwrap();
    let session = session_for(&server, store.clone());

    let payload = session.login("sam@example.com", "hunter2").await.unwrap();

    assert_eq!(payload.credential().access_token, "a1");
    assert_eq!(store.get(ACCESS_TOKEN_KEY).await.unwrap().as_deref(), Some("a1"));
    assert_eq!(store.get(REFRESH_TOKEN_KEY).await.unwrap().as_deref(), Some("r1"));
    assert!(session.is_authenticated().await);
    assert_eq!(
        session.cached_user().await,
        Some(json!({"id": 3, "name": "Sam"}))
    );
}

#[tokio::test]
async fn login_failure_stores_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"message": "Invalid credentials"})),
        )
        .mount(&server)
        .await;

    let store = TokenStore::new();
    let session = session_for(&server, store.clone());

    let err = session.login("sam@example.com", "wrong").await.unwrap_err();

    assert_eq!(err.status_code, 400);
    assert_eq!(err.message, "Invalid credentials");
    assert!(store.keys().is_empty());
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn logout_notifies_server_and_clears_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .and(header("authorization", "Bearer a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let store = TokenStore::new();
    for (key, value) in [
        (ACCESS_TOKEN_KEY, "a1"),
        (REFRESH_TOKEN_KEY, "r1"),
        (USER_KEY, r#"{"id":3}"#),
        (DEVICE_ID_KEY, "device-9"),
    ] {
        store.set(key, value.to_string()).await.unwrap();
    }
    let session = session_for(&server, store.clone());

    session.logout().await.unwrap();

    assert_eq!(store.keys(), vec![DEVICE_ID_KEY.to_string()]);
    assert!(session.cached_user().await.is_none());
}

#[tokio::test]
async fn logout_clears_credentials_when_server_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let store = TokenStore::new();
    store.set(ACCESS_TOKEN_KEY, "a1".to_string()).await.unwrap();
    store.set(REFRESH_TOKEN_KEY, "r1".to_string()).await.unwrap();
    let session = session_for(&server, store.clone());

    session.logout().await.unwrap();

    assert!(store.keys().is_empty());
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn unreadable_cached_user_is_ignored() {
    let server = MockServer::start().await;
    let store = TokenStore::new();
    store.set(USER_KEY, "{not json".to_string()).await.unwrap();
    let session = session_for(&server, store);

    assert!(session.cached_user().await.is_none());
}
