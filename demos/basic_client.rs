//! Basic client example
//!
//! Usage:
//!   DRIVER_EMAIL=driver@example.com DRIVER_PASSWORD=secret cargo run --example basic_client

use driver_api_client::{ApiClient, AuthSession, ClientConfig, RequestOptions, TokenStore};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Configuration (DRIVER_API_ENV, DRIVER_API_BASE_URL, DRIVER_API_TIMEOUT_MS)
    let config = ClientConfig::from_env()?;
    let email = std::env::var("DRIVER_EMAIL").unwrap_or_else(|_| "driver@example.com".to_string());
    let password = std::env::var("DRIVER_PASSWORD").unwrap_or_else(|_| "password".to_string());

    println!("=== Driver API Client Example ===");
    println!("Base URL: {}", config.base_url);
    println!();

    let client = ApiClient::new(config, TokenStore::new())?;
    let mut events = client.subscribe();
    let session = AuthSession::new(client);

    let payload = session.login(&email, &password).await?;
    println!("✓ Logged in as {}", payload.user);
    println!();

    // Token refresh happens transparently if the access token expires
    let options = RequestOptions::new().query("page", 1).query("limit", 10);
    match session
        .client()
        .get::<Vec<serde_json::Value>>("tasks", &options)
        .await
    {
        Ok(response) => {
            println!("✓ Fetched {} tasks", response.data.len());
            if let Some(pagination) = response.pagination {
                println!("  Page {} of {}", pagination.page, pagination.total_pages);
            }
        }
        Err(e) => println!("! Failed to fetch tasks: {} (status {})", e.message, e.status_code),
    }
    println!();

    while let Ok(event) = events.try_recv() {
        println!("Session event: {event:?}");
    }

    session.logout().await?;
    println!("✓ Logged out");

    Ok(())
}
