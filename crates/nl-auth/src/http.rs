use reqwest::{Client, Response};
use serde::de::DeserializeOwned;

use crate::config::AuthConfig;
use crate::errors::{AuthError, Result};

/// Build the HTTP client every stage shares; each request carries the 10s cap
pub(crate) fn build_client(config: &AuthConfig) -> Result<Client> {
    let http = Client::builder()
        .connect_timeout(config.http_timeouts.connect)
        .timeout(config.http_timeouts.request)
        .user_agent(config.user_agent.as_deref().unwrap_or("nix-launcher"))
        .build()?;
    Ok(http)
}

/// Turn a non-2xx response into `AuthError::Http`, keeping the body text
pub(crate) async fn http_error(response: Response) -> AuthError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    AuthError::Http { status, body }
}

/// Require a 2xx status and decode the body as JSON
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(http_error(response).await);
    }
    decode_body(response).await
}

/// Decode the body as JSON without looking at the status
pub(crate) async fn decode_body<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}
