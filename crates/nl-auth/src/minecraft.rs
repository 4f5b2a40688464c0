use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::config::{AuthConfig, OWNERSHIP_ITEMS};
use crate::errors::{AuthError, Result};
use crate::http::{build_client, read_json};
use crate::models::*;

/// Client for the Minecraft services API
#[derive(Debug, Clone)]
pub struct MinecraftClient {
    config: AuthConfig,
    http: Client,
}

impl MinecraftClient {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = build_client(&config)?;
        Ok(Self::with_http(config, http))
    }

    pub(crate) fn with_http(config: AuthConfig, http: Client) -> Self {
        Self { config, http }
    }

    /// Login to Minecraft with an XSTS token and its user hash
    #[instrument(skip(self, xsts_token, user_hash))]
    pub async fn login(&self, user_hash: &str, xsts_token: &str) -> Result<McLoginResponse> {
        let request = McLoginRequest {
            identity_token: identity_token(user_hash, xsts_token),
        };

        debug!("Logging in to Minecraft Services");
        let response = self
            .http
            .post(&self.config.endpoints.mc_login)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        read_json(response).await
    }

    /// Check the entitlements list for a Java Edition licence.
    ///
    /// A successful response without a recognised item is `OwnershipDenied`,
    /// not an HTTP failure.
    #[instrument(skip(self, mc_access_token))]
    pub async fn check_ownership(&self, mc_access_token: &str) -> Result<()> {
        debug!("Checking game entitlements");
        let response = self
            .http
            .get(&self.config.endpoints.mc_entitlements)
            .bearer_auth(mc_access_token)
            .send()
            .await?;

        let entitlements: EntitlementsResponse = read_json(response).await?;
        if owns_game(&entitlements) {
            Ok(())
        } else {
            Err(AuthError::OwnershipDenied)
        }
    }

    /// Fetch Minecraft profile
    #[instrument(skip(self, mc_access_token))]
    pub async fn fetch_profile(&self, mc_access_token: &str) -> Result<McProfile> {
        debug!("Fetching Minecraft profile");
        let response = self
            .http
            .get(&self.config.endpoints.mc_profile)
            .bearer_auth(mc_access_token)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::ProfileNotFound { body });
        }

        read_json(response).await
    }
}

fn identity_token(user_hash: &str, xsts_token: &str) -> String {
    format!("XBL3.0 x={};{}", user_hash, xsts_token)
}

fn owns_game(entitlements: &EntitlementsResponse) -> bool {
    entitlements
        .items
        .iter()
        .any(|item| OWNERSHIP_ITEMS.contains(&item.name.as_str()))
}
