use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::config::{AuthConfig, RP_MINECRAFT, RP_XBOXLIVE_AUTH, SANDBOX_RETAIL};
use crate::errors::{AuthError, Result, XstsError};
use crate::http::{build_client, http_error, read_json};
use crate::models::*;

/// Delegation token issued by Xbox Live or XSTS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationToken {
    pub token: String,
    pub user_hashes: Vec<String>,
    pub not_after: Option<String>,
}

impl DelegationToken {
    fn from_response(response: XboxTokenResponse) -> Self {
        Self {
            token: response.token,
            user_hashes: response
                .display_claims
                .xui
                .into_iter()
                .map(|claim| claim.uhs)
                .collect(),
            not_after: response.not_after,
        }
    }

    /// User hash of the first claim; an empty claim list breaks the chain
    pub fn user_hash(&self) -> Result<&str> {
        self.user_hashes
            .first()
            .map(String::as_str)
            .ok_or(AuthError::EmptyClaims)
    }
}

/// Client for Xbox Live user authentication and XSTS authorization
#[derive(Debug, Clone)]
pub struct XboxClient {
    config: AuthConfig,
    http: Client,
}

impl XboxClient {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = build_client(&config)?;
        Ok(Self::with_http(config, http))
    }

    pub(crate) fn with_http(config: AuthConfig, http: Client) -> Self {
        Self { config, http }
    }

    /// Exchange a Microsoft access token for an Xbox Live user token
    #[instrument(skip(self, ms_access_token))]
    pub async fn authenticate(&self, ms_access_token: &str) -> Result<DelegationToken> {
        let request = XblAuthRequest {
            properties: XblAuthProperties {
                auth_method: "RPS".to_string(),
                site_name: "user.auth.xboxlive.com".to_string(),
                rps_ticket: rps_ticket(ms_access_token),
            },
            relying_party: RP_XBOXLIVE_AUTH.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authenticating with Xbox Live");
        let response = self
            .http
            .post(&self.config.endpoints.xbl_authenticate)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        let xbl: XboxTokenResponse = read_json(response).await?;
        Ok(DelegationToken::from_response(xbl))
    }

    /// Exchange an Xbox Live token for an XSTS token scoped to Minecraft services
    #[instrument(skip(self, xbl_token))]
    pub async fn authorize(&self, xbl_token: &str) -> Result<DelegationToken> {
        let request = XstsAuthRequest {
            properties: XstsAuthProperties {
                sandbox_id: SANDBOX_RETAIL.to_string(),
                user_tokens: vec![xbl_token.to_string()],
            },
            relying_party: RP_MINECRAFT.to_string(),
            token_type: "JWT".to_string(),
        };

        debug!("Authorizing with XSTS");
        let response = self
            .http
            .post(&self.config.endpoints.xsts_authorize)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<XstsErrorResponse>(&body) {
                Ok(denied) => XstsError::from_xerr(denied.xerr).into(),
                Err(_) => AuthError::Http { status, body },
            });
        }
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }

        let xsts: XboxTokenResponse = read_json(response).await?;
        Ok(DelegationToken::from_response(xsts))
    }
}

/// The RPS ticket is the access token behind a fixed `d=` prefix
fn rps_ticket(ms_access_token: &str) -> String {
    format!("d={}", ms_access_token)
}
