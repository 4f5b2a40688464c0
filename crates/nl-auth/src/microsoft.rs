use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::config::AuthConfig;
use crate::device::{DeviceCodeSession, DevicePoll, DeviceTokenSource};
use crate::errors::{AuthError, Result};
use crate::http::{build_client, decode_body, read_json};
use crate::models::{DeviceCodeResponse, MsTokenResponse, OAuthErrorResponse};
use crate::pkce::Pkce;

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Client for the Microsoft identity platform (first-party tokens)
#[derive(Debug, Clone)]
pub struct MicrosoftClient {
    config: AuthConfig,
    http: Client,
}

impl MicrosoftClient {
    pub fn new(config: AuthConfig) -> Result<Self> {
        let http = build_client(&config)?;
        Ok(Self::with_http(config, http))
    }

    pub(crate) fn with_http(config: AuthConfig, http: Client) -> Self {
        Self { config, http }
    }

    /// Build the authorization URL the user opens for the redirect-code login
    #[instrument(skip(self, pkce))]
    pub fn authorize_url(&self, pkce: &Pkce) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoints.ms_authorize)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri())
            .append_pair("scope", &self.config.scope)
            .append_pair("prompt", "select_account")
            .append_pair("code_challenge", pkce.challenge())
            .append_pair("code_challenge_method", pkce.method());

        debug!("Built authorize URL: {}", url);
        Ok(url)
    }

    /// Exchange an authorization code captured by the callback listener
    #[instrument(skip(self, code, pkce))]
    pub async fn exchange_code(&self, code: &str, pkce: &Pkce) -> Result<MsTokenResponse> {
        let redirect_uri = self.config.redirect_uri();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri.as_str()),
            ("scope", self.config.scope.as_str()),
            ("code_verifier", pkce.verifier()),
        ];

        debug!("Exchanging authorization code for tokens");
        let response = self
            .http
            .post(&self.config.endpoints.ms_token)
            .form(&form)
            .send()
            .await?;

        read_json(response).await
    }

    /// Refresh Microsoft tokens using refresh_token
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<MsTokenResponse> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", self.config.scope.as_str()),
        ];

        debug!("Refreshing Microsoft access token");
        let response = self
            .http
            .post(&self.config.endpoints.ms_token)
            .form(&form)
            .send()
            .await?;

        read_json(response).await
    }

    /// Request a device code the user approves on another device
    #[instrument(skip(self))]
    pub async fn start_device_flow(&self) -> Result<DeviceCodeSession> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("scope", self.config.scope.as_str()),
        ];

        debug!("Requesting device code");
        let response = self
            .http
            .post(&self.config.endpoints.ms_device_code)
            .form(&form)
            .send()
            .await?;

        let device: DeviceCodeResponse = read_json(response).await?;
        Ok(DeviceCodeSession::from_response(
            device,
            self.config.device_polling.default_interval,
        ))
    }
}

#[async_trait::async_trait]
impl DeviceTokenSource for MicrosoftClient {
    #[instrument(skip_all)]
    async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("grant_type", DEVICE_CODE_GRANT),
            ("device_code", device_code),
        ];

        let response = self
            .http
            .post(&self.config.endpoints.ms_token)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(DevicePoll::Authorized(decode_body(response).await?));
        }

        // Pending and slow_down arrive as 400 with an OAuth error body
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<OAuthErrorResponse>(&body) {
            Ok(err) => Ok(DevicePoll::from_oauth_error(err.error, err.error_description)),
            Err(_) => Err(AuthError::Http { status, body }),
        }
    }
}
