//! End-to-end sign-in and refresh.
//!
//! Login runs Microsoft → Xbox Live → XSTS → Minecraft auth → ownership →
//! profile → save, strictly in order. The first failing stage aborts the
//! chain, nothing is persisted, and the error carries that stage.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::account::Account;
use crate::callback::CallbackListener;
use crate::config::AuthConfig;
use crate::device::{DeviceCodeSession, poll_for_token};
use crate::errors::{AuthError, LoginError, Stage, StoreError};
use crate::file_store::FileAccountStore;
use crate::http::build_client;
use crate::microsoft::MicrosoftClient;
use crate::minecraft::MinecraftClient;
use crate::models::{McLoginResponse, MsTokenResponse};
use crate::pkce::Pkce;
use crate::store::AccountStore;
use crate::xbox::XboxClient;

/// Progress of one login or refresh attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    AwaitingFirstParty,
    AwaitingDelegation1,
    AwaitingDelegation2,
    AwaitingGameAuth,
    AwaitingOwnership,
    AwaitingProfile,
    Persisted,
    Failed(Stage),
}

impl LoginState {
    fn awaiting(stage: Stage) -> Option<Self> {
        match stage {
            Stage::FirstParty => Some(Self::AwaitingFirstParty),
            Stage::XboxLive => Some(Self::AwaitingDelegation1),
            Stage::Xsts => Some(Self::AwaitingDelegation2),
            Stage::GameAuth => Some(Self::AwaitingGameAuth),
            Stage::Ownership => Some(Self::AwaitingOwnership),
            Stage::Profile => Some(Self::AwaitingProfile),
            Stage::Persist => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Persisted | Self::Failed(_))
    }
}

/// Entry protocol for the first-party token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMethod {
    /// Show a short code the user enters on another device
    #[default]
    DeviceCode,
    /// Open a browser that redirects back to a loopback listener
    Redirect,
}

/// What the shell has to show the user while a login is pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPrompt {
    EnterCode {
        user_code: String,
        verification_url: String,
    },
    OpenBrowser {
        url: Url,
    },
}

/// Publishes state transitions and tags failures with their stage
struct Tracker {
    state: watch::Sender<LoginState>,
}

impl Tracker {
    fn new() -> Self {
        let (state, _) = watch::channel(LoginState::Idle);
        Self { state }
    }

    fn subscribe(&self) -> watch::Receiver<LoginState> {
        self.state.subscribe()
    }

    fn set(&self, next: LoginState) {
        debug!(state = ?next, "Login state");
        self.state.send_replace(next);
    }

    fn fail(&self, stage: Stage, source: AuthError) -> LoginError {
        warn!("{} failed: {}", stage, source);
        self.set(LoginState::Failed(stage));
        LoginError::new(stage, source)
    }

    async fn run<T, F>(&self, stage: Stage, fut: F) -> Result<T, LoginError>
    where
        F: Future<Output = Result<T, AuthError>>,
    {
        if let Some(state) = LoginState::awaiting(stage) {
            self.set(state);
        }
        fut.await.map_err(|e| self.fail(stage, e))
    }
}

/// Sequences the sign-in chain and owns the account store
#[derive(Clone)]
pub struct Authenticator {
    config: AuthConfig,
    microsoft: MicrosoftClient,
    xbox: XboxClient,
    minecraft: MinecraftClient,
    store: Arc<dyn AccountStore>,
}

impl Authenticator {
    pub fn new(config: AuthConfig, store: Arc<dyn AccountStore>) -> Result<Self, AuthError> {
        let http = build_client(&config)?;
        Ok(Self {
            microsoft: MicrosoftClient::with_http(config.clone(), http.clone()),
            xbox: XboxClient::with_http(config.clone(), http.clone()),
            minecraft: MinecraftClient::with_http(config.clone(), http),
            config,
            store,
        })
    }

    /// Authenticator persisting to the platform config location
    pub fn with_file_store(config: AuthConfig) -> Result<Self, AuthError> {
        let store = FileAccountStore::new()?;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start a login with the chosen entry protocol
    pub async fn begin(&self, method: LoginMethod) -> Result<PendingLogin, LoginError> {
        match method {
            LoginMethod::DeviceCode => self.start_device_login().await.map(PendingLogin::Device),
            LoginMethod::Redirect => self.start_redirect_login().await.map(PendingLogin::Redirect),
        }
    }

    /// Request a device code; the returned login is waited on exactly once
    #[instrument(skip(self))]
    pub async fn start_device_login(&self) -> Result<DeviceLogin, LoginError> {
        let tracker = Tracker::new();
        let session = tracker
            .run(Stage::FirstParty, self.microsoft.start_device_flow())
            .await?;
        info!(
            "Device login started, code {} at {}",
            session.user_code, session.verification_url
        );

        Ok(DeviceLogin {
            auth: self.clone(),
            session,
            tracker,
        })
    }

    /// Bind the loopback listener and build the browser URL
    #[instrument(skip(self))]
    pub async fn start_redirect_login(&self) -> Result<RedirectLogin, LoginError> {
        let tracker = Tracker::new();
        let prepared = async {
            let pkce = Pkce::generate()?;
            let authorize_url = self.microsoft.authorize_url(&pkce)?;
            let listener =
                CallbackListener::bind(self.config.callback_addr, &self.config.callback_path)
                    .await?;
            Ok::<_, AuthError>((pkce, authorize_url, listener))
        };
        let (pkce, authorize_url, listener) = tracker.run(Stage::FirstParty, prepared).await?;

        Ok(RedirectLogin {
            auth: self.clone(),
            listener,
            pkce,
            authorize_url,
            tracker,
        })
    }

    /// Exchange the stored refresh token and replay the chain up to Minecraft auth.
    ///
    /// Ownership and profile are not checked again; only the token fields of
    /// the record change.
    #[instrument(skip(self, account), fields(profile = %account.profile.name))]
    pub async fn refresh_login(&self, account: &Account) -> Result<Account, LoginError> {
        let tracker = Tracker::new();
        if !account.has_refresh_token() {
            return Err(tracker.fail(Stage::FirstParty, AuthError::MissingRefreshToken));
        }

        let ms = tracker
            .run(
                Stage::FirstParty,
                self.microsoft.refresh(&account.tokens.ms_refresh_token),
            )
            .await?;
        let mc = self.delegate_to_game(&ms, &tracker).await?;

        let refreshed = account.with_refreshed_tokens(&ms, &mc, Utc::now());
        self.persist(&refreshed, &tracker).await?;

        info!("Refreshed tokens for '{}'", refreshed.profile.name);
        Ok(refreshed)
    }

    /// Saved account ready for use, refreshed if either token has lapsed.
    ///
    /// `None` means an interactive login is required: nothing is saved, the
    /// record cannot be read, or the refresh failed.
    #[instrument(skip(self))]
    pub async fn restore_account(&self) -> Option<Account> {
        let account = match self.load_account().await {
            Ok(Some(account)) => account,
            Ok(None) => {
                debug!("No saved account");
                return None;
            }
            Err(e) => {
                warn!("Could not read saved account, signing in again: {}", e);
                return None;
            }
        };

        if !account.needs_refresh() {
            return Some(account);
        }

        match self.refresh_login(&account).await {
            Ok(account) => Some(account),
            Err(e) => {
                warn!("Failed to refresh token, requiring login: {}", e);
                None
            }
        }
    }

    pub async fn load_account(&self) -> Result<Option<Account>, StoreError> {
        self.store.load().await
    }

    pub async fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        self.store.save(account).await
    }

    /// Xbox Live → XSTS → Minecraft auth, shared by login and refresh
    async fn delegate_to_game(
        &self,
        ms: &MsTokenResponse,
        tracker: &Tracker,
    ) -> Result<McLoginResponse, LoginError> {
        let xbl = tracker
            .run(Stage::XboxLive, self.xbox.authenticate(&ms.access_token))
            .await?;
        let xsts = tracker
            .run(Stage::Xsts, self.xbox.authorize(&xbl.token))
            .await?;
        let user_hash = xsts.user_hash().map_err(|e| tracker.fail(Stage::Xsts, e))?;

        tracker
            .run(Stage::GameAuth, self.minecraft.login(user_hash, &xsts.token))
            .await
    }

    /// Everything after the first-party token for a fresh login
    async fn complete_login(
        &self,
        ms: MsTokenResponse,
        tracker: &Tracker,
    ) -> Result<Account, LoginError> {
        let mc = self.delegate_to_game(&ms, tracker).await?;
        tracker
            .run(
                Stage::Ownership,
                self.minecraft.check_ownership(&mc.access_token),
            )
            .await?;
        let profile = tracker
            .run(
                Stage::Profile,
                self.minecraft.fetch_profile(&mc.access_token),
            )
            .await?;

        let account = Account::from_login(&ms, &mc, profile, Utc::now());
        self.persist(&account, tracker).await?;

        info!("Logged in as '{}'", account.profile.name);
        Ok(account)
    }

    async fn persist(&self, account: &Account, tracker: &Tracker) -> Result<(), LoginError> {
        tracker
            .run(Stage::Persist, async {
                self.store.save(account).await.map_err(AuthError::from)
            })
            .await?;
        tracker.set(LoginState::Persisted);
        Ok(())
    }
}

/// A device-code login waiting for the user
pub struct DeviceLogin {
    auth: Authenticator,
    session: DeviceCodeSession,
    tracker: Tracker,
}

impl DeviceLogin {
    pub fn session(&self) -> &DeviceCodeSession {
        &self.session
    }

    pub fn user_code(&self) -> &str {
        &self.session.user_code
    }

    pub fn verification_url(&self) -> &str {
        &self.session.verification_url
    }

    pub fn state(&self) -> watch::Receiver<LoginState> {
        self.tracker.subscribe()
    }

    /// Poll until approved (bounded by the 15 minute ceiling or `cancel`),
    /// then run the rest of the chain.
    #[instrument(skip_all, fields(user_code = %self.session.user_code))]
    pub async fn wait_for_login<C>(self, cancel: C) -> Result<Account, LoginError>
    where
        C: Future<Output = ()>,
    {
        let ceiling = self.auth.config.device_polling.ceiling;
        let ms = self
            .tracker
            .run(
                Stage::FirstParty,
                poll_for_token(&self.auth.microsoft, &self.session, ceiling, cancel),
            )
            .await?;

        self.auth.complete_login(ms, &self.tracker).await
    }
}

/// A redirect-code login waiting for the browser to come back
pub struct RedirectLogin {
    auth: Authenticator,
    listener: CallbackListener,
    pkce: Pkce,
    authorize_url: Url,
    tracker: Tracker,
}

impl RedirectLogin {
    pub fn authorize_url(&self) -> &Url {
        &self.authorize_url
    }

    /// URL the listener actually answers on
    pub fn callback_url(&self) -> Result<String, AuthError> {
        let addr = self.listener.local_addr()?;
        Ok(format!("http://{}{}", addr, self.auth.config.callback_path))
    }

    pub fn state(&self) -> watch::Receiver<LoginState> {
        self.tracker.subscribe()
    }

    /// Wait for the redirect (until `cancel` resolves), exchange the code, run the chain
    #[instrument(skip_all)]
    pub async fn wait_for_login<C>(self, cancel: C) -> Result<Account, LoginError>
    where
        C: Future<Output = ()>,
    {
        let Self {
            auth,
            listener,
            pkce,
            tracker,
            ..
        } = self;

        let code = tracker
            .run(Stage::FirstParty, listener.wait_for_code(cancel))
            .await?;
        let ms = tracker
            .run(Stage::FirstParty, auth.microsoft.exchange_code(&code, &pkce))
            .await?;

        auth.complete_login(ms, &tracker).await
    }
}

/// Either kind of pending login
pub enum PendingLogin {
    Device(DeviceLogin),
    Redirect(RedirectLogin),
}

impl PendingLogin {
    pub fn prompt(&self) -> LoginPrompt {
        match self {
            Self::Device(login) => LoginPrompt::EnterCode {
                user_code: login.user_code().to_string(),
                verification_url: login.verification_url().to_string(),
            },
            Self::Redirect(login) => LoginPrompt::OpenBrowser {
                url: login.authorize_url().clone(),
            },
        }
    }

    pub fn state(&self) -> watch::Receiver<LoginState> {
        match self {
            Self::Device(login) => login.state(),
            Self::Redirect(login) => login.state(),
        }
    }

    pub async fn wait_for_login<C>(self, cancel: C) -> Result<Account, LoginError>
    where
        C: Future<Output = ()>,
    {
        match self {
            Self::Device(login) => login.wait_for_login(cancel).await,
            Self::Redirect(login) => login.wait_for_login(cancel).await,
        }
    }
}
