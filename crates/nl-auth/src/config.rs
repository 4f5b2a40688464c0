use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Microsoft, Xbox and Minecraft endpoints
pub mod endpoints {
    pub const MS_AUTHORIZE: &str =
        "https://login.microsoftonline.com/consumers/oauth2/v2.0/authorize";
    pub const MS_TOKEN: &str = "https://login.microsoftonline.com/consumers/oauth2/v2.0/token";
    pub const MS_DEVICE_CODE: &str =
        "https://login.microsoftonline.com/consumers/oauth2/v2.0/devicecode";
    pub const XBL_AUTHENTICATE: &str = "https://user.auth.xboxlive.com/user/authenticate";
    pub const XSTS_AUTHORIZE: &str = "https://xsts.auth.xboxlive.com/xsts/authorize";
    pub const MC_LOGIN: &str = "https://api.minecraftservices.com/authentication/login_with_xbox";
    pub const MC_ENTITLEMENTS: &str = "https://api.minecraftservices.com/entitlements/mcstore";
    pub const MC_PROFILE: &str = "https://api.minecraftservices.com/minecraft/profile";
}

/// Azure application registered for the launcher
pub const CLIENT_ID: &str = "da544862-adab-4f3f-b5a2-2ea14cebeb26";

pub const SCOPE: &str = "XboxLive.signin offline_access";

/// Relying parties
pub const RP_XBOXLIVE_AUTH: &str = "http://auth.xboxlive.com";
pub const RP_MINECRAFT: &str = "rp://api.minecraftservices.com/";

pub const SANDBOX_RETAIL: &str = "RETAIL";

/// Entitlement item names that prove the account owns the game
pub const OWNERSHIP_ITEMS: [&str; 2] = ["product_minecraft", "game_minecraft"];

pub const CALLBACK_PORT: u16 = 53682;
pub const CALLBACK_PATH: &str = "/callback";

/// Refresh the game token this long before it actually expires
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(300);

/// Hard ceiling on a device-code wait regardless of what the server reports
pub const DEVICE_POLL_CEILING: Duration = Duration::from_secs(15 * 60);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Added to the poll interval every time the server answers `slow_down`
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Full set of URLs the chain talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub ms_authorize: String,
    pub ms_token: String,
    pub ms_device_code: String,
    pub xbl_authenticate: String,
    pub xsts_authorize: String,
    pub mc_login: String,
    pub mc_entitlements: String,
    pub mc_profile: String,
}

impl Endpoints {
    /// Point every endpoint at one base URL, keeping the real paths
    pub fn rebased(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            ms_authorize: format!("{base}/consumers/oauth2/v2.0/authorize"),
            ms_token: format!("{base}/consumers/oauth2/v2.0/token"),
            ms_device_code: format!("{base}/consumers/oauth2/v2.0/devicecode"),
            xbl_authenticate: format!("{base}/user/authenticate"),
            xsts_authorize: format!("{base}/xsts/authorize"),
            mc_login: format!("{base}/authentication/login_with_xbox"),
            mc_entitlements: format!("{base}/entitlements/mcstore"),
            mc_profile: format!("{base}/minecraft/profile"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            ms_authorize: endpoints::MS_AUTHORIZE.to_string(),
            ms_token: endpoints::MS_TOKEN.to_string(),
            ms_device_code: endpoints::MS_DEVICE_CODE.to_string(),
            xbl_authenticate: endpoints::XBL_AUTHENTICATE.to_string(),
            xsts_authorize: endpoints::XSTS_AUTHORIZE.to_string(),
            mc_login: endpoints::MC_LOGIN.to_string(),
            mc_entitlements: endpoints::MC_ENTITLEMENTS.to_string(),
            mc_profile: endpoints::MC_PROFILE.to_string(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            request: Duration::from_secs(10),
        }
    }
}

/// Device-code polling bounds
#[derive(Debug, Clone)]
pub struct DevicePolling {
    /// Used when the server omits `interval`
    pub default_interval: Duration,
    pub ceiling: Duration,
}

impl Default for DevicePolling {
    fn default() -> Self {
        Self {
            default_interval: DEFAULT_POLL_INTERVAL,
            ceiling: DEVICE_POLL_CEILING,
        }
    }
}

/// Configuration for the sign-in chain
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub client_id: String,

    pub scope: String,

    pub endpoints: Endpoints,

    pub http_timeouts: HttpTimeouts,

    pub user_agent: Option<String>,

    /// Loopback address the redirect listener binds
    pub callback_addr: SocketAddr,

    pub callback_path: String,

    pub device_polling: DevicePolling,
}

impl AuthConfig {
    /// Redirect URI registered for the loopback listener
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://localhost:{}{}",
            self.callback_addr.port(),
            self.callback_path
        )
    }

    /// Same settings with every endpoint rooted at `base`
    pub fn with_base_url(mut self, base: &str) -> Self {
        self.endpoints = Endpoints::rebased(base);
        self
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: CLIENT_ID.to_string(),
            scope: SCOPE.to_string(),
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("nix-launcher/0.1".to_string()),
            callback_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, CALLBACK_PORT)),
            callback_path: CALLBACK_PATH.to_string(),
            device_polling: DevicePolling::default(),
        }
    }
}
