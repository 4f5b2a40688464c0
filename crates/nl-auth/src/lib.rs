//! Microsoft account sign-in for the Nix Client launcher
//!
//! This crate signs a user into Minecraft: Java Edition through the chain of
//! token exchanges behind a Microsoft account, and keeps the resulting
//! credentials in a single JSON file.
//!
//! # Authentication Flow
//!
//! 1. Microsoft access token, by device code or by browser redirect
//! 2. Xbox Live authentication
//! 3. XSTS authorization for Minecraft services
//! 4. Minecraft Services login
//! 5. Ownership check against the entitlements list
//! 6. Profile retrieval
//! 7. Account saved to disk
//!
//! A refresh replays steps 1 to 4 with the stored refresh token and only
//! replaces the token fields of the saved account.
//!
//! # Example
//!
//! ```no_run
//! use nl_auth::{AuthConfig, Authenticator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let auth = Authenticator::with_file_store(AuthConfig::default())?;
//!
//!     let account = match auth.restore_account().await {
//!         Some(account) => account,
//!         None => {
//!             let login = auth.start_device_login().await?;
//!             println!("Enter {} at {}", login.user_code(), login.verification_url());
//!             login.wait_for_login(std::future::pending()).await?
//!         }
//!     };
//!
//!     println!("Logged in as: {}", account.profile.name);
//!     Ok(())
//! }
//! ```
//!
//! # Important Notes
//!
//! - Tokens are never logged
//! - The Minecraft access token expires after 24 hours and needs refresh
//! - A device-code wait gives up after 15 minutes whatever the server says

pub mod account;
pub mod callback;
pub mod config;
pub mod device;
pub mod errors;
pub mod file_store;
pub mod flow;
mod http;
pub mod microsoft;
pub mod minecraft;
pub mod models;
pub mod pkce;
pub mod store;
pub mod xbox;

// Re-export main types
pub use account::{Account, AuthTokens, ProfileSummary};
pub use config::AuthConfig;
pub use device::DeviceCodeSession;
pub use errors::{AuthError, LoginError, Result, Stage, StoreError, XstsError};
pub use file_store::FileAccountStore;
pub use flow::{
    Authenticator, DeviceLogin, LoginMethod, LoginPrompt, LoginState, PendingLogin, RedirectLogin,
};
pub use store::{AccountStore, MemoryAccountStore};
