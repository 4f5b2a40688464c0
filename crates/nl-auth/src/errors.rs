use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a single exchange of the sign-in chain
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Sign-in was cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}: {body}")]
    Http {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Response carried no display claims, user hash unavailable")]
    EmptyClaims,

    #[error("Account does not own Minecraft: Java Edition")]
    OwnershipDenied,

    #[error("Minecraft profile not found - the account has not created a profile: {body}")]
    ProfileNotFound { body: String },

    #[error("XSTS authorization denied: {0}")]
    XstsDenied(#[from] XstsError),

    #[error("Device code was not authorized within {minutes} minutes")]
    PollingTimeout { minutes: u64 },

    #[error("Device code rejected: {error}{}", fmt_description(.description))]
    DeviceCodeRejected {
        error: String,
        description: Option<String>,
    },

    #[error("Authorization denied in browser: {error}{}", fmt_description(.description))]
    AuthorizationDenied {
        error: String,
        description: Option<String>,
    },

    #[error("Failed to bind callback listener on {addr}: {source}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Callback listener stopped before a code arrived")]
    ListenerClosed,

    #[error("Missing refresh token - cannot refresh session")]
    MissingRefreshToken,

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Failed to gather randomness: {0}")]
    Entropy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn fmt_description(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

/// XSTS-specific error codes from XErr field
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum XstsError {
    #[error("Account doesn't have an Xbox account (XErr: 2148916233)")]
    NoXboxAccount,

    #[error("Xbox Live not available in this country (XErr: 2148916235)")]
    RegionNotSupported,

    #[error("Adult verification required on Xbox page (XErr: 2148916236/2148916237)")]
    AdultVerificationRequired,

    #[error("Child account requires Family (XErr: 2148916238)")]
    ChildAccountRequiresFamily,

    #[error("Unknown XSTS error code: {0}")]
    Unknown(u64),
}

impl XstsError {
    /// Parse XErr code from XSTS response
    pub fn from_xerr(code: u64) -> Self {
        match code {
            2148916233 => Self::NoXboxAccount,
            2148916235 => Self::RegionNotSupported,
            2148916236 | 2148916237 => Self::AdultVerificationRequired,
            2148916238 => Self::ChildAccountRequiresFamily,
            code => Self::Unknown(code),
        }
    }
}

/// Credential file failures
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "Project directories are unavailable - this usually indicates an unsupported OS or missing home directory"
    )]
    ProjectDirectoriesUnavailable,

    #[error("Failed to create directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to read account file '{path}': {source}")]
    FileReadFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to write account file '{path}': {source}")]
    FileWriteFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to parse account file '{path}': {source}")]
    ParsingFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to serialize account: {source}")]
    SerializationFailed {
        #[source]
        source: anyhow::Error,
    },

    #[error("Account file '{path}' is locked by another process")]
    Locked { path: PathBuf },
}

/// Position in the sign-in chain where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    FirstParty,
    XboxLive,
    Xsts,
    GameAuth,
    Ownership,
    Profile,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstParty => "microsoft sign-in",
            Self::XboxLive => "xbox live auth",
            Self::Xsts => "xsts auth",
            Self::GameAuth => "minecraft auth",
            Self::Ownership => "ownership check",
            Self::Profile => "profile lookup",
            Self::Persist => "saving account",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chain failure tagged with the stage that produced it
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct LoginError {
    pub stage: Stage,
    #[source]
    pub source: AuthError,
}

impl LoginError {
    pub fn new(stage: Stage, source: AuthError) -> Self {
        Self { stage, source }
    }

    /// True when the chain reached the game service but the account lacks the game
    pub fn is_ownership_denied(&self) -> bool {
        matches!(self.source, AuthError::OwnershipDenied)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, AuthError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
