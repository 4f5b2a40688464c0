use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TOKEN_EXPIRY_SKEW;
use crate::models::{McLoginResponse, McProfile, MsTokenResponse};

/// Persisted credentials for the signed-in account.
///
/// The Microsoft and Minecraft expiries are independent clocks; the game
/// token usually lapses after a day while the Microsoft token lasts longer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    pub tokens: AuthTokens,
    pub profile: ProfileSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthTokens {
    pub ms_access_token: String,
    pub ms_refresh_token: String,
    pub ms_expiry: DateTime<Utc>,
    pub mc_access_token: String,
    pub mc_expiry: DateTime<Utc>,
}

/// The part of the Minecraft profile the launcher keeps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
}

impl From<McProfile> for ProfileSummary {
    fn from(profile: McProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name,
        }
    }
}

impl AuthTokens {
    /// Both expiries are `now + expires_in` for their own token
    pub fn issue(
        ms: &MsTokenResponse,
        mc: &McLoginResponse,
        fallback_refresh_token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let ms_refresh_token = ms
            .refresh_token
            .as_deref()
            .or(fallback_refresh_token)
            .unwrap_or_default()
            .to_string();

        Self {
            ms_access_token: ms.access_token.clone(),
            ms_refresh_token,
            ms_expiry: expires_after(now, ms.expires_in),
            mc_access_token: mc.access_token.clone(),
            mc_expiry: expires_after(now, mc.expires_in),
        }
    }
}

impl Account {
    /// Assemble the record produced by a full login
    pub fn from_login(
        ms: &MsTokenResponse,
        mc: &McLoginResponse,
        profile: McProfile,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tokens: AuthTokens::issue(ms, mc, None, now),
            profile: profile.into(),
        }
    }

    /// Replace every token and expiry, keep the profile as it was
    pub fn with_refreshed_tokens(
        &self,
        ms: &MsTokenResponse,
        mc: &McLoginResponse,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            tokens: AuthTokens::issue(ms, mc, Some(&self.tokens.ms_refresh_token), now),
            profile: self.profile.clone(),
        }
    }

    /// Check if either token needs refresh before protected calls
    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh_at(Utc::now())
    }

    pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
        let skew = TimeDelta::from_std(TOKEN_EXPIRY_SKEW).unwrap_or(TimeDelta::seconds(300));
        now + skew >= self.tokens.mc_expiry || now >= self.tokens.ms_expiry
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.tokens.ms_refresh_token.is_empty()
    }
}

fn expires_after(now: DateTime<Utc>, expires_in: u64) -> DateTime<Utc> {
    let lifetime = i64::try_from(expires_in)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX);
    now.checked_add_signed(lifetime)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
