//! Device-code session and the poll loop that waits for the user to approve it.
//!
//! The loop is a small state machine: it alternates between waiting one
//! interval and issuing one token request, and leaves through exactly one of
//! four exits: a token, a terminal server error, the hard ceiling, or the
//! caller's cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, instrument, warn};

use crate::config::SLOW_DOWN_STEP;
use crate::errors::{AuthError, Result};
use crate::models::{DeviceCodeResponse, MsTokenResponse};

/// Device authorization issued by the identity provider
#[derive(Clone)]
pub struct DeviceCodeSession {
    /// Sent to the token endpoint, never shown to the user
    pub(crate) device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub interval: Duration,
    /// Lifetime reported by the server; the poll ceiling still applies
    pub expires_in: Option<Duration>,
    pub message: Option<String>,
}

impl DeviceCodeSession {
    pub(crate) fn from_response(response: DeviceCodeResponse, default_interval: Duration) -> Self {
        let interval = match response.interval {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default_interval,
        };
        Self {
            device_code: response.device_code,
            user_code: response.user_code,
            verification_url: response.verification_uri,
            interval,
            expires_in: response.expires_in.map(Duration::from_secs),
            message: response.message,
        }
    }

    pub fn device_code(&self) -> &str {
        &self.device_code
    }
}

impl std::fmt::Debug for DeviceCodeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCodeSession")
            .field("device_code", &"[REDACTED]")
            .field("user_code", &self.user_code)
            .field("verification_url", &self.verification_url)
            .field("interval", &self.interval)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Outcome of one token request against a device code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePoll {
    Authorized(MsTokenResponse),
    /// `authorization_pending`: keep going at the same interval
    Pending,
    /// `slow_down`: keep going with a longer interval
    SlowDown,
    /// Any other OAuth error code ends the wait
    Rejected {
        error: String,
        description: Option<String>,
    },
}

impl DevicePoll {
    pub(crate) fn from_oauth_error(error: String, description: Option<String>) -> Self {
        match error.as_str() {
            "authorization_pending" => Self::Pending,
            "slow_down" => Self::SlowDown,
            _ => Self::Rejected { error, description },
        }
    }
}

/// Something that can exchange a device code for tokens
#[async_trait::async_trait]
pub trait DeviceTokenSource: Send + Sync {
    async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll>;
}

enum PollStep {
    Wait(Duration),
    Poll(Duration),
    Done(Result<MsTokenResponse>),
}

/// Poll until the user approves the device code, the server refuses it,
/// `ceiling` elapses or `cancel` resolves.
#[instrument(skip_all, fields(user_code = %session.user_code))]
pub async fn poll_for_token<S, C>(
    source: &S,
    session: &DeviceCodeSession,
    ceiling: Duration,
    cancel: C,
) -> Result<MsTokenResponse>
where
    S: DeviceTokenSource + ?Sized,
    C: Future<Output = ()>,
{
    let deadline = Instant::now() + ceiling;
    let timeout = || AuthError::PollingTimeout {
        minutes: ceiling.as_secs() / 60,
    };
    tokio::pin!(cancel);

    let mut polls = 0u32;
    let mut step = PollStep::Wait(session.interval);
    loop {
        step = match step {
            PollStep::Wait(interval) => tokio::select! {
                biased;
                _ = &mut cancel => PollStep::Done(Err(AuthError::Cancelled)),
                _ = sleep_until(deadline) => PollStep::Done(Err(timeout())),
                _ = sleep(interval) => PollStep::Poll(interval),
            },
            PollStep::Poll(interval) => {
                polls += 1;
                debug!(polls, interval_secs = interval.as_secs(), "Polling device token");
                tokio::select! {
                    biased;
                    _ = &mut cancel => PollStep::Done(Err(AuthError::Cancelled)),
                    _ = sleep_until(deadline) => PollStep::Done(Err(timeout())),
                    outcome = source.poll_device_token(&session.device_code) => match outcome {
                        Ok(DevicePoll::Authorized(tokens)) => PollStep::Done(Ok(tokens)),
                        Ok(DevicePoll::Pending) => PollStep::Wait(interval),
                        Ok(DevicePoll::SlowDown) => {
                            let slower = interval + SLOW_DOWN_STEP;
                            debug!(interval_secs = slower.as_secs(), "Server asked to slow down");
                            PollStep::Wait(slower)
                        }
                        Ok(DevicePoll::Rejected { error, description }) => PollStep::Done(Err(
                            AuthError::DeviceCodeRejected { error, description },
                        )),
                        Err(e) => PollStep::Done(Err(e)),
                    },
                }
            }
            PollStep::Done(result) => {
                match &result {
                    Ok(_) => info!(polls, "Device code authorized"),
                    Err(e) => warn!(polls, "Device code wait ended: {}", e),
                }
                return result;
            }
        };
    }
}
