//! Loopback HTTP listener that captures the authorization code of a
//! redirect-code login.
//!
//! One listener belongs to one login attempt: it is bound when the attempt
//! starts, serves until the first code (or error) arrives or the caller
//! cancels, and is torn down before `wait_for_code` returns.

use std::future::Future;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{AuthError, Result};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Query parameters of the redirect
#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

type Outcome = Result<String>;

#[derive(Clone)]
struct CallbackState {
    sender: Arc<Mutex<Option<oneshot::Sender<Outcome>>>>,
}

impl CallbackState {
    fn deliver(&self, outcome: Outcome) {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(outcome);
        }
    }
}

/// A bound loopback listener waiting for exactly one authorization code
///
/// The redirect URI names `localhost`, which browsers may resolve to either
/// loopback family. Binding the IPv4 loopback also binds `[::1]` on the same
/// port when the host has IPv6.
#[derive(Debug)]
pub struct CallbackListener {
    primary: TcpListener,
    ipv6: Option<TcpListener>,
    path: String,
}

impl CallbackListener {
    /// Bind the listener; failure here is reported before the user is sent anywhere
    pub async fn bind(addr: SocketAddr, path: &str) -> Result<Self> {
        let primary = TcpListener::bind(addr)
            .await
            .map_err(|source| AuthError::ListenerBind { addr, source })?;
        debug!("Callback listener bound on {}", addr);

        let ipv6 = match (addr.ip(), primary.local_addr()) {
            (IpAddr::V4(ip), Ok(bound)) if ip.is_loopback() => {
                let v6 = SocketAddr::from((Ipv6Addr::LOCALHOST, bound.port()));
                match TcpListener::bind(v6).await {
                    Ok(listener) => {
                        debug!("Callback listener bound on {}", v6);
                        Some(listener)
                    }
                    Err(e) => {
                        debug!("IPv6 loopback unavailable for callback: {}", e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(Self {
            primary,
            ipv6,
            path: path.to_string(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.primary.local_addr().map_err(|source| AuthError::ListenerBind {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            source,
        })
    }

    /// Address of the IPv6 loopback companion, if one was bound
    pub fn ipv6_addr(&self) -> Option<SocketAddr> {
        self.ipv6.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Serve until a code arrives or `cancel` resolves, then shut down
    pub async fn wait_for_code<C>(self, cancel: C) -> Result<String>
    where
        C: Future<Output = ()>,
    {
        let (tx, rx) = oneshot::channel();
        let state = CallbackState {
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        let app = Router::new()
            .route(&self.path, get(handle_callback))
            .with_state(state);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut servers = JoinSet::new();
        for listener in std::iter::once(self.primary).chain(self.ipv6) {
            let app = app.clone();
            let mut shutdown = shutdown_rx.clone();
            servers.spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.changed().await;
                    })
                    .await
            });
        }

        let result = tokio::select! {
            biased;
            _ = cancel => Err(AuthError::Cancelled),
            outcome = rx => outcome.unwrap_or(Err(AuthError::ListenerClosed)),
            Some(served) = servers.join_next() => {
                match served {
                    Ok(Err(e)) => warn!("Callback listener failed: {}", e),
                    Err(e) => warn!("Callback listener task failed: {}", e),
                    Ok(Ok(())) => {}
                }
                Err(AuthError::ListenerClosed)
            }
        };

        let _ = shutdown_tx.send(true);
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while servers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            servers.shutdown().await;
        }
        debug!("Callback listener shut down");

        result
    }
}

async fn handle_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    if let Some(error) = params.error {
        warn!("Authorization redirect carried error: {}", error);
        state.deliver(Err(AuthError::AuthorizationDenied {
            error,
            description: params.error_description,
        }));
        return (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE)).into_response();
    }

    match params.code {
        Some(code) if !code.is_empty() => {
            info!("Authorization code received");
            state.deliver(Ok(code));
            Html(SUCCESS_PAGE).into_response()
        }
        _ => (StatusCode::BAD_REQUEST, "No code found").into_response(),
    }
}

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>Login successful</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
    <h1>Login successful!</h1>
    <p>You can close this window and return to the launcher.</p>
</body>
</html>"#;

const FAILURE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"><title>Login failed</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
    <h1>Login failed</h1>
    <p>The sign-in was not completed. Return to the launcher and try again.</p>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_any() -> (CallbackListener, String) {
        let listener = CallbackListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)), "/callback")
            .await
            .unwrap();
        let url = format!("http://{}/callback", listener.local_addr().unwrap());
        (listener, url)
    }

    #[tokio::test]
    async fn test_captures_code_and_shuts_down() {
        let (listener, url) = bind_any().await;
        let addr = listener.local_addr().unwrap();
        let wait = tokio::spawn(listener.wait_for_code(std::future::pending()));

        let response = reqwest::get(format!("{url}?code=abc123&state=x")).await.unwrap();
        assert!(response.status().is_success());
        assert!(response.text().await.unwrap().contains("Login successful"));

        assert_eq!(wait.await.unwrap().unwrap(), "abc123");

        // The port is free again once the wait has returned
        CallbackListener::bind(addr, "/callback").await.unwrap();
    }

    #[tokio::test]
    async fn test_request_without_code_keeps_waiting() {
        let (listener, url) = bind_any().await;
        let wait = tokio::spawn(listener.wait_for_code(std::future::pending()));

        let response = reqwest::get(&url).await.unwrap();
        assert_eq!(response.status().as_u16(), 400);
        assert!(!wait.is_finished());

        reqwest::get(format!("{url}?code=late")).await.unwrap();
        assert_eq!(wait.await.unwrap().unwrap(), "late");
    }

    #[tokio::test]
    async fn test_error_redirect_ends_wait() {
        let (listener, url) = bind_any().await;
        let wait = tokio::spawn(listener.wait_for_code(std::future::pending()));

        reqwest::get(format!("{url}?error=access_denied&error_description=nope"))
            .await
            .unwrap();

        match wait.await.unwrap() {
            Err(AuthError::AuthorizationDenied { error, description }) => {
                assert_eq!(error, "access_denied");
                assert_eq!(description.as_deref(), Some("nope"));
            }
            other => panic!("Expected AuthorizationDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_listener() {
        let (listener, _url) = bind_any().await;
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let wait = tokio::spawn(listener.wait_for_code(async {
            let _ = cancel_rx.await;
        }));

        cancel_tx.send(()).unwrap();
        assert!(matches!(wait.await.unwrap(), Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_ipv6_loopback_reaches_same_wait() {
        let (listener, _url) = bind_any().await;
        let port = listener.local_addr().unwrap().port();
        let Some(v6) = listener.ipv6_addr() else {
            // Host without IPv6 loopback
            return;
        };
        assert_eq!(v6.port(), port);
        let wait = tokio::spawn(listener.wait_for_code(std::future::pending()));

        let response = reqwest::get(format!("http://[::1]:{port}/callback?code=from-v6"))
            .await
            .unwrap();
        assert!(response.status().is_success());
        assert_eq!(wait.await.unwrap().unwrap(), "from-v6");
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let (listener, _url) = bind_any().await;
        let addr = listener.local_addr().unwrap();

        let err = CallbackListener::bind(addr, "/callback").await.unwrap_err();
        assert!(matches!(err, AuthError::ListenerBind { .. }));
    }
}
