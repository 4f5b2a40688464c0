use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nl_auth::{Account, AuthConfig, Authenticator, FileAccountStore, LoginMethod, LoginPrompt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Sign in to Minecraft with a Microsoft account
#[derive(Debug, Parser)]
#[command(name = "nix-launcher", version)]
struct Cli {
    /// Sign in through the browser instead of a device code
    #[arg(long)]
    browser: bool,

    /// Account file to use instead of the platform config location
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,

    /// Ignore any saved account and sign in again
    #[arg(long)]
    force_login: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let store = match &cli.store {
        Some(path) => FileAccountStore::at(path),
        None => FileAccountStore::new().context("Failed to locate account file")?,
    };
    info!("Using account file {}", store.path().display());
    let auth = Authenticator::new(AuthConfig::default(), Arc::new(store))?;

    let restored = if cli.force_login {
        None
    } else {
        auth.restore_account().await
    };

    let account = match restored {
        Some(account) => account,
        None => {
            let method = if cli.browser {
                LoginMethod::Redirect
            } else {
                LoginMethod::DeviceCode
            };
            login(&auth, method).await?
        }
    };

    println!("Logged in as {} ({})", account.profile.name, account.profile.id);
    Ok(())
}

async fn login(auth: &Authenticator, method: LoginMethod) -> anyhow::Result<Account> {
    let pending = auth.begin(method).await?;

    match pending.prompt() {
        LoginPrompt::EnterCode {
            user_code,
            verification_url,
        } => {
            println!("1. Open {verification_url}");
            println!("2. Enter this code: {user_code}");
        }
        LoginPrompt::OpenBrowser { url } => {
            println!("Opening the Microsoft login page in your browser...");
            if let Err(e) = webbrowser::open(url.as_str()) {
                warn!("Could not open a browser: {}", e);
                println!("Open this page to continue: {url}");
            }
        }
    }

    let mut state = pending.state();
    let progress = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!(state = ?current, "Login progress");
            if current.is_terminal() {
                break;
            }
        }
    });

    let result = pending
        .wait_for_login(cancel_on(tokio::signal::ctrl_c()))
        .await;
    progress.abort();

    match result {
        Ok(account) => Ok(account),
        Err(e) if e.is_ownership_denied() => {
            anyhow::bail!("This Microsoft account does not own Minecraft: Java Edition")
        }
        Err(e) if e.is_cancelled() => anyhow::bail!("Login cancelled"),
        Err(e) => Err(e).context("Login failed"),
    }
}

/// Resolves when `signal` fires. A signal that cannot be installed never
/// fires, so the login is left to run instead of ending as cancelled.
async fn cancel_on<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    if let Err(e) = signal.await {
        warn!("Could not listen for Ctrl-C, login cannot be cancelled: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_signal_cancels() {
        tokio::time::timeout(Duration::from_secs(1), cancel_on(async { Ok(()) }))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_signal_registration_never_cancels() {
        let failed = async { Err(io::Error::other("no signal handler")) };
        let waited = tokio::time::timeout(Duration::from_secs(3600), cancel_on(failed)).await;
        assert!(waited.is_err());
    }
}
