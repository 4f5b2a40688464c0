use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;
use fs2::FileExt;
use tokio::fs;
use tracing::{debug, error, info, instrument};

use crate::account::Account;
use crate::errors::StoreError;
use crate::store::AccountStore;

const ACCOUNT_FILE: &str = "accounts.json";

/// JSON file holding the signed-in account.
///
/// # Layout
/// ```text
/// ~/.config/NixClientLauncher/
/// ├── accounts.json        # The account record, pretty-printed
/// └── accounts.json.lock   # Advisory lock held while writing
/// ```
///
/// Writes go to a temporary file that is renamed over the record, so a
/// reader never sees a half-written file. Last writer wins.
#[derive(Debug, Clone)]
pub struct FileAccountStore {
    path: PathBuf,
}

impl FileAccountStore {
    /// Store at the platform config location
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self::at(Self::default_path()?))
    }

    /// Store at an explicit file path
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get default account file path for the current platform
    pub fn default_path() -> Result<PathBuf, StoreError> {
        let project_dirs = ProjectDirs::from("", "", "NixClientLauncher").ok_or_else(|| {
            error!("Failed to determine project directories - this usually indicates an unsupported OS or missing home directory");
            StoreError::ProjectDirectoriesUnavailable
        })?;

        Ok(project_dirs.config_dir().join(ACCOUNT_FILE))
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Acquire an exclusive lock for the duration of a write
    fn acquire_lock(&self) -> Result<std::fs::File, StoreError> {
        let lock_path = self.lock_path();
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open lock file")
            .map_err(|e| StoreError::FileWriteFailed {
                path: lock_path.clone(),
                source: e,
            })?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked { path: lock_path })?;

        Ok(lock_file)
    }

    async fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(());
        };
        if fs::metadata(parent).await.is_ok() {
            return Ok(());
        }

        info!("Config directory doesn't exist, creating: {}", parent.display());
        fs::create_dir_all(parent)
            .await
            .context("Failed to create config directory")
            .map_err(|e| {
                error!("Failed to create config directory {}: {}", parent.display(), e);
                StoreError::DirectoryCreationFailed {
                    path: parent.to_path_buf(),
                    source: e,
                }
            })
    }
}

#[async_trait::async_trait]
impl AccountStore for FileAccountStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> Result<Option<Account>, StoreError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No stored account");
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to read account file {}: {}", self.path.display(), e);
                return Err(StoreError::FileReadFailed {
                    path: self.path.clone(),
                    source: anyhow::Error::new(e).context("Failed to read account file"),
                });
            }
        };

        let account: Account = serde_json::from_slice(&content)
            .context("Failed to parse account file")
            .map_err(|e| {
                error!("Failed to parse account file {}: {}", self.path.display(), e);
                StoreError::ParsingFailed {
                    path: self.path.clone(),
                    source: e,
                }
            })?;

        debug!("Loaded account '{}'", account.profile.name);
        Ok(Some(account))
    }

    #[instrument(skip(self, account), fields(path = %self.path.display()))]
    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        self.ensure_parent_dir().await?;
        let _lock = self.acquire_lock()?;

        let json = serde_json::to_string_pretty(account)
            .context("Failed to serialize account to JSON")
            .map_err(|e| StoreError::SerializationFailed { source: e })?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.temp_path();
        fs::write(&temp_path, json)
            .await
            .context("Failed to write temporary account file")
            .map_err(|e| {
                error!("Failed to write account file {}: {}", temp_path.display(), e);
                StoreError::FileWriteFailed {
                    path: temp_path.clone(),
                    source: e,
                }
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&temp_path, perms)
                .await
                .context("Failed to restrict account file permissions")
                .map_err(|e| StoreError::FileWriteFailed {
                    path: temp_path.clone(),
                    source: e,
                })?;
        }

        fs::rename(&temp_path, &self.path)
            .await
            .context("Failed to move account file into place")
            .map_err(|e| {
                error!("Failed to replace account file {}: {}", self.path.display(), e);
                StoreError::FileWriteFailed {
                    path: self.path.clone(),
                    source: e,
                }
            })?;

        info!(
            "Saved account '{}' at {}",
            account.profile.name,
            self.path.display()
        );
        Ok(())
    }
}
