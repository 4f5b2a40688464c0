use std::sync::{Arc, RwLock};

use crate::account::Account;
use crate::errors::StoreError;

/// Persistence for the single signed-in account.
///
/// Saving fully replaces whatever was stored; there is no merge and no
/// delete. A missing record is `Ok(None)`, meaning "not logged in".
#[async_trait::async_trait]
pub trait AccountStore: Send + Sync {
    async fn load(&self) -> Result<Option<Account>, StoreError>;

    async fn save(&self, account: &Account) -> Result<(), StoreError>;
}

/// In-memory account store for testing and simple use cases
#[derive(Debug, Clone, Default)]
pub struct MemoryAccountStore {
    account: Arc<RwLock<Option<Account>>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(account: Account) -> Self {
        Self {
            account: Arc::new(RwLock::new(Some(account))),
        }
    }
}

#[async_trait::async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load(&self) -> Result<Option<Account>, StoreError> {
        Ok(self
            .account
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone()))
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let mut guard = self
            .account
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(account.clone());
        Ok(())
    }
}
