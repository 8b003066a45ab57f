#![forbid(unsafe_code)]

use std::env;
use std::sync::Mutex;

use async_trait::async_trait;
use profile_kernel_contracts::identity::{AccountAddress, Identity};
use tokio::sync::watch;

use crate::lock;

pub const DEFAULT_DEV_ACCOUNT: &str = "0xf8d6e0586b0a20c7";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("authentication rejected: {0}")]
    Rejected(String),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current-user stream. The receiver starts at the latest identity.
    fn subscribe_current_user(&self) -> watch::Receiver<Identity>;

    async fn log_in(&self) -> Result<(), IdentityError>;

    async fn sign_up(&self) -> Result<(), IdentityError>;

    async fn unauthenticate(&self) -> Result<(), IdentityError>;
}

/// Development wallet: every login authenticates one configured account.
pub struct LoopbackIdentityProvider {
    account: Mutex<AccountAddress>,
    current: watch::Sender<Identity>,
    reject_next: Mutex<Option<String>>,
}

impl LoopbackIdentityProvider {
    pub fn new(account: AccountAddress) -> Self {
        let (current, _) = watch::channel(Identity::anonymous());
        Self {
            account: Mutex::new(account),
            current,
            reject_next: Mutex::new(None),
        }
    }

    pub fn from_env() -> Result<Self, IdentityError> {
        Self::from_env_lookup(|key| env::var(key).ok())
    }

    pub fn from_env_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IdentityError> {
        let raw = lookup("PROFILE_DEV_ACCOUNT")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_DEV_ACCOUNT.to_string());
        let account = AccountAddress::new(&raw)
            .map_err(|v| IdentityError::Unavailable(format!("PROFILE_DEV_ACCOUNT: {v}")))?;
        Ok(Self::new(account))
    }

    pub fn account(&self) -> AccountAddress {
        lock(&self.account).clone()
    }

    /// Switches the wallet account. A live session follows the new address.
    pub fn switch_account(&self, account: AccountAddress) {
        *lock(&self.account) = account.clone();
        if self.current.borrow().logged_in {
            self.current.send_replace(Identity::logged_in(account));
        }
    }

    /// The next `log_in` or `sign_up` fails with `IdentityError::Rejected(reason)`.
    pub fn reject_next(&self, reason: impl Into<String>) {
        *lock(&self.reject_next) = Some(reason.into());
    }

    fn authenticate(&self, flow: &'static str) -> Result<(), IdentityError> {
        if let Some(reason) = lock(&self.reject_next).take() {
            tracing::warn!(flow, %reason, "loopback wallet rejected authentication");
            return Err(IdentityError::Rejected(reason));
        }
        let account = self.account();
        tracing::info!(flow, address = %account, "loopback wallet authenticated");
        self.current.send_replace(Identity::logged_in(account));
        Ok(())
    }
}

#[async_trait]
impl IdentityProvider for LoopbackIdentityProvider {
    fn subscribe_current_user(&self) -> watch::Receiver<Identity> {
        self.current.subscribe()
    }

    async fn log_in(&self) -> Result<(), IdentityError> {
        self.authenticate("log_in")
    }

    async fn sign_up(&self) -> Result<(), IdentityError> {
        self.authenticate("sign_up")
    }

    async fn unauthenticate(&self) -> Result<(), IdentityError> {
        self.current.send_replace(Identity::anonymous());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn at_identity_provider_01_login_and_logout_publish() {
        let provider = LoopbackIdentityProvider::new(AccountAddress::new(DEFAULT_DEV_ACCOUNT).unwrap());
        let rx = provider.subscribe_current_user();
        assert!(rx.borrow().is_anonymous());
        provider.log_in().await.unwrap();
        assert_eq!(
            rx.borrow().active_address().map(|a| a.as_str().to_string()),
            Some(DEFAULT_DEV_ACCOUNT.to_string())
        );
        provider.unauthenticate().await.unwrap();
        assert!(rx.borrow().is_anonymous());
    }

    #[tokio::test]
    async fn at_identity_provider_02_rejection_leaves_identity_anonymous() {
        let provider = LoopbackIdentityProvider::new(AccountAddress::new(DEFAULT_DEV_ACCOUNT).unwrap());
        provider.reject_next("user closed the wallet");
        assert!(matches!(provider.sign_up().await, Err(IdentityError::Rejected(_))));
        assert!(provider.subscribe_current_user().borrow().is_anonymous());
        assert!(provider.sign_up().await.is_ok());
    }

    #[test]
    fn at_identity_provider_03_env_lookup_defaults_and_validates() {
        let empty: BTreeMap<&str, String> = BTreeMap::new();
        let p = LoopbackIdentityProvider::from_env_lookup(|k| empty.get(k).cloned()).unwrap();
        assert_eq!(p.account().as_str(), DEFAULT_DEV_ACCOUNT);

        let bad = BTreeMap::from([("PROFILE_DEV_ACCOUNT", "not-an-address".to_string())]);
        assert!(LoopbackIdentityProvider::from_env_lookup(|k| bad.get(k).cloned()).is_err());
    }
}
