//! Mock backend for testing and development
//!
//! An in-memory identity backend whose behaviour is driven by [`MockSettings`].
//! Every call is recorded so tests can assert on the side effects of entry
//! actions.

use super::{
    AuthBackend, AuthStateCallback, AuthStateChange, BackendError, Subscription, UserRecord,
};
use crate::fsm::ProviderId;
use crate::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// What the mock reports when a redirect result is read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RedirectOutcome {
    #[default]
    Success,
    /// The user closed the consent page, no result
    Cancel,
    Error,
}

/// Mock behaviour, usually read from the `[mock]` config section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockSettings {
    /// Addresses the backend refuses
    #[serde(default)]
    pub rejected_credentials: Vec<String>,

    /// Pattern a page URL must match to be treated as a sign-in link
    #[serde(default = "default_link_url_pattern")]
    pub link_url_pattern: String,

    #[serde(default)]
    pub redirect_outcome: RedirectOutcome,

    /// When set, password sign-in only succeeds with this password
    #[serde(default)]
    pub accepted_password: Option<String>,

    /// Fail every network call
    #[serde(default)]
    pub offline: bool,
}

fn default_link_url_pattern() -> String {
    r"[?&]oobCode=[^&]+".to_string()
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            rejected_credentials: Vec::new(),
            link_url_pattern: default_link_url_pattern(),
            redirect_outcome: RedirectOutcome::default(),
            accepted_password: None,
            offline: false,
        }
    }
}

/// A call received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    SendLink(String),
    CompleteLink { address: String, url: String },
    PasswordSignIn(String),
    Redirect(ProviderId),
    RedirectResult(ProviderId),
    SignOut,
}

type Listeners = Arc<Mutex<Vec<(u64, AuthStateCallback)>>>;

/// In-memory identity backend
pub struct MockBackend {
    settings: MockSettings,
    link_pattern: Regex,
    listeners: Listeners,
    next_listener_id: AtomicU64,
    current_user: Mutex<Option<UserRecord>>,
    calls: Mutex<Vec<BackendCall>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockBackend {
    pub fn new(settings: MockSettings) -> Result<Self> {
        let link_pattern = Regex::new(&settings.link_url_pattern).map_err(|e| {
            Error::config(format!(
                "Invalid link URL pattern {:?}: {}",
                settings.link_url_pattern, e
            ))
        })?;

        Ok(Self {
            settings,
            link_pattern,
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            current_user: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Calls received so far, oldest first
    pub fn calls(&self) -> Vec<BackendCall> {
        lock(&self.calls).clone()
    }

    pub fn current_user(&self) -> Option<UserRecord> {
        lock(&self.current_user).clone()
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// Simulate an out-of-band auth-state change (another tab, token expiry, ...)
    pub fn emit(&self, change: AuthStateChange) {
        *lock(&self.current_user) = match &change {
            AuthStateChange::SignedIn(user) => Some(user.clone()),
            AuthStateChange::SignedOut => None,
        };
        for (_, callback) in lock(&self.listeners).iter() {
            callback(change.clone());
        }
    }

    fn record(&self, call: BackendCall) {
        lock(&self.calls).push(call);
    }

    fn check_online(&self) -> std::result::Result<(), BackendError> {
        if self.settings.offline {
            return Err(BackendError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn check_address(&self, address: &str) -> std::result::Result<(), BackendError> {
        if address.trim().is_empty() {
            return Err(BackendError::InvalidCredential("missing email".to_string()));
        }
        if !address.contains('@') {
            return Err(BackendError::InvalidCredential(format!(
                "badly formatted email: {}",
                address
            )));
        }
        if self.settings.rejected_credentials.iter().any(|r| r == address) {
            return Err(BackendError::InvalidCredential(format!(
                "credential refused: {}",
                address
            )));
        }
        Ok(())
    }

    fn sign_in(&self, user: UserRecord) -> UserRecord {
        self.emit(AuthStateChange::SignedIn(user.clone()));
        user
    }
}

#[async_trait]
impl AuthBackend for MockBackend {
    async fn send_link_credential(&self, address: &str) -> std::result::Result<(), BackendError> {
        self.record(BackendCall::SendLink(address.to_string()));
        self.check_online()?;
        self.check_address(address)?;
        tracing::debug!("Mock backend sent sign-in link to {}", address);
        Ok(())
    }

    fn is_returning_link_url(&self, url: &str) -> bool {
        self.link_pattern.is_match(url)
    }

    async fn complete_link_sign_in(
        &self,
        address: &str,
        url: &str,
    ) -> std::result::Result<UserRecord, BackendError> {
        self.record(BackendCall::CompleteLink {
            address: address.to_string(),
            url: url.to_string(),
        });
        self.check_online()?;
        if !self.is_returning_link_url(url) {
            return Err(BackendError::InvalidLink(url.to_string()));
        }
        self.check_address(address)?;

        let user = UserRecord::new(format!("mock-email-{}", address), ProviderId::Email)
            .with_email(address);
        Ok(self.sign_in(user))
    }

    async fn sign_in_with_password(
        &self,
        address: &str,
        secret: &str,
    ) -> std::result::Result<UserRecord, BackendError> {
        self.record(BackendCall::PasswordSignIn(address.to_string()));
        self.check_online()?;
        self.check_address(address)?;
        if let Some(expected) = &self.settings.accepted_password
            && expected != secret
        {
            return Err(BackendError::InvalidCredential("wrong password".to_string()));
        }

        let user = UserRecord::new(format!("mock-email-{}", address), ProviderId::Email)
            .with_email(address);
        Ok(self.sign_in(user))
    }

    fn redirect_to_provider(&self, provider: ProviderId) {
        tracing::debug!("Mock backend redirecting to {}", provider);
        self.record(BackendCall::Redirect(provider));
    }

    async fn redirect_result(
        &self,
        provider: ProviderId,
    ) -> std::result::Result<Option<UserRecord>, BackendError> {
        self.record(BackendCall::RedirectResult(provider));
        self.check_online()?;
        match self.settings.redirect_outcome {
            RedirectOutcome::Success => {
                let user = UserRecord::new(format!("mock-{}-user", provider), provider)
                    .with_display_name(format!("{} user", provider.display_name()));
                Ok(Some(self.sign_in(user)))
            }
            RedirectOutcome::Cancel => Ok(None),
            RedirectOutcome::Error => Err(BackendError::Rejected {
                code: "account-exists-with-different-credential".to_string(),
                message: format!("{} account already linked elsewhere", provider),
            }),
        }
    }

    fn subscribe_auth_state_changed(&self, callback: AuthStateCallback) -> Subscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.listeners).push((id, callback));

        let listeners = self.listeners.clone();
        Subscription::new(move || {
            lock(&listeners).retain(|(listener_id, _)| *listener_id != id);
        })
    }

    async fn sign_out(&self) -> std::result::Result<(), BackendError> {
        self.record(BackendCall::SignOut);
        self.check_online()?;
        self.emit(AuthStateChange::SignedOut);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_link_url_detection() {
        let backend = MockBackend::new(MockSettings::default()).unwrap();
        assert!(backend.is_returning_link_url("https://app.test/?mode=signIn&oobCode=abc"));
        assert!(!backend.is_returning_link_url("https://app.test/"));
        assert!(!backend.is_returning_link_url("https://app.test/?oobCode="));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let settings = MockSettings {
            link_url_pattern: "([".to_string(),
            ..Default::default()
        };
        assert!(matches!(MockBackend::new(settings), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_rejected_credential() {
        let settings = MockSettings {
            rejected_credentials: vec!["x@bad".to_string()],
            ..Default::default()
        };
        let backend = MockBackend::new(settings).unwrap();

        assert!(matches!(
            backend.send_link_credential("x@bad").await,
            Err(BackendError::InvalidCredential(_))
        ));
        assert!(backend.send_link_credential("y@good").await.is_ok());
        assert_eq!(
            backend.calls(),
            vec![
                BackendCall::SendLink("x@bad".to_string()),
                BackendCall::SendLink("y@good".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_listeners_receive_changes_until_unsubscribed() {
        let backend = MockBackend::new(MockSettings::default()).unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let sub = backend.subscribe_auth_state_changed(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        backend.sign_out().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sub.unsubscribe();
        assert_eq!(backend.listener_count(), 0);
        backend.sign_out().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redirect_outcomes() {
        let backend = MockBackend::new(MockSettings::default()).unwrap();
        let user = backend.redirect_result(ProviderId::Github).await.unwrap();
        assert_eq!(user.map(|u| u.provider), Some(ProviderId::Github));
        assert_eq!(
            backend.current_user().map(|u| u.uid),
            Some("mock-github-user".to_string())
        );

        let backend = MockBackend::new(MockSettings {
            redirect_outcome: RedirectOutcome::Cancel,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(backend.redirect_result(ProviderId::Google).await, Ok(None));
    }

    #[tokio::test]
    async fn test_offline_backend() {
        let backend = MockBackend::new(MockSettings {
            offline: true,
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(
            backend.sign_out().await,
            Err(BackendError::Network(_))
        ));
    }
}
