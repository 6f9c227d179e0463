//! Identity backend abstraction
//!
//! The machines never talk to an identity provider SDK directly. Everything they
//! need from it goes through the [`AuthBackend`] trait, so the SDK can be swapped
//! for the in-memory [`mock::MockBackend`] in tests and in the CLI.

use crate::fsm::ProviderId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mock;

pub use mock::{BackendCall, MockBackend, MockSettings, RedirectOutcome};

/// A signed-in user as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub email: Option<String>,
    pub provider: ProviderId,
    pub display_name: Option<String>,
}

impl UserRecord {
    pub fn new(uid: impl Into<String>, provider: ProviderId) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            provider,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Out-of-band notification from the backend's global auth-state listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStateChange {
    SignedIn(UserRecord),
    SignedOut,
}

/// Errors reported by the identity backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Network or transport failure
    #[error("network failure: {0}")]
    Network(String),

    /// The credential was refused (malformed, unknown, blocked)
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// The sign-in link is expired, already used, or not a link at all
    #[error("invalid sign-in link: {0}")]
    InvalidLink(String),

    /// Provider-specific refusal
    #[error("{code}: {message}")]
    Rejected { code: String, message: String },
}

/// Callback registered with [`AuthBackend::subscribe_auth_state_changed`]
pub type AuthStateCallback = Box<dyn Fn(AuthStateChange) + Send + Sync>;

/// Handle to a registered auth-state listener.
///
/// The listener is removed when the handle is dropped or when
/// [`Subscription::unsubscribe`] is called.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Identity backend trait
///
/// Implementations wrap an identity provider SDK. Methods returning
/// `Result<_, BackendError>` are expected to be recovered by the machines;
/// they never bubble up to the coordinator's caller.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Send a sign-in link to the given address
    async fn send_link_credential(&self, address: &str) -> Result<(), BackendError>;

    /// Whether the given page URL is the landing of a sign-in link
    fn is_returning_link_url(&self, url: &str) -> bool;

    /// Finish a sign-in started with [`AuthBackend::send_link_credential`]
    async fn complete_link_sign_in(
        &self,
        address: &str,
        url: &str,
    ) -> Result<UserRecord, BackendError>;

    /// Sign in with an address and a password
    async fn sign_in_with_password(
        &self,
        address: &str,
        secret: &str,
    ) -> Result<UserRecord, BackendError>;

    /// Navigate away to the provider's consent page (fire and forget)
    fn redirect_to_provider(&self, provider: ProviderId);

    /// Result of a redirect sign-in, read after coming back from the provider.
    ///
    /// `Ok(None)` means the page load is not the return leg of a redirect.
    async fn redirect_result(
        &self,
        provider: ProviderId,
    ) -> Result<Option<UserRecord>, BackendError>;

    /// Register a global auth-state listener
    fn subscribe_auth_state_changed(&self, callback: AuthStateCallback) -> Subscription;

    /// Sign the current user out
    async fn sign_out(&self) -> Result<(), BackendError>;
}
