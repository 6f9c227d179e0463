//! Provider state machines
//!
//! Every auth provider gets its own machine. A machine's states form a sum type
//! implementing [`ProviderState`]: `handle` is a pure decision over the current
//! state, the incoming [`AuthEvent`] and a read-only [`HandlerContext`], while
//! `on_enter` runs the entry action and may yield a follow-up event (usually
//! the outcome of a backend call) that is fed back into the same machine.
//!
//! States never call each other; all cross-state effects go through the
//! [`Transition`] they return.

use crate::backend::AuthBackend;
use crate::log_sink::Logger;
use crate::store::StateStore;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

pub mod context;
pub mod email;
pub mod oauth;

pub use context::{LoginButton, Machine, MachineStatus, ProviderFsm};
pub use email::{EmailState, EmailStateId};
pub use oauth::{OAuthState, OAuthStateId};

/// Supported auth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Email,
    Facebook,
    Google,
    Github,
}

impl ProviderId {
    /// All providers, in setup order
    pub const ALL: [ProviderId; 4] = [
        ProviderId::Email,
        ProviderId::Facebook,
        ProviderId::Google,
        ProviderId::Github,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Email => "email",
            ProviderId::Facebook => "facebook",
            ProviderId::Google => "google",
            ProviderId::Github => "github",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Email => "Email",
            ProviderId::Facebook => "Facebook",
            ProviderId::Google => "Google",
            ProviderId::Github => "GitHub",
        }
    }

    /// Whether the provider signs in through a redirect to a consent page
    pub fn is_oauth(&self) -> bool {
        !matches!(self, ProviderId::Email)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderId::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownProvider(s.to_string()))
    }
}

/// Input event handed to a machine.
///
/// A partial record: the GUI glue or the backend listener only sets the flags
/// it knows about. An event with nothing set is a no-op for every state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_clicked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_clicked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_clicked: Option<bool>,
    /// Boot probe: is the current page load the landing of a sign-in link?
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_sign_in_link: Option<bool>,
    /// Boot probe: are we back from the provider's consent page?
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirected_to_provider: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_credential_found_via_provider: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_out_user: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_reentry: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_ok: Option<bool>,
    /// Raw error payload of a failed backend call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_error: Option<String>,
}

fn is_set(flag: Option<bool>) -> bool {
    flag == Some(true)
}

impl AuthEvent {
    pub fn submit() -> Self {
        Self {
            submit_clicked: Some(true),
            ..Default::default()
        }
    }

    pub fn login() -> Self {
        Self {
            login_clicked: Some(true),
            ..Default::default()
        }
    }

    pub fn logout() -> Self {
        Self {
            logout_clicked: Some(true),
            ..Default::default()
        }
    }

    pub fn check_link() -> Self {
        Self {
            check_sign_in_link: Some(true),
            ..Default::default()
        }
    }

    pub fn redirect_return() -> Self {
        Self {
            redirected_to_provider: Some(true),
            ..Default::default()
        }
    }

    pub fn credential_found() -> Self {
        Self {
            user_credential_found_via_provider: Some(true),
            ..Default::default()
        }
    }

    pub fn signed_out() -> Self {
        Self {
            signed_out_user: Some(true),
            ..Default::default()
        }
    }

    pub fn reentry() -> Self {
        Self {
            prompt_reentry: Some(true),
            ..Default::default()
        }
    }

    pub fn ok() -> Self {
        Self {
            backend_ok: Some(true),
            ..Default::default()
        }
    }

    pub fn failed(payload: impl Into<String>) -> Self {
        Self {
            backend_error: Some(payload.into()),
            ..Default::default()
        }
    }

    pub fn is_submit(&self) -> bool {
        is_set(self.submit_clicked)
    }

    pub fn is_login(&self) -> bool {
        is_set(self.login_clicked)
    }

    pub fn is_logout(&self) -> bool {
        is_set(self.logout_clicked)
    }

    pub fn is_check_link(&self) -> bool {
        is_set(self.check_sign_in_link)
    }

    pub fn is_redirect_return(&self) -> bool {
        is_set(self.redirected_to_provider)
    }

    pub fn is_credential_found(&self) -> bool {
        is_set(self.user_credential_found_via_provider)
    }

    pub fn is_signed_out(&self) -> bool {
        is_set(self.signed_out_user)
    }

    pub fn is_reentry(&self) -> bool {
        is_set(self.prompt_reentry)
    }

    pub fn is_ok(&self) -> bool {
        is_set(self.backend_ok)
    }

    pub fn error(&self) -> Option<&str> {
        self.backend_error.as_deref()
    }

    /// Names of the flags that are set, in declaration order
    pub fn actions(&self) -> Vec<&'static str> {
        let flags = [
            (self.is_submit(), "submit_clicked"),
            (self.is_login(), "login_clicked"),
            (self.is_logout(), "logout_clicked"),
            (self.is_check_link(), "check_sign_in_link"),
            (self.is_redirect_return(), "redirected_to_provider"),
            (self.is_credential_found(), "user_credential_found_via_provider"),
            (self.is_signed_out(), "signed_out_user"),
            (self.is_reentry(), "prompt_reentry"),
            (self.is_ok(), "backend_ok"),
            (self.backend_error.is_some(), "backend_error"),
        ];
        flags
            .into_iter()
            .filter_map(|(set, name)| set.then_some(name))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.actions().is_empty()
    }

    /// Only boot probes are set
    fn is_probe_only(&self) -> bool {
        let actions = self.actions();
        !actions.is_empty()
            && actions
                .iter()
                .all(|a| matches!(*a, "check_sign_in_link" | "redirected_to_provider"))
    }

    /// Decision for an event the current state has no handler for
    pub fn unhandled<S>(&self) -> Transition<S> {
        if self.is_empty() || self.is_probe_only() {
            Transition::Stay
        } else {
            Transition::Invalid(self.actions().join("+"))
        }
    }
}

/// Session fields shared by every state of a machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Email address (or other provider-specific identifier)
    pub credential: String,
    /// Password, only used when `use_link` is false
    pub secret: String,
    /// Sign in through an emailed link instead of a password
    pub use_link: bool,
    /// URL of the current page load
    pub current_url: String,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            credential: String::new(),
            secret: String::new(),
            use_link: true,
            current_url: String::new(),
        }
    }
}

impl Session {
    pub fn with_current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = url.into();
        self
    }

    pub fn has_credential(&self) -> bool {
        !self.credential.trim().is_empty()
    }

    pub fn has_secret(&self) -> bool {
        !self.secret.is_empty()
    }
}

/// Form input handed over by the GUI glue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_use_link")]
    pub use_link: bool,
}

fn default_use_link() -> bool {
    true
}

impl Credentials {
    pub fn link(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: String::new(),
            use_link: true,
        }
    }

    pub fn password(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            use_link: false,
        }
    }
}

/// Identifier of a state, persisted as its variant name
pub trait StateTag:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Every identifier, in declaration order
    fn all() -> &'static [Self];

    fn as_str(&self) -> &'static str;

    fn parse(tag: &str) -> Option<Self> {
        Self::all().iter().copied().find(|id| id.as_str() == tag)
    }
}

/// Outcome of a state's event handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<S> {
    /// Event understood, nothing to do
    Stay,
    /// Move to the given state (a state with the same identifier is a no-op)
    Next(S),
    /// The state has no response for this event
    Invalid(String),
}

/// Read-only view handed to `ProviderState::handle`
pub struct HandlerContext<'a> {
    pub provider: ProviderId,
    pub session: &'a Session,
    pub backend: &'a dyn AuthBackend,
}

/// View handed to `ProviderState::on_enter`
pub struct EntryContext<'a> {
    pub provider: ProviderId,
    pub session: &'a Session,
    pub backend: &'a dyn AuthBackend,
    pub store: &'a dyn StateStore,
    pub logger: &'a Logger,
}

/// Behaviour of one machine's states
#[async_trait]
pub trait ProviderState: Clone + fmt::Debug + Send + Sync + 'static {
    type Id: StateTag;

    fn id(&self) -> Self::Id;

    /// Default state, also the target of a backend sign-out
    fn initial() -> Self;

    /// Target of a backend-detected sign-in
    fn signed_in() -> Self;

    /// Rebuild a state from its persisted identifier
    fn restore(id: Self::Id, session: &Session) -> Self;

    /// Event dispatched once at setup to detect a returning redirect or link
    fn boot_probe() -> AuthEvent;

    fn handle(&self, event: &AuthEvent, ctx: &HandlerContext<'_>) -> Transition<Self>;

    /// Entry action; the returned event is handled next by the same machine
    async fn on_enter(&self, _ctx: &EntryContext<'_>) -> Option<AuthEvent> {
        None
    }

    /// Whether the login control should be enabled while this state is current
    fn accepts_input(&self) -> bool;

    /// Where an in-flight state goes when its pending call can no longer
    /// settle it (restored after a reload, failed transition). `None` for
    /// states that accept input or resume through their boot probe.
    fn recover(&self) -> Option<Self> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!("email".parse::<ProviderId>().unwrap(), ProviderId::Email);
        assert_eq!("GitHub".parse::<ProviderId>().unwrap(), ProviderId::Github);
        assert!(matches!(
            "myspace".parse::<ProviderId>(),
            Err(Error::UnknownProvider(_))
        ));
        assert!(ProviderId::Facebook.is_oauth());
        assert!(!ProviderId::Email.is_oauth());
    }

    #[test]
    fn test_empty_event() {
        let event = AuthEvent::default();
        assert!(event.is_empty());
        assert_eq!(event.unhandled::<()>(), Transition::Stay);

        let event = AuthEvent {
            submit_clicked: Some(false),
            ..Default::default()
        };
        assert!(event.is_empty());
    }

    #[test]
    fn test_unhandled_event() {
        assert_eq!(
            AuthEvent::logout().unhandled::<()>(),
            Transition::Invalid("logout_clicked".to_string())
        );
        assert_eq!(AuthEvent::check_link().unhandled::<()>(), Transition::Stay);
        assert_eq!(AuthEvent::redirect_return().unhandled::<()>(), Transition::Stay);
    }

    #[test]
    fn test_event_wire_format() {
        let event: AuthEvent =
            serde_json::from_str(r#"{"userCredentialFoundViaProvider": true}"#).unwrap();
        assert!(event.is_credential_found());
        assert_eq!(event.actions(), vec!["user_credential_found_via_provider"]);

        let json = serde_json::to_string(&AuthEvent::failed("boom")).unwrap();
        assert_eq!(json, r#"{"backendError":"boom"}"#);
    }

    #[test]
    fn test_session_defaults_to_link_sign_in() {
        let session = Session::default();
        assert!(session.use_link);
        assert!(!session.has_credential());
    }
}
