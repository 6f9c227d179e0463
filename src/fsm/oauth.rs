//! OAuth redirect machine, shared by Facebook, Google and GitHub.
//!
//! Signing in leaves the page for the provider's consent screen. The machine
//! persists `RedirectingToProvider` before navigating away, and its boot probe
//! on the next page load moves it on to reading the redirect result.

use super::{AuthEvent, EntryContext, HandlerContext, ProviderState, Session, StateTag, Transition};
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OAuthStateId {
    Idle,
    RedirectingToProvider,
    Authorizing,
    SignedIn,
    AuthFailed,
}

impl StateTag for OAuthStateId {
    fn all() -> &'static [Self] {
        &[
            OAuthStateId::Idle,
            OAuthStateId::RedirectingToProvider,
            OAuthStateId::Authorizing,
            OAuthStateId::SignedIn,
            OAuthStateId::AuthFailed,
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            OAuthStateId::Idle => "Idle",
            OAuthStateId::RedirectingToProvider => "RedirectingToProvider",
            OAuthStateId::Authorizing => "Authorizing",
            OAuthStateId::SignedIn => "SignedIn",
            OAuthStateId::AuthFailed => "AuthFailed",
        }
    }
}

impl fmt::Display for OAuthStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthState {
    Idle,
    RedirectingToProvider,
    Authorizing,
    SignedIn,
    AuthFailed,
}

#[async_trait]
impl ProviderState for OAuthState {
    type Id = OAuthStateId;

    fn id(&self) -> OAuthStateId {
        match self {
            OAuthState::Idle => OAuthStateId::Idle,
            OAuthState::RedirectingToProvider => OAuthStateId::RedirectingToProvider,
            OAuthState::Authorizing => OAuthStateId::Authorizing,
            OAuthState::SignedIn => OAuthStateId::SignedIn,
            OAuthState::AuthFailed => OAuthStateId::AuthFailed,
        }
    }

    fn initial() -> Self {
        OAuthState::Idle
    }

    fn signed_in() -> Self {
        OAuthState::SignedIn
    }

    fn restore(id: OAuthStateId, _session: &Session) -> Self {
        match id {
            OAuthStateId::Idle => OAuthState::Idle,
            OAuthStateId::RedirectingToProvider => OAuthState::RedirectingToProvider,
            OAuthStateId::Authorizing => OAuthState::Authorizing,
            OAuthStateId::SignedIn => OAuthState::SignedIn,
            OAuthStateId::AuthFailed => OAuthState::AuthFailed,
        }
    }

    fn boot_probe() -> AuthEvent {
        AuthEvent::redirect_return()
    }

    fn handle(&self, event: &AuthEvent, _ctx: &HandlerContext<'_>) -> Transition<Self> {
        match self {
            OAuthState::Idle if event.is_login() => {
                Transition::Next(OAuthState::RedirectingToProvider)
            }
            OAuthState::RedirectingToProvider if event.is_redirect_return() => {
                Transition::Next(OAuthState::Authorizing)
            }
            OAuthState::Authorizing if event.is_ok() => Transition::Next(OAuthState::SignedIn),
            OAuthState::Authorizing if event.error().is_some() => {
                Transition::Next(OAuthState::AuthFailed)
            }
            OAuthState::AuthFailed if event.is_login() => Transition::Next(OAuthState::Idle),
            OAuthState::SignedIn if event.is_logout() => Transition::Next(OAuthState::Idle),
            _ => event.unhandled(),
        }
    }

    async fn on_enter(&self, ctx: &EntryContext<'_>) -> Option<AuthEvent> {
        let state = self.id().as_str();
        match self {
            OAuthState::RedirectingToProvider => {
                ctx.logger.info(
                    state,
                    format!("Leaving for the {} consent page", ctx.provider.display_name()),
                );
                ctx.backend.redirect_to_provider(ctx.provider);
                None
            }
            OAuthState::Authorizing => match ctx.backend.redirect_result(ctx.provider).await {
                Ok(Some(user)) => {
                    ctx.logger.info(state, format!("Signed in as {}", user.uid));
                    Some(AuthEvent::ok())
                }
                Ok(None) => {
                    ctx.logger.warn(state, "No redirect result, sign-in abandoned");
                    Some(AuthEvent::failed("no redirect result"))
                }
                Err(e) => {
                    ctx.logger
                        .warn(state, format!("Redirect sign-in failed: {}", e));
                    Some(AuthEvent::failed(e.to_string()))
                }
            },
            _ => None,
        }
    }

    fn accepts_input(&self) -> bool {
        !matches!(
            self,
            OAuthState::RedirectingToProvider | OAuthState::Authorizing
        )
    }

    /// `RedirectingToProvider` is left alone: the boot probe resumes it.
    fn recover(&self) -> Option<Self> {
        match self {
            OAuthState::Authorizing => Some(OAuthState::AuthFailed),
            _ => None,
        }
    }
}
