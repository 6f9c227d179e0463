//! Email machine
//!
//! Drives both the email-link flow (send a link, leave, come back through the
//! link) and the plain password flow. The link flow has to survive the page
//! being closed and reopened, possibly on another device: the address is
//! remembered in the store when the link is sent, and its presence on return
//! decides between the same-context and different-context branches.

use super::{
    AuthEvent, EntryContext, HandlerContext, ProviderState, Session, StateTag, Transition,
};
use crate::store::credential_key;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmailStateId {
    Idle,
    SubmittingToBackend,
    WaitingForUserToClickLink,
    BadCredential,
    LinkOpenedSameContext,
    LinkOpenedDifferentContext,
    WaitingForReenteredCredential,
    Authorizing,
    SignedIn,
    AuthFailed,
}

impl StateTag for EmailStateId {
    fn all() -> &'static [Self] {
        use EmailStateId::*;
        &[
            Idle,
            SubmittingToBackend,
            WaitingForUserToClickLink,
            BadCredential,
            LinkOpenedSameContext,
            LinkOpenedDifferentContext,
            WaitingForReenteredCredential,
            Authorizing,
            SignedIn,
            AuthFailed,
        ]
    }

    fn as_str(&self) -> &'static str {
        match self {
            EmailStateId::Idle => "Idle",
            EmailStateId::SubmittingToBackend => "SubmittingToBackend",
            EmailStateId::WaitingForUserToClickLink => "WaitingForUserToClickLink",
            EmailStateId::BadCredential => "BadCredential",
            EmailStateId::LinkOpenedSameContext => "LinkOpenedSameContext",
            EmailStateId::LinkOpenedDifferentContext => "LinkOpenedDifferentContext",
            EmailStateId::WaitingForReenteredCredential => "WaitingForReenteredCredential",
            EmailStateId::Authorizing => "Authorizing",
            EmailStateId::SignedIn => "SignedIn",
            EmailStateId::AuthFailed => "AuthFailed",
        }
    }
}

impl fmt::Display for EmailStateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailState {
    Idle,
    SubmittingToBackend,
    WaitingForUserToClickLink,
    /// `value` is the credential the backend refused
    BadCredential {
        value: String,
    },
    LinkOpenedSameContext,
    LinkOpenedDifferentContext,
    WaitingForReenteredCredential,
    Authorizing,
    SignedIn,
    AuthFailed,
}

/// Decide between the two link-landing states
fn check_sign_in_link(ctx: &HandlerContext<'_>) -> Transition<EmailState> {
    if !ctx.backend.is_returning_link_url(&ctx.session.current_url) {
        return Transition::Stay;
    }
    if ctx.session.has_credential() {
        Transition::Next(EmailState::LinkOpenedSameContext)
    } else {
        Transition::Next(EmailState::LinkOpenedDifferentContext)
    }
}

fn can_submit(session: &Session) -> bool {
    session.has_credential() && (session.use_link || session.has_secret())
}

/// Finish a link sign-in and report the outcome as a follow-up event
async fn complete_link(ctx: &EntryContext<'_>, state: EmailStateId) -> AuthEvent {
    let address = &ctx.session.credential;
    match ctx
        .backend
        .complete_link_sign_in(address, &ctx.session.current_url)
        .await
    {
        Ok(user) => {
            ctx.logger
                .info(state.as_str(), format!("Signed in as {}", user.uid));
            AuthEvent::ok()
        }
        Err(e) => {
            ctx.logger.warn(
                state.as_str(),
                format!("Could not complete link sign-in for {}: {}", address, e),
            );
            AuthEvent::failed(e.to_string())
        }
    }
}

#[async_trait]
impl ProviderState for EmailState {
    type Id = EmailStateId;

    fn id(&self) -> EmailStateId {
        match self {
            EmailState::Idle => EmailStateId::Idle,
            EmailState::SubmittingToBackend => EmailStateId::SubmittingToBackend,
            EmailState::WaitingForUserToClickLink => EmailStateId::WaitingForUserToClickLink,
            EmailState::BadCredential { .. } => EmailStateId::BadCredential,
            EmailState::LinkOpenedSameContext => EmailStateId::LinkOpenedSameContext,
            EmailState::LinkOpenedDifferentContext => EmailStateId::LinkOpenedDifferentContext,
            EmailState::WaitingForReenteredCredential => {
                EmailStateId::WaitingForReenteredCredential
            }
            EmailState::Authorizing => EmailStateId::Authorizing,
            EmailState::SignedIn => EmailStateId::SignedIn,
            EmailState::AuthFailed => EmailStateId::AuthFailed,
        }
    }

    fn initial() -> Self {
        EmailState::Idle
    }

    fn signed_in() -> Self {
        EmailState::SignedIn
    }

    fn restore(id: EmailStateId, session: &Session) -> Self {
        match id {
            EmailStateId::Idle => EmailState::Idle,
            EmailStateId::SubmittingToBackend => EmailState::SubmittingToBackend,
            EmailStateId::WaitingForUserToClickLink => EmailState::WaitingForUserToClickLink,
            EmailStateId::BadCredential => EmailState::BadCredential {
                value: session.credential.clone(),
            },
            EmailStateId::LinkOpenedSameContext => EmailState::LinkOpenedSameContext,
            EmailStateId::LinkOpenedDifferentContext => EmailState::LinkOpenedDifferentContext,
            EmailStateId::WaitingForReenteredCredential => {
                EmailState::WaitingForReenteredCredential
            }
            EmailStateId::Authorizing => EmailState::Authorizing,
            EmailStateId::SignedIn => EmailState::SignedIn,
            EmailStateId::AuthFailed => EmailState::AuthFailed,
        }
    }

    fn boot_probe() -> AuthEvent {
        AuthEvent::check_link()
    }

    fn handle(&self, event: &AuthEvent, ctx: &HandlerContext<'_>) -> Transition<Self> {
        match self {
            EmailState::Idle => {
                if event.is_submit() {
                    return if can_submit(ctx.session) {
                        Transition::Next(EmailState::SubmittingToBackend)
                    } else {
                        Transition::Stay
                    };
                }
                if event.is_check_link() {
                    return check_sign_in_link(ctx);
                }
            }
            EmailState::SubmittingToBackend => {
                if event.is_ok() {
                    return Transition::Next(if ctx.session.use_link {
                        EmailState::WaitingForUserToClickLink
                    } else {
                        EmailState::SignedIn
                    });
                }
                if event.error().is_some() {
                    return Transition::Next(EmailState::BadCredential {
                        value: ctx.session.credential.clone(),
                    });
                }
            }
            EmailState::WaitingForUserToClickLink => {
                // the user gave up on the link and starts over
                if event.is_submit() {
                    return Transition::Next(EmailState::Idle);
                }
                if event.is_check_link() {
                    return check_sign_in_link(ctx);
                }
            }
            EmailState::BadCredential { value } => {
                if event.is_submit() {
                    return if ctx.session.credential == *value {
                        Transition::Next(self.clone())
                    } else {
                        Transition::Next(EmailState::Idle)
                    };
                }
            }
            EmailState::LinkOpenedSameContext | EmailState::Authorizing => {
                if event.is_ok() {
                    return Transition::Next(EmailState::SignedIn);
                }
                if event.error().is_some() {
                    return Transition::Next(EmailState::AuthFailed);
                }
            }
            EmailState::LinkOpenedDifferentContext => {
                if event.is_reentry() {
                    return Transition::Next(EmailState::WaitingForReenteredCredential);
                }
            }
            EmailState::WaitingForReenteredCredential => {
                if event.is_submit() {
                    return if ctx.session.has_credential() {
                        Transition::Next(EmailState::Authorizing)
                    } else {
                        Transition::Stay
                    };
                }
            }
            EmailState::SignedIn => {
                if event.is_logout() {
                    return Transition::Next(EmailState::Idle);
                }
            }
            EmailState::AuthFailed => {
                if event.is_submit() {
                    return Transition::Next(EmailState::Idle);
                }
            }
        }
        event.unhandled()
    }

    async fn on_enter(&self, ctx: &EntryContext<'_>) -> Option<AuthEvent> {
        let state = self.id();
        match self {
            EmailState::SubmittingToBackend => {
                let address = &ctx.session.credential;
                if ctx.session.use_link {
                    match ctx.backend.send_link_credential(address).await {
                        Ok(()) => {
                            // needed to tell a same-device return from a different one
                            if let Err(e) = ctx.store.set(&credential_key(ctx.provider), address) {
                                ctx.logger.warn(
                                    state.as_str(),
                                    format!("Failed to remember {}: {}", address, e),
                                );
                            }
                            ctx.logger
                                .info(state.as_str(), format!("Sign-in link sent to {}", address));
                            Some(AuthEvent::ok())
                        }
                        Err(e) => {
                            ctx.logger.warn(
                                state.as_str(),
                                format!("Failed to send sign-in link to {}: {}", address, e),
                            );
                            Some(AuthEvent::failed(e.to_string()))
                        }
                    }
                } else {
                    match ctx
                        .backend
                        .sign_in_with_password(address, &ctx.session.secret)
                        .await
                    {
                        Ok(user) => {
                            ctx.logger
                                .info(state.as_str(), format!("Signed in as {}", user.uid));
                            Some(AuthEvent::ok())
                        }
                        Err(e) => {
                            ctx.logger.warn(
                                state.as_str(),
                                format!("Password sign-in failed for {}: {}", address, e),
                            );
                            Some(AuthEvent::failed(e.to_string()))
                        }
                    }
                }
            }
            EmailState::LinkOpenedSameContext | EmailState::Authorizing => {
                Some(complete_link(ctx, state).await)
            }
            EmailState::LinkOpenedDifferentContext => {
                ctx.logger.info(
                    state.as_str(),
                    "Sign-in link opened without a known address, asking for it again",
                );
                Some(AuthEvent::reentry())
            }
            EmailState::SignedIn => {
                if let Err(e) = ctx.store.remove(&credential_key(ctx.provider)) {
                    ctx.logger
                        .warn(state.as_str(), format!("Failed to forget credential: {}", e));
                }
                None
            }
            EmailState::BadCredential { value } => {
                ctx.logger
                    .info(state.as_str(), format!("Credential {} refused", value));
                None
            }
            _ => None,
        }
    }

    fn accepts_input(&self) -> bool {
        !matches!(
            self,
            EmailState::SubmittingToBackend
                | EmailState::LinkOpenedSameContext
                | EmailState::LinkOpenedDifferentContext
                | EmailState::Authorizing
        )
    }

    fn recover(&self) -> Option<Self> {
        match self {
            EmailState::SubmittingToBackend => Some(EmailState::Idle),
            EmailState::LinkOpenedSameContext
            | EmailState::LinkOpenedDifferentContext
            | EmailState::Authorizing => Some(EmailState::AuthFailed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockSettings};
    use crate::fsm::ProviderId;

    const LINK_URL: &str = "https://app.test/finish?mode=signIn&oobCode=abc123";

    fn decide(state: &EmailState, event: AuthEvent, session: &Session) -> Transition<EmailState> {
        let backend = MockBackend::new(MockSettings::default()).unwrap();
        let ctx = HandlerContext {
            provider: ProviderId::Email,
            session,
            backend: &backend,
        };
        state.handle(&event, &ctx)
    }

    fn session(credential: &str) -> Session {
        Session {
            credential: credential.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_identifiers_round_trip() {
        for id in EmailStateId::all() {
            assert_eq!(EmailStateId::parse(id.as_str()), Some(*id));
            assert_eq!(EmailState::restore(*id, &Session::default()).id(), *id);
        }
        assert_eq!(EmailStateId::parse("Bogus"), None);
    }

    #[test]
    fn test_idle_validates_fields_before_submitting() {
        let idle = EmailState::Idle;
        assert_eq!(
            decide(&idle, AuthEvent::submit(), &session("")),
            Transition::Stay
        );
        assert_eq!(
            decide(&idle, AuthEvent::submit(), &session("a@b.c")),
            Transition::Next(EmailState::SubmittingToBackend)
        );

        let password_without_secret = Session {
            use_link: false,
            ..session("a@b.c")
        };
        assert_eq!(
            decide(&idle, AuthEvent::submit(), &password_without_secret),
            Transition::Stay
        );
    }

    #[test]
    fn test_link_landing_depends_on_known_credential() {
        let known = session("a@b.c").with_current_url(LINK_URL);
        let unknown = session("").with_current_url(LINK_URL);

        assert_eq!(
            decide(&EmailState::Idle, AuthEvent::check_link(), &known),
            Transition::Next(EmailState::LinkOpenedSameContext)
        );
        assert_eq!(
            decide(&EmailState::Idle, AuthEvent::check_link(), &unknown),
            Transition::Next(EmailState::LinkOpenedDifferentContext)
        );
        assert_eq!(
            decide(
                &EmailState::WaitingForUserToClickLink,
                AuthEvent::check_link(),
                &known
            ),
            Transition::Next(EmailState::LinkOpenedSameContext)
        );
        assert_eq!(
            decide(&EmailState::Idle, AuthEvent::check_link(), &session("a@b.c")),
            Transition::Stay
        );
    }

    #[test]
    fn test_backend_outcome_while_submitting() {
        let state = EmailState::SubmittingToBackend;
        assert_eq!(
            decide(&state, AuthEvent::ok(), &session("a@b.c")),
            Transition::Next(EmailState::WaitingForUserToClickLink)
        );
        assert_eq!(
            decide(&state, AuthEvent::failed("refused"), &session("x@bad")),
            Transition::Next(EmailState::BadCredential {
                value: "x@bad".to_string()
            })
        );

        let password = Session {
            use_link: false,
            secret: "hunter2".to_string(),
            ..session("a@b.c")
        };
        assert_eq!(
            decide(&state, AuthEvent::ok(), &password),
            Transition::Next(EmailState::SignedIn)
        );
    }

    #[test]
    fn test_bad_credential_requires_a_change() {
        let state = EmailState::BadCredential {
            value: "x@bad".to_string(),
        };
        assert_eq!(
            decide(&state, AuthEvent::submit(), &session("x@bad")),
            Transition::Next(state.clone())
        );
        assert_eq!(
            decide(&state, AuthEvent::submit(), &session("y@good")),
            Transition::Next(EmailState::Idle)
        );
    }

    #[test]
    fn test_reentry_path() {
        assert_eq!(
            decide(
                &EmailState::LinkOpenedDifferentContext,
                AuthEvent::reentry(),
                &session("")
            ),
            Transition::Next(EmailState::WaitingForReenteredCredential)
        );
        assert_eq!(
            decide(
                &EmailState::WaitingForReenteredCredential,
                AuthEvent::submit(),
                &session("")
            ),
            Transition::Stay
        );
        assert_eq!(
            decide(
                &EmailState::WaitingForReenteredCredential,
                AuthEvent::submit(),
                &session("a@b.c")
            ),
            Transition::Next(EmailState::Authorizing)
        );
        assert_eq!(
            decide(&EmailState::Authorizing, AuthEvent::failed("expired"), &session("a@b.c")),
            Transition::Next(EmailState::AuthFailed)
        );
        assert_eq!(
            decide(&EmailState::AuthFailed, AuthEvent::submit(), &session("a@b.c")),
            Transition::Next(EmailState::Idle)
        );
    }

    #[test]
    fn test_unhandled_events_are_invalid() {
        assert_eq!(
            decide(&EmailState::Idle, AuthEvent::logout(), &session("")),
            Transition::Invalid("logout_clicked".to_string())
        );
        assert_eq!(
            decide(&EmailState::SignedIn, AuthEvent::ok(), &session("")),
            Transition::Invalid("backend_ok".to_string())
        );
        assert_eq!(
            decide(&EmailState::SignedIn, AuthEvent::check_link(), &session("")),
            Transition::Stay
        );
    }

    #[test]
    fn test_in_flight_states_disable_input() {
        assert!(EmailState::Idle.accepts_input());
        assert!(!EmailState::SubmittingToBackend.accepts_input());
        assert!(!EmailState::Authorizing.accepts_input());
        assert!(EmailState::AuthFailed.accepts_input());
    }

    #[test]
    fn test_every_in_flight_state_recovers_to_input() {
        for id in EmailStateId::all() {
            let state = EmailState::restore(*id, &Session::default());
            match state.recover() {
                Some(fallback) => {
                    assert!(!state.accepts_input(), "{} accepts input", id);
                    assert!(fallback.accepts_input(), "{} falls back to a disabled state", id);
                }
                None => assert!(state.accepts_input(), "{} has no way out", id),
            }
        }
        assert_eq!(EmailState::SubmittingToBackend.recover(), Some(EmailState::Idle));
        assert_eq!(EmailState::Authorizing.recover(), Some(EmailState::AuthFailed));
    }
}
