//! Provider machine context
//!
//! [`ProviderFsm`] owns the current state of one provider and everything the
//! states need around it: session fields, backend, store, logger and diagram
//! mapper. It is the only place where states are swapped.

use super::{
    AuthEvent, Credentials, EntryContext, HandlerContext, ProviderId, ProviderState, Session,
    StateTag, Transition,
};
use crate::backend::AuthBackend;
use crate::diagram::{DiagramMapper, HighlightSink};
use crate::log_sink::{LogSink, Logger};
use crate::store::{StateStore, credential_key, state_key};
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Callback enabling (`true`) or disabling the login control of a provider
pub type LoginButton = Arc<dyn Fn(ProviderId, bool) + Send + Sync>;

/// Where an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// GUI glue, backend listener or boot probe
    External,
    /// Produced by an entry action
    FollowUp,
}

pub struct ProviderFsm<S: ProviderState> {
    provider: ProviderId,
    current: S,
    session: Session,
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn StateStore>,
    state_key: String,
    logger: Logger,
    login_button: Option<LoginButton>,
    diagram: DiagramMapper,
    is_setup: bool,
}

impl<S: ProviderState> ProviderFsm<S> {
    pub fn new(
        provider: ProviderId,
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            provider,
            current: S::initial(),
            session: Session::default(),
            backend,
            store,
            state_key: state_key(provider),
            logger: Logger::new(provider),
            login_button: None,
            diagram: DiagramMapper::new(provider),
            is_setup: false,
        }
    }

    pub fn with_session(mut self, session: Session) -> Self {
        self.session = session;
        self
    }

    pub fn with_log_sink(mut self, sink: Option<LogSink>) -> Self {
        self.logger = self.logger.with_sink(sink);
        self
    }

    pub fn with_login_button(mut self, button: Option<LoginButton>) -> Self {
        self.login_button = button;
        self
    }

    pub fn with_highlight_class(mut self, class: impl Into<String>) -> Self {
        self.diagram = self.diagram.with_highlight_class(class);
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn current(&self) -> &S {
        &self.current
    }

    pub fn state_id(&self) -> S::Id {
        self.current.id()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn diagram(&self) -> &DiagramMapper {
        &self.diagram
    }

    pub fn is_setup(&self) -> bool {
        self.is_setup
    }

    /// Identifier found in the store, `None` when absent or unrecognized
    pub fn persisted_id(&self) -> Option<S::Id> {
        self.store
            .get(&self.state_key)
            .and_then(|tag| S::Id::parse(&tag))
    }

    /// Restore persisted state, then run the boot probe. Runs once.
    pub async fn setup(&mut self) -> Result<()> {
        if self.is_setup {
            self.logger
                .debug(self.state_id().as_str(), "Setup already done, skipping");
            return Ok(());
        }
        self.is_setup = true;

        let restored = self.restore_persisted();
        self.logger
            .info(restored.as_str(), format!("Restored {} machine", self.provider));
        if self.current.recover().is_some() {
            self.fall_back("Interrupted by a reload");
        }

        self.handle(S::boot_probe()).await
    }

    /// Rebuild the current state from the store without running entry actions
    pub fn restore_persisted(&mut self) -> S::Id {
        if !self.session.has_credential()
            && let Some(credential) = self.store.get(&credential_key(self.provider))
        {
            self.session.credential = credential;
        }

        let id = match self.store.get(&self.state_key) {
            Some(tag) => S::Id::parse(&tag).unwrap_or_else(|| {
                self.logger.debug(
                    &tag,
                    format!("Unrecognized persisted state '{}', starting over", tag),
                );
                S::initial().id()
            }),
            None => S::initial().id(),
        };

        self.current = S::restore(id, &self.session);
        self.diagram.enqueue(id.as_str());
        self.render_login_button();
        id
    }

    /// Pick up changes made to the store behind our back (cleared session,
    /// another process sharing the store)
    fn reconcile_with_store(&mut self) {
        let persisted = self.persisted_id().unwrap_or_else(|| S::initial().id());
        let current = self.current.id();
        if persisted != current {
            self.logger.debug(
                current.as_str(),
                format!("Store holds {}, reloading", persisted),
            );
            self.current = S::restore(persisted, &self.session);
            self.diagram.enqueue(persisted.as_str());
        }
    }

    fn override_for(&self, event: &AuthEvent) -> Option<S> {
        if event.is_credential_found() {
            Some(S::signed_in())
        } else if event.is_signed_out() {
            Some(S::initial())
        } else {
            None
        }
    }

    fn render_login_button(&self) {
        if let Some(button) = &self.login_button {
            button(self.provider, self.current.accepts_input());
        }
    }

    /// Leave an in-flight state whose pending call will never settle it,
    /// then bring the login control back in line with the current state
    fn fall_back(&mut self, reason: &str) {
        if let Some(fallback) = self.current.recover() {
            let from = self.current.id();
            let to = fallback.id();
            self.logger
                .warn(from.as_str(), format!("{} in {}, falling back to {}", reason, from, to));
            if let Err(e) = self.store.set(&self.state_key, to.as_str()) {
                self.logger
                    .warn(to.as_str(), format!("Failed to persist {}: {}", to, e));
            }
            self.diagram.enqueue(to.as_str());
            self.current = fallback;
        }
        self.render_login_button();
    }

    /// Feed an event to the machine and run it until it settles
    pub async fn handle(&mut self, event: AuthEvent) -> Result<()> {
        self.reconcile_with_store();
        if event.is_empty() {
            self.render_login_button();
            return Ok(());
        }

        let mut pending = Some((event, Origin::External));
        while let Some((event, origin)) = pending.take() {
            let decision = match self.override_for(&event) {
                Some(forced) => {
                    self.logger.info(
                        self.state_id().as_str(),
                        format!("Backend reports {}, overriding", event.actions().join("+")),
                    );
                    Transition::Next(forced)
                }
                None => {
                    let ctx = HandlerContext {
                        provider: self.provider,
                        session: &self.session,
                        backend: self.backend.as_ref(),
                    };
                    self.current.handle(&event, &ctx)
                }
            };

            match decision {
                Transition::Stay => {
                    self.logger.debug(
                        self.state_id().as_str(),
                        format!("{:?} left the state unchanged", event.actions()),
                    );
                }
                Transition::Invalid(action) => {
                    let state = self.state_id();
                    match origin {
                        Origin::External => self.logger.warn(
                            state.as_str(),
                            format!("Invalid action '{}' for state {}", action, state),
                        ),
                        Origin::FollowUp => {
                            self.logger.error(
                                state.as_str(),
                                format!("Entry action produced '{}' which {} cannot handle", action, state),
                            );
                            self.fall_back("Unhandled follow-up");
                            return Err(Error::invalid_transition(self.provider, state, action));
                        }
                    }
                }
                Transition::Next(next) => match self.transition_to(next).await {
                    Ok(follow_up) => {
                        pending = follow_up.map(|follow_up| (follow_up, Origin::FollowUp));
                    }
                    Err(e) => {
                        self.fall_back("Transition failed");
                        return Err(e);
                    }
                },
            }
        }

        self.render_login_button();
        Ok(())
    }

    /// Swap in `next` and run its entry action.
    ///
    /// Moving to a state with the current identifier changes nothing: no store
    /// write, no diagram update, no entry action. Returns the follow-up event
    /// produced by the entry action, if any.
    pub async fn transition_to(&mut self, next: S) -> Result<Option<AuthEvent>> {
        let from = self.current.id();
        let to = next.id();
        if from == to {
            self.logger
                .debug(from.as_str(), format!("Already in {}, nothing to do", to));
            return Ok(None);
        }

        self.store.set(&self.state_key, to.as_str())?;
        self.diagram.enqueue(to.as_str());
        self.logger.info(to.as_str(), format!("{} -> {}", from, to));
        self.current = next;
        self.render_login_button();

        let ctx = EntryContext {
            provider: self.provider,
            session: &self.session,
            backend: self.backend.as_ref(),
            store: self.store.as_ref(),
            logger: &self.logger,
        };
        Ok(self.current.on_enter(&ctx).await)
    }

    /// Erase everything this machine persisted
    pub fn clear_persisted(&mut self) -> Result<()> {
        self.store.remove(&self.state_key)?;
        self.store.remove(&credential_key(self.provider))?;
        self.logger
            .info(self.state_id().as_str(), "Persisted state cleared");
        Ok(())
    }

    /// The diagram resource is loaded
    pub fn attach_diagram(&mut self, sink: Box<dyn HighlightSink>) -> Result<()> {
        self.diagram.on_ready(sink)
    }

    pub fn status(&self) -> MachineStatus {
        MachineStatus {
            provider: self.provider,
            state: self.state_id().as_str().to_string(),
            persisted: self.store.get(&self.state_key),
            accepts_input: self.current.accepts_input(),
            highlighted_box: self.diagram.highlighted_box().map(str::to_string),
            highlighted_arrow: self.diagram.highlighted_arrow().map(str::to_string),
        }
    }
}

/// Snapshot of a machine for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStatus {
    pub provider: ProviderId,
    pub state: String,
    pub persisted: Option<String>,
    pub accepts_input: bool,
    pub highlighted_box: Option<String>,
    pub highlighted_arrow: Option<String>,
}

/// Object-safe view of a provider machine, used by the coordinator
#[async_trait]
pub trait Machine: Send {
    fn provider(&self) -> ProviderId;

    async fn setup(&mut self) -> Result<()>;

    async fn handle(&mut self, event: AuthEvent) -> Result<()>;

    fn clear_persisted(&mut self) -> Result<()>;

    fn set_credentials(&mut self, credentials: &Credentials);

    fn attach_diagram(&mut self, sink: Box<dyn HighlightSink>) -> Result<()>;

    fn diagram(&self) -> &DiagramMapper;

    fn status(&self) -> MachineStatus;
}

#[async_trait]
impl<S: ProviderState> Machine for ProviderFsm<S> {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    async fn setup(&mut self) -> Result<()> {
        ProviderFsm::setup(self).await
    }

    async fn handle(&mut self, event: AuthEvent) -> Result<()> {
        ProviderFsm::handle(self, event).await
    }

    fn clear_persisted(&mut self) -> Result<()> {
        ProviderFsm::clear_persisted(self)
    }

    fn set_credentials(&mut self, credentials: &Credentials) {
        self.session.credential = credentials.email.trim().to_string();
        self.session.secret = credentials.password.clone();
        self.session.use_link = credentials.use_link;
    }

    fn attach_diagram(&mut self, sink: Box<dyn HighlightSink>) -> Result<()> {
        ProviderFsm::attach_diagram(self, sink)
    }

    fn diagram(&self) -> &DiagramMapper {
        &self.diagram
    }

    fn status(&self) -> MachineStatus {
        ProviderFsm::status(self)
    }
}
