//! FSM coordinator
//!
//! Owns one machine per provider, translates high-level intents (log in, log
//! out, forget the session) into machine events, and relays the backend's
//! global auth-state notifications.

use crate::backend::{AuthBackend, AuthStateChange, Subscription};
use crate::diagram::HighlightSink;
use crate::fsm::{
    AuthEvent, Credentials, EmailState, LoginButton, Machine, MachineStatus, OAuthState,
    ProviderFsm, ProviderId, ProviderState, Session,
};
use crate::log_sink::LogSink;
use crate::store::StateStore;
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct CoordinatorBuilder {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn StateStore>,
    current_url: String,
    log_sink: Option<LogSink>,
    login_button: Option<LoginButton>,
    highlight_class: Option<String>,
}

impl CoordinatorBuilder {
    /// URL of the current page load, inspected by the boot probes
    pub fn current_url(mut self, url: impl Into<String>) -> Self {
        self.current_url = url.into();
        self
    }

    pub fn log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn login_button(mut self, button: LoginButton) -> Self {
        self.login_button = Some(button);
        self
    }

    pub fn highlight_class(mut self, class: impl Into<String>) -> Self {
        self.highlight_class = Some(class.into());
        self
    }

    fn configure<S: ProviderState>(&self, provider: ProviderId) -> Box<dyn Machine> {
        let mut fsm = ProviderFsm::<S>::new(provider, self.backend.clone(), self.store.clone())
            .with_session(Session::default().with_current_url(self.current_url.clone()))
            .with_log_sink(self.log_sink.clone())
            .with_login_button(self.login_button.clone());
        if let Some(class) = &self.highlight_class {
            fsm = fsm.with_highlight_class(class.clone());
        }
        Box::new(fsm)
    }

    pub fn build(self) -> Coordinator {
        let machines = ProviderId::ALL
            .into_iter()
            .map(|provider| match provider {
                ProviderId::Email => self.configure::<EmailState>(provider),
                _ => self.configure::<OAuthState>(provider),
            })
            .collect();

        Coordinator {
            machines,
            backend: self.backend,
            subscription: None,
            auth_changes: None,
        }
    }
}

pub struct Coordinator {
    machines: Vec<Box<dyn Machine>>,
    backend: Arc<dyn AuthBackend>,
    subscription: Option<Subscription>,
    auth_changes: Option<mpsc::UnboundedReceiver<AuthStateChange>>,
}

impl Coordinator {
    pub fn builder(backend: Arc<dyn AuthBackend>, store: Arc<dyn StateStore>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            backend,
            store,
            current_url: String::new(),
            log_sink: None,
            login_button: None,
            highlight_class: None,
        }
    }

    pub fn is_setup(&self) -> bool {
        self.subscription.is_some()
    }

    /// Set up every machine in order, then listen to the backend.
    ///
    /// Calling it again is a no-op.
    pub async fn setup(&mut self) -> Result<()> {
        if self.is_setup() {
            tracing::debug!("Coordinator already set up");
            return Ok(());
        }

        for machine in &mut self.machines {
            machine.setup().await?;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self
            .backend
            .subscribe_auth_state_changed(Box::new(move |change| {
                if tx.send(change).is_err() {
                    tracing::debug!("Auth state change dropped, coordinator is gone");
                }
            }));
        self.auth_changes = Some(rx);
        self.subscription = Some(subscription);

        tracing::info!("Coordinator ready with {} machines", self.machines.len());
        Ok(())
    }

    pub fn machine(&self, provider: ProviderId) -> Option<&dyn Machine> {
        self.machines
            .iter()
            .find(|m| m.provider() == provider)
            .map(|m| &**m)
    }

    fn machine_mut(&mut self, provider: ProviderId) -> Result<&mut Box<dyn Machine>> {
        self.machines
            .iter_mut()
            .find(|m| m.provider() == provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))
    }

    /// Route the backend notifications received so far. Returns how many
    /// were handled.
    pub async fn process_auth_changes(&mut self) -> Result<usize> {
        let mut changes = Vec::new();
        if let Some(rx) = self.auth_changes.as_mut() {
            while let Ok(change) = rx.try_recv() {
                changes.push(change);
            }
        }

        let count = changes.len();
        for change in changes {
            match change {
                AuthStateChange::SignedIn(user) => {
                    tracing::info!(provider = %user.provider, "Backend reports {} signed in", user.uid);
                    self.machine_mut(user.provider)?
                        .handle(AuthEvent::credential_found())
                        .await?;
                }
                AuthStateChange::SignedOut => {
                    tracing::info!("Backend reports signed out");
                    for machine in &mut self.machines {
                        machine.handle(AuthEvent::signed_out()).await?;
                    }
                }
            }
        }
        Ok(count)
    }

    /// Copy form input into the email machine's session
    pub fn set_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        self.machine_mut(ProviderId::Email)?
            .set_credentials(credentials);
        Ok(())
    }

    /// Dispatch an event to one machine
    pub async fn handle(&mut self, provider: ProviderId, event: AuthEvent) -> Result<()> {
        self.machine_mut(provider)?.handle(event).await?;
        self.process_auth_changes().await?;
        Ok(())
    }

    pub async fn login_with_provider(&mut self, provider: ProviderId) -> Result<()> {
        let event = if provider.is_oauth() {
            AuthEvent::login()
        } else {
            AuthEvent::submit()
        };
        tracing::info!(%provider, "Login requested");
        self.handle(provider, event).await
    }

    pub async fn logout(&mut self) -> Result<()> {
        if let Err(e) = self.backend.sign_out().await {
            tracing::warn!("Backend sign-out failed: {}", e);
        }
        for machine in &mut self.machines {
            machine.handle(AuthEvent::logout()).await?;
        }
        self.process_auth_changes().await?;
        Ok(())
    }

    /// Sign out and forget every persisted state, back to Idle everywhere
    pub async fn clear_cached_session(&mut self) -> Result<()> {
        if let Err(e) = self.backend.sign_out().await {
            tracing::warn!("Backend sign-out failed: {}", e);
        }
        for machine in &mut self.machines {
            machine.clear_persisted()?;
        }
        for machine in &mut self.machines {
            machine.handle(AuthEvent::default()).await?;
        }
        self.process_auth_changes().await?;
        tracing::info!("Cached session cleared");
        Ok(())
    }

    /// Snapshot of every machine, in setup order
    pub fn status(&self) -> Vec<MachineStatus> {
        self.machines.iter().map(|m| m.status()).collect()
    }

    /// The diagram of `provider` finished loading
    pub fn attach_diagram(&mut self, provider: ProviderId, sink: Box<dyn HighlightSink>) -> Result<()> {
        self.machine_mut(provider)?.attach_diagram(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MockBackend, MockSettings, UserRecord};
    use crate::diagram::ElementClasses;
    use crate::store::MemoryStore;
    use std::sync::Mutex;

    const LINK_URL: &str = "https://app.test/finish?mode=signIn&oobCode=abc123";

    fn backend(settings: MockSettings) -> Arc<MockBackend> {
        Arc::new(MockBackend::new(settings).unwrap())
    }

    fn state_of(coordinator: &Coordinator, provider: ProviderId) -> String {
        coordinator.machine(provider).unwrap().status().state
    }

    async fn ready(backend: &Arc<MockBackend>, store: &Arc<MemoryStore>) -> Coordinator {
        let mut coordinator = Coordinator::builder(backend.clone(), store.clone()).build();
        coordinator.setup().await.unwrap();
        coordinator
    }

    #[tokio::test]
    async fn test_fresh_setup_is_idle_everywhere() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let coordinator = ready(&backend, &store).await;

        let status = coordinator.status();
        assert_eq!(
            status.iter().map(|s| s.provider).collect::<Vec<_>>(),
            ProviderId::ALL.to_vec()
        );
        assert!(status.iter().all(|s| s.state == "Idle" && s.accepts_input));
        assert!(store.is_empty());
        assert_eq!(backend.listener_count(), 1);
    }

    #[tokio::test]
    async fn test_email_link_sent() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = ready(&backend, &store).await;

        coordinator
            .set_credentials(&Credentials::link("a@b.c"))
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();

        assert_eq!(
            state_of(&coordinator, ProviderId::Email),
            "WaitingForUserToClickLink"
        );
        assert_eq!(
            store.get("fsm.email.state").as_deref(),
            Some("WaitingForUserToClickLink")
        );
    }

    #[tokio::test]
    async fn test_bad_credential_retry() {
        let backend = backend(MockSettings {
            rejected_credentials: vec!["x@bad".to_string()],
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = ready(&backend, &store).await;

        coordinator
            .set_credentials(&Credentials::link("x@bad"))
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        assert_eq!(state_of(&coordinator, ProviderId::Email), "BadCredential");

        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        assert_eq!(state_of(&coordinator, ProviderId::Email), "BadCredential");

        coordinator
            .set_credentials(&Credentials::link("y@good"))
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        assert_eq!(state_of(&coordinator, ProviderId::Email), "Idle");

        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        assert_eq!(
            state_of(&coordinator, ProviderId::Email),
            "WaitingForUserToClickLink"
        );
    }

    #[tokio::test]
    async fn test_clear_cached_session() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = ready(&backend, &store).await;

        coordinator
            .set_credentials(&Credentials::link("a@b.c"))
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Google)
            .await
            .unwrap();
        assert!(!store.is_empty());

        coordinator.clear_cached_session().await.unwrap();

        assert!(store.is_empty());
        for status in coordinator.status() {
            assert_eq!(status.state, "Idle", "{} not reset", status.provider);
            assert_eq!(status.persisted, None);
        }
        assert!(backend.calls().contains(&BackendCall::SignOut));
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        store.set("fsm.google.state", "RedirectingToProvider").unwrap();

        let mut coordinator = Coordinator::builder(backend.clone(), store.clone()).build();
        coordinator.setup().await.unwrap();
        let first = coordinator.status();
        coordinator.setup().await.unwrap();

        assert_eq!(coordinator.status(), first);
        assert_eq!(backend.listener_count(), 1);
        let probes = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, BackendCall::RedirectResult(_)))
            .count();
        assert_eq!(probes, 1);
    }

    #[tokio::test]
    async fn test_oauth_redirect_survives_reload() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());

        let mut before = ready(&backend, &store).await;
        before
            .login_with_provider(ProviderId::Github)
            .await
            .unwrap();
        assert_eq!(
            state_of(&before, ProviderId::Github),
            "RedirectingToProvider"
        );
        assert!(!before.machine(ProviderId::Github).unwrap().status().accepts_input);
        drop(before);
        assert_eq!(backend.listener_count(), 0);

        let after = ready(&backend, &store).await;
        assert_eq!(state_of(&after, ProviderId::Github), "SignedIn");
        assert_eq!(store.get("fsm.github.state").as_deref(), Some("SignedIn"));
        assert_eq!(state_of(&after, ProviderId::Facebook), "Idle");
    }

    #[tokio::test]
    async fn test_email_link_opened_after_reload() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());

        let mut before = ready(&backend, &store).await;
        before
            .set_credentials(&Credentials::link("a@b.c"))
            .unwrap();
        before
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        drop(before);

        let mut after = Coordinator::builder(backend.clone(), store.clone())
            .current_url(LINK_URL)
            .build();
        after.setup().await.unwrap();

        assert_eq!(state_of(&after, ProviderId::Email), "SignedIn");
        assert!(store.get("fsm.email.credential").is_none());
    }

    #[tokio::test]
    async fn test_email_link_opened_elsewhere() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = Coordinator::builder(backend.clone(), store.clone())
            .current_url(LINK_URL)
            .build();
        coordinator.setup().await.unwrap();
        assert_eq!(
            state_of(&coordinator, ProviderId::Email),
            "WaitingForReenteredCredential"
        );

        coordinator
            .set_credentials(&Credentials::link("a@b.c"))
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        assert_eq!(state_of(&coordinator, ProviderId::Email), "SignedIn");
    }

    #[tokio::test]
    async fn test_password_login_then_logout() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = ready(&backend, &store).await;

        coordinator
            .set_credentials(&Credentials::password("a@b.c", "hunter2"))
            .unwrap();
        coordinator
            .login_with_provider(ProviderId::Email)
            .await
            .unwrap();
        assert_eq!(state_of(&coordinator, ProviderId::Email), "SignedIn");

        coordinator.logout().await.unwrap();
        assert!(coordinator.status().iter().all(|s| s.state == "Idle"));
        assert_eq!(store.get("fsm.email.state").as_deref(), Some("Idle"));
    }

    #[tokio::test]
    async fn test_backend_notifications_are_routed() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = ready(&backend, &store).await;

        backend.emit(AuthStateChange::SignedIn(UserRecord::new(
            "gh-1",
            ProviderId::Github,
        )));
        assert_eq!(coordinator.process_auth_changes().await.unwrap(), 1);
        assert_eq!(state_of(&coordinator, ProviderId::Github), "SignedIn");
        assert_eq!(state_of(&coordinator, ProviderId::Google), "Idle");

        backend.emit(AuthStateChange::SignedOut);
        coordinator.process_auth_changes().await.unwrap();
        assert_eq!(state_of(&coordinator, ProviderId::Github), "Idle");
        assert_eq!(coordinator.process_auth_changes().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_login_button_follows_in_flight_states() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let toggles: Arc<Mutex<Vec<(ProviderId, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let recorder = toggles.clone();

        let mut coordinator = Coordinator::builder(backend.clone(), store.clone())
            .login_button(Arc::new(move |provider: ProviderId, enabled: bool| {
                recorder.lock().unwrap().push((provider, enabled))
            }))
            .build();
        coordinator.setup().await.unwrap();
        coordinator
            .login_with_provider(ProviderId::Facebook)
            .await
            .unwrap();

        let toggles = toggles.lock().unwrap();
        assert_eq!(
            toggles.iter().rev().find(|(p, _)| *p == ProviderId::Facebook),
            Some(&(ProviderId::Facebook, false))
        );
        assert!(toggles.contains(&(ProviderId::Google, true)));
    }

    #[tokio::test]
    async fn test_attach_diagram_renders_current_state() {
        let backend = backend(MockSettings::default());
        let store = Arc::new(MemoryStore::new());
        let mut coordinator = ready(&backend, &store).await;

        coordinator
            .attach_diagram(
                ProviderId::Google,
                Box::new(ElementClasses::for_provider(ProviderId::Google)),
            )
            .unwrap();
        let err = coordinator
            .attach_diagram(ProviderId::Email, Box::new(ElementClasses::default()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        coordinator
            .login_with_provider(ProviderId::Google)
            .await
            .unwrap();
        let diagram = coordinator.machine(ProviderId::Google).unwrap().diagram();
        assert!(diagram.is_ready());
        assert_eq!(
            diagram.highlighted_box(),
            Some("google-box-redirecting-to-provider")
        );
    }
}
