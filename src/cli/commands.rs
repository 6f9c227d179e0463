//! CLI command implementations
//!
//! This module contains the implementation for each CLI command.

use crate::backend::MockBackend;
use crate::cli::OutputFormat;
use crate::coordinator::Coordinator;
use crate::diagram::ElementClasses;
use crate::fsm::ProviderId;
use crate::log_sink::json_lines_sink;
use crate::store::FileStore;
use crate::{Config, Result};
use std::sync::Arc;

/// Restore the session and run the boot checks, like a page load would
pub async fn open_session(config: &Config, url: Option<String>) -> Result<Coordinator> {
    let backend = Arc::new(MockBackend::new(config.mock.clone())?);
    let store = Arc::new(FileStore::new(Some(config.store_path())));
    tracing::debug!("Using session file {:?}", store.path());

    let current_url = url.unwrap_or_else(|| config.session.current_url.clone());
    let mut builder = Coordinator::builder(backend, store)
        .current_url(current_url)
        .highlight_class(config.diagram.highlight_class.clone());
    if let Some(path) = &config.logging.file {
        builder = builder.log_sink(json_lines_sink(path)?);
    }

    let mut coordinator = builder.build();
    for provider in ProviderId::ALL {
        coordinator.attach_diagram(provider, Box::new(ElementClasses::for_provider(provider)))?;
    }
    coordinator.setup().await?;
    coordinator.process_auth_changes().await?;
    Ok(coordinator)
}

/// Print the status of the selected machines
fn print_status(coordinator: &Coordinator, output: OutputFormat, only: Option<ProviderId>) -> Result<()> {
    let statuses: Vec<_> = coordinator
        .status()
        .into_iter()
        .filter(|s| only.is_none_or(|p| s.provider == p))
        .collect();

    let mut stdout = std::io::stdout();
    match output {
        OutputFormat::Table => crate::cli::output::output_table(&mut stdout, &statuses),
        OutputFormat::Json => crate::cli::output::output_json(&mut stdout, &statuses),
        OutputFormat::Dot => {
            let diagrams: Vec<_> = statuses
                .iter()
                .filter_map(|s| coordinator.machine(s.provider))
                .map(|m| m.diagram())
                .collect();
            crate::cli::output::output_dot(&mut stdout, &diagrams)
        }
    }
}

/// Status command implementation
pub mod status {
    use super::*;

    /// Execute the status command
    pub async fn execute(
        config: &Config,
        url: Option<String>,
        output: OutputFormat,
        provider: Option<ProviderId>,
    ) -> Result<()> {
        let coordinator = open_session(config, url).await?;
        print_status(&coordinator, output, provider)
    }
}

/// Login command implementation
pub mod login {
    use super::*;
    use crate::Error;
    use crate::fsm::Credentials;

    /// Form fields given on the command line
    #[derive(Debug, Clone, Default)]
    pub struct LoginForm {
        pub email: Option<String>,
        pub password: Option<String>,
        pub password_sign_in: bool,
    }

    impl LoginForm {
        fn credentials(&self) -> Result<Option<Credentials>> {
            let Some(email) = &self.email else {
                return Ok(None);
            };
            if !self.password_sign_in {
                return Ok(Some(Credentials::link(email)));
            }
            let password = self.password.clone().ok_or_else(|| {
                Error::MissingConfig(
                    "Password not found. Pass --password or set AUTH_STATE_VIZ_PASSWORD".to_string(),
                )
            })?;
            Ok(Some(Credentials::password(email, password)))
        }
    }

    /// Run the login on an opened session
    pub async fn run(
        coordinator: &mut Coordinator,
        provider: ProviderId,
        form: &LoginForm,
    ) -> Result<()> {
        if let Some(credentials) = form.credentials()? {
            if provider.is_oauth() {
                tracing::warn!("--email is ignored for {}", provider);
            } else {
                coordinator.set_credentials(&credentials)?;
            }
        }
        coordinator.login_with_provider(provider).await
    }

    /// Execute the login command
    pub async fn execute(
        config: &Config,
        url: Option<String>,
        provider: ProviderId,
        form: LoginForm,
        output: OutputFormat,
    ) -> Result<()> {
        let mut coordinator = open_session(config, url).await?;
        run(&mut coordinator, provider, &form).await?;
        print_status(&coordinator, output, None)
    }
}

/// Logout command implementation
pub mod logout {
    use super::*;

    /// Execute the logout command
    pub async fn execute(config: &Config, url: Option<String>, output: OutputFormat) -> Result<()> {
        let mut coordinator = open_session(config, url).await?;
        coordinator.logout().await?;
        print_status(&coordinator, output, None)
    }
}

/// Clear command implementation
pub mod clear {
    use super::*;

    /// Execute the clear command
    pub async fn execute(config: &Config, url: Option<String>, output: OutputFormat) -> Result<()> {
        let mut coordinator = open_session(config, url).await?;
        coordinator.clear_cached_session().await?;
        print_status(&coordinator, output, None)
    }
}
