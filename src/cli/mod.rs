//! CLI module
//!
//! This module defines the command-line interface using clap and implements
//! the command execution logic. Every invocation is one "page load": the
//! machines are restored from the session file, run their boot checks, and
//! then receive the command.

use crate::fsm::ProviderId;
use crate::{Config, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;
pub mod output;

/// Auth State Visualizer CLI
#[derive(Parser, Debug)]
#[command(name = "auth-state-viz")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// URL of the page load (pass a sign-in link to simulate opening it)
    #[arg(short, long, global = true)]
    pub url: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the state of every provider machine
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,

        /// Only show this provider
        #[arg(short, long, value_enum)]
        provider: Option<ProviderArg>,
    },

    /// Start signing in with a provider
    Login {
        /// Provider to sign in with
        #[arg(value_enum)]
        provider: ProviderArg,

        /// Email address (email provider only)
        #[arg(short, long)]
        email: Option<String>,

        /// Password, used with --password-sign-in
        #[arg(long, env = "AUTH_STATE_VIZ_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Sign in with a password instead of an emailed link
        #[arg(long)]
        password_sign_in: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Sign out of every provider
    Logout {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },

    /// Sign out and forget the persisted session
    Clear {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        output: OutputFormat,
    },
}

/// Provider names accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Email,
    Facebook,
    Google,
    Github,
}

impl From<ProviderArg> for ProviderId {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Email => ProviderId::Email,
            ProviderArg::Facebook => ProviderId::Facebook,
            ProviderArg::Google => ProviderId::Google,
            ProviderArg::Github => ProviderId::Github,
        }
    }
}

/// Output format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Plain text table
    Table,
    /// JSON output
    Json,
    /// DOT format (Graphviz), current state highlighted
    Dot,
}

/// Execute the CLI command
pub async fn execute(args: Cli, config: Config) -> Result<()> {
    let url = args.url;
    match args.command {
        Commands::Status { output, provider } => {
            commands::status::execute(&config, url, output, provider.map(Into::into)).await
        }
        Commands::Login {
            provider,
            email,
            password,
            password_sign_in,
            output,
        } => {
            let form = commands::login::LoginForm {
                email,
                password,
                password_sign_in,
            };
            commands::login::execute(&config, url, provider.into(), form, output).await
        }
        Commands::Logout { output } => commands::logout::execute(&config, url, output).await,
        Commands::Clear { output } => commands::clear::execute(&config, url, output).await,
    }
}
