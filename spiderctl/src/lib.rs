use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;

use spidering_core::PageProfile;

mod commands;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] spidering_core::ConfigError),
    #[error("session error: {0}")]
    Session(#[from] spidering_core::SessionError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless automation session control interface", long_about = None)]
pub struct Cli {
    /// Path to spidering.toml
    #[arg(long, default_value = "configs/spidering.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a session, navigate once and report the outcome
    Smoke(SmokeArgs),
    /// Fetch a selector's fragments over plain HTTP, no browser
    Fetch(FetchArgs),
    /// Configuration inspection
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct SmokeArgs {
    /// Target URL
    #[arg(long)]
    pub url: String,
    /// Page profile for the session's page
    #[arg(long, value_enum, default_value_t = ProfileArg::Clean)]
    pub profile: ProfileArg,
    /// Cookie file restored before and persisted after the run
    #[arg(long)]
    pub cookies: Option<PathBuf>,
    /// Run with a visible browser window
    #[arg(long, default_value_t = false)]
    pub headed: bool,
}

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Target URL
    #[arg(long)]
    pub url: String,
    /// CSS selector whose subtrees are returned
    #[arg(long)]
    pub selector: String,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Parse the config and summarize it
    Check,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProfileArg {
    Full,
    Clean,
    VeryClean,
}

impl From<ProfileArg> for PageProfile {
    fn from(value: ProfileArg) -> Self {
        match value {
            ProfileArg::Full => PageProfile::Full,
            ProfileArg::Clean => PageProfile::Clean,
            ProfileArg::VeryClean => PageProfile::VeryClean,
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Smoke(args) => {
            let report = commands::smoke(&cli.config, args).await?;
            render(&report, cli.format)
        }
        Commands::Fetch(args) => {
            let report = commands::fetch(&cli.config, args).await?;
            render(&report, cli.format)
        }
        Commands::Config(ConfigCommands::Check) => {
            let report = commands::config_check(&cli.config)?;
            render(&report, cli.format)
        }
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
            Ok(())
        }
    }
}

pub(crate) trait DisplayFallback {
    fn display(&self) -> String;
}
