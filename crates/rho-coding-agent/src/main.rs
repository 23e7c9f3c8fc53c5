mod commands;
mod history;
mod speech;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use rho_agent_core::{init_provider_registry, Config, Orchestrator, RuntimeState, ToolRegistry};
use rho_tools::{register_builtin_toolboxes, ToolContext};

#[derive(Debug, Parser)]
#[command(name = "rho", version, about = "Interactive multi-provider terminal coding assistant")]
struct Cli {
    /// Path to the YAML configuration file (default: ./rho.yaml, then ~/.rho.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn check_terminal_capabilities() -> Result<()> {
    if std::env::var("TERM").map(|term| term.is_empty()).unwrap_or(true) {
        bail!("rho requires a terminal to run (TERM is not set)");
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(error) = run(cli).await {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    check_terminal_capabilities()?;

    let config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    config.validate().context("configuration error")?;

    let providers = init_provider_registry(&config).context("initialising providers")?;

    let default_model = if !config.default_model.is_empty()
        && providers.provider_for(&config.default_model).is_some()
    {
        config.default_model.clone()
    } else {
        providers
            .first_model()
            .context("no model available from any initialized provider")?
    };

    let state = Arc::new(RuntimeState::new(
        default_model,
        config.tools.enabled,
        config.tools.output,
    ));

    let ctx = ToolContext::new(state.clone(), providers.clone(), &config);
    let mut registry = ToolRegistry::new();
    register_builtin_toolboxes(&mut registry, ctx.clone())
        .context("registering built-in tools")?;
    let registry = Arc::new(registry);
    ctx.install_catalog(&registry);

    let orchestrator = Orchestrator::new(
        providers.clone(),
        registry,
        state.clone(),
        config.system.clone(),
    );

    ui::run_session(orchestrator, state, providers, &config).await
}
