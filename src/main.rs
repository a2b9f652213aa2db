use std::io::{IsTerminal, Write};

use agent_army::chat::{ChatExit, run_session};
use agent_army::cli::Cli;
use agent_army::config::{load_config_file, resolve_runtime_config};
use agent_army::error::{categorize_error, format_cli_error};
use agent_army::mcp::McpConnector;
use agent_army::provider::resolve_model;
use agent_army::registry::ToolServerRegistry;
use agent_army::session::assemble;
use agent_army::theme::{Theme, print_startup_banner};
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; real parse errors surface through clap/env checks.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    if let Err(err) = run_cli(cli).await {
        eprintln!("{}", format_cli_error(&err));
        tracing::error!(category = %categorize_error(&err).code(), error = %err, "command failed");
        std::process::exit(1);
    }

    Ok(())
}

async fn run_cli(cli: Cli) -> Result<()> {
    init_tracing(&cli.log_filter)?;
    let file = load_config_file(&cli.config_path)?;
    let cfg = resolve_runtime_config(&cli, file)?;

    let (model, provider, model_name) = resolve_model(&cfg)?;
    tracing::info!(provider = ?provider, model = %model_name, "Using model");

    let registry = ToolServerRegistry::from_env();
    let connector = McpConnector::new(cfg.tool_timeout);
    let mut session = assemble(&cfg, &registry, &connector, model).await?;

    let styled = std::io::stdout().is_terminal();
    if styled {
        print_startup_banner(
            &format!("{provider:?}").to_ascii_lowercase(),
            &model_name,
            &session.status().specialists,
        );
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    let exit = run_session(
        &mut session,
        stdin,
        &mut stdout,
        Theme::new(styled),
        tokio::signal::ctrl_c(),
    )
    .await?;

    if exit == ChatExit::Interrupted {
        // The pending stdin read sits on the blocking pool and cannot be
        // cancelled; dropping the runtime would wait for the next line.
        stdout.flush()?;
        std::process::exit(0);
    }
    Ok(())
}

fn init_tracing(log_filter: &str) -> Result<()> {
    let level = log_filter
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(log_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {e}"))
}
