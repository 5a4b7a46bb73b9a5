// Switchboard
// Main entry point for the switchboard binary

use clap::Parser;
use switchboard_engine::cli::{Cli, Command, KnowledgeAction, SecretAction};
use switchboard_engine::config::Config;
use switchboard_engine::handlers::{
    handle_chat, handle_doctor, handle_history, handle_knowledge_add, handle_repl,
    handle_secret_remove, handle_secret_set, handle_sessions, OutputFormat,
};
use switchboard_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)
    } else {
        Config::load_or_create()
    };

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            return Err(e.into());
        }
    };

    // RUST_LOG > --log > config file
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!(
        "Switchboard v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Chat { message, session } => {
            tracing::debug!("Chat on session {:?}", session);
            handle_chat(message, session, &config, format).await
        }

        Command::Repl { session } => handle_repl(session, &config, format).await,

        Command::History { session, all } => handle_history(session, all, &config, format).await,

        Command::Sessions { limit } => handle_sessions(limit, &config, format).await,

        Command::Knowledge { action } => match action {
            KnowledgeAction::Add { path, source } => {
                tracing::info!("Ingesting {}", path.display());
                handle_knowledge_add(&path, source, &config, format).await
            }
        },

        Command::Secret { action } => match action {
            SecretAction::Set { name } => handle_secret_set(&name),
            SecretAction::Remove { name } => handle_secret_remove(&name),
        },

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
