//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - chat / repl: Run turns through the orchestrator
//! - history: Show the conversation of one session
//! - sessions: List stored sessions
//! - knowledge add: Ingest a policy document
//! - secret set / remove: Manage API keys in the OS keychain
//! - doctor: Validate configuration and check collaborators

use anyhow::{Context, Result};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::conductor::{Orchestrator, TurnOutcome};
use crate::config::{Config, SessionBackend};
use crate::db::{SqliteKnowledgeStore, SqliteSessionStore};
use crate::knowledge::KnowledgeStore;
use crate::llm::ollama::OllamaProvider;
use crate::llm::openai::OpenAIProvider;
use crate::llm::router::LLMRouter;
use crate::llm::LLMProvider;
use crate::message_bus::{Event, EventType, MessageBus};
use crate::secrets::{SecretCache, SecretManager};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::tools::ToolRegistry;
use crate::workers::WorkerSet;

/// Keychain service name for API keys
pub const KEYCHAIN_SERVICE: &str = "switchboard";

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Providers available with the current configuration and secrets.
///
/// Ollama is always registered; the OpenAI-compatible provider only when its
/// key resolves or it is the configured default.
pub fn build_providers(config: &Config) -> Vec<Box<dyn LLMProvider>> {
    let mut providers: Vec<Box<dyn LLMProvider>> = vec![Box::new(
        OllamaProvider::new(
            config.llm.ollama.base_url.clone(),
            config.llm.ollama.model.clone(),
        )
        .with_temperature(config.llm.temperature),
    )];

    let secret_manager = Arc::new(SecretManager::new(KEYCHAIN_SERVICE));
    if config.llm.default_provider == "openai"
        || secret_manager.has_secret(&config.llm.openai.api_key_name)
    {
        let secret_cache = Arc::new(SecretCache::new(secret_manager));
        providers.push(Box::new(
            OpenAIProvider::new(config.llm.openai.clone(), secret_cache)
                .with_temperature(config.llm.temperature),
        ));
    }

    providers
}

/// Session store selected by `[session] backend`
pub async fn open_session_store(config: &Config) -> Result<Arc<dyn SessionStore>> {
    match config.session.backend {
        SessionBackend::Sqlite => {
            let store = SqliteSessionStore::open(&config.session_db_path()).await?;
            Ok(Arc::new(store))
        }
        SessionBackend::Memory => Ok(Arc::new(InMemorySessionStore::new())),
    }
}

/// Wire every collaborator together
pub async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let router = Arc::new(LLMRouter::new(
        build_providers(config),
        Arc::new(config.llm.clone()),
    ));

    let knowledge: Arc<dyn KnowledgeStore> =
        Arc::new(SqliteKnowledgeStore::connect(&config.knowledge_db_path()).await);
    let registry = ToolRegistry::from_config(config, knowledge);
    tracing::debug!("Tools registered: {:?}", registry.names());

    let bus = Arc::new(MessageBus::new());
    let workers = WorkerSet::new(router.clone(), &registry, bus.clone(), &config.orchestrator);
    let sessions = open_session_store(config).await?;

    Ok(Orchestrator::new(
        router,
        workers,
        sessions,
        bus,
        &config.orchestrator,
    ))
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Run one turn, printing progress and the streamed reply as it arrives
async fn run_turn(
    orchestrator: &Orchestrator,
    session_id: &str,
    message: &str,
    format: OutputFormat,
) -> Result<TurnOutcome> {
    let mut events = orchestrator.bus().subscribe(EventType::All).await;

    let turn = orchestrator.handle_turn(session_id, message);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            Some(event) = events.recv() => print_event(&event, format),
        }
    };

    while let Ok(event) = events.try_recv() {
        print_event(&event, format);
    }

    let outcome = outcome.context("Turn failed")?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    Ok(outcome)
}

fn print_event(event: &Event, format: OutputFormat) {
    if let OutputFormat::Json = format {
        return;
    }

    match event {
        Event::PlanCreated {
            tasks, fallback, ..
        } => {
            let types: Vec<&str> = tasks.iter().map(|t| t.task_type.as_str()).collect();
            if *fallback {
                eprintln!("· plan: general (fallback)");
            } else {
                eprintln!("· plan: {}", types.join(", "));
            }
        }
        Event::WorkerStarted { task_type, .. } => {
            eprintln!("· {} working...", task_type);
        }
        Event::ToolCalled { tool, outcome, .. } => {
            eprintln!("  ↳ {} ({})", tool, outcome);
        }
        Event::ReplyChunk { text, .. } => {
            print!("{}", text);
            std::io::stdout().flush().ok();
        }
        Event::TurnCompleted { .. } => {
            println!();
        }
        Event::TurnStarted { .. } | Event::WorkerFinished { .. } => {}
    }
}

/// Send one message and print the reply
pub async fn handle_chat(
    message: String,
    session: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let session_id = session.unwrap_or_else(new_session_id);

    if let OutputFormat::Text = format {
        eprintln!("Session: {}", session_id);
    }

    run_turn(&orchestrator, &session_id, &message, format).await?;
    Ok(())
}

/// Interactive loop on one session until EOF or `exit`
pub async fn handle_repl(
    session: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let orchestrator = build_orchestrator(config).await?;
    let session_id = session.unwrap_or_else(new_session_id);

    println!("Switchboard session {}", session_id);
    println!("Type 'exit' or press Ctrl-D to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        if let Err(e) = run_turn(&orchestrator, &session_id, line, format).await {
            eprintln!("Error: {:#}", e);
        }
    }

    Ok(())
}

/// Show the conversation of a session
pub async fn handle_history(
    session_id: String,
    all: bool,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let sessions = open_session_store(config).await?;
    let state = sessions
        .load(&session_id)
        .await
        .context("Failed to load session")?;

    let entries: Vec<_> = state
        .history
        .entries()
        .iter()
        .filter(|e| all || !e.is_intermediate())
        .collect();

    match format {
        OutputFormat::Text => {
            if entries.is_empty() {
                println!("No messages in session {}", session_id);
                return Ok(());
            }

            println!(
                "Session {} ({})",
                session_id,
                state.title.as_deref().unwrap_or("untitled")
            );
            println!();

            for entry in entries {
                let who = match (&entry.author, entry.kind) {
                    (Some(author), sdk::history::EntryKind::Intermediate) => author.clone(),
                    (_, sdk::history::EntryKind::UserInput) => "you".to_string(),
                    _ => "switchboard".to_string(),
                };
                println!(
                    "[{}] {}:",
                    entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                    who
                );
                println!("  {}", entry.content.replace('\n', "\n  "));
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "session_id": session_id,
                "title": state.title,
                "turns": state.turns(),
                "entries": entries,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// List stored sessions, most recent first
pub async fn handle_sessions(limit: usize, config: &Config, format: OutputFormat) -> Result<()> {
    let sessions = open_session_store(config).await?;
    let mut summaries = sessions.list().await.context("Failed to list sessions")?;
    summaries.truncate(limit);

    match format {
        OutputFormat::Text => {
            if summaries.is_empty() {
                println!("No sessions yet");
                return Ok(());
            }

            println!("Sessions (last {}):", limit);
            println!();
            for summary in &summaries {
                let updated = chrono::DateTime::from_timestamp(summary.updated_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "Unknown".to_string());
                println!("{}", summary.session_id);
                println!(
                    "  Title: {}",
                    summary.title.as_deref().unwrap_or("untitled")
                );
                println!("  Turns: {}", summary.turns);
                println!("  Updated: {}", updated);
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "sessions": summaries,
                "count": summaries.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Ingest a text document into the knowledge store
pub async fn handle_knowledge_add(
    path: &Path,
    source: Option<String>,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let source = source.unwrap_or_else(|| {
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string())
    });

    let db_path = config.knowledge_db_path();
    let db = crate::db::Database::new(&db_path)
        .await
        .context("Failed to open knowledge database")?;
    let store = SqliteKnowledgeStore::from_database(db);

    let clauses = store.add_document(&source, &content).await?;
    let total = store.clause_count().await?;

    match format {
        OutputFormat::Text => {
            println!("Added {} clauses from '{}'", clauses, source);
            println!("Knowledge store now holds {} clauses", total);
        }
        OutputFormat::Json => {
            let output = json!({
                "source": source,
                "clauses": clauses,
                "total_clauses": total,
                "db_path": db_path,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Store an API key in the OS keychain, prompting for its value on stdin
pub fn handle_secret_set(name: &str) -> Result<()> {
    let value = SecretManager::prompt_for_secret(name).map_err(|e| anyhow::anyhow!("{}", e))?;
    SecretManager::new(KEYCHAIN_SERVICE)
        .set_secret(name, &value)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("Stored '{}' in the keychain.", name);
    Ok(())
}

/// Remove an API key from the OS keychain
pub fn handle_secret_remove(name: &str) -> Result<()> {
    SecretManager::new(KEYCHAIN_SERVICE)
        .delete_secret(name)
        .map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("Removed '{}' from the keychain.", name);
    Ok(())
}

/// Run system diagnostics
///
/// Validates the configuration, opens both databases and checks that at
/// least one model provider answers.
pub async fn handle_doctor(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(&str, String)> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));
    checks.push((
        "Build",
        format!(
            "v{} ({} - {})",
            env!("CARGO_PKG_VERSION"),
            env!("GIT_COMMIT_HASH"),
            env!("BUILD_TIMESTAMP")
        ),
    ));

    if config.core.data_dir.exists() {
        checks.push(("Data directory", "Exists".to_string()));
    } else {
        checks.push(("Data directory", "Missing".to_string()));
        issues.push(format!(
            "Data directory does not exist: {}",
            config.core.data_dir.display()
        ));
    }

    match config.session.backend {
        SessionBackend::Memory => {
            checks.push(("Session store", "In memory (not persisted)".to_string()));
        }
        SessionBackend::Sqlite => match open_session_store(config).await {
            Ok(store) => match store.list().await {
                Ok(sessions) => {
                    checks.push(("Session store", format!("OK ({} sessions)", sessions.len())))
                }
                Err(e) => {
                    checks.push(("Session store", "Unreadable".to_string()));
                    issues.push(format!("Cannot read sessions: {}", e));
                }
            },
            Err(e) => {
                checks.push(("Session store", "Failed".to_string()));
                issues.push(format!("Cannot open session database: {:#}", e));
            }
        },
    }

    let knowledge = SqliteKnowledgeStore::connect(&config.knowledge_db_path()).await;
    if knowledge.is_ready() {
        match knowledge.clause_count().await {
            Ok(0) => {
                checks.push(("Knowledge store", "Empty".to_string()));
                issues.push(
                    "Knowledge store is empty. Run 'switchboard knowledge add <file>'.".to_string(),
                );
            }
            Ok(n) => checks.push(("Knowledge store", format!("{} clauses", n))),
            Err(e) => {
                checks.push(("Knowledge store", "Unreadable".to_string()));
                issues.push(format!("Cannot read knowledge store: {:#}", e));
            }
        }
    } else {
        checks.push(("Knowledge store", "Unavailable".to_string()));
        issues.push("Knowledge store could not be opened; policy lookups will degrade.".to_string());
    }

    checks.push((
        "Web search",
        if config.search.enabled {
            format!("Enabled ({})", config.search.base_url)
        } else {
            "Disabled".to_string()
        },
    ));

    let router = LLMRouter::new(build_providers(config), Arc::new(config.llm.clone()));
    let health = router.check_health().await;
    for (name, healthy) in &health {
        let label = match *name {
            "ollama" => "Ollama",
            _ => "OpenAI-compatible",
        };
        checks.push((
            label,
            if *healthy { "Available" } else { "Not available" }.to_string(),
        ));
    }
    if !health.iter().any(|(_, healthy)| *healthy) {
        issues.push(
            "No LLM providers available. Start Ollama or configure an API key.".to_string(),
        );
    }

    match format {
        OutputFormat::Text => {
            println!("Switchboard System Diagnostics");
            println!("==============================");
            println!();

            println!("System Checks:");
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }

            println!();

            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
