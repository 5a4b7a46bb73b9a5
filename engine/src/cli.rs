//! CLI interface for switchboard
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Switchboard customer service desk
///
/// Splits each request into typed tasks, runs the matching workers
/// concurrently and answers with one consolidated reply.
#[derive(Parser, Debug)]
#[command(name = "switchboard")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one message and print the reply
    Chat {
        /// The message
        message: String,

        /// Session to continue (a new one is created when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Interactive conversation on one session
    Repl {
        /// Session to continue (a new one is created when omitted)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Show the conversation of a session
    History {
        /// Session ID
        session: String,

        /// Include worker intermediate messages
        #[arg(long)]
        all: bool,
    },

    /// List stored sessions
    Sessions {
        /// Number of sessions to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Manage the policy knowledge store
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Manage API keys
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Run system diagnostics
    Doctor,
}

/// Knowledge store actions
#[derive(Subcommand, Debug)]
pub enum KnowledgeAction {
    /// Ingest a text document, one clause per paragraph
    Add {
        /// Path to the document
        path: PathBuf,

        /// Source name shown in citations (defaults to the file name)
        #[arg(long)]
        source: Option<String>,
    },
}

/// Secret management actions
#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Store a key in the OS keychain; the value is read from stdin
    Set {
        /// Key name (e.g., "openai_api_key")
        name: String,
    },

    /// Remove a key from the OS keychain
    Remove {
        /// Key name
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["switchboard", "doctor"]);
        assert!(matches!(cli.command, Command::Doctor));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["switchboard", "--json", "--log", "debug", "sessions"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(matches!(cli.command, Command::Sessions { limit: 10 }));
    }

    #[test]
    fn test_chat_command() {
        let cli = Cli::parse_from([
            "switchboard",
            "chat",
            "what's the fare from A to B",
            "--session",
            "abc",
        ]);
        if let Command::Chat { message, session } = cli.command {
            assert_eq!(message, "what's the fare from A to B");
            assert_eq!(session.as_deref(), Some("abc"));
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_history_command() {
        let cli = Cli::parse_from(["switchboard", "history", "abc", "--all"]);
        if let Command::History { session, all } = cli.command {
            assert_eq!(session, "abc");
            assert!(all);
        } else {
            panic!("Expected History command");
        }
    }

    #[test]
    fn test_knowledge_add() {
        let cli = Cli::parse_from([
            "switchboard",
            "knowledge",
            "add",
            "rules.txt",
            "--source",
            "Passenger Rules",
        ]);
        if let Command::Knowledge {
            action: KnowledgeAction::Add { path, source },
        } = cli.command
        {
            assert_eq!(path, PathBuf::from("rules.txt"));
            assert_eq!(source.as_deref(), Some("Passenger Rules"));
        } else {
            panic!("Expected Knowledge command");
        }
    }

    #[test]
    fn test_secret_set() {
        let cli = Cli::parse_from(["switchboard", "secret", "set", "openai_api_key"]);
        if let Command::Secret {
            action: SecretAction::Set { name },
        } = cli.command
        {
            assert_eq!(name, "openai_api_key");
        } else {
            panic!("Expected Secret command");
        }
    }

    #[test]
    fn test_secret_value_is_not_an_argument() {
        let result = Cli::try_parse_from(["switchboard", "secret", "set", "openai_api_key", "sk-x"]);
        assert!(result.is_err());
    }
}
