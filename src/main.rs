use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docs_rag::commands::{
    ask, check, configure, ingest_documents, list_documents, search, show_stats,
};
use docs_rag::config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "docs-rag")]
#[command(about = "Index local documents and answer questions grounded in them")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the documents folder and the index
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Drop the collection before ingesting
    #[arg(long, conflicts_with_all = ["stats", "list"])]
    reset: bool,
    /// Show collection statistics
    #[arg(long, conflicts_with = "list")]
    stats: bool,
    /// List indexed document sources
    #[arg(long)]
    list: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show retrieved context for a query
    Search {
        query: String,
        /// Number of nearest chunks to consider
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Ask a question and stream the grounded answer
    Ask { question: String },
    /// Check that Ollama is reachable and the configured models are pulled
    Check,
    /// Write the default configuration, or show the current one
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::default_config_dir()?,
    };
    let config = Config::load(&config_dir)?;

    match cli.command {
        Some(Commands::Search { query, top_k }) => search(&config, &query, top_k).await?,
        Some(Commands::Ask { question }) => ask(&config, &question).await?,
        Some(Commands::Check) => check(&config).await?,
        Some(Commands::Config { show }) => configure(&config, show)?,
        None if cli.stats => show_stats(&config).await?,
        None if cli.list => list_documents(&config).await?,
        None => ingest_documents(&config, cli.reset).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn no_arguments_means_ingest() {
        let cli = Cli::try_parse_from(["docs-rag"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(parsed.command.is_none());
            assert!(!parsed.reset);
            assert!(!parsed.stats);
            assert!(!parsed.list);
        }
    }

    #[test]
    fn reset_flag() {
        let cli = Cli::try_parse_from(["docs-rag", "--reset"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(parsed.reset);
        }
    }

    #[test]
    fn maintenance_flags_are_exclusive() {
        let cli = Cli::try_parse_from(["docs-rag", "--reset", "--stats"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
        }

        assert!(Cli::try_parse_from(["docs-rag", "--stats", "--list"]).is_err());
    }

    #[test]
    fn search_command_with_top_k() {
        let cli = Cli::try_parse_from([
            "docs-rag",
            "search",
            "When is the deadline?",
            "--top-k",
            "3",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Some(Commands::Search { query, top_k }) = parsed.command {
                assert_eq!(query, "When is the deadline?");
                assert_eq!(top_k, Some(3));
            } else {
                panic!("expected search command");
            }
        }
    }

    #[test]
    fn ask_command() {
        let cli = Cli::try_parse_from(["docs-rag", "ask", "What documents do I need?"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(
                parsed.command,
                Some(Commands::Ask { question }) if question == "What documents do I need?"
            ));
        }
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from(["docs-rag", "check", "--config-dir", "/tmp/kb"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/kb")));
            assert!(matches!(parsed.command, Some(Commands::Check)));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["docs-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Some(Commands::Config { show }) = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["docs-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["docs-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
