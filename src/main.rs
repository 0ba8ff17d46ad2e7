use clap::{Parser, Subcommand};
use kb_sync::Result;
use kb_sync::commands::{
    check, create_kb, delete_doc, delete_kb, list_docs, list_kbs, load_config, rebuild, search,
    show_config, upload,
};
use kb_sync::indexer::{ConflictPolicy, Indexer};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kb-sync")]
#[command(about = "Keep uploaded documents, chunk rows and vector indexes in sync")]
#[command(version)]
struct Cli {
    /// Base directory holding config.toml and the metadata database
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config {
        #[arg(long)]
        show: bool,
    },
    /// Create a knowledge base
    CreateKb {
        #[arg(long)]
        owner: i64,
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List knowledge bases, newest first
    ListKbs {
        #[arg(long)]
        owner: i64,
    },
    /// Delete a knowledge base with all of its documents
    DeleteKb {
        #[arg(long)]
        owner: i64,
        kb: i64,
    },
    /// Upload a document into a knowledge base
    Upload {
        #[arg(long)]
        owner: i64,
        kb: i64,
        file: PathBuf,
        /// Store under this name instead of the file's own name
        #[arg(long)]
        name: Option<String>,
        /// What to do when a document with the same name exists: keep or replace
        #[arg(long, default_value_t = ConflictPolicy::Keep)]
        policy: ConflictPolicy,
    },
    /// List documents in a knowledge base
    ListDocs {
        #[arg(long)]
        owner: i64,
        kb: i64,
    },
    /// Delete a document and rebuild its knowledge base's index
    DeleteDoc {
        #[arg(long)]
        owner: i64,
        document: i64,
    },
    /// Re-embed every chunk of a knowledge base
    Rebuild {
        #[arg(long)]
        owner: i64,
        kb: i64,
    },
    /// Compare chunk rows against the index
    Check {
        #[arg(long)]
        owner: i64,
        kb: i64,
    },
    /// Find the chunks closest to a query
    Search {
        #[arg(long)]
        owner: i64,
        kb: i64,
        query: String,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.base_dir)?;

    if let Commands::Config { show } = cli.command {
        if show {
            show_config(&config)?;
        } else {
            println!(
                "Edit {} to change settings, or pass --show to print them.",
                config.config_file_path().display()
            );
        }
        return Ok(());
    }

    let indexer = Indexer::from_config(&config).await?;

    match cli.command {
        Commands::Config { .. } => {}
        Commands::CreateKb {
            owner,
            name,
            description,
        } => {
            create_kb(&indexer, owner, &name, description.as_deref()).await?;
        }
        Commands::ListKbs { owner } => {
            list_kbs(&indexer, owner).await?;
        }
        Commands::DeleteKb { owner, kb } => {
            delete_kb(&indexer, owner, kb).await?;
        }
        Commands::Upload {
            owner,
            kb,
            file,
            name,
            policy,
        } => {
            upload(&indexer, owner, kb, &file, name.as_deref(), policy).await?;
        }
        Commands::ListDocs { owner, kb } => {
            list_docs(&indexer, owner, kb).await?;
        }
        Commands::DeleteDoc { owner, document } => {
            delete_doc(&indexer, owner, document).await?;
        }
        Commands::Rebuild { owner, kb } => {
            rebuild(&indexer, owner, kb).await?;
        }
        Commands::Check { owner, kb } => {
            check(&indexer, owner, kb).await?;
        }
        Commands::Search {
            owner,
            kb,
            query,
            k,
        } => {
            search(&indexer, owner, kb, &query, k).await?;
        }
    }

    indexer.database().close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn list_kbs_requires_owner() {
        let cli = Cli::try_parse_from(["kb-sync", "list-kbs"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["kb-sync", "list-kbs", "--owner", "7"]);
        assert!(matches!(
            cli.map(|parsed| parsed.command),
            Ok(Commands::ListKbs { owner: 7 })
        ));
    }

    #[test]
    fn upload_defaults_to_keep() {
        let cli = Cli::try_parse_from(["kb-sync", "upload", "--owner", "1", "3", "notes.txt"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Upload {
                owner,
                kb,
                file,
                name,
                policy,
            } = parsed.command
            {
                assert_eq!(owner, 1);
                assert_eq!(kb, 3);
                assert_eq!(file, PathBuf::from("notes.txt"));
                assert_eq!(name, None);
                assert_eq!(policy, ConflictPolicy::Keep);
            }
        }
    }

    #[test]
    fn upload_with_replace_policy() {
        let cli = Cli::try_parse_from([
            "kb-sync", "upload", "--owner", "1", "3", "notes.txt", "--policy", "replace",
        ]);

        if let Ok(parsed) = cli {
            if let Commands::Upload { policy, .. } = parsed.command {
                assert_eq!(policy, ConflictPolicy::Replace);
            }
        } else {
            panic!("replace policy should parse");
        }
    }

    #[test]
    fn upload_rejects_unknown_policy() {
        let cli = Cli::try_parse_from([
            "kb-sync", "upload", "--owner", "1", "3", "notes.txt", "--policy", "merge",
        ]);
        assert!(cli.is_err());
    }

    #[test]
    fn search_with_k() {
        let cli = Cli::try_parse_from([
            "kb-sync", "search", "--owner", "2", "4", "what is rust", "-k", "10",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Search {
                owner, kb, query, k, ..
            } = parsed.command
            {
                assert_eq!(owner, 2);
                assert_eq!(kb, 4);
                assert_eq!(query, "what is rust");
                assert_eq!(k, 10);
            }
        }
    }

    #[test]
    fn global_base_dir() {
        let cli = Cli::try_parse_from(["kb-sync", "check", "--owner", "1", "2", "--base-dir", "/tmp/kb"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert_eq!(parsed.base_dir, Some(PathBuf::from("/tmp/kb")));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["kb-sync", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["kb-sync", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["kb-sync", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
