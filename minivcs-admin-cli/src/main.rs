//! MiniVCS Administration CLI

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use minivcs_core::{BackendKind, CommitDescriptor, Engine, EngineConfig, VcsError};
use serde_json::{Value, json};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "minivcs-admin")]
#[command(author = "MiniVCS Contributors")]
#[command(version = "0.1.0")]
#[command(about = "MiniVCS repository administration tool")]
struct Cli {
    /// Config file (JSON); defaults are used if it does not exist
    #[arg(long, global = true, default_value = "minivcs.json")]
    config: PathBuf,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the backend (document, sqlite, memory)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty repository
    Create { name: String },

    /// List repositories with commit and file counts
    List,

    /// List commits of a repository, newest first
    Commits { repo: String },

    /// Show a commit with file contents and changes
    Show { repo: String, id: String },

    /// Show the change set of a commit
    Changes { repo: String, id: String },

    /// Check whether a commit exists
    Check { repo: String, id: String },

    /// Push a commit
    Push {
        repo: String,
        /// Files as `path=text` or `path=@localfile`; none deletes every path
        files: Vec<String>,
        #[arg(short, long, default_value = "")]
        message: String,
        #[arg(short, long, default_value = "")]
        author: String,
        /// Commit id; derived from message, author, timestamp and parent if absent
        #[arg(long)]
        id: Option<String>,
        #[arg(short, long)]
        parent: Option<String>,
        /// ISO-8601 timestamp; now if absent
        #[arg(long)]
        timestamp: Option<String>,
    },

    /// Copy missing commits from one repository into another
    Pull { source: String, target: String },

    /// Copy a repository into a new one
    Clone { source: String, target: String },

    /// Delete a repository and everything in it
    Delete { name: String },

    /// Show every change to a single path
    History { repo: String, path: String },

    /// Print the effective configuration
    Config {
        /// Also write it to the config file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    match run(cli).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            let kind = e
                .downcast_ref::<VcsError>()
                .map_or("cli_error", VcsError::kind);
            let report = json!({ "error": kind, "message": format!("{:#}", e) });
            println!("{}", serde_json::to_string_pretty(&report)?);
            std::process::exit(1);
        }
    }
}

fn effective_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<Value> {
    let config = effective_config(&cli)?;
    if let Commands::Config { save: true } = cli.command {
        config.save(&cli.config)?;
        tracing::info!("Wrote config to {:?}", cli.config);
    }

    tracing::debug!("Opening {:?} backend at {:?}", config.backend, config.data_dir);
    let engine = Engine::from_config(config)?;

    let output = match cli.command {
        Commands::Create { name } => json!({ "name": name, "status": engine.create_repo(&name).await? }),
        Commands::List => json!(engine.list_repos().await?),
        Commands::Commits { repo } => json!(engine.get_commits(&repo).await?),
        Commands::Show { repo, id } => json!(engine.get_commit(&repo, &id).await?),
        Commands::Changes { repo, id } => json!(engine.get_changes(&repo, &id).await?),
        Commands::Check { repo, id } => json!({ "exists": engine.check_commit(&repo, &id).await? }),
        Commands::Push {
            repo,
            files,
            message,
            author,
            id,
            parent,
            timestamp,
        } => {
            let desc = build_descriptor(files, message, author, id, parent, timestamp)?;
            let id = desc.id.clone();
            let report = engine.push_commit(&repo, desc).await?;
            json!({ "id": id, "accepted": report.accepted, "change_count": report.change_count })
        }
        Commands::Pull { source, target } => json!(engine.pull(&source, &target).await?),
        Commands::Clone { source, target } => json!(engine.clone_repo(&source, &target).await?),
        Commands::Delete { name } => {
            engine.delete_repo(&name).await?;
            json!({ "name": name, "deleted": true })
        }
        Commands::History { repo, path } => json!(engine.file_history(&repo, &path).await?),
        Commands::Config { .. } => serde_json::to_value(engine.config())?,
    };
    Ok(output)
}

fn build_descriptor(
    files: Vec<String>,
    message: String,
    author: String,
    id: Option<String>,
    parent: Option<String>,
    timestamp: Option<String>,
) -> Result<CommitDescriptor> {
    let mut desc = CommitDescriptor {
        message,
        author,
        parent_id: parent,
        ..CommitDescriptor::default()
    };
    desc.timestamp = Some(timestamp.unwrap_or_else(|| desc.effective_timestamp()));
    for file in &files {
        let (path, content) = parse_file_arg(file)?;
        desc.files.insert(path, content);
    }
    desc.id = match id {
        Some(id) => id,
        None => desc.derive_id(),
    };
    Ok(desc)
}

/// Parse `path=text` or `path=@localfile`
fn parse_file_arg(arg: &str) -> Result<(String, String)> {
    let (path, value) = arg
        .split_once('=')
        .ok_or_else(|| anyhow!("Invalid file argument {:?}, expected path=content", arg))?;
    if path.is_empty() {
        return Err(anyhow!("Empty path in file argument {:?}", arg));
    }
    let content = match value.strip_prefix('@') {
        Some(local) => std::fs::read_to_string(local)
            .with_context(|| format!("Failed to read {:?} for {}", local, path))?,
        None => value.to_string(),
    };
    Ok((path.to_string(), content))
}
