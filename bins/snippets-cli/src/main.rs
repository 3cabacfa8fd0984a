mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use snippets_common::config::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snippets-cli")]
#[command(about = "Snippets CLI - Manage languages and queue snippets for the runner", long_about = None)]
struct Cli {
    /// Service config file (defaults to $SNIPPETS_CONFIG, then config/snippets.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Redis URL (defaults to $REDIS_URL, then redis://127.0.0.1:6379)
    #[arg(long, global = true)]
    redis_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured languages and their effective limits
    Languages,

    /// Show the limits a language runs with (dry run, nothing is executed)
    Limits {
        /// Language key (e.g., python, javascript)
        #[arg(short, long)]
        name: String,
    },

    /// Add a language to the service config
    AddLang {
        /// Language key, matched against the declared file type
        #[arg(short, long)]
        name: String,

        /// Docker image to run in (e.g., python:3-alpine)
        #[arg(short, long)]
        image: String,

        /// Command template; {file} is replaced by the snippet file name
        #[arg(short, long)]
        command: String,

        /// Timeout in seconds (defaults to the service timeout)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Memory limit in MB (defaults to the service memory)
        #[arg(short, long)]
        memory: Option<u64>,

        /// Reply length in characters (defaults to the service crop)
        #[arg(long)]
        crop: Option<usize>,
    },

    /// Remove a language from the service config
    RemoveLang {
        /// Language key
        #[arg(short, long)]
        name: String,

        /// Skip confirmation
        #[arg(short, long, default_value = "false")]
        yes: bool,
    },

    /// Initialize a config file and storage folder
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },

    /// Queue a shared file for execution
    Submit {
        /// File id on the chat platform
        #[arg(long)]
        file_id: String,

        /// File name as shared (e.g., -.py)
        #[arg(long)]
        name: String,

        /// Private download URL
        #[arg(long)]
        url: String,

        /// Declared language
        #[arg(short, long)]
        language: String,

        /// Where the reply goes (channel or file id)
        #[arg(short, long)]
        reply_target: String,
    },

    /// Queue a re-run of a previously shared file
    Rerun {
        /// User who reacted
        #[arg(short, long)]
        user: String,

        /// File id the reaction was added to
        #[arg(short, long)]
        file_id: String,

        /// Reaction name
        #[arg(short, long, default_value = "repeat")]
        reaction: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(|| {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    });
    let redis_url = cli.redis_url.unwrap_or_else(|| {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    });

    match cli.command {
        Commands::Languages => {
            commands::list_languages(&config_path).await?;
        }
        Commands::Limits { name } => {
            commands::show_limits(&config_path, &name).await?;
        }
        Commands::AddLang {
            name,
            image,
            command,
            timeout,
            memory,
            crop,
        } => {
            commands::add_language(&config_path, &name, &image, &command, timeout, memory, crop).await?;
        }
        Commands::RemoveLang { name, yes } => {
            commands::remove_language(&config_path, &name, yes).await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
        Commands::Submit {
            file_id,
            name,
            url,
            language,
            reply_target,
        } => {
            let event = commands::file_shared_event(&file_id, &name, &url, &language, &reply_target);
            commands::submit(&redis_url, event).await?;
        }
        Commands::Rerun {
            user,
            file_id,
            reaction,
        } => {
            commands::rerun(&redis_url, &user, &file_id, &reaction).await?;
        }
    }

    Ok(())
}
