use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parley_agents::{ChatRequest, LlmProvider, LlmReply, OpenAiProvider};
use parley_config::{AppConfig, ConfigLoader, config_dir};
use parley_db::SqliteHistoryStore;
use parley_security::RedactingWriter;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Chat with OpenAI-compatible models from the terminal.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.parley/config.yml
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite file for persisted history
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Provider id from the config file
    #[arg(long, global = true)]
    provider: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one prompt and print the reply
    Chat {
        #[arg(long, short, default_value = "default")]
        session: String,

        /// Image reference: path, file://, base64:// or http(s) URL. Repeatable.
        #[arg(long = "image")]
        images: Vec<String>,

        #[arg(long)]
        system: Option<String>,

        /// Do not record this turn in the session history
        #[arg(long)]
        no_persist: bool,

        prompt: String,
    },
    /// Show a session's history, newest first
    History {
        #[arg(long, short, default_value = "default")]
        session: String,

        #[arg(long, default_value_t = 1)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },
    /// Clear a session's history
    Forget {
        #[arg(long, short, default_value = "default")]
        session: String,
    },
    /// List models offered by the provider
    Models,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr())
        .try_init();
}

fn history_db(cli: &Cli, config: &AppConfig) -> PathBuf {
    cli.db
        .clone()
        .or_else(|| config.history_db.clone())
        .unwrap_or_else(|| config_dir().join("history.db"))
}

async fn build_provider(cli: &Cli) -> Result<OpenAiProvider> {
    let loader = match &cli.config {
        Some(path) => ConfigLoader::new(path),
        None => ConfigLoader::default_location(),
    };
    let config = loader.load()?;

    let provider_config = config
        .provider(cli.provider.as_deref())
        .cloned()
        .with_context(|| match &cli.provider {
            Some(id) => format!("provider '{id}' is not configured"),
            None => format!("no providers configured in {}", loader.path().display()),
        })?;

    let db_path = history_db(cli, &config);
    let store = Arc::new(
        SqliteHistoryStore::open(&db_path)
            .with_context(|| format!("failed to open history at {}", db_path.display()))?,
    );

    let provider = OpenAiProvider::new(provider_config, store)?;
    provider.restore_sessions().await?;
    info!(provider = %provider.provider_id(), model = %provider.model(), "provider ready");
    Ok(provider)
}

async fn run(cli: Cli) -> Result<()> {
    let provider = build_provider(&cli).await?;

    match cli.command {
        Command::Chat {
            session,
            images,
            system,
            no_persist,
            prompt,
        } => {
            let mut request = ChatRequest::new(session, prompt).with_images(images);
            if let Some(system) = system {
                request = request.with_system_prompt(system);
            }
            if no_persist {
                request = request.without_persistence();
            }

            let response = provider.text_chat(request).await?;
            match response.reply {
                LlmReply::Text { text } => println!("{text}"),
                LlmReply::ToolCalls { calls } => {
                    println!("{}", serde_json::to_string_pretty(&calls)?)
                }
                LlmReply::Error { message } => eprintln!("{message}"),
            }
        }
        Command::History {
            session,
            page,
            page_size,
        } => {
            let context = provider
                .human_readable_context(&session, page, page_size)
                .await?;
            for line in &context.items {
                println!("{line}");
            }
            println!("-- page {}/{} --", page.max(1), context.total_pages.max(1));
        }
        Command::Forget { session } => {
            provider.forget(&session).await?;
            println!("history of session '{session}' cleared");
        }
        Command::Models => {
            for model in provider.list_models().await? {
                println!("{model}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_accepts_repeated_images_and_global_flags() {
        let cli = Cli::try_parse_from([
            "parley",
            "chat",
            "--session",
            "s1",
            "--image",
            "a.jpg",
            "--image",
            "https://example.com/b.png",
            "--no-persist",
            "--provider",
            "azure",
            "what is this?",
        ])
        .unwrap();

        assert_eq!(cli.provider.as_deref(), Some("azure"));
        match cli.command {
            Command::Chat {
                session,
                images,
                no_persist,
                prompt,
                system,
            } => {
                assert_eq!(session, "s1");
                assert_eq!(images, vec!["a.jpg", "https://example.com/b.png"]);
                assert!(no_persist);
                assert!(system.is_none());
                assert_eq!(prompt, "what is this?");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn history_defaults() {
        let cli = Cli::try_parse_from(["parley", "history"]).unwrap();
        match cli.command {
            Command::History {
                session,
                page,
                page_size,
            } => {
                assert_eq!(session, "default");
                assert_eq!(page, 1);
                assert_eq!(page_size, 20);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn db_flag_wins_over_config() {
        let cli = Cli::try_parse_from(["parley", "--db", "/tmp/h.db", "models"]).unwrap();
        let config = AppConfig {
            history_db: Some(PathBuf::from("/var/lib/parley.db")),
            ..AppConfig::default()
        };
        assert_eq!(history_db(&cli, &config), PathBuf::from("/tmp/h.db"));

        let cli = Cli::try_parse_from(["parley", "models"]).unwrap();
        assert_eq!(
            history_db(&cli, &config),
            PathBuf::from("/var/lib/parley.db")
        );
    }
}
