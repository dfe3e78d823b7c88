//! fa-script - run assistant scripts from the command line
//!
//! Scripts run against a SQLite database with the notes tools and the
//! attachment registry installed.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use family_assistant::attachments::SqliteAttachmentRegistry;
use family_assistant::db::Database;
use family_assistant::tools::{NotesToolProvider, ToolProvider};
use family_assistant::{AppConfig, ExecutionContext, Globals, Object, ScriptEngine};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fa-script")]
#[command(about = "Run sandboxed assistant scripts", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, default_value = "fa-script.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script file
    Run {
        /// Script to run
        file: PathBuf,

        /// Plain input as name=<json>
        #[arg(long = "input", value_name = "NAME=JSON")]
        inputs: Vec<String>,

        /// Use the blocking entry point instead of the async executor
        #[arg(long)]
        sync: bool,

        /// Default timezone for time functions
        #[arg(long, default_value = "UTC")]
        timezone: String,

        /// Restrict scripts to these tools
        #[arg(long = "allow-tool", value_name = "NAME")]
        allow_tools: Vec<String>,

        /// Deny every tool
        #[arg(long)]
        deny_all_tools: bool,
    },

    /// List the tools scripts can call
    Tools,
}

fn parse_input(raw: &str) -> Result<(String, Object)> {
    let Some((name, json)) = raw.split_once('=') else {
        bail!("input '{raw}' is not of the form name=<json>");
    };
    let value: serde_json::Value =
        serde_json::from_str(json).with_context(|| format!("input '{name}' is not valid JSON"))?;
    Ok((name.to_string(), Object::from_json(&value)))
}

fn render(value: &Object) -> String {
    match value.to_json() {
        Ok(json) => serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string()),
        Err(_) => format!("{value:?}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.apply_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let database = Database::connect(&config.database)
        .await
        .with_context(|| format!("opening database {}", config.database.url))?;
    let notes: Arc<dyn ToolProvider> = Arc::new(NotesToolProvider::new(database.clone()));

    match cli.command {
        Commands::Tools => {
            for tool in notes.get_tool_definitions().await? {
                println!("{}  {}", tool.name, tool.description);
            }
        }
        Commands::Run {
            file,
            inputs,
            sync,
            timezone,
            allow_tools,
            deny_all_tools,
        } => {
            let script = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let mut globals = Globals::new();
            for raw in &inputs {
                let (name, value) = parse_input(raw)?;
                globals = globals.value(name, value);
            }
            if !allow_tools.is_empty() {
                config.engine.allowed_tools =
                    Some(allow_tools.into_iter().collect::<BTreeSet<_>>());
            }
            config.engine.deny_all_tools |= deny_all_tools;

            let context = ExecutionContext::new("cli")
                .with_timezone(timezone)
                .with_database(database.clone())
                .with_tool_provider(notes)
                .with_attachments(Arc::new(SqliteAttachmentRegistry::new(database)));
            let engine = Arc::new(ScriptEngine::new(config.engine));

            let result = if sync {
                let engine = engine.clone();
                tokio::task::spawn_blocking(move || engine.evaluate(&script, globals, &context))
                    .await
                    .context("script thread failed")?
            } else {
                engine.evaluate_async(&script, globals, &context).await
            };
            let value = result?;
            println!("{}", render(&value));
            for request in engine.take_wake_requests() {
                eprintln!("wake requested: {}", serde_json::to_string(&request)?);
            }
        }
    }
    Ok(())
}
