//! Tamamo CLI entry point.

use tamamo::agent::{AgentDirectory as _, SqliteAgentDirectory};
use tamamo::config::Config;
use tamamo::conversation::{FsHistoryStore, SqliteThreadStore};
use tamamo::db::Db;
use tamamo::llm::LlmManager;
use tamamo::messaging::{MessagingClientDyn, SlackEvent, SlackMessenger};
use tamamo::{MentionEvent, MentionHandler, MentionHandlerConfig, dispatch_events};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long in-flight mentions get to finish after ctrl-c.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "tamamo")]
#[command(about = "Slack bot that routes mentions to configured AI agents")]
struct Cli {
    /// Path to config file (optional)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to Slack over Socket Mode and answer mentions (default)
    Serve,
    /// Run a saved mention event (JSON) through the handler, replying in Slack
    Replay {
        /// Path to the event JSON
        event: PathBuf,
    },
    /// List active agents in the directory
    Agents,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)
            .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    }
    let _log_guard = tamamo::logging::init_tracing(cli.debug, config.log_dir.as_deref());

    tracing::info!(data_dir = %config.data_dir.display(), "configuration loaded");

    std::fs::create_dir_all(&config.data_dir).with_context(|| {
        format!(
            "failed to create data directory {}",
            config.data_dir.display()
        )
    })?;
    let db = Db::connect(&config.sqlite_path())
        .await
        .context("failed to connect to database")?;

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, &db).await,
        Command::Replay { event } => replay(&config, &db, &event).await,
        Command::Agents => list_agents(&db).await,
    };

    db.close().await;
    result
}

async fn connect_slack(config: &Config) -> anyhow::Result<Arc<SlackMessenger>> {
    let bot_token = config
        .slack
        .bot_token
        .clone()
        .context("slack bot token is not configured (SLACK_BOT_TOKEN)")?;
    let messenger = SlackMessenger::connect(bot_token)
        .await
        .context("failed to connect to slack")?;
    Ok(Arc::new(messenger))
}

fn build_handler(
    config: &Config,
    db: &Db,
    messaging: Arc<dyn MessagingClientDyn>,
) -> anyhow::Result<MentionHandler> {
    let mut handler_config = MentionHandlerConfig::new()
        .with_messaging(messaging)
        .with_thread_store(Arc::new(SqliteThreadStore::new(db.sqlite.clone())))
        .with_history_store(Arc::new(FsHistoryStore::new(config.history_dir())))
        .with_agent_directory(Arc::new(SqliteAgentDirectory::new(db.sqlite.clone())));

    if config.llm.is_configured() {
        let manager =
            Arc::new(LlmManager::new(config.llm.clone()).context("failed to build LLM manager")?);
        handler_config = handler_config.with_gateway(manager);
    } else {
        tracing::warn!("no LLM providers configured, mentions will get a setup notice");
    }

    if let Some(image_base_url) = &config.display.image_base_url {
        handler_config = handler_config.with_image_base_url(image_base_url.clone());
    }

    Ok(MentionHandler::new(handler_config)?)
}

async fn serve(config: &Config, db: &Db) -> anyhow::Result<()> {
    let app_token = config
        .slack
        .app_token
        .clone()
        .context("slack app token is not configured (SLACK_APP_TOKEN)")?;
    let messenger = connect_slack(config).await?;
    let bot_user_id = messenger.bot_user_id().to_string();
    let handler = build_handler(config, db, messenger)?;

    let (events_tx, events_rx) = mpsc::channel::<SlackEvent>(256);
    let listener = tokio::spawn(async move {
        if let Err(error) = tamamo::messaging::slack::listen(&app_token, &bot_user_id, events_tx).await
        {
            tracing::error!(%error, "slack listener stopped");
        }
    });

    tracing::info!("tamamo is running");

    let shutdown = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let report = dispatch_events(handler, events_rx, shutdown, SHUTDOWN_GRACE).await;
    listener.abort();
    tracing::info!(
        drained = report.drained,
        aborted = report.aborted,
        "event dispatch stopped"
    );

    Ok(())
}

async fn replay(config: &Config, db: &Db, event_path: &std::path::Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(event_path)
        .with_context(|| format!("failed to read {}", event_path.display()))?;
    let event: MentionEvent = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse mention event in {}", event_path.display()))?;

    let messenger = connect_slack(config).await?;
    let handler = build_handler(config, db, messenger)?;
    handler
        .handle_mention(&event)
        .await
        .context("mention handling failed")?;

    tracing::info!(channel_id = %event.channel_id, ts = %event.ts, "replayed mention");
    Ok(())
}

async fn list_agents(db: &Db) -> anyhow::Result<()> {
    let directory = SqliteAgentDirectory::new(db.sqlite.clone());
    let (agents, total) = directory
        .list_active_agents(0, i64::MAX)
        .await
        .context("failed to list agents")?;

    for agent in &agents {
        println!("{:<32} {} - {}", agent.agent_id, agent.name, agent.description);
    }
    println!("{total} active agent(s)");
    Ok(())
}
