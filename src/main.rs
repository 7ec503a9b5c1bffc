//! Maestro binary: wiring, CLI surface and background janitors.
//!
//! `start` runs the interactive loop plus the approval-expiry and
//! draft-retention janitors; `ask` answers a single request; `janitor`
//! runs one sweep and exits. The HTTP surface is out of scope here --
//! an outer layer owns transport, auth and token issuance and hands the
//! core a verified identity plus an opaque provider token.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use maestro::agents::email::approval::ApprovalWorkflow;
use maestro::agents::email::EmailAgent;
use maestro::agents::file::FileAgent;
use maestro::agents::general::GeneralAgent;
use maestro::agents::notes::NotesAgent;
use maestro::agents::{calendar::CalendarAgent, AgentRegistry};
use maestro::clients::calendar::GoogleCalendarClient;
use maestro::clients::docs::GoogleDocsClient;
use maestro::clients::mail::GmailClient;
use maestro::config::Config;
use maestro::llm::openai::OpenAiProvider;
use maestro::llm::LlmGateway;
use maestro::logging::LogMode;
use maestro::orchestrator::compiler::ResponseCompiler;
use maestro::orchestrator::planner::Planner;
use maestro::orchestrator::{Orchestrator, OrchestratorRequest};
use maestro::store::SessionStore;
use maestro::types::{Clock, SystemClock};

/// Session id used by the interactive loop.
const CLI_SESSION_ID: &str = "cli";

#[derive(Parser)]
#[command(name = "maestro", about = "Multi-agent orchestration server")]
struct Cli {
    /// Path to config.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive loop with background janitors.
    Start,
    /// Answer a single request and exit.
    Ask {
        /// The request text.
        prompt: String,
        /// Session to run in.
        #[arg(long, default_value = CLI_SESSION_ID)]
        session: String,
    },
    /// Run the approval-expiry and draft-retention sweeps once.
    Janitor,
}

/// Everything the subcommands need, wired once.
struct Runtime {
    orchestrator: Arc<Orchestrator>,
    workflow: Arc<ApprovalWorkflow>,
    store: Arc<SessionStore>,
    config: Config,
}

fn build_runtime(config: Config) -> Runtime {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let api_key = config.llm.api_key().unwrap_or_default();
    if api_key.is_empty() {
        warn!(
            env = %config.llm.api_key_env,
            "no LLM API key in environment; completions will fail until it is set"
        );
    }
    let provider = OpenAiProvider::new(&config.llm.base_url, &api_key, &config.llm.model);
    let gateway = Arc::new(LlmGateway::with_limits(
        Box::new(provider),
        config.llm.max_concurrency,
        config.llm.call_timeout(),
    ));

    let store = Arc::new(SessionStore::new(config.store.resolved_data_dir()));
    let workflow = Arc::new(ApprovalWorkflow::new(Arc::clone(&store), Arc::clone(&clock)));

    let mail = Arc::new(GmailClient::new());
    let calendar = Arc::new(GoogleCalendarClient::new());
    let docs = Arc::new(GoogleDocsClient::new());

    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(CalendarAgent::new(
        Arc::clone(&gateway),
        calendar,
        Arc::clone(&clock),
    )));
    registry.register(Arc::new(NotesAgent::new(Arc::clone(&gateway), docs)));
    registry.register(Arc::new(FileAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&store),
    )));
    registry.register(Arc::new(EmailAgent::new(
        Arc::clone(&gateway),
        mail,
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&workflow),
    )));
    registry.register(Arc::new(GeneralAgent::new(
        Arc::clone(&gateway),
        Arc::clone(&clock),
    )));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        Planner::new(Arc::clone(&gateway)),
        ResponseCompiler::new(Arc::clone(&gateway)),
        Arc::clone(&store),
        Arc::clone(&clock),
    ));

    Runtime {
        orchestrator,
        workflow,
        store,
        config,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load(&config_path).context("failed to load configuration")?;

    let _logging = maestro::logging::init(match &cli.command {
        Command::Start => LogMode::Server {
            logs_dir: config.store.logs_dir(),
        },
        _ => LogMode::OneShot,
    })
    .context("failed to initialise logging")?;

    match cli.command {
        Command::Start => {
            let runtime = build_runtime(config);
            run_start(runtime).await
        }
        Command::Ask { prompt, session } => {
            let runtime = build_runtime(config);
            run_ask(&runtime, &prompt, &session).await
        }
        Command::Janitor => {
            let runtime = build_runtime(config);
            run_janitor_once(&runtime).await
        }
    }
}

async fn run_start(runtime: Runtime) -> Result<()> {
    info!("maestro starting");
    let shutdown = CancellationToken::new();

    spawn_janitors(&runtime, &shutdown);

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    stdout.write_all(b"maestro ready. Type a request, Ctrl-C to exit.\n> ").await?;
    stdout.flush().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                shutdown.cancel();
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    stdout.write_all(b"> ").await?;
                    stdout.flush().await?;
                    continue;
                }
                match handle_request(&runtime, trimmed, CLI_SESSION_ID, &shutdown).await {
                    Ok(response) => {
                        stdout.write_all(response.as_bytes()).await?;
                        stdout.write_all(b"\n> ").await?;
                    }
                    Err(e) => {
                        stdout.write_all(format!("error: {e}\n> ").as_bytes()).await?;
                    }
                }
                stdout.flush().await?;
            }
        }
    }

    info!("maestro shutting down");
    Ok(())
}

async fn run_ask(runtime: &Runtime, prompt: &str, session: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let response = handle_request(runtime, prompt, session, &cancel).await?;
    let mut stdout = tokio::io::stdout();
    stdout.write_all(response.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

async fn handle_request(
    runtime: &Runtime,
    prompt: &str,
    session: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    let request = OrchestratorRequest {
        user_request: prompt.to_owned(),
        session_id: session.to_owned(),
        user_id: None,
        provider_token: runtime.config.providers.token(),
        file_blob: None,
        file_name: None,
    };
    let response = runtime
        .orchestrator
        .handle(request, cancel)
        .await
        .context("request failed")?;
    Ok(response.response)
}

/// Approval-expiry and draft-retention sweeps as periodic tasks.
fn spawn_janitors(runtime: &Runtime, shutdown: &CancellationToken) {
    let workflow = Arc::clone(&runtime.workflow);
    let approvals_shutdown = shutdown.clone();
    let approval_interval = runtime.config.janitor.approval_sweep_interval();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(approval_interval);
        loop {
            tokio::select! {
                _ = approvals_shutdown.cancelled() => break,
                _ = tick.tick() => {
                    if let Err(e) = workflow.expire_overdue().await {
                        warn!(error = %e, "approval expiry sweep failed");
                    }
                }
            }
        }
    });

    let store = Arc::clone(&runtime.store);
    let retention_shutdown = shutdown.clone();
    let retention_interval = runtime.config.janitor.retention_sweep_interval();
    let retention_days = runtime.config.janitor.draft_retention_days;
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(retention_interval);
        loop {
            tokio::select! {
                _ = retention_shutdown.cancelled() => break,
                _ = tick.tick() => {
                    match store.cleanup_old_drafts(retention_days, chrono::Utc::now()).await {
                        Ok(deleted) if deleted > 0 => {
                            info!(deleted, "draft retention sweep done");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "draft retention sweep failed"),
                    }
                }
            }
        }
    });
}

async fn run_janitor_once(runtime: &Runtime) -> Result<()> {
    let expired = runtime.workflow.expire_overdue().await?;
    let deleted = runtime
        .store
        .cleanup_old_drafts(runtime.config.janitor.draft_retention_days, chrono::Utc::now())
        .await?;
    info!(expired, deleted, "janitor sweep complete");
    println!("expired {expired} approval(s), deleted {deleted} old draft(s)");
    Ok(())
}
