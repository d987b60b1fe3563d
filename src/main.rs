mod settings;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kana_core::events::AgentEvent;
use kana_core::provider::{ChatTransport, Summarizer};
use kana_engine::{
    create_default_registry, spawn_compaction, ApprovalHandler, ApprovalRequest, CostRefresher,
    DiaryCompactor, Orchestrator, ResourceGauge, ToolExecutor,
};
use kana_llm::billing::OpenAiBilling;
use kana_llm::openai::OpenAiClient;
use kana_llm::reliable::Reliable;
use kana_store::{Database, KvRepo};

use settings::Settings;

#[derive(Parser, Debug)]
#[command(name = "kana", about = "A conversational companion with a diary")]
struct Args {
    /// Settings file (defaults to ~/.kana/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Override the database path.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Override the chat model.
    #[arg(long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let settings_file = args.settings.clone().unwrap_or_else(settings::settings_path);
    let (mut settings, settings_error) = match settings::load_settings_from_path(&settings_file) {
        Ok(s) => (s, None),
        Err(e) => (Settings::default(), Some(e)),
    };
    if let Some(db) = args.db {
        settings.storage.database_path = db;
    }
    if let Some(model) = args.model {
        settings.llm.model = model;
    }

    let _telemetry = kana_telemetry::init_telemetry(settings.telemetry_config());
    if let Some(e) = settings_error {
        warn!(path = %settings_file.display(), error = %e, "failed to load settings, using defaults");
    }

    let db_path = &settings.storage.database_path;
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let db = Database::open(db_path).context("failed to open database")?;
    info!(path = %db_path.display(), "database opened");

    let api_key = std::env::var(&settings.llm.api_key_env)
        .with_context(|| format!("{} is not set", settings.llm.api_key_env))?;
    let client = OpenAiClient::new(
        settings.llm.base_url.clone(),
        settings.llm.model.clone(),
        SecretString::from(api_key),
    )?;
    let llm = Arc::new(Reliable::with_defaults(client));
    let transport: Arc<dyn ChatTransport> = llm.clone();
    let summarizer: Arc<dyn Summarizer> = llm;

    let (event_tx, _) = broadcast::channel::<AgentEvent>(256);
    let working_directory = match settings.agent.working_directory.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp")),
    };
    let registry = Arc::new(create_default_registry(db.clone(), Arc::clone(&summarizer)));
    let executor = ToolExecutor::new(registry, event_tx.clone(), working_directory)
        .with_tool_timeout(Duration::from_secs(settings.agent.tool_timeout_secs.max(1)));

    let gauge_config = settings.gauge_config();
    let refresh_interval = gauge_config.cost_refresh_interval;
    let gauge = ResourceGauge::restore(gauge_config, &KvRepo::new(db.clone())).shared();

    let cancel = CancellationToken::new();
    match std::env::var(&settings.llm.admin_key_env) {
        Ok(admin_key) if !admin_key.trim().is_empty() => {
            let billing = OpenAiBilling::new(settings.llm.base_url.clone(), SecretString::from(admin_key))?;
            CostRefresher::new(Arc::new(billing), Arc::clone(&gauge), KvRepo::new(db.clone()))
                .spawn(refresh_interval, cancel.clone());
        }
        _ => info!("no admin key, daily spend will not be refreshed"),
    }

    let _compaction = spawn_compaction(Arc::new(DiaryCompactor::new(db.clone(), Arc::clone(&summarizer))));

    let mut orchestrator = Orchestrator::new(
        db,
        transport,
        summarizer,
        executor,
        gauge,
        event_tx,
        settings.orchestrator_config(),
    );
    if let Err(e) = orchestrator.start() {
        warn!(error = %e, "could not resume the previous conversation");
    }

    let (approval_tx, approval_rx) = mpsc::unbounded_channel::<ApprovalRequest>();
    let handler: ApprovalHandler = Arc::new(move |request| {
        if let Err(mpsc::error::SendError(request)) = approval_tx.send(request) {
            request.resolve(false);
        }
    });
    orchestrator.set_approval_handler(Some(handler));

    tokio::spawn(print_activity(orchestrator.subscribe()));

    let result = repl(&mut orchestrator, approval_rx).await;
    cancel.cancel();
    result
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

enum Command<'a> {
    Say(&'a str),
    Retry,
    Rest,
    Quit,
}

fn parse_command(line: &str) -> Option<Command<'_>> {
    match line.trim() {
        "" => None,
        "/retry" => Some(Command::Retry),
        "/rest" => Some(Command::Rest),
        "/quit" | "/exit" => Some(Command::Quit),
        text => Some(Command::Say(text)),
    }
}

async fn repl(
    orchestrator: &mut Orchestrator,
    mut approvals: mpsc::UnboundedReceiver<ApprovalRequest>,
) -> Result<()> {
    let mut lines = spawn_stdin_reader();

    loop {
        prompt();
        let Some(line) = lines.recv().await else {
            break;
        };
        let reply = match parse_command(&line) {
            None => continue,
            Some(Command::Quit) => break,
            Some(Command::Rest) => {
                rest(orchestrator).await;
                continue;
            }
            Some(Command::Retry) => {
                let turn = orchestrator.retry();
                drive(turn, &mut approvals, &mut lines).await
            }
            Some(Command::Say(text)) => {
                let turn = orchestrator.run(text);
                drive(turn, &mut approvals, &mut lines).await
            }
        };

        match reply {
            Ok(text) => println!("[{}] {text}", orchestrator.emotion()),
            Err(e) => eprintln!("error: {e}"),
        }

        if orchestrator.rest_pending() {
            rest(orchestrator).await;
        }
    }

    Ok(())
}

/// Poll a turn to completion, answering approval prompts from stdin as they arrive.
async fn drive<F, T>(
    turn: F,
    approvals: &mut mpsc::UnboundedReceiver<ApprovalRequest>,
    lines: &mut mpsc::UnboundedReceiver<String>,
) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::pin!(turn);
    loop {
        tokio::select! {
            result = &mut turn => return result,
            Some(request) = approvals.recv() => {
                print!("Allow {}({})? [y/N] ", request.name, request.args_json);
                let _ = std::io::stdout().flush();
                let approved = lines
                    .recv()
                    .await
                    .is_some_and(|answer| matches!(answer.trim(), "y" | "Y" | "yes"));
                request.resolve(approved);
            }
        }
    }
}

async fn rest(orchestrator: &mut Orchestrator) {
    let outcome = orchestrator.rest().await;
    if outcome.ended {
        println!("(session ended)");
    }
}

async fn print_activity(mut events: broadcast::Receiver<AgentEvent>) {
    loop {
        match events.recv().await {
            Ok(AgentEvent::InfoAdded { label, content }) => println!("{label}: {content}"),
            Ok(AgentEvent::ToolDenied { tool_name, .. }) => println!("({tool_name} denied)"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "activity printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
