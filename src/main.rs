use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tandem::cli::{Cli, Commands};
use tandem::config::TandemConfig;
use tandem::detect::{Ingestor, RecordDraft};
use tandem::error::Result;
use tandem::exec::ExecutorRegistry;
use tandem::record::AgentId;
use tandem::schedule::system_clock;
use tandem::stage::{Stage, TaskStore};
use tandem::sync::{write_ignore_rules, GitRunner};
use tandem::triage::Triage;
use tandem::{AgentRuntime, DomainClassifier, StatusAggregator};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tandem=debug")
    } else {
        EnvFilter::new("tandem=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir()?,
    };

    match cli.command {
        Commands::Init { agent } => cmd_init(&root, agent.into()).await,
        Commands::Run => cmd_run(&root).await,
        Commands::Ingest {
            kind,
            source,
            payload,
            first_contact,
            irreversible,
        } => {
            let mut draft = RecordDraft::new(kind.into(), source, payload, Utc::now());
            draft.first_contact = first_contact;
            draft.irreversible = irreversible;
            cmd_ingest(&root, draft).await
        }
        Commands::Decide { id, outcome } => cmd_decide(&root, &id, outcome.into()).await,
        Commands::Sweep => cmd_sweep(&root).await,
        Commands::Reconcile => cmd_reconcile(&root).await,
        Commands::Fold => cmd_fold(&root).await,
        Commands::Delta { body } => cmd_delta(&root, &body).await,
        Commands::Status => cmd_status(&root).await,
    }
}

async fn build_runtime(root: &PathBuf) -> Result<Arc<AgentRuntime>> {
    let config = TandemConfig::load(root).await?;
    let store = Arc::new(TaskStore::open(root)?);
    let clock = system_clock();
    let audit = Arc::new(tandem::AuditLogger::new(store.root()));

    let classifier = DomainClassifier::new(config.classifier.clone());
    let ingestor = Ingestor::new(
        store.clone(),
        audit.clone(),
        clock.clone(),
        classifier,
        config.retry.clone(),
    );
    // No backing policy wired here: everything goes to a human until an
    // integration registers one.
    let triage = Triage::new(None, config.triage.clone());
    let executors = ExecutorRegistry::new(
        store.clone(),
        audit,
        clock.clone(),
        config.retry.clone(),
        config.agent.as_str(),
    );

    Ok(Arc::new(AgentRuntime::new(
        config, store, clock, triage, ingestor, executors,
    )))
}

async fn cmd_init(root: &PathBuf, agent: AgentId) -> Result<()> {
    TaskStore::init(root)?;
    write_ignore_rules(root)?;

    let mut config = TandemConfig::default();
    config.agent = agent;
    config.save(root).await?;

    let git = GitRunner::new(root);
    if !root.join(".git").exists() {
        git.init_repo().await?;
    }

    println!("Initialized tandem workspace for agent '{}' at {}", agent, root.display());
    Ok(())
}

async fn cmd_run(root: &PathBuf) -> Result<()> {
    let runtime = build_runtime(root).await?;
    runtime.startup()?;

    let _scheduler = runtime.spawn_loops();
    tokio::signal::ctrl_c().await?;
    println!("shutting down");
    Ok(())
}

async fn cmd_ingest(root: &PathBuf, draft: RecordDraft) -> Result<()> {
    let config = TandemConfig::load(root).await?;
    let store = Arc::new(TaskStore::open(root)?);

    let classifier = DomainClassifier::new(config.classifier.clone());
    let audit = Arc::new(tandem::AuditLogger::new(store.root()));
    let ingestor = Ingestor::new(store, audit, system_clock(), classifier, config.retry);

    if ingestor.ingest("cli", draft)? {
        println!("record created");
    } else {
        println!("duplicate record, skipped");
    }
    Ok(())
}

async fn cmd_decide(root: &PathBuf, id: &str, outcome: tandem::Decision) -> Result<()> {
    let runtime = build_runtime(root).await?;
    if runtime.decide(id, outcome)? {
        println!("{}: {}", id, outcome);
    } else {
        println!("{}: already decided, no-op", id);
    }
    Ok(())
}

async fn cmd_sweep(root: &PathBuf) -> Result<()> {
    let runtime = build_runtime(root).await?;
    let expired = runtime.sweep_once()?;
    println!("expired {} record(s)", expired);
    Ok(())
}

async fn cmd_reconcile(root: &PathBuf) -> Result<()> {
    let runtime = build_runtime(root).await?;
    runtime.reconcile_once().await?;
    println!("reconciliation pass complete");
    Ok(())
}

async fn cmd_fold(root: &PathBuf) -> Result<()> {
    let config = TandemConfig::load(root).await?;
    let aggregator = StatusAggregator::new(root, config.agent);
    let folded = aggregator.fold(system_clock().as_ref())?;
    println!("folded {} delta(s)", folded);
    Ok(())
}

async fn cmd_delta(root: &PathBuf, body: &str) -> Result<()> {
    let config = TandemConfig::load(root).await?;
    let aggregator = StatusAggregator::new(root, config.agent);
    let delta = aggregator.write_delta(system_clock().as_ref(), body)?;
    println!("delta {} written", delta.id);
    Ok(())
}

async fn cmd_status(root: &PathBuf) -> Result<()> {
    let store = TaskStore::open(root)?;

    println!("stage counts:");
    for stage in Stage::all() {
        let count = store.scan(stage)?.len();
        if count > 0 {
            println!("  {:<40} {}", stage.to_string(), count);
        }
    }

    let pending = store.scan(Stage::PendingApproval)?;
    if !pending.is_empty() {
        println!("\npending approvals:");
        for record in pending {
            let rationale = record
                .decision_trace
                .iter()
                .rev()
                .find(|t| t.action.starts_with("submitted for approval"))
                .map(|t| t.action.as_str())
                .unwrap_or("(no rationale)");
            let expires = record
                .expires_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            println!("  {} [{} {}] expires {}", record.id, record.kind, record.domain, expires);
            println!("    {}", rationale);
        }
    }

    Ok(())
}
