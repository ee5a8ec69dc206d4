use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Level};

use hoff_core::CommandMatcher;
use hoff_server::config::Config;
use hoff_server::git::GitDriver;
use hoff_server::github::GithubClient;
use hoff_server::interpreter::Interpreter;
use hoff_server::queue::{logic_queue, webhook_queue, WebhookSender};
use hoff_server::webhook::webhook_router;
use hoff_server::worker::{run_webhook_adapter, LogicWorker};
use hoff_server::{persistence, AppState, ProjectQueue};

/// Merge-train gatekeeper: serializes approved pull requests through a
/// rebase, CI, fast-forward pipeline, one candidate at a time.
#[derive(Debug, Parser)]
#[command(name = "hoff")]
struct Args {
    /// Path of the configuration file.
    config: PathBuf,

    /// Disable comments and pushes; events are still handled and state is
    /// still persisted.
    #[arg(long)]
    read_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)?;
    let webhook_secret = config.webhook_secret()?;
    let access_token = config.access_token()?;

    if args.read_only {
        info!("running in read-only mode, comments and pushes are disabled");
    }

    let mut project_queues = Vec::new();
    let mut stop_senders: Vec<WebhookSender> = Vec::new();
    let mut supervisors = Vec::new();

    for project in &config.projects {
        let (webhook_tx, webhook_rx) = webhook_queue(config.queue_capacity);
        let (logic_tx, logic_rx) = logic_queue(config.queue_capacity);

        let initial = persistence::load_state(&project.state_file).with_context(|| {
            format!(
                "failed to restore state of {}/{}",
                project.owner, project.repository
            )
        })?;
        info!(
            "{}/{}: restored {} pull requests",
            project.owner,
            project.repository,
            initial.len()
        );

        let adapter_project = project.clone();
        let adapter = tokio::task::spawn_blocking(move || {
            run_webhook_adapter(&adapter_project, webhook_rx, logic_tx);
            anyhow::Ok(())
        });

        // The interpreter's drivers live on the worker's thread: the
        // blocking HTTP client must not be created or dropped on the
        // async runtime.
        let worker_project = project.clone();
        let worker_token = access_token.clone();
        let comment_prefix = config.trigger.comment_prefix.clone();
        let read_only = args.read_only;
        let logic = tokio::task::spawn_blocking(move || {
            let git = GitDriver::new(worker_project.checkout.clone(), worker_project.clone_url());
            let github = GithubClient::new(
                &worker_project.owner,
                &worker_project.repository,
                worker_token,
            )?;
            let interpreter = Interpreter::new(git, github, &worker_project, read_only);
            let worker = LogicWorker::new(
                CommandMatcher::new(&comment_prefix),
                interpreter,
                worker_project.state_file.clone(),
                initial,
            );
            worker.run(logic_rx)
        });

        let slug = format!("{}/{}", project.owner, project.repository);
        supervisors.push(supervise(format!("webhook adapter for {slug}"), adapter));
        supervisors.push(supervise(format!("logic worker for {slug}"), logic));

        stop_senders.push(webhook_tx.clone());
        project_queues.push(ProjectQueue {
            owner: project.owner.clone(),
            repository: project.repository.clone(),
            sender: webhook_tx,
        });
    }

    let app_state = Arc::new(AppState {
        webhook_secret,
        projects: project_queues,
    });
    let app = webhook_router(app_state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    info!("listening on port {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")?;

    // Drain the pipeline: the sentinel flows through the adapter into the
    // worker, which persists its last state and exits.
    info!("shutting down, draining workers");
    for sender in stop_senders {
        let _ = sender.send(None);
    }
    for supervisor in supervisors {
        let _ = supervisor.await;
    }

    Ok(())
}

/// A worker that dies outside of shutdown is an invariant violation or a
/// failing driver; take the whole process down so the operator notices
/// and state is restored from the last snapshot.
fn supervise(name: String, handle: JoinHandle<Result<()>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => info!("{name} stopped"),
            Ok(Err(e)) => {
                error!("{name} failed: {e:#}");
                std::process::exit(1);
            }
            Err(e) => {
                error!("{name} panicked: {e}");
                std::process::exit(1);
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to install the shutdown handler: {e}");
    }
}
