use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use taskloop_runtime::gateway_config::{GATEWAY_TOKEN_ENV, GATEWAY_URL_ENV};
use taskloop_runtime::{
    handle_task_comment_created, spawn_comment_created_subscriber, CommentEventBus,
    DispatchConfig, GatewayClient, GatewaySettings, PollerConfig, ReturnLoopDispatcher,
    ReturnLoopPoller, TaskCommentCreated,
};
use taskloop_store::{SqliteStore, TaskSummary, ThreadStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli_args::{Cli, CliCommand};

const CLI_USER_ID: &str = "taskloop-cli";

struct RuntimeContext {
    store: Arc<SqliteStore>,
    dispatcher: Arc<ReturnLoopDispatcher>,
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    let context = build_runtime_context(&cli)?;
    match &cli.command {
        CliCommand::Serve {
            comment_events_stdin,
        } => run_serve(&cli, &context, *comment_events_stdin).await,
        CliCommand::PollOnce => {
            let report = context.dispatcher.poll_return_loop_once().await?;
            print_json(&serde_json::to_value(report)?)
        }
        CliCommand::RouteComment {
            task_id,
            project_id,
            author,
            comment,
        } => {
            let event = TaskCommentCreated {
                task_id: task_id.clone(),
                user_id: CLI_USER_ID.to_string(),
                project_id: project_id.clone(),
                raw_comment: Some(comment.clone()),
                author_name: author.clone(),
            };
            let report = handle_task_comment_created(&context.dispatcher, &event)
                .await
                .unwrap_or_default();
            print_json(&serde_json::to_value(report)?)
        }
        CliCommand::Threads { limit } => {
            let threads = context.store.list_threads_to_poll(*limit).await?;
            print_json(&serde_json::to_value(threads)?)
        }
        CliCommand::UpsertTask {
            task_id,
            project_id,
            project_name,
            title,
            number,
            status,
        } => {
            context.store.upsert_project(project_id, project_name)?;
            let task = TaskSummary {
                task_id: task_id.clone(),
                project_id: project_id.clone(),
                title: title.clone(),
                number: *number,
                project_name: Some(project_name.clone()),
                status: status.clone(),
            };
            context.store.upsert_task(&task)?;
            print_json(&serde_json::to_value(task)?)
        }
    }
}

fn build_runtime_context(cli: &Cli) -> Result<RuntimeContext> {
    let store = Arc::new(SqliteStore::new(&cli.database).with_context(|| {
        format!("failed to open taskloop database {}", cli.database.display())
    })?);
    let settings = gateway_settings(cli, |key| std::env::var(key).ok());
    let gateway = GatewayClient::new(settings, cli.gateway_timeout_ms)?;
    let dispatcher = Arc::new(ReturnLoopDispatcher::with_store(
        store.clone(),
        gateway,
        DispatchConfig::new(cli.public_url.as_deref()),
    ));
    Ok(RuntimeContext { store, dispatcher })
}

/// Shared url/token come from the parsed CLI (flag or env); handle-specific
/// keys are read through `lookup`.
fn gateway_settings<F>(cli: &Cli, lookup: F) -> GatewaySettings
where
    F: Fn(&str) -> Option<String>,
{
    GatewaySettings::from_env_lookup(|key| match key {
        GATEWAY_URL_ENV => cli.gateway_url.clone(),
        GATEWAY_TOKEN_ENV => cli.gateway_token.clone(),
        other => lookup(other),
    })
}

async fn run_serve(cli: &Cli, context: &RuntimeContext, comment_events_stdin: bool) -> Result<()> {
    let poller_config = PollerConfig::from_flags(cli.poller_enabled.as_deref(), cli.poll_interval_ms)
        .context("invalid return-loop poller configuration")?;
    let poller = ReturnLoopPoller::new(context.dispatcher.clone(), poller_config);
    let start = poller.start()?;

    let bus = CommentEventBus::default();
    let subscriber = spawn_comment_created_subscriber(&bus, context.dispatcher.clone());
    let stdin_reader = comment_events_stdin.then(|| tokio::spawn(forward_stdin_events(bus.clone())));

    info!(
        database = %cli.database.display(),
        poller = ?start,
        configured_handles = ?context.dispatcher.gateway().settings().configured_handles(),
        "taskloop serve ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    poller.shutdown().await;
    if let Some(reader) = stdin_reader {
        reader.abort();
        let _ = reader.await;
    }
    drop(bus);
    let _ = subscriber.await;
    Ok(())
}

async fn forward_stdin_events(bus: CommentEventBus) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<TaskCommentCreated>(line) {
                    Ok(event) => {
                        bus.publish(event);
                    }
                    Err(error) => warn!(error = %error, "ignoring malformed comment event"),
                }
            }
            Ok(None) => break,
            Err(error) => {
                warn!(error = %error, "failed to read comment events from stdin");
                break;
            }
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render json output")?
    );
    Ok(())
}
