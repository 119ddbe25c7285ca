use std::path::PathBuf;

use clap::{Parser, Subcommand};
use taskloop_runtime::{DEFAULT_GATEWAY_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "taskloop",
    about = "Return-loop bridge between a task tracker and an agent gateway",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "TASKLOOP_DATABASE",
        default_value = ".taskloop/taskloop.sqlite3",
        help = "SQLite database holding tasks, activities, return-loop threads, and the ingest ledger"
    )]
    pub database: PathBuf,

    #[arg(
        long = "gateway-url",
        env = "OPENCLAW_GATEWAY_URL",
        help = "Shared gateway base URL; OPENCLAW_GATEWAY_URL_<HANDLE> overrides it per agent"
    )]
    pub gateway_url: Option<String>,

    #[arg(
        long = "gateway-token",
        env = "OPENCLAW_GATEWAY_TOKEN",
        hide_env_values = true,
        help = "Shared gateway bearer token; OPENCLAW_GATEWAY_TOKEN_<HANDLE> overrides it per agent"
    )]
    pub gateway_token: Option<String>,

    #[arg(
        long = "gateway-timeout-ms",
        env = "OPENCLAW_GATEWAY_TIMEOUT_MS",
        default_value_t = DEFAULT_GATEWAY_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "HTTP timeout applied to every gateway request"
    )]
    pub gateway_timeout_ms: u64,

    #[arg(
        long = "poller-enabled",
        env = "OPENCLAW_POLLER_ENABLED",
        help = "Set to 0 to disable the return-loop poller; any other value enables it"
    )]
    pub poller_enabled: Option<String>,

    #[arg(
        long = "poll-interval-ms",
        env = "OPENCLAW_POLLER_INTERVAL_MS",
        default_value_t = DEFAULT_POLL_INTERVAL_MS,
        help = "Return-loop poll interval in milliseconds (minimum 1000)"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long = "public-url",
        env = "KANEO_PUBLIC_URL",
        help = "Public base URL of the task tracker used for links in agent messages"
    )]
    pub public_url: Option<String>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the poller until Ctrl-C.
    Serve {
        #[arg(
            long = "comment-events-stdin",
            default_value_t = false,
            help = "Read task.comment_created events as JSON lines from stdin and route their mentions"
        )]
        comment_events_stdin: bool,
    },
    /// Run a single poll pass and print its report as JSON.
    PollOnce,
    /// Forward one comment to the agents it mentions.
    RouteComment {
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long = "project-id")]
        project_id: String,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        comment: String,
    },
    /// Print tracked return-loop threads as JSON.
    Threads {
        #[arg(long, default_value_t = 50, value_parser = parse_positive_usize)]
        limit: usize,
    },
    /// Create or update a task (and its project) in the local task board.
    UpsertTask {
        #[arg(long = "task-id")]
        task_id: String,
        #[arg(long = "project-id")]
        project_id: String,
        #[arg(long = "project-name")]
        project_name: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        number: Option<i64>,
        #[arg(long, default_value = "to-do")]
        status: String,
    },
}
