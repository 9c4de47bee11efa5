use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use strand_core::app::{App, AppBuilder, TaskHandler};
use strand_core::config::{Environment, StrandConfig};
use strand_core::domain::{DedupKey, GroupId, TaskMessage};
use strand_core::error::HandlerError;
use strand_core::impls::CountingEventSink;
use strand_core::ports::DeadLetterStore;
use strand_core::queue::Queue;
use strand_core::telemetry;

#[derive(Parser)]
#[command(name = "strand", about = "Ordered, group-partitioned task queue")]
struct Cli {
    /// TOML config file. Overrides the environment preset.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Environment preset (dev, staging, prod)
    #[arg(long, env = "STRAND_ENV", default_value = "dev", global = true)]
    env: Environment,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as JSON
    ShowConfig,

    /// Run an in-process queue with a worker pool over generated tasks
    Demo(DemoArgs),
}

#[derive(Args)]
struct DemoArgs {
    /// Number of message groups
    #[arg(long, default_value = "3")]
    groups: u32,

    /// Tasks submitted per group
    #[arg(long, default_value = "5")]
    tasks: u32,

    /// Make every Nth task a poison message (0 = none)
    #[arg(long, default_value = "0")]
    fail_every: u32,

    /// Visibility timeout in seconds
    #[arg(long)]
    visibility_timeout: Option<u64>,

    /// Receives before a message is dead-lettered
    #[arg(long)]
    max_receive_count: Option<u32>,

    /// Give up waiting after this many seconds
    #[arg(long, default_value = "30")]
    timeout: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DemoPayload {
    group: String,
    seq: u32,
    poison: bool,
}

/// Records the order in which each group's tasks complete.
#[derive(Default)]
struct DemoHandler {
    completed: Mutex<BTreeMap<String, Vec<u32>>>,
}

impl DemoHandler {
    fn completed(&self) -> BTreeMap<String, Vec<u32>> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TaskHandler for DemoHandler {
    async fn handle(&self, message: &TaskMessage) -> Result<(), HandlerError> {
        let payload: DemoPayload = serde_json::from_slice(&message.payload)
            .map_err(|e| HandlerError::new(format!("json decode: {e}")))?;

        if payload.poison {
            return Err(HandlerError::new(format!(
                "poison task {}#{} (receive {})",
                payload.group, payload.seq, message.receive_count
            )));
        }

        sleep(Duration::from_millis(5)).await;
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(payload.group)
            .or_default()
            .push(payload.seq);
        Ok(())
    }
}

fn load_config(cli: &Cli) -> StrandConfig {
    let result = match &cli.config {
        Some(path) => StrandConfig::load(path),
        None => Ok(StrandConfig::for_environment(cli.env)),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        process::exit(1);
    })
}

fn cmd_show_config(config: &StrandConfig) {
    match serde_json::to_string_pretty(config) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

async fn cmd_demo(mut config: StrandConfig, args: DemoArgs) {
    if let Some(secs) = args.visibility_timeout {
        config.queue.visibility_timeout_secs = secs;
    }
    if let Some(count) = args.max_receive_count {
        config.queue.max_receive_count = count;
    }

    let handler = Arc::new(DemoHandler::default());
    let events = Arc::new(CountingEventSink::new());
    let app = match AppBuilder::new(config)
        .event_sink(events.clone())
        .handler(handler.clone())
        .build()
    {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = submit_tasks(&app, &args).await {
        eprintln!("Error: submit failed: {e}");
        app.shutdown().await;
        process::exit(1);
    }

    let drained = tokio::select! {
        drained = wait_for_drain(&app, Duration::from_secs(args.timeout)) => drained,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            false
        }
    };

    let counts = app.queue().counts_by_state().await.unwrap_or_default();
    let dead_letters: Vec<_> = app.dead_letters().list().collect();
    let completed = handler.completed();
    app.shutdown().await;

    let in_order = completed
        .values()
        .all(|seqs| seqs.windows(2).all(|w| w[0] < w[1]));

    println!("completed per group:");
    for (group, seqs) in &completed {
        println!("  {group}: {seqs:?}");
    }
    println!("per-group order preserved: {in_order}");
    println!("events: {}", to_json(&events.snapshot()));
    println!("queue: {}", to_json(&counts));
    println!("dead letters: {}", dead_letters.len());
    for record in &dead_letters {
        println!(
            "  {} group={} receives={} reason={:?} moved_at={}",
            record.message.id,
            record.message.group_id,
            record.message.receive_count,
            record.reason,
            record.moved_at
        );
    }

    if !drained {
        eprintln!("Error: queue did not drain");
        process::exit(1);
    }
    if !in_order {
        process::exit(2);
    }
}

async fn submit_tasks(app: &App, args: &DemoArgs) -> Result<(), Box<dyn std::error::Error>> {
    let queue = app.queue();
    let mut n = 0u32;
    for seq in 0..args.tasks {
        for g in 0..args.groups {
            n += 1;
            let group = format!("group-{g}");
            let payload = DemoPayload {
                group: group.clone(),
                seq,
                poison: args.fail_every > 0 && n % args.fail_every == 0,
            };
            let bytes = serde_json::to_vec(&payload)?;
            let key = DedupKey::new(format!("{group}/{seq}"));

            let id = queue
                .submit(GroupId::new(group.clone()), Some(key.clone()), bytes.clone())
                .await?;
            // A retried submission collapses into the original message.
            if seq == 0 {
                let again = queue.submit(GroupId::new(group), Some(key), bytes).await?;
                if again != id {
                    warn!(task_id = %id, duplicate = %again, "resubmission was not deduplicated");
                }
            }
        }
    }
    info!(submitted = n, "demo tasks submitted");
    Ok(())
}

async fn wait_for_drain(app: &App, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        match app.queue().counts_by_state().await {
            Ok(counts) if counts.is_drained() => return true,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error: {e}");
                return false;
            }
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unencodable: {e}>"))
}

#[tokio::main]
async fn main() {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli);

    match cli.command {
        Commands::ShowConfig => cmd_show_config(&config),
        Commands::Demo(args) => cmd_demo(config, args).await,
    }
}
