// src/main.rs
// Thin demo binary wiring the traffic engine together end to end: a
// minimal flag surface per subcommand, not a replica of the original
// tool's full CLI, key-file generation, or deployment automation.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use malaria_bridge::{BridgingSender, ThreadedBridgingSender};
use malaria_core::generator::{GeneratorOptions, create_generator};
use malaria_core::report::dump_json;
use malaria_core::stats::aggregate_sender_stats;
use malaria_listener::{ListenerOptions, TrackingListener};
use malaria_sender::TrackingSender;
use malaria_workers::{PoolArgs, WORKER_INTERNAL_FLAG, WorkerArgs, run_single_worker, run_worker_pool};
use rumqttc::QoS;
use tracing::error;

#[derive(Parser)]
#[command(name = "malaria", about = "MQTT load-generation and observation toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish a generated message stream against a broker directly.
    Send(SendArgs),
    /// Subscribe and wait for a known message sequence from N clients.
    Listen(ListenArgs),
    /// Run a pool of independent publisher worker processes.
    Workers(WorkersArgs),
    /// Run a single publisher behind a private relay broker.
    Bridge(BridgeArgs),
}

#[derive(Args)]
struct SendArgs {
    #[arg(long)]
    host: String,
    #[arg(long, default_value_t = 1883)]
    port: u16,
    #[arg(long)]
    clientid: String,
    #[arg(long, default_value_t = 100)]
    msg_count: u64,
    #[arg(long, default_value_t = 200)]
    msg_size: usize,
    #[arg(long, default_value_t = 1)]
    qos: u8,
    #[arg(long, default_value_t = false)]
    timing: bool,
    #[arg(long, default_value_t = 0.0)]
    msgs_per_second: f64,
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(Args)]
struct ListenArgs {
    #[arg(long)]
    host: String,
    #[arg(long, default_value_t = 1883)]
    port: u16,
    #[arg(long)]
    clientid: String,
    #[arg(long, default_value = "mqtt-malaria/#")]
    topic_filter: String,
    #[arg(long, default_value_t = 1)]
    qos: u8,
    #[arg(long, default_value_t = 100)]
    msg_count: u64,
    #[arg(long, default_value_t = 1)]
    client_count: u64,
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(Args)]
struct WorkersArgs {
    #[arg(long)]
    host: String,
    #[arg(long, default_value_t = 1883)]
    port: u16,
    #[arg(long)]
    label: String,
    #[arg(long, default_value_t = 4)]
    worker_count: u32,
    #[arg(long, default_value_t = 100)]
    msg_count: u64,
    #[arg(long, default_value_t = 200)]
    msg_size: usize,
    #[arg(long, default_value_t = 1)]
    qos: u8,
    #[arg(long, default_value_t = false)]
    timing: bool,
    #[arg(long, default_value_t = 0.0)]
    msgs_per_second: f64,
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,
    /// PSK key file (one "identity:hex_key" entry per line). When given,
    /// its line count overrides --worker-count and each worker's clientid
    /// becomes that key's identity half.
    #[arg(long)]
    psk_keyfile: Option<PathBuf>,
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(Args)]
struct BridgeArgs {
    #[arg(long, default_value = "mosquitto")]
    broker_command: String,
    #[arg(long)]
    target_host: String,
    #[arg(long, default_value_t = 1883)]
    target_port: u16,
    #[arg(long)]
    label: String,
    #[arg(long)]
    auth: Option<String>,
    /// PSK key file (one "identity:hex_key" entry per line). When given,
    /// runs one bridge per key (the thread-ratio ThreadedBridgingSender
    /// variant) instead of the single bridge --auth selects.
    #[arg(long)]
    psk_keyfile: Option<PathBuf>,
    #[arg(long, default_value_t = 100)]
    msg_count: u64,
    #[arg(long, default_value_t = 200)]
    msg_size: usize,
    #[arg(long, default_value_t = 1)]
    qos: u8,
    #[arg(long)]
    json_out: Option<PathBuf>,
}

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();
    if let Some(pos) = argv.iter().position(|a| a == WORKER_INTERNAL_FLAG) {
        return run_internal_worker(&argv, pos).await;
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

// run_internal_worker is the hidden re-exec entry point malaria-workers
// dispatches to. Never reachable through the public subcommand surface --
// only through the exact flag value malaria-workers uses when spawning a
// worker process. Prints exactly one JSON line (the worker's SenderStats)
// on stdout, which the controller parses back.
async fn run_internal_worker(argv: &[String], flag_pos: usize) -> ExitCode {
    let Some(payload) = argv.get(flag_pos + 1) else {
        eprintln!("{WORKER_INTERNAL_FLAG} requires a JSON payload argument");
        return ExitCode::FAILURE;
    };

    let args: WorkerArgs = match serde_json::from_str(payload) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("malformed worker args: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run_single_worker(&args).await {
        Ok(stats) => {
            println!("{}", serde_json::to_string(&stats).expect("SenderStats always serializes"));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("worker {} failed: {e}", args.index);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Send(args) => run_send(args).await,
        Command::Listen(args) => run_listen(args).await,
        Command::Workers(args) => run_workers(args).await,
        Command::Bridge(args) => run_bridge(args).await,
    }
}

async fn run_send(args: SendArgs) -> anyhow::Result<()> {
    let sender = TrackingSender::new(&args.host, args.port, &args.clientid, None).await?;
    let generator = create_generator(
        &args.clientid,
        &GeneratorOptions {
            msg_count: args.msg_count,
            msg_size: args.msg_size,
            timing: args.timing,
            msgs_per_second: args.msgs_per_second,
            jitter: args.jitter,
        },
    );
    sender.run(generator, qos_from_u8(args.qos)).await?;
    let stats = sender.stats().await;
    sender.stop().await?;

    println!("{stats}");
    if let Some(path) = &args.json_out {
        dump_json(&stats, path)?;
    }
    Ok(())
}

async fn run_listen(args: ListenArgs) -> anyhow::Result<()> {
    let listener = TrackingListener::new(
        &args.host,
        args.port,
        &args.clientid,
        ListenerOptions::new(args.msg_count, args.client_count),
    )
    .await?;
    let test_complete = listener.run(&args.topic_filter, qos_from_u8(args.qos)).await?;
    let stats = listener.stats(test_complete).await;
    listener.stop().await?;

    println!("{stats}");
    if let Some(path) = &args.json_out {
        dump_json(&stats, path)?;
    }
    Ok(())
}

async fn run_workers(args: WorkersArgs) -> anyhow::Result<()> {
    let psk_keyfile = match &args.psk_keyfile {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };
    let pool = PoolArgs {
        worker_count: args.worker_count,
        label: args.label,
        host: args.host,
        port: args.port,
        qos: args.qos,
        msg_count: args.msg_count,
        msg_size: args.msg_size,
        timing: args.timing,
        msgs_per_second: args.msgs_per_second,
        jitter: args.jitter,
        psk_keyfile,
    };
    let aggregate = run_worker_pool(&pool).await?;

    println!("{aggregate}");
    if let Some(path) = &args.json_out {
        dump_json(&aggregate, path)?;
    }
    Ok(())
}

async fn run_bridge(args: BridgeArgs) -> anyhow::Result<()> {
    if let Some(keyfile_path) = &args.psk_keyfile {
        return run_threaded_bridge(&args, keyfile_path).await;
    }

    let mut bridge = BridgingSender::new(
        &args.broker_command,
        &args.target_host,
        args.target_port,
        &args.label,
        args.auth.as_deref(),
    )
    .await?;

    let generator = create_generator(
        &args.label,
        &GeneratorOptions {
            msg_count: args.msg_count,
            msg_size: args.msg_size,
            timing: false,
            msgs_per_second: 0.0,
            jitter: 0.0,
        },
    );
    bridge.run(generator, qos_from_u8(args.qos)).await?;
    let stats = bridge.stats().await;

    println!("{stats}");
    if let Some(path) = &args.json_out {
        dump_json(&stats, path)?;
    }
    Ok(())
}

// run_threaded_bridge runs one BridgingSender per key in a PSK key file
// (the thread-ratio variant) and prints each worker's stats plus an
// aggregate, matching the worker pool's own aggregate-then-print shape.
async fn run_threaded_bridge(args: &BridgeArgs, keyfile_path: &PathBuf) -> anyhow::Result<()> {
    let keyfile_contents = tokio::fs::read_to_string(keyfile_path).await?;
    let started = std::time::Instant::now();
    let threaded = ThreadedBridgingSender::from_keyfile(
        &args.broker_command,
        &args.target_host,
        args.target_port,
        &args.label,
        &keyfile_contents,
    )
    .await?;

    let bridge_count = malaria_core::psk::parse_keyfile(&keyfile_contents).len();
    let generators = (0..bridge_count)
        .map(|_| {
            create_generator(
                &args.label,
                &GeneratorOptions {
                    msg_count: args.msg_count,
                    msg_size: args.msg_size,
                    timing: false,
                    msgs_per_second: 0.0,
                    jitter: 0.0,
                },
            )
        })
        .collect();

    let stats = threaded.run_all(generators, qos_from_u8(args.qos)).await?;
    if stats.is_empty() {
        anyhow::bail!("every bridge worker failed");
    }
    for s in &stats {
        println!("{s}");
    }
    let aggregate = aggregate_sender_stats(&stats, started.elapsed());

    println!("{aggregate}");
    if let Some(path) = &args.json_out {
        dump_json(&aggregate, path)?;
    }
    Ok(())
}
