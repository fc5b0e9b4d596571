//! dashlog - ECU session tool
//!
//! Usage:
//!   dashlog [--config FILE] <COMMAND> [ARGS]
//!
//! Commands:
//!   decode FILE             Print a session log as numeric records
//!   interpret FILE [--map JSON_FILE]
//!                           Print a session log with tag and message names
//!   replay FILE             Feed a session log through the decoder and print the result
//!   sessions [--dir DIR]    List stored sessions, newest first
//!   ports                   List attached USB serial devices
//!   monitor [--port PORT] [--mode MODE]
//!                           Decode live data from the ECU until Ctrl-C
//!   send COMMAND [--port PORT]
//!                           Send one command byte to the ECU
//!   demo [--seconds N]      Run a session on simulated frames

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use dashboard_core::prelude::*;
use dashboard_core::protocol::usb_ports;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dashlog [--config FILE] <decode|interpret|replay|sessions|ports|monitor|send|demo> [ARGS]";

/// Parsed command line
#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    command: String,
    positional: Vec<String>,
    map: Option<PathBuf>,
    dir: Option<PathBuf>,
    port: Option<String>,
    mode: Option<String>,
    seconds: Option<u64>,
}

fn parse_args() -> Result<Args> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args::default();

    let mut i = 0;
    while i < raw.len() {
        let flag = raw[i].as_str();
        let mut value = || -> Result<String> {
            i += 1;
            raw.get(i)
                .cloned()
                .with_context(|| format!("{flag} needs a value"))
        };
        match flag {
            "--config" | "-c" => args.config = Some(value()?.into()),
            "--map" | "-m" => args.map = Some(value()?.into()),
            "--dir" | "-d" => args.dir = Some(value()?.into()),
            "--port" | "-p" => args.port = Some(value()?),
            "--mode" => args.mode = Some(value()?),
            "--seconds" | "-s" => {
                let v = value()?;
                args.seconds = Some(v.parse().with_context(|| format!("invalid seconds: {v}"))?);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            other if other.starts_with('-') => bail!("unknown option {other}\n{USAGE}"),
            other if args.command.is_empty() => args.command = other.to_string(),
            other => args.positional.push(other.to_string()),
        }
        i += 1;
    }

    if args.command.is_empty() {
        bail!("{USAGE}");
    }
    Ok(args)
}

fn load_config(args: &Args) -> Result<DashboardConfig> {
    let mut config = match &args.config {
        Some(path) => DashboardConfig::from_file(path)?,
        None => DashboardConfig::default(),
    };
    if let Some(port) = &args.port {
        config.serial.port = Some(port.clone());
    }
    if let Some(mode) = &args.mode {
        config.interpreter_mode = mode.parse()?;
    }
    Ok(config)
}

fn file_arg(args: &Args) -> Result<PathBuf> {
    args.positional
        .first()
        .map(PathBuf::from)
        .with_context(|| format!("{} needs a log file", args.command))
}

fn print_metrics(table: &MetricTable) {
    for (metric, value) in table.snapshot() {
        println!("{:<16} {:>8} {}", metric.label(), value, metric.unit());
    }
}

fn replay_file(args: &Args, config: &DashboardConfig) -> Result<()> {
    let path = file_arg(args)?;
    let log = DecodedLog::open(&path)?;
    let key_map = log
        .key_map()
        .with_context(|| format!("{} has no embedded key map", path.display()))?;

    let state = Arc::new(StateTracker::new());
    state.on_state_change(|s| println!("state -> {s}"));
    state.on_fault(|f| println!("fault  {} at {}", f.message, f.timestamp));

    let mut decoder = WireDecoder::new(
        Arc::new(key_map),
        MessageRegistry::with_fault_messages(config.fault_messages.clone()),
        Arc::clone(&state),
        Arc::new(TracingSink),
    );
    let records = replay(&path, &mut decoder)?;
    println!("replayed {records} records");
    print_metrics(&decoder.registry().handle());
    println!("final state: {}", state.state());
    Ok(())
}

fn list(args: &Args, config: &DashboardConfig) -> Result<()> {
    let dir = args.dir.clone().unwrap_or_else(|| config.log_dir.clone());
    let sessions = list_sessions(&dir)?;
    if sessions.is_empty() {
        println!("no sessions in {}", dir.display());
    }
    for session in sessions {
        println!("{:>12}  {}", session.epoch_seconds(), session.formatted_name());
    }
    Ok(())
}

fn open_key_map(config: &DashboardConfig) -> Arc<KeyMap> {
    let key_map = Arc::new(KeyMap::new(FileStorage::new(&config.key_map_path)));
    if let Err(e) = key_map.load_from_storage() {
        warn!(error = %e, path = %config.key_map_path.display(), "no stored key map");
    }
    key_map
}

async fn monitor(config: DashboardConfig) -> Result<()> {
    let transport = Arc::new(SerialTransport::new(config.serial.clone()));
    transport.on_status(|status| info!(?status, "serial status"));
    transport.open()?;

    let ecu = Arc::new(
        Ecu::start(&config, open_key_map(&config), Arc::new(TracingSink))
            .with_transport(transport.clone()),
    );
    ecu.on_state_change(|s| info!(state = %s, "vehicle state"));
    ecu.on_fault(|f| warn!(fault = %f.message, value = f.value, "vehicle fault"));

    let producer = Arc::clone(&ecu);
    let reader = transport.spawn_reader(move |bytes| {
        producer.receive_data(&bytes);
    })?;

    tokio::signal::ctrl_c().await?;
    ecu.shutdown().await;
    if reader.join().is_err() {
        warn!("serial reader panicked");
    }
    print_metrics(ecu.metrics());
    Ok(())
}

fn send(args: &Args, config: &DashboardConfig) -> Result<()> {
    let name = args.positional.first().context("send needs a command")?;
    let command: Command = name.parse()?;
    let transport = SerialTransport::new(config.serial.clone());
    transport.open()?;
    transport.write(&command.to_bytes())?;
    transport.close();
    println!("sent {} ({})", command.name(), command.byte());
    Ok(())
}

async fn demo(args: &Args, mut config: DashboardConfig) -> Result<()> {
    if args.config.is_none() {
        config.log_dir = std::env::temp_dir().join("dashlog-demo");
    }
    let seconds = args.seconds.unwrap_or(30);

    let raw = demo_key_map_json();
    let key_map = Arc::new(KeyMap::unpersisted());
    let ecu = Ecu::start(&config, Arc::clone(&key_map), Arc::new(TracingSink));
    ecu.on_state_change(|s| info!(state = %s, "vehicle state"));
    ecu.load_key_map(&raw)?;

    let tables = key_map.snapshot().context("demo key map failed to load")?;
    let mut sim = DemoSimulator::new(&tables, 0x5EED);

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    let ticks = seconds * 10;
    for n in 0..ticks {
        ticker.tick().await;
        ecu.receive_data(&sim.tick(n * 100));
    }
    ecu.sync().await?;
    ecu.shutdown().await;

    print_metrics(ecu.metrics());
    println!("logs written to {}", config.log_dir.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = load_config(&args)?;

    match args.command.as_str() {
        "decode" => print!("{}", decode_log_file(file_arg(&args)?)?),
        "interpret" => {
            let path = file_arg(&args)?;
            let override_map = match &args.map {
                Some(map) => {
                    let raw = std::fs::read_to_string(map)
                        .with_context(|| format!("reading {}", map.display()))?;
                    let key_map = KeyMap::unpersisted();
                    key_map.load(&raw)?;
                    Some(key_map)
                }
                None => None,
            };
            print!("{}", interpret_log_file(&path, override_map.as_ref())?);
        }
        "replay" => replay_file(&args, &config)?,
        "sessions" => list(&args, &config)?,
        "ports" => {
            let ports = usb_ports();
            if ports.is_empty() {
                println!("no USB serial devices");
            }
            for port in ports {
                println!("{port}");
            }
        }
        "monitor" => monitor(config).await?,
        "send" => send(&args, &config)?,
        "demo" => demo(&args, config).await?,
        other => bail!("unknown command {other}\n{USAGE}"),
    }
    Ok(())
}
