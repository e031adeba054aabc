//! Softphone simulator
//!
//! Runs the full softphone runtime against the recording engine and platform,
//! replays a JSON scenario, prints every navigation intent as it is emitted and
//! the engine and platform commands at the end, then shuts down in order.
//!
//! ```text
//! softphone-sim --config scenarios/softphone.toml --scenario scenarios/auto_answer.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use rvoip_softphone_core::config::FileConfigSource;
use rvoip_softphone_core::engine::{SimulatedEngine, SimulatedEngineFactory};
use rvoip_softphone_core::logging::{log_welcome, setup_logging, LoggingConfig};
use rvoip_softphone_core::platform::SimulatedPlatform;
use rvoip_softphone_core::runtime::{RuntimeOptions, SoftphoneRuntime};
use rvoip_softphone_core::scenario::Scenario;

#[derive(Parser, Debug)]
#[command(name = "softphone-sim")]
#[command(about = "Replay a call scenario against the softphone core")]
struct Args {
    /// Softphone configuration file (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Scenario file (JSON)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Start as if woken by a push notification
    #[arg(long)]
    recovered_from_push: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let logging = LoggingConfig::from_args("softphone-sim", &args.log_level, args.json_logs)?;
    setup_logging(&logging)?;
    log_welcome(&logging, env!("CARGO_PKG_VERSION"));

    let scenario = Scenario::load(&args.scenario)
        .with_context(|| format!("loading scenario {}", args.scenario.display()))?;

    let engine = SimulatedEngine::new();
    let platform = SimulatedPlatform::new();
    let recorder = platform.recorder();

    let (runtime, mut intents) = SoftphoneRuntime::start(
        Arc::new(FileConfigSource::new(&args.config)),
        &SimulatedEngineFactory::new(engine.clone()),
        platform.into_platform(),
        RuntimeOptions {
            recovered_from_push: args.recovered_from_push,
        },
    )
    .with_context(|| format!("starting runtime with {}", args.config.display()))?;

    let printer = tokio::spawn(async move {
        while let Some(intent) = intents.recv().await {
            match serde_json::to_string(&intent) {
                Ok(line) => println!("intent {line}"),
                Err(e) => println!("intent {intent:?} ({e})"),
            }
        }
    });

    info!(steps = scenario.steps.len(), "Playing scenario");
    scenario.play(&runtime.handle(), &engine).await?;

    let report = runtime.shutdown().await?;
    printer.await?;

    for call in engine.calls() {
        println!("engine {call:?}");
    }
    for call in recorder.calls() {
        println!("platform {call:?}");
    }
    println!(
        "shutdown completed={} cancelled_tasks={} abandoned_sessions={} iterations={}",
        report.completed,
        report.cancelled_tasks,
        report.abandoned_sessions,
        engine.iterations()
    );
    Ok(())
}
