//! pulse-sim - Service metric simulator
//!
//! Usage:
//!   pulse-sim run --scenario downstream_failure --ticks 60 --seed 7
//!   pulse-sim push --target http://127.0.0.1:3100 --sessions 4 --scenario latency_creep
//!   pulse-sim list

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use pulse_core::{MonitorSession, PulseConfig, TickOutcome};
use pulse_sim::{SimulatorConfig, list_scenarios, scenarios::DEFAULT_ONSET, simulator_for};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pulse-sim")]
#[command(about = "Golden-signal metric simulator with failure injection")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a local monitor session and print every tick
    Run {
        /// Scenario shaping the metrics
        #[arg(short, long, default_value = "downstream_failure")]
        scenario: String,

        /// Tick at which the scenario kicks in
        #[arg(long, default_value_t = DEFAULT_ONSET)]
        onset: u64,

        /// Number of ticks to simulate
        #[arg(short, long, default_value = "60")]
        ticks: u64,

        /// Seed for both the simulator and the forest
        #[arg(long)]
        seed: Option<u64>,

        /// Pulse configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Stream snapshots to a running gatekeeper
    Push {
        /// Gatekeeper base URL
        #[arg(short, long, default_value = "http://127.0.0.1:3100")]
        target: String,

        /// Number of concurrent simulated sessions
        #[arg(long, default_value = "1")]
        sessions: usize,

        #[arg(short, long, default_value = "downstream_failure")]
        scenario: String,

        #[arg(long, default_value_t = DEFAULT_ONSET)]
        onset: u64,

        /// Ticks per session; 0 runs until Ctrl-C
        #[arg(short = 'n', long, default_value = "0")]
        ticks: u64,

        /// Milliseconds between ticks
        #[arg(long, default_value = "5000")]
        tick_ms: u64,

        /// Base seed; session i uses seed + i
        #[arg(long)]
        seed: Option<u64>,
    },

    /// List available scenarios
    List,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum OutputFormat {
    JsonLines,
    Pretty,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            scenario,
            onset,
            ticks,
            seed,
            config,
            format,
        } => run_local(scenario, onset, ticks, seed, config, format),
        Commands::Push {
            target,
            sessions,
            scenario,
            onset,
            ticks,
            tick_ms,
            seed,
        } => run_push(target, sessions, scenario, onset, ticks, tick_ms, seed).await,
        Commands::List => run_list(),
    }
}

fn run_local(
    scenario: String,
    onset: u64,
    ticks: u64,
    seed: Option<u64>,
    config: Option<PathBuf>,
    format: OutputFormat,
) {
    let mut config = match &config {
        Some(path) => PulseConfig::load(path).expect("Failed to load config"),
        None => PulseConfig::load_or_default(),
    };
    if seed.is_some() {
        config.pipeline.forest.seed = seed;
    }

    let sim_config = SimulatorConfig {
        tick_interval_ms: config.session.tick_interval_ms,
        seed,
        ..SimulatorConfig::default()
    };
    let Some(simulator) = simulator_for(&scenario, onset, sim_config) else {
        eprintln!("Unknown scenario '{}'. Try `pulse-sim list`.", scenario);
        std::process::exit(2);
    };

    eprintln!("╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║           PULSE-SIM Local Run                                ║");
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    eprintln!("║ Scenario: {:50} ║", scenario);
    eprintln!("║ Onset tick: {:48} ║", onset);
    eprintln!("║ Ticks: {:53} ║", ticks);
    eprintln!(
        "║ Seed: {:54} ║",
        seed.map(|s| s.to_string()).unwrap_or_else(|| "random".into())
    );
    eprintln!("╚══════════════════════════════════════════════════════════════╝");

    let mut session = MonitorSession::from_config(format!("sim-{}", scenario), &config);
    let mut peak = 0u8;
    let mut alerts = 0usize;

    for snapshot in simulator.take(ticks as usize) {
        let outcome = match session.ingest(snapshot) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(tick = snapshot.tick, error = %e, "Snapshot rejected");
                continue;
            }
        };
        if let Some(output) = outcome.output.as_ref().filter(|o| o.is_scoring()) {
            peak = peak.max(output.score);
        }
        if outcome.alert.is_some() {
            alerts += 1;
        }

        match format {
            OutputFormat::JsonLines => match serde_json::to_string(&outcome) {
                Ok(line) => println!("{}", line),
                Err(e) => error!(error = %e, "Failed to encode outcome"),
            },
            OutputFormat::Pretty => print_pretty(&snapshot, &outcome),
        }
    }

    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
    eprintln!("║                        Run Complete                           ║");
    eprintln!("╠══════════════════════════════════════════════════════════════╣");
    eprintln!("║ Final phase: {:47} ║", format!("{:?}", session.phase()));
    eprintln!("║ Peak risk: {:49} ║", peak);
    eprintln!("║ Alerts fired: {:46} ║", alerts);
    eprintln!("╚══════════════════════════════════════════════════════════════╝");
}

fn print_pretty(snapshot: &pulse_core::MetricSnapshot, outcome: &TickOutcome) {
    let metrics = format!(
        "rate={:7.1} err={:5.2}% p99={:7.1}ms sat={:5.1}%",
        snapshot.rate, snapshot.error_rate, snapshot.p99, snapshot.saturation
    );
    let status = match &outcome.output {
        None => String::new(),
        Some(out) if !out.is_scoring() => {
            format!("learning {:3.0}%", out.progress.unwrap_or(0.0) * 100.0)
        }
        Some(out) => {
            let driver = outcome
                .attribution
                .first()
                .map(|a| format!(" driver={} Z={:.1}", a.key.key(), a.z_score))
                .unwrap_or_default();
            format!(
                "risk {:3} trend={:?}{}",
                out.score,
                out.trend.unwrap_or(pulse_core::Trend::Stable),
                driver
            )
        }
    };
    println!("#{:<4} {} | {}", outcome.tick, metrics, status);
    if let Some(alert) = &outcome.alert {
        println!("      !! {}", alert.message);
    }
}

async fn run_push(
    target: String,
    sessions: usize,
    scenario: String,
    onset: u64,
    ticks: u64,
    tick_ms: u64,
    seed: Option<u64>,
) {
    if pulse_sim::create_scenario(&scenario).is_none() {
        eprintln!("Unknown scenario '{}'. Try `pulse-sim list`.", scenario);
        std::process::exit(2);
    }

    println!("PULSE-SIM push -> {}", target);
    println!("Sessions: {} | Scenario: {} | Onset: {}", sessions, scenario, onset);
    println!(
        "Ticks: {} | Interval: {}ms",
        if ticks == 0 { "until Ctrl-C".to_string() } else { ticks.to_string() },
        tick_ms
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client");

    let token = CancellationToken::new();
    let ctrl_c = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, stopping sessions");
                token.cancel();
            }
        })
    };

    let mut handles = Vec::with_capacity(sessions);
    for i in 0..sessions {
        let stream = SessionStream {
            client: client.clone(),
            target: target.trim_end_matches('/').to_string(),
            id: format!("sim-{}-{}", scenario, i),
            seed: seed.map(|s| s + i as u64),
            scenario: scenario.clone(),
            onset,
            ticks,
            tick_ms,
        };
        let token = token.clone();
        handles.push(tokio::spawn(async move { stream.run(token).await }));
    }

    let mut total_ticks = 0u64;
    let mut total_alerts = 0u64;
    for handle in handles {
        match handle.await {
            Ok((sent, alerts)) => {
                total_ticks += sent;
                total_alerts += alerts;
            }
            Err(e) => error!(error = %e, "Session task panicked"),
        }
    }
    ctrl_c.abort();

    println!();
    println!("Ticks delivered: {}", total_ticks);
    println!("Alerts raised:   {}", total_alerts);
}

/// One simulated service streaming to the gatekeeper
struct SessionStream {
    client: reqwest::Client,
    target: String,
    id: String,
    seed: Option<u64>,
    scenario: String,
    onset: u64,
    ticks: u64,
    tick_ms: u64,
}

impl SessionStream {
    /// Returns (ticks delivered, alerts raised)
    async fn run(self, token: CancellationToken) -> (u64, u64) {
        let created = self
            .client
            .post(format!("{}/sessions", self.target))
            .json(&json!({ "id": self.id, "seed": self.seed }))
            .send()
            .await;
        match created {
            Ok(resp) if resp.status().is_success() => {
                info!(session = %self.id, "Session created");
            }
            Ok(resp) => {
                error!(session = %self.id, status = %resp.status(), "Gatekeeper refused session");
                return (0, 0);
            }
            Err(e) => {
                error!(session = %self.id, error = %e, "Gatekeeper unreachable");
                return (0, 0);
            }
        }

        let sim_config = SimulatorConfig {
            tick_interval_ms: self.tick_ms,
            seed: self.seed,
            ..SimulatorConfig::default()
        };
        let mut simulator = match simulator_for(&self.scenario, self.onset, sim_config) {
            Some(sim) => sim,
            None => return (0, 0),
        };

        let url = format!("{}/sessions/{}/ticks", self.target, self.id);
        let mut interval = tokio::time::interval(Duration::from_millis(self.tick_ms.max(1)));
        let mut sent = 0u64;
        let mut alerts = 0u64;

        while self.ticks == 0 || sent < self.ticks {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            let snapshot = simulator.tick();
            match self.client.post(&url).json(&snapshot).send().await {
                Ok(resp) if resp.status().is_success() => {
                    sent += 1;
                    if let Ok(outcome) = resp.json::<Value>().await {
                        if let Some(alert) = outcome.get("alert") {
                            alerts += 1;
                            println!(
                                "[{}] {}",
                                self.id,
                                alert.get("message").and_then(Value::as_str).unwrap_or("alert")
                            );
                        }
                    }
                }
                Ok(resp) => {
                    warn!(session = %self.id, tick = snapshot.tick, status = %resp.status(), "Tick rejected");
                    if resp.status() == reqwest::StatusCode::NOT_FOUND {
                        break;
                    }
                }
                Err(e) => {
                    warn!(session = %self.id, tick = snapshot.tick, error = %e, "Tick delivery failed");
                }
            }
        }

        match self
            .client
            .delete(format!("{}/sessions/{}", self.target, self.id))
            .send()
            .await
        {
            Ok(_) => info!(session = %self.id, sent, "Session ended"),
            Err(e) => warn!(session = %self.id, error = %e, "Failed to end session"),
        }

        (sent, alerts)
    }
}

fn run_list() {
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║              Available Simulation Scenarios                   ║");
    println!("╠══════════════════════════════════════════════════════════════╣");

    for (name, description) in list_scenarios() {
        println!("║ {:20} - {:36} ║", name, description);
    }

    println!("╚══════════════════════════════════════════════════════════════╝");
    println!("\nUsage: pulse-sim run --scenario <SCENARIO> --onset <TICK>");
}
