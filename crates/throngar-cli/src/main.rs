//! Headless CLI entry point. Three subcommands mirror the three ways a
//! run can be driven: a single-node `run`, a `distributed` run fanned out
//! to worker nodes, and `worker` itself which serves the worker HTTP
//! surface for a coordinator to drive.

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use throngar_core::config::load_config;
use throngar_core::distributed::client::HttpWorkerClient;
use throngar_core::distributed::coordinator::{total_vus_for_phase, Coordinator};
use throngar_core::distributed::worker::{worker_router, WorkerState};
use throngar_core::distributed::WorkerClient;
use throngar_core::metrics::StreamingAggregator;
use throngar_core::model::OutputSinkConfig;
use throngar_core::outputs::{csv::CsvSink, graphite::GraphiteSink, influx::InfluxSink, json::JsonSink, webhook::WebhookSink};
use throngar_core::outputs::{spawn_sink, try_send_result, OutputSink, SinkMessage};
use throngar_core::protocol::HttpClientBuilder;
use throngar_core::providers::csv::CsvProvider;
use throngar_core::result::TestResult;
use throngar_core::scheduler::SchedulerConfig;
use throngar_core::ThrongarError;

#[derive(Parser)]
#[command(name = "throngar", about = "A load-testing engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a configuration against a single node.
    Run {
        config: String,
        /// Name of a `global.environments` overlay to merge over `global`
        /// before the run (e.g. variables/base_url that differ per env).
        #[arg(long)]
        env: Option<String>,
        #[arg(long)]
        output: Option<String>,
        #[arg(long)]
        report: Option<String>,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        max_users: Option<u32>,
    },
    /// Run a configuration distributed across the worker nodes it names.
    Distributed {
        config: String,
        #[arg(long)]
        strategy: Option<String>,
        #[arg(long)]
        sync_start: bool,
        /// Worker nodes as `host:port` pairs, overriding the config's
        /// `workers.nodes` section.
        #[arg(long, value_delimiter = ',')]
        workers: Option<Vec<String>>,
        /// Path to a JSON/YAML file listing worker nodes, overriding the
        /// config's `workers.nodes` section. Takes precedence over
        /// `--workers` if both are given.
        #[arg(long)]
        workers_file: Option<String>,
    },
    /// Serve the worker HTTP surface for a coordinator to drive.
    Worker {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        #[arg(long, default_value_t = 8088)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Run { config, env, output, report, dry_run, max_users } => {
            run_single_node(&config, env, output, report, dry_run, max_users).await
        }
        Command::Distributed { config, strategy, sync_start, workers, workers_file } => {
            run_distributed(&config, strategy, sync_start, workers, workers_file).await
        }
        Command::Worker { host, port } => run_worker(&host, port).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run_single_node(
    config_path: &str,
    env: Option<String>,
    output_override: Option<String>,
    report_path: Option<String>,
    dry_run: bool,
    max_users: Option<u32>,
) -> Result<(), ThrongarError> {
    let mut config = load_config(config_path).await?;

    if let Some(env_name) = &env {
        let overlay = config
            .environments
            .get(env_name)
            .cloned()
            .ok_or_else(|| ThrongarError::ConfigInvalid(format!("unknown environment '{env_name}'")))?;
        config.global.merge_overlay(&overlay);
    }

    if dry_run {
        println!("configuration '{}' is valid ({} scenario(s))", config.name, config.scenarios.len());
        return Ok(());
    }

    let http = Arc::new(
        HttpClientBuilder::new()
            .timeout(config.global.timeout.unwrap_or(std::time::Duration::from_secs(30)))
            .build()?,
    );

    let csv_providers = load_csv_providers(&config).await?;

    let mut sink_configs = config.outputs.clone();
    if let Some(path) = output_override {
        sink_configs.push(OutputSinkConfig::Json { path });
    }
    let sink_txs: Vec<mpsc::Sender<SinkMessage>> = sink_configs.iter().map(|c| spawn_sink(build_sink(c))).collect();

    let (result_tx, mut result_rx) = mpsc::channel::<TestResult>(1024);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_for_signal.cancel();
        }
    });

    let scenarios = Arc::new(config.scenarios.clone());
    let global = Arc::new(config.global.clone());
    let percentiles = config.report.as_ref().map(|r| r.percentiles.clone());

    let sink_txs_clone = sink_txs.clone();
    let collector = tokio::spawn(async move {
        let mut aggregator = StreamingAggregator::new(percentiles);
        while let Some(result) = result_rx.recv().await {
            aggregator.record(&result);
            for tx in &sink_txs_clone {
                try_send_result(tx, result.clone());
            }
        }
        aggregator.finalize()
    });

    let mut vu_id_cursor = 0u32;
    let phases = config.load.phases();
    let last_phase_index = phases.len().saturating_sub(1);
    for (i, phase) in phases.into_iter().enumerate() {
        let budget_vus = max_users.map(|m| m.min(total_vus_for_phase(&phase)));
        let capped_phase = cap_phase_vus(phase, budget_vus);
        let scheduler_cfg = SchedulerConfig {
            scenarios: scenarios.clone(),
            global: global.clone(),
            csv_providers: csv_providers.clone(),
            http: http.clone(),
            result_tx: result_tx.clone(),
            cancel: cancel.clone(),
            active_vus: None,
        };
        vu_id_cursor += throngar_core::scheduler::run_phase(&capped_phase, &scheduler_cfg, vu_id_cursor).await;

        // run_phase only returns once its own JoinSet has fully drained, so
        // every VU from this phase is already terminated. The remaining
        // quiescence requirement is just the mandated gap before the next
        // phase starts.
        if i != last_phase_index && !cancel.is_cancelled() {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }

    drop(result_tx);
    let summary = collector.await.map_err(|e| ThrongarError::Internal(e.to_string()))?;

    for tx in &sink_txs {
        let _ = tx.send(SinkMessage::Summary(summary.clone())).await;
        let _ = tx.send(SinkMessage::Finalize).await;
    }

    if let Some(path) = report_path {
        tokio::fs::write(&path, serde_json::to_string_pretty(&summary).map_err(ThrongarError::Serde)?)
            .await
            .map_err(ThrongarError::Io)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&summary).map_err(ThrongarError::Serde)?);
    }

    Ok(())
}

fn cap_phase_vus(phase: throngar_core::model::LoadPhase, budget: Option<u32>) -> throngar_core::model::LoadPhase {
    use throngar_core::model::LoadPhase;
    let Some(budget) = budget else { return phase };
    match phase {
        LoadPhase::Basic { vus, ramp_up, duration, iterations } => {
            LoadPhase::Basic { vus: vus.min(budget), ramp_up, duration, iterations }
        }
        LoadPhase::Stepping { stages } => LoadPhase::Stepping {
            stages: stages
                .into_iter()
                .map(|s| throngar_core::model::Stage {
                    target: s.target.min(budget),
                    duration: s.duration,
                    ramp_up: s.ramp_up,
                })
                .collect(),
        },
        LoadPhase::Arrivals { rate, duration, max_vus, pre_allocated_vus } => LoadPhase::Arrivals {
            rate,
            duration,
            max_vus: max_vus.min(budget),
            pre_allocated_vus,
        },
    }
}

async fn load_csv_providers(
    config: &throngar_core::model::Configuration,
) -> Result<Arc<HashMap<String, Arc<CsvProvider>>>, ThrongarError> {
    use throngar_core::providers::csv::{ExhaustionPolicy, SelectionMode};

    let mut map = HashMap::new();
    for scenario in &config.scenarios {
        if let Some(path) = &scenario.csv {
            let contents = tokio::fs::read_to_string(path).await.map_err(ThrongarError::Io)?;
            let provider = CsvProvider::parse(&contents, b',', None, false, SelectionMode::Next, ExhaustionPolicy::Cycle)?;
            map.insert(scenario.name.clone(), Arc::new(provider));
        }
    }
    Ok(Arc::new(map))
}

fn build_sink(cfg: &OutputSinkConfig) -> Box<dyn OutputSink> {
    match cfg {
        OutputSinkConfig::Json { path } => Box::new(JsonSink::new(path.clone())),
        OutputSinkConfig::Csv { path } => Box::new(CsvSink::new(path.clone())),
        OutputSinkConfig::InfluxLineProtocol { url, bucket, token } => {
            Box::new(InfluxSink::new(url.clone(), bucket.clone(), token.clone()))
        }
        OutputSinkConfig::Graphite { host, port, prefix } => {
            Box::new(GraphiteSink::new(host.clone(), *port, prefix.clone()))
        }
        OutputSinkConfig::Webhook { url, headers } => Box::new(WebhookSink::new(url.clone(), headers.clone())),
    }
}

fn parse_worker_arg(raw: &str) -> Result<throngar_core::model::WorkerDescriptor, ThrongarError> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| ThrongarError::ConfigInvalid(format!("invalid worker '{raw}', expected host:port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ThrongarError::ConfigInvalid(format!("invalid worker port in '{raw}'")))?;
    Ok(throngar_core::model::WorkerDescriptor { host: host.to_string(), port, capacity: 1, region: None })
}

async fn load_workers_file(path: &str) -> Result<Vec<throngar_core::model::WorkerDescriptor>, ThrongarError> {
    let contents = tokio::fs::read_to_string(path).await.map_err(ThrongarError::Io)?;
    let format = match std::path::Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => config::FileFormat::Yaml,
        Some("toml") => config::FileFormat::Toml,
        _ => config::FileFormat::Json,
    };
    let raw = config::Config::builder()
        .add_source(config::File::from_str(&contents, format))
        .build()
        .map_err(|e| ThrongarError::ConfigInvalid(e.to_string()))?;
    raw.try_deserialize().map_err(|e| ThrongarError::ConfigInvalid(e.to_string()))
}

async fn run_distributed(
    config_path: &str,
    strategy_override: Option<String>,
    sync_start_override: bool,
    workers_override: Option<Vec<String>>,
    workers_file_override: Option<String>,
) -> Result<(), ThrongarError> {
    let config = load_config(config_path).await?;

    let node_override = if let Some(path) = &workers_file_override {
        Some(load_workers_file(path).await?)
    } else if let Some(raw_nodes) = &workers_override {
        Some(raw_nodes.iter().map(|s| parse_worker_arg(s)).collect::<Result<Vec<_>, _>>()?)
    } else {
        None
    };

    let mut workers_cfg = config.workers.clone().unwrap_or_default();
    if let Some(nodes) = node_override {
        workers_cfg.nodes = nodes;
    }
    if workers_cfg.nodes.is_empty() {
        return Err(ThrongarError::ConfigInvalid(
            "distributed run requires worker nodes, via the config's workers section or --workers/--workers-file".into(),
        ));
    }

    let strategy = match strategy_override.as_deref() {
        Some("even") => throngar_core::model::DistributionStrategy::Even,
        Some("capacity_based") => throngar_core::model::DistributionStrategy::CapacityBased,
        Some("round_robin") => throngar_core::model::DistributionStrategy::RoundRobin,
        Some("geographic") => throngar_core::model::DistributionStrategy::Geographic,
        Some(other) => return Err(ThrongarError::ConfigInvalid(format!("unknown distribution strategy '{other}'"))),
        None => workers_cfg.strategy,
    };
    let sync_start = sync_start_override || workers_cfg.sync_start;

    let clients: Vec<Arc<dyn WorkerClient>> = workers_cfg
        .nodes
        .iter()
        .map(|d| Arc::new(HttpWorkerClient::new(d)) as Arc<dyn WorkerClient>)
        .collect();

    let coordinator = Coordinator::new(workers_cfg.nodes.clone(), clients, strategy, sync_start);
    coordinator.initialize().await?;

    let total_vus = config.load.phases().iter().map(total_vus_for_phase).max().unwrap_or(0);
    coordinator.prepare_all(&config, total_vus).await?;
    coordinator.start_all().await?;

    if let Some(phase) = config.load.phases().into_iter().next() {
        match phase_duration(&phase) {
            Some(duration) => tokio::time::sleep(duration).await,
            None => coordinator.await_all_stopped(std::time::Duration::from_secs(2)).await,
        }
    }
    coordinator.stop_all().await?;

    let results = coordinator.collect_all_results().await?;
    let mut aggregator = StreamingAggregator::new(config.report.as_ref().map(|r| r.percentiles.clone()));
    for result in &results {
        aggregator.record(result);
    }
    let summary = aggregator.finalize();
    println!("{}", serde_json::to_string_pretty(&summary).map_err(ThrongarError::Serde)?);

    Ok(())
}

/// `None` means the phase is iteration-terminated and has no fixed
/// wall-clock length to wait out.
fn phase_duration(phase: &throngar_core::model::LoadPhase) -> Option<std::time::Duration> {
    use throngar_core::model::LoadPhase;
    match phase {
        LoadPhase::Basic { duration, .. } => *duration,
        LoadPhase::Arrivals { duration, .. } => Some(*duration),
        LoadPhase::Stepping { stages } => Some(stages.iter().map(|s| s.duration).sum()),
    }
}

async fn run_worker(host: &str, port: u16) -> Result<(), ThrongarError> {
    let state = WorkerState::new();
    let router = worker_router(state);
    let listener = tokio::net::TcpListener::bind((host, port)).await.map_err(ThrongarError::Io)?;
    tracing::info!(%host, port, "worker listening");
    axum::serve(listener, router).await.map_err(ThrongarError::Io)?;
    Ok(())
}
