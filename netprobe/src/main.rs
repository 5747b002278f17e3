use crate::config::NetprobeConfig;
use crate::config::cli::CliOpt;
use anyhow::Context;
use clap::Parser;
use probe_engine::capture::pcap_source::PcapFrameSource;
use probe_engine::probe::ProbeSet;
use probe_engine::report::{HttpCollector, LogSink, ReportSink};
use probe_engine::{CaptureAccumulator, MeasurementEngine, SharedCounters};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

mod config;
mod util;

fn main() -> anyhow::Result<()> {
    let cli = CliOpt::parse();
    init_logging(&cli.log_level);

    let config = NetprobeConfig::load(&cli)?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to initialize tokio");

    rt.block_on(run(&cli, config))
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: &CliOpt, config: NetprobeConfig) -> anyhow::Result<()> {
    println!("--- Params ---");
    println!("* Node id: {}", config.engine.node_id);
    println!("* Channel: {}", config.engine.channel);
    println!("* Collector: {}", config.targets.collector);
    println!(
        "* Switch interval: {} ms",
        config.engine.switch_interval.as_millis()
    );
    println!(
        "* Report interval: {} ms",
        config.engine.report_interval.as_millis()
    );
    if cli.dry_run {
        println!("* Dry run: reports are logged, not sent");
    }

    let shared = Arc::new(SharedCounters::new(Instant::now()));
    let accumulator = CaptureAccumulator::new(shared.clone(), config.loss_rssi_threshold_dbm);
    match &cli.capture {
        Some(path) => {
            PcapFrameSource::open(path, accumulator)?
                .spawn()
                .context("failed to start frame capture")?;
        }
        None => tracing::warn!("no capture source given, passive metrics will stay at zero"),
    }

    let sink: Box<dyn ReportSink> = if cli.dry_run {
        Box::new(LogSink)
    } else {
        let collector =
            HttpCollector::new(config.ingest.addr, &config.ingest.path, config.ingest.deadline)
                .context("failed to set up report delivery")?;
        Box::new(collector)
    };

    let probes = ProbeSet::new(&config.targets).context("failed to set up probes")?;
    let mut engine = MeasurementEngine::new(config.engine, shared, probes, sink);
    engine.run(cli.duration_ms.map(Duration::from_millis)).await;

    util::print_protocol_stats(&engine.summary());
    Ok(())
}
