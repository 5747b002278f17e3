use crate::config::cli::CliOpt;
use crate::config::json::JsonConfig;
use anyhow::{Context, bail};
use probe_engine::EngineSettings;
use probe_engine::probe::ProbeTargets;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

pub mod cli;
pub mod json;

/// Where reports are delivered
pub struct IngestConfig {
    pub addr: SocketAddr,
    pub path: String,
    pub deadline: Duration,
}

pub struct NetprobeConfig {
    pub engine: EngineSettings,
    pub targets: ProbeTargets,
    pub ingest: IngestConfig,
    pub loss_rssi_threshold_dbm: i8,
}

impl NetprobeConfig {
    pub fn load(cli: &CliOpt) -> anyhow::Result<Self> {
        let json = match &cli.config {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config from {}", path.display()))?;
                serde_json::from_str(&contents)
                    .with_context(|| format!("invalid config at {}", path.display()))?
            }
            None => JsonConfig::default(),
        };

        Self::from_parts(cli, json)
    }

    /// Merges the JSON configuration with the CLI, which takes precedence
    pub fn from_parts(cli: &CliOpt, json: JsonConfig) -> anyhow::Result<Self> {
        let Some(collector) = cli.collector.or(json.collector.address) else {
            bail!("no collector address: pass `--collector` or set `collector.address`");
        };

        let node_id = cli.node_id.clone().unwrap_or(json.node_id);
        if node_id.is_empty() {
            bail!("the node id must not be empty");
        }

        let schedule = &json.schedule;
        if schedule.switch_interval_ms == 0 || schedule.report_interval_ms == 0 {
            bail!("the switch and report intervals must be positive");
        }

        let mut targets = ProbeTargets::new(node_id.clone(), collector);
        targets.http_port = json.collector.http_port;
        targets.http_probe_path = json.collector.http_probe_path;
        targets.tcp_port = json.collector.tcp_port;
        targets.tcp_probe_path = json.collector.tcp_probe_path;
        targets.udp_port = json.collector.udp_port;
        targets.smtp_port = json.collector.smtp_port;
        targets.mqtt_broker = json.mqtt.broker.unwrap_or(collector);
        targets.mqtt_port = json.mqtt.port;
        targets.mqtt_topic = json.mqtt.topic;
        targets.mqtt_keep_alive_secs = json.mqtt.keep_alive_secs;
        targets.timeouts = json.timeouts.into();

        let ingest = IngestConfig {
            addr: SocketAddr::new(collector, json.collector.http_port),
            path: json.collector.ingest_path,
            deadline: targets.timeouts.http_request,
        };

        let engine = EngineSettings {
            node_id,
            channel: json.channel,
            switch_interval: Duration::from_millis(schedule.switch_interval_ms),
            report_interval: Duration::from_millis(schedule.report_interval_ms),
        };

        Ok(Self {
            engine,
            targets,
            ingest,
            loss_rssi_threshold_dbm: json.loss_rssi_threshold_dbm,
        })
    }
}
