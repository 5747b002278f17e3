use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// The point-in-time summary sent to the collector after every report cycle
///
/// The collector assigns the timestamp on arrival, so none is sent.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ReportSnapshot {
    pub node_id: String,
    pub protocol: &'static str,
    pub channel: u8,
    pub packets_total: u64,
    pub packets_lost: u64,
    pub rssi: i32,
    /// Latency of this cycle's probe, in milliseconds
    pub latency: f64,
    /// Throughput of this cycle's window, in KB/s
    pub throughput: f64,
    pub avg_latency: f64,
    pub avg_throughput: f64,
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to serialize report")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to deliver report")]
    Http(#[from] reqwest::Error),
    #[error("collector rejected report with status {0}")]
    Rejected(u16),
}

/// Where report snapshots go; delivery is best effort and never retried
pub trait ReportSink: Send {
    fn send<'a>(&'a mut self, report: &'a ReportSnapshot)
    -> BoxFuture<'a, Result<(), ReportError>>;
}

#[derive(Deserialize)]
struct CollectorReply {
    #[serde(default)]
    qos: Option<String>,
}

/// POSTs every snapshot to the collector's ingest endpoint
pub struct HttpCollector {
    client: reqwest::Client,
    url: String,
}

impl HttpCollector {
    pub fn new(
        addr: SocketAddr,
        ingest_path: impl AsRef<str>,
        deadline: Duration,
    ) -> Result<Self, ReportError> {
        let client = reqwest::Client::builder().timeout(deadline).build()?;
        Ok(Self {
            client,
            url: format!("http://{addr}{}", ingest_path.as_ref()),
        })
    }
}

impl ReportSink for HttpCollector {
    fn send<'a>(
        &'a mut self,
        report: &'a ReportSnapshot,
    ) -> BoxFuture<'a, Result<(), ReportError>> {
        async move {
            let response = self.client.post(&self.url).json(report).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(ReportError::Rejected(status.as_u16()));
            }

            // The verdict is informational, an unreadable body is not a delivery failure
            if let Ok(CollectorReply { qos: Some(qos) }) = response.json().await {
                tracing::info!(protocol = report.protocol, %qos, "collector qos verdict");
            }

            Ok(())
        }
        .boxed()
    }
}

/// Logs snapshots instead of delivering them
#[derive(Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn send<'a>(
        &'a mut self,
        report: &'a ReportSnapshot,
    ) -> BoxFuture<'a, Result<(), ReportError>> {
        async move {
            let json = serde_json::to_string(report)?;
            tracing::info!("report (dry run): {json}");
            Ok(())
        }
        .boxed()
    }
}
