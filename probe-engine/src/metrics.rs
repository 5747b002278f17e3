use crate::capture::{SharedCounters, WindowSnapshot};
use crate::protocol::Protocol;
use std::time::Duration;

/// Cumulative sums for one protocol, folded in once per report and never reset
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtocolTotals {
    pub total_latency_ms: f64,
    pub total_throughput_kbps: f64,
    pub measurement_count: u64,
}

impl ProtocolTotals {
    pub fn avg_latency_ms(&self) -> f64 {
        mean(self.total_latency_ms, self.measurement_count)
    }

    pub fn avg_throughput_kbps(&self) -> f64 {
        mean(self.total_throughput_kbps, self.measurement_count)
    }
}

fn mean(total: f64, count: u64) -> f64 {
    if count == 0 { 0.0 } else { total / count as f64 }
}

/// The statistics derived from a single report cycle
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub latency_ms: f64,
    pub throughput_kbps: f64,
    pub avg_latency_ms: f64,
    pub avg_throughput_kbps: f64,
    pub avg_rssi: i32,
}

/// Throughput of a window in KB/s, or zero for a window without duration
pub fn throughput_kbps(bytes: u64, elapsed: Duration) -> f64 {
    let elapsed_secs = elapsed.as_secs_f64();
    if elapsed_secs > 0.0 {
        bytes as f64 / 1024.0 / elapsed_secs
    } else {
        0.0
    }
}

/// Per-protocol view combining the capture counters with the folded totals
#[derive(Clone, Debug, PartialEq)]
pub struct ProtocolMetrics {
    pub name: &'static str,
    pub packets_total: u64,
    pub packets_lost: u64,
    pub totals: ProtocolTotals,
}

#[derive(Debug, Default)]
pub struct MetricsAggregator {
    totals: [ProtocolTotals; Protocol::COUNT],
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn totals(&self, protocol: Protocol) -> &ProtocolTotals {
        &self.totals[protocol.index()]
    }

    /// Folds one report cycle of `protocol` into its running totals
    pub fn fold(
        &mut self,
        protocol: Protocol,
        latency_ms: f64,
        window: &WindowSnapshot,
        window_elapsed: Duration,
    ) -> Measurement {
        let throughput_kbps = throughput_kbps(window.bytes_received, window_elapsed);

        let totals = &mut self.totals[protocol.index()];
        totals.total_latency_ms += latency_ms;
        totals.total_throughput_kbps += throughput_kbps;
        totals.measurement_count += 1;

        Measurement {
            latency_ms,
            throughput_kbps,
            avg_latency_ms: totals.avg_latency_ms(),
            avg_throughput_kbps: totals.avg_throughput_kbps(),
            avg_rssi: window.avg_rssi(),
        }
    }

    pub fn summary(&self, shared: &SharedCounters) -> Vec<ProtocolMetrics> {
        Protocol::ALL
            .into_iter()
            .map(|protocol| {
                let counters = shared.protocol(protocol);
                ProtocolMetrics {
                    name: protocol.name(),
                    packets_total: counters.packets_total(),
                    packets_lost: counters.packets_lost(),
                    totals: self.totals(protocol).clone(),
                }
            })
            .collect()
    }
}
