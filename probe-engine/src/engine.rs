use crate::capture::SharedCounters;
use crate::metrics::{MetricsAggregator, ProtocolMetrics};
use crate::probe::{ProbeSet, reported_latency_ms};
use crate::protocol::Protocol;
use crate::report::{ReportSink, ReportSnapshot};
use crate::scheduler::RoundRobinScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub node_id: String,
    /// The monitored radio channel, reported verbatim
    pub channel: u8,
    pub switch_interval: Duration,
    pub report_interval: Duration,
}

/// Drives the protocol rotation and the report cycle on the main loop
///
/// The capture thread only ever writes into the shared counters. Everything else, including
/// resets, happens here, so two report cycles never interleave.
pub struct MeasurementEngine {
    settings: EngineSettings,
    shared: Arc<SharedCounters>,
    scheduler: RoundRobinScheduler,
    aggregator: MetricsAggregator,
    probes: ProbeSet,
    sink: Box<dyn ReportSink>,
}

impl MeasurementEngine {
    pub fn new(
        settings: EngineSettings,
        shared: Arc<SharedCounters>,
        probes: ProbeSet,
        sink: Box<dyn ReportSink>,
    ) -> Self {
        let now = Instant::now();
        let scheduler = RoundRobinScheduler::new(now, settings.switch_interval);
        shared.set_active_protocol(scheduler.current());
        shared.window().reset(now);

        Self {
            settings,
            shared,
            scheduler,
            aggregator: MetricsAggregator::new(),
            probes,
            sink,
        }
    }

    pub fn current_protocol(&self) -> Protocol {
        self.scheduler.current()
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn summary(&self) -> Vec<ProtocolMetrics> {
        self.aggregator.summary(&self.shared)
    }

    /// Rotates to the next protocol if its time is up, starting a fresh capture window
    pub fn on_switch_tick(&mut self, now: Instant) -> Option<Protocol> {
        let next = self.scheduler.tick(now)?;

        // Capture attribution must follow the scheduler before the window restarts
        self.shared.set_active_protocol(next);
        self.shared.window().reset(now);

        tracing::info!(protocol = %next, "switched protocol under test");
        Some(next)
    }

    /// Probes the current protocol, folds the result in and emits a report
    ///
    /// Reporting failures are logged and dropped.
    pub async fn on_report_tick(&mut self) -> ReportSnapshot {
        let protocol = self.scheduler.current();
        let outcome = self.probes.attempt(protocol).await;
        if let Err(e) = &outcome {
            self.shared.protocol(protocol).track_lost();
            tracing::warn!(%protocol, "probe failed: {e}");
        }

        // Taking the window and restarting it is a single step, so no frame is counted twice
        let now = Instant::now();
        let window = self.shared.window().reset(now);
        let elapsed = now.saturating_duration_since(window.start);

        let latency_ms = reported_latency_ms(&outcome);
        let measurement = self.aggregator.fold(protocol, latency_ms, &window, elapsed);

        let counters = self.shared.protocol(protocol);
        let snapshot = ReportSnapshot {
            node_id: self.settings.node_id.clone(),
            protocol: protocol.name(),
            channel: self.settings.channel,
            packets_total: counters.packets_total(),
            packets_lost: counters.packets_lost(),
            rssi: measurement.avg_rssi,
            latency: measurement.latency_ms,
            throughput: measurement.throughput_kbps,
            avg_latency: measurement.avg_latency_ms,
            avg_throughput: measurement.avg_throughput_kbps,
        };

        tracing::debug!(
            %protocol,
            latency_ms,
            throughput_kbps = measurement.throughput_kbps,
            rssi = measurement.avg_rssi,
            "measurement folded"
        );

        match self.sink.send(&snapshot).await {
            Ok(()) => tracing::info!(%protocol, latency_ms, "report sent"),
            Err(e) => tracing::warn!(%protocol, "report dropped: {e}"),
        }

        snapshot
    }

    /// Runs both timers until `run_for` elapses, or forever if it is `None`
    pub async fn run(&mut self, run_for: Option<Duration>) {
        let start = Instant::now();
        let report_interval = self.settings.report_interval;
        let mut report_timer = tokio::time::interval_at(start + report_interval, report_interval);
        report_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop = async move {
            match run_for {
                Some(duration) => tokio::time::sleep_until(start + duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(stop);

        loop {
            // Derived from the scheduler, so a late switch pushes the next one back
            let next_switch = self.scheduler.last_switch() + self.scheduler.switch_interval();

            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = tokio::time::sleep_until(next_switch) => {
                    self.on_switch_tick(Instant::now());
                }
                _ = report_timer.tick() => {
                    self.on_report_tick().await;
                }
            }
        }

        tracing::info!("measurement run finished");
    }
}
