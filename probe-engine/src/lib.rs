pub mod capture;
pub mod engine;
pub mod metrics;
pub mod probe;
pub mod protocol;
pub mod report;
pub mod scheduler;

pub use capture::{CaptureAccumulator, SharedCounters};
pub use engine::{EngineSettings, MeasurementEngine};
pub use protocol::Protocol;

#[cfg(test)]
pub(crate) mod test {
    use crate::engine::test::{data_frame, engine};
    use crate::probe::FAILURE_LATENCY_MS;
    use crate::protocol::Protocol;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    /// Serves a single canned HTTP response and yields the raw request it answered
    pub(crate) async fn one_shot_server(
        response: &'static str,
    ) -> (SocketAddr, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0; 1024];
            while !request_complete(&request) {
                let read = stream.read(&mut buf).await.unwrap();
                if read == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..read]);
            }

            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = stream.shutdown().await;
            String::from_utf8_lossy(&request).to_string()
        });

        (addr, server)
    }

    fn request_complete(request: &[u8]) -> bool {
        let Some(head_len) = request.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };

        let head = String::from_utf8_lossy(&request[..head_len]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);

        request.len() >= head_len + 4 + body_len
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_second_window_of_weak_frames() {
        let mut fixture = engine().call();
        for _ in 0..10 {
            fixture.accumulator.on_frame(&data_frame(-60, 100));
        }

        let window = fixture.shared.window().snapshot();
        assert_eq!(window.avg_rssi(), -60);
        assert_eq!(window.bytes_received, 1000);

        tokio::time::advance(Duration::from_secs(1)).await;
        let report = fixture.engine.on_report_tick().await;
        assert_eq!(report.rssi, -60);
        assert!((report.throughput - 1000.0 / 1024.0).abs() < 1e-9);
        assert!((report.throughput - 0.977).abs() < 0.001);
        assert_eq!(report.packets_total, 10);
        assert_eq!(report.packets_lost, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_http_probe_reports_failure_latency() {
        let mut fixture = engine().failing(vec![Protocol::Http]).call();
        let lost_before = fixture.shared.protocol(Protocol::Http).packets_lost();

        let report = fixture.engine.on_report_tick().await;

        assert_eq!(report.protocol, "HTTP");
        assert_eq!(report.latency, FAILURE_LATENCY_MS);
        assert_eq!(report.avg_latency, FAILURE_LATENCY_MS);
        assert_eq!(report.packets_lost, lost_before + 1);
        assert_eq!(
            fixture.shared.protocol(Protocol::Http).packets_lost(),
            lost_before + 1
        );
        for protocol in &Protocol::ALL[1..] {
            assert_eq!(fixture.shared.protocol(*protocol).packets_lost(), 0);
        }

        let reports = fixture.sink.reports.lock();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].latency, FAILURE_LATENCY_MS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_failed_probe_counts_one_loss() {
        let mut fixture = engine()
            .failing(Protocol::ALL.to_vec())
            .switch_interval(Duration::from_secs(1))
            .call();

        for protocol in Protocol::ALL {
            assert_eq!(fixture.engine.current_protocol(), protocol);
            let report = fixture.engine.on_report_tick().await;
            assert_eq!(report.latency, FAILURE_LATENCY_MS);
            assert_eq!(fixture.shared.protocol(protocol).packets_lost(), 1);

            tokio::time::advance(Duration::from_secs(1)).await;
            fixture.engine.on_switch_tick(Instant::now());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_switch_tick_advances_exactly_once() {
        let mut fixture = engine().call();
        let start = Instant::now();

        assert_eq!(
            fixture.engine.on_switch_tick(start + Duration::from_secs(20)),
            None
        );

        // The 30 second boundary is crossed once, but the tick is observed well after it
        let late = start + Duration::from_secs(59);
        assert_eq!(fixture.engine.on_switch_tick(late), Some(Protocol::Mqtt));
        assert_eq!(fixture.engine.current_protocol(), Protocol::Mqtt);
        assert_eq!(fixture.shared.active_protocol(), Protocol::Mqtt);

        assert_eq!(
            fixture.engine.on_switch_tick(late + Duration::from_secs(1)),
            None
        );
    }
}
