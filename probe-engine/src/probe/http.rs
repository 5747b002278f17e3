use crate::probe::{Probe, ProbeOutcome, ProbeTargets};
use crate::protocol::Protocol;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// POSTs a small JSON document to the collector; any HTTP status counts as a completed round trip
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    payload: serde_json::Value,
    deadline: Duration,
}

impl HttpProbe {
    pub fn new(targets: &ProbeTargets, client: reqwest::Client) -> Self {
        let target = SocketAddr::new(targets.collector, targets.http_port);
        let payload = serde_json::json!({
            "test": "http_probe",
            "node_id": targets.node_id,
        });

        Self {
            client,
            url: format!("http://{target}{}", targets.http_probe_path),
            payload,
            deadline: targets.timeouts.http_request,
        }
    }
}

impl Probe for HttpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
        async move {
            let start = Instant::now();

            // The round trip ends at the status line, the body is never read
            let response = self
                .client
                .post(&self.url)
                .timeout(self.deadline)
                .json(&self.payload)
                .send()
                .await?;

            tracing::debug!(status = %response.status(), "http probe answered");
            Ok(start.elapsed())
        }
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::ProbeError;
    use crate::test::one_shot_server;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn targets(port: u16) -> ProbeTargets {
        let mut targets = ProbeTargets::new("node-7", IpAddr::V4(Ipv4Addr::LOCALHOST));
        targets.http_port = port;
        targets
    }

    fn probe(targets: &ProbeTargets) -> HttpProbe {
        HttpProbe::new(targets, reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_any_status_is_success() {
        let (addr, server) =
            one_shot_server("HTTP/1.1 500 INTERNAL SERVER ERROR\r\nContent-Length: 0\r\n\r\n")
                .await;

        let mut probe = probe(&targets(addr.port()));
        assert!(probe.attempt().await.is_ok());

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /api/test/http HTTP/1.1\r\n"));
        assert!(request.contains("\"node_id\":\"node-7\""));
    }

    #[tokio::test]
    async fn test_status_line_completes_round_trip_without_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0; 1024];
            let _ = stream.read(&mut buf).await.unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n")
                .await
                .unwrap();
            // Keep the body open well past the request deadline
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let mut targets = targets(port);
        targets.timeouts.http_request = Duration::from_millis(300);
        let mut probe = probe(&targets);
        let latency = probe.attempt().await.unwrap();
        assert!(latency < Duration::from_millis(300));

        server.abort();
    }

    #[tokio::test]
    async fn test_transport_error_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut probe = probe(&targets(port));
        let result = probe.attempt().await;
        assert!(matches!(result, Err(ProbeError::Http(e)) if e.is_connect()));
    }
}
