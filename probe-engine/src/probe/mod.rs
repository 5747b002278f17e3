//! One probe per protocol, each attempting a single round trip against the collector.
//!
//! Probes never retry and never hold a socket past their own return, except for the MQTT
//! session, which is kept open between attempts and reopened lazily after a failure.

mod http;
mod icmp;
mod mqtt;
mod smtp;
mod tcp;
mod udp;

pub use http::HttpProbe;
pub use icmp::IcmpProbe;
pub use mqtt::MqttProbe;
pub use smtp::SmtpProbe;
pub use tcp::TcpProbe;
pub use udp::UdpProbe;

use crate::protocol::Protocol;
use futures::future::BoxFuture;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Latency reported to the collector for a failed probe
pub const FAILURE_LATENCY_MS: f64 = 999.0;

pub type ProbeOutcome = Result<Duration, ProbeError>;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to connect to {target}")]
    Connect {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("i/o error during round trip")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("http request failed")]
    Http(#[from] reqwest::Error),
    #[error("broker refused the connection (return code {0})")]
    BrokerRefused(u8),
    #[error("peer closed the session")]
    Disconnected,
    #[error("malformed reply: {0}")]
    MalformedReply(&'static str),
    #[error("no reply within {0:?}")]
    NoReply(Duration),
    #[error("{0}")]
    Unsupported(&'static str),
}

/// The latency to report for `outcome`, substituting the failure latency for errors
pub fn reported_latency_ms(outcome: &ProbeOutcome) -> f64 {
    match outcome {
        Ok(latency) => latency.as_secs_f64() * 1000.0,
        Err(_) => FAILURE_LATENCY_MS,
    }
}

/// A single protocol-specific round trip
pub trait Probe: Send {
    fn protocol(&self) -> Protocol;

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome>;
}

#[derive(Clone, Debug)]
pub struct ProbeTimeouts {
    /// Deadline for establishing TCP connections (TCP, SMTP and the MQTT session)
    pub connect: Duration,
    /// End-to-end deadline for the HTTP probe request
    pub http_request: Duration,
    pub tcp_response: Duration,
    pub smtp_response: Duration,
    /// How long the UDP probe waits for an echo before releasing its socket
    pub udp_grace: Duration,
    /// Deadline for the MQTT handshake and for each publish
    pub mqtt: Duration,
    pub icmp_reply: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(3),
            http_request: Duration::from_secs(5),
            tcp_response: Duration::from_secs(1),
            smtp_response: Duration::from_secs(2),
            udp_grace: Duration::from_millis(10),
            mqtt: Duration::from_secs(3),
            icmp_reply: Duration::from_secs(1),
        }
    }
}

/// Where and how the probes reach the collector and the MQTT broker
#[derive(Clone, Debug)]
pub struct ProbeTargets {
    pub node_id: String,
    pub collector: IpAddr,
    pub http_port: u16,
    pub http_probe_path: String,
    pub tcp_port: u16,
    pub tcp_probe_path: String,
    pub udp_port: u16,
    pub smtp_port: u16,
    pub mqtt_broker: IpAddr,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub mqtt_keep_alive_secs: u16,
    pub timeouts: ProbeTimeouts,
}

impl ProbeTargets {
    /// Targets on the default ports, with the broker colocated with the collector
    pub fn new(node_id: impl Into<String>, collector: IpAddr) -> Self {
        Self {
            node_id: node_id.into(),
            collector,
            http_port: 5000,
            http_probe_path: "/api/test/http".to_string(),
            tcp_port: 5000,
            tcp_probe_path: "/api/test/tcp".to_string(),
            udp_port: 5001,
            smtp_port: 25,
            mqtt_broker: collector,
            mqtt_port: 1883,
            mqtt_topic: "netprobe/ping".to_string(),
            mqtt_keep_alive_secs: 0,
            timeouts: ProbeTimeouts::default(),
        }
    }
}

/// The probes, indexed by protocol
pub struct ProbeSet {
    probes: [Box<dyn Probe>; Protocol::COUNT],
}

impl ProbeSet {
    pub fn new(targets: &ProbeTargets) -> Result<Self, ProbeError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(targets.timeouts.connect)
            .build()?;

        Ok(Self {
            probes: [
                Box::new(HttpProbe::new(targets, http_client)),
                Box::new(MqttProbe::new(targets)),
                Box::new(UdpProbe::new(targets)),
                Box::new(TcpProbe::new(targets)),
                Box::new(IcmpProbe::new(targets)),
                Box::new(SmtpProbe::new(targets)),
            ],
        })
    }

    /// Replaces the probe for the protocol `probe` reports
    pub fn with_probe(mut self, probe: Box<dyn Probe>) -> Self {
        let index = probe.protocol().index();
        self.probes[index] = probe;
        self
    }

    pub async fn attempt(&mut self, protocol: Protocol) -> ProbeOutcome {
        self.probes[protocol.index()].attempt().await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures::FutureExt;
    use std::net::Ipv4Addr;

    struct FixedProbe(Protocol, Duration);

    impl Probe for FixedProbe {
        fn protocol(&self) -> Protocol {
            self.0
        }

        fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
            let latency = self.1;
            async move { Ok(latency) }.boxed()
        }
    }

    #[test]
    fn test_failures_report_the_failure_latency() {
        assert_eq!(reported_latency_ms(&Ok(Duration::from_millis(42))), 42.0);
        assert_eq!(
            reported_latency_ms(&Err(ProbeError::Disconnected)),
            FAILURE_LATENCY_MS
        );
    }

    #[tokio::test]
    async fn test_probe_set_dispatches_by_protocol() {
        let targets = ProbeTargets::new("node", IpAddr::V4(Ipv4Addr::LOCALHOST));
        let mut probes = ProbeSet::new(&targets)
            .unwrap()
            .with_probe(Box::new(FixedProbe(Protocol::Tcp, Duration::from_millis(7))))
            .with_probe(Box::new(FixedProbe(Protocol::Smtp, Duration::from_millis(9))));

        assert_eq!(
            probes.attempt(Protocol::Tcp).await.unwrap(),
            Duration::from_millis(7)
        );
        assert_eq!(
            probes.attempt(Protocol::Smtp).await.unwrap(),
            Duration::from_millis(9)
        );
    }
}
