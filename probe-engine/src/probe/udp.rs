use crate::probe::{Probe, ProbeOutcome, ProbeTargets};
use crate::protocol::Protocol;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Sends one identifying datagram from an ephemeral port
///
/// If the collector echoes the datagram within the grace period, the latency is the observed
/// round trip. Otherwise the datagram is considered sent once the grace period is over.
pub struct UdpProbe {
    target: SocketAddr,
    payload: Vec<u8>,
    grace: Duration,
}

impl UdpProbe {
    pub fn new(targets: &ProbeTargets) -> Self {
        Self {
            target: SocketAddr::new(targets.collector, targets.udp_port),
            payload: format!("netprobe udp {}", targets.node_id).into_bytes(),
            grace: targets.timeouts.udp_grace,
        }
    }
}

impl Probe for UdpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Udp
    }

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
        async move {
            let start = Instant::now();
            let local = match self.target.ip() {
                IpAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
                IpAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
            };
            let socket = UdpSocket::bind(local).await?;
            socket.send_to(&self.payload, self.target).await?;

            let deadline = start + self.grace;
            let mut buf = [0; 1500];
            loop {
                match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                    Ok(Ok((_, from))) if from == self.target => {
                        tracing::debug!("udp probe echoed by {from}");
                        return Ok(start.elapsed());
                    }
                    // Stray datagram from someone else
                    Ok(Ok(_)) => continue,
                    Ok(Err(_)) | Err(_) => break,
                }
            }

            tokio::time::sleep_until(deadline).await;
            Ok(start.elapsed())
        }
        .boxed()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::ProbeError;

    fn targets(port: u16) -> ProbeTargets {
        let mut targets = ProbeTargets::new("node-1", IpAddr::V4(Ipv4Addr::LOCALHOST));
        targets.udp_port = port;
        targets.timeouts.udp_grace = Duration::from_millis(200);
        targets
    }

    #[tokio::test]
    async fn test_echo_ends_probe_early() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let echo = tokio::spawn(async move {
            let mut buf = [0; 1500];
            let (len, from) = server.recv_from(&mut buf).await.unwrap();
            server.send_to(&buf[..len], from).await.unwrap();
            buf[..len].to_vec()
        });

        let mut probe = UdpProbe::new(&targets(port));
        let latency = probe.attempt().await.unwrap();
        assert!(latency < Duration::from_millis(200));
        assert_eq!(echo.await.unwrap(), b"netprobe udp node-1");
    }

    #[tokio::test]
    async fn test_unanswered_datagram_waits_out_grace_period() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let mut probe = UdpProbe::new(&targets(port));
        let latency = probe.attempt().await.unwrap();
        assert!(latency >= Duration::from_millis(200));

        let mut buf = [0; 1500];
        let (len, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"netprobe udp node-1");
    }

    #[tokio::test]
    async fn test_unsendable_datagram_is_failure() {
        // The kernel rejects broadcasts from sockets without SO_BROADCAST
        let mut probe = UdpProbe::new(&targets(9));
        probe.target = SocketAddr::new(Ipv4Addr::BROADCAST.into(), 9);
        assert!(matches!(probe.attempt().await, Err(ProbeError::Io(_))));
    }
}
