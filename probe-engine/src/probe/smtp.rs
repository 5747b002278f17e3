use crate::probe::tcp::connect;
use crate::probe::{Probe, ProbeOutcome, ProbeTargets};
use crate::protocol::Protocol;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

/// Greets the SMTP server with HELO, waits for a reply and quits
pub struct SmtpProbe {
    target: SocketAddr,
    helo: Vec<u8>,
    connect_deadline: Duration,
    response_wait: Duration,
}

impl SmtpProbe {
    pub fn new(targets: &ProbeTargets) -> Self {
        Self {
            target: SocketAddr::new(targets.collector, targets.smtp_port),
            helo: format!("HELO {}\r\n", targets.node_id).into_bytes(),
            connect_deadline: targets.timeouts.connect,
            response_wait: targets.timeouts.smtp_response,
        }
    }
}

impl Probe for SmtpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Smtp
    }

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
        async move {
            let start = Instant::now();
            let mut stream = connect(self.target, self.connect_deadline).await?;
            stream.write_all(&self.helo).await?;

            let mut buf = [0; 512];
            match tokio::time::timeout(self.response_wait, stream.read(&mut buf)).await {
                Ok(Ok(read)) => tracing::debug!(
                    "smtp probe reply: {}",
                    String::from_utf8_lossy(&buf[..read]).trim_end()
                ),
                Ok(Err(e)) => tracing::debug!("smtp probe reply failed: {e}"),
                Err(_) => {
                    tracing::debug!("smtp probe got no reply within {:?}", self.response_wait)
                }
            }

            // The session is over either way, so a failed QUIT doesn't matter
            let _ = stream.write_all(b"QUIT\r\n").await;
            let _ = stream.shutdown().await;
            Ok(start.elapsed())
        }
        .boxed()
    }
}
