use crate::probe::{Probe, ProbeError, ProbeOutcome, ProbeTargets};
use crate::protocol::Protocol;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Opens a raw TCP connection, sends a request line and waits briefly for any response
pub struct TcpProbe {
    target: SocketAddr,
    request: Vec<u8>,
    connect_deadline: Duration,
    response_wait: Duration,
}

impl TcpProbe {
    pub fn new(targets: &ProbeTargets) -> Self {
        let target = SocketAddr::new(targets.collector, targets.tcp_port);
        let request = format!(
            "GET {} HTTP/1.1\r\nHost: {target}\r\nConnection: close\r\n\r\n",
            targets.tcp_probe_path
        );

        Self {
            target,
            request: request.into_bytes(),
            connect_deadline: targets.timeouts.connect,
            response_wait: targets.timeouts.tcp_response,
        }
    }
}

impl Probe for TcpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Tcp
    }

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
        async move {
            let start = Instant::now();
            let mut stream = connect(self.target, self.connect_deadline).await?;
            stream.write_all(&self.request).await?;

            let mut buf = [0; 1024];
            match tokio::time::timeout(self.response_wait, stream.read(&mut buf)).await {
                Ok(Ok(read)) if read > 0 => {
                    let drained = drain(&mut stream);
                    tracing::debug!("tcp probe discarded {} response bytes", read + drained);
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("tcp probe response failed: {e}"),
                Err(_) => {
                    tracing::debug!("tcp probe got no response within {:?}", self.response_wait)
                }
            }

            let _ = stream.shutdown().await;
            Ok(start.elapsed())
        }
        .boxed()
    }
}

/// Connects to `target`, bounded by `deadline`
pub(crate) async fn connect(
    target: SocketAddr,
    deadline: Duration,
) -> Result<TcpStream, ProbeError> {
    tokio::time::timeout(deadline, TcpStream::connect(target))
        .await
        .map_err(|_| ProbeError::Timeout(deadline))?
        .map_err(|source| ProbeError::Connect { target, source })
}

/// Discards whatever the peer has already sent, without waiting for more
fn drain(stream: &mut TcpStream) -> usize {
    let mut buf = [0; 1024];
    let mut drained = 0;
    loop {
        match stream.try_read(&mut buf) {
            Ok(0) => break,
            Ok(read) => drained += read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }

    drained
}
