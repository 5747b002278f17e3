use crate::probe::tcp::connect;
use crate::probe::{Probe, ProbeError, ProbeOutcome, ProbeTargets};
use crate::protocol::Protocol;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;
const PROTOCOL_LEVEL_3_1_1: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;

/// Publishes a timestamped ping at QoS 0 over a lazily (re)established MQTT 3.1.1 session
pub struct MqttProbe {
    broker: SocketAddr,
    client_id: String,
    topic: String,
    keep_alive_secs: u16,
    connect_deadline: Duration,
    deadline: Duration,
    session: Option<TcpStream>,
}

impl MqttProbe {
    pub fn new(targets: &ProbeTargets) -> Self {
        Self {
            broker: SocketAddr::new(targets.mqtt_broker, targets.mqtt_port),
            client_id: targets.node_id.clone(),
            topic: targets.mqtt_topic.clone(),
            keep_alive_secs: targets.mqtt_keep_alive_secs,
            connect_deadline: targets.timeouts.connect,
            deadline: targets.timeouts.mqtt,
            session: None,
        }
    }

    async fn open_session(&self) -> Result<TcpStream, ProbeError> {
        tokio::time::timeout(self.deadline, self.handshake())
            .await
            .map_err(|_| ProbeError::Timeout(self.deadline))?
    }

    async fn handshake(&self) -> Result<TcpStream, ProbeError> {
        let mut stream = connect(self.broker, self.connect_deadline).await?;
        stream
            .write_all(&encode_connect(&self.client_id, self.keep_alive_secs))
            .await?;

        let mut connack = [0; 4];
        stream.read_exact(&mut connack).await?;
        if connack[0] != CONNACK || connack[1] != 2 {
            return Err(ProbeError::MalformedReply("expected CONNACK"));
        }

        match connack[3] {
            0 => Ok(stream),
            code => Err(ProbeError::BrokerRefused(code)),
        }
    }
}

impl Probe for MqttProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Mqtt
    }

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
        async move {
            // A failed attempt leaves no session behind, so the next one reconnects
            let mut stream = match self.session.take() {
                Some(stream) => stream,
                None => {
                    let stream = self.open_session().await?;
                    tracing::debug!(broker = %self.broker, "mqtt session established");
                    stream
                }
            };

            let start = Instant::now();
            let publish = encode_publish(&self.topic, ping_payload(&self.client_id).as_bytes());
            tokio::time::timeout(self.deadline, stream.write_all(&publish))
                .await
                .map_err(|_| ProbeError::Timeout(self.deadline))??;
            process_inbound(&mut stream)?;

            self.session = Some(stream);
            Ok(start.elapsed())
        }
        .boxed()
    }
}

fn ping_payload(client_id: &str) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("ping {client_id} {}", now.as_millis())
}

/// Consumes whatever the broker has sent so far, without waiting for more
fn process_inbound(stream: &mut TcpStream) -> Result<(), ProbeError> {
    let mut buf = [0; 512];
    loop {
        match stream.try_read(&mut buf) {
            Ok(0) => return Err(ProbeError::Disconnected),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn encode_remaining_length(mut len: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }

        out.push(byte);
        if len == 0 {
            break;
        }
    }
}

fn put_str(s: &str, out: &mut Vec<u8>) {
    out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn packet(header: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![header];
    encode_remaining_length(body.len(), &mut packet);
    packet.extend_from_slice(body);
    packet
}

fn encode_connect(client_id: &str, keep_alive_secs: u16) -> Vec<u8> {
    let mut body = Vec::new();
    put_str("MQTT", &mut body);
    body.push(PROTOCOL_LEVEL_3_1_1);
    body.push(CLEAN_SESSION);
    body.extend_from_slice(&keep_alive_secs.to_be_bytes());
    put_str(client_id, &mut body);
    packet(CONNECT, &body)
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    put_str(topic, &mut body);
    body.extend_from_slice(payload);
    packet(PUBLISH, &body)
}
