use crate::probe::{Probe, ProbeError, ProbeOutcome, ProbeTargets};
use crate::protocol::Protocol;
use futures::FutureExt;
use futures::future::BoxFuture;
use pnet_packet::Packet;
use pnet_packet::icmp::echo_reply::EchoReplyPacket;
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use socket2::{Domain, Socket, Type};
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

const PAYLOAD: &[u8] = b"netprobe-icmp-echo";

/// Sends one echo request to the collector and waits for the matching reply
///
/// Uses an unprivileged datagram ICMP socket, which the kernel only hands out to groups listed
/// in `net.ipv4.ping_group_range`. Without permission every attempt fails.
pub struct IcmpProbe {
    target: IpAddr,
    deadline: Duration,
    identifier: u16,
    sequence: u16,
}

impl IcmpProbe {
    pub fn new(targets: &ProbeTargets) -> Self {
        Self {
            target: targets.collector,
            deadline: targets.timeouts.icmp_reply,
            identifier: fastrand::u16(..),
            sequence: fastrand::u16(..),
        }
    }
}

impl Probe for IcmpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Icmp
    }

    fn attempt(&mut self) -> BoxFuture<'_, ProbeOutcome> {
        async move {
            let IpAddr::V4(target) = self.target else {
                return Err(ProbeError::Unsupported(
                    "icmp probes require an IPv4 collector address",
                ));
            };

            self.sequence = self.sequence.wrapping_add(1);
            let request = encode_echo_request(self.identifier, self.sequence, PAYLOAD)?;
            let socket = icmp_socket()?;

            let start = Instant::now();
            socket
                .send_to(&request, SocketAddr::new(target.into(), 0))
                .await?;

            let deadline = start + self.deadline;
            let mut buf = [0; 1500];
            loop {
                let (len, from) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
                    .await
                    .map_err(|_| ProbeError::NoReply(self.deadline))??;

                if from.ip() == self.target && is_echo_reply(&buf[..len], self.sequence) {
                    return Ok(start.elapsed());
                }
            }
        }
        .boxed()
    }
}

fn icmp_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(socket2::Protocol::ICMPV4))?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

fn encode_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; MutableEchoRequestPacket::minimum_packet_size() + payload.len()];
    let mut packet = MutableEchoRequestPacket::new(&mut buffer)
        .ok_or_else(|| io::Error::other("echo request buffer too small"))?;

    packet.set_icmp_type(IcmpTypes::EchoRequest);
    packet.set_icmp_code(IcmpCode::new(0));
    packet.set_identifier(identifier);
    packet.set_sequence_number(sequence);
    packet.set_payload(payload);

    // The kernel fills in the checksum for datagram ICMP sockets, but raw sockets don't
    let checksum = IcmpPacket::new(packet.packet())
        .map(|p| icmp::checksum(&p))
        .unwrap_or_default();
    packet.set_checksum(checksum);
    drop(packet);

    Ok(buffer)
}

/// Whether `data` is an echo reply to our request with `sequence`
///
/// The identifier is not checked, because datagram sockets rewrite it to the local port.
fn is_echo_reply(data: &[u8], sequence: u16) -> bool {
    EchoReplyPacket::new(data).is_some_and(|reply| {
        reply.get_icmp_type() == IcmpTypes::EchoReply && reply.get_sequence_number() == sequence
    })
}
