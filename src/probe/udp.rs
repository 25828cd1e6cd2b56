use anyhow::{bail, Result};
use socket2::Socket;
use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::probe::correlate::correlate_reply;
use crate::probe::socket::{create_flow_socket, create_icmp_recv_socket, send_udp_probe, set_ttl};
use crate::probe::transport::{ProbeReply, ProbeSpec, ProbeTransport};
use crate::state::FlowId;

/// Default destination port (classic traceroute range)
pub const DEFAULT_PROBE_PORT: u16 = 33434;

/// How long a single blocking read may sit before the drain loop rechecks
/// its deadline
const RECV_POLL: Duration = Duration::from_millis(100);

/// Probe payload: a small magic marker. Correlation relies on the quoted
/// source port, not the payload, since quotes are routinely truncated to
/// the first 8 bytes past the IP header.
const PROBE_PAYLOAD: [u8; 4] = *b"mpt\0";

/// UDP probe transport: the flow identifier doubles as the source port.
///
/// Flow ids live in [10000, 65535), so each is a valid, unprivileged local
/// port; flow-stable load balancers hash it as part of the five-tuple, and
/// ICMP errors quote it back for correlation.
pub struct UdpTransport {
    destination: Ipv4Addr,
    port: u16,
    recv: Socket,
}

impl UdpTransport {
    pub fn new(destination: IpAddr, port: u16) -> Result<Self> {
        let IpAddr::V4(destination) = destination else {
            bail!("only IPv4 destinations are supported");
        };
        let recv = create_icmp_recv_socket(RECV_POLL)?;
        Ok(Self {
            destination,
            port,
            recv,
        })
    }
}

impl ProbeTransport for UdpTransport {
    fn send_receive(
        &mut self,
        probes: &[ProbeSpec],
        inter: Duration,
        timeout: Duration,
    ) -> Result<Vec<ProbeReply>> {
        let mut sent_at: HashMap<FlowId, Instant> = HashMap::with_capacity(probes.len());

        for spec in probes {
            // A fresh socket per probe: the bind pins the source port to
            // the flow, the ttl is per-probe state.
            let socket = match create_flow_socket(spec.flow) {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(flow = spec.flow, "could not bind flow socket: {e}");
                    continue;
                }
            };
            if let Err(e) = set_ttl(&socket, spec.ttl) {
                warn!(ttl = spec.ttl, "could not set ttl: {e}");
                continue;
            }
            if let Err(e) = send_udp_probe(
                &socket,
                &PROBE_PAYLOAD,
                IpAddr::V4(self.destination),
                self.port,
            ) {
                warn!(ttl = spec.ttl, flow = spec.flow, "probe send failed: {e}");
                continue;
            }
            sent_at.insert(spec.flow, Instant::now());

            if !inter.is_zero() {
                std::thread::sleep(inter);
            }
        }

        // Bounded drain: collect whatever arrives until the deadline. An
        // empty result is a legitimate outcome.
        let deadline = Instant::now() + timeout;
        let mut replies = Vec::new();
        let mut buffer = [MaybeUninit::<u8>::uninit(); 1500];

        while Instant::now() < deadline {
            let len = match self.recv.recv_from(&mut buffer) {
                Ok((len, _)) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let received = Instant::now();

            // Safety: recv_from initialized the first `len` bytes
            let datagram =
                unsafe { std::slice::from_raw_parts(buffer.as_ptr() as *const u8, len) };

            if let Some(correlated) = correlate_reply(datagram, self.destination) {
                if let Some(&at) = sent_at.get(&correlated.flow) {
                    replies.push(ProbeReply {
                        flow: correlated.flow,
                        responder: correlated.responder,
                        rtt: received.saturating_duration_since(at),
                    });
                }
            }
        }

        Ok(replies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_ipv6_destination() {
        let destination = IpAddr::V6(std::net::Ipv6Addr::LOCALHOST);
        assert!(UdpTransport::new(destination, DEFAULT_PROBE_PORT).is_err());
    }
}
