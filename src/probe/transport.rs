use anyhow::Result;
use std::net::IpAddr;
use std::time::Duration;

use crate::state::FlowId;

/// One probe awaiting dispatch: the distance to probe at and the flow
/// signature to encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeSpec {
    pub ttl: u8,
    pub flow: FlowId,
}

/// A response attributed back to the probe that triggered it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReply {
    pub flow: FlowId,
    pub responder: IpAddr,
    pub rtt: Duration,
}

/// Wire-level seam of the discovery engine.
///
/// An implementation encodes each spec into a probe toward its fixed
/// destination, sends the batch spaced by `inter`, and collects whatever
/// responses arrive until `timeout` elapses after the last send, as one
/// synchronous bounded wait. Missing replies are not an error; the engine
/// treats silence as data. Implementations are swappable per measurement
/// protocol (and replaceable by a scripted fake in tests).
pub trait ProbeTransport {
    fn send_receive(
        &mut self,
        probes: &[ProbeSpec],
        inter: Duration,
        timeout: Duration,
    ) -> Result<Vec<ProbeReply>>;
}
