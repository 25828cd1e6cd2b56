use anyhow::Result;
use tracing::debug;

use crate::config::Config;
use crate::probe::{ProbeSpec, ProbeTransport};
use crate::state::{FlowId, Hop, Topology};

/// Probe a hop for a set of flows, retrying until every flow is resolved or
/// the retry budget runs out.
///
/// Every flow handed in is recorded in the hop's history up front: tried
/// is tried, answered or not. Each round re-probes exactly the flows still
/// unresolved; replies create or merge vertices keyed by responder address.
///
/// Budget semantics (signed `retry`): the round counter is checked against
/// |retry| before it is updated, and a round that saw at least one reply
/// resets the counter only when `retry` is negative. Flows left unresolved
/// at exit are signal for the caller, not a failure.
///
/// Returns the number of probes handed to the transport.
pub fn send_probes<T: ProbeTransport>(
    transport: &mut T,
    config: &Config,
    topology: &mut Topology,
    hop: &mut Hop,
    flows: &[FlowId],
) -> Result<u64> {
    for &flow in flows {
        hop.record_flow(flow);
    }

    let ttl = hop.ttl;
    let mut unresolved: Vec<FlowId> = flows.to_vec();
    let mut rounds = 0u32;
    let mut sent = 0u64;

    while !unresolved.is_empty() {
        let probes: Vec<ProbeSpec> = unresolved
            .iter()
            .map(|&flow| ProbeSpec { ttl, flow })
            .collect();
        let replies = transport.send_receive(&probes, config.inter, config.timeout)?;
        sent += probes.len() as u64;

        let answered = !replies.is_empty();
        for reply in &replies {
            hop.record_reply(topology, reply.responder, reply.flow, reply.rtt);
            unresolved.retain(|&flow| flow != reply.flow);
        }
        debug!(
            ttl,
            replies = replies.len(),
            outstanding = unresolved.len(),
            "probe round finished"
        );

        if rounds >= config.retry.unsigned_abs() {
            break;
        }
        if answered && config.retry < 0 {
            rounds = 0;
        } else {
            rounds += 1;
        }
    }

    Ok(sent)
}
