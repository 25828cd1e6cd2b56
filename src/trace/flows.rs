use rand::Rng;
use std::collections::HashSet;

use crate::state::{FlowId, Hop, FLOW_MAX, FLOW_MIN};

/// Lazy, unbounded flow id stream for one hop.
///
/// Replays the hop's history in first-tried order so already-tested flows
/// stay stable across enlargement rounds, then mints fresh uniformly random
/// ids in [FLOW_MIN, FLOW_MAX) that the hop has never seen. The caller
/// decides how many to draw.
pub struct FlowGenerator {
    replay: std::vec::IntoIter<FlowId>,
    seen: HashSet<FlowId>,
}

impl FlowGenerator {
    /// Open a stream over a hop, snapshotting its flow history
    pub fn new(hop: &Hop) -> Self {
        let history = hop.flows().to_vec();
        let seen = history.iter().copied().collect();
        Self {
            replay: history.into_iter(),
            seen,
        }
    }

    /// Draw the next flow id. History first, then fresh mints; a minted id
    /// is registered immediately so it is never produced again for this hop.
    pub fn next_flow<R: Rng>(&mut self, rng: &mut R) -> FlowId {
        if let Some(flow) = self.replay.next() {
            return flow;
        }
        loop {
            let flow = rng.gen_range(FLOW_MIN..FLOW_MAX);
            if self.seen.insert(flow) {
                return flow;
            }
        }
    }
}
