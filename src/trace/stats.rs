use crate::state::{Hop, Topology};

/// Minimum sample size n such that, under a uniform k-way split, the
/// probability of missing at least one of the k branches after n
/// independent draws is at most 1 - alpha.
///
/// Closed form: n = ceil(ln(1 - alpha) / ln(1 - 1/k)). Callers always pass
/// k >= 2 (one more branch than currently known); smaller k needs no
/// sampling at all.
pub fn required(k: usize, alpha: f64) -> usize {
    if k < 2 {
        return 0;
    }
    let miss = 1.0 - 1.0 / k as f64;
    ((1.0 - alpha).ln() / miss.ln()).ceil() as usize
}

/// Total number of flows the next round must sample at a hop so that every
/// vertex simultaneously reaches the confidence bound.
///
/// Per vertex the bound assumes one more branch than the successors seen so
/// far, then scales up by the inverse of the vertex's share of the hop's
/// flow history to compensate for unequal load-balancer splits. The hop
/// requirement is the maximum over its vertices.
pub fn flow_target(topology: &Topology, hop: &Hop, alpha: f64) -> usize {
    let total_flows = hop.total_flows();

    let mut max_probes = 0;
    for &id in hop.vertex_ids() {
        let vertex = topology.vertex(id);
        let branches = vertex.successors.len().max(1) + 1;
        let share = if vertex.flow_set.is_empty() || total_flows == 0 {
            1.0
        } else {
            vertex.flow_set.len() as f64 / total_flows as f64
        };
        let scaled = (required(branches, alpha) as f64 / share).ceil() as usize;
        if scaled > max_probes {
            max_probes = scaled;
        }
    }
    max_probes
}
