use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::probe::ProbeTransport;
use crate::state::{FlowId, Hop, Topology, VertexId};
use crate::trace::dispatch::send_probes;
use crate::trace::flows::FlowGenerator;
use crate::trace::stats::flow_target;

/// Result of one discovery run: the graph plus run metadata. The full graph
/// is reachable from `root` via successor edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discovery {
    pub topology: Topology,
    pub root: VertexId,
    pub first_hop: IpAddr,
    pub target: Option<IpAddr>,
    pub started_at: DateTime<Utc>,
    pub probes_sent: u64,
}

/// The discovery engine sends flow-tagged probes at increasing ttls and
/// builds the graph of load-balanced paths toward the transport's
/// destination, enlarging each hop until the confidence bound is met.
pub struct DiamondMiner<T: ProbeTransport> {
    config: Config,
    transport: T,
    rng: StdRng,
}

impl<T: ProbeTransport> DiamondMiner<T> {
    pub fn new(config: Config, transport: T) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            transport,
            rng,
        })
    }

    /// Access the transport, e.g. to inspect a scripted one after a run
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One enlargement round between a hop and its successor hop.
    ///
    /// A single-vertex hop takes the fast path: its membership is already
    /// certain, so the flows are unioned in without re-probing. A
    /// multi-vertex hop is probed for whatever part of `flows` it has not
    /// tried yet, the next hop for all of them. Vertices are then linked
    /// wherever their flow sets intersect.
    ///
    /// Returns true iff the next hop gained a vertex, the signal that
    /// continued sampling is still discovering branches.
    fn advance(
        &mut self,
        topology: &mut Topology,
        hop: &mut Hop,
        next_hop: &mut Hop,
        flows: &[FlowId],
        probes_sent: &mut u64,
    ) -> Result<bool> {
        let known = next_hop.len();

        if let [only] = hop.vertex_ids() {
            let only = *only;
            topology.vertex_mut(only).absorb_flows(flows.iter().copied());
            for &flow in flows {
                hop.record_flow(flow);
            }
        } else {
            let untried: Vec<FlowId> = flows
                .iter()
                .copied()
                .filter(|&flow| !hop.contains_flow(flow))
                .collect();
            *probes_sent += send_probes(
                &mut self.transport,
                &self.config,
                topology,
                hop,
                &untried,
            )?;
        }

        *probes_sent += send_probes(&mut self.transport, &self.config, topology, next_hop, flows)?;

        for &near in hop.vertex_ids() {
            for &far in next_hop.vertex_ids() {
                if !topology
                    .vertex(near)
                    .flow_set
                    .is_disjoint(&topology.vertex(far).flow_set)
                {
                    topology.link(near, far);
                }
            }
        }

        Ok(next_hop.len() > known)
    }

    /// Run the discovery toward the transport's destination.
    ///
    /// `first_hop` becomes the root vertex; if `target` is given, the run
    /// ends successfully as soon as it is the lone vertex of a hop.
    pub fn discover(&mut self, first_hop: IpAddr, target: Option<IpAddr>) -> Result<Discovery> {
        let started_at = Utc::now();
        let mut topology = Topology::new();
        let root = topology.add_responsive(first_hop);
        let mut hop = Hop::new(0);
        hop.add(&topology, root);

        let mut probes_sent = 0u64;
        let mut unresponsive = 0u32;
        // The root is the remembered singleton until something replaces it,
        // so a run that never hears an answer still gets its speculative
        // black-hole chain trimmed on exit.
        let mut last_known = Some(root);

        for ttl in self.config.min_ttl..=self.config.max_ttl {
            info!(ttl, "probing hop");
            let mut next_hop = Hop::new(ttl);
            let mut generator = FlowGenerator::new(&hop);

            // Enlarge until the estimator is satisfied or growth stops.
            // Each round draws only the increment: flows already drawn stay
            // drawn, and the target is re-estimated after every round since
            // new successors raise it.
            let mut start = 0;
            let mut stop = flow_target(&topology, &hop, self.config.alpha);
            while stop > start {
                let flows: Vec<FlowId> = (start..stop)
                    .map(|_| generator.next_flow(&mut self.rng))
                    .collect();
                if !self.advance(&mut topology, &mut hop, &mut next_hop, &flows, &mut probes_sent)? {
                    break;
                }
                start = stop;
                stop = flow_target(&topology, &hop, self.config.alpha);
            }
            debug!(
                ttl,
                vertices = next_hop.len(),
                flows = start.max(stop),
                "hop converged"
            );

            // Vertices left without successors share one black hole in the
            // next hop. It inherits their flows, so black holes chain by
            // flow inheritance and can be reconnected once a later vertex
            // answers to one of the inherited flows.
            let dangling: Vec<VertexId> = hop
                .vertex_ids()
                .iter()
                .copied()
                .filter(|&id| topology.vertex(id).successors.is_empty())
                .collect();
            if !dangling.is_empty() {
                let black_hole = topology.add_black_hole();
                next_hop.add(&topology, black_hole);
                for id in dangling {
                    let flows: Vec<FlowId> =
                        topology.vertex(id).flow_set.iter().copied().collect();
                    topology.vertex_mut(black_hole).absorb_flows(flows);
                    topology.link(id, black_hole);
                }
            }

            // A lone vertex in the next hop either finishes the run (the
            // target), extends an unresponsive stretch (a black hole or the
            // same address again), or becomes the new remembered singleton.
            // Branching always resets the stretch.
            if let [only] = next_hop.vertex_ids() {
                let only = *only;
                let vertex = topology.vertex(only);
                if target.is_some() && vertex.address() == target {
                    last_known = None;
                    break;
                }

                let repeats_last = last_known
                    .is_some_and(|prev| topology.vertex(prev).address() == vertex.address());
                if vertex.is_black_hole() || repeats_last {
                    unresponsive += 1;
                } else {
                    unresponsive = 0;
                    last_known = Some(only);
                }
            } else {
                unresponsive = 0;
                last_known = None;
            }

            if unresponsive >= self.config.abort {
                warn!(ttl, unresponsive, "giving up on unresponsive path");
                break;
            }

            hop = next_hop;
        }

        // The run ended on an unresponsive tail: disconnect the speculative
        // black-hole chain behind the last vertex that actually answered.
        if let Some(id) = last_known {
            topology.vertex_mut(id).successors.clear();
        }

        Ok(Discovery {
            topology,
            root,
            first_hop,
            target,
            started_at,
            probes_sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeReply, ProbeSpec};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    /// Transport that resolves flows through a routing function and records
    /// every spec it was asked to send
    struct RouteFn {
        route: fn(u8, FlowId) -> Option<IpAddr>,
        sent: Vec<ProbeSpec>,
    }

    impl RouteFn {
        fn new(route: fn(u8, FlowId) -> Option<IpAddr>) -> Self {
            Self {
                route,
                sent: Vec::new(),
            }
        }
    }

    impl ProbeTransport for RouteFn {
        fn send_receive(
            &mut self,
            probes: &[ProbeSpec],
            _inter: Duration,
            _timeout: Duration,
        ) -> Result<Vec<ProbeReply>> {
            self.sent.extend_from_slice(probes);
            Ok(probes
                .iter()
                .filter_map(|spec| {
                    (self.route)(spec.ttl, spec.flow).map(|responder| ProbeReply {
                        flow: spec.flow,
                        responder,
                        rtt: Duration::from_millis(2),
                    })
                })
                .collect())
        }
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, last))
    }

    fn test_config() -> Config {
        Config {
            retry: 0,
            inter: Duration::ZERO,
            timeout: Duration::from_millis(1),
            seed: Some(7),
            ..Config::default()
        }
    }

    #[test]
    fn test_single_vertex_fast_path_skips_own_hop() {
        let mut miner = DiamondMiner::new(test_config(), RouteFn::new(|_, _| Some(addr(2)))).unwrap();

        let mut topology = Topology::new();
        let root = topology.add_responsive(addr(1));
        let mut hop = Hop::new(0);
        hop.add(&topology, root);
        let mut next_hop = Hop::new(1);

        let mut sent = 0;
        let grew = miner
            .advance(&mut topology, &mut hop, &mut next_hop, &[10001, 10002], &mut sent)
            .unwrap();

        assert!(grew);
        // The single-vertex hop absorbed the flows without probes at ttl 0
        assert!(miner.transport.sent.iter().all(|spec| spec.ttl == 1));
        let root_flows = &topology.vertex(root).flow_set;
        assert!(root_flows.contains(&10001) && root_flows.contains(&10002));
        assert_eq!(hop.flows(), &[10001, 10002]);
    }

    #[test]
    fn test_multi_vertex_hop_probes_only_untried_flows() {
        let mut miner = DiamondMiner::new(test_config(), RouteFn::new(|_, _| Some(addr(9)))).unwrap();

        let mut topology = Topology::new();
        let mut hop = Hop::new(2);
        hop.record_flow(10001);
        hop.record_flow(10002);
        hop.record_reply(&mut topology, addr(3), 10001, Duration::from_millis(1));
        hop.record_reply(&mut topology, addr(4), 10002, Duration::from_millis(1));
        let mut next_hop = Hop::new(3);

        let mut sent = 0;
        miner
            .advance(
                &mut topology,
                &mut hop,
                &mut next_hop,
                &[10001, 10002, 10003],
                &mut sent,
            )
            .unwrap();

        // Only the new flow goes to ttl 2; the full set goes to ttl 3
        let at_own: Vec<FlowId> = miner
            .transport
            .sent
            .iter()
            .filter(|spec| spec.ttl == 2)
            .map(|spec| spec.flow)
            .collect();
        assert_eq!(at_own, vec![10003]);
        let at_next = miner
            .transport
            .sent
            .iter()
            .filter(|spec| spec.ttl == 3)
            .count();
        assert_eq!(at_next, 3);
    }

    #[test]
    fn test_linking_connects_intersecting_flow_sets() {
        let mut miner = DiamondMiner::new(
            test_config(),
            // Split at the next hop: even flows to one address, odd to another
            RouteFn::new(|_, flow| Some(if flow % 2 == 0 { addr(6) } else { addr(7) })),
        )
        .unwrap();

        let mut topology = Topology::new();
        let root = topology.add_responsive(addr(1));
        let mut hop = Hop::new(0);
        hop.add(&topology, root);
        let mut next_hop = Hop::new(1);

        let mut sent = 0;
        miner
            .advance(
                &mut topology,
                &mut hop,
                &mut next_hop,
                &[10001, 10002, 10003, 10004],
                &mut sent,
            )
            .unwrap();

        assert_eq!(next_hop.len(), 2);
        assert_eq!(topology.vertex(root).successors.len(), 2);
    }

    #[test]
    fn test_growth_signal_false_once_hop_stops_growing() {
        let mut miner = DiamondMiner::new(test_config(), RouteFn::new(|_, _| Some(addr(5)))).unwrap();

        let mut topology = Topology::new();
        let root = topology.add_responsive(addr(1));
        let mut hop = Hop::new(0);
        hop.add(&topology, root);
        let mut next_hop = Hop::new(1);

        let mut sent = 0;
        let first = miner
            .advance(&mut topology, &mut hop, &mut next_hop, &[10001], &mut sent)
            .unwrap();
        let second = miner
            .advance(&mut topology, &mut hop, &mut next_hop, &[10002], &mut sent)
            .unwrap();

        assert!(first);
        assert!(!second);
    }
}
