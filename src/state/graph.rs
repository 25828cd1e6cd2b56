use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::time::Duration;

/// Flow identifier embedded in a probe. Flow-stable load balancers route
/// all probes carrying the same identifier along the same path.
pub type FlowId = u16;

/// Lower bound (inclusive) of the flow identifier space.
pub const FLOW_MIN: FlowId = 10_000;
/// Upper bound (exclusive) of the flow identifier space.
pub const FLOW_MAX: FlowId = 65_535;

/// Stable handle to a vertex in a [`Topology`] arena.
///
/// Handles are only minted by the arena, stay valid for the lifetime of the
/// discovery run, and order by creation time.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VertexId(usize);

/// What a vertex stands for: a responding interface, or a synthetic
/// placeholder for a branch that never answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexKind {
    Responsive(IpAddr),
    BlackHole,
}

/// Aggregate round-trip statistics for a vertex (Welford's online algorithm)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RttStats {
    pub count: u64,
    #[serde(with = "duration_serde")]
    pub min: Duration,
    #[serde(with = "duration_serde")]
    pub max: Duration,
    pub mean: f64, // microseconds
    pub m2: f64,   // for stddev calculation
}

impl Default for RttStats {
    fn default() -> Self {
        Self {
            count: 0,
            min: Duration::MAX,
            max: Duration::ZERO,
            mean: 0.0,
            m2: 0.0,
        }
    }
}

impl RttStats {
    /// Fold a new sample into the running aggregates
    pub fn record(&mut self, rtt: Duration) {
        self.count += 1;

        if rtt < self.min {
            self.min = rtt;
        }
        if rtt > self.max {
            self.max = rtt;
        }

        let rtt_micros = rtt.as_micros() as f64;
        let delta = rtt_micros - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = rtt_micros - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn avg(&self) -> Duration {
        Duration::from_micros(self.mean as u64)
    }

    pub fn stddev(&self) -> Duration {
        if self.count < 2 {
            return Duration::ZERO;
        }
        let variance = self.m2 / self.count as f64;
        Duration::from_micros(variance.sqrt() as u64)
    }
}

/// A node of the discovered graph: a responding interface or a black hole.
///
/// The flow set records every flow identifier known to traverse this vertex;
/// successor edges point at downstream vertices sharing at least one flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    pub kind: VertexKind,
    pub flow_set: BTreeSet<FlowId>,
    pub successors: BTreeSet<VertexId>,
    pub rtt: RttStats,
    /// Individual rtt samples keyed by the flow that produced them
    #[serde(with = "samples_serde")]
    pub samples: BTreeMap<FlowId, Vec<Duration>>,
}

impl Vertex {
    fn new(kind: VertexKind) -> Self {
        Self {
            kind,
            flow_set: BTreeSet::new(),
            successors: BTreeSet::new(),
            rtt: RttStats::default(),
            samples: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> Option<IpAddr> {
        match self.kind {
            VertexKind::Responsive(addr) => Some(addr),
            VertexKind::BlackHole => None,
        }
    }

    pub fn is_black_hole(&self) -> bool {
        matches!(self.kind, VertexKind::BlackHole)
    }

    /// Merge a probe response: the flow reached this vertex with the given rtt
    pub fn observe(&mut self, flow: FlowId, rtt: Duration) {
        self.flow_set.insert(flow);
        self.samples.entry(flow).or_default().push(rtt);
        self.rtt.record(rtt);
    }

    /// Union flows into the flow set without rtt evidence (fast path and
    /// black-hole inheritance)
    pub fn absorb_flows<I: IntoIterator<Item = FlowId>>(&mut self, flows: I) {
        self.flow_set.extend(flows);
    }
}

/// Arena owning every vertex of one discovery run.
///
/// Successor edges are ids into this arena, which keeps ownership acyclic
/// even though convergence gives a vertex multiple predecessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    vertices: Vec<Vertex>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, vertex: Vertex) -> VertexId {
        let id = VertexId(self.vertices.len());
        self.vertices.push(vertex);
        id
    }

    pub fn add_responsive(&mut self, addr: IpAddr) -> VertexId {
        self.push(Vertex::new(VertexKind::Responsive(addr)))
    }

    pub fn add_black_hole(&mut self) -> VertexId {
        self.push(Vertex::new(VertexKind::BlackHole))
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.0]
    }

    /// Add a successor edge; duplicate edges collapse
    pub fn link(&mut self, from: VertexId, to: VertexId) {
        self.vertices[from.0].successors.insert(to);
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VertexId, &Vertex)> {
        self.vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (VertexId(i), v))
    }
}

/// All vertices observed at one ttl, with the hop's probing history.
///
/// Address-bearing vertices are deduplicated through an explicit keyed map;
/// replies from a known address merge into the existing vertex. The flow
/// history keeps every identifier ever tried at this ttl in first-tried
/// order (a superset of any single vertex's flow set) so later rounds can
/// replay it.
#[derive(Debug, Clone)]
pub struct Hop {
    pub ttl: u8,
    vertices: Vec<VertexId>,
    by_addr: HashMap<IpAddr, VertexId>,
    flows: Vec<FlowId>,
    flow_seen: HashSet<FlowId>,
}

impl Hop {
    pub fn new(ttl: u8) -> Self {
        Self {
            ttl,
            vertices: Vec::new(),
            by_addr: HashMap::new(),
            flows: Vec::new(),
            flow_seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn vertex_ids(&self) -> &[VertexId] {
        &self.vertices
    }

    pub fn first(&self) -> Option<VertexId> {
        self.vertices.first().copied()
    }

    /// Attach an existing vertex (the root, or a fresh black hole)
    pub fn add(&mut self, topology: &Topology, id: VertexId) {
        if let Some(addr) = topology.vertex(id).address() {
            self.by_addr.insert(addr, id);
        }
        self.vertices.push(id);
    }

    /// Record a probe reply, creating the vertex for a newly seen address
    /// or merging into the existing one
    pub fn record_reply(
        &mut self,
        topology: &mut Topology,
        addr: IpAddr,
        flow: FlowId,
        rtt: Duration,
    ) -> VertexId {
        let id = match self.by_addr.entry(addr) {
            Entry::Occupied(entry) => *entry.get(),
            Entry::Vacant(entry) => {
                let id = topology.add_responsive(addr);
                entry.insert(id);
                self.vertices.push(id);
                id
            }
        };
        topology.vertex_mut(id).observe(flow, rtt);
        id
    }

    /// Append a flow to the history unless it was already tried here
    pub fn record_flow(&mut self, flow: FlowId) -> bool {
        if self.flow_seen.insert(flow) {
            self.flows.push(flow);
            true
        } else {
            false
        }
    }

    pub fn contains_flow(&self, flow: FlowId) -> bool {
        self.flow_seen.contains(&flow)
    }

    /// Every flow ever tried at this ttl, in first-tried order
    pub fn flows(&self) -> &[FlowId] {
        &self.flows
    }

    pub fn total_flows(&self) -> usize {
        self.flows.len()
    }
}

/// Serde helper for Duration (microseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_micros())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros = u64::deserialize(deserializer)?;
        Ok(Duration::from_micros(micros))
    }
}

/// Serde helper for per-flow rtt samples (microseconds)
mod samples_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::FlowId;

    pub fn serialize<S>(
        samples: &BTreeMap<FlowId, Vec<Duration>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let micros: BTreeMap<FlowId, Vec<u64>> = samples
            .iter()
            .map(|(flow, rtts)| {
                let rtts = rtts
                    .iter()
                    .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
                    .collect();
                (*flow, rtts)
            })
            .collect();
        micros.serialize(serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<BTreeMap<FlowId, Vec<Duration>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let micros: BTreeMap<FlowId, Vec<u64>> = BTreeMap::deserialize(deserializer)?;
        Ok(micros
            .into_iter()
            .map(|(flow, rtts)| {
                (
                    flow,
                    rtts.into_iter().map(Duration::from_micros).collect(),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_rtt_stats_initial_state() {
        let stats = RttStats::default();

        assert_eq!(stats.count, 0);
        assert_eq!(stats.min, Duration::MAX);
        assert_eq!(stats.max, Duration::ZERO);
        assert_eq!(stats.mean, 0.0);
        assert_eq!(stats.stddev(), Duration::ZERO);
    }

    #[test]
    fn test_rtt_stats_welford_algorithm() {
        let mut stats = RttStats::default();

        // Known samples: 10, 20, 30 ms. Mean = 20ms, population stddev ~8.16ms
        stats.record(Duration::from_millis(10));
        stats.record(Duration::from_millis(20));
        stats.record(Duration::from_millis(30));

        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.avg().as_millis(), 20);

        let stddev_micros = stats.stddev().as_micros();
        assert!(stddev_micros > 8000 && stddev_micros < 8500);
    }

    #[test]
    fn test_reply_dedup_merges_into_existing_vertex() {
        let mut topology = Topology::new();
        let mut hop = Hop::new(3);

        let first = hop.record_reply(&mut topology, addr(1), 10001, Duration::from_millis(5));
        let second = hop.record_reply(&mut topology, addr(1), 10002, Duration::from_millis(7));

        assert_eq!(first, second);
        assert_eq!(hop.len(), 1);
        assert_eq!(topology.len(), 1);

        let vertex = topology.vertex(first);
        assert_eq!(vertex.address(), Some(addr(1)));
        assert!(vertex.flow_set.contains(&10001));
        assert!(vertex.flow_set.contains(&10002));
        assert_eq!(vertex.rtt.count, 2);
        assert_eq!(vertex.samples[&10001], vec![Duration::from_millis(5)]);
    }

    #[test]
    fn test_distinct_addresses_create_distinct_vertices() {
        let mut topology = Topology::new();
        let mut hop = Hop::new(4);

        let a = hop.record_reply(&mut topology, addr(1), 10001, Duration::from_millis(5));
        let b = hop.record_reply(&mut topology, addr(2), 10002, Duration::from_millis(5));

        assert_ne!(a, b);
        assert_eq!(hop.len(), 2);
        assert_eq!(hop.vertex_ids(), &[a, b]);
    }

    #[test]
    fn test_flow_history_keeps_first_tried_order() {
        let mut hop = Hop::new(2);

        assert!(hop.record_flow(10005));
        assert!(hop.record_flow(10001));
        assert!(!hop.record_flow(10005)); // duplicate
        assert!(hop.record_flow(10003));

        assert_eq!(hop.flows(), &[10005, 10001, 10003]);
        assert_eq!(hop.total_flows(), 3);
        assert!(hop.contains_flow(10001));
        assert!(!hop.contains_flow(10002));
    }

    #[test]
    fn test_black_hole_has_no_address() {
        let mut topology = Topology::new();
        let bh = topology.add_black_hole();

        assert!(topology.vertex(bh).is_black_hole());
        assert_eq!(topology.vertex(bh).address(), None);

        let mut hop = Hop::new(5);
        hop.add(&topology, bh);
        assert_eq!(hop.len(), 1);
        assert_eq!(hop.first(), Some(bh));
    }

    #[test]
    fn test_black_hole_inherits_predecessor_flows() {
        let mut topology = Topology::new();
        let a = topology.add_responsive(addr(1));
        let b = topology.add_responsive(addr(2));
        topology.vertex_mut(a).absorb_flows([10001, 10002]);
        topology.vertex_mut(b).absorb_flows([10003]);

        let bh = topology.add_black_hole();
        for pred in [a, b] {
            let flows: Vec<FlowId> = topology.vertex(pred).flow_set.iter().copied().collect();
            topology.vertex_mut(bh).absorb_flows(flows);
            topology.link(pred, bh);
        }

        let bh_flows = &topology.vertex(bh).flow_set;
        assert_eq!(
            bh_flows.iter().copied().collect::<Vec<_>>(),
            vec![10001, 10002, 10003]
        );
        assert!(topology.vertex(a).successors.contains(&bh));
        assert!(topology.vertex(b).successors.contains(&bh));
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut topology = Topology::new();
        let a = topology.add_responsive(addr(1));
        let b = topology.add_responsive(addr(2));

        topology.link(a, b);
        topology.link(a, b);

        assert_eq!(topology.vertex(a).successors.len(), 1);
    }

    #[test]
    fn test_vertex_serialization_roundtrip() {
        let mut topology = Topology::new();
        let mut hop = Hop::new(1);
        hop.record_reply(&mut topology, addr(9), 10007, Duration::from_millis(12));

        let json = serde_json::to_string(&topology).unwrap();
        let restored: Topology = serde_json::from_str(&json).unwrap();

        let (_, vertex) = restored.iter().next().unwrap();
        assert_eq!(vertex.address(), Some(addr(9)));
        assert_eq!(vertex.samples[&10007], vec![Duration::from_millis(12)]);
    }
}
