use std::collections::BTreeSet;
use std::io::Write;

use crate::state::{Vertex, VertexId};
use crate::trace::Discovery;

/// Render a discovery run as a text report: one block per distance from
/// the root, then the edge list.
pub fn write_report<W: Write>(discovery: &Discovery, mut writer: W) -> std::io::Result<()> {
    let topology = &discovery.topology;

    match discovery.target {
        Some(target) => writeln!(
            writer,
            "mptrace report toward {} (first hop {})",
            target, discovery.first_hop
        )?,
        None => writeln!(writer, "mptrace report from first hop {}", discovery.first_hop)?,
    }
    writeln!(
        writer,
        "Started: {}",
        discovery.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(writer, "Probes sent: {}", discovery.probes_sent)?;
    writeln!(writer)?;

    writeln!(
        writer,
        "{:>5}  {:<40} {:>6} {:>8} {:>8} {:>8} {:>8}",
        "#", "Host", "Flows", "Avg", "Min", "Max", "StdDev"
    )?;
    writeln!(writer, "{}", "-".repeat(90))?;

    // Walk the graph level by level; ttls are strictly increasing along
    // edges, so a vertex's first visit fixes its depth.
    let mut visited: BTreeSet<VertexId> = BTreeSet::new();
    visited.insert(discovery.root);
    let mut level = vec![discovery.root];
    let mut edges: Vec<(VertexId, VertexId)> = Vec::new();
    let mut depth = 0usize;

    while !level.is_empty() {
        let mut next_level: Vec<VertexId> = Vec::new();
        for &id in &level {
            let vertex = topology.vertex(id);
            write_vertex_row(&mut writer, depth, vertex)?;
            for &succ in &vertex.successors {
                edges.push((id, succ));
                if visited.insert(succ) {
                    next_level.push(succ);
                }
            }
        }
        level = next_level;
        depth += 1;
    }

    if !edges.is_empty() {
        writeln!(writer)?;
        writeln!(writer, "Links:")?;
        for (from, to) in edges {
            writeln!(
                writer,
                "  {} -> {}",
                host_label(topology.vertex(from)),
                host_label(topology.vertex(to))
            )?;
        }
    }

    Ok(())
}

fn write_vertex_row<W: Write>(writer: &mut W, depth: usize, vertex: &Vertex) -> std::io::Result<()> {
    let (avg, min, max, stddev) = if vertex.rtt.count > 0 {
        (
            format!("{:.1}ms", vertex.rtt.avg().as_secs_f64() * 1000.0),
            format!("{:.1}ms", vertex.rtt.min.as_secs_f64() * 1000.0),
            format!("{:.1}ms", vertex.rtt.max.as_secs_f64() * 1000.0),
            format!("{:.1}ms", vertex.rtt.stddev().as_secs_f64() * 1000.0),
        )
    } else {
        ("-".into(), "-".into(), "-".into(), "-".into())
    };

    writeln!(
        writer,
        "{:>5}  {:<40} {:>6} {:>8} {:>8} {:>8} {:>8}",
        depth,
        host_label(vertex),
        vertex.flow_set.len(),
        avg,
        min,
        max,
        stddev
    )
}

fn host_label(vertex: &Vertex) -> String {
    match vertex.address() {
        Some(addr) => addr.to_string(),
        None => "* * *".to_string(),
    }
}
