use std::collections::{HashMap, HashSet};

use egui::{Pos2, Vec2};
use time::OffsetDateTime;

// Node ids are FHIR references of the form "<ResourceType>/<resourceId>".
pub type NodeId = String;

// Visual node radius in world units, grown by connectivity.
pub const NODE_BASE_RADIUS: f32 = 10.0;
pub const NODE_RADIUS_PER_DEGREE: f32 = 2.0;
pub const NODE_MAX_RADIUS: f32 = 26.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    Direct,
    Reverse,
    OneToMany,
}

impl LinkKind {
    // Rendering hint only: reverse/one-to-many edges draw dashed.
    pub fn dashed(self) -> bool {
        !matches!(self, LinkKind::Direct)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub resource_type: String,
    pub display: String,
    // Hops from the query root; assigned at discovery time, never recomputed here.
    pub depth: u32,
    pub pos: Pos2,
    pub vel: Vec2,
    // When set, the simulation snaps the node here and applies no forces.
    pub pinned: Option<Pos2>,
    // Derived from degree on index rebuild.
    pub radius: f32,
    pub last_updated: Option<OffsetDateTime>,
}

impl Node {
    pub fn new(id: NodeId, resource_type: String, display: String, depth: u32) -> Self {
        Self {
            id,
            resource_type,
            display,
            depth,
            pos: Pos2::ZERO,
            vel: Vec2::ZERO,
            pinned: None,
            radius: NODE_BASE_RADIUS,
            last_updated: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Link {
    pub source: NodeId,
    pub target: NodeId,
    // The reference field that produced this edge, e.g. "subject".
    pub field: String,
    pub kind: LinkKind,
    // Pull strength in (0, 1]; scales the spring force.
    pub strength: f32,
}

impl Link {
    pub fn key(&self) -> LinkKey {
        LinkKey::new(&self.source, &self.target, &self.field)
    }
}

// Link identity for diffing: the unordered endpoint pair plus the field name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkKey {
    pub a: NodeId,
    pub b: NodeId,
    pub field: String,
}

impl LinkKey {
    pub fn new(source: &str, target: &str, field: &str) -> Self {
        let (a, b) = if source <= target {
            (source.to_string(), target.to_string())
        } else {
            (target.to_string(), source.to_string())
        };
        Self { a, b, field: field.to_string() }
    }
}

// Per-node adjacency entry; indices point into the node arena.
#[derive(Clone, Debug)]
pub struct NeighborRef {
    pub node: usize,
    pub link: usize,
}

// Counts of records rejected while building a graph from a discovery response.
// Rejected records are logged and skipped; they never abort the whole graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub invalid_nodes: usize,
    pub dangling_links: usize,
    pub self_loops: usize,
    pub duplicate_nodes: usize,
    pub duplicate_links: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }

    // Single user-visible line covering everything that was dropped.
    pub fn summary(&self) -> Option<String> {
        if self.is_clean() {
            return None;
        }
        let mut parts = Vec::new();
        if self.invalid_nodes > 0 {
            parts.push(format!("{} malformed node record(s)", self.invalid_nodes));
        }
        if self.dangling_links > 0 {
            parts.push(format!("{} link(s) with unknown endpoints", self.dangling_links));
        }
        if self.self_loops > 0 {
            parts.push(format!("{} self-referencing link(s)", self.self_loops));
        }
        if self.duplicate_nodes > 0 {
            parts.push(format!("{} duplicate node(s)", self.duplicate_nodes));
        }
        if self.duplicate_links > 0 {
            parts.push(format!("{} duplicate link(s)", self.duplicate_links));
        }
        Some(format!("Ignored {}", parts.join(", ")))
    }
}

// Canonical graph for one discovery session. Nodes live in an insertion-ordered
// arena (discovery order) with an id -> index map; links refer to nodes by id
// and adjacency is kept as indices so the simulation never chases shared refs.
#[derive(Clone, Debug, Default)]
pub struct GraphModel {
    nodes: Vec<Node>,
    links: Vec<Link>,
    index: HashMap<NodeId, usize>,
    adjacency: Vec<Vec<NeighborRef>>,
    degree: Vec<usize>,
    root: Option<NodeId>,
}

impl GraphModel {
    pub fn new() -> Self {
        Self::default()
    }

    // Build a graph from raw discovery output, dropping invalid records.
    // Node order is preserved; the first occurrence of a duplicate id wins.
    pub fn from_parts(
        root: Option<NodeId>,
        nodes: Vec<Node>,
        links: Vec<Link>,
    ) -> (Self, ValidationReport) {
        let mut report = ValidationReport::default();
        let mut graph = Self { root, ..Self::default() };

        for node in nodes {
            if graph.index.contains_key(&node.id) {
                log::warn!("dropping duplicate node {}", node.id);
                report.duplicate_nodes += 1;
                continue;
            }
            graph.index.insert(node.id.clone(), graph.nodes.len());
            graph.nodes.push(node);
        }

        let mut seen_keys: HashSet<LinkKey> = HashSet::new();
        for link in links {
            if link.source == link.target {
                log::warn!("dropping self-loop link on {}", link.source);
                report.self_loops += 1;
                continue;
            }
            if !graph.index.contains_key(&link.source) || !graph.index.contains_key(&link.target) {
                log::warn!(
                    "dropping link {} -> {} ({}): unknown endpoint",
                    link.source,
                    link.target,
                    link.field
                );
                report.dangling_links += 1;
                continue;
            }
            if !seen_keys.insert(link.key()) {
                report.duplicate_links += 1;
                continue;
            }
            graph.links.push(link);
        }

        graph.rebuild_indices();
        (graph, report)
    }

    // Recompute adjacency, degree counts and derived radii. Called after any
    // change to the node or link sets.
    pub fn rebuild_indices(&mut self) {
        self.adjacency = vec![Vec::new(); self.nodes.len()];
        self.degree = vec![0; self.nodes.len()];
        for (li, link) in self.links.iter().enumerate() {
            let (si, ti) = match (self.index.get(&link.source), self.index.get(&link.target)) {
                (Some(&s), Some(&t)) => (s, t),
                _ => continue,
            };
            self.adjacency[si].push(NeighborRef { node: ti, link: li });
            self.adjacency[ti].push(NeighborRef { node: si, link: li });
            self.degree[si] += 1;
            self.degree[ti] += 1;
        }
        for (i, node) in self.nodes.iter_mut().enumerate() {
            let deg = self.degree[i] as f32;
            node.radius =
                (NODE_BASE_RADIUS + NODE_RADIUS_PER_DEGREE * deg.sqrt()).min(NODE_MAX_RADIUS);
        }
    }

    pub fn root(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        let i = self.index_of(id)?;
        Some(&mut self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn neighbors(&self, index: usize) -> &[NeighborRef] {
        self.adjacency.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn degree_of(&self, index: usize) -> usize {
        self.degree.get(index).copied().unwrap_or(0)
    }

    // Case-insensitive substring search over display labels and ids; used by
    // the debounced search-and-focus operation.
    pub fn search(&self, needle: &str) -> Option<&Node> {
        let needle = needle.trim().to_lowercase();
        if needle.is_empty() {
            return None;
        }
        self.nodes
            .iter()
            .find(|n| n.display.to_lowercase().contains(&needle) || n.id.to_lowercase().contains(&needle))
    }
}
