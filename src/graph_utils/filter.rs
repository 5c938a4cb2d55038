use std::collections::HashSet;

use time::OffsetDateTime;

use super::model::{GraphModel, LinkKey, Node, NodeId};

// Predicates deriving the visible subgraph. Empty include-sets mean "all".
#[derive(Clone, Debug, PartialEq)]
pub struct FilterSpec {
    pub included_resource_types: HashSet<String>,
    pub included_fields: HashSet<String>,
    // Inclusive bounds on a node's record timestamp. Nodes without a
    // timestamp always pass; the filter only excludes what it can date.
    pub date_range: Option<(OffsetDateTime, OffsetDateTime)>,
    pub show_orphans: bool,
    pub max_depth: u32,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            included_resource_types: HashSet::new(),
            included_fields: HashSet::new(),
            date_range: None,
            show_orphans: true,
            max_depth: u32::MAX,
        }
    }
}

impl FilterSpec {
    fn node_included(&self, node: &Node) -> bool {
        if !self.included_resource_types.is_empty()
            && !self.included_resource_types.contains(&node.resource_type)
        {
            return false;
        }
        if node.depth > self.max_depth {
            return false;
        }
        if let (Some((start, end)), Some(updated)) = (self.date_range, node.last_updated)
            && (updated < start || updated > end)
        {
            return false;
        }
        true
    }

    fn field_included(&self, field: &str) -> bool {
        self.included_fields.is_empty() || self.included_fields.contains(field)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibleSet {
    pub nodes: HashSet<NodeId>,
    pub links: HashSet<LinkKey>,
}

// Derive the visible subset of `graph` under `spec`. Pure: the same inputs
// always produce the same id sets, and the default spec returns everything.
//
// Rule order: node-level inclusion (resource type, depth, date) first - a link
// with a hidden endpoint cannot be drawn, so it drops too; then relationship
// field inclusion over the remaining links; finally orphan removal, from which
// the query root is exempt so filtering can never blank the whole view.
pub fn apply(graph: &GraphModel, spec: &FilterSpec) -> VisibleSet {
    let mut nodes: HashSet<NodeId> = graph
        .nodes()
        .iter()
        .filter(|n| spec.node_included(n))
        .map(|n| n.id.clone())
        .collect();

    let mut links: HashSet<LinkKey> = HashSet::new();
    for link in graph.links() {
        if !nodes.contains(&link.source) || !nodes.contains(&link.target) {
            continue;
        }
        if !spec.field_included(&link.field) {
            continue;
        }
        links.insert(link.key());
    }

    if !spec.show_orphans {
        let mut incident: HashSet<&NodeId> = HashSet::new();
        for key in &links {
            incident.insert(&key.a);
            incident.insert(&key.b);
        }
        nodes.retain(|id| incident.contains(id) || graph.root() == Some(id));
    }

    VisibleSet { nodes, links }
}

// Materialize a visible subset as a standalone graph (used by export and by
// re-filtering flows). Node order follows the parent graph's discovery order.
pub fn subgraph(graph: &GraphModel, visible: &VisibleSet) -> GraphModel {
    let nodes: Vec<Node> = graph
        .nodes()
        .iter()
        .filter(|n| visible.nodes.contains(&n.id))
        .cloned()
        .collect();
    let links = graph
        .links()
        .iter()
        .filter(|l| visible.links.contains(&l.key()))
        .cloned()
        .collect();
    let root = graph.root().filter(|id| visible.nodes.contains(*id)).cloned();
    let (sub, _report) = GraphModel::from_parts(root, nodes, links);
    sub
}
