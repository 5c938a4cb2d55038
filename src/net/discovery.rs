use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::graph_utils::model::{GraphModel, Link, LinkKind, Node, ValidationReport};

// Errors a collaborator can report. Transport failures are transient and get
// retried with backoff; validation failures are final and surface at once.
#[derive(Clone, Debug)]
pub enum ServiceError {
    Transport(String),
    Validation(String),
}

impl ServiceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Transport(_))
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Transport(msg) => write!(f, "transport error: {msg}"),
            ServiceError::Validation(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Copy, Clone, Debug)]
pub struct DiscoveryOptions {
    pub depth: u32,
    pub include_counts: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self { depth: 2, include_counts: false }
    }
}

// Wire DTOs for the discovery backend, FHIR-style camelCase on the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSource {
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub display: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawNode {
    pub id: String,
    pub resource_type: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub depth: u32,
    // FHIR meta.lastUpdated, RFC 3339; optional and best-effort parsed.
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLink {
    pub source: String,
    pub target: String,
    pub field: String,
    #[serde(default)]
    pub kind: Option<LinkKind>,
    #[serde(default)]
    pub strength: Option<f32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub source: RawSource,
    pub nodes: Vec<RawNode>,
    pub links: Vec<RawLink>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipStats {
    pub total_resources: usize,
    pub total_relationships: usize,
    pub most_connected_resources: Vec<ConnectedResource>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedResource {
    pub id: String,
    pub display: String,
    pub relationship_count: usize,
}

// The relationship-discovery backend as the engine consumes it. Calls are
// blocking; the request lifecycle runs them on worker threads and ferries
// results back over a channel.
pub trait DiscoveryService: Send + Sync {
    fn discover(
        &self,
        resource_type: &str,
        resource_id: &str,
        opts: &DiscoveryOptions,
    ) -> ServiceResult<DiscoveryResponse>;

    fn statistics(&self) -> ServiceResult<RelationshipStats>;

    // Backend-side path discovery. Optional: the engine computes paths
    // locally by default and never requires this.
    fn find_paths(
        &self,
        _source: &str,
        _target: &str,
        _max_depth: u32,
    ) -> ServiceResult<Vec<crate::graph_utils::paths::PathResult>> {
        Err(ServiceError::Validation("path discovery not supported by this backend".into()))
    }
}

// Turn a discovery response into a canonical graph. Invalid records (dangling
// links, self-loops, duplicates, nameless nodes) are dropped and counted, not
// fatal - the rest of the response still renders.
pub fn build_graph(response: &DiscoveryResponse) -> (GraphModel, ValidationReport) {
    let root_id = format!("{}/{}", response.source.resource_type, response.source.resource_id);
    let mut invalid_nodes = 0usize;

    let mut nodes = Vec::with_capacity(response.nodes.len());
    for raw in &response.nodes {
        if raw.id.is_empty() || raw.resource_type.is_empty() {
            log::warn!("dropping node without id/type from discovery response");
            invalid_nodes += 1;
            continue;
        }
        let display = if raw.display.is_empty() { raw.id.clone() } else { raw.display.clone() };
        let mut node = Node::new(raw.id.clone(), raw.resource_type.clone(), display, raw.depth);
        node.last_updated = raw.last_updated.as_deref().and_then(parse_instant);
        nodes.push(node);
    }

    let links = response
        .links
        .iter()
        .map(|raw| Link {
            source: raw.source.clone(),
            target: raw.target.clone(),
            field: raw.field.clone(),
            kind: raw.kind.unwrap_or(LinkKind::Direct),
            strength: raw.strength.unwrap_or(1.0).clamp(f32::EPSILON, 1.0),
        })
        .collect();

    let (graph, mut report) = GraphModel::from_parts(Some(root_id), nodes, links);
    report.invalid_nodes += invalid_nodes;
    (graph, report)
}

fn parse_instant(s: &str) -> Option<OffsetDateTime> {
    match OffsetDateTime::parse(s, &Rfc3339) {
        Ok(t) => Some(t),
        Err(err) => {
            log::debug!("unparseable lastUpdated {s:?}: {err}");
            None
        }
    }
}
