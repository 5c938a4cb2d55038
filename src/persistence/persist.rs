use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use egui::{Pos2, Vec2};
use ron::ser::PrettyConfig;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::graph_utils::model::{GraphModel, Link, LinkKind, Node, NodeId};
use crate::viz::viewport::ViewTransform;
use super::settings::EngineSettings;

// A saved session: the canonical graph plus layout positions and the view
// transform, enough to reopen an exploration exactly where it was left.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub root: Option<NodeId>,
    pub nodes: Vec<SnapshotNode>,
    pub links: Vec<SnapshotLink>,
    // (translate_x, translate_y, scale)
    pub view: (f32, f32, f32),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: NodeId,
    pub resource_type: String,
    pub display: String,
    pub depth: u32,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub pinned: Option<(f32, f32)>,
    // RFC 3339, matching the wire format.
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotLink {
    pub source: NodeId,
    pub target: NodeId,
    pub field: String,
    pub kind: LinkKind,
    pub strength: f32,
}

impl SessionSnapshot {
    pub fn from_runtime(graph: &GraphModel, view: ViewTransform) -> Self {
        let nodes = graph
            .nodes()
            .iter()
            .map(|n| SnapshotNode {
                id: n.id.clone(),
                resource_type: n.resource_type.clone(),
                display: n.display.clone(),
                depth: n.depth,
                x: n.pos.x,
                y: n.pos.y,
                pinned: n.pinned.map(|p| (p.x, p.y)),
                last_updated: n.last_updated.and_then(|t| t.format(&Rfc3339).ok()),
            })
            .collect();
        let links = graph
            .links()
            .iter()
            .map(|l| SnapshotLink {
                source: l.source.clone(),
                target: l.target.clone(),
                field: l.field.clone(),
                kind: l.kind,
                strength: l.strength,
            })
            .collect();
        Self {
            root: graph.root().cloned(),
            nodes,
            links,
            view: (view.translate.x, view.translate.y, view.scale),
        }
    }

    /// Convert a persisted snapshot back into runtime structures.
    ///
    /// Consumes `self` to avoid cloning the node and link buffers.
    pub fn into_runtime(self) -> (GraphModel, ViewTransform) {
        let nodes = self
            .nodes
            .into_iter()
            .map(|s| {
                let mut node = Node::new(s.id, s.resource_type, s.display, s.depth);
                node.pos = Pos2::new(s.x, s.y);
                node.pinned = s.pinned.map(|(x, y)| Pos2::new(x, y));
                node.last_updated =
                    s.last_updated.and_then(|t| OffsetDateTime::parse(&t, &Rfc3339).ok());
                node
            })
            .collect();
        let links = self
            .links
            .into_iter()
            .map(|s| Link {
                source: s.source,
                target: s.target,
                field: s.field,
                kind: s.kind,
                strength: s.strength,
            })
            .collect();
        let (graph, _report) = GraphModel::from_parts(self.root, nodes, links);
        let view = ViewTransform {
            translate: Vec2::new(self.view.0, self.view.1),
            scale: self.view.2,
        };
        (graph, view)
    }
}

pub fn active_snapshot_path(settings: &EngineSettings) -> PathBuf {
    settings.snapshot_dir().join("session.ron")
}

pub fn versioned_snapshot_path_now(settings: &EngineSettings) -> PathBuf {
    let now = OffsetDateTime::now_utc();
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = now.format(fmt).unwrap_or_else(|_| "unknown".to_string());
    settings.snapshot_dir().join(format!("session_{}.ron", stamp))
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("ron.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

pub fn save_snapshot(snapshot: &SessionSnapshot, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let pretty = PrettyConfig::new().separate_tuple_members(true).enumerate_arrays(true);
    let s = ron::ser::to_string_pretty(snapshot, pretty)?;
    atomic_write(path, s.as_bytes())?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> anyhow::Result<SessionSnapshot> {
    let mut f = File::open(path)?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let snapshot: SessionSnapshot = ron::from_str(&buf)?;
    Ok(snapshot)
}

// --- exports ----------------------------------------------------------------

pub fn export_graph_json(graph: &GraphModel, path: &Path) -> anyhow::Result<()> {
    #[derive(Serialize)]
    struct NodeOut<'a> {
        id: &'a str,
        resource_type: &'a str,
        display: &'a str,
        depth: u32,
    }
    #[derive(Serialize)]
    struct LinkOut<'a> {
        source: &'a str,
        target: &'a str,
        field: &'a str,
        kind: LinkKind,
    }
    #[derive(Serialize)]
    struct GraphOut<'a> {
        root: Option<&'a str>,
        nodes: Vec<NodeOut<'a>>,
        links: Vec<LinkOut<'a>>,
    }

    let out = GraphOut {
        root: graph.root().map(String::as_str),
        nodes: graph
            .nodes()
            .iter()
            .map(|n| NodeOut {
                id: &n.id,
                resource_type: &n.resource_type,
                display: &n.display,
                depth: n.depth,
            })
            .collect(),
        links: graph
            .links()
            .iter()
            .map(|l| LinkOut { source: &l.source, target: &l.target, field: &l.field, kind: l.kind })
            .collect(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(&out)?;
    fs::write(path, s)?;
    Ok(())
}

// Writes a `<base>_nodes.csv` / `<base>_links.csv` pair and returns both paths.
pub fn export_graph_csv(graph: &GraphModel, base_path: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let stem = base_path.file_stem().and_then(|s| s.to_str()).unwrap_or("graph");
    let dir = base_path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(dir)?;
    let nodes_path = dir.join(format!("{stem}_nodes.csv"));
    let links_path = dir.join(format!("{stem}_links.csv"));

    let mut w = csv::Writer::from_path(&nodes_path)?;
    w.write_record(["id", "resource_type", "display", "depth"])?;
    for n in graph.nodes() {
        let depth = n.depth.to_string();
        w.write_record([n.id.as_str(), n.resource_type.as_str(), n.display.as_str(), depth.as_str()])?;
    }
    w.flush()?;

    let mut w = csv::Writer::from_path(&links_path)?;
    w.write_record(["source", "target", "field", "kind"])?;
    for l in graph.links() {
        let kind = match l.kind {
            LinkKind::Direct => "direct",
            LinkKind::Reverse => "reverse",
            LinkKind::OneToMany => "one-to-many",
        };
        w.write_record([l.source.as_str(), l.target.as_str(), l.field.as_str(), kind])?;
    }
    w.flush()?;

    Ok((nodes_path, links_path))
}
