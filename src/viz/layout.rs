use std::collections::BTreeMap;
use std::f32::consts::TAU;

use egui::{Pos2, Rect};

use crate::graph_utils::model::GraphModel;
use crate::viz::sim::SimulationEngine;

// First ring lands at RADIAL_BASE_RADIUS + RADIAL_DEPTH_STEP world units.
const RADIAL_BASE_RADIUS: f32 = 30.0;
const RADIAL_DEPTH_STEP: f32 = 120.0;
const CIRCULAR_MARGIN: f32 = 60.0;
const HIER_ROW_MARGIN: f32 = 60.0;

// Position-assignment strategies. Applying one mutates node positions or pins
// and reheats the simulation; the graph itself is never touched, so switching
// strategies is free.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LayoutStrategy {
    #[default]
    Force,
    Radial,
    Hierarchical,
    Circular,
}

impl LayoutStrategy {
    pub const ALL: [LayoutStrategy; 4] = [
        LayoutStrategy::Force,
        LayoutStrategy::Radial,
        LayoutStrategy::Hierarchical,
        LayoutStrategy::Circular,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LayoutStrategy::Force => "Force",
            LayoutStrategy::Radial => "Radial",
            LayoutStrategy::Hierarchical => "Hierarchical",
            LayoutStrategy::Circular => "Circular",
        }
    }

    pub fn apply(
        self,
        graph: &mut GraphModel,
        bounds: Rect,
        center_node: Option<&str>,
        sim: &mut SimulationEngine,
    ) {
        match self {
            LayoutStrategy::Force => apply_force(graph, sim),
            LayoutStrategy::Radial => apply_radial(graph, bounds, center_node, sim),
            LayoutStrategy::Hierarchical => apply_hierarchical(graph, bounds, sim),
            LayoutStrategy::Circular => apply_circular(graph, bounds, sim),
        }
    }
}

// Force: release every pin and let the simulation find the layout.
fn apply_force(graph: &mut GraphModel, sim: &mut SimulationEngine) {
    for node in graph.nodes_mut() {
        node.pinned = None;
    }
    sim.reheat(1.0);
}

// Radial: the designated center node sits pinned at the viewport center, the
// rest fan out at angle i/N * 2pi with the ring picked by discovery depth.
// Pins keep the simulation from relaxing the wheel away.
fn apply_radial(
    graph: &mut GraphModel,
    bounds: Rect,
    center_node: Option<&str>,
    sim: &mut SimulationEngine,
) {
    if graph.is_empty() {
        return;
    }
    let center_id = center_node
        .filter(|id| graph.contains(id))
        .map(str::to_string)
        .or_else(|| graph.root().cloned())
        .unwrap_or_else(|| graph.nodes()[0].id.clone());
    let center = bounds.center();

    let satellites = graph.node_count().saturating_sub(1).max(1) as f32;
    let mut i = 0usize;
    for node in graph.nodes_mut() {
        if node.id == center_id {
            node.pos = center;
            node.pinned = Some(center);
            node.vel = egui::Vec2::ZERO;
            continue;
        }
        let angle = (i as f32) / satellites * TAU;
        let radius = RADIAL_BASE_RADIUS + (node.depth as f32) * RADIAL_DEPTH_STEP;
        let pos = Pos2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin());
        node.pos = pos;
        node.pinned = Some(pos);
        node.vel = egui::Vec2::ZERO;
        i += 1;
    }
    sim.reheat(0.3);
}

// Hierarchical: one row per depth band, evenly spaced columns within a row.
// Suits tree-like discovery results; anything structurally odd (an empty
// graph) degrades to the force layout instead of surfacing an error.
fn apply_hierarchical(graph: &mut GraphModel, bounds: Rect, sim: &mut SimulationEngine) {
    if graph.is_empty() {
        apply_force(graph, sim);
        return;
    }

    // Depth -> node indices, rows sorted by depth, stable within a row.
    let mut bands: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, node) in graph.nodes().iter().enumerate() {
        bands.entry(node.depth).or_default().push(i);
    }

    let rows = bands.len() as f32;
    let row_gap = if bands.len() > 1 {
        (bounds.height() - 2.0 * HIER_ROW_MARGIN) / (rows - 1.0)
    } else {
        0.0
    };

    for (row, (_depth, members)) in bands.into_iter().enumerate() {
        let y = if row_gap > 0.0 {
            bounds.top() + HIER_ROW_MARGIN + (row as f32) * row_gap
        } else {
            bounds.center().y
        };
        let cols = members.len() as f32;
        let col_gap = bounds.width() / (cols + 1.0);
        for (col, idx) in members.into_iter().enumerate() {
            let pos = Pos2::new(bounds.left() + ((col + 1) as f32) * col_gap, y);
            let node = &mut graph.nodes_mut()[idx];
            node.pos = pos;
            node.pinned = Some(pos);
            node.vel = egui::Vec2::ZERO;
        }
    }
    sim.reheat(0.3);
}

// Circular: everything evenly on one circle sized to the viewport.
fn apply_circular(graph: &mut GraphModel, bounds: Rect, sim: &mut SimulationEngine) {
    if graph.is_empty() {
        return;
    }
    let center = bounds.center();
    let radius = (bounds.width().min(bounds.height()) / 2.0 - CIRCULAR_MARGIN).max(CIRCULAR_MARGIN);
    let n = graph.node_count() as f32;
    for (i, node) in graph.nodes_mut().iter_mut().enumerate() {
        let angle = (i as f32) / n * TAU;
        let pos = Pos2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin());
        node.pos = pos;
        node.pinned = Some(pos);
        node.vel = egui::Vec2::ZERO;
    }
    sim.reheat(0.3);
}
