use std::collections::HashMap;

use egui::{Color32, Pos2};
use serde::{Deserialize, Serialize};

use crate::graph_utils::filter::VisibleSet;
use crate::graph_utils::model::{GraphModel, LinkKey, NodeId};
use crate::viz::selection::SelectionManager;
use crate::viz::style;
use crate::viz::viewport::ViewportController;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LodSettings {
    // Above this many visible nodes, off-viewport sprites are culled per tick.
    pub node_threshold: usize,
    pub label_min_zoom: f32,
    pub hide_labels_node_threshold: usize,
}

impl Default for LodSettings {
    fn default() -> Self {
        Self { node_threshold: 100, label_min_zoom: 0.7, hide_labels_node_threshold: 200 }
    }
}

// Retained draw state for one node. `generation` is stamped at creation and
// survives updates - the proof that diffing reused the sprite instead of
// rebuilding it, which is what keeps drag/hover stable across frames.
#[derive(Clone, Debug)]
pub struct NodeSprite {
    pub id: NodeId,
    pub pos: Pos2,
    pub radius: f32,
    pub color: Color32,
    pub label: String,
    pub selected: bool,
    pub on_path: bool,
    pub hovered: bool,
    pub visible: bool,
    pub label_visible: bool,
    pub generation: u64,
}

#[derive(Clone, Debug)]
pub struct LinkSprite {
    pub key: LinkKey,
    pub from: Pos2,
    pub to: Pos2,
    pub field: String,
    pub dashed: bool,
    pub on_path: bool,
    pub visible: bool,
    pub generation: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffStats {
    pub nodes_added: usize,
    pub nodes_updated: usize,
    pub nodes_removed: usize,
    pub links_added: usize,
    pub links_updated: usize,
    pub links_removed: usize,
}

// Translates graph + selection state into a retained sprite scene. sync()
// computes a minimal add/update/remove diff keyed by node id and link
// identity; unchanged entities keep their sprite object. cull() is the
// per-tick LOD pass that hides (never destroys) what is off-screen.
#[derive(Clone, Debug, Default)]
pub struct RenderBridge {
    lod: LodSettings,
    nodes: HashMap<NodeId, NodeSprite>,
    links: HashMap<LinkKey, LinkSprite>,
    node_order: Vec<NodeId>,
    link_order: Vec<LinkKey>,
    next_generation: u64,
}

impl RenderBridge {
    pub fn new(lod: LodSettings) -> Self {
        Self { lod, ..Self::default() }
    }

    pub fn set_lod(&mut self, lod: LodSettings) {
        self.lod = lod;
    }

    pub fn node_sprite(&self, id: &str) -> Option<&NodeSprite> {
        self.nodes.get(id)
    }

    pub fn link_sprite(&self, key: &LinkKey) -> Option<&LinkSprite> {
        self.links.get(key)
    }

    pub fn nodes_in_order(&self) -> impl Iterator<Item = &NodeSprite> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn links_in_order(&self) -> impl Iterator<Item = &LinkSprite> {
        self.link_order.iter().filter_map(|key| self.links.get(key))
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.node_order.clear();
        self.link_order.clear();
    }

    // Reconcile the scene with the latest visible subset. Draw order follows
    // the graph's discovery order, so z-order is stable frame to frame.
    pub fn sync(
        &mut self,
        graph: &GraphModel,
        visible: &VisibleSet,
        selection: &SelectionManager,
        hovered: Option<&NodeId>,
    ) -> DiffStats {
        let mut stats = DiffStats::default();

        let before = self.nodes.len();
        self.nodes.retain(|id, _| visible.nodes.contains(id));
        stats.nodes_removed = before - self.nodes.len();

        let before = self.links.len();
        self.links.retain(|key, _| visible.links.contains(key));
        stats.links_removed = before - self.links.len();

        self.node_order.clear();
        for node in graph.nodes() {
            if !visible.nodes.contains(&node.id) {
                continue;
            }
            self.node_order.push(node.id.clone());
            let selected = selection.is_selected(&node.id);
            let on_path = selection.is_on_path(&node.id);
            let hovered = hovered.map(|h| *h == node.id).unwrap_or(false);
            match self.nodes.get_mut(&node.id) {
                Some(sprite) => {
                    sprite.pos = node.pos;
                    sprite.radius = node.radius;
                    sprite.selected = selected;
                    sprite.on_path = on_path;
                    sprite.hovered = hovered;
                    stats.nodes_updated += 1;
                }
                None => {
                    self.next_generation += 1;
                    self.nodes.insert(
                        node.id.clone(),
                        NodeSprite {
                            id: node.id.clone(),
                            pos: node.pos,
                            radius: node.radius,
                            color: style::color_for_type(&node.resource_type),
                            label: node.display.clone(),
                            selected,
                            on_path,
                            hovered,
                            visible: true,
                            label_visible: true,
                            generation: self.next_generation,
                        },
                    );
                    stats.nodes_added += 1;
                }
            }
        }

        self.link_order.clear();
        for link in graph.links() {
            let key = link.key();
            if !visible.links.contains(&key) {
                continue;
            }
            let (Some(from), Some(to)) = (graph.node(&link.source), graph.node(&link.target))
            else {
                continue;
            };
            self.link_order.push(key.clone());
            let on_path = selection.is_link_on_path(&key);
            match self.links.get_mut(&key) {
                Some(sprite) => {
                    sprite.from = from.pos;
                    sprite.to = to.pos;
                    sprite.on_path = on_path;
                    stats.links_updated += 1;
                }
                None => {
                    self.next_generation += 1;
                    self.links.insert(
                        key.clone(),
                        LinkSprite {
                            key,
                            from: from.pos,
                            to: to.pos,
                            field: link.field.clone(),
                            dashed: link.kind.dashed(),
                            on_path,
                            visible: true,
                            generation: self.next_generation,
                        },
                    );
                    stats.links_added += 1;
                }
            }
        }

        stats
    }

    // LOD pass, run each simulation tick. Small scenes stay fully visible;
    // past the node threshold, anything outside the visible world rectangle
    // goes hidden (the sprite survives for when it scrolls back in). Labels
    // obey zoom and crowding thresholds, but selection, hover and path
    // highlights always keep theirs.
    pub fn cull(&mut self, viewport: &ViewportController) {
        let world = viewport.visible_world_rect();
        let degrade = self.nodes.len() > self.lod.node_threshold;
        let crowded = self.nodes.len() > self.lod.hide_labels_node_threshold;
        let zoom_ok = viewport.scale() >= self.lod.label_min_zoom;

        for sprite in self.nodes.values_mut() {
            sprite.visible = !degrade || world.expand(sprite.radius).contains(sprite.pos);
            let emphasized = sprite.selected || sprite.hovered || sprite.on_path;
            sprite.label_visible = sprite.visible && (emphasized || (zoom_ok && !crowded));
        }
        for sprite in self.links.values_mut() {
            sprite.visible = !degrade
                || world.contains(sprite.from)
                || world.contains(sprite.to)
                || sprite.on_path;
        }
    }
}
