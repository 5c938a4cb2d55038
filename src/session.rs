use std::f32::consts::TAU;
use std::sync::Arc;
use std::time::Instant;

use egui::{Pos2, Rect, Vec2};

use crate::graph_utils::filter::{self, FilterSpec, VisibleSet};
use crate::graph_utils::model::{GraphModel, NodeId};
use crate::graph_utils::paths::{self, PathResult};
use crate::net::discovery::{
    self, DiscoveryOptions, DiscoveryService, RelationshipStats,
};
use crate::net::lifecycle::{LifecycleEvent, RequestLifecycle};
use crate::persistence::settings::EngineSettings;
use crate::viz::layout::LayoutStrategy;
use crate::viz::render::RenderBridge;
use crate::viz::selection::{SelectionEvent, SelectionManager, SelectionMode};
use crate::viz::sim::SimulationEngine;
use crate::viz::viewport::ViewportController;

// One explorer session: canonical graph, derived visible subset, simulation,
// viewport, selection and the request lifecycle, driven from a single
// cooperative tick. The session is the only writer of this state; the GUI
// reads the scene and feeds intents back in.
//
// open()/close() bound the lifetime explicitly. Every async continuation
// passes through tick(), which checks `active` first, so nothing can mutate a
// closed session no matter when a worker thread finishes.
pub struct EngineSession {
    settings: EngineSettings,
    graph: GraphModel,
    filter_spec: FilterSpec,
    visible: VisibleSet,
    filter_dirty: bool,
    sim: SimulationEngine,
    layout: LayoutStrategy,
    viewport: ViewportController,
    selection: SelectionManager,
    render: RenderBridge,
    lifecycle: RequestLifecycle,
    hovered: Option<NodeId>,
    dragging: Option<NodeId>,
    // Transient user-facing messages; a banner never blanks a working graph.
    notice: Option<String>,
    error_banner: Option<String>,
    empty_result: bool,
    stats: Option<RelationshipStats>,
    path_results: Vec<PathResult>,
    active_path: usize,
    active: bool,
}

impl EngineSession {
    pub fn open(service: Arc<dyn DiscoveryService>, settings: EngineSettings) -> Self {
        Self {
            sim: SimulationEngine::new(settings.forces.clone()),
            render: RenderBridge::new(settings.lod.clone()),
            viewport: ViewportController::new(settings.min_scale, settings.max_scale),
            lifecycle: RequestLifecycle::new(
                service,
                settings.retry.clone(),
                settings.debounce.clone(),
            ),
            settings,
            graph: GraphModel::new(),
            filter_spec: FilterSpec::default(),
            visible: VisibleSet::default(),
            filter_dirty: false,
            layout: LayoutStrategy::Force,
            selection: SelectionManager::default(),
            hovered: None,
            dragging: None,
            notice: None,
            error_banner: None,
            empty_result: false,
            stats: None,
            path_results: Vec::new(),
            active_path: 0,
            active: true,
        }
    }

    // Idempotent teardown: cancel in-flight work, stop the simulation, drop
    // pending timers. A second close is a no-op.
    pub fn close(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.lifecycle.teardown();
        self.sim.stop();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    // --- read access for the host -------------------------------------------

    pub fn graph(&self) -> &GraphModel {
        &self.graph
    }

    pub fn visible(&self) -> &VisibleSet {
        &self.visible
    }

    pub fn render(&self) -> &RenderBridge {
        &self.render
    }

    pub fn viewport(&self) -> &ViewportController {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut ViewportController {
        &mut self.viewport
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn layout(&self) -> LayoutStrategy {
        self.layout
    }

    pub fn simulation(&self) -> &SimulationEngine {
        &self.sim
    }

    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn error_banner(&self) -> Option<&str> {
        self.error_banner.as_deref()
    }

    pub fn is_empty_result(&self) -> bool {
        self.empty_result
    }

    pub fn statistics(&self) -> Option<&RelationshipStats> {
        self.stats.as_ref()
    }

    pub fn path_results(&self) -> &[PathResult] {
        &self.path_results
    }

    pub fn active_path(&self) -> usize {
        self.active_path
    }

    pub fn is_loading(&self) -> bool {
        self.lifecycle.has_pending_work()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // World-space rectangle layouts and the simulation work inside: the
    // screen rect at identity transform. Zooming moves the camera, not the
    // layout space.
    pub fn layout_bounds(&self) -> Rect {
        Rect::from_min_size(Pos2::ZERO, self.viewport.screen_rect().size())
    }

    // --- intents ------------------------------------------------------------

    pub fn discover(&mut self, resource_type: &str, resource_id: &str) {
        if !self.active {
            return;
        }
        let opts = DiscoveryOptions {
            depth: self.settings.discovery_depth,
            include_counts: false,
        };
        self.lifecycle.start_discovery(resource_type, resource_id, opts);
    }

    pub fn request_statistics(&mut self) {
        if self.active {
            self.lifecycle.request_statistics();
        }
    }

    pub fn set_search_text(&mut self, text: &str, now: Instant) {
        if self.active {
            self.lifecycle.set_search_text(text, now);
        }
    }

    pub fn set_filter(&mut self, spec: FilterSpec) {
        if self.filter_spec != spec {
            self.filter_spec = spec;
            self.filter_dirty = true;
        }
    }

    pub fn filter_spec(&self) -> &FilterSpec {
        &self.filter_spec
    }

    // Switching layout only re-assigns positions; the graph survives as-is.
    pub fn set_layout(&mut self, layout: LayoutStrategy) {
        self.layout = layout;
        let bounds = self.layout_bounds();
        let center = self
            .selection
            .primary()
            .cloned()
            .or_else(|| self.graph.root().cloned());
        layout.apply(&mut self.graph, bounds, center.as_deref(), &mut self.sim);
    }

    pub fn apply_settings(&mut self, settings: EngineSettings) {
        self.sim.set_params(settings.forces.clone());
        self.render.set_lod(settings.lod.clone());
        self.settings = settings;
    }

    pub fn click_node(&mut self, id: NodeId) {
        let event = self.selection.click(id);
        self.handle_selection_event(event);
    }

    pub fn select_node(&mut self, id: NodeId, mode: SelectionMode) {
        let event = self.selection.select(id, mode);
        self.handle_selection_event(event);
    }

    pub fn toggle_node(&mut self, id: NodeId) {
        self.selection.toggle(id);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
        self.path_results.clear();
        self.active_path = 0;
    }

    pub fn begin_path_picking(&mut self) {
        self.path_results.clear();
        self.active_path = 0;
        self.selection.begin_path_picking();
    }

    pub fn set_path_endpoints(&mut self, source: Option<NodeId>, target: Option<NodeId>) {
        let event = self.selection.set_path_endpoints(source, target);
        self.handle_selection_event(event);
    }

    // Switch which of the discovered paths is highlighted.
    pub fn highlight_path(&mut self, index: usize) {
        if let Some(path) = self.path_results.get(index) {
            self.active_path = index;
            self.selection.set_path_highlight(path);
        }
    }

    pub fn set_hovered(&mut self, hovered: Option<NodeId>) {
        self.hovered = hovered;
    }

    pub fn drag_start(&mut self, id: &str) {
        if let Some(node) = self.graph.node_mut(id) {
            node.pinned = Some(node.pos);
            self.dragging = Some(id.to_string());
            self.sim.reheat(0.3);
        }
    }

    pub fn drag_to(&mut self, world_pos: Pos2) {
        if let Some(id) = self.dragging.clone()
            && let Some(node) = self.graph.node_mut(&id)
        {
            node.pos = world_pos;
            node.pinned = Some(world_pos);
        }
    }

    pub fn drag_end(&mut self) {
        if let Some(id) = self.dragging.take()
            && let Some(node) = self.graph.node_mut(&id)
        {
            node.pinned = None;
            self.sim.reheat(0.3);
        }
    }

    // Adopt a restored snapshot: replace the graph and view, keep the session
    // (lifecycle, settings, filters) as-is.
    pub fn install_snapshot(
        &mut self,
        graph: GraphModel,
        view: crate::viz::viewport::ViewTransform,
    ) {
        self.graph = graph;
        self.viewport.set_transform(view);
        self.selection.retain_known(|id| self.graph.contains(id));
        self.path_results.clear();
        self.active_path = 0;
        self.empty_result = self.graph.is_empty();
        self.filter_dirty = true;
        self.sim.reheat(0.3);
        self.sim.start();
    }

    pub fn dismiss_error(&mut self) {
        self.error_banner = None;
    }

    pub fn dismiss_notice(&mut self) {
        self.notice = None;
    }

    // --- per-frame driver ---------------------------------------------------

    // The single cooperative suspension point: drain async results, refresh
    // the visible subset, advance the (throttled) simulation, reconcile the
    // scene. Returns true when the host should repaint.
    pub fn tick(&mut self, now: Instant) -> bool {
        if !self.active {
            return false;
        }

        let mut dirty = false;
        for event in self.lifecycle.poll(now) {
            dirty = true;
            match event {
                LifecycleEvent::DiscoveryReady { key, response } => {
                    self.install_discovery(&key, &response);
                }
                LifecycleEvent::DiscoveryFailed { key, error, recoverable } => {
                    // The previous valid graph stays on screen; failures only
                    // raise a banner.
                    log::warn!("discovery {key} failed: {error}");
                    self.error_banner = Some(if recoverable {
                        format!("Could not reach the relationship service: {error}")
                    } else {
                        format!("Discovery failed: {error}")
                    });
                }
                LifecycleEvent::StatisticsReady(stats) => {
                    self.stats = Some(stats);
                }
                LifecycleEvent::StatisticsFailed(error) => {
                    log::warn!("statistics request failed: {error}");
                }
                LifecycleEvent::SearchFired(text) => {
                    self.focus_search(&text);
                }
            }
        }

        if self.filter_dirty {
            self.visible = filter::apply(&self.graph, &self.filter_spec);
            self.filter_dirty = false;
            self.sim.reheat(0.3);
            dirty = true;
        }

        let bounds = self.layout_bounds();
        let moved = self.sim.tick(&mut self.graph, bounds, now);

        if moved || dirty {
            self.render.sync(&self.graph, &self.visible, &self.selection, self.hovered.as_ref());
        }
        self.render.cull(&self.viewport);

        moved || dirty
    }

    // --- internals ----------------------------------------------------------

    fn handle_selection_event(&mut self, event: SelectionEvent) {
        if let SelectionEvent::PathRequested { source, target } = event {
            self.run_path_discovery(&source, &target);
        }
    }

    fn run_path_discovery(&mut self, source: &str, target: &str) {
        self.path_results.clear();
        self.active_path = 0;
        match paths::find_paths(&self.graph, source, target, self.settings.path_max_depth as usize)
        {
            Ok(found) if found.is_empty() => {
                // A missing path is a valid answer, not an error.
                self.notice = Some(format!(
                    "No paths between {source} and {target} within {} hops",
                    self.settings.path_max_depth
                ));
            }
            Ok(found) => {
                self.notice =
                    Some(format!("{} path(s) found, shortest {} hop(s)", found.len(), found[0].len()));
                self.path_results = found;
                self.selection.set_path_highlight(&self.path_results[0]);
            }
            Err(err) => {
                self.notice = Some(err.to_string());
            }
        }
    }

    // Wholesale graph replacement from a successful discovery response.
    fn install_discovery(&mut self, key: &str, response: &discovery::DiscoveryResponse) {
        let (mut graph, report) = discovery::build_graph(response);
        self.notice = report.summary();
        self.empty_result = graph.is_empty();
        if self.empty_result {
            log::info!("discovery {key} returned no relationships");
        }

        seed_positions(&mut graph, self.layout_bounds());
        self.graph = graph;
        self.error_banner = None;
        self.path_results.clear();
        self.active_path = 0;
        self.selection.retain_known(|id| self.graph.contains(id));
        self.filter_dirty = true;

        let bounds = self.layout_bounds();
        let center = self.graph.root().cloned();
        self.layout.apply(&mut self.graph, bounds, center.as_deref(), &mut self.sim);
        self.sim.start();
    }

    fn focus_search(&mut self, text: &str) {
        let Some((id, pos)) = self.graph.search(text).map(|n| (n.id.clone(), n.pos)) else {
            self.notice = Some(format!("No resource matching \"{text}\""));
            return;
        };
        self.selection.select(id, SelectionMode::Single);
        // Center the view on the hit without changing zoom.
        let scale = self.viewport.scale();
        let screen_center = self.viewport.screen_rect().center();
        let mut t = self.viewport.transform();
        t.translate = screen_center.to_vec2() - Vec2::new(pos.x * scale, pos.y * scale);
        self.viewport.set_transform(t);
    }
}

// Initial placement for a freshly discovered graph: fan the nodes out around
// the center, one ring per discovery depth, so the simulation starts from a
// sane spread instead of a single point.
fn seed_positions(graph: &mut GraphModel, bounds: Rect) {
    let center = bounds.center();
    let n = graph.node_count().max(1) as f32;
    for (i, node) in graph.nodes_mut().iter_mut().enumerate() {
        let angle = (i as f32) / n * TAU;
        let radius = 60.0 + (node.depth as f32) * 90.0;
        node.pos = Pos2::new(center.x + radius * angle.cos(), center.y + radius * angle.sin());
        node.vel = Vec2::ZERO;
        node.pinned = None;
    }
}
