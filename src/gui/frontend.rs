use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use egui::{Align2, Color32, FontId, Pos2, Rect, Shape, Stroke, Vec2};

use fhirscope::graph_utils::filter::{self, FilterSpec};
use fhirscope::graph_utils::model::NodeId;
use fhirscope::net::discovery::DiscoveryService;
use fhirscope::persistence::persist;
use fhirscope::persistence::settings::EngineSettings;
use fhirscope::session::EngineSession;
use fhirscope::viz::layout::LayoutStrategy;
use fhirscope::viz::selection::SelectionPhase;

const LINK_COLOR: Color32 = Color32::from_rgb(0x8a, 0x8a, 0x96);
const PATH_COLOR: Color32 = Color32::from_rgb(0xff, 0xd5, 0x4f);
const SELECT_COLOR: Color32 = Color32::from_rgb(0xff, 0xff, 0xff);

// The explorer window: a tool sidebar plus the graph canvas. All graph state
// lives in the EngineSession; this type only reads the scene and turns input
// into session intents.
pub struct ScopeApp {
    session: EngineSession,
    settings: EngineSettings,
    discover_type: String,
    discover_id: String,
    search_text: String,
    excluded_types: BTreeSet<String>,
    show_orphans: bool,
    max_depth: u32,
    layout_choice: LayoutStrategy,
    panning: bool,
    drag_active: bool,
    zoom_hud_until: Option<Instant>,
    io_status: Option<String>,
}

impl ScopeApp {
    pub fn new(service: Arc<dyn DiscoveryService>, settings: EngineSettings) -> Self {
        let mut session = EngineSession::open(service, settings.clone());
        // Open on the demo patient so the window is never empty.
        session.discover("Patient", "pat-1001");
        session.request_statistics();
        Self {
            session,
            settings,
            discover_type: "Patient".to_string(),
            discover_id: "pat-1001".to_string(),
            search_text: String::new(),
            excluded_types: BTreeSet::new(),
            show_orphans: true,
            max_depth: 6,
            layout_choice: LayoutStrategy::Force,
            panning: false,
            drag_active: false,
            zoom_hud_until: None,
            io_status: None,
        }
    }

    fn current_filter(&self) -> FilterSpec {
        let present: BTreeSet<String> = self
            .session
            .graph()
            .nodes()
            .iter()
            .map(|n| n.resource_type.clone())
            .collect();
        let included: std::collections::HashSet<String> = if self.excluded_types.is_empty() {
            Default::default() // empty = all
        } else {
            present.difference(&self.excluded_types).cloned().collect()
        };
        FilterSpec {
            included_resource_types: included,
            show_orphans: self.show_orphans,
            max_depth: self.max_depth,
            ..FilterSpec::default()
        }
    }

    fn sidebar(&mut self, ui: &mut egui::Ui) {
        ui.heading("FHIRScope");
        ui.separator();

        ui.label("Explore resource");
        ui.horizontal(|ui| {
            ui.add(egui::TextEdit::singleline(&mut self.discover_type).desired_width(110.0));
            ui.add(egui::TextEdit::singleline(&mut self.discover_id).desired_width(90.0));
        });
        if ui.button("Discover relationships").clicked() {
            self.session.discover(&self.discover_type, &self.discover_id);
        }
        if self.session.is_loading() {
            ui.horizontal(|ui| {
                ui.spinner();
                ui.small("working...");
            });
        }

        ui.separator();
        ui.label("Find in graph");
        let resp = ui.text_edit_singleline(&mut self.search_text);
        if resp.changed() {
            self.session.set_search_text(&self.search_text, Instant::now());
        }

        ui.separator();
        egui::ComboBox::from_label("Layout")
            .selected_text(self.layout_choice.label())
            .show_ui(ui, |ui| {
                for strategy in LayoutStrategy::ALL {
                    if ui
                        .selectable_value(&mut self.layout_choice, strategy, strategy.label())
                        .changed()
                    {
                        self.session.set_layout(strategy);
                    }
                }
            });
        ui.horizontal(|ui| {
            if ui.button("Fit").clicked() {
                let visible = self.session.visible().nodes.clone();
                let nodes: Vec<_> = self
                    .session
                    .graph()
                    .nodes()
                    .iter()
                    .filter(|n| visible.contains(&n.id))
                    .cloned()
                    .collect();
                self.session.viewport_mut().fit_to_bounds(&nodes, 40.0);
            }
            if ui.button("Reset view").clicked() {
                self.session.viewport_mut().reset_to_identity();
            }
        });

        ui.separator();
        ui.label("Resource types");
        let mut filter_changed = false;
        let present: BTreeSet<String> = self
            .session
            .graph()
            .nodes()
            .iter()
            .map(|n| n.resource_type.clone())
            .collect();
        for rt in &present {
            let mut on = !self.excluded_types.contains(rt);
            if ui.checkbox(&mut on, rt).changed() {
                if on {
                    self.excluded_types.remove(rt);
                } else {
                    self.excluded_types.insert(rt.clone());
                }
                filter_changed = true;
            }
        }
        filter_changed |= ui.checkbox(&mut self.show_orphans, "Show orphan nodes").changed();
        let mut depth = self.max_depth as i32;
        if ui.add(egui::Slider::new(&mut depth, 1..=8).text("Max depth")).changed() {
            self.max_depth = depth as u32;
            filter_changed = true;
        }
        if filter_changed {
            let spec = self.current_filter();
            self.session.set_filter(spec);
        }

        ui.separator();
        let picking = matches!(
            self.session.selection().phase(),
            SelectionPhase::PickingPathSource
                | SelectionPhase::PickingPathTarget
                | SelectionPhase::PathSelected
        );
        if picking {
            let hint = match self.session.selection().phase() {
                SelectionPhase::PickingPathSource => "click the start resource",
                SelectionPhase::PickingPathTarget => "click the end resource",
                _ => "click any node to restart",
            };
            ui.label(format!("Path mode: {hint}"));
            if ui.button("Leave path mode").clicked() {
                self.session.clear_selection();
            }
        } else if ui.button("Find paths between two nodes").clicked() {
            self.session.begin_path_picking();
        }
        let path_count = self.session.path_results().len();
        if path_count > 0 {
            let labels: Vec<String> = self
                .session
                .path_results()
                .iter()
                .enumerate()
                .map(|(i, p)| format!("Path {} - {} hop(s)", i + 1, p.len()))
                .collect();
            let active = self.session.active_path();
            for (i, label) in labels.iter().enumerate() {
                if ui.selectable_label(i == active, label).clicked() {
                    self.session.highlight_path(i);
                }
            }
        }

        ui.separator();
        if let Some(stats) = self.session.statistics() {
            ui.label(format!(
                "{} resources, {} relationships",
                stats.total_resources, stats.total_relationships
            ));
            for top in stats.most_connected_resources.iter().take(3) {
                ui.small(format!("{} ({})", top.display, top.relationship_count));
            }
        }
        if ui.button("Refresh statistics").clicked() {
            self.session.request_statistics();
        }

        ui.separator();
        ui.horizontal(|ui| {
            if ui.button("Export JSON").clicked() {
                self.io_status = Some(self.export(false));
            }
            if ui.button("Export CSV").clicked() {
                self.io_status = Some(self.export(true));
            }
        });
        ui.horizontal(|ui| {
            if ui.button("Save session").clicked() {
                let snapshot = persist::SessionSnapshot::from_runtime(
                    self.session.graph(),
                    self.session.viewport().transform(),
                );
                let path = persist::active_snapshot_path(&self.settings);
                self.io_status = Some(match persist::save_snapshot(&snapshot, &path) {
                    Ok(()) => format!("Saved {}", path.display()),
                    Err(e) => format!("Save failed: {e}"),
                });
            }
            if ui.button("Load session").clicked() {
                let path = persist::active_snapshot_path(&self.settings);
                self.io_status = Some(match persist::load_snapshot(&path) {
                    Ok(snapshot) => {
                        let (graph, view) = snapshot.into_runtime();
                        self.session.install_snapshot(graph, view);
                        "Session restored".to_string()
                    }
                    Err(e) => format!("Load failed: {e}"),
                });
            }
        });
        if let Some(status) = &self.io_status {
            ui.small(status.clone());
        }
    }

    fn export(&self, as_csv: bool) -> String {
        let sub = filter::subgraph(self.session.graph(), self.session.visible());
        let dir = self.settings.export_dir();
        let stamp = {
            use time::macros::format_description;
            time::OffsetDateTime::now_utc()
                .format(format_description!("[year][month][day]_[hour][minute][second]"))
                .unwrap_or_else(|_| "now".into())
        };
        if as_csv {
            match persist::export_graph_csv(&sub, &dir.join(format!("graph_{stamp}.csv"))) {
                Ok((n, l)) => format!("Wrote {} and {}", n.display(), l.display()),
                Err(e) => format!("Export failed: {e}"),
            }
        } else {
            let path = dir.join(format!("graph_{stamp}.json"));
            match persist::export_graph_json(&sub, &path) {
                Ok(()) => format!("Wrote {}", path.display()),
                Err(e) => format!("Export failed: {e}"),
            }
        }
    }

    fn canvas(&mut self, ui: &mut egui::Ui) {
        let (response, painter) =
            ui.allocate_painter(ui.available_size(), egui::Sense::click_and_drag());
        let rect = response.rect;
        self.session.viewport_mut().set_screen_rect(rect);

        let pointer = response.hover_pos();
        let hit = pointer.and_then(|p| self.node_at(p));
        self.session.set_hovered(hit.clone());

        // Scroll-wheel zoom anchored at the cursor, with a transient HUD.
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll.abs() > 0.0
                && let Some(p) = pointer
            {
                let factor = (scroll * 0.002).exp();
                self.session.viewport_mut().zoom_about(factor, p);
                self.zoom_hud_until = Some(Instant::now() + Duration::from_millis(900));
            }
        }

        if response.drag_started() {
            if let Some(id) = &hit {
                self.session.drag_start(id);
                self.drag_active = true;
            } else {
                self.panning = true;
            }
        }
        if response.dragged() {
            if self.drag_active {
                if let Some(p) = pointer {
                    let world = self.session.viewport().screen_to_world(p);
                    self.session.drag_to(world);
                }
            } else if self.panning {
                self.session.viewport_mut().pan_by(response.drag_delta());
            }
        }
        if response.drag_stopped() {
            if self.drag_active {
                self.session.drag_end();
            }
            self.drag_active = false;
            self.panning = false;
        }

        if response.clicked() {
            match hit {
                Some(id) => {
                    if ui.input(|i| i.modifiers.ctrl) {
                        self.session.toggle_node(id);
                    } else {
                        self.session.click_node(id);
                    }
                }
                None => {
                    // Background click clears, but never mid path construction.
                    if !matches!(
                        self.session.selection().phase(),
                        SelectionPhase::PickingPathSource | SelectionPhase::PickingPathTarget
                    ) {
                        self.session.clear_selection();
                    }
                }
            }
        }

        self.paint(&painter, rect);
    }

    fn node_at(&self, screen_pos: Pos2) -> Option<NodeId> {
        let vp = self.session.viewport();
        let world = vp.screen_to_world(screen_pos);
        let mut found = None;
        for sprite in self.session.render().nodes_in_order() {
            if !sprite.visible {
                continue;
            }
            // Hit radius in world space scales with zoom just like the node.
            let hit_r = sprite.radius + 4.0;
            if (sprite.pos - world).length_sq() < hit_r * hit_r {
                found = Some(sprite.id.clone());
            }
        }
        found
    }

    fn paint(&self, painter: &egui::Painter, rect: Rect) {
        painter.rect_filled(rect, 0.0, Color32::from_rgb(0x14, 0x16, 0x1a));
        let vp = self.session.viewport();
        let scale = vp.scale();

        let edge_count = self.session.visible().links.len();
        let base_alpha: u8 = if scale < 0.7 || edge_count > 600 {
            120
        } else if scale < 0.9 || edge_count > 300 {
            160
        } else {
            200
        };

        for sprite in self.session.render().links_in_order() {
            if !sprite.visible {
                continue;
            }
            let a = vp.world_to_screen(sprite.from);
            let b = vp.world_to_screen(sprite.to);
            let (color, width) = if sprite.on_path {
                (PATH_COLOR, 2.5)
            } else {
                (
                    Color32::from_rgba_unmultiplied(
                        LINK_COLOR.r(),
                        LINK_COLOR.g(),
                        LINK_COLOR.b(),
                        base_alpha,
                    ),
                    1.0,
                )
            };
            let stroke = Stroke::new(width, color);
            if sprite.dashed {
                painter.extend(Shape::dashed_line(&[a, b], stroke, 6.0, 4.0));
            } else {
                painter.line_segment([a, b], stroke);
            }
        }

        for sprite in self.session.render().nodes_in_order() {
            if !sprite.visible {
                continue;
            }
            let center = vp.world_to_screen(sprite.pos);
            let radius = sprite.radius * scale;
            if sprite.selected || sprite.on_path {
                let halo = if sprite.on_path { PATH_COLOR } else { SELECT_COLOR };
                painter.circle_stroke(center, radius + (3.0 * scale).clamp(2.0, 8.0), Stroke::new(2.0, halo));
            }
            let fill = if sprite.hovered { sprite.color.gamma_multiply(1.25) } else { sprite.color };
            painter.circle_filled(center, radius, fill);

            if sprite.label_visible {
                painter.text(
                    center + Vec2::new(0.0, radius + 4.0),
                    Align2::CENTER_TOP,
                    &sprite.label,
                    FontId::proportional((12.0 * scale).clamp(8.0, 18.0)),
                    Color32::from_gray(0xd8),
                );
            }
        }

        // Overlays: zoom HUD, banners, explicit empty state.
        if let Some(until) = self.zoom_hud_until
            && Instant::now() < until
        {
            painter.text(
                rect.right_top() + Vec2::new(-12.0, 12.0),
                Align2::RIGHT_TOP,
                format!("{:.2}x", scale),
                FontId::proportional(14.0),
                Color32::from_gray(0xaa),
            );
        }
        if let Some(err) = self.session.error_banner() {
            painter.text(
                rect.center_top() + Vec2::new(0.0, 14.0),
                Align2::CENTER_TOP,
                err,
                FontId::proportional(14.0),
                Color32::from_rgb(0xff, 0x8a, 0x8a),
            );
        } else if let Some(notice) = self.session.notice() {
            painter.text(
                rect.center_top() + Vec2::new(0.0, 14.0),
                Align2::CENTER_TOP,
                notice,
                FontId::proportional(13.0),
                Color32::from_gray(0xc0),
            );
        }
        if self.session.is_empty_result() && !self.session.is_loading() {
            painter.text(
                rect.center(),
                Align2::CENTER_CENTER,
                "No relationships found for this resource",
                FontId::proportional(16.0),
                Color32::from_gray(0x90),
            );
        }
    }
}

impl eframe::App for ScopeApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let busy = self.session.tick(Instant::now());

        egui::SidePanel::left("tools").default_width(260.0).show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| self.sidebar(ui));
        });
        egui::CentralPanel::default().show(ctx, |ui| self.canvas(ui));

        // Keep frames coming while the simulation is hot or requests are out;
        // otherwise idle at a slow poll so debounce/retry timers still fire.
        if busy || !self.session.simulation().is_settled() || self.session.is_loading() {
            ctx.request_repaint();
        } else {
            ctx.request_repaint_after(Duration::from_millis(150));
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.session.close();
    }
}
