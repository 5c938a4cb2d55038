use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use egui::{Pos2, Rect, pos2, vec2};

use fhirscope::graph_utils::filter::{self, FilterSpec};
use fhirscope::graph_utils::model::{GraphModel, Link, LinkKey, LinkKind, Node};
use fhirscope::graph_utils::paths::find_paths;
use fhirscope::net::discovery::{
    DiscoveryOptions, DiscoveryResponse, DiscoveryService, RawLink, RawNode, RawSource,
    RelationshipStats, ServiceError, ServiceResult, build_graph,
};
use fhirscope::net::lifecycle::{DebouncePolicy, LifecycleEvent, RequestLifecycle, RetryPolicy};
use fhirscope::persistence::persist::SessionSnapshot;
use fhirscope::persistence::settings::EngineSettings;
use fhirscope::session::EngineSession;
use fhirscope::viz::layout::LayoutStrategy;
use fhirscope::viz::render::{LodSettings, RenderBridge};
use fhirscope::viz::selection::{SelectionEvent, SelectionManager, SelectionPhase};
use fhirscope::viz::sim::{ForceParams, SimulationEngine};
use fhirscope::viz::style::color_for_type;
use fhirscope::viz::viewport::{ViewTransform, ViewportController};

fn node(id: &str, depth: u32) -> Node {
    let (rt, _) = id.split_once('/').unwrap_or((id, ""));
    Node::new(id.to_string(), rt.to_string(), id.to_string(), depth)
}

fn link(source: &str, target: &str, field: &str) -> Link {
    Link {
        source: source.to_string(),
        target: target.to_string(),
        field: field.to_string(),
        kind: LinkKind::Direct,
        strength: 1.0,
    }
}

fn patient_observation_graph() -> GraphModel {
    let (graph, report) = GraphModel::from_parts(
        Some("Patient/1".to_string()),
        vec![node("Patient/1", 0), node("Observation/1", 1)],
        vec![link("Patient/1", "Observation/1", "subject")],
    );
    assert!(report.is_clean());
    graph
}

fn bounds_800x600() -> Rect {
    Rect::from_min_size(Pos2::ZERO, vec2(800.0, 600.0))
}

// --- graph model -------------------------------------------------------------

#[test]
fn graph_drops_dangling_and_self_loop_links() {
    let (graph, report) = GraphModel::from_parts(
        None,
        vec![node("Patient/1", 0), node("Encounter/1", 1)],
        vec![
            link("Patient/1", "Encounter/1", "subject"),
            link("Patient/1", "Patient/1", "self"),
            link("Patient/1", "Observation/404", "result"),
        ],
    );
    assert_eq!(graph.link_count(), 1);
    assert_eq!(report.self_loops, 1);
    assert_eq!(report.dangling_links, 1);
    // Every retained link references known, distinct endpoints.
    for l in graph.links() {
        assert!(graph.contains(&l.source));
        assert!(graph.contains(&l.target));
        assert_ne!(l.source, l.target);
    }
    let summary = report.summary().expect("summary for dirty report");
    assert!(summary.contains("unknown endpoints"));
}

#[test]
fn graph_duplicate_nodes_first_occurrence_wins() {
    let mut dup = node("Patient/1", 3);
    dup.display = "duplicate".to_string();
    let (graph, report) = GraphModel::from_parts(None, vec![node("Patient/1", 0), dup], Vec::new());
    assert_eq!(graph.node_count(), 1);
    assert_eq!(report.duplicate_nodes, 1);
    assert_eq!(graph.node("Patient/1").unwrap().depth, 0);
}

#[test]
fn link_key_is_unordered() {
    assert_eq!(LinkKey::new("A/1", "B/2", "subject"), LinkKey::new("B/2", "A/1", "subject"));
    assert_ne!(LinkKey::new("A/1", "B/2", "subject"), LinkKey::new("A/1", "B/2", "performer"));
}

#[test]
fn node_radius_grows_with_degree() {
    let (graph, _) = GraphModel::from_parts(
        None,
        vec![node("Patient/1", 0), node("Observation/1", 1), node("Observation/2", 1)],
        vec![
            link("Patient/1", "Observation/1", "subject"),
            link("Patient/1", "Observation/2", "subject"),
        ],
    );
    let hub = graph.node("Patient/1").unwrap().radius;
    let leaf = graph.node("Observation/1").unwrap().radius;
    assert!(hub > leaf);
}

// --- filter engine -----------------------------------------------------------

#[test]
fn filter_default_spec_returns_full_graph() {
    let graph = patient_observation_graph();
    let visible = filter::apply(&graph, &FilterSpec::default());
    assert_eq!(visible.nodes.len(), 2);
    assert_eq!(visible.links.len(), 1);
}

#[test]
fn filter_apply_is_idempotent() {
    let (graph, _) = GraphModel::from_parts(
        Some("Patient/1".to_string()),
        vec![
            node("Patient/1", 0),
            node("Observation/1", 1),
            node("Condition/1", 1),
            node("Encounter/1", 2),
        ],
        vec![
            link("Patient/1", "Observation/1", "subject"),
            link("Patient/1", "Condition/1", "subject"),
            link("Condition/1", "Encounter/1", "encounter"),
        ],
    );
    let spec = FilterSpec {
        included_resource_types: HashSet::from(["Patient".into(), "Condition".into()]),
        show_orphans: false,
        ..FilterSpec::default()
    };
    let once = filter::apply(&graph, &spec);
    let narrowed = filter::subgraph(&graph, &once);
    let twice = filter::apply(&narrowed, &spec);
    assert_eq!(once.nodes, twice.nodes);
    assert_eq!(once.links, twice.links);
}

#[test]
fn orphan_filtering_keeps_query_root() {
    let graph = patient_observation_graph();
    let spec = FilterSpec {
        included_resource_types: HashSet::from(["Patient".into()]),
        show_orphans: false,
        ..FilterSpec::default()
    };
    let visible = filter::apply(&graph, &spec);
    assert_eq!(visible.nodes, HashSet::from(["Patient/1".to_string()]));
    assert!(visible.links.is_empty());
}

#[test]
fn filter_field_inclusion_drops_other_links() {
    let (graph, _) = GraphModel::from_parts(
        Some("Patient/1".to_string()),
        vec![node("Patient/1", 0), node("Encounter/1", 1), node("Observation/1", 1)],
        vec![
            link("Patient/1", "Encounter/1", "subject"),
            link("Patient/1", "Observation/1", "performer"),
        ],
    );
    let spec =
        FilterSpec { included_fields: HashSet::from(["subject".into()]), ..FilterSpec::default() };
    let visible = filter::apply(&graph, &spec);
    assert_eq!(visible.links.len(), 1);
    assert!(visible.links.contains(&LinkKey::new("Patient/1", "Encounter/1", "subject")));
    // Nodes are untouched by field filtering while orphans are allowed.
    assert_eq!(visible.nodes.len(), 3);
}

#[test]
fn filter_max_depth_bounds_nodes() {
    let (graph, _) = GraphModel::from_parts(
        Some("Patient/1".to_string()),
        vec![node("Patient/1", 0), node("Encounter/1", 1), node("Observation/1", 2)],
        vec![
            link("Patient/1", "Encounter/1", "subject"),
            link("Encounter/1", "Observation/1", "encounter"),
        ],
    );
    let spec = FilterSpec { max_depth: 1, ..FilterSpec::default() };
    let visible = filter::apply(&graph, &spec);
    assert!(!visible.nodes.contains("Observation/1"));
    assert_eq!(visible.links.len(), 1);
}

// --- path finder -------------------------------------------------------------

#[test]
fn path_finder_returns_shortest_first() {
    let (graph, _) = GraphModel::from_parts(
        None,
        vec![node("A/1", 0), node("B/1", 1), node("C/1", 1)],
        vec![link("A/1", "B/1", "x"), link("B/1", "C/1", "y"), link("A/1", "C/1", "z")],
    );
    let found = find_paths(&graph, "A/1", "C/1", 2).unwrap();
    assert!(found.len() >= 2);
    assert_eq!(found[0].len(), 1);
    assert_eq!(found[1].len(), 2);
    assert_eq!(found[0][0].field, "z");
}

#[test]
fn path_finder_terminates_on_cycles() {
    let (graph, _) = GraphModel::from_parts(
        None,
        vec![node("A/1", 0), node("B/1", 1), node("C/1", 1)],
        vec![link("A/1", "B/1", "x"), link("B/1", "C/1", "y"), link("C/1", "A/1", "z")],
    );
    let found = find_paths(&graph, "A/1", "C/1", 5).unwrap();
    // Only simple paths: direct via z, and around via x+y.
    assert_eq!(found.len(), 2);
    for path in &found {
        let mut seen = HashSet::new();
        seen.insert(path[0].from.clone());
        for step in path {
            assert!(seen.insert(step.to.clone()), "node repeated in {path:?}");
        }
    }
}

#[test]
fn path_finder_rejects_equal_endpoints() {
    let graph = patient_observation_graph();
    assert!(find_paths(&graph, "Patient/1", "Patient/1", 3).is_err());
}

#[test]
fn path_finder_empty_when_unreachable() {
    let (graph, _) =
        GraphModel::from_parts(None, vec![node("A/1", 0), node("B/1", 1)], Vec::new());
    let found = find_paths(&graph, "A/1", "B/1", 4).unwrap();
    assert!(found.is_empty());
}

// --- layouts -----------------------------------------------------------------

#[test]
fn radial_layout_places_center_and_first_ring() {
    let mut graph = patient_observation_graph();
    let mut sim = SimulationEngine::default();
    LayoutStrategy::Radial.apply(&mut graph, bounds_800x600(), Some("Patient/1"), &mut sim);

    let center = graph.node("Patient/1").unwrap();
    assert_eq!(center.pos, pos2(400.0, 300.0));
    assert!(center.pinned.is_some());

    // Lone satellite: angle 0, depth-1 ring at 150 world units.
    let sat = graph.node("Observation/1").unwrap();
    assert!((sat.pos.x - 550.0).abs() < 0.5, "x = {}", sat.pos.x);
    assert!((sat.pos.y - 300.0).abs() < 0.5, "y = {}", sat.pos.y);
}

#[test]
fn layout_round_trip_preserves_graph() {
    let mut graph = patient_observation_graph();
    let ids_before: Vec<String> = graph.nodes().iter().map(|n| n.id.clone()).collect();
    let mut sim = SimulationEngine::default();
    let bounds = bounds_800x600();
    LayoutStrategy::Force.apply(&mut graph, bounds, None, &mut sim);
    LayoutStrategy::Radial.apply(&mut graph, bounds, Some("Patient/1"), &mut sim);
    LayoutStrategy::Force.apply(&mut graph, bounds, None, &mut sim);

    let ids_after: Vec<String> = graph.nodes().iter().map(|n| n.id.clone()).collect();
    assert_eq!(ids_before, ids_after);
    assert_eq!(graph.link_count(), 1);
    // Back on Force, nothing stays pinned.
    assert!(graph.nodes().iter().all(|n| n.pinned.is_none()));
}

#[test]
fn hierarchical_layout_rows_by_depth() {
    let (mut graph, _) = GraphModel::from_parts(
        Some("Patient/1".to_string()),
        vec![node("Patient/1", 0), node("Encounter/1", 1), node("Encounter/2", 1)],
        vec![
            link("Patient/1", "Encounter/1", "subject"),
            link("Patient/1", "Encounter/2", "subject"),
        ],
    );
    let mut sim = SimulationEngine::default();
    LayoutStrategy::Hierarchical.apply(&mut graph, bounds_800x600(), None, &mut sim);
    let root_y = graph.node("Patient/1").unwrap().pos.y;
    let e1 = graph.node("Encounter/1").unwrap().pos;
    let e2 = graph.node("Encounter/2").unwrap().pos;
    assert!(e1.y > root_y);
    assert_eq!(e1.y, e2.y);
    assert_ne!(e1.x, e2.x);
}

#[test]
fn circular_layout_spreads_all_nodes_on_one_circle() {
    let (mut graph, _) = GraphModel::from_parts(
        None,
        vec![node("A/1", 0), node("B/1", 1), node("C/1", 2), node("D/1", 3)],
        Vec::new(),
    );
    let mut sim = SimulationEngine::default();
    let bounds = bounds_800x600();
    LayoutStrategy::Circular.apply(&mut graph, bounds, None, &mut sim);
    let center = bounds.center();
    let radii: Vec<f32> = graph.nodes().iter().map(|n| (n.pos - center).length()).collect();
    for r in &radii {
        assert!((r - radii[0]).abs() < 0.5);
    }
}

#[test]
fn layouts_degrade_on_empty_graph() {
    let mut graph = GraphModel::new();
    let mut sim = SimulationEngine::default();
    for strategy in LayoutStrategy::ALL {
        strategy.apply(&mut graph, bounds_800x600(), None, &mut sim);
    }
}

// --- viewport ----------------------------------------------------------------

#[test]
fn viewport_screen_world_round_trip() {
    let mut vp = ViewportController::default();
    vp.set_screen_rect(bounds_800x600());
    vp.pan_by(vec2(40.0, -25.0));
    vp.zoom_by(1.7);
    let p = pos2(123.0, 456.0);
    let back = vp.screen_to_world(vp.world_to_screen(p));
    assert!((back.x - p.x).abs() < 1e-3);
    assert!((back.y - p.y).abs() < 1e-3);
}

#[test]
fn viewport_zoom_is_clamped() {
    let mut vp = ViewportController::new(0.1, 4.0);
    vp.set_screen_rect(bounds_800x600());
    for _ in 0..50 {
        vp.zoom_by(2.0);
    }
    assert!((vp.scale() - 4.0).abs() < 1e-6);
    for _ in 0..100 {
        vp.zoom_by(0.5);
    }
    assert!((vp.scale() - 0.1).abs() < 1e-6);
}

#[test]
fn viewport_fit_centers_nodes() {
    let mut vp = ViewportController::default();
    vp.set_screen_rect(bounds_800x600());
    let mut a = node("A/1", 0);
    a.pos = pos2(-200.0, -100.0);
    let mut b = node("B/1", 0);
    b.pos = pos2(600.0, 500.0);
    vp.fit_to_bounds(&[a.clone(), b.clone()], 40.0);

    let sa = vp.world_to_screen(a.pos);
    let sb = vp.world_to_screen(b.pos);
    let rect = vp.screen_rect();
    for p in [sa, sb] {
        assert!(rect.contains(p), "{p:?} outside {rect:?}");
    }
    // Bounding-box midpoint lands on the viewport center.
    let mid = vp.world_to_screen(pos2(200.0, 200.0));
    assert!((mid.x - rect.center().x).abs() < 1.0);
    assert!((mid.y - rect.center().y).abs() < 1.0);
}

#[test]
fn viewport_fit_on_empty_resets() {
    let mut vp = ViewportController::default();
    vp.set_screen_rect(bounds_800x600());
    vp.pan_by(vec2(99.0, 99.0));
    vp.fit_to_bounds(&[], 40.0);
    assert_eq!(vp.transform(), ViewTransform::default());
}

// --- simulation --------------------------------------------------------------

#[test]
fn simulation_settles_and_step_becomes_noop() {
    let mut graph = patient_observation_graph();
    let bounds = bounds_800x600();
    graph.nodes_mut()[0].pos = pos2(300.0, 300.0);
    graph.nodes_mut()[1].pos = pos2(420.0, 300.0);
    let mut sim = SimulationEngine::default();
    sim.reheat(1.0);
    let mut steps = 0;
    while !sim.is_settled() && steps < 1000 {
        sim.step(&mut graph, bounds, 1.0 / 60.0);
        steps += 1;
    }
    assert!(sim.is_settled(), "did not settle in {steps} steps");

    let before: Vec<Pos2> = graph.nodes().iter().map(|n| n.pos).collect();
    assert!(!sim.step(&mut graph, bounds, 1.0 / 60.0));
    let after: Vec<Pos2> = graph.nodes().iter().map(|n| n.pos).collect();
    assert_eq!(before, after);

    // Reheat brings it back to life.
    sim.reheat(0.5);
    assert!(!sim.is_settled());
}

#[test]
fn simulation_never_moves_pinned_nodes() {
    let mut graph = patient_observation_graph();
    let pin = pos2(100.0, 100.0);
    graph.node_mut("Patient/1").unwrap().pinned = Some(pin);
    graph.node_mut("Patient/1").unwrap().pos = pin;
    graph.node_mut("Observation/1").unwrap().pos = pos2(130.0, 100.0);
    let mut sim = SimulationEngine::default();
    sim.reheat(1.0);
    for _ in 0..200 {
        sim.step(&mut graph, bounds_800x600(), 1.0 / 60.0);
    }
    assert_eq!(graph.node("Patient/1").unwrap().pos, pin);
    assert_ne!(graph.node("Observation/1").unwrap().pos, pos2(130.0, 100.0));
}

#[test]
fn simulation_stop_is_idempotent() {
    let mut sim = SimulationEngine::new(ForceParams::default());
    sim.stop();
    sim.stop();
    sim.start();
    sim.start();
    sim.stop();
    assert!(!sim.is_running());
}

#[test]
fn simulation_tick_is_throttled() {
    let mut graph = patient_observation_graph();
    graph.nodes_mut()[0].pos = pos2(300.0, 300.0);
    graph.nodes_mut()[1].pos = pos2(310.0, 300.0);
    let mut sim = SimulationEngine::default();
    sim.reheat(1.0);
    let t0 = Instant::now();
    let alpha_start = sim.alpha();
    // Hammering tick at one wall-clock instant advances at most the capped
    // number of fixed steps, not one step per call.
    for _ in 0..100 {
        sim.tick(&mut graph, bounds_800x600(), t0);
    }
    let decay_per_step = 0.025f32;
    let max_alpha_drop = alpha_start * (1.0 - (1.0 - decay_per_step).powi(8));
    assert!(alpha_start - sim.alpha() <= max_alpha_drop + 1e-6);
}

#[test]
fn simulation_ignores_empty_graph() {
    let mut graph = GraphModel::new();
    let mut sim = SimulationEngine::default();
    sim.reheat(1.0);
    assert!(!sim.step(&mut graph, bounds_800x600(), 1.0 / 60.0));
}

// --- selection ---------------------------------------------------------------

#[test]
fn selection_path_picking_flow() {
    let mut sel = SelectionManager::default();
    sel.begin_path_picking();
    assert_eq!(sel.phase(), SelectionPhase::PickingPathSource);

    assert_eq!(sel.click("Patient/1".into()), SelectionEvent::Changed);
    assert_eq!(sel.phase(), SelectionPhase::PickingPathTarget);

    // Clicking the source again must be ignored, not toggle it off.
    assert_eq!(sel.click("Patient/1".into()), SelectionEvent::None);
    assert_eq!(sel.phase(), SelectionPhase::PickingPathTarget);

    let event = sel.click("Observation/1".into());
    assert_eq!(
        event,
        SelectionEvent::PathRequested {
            source: "Patient/1".into(),
            target: "Observation/1".into()
        }
    );
    assert_eq!(sel.phase(), SelectionPhase::PathSelected);

    // A third click restarts picking with the new node as source.
    assert_eq!(sel.click("Condition/9".into()), SelectionEvent::Changed);
    assert_eq!(sel.phase(), SelectionPhase::PickingPathTarget);
    assert_eq!(sel.path_endpoints().0.map(String::as_str), Some("Condition/9"));
    assert_eq!(sel.path_endpoints().1, None);
}

#[test]
fn selection_toggle_tracks_multi_set() {
    let mut sel = SelectionManager::default();
    sel.toggle("A/1".into());
    sel.toggle("B/1".into());
    assert_eq!(sel.phase(), SelectionPhase::MultiSelected);
    assert!(sel.is_selected("A/1") && sel.is_selected("B/1"));
    sel.toggle("A/1".into());
    assert!(!sel.is_selected("A/1"));
    sel.toggle("B/1".into());
    assert_eq!(sel.phase(), SelectionPhase::Idle);
}

#[test]
fn selection_set_path_endpoints_requests_discovery() {
    let mut sel = SelectionManager::default();
    let event = sel.set_path_endpoints(Some("A/1".into()), Some("B/1".into()));
    assert_eq!(event, SelectionEvent::PathRequested { source: "A/1".into(), target: "B/1".into() });
    // Equal endpoints never fire a request.
    let event = sel.set_path_endpoints(Some("A/1".into()), Some("A/1".into()));
    assert_eq!(event, SelectionEvent::Changed);
    assert_eq!(sel.phase(), SelectionPhase::PickingPathTarget);
}

// --- render bridge -----------------------------------------------------------

#[test]
fn render_diff_reuses_sprites_for_unchanged_entities() {
    let mut graph = patient_observation_graph();
    let visible = filter::apply(&graph, &FilterSpec::default());
    let sel = SelectionManager::default();
    let mut bridge = RenderBridge::new(LodSettings::default());

    let stats = bridge.sync(&graph, &visible, &sel, None);
    assert_eq!(stats.nodes_added, 2);
    assert_eq!(stats.links_added, 1);
    let gen_before = bridge.node_sprite("Patient/1").unwrap().generation;

    // Move a node; the sprite must update in place, not be recreated.
    graph.node_mut("Patient/1").unwrap().pos = pos2(42.0, 7.0);
    let stats = bridge.sync(&graph, &visible, &sel, None);
    assert_eq!(stats.nodes_added, 0);
    assert_eq!(stats.nodes_removed, 0);
    let sprite = bridge.node_sprite("Patient/1").unwrap();
    assert_eq!(sprite.generation, gen_before);
    assert_eq!(sprite.pos, pos2(42.0, 7.0));
}

#[test]
fn render_diff_removes_filtered_out_entities() {
    let graph = patient_observation_graph();
    let sel = SelectionManager::default();
    let mut bridge = RenderBridge::new(LodSettings::default());
    bridge.sync(&graph, &filter::apply(&graph, &FilterSpec::default()), &sel, None);

    let spec = FilterSpec {
        included_resource_types: HashSet::from(["Patient".into()]),
        show_orphans: false,
        ..FilterSpec::default()
    };
    let stats = bridge.sync(&graph, &filter::apply(&graph, &spec), &sel, None);
    assert_eq!(stats.nodes_removed, 1);
    assert_eq!(stats.links_removed, 1);
    assert!(bridge.node_sprite("Observation/1").is_none());
    assert!(bridge.node_sprite("Patient/1").is_some());
}

#[test]
fn render_cull_hides_offscreen_sprites_without_destroying_them() {
    let mut graph = patient_observation_graph();
    graph.node_mut("Patient/1").unwrap().pos = pos2(100.0, 100.0);
    graph.node_mut("Observation/1").unwrap().pos = pos2(5000.0, 5000.0);
    let visible = filter::apply(&graph, &FilterSpec::default());
    let sel = SelectionManager::default();
    // Tiny threshold so two nodes already count as a large graph.
    let mut bridge = RenderBridge::new(LodSettings { node_threshold: 1, ..LodSettings::default() });
    bridge.sync(&graph, &visible, &sel, None);

    let mut vp = ViewportController::default();
    vp.set_screen_rect(bounds_800x600());
    bridge.cull(&vp);

    assert!(bridge.node_sprite("Patient/1").unwrap().visible);
    let off = bridge.node_sprite("Observation/1").unwrap();
    assert!(!off.visible, "off-viewport sprite should be hidden");
    // Hidden, not destroyed: the sprite object survives the cull.
    assert!(bridge.node_sprite("Observation/1").is_some());
}

#[test]
fn style_fallback_color_is_stable() {
    assert_eq!(color_for_type("TotallyUnknownType"), color_for_type("TotallyUnknownType"));
    assert_ne!(color_for_type("Patient"), color_for_type("Observation"));
}

// --- discovery validation ----------------------------------------------------

fn raw_node(id: &str, depth: u32) -> RawNode {
    let (rt, _) = id.split_once('/').unwrap_or((id, ""));
    RawNode {
        id: id.to_string(),
        resource_type: rt.to_string(),
        display: id.to_string(),
        depth,
        last_updated: None,
    }
}

fn raw_link(source: &str, target: &str, field: &str) -> RawLink {
    RawLink {
        source: source.to_string(),
        target: target.to_string(),
        field: field.to_string(),
        kind: None,
        strength: None,
    }
}

fn response(nodes: Vec<RawNode>, links: Vec<RawLink>) -> DiscoveryResponse {
    DiscoveryResponse {
        source: RawSource {
            resource_type: "Patient".to_string(),
            resource_id: "1".to_string(),
            display: "Test Patient".to_string(),
        },
        nodes,
        links,
    }
}

#[test]
fn build_graph_validates_and_reports_once() {
    let resp = response(
        vec![raw_node("Patient/1", 0), raw_node("Observation/1", 1)],
        vec![
            raw_link("Patient/1", "Observation/1", "subject"),
            raw_link("Patient/1", "Missing/1", "ref"),
            raw_link("Observation/1", "Observation/1", "loop"),
        ],
    );
    let (graph, report) = build_graph(&resp);
    assert_eq!(graph.root().map(String::as_str), Some("Patient/1"));
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.link_count(), 1);
    assert_eq!(report.dangling_links, 1);
    assert_eq!(report.self_loops, 1);
    assert!(report.summary().is_some());
}

#[test]
fn discovery_response_parses_wire_format() {
    let json = r#"{
        "source": {"resourceType": "Patient", "resourceId": "1", "display": "Pat"},
        "nodes": [
            {"id": "Patient/1", "resourceType": "Patient", "display": "Pat", "depth": 0},
            {"id": "Observation/9", "resourceType": "Observation", "depth": 1,
             "lastUpdated": "2025-11-02T09:30:00Z"}
        ],
        "links": [
            {"source": "Patient/1", "target": "Observation/9", "field": "subject",
             "kind": "one-to-many"}
        ]
    }"#;
    let resp: DiscoveryResponse = serde_json::from_str(json).unwrap();
    let (graph, report) = build_graph(&resp);
    assert!(report.is_clean());
    assert_eq!(graph.links()[0].kind, LinkKind::OneToMany);
    assert!(graph.node("Observation/9").unwrap().last_updated.is_some());
}

// --- request lifecycle -------------------------------------------------------

struct MockService {
    discover_calls: AtomicUsize,
    latency: Duration,
    slow_key: Option<(String, Duration)>,
    fail: Option<ServiceError>,
}

impl MockService {
    fn quick() -> Self {
        Self {
            discover_calls: AtomicUsize::new(0),
            latency: Duration::from_millis(30),
            slow_key: None,
            fail: None,
        }
    }

    fn failing(err: ServiceError) -> Self {
        Self { fail: Some(err), ..Self::quick() }
    }
}

impl DiscoveryService for MockService {
    fn discover(
        &self,
        resource_type: &str,
        resource_id: &str,
        _opts: &DiscoveryOptions,
    ) -> ServiceResult<DiscoveryResponse> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{resource_type}/{resource_id}");
        let delay = match &self.slow_key {
            Some((slow, d)) if *slow == key => *d,
            _ => self.latency,
        };
        std::thread::sleep(delay);
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        let satellite = format!("Observation/for-{resource_id}");
        Ok(DiscoveryResponse {
            source: RawSource {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                display: key.clone(),
            },
            nodes: vec![raw_node(&key, 0), raw_node(&satellite, 1)],
            links: vec![raw_link(&key, &satellite, "subject")],
        })
    }

    fn statistics(&self) -> ServiceResult<RelationshipStats> {
        Ok(RelationshipStats::default())
    }
}

fn drain_until(
    lifecycle: &mut RequestLifecycle,
    deadline: Duration,
    mut stop: impl FnMut(&LifecycleEvent) -> bool,
) -> Vec<LifecycleEvent> {
    let t0 = Instant::now();
    let mut events = Vec::new();
    while t0.elapsed() < deadline {
        for event in lifecycle.poll(Instant::now()) {
            let done = stop(&event);
            events.push(event);
            if done {
                return events;
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    events
}

#[test]
fn request_dedup_issues_one_transport_call() {
    let service = Arc::new(MockService::quick());
    let mut lifecycle =
        RequestLifecycle::new(service.clone(), RetryPolicy::default(), DebouncePolicy::default());

    assert!(lifecycle.start_discovery("Patient", "1", DiscoveryOptions::default()));
    assert!(!lifecycle.start_discovery("Patient", "1", DiscoveryOptions::default()));

    let events = drain_until(&mut lifecycle, Duration::from_secs(2), |e| {
        matches!(e, LifecycleEvent::DiscoveryReady { .. })
    });
    assert_eq!(service.discover_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        events.iter().filter(|e| matches!(e, LifecycleEvent::DiscoveryReady { .. })).count(),
        1
    );
}

#[test]
fn cancellation_ignores_late_response() {
    let service = Arc::new(MockService {
        discover_calls: AtomicUsize::new(0),
        latency: Duration::from_millis(10),
        slow_key: Some(("Patient/1".to_string(), Duration::from_millis(250))),
        fail: None,
    });
    let mut lifecycle =
        RequestLifecycle::new(service.clone(), RetryPolicy::default(), DebouncePolicy::default());

    lifecycle.start_discovery("Patient", "1", DiscoveryOptions::default());
    // A different resource cancels the outstanding request.
    lifecycle.start_discovery("Patient", "2", DiscoveryOptions::default());

    // Wait long enough for the slow Patient/1 response to land too.
    std::thread::sleep(Duration::from_millis(400));
    let events = lifecycle.poll(Instant::now());
    let ready: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            LifecycleEvent::DiscoveryReady { key, .. } => Some(key.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(ready, vec!["Patient/2"], "late Patient/1 response must be discarded");
    assert_eq!(service.discover_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn transport_errors_retry_with_bounded_attempts() {
    let service = Arc::new(MockService::failing(ServiceError::Transport("boom".into())));
    let retry = RetryPolicy { max_attempts: 3, base_delay_ms: 10 };
    let mut lifecycle = RequestLifecycle::new(service.clone(), retry, DebouncePolicy::default());

    lifecycle.start_discovery("Patient", "1", DiscoveryOptions::default());
    let events = drain_until(&mut lifecycle, Duration::from_secs(3), |e| {
        matches!(e, LifecycleEvent::DiscoveryFailed { .. })
    });

    assert_eq!(service.discover_calls.load(Ordering::SeqCst), 3);
    match events.last() {
        Some(LifecycleEvent::DiscoveryFailed { recoverable, .. }) => assert!(*recoverable),
        other => panic!("expected DiscoveryFailed, got {other:?}"),
    }
}

#[test]
fn validation_errors_are_not_retried() {
    let service = Arc::new(MockService::failing(ServiceError::Validation("bad payload".into())));
    let mut lifecycle = RequestLifecycle::new(
        service.clone(),
        RetryPolicy { max_attempts: 3, base_delay_ms: 10 },
        DebouncePolicy::default(),
    );

    lifecycle.start_discovery("Patient", "1", DiscoveryOptions::default());
    let events = drain_until(&mut lifecycle, Duration::from_secs(2), |e| {
        matches!(e, LifecycleEvent::DiscoveryFailed { .. })
    });

    assert_eq!(service.discover_calls.load(Ordering::SeqCst), 1);
    match events.last() {
        Some(LifecycleEvent::DiscoveryFailed { recoverable, .. }) => assert!(!*recoverable),
        other => panic!("expected DiscoveryFailed, got {other:?}"),
    }
}

#[test]
fn search_debounce_coalesces_keystrokes() {
    let service = Arc::new(MockService::quick());
    let mut lifecycle =
        RequestLifecycle::new(service, RetryPolicy::default(), DebouncePolicy::default());

    let t0 = Instant::now();
    lifecycle.set_search_text("a", t0);
    lifecycle.set_search_text("am", t0 + Duration::from_millis(100));
    lifecycle.set_search_text("ame", t0 + Duration::from_millis(200));

    // Quiet period not yet elapsed: nothing fires.
    assert!(lifecycle.poll(t0 + Duration::from_millis(400)).is_empty());
    // Past the quiet window, exactly one search fires with the final text.
    let events = lifecycle.poll(t0 + Duration::from_millis(501));
    match events.as_slice() {
        [LifecycleEvent::SearchFired(text)] => assert_eq!(text, "ame"),
        other => panic!("expected one SearchFired, got {other:?}"),
    }
    assert!(lifecycle.poll(t0 + Duration::from_millis(900)).is_empty());
}

#[test]
fn teardown_is_idempotent_and_blocks_new_work() {
    let service = Arc::new(MockService::quick());
    let mut lifecycle =
        RequestLifecycle::new(service.clone(), RetryPolicy::default(), DebouncePolicy::default());
    lifecycle.start_discovery("Patient", "1", DiscoveryOptions::default());
    lifecycle.teardown();
    lifecycle.teardown();

    assert!(!lifecycle.start_discovery("Patient", "2", DiscoveryOptions::default()));
    std::thread::sleep(Duration::from_millis(100));
    assert!(lifecycle.poll(Instant::now()).is_empty());
    assert!(!lifecycle.has_pending_work());
}

// --- engine session ----------------------------------------------------------

fn settle(session: &mut EngineSession, deadline: Duration) {
    let t0 = Instant::now();
    while t0.elapsed() < deadline {
        session.tick(Instant::now());
        if !session.is_loading() {
            // One more tick so freshly drained results are fully installed.
            session.tick(Instant::now());
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn session_installs_discovery_and_replaces_graph() {
    let service = Arc::new(MockService::quick());
    let mut session = EngineSession::open(service, EngineSettings::default());
    session.viewport_mut().set_screen_rect(bounds_800x600());
    session.discover("Patient", "1");
    settle(&mut session, Duration::from_secs(2));
    assert_eq!(session.graph().root().map(String::as_str), Some("Patient/1"));
    assert_eq!(session.graph().node_count(), 2);
    assert!(session.error_banner().is_none());

    session.discover("Patient", "2");
    settle(&mut session, Duration::from_secs(2));
    assert_eq!(session.graph().root().map(String::as_str), Some("Patient/2"));
    assert!(!session.graph().contains("Patient/1"));
    session.close();
}

#[test]
fn session_surfaces_transport_failure_as_banner() {
    let failing = Arc::new(MockService::failing(ServiceError::Transport("down".into())));
    let mut session = EngineSession::open(
        failing,
        EngineSettings {
            retry: RetryPolicy { max_attempts: 2, base_delay_ms: 10 },
            ..EngineSettings::default()
        },
    );
    session.viewport_mut().set_screen_rect(bounds_800x600());
    session.discover("Patient", "9");
    settle(&mut session, Duration::from_secs(3));
    assert!(session.error_banner().is_some());
    session.close();
}

#[test]
fn session_close_is_idempotent() {
    let service = Arc::new(MockService::quick());
    let mut session = EngineSession::open(service, EngineSettings::default());
    session.discover("Patient", "1");
    session.close();
    session.close();
    assert!(!session.is_active());
    // Ticking a closed session mutates nothing.
    assert!(!session.tick(Instant::now()));
    assert!(session.graph().is_empty());
}

#[test]
fn session_path_flow_highlights_shortest_path() {
    let service = Arc::new(MockService::quick());
    let mut session = EngineSession::open(service, EngineSettings::default());
    session.viewport_mut().set_screen_rect(bounds_800x600());
    session.discover("Patient", "1");
    settle(&mut session, Duration::from_secs(2));

    session.begin_path_picking();
    session.click_node("Patient/1".to_string());
    session.click_node("Observation/for-1".to_string());
    assert_eq!(session.path_results().len(), 1);
    assert_eq!(session.path_results()[0].len(), 1);
    assert!(session.selection().is_on_path("Patient/1"));
    assert!(session.selection().is_on_path("Observation/for-1"));
    session.close();
}

// --- persistence -------------------------------------------------------------

#[test]
fn snapshot_round_trips_graph_and_view() {
    let mut graph = patient_observation_graph();
    graph.node_mut("Patient/1").unwrap().pos = pos2(12.5, -3.0);
    graph.node_mut("Observation/1").unwrap().pinned = Some(pos2(80.0, 90.0));
    let view = ViewTransform { translate: vec2(33.0, -14.0), scale: 1.5 };

    let snapshot = SessionSnapshot::from_runtime(&graph, view);
    let (restored, restored_view) = snapshot.into_runtime();

    assert_eq!(restored.node_count(), 2);
    assert_eq!(restored.link_count(), 1);
    assert_eq!(restored.root().map(String::as_str), Some("Patient/1"));
    assert_eq!(restored.node("Patient/1").unwrap().pos, pos2(12.5, -3.0));
    assert_eq!(restored.node("Observation/1").unwrap().pinned, Some(pos2(80.0, 90.0)));
    assert_eq!(restored_view.scale, 1.5);
    assert_eq!(restored_view.translate, vec2(33.0, -14.0));
}

#[test]
fn settings_serde_round_trip_with_missing_fields() {
    let settings = EngineSettings::default();
    let json = serde_json::to_string(&settings).unwrap();
    let back: EngineSettings = serde_json::from_str(&json).unwrap();
    assert_eq!(settings, back);

    // Old files with most fields absent still load with defaults.
    let sparse: EngineSettings = serde_json::from_str(r#"{"discovery_depth": 3}"#).unwrap();
    assert_eq!(sparse.discovery_depth, 3);
    assert_eq!(sparse.retry, RetryPolicy::default());
}
