use std::time::Instant;

use egui::{Rect, Vec2};
use serde::{Deserialize, Serialize};

use crate::graph_utils::model::GraphModel;

// Fixed integration rate; the host may tick faster or slower, tick() keeps
// the simulation itself bounded to this.
const FIXED_DT: f32 = 1.0 / 60.0;
// Cap on catch-up steps per tick so a stalled host cannot trigger a spiral.
const MAX_STEPS_PER_TICK: u32 = 4;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForceParams {
    pub link_distance: f32,     // preferred edge length in world units
    pub link_stiffness: f32,    // spring stiffness (units/s^2)
    pub charge: f32,            // pair repulsion coefficient, negative repels
    pub collision_padding: f32, // extra clearance between node circles
    pub center_pull: f32,       // gentle pull toward the viewport center
    pub damping: f32,           // velocity damping (units/s)
    pub max_speed: f32,         // clamp velocity magnitude (units/s)
    pub max_step: f32,          // clamp displacement per step (units)
}

impl Default for ForceParams {
    fn default() -> Self {
        Self {
            link_distance: 100.0,
            link_stiffness: 4.0,
            charge: -300.0,
            collision_padding: 4.0,
            center_pull: 0.8,
            damping: 6.0,
            max_speed: 600.0,
            max_step: 8.0,
        }
    }
}

// Continuous force-directed relaxation over the free (unpinned) nodes.
// An alpha cooling parameter starts at 1.0 on reheat and decays each step;
// below `alpha_min` the layout counts as settled and step() is a no-op until
// something reheats it (drag, node churn, parameter change, layout apply).
pub struct SimulationEngine {
    params: ForceParams,
    alpha: f32,
    alpha_min: f32,
    alpha_decay: f32,
    running: bool,
    accumulator: f32,
    last_tick: Option<Instant>,
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self::new(ForceParams::default())
    }
}

impl SimulationEngine {
    pub fn new(params: ForceParams) -> Self {
        Self {
            params,
            alpha: 1.0,
            alpha_min: 0.005,
            alpha_decay: 0.025,
            running: false,
            accumulator: 0.0,
            last_tick: None,
        }
    }

    pub fn params(&self) -> &ForceParams {
        &self.params
    }

    // Changing force parameters reheats so the layout can re-equilibrate.
    pub fn set_params(&mut self, params: ForceParams) {
        if self.params != params {
            self.params = params;
            self.reheat(0.5);
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_settled(&self) -> bool {
        self.alpha < self.alpha_min
    }

    // Idempotent: starting while running or stopping while stopped is a no-op.
    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.last_tick = None;
        self.accumulator = 0.0;
    }

    pub fn reheat(&mut self, alpha: f32) {
        self.alpha = self.alpha.max(alpha.clamp(0.3, 1.0));
        self.running = true;
    }

    // Throttled entry point: advances in fixed steps no matter how often the
    // host calls it. Returns true if any node moved (host should repaint).
    pub fn tick(&mut self, graph: &mut GraphModel, bounds: Rect, now: Instant) -> bool {
        if !self.running || self.is_settled() || graph.is_empty() {
            self.last_tick = Some(now);
            return false;
        }
        let elapsed = match self.last_tick {
            Some(prev) => (now - prev).as_secs_f32().min(0.25),
            None => FIXED_DT,
        };
        self.last_tick = Some(now);
        self.accumulator += elapsed;

        let mut moved = false;
        let mut steps = 0;
        while self.accumulator >= FIXED_DT && steps < MAX_STEPS_PER_TICK {
            moved |= self.step(graph, bounds, FIXED_DT);
            self.accumulator -= FIXED_DT;
            steps += 1;
        }
        // Drop any backlog beyond the cap; catching up further is not worth
        // freezing the host frame for.
        if steps == MAX_STEPS_PER_TICK {
            self.accumulator = 0.0;
        }
        moved
    }

    // One integration step. Forces are additive: link springs, pair charge,
    // collision separation, centering; positions are finally clamped into the
    // padded bounds so nothing drifts off-screen for good.
    pub fn step(&mut self, graph: &mut GraphModel, bounds: Rect, dt: f32) -> bool {
        if !self.running || self.is_settled() || graph.is_empty() {
            return false;
        }

        let n = graph.node_count();
        let mut forces: Vec<Vec2> = vec![Vec2::ZERO; n];
        let p = self.params.clone();
        let alpha = self.alpha;

        // Link springs: attract toward the target distance, repel when
        // compressed; higher-strength links pull harder.
        for link in graph.links() {
            let (Some(si), Some(ti)) = (graph.index_of(&link.source), graph.index_of(&link.target))
            else {
                continue;
            };
            let pa = graph.nodes()[si].pos;
            let pb = graph.nodes()[ti].pos;
            let delta = pb - pa;
            let dist2 = delta.length_sq();
            if dist2 <= 1e-6 {
                continue;
            }
            let dist = dist2.sqrt();
            let dir = delta / dist;
            let stretch = dist - p.link_distance;
            let f = dir * (p.link_stiffness * stretch * link.strength * alpha);
            forces[si] += f;
            forces[ti] -= f;
        }

        // Charge: every pair repels with inverse-square falloff. O(N^2) is
        // fine for the tens-to-hundreds of nodes this explorer targets.
        for i in 0..n {
            for j in (i + 1)..n {
                let delta = graph.nodes()[j].pos - graph.nodes()[i].pos;
                let dist2 = delta.length_sq().max(25.0);
                let dist = dist2.sqrt();
                let dir = delta / dist;
                let f = dir * (p.charge * alpha / dist2);
                forces[i] += f;
                forces[j] -= f;
            }
        }

        // Centering: gently pull everything toward the viewport center.
        let center = bounds.center();
        for i in 0..n {
            let dir = center - graph.nodes()[i].pos;
            forces[i] += dir * (p.center_pull * alpha);
        }

        // Integrate free nodes; pinned nodes snap to their pin and stay put.
        let mut moved = false;
        for (i, node) in graph.nodes_mut().iter_mut().enumerate() {
            if let Some(pin) = node.pinned {
                if node.pos != pin {
                    node.pos = pin;
                    moved = true;
                }
                node.vel = Vec2::ZERO;
                continue;
            }
            let mut v = node.vel;
            let a = forces[i] - v * p.damping;
            v += a * dt;
            let speed = v.length();
            if speed > p.max_speed {
                v *= p.max_speed / speed;
            }
            let mut step = v * dt;
            let step_len = step.length();
            if step_len > p.max_step {
                step *= p.max_step / step_len;
            }
            if step != Vec2::ZERO {
                node.pos += step;
                moved = true;
            }
            node.vel = v;
        }

        self.separate_collisions(graph);
        self.clamp_to_bounds(graph, bounds);

        self.alpha *= 1.0 - self.alpha_decay;
        if self.is_settled() {
            // Settled: freeze residual velocities so a later reheat starts calm.
            for node in graph.nodes_mut() {
                node.vel = Vec2::ZERO;
            }
        }
        moved
    }

    // Pairwise positional separation so node circles (radius + padding) never
    // overlap. The push splits between two free nodes; a pinned node passes
    // its whole share to the free one.
    fn separate_collisions(&self, graph: &mut GraphModel) {
        let n = graph.node_count();
        for i in 0..n {
            for j in (i + 1)..n {
                let (pa, ra, pin_a) = {
                    let a = &graph.nodes()[i];
                    (a.pos, a.radius, a.pinned.is_some())
                };
                let (pb, rb, pin_b) = {
                    let b = &graph.nodes()[j];
                    (b.pos, b.radius, b.pinned.is_some())
                };
                if pin_a && pin_b {
                    continue;
                }
                let min_dist = ra + rb + self.params.collision_padding;
                let delta = pb - pa;
                let d2 = delta.length_sq();
                if d2 >= min_dist * min_dist {
                    continue;
                }
                if d2 <= 1e-6 {
                    // Coincident: nudge apart deterministically.
                    if !pin_a {
                        graph.nodes_mut()[i].pos += Vec2::new(-0.5 * min_dist, -0.3 * min_dist);
                    }
                    if !pin_b {
                        graph.nodes_mut()[j].pos += Vec2::new(0.5 * min_dist, 0.3 * min_dist);
                    }
                    continue;
                }
                let d = d2.sqrt();
                let dir = delta / d;
                let overlap = min_dist - d;
                match (pin_a, pin_b) {
                    (false, false) => {
                        graph.nodes_mut()[i].pos -= dir * (overlap * 0.5);
                        graph.nodes_mut()[j].pos += dir * (overlap * 0.5);
                    }
                    (true, false) => graph.nodes_mut()[j].pos += dir * overlap,
                    (false, true) => graph.nodes_mut()[i].pos -= dir * overlap,
                    (true, true) => {}
                }
            }
        }
    }

    fn clamp_to_bounds(&self, graph: &mut GraphModel, bounds: Rect) {
        for node in graph.nodes_mut() {
            if node.pinned.is_some() {
                continue;
            }
            let pad = node.radius + 8.0;
            // A degenerate viewport (smaller than one node) skips clamping.
            if bounds.width() > 2.0 * pad && bounds.height() > 2.0 * pad {
                node.pos.x = node.pos.x.clamp(bounds.left() + pad, bounds.right() - pad);
                node.pos.y = node.pos.y.clamp(bounds.top() + pad, bounds.bottom() - pad);
            }
        }
    }
}
