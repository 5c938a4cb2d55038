use egui::{Pos2, Rect, Vec2};

use crate::graph_utils::model::Node;

pub const DEFAULT_MIN_SCALE: f32 = 0.1;
pub const DEFAULT_MAX_SCALE: f32 = 4.0;

// The affine view transform: screen = world * scale + translate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewTransform {
    pub translate: Vec2,
    pub scale: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self { translate: Vec2::ZERO, scale: 1.0 }
    }
}

// Owns zoom/pan state and the screen<->world coordinate maps. All mutations
// land in a single current ViewTransform; animating between transforms is the
// host's business, the contract here is only the final value.
#[derive(Clone, Debug)]
pub struct ViewportController {
    transform: ViewTransform,
    min_scale: f32,
    max_scale: f32,
    // Screen-space rectangle the graph is drawn into; kept current by the host.
    screen_rect: Rect,
}

impl Default for ViewportController {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCALE, DEFAULT_MAX_SCALE)
    }
}

impl ViewportController {
    pub fn new(min_scale: f32, max_scale: f32) -> Self {
        Self {
            transform: ViewTransform::default(),
            min_scale,
            max_scale,
            screen_rect: Rect::from_min_size(Pos2::ZERO, egui::vec2(1280.0, 720.0)),
        }
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: ViewTransform) {
        self.transform = ViewTransform {
            translate: transform.translate,
            scale: transform.scale.clamp(self.min_scale, self.max_scale),
        };
    }

    pub fn screen_rect(&self) -> Rect {
        self.screen_rect
    }

    pub fn set_screen_rect(&mut self, rect: Rect) {
        self.screen_rect = rect;
    }

    pub fn scale(&self) -> f32 {
        self.transform.scale
    }

    pub fn world_to_screen(&self, p: Pos2) -> Pos2 {
        Pos2::new(
            p.x * self.transform.scale + self.transform.translate.x,
            p.y * self.transform.scale + self.transform.translate.y,
        )
    }

    pub fn screen_to_world(&self, p: Pos2) -> Pos2 {
        Pos2::new(
            (p.x - self.transform.translate.x) / self.transform.scale,
            (p.y - self.transform.translate.y) / self.transform.scale,
        )
    }

    // The world-space rectangle currently on screen; the render LOD pass culls
    // against this.
    pub fn visible_world_rect(&self) -> Rect {
        Rect::from_min_max(
            self.screen_to_world(self.screen_rect.min),
            self.screen_to_world(self.screen_rect.max),
        )
    }

    pub fn pan_by(&mut self, delta: Vec2) {
        self.transform.translate += delta;
    }

    // Zoom about the viewport center, keeping the world point under it fixed.
    pub fn zoom_by(&mut self, factor: f32) {
        self.zoom_about(factor, self.screen_rect.center());
    }

    // Zoom keeping the world point under `anchor` (screen space) fixed; this
    // is what scroll-wheel zoom at the cursor wants.
    pub fn zoom_about(&mut self, factor: f32, anchor: Pos2) {
        let world_anchor = self.screen_to_world(anchor);
        let scale = (self.transform.scale * factor).clamp(self.min_scale, self.max_scale);
        self.transform.scale = scale;
        self.transform.translate =
            anchor.to_vec2() - Vec2::new(world_anchor.x * scale, world_anchor.y * scale);
    }

    pub fn reset_to_identity(&mut self) {
        self.transform = ViewTransform::default();
    }

    // Minimal transform fitting every node circle (center + radius) inside the
    // viewport with `padding` screen units to spare, scale clamped as always.
    pub fn fit_to_bounds(&mut self, nodes: &[Node], padding: f32) {
        let Some(first) = nodes.first() else {
            self.reset_to_identity();
            return;
        };
        let mut min = first.pos - Vec2::splat(first.radius);
        let mut max = first.pos + Vec2::splat(first.radius);
        for node in &nodes[1..] {
            min.x = min.x.min(node.pos.x - node.radius);
            min.y = min.y.min(node.pos.y - node.radius);
            max.x = max.x.max(node.pos.x + node.radius);
            max.y = max.y.max(node.pos.y + node.radius);
        }
        let world = Rect::from_min_max(min, max);

        let avail = self.screen_rect.size() - Vec2::splat(2.0 * padding);
        let scale = if world.width() <= f32::EPSILON || world.height() <= f32::EPSILON {
            // Single node or a degenerate line: just center it at unit scale.
            1.0
        } else {
            (avail.x / world.width()).min(avail.y / world.height())
        }
        .clamp(self.min_scale, self.max_scale);

        let world_center = world.center();
        let screen_center = self.screen_rect.center();
        self.transform = ViewTransform {
            scale,
            translate: screen_center.to_vec2()
                - Vec2::new(world_center.x * scale, world_center.y * scale),
        };
    }
}
