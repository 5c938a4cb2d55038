use std::collections::HashSet;

use crate::graph_utils::model::{LinkKey, NodeId};
use crate::graph_utils::paths::PathResult;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    Single,
    Multi,
    PathPicking,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SelectionPhase {
    #[default]
    Idle,
    SingleSelected,
    MultiSelected,
    PickingPathSource,
    PickingPathTarget,
    PathSelected,
}

// What a state transition asks the session to do next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionEvent {
    None,
    Changed,
    PathRequested { source: NodeId, target: NodeId },
}

// Tracks single/multi selection and the path-picking flow. Pure state machine:
// no rendering, no graph access; the session feeds clicks in and reacts to the
// returned events.
#[derive(Clone, Debug, Default)]
pub struct SelectionManager {
    phase: SelectionPhase,
    primary: Option<NodeId>,
    set: HashSet<NodeId>,
    path_source: Option<NodeId>,
    path_target: Option<NodeId>,
    // Highlight overlay for the currently shown path.
    path_nodes: HashSet<NodeId>,
    path_links: HashSet<LinkKey>,
}

impl SelectionManager {
    pub fn phase(&self) -> SelectionPhase {
        self.phase
    }

    pub fn primary(&self) -> Option<&NodeId> {
        self.primary.as_ref()
    }

    pub fn selected(&self) -> &HashSet<NodeId> {
        &self.set
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    pub fn path_endpoints(&self) -> (Option<&NodeId>, Option<&NodeId>) {
        (self.path_source.as_ref(), self.path_target.as_ref())
    }

    pub fn is_on_path(&self, id: &str) -> bool {
        self.path_nodes.contains(id)
    }

    pub fn is_link_on_path(&self, key: &LinkKey) -> bool {
        self.path_links.contains(key)
    }

    pub fn has_path_highlight(&self) -> bool {
        !self.path_nodes.is_empty()
    }

    pub fn select(&mut self, id: NodeId, mode: SelectionMode) -> SelectionEvent {
        match mode {
            SelectionMode::Single => {
                self.set.clear();
                self.set.insert(id.clone());
                self.primary = Some(id);
                self.phase = SelectionPhase::SingleSelected;
                SelectionEvent::Changed
            }
            SelectionMode::Multi => {
                self.set.insert(id.clone());
                self.primary = Some(id);
                self.phase = SelectionPhase::MultiSelected;
                SelectionEvent::Changed
            }
            SelectionMode::PathPicking => self.click(id),
        }
    }

    pub fn toggle(&mut self, id: NodeId) -> SelectionEvent {
        if !self.set.remove(&id) {
            self.set.insert(id.clone());
            self.primary = Some(id);
        } else if self.primary.as_deref() == Some(id.as_str()) {
            self.primary = self.set.iter().next().cloned();
        }
        self.phase = if self.set.is_empty() {
            SelectionPhase::Idle
        } else {
            SelectionPhase::MultiSelected
        };
        SelectionEvent::Changed
    }

    pub fn clear(&mut self) {
        self.phase = SelectionPhase::Idle;
        self.primary = None;
        self.set.clear();
        self.path_source = None;
        self.path_target = None;
        self.clear_path_highlight();
    }

    // Enter the two-click path flow; the next click picks the source.
    pub fn begin_path_picking(&mut self) {
        self.phase = SelectionPhase::PickingPathSource;
        self.path_source = None;
        self.path_target = None;
        self.clear_path_highlight();
    }

    pub fn set_path_endpoints(
        &mut self,
        source: Option<NodeId>,
        target: Option<NodeId>,
    ) -> SelectionEvent {
        self.clear_path_highlight();
        match (source, target) {
            (Some(s), Some(t)) if s != t => {
                self.path_source = Some(s.clone());
                self.path_target = Some(t.clone());
                self.phase = SelectionPhase::PathSelected;
                SelectionEvent::PathRequested { source: s, target: t }
            }
            (Some(s), _) => {
                self.path_source = Some(s);
                self.path_target = None;
                self.phase = SelectionPhase::PickingPathTarget;
                SelectionEvent::Changed
            }
            (None, _) => {
                self.path_source = None;
                self.path_target = None;
                self.phase = SelectionPhase::PickingPathSource;
                SelectionEvent::Changed
            }
        }
    }

    // Click intent, dispatched by phase. Outside the path flow a click is a
    // plain single-select.
    pub fn click(&mut self, id: NodeId) -> SelectionEvent {
        match self.phase {
            SelectionPhase::PickingPathSource => {
                self.path_source = Some(id);
                self.path_target = None;
                self.phase = SelectionPhase::PickingPathTarget;
                SelectionEvent::Changed
            }
            SelectionPhase::PickingPathTarget => {
                // Re-clicking the chosen source is ignored rather than
                // toggling it off; mid-construction state stays intact.
                if self.path_source.as_deref() == Some(id.as_str()) {
                    return SelectionEvent::None;
                }
                self.path_target = Some(id.clone());
                self.phase = SelectionPhase::PathSelected;
                let source = self.path_source.clone().unwrap_or_default();
                SelectionEvent::PathRequested { source, target: id }
            }
            SelectionPhase::PathSelected => {
                // A further click starts over with the clicked node as the
                // new source.
                self.clear_path_highlight();
                self.path_source = Some(id);
                self.path_target = None;
                self.phase = SelectionPhase::PickingPathTarget;
                SelectionEvent::Changed
            }
            _ => self.select(id, SelectionMode::Single),
        }
    }

    pub fn set_path_highlight(&mut self, path: &PathResult) {
        self.path_nodes.clear();
        self.path_links.clear();
        for step in path {
            self.path_nodes.insert(step.from.clone());
            self.path_nodes.insert(step.to.clone());
            self.path_links.insert(LinkKey::new(&step.from, &step.to, &step.field));
        }
    }

    pub fn clear_path_highlight(&mut self) {
        self.path_nodes.clear();
        self.path_links.clear();
    }

    // Drop selections referring to nodes that no longer exist (graph replaced).
    pub fn retain_known(&mut self, known: impl Fn(&str) -> bool) {
        self.set.retain(|id| known(id));
        if let Some(p) = &self.primary
            && !known(p)
        {
            self.primary = self.set.iter().next().cloned();
        }
        if self.path_source.as_deref().map(&known) == Some(false)
            || self.path_target.as_deref().map(&known) == Some(false)
        {
            self.path_source = None;
            self.path_target = None;
            self.clear_path_highlight();
            if matches!(self.phase, SelectionPhase::PathSelected | SelectionPhase::PickingPathTarget) {
                self.phase = SelectionPhase::PickingPathSource;
            }
        }
        if self.set.is_empty()
            && matches!(self.phase, SelectionPhase::SingleSelected | SelectionPhase::MultiSelected)
        {
            self.phase = SelectionPhase::Idle;
            self.primary = None;
        }
    }
}
