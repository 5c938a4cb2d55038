use std::collections::VecDeque;

use anyhow::{Result, bail};

use super::model::{GraphModel, NodeId};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathStep {
    pub from: NodeId,
    pub to: NodeId,
    pub field: String,
}

// One simple path, source to target, as an ordered list of traversed edges.
pub type PathResult = Vec<PathStep>;

// Enumerate every simple path between two nodes up to `max_depth` hops,
// treating links as undirected. Breadth-first over partial paths, so results
// come out sorted by hop count with ties in traversal order. Each branch
// carries its own visited set (the path itself) - a global visited set would
// suppress alternative routes, and the per-branch set is what guarantees
// termination on cyclic graphs.
pub fn find_paths(
    graph: &GraphModel,
    source: &str,
    target: &str,
    max_depth: usize,
) -> Result<Vec<PathResult>> {
    if source == target {
        bail!("path endpoints must be two different resources");
    }
    let Some(src_idx) = graph.index_of(source) else {
        bail!("unknown path source {source}");
    };
    let Some(dst_idx) = graph.index_of(target) else {
        bail!("unknown path target {target}");
    };
    if max_depth == 0 {
        return Ok(Vec::new());
    }

    struct Partial {
        at: usize,
        visited: Vec<usize>,
        steps: PathResult,
    }

    let mut found: Vec<PathResult> = Vec::new();
    let mut queue: VecDeque<Partial> = VecDeque::new();
    queue.push_back(Partial { at: src_idx, visited: vec![src_idx], steps: Vec::new() });

    while let Some(partial) = queue.pop_front() {
        if partial.steps.len() >= max_depth {
            continue;
        }
        let from_id = &graph.nodes()[partial.at].id;
        for nb in graph.neighbors(partial.at) {
            let link = &graph.links()[nb.link];
            let step = PathStep {
                from: from_id.clone(),
                to: graph.nodes()[nb.node].id.clone(),
                field: link.field.clone(),
            };
            if nb.node == dst_idx {
                let mut steps = partial.steps.clone();
                steps.push(step);
                found.push(steps);
                continue;
            }
            if partial.visited.contains(&nb.node) {
                continue;
            }
            let mut visited = partial.visited.clone();
            visited.push(nb.node);
            let mut steps = partial.steps.clone();
            steps.push(step);
            queue.push_back(Partial { at: nb.node, visited, steps });
        }
    }

    Ok(found)
}
