use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use fhirscope::graph_utils::model::LinkKind;
use fhirscope::net::discovery::{
    ConnectedResource, DiscoveryOptions, DiscoveryResponse, DiscoveryService, RawLink, RawNode,
    RawSource, RelationshipStats, ServiceError, ServiceResult,
};

// In-memory discovery backend for the demo viewer: one small clinical bundle,
// re-rooted on whatever resource the user explores. Latency is simulated so
// the request lifecycle (dedup, cancellation, spinners) behaves like it would
// against a real server.
pub struct DemoService {
    latency: Duration,
    nodes: Vec<(&'static str, &'static str)>,
    links: Vec<(&'static str, &'static str, &'static str, LinkKind)>,
}

impl Default for DemoService {
    fn default() -> Self {
        Self::new(Duration::from_millis(350))
    }
}

impl DemoService {
    pub fn new(latency: Duration) -> Self {
        let nodes = vec![
            ("Patient/pat-1001", "Amelia Zhang"),
            ("Encounter/enc-2001", "Annual physical 2025"),
            ("Encounter/enc-2002", "ED visit, chest pain"),
            ("Practitioner/prac-3001", "Dr. Okafor"),
            ("Organization/org-7001", "Lakeside Medical Center"),
            ("Observation/obs-4001", "Blood pressure 128/82"),
            ("Observation/obs-4002", "Heart rate 71 bpm"),
            ("Observation/obs-4003", "Troponin I 0.02 ng/mL"),
            ("Observation/obs-4004", "Body weight 64 kg"),
            ("Condition/cond-5001", "Essential hypertension"),
            ("Condition/cond-5002", "Atypical chest pain"),
            ("MedicationRequest/med-6001", "Lisinopril 10mg daily"),
            ("DiagnosticReport/rep-8001", "Cardiac enzyme panel"),
            ("AllergyIntolerance/alg-9001", "Penicillin allergy"),
        ];
        let links = vec![
            ("Encounter/enc-2001", "Patient/pat-1001", "subject", LinkKind::Direct),
            ("Encounter/enc-2002", "Patient/pat-1001", "subject", LinkKind::Direct),
            ("Encounter/enc-2001", "Practitioner/prac-3001", "participant", LinkKind::Direct),
            ("Encounter/enc-2002", "Organization/org-7001", "serviceProvider", LinkKind::Direct),
            ("Observation/obs-4001", "Patient/pat-1001", "subject", LinkKind::Reverse),
            ("Observation/obs-4002", "Patient/pat-1001", "subject", LinkKind::Reverse),
            ("Observation/obs-4004", "Patient/pat-1001", "subject", LinkKind::Reverse),
            ("Observation/obs-4001", "Encounter/enc-2001", "encounter", LinkKind::Direct),
            ("Observation/obs-4002", "Encounter/enc-2001", "encounter", LinkKind::Direct),
            ("Observation/obs-4003", "Encounter/enc-2002", "encounter", LinkKind::Direct),
            ("Condition/cond-5001", "Patient/pat-1001", "subject", LinkKind::Reverse),
            ("Condition/cond-5002", "Encounter/enc-2002", "encounter", LinkKind::Direct),
            ("MedicationRequest/med-6001", "Patient/pat-1001", "subject", LinkKind::Reverse),
            ("MedicationRequest/med-6001", "Condition/cond-5001", "reasonReference", LinkKind::Direct),
            ("MedicationRequest/med-6001", "Practitioner/prac-3001", "requester", LinkKind::Direct),
            ("DiagnosticReport/rep-8001", "Observation/obs-4003", "result", LinkKind::OneToMany),
            ("DiagnosticReport/rep-8001", "Encounter/enc-2002", "encounter", LinkKind::Direct),
            ("AllergyIntolerance/alg-9001", "Patient/pat-1001", "patient", LinkKind::Reverse),
            ("Practitioner/prac-3001", "Organization/org-7001", "qualification.issuer", LinkKind::Direct),
        ];
        Self { latency, nodes, links }
    }

    // Hop distances from the requested root, so depth is correct no matter
    // which resource the user explores from.
    fn depths_from(&self, root: &str) -> HashMap<&'static str, u32> {
        let mut adjacency: HashMap<&'static str, Vec<&'static str>> = HashMap::new();
        for &(source, target, _field, _kind) in &self.links {
            adjacency.entry(source).or_default().push(target);
            adjacency.entry(target).or_default().push(source);
        }
        let mut depths: HashMap<&'static str, u32> = HashMap::new();
        let Some(&(root_id, _)) = self.nodes.iter().find(|(id, _)| *id == root) else {
            return depths;
        };
        let mut queue = VecDeque::from([root_id]);
        depths.insert(root_id, 0);
        while let Some(id) = queue.pop_front() {
            let d = depths[id];
            for &next in adjacency.get(id).into_iter().flatten() {
                if !depths.contains_key(next) {
                    depths.insert(next, d + 1);
                    queue.push_back(next);
                }
            }
        }
        depths
    }
}

impl DiscoveryService for DemoService {
    fn discover(
        &self,
        resource_type: &str,
        resource_id: &str,
        opts: &DiscoveryOptions,
    ) -> ServiceResult<DiscoveryResponse> {
        std::thread::sleep(self.latency);
        let root = format!("{resource_type}/{resource_id}");
        let depths = self.depths_from(&root);
        if depths.is_empty() {
            return Err(ServiceError::Validation(format!("unknown resource {root}")));
        }

        let nodes = self
            .nodes
            .iter()
            .filter_map(|(id, display)| {
                let depth = *depths.get(id)?;
                if depth > opts.depth {
                    return None;
                }
                let (resource_type, _) = id.split_once('/')?;
                Some(RawNode {
                    id: (*id).to_string(),
                    resource_type: resource_type.to_string(),
                    display: (*display).to_string(),
                    depth,
                    last_updated: None,
                })
            })
            .collect::<Vec<_>>();
        let links = self
            .links
            .iter()
            .filter(|(s, t, _, _)| {
                let reach = |id: &str| depths.get(id).is_some_and(|d| *d <= opts.depth);
                reach(s) && reach(t)
            })
            .map(|(source, target, field, kind)| RawLink {
                source: (*source).to_string(),
                target: (*target).to_string(),
                field: (*field).to_string(),
                kind: Some(*kind),
                strength: None,
            })
            .collect();

        let display = self
            .nodes
            .iter()
            .find(|(id, _)| *id == root)
            .map(|(_, d)| (*d).to_string())
            .unwrap_or_default();
        Ok(DiscoveryResponse {
            source: RawSource {
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                display,
            },
            nodes,
            links,
        })
    }

    fn statistics(&self) -> ServiceResult<RelationshipStats> {
        std::thread::sleep(self.latency);
        let mut degree: HashMap<&str, usize> = HashMap::new();
        for &(source, target, _, _) in &self.links {
            *degree.entry(source).or_insert(0) += 1;
            *degree.entry(target).or_insert(0) += 1;
        }
        let mut ranked: Vec<(&str, usize)> = degree.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let most_connected_resources = ranked
            .into_iter()
            .take(5)
            .map(|(id, count)| ConnectedResource {
                id: id.to_string(),
                display: self
                    .nodes
                    .iter()
                    .find(|(nid, _)| *nid == id)
                    .map(|(_, d)| (*d).to_string())
                    .unwrap_or_default(),
                relationship_count: count,
            })
            .collect();
        Ok(RelationshipStats {
            total_resources: self.nodes.len(),
            total_relationships: self.links.len(),
            most_connected_resources,
        })
    }
}
