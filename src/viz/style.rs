use std::collections::HashMap;

use egui::Color32;
use once_cell::sync::Lazy;

// Distinct palette; well-known clinical resource types get stable slots and
// anything else hashes into the same palette so unknown types still render.
const PALETTE: [Color32; 12] = [
    Color32::from_rgb(0x7b, 0xa3, 0xff), // blue
    Color32::from_rgb(0xff, 0xa3, 0x7b), // orange
    Color32::from_rgb(0x7b, 0xff, 0xa3), // green
    Color32::from_rgb(0xff, 0x7b, 0xa3), // pink
    Color32::from_rgb(0xa3, 0x7b, 0xff), // violet
    Color32::from_rgb(0xff, 0xe0, 0x7b), // yellow
    Color32::from_rgb(0x7b, 0xff, 0xe0), // teal
    Color32::from_rgb(0xe0, 0x7b, 0xff), // purple
    Color32::from_rgb(0x7b, 0xe0, 0xff), // cyan
    Color32::from_rgb(0xff, 0x7b, 0xe0), // magenta
    Color32::from_rgb(0x9a, 0xcd, 0x32), // yellowgreen
    Color32::from_rgb(0xcd, 0x32, 0x9a), // fuchsia
];

static KNOWN_TYPES: Lazy<HashMap<&'static str, Color32>> = Lazy::new(|| {
    HashMap::from([
        ("Patient", PALETTE[0]),
        ("Encounter", PALETTE[1]),
        ("Observation", PALETTE[2]),
        ("Condition", PALETTE[3]),
        ("Practitioner", PALETTE[4]),
        ("MedicationRequest", PALETTE[5]),
        ("Procedure", PALETTE[6]),
        ("DiagnosticReport", PALETTE[7]),
        ("Organization", PALETTE[8]),
        ("AllergyIntolerance", PALETTE[9]),
        ("Immunization", PALETTE[10]),
        ("CarePlan", PALETTE[11]),
    ])
});

// Stable color per resource type. Pure lookup: known types from the table,
// unknown types via hashing so the fallback is deterministic too.
pub fn color_for_type(resource_type: &str) -> Color32 {
    if let Some(c) = KNOWN_TYPES.get(resource_type) {
        return *c;
    }
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    resource_type.hash(&mut hasher);
    let h = hasher.finish() as usize;
    PALETTE[h % PALETTE.len()]
}
