use crate::records::{Criticality, ProjectRecord};

/// One schema-defined category of project facts. The template is static
/// configuration: stages read it to know what "complete" means.
pub struct AreaDef {
    pub id: &'static str,
    pub label: &'static str,
    pub routing_keywords: &'static [&'static str],
}

/// Declaration order is the routing tie-break order and the order areas
/// appear in derived facts.
pub static AREA_SCHEMA: &[AreaDef] = &[
    AreaDef {
        id: "objectives",
        label: "Objectives",
        routing_keywords: &[
            "goal", "goals", "objective", "objectives", "purpose", "vision", "scope", "want",
            "open", "launch", "build", "start", "achieve",
        ],
    },
    AreaDef {
        id: "tasks",
        label: "Tasks",
        routing_keywords: &[
            "task", "tasks", "todo", "deadline", "schedule", "timeline", "milestone", "when",
            "date", "december", "depends", "dependency",
        ],
    },
    AreaDef {
        id: "budget",
        label: "Budget",
        routing_keywords: &[
            "budget", "cost", "costs", "money", "price", "spend", "spent", "funding", "dollar",
            "expensive", "cheap", "afford",
        ],
    },
    AreaDef {
        id: "people",
        label: "People",
        routing_keywords: &[
            "people", "team", "stakeholder", "stakeholders", "hire", "hiring", "staff", "member",
            "partner", "who", "contractor",
        ],
    },
];

pub fn area_ids() -> impl Iterator<Item = &'static str> {
    AREA_SCHEMA.iter().map(|a| a.id)
}

pub fn area_label(area_id: &str) -> &'static str {
    AREA_SCHEMA
        .iter()
        .find(|a| a.id == area_id)
        .map(|a| a.label)
        .unwrap_or("Unknown")
}

/// Fixed priority order baked into the domain:
/// objectives > budget > tasks > people. Domain policy, not learned.
pub fn criticality_for(area_id: &str) -> Criticality {
    match area_id {
        "objectives" => Criticality::Critical,
        "budget" => Criticality::High,
        "tasks" => Criticality::Medium,
        "people" => Criticality::Low,
        _ => Criticality::Low,
    }
}

/// Area ids in descending criticality order.
pub fn areas_by_criticality() -> Vec<&'static str> {
    let mut ids: Vec<&'static str> = area_ids().collect();
    ids.sort_by_key(|id| criticality_for(id));
    ids
}

pub fn missing_areas(project: &ProjectRecord) -> Vec<&'static str> {
    areas_by_criticality()
        .into_iter()
        .filter(|id| !project.area_filled(id))
        .collect()
}

pub fn filled_areas(project: &ProjectRecord) -> Vec<&'static str> {
    areas_by_criticality()
        .into_iter()
        .filter(|id| project.area_filled(id))
        .collect()
}

/// Lightweight keyword router over the latest message. Ties favor the
/// first-declared area; no match routes to `off_topic`.
pub fn route_message(text: &str) -> &'static str {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut best: Option<(&'static str, usize)> = None;
    for area in AREA_SCHEMA {
        let hits = area
            .routing_keywords
            .iter()
            .filter(|kw| tokens.iter().any(|t| t == *kw))
            .count();
        if hits == 0 {
            continue;
        }
        // Strictly-greater keeps the first-declared area on ties.
        if best.map_or(true, |(_, b)| hits > b) {
            best = Some((area.id, hits));
        }
    }
    best.map(|(id, _)| id).unwrap_or("off_topic")
}
