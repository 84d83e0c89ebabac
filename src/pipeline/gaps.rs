//! Gap detection stage: converts missing/weak areas into a prioritized
//! gap list, a derived todo list, and a single recommended next action.

use serde_json::json;
use tracing::{debug, warn};

use crate::classifier::{resolve_with_fallback, IntentClassifier, LowConfidence};
use crate::records::{Criticality, GapDescriptor, GapRecord, KnowledgeRecord, ProjectRecord, Todo};
use crate::router::{Router, Tier};
use crate::schema;
use crate::traits::ModelProvider;
use crate::utils::extract_json_object;

/// Gap/action framing call site.
const FRAMING_THRESHOLD: f64 = 0.8;

/// Per-rank decay applied to tier scores when computing the priority score.
const RANK_DECAY: f64 = 0.9;

pub async fn detect(
    classifier: &IntentClassifier,
    provider: &dyn ModelProvider,
    router: &Router,
    project: &ProjectRecord,
    analysis: &KnowledgeRecord,
) -> GapRecord {
    let features = feature_string(project, analysis.completeness);
    debug!(features = %features, "Gap detection features");

    let primary = classifier
        .classify_gated(&features, FRAMING_THRESHOLD)
        .and_then(|result| {
            gaps_from_intent(&result.intent, project).ok_or(LowConfidence {
                intent: result.intent,
                confidence: result.confidence,
            })
        });

    let gaps = resolve_with_fallback(primary, |low| async {
        if let Some(low) = low {
            debug!(
                intent = %low.intent,
                confidence = low.confidence,
                "Gap framing below threshold, taking fallback path"
            );
        }
        match llm_gaps(provider, router, project, analysis).await {
            Some(gaps) => gaps,
            None => deterministic_gaps(project),
        }
    })
    .await;

    finalize(gaps, project)
}

/// Compact feature string fed to the classifier: missing/complete area
/// names plus a coarse completeness bucket.
fn feature_string(project: &ProjectRecord, completeness: f64) -> String {
    let missing = schema::missing_areas(project);
    if missing.is_empty() {
        return "complete all areas".to_string();
    }
    let bucket = if completeness <= 0.0 {
        "incomplete"
    } else if completeness >= 1.0 {
        "complete"
    } else {
        "partial"
    };
    format!("missing {} {}", missing.join(" "), bucket)
}

/// Fixed gap templates keyed by classifier intent.
fn gaps_from_intent(intent: &str, project: &ProjectRecord) -> Option<Vec<GapDescriptor>> {
    let missing = deterministic_gaps(project);
    match intent {
        "gaps.all_complete" => Some(Vec::new()),
        "gaps.single_critical" | "gaps.single_high" | "gaps.single_medium" | "gaps.single_low" => {
            Some(missing.into_iter().take(1).collect())
        }
        "gaps.multiple" => Some(missing),
        _ => None,
    }
}

/// Deterministic fallback: criticality assigned by the fixed domain order.
fn deterministic_gaps(project: &ProjectRecord) -> Vec<GapDescriptor> {
    schema::missing_areas(project)
        .into_iter()
        .map(|area| GapDescriptor {
            field: area.to_string(),
            criticality: schema::criticality_for(area),
            reasoning: format!("The {} area has no content yet", schema::area_label(area)),
            impact: impact_for(area).to_string(),
        })
        .collect()
}

fn impact_for(area: &str) -> &'static str {
    match area {
        "objectives" => "Without objectives, nothing else can be prioritized",
        "budget" => "Unknown budget makes every decision risky",
        "tasks" => "No task list means no visible path to completion",
        "people" => "Unclear ownership slows everything down",
        _ => "Unknown impact",
    }
}

async fn llm_gaps(
    provider: &dyn ModelProvider,
    router: &Router,
    project: &ProjectRecord,
    analysis: &KnowledgeRecord,
) -> Option<Vec<GapDescriptor>> {
    let prompt = format!(
        "Project data:\n{}\n\nAnalysis:\n{}\n\nMissing areas: {:?}\n\n\
         Return a JSON object: {{\"gaps\": [{{\"field\": \"...\", \"criticality\": \
         \"critical|high|medium|low\", \"reasoning\": \"...\", \"impact\": \"...\"}}]}} \
         with gaps ordered most critical first.",
        serde_json::to_string_pretty(project).unwrap_or_default(),
        json!({
            "completeness": analysis.completeness,
            "confidence": analysis.confidence,
            "uncertainties": analysis.uncertainties,
        }),
        analysis.missing_fields,
    );

    let response = match provider
        .complete(
            router.select(Tier::Fast),
            "You analyze project-management data and report gaps as strict JSON.",
            &prompt,
        )
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Gap detection LLM call failed, using deterministic fallback");
            return None;
        }
    };

    let value = extract_json_object(&response)?;
    let raw_gaps = value.get("gaps")?.as_array()?.clone();

    let mut gaps = Vec::new();
    for raw in raw_gaps {
        let field = raw.get("field")?.as_str()?.to_string();
        // Only accept schema areas that are actually missing.
        if !schema::area_ids().any(|id| id == field) || project.area_filled(&field) {
            continue;
        }
        if gaps.iter().any(|g: &GapDescriptor| g.field == field) {
            continue;
        }
        let criticality = match raw.get("criticality").and_then(|c| c.as_str()) {
            Some("critical") => Criticality::Critical,
            Some("high") => Criticality::High,
            Some("medium") => Criticality::Medium,
            Some("low") => Criticality::Low,
            _ => schema::criticality_for(&field),
        };
        gaps.push(GapDescriptor {
            reasoning: raw
                .get("reasoning")
                .and_then(|r| r.as_str())
                .unwrap_or("Identified as missing")
                .to_string(),
            impact: raw
                .get("impact")
                .and_then(|i| i.as_str())
                .unwrap_or_else(|| impact_for(&field))
                .to_string(),
            field,
            criticality,
        });
    }
    if gaps.is_empty() && !schema::missing_areas(project).is_empty() {
        // The model returned nothing usable for a project with real gaps.
        return None;
    }
    Some(gaps)
}

/// Weighted priority score: each gap contributes its tier score decayed
/// 10% per rank position, clamped to 1.0.
fn priority_score(gaps: &[GapDescriptor]) -> f64 {
    let score: f64 = gaps
        .iter()
        .enumerate()
        .map(|(rank, gap)| gap.criticality.tier_score() * RANK_DECAY.powi(rank as i32))
        .sum();
    score.min(1.0)
}

pub fn action_for(area: &str) -> String {
    format!("collect_{}", area)
}

fn todo_title(area: &str) -> &'static str {
    match area {
        "objectives" => "Define the project objectives",
        "budget" => "Set the budget",
        "tasks" => "Plan tasks and timeline",
        "people" => "Identify stakeholders and team",
        _ => "Review this area",
    }
}

fn finalize(gaps: Vec<GapDescriptor>, project: &ProjectRecord) -> GapRecord {
    let next_action = gaps
        .first()
        .map(|g| action_for(&g.field))
        .unwrap_or_else(|| "summarize".to_string());
    let reasoning = gaps
        .first()
        .map(|g| g.reasoning.clone())
        .unwrap_or_else(|| "All areas are filled".to_string());

    // Todos are rebuilt every turn for all areas; `completed` is computed
    // fresh from the project record, never carried over.
    let todos: Vec<Todo> = schema::areas_by_criticality()
        .into_iter()
        .map(|area| {
            let action = action_for(area);
            Todo {
                id: area.to_string(),
                title: todo_title(area).to_string(),
                reason: gaps
                    .iter()
                    .find(|g| g.field == area)
                    .map(|g| g.reasoning.clone())
                    .unwrap_or_else(|| "Already captured".to_string()),
                priority: schema::criticality_for(area),
                is_next: action == next_action,
                completed: project.area_filled(area),
                action,
            }
        })
        .collect();

    GapRecord {
        priority_score: priority_score(&gaps),
        next_action,
        reasoning,
        gaps,
        todos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BudgetArea, ObjectivesArea, PeopleArea, TasksArea};

    fn trained() -> IntentClassifier {
        let mut c = IntentClassifier::new();
        c.train_default();
        c
    }

    /// Provider stub that always fails: forces the deterministic path
    /// whenever the classifier gate does not clear.
    struct FailingProvider;

    #[async_trait::async_trait]
    impl ModelProvider for FailingProvider {
        async fn complete(&self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("unreachable provider")
        }
    }

    /// Provider stub returning a fixed body.
    struct CannedProvider(String);

    #[async_trait::async_trait]
    impl ModelProvider for CannedProvider {
        async fn complete(&self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    fn router() -> Router {
        Router::new(crate::config::ModelsConfig::default())
    }

    fn filled_objectives() -> Option<ObjectivesArea> {
        Some(ObjectivesArea {
            description: Some("Open a coffee shop".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn criticality_ordering_objectives_over_people() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.budget = Some(BudgetArea {
            total: Some("$30k".to_string()),
            ..Default::default()
        });
        project.areas.tasks = Some(TasksArea {
            deadline: Some("December".to_string()),
            ..Default::default()
        });
        // Missing: objectives and people only.

        let record = detect(
            &trained(),
            &FailingProvider,
            &router(),
            &project,
            &KnowledgeRecord {
                completeness: 0.5,
                ..Default::default()
            },
        )
        .await;

        let fields: Vec<&str> = record.gaps.iter().map(|g| g.field.as_str()).collect();
        assert_eq!(fields, vec!["objectives", "people"]);
        assert_eq!(record.next_action, "collect_objectives");
    }

    #[tokio::test]
    async fn todos_completed_recomputed_from_project() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.objectives = filled_objectives();
        project.areas.budget = Some(BudgetArea {
            total: Some("$30k".to_string()),
            ..Default::default()
        });

        let record = detect(
            &trained(),
            &FailingProvider,
            &router(),
            &project,
            &KnowledgeRecord {
                completeness: 0.5,
                ..Default::default()
            },
        )
        .await;

        let by_id = |id: &str| record.todos.iter().find(|t| t.id == id).unwrap();
        assert!(by_id("objectives").completed);
        assert!(by_id("budget").completed);
        assert!(!by_id("tasks").completed);
        assert!(!by_id("people").completed);

        let next_count = record.todos.iter().filter(|t| t.is_next).count();
        assert_eq!(next_count, 1);
        assert!(record
            .todos
            .iter()
            .find(|t| t.is_next)
            .is_some_and(|t| t.action == record.next_action));
    }

    #[tokio::test]
    async fn all_complete_yields_no_gaps() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.objectives = filled_objectives();
        project.areas.budget = Some(BudgetArea {
            total: Some("$30k".to_string()),
            ..Default::default()
        });
        project.areas.tasks = Some(TasksArea {
            tasks: vec!["find location".to_string()],
            ..Default::default()
        });
        project.areas.people = Some(PeopleArea {
            team: vec!["me".to_string()],
            ..Default::default()
        });

        let record = detect(
            &trained(),
            &FailingProvider,
            &router(),
            &project,
            &KnowledgeRecord {
                completeness: 1.0,
                ..Default::default()
            },
        )
        .await;

        assert!(record.gaps.is_empty());
        assert_eq!(record.next_action, "summarize");
        assert!(record.todos.iter().all(|t| t.completed));
    }

    #[tokio::test]
    async fn priority_score_decays_by_rank() {
        let project = ProjectRecord::new_draft("p1");
        let record = detect(
            &trained(),
            &FailingProvider,
            &router(),
            &project,
            &KnowledgeRecord::default(),
        )
        .await;
        // 1.0 + 0.75*0.9 + 0.5*0.81 + 0.25*0.729 > 1.0, clamped.
        assert!((record.priority_score - 1.0).abs() < 1e-9);
        assert_eq!(record.gaps.len(), 4);
    }

    #[tokio::test]
    async fn malformed_llm_json_falls_back_deterministically() {
        // An untrained classifier forces the LLM path; garbage output then
        // lands on the deterministic fallback.
        let classifier = IntentClassifier::new();
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.budget = Some(BudgetArea {
            total: Some("$5k".to_string()),
            ..Default::default()
        });

        let record = detect(
            &classifier,
            &CannedProvider("definitely not json".to_string()),
            &router(),
            &project,
            &KnowledgeRecord {
                completeness: 0.25,
                ..Default::default()
            },
        )
        .await;

        let fields: Vec<&str> = record.gaps.iter().map(|g| g.field.as_str()).collect();
        assert_eq!(fields, vec!["objectives", "tasks", "people"]);
    }

    #[tokio::test]
    async fn llm_gaps_accepted_when_valid() {
        let classifier = IntentClassifier::new();
        let project = ProjectRecord::new_draft("p1");
        let body = r#"```json
{"gaps": [
  {"field": "objectives", "criticality": "critical", "reasoning": "no scope", "impact": "blocks all"},
  {"field": "nonsense", "criticality": "high", "reasoning": "x", "impact": "y"},
  {"field": "people", "criticality": "low", "reasoning": "no team", "impact": "slow"}
]}
```"#;
        let record = detect(
            &classifier,
            &CannedProvider(body.to_string()),
            &router(),
            &project,
            &KnowledgeRecord::default(),
        )
        .await;

        let fields: Vec<&str> = record.gaps.iter().map(|g| g.field.as_str()).collect();
        assert_eq!(fields, vec!["objectives", "people"]);
        assert_eq!(record.gaps[0].reasoning, "no scope");
    }

    #[test]
    fn feature_string_buckets() {
        let project = ProjectRecord::new_draft("p1");
        assert_eq!(
            feature_string(&project, 0.0),
            "missing objectives budget tasks people incomplete"
        );
        let mut partial = ProjectRecord::new_draft("p1");
        partial.areas.objectives = filled_objectives();
        assert_eq!(
            feature_string(&partial, 0.25),
            "missing budget tasks people partial"
        );
    }
}
