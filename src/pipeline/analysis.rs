//! Self-analysis stage: deterministic completeness/confidence of current
//! project knowledge against the fixed area schema. Never AI-estimated —
//! every output here is derived by direct field inspection.

use chrono::Utc;

use crate::pipeline::context::{Complexity, ConversationContext, Engagement};
use crate::records::{AnalysisSnapshot, ChatEntry, KnowledgeRecord, ProjectRecord};
use crate::schema;

/// Cap on the append-only analysis history kept in the record.
const ANALYSIS_HISTORY_CAP: usize = 100;

pub struct AnalysisOutput {
    pub knowledge: KnowledgeRecord,
    /// Keyword-routing target for the latest user message
    /// (an area id, or "off_topic").
    pub routed_area: &'static str,
}

pub fn analyze(
    project: &ProjectRecord,
    history: &[ChatEntry],
    prior: &KnowledgeRecord,
    context: &ConversationContext,
) -> AnalysisOutput {
    let total_areas = schema::AREA_SCHEMA.len();
    let filled = schema::filled_areas(project);
    let completeness = filled.len() as f64 / total_areas as f64;

    let mut confidence = completeness * 0.4;

    let mut known_facts = Vec::new();
    let mut uncertainties = Vec::new();

    if let Some(objectives) = &project.areas.objectives {
        if let Some(description) = objectives.description.as_deref().filter(|d| !d.trim().is_empty())
        {
            known_facts.push(format!("Objectives: {}", description));
        }
        if !objectives.goals.is_empty() {
            known_facts.push(format!("Goals: {}", objectives.goals.join("; ")));
        }
        if objectives.is_filled() {
            confidence += 0.15;
        }
    }
    if !project.area_filled("objectives") {
        uncertainties.push("Project objectives have not been described yet".to_string());
    }

    if let Some(tasks) = &project.areas.tasks {
        if let Some(deadline) = tasks.deadline.as_deref().filter(|d| !d.trim().is_empty()) {
            known_facts.push(format!("Deadline: {}", deadline));
        }
        if !tasks.tasks.is_empty() {
            known_facts.push(format!("Tasks tracked: {}", tasks.tasks.len()));
        }
        if tasks.deadline.as_deref().is_some_and(|d| !d.trim().is_empty())
            || !tasks.tasks.is_empty()
        {
            confidence += 0.15;
        }
    }
    if !project.area_filled("tasks") {
        uncertainties.push("No tasks or timeline recorded yet".to_string());
    }

    if let Some(budget) = &project.areas.budget {
        if let Some(total) = budget.total.as_deref().filter(|t| !t.trim().is_empty()) {
            known_facts.push(format!("Budget total: {}", total));
        }
        if let Some(spent) = budget.spent.as_deref().filter(|s| !s.trim().is_empty()) {
            known_facts.push(format!("Budget spent: {}", spent));
        }
        if budget.total.as_deref().is_some_and(|t| !t.trim().is_empty())
            || budget.spent.as_deref().is_some_and(|s| !s.trim().is_empty())
        {
            confidence += 0.10;
        }
    }
    if !project.area_filled("budget") {
        uncertainties.push("No budget recorded yet".to_string());
    }

    if let Some(people) = &project.areas.people {
        if !people.stakeholders.is_empty() {
            known_facts.push(format!("Stakeholders: {}", people.stakeholders.join(", ")));
        }
        if !people.team.is_empty() {
            known_facts.push(format!("Team: {}", people.team.join(", ")));
        }
        if people.is_filled() {
            confidence += 0.10;
        }
    }
    if !project.area_filled("people") {
        uncertainties.push("Stakeholders and team are unknown".to_string());
    }

    if context.complexity == Complexity::High {
        confidence *= 0.9;
    }
    if context.engagement == Engagement::High {
        confidence += 0.05;
    }
    let confidence = confidence.clamp(0.0, 1.0);

    let missing_fields: Vec<String> = schema::missing_areas(project)
        .into_iter()
        .map(String::from)
        .collect();

    let mut history_entries = prior.history.clone();
    history_entries.push(AnalysisSnapshot {
        timestamp: Utc::now(),
        completeness,
        confidence,
    });
    while history_entries.len() > ANALYSIS_HISTORY_CAP {
        history_entries.remove(0);
    }

    let latest_user_message = history
        .iter()
        .rev()
        .find(|e| e.role == "user")
        .map(|e| e.message.as_str())
        .unwrap_or("");
    let routed_area = schema::route_message(latest_user_message);

    AnalysisOutput {
        knowledge: KnowledgeRecord {
            confidence,
            completeness,
            known_facts,
            uncertainties,
            missing_fields,
            history: history_entries,
        },
        routed_area,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::{ConversationStage, ResponsePattern};
    use crate::records::{BudgetArea, ObjectivesArea};

    fn ctx() -> ConversationContext {
        ConversationContext {
            stage: ConversationStage::Initial,
            engagement: Engagement::Medium,
            response_pattern: ResponsePattern {
                detailed: false,
                questioning: false,
            },
            complexity: Complexity::Normal,
        }
    }

    fn high_engagement_ctx() -> ConversationContext {
        ConversationContext {
            engagement: Engagement::High,
            ..ctx()
        }
    }

    #[test]
    fn completeness_is_filled_over_total() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.objectives = Some(ObjectivesArea {
            description: Some("Open a coffee shop".to_string()),
            ..Default::default()
        });
        project.areas.budget = Some(BudgetArea {
            total: Some("$30k".to_string()),
            ..Default::default()
        });

        let out = analyze(&project, &[], &KnowledgeRecord::default(), &ctx());
        assert!((out.knowledge.completeness - 0.5).abs() < 1e-9);
        assert_eq!(out.knowledge.missing_fields, vec!["tasks", "people"]);
    }

    #[test]
    fn confidence_formula_with_boosts() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.objectives = Some(ObjectivesArea {
            description: Some("Open a coffee shop".to_string()),
            ..Default::default()
        });
        project.areas.budget = Some(BudgetArea {
            total: Some("$30k".to_string()),
            ..Default::default()
        });

        // 0.5 * 0.4 + 0.15 (objectives) + 0.10 (budget) = 0.45
        let out = analyze(&project, &[], &KnowledgeRecord::default(), &ctx());
        assert!((out.knowledge.confidence - 0.45).abs() < 1e-9);

        // High engagement adds 0.05.
        let out = analyze(
            &project,
            &[],
            &KnowledgeRecord::default(),
            &high_engagement_ctx(),
        );
        assert!((out.knowledge.confidence - 0.50).abs() < 1e-9);
    }

    #[test]
    fn high_complexity_scales_down() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.objectives = Some(ObjectivesArea {
            description: Some("desc".to_string()),
            ..Default::default()
        });
        let complex = ConversationContext {
            complexity: Complexity::High,
            ..ctx()
        };
        // 0.25 * 0.4 + 0.15 = 0.25, then * 0.9 = 0.225
        let out = analyze(&project, &[], &KnowledgeRecord::default(), &complex);
        assert!((out.knowledge.confidence - 0.225).abs() < 1e-9);
    }

    #[test]
    fn facts_and_uncertainties_from_field_inspection() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.budget = Some(BudgetArea {
            total: Some("$30k".to_string()),
            ..Default::default()
        });
        let out = analyze(&project, &[], &KnowledgeRecord::default(), &ctx());
        assert!(out
            .knowledge
            .known_facts
            .iter()
            .any(|f| f.contains("$30k")));
        assert!(out
            .knowledge
            .uncertainties
            .iter()
            .any(|u| u.contains("objectives")));
    }

    #[test]
    fn analysis_history_appends() {
        let project = ProjectRecord::new_draft("p1");
        let first = analyze(&project, &[], &KnowledgeRecord::default(), &ctx());
        let second = analyze(&project, &[], &first.knowledge, &ctx());
        assert_eq!(second.knowledge.history.len(), 2);
    }

    #[test]
    fn latest_user_message_routes() {
        let project = ProjectRecord::new_draft("p1");
        let history = vec![ChatEntry {
            role: "user".to_string(),
            message: "how much money can we spend on the budget".to_string(),
            timestamp: Utc::now(),
            session_id: "s1".to_string(),
            analysis: None,
        }];
        let out = analyze(&project, &history, &KnowledgeRecord::default(), &ctx());
        assert_eq!(out.routed_area, "budget");
    }
}
