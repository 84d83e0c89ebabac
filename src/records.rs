use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names that count as "no real name yet"; naming runs until one sticks.
pub const PLACEHOLDER_NAMES: &[&str] = &["New Project", "Untitled Project", "My Project"];

pub fn is_placeholder_name(name: &str) -> bool {
    let trimmed = name.trim();
    trimmed.is_empty()
        || PLACEHOLDER_NAMES
            .iter()
            .any(|p| p.eq_ignore_ascii_case(trimmed))
}

/// The single source of truth for project facts. Written only by the
/// execution stage; every other record is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub status: String, // "draft", "active", "archived"
    #[serde(default)]
    pub areas: ProjectAreas,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectRecord {
    pub fn new_draft(project_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: project_id.to_string(),
            name: "New Project".to_string(),
            status: "draft".to_string(),
            areas: ProjectAreas::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// An area is filled iff it exists and has at least one non-empty field.
    pub fn area_filled(&self, area_id: &str) -> bool {
        match area_id {
            "objectives" => self.areas.objectives.as_ref().is_some_and(|a| a.is_filled()),
            "tasks" => self.areas.tasks.as_ref().is_some_and(|a| a.is_filled()),
            "budget" => self.areas.budget.as_ref().is_some_and(|a| a.is_filled()),
            "people" => self.areas.people.as_ref().is_some_and(|a| a.is_filled()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectAreas {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objectives: Option<ObjectivesArea>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TasksArea>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetArea>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people: Option<PeopleArea>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectivesArea {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl ObjectivesArea {
    pub fn is_filled(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.trim().is_empty())
            || !self.goals.is_empty()
            || !self.acceptance_criteria.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TasksArea {
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TasksArea {
    pub fn is_filled(&self) -> bool {
        !self.tasks.is_empty()
            || self.deadline.as_deref().is_some_and(|d| !d.trim().is_empty())
            || !self.dependencies.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetArea {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spent: Option<String>,
    #[serde(default)]
    pub line_items: Vec<String>,
}

impl BudgetArea {
    pub fn is_filled(&self) -> bool {
        self.total.as_deref().is_some_and(|t| !t.trim().is_empty())
            || self.spent.as_deref().is_some_and(|s| !s.trim().is_empty())
            || !self.line_items.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeopleArea {
    #[serde(default)]
    pub stakeholders: Vec<String>,
    #[serde(default)]
    pub team: Vec<String>,
}

impl PeopleArea {
    pub fn is_filled(&self) -> bool {
        !self.stakeholders.is_empty() || !self.team.is_empty()
    }
}

/// Rewritten wholesale each turn by self-analysis; history is append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub completeness: f64,
    #[serde(default)]
    pub known_facts: Vec<String>,
    #[serde(default)]
    pub uncertainties: Vec<String>,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub history: Vec<AnalysisSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub timestamp: DateTime<Utc>,
    pub completeness: f64,
    pub confidence: f64,
}

/// Criticality tier for a gap. The ordering between tiers is fixed domain
/// policy (see `schema::criticality_for`), not learned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    High,
    Medium,
    Low,
}

impl Criticality {
    pub fn tier_score(self) -> f64 {
        match self {
            Criticality::Critical => 1.0,
            Criticality::High => 0.75,
            Criticality::Medium => 0.5,
            Criticality::Low => 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapDescriptor {
    pub field: String,
    pub criticality: Criticality,
    pub reasoning: String,
    pub impact: String,
}

/// Rewritten wholesale each turn by gap detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GapRecord {
    #[serde(default)]
    pub gaps: Vec<GapDescriptor>,
    #[serde(default)]
    pub priority_score: f64,
    #[serde(default)]
    pub next_action: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub todos: Vec<Todo>,
}

/// UI-facing derived item. `completed` is recomputed from the project
/// record every turn, never carried over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub reason: String,
    pub priority: Criticality,
    pub action: String,
    pub is_next: bool,
    pub completed: bool,
}

pub const INTERACTION_HISTORY_CAP: usize = 50;

/// Per-user cross-project profile. Mutated additively; patterns are
/// exponentially weighted toward recent behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearningRecord {
    #[serde(default)]
    pub user_patterns: UserPatterns,
    #[serde(default)]
    pub question_effectiveness: HashMap<String, EffectivenessStat>,
    #[serde(default)]
    pub interaction_history: Vec<InteractionSample>,
}

impl LearningRecord {
    /// Bounded ring buffer: oldest sample evicted first.
    pub fn push_interaction(&mut self, sample: InteractionSample) {
        self.interaction_history.push(sample);
        while self.interaction_history.len() > INTERACTION_HISTORY_CAP {
            self.interaction_history.remove(0);
        }
    }

    pub fn record_effectiveness(&mut self, action: &str, effectiveness: f64) {
        let stat = self
            .question_effectiveness
            .entry(action.to_string())
            .or_default();
        stat.total_interactions += 1;
        stat.total_effectiveness += effectiveness;
        stat.average_effectiveness = stat.total_effectiveness / stat.total_interactions as f64;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPatterns {
    pub response_time: String,             // "quick", "moderate", "slow", "unknown"
    pub preferred_question_style: String,  // "direct", "exploratory", "balanced"
    pub engagement_level: String,          // "low", "medium", "high"
    pub communication_style: String,       // "brief", "neutral", "expressive"
    pub project_type: String,
    /// Blended scores behind the bucketed fields above (0.7 old / 0.3
    /// new), so a single turn never flips a profile.
    #[serde(default = "default_half")]
    pub engagement_score: f64,
    #[serde(default = "default_half")]
    pub question_style_score: f64,
    #[serde(default = "default_half")]
    pub communication_style_score: f64,
    /// Blended seconds between consecutive turns behind `response_time`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_gap_secs: Option<f64>,
}

fn default_half() -> f64 {
    0.5
}

impl Default for UserPatterns {
    fn default() -> Self {
        Self {
            response_time: "unknown".to_string(),
            preferred_question_style: "balanced".to_string(),
            engagement_level: "medium".to_string(),
            communication_style: "neutral".to_string(),
            project_type: "general".to_string(),
            engagement_score: 0.5,
            question_style_score: 0.5,
            communication_style_score: 0.5,
            response_gap_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EffectivenessStat {
    pub total_interactions: u32,
    pub total_effectiveness: f64,
    pub average_effectiveness: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionSample {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub confidence: f64,
    pub effectiveness: f64,
}

/// Diagnostic audit trail written by the learning stage. Never read back
/// into decision logic within a turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReflectionRecord {
    #[serde(default)]
    pub analysis_history: Vec<AnalysisSnapshot>,
    #[serde(default)]
    pub decision_log: Vec<DecisionEntry>,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: String, // "user", "assistant"
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Value>,
}

/// Append a chat entry unless an identical (role, message, session) entry
/// already exists — tolerates at-least-once delivery of the same message.
pub fn append_deduped(history: &mut Vec<ChatEntry>, entry: ChatEntry) -> bool {
    let duplicate = history.iter().any(|e| {
        e.role == entry.role && e.message == entry.message && e.session_id == entry.session_id
    });
    if duplicate {
        return false;
    }
    history.push(entry);
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Exactly one job drives exactly one pipeline run. Terminal states are
/// final; a failed job is never retried automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub job_type: String, // "send_message", "init", "analyze"
    pub project_id: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        job_type: &str,
        project_id: &str,
        user_id: &str,
        session_id: &str,
        input: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            input,
            status: JobStatus::Queued,
            progress: 0,
            message: "Queued".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Result payload stored once a job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub ai_response: String,
    pub todos: Vec<Todo>,
    pub project_data: ProjectRecord,
    pub analysis: KnowledgeRecord,
    pub chat_history: Vec<ChatEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: &str, message: &str, session: &str) -> ChatEntry {
        ChatEntry {
            role: role.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
            session_id: session.to_string(),
            analysis: None,
        }
    }

    #[test]
    fn area_filled_requires_non_empty_content() {
        let mut project = ProjectRecord::new_draft("p1");
        assert!(!project.area_filled("objectives"));

        project.areas.objectives = Some(ObjectivesArea {
            description: Some("   ".to_string()),
            ..Default::default()
        });
        assert!(!project.area_filled("objectives"));

        project.areas.objectives = Some(ObjectivesArea {
            description: Some("Open a coffee shop".to_string()),
            ..Default::default()
        });
        assert!(project.area_filled("objectives"));
    }

    #[test]
    fn chat_append_dedupes_same_role_message_session() {
        let mut history = Vec::new();
        assert!(append_deduped(&mut history, entry("user", "hi", "s1")));
        assert!(!append_deduped(&mut history, entry("user", "hi", "s1")));
        assert_eq!(history.len(), 1);

        // Same text from a different session is a new entry.
        assert!(append_deduped(&mut history, entry("user", "hi", "s2")));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn interaction_history_evicts_oldest_at_cap() {
        let mut learning = LearningRecord::default();
        for i in 0..INTERACTION_HISTORY_CAP + 5 {
            learning.push_interaction(InteractionSample {
                timestamp: Utc::now(),
                action: format!("a{}", i),
                confidence: 0.5,
                effectiveness: 0.5,
            });
        }
        assert_eq!(learning.interaction_history.len(), INTERACTION_HISTORY_CAP);
        assert_eq!(learning.interaction_history[0].action, "a5");
    }

    #[test]
    fn effectiveness_running_average() {
        let mut learning = LearningRecord::default();
        learning.record_effectiveness("collect_budget", 0.4);
        learning.record_effectiveness("collect_budget", 0.8);
        let stat = &learning.question_effectiveness["collect_budget"];
        assert_eq!(stat.total_interactions, 2);
        assert!((stat.average_effectiveness - 0.6).abs() < 1e-9);
    }

    #[test]
    fn placeholder_names_detected() {
        assert!(is_placeholder_name("New Project"));
        assert!(is_placeholder_name("  untitled project "));
        assert!(is_placeholder_name(""));
        assert!(!is_placeholder_name("Austin Coffee Shop"));
    }
}
