//! Execution stage: the only writer of the project record. Extracts facts
//! from the user message, merges them additively, runs the naming check,
//! and produces the assistant response.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classifier::{ClassifierResult, IntentClassifier};
use crate::pipeline::planning::ActionPlan;
use crate::records::{
    is_placeholder_name, BudgetArea, KnowledgeRecord, ObjectivesArea, PeopleArea, ProjectRecord,
    TasksArea,
};
use crate::router::{Router, Tier};
use crate::sentiment::VerbosityBand;
use crate::traits::ModelProvider;
use crate::utils::{extract_json_object, truncate_str};

/// Structured extraction call site.
const EXTRACTION_THRESHOLD: f64 = 0.9;
/// Canned-answer call site for conversational intents.
const ANSWER_THRESHOLD: f64 = 0.7;

const MAX_NAME_LEN: usize = 50;
const MAX_DESCRIPTION_LEN: usize = 300;

/// Phases a turn moves through inside this stage, in order. Recorded for
/// the audit trail; the merge outcome forks the middle of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    AwaitingInput,
    Extracting,
    MergeSuccess,
    MergeSkipped,
    NameCheck,
    ResponseReady,
}

impl TurnPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnPhase::AwaitingInput => "awaiting_input",
            TurnPhase::Extracting => "extracting",
            TurnPhase::MergeSuccess => "merge_success",
            TurnPhase::MergeSkipped => "merge_skipped",
            TurnPhase::NameCheck => "name_check",
            TurnPhase::ResponseReady => "response_ready",
        }
    }
}

pub struct ExecutionOutput {
    pub response: String,
    pub merged: bool,
    pub phases: Vec<TurnPhase>,
}

/// Business-type keyword → project name. First match wins; the naming
/// check repeats each turn until a non-placeholder name sticks.
const NAMING_PATTERNS: &[(&str, &str)] = &[
    ("coffee", "Coffee Shop"),
    ("bakery", "Bakery"),
    ("food truck", "Food Truck"),
    ("restaurant", "Restaurant"),
    ("app", "App Launch"),
    ("website", "Website Build"),
    ("store", "Retail Store"),
    ("wedding", "Wedding Plan"),
    ("course", "Online Course"),
];

static LOCATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bin ([a-z]+)\b").unwrap());

/// Words after "in" that are not places.
const LOCATION_STOPWORDS: &[&str] = &[
    "the", "a", "my", "our", "this", "time", "order", "general", "fact", "case",
];

fn valid_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed.len() <= MAX_NAME_LEN && !is_placeholder_name(trimmed)
}

fn title_case(raw: &str) -> String {
    raw.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn location_of(lowered: &str) -> Option<String> {
    let caps = LOCATION_RE.captures(lowered)?;
    let raw = caps.get(1)?.as_str();
    if LOCATION_STOPWORDS.contains(&raw) {
        return None;
    }
    Some(title_case(raw))
}

fn derive_name(description: &str) -> Option<String> {
    let lowered = description.to_lowercase();
    let base = NAMING_PATTERNS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, name)| *name)?;
    let name = match location_of(&lowered) {
        Some(location) => format!("{} {}", location, base),
        None => base.to_string(),
    };
    Some(name).filter(|n| valid_name(n))
}

#[allow(clippy::too_many_arguments)]
pub async fn execute(
    classifier: &IntentClassifier,
    provider: &dyn ModelProvider,
    router: &Router,
    project: &mut ProjectRecord,
    plan: &ActionPlan,
    analysis: &KnowledgeRecord,
    verbosity: VerbosityBand,
    message: &str,
    routed_area: &str,
) -> ExecutionOutput {
    let mut phases = vec![TurnPhase::AwaitingInput, TurnPhase::Extracting];

    let classified = classifier.process(message).ok();
    let strong_intent = classified
        .as_ref()
        .filter(|r| r.confidence >= EXTRACTION_THRESHOLD)
        .map(|r| r.intent.as_str());
    let entities: Vec<String> = classified
        .as_ref()
        .map(|r| r.entities.clone())
        .unwrap_or_default();
    let canned = canned_answer(classified.as_ref());
    let name_requested = classified
        .as_ref()
        .is_some_and(|r| r.intent == "project.name_generate" && r.confidence >= ANSWER_THRESHOLD);

    let mut merged = merge_extracted(project, message, routed_area, strong_intent, &entities);

    // Below the extraction gate with nothing matched deterministically:
    // one combined LLM call extracts and answers at once.
    let mut response = canned.clone();
    if response.is_none() && !name_requested && !merged {
        if let Some((facts, reply)) =
            llm_extract_and_respond(provider, router, project, plan, analysis, verbosity, message)
                .await
        {
            merged |= merge_facts(project, &facts);
            response = Some(reply);
        } else {
            response = Some(fallback_response(plan, merged));
        }
    }

    if merged {
        project.updated_at = chrono::Utc::now();
        phases.push(TurnPhase::MergeSuccess);
        info!(project_id = %project.id, "Merged extracted facts into project record");
    } else {
        phases.push(TurnPhase::MergeSkipped);
        debug!(project_id = %project.id, "No new facts extracted this turn");
    }

    phases.push(TurnPhase::NameCheck);
    if (merged || name_requested) && is_placeholder_name(&project.name) {
        if let Some(name) = name_project(provider, router, project).await {
            info!(project_id = %project.id, name = %name, "Project named");
            project.name = name;
        }
    }
    if name_requested {
        response = Some(if is_placeholder_name(&project.name) {
            canned.unwrap_or_else(|| {
                "Tell me a bit about the project first and I'll suggest a name.".to_string()
            })
        } else {
            format!("How about calling it \"{}\"?", project.name)
        });
    }

    let response = match response {
        Some(text) => text,
        None => {
            respond(provider, router, project, plan, analysis, verbosity, message, merged).await
        }
    };
    phases.push(TurnPhase::ResponseReady);

    ExecutionOutput {
        response,
        merged,
        phases,
    }
}

fn canned_answer(classified: Option<&ClassifierResult>) -> Option<String> {
    let result = classified?;
    let conversational =
        result.intent.starts_with("chat.") || result.intent == "project.name_generate";
    if conversational && result.confidence >= ANSWER_THRESHOLD && !result.answer.is_empty() {
        return Some(result.answer.clone());
    }
    None
}

/// Additive merge: fills empty fields and appends to lists, never clears
/// or overwrites an existing value.
fn merge_extracted(
    project: &mut ProjectRecord,
    message: &str,
    routed_area: &str,
    strong_intent: Option<&str>,
    entities: &[String],
) -> bool {
    let mut merged = false;
    let trimmed = message.trim();

    let money = entities.iter().find(|e| e.contains('$') || e.ends_with('k'));
    let month = entities
        .iter()
        .find(|e| !e.contains('$') && !e.chars().next().is_some_and(|c| c.is_ascii_digit()));

    let wants_budget = strong_intent == Some("budget.set") || routed_area == "budget";
    if let Some(amount) = money.filter(|_| wants_budget || strong_intent.is_none()) {
        merged |= set_budget_total(project, amount);
    }

    let wants_deadline = strong_intent == Some("deadline.set") || routed_area == "tasks";
    if let Some(when) = month.filter(|_| wants_deadline || strong_intent.is_none()) {
        merged |= set_deadline(project, when);
    }

    if strong_intent == Some("scope.define") || routed_area == "objectives" {
        merged |= set_objective(project, trimmed);
    }

    if strong_intent == Some("people.add") || routed_area == "people" {
        merged |= add_person(project, trimmed);
    }

    if strong_intent == Some("task.add")
        || (routed_area == "tasks" && month.is_none() && !trimmed.is_empty())
    {
        merged |= add_task(project, trimmed);
    }

    merged
}

fn set_budget_total(project: &mut ProjectRecord, amount: &str) -> bool {
    let budget = project.areas.budget.get_or_insert_with(BudgetArea::default);
    if budget.total.as_deref().map_or(true, |t| t.trim().is_empty()) && !amount.trim().is_empty() {
        budget.total = Some(amount.trim().to_string());
        return true;
    }
    false
}

fn set_deadline(project: &mut ProjectRecord, when: &str) -> bool {
    let tasks = project.areas.tasks.get_or_insert_with(TasksArea::default);
    if tasks.deadline.as_deref().map_or(true, |d| d.trim().is_empty()) && !when.trim().is_empty() {
        tasks.deadline = Some(when.trim().to_string());
        return true;
    }
    false
}

fn set_objective(project: &mut ProjectRecord, text: &str) -> bool {
    let objectives = project
        .areas
        .objectives
        .get_or_insert_with(ObjectivesArea::default);
    if objectives
        .description
        .as_deref()
        .map_or(true, |d| d.trim().is_empty())
        && !text.trim().is_empty()
    {
        objectives.description = Some(truncate_str(text.trim(), MAX_DESCRIPTION_LEN));
        return true;
    }
    false
}

fn add_person(project: &mut ProjectRecord, entry: &str) -> bool {
    let trimmed = entry.trim();
    if trimmed.is_empty() {
        return false;
    }
    let people = project.areas.people.get_or_insert_with(PeopleArea::default);
    if people.team.iter().any(|t| t == trimmed) {
        return false;
    }
    people.team.push(trimmed.to_string());
    true
}

fn add_task(project: &mut ProjectRecord, entry: &str) -> bool {
    let trimmed = entry.trim();
    if trimmed.is_empty() {
        return false;
    }
    let tasks = project.areas.tasks.get_or_insert_with(TasksArea::default);
    if tasks.tasks.iter().any(|t| t == trimmed) {
        return false;
    }
    tasks.tasks.push(trimmed.to_string());
    true
}

/// Apply a facts object from the combined extraction call. Same additive
/// rules as the deterministic merge.
fn merge_facts(project: &mut ProjectRecord, facts: &Value) -> bool {
    let mut merged = false;

    if let Some(total) = facts.get("budget_total").and_then(|v| v.as_str()) {
        merged |= set_budget_total(project, total);
    }
    if let Some(deadline) = facts.get("deadline").and_then(|v| v.as_str()) {
        merged |= set_deadline(project, deadline);
    }
    if let Some(objective) = facts.get("objective").and_then(|v| v.as_str()) {
        merged |= set_objective(project, objective);
    }
    if let Some(people) = facts.get("people").and_then(|v| v.as_array()) {
        for person in people.iter().filter_map(|p| p.as_str()) {
            merged |= add_person(project, person);
        }
    }
    if let Some(tasks) = facts.get("tasks").and_then(|v| v.as_array()) {
        for task in tasks.iter().filter_map(|t| t.as_str()) {
            merged |= add_task(project, task);
        }
    }
    merged
}

/// Pattern table first, LLM second. Either way the result must pass
/// validation or the placeholder stays for another round.
async fn name_project(
    provider: &dyn ModelProvider,
    router: &Router,
    project: &ProjectRecord,
) -> Option<String> {
    let description = project
        .areas
        .objectives
        .as_ref()
        .and_then(|o| o.description.as_deref())?;

    if let Some(name) = derive_name(description) {
        return Some(name);
    }

    let prompt = format!(
        "Suggest a short, concrete name (under {} characters, no quotes) for this project: {}",
        MAX_NAME_LEN, description
    );
    match provider
        .complete(
            router.select(Tier::Fast),
            "You name projects. Reply with the name only.",
            &prompt,
        )
        .await
    {
        Ok(raw) => {
            let candidate = raw.trim().trim_matches('"').trim().to_string();
            if valid_name(&candidate) {
                Some(candidate)
            } else {
                warn!(candidate = %candidate, "Rejected generated project name");
                None
            }
        }
        Err(e) => {
            warn!(error = %e, "Project naming call failed, keeping placeholder");
            None
        }
    }
}

/// Combined extraction + response generation in one call, used when the
/// local paths matched nothing.
async fn llm_extract_and_respond(
    provider: &dyn ModelProvider,
    router: &Router,
    project: &ProjectRecord,
    plan: &ActionPlan,
    analysis: &KnowledgeRecord,
    verbosity: VerbosityBand,
    message: &str,
) -> Option<(Value, String)> {
    let prompt = format!(
        "Project: {} (status {}).\n\
         Known facts: {:?}\n\
         Still missing: {:?}\n\
         User said: {}\n\n\
         Extract any new project facts and reply to the user. {} End your \
         reply by asking: {}\n\
         Return JSON: {{\"reply\": \"...\", \"facts\": {{\"budget_total\": \
         string or null, \"deadline\": string or null, \"objective\": string \
         or null, \"people\": [strings], \"tasks\": [strings]}}}}",
        project.name,
        project.status,
        analysis.known_facts,
        analysis.missing_fields,
        message,
        verbosity.instruction(),
        plan.question,
    );

    let body = match provider
        .complete(
            router.select(Tier::Primary),
            "You are a friendly, focused project-management assistant. \
             Reply with strict JSON only.",
            &prompt,
        )
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Combined extraction call failed, using template response");
            return None;
        }
    };

    let value = extract_json_object(&body)?;
    let reply = value.get("reply")?.as_str()?.trim().to_string();
    if reply.is_empty() {
        return None;
    }
    let facts = value.get("facts").cloned().unwrap_or(Value::Null);
    Some((facts, reply))
}

#[allow(clippy::too_many_arguments)]
async fn respond(
    provider: &dyn ModelProvider,
    router: &Router,
    project: &ProjectRecord,
    plan: &ActionPlan,
    analysis: &KnowledgeRecord,
    verbosity: VerbosityBand,
    message: &str,
    merged: bool,
) -> String {
    let prompt = format!(
        "Project: {} (status {}).\n\
         Known facts: {:?}\n\
         Still missing: {:?}\n\
         User said: {}\n\n\
         {} Acknowledge what the user told you, then ask exactly this question: {}",
        project.name,
        project.status,
        analysis.known_facts,
        analysis.missing_fields,
        message,
        verbosity.instruction(),
        plan.question,
    );

    match provider
        .complete(
            router.select(Tier::Primary),
            "You are a friendly, focused project-management assistant.",
            &prompt,
        )
        .await
    {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        Ok(_) => fallback_response(plan, merged),
        Err(e) => {
            warn!(error = %e, "Response generation failed, using template");
            fallback_response(plan, merged)
        }
    }
}

fn fallback_response(plan: &ActionPlan, merged: bool) -> String {
    if merged {
        format!("Got it, I've noted that. {}", plan.question)
    } else {
        plan.question.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::planning::Timing;

    struct FailingProvider;

    #[async_trait::async_trait]
    impl ModelProvider for FailingProvider {
        async fn complete(&self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("unreachable provider")
        }
    }

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

    fn plan_asking(question: &str) -> ActionPlan {
        ActionPlan {
            action: "collect_budget".to_string(),
            question: question.to_string(),
            reasoning: String::new(),
            timing: Timing::Immediate,
            confidence: 1.0,
            alternative_actions: Vec::new(),
        }
    }

    fn trained() -> IntentClassifier {
        let mut c = IntentClassifier::new();
        c.train_default();
        c
    }

    #[tokio::test]
    async fn budget_extracted_without_llm() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("What's next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "my budget is $30k",
            "budget",
        )
        .await;

        assert!(out.merged);
        assert_eq!(
            project.areas.budget.as_ref().unwrap().total.as_deref(),
            Some("$30k")
        );
        assert!(out.phases.contains(&TurnPhase::MergeSuccess));
        // Provider is down: response falls back to the planned question.
        assert!(out.response.contains("What's next?"));
    }

    #[tokio::test]
    async fn cold_start_message_fills_multiple_areas() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "i want to open a coffee shop in austin by december with a $30k budget",
            "objectives",
        )
        .await;

        assert!(out.merged);
        assert_eq!(
            project.areas.budget.as_ref().unwrap().total.as_deref(),
            Some("$30k")
        );
        assert_eq!(
            project.areas.tasks.as_ref().unwrap().deadline.as_deref(),
            Some("december")
        );
        assert!(project.area_filled("objectives"));
        assert_eq!(project.name, "Austin Coffee Shop");
    }

    #[tokio::test]
    async fn merge_never_overwrites_existing_values() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.budget = Some(BudgetArea {
            total: Some("$50k".to_string()),
            ..Default::default()
        });

        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "my budget is $30k",
            "budget",
        )
        .await;

        assert_eq!(
            project.areas.budget.as_ref().unwrap().total.as_deref(),
            Some("$50k")
        );
        assert!(!out.merged);
        assert!(out.phases.contains(&TurnPhase::MergeSkipped));
    }

    #[tokio::test]
    async fn scope_message_names_project_from_pattern_table() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "i want to open a coffee shop",
            "objectives",
        )
        .await;

        assert!(out.merged);
        assert_eq!(project.name, "Coffee Shop");
        assert!(project
            .areas
            .objectives
            .as_ref()
            .unwrap()
            .description
            .as_deref()
            .unwrap()
            .contains("coffee shop"));
    }

    #[tokio::test]
    async fn greeting_served_from_canned_answer() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "hello",
            "off_topic",
        )
        .await;

        assert!(!out.merged);
        assert!(out.response.contains("shaping your project"));
    }

    #[tokio::test]
    async fn name_request_before_scope_gets_deferral() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "name my project",
            "off_topic",
        )
        .await;

        assert!(!out.merged);
        assert!(is_placeholder_name(&project.name));
        assert!(out.response.contains("know a bit more"));
    }

    #[tokio::test]
    async fn name_request_with_scope_suggests_name() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.objectives = Some(ObjectivesArea {
            description: Some("open a bakery".to_string()),
            ..Default::default()
        });

        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "name my project",
            "off_topic",
        )
        .await;

        assert_eq!(project.name, "Bakery");
        assert!(out.response.contains("Bakery"));
    }

    #[tokio::test]
    async fn combined_call_extracts_when_local_paths_miss() {
        let mut project = ProjectRecord::new_draft("p1");
        let body = r#"{"reply": "Love it. What budget do you have?",
            "facts": {"objective": "help local schools", "budget_total": null,
                      "deadline": null, "people": [], "tasks": []}}"#;

        let out = execute(
            &trained(),
            &CannedProvider(body.to_string()),
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "we're helping local schools",
            "off_topic",
        )
        .await;

        assert!(out.merged);
        assert_eq!(
            project
                .areas
                .objectives
                .as_ref()
                .unwrap()
                .description
                .as_deref(),
            Some("help local schools")
        );
        assert_eq!(out.response, "Love it. What budget do you have?");
    }

    #[tokio::test]
    async fn deadline_month_extracted() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "we need to finish by june",
            "tasks",
        )
        .await;

        assert!(out.merged);
        assert_eq!(
            project.areas.tasks.as_ref().unwrap().deadline.as_deref(),
            Some("june")
        );
    }

    #[tokio::test]
    async fn phases_run_in_order() {
        let mut project = ProjectRecord::new_draft("p1");
        let out = execute(
            &trained(),
            &FailingProvider,
            &router(),
            &mut project,
            &plan_asking("Next?"),
            &KnowledgeRecord::default(),
            VerbosityBand::Normal,
            "my budget is $30k",
            "budget",
        )
        .await;
        assert_eq!(
            out.phases,
            vec![
                TurnPhase::AwaitingInput,
                TurnPhase::Extracting,
                TurnPhase::MergeSuccess,
                TurnPhase::NameCheck,
                TurnPhase::ResponseReady,
            ]
        );
    }

    #[test]
    fn merged_facts_union_lists_without_duplicates() {
        let mut project = ProjectRecord::new_draft("p1");
        project.areas.people = Some(PeopleArea {
            team: vec!["my sister".to_string()],
            ..Default::default()
        });
        let facts = serde_json::json!({
            "people": ["my sister", "two baristas"],
            "tasks": ["sign the lease"],
        });
        assert!(merge_facts(&mut project, &facts));
        assert_eq!(
            project.areas.people.as_ref().unwrap().team,
            vec!["my sister", "two baristas"]
        );
        assert_eq!(
            project.areas.tasks.as_ref().unwrap().tasks,
            vec!["sign the lease"]
        );
    }

    #[test]
    fn name_validation_rejects_long_and_placeholder() {
        assert!(valid_name("Coffee Shop"));
        assert!(!valid_name("New Project"));
        assert!(!valid_name(&"x".repeat(60)));
        assert!(!valid_name("   "));
    }

    #[test]
    fn location_prefix_in_derived_name() {
        assert_eq!(
            derive_name("open a coffee shop in austin").as_deref(),
            Some("Austin Coffee Shop")
        );
        // "in time" is not a place.
        assert_eq!(
            derive_name("open a bakery in time for the holidays").as_deref(),
            Some("Bakery")
        );
    }
}
