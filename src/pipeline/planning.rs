//! Action planning stage: turns the top gap plus conversational context
//! into one concrete next action, phrased for the user's engagement level.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classifier::{resolve_with_fallback, IntentClassifier, LowConfidence};
use crate::pipeline::context::{ConversationContext, Engagement};
use crate::records::{GapRecord, KnowledgeRecord, LearningRecord};
use crate::router::{Router, Tier};
use crate::schema;
use crate::traits::ModelProvider;
use crate::utils::extract_json_object;

/// Gap/action framing call site.
const FRAMING_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timing {
    Immediate,
    Delayed,
    Contextual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPlan {
    pub action: String,
    pub question: String,
    pub reasoning: String,
    pub timing: Timing,
    pub confidence: f64,
    pub alternative_actions: Vec<String>,
}

/// Question templates per area: (default, short/direct, elaborated).
fn templates_for(area: &str) -> (&'static str, &'static str, &'static str) {
    match area {
        "objectives" => (
            "What is the main goal of this project?",
            "What's the goal?",
            "What is the main goal of this project? Feel free to describe the vision, \
             what success looks like, and any goals you already have in mind.",
        ),
        "budget" => (
            "What budget do you have in mind for this project?",
            "What's the budget?",
            "What budget do you have in mind for this project? A rough total is fine — \
             we can break it into line items later.",
        ),
        "tasks" => (
            "What are the first tasks, and is there a deadline?",
            "Any deadline or first tasks?",
            "What are the first concrete tasks you see, and is there a deadline or \
             timeline driving them? Dependencies between tasks are useful too.",
        ),
        "people" => (
            "Who is involved — stakeholders and team?",
            "Who's on the team?",
            "Who is involved in this project? Think stakeholders who care about the \
             outcome as well as the team doing the work.",
        ),
        _ => (
            "Tell me more about the project.",
            "Tell me more.",
            "Tell me more about the project — whatever feels most important right now.",
        ),
    }
}

/// Static phrasing lookup keyed by (gap area × stored question style).
fn styled_question(area: &str, style: &str) -> String {
    let (default, short, elaborated) = templates_for(area);
    match style {
        "direct" => short.to_string(),
        "exploratory" => elaborated.to_string(),
        _ => default.to_string(),
    }
}

/// Post-hoc phrasing adaptation by live engagement.
fn adapt_for_engagement(area: &str, question: String, engagement: Engagement) -> String {
    let (_, short, elaborated) = templates_for(area);
    match engagement {
        Engagement::Low => short.to_string(),
        Engagement::High => elaborated.to_string(),
        Engagement::Medium => question,
    }
}

fn area_of_action(action: &str) -> Option<&str> {
    action.strip_prefix("collect_")
}

fn alternatives(gaps: &GapRecord) -> Vec<String> {
    gaps.gaps
        .iter()
        .skip(1)
        .take(2)
        .map(|g| super::gaps::action_for(&g.field))
        .collect()
}

pub async fn plan(
    classifier: &IntentClassifier,
    provider: &dyn ModelProvider,
    router: &Router,
    gaps: &GapRecord,
    analysis: &KnowledgeRecord,
    context: &ConversationContext,
    learning: &LearningRecord,
) -> ActionPlan {
    if gaps.gaps.is_empty() {
        return ActionPlan {
            action: "summarize".to_string(),
            question: "Everything essential is captured. Want a summary of the plan, \
                       or shall we refine one of the areas?"
                .to_string(),
            reasoning: "All schema areas are filled".to_string(),
            timing: Timing::Contextual,
            confidence: 1.0,
            alternative_actions: Vec::new(),
        };
    }

    let target_area = area_of_action(&gaps.next_action).unwrap_or("none");
    let features = format!("next {}", target_area);
    debug!(features = %features, stage = context.stage.as_str(), "Action planning features");

    let primary = classifier
        .classify_gated(&features, FRAMING_THRESHOLD)
        .and_then(|result| {
            plan_from_intent(&result.intent, result.confidence, gaps).ok_or(LowConfidence {
                intent: result.intent,
                confidence: result.confidence,
            })
        });

    let mut plan = resolve_with_fallback(primary, |low| async {
        if let Some(low) = low {
            debug!(
                intent = %low.intent,
                confidence = low.confidence,
                "Action framing below threshold, taking fallback path"
            );
        }
        match llm_plan(provider, router, gaps, analysis, context).await {
            Some(plan) => plan,
            None => static_fallback(gaps, learning),
        }
    })
    .await;

    plan.question = adapt_for_engagement(target_area, plan.question, context.engagement);
    plan
}

/// Fixed intent → action template map.
fn plan_from_intent(intent: &str, confidence: f64, gaps: &GapRecord) -> Option<ActionPlan> {
    let area = match intent {
        "action.ask_objectives" => "objectives",
        "action.ask_budget" => "budget",
        "action.ask_tasks" => "tasks",
        "action.ask_people" => "people",
        _ => return None,
    };
    let (default, _, _) = templates_for(area);
    Some(ActionPlan {
        action: super::gaps::action_for(area),
        question: default.to_string(),
        reasoning: format!(
            "{} is the highest-priority gap",
            schema::area_label(area)
        ),
        timing: Timing::Immediate,
        confidence,
        alternative_actions: alternatives(gaps),
    })
}

async fn llm_plan(
    provider: &dyn ModelProvider,
    router: &Router,
    gaps: &GapRecord,
    analysis: &KnowledgeRecord,
    context: &ConversationContext,
) -> Option<ActionPlan> {
    let prompt = format!(
        "Conversation stage: {}. User engagement: {}.\n\
         Prioritized gaps: {}\n\
         Known facts: {:?}\n\n\
         Pick the single best next action and phrase one question for the user. \
         Return JSON: {{\"action\": \"collect_<area>\", \"question\": \"...\", \
         \"reasoning\": \"...\", \"timing\": \"immediate|delayed|contextual\"}}",
        context.stage.as_str(),
        context.engagement.as_str(),
        serde_json::to_string(&gaps.gaps).unwrap_or_default(),
        analysis.known_facts,
    );

    let response = match provider
        .complete(
            router.select(Tier::Fast),
            "You are a project-management coach choosing the next question to ask.",
            &prompt,
        )
        .await
    {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Action planning LLM call failed, using static fallback");
            return None;
        }
    };

    let value = extract_json_object(&response)?;
    let action = value.get("action")?.as_str()?.to_string();
    let area = area_of_action(&action)?;
    if !schema::area_ids().any(|id| id == area) {
        return None;
    }
    let question = value.get("question")?.as_str()?.trim().to_string();
    if question.is_empty() {
        return None;
    }
    let timing = match value.get("timing").and_then(|t| t.as_str()) {
        Some("delayed") => Timing::Delayed,
        Some("contextual") => Timing::Contextual,
        _ => Timing::Immediate,
    };
    Some(ActionPlan {
        action,
        question,
        reasoning: value
            .get("reasoning")
            .and_then(|r| r.as_str())
            .unwrap_or("Model-selected next action")
            .to_string(),
        timing,
        confidence: 0.6,
        alternative_actions: alternatives(gaps),
    })
}

/// Deterministic fallback when both the classifier and the LLM are
/// unavailable: top gap plus a phrasing variant from the static table.
fn static_fallback(gaps: &GapRecord, learning: &LearningRecord) -> ActionPlan {
    let top = &gaps.gaps[0];
    let question = styled_question(&top.field, &learning.user_patterns.preferred_question_style);
    let timing = if learning.user_patterns.engagement_level == "low" {
        Timing::Delayed
    } else {
        Timing::Immediate
    };
    ActionPlan {
        action: super::gaps::action_for(&top.field),
        question,
        reasoning: top.reasoning.clone(),
        timing,
        confidence: 0.5,
        alternative_actions: alternatives(gaps),
    }
}
