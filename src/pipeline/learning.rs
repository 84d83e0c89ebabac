//! Learning stage: runs after the response is already on its way out.
//! Updates the per-user profile and the per-project reflection audit
//! trail, and persists both itself. Failures here are logged and dropped,
//! never surfaced to the user.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::pipeline::context::{Engagement, ResponsePattern};
use crate::records::{
    AnalysisSnapshot, DecisionEntry, InteractionSample, LearningRecord, ReflectionRecord,
};
use crate::router::{Router, Tier};
use crate::sentiment::Sentiment;
use crate::traits::{keys, load_or_default, save_record, KnowledgeStore, ModelProvider};
use crate::utils::extract_json_object;

/// Blend weights for the engagement score: mostly history, nudged by the
/// current turn.
const OLD_WEIGHT: f64 = 0.7;
const NEW_WEIGHT: f64 = 0.3;

const REFLECTION_CAP: usize = 100;
const SUGGESTION_CAP: usize = 20;

/// An action is flagged once it has enough samples and keeps missing.
const MIN_SAMPLES_FOR_SUGGESTION: u32 = 3;
const LOW_EFFECTIVENESS: f64 = 0.4;

/// Everything the learning stage needs, captured before the turn's
/// working state is dropped.
pub struct TurnObservation {
    pub user_id: String,
    pub project_id: String,
    pub message: String,
    /// Seconds since the previous chat entry; None on the first turn.
    pub turn_gap_secs: Option<f64>,
    pub action: String,
    pub action_confidence: f64,
    pub reasoning: String,
    pub merged: bool,
    pub engagement: Engagement,
    pub response_pattern: ResponsePattern,
    pub sentiment: Sentiment,
    pub snapshot: Option<AnalysisSnapshot>,
    pub project_description: Option<String>,
}

/// How the user is interacting, as judged for this single turn. One LLM
/// call produces all three fields; the deterministic length/punctuation
/// read stands in when the model is unavailable.
pub struct InteractionTraits {
    pub engagement: Engagement,
    pub question_style: String,
    pub communication_style: String,
}

pub async fn run(
    store: Arc<dyn KnowledgeStore>,
    provider: &dyn ModelProvider,
    router: &Router,
    obs: TurnObservation,
) -> anyhow::Result<()> {
    let learning_key = keys::learning(&obs.user_id);
    let reflection_key = keys::reflection(&obs.user_id, &obs.project_id);

    let mut learning: LearningRecord = load_or_default(store.as_ref(), &learning_key).await?;
    let mut reflection: ReflectionRecord =
        load_or_default(store.as_ref(), &reflection_key).await?;

    let traits = analyze_interaction(provider, router, &obs).await;
    apply_observation(&mut learning, &obs, &traits);
    reflect(&mut reflection, &learning, &obs);

    save_record(store.as_ref(), &learning_key, &learning).await?;
    save_record(store.as_ref(), &reflection_key, &reflection).await?;
    debug!(user_id = %obs.user_id, project_id = %obs.project_id, "Learning records updated");
    Ok(())
}

async fn analyze_interaction(
    provider: &dyn ModelProvider,
    router: &Router,
    obs: &TurnObservation,
) -> InteractionTraits {
    match llm_traits(provider, router, obs).await {
        Some(traits) => traits,
        None => deterministic_traits(obs),
    }
}

/// Single combined call judging engagement and both style dimensions.
async fn llm_traits(
    provider: &dyn ModelProvider,
    router: &Router,
    obs: &TurnObservation,
) -> Option<InteractionTraits> {
    let prompt = format!(
        "The user replied: {}\n\n\
         Judge how they are engaging. Return JSON: {{\"engagement\": \
         \"low|medium|high\", \"question_style\": \"direct|exploratory|balanced\", \
         \"communication_style\": \"brief|neutral|expressive\"}}",
        obs.message,
    );
    let body = provider
        .complete(
            router.select(Tier::Fast),
            "You judge conversational engagement. Reply with strict JSON only.",
            &prompt,
        )
        .await
        .ok()?;

    let value = extract_json_object(&body)?;
    let engagement = match value.get("engagement")?.as_str()? {
        "low" => Engagement::Low,
        "medium" => Engagement::Medium,
        "high" => Engagement::High,
        _ => return None,
    };
    let question_style = value.get("question_style")?.as_str()?;
    if !["direct", "exploratory", "balanced"].contains(&question_style) {
        return None;
    }
    let communication_style = value.get("communication_style")?.as_str()?;
    if !["brief", "neutral", "expressive"].contains(&communication_style) {
        return None;
    }
    Some(InteractionTraits {
        engagement,
        question_style: question_style.to_string(),
        communication_style: communication_style.to_string(),
    })
}

/// Length/punctuation fallback built from the turn context features.
pub fn deterministic_traits(obs: &TurnObservation) -> InteractionTraits {
    let question_style = if obs.response_pattern.detailed {
        "exploratory"
    } else if obs.engagement == Engagement::Low {
        "direct"
    } else {
        "balanced"
    };
    let communication_style = if obs.response_pattern.detailed {
        "expressive"
    } else if obs.engagement == Engagement::Low {
        "brief"
    } else {
        "neutral"
    };
    InteractionTraits {
        engagement: obs.engagement,
        question_style: question_style.to_string(),
        communication_style: communication_style.to_string(),
    }
}

fn engagement_signal(engagement: Engagement) -> f64 {
    match engagement {
        Engagement::Low => 0.2,
        Engagement::Medium => 0.5,
        Engagement::High => 0.8,
    }
}

fn style_signal(style: &str) -> f64 {
    match style {
        "direct" | "brief" => 0.2,
        "exploratory" | "expressive" => 0.8,
        _ => 0.5,
    }
}

fn blend(old: f64, new: f64) -> f64 {
    (old * OLD_WEIGHT + new * NEW_WEIGHT).clamp(0.0, 1.0)
}

fn bucket(score: f64, low: &str, mid: &str, high: &str) -> String {
    if score < 0.35 {
        low.to_string()
    } else if score > 0.65 {
        high.to_string()
    } else {
        mid.to_string()
    }
}

fn response_time_bucket(secs: f64) -> &'static str {
    if secs < 60.0 {
        "quick"
    } else if secs < 600.0 {
        "moderate"
    } else {
        "slow"
    }
}

fn effectiveness_of(obs: &TurnObservation) -> f64 {
    if obs.merged {
        1.0
    } else if obs.sentiment == Sentiment::Positive {
        0.5
    } else {
        0.2
    }
}

fn project_type_of(description: &str) -> Option<&'static str> {
    let lowered = description.to_lowercase();
    const TYPES: &[(&str, &str)] = &[
        ("coffee", "retail"),
        ("bakery", "retail"),
        ("restaurant", "retail"),
        ("store", "retail"),
        ("app", "software"),
        ("website", "software"),
        ("software", "software"),
        ("wedding", "event"),
        ("event", "event"),
    ];
    TYPES
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, kind)| *kind)
}

pub fn apply_observation(
    learning: &mut LearningRecord,
    obs: &TurnObservation,
    traits: &InteractionTraits,
) {
    let patterns = &mut learning.user_patterns;

    patterns.engagement_score =
        blend(patterns.engagement_score, engagement_signal(traits.engagement));
    patterns.engagement_level = bucket(patterns.engagement_score, "low", "medium", "high");

    patterns.question_style_score =
        blend(patterns.question_style_score, style_signal(&traits.question_style));
    patterns.preferred_question_style =
        bucket(patterns.question_style_score, "direct", "balanced", "exploratory");

    patterns.communication_style_score = blend(
        patterns.communication_style_score,
        style_signal(&traits.communication_style),
    );
    patterns.communication_style =
        bucket(patterns.communication_style_score, "brief", "neutral", "expressive");

    if let Some(gap) = obs.turn_gap_secs {
        let blended = match patterns.response_gap_secs {
            Some(prev) => prev * OLD_WEIGHT + gap * NEW_WEIGHT,
            None => gap,
        };
        patterns.response_gap_secs = Some(blended);
        patterns.response_time = response_time_bucket(blended).to_string();
    }

    if let Some(kind) = obs
        .project_description
        .as_deref()
        .and_then(project_type_of)
    {
        patterns.project_type = kind.to_string();
    }

    let effectiveness = effectiveness_of(obs);
    learning.record_effectiveness(&obs.action, effectiveness);
    learning.push_interaction(InteractionSample {
        timestamp: Utc::now(),
        action: obs.action.clone(),
        confidence: obs.action_confidence,
        effectiveness,
    });
}

fn reflect(reflection: &mut ReflectionRecord, learning: &LearningRecord, obs: &TurnObservation) {
    if let Some(snapshot) = &obs.snapshot {
        reflection.analysis_history.push(snapshot.clone());
        while reflection.analysis_history.len() > REFLECTION_CAP {
            reflection.analysis_history.remove(0);
        }
    }

    reflection.decision_log.push(DecisionEntry {
        timestamp: Utc::now(),
        action: obs.action.clone(),
        reasoning: obs.reasoning.clone(),
    });
    while reflection.decision_log.len() > REFLECTION_CAP {
        reflection.decision_log.remove(0);
    }

    if let Some(stat) = learning.question_effectiveness.get(&obs.action) {
        if stat.total_interactions >= MIN_SAMPLES_FOR_SUGGESTION
            && stat.average_effectiveness < LOW_EFFECTIVENESS
        {
            let suggestion = format!(
                "Questions for '{}' rarely land; try a different phrasing or timing",
                obs.action
            );
            if !reflection.improvement_suggestions.contains(&suggestion) {
                reflection.improvement_suggestions.push(suggestion);
                while reflection.improvement_suggestions.len() > SUGGESTION_CAP {
                    reflection.improvement_suggestions.remove(0);
                }
            }
        }
    }
}
