use std::collections::BTreeSet;
use std::future::Future;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::traits::{keys, KnowledgeStore};

/// Bumped whenever training data or scoring changes shape. A persisted
/// model with a different version is stale and must be retrained, never
/// served silently.
pub const MODEL_VERSION: &str = "pm-intent-v2";

#[derive(Debug, Clone)]
pub struct ClassifierResult {
    pub intent: String,
    pub confidence: f64,
    pub entities: Vec<String>,
    pub answer: String,
}

/// Not an error — a routing signal telling the caller to take the
/// fallback path. The classifier's `answer` must not be used below
/// threshold.
#[derive(Debug, Clone)]
pub struct LowConfidence {
    pub intent: String,
    pub confidence: f64,
}

/// Gate combinator shared by every two-path stage: run the primary
/// (classifier) result if it cleared its threshold, otherwise the
/// fallback closure.
pub async fn resolve_with_fallback<T, F, Fut>(
    primary: Result<T, LowConfidence>,
    fallback: F,
) -> T
where
    F: FnOnce(Option<LowConfidence>) -> Fut,
    Fut: Future<Output = T>,
{
    match primary {
        Ok(value) => value,
        Err(low) => fallback(Some(low)).await,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub text: String,
    pub intent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IntentClass {
    intent: String,
    answer: String,
    /// Token sets of the training utterances for this intent.
    examples: Vec<Vec<String>>,
}

/// Exported model: what gets persisted under the versioned store key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBlob {
    pub version: String,
    classes: Vec<IntentClass>,
}

/// Trainable local intent classifier. Deterministic for a fixed trained
/// model: scoring is token-set Jaccard overlap against the training
/// utterances, no randomness anywhere.
#[derive(Default)]
pub struct IntentClassifier {
    classes: Option<Vec<IntentClass>>,
}

fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut seen = BTreeSet::new();
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '$')
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(|t| t.to_string())
        .collect()
}

fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let sa: BTreeSet<&str> = a.iter().map(String::as_str).collect();
    let sb: BTreeSet<&str> = b.iter().map(String::as_str).collect();
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    inter as f64 / union as f64
}

static MONEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\s?\d[\d,]*(?:\.\d+)?\s*[km]?|\b\d[\d,]*\s*[km]\b").unwrap());
static MONTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december)\b",
    )
    .unwrap()
});

fn extract_entities(text: &str) -> Vec<String> {
    let mut entities = Vec::new();
    for m in MONEY_RE.find_iter(text) {
        entities.push(m.as_str().trim().to_string());
    }
    for m in MONTH_RE.find_iter(text) {
        entities.push(m.as_str().to_string());
    }
    entities
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self { classes: None }
    }

    pub fn is_ready(&self) -> bool {
        self.classes.is_some()
    }

    /// Train from a labeled example set plus per-intent canned answers.
    pub fn train(&mut self, examples: &[TrainingExample], answers: &[(&str, &str)]) {
        let mut classes: Vec<IntentClass> = Vec::new();
        for example in examples {
            let tokens = tokenize(&example.text);
            match classes.iter_mut().find(|c| c.intent == example.intent) {
                Some(class) => class.examples.push(tokens),
                None => classes.push(IntentClass {
                    intent: example.intent.clone(),
                    answer: answers
                        .iter()
                        .find(|(intent, _)| *intent == example.intent)
                        .map(|(_, answer)| answer.to_string())
                        .unwrap_or_default(),
                    examples: vec![tokens],
                }),
            }
        }
        self.classes = Some(classes);
    }

    pub fn train_default(&mut self) {
        let (examples, answers) = default_training_set();
        self.train(&examples, &answers);
    }

    pub fn export(&self) -> anyhow::Result<ModelBlob> {
        let classes = self
            .classes
            .clone()
            .ok_or_else(|| anyhow::anyhow!("classifier has no trained model to export"))?;
        Ok(ModelBlob {
            version: MODEL_VERSION.to_string(),
            classes,
        })
    }

    /// Import a persisted model. A version mismatch means the blob is
    /// stale: the classifier stays not-ready and the caller must retrain.
    pub fn import(&mut self, blob: ModelBlob) -> anyhow::Result<()> {
        if blob.version != MODEL_VERSION {
            anyhow::bail!(
                "stored classifier model version '{}' does not match expected '{}'",
                blob.version,
                MODEL_VERSION
            );
        }
        self.classes = Some(blob.classes);
        Ok(())
    }

    /// `classify(text)` — no side effects. Errors only when no model is
    /// loaded ("not ready").
    pub fn process(&self, text: &str) -> anyhow::Result<ClassifierResult> {
        let classes = self
            .classes
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("classifier model not ready"))?;

        let tokens = tokenize(text);
        let mut best: Option<(&IntentClass, f64)> = None;
        for class in classes {
            let score = class
                .examples
                .iter()
                .map(|example| jaccard(&tokens, example))
                .fold(0.0_f64, f64::max);
            if best.as_ref().map_or(true, |(_, b)| score > *b) {
                best = Some((class, score));
            }
        }

        let (class, confidence) = best
            .ok_or_else(|| anyhow::anyhow!("classifier model has no trained classes"))?;
        Ok(ClassifierResult {
            intent: class.intent.clone(),
            confidence,
            entities: extract_entities(text),
            answer: class.answer.clone(),
        })
    }

    /// Apply the caller's per-site threshold. Exactly at threshold passes
    /// (>=); below it is a routing signal to fall back.
    pub fn classify_gated(
        &self,
        text: &str,
        threshold: f64,
    ) -> Result<ClassifierResult, LowConfidence> {
        match self.process(text) {
            Ok(result) if result.confidence >= threshold => Ok(result),
            Ok(result) => Err(LowConfidence {
                intent: result.intent,
                confidence: result.confidence,
            }),
            Err(_) => Err(LowConfidence {
                intent: "unknown".to_string(),
                confidence: 0.0,
            }),
        }
    }

    /// Load the persisted model, or train and persist a fresh one when
    /// the stored blob is missing, malformed, or version-stale.
    pub async fn ensure_ready(store: &dyn KnowledgeStore) -> anyhow::Result<Self> {
        let mut classifier = Self::new();

        if let Some(value) = store.get(keys::CLASSIFIER_MODEL).await? {
            match serde_json::from_value::<ModelBlob>(value) {
                Ok(blob) => {
                    let stored_version = blob.version.clone();
                    match classifier.import(blob) {
                        Ok(()) => {
                            info!(version = MODEL_VERSION, "Loaded classifier model from store");
                            return Ok(classifier);
                        }
                        Err(e) => {
                            warn!(stored = %stored_version, error = %e, "Stale classifier model, retraining");
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Malformed classifier model blob, retraining"),
            }
        }

        classifier.train_default();
        let blob = classifier.export()?;
        store
            .set(keys::CLASSIFIER_MODEL, &serde_json::to_value(&blob)?)
            .await?;
        info!(version = MODEL_VERSION, "Trained and persisted classifier model");
        Ok(classifier)
    }
}

/// Static labeled example set. Gap/action framing classes are generated
/// over area-name combinations so the compact feature strings built by
/// those stages score an exact match.
pub fn default_training_set() -> (Vec<TrainingExample>, Vec<(&'static str, &'static str)>) {
    let mut examples: Vec<TrainingExample> = Vec::new();
    let mut push = |text: &str, intent: &str| {
        examples.push(TrainingExample {
            text: text.to_string(),
            intent: intent.to_string(),
        });
    };

    // Conversational intents (general 0.7 call site).
    for text in ["hi", "hello", "hey", "hey there", "good morning"] {
        push(text, "chat.greeting");
    }
    for text in ["thanks", "thank you", "great thanks"] {
        push(text, "chat.thanks");
    }
    for text in [
        "what should we call it",
        "name my project",
        "suggest a name for the project",
    ] {
        push(text, "project.name_generate");
    }

    // Extraction intents (0.9 call site).
    for text in [
        "my budget is $30k",
        "we have a budget of 30000 dollars",
        "total budget is 50k",
        "i can spend about 20k on this",
    ] {
        push(text, "budget.set");
    }
    for text in [
        "i want to open a coffee shop",
        "the goal is to launch a new app",
        "we are building an online store",
        "my objective is to start a bakery",
    ] {
        push(text, "scope.define");
    }
    for text in [
        "the deadline is december",
        "we need to finish by june",
        "launch date is next month",
    ] {
        push(text, "deadline.set");
    }
    for text in [
        "my team is me and my sister",
        "the stakeholders are the investors",
        "we will hire two baristas",
    ] {
        push(text, "people.add");
    }
    for text in [
        "first task is to find a location",
        "we need to sign the lease",
        "next step is to order equipment",
    ] {
        push(text, "task.add");
    }

    // Gap framing classes over the compact feature strings
    // ("missing <areas> <bucket>" / "complete all areas").
    let areas = ["objectives", "budget", "tasks", "people"];
    let singles = [
        ("objectives", "gaps.single_critical"),
        ("budget", "gaps.single_high"),
        ("tasks", "gaps.single_medium"),
        ("people", "gaps.single_low"),
    ];
    for bucket in ["partial", "incomplete"] {
        for (area, intent) in singles {
            push(&format!("missing {} {}", area, bucket), intent);
        }
        // Every multi-area combination maps to "multiple gaps".
        for i in 0..areas.len() {
            for j in (i + 1)..areas.len() {
                push(
                    &format!("missing {} {} {}", areas[i], areas[j], bucket),
                    "gaps.multiple",
                );
                for k in (j + 1)..areas.len() {
                    push(
                        &format!("missing {} {} {} {}", areas[i], areas[j], areas[k], bucket),
                        "gaps.multiple",
                    );
                }
            }
        }
        push(
            &format!("missing objectives budget tasks people {}", bucket),
            "gaps.multiple",
        );
    }
    push("complete all areas", "gaps.all_complete");

    // Action framing classes ("next <area>").
    push("next objectives", "action.ask_objectives");
    push("next budget", "action.ask_budget");
    push("next tasks", "action.ask_tasks");
    push("next people", "action.ask_people");
    push("next none", "action.summarize");

    let answers: Vec<(&'static str, &'static str)> = vec![
        (
            "chat.greeting",
            "Hi! Let's keep shaping your project. What would you like to work on?",
        ),
        (
            "chat.thanks",
            "You're welcome! Want to fill in the next piece of the plan?",
        ),
        (
            "project.name_generate",
            "Let me suggest a name once I know a bit more about the project.",
        ),
    ];

    (examples, answers)
}
