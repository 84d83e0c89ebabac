use crate::records::ChatEntry;

/// Conversation stage by total message count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStage {
    Initial,
    Exploration,
    Planning,
    Detailed,
}

impl ConversationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStage::Initial => "initial",
            ConversationStage::Exploration => "exploration",
            ConversationStage::Planning => "planning",
            ConversationStage::Detailed => "detailed",
        }
    }
}

/// Engagement by average recent user-message length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    Low,
    Medium,
    High,
}

impl Engagement {
    pub fn as_str(self) -> &'static str {
        match self {
            Engagement::Low => "low",
            Engagement::Medium => "medium",
            Engagement::High => "high",
        }
    }
}

/// Response pattern: detailed-vs-brief crossed with question-vs-statement,
/// by majority vote over recent user messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePattern {
    pub detailed: bool,
    pub questioning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Normal,
    High,
}

#[derive(Debug, Clone, Copy)]
pub struct ConversationContext {
    pub stage: ConversationStage,
    pub engagement: Engagement,
    pub response_pattern: ResponsePattern,
    pub complexity: Complexity,
}

const RECENT_WINDOW: usize = 5;

pub fn derive_context(history: &[ChatEntry]) -> ConversationContext {
    let total = history.len();
    let stage = if total < 5 {
        ConversationStage::Initial
    } else if total < 10 {
        ConversationStage::Exploration
    } else if total < 20 {
        ConversationStage::Planning
    } else {
        ConversationStage::Detailed
    };

    let recent_user: Vec<&ChatEntry> = history
        .iter()
        .rev()
        .filter(|e| e.role == "user")
        .take(RECENT_WINDOW)
        .collect();

    let engagement = if recent_user.is_empty() {
        Engagement::Medium
    } else {
        let avg_len = recent_user
            .iter()
            .map(|e| e.message.chars().count())
            .sum::<usize>() as f64
            / recent_user.len() as f64;
        if avg_len < 30.0 {
            Engagement::Low
        } else if avg_len > 100.0 {
            Engagement::High
        } else {
            Engagement::Medium
        }
    };

    let detailed_votes = recent_user
        .iter()
        .filter(|e| e.message.chars().count() > 80)
        .count();
    let question_votes = recent_user
        .iter()
        .filter(|e| e.message.contains('?'))
        .count();
    let response_pattern = ResponsePattern {
        detailed: detailed_votes * 2 > recent_user.len(),
        questioning: question_votes * 2 > recent_user.len(),
    };

    let complexity = if total > 40 || engagement == Engagement::High && stage == ConversationStage::Detailed
    {
        Complexity::High
    } else {
        Complexity::Normal
    };

    ConversationContext {
        stage,
        engagement,
        response_pattern,
        complexity,
    }
}
