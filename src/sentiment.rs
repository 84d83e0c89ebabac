//! Rule-based sentiment analysis: lexicon match over fixed word lists
//! with simple negation flipping. Drives the verbosity budget for
//! generated responses.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Positive,
    Negative,
    Frustrated,
    Confused,
    Neutral,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Frustrated => "frustrated",
            Sentiment::Confused => "confused",
            Sentiment::Neutral => "neutral",
        }
    }
}

/// Target response length band derived from user sentiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityBand {
    Terse,
    Normal,
    Detailed,
}

impl VerbosityBand {
    /// Instruction fragment for the LLM prompt.
    pub fn instruction(self) -> &'static str {
        match self {
            VerbosityBand::Terse => "Answer in one or two short sentences.",
            VerbosityBand::Normal => "Answer in a short paragraph.",
            VerbosityBand::Detailed => {
                "Answer thoroughly, explaining context and next steps in a few sentences."
            }
        }
    }
}

const POSITIVE_WORDS: &[&str] = &[
    "great", "good", "awesome", "excellent", "love", "perfect", "thanks", "excited", "happy",
    "nice", "wonderful",
];
const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "wrong", "problem", "worse", "disappointed", "sad",
];
const FRUSTRATED_WORDS: &[&str] = &[
    "frustrated", "annoying", "annoyed", "stuck", "again", "ugh", "ridiculous", "waste",
];
const CONFUSED_WORDS: &[&str] = &[
    "confused", "unsure", "unclear", "lost", "understand", "mean", "what", "how", "explain",
];
const NEGATIONS: &[&str] = &["not", "no", "never", "dont", "don't", "cant", "can't", "isnt", "isn't"];

/// A negation within two tokens before a positive word demotes the match
/// to negative ("not good"). Negated negative words are treated as neutral
/// rather than promoted.
pub fn analyze(text: &str) -> Sentiment {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .collect();

    let negated_at = |idx: usize| -> bool {
        let from = idx.saturating_sub(2);
        tokens[from..idx].iter().any(|t| NEGATIONS.contains(t))
    };

    let mut positive = 0i32;
    let mut negative = 0i32;
    let mut frustrated = 0i32;
    let mut confused = 0i32;

    for (i, token) in tokens.iter().enumerate() {
        if POSITIVE_WORDS.contains(token) {
            if negated_at(i) {
                negative += 1;
            } else {
                positive += 1;
            }
        } else if NEGATIVE_WORDS.contains(token) {
            if !negated_at(i) {
                negative += 1;
            }
        } else if FRUSTRATED_WORDS.contains(token) {
            frustrated += 1;
        } else if CONFUSED_WORDS.contains(token) {
            confused += 1;
        }
    }

    if frustrated > 0 && frustrated >= confused {
        return Sentiment::Frustrated;
    }
    if confused > 1 {
        return Sentiment::Confused;
    }
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => {
            if confused > 0 {
                Sentiment::Confused
            } else {
                Sentiment::Neutral
            }
        }
    }
}

pub fn verbosity_band(sentiment: Sentiment) -> VerbosityBand {
    match sentiment {
        Sentiment::Frustrated | Sentiment::Negative => VerbosityBand::Terse,
        Sentiment::Confused => VerbosityBand::Detailed,
        Sentiment::Positive | Sentiment::Neutral => VerbosityBand::Normal,
    }
}
