use std::fmt;

use crate::config::ModelsConfig;

/// Tier-based model selection: the fast tier serves cheap framing-style
/// fallback calls, the primary tier extraction and interaction analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Fast,
    Primary,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Fast => write!(f, "fast"),
            Tier::Primary => write!(f, "primary"),
        }
    }
}

#[derive(Clone)]
pub struct Router {
    models: ModelsConfig,
}

impl Router {
    pub fn new(mut models: ModelsConfig) -> Self {
        models.apply_defaults();
        Self { models }
    }

    pub fn select(&self, tier: Tier) -> &str {
        match tier {
            Tier::Fast => &self.models.fast,
            Tier::Primary => &self.models.primary,
        }
    }
}
