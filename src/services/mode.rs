//! Account mode classification.
//!
//! Pure and stateless: the same identifier always resolves to the same mode,
//! and resolution happens before any balance decision is made for that
//! account. Identifiers that match none of the configured simulation
//! prefixes resolve to live — misclassifying a real account as simulated
//! would silently suppress its balance updates, which is the worse failure.

use crate::types::AccountMode;

/// Classification rules: account-id prefixes that mark simulated accounts.
#[derive(Debug, Clone)]
pub struct ModeRules {
    sim_prefixes: Vec<String>,
}

impl ModeRules {
    /// Build rules from a prefix list. Matching is case-insensitive.
    pub fn new(prefixes: Vec<String>) -> Self {
        Self {
            sim_prefixes: prefixes.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Classify an account identifier. Unknown or empty ids are live.
    pub fn resolve(&self, account_id: &str) -> AccountMode {
        let id = account_id.trim().to_lowercase();
        if !id.is_empty() && self.sim_prefixes.iter().any(|p| id.starts_with(p.as_str())) {
            AccountMode::Sim
        } else {
            AccountMode::Live
        }
    }
}

impl Default for ModeRules {
    fn default() -> Self {
        Self::new(vec![
            "sim".to_string(),
            "demo".to_string(),
            "paper".to_string(),
            "playback".to_string(),
        ])
    }
}
