//! Invalidation Rules Module
//!
//! Maps a successful write operation to the cached reads it makes stale.

use std::collections::HashMap;

use parking_lot::RwLock;
use regex::Regex;
use serde_json::{json, Value};
use tracing::warn;

use crate::cache::cache_key;

/// Operation whose per-account entry is dropped after an account write.
pub const ACCOUNT_DETAIL_OPERATION: &str = "GetAccountDetails";

/// Naming heuristic: a write whose name contains the marker invalidates the tags.
const HEURISTIC: [(&str, &[&str]); 4] = [
    ("transaction", &["transactions", "cashflow"]),
    ("account", &["accounts", "networth"]),
    ("budget", &["budgets"]),
    ("category", &["categories", "transactions"]),
];

// == Invalidation Plan ==
/// What to remove from the cache after one write.
#[derive(Debug, Clone, Default)]
pub struct InvalidationPlan {
    /// Every key matching one of these is removed
    pub patterns: Vec<Regex>,
    /// Exact keys removed in addition to the patterns
    pub keys: Vec<String>,
}

impl InvalidationPlan {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.keys.is_empty()
    }
}

/// Builds the pattern for one tag: the tag appears, case-insensitively, in the
/// operation-name segment of the key.
pub fn tag_pattern(tag: &str) -> Option<Regex> {
    let pattern = format!("(?i)^[^:]*{}", regex::escape(tag));
    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(tag = %tag, error = %e, "skipping unusable invalidation tag");
            None
        }
    }
}

// == Invalidation Rules ==
/// Per-operation invalidation tags.
///
/// Tags registered for an operation replace the naming heuristic for it.
#[derive(Debug, Default)]
pub struct InvalidationRules {
    registered: RwLock<HashMap<String, Vec<String>>>,
}

impl InvalidationRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches explicit tags to `operation`.
    pub fn register(&self, operation: impl Into<String>, tags: Vec<String>) {
        self.registered.write().insert(operation.into(), tags);
    }

    /// Tags for `operation`: registered ones, or those inferred from its name.
    pub fn tags_for(&self, operation: &str) -> Vec<String> {
        if let Some(tags) = self.registered.read().get(operation) {
            return tags.clone();
        }
        heuristic_tags(operation)
    }

    /// Plans the invalidation of a successful write.
    ///
    /// `explicit` tags win over everything else. The account detail key is only
    /// added when the heuristic applies and the variables carry an account id.
    pub fn plan(&self, operation: &str, variables: &Value, explicit: Option<&[String]>) -> InvalidationPlan {
        let (tags, inferred) = match explicit {
            Some(tags) => (tags.to_vec(), false),
            None => {
                let registered = self.registered.read().get(operation).cloned();
                match registered {
                    Some(tags) => (tags, false),
                    None => (heuristic_tags(operation), true),
                }
            }
        };

        let mut plan = InvalidationPlan {
            patterns: tags.iter().filter_map(|tag| tag_pattern(tag)).collect(),
            keys: Vec::new(),
        };

        if inferred && operation.to_lowercase().contains("account") {
            if let Some(id) = account_id(variables) {
                plan.keys
                    .push(cache_key(ACCOUNT_DETAIL_OPERATION, &json!({ "id": id })));
            }
        }
        plan
    }
}

fn heuristic_tags(operation: &str) -> Vec<String> {
    let lowered = operation.to_lowercase();
    let mut tags: Vec<String> = Vec::new();
    for (marker, implied) in HEURISTIC {
        if lowered.contains(marker) {
            for tag in implied {
                if !tags.iter().any(|t| t == tag) {
                    tags.push(tag.to_string());
                }
            }
        }
    }
    tags
}

fn account_id(variables: &Value) -> Option<Value> {
    ["id", "accountId"]
        .iter()
        .find_map(|field| variables.get(*field))
        .filter(|id| id.is_string() || id.is_number())
        .cloned()
}
