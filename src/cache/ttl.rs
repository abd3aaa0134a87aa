//! TTL Policy Module
//!
//! Maps operation names to cache lifetimes by category.

use std::time::Duration;

/// A category label and the TTL applied to operations whose name contains it.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlRule {
    pub category: String,
    pub ttl: Duration,
}

impl TtlRule {
    pub fn new(category: impl Into<String>, ttl: Duration) -> Self {
        Self {
            category: category.into().to_lowercase(),
            ttl,
        }
    }
}

// == TTL Policy ==
/// Ordered operation-category TTL table.
///
/// Rules are tried in order and the first category that is a case-insensitive
/// substring of the operation name wins. Names matching nothing get the
/// shortest configured TTL.
#[derive(Debug, Clone, PartialEq)]
pub struct TtlPolicy {
    rules: Vec<TtlRule>,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(vec![
            TtlRule::new("accounts", Duration::from_secs(10 * 60)),
            TtlRule::new("categories", Duration::from_secs(60 * 60)),
            TtlRule::new("transactions", Duration::from_secs(2 * 60)),
            TtlRule::new("budgets", Duration::from_secs(5 * 60)),
        ])
    }
}

impl TtlPolicy {
    /// Fallback when the table is empty.
    pub const FALLBACK_TTL: Duration = Duration::from_secs(60);

    pub fn new(rules: Vec<TtlRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TtlRule] {
        &self.rules
    }

    /// Resolves the TTL for an operation name.
    pub fn ttl_for(&self, operation: &str) -> Duration {
        let name = operation.to_lowercase();
        self.rules
            .iter()
            .find(|rule| name.contains(&rule.category))
            .map(|rule| rule.ttl)
            .unwrap_or_else(|| self.shortest())
    }

    /// Shortest configured TTL.
    pub fn shortest(&self) -> Duration {
        self.rules
            .iter()
            .map(|rule| rule.ttl)
            .min()
            .unwrap_or(Self::FALLBACK_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_match() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for("GetAccounts"), Duration::from_secs(600));
        assert_eq!(policy.ttl_for("GetTransactionsList"), Duration::from_secs(120));
        assert_eq!(policy.ttl_for("GetBudgets"), Duration::from_secs(300));
        assert_eq!(policy.ttl_for("GetCategories"), Duration::from_secs(3600));
    }

    #[test]
    fn test_priority_order_wins() {
        // Contains both "accounts" and "transactions"; accounts is checked first
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.ttl_for("GetAccountsWithTransactions"),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_unmatched_uses_shortest() {
        let policy = TtlPolicy::default();
        assert_eq!(policy.ttl_for("GetCashflowSummary"), Duration::from_secs(120));
    }

    #[test]
    fn test_empty_policy_fallback() {
        let policy = TtlPolicy::new(Vec::new());
        assert_eq!(policy.ttl_for("Anything"), TtlPolicy::FALLBACK_TTL);
    }
}
