//! Severity classification for aggregated incidents.
//!
//! Rules are evaluated top to bottom and the first match wins:
//!
//! 1. `Critical`: any break-in attempt, or more than 50 events.
//! 2. `High`: failed logins with more than 20 events.
//! 3. `Medium`: any failed login.
//! 4. `Low`: everything else.

use std::collections::BTreeSet;

use super::{EventType, GeoIncident};

const CRITICAL_COUNT: u64 = 50;
const HIGH_FAILED_COUNT: u64 = 20;

/// Severity tier driving marker color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Marker fill color.
    pub fn color(self) -> &'static str {
        match self {
            Severity::Critical => "#ff4757",
            Severity::High => "#ffa502",
            Severity::Medium => "#ffd32a",
            Severity::Low => "#2ed573",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Rule {
    severity: Severity,
    matches: fn(&BTreeSet<EventType>, u64) -> bool,
}

fn is_critical(types: &BTreeSet<EventType>, count: u64) -> bool {
    types.contains(&EventType::BreakInAttempt) || count > CRITICAL_COUNT
}

fn is_high(types: &BTreeSet<EventType>, count: u64) -> bool {
    types.contains(&EventType::FailedLogin) && count > HIGH_FAILED_COUNT
}

fn is_medium(types: &BTreeSet<EventType>, _count: u64) -> bool {
    types.contains(&EventType::FailedLogin)
}

const RULES: [Rule; 3] = [
    Rule { severity: Severity::Critical, matches: is_critical },
    Rule { severity: Severity::High, matches: is_high },
    Rule { severity: Severity::Medium, matches: is_medium },
];

/// Classify an incident.
pub fn classify(incident: &GeoIncident) -> Severity {
    classify_parts(&incident.types, incident.count)
}

/// Classify from the raw `(types, count)` pair.
pub fn classify_parts(types: &BTreeSet<EventType>, count: u64) -> Severity {
    RULES
        .iter()
        .find(|rule| (rule.matches)(types, count))
        .map(|rule| rule.severity)
        .unwrap_or(Severity::Low)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types(tags: &[&str]) -> BTreeSet<EventType> {
        tags.iter().map(|t| EventType::from(*t)).collect()
    }

    #[test]
    fn test_break_in_is_critical_at_any_count() {
        assert_eq!(classify_parts(&types(&["break_in_attempt"]), 1), Severity::Critical);
    }

    #[test]
    fn test_failed_login_tiers() {
        assert_eq!(classify_parts(&types(&["failed_login"]), 25), Severity::High);
        assert_eq!(classify_parts(&types(&["failed_login"]), 20), Severity::Medium);
        assert_eq!(classify_parts(&types(&["failed_login"]), 5), Severity::Medium);
    }

    #[test]
    fn test_accepted_only_is_low() {
        assert_eq!(classify_parts(&types(&["accepted_login"]), 1), Severity::Low);
    }

    #[test]
    fn test_count_rule_applies_without_types() {
        assert_eq!(classify_parts(&BTreeSet::new(), 999), Severity::Critical);
        assert_eq!(classify_parts(&BTreeSet::new(), 50), Severity::Low);
    }

    #[test]
    fn test_first_rule_wins() {
        // Would also satisfy High, but Critical is checked first.
        assert_eq!(classify_parts(&types(&["failed_login"]), 51), Severity::Critical);
    }

    #[test]
    fn test_deterministic() {
        let t = types(&["failed_login", "invalid_user"]);
        assert_eq!(classify_parts(&t, 21), classify_parts(&t, 21));
    }
}
