//! Domain trust results and the policies that aggregate them.
//!
//! A [`TrustReport`] is the itemized outcome of the four DNS checks for one
//! domain. Callers decide what "trusted enough" means by evaluating the
//! report against a [`TrustPolicy`] instead of receiving a single boolean.

use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// One of the DNS-published trust signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Check {
    Mx,
    Spf,
    Dkim,
    Dmarc,
}

impl Check {
    pub const ALL: [Self; 4] = [Self::Mx, Self::Spf, Self::Dkim, Self::Dmarc];
}

impl Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mx => "MX",
            Self::Spf => "SPF",
            Self::Dkim => "DKIM",
            Self::Dmarc => "DMARC",
        })
    }
}

/// Outcome of a single check. A failure always says why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum CheckStatus {
    Valid,
    Invalid(String),
}

impl CheckStatus {
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(reason),
        }
    }
}

impl Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => f.write_str("Valid"),
            Self::Invalid(reason) => write!(f, "Invalid: {reason}"),
        }
    }
}

/// Which checks must pass for a domain to be accepted.
///
/// Configured by name (`MxOnly`, `All`) or as an explicit list of checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrustPolicy {
    /// "Sendable": the domain can receive mail.
    MxOnly,
    /// "Fully trusted": every check passes.
    All,
    /// Exactly the listed checks must pass.
    Checks(Vec<Check>),
}

impl TrustPolicy {
    #[must_use]
    pub fn required(&self) -> &[Check] {
        match self {
            Self::MxOnly => &[Check::Mx],
            Self::All => &Check::ALL,
            Self::Checks(checks) => checks,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MxOnly => "mx-only",
            Self::All => "all",
            Self::Checks(_) => "custom",
        }
    }
}

/// Per-check verification results for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustReport {
    domain: Domain,
    checks: BTreeMap<Check, CheckStatus>,
}

impl TrustReport {
    #[must_use]
    pub fn new(
        domain: Domain,
        mx: CheckStatus,
        spf: CheckStatus,
        dkim: CheckStatus,
        dmarc: CheckStatus,
    ) -> Self {
        Self {
            domain,
            checks: BTreeMap::from([
                (Check::Mx, mx),
                (Check::Spf, spf),
                (Check::Dkim, dkim),
                (Check::Dmarc, dmarc),
            ]),
        }
    }

    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Status of `check`; a check missing from the report counts as invalid.
    #[must_use]
    pub fn status(&self, check: Check) -> CheckStatus {
        self.checks
            .get(&check)
            .cloned()
            .unwrap_or_else(|| CheckStatus::Invalid(format!("{check} was not evaluated")))
    }

    #[must_use]
    pub fn is_valid(&self, check: Check) -> bool {
        self.checks.get(&check).is_some_and(CheckStatus::is_valid)
    }

    pub fn checks(&self) -> impl Iterator<Item = (Check, &CheckStatus)> {
        self.checks.iter().map(|(check, status)| (*check, status))
    }

    #[must_use]
    pub fn satisfies(&self, policy: &TrustPolicy) -> bool {
        policy.required().iter().all(|check| self.is_valid(*check))
    }

    /// The checks required by `policy` that did not pass, with reasons.
    #[must_use]
    pub fn failures(&self, policy: &TrustPolicy) -> Vec<(Check, String)> {
        policy
            .required()
            .iter()
            .filter_map(|check| match self.status(*check) {
                CheckStatus::Valid => None,
                CheckStatus::Invalid(reason) => Some((*check, reason)),
            })
            .collect()
    }

    /// A one-line description of every failing check.
    #[must_use]
    pub fn summary(&self) -> String {
        let failed = self
            .checks()
            .filter_map(|(check, status)| status.reason().map(|reason| format!("{check}: {reason}")))
            .collect::<Vec<_>>();

        if failed.is_empty() {
            "all checks passed".to_string()
        } else {
            failed.join("; ")
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn mx_only_report() -> TrustReport {
        TrustReport::new(
            Domain::new("example.com"),
            CheckStatus::Valid,
            CheckStatus::Invalid("no SPF record".to_string()),
            CheckStatus::Invalid("no DKIM record".to_string()),
            CheckStatus::Invalid("no DMARC record".to_string()),
        )
    }

    #[test]
    fn policies_aggregate_differently() {
        let report = mx_only_report();

        assert!(report.satisfies(&TrustPolicy::MxOnly));
        assert!(!report.satisfies(&TrustPolicy::All));
        assert!(!report.satisfies(&TrustPolicy::Checks(vec![Check::Mx, Check::Spf])));
        assert!(report.satisfies(&TrustPolicy::Checks(vec![])));
    }

    #[test]
    fn failures_only_list_required_checks() {
        let report = mx_only_report();

        assert!(report.failures(&TrustPolicy::MxOnly).is_empty());
        assert_eq!(
            report.failures(&TrustPolicy::Checks(vec![Check::Mx, Check::Dmarc])),
            vec![(Check::Dmarc, "no DMARC record".to_string())]
        );
    }

    #[test]
    fn summary_lists_failing_checks() {
        assert_eq!(
            mx_only_report().summary(),
            "SPF: no SPF record; DKIM: no DKIM record; DMARC: no DMARC record"
        );
    }

    #[test]
    fn serializes_itemized_map() {
        let json = serde_json::to_value(mx_only_report()).unwrap();
        assert_eq!(json["domain"], "example.com");
        assert_eq!(json["checks"]["MX"]["status"], "valid");
        assert_eq!(json["checks"]["SPF"]["status"], "invalid");
        assert_eq!(json["checks"]["SPF"]["reason"], "no SPF record");
    }

    #[test]
    fn policy_deserializes_by_name() {
        let policy: TrustPolicy = serde_json::from_str("\"MxOnly\"").unwrap();
        assert_eq!(policy, TrustPolicy::MxOnly);

        let policy: TrustPolicy = serde_json::from_str(r#"{"Checks":["MX","DMARC"]}"#).unwrap();
        assert_eq!(policy.required(), &[Check::Mx, Check::Dmarc]);
        assert_eq!(policy.name(), "custom");
    }
}
