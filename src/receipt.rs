//! Receipt policy evaluation.
//!
//! Associations decide when an expense needs a receipt attached. The policy
//! layers an association-wide threshold, an optional team-level override
//! (which may only tighten the threshold), and per-category overrides
//! (which replace it). All functions here are deterministic and free of
//! side effects so the precedence rules stay independently testable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::ids::CategoryId;

/// Per-category receipt overrides within a [ReceiptPolicy].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryReceiptOverride {
    /// A category-specific threshold that replaces the effective threshold.
    pub threshold_cents: Option<i64>,
    /// Whether the category is exempt from receipts entirely.
    #[serde(default)]
    pub exempt: bool,
}

/// An association's receipt policy, merged with the team-level override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptPolicy {
    /// Whether receipts are required at all.
    pub receipts_enabled: bool,
    /// The association-wide threshold at or above which a receipt is
    /// required.
    pub global_threshold_cents: i64,
    /// Days after the transaction date during which a missing receipt is
    /// tolerated.
    pub grace_period_days: u32,
    /// Whether per-category thresholds and exemptions are consulted.
    pub category_thresholds_enabled: bool,
    /// Category-specific overrides, keyed by category ID.
    #[serde(default)]
    pub category_overrides: HashMap<CategoryId, CategoryReceiptOverride>,
    /// Whether teams may tighten the global threshold.
    pub allow_team_threshold_override: bool,
    /// The team's own threshold, if it set one.
    pub team_threshold_override_cents: Option<i64>,
}

impl Default for ReceiptPolicy {
    fn default() -> Self {
        Self {
            receipts_enabled: true,
            global_threshold_cents: 10_000,
            grace_period_days: 14,
            category_thresholds_enabled: false,
            category_overrides: HashMap::new(),
            allow_team_threshold_override: false,
            team_threshold_override_cents: None,
        }
    }
}

/// Which layer of the policy decided the requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequirementSource {
    /// Receipts are disabled association-wide.
    Disabled,
    /// The category is exempt.
    Exempt,
    /// The association-wide threshold applied.
    Association,
    /// A team override tightened the threshold.
    Team,
    /// A category override replaced the threshold.
    Category,
}

/// The outcome of evaluating the receipt policy for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceiptRequirement {
    /// Whether a receipt is required.
    pub required: bool,
    /// The effective threshold that was applied, in cents.
    pub threshold_cents: i64,
    /// Which policy layer decided the requirement.
    pub source: RequirementSource,
    /// Days of grace for attaching a missing receipt.
    pub grace_period_days: u32,
}

/// Whether a transaction carries the receipt its policy demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReceiptStatus {
    /// No receipt is required.
    None,
    /// A receipt is required and present.
    Attached,
    /// A receipt is required but missing.
    RequiredMissing,
}

impl ReceiptStatus {
    /// The stored form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            ReceiptStatus::None => "NONE",
            ReceiptStatus::Attached => "ATTACHED",
            ReceiptStatus::RequiredMissing => "REQUIRED_MISSING",
        }
    }

    /// Parse a status from its stored form.
    pub fn parse(value: &str) -> Option<ReceiptStatus> {
        match value {
            "NONE" => Some(ReceiptStatus::None),
            "ATTACHED" => Some(ReceiptStatus::Attached),
            "REQUIRED_MISSING" => Some(ReceiptStatus::RequiredMissing),
            _ => None,
        }
    }
}

/// Compute whether a transaction of `amount_cents` in `category_id` requires
/// a receipt under `policy`.
///
/// Precedence, first match wins:
/// 1. receipts disabled;
/// 2. category exempt (only when category thresholds are enabled);
/// 3. the association threshold, tightened by a team override
///    (`min(association, team)`, teams may never loosen) when overrides are
///    allowed, then replaced outright by a category threshold when one is
///    configured.
///
/// A receipt is required iff `amount_cents >= effective threshold`
/// (inclusive).
pub fn calculate_receipt_requirement(
    amount_cents: i64,
    category_id: Option<CategoryId>,
    policy: &ReceiptPolicy,
) -> ReceiptRequirement {
    if !policy.receipts_enabled {
        return ReceiptRequirement {
            required: false,
            threshold_cents: 0,
            source: RequirementSource::Disabled,
            grace_period_days: policy.grace_period_days,
        };
    }

    let category_override = category_id
        .filter(|_| policy.category_thresholds_enabled)
        .and_then(|id| policy.category_overrides.get(&id));

    if category_override.is_some_and(|entry| entry.exempt) {
        return ReceiptRequirement {
            required: false,
            threshold_cents: 0,
            source: RequirementSource::Exempt,
            grace_period_days: policy.grace_period_days,
        };
    }

    let mut effective_threshold = policy.global_threshold_cents;
    let mut source = RequirementSource::Association;

    if policy.allow_team_threshold_override
        && let Some(team_threshold) = policy.team_threshold_override_cents
    {
        effective_threshold = effective_threshold.min(team_threshold);
        source = RequirementSource::Team;
    }

    if let Some(category_threshold) = category_override.and_then(|entry| entry.threshold_cents) {
        // The category threshold replaces the effective threshold entirely,
        // it is not intersected with the team value.
        effective_threshold = category_threshold;
        source = RequirementSource::Category;
    }

    ReceiptRequirement {
        required: amount_cents >= effective_threshold,
        threshold_cents: effective_threshold,
        source,
        grace_period_days: policy.grace_period_days,
    }
}

/// Whether `transaction_at` is still within its grace period at `now`.
///
/// The comparison is a strict less-than on elapsed time against the grace
/// window, so a transaction is out of grace the instant the window elapses.
pub fn is_within_grace_period(
    transaction_at: OffsetDateTime,
    grace_period_days: u32,
    now: OffsetDateTime,
) -> bool {
    let grace_window = time::Duration::days(i64::from(grace_period_days));

    now - transaction_at < grace_window
}

/// Map a receipt requirement and the presence of a receipt onto a
/// [ReceiptStatus].
pub fn receipt_status(has_receipt: bool, requirement: &ReceiptRequirement) -> ReceiptStatus {
    if !requirement.required {
        return ReceiptStatus::None;
    }

    if has_receipt {
        ReceiptStatus::Attached
    } else {
        ReceiptStatus::RequiredMissing
    }
}
