//! Violation and result types produced by the validation engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RuleId;

/// How strongly a violation counts against a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationSeverity {
    /// Informational only.
    Info,
    /// Worth a reviewer's attention, does not block compliance.
    Warning,
    /// Blocks compliance.
    Error,
    /// Blocks compliance and demands prompt attention.
    Critical,
}

impl ViolationSeverity {
    /// The compliance-score penalty for one violation of this severity.
    pub fn penalty(self) -> i64 {
        match self {
            ViolationSeverity::Info => 0,
            ViolationSeverity::Warning => 5,
            ViolationSeverity::Error => 20,
            ViolationSeverity::Critical => 40,
        }
    }

    /// Whether this severity blocks compliance.
    pub fn is_blocking(self) -> bool {
        matches!(self, ViolationSeverity::Error | ViolationSeverity::Critical)
    }
}

/// The check that produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    /// The category does not exist or is inactive for this team.
    UnknownCategory,
    /// An expense has no category assigned.
    MissingCategory,
    /// The category has no allocation in the active budget version.
    NoBudgetAllocation,
    /// The expense would push category spend past its allocation.
    BudgetOverrun,
    /// A required receipt is missing.
    ReceiptMissing,
    /// The expense would push envelope spend past the envelope cap.
    EnvelopeCapExceeded,
    /// The expense exceeds the envelope's per-transaction limit.
    EnvelopeTransactionLimit,
    /// The amount is at or above the team's large-transaction threshold.
    LargeTransaction,
    /// The amount exceeds an association spending-limit rule.
    AssociationRuleViolation,
    /// The transaction is dated in the future.
    FutureDate,
    /// The transaction falls outside the current season.
    OutsideSeason,
    /// The vendor looks like untraceable cash movement.
    VendorRisk,
    /// A sibling transaction has the same vendor, amount and date.
    PossibleDuplicate,
}

/// One failed or flagged check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// The check that produced this violation.
    pub code: ViolationCode,
    /// How strongly it counts against the transaction.
    pub severity: ViolationSeverity,
    /// A human-readable explanation.
    pub message: String,
    /// The association rule behind the check, if one applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<RuleId>,
    /// Check-specific detail, e.g. the overrun amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// How urgently an exception needs resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionSeverity {
    /// Routine review.
    Low,
    /// One blocking violation.
    Medium,
    /// Multiple blocking violations.
    High,
    /// At least one critical violation.
    Critical,
}

impl ExceptionSeverity {
    /// The stored form of this severity.
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionSeverity::Low => "LOW",
            ExceptionSeverity::Medium => "MEDIUM",
            ExceptionSeverity::High => "HIGH",
            ExceptionSeverity::Critical => "CRITICAL",
        }
    }

    /// Parse a severity from its stored form.
    pub fn parse(value: &str) -> Option<ExceptionSeverity> {
        match value {
            "LOW" => Some(ExceptionSeverity::Low),
            "MEDIUM" => Some(ExceptionSeverity::Medium),
            "HIGH" => Some(ExceptionSeverity::High),
            "CRITICAL" => Some(ExceptionSeverity::Critical),
            _ => None,
        }
    }
}

/// The outcome of validating one transaction.
///
/// Non-compliance is a normal value, never an error: a transaction that
/// fails every check still validates "successfully" into a result with
/// `compliant = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the transaction has no blocking violations.
    pub compliant: bool,
    /// A 0-100 review score; each violation subtracts its severity penalty.
    pub score: i64,
    /// Every violation the checks produced, blocking or not.
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    /// Build a result from the collected violations.
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        let compliant = !violations
            .iter()
            .any(|violation| violation.severity.is_blocking());

        let penalty: i64 = violations
            .iter()
            .map(|violation| violation.severity.penalty())
            .sum();

        Self {
            compliant,
            score: (100 - penalty).max(0),
            violations,
        }
    }

    /// Derive the exception severity for a non-compliant result.
    ///
    /// Any critical violation makes the exception CRITICAL; multiple
    /// blocking violations make it HIGH; a single one makes it MEDIUM.
    /// Compliant results have no severity.
    pub fn exception_severity(&self) -> Option<ExceptionSeverity> {
        if self.compliant {
            return None;
        }

        if self
            .violations
            .iter()
            .any(|violation| violation.severity == ViolationSeverity::Critical)
        {
            return Some(ExceptionSeverity::Critical);
        }

        let error_count = self
            .violations
            .iter()
            .filter(|violation| violation.severity == ViolationSeverity::Error)
            .count();

        match error_count {
            0 => Some(ExceptionSeverity::Low),
            1 => Some(ExceptionSeverity::Medium),
            _ => Some(ExceptionSeverity::High),
        }
    }
}

#[cfg(test)]
mod result_tests {
    use super::{
        ExceptionSeverity, ValidationResult, Violation, ViolationCode, ViolationSeverity,
    };

    fn violation(code: ViolationCode, severity: ViolationSeverity) -> Violation {
        Violation {
            code,
            severity,
            message: String::new(),
            rule_id: None,
            metadata: None,
        }
    }

    #[test]
    fn warnings_do_not_block_compliance() {
        let result = ValidationResult::from_violations(vec![
            violation(ViolationCode::LargeTransaction, ViolationSeverity::Warning),
            violation(ViolationCode::OutsideSeason, ViolationSeverity::Warning),
        ]);

        assert!(result.compliant);
        assert_eq!(result.score, 90);
        assert_eq!(result.exception_severity(), None);
    }

    #[test]
    fn errors_block_compliance_and_derive_severity() {
        let one_error = ValidationResult::from_violations(vec![violation(
            ViolationCode::BudgetOverrun,
            ViolationSeverity::Error,
        )]);
        assert!(!one_error.compliant);
        assert_eq!(
            one_error.exception_severity(),
            Some(ExceptionSeverity::Medium)
        );

        let two_errors = ValidationResult::from_violations(vec![
            violation(ViolationCode::BudgetOverrun, ViolationSeverity::Error),
            violation(ViolationCode::ReceiptMissing, ViolationSeverity::Error),
        ]);
        assert_eq!(
            two_errors.exception_severity(),
            Some(ExceptionSeverity::High)
        );
    }

    #[test]
    fn critical_violation_dominates_severity() {
        let result = ValidationResult::from_violations(vec![
            violation(ViolationCode::BudgetOverrun, ViolationSeverity::Error),
            violation(ViolationCode::VendorRisk, ViolationSeverity::Critical),
        ]);

        assert_eq!(
            result.exception_severity(),
            Some(ExceptionSeverity::Critical)
        );
    }

    #[test]
    fn score_never_goes_negative() {
        let violations = (0..4)
            .map(|_| violation(ViolationCode::BudgetOverrun, ViolationSeverity::Critical))
            .collect();

        let result = ValidationResult::from_violations(violations);

        assert_eq!(result.score, 0);
    }

    #[test]
    fn validation_json_round_trips() {
        let result = ValidationResult::from_violations(vec![violation(
            ViolationCode::ReceiptMissing,
            ViolationSeverity::Error,
        )]);

        let json = serde_json::to_string(&result).unwrap();
        let parsed: ValidationResult = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, result);
    }
}
