//! The validation checks.
//!
//! Pure functions over a [TransactionFacts] and a [ValidationContext]: the
//! same inputs always produce the same result, and checks run in a fixed
//! order so violation lists compare stably. Non-compliance is a value, not
//! an error.

use serde_json::json;

use crate::{
    budget::BudgetAllocation,
    receipt::{calculate_receipt_requirement, is_within_grace_period},
    snapshot::RuleConfig,
    transaction::models::TransactionType,
    validation::{
        context::{TransactionFacts, ValidationContext},
        models::{ValidationResult, Violation, ViolationCode, ViolationSeverity},
    },
};

/// Vendors that indicate untraceable cash movement.
const CASH_LIKE_VENDORS: &[&str] = &["cash", "venmo", "zelle", "paypal", "atm", "western union"];

/// A cash-like transaction at or above this amount is critical rather than
/// a warning.
const VENDOR_RISK_CRITICAL_CENTS: i64 = 100_000;

fn violation(code: ViolationCode, severity: ViolationSeverity, message: String) -> Violation {
    Violation {
        code,
        severity,
        message,
        rule_id: None,
        metadata: None,
    }
}

fn check_category(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    match facts.category_id {
        Some(category_id) => {
            if !context
                .categories
                .iter()
                .any(|category| category.id == category_id)
            {
                violations.push(violation(
                    ViolationCode::UnknownCategory,
                    ViolationSeverity::Error,
                    format!("category {category_id} is not an active category for this team"),
                ));
            }
        }
        None if facts.transaction_type == TransactionType::Expense => {
            violations.push(violation(
                ViolationCode::MissingCategory,
                ViolationSeverity::Warning,
                "the expense has no category assigned".to_owned(),
            ));
        }
        None => {}
    }
}

fn check_budget(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if facts.transaction_type != TransactionType::Expense {
        return;
    }
    let Some(category_id) = facts.category_id else {
        return;
    };
    let Some(allocations) = &context.allocations else {
        return;
    };

    let allocation = allocations
        .iter()
        .find(|allocation: &&BudgetAllocation| allocation.category_id == category_id);

    match allocation {
        None => violations.push(violation(
            ViolationCode::NoBudgetAllocation,
            ViolationSeverity::Warning,
            format!("category {category_id} has no allocation in the acknowledged budget"),
        )),
        Some(allocation) => {
            let spent_cents = context
                .spent_by_category
                .get(&category_id)
                .copied()
                .unwrap_or(0);

            if spent_cents + facts.amount_cents > allocation.allocated_cents {
                let overrun_cents =
                    spent_cents + facts.amount_cents - allocation.allocated_cents;
                violations.push(Violation {
                    code: ViolationCode::BudgetOverrun,
                    severity: ViolationSeverity::Error,
                    message: format!(
                        "the expense overruns the category allocation by {overrun_cents} cents"
                    ),
                    rule_id: None,
                    metadata: Some(json!({
                        "allocated_cents": allocation.allocated_cents,
                        "spent_cents": spent_cents,
                        "overrun_cents": overrun_cents,
                    })),
                });
            }
        }
    }
}

fn check_receipt(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if facts.transaction_type != TransactionType::Expense || facts.has_receipt {
        return;
    }

    let requirement = calculate_receipt_requirement(
        facts.amount_cents,
        facts.category_id,
        &context.receipt_policy,
    );
    if !requirement.required {
        return;
    }

    // A missing receipt only blocks compliance once the grace period for
    // uploading one has passed.
    let transaction_at = facts.transaction_date.midnight().assume_utc();
    let now = context.today.midnight().assume_utc();
    let severity = if is_within_grace_period(transaction_at, requirement.grace_period_days, now) {
        ViolationSeverity::Warning
    } else {
        ViolationSeverity::Error
    };

    violations.push(violation(
        ViolationCode::ReceiptMissing,
        severity,
        format!(
            "a receipt is required for expenses of {} cents or more",
            requirement.threshold_cents
        ),
    ));
}

fn check_envelopes(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if facts.transaction_type != TransactionType::Expense {
        return;
    }
    let Some(category_id) = facts.category_id else {
        return;
    };

    for envelope_facts in &context.envelopes {
        let envelope = &envelope_facts.envelope;
        if envelope.category_id != category_id
            || !envelope
                .match_type
                .matches(envelope.vendor_match.as_deref(), &facts.vendor)
        {
            continue;
        }

        if let Some(max_single) = envelope.max_single_transaction_cents
            && facts.amount_cents > max_single
        {
            violations.push(violation(
                ViolationCode::EnvelopeTransactionLimit,
                ViolationSeverity::Error,
                format!(
                    "the expense exceeds the envelope's per-transaction limit of {max_single} cents"
                ),
            ));
        }

        if envelope_facts.spent_cents + facts.amount_cents > envelope.cap_cents {
            violations.push(Violation {
                code: ViolationCode::EnvelopeCapExceeded,
                severity: ViolationSeverity::Error,
                message: format!(
                    "the expense would push envelope spend past its cap of {} cents",
                    envelope.cap_cents
                ),
                rule_id: None,
                metadata: Some(json!({
                    "envelope_id": envelope.id,
                    "cap_cents": envelope.cap_cents,
                    "spent_cents": envelope_facts.spent_cents,
                })),
            });
        }
    }
}

fn check_large_transaction(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if let Some(threshold) = context.large_transaction_threshold_cents
        && facts.amount_cents >= threshold
    {
        violations.push(violation(
            ViolationCode::LargeTransaction,
            ViolationSeverity::Warning,
            format!("the amount meets the team's large-transaction threshold of {threshold} cents"),
        ));
    }
}

fn check_association_rules(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if facts.transaction_type != TransactionType::Expense {
        return;
    }
    let Some(category_name) = facts.category_id.and_then(|category_id| {
        context
            .categories
            .iter()
            .find(|category| category.id == category_id)
            .map(|category| category.name.as_str())
    }) else {
        return;
    };

    for rule in &context.rules {
        let RuleConfig::SpendingLimit {
            category_name: limited_category,
            limit_cents,
        } = &rule.config
        else {
            continue;
        };

        if limited_category.eq_ignore_ascii_case(category_name)
            && facts.amount_cents > *limit_cents
        {
            violations.push(Violation {
                code: ViolationCode::AssociationRuleViolation,
                severity: ViolationSeverity::Error,
                message: format!(
                    "'{}' caps single {} expenses at {} cents",
                    rule.name, limited_category, limit_cents
                ),
                rule_id: Some(rule.id),
                metadata: None,
            });
        }
    }
}

fn check_dates(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if facts.transaction_date > context.today {
        violations.push(violation(
            ViolationCode::FutureDate,
            ViolationSeverity::Error,
            "the transaction is dated in the future".to_owned(),
        ));
    }

    if let Some((start_date, end_date)) = context.season_bounds
        && (facts.transaction_date < start_date || facts.transaction_date > end_date)
    {
        violations.push(violation(
            ViolationCode::OutsideSeason,
            ViolationSeverity::Warning,
            "the transaction falls outside the current season".to_owned(),
        ));
    }
}

fn check_vendor_risk(facts: &TransactionFacts, violations: &mut Vec<Violation>) {
    if facts.transaction_type != TransactionType::Expense {
        return;
    }

    let vendor = facts.vendor.to_lowercase();
    if !CASH_LIKE_VENDORS
        .iter()
        .any(|cash_like| vendor.contains(cash_like))
    {
        return;
    }

    let severity = if facts.amount_cents >= VENDOR_RISK_CRITICAL_CENTS {
        ViolationSeverity::Critical
    } else {
        ViolationSeverity::Warning
    };

    violations.push(violation(
        ViolationCode::VendorRisk,
        severity,
        format!("'{}' looks like untraceable cash movement", facts.vendor),
    ));
}

fn check_duplicates(
    facts: &TransactionFacts,
    context: &ValidationContext,
    violations: &mut Vec<Violation>,
) {
    if context.duplicate_count > 0 {
        violations.push(Violation {
            code: ViolationCode::PossibleDuplicate,
            severity: ViolationSeverity::Warning,
            message: format!(
                "{} other transaction(s) share this vendor, amount and date",
                context.duplicate_count
            ),
            rule_id: None,
            metadata: Some(json!({ "duplicate_count": context.duplicate_count })),
        });
    }
}

/// Run every check and fold the violations into a [ValidationResult].
pub fn validate(facts: &TransactionFacts, context: &ValidationContext) -> ValidationResult {
    let mut violations = Vec::new();

    check_category(facts, context, &mut violations);
    check_budget(facts, context, &mut violations);
    check_receipt(facts, context, &mut violations);
    check_envelopes(facts, context, &mut violations);
    check_large_transaction(facts, context, &mut violations);
    check_association_rules(facts, context, &mut violations);
    check_dates(facts, context, &mut violations);
    check_vendor_risk(facts, &mut violations);
    check_duplicates(facts, context, &mut violations);

    ValidationResult::from_violations(violations)
}

#[cfg(test)]
mod engine_tests {
    use std::collections::HashMap;

    use time::macros::date;

    use crate::{
        budget::{BudgetAllocation, BudgetEnvelope, EnvelopeMatchType},
        receipt::ReceiptPolicy,
        snapshot::{AssociationRule, RuleConfig},
        team::Category,
        transaction::models::TransactionType,
        validation::{
            context::{EnvelopeFacts, TransactionFacts, ValidationContext},
            models::{ViolationCode, ViolationSeverity},
        },
    };

    use super::validate;

    fn context() -> ValidationContext {
        ValidationContext {
            categories: vec![Category {
                id: 1,
                team_id: 1,
                name: "Equipment".to_owned(),
                active: true,
            }],
            allocations: Some(vec![BudgetAllocation {
                category_id: 1,
                allocated_cents: 100_000,
            }]),
            spent_by_category: HashMap::new(),
            envelopes: Vec::new(),
            receipt_policy: ReceiptPolicy::default(),
            large_transaction_threshold_cents: None,
            season_bounds: Some((date!(2026 - 03 - 01), date!(2026 - 06 - 30))),
            rules: Vec::new(),
            duplicate_count: 0,
            today: date!(2026 - 04 - 15),
        }
    }

    fn expense(amount_cents: i64) -> TransactionFacts {
        TransactionFacts {
            id: None,
            team_id: 1,
            amount_cents,
            transaction_type: TransactionType::Expense,
            category_id: Some(1),
            vendor: "Acme Sports".to_owned(),
            transaction_date: date!(2026 - 04 - 10),
            has_receipt: true,
        }
    }

    fn codes(facts: &TransactionFacts, context: &ValidationContext) -> Vec<ViolationCode> {
        validate(facts, context)
            .violations
            .iter()
            .map(|violation| violation.code)
            .collect()
    }

    #[test]
    fn clean_expense_is_compliant() {
        let result = validate(&expense(5_000), &context());

        assert!(result.compliant);
        assert_eq!(result.score, 100);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn validation_is_deterministic() {
        let facts = TransactionFacts {
            vendor: "Venmo".to_owned(),
            has_receipt: false,
            ..expense(150_000)
        };
        let context = context();

        assert_eq!(validate(&facts, &context), validate(&facts, &context));
    }

    #[test]
    fn unknown_category_is_an_error() {
        let facts = TransactionFacts {
            category_id: Some(42),
            ..expense(5_000)
        };

        let result = validate(&facts, &context());

        assert!(!result.compliant);
        assert_eq!(result.violations[0].code, ViolationCode::UnknownCategory);
    }

    #[test]
    fn uncategorized_expense_is_a_warning() {
        let facts = TransactionFacts {
            category_id: None,
            ..expense(5_000)
        };

        let result = validate(&facts, &context());

        assert!(result.compliant);
        assert!(codes(&facts, &context()).contains(&ViolationCode::MissingCategory));
    }

    #[test]
    fn income_needs_no_category() {
        let facts = TransactionFacts {
            transaction_type: TransactionType::Income,
            category_id: None,
            ..expense(5_000)
        };

        assert!(validate(&facts, &context()).violations.is_empty());
    }

    #[test]
    fn overrun_counts_existing_settled_spend() {
        let mut context = context();
        context.spent_by_category.insert(1, 98_000);

        let result = validate(&expense(5_000), &context);

        assert!(!result.compliant);
        let overrun = &result.violations[0];
        assert_eq!(overrun.code, ViolationCode::BudgetOverrun);
        assert_eq!(overrun.metadata.as_ref().unwrap()["overrun_cents"], 3_000);
    }

    #[test]
    fn spend_exactly_at_allocation_is_allowed() {
        let mut context = context();
        context.spent_by_category.insert(1, 95_000);

        assert!(validate(&expense(5_000), &context).compliant);
    }

    #[test]
    fn draft_budgets_are_not_enforced() {
        let mut context = context();
        context.allocations = None;
        context.spent_by_category.insert(1, 1_000_000);

        assert!(validate(&expense(5_000), &context).compliant);
    }

    #[test]
    fn missing_receipt_in_grace_period_is_a_warning() {
        let facts = TransactionFacts {
            has_receipt: false,
            transaction_date: date!(2026 - 04 - 10),
            ..expense(20_000)
        };

        // 5 days after the transaction, inside the default 14-day grace.
        let result = validate(&facts, &context());

        assert!(result.compliant);
        assert_eq!(result.violations[0].code, ViolationCode::ReceiptMissing);
        assert_eq!(result.violations[0].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn missing_receipt_past_grace_period_is_an_error() {
        let facts = TransactionFacts {
            has_receipt: false,
            transaction_date: date!(2026 - 03 - 10),
            ..expense(20_000)
        };

        let result = validate(&facts, &context());

        assert!(!result.compliant);
        assert_eq!(result.violations[0].severity, ViolationSeverity::Error);
    }

    #[test]
    fn small_expense_needs_no_receipt() {
        let facts = TransactionFacts {
            has_receipt: false,
            ..expense(5_000)
        };

        assert!(validate(&facts, &context()).violations.is_empty());
    }

    #[test]
    fn envelope_limits_apply_to_matching_vendors_only() {
        let mut context = context();
        context.envelopes.push(EnvelopeFacts {
            envelope: BudgetEnvelope {
                id: 1,
                team_id: 1,
                category_id: 1,
                vendor_match: Some("acme".to_owned()),
                match_type: EnvelopeMatchType::Contains,
                cap_cents: 50_000,
                max_single_transaction_cents: Some(10_000),
            },
            spent_cents: 45_000,
        });

        let matching = codes(&expense(20_000), &context);
        assert!(matching.contains(&ViolationCode::EnvelopeTransactionLimit));
        assert!(matching.contains(&ViolationCode::EnvelopeCapExceeded));

        let other_vendor = TransactionFacts {
            vendor: "Sports Direct".to_owned(),
            ..expense(20_000)
        };
        assert!(validate(&other_vendor, &context).compliant);
    }

    #[test]
    fn large_transaction_threshold_is_inclusive() {
        let mut context = context();
        context.large_transaction_threshold_cents = Some(50_000);

        assert!(codes(&expense(50_000), &context).contains(&ViolationCode::LargeTransaction));
        assert!(!codes(&expense(49_999), &context).contains(&ViolationCode::LargeTransaction));
    }

    #[test]
    fn association_spending_limit_carries_the_rule_id() {
        let mut context = context();
        context.rules.push(AssociationRule {
            id: 7,
            association_id: 1,
            name: "Equipment limit".to_owned(),
            config: RuleConfig::SpendingLimit {
                category_name: "Equipment".to_owned(),
                limit_cents: 50_000,
            },
            active: true,
        });

        let result = validate(&expense(60_000), &context);

        assert!(!result.compliant);
        assert_eq!(
            result.violations[0].code,
            ViolationCode::AssociationRuleViolation
        );
        assert_eq!(result.violations[0].rule_id, Some(7));
    }

    #[test]
    fn future_dates_are_errors_and_off_season_dates_warnings() {
        let future = TransactionFacts {
            transaction_date: date!(2026 - 05 - 01),
            ..expense(5_000)
        };
        let mut early_context = context();
        early_context.today = date!(2026 - 04 - 15);
        assert!(codes(&future, &early_context).contains(&ViolationCode::FutureDate));

        let off_season = TransactionFacts {
            transaction_date: date!(2026 - 02 - 01),
            ..expense(5_000)
        };
        let mut late_context = context();
        late_context.today = date!(2026 - 04 - 15);
        let result = validate(&off_season, &late_context);
        assert!(result.compliant);
        assert!(
            result
                .violations
                .iter()
                .any(|violation| violation.code == ViolationCode::OutsideSeason)
        );
    }

    #[test]
    fn cash_like_vendor_severity_scales_with_amount() {
        let small = TransactionFacts {
            vendor: "Venmo".to_owned(),
            ..expense(5_000)
        };
        let result = validate(&small, &context());
        assert_eq!(result.violations[0].code, ViolationCode::VendorRisk);
        assert_eq!(result.violations[0].severity, ViolationSeverity::Warning);

        let large = TransactionFacts {
            vendor: "ATM withdrawal".to_owned(),
            ..expense(100_000)
        };
        let result = validate(&large, &context());
        assert_eq!(result.violations[0].severity, ViolationSeverity::Critical);
        assert!(!result.compliant);
    }

    #[test]
    fn duplicates_are_flagged_but_not_blocking() {
        let mut context = context();
        context.duplicate_count = 2;

        let result = validate(&expense(5_000), &context);

        assert!(result.compliant);
        assert_eq!(
            result.violations[0].code,
            ViolationCode::PossibleDuplicate
        );
    }
}
