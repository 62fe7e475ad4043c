//! The API endpoint URIs.
//!
//! For endpoints that take a parameter, e.g., '/api/budgets/{budget_id}',
//! use [format_endpoint].

/// The route to create a budget.
pub const BUDGETS: &str = "/api/budgets";
/// The route to fetch a budget with its presented version and progress.
pub const BUDGET: &str = "/api/budgets/{budget_id}";
/// The route to replace a draft budget's allocations.
pub const BUDGET_DRAFT: &str = "/api/budgets/{budget_id}/draft";
/// The route to submit a draft budget for board review.
pub const BUDGET_SUBMIT: &str = "/api/budgets/{budget_id}/submit";
/// The route for the board to approve or send back a budget under review.
pub const BUDGET_REVIEW: &str = "/api/budgets/{budget_id}/review";
/// The route to present a reviewed budget to parents.
pub const BUDGET_PRESENT: &str = "/api/budgets/{budget_id}/present";
/// The route for a family to acknowledge the presented budget version.
pub const BUDGET_ACKNOWLEDGE: &str = "/api/budgets/{budget_id}/acknowledge";
/// The route to propose an updated budget version while presented.
pub const BUDGET_PROPOSE_UPDATE: &str = "/api/budgets/{budget_id}/propose-update";
/// The route to read acknowledgment progress against the threshold.
pub const BUDGET_PROGRESS: &str = "/api/budgets/{budget_id}/progress";
/// The route for the association's final sign-off on a threshold-met budget.
pub const BUDGET_ASSOCIATION_APPROVAL: &str = "/api/budgets/{budget_id}/association-approval";

/// The route to create or list transactions.
pub const TRANSACTIONS: &str = "/api/transactions";
/// The route to fetch or soft-delete a transaction.
pub const TRANSACTION: &str = "/api/transactions/{transaction_id}";
/// The route to re-run validation on a transaction.
pub const TRANSACTION_REVALIDATE: &str = "/api/transactions/{transaction_id}/revalidate";
/// The route to import a bank-feed CSV export.
pub const TRANSACTIONS_IMPORT: &str = "/api/transactions/import";
/// The route to resolve a transaction that is in exception status.
pub const EXCEPTION_RESOLVE: &str = "/api/exceptions/{transaction_id}/resolve";

/// The route to upsert an association's governance rule.
pub const GOVERNANCE: &str = "/api/governance";
/// The route to start a team season with a frozen policy snapshot.
pub const TEAM_SEASONS: &str = "/api/team-seasons";
/// The route to evaluate the receipt policy for a hypothetical amount.
pub const RECEIPT_REQUIREMENT: &str = "/api/receipt-requirement";
/// The route to request a team rule override.
pub const RULE_OVERRIDES: &str = "/api/rule-overrides";
/// The route for the association to decide a pending override request.
pub const RULE_OVERRIDE_DECIDE: &str = "/api/rule-overrides/{override_id}/decide";
/// The route to read a team's coach-compensation cap status.
pub const COMPENSATION_STATUS: &str = "/api/teams/{team_id}/compensation-status";

/// Replace the parameter in `endpoint_path` with `id`.
///
/// A parameter is a string that starts with a left brace, followed by
/// lowercase letters or underscores, and ends with a right brace.
/// For example, in the endpoint path '/api/budgets/{budget_id}',
/// '{budget_id}' is the parameter.
///
/// This function assumes that an endpoint path only contains ASCII characters
/// and a single parameter.
///
/// If no parameter is found in `endpoint_path`, the function returns the
/// the original `endpoint_path`.
pub fn format_endpoint(endpoint_path: &str, id: i64) -> String {
    let mut param_start = None;
    let mut param_end = None;

    for (i, c) in endpoint_path.chars().enumerate() {
        if c == '{' {
            param_start = Some(i);
        } else if param_start.is_some() && c == '}' {
            param_end = Some(i + 1);
            break;
        }
    }

    let param_start = match param_start {
        Some(start) => start,
        None => return endpoint_path.to_string(),
    };

    let param_end = param_end.unwrap_or(endpoint_path.len());

    format!(
        "{}{}{}",
        &endpoint_path[..param_start],
        id,
        &endpoint_path[param_end..]
    )
}

// These tests are here so that we know when we call `Uri::from_shared` it will not panic.
#[cfg(test)]
mod endpoints_tests {
    use axum::http::Uri;

    use crate::endpoints;

    use super::format_endpoint;

    fn assert_endpoint_is_valid_uri(uri: &str) {
        assert!(uri.parse::<Uri>().is_ok());
    }

    #[test]
    fn endpoints_are_valid_uris() {
        assert_endpoint_is_valid_uri(endpoints::BUDGETS);
        assert_endpoint_is_valid_uri(endpoints::BUDGET);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_DRAFT);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_SUBMIT);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_REVIEW);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_PRESENT);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_ACKNOWLEDGE);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_PROPOSE_UPDATE);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_PROGRESS);
        assert_endpoint_is_valid_uri(endpoints::BUDGET_ASSOCIATION_APPROVAL);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTIONS);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTION);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTION_REVALIDATE);
        assert_endpoint_is_valid_uri(endpoints::TRANSACTIONS_IMPORT);
        assert_endpoint_is_valid_uri(endpoints::EXCEPTION_RESOLVE);
        assert_endpoint_is_valid_uri(endpoints::GOVERNANCE);
        assert_endpoint_is_valid_uri(endpoints::TEAM_SEASONS);
        assert_endpoint_is_valid_uri(endpoints::RECEIPT_REQUIREMENT);
        assert_endpoint_is_valid_uri(endpoints::RULE_OVERRIDES);
        assert_endpoint_is_valid_uri(endpoints::RULE_OVERRIDE_DECIDE);
        assert_endpoint_is_valid_uri(endpoints::COMPENSATION_STATUS);
    }

    #[test]
    fn produces_valid_uri() {
        let formatted_path = format_endpoint("/hello/{world_id}", 1);

        assert_eq!(formatted_path, "/hello/1");
        assert!(formatted_path.parse::<Uri>().is_ok());

        // Parameter with single word should also work.
        let formatted_path = format_endpoint("/hello/{world}", 1);

        assert_eq!(formatted_path, "/hello/1");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn returns_original_path_with_no_parameter() {
        let formatted_path = format_endpoint("/hello/world", 1);

        assert_eq!(formatted_path, "/hello/world");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }

    #[test]
    fn parameter_in_middle() {
        let formatted_path = format_endpoint("/hello/{world}/bye", 1);

        assert_eq!(formatted_path, "/hello/1/bye");
        assert!(formatted_path.parse::<Uri>().is_ok());
    }
}
