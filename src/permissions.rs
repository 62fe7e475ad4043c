//! The permission matrix for the treasury workflows.
//!
//! Every role check in the application goes through this module, looked up
//! by (role, action, context) instead of ad hoc comparisons at call sites.

use serde::{Deserialize, Serialize};

use crate::{Error, identity::Role, validation::ExceptionSeverity};

/// How an exception is to be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// Bypass the violations and force the transaction to RESOLVED.
    Override,
    /// Fix the underlying transaction data, then revalidate.
    Correct,
    /// Re-run the validation engine with current data.
    Revalidate,
}

/// Whether `role` may create or edit budgets (drafting and propose-update).
pub fn can_edit_budget(role: Role) -> bool {
    matches!(role, Role::Treasurer | Role::AssistantTreasurer)
}

/// Whether `role` may approve or send back a budget under review.
pub fn can_review_budget(role: Role) -> bool {
    matches!(role, Role::President | Role::BoardMember)
}

/// Whether `role` may present an approved budget to parents.
pub fn can_present_budget(role: Role) -> bool {
    matches!(
        role,
        Role::Treasurer | Role::AssistantTreasurer | Role::President | Role::BoardMember
    )
}

/// Whether `role` may record transactions for their team.
pub fn can_manage_transactions(role: Role) -> bool {
    matches!(role, Role::Treasurer | Role::AssistantTreasurer)
}

/// Whether `role` may decide (approve/reject) a team rule override request.
pub fn can_decide_rule_override(role: Role) -> bool {
    matches!(role, Role::AssociationAdmin)
}

/// Whether `role` may edit association governance rules.
pub fn can_edit_governance(role: Role) -> bool {
    matches!(role, Role::AssociationAdmin)
}

/// Check whether `role` may resolve an exception of the given severity with
/// the given resolution method.
///
/// The matrix:
/// - TREASURER may CORRECT or REVALIDATE at any severity, but never OVERRIDE.
/// - ASSISTANT_TREASURER may use any method at any severity.
/// - ASSOCIATION_ADMIN may CORRECT or REVALIDATE at any severity, but may
///   OVERRIDE only HIGH or CRITICAL exceptions.
/// - All other roles may not resolve exceptions at all.
///
/// # Errors
/// Returns [Error::Permission] with a reason that distinguishes a wrong role
/// from a wrong severity tier.
pub fn check_exception_resolution(
    role: Role,
    severity: ExceptionSeverity,
    resolution: Resolution,
) -> Result<(), Error> {
    match role {
        Role::AssistantTreasurer => Ok(()),
        Role::Treasurer => match resolution {
            Resolution::Correct | Resolution::Revalidate => Ok(()),
            Resolution::Override => Err(Error::Permission(
                "treasurers may fix the underlying issue but may not override \
                 an exception; ask an assistant treasurer"
                    .to_owned(),
            )),
        },
        Role::AssociationAdmin => match resolution {
            Resolution::Correct | Resolution::Revalidate => Ok(()),
            Resolution::Override
                if matches!(
                    severity,
                    ExceptionSeverity::High | ExceptionSeverity::Critical
                ) =>
            {
                Ok(())
            }
            Resolution::Override => Err(Error::Permission(
                "association admins may only override HIGH or CRITICAL \
                 severity exceptions"
                    .to_owned(),
            )),
        },
        _ => Err(Error::Permission(format!(
            "the {role} role may not resolve exceptions"
        ))),
    }
}
