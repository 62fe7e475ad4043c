//! The budget lifecycle and acknowledgment threshold engine.
//!
//! A budget moves DRAFT -> REVIEW -> PRESENTED and locks when enough
//! families acknowledge the presented version. Associations that require
//! their own sign-off get an APPROVED stop between threshold and lock.
//! Every logical operation here runs inside one SQLite transaction;
//! the lock transition itself is a status-guarded conditional update so it
//! can happen at most once no matter how many acknowledgments race.

use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    Error, audit,
    budget::{
        db,
        models::{
            ApprovalProgress, Budget, BudgetAllocation, BudgetStatus, BudgetVersion,
            ThresholdConfig,
        },
    },
    family,
    governance::{self, ThresholdChoice, ThresholdMode},
    identity::{Actor, RequestIdentity},
    ids::{BudgetId, BudgetVersionId, FamilyId, TeamId, TeamSeasonId},
    permissions,
    team::get_team,
};

/// The result of recording an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcknowledgeOutcome {
    /// Whether this acknowledgment locked the budget.
    pub locked: bool,
    /// Whether the family had already acknowledged this version. A repeat
    /// acknowledgment succeeds without inserting a second record.
    pub already_acknowledged: bool,
    /// Progress against the threshold after this acknowledgment.
    pub progress: ApprovalProgress,
}

/// The result of a threshold check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockOutcome {
    /// Whether this check performed the lock transition.
    pub locked: bool,
    /// Progress at the time of the check.
    pub progress: ApprovalProgress,
}

fn progress_for(config: &ThresholdConfig, approved_count: i64) -> ApprovalProgress {
    let eligible_count = config.eligible_family_count;
    let percent_approved = if eligible_count > 0 {
        approved_count as f64 / eligible_count as f64 * 100.0
    } else {
        0.0
    };

    let threshold_value = match config.mode {
        ThresholdMode::Count => config.count_threshold,
        ThresholdMode::Percent => config.percent_threshold,
    }
    .unwrap_or(0);

    let threshold_met = match config.mode {
        ThresholdMode::Count => approved_count >= threshold_value,
        ThresholdMode::Percent => percent_approved >= threshold_value as f64,
    };

    ApprovalProgress {
        approved_count,
        eligible_count,
        percent_approved,
        threshold_met,
        threshold_mode: config.mode,
        threshold_value,
    }
}

fn validate_allocations(
    team_id: TeamId,
    allocations: &[BudgetAllocation],
    connection: &Connection,
) -> Result<i64, Error> {
    if allocations.is_empty() {
        return Err(Error::Validation {
            field: "allocations",
            message: "a budget needs at least one allocation".to_owned(),
        });
    }

    let categories = crate::team::get_active_categories(team_id, connection)?;

    let mut total_cents = 0;
    for allocation in allocations {
        if allocation.allocated_cents < 0 {
            return Err(Error::Validation {
                field: "allocations",
                message: "allocations must not be negative".to_owned(),
            });
        }

        if !categories
            .iter()
            .any(|category| category.id == allocation.category_id)
        {
            return Err(Error::Validation {
                field: "allocations",
                message: format!(
                    "category {} is not an active category for this team",
                    allocation.category_id
                ),
            });
        }

        total_cents += allocation.allocated_cents;
    }

    Ok(total_cents)
}

/// Create a DRAFT budget at version 1 with the given allocations.
///
/// # Errors
/// Returns [Error::Permission] unless the caller is a treasurer,
/// [Error::Validation] for bad allocations, [Error::InvalidState] if the
/// team already has a budget for the season, or an error if there is an
/// SQL error.
pub fn create_budget(
    team_id: TeamId,
    team_season_id: TeamSeasonId,
    allocations: &[BudgetAllocation],
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<Budget, Error> {
    if !permissions::can_edit_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not create budgets",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let total_cents = validate_allocations(team_id, allocations, &sql_transaction)?;
    let budget_id = db::insert_budget(team_id, team_season_id, &sql_transaction)?;
    let version_id = db::insert_version(
        budget_id,
        1,
        total_cents,
        None,
        identity.user_id,
        &sql_transaction,
    )?;
    db::insert_allocations(version_id, allocations, &sql_transaction)?;

    audit::record(
        "BUDGET_CREATED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({ "total_cents": total_cents }),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    db::get_budget(budget_id, connection)
}

/// Replace a DRAFT budget's allocations in place.
///
/// Drafts are the only mutable version; from presentation onward changes
/// go through [propose_update].
///
/// # Errors
/// Returns [Error::InvalidState] unless the budget is in DRAFT.
pub fn update_budget_draft(
    budget_id: BudgetId,
    allocations: &[BudgetAllocation],
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<(), Error> {
    if !permissions::can_edit_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not edit budgets",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Draft {
        return Err(Error::InvalidState(format!(
            "only DRAFT budgets may be edited in place (status is {})",
            budget.status.as_str()
        )));
    }

    validate_allocations(budget.team_id, allocations, &sql_transaction)?;
    let version = db::get_version(budget_id, budget.current_version_number, &sql_transaction)?;
    db::replace_allocations(version.id, allocations, &sql_transaction)?;

    audit::record(
        "BUDGET_DRAFT_UPDATED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({ "version": budget.current_version_number }),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    Ok(())
}

/// Submit a DRAFT budget for board review.
///
/// # Errors
/// Returns [Error::InvalidState] unless the budget is in DRAFT, or
/// [Error::ConcurrencyConflict] if the status changed mid-flight.
pub fn submit_for_review(
    budget_id: BudgetId,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<(), Error> {
    if !permissions::can_edit_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not submit budgets for review",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Draft {
        return Err(Error::InvalidState(format!(
            "only DRAFT budgets may be submitted for review (status is {})",
            budget.status.as_str()
        )));
    }

    let rows_affected = sql_transaction.execute(
        "UPDATE budget SET status = 'REVIEW', board_approved = 0
         WHERE id = ?1 AND status = 'DRAFT'",
        [budget_id],
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    audit::record(
        "BUDGET_SUBMITTED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({}),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    Ok(())
}

/// Record the board's review decision: approve, or send back to DRAFT.
///
/// # Errors
/// Returns [Error::Permission] unless the caller is the president or a
/// board member, or [Error::InvalidState] unless the budget is in REVIEW.
pub fn review_budget(
    budget_id: BudgetId,
    approve: bool,
    notes: Option<&str>,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<(), Error> {
    if !permissions::can_review_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not review budgets",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Review {
        return Err(Error::InvalidState(format!(
            "only budgets under REVIEW may be reviewed (status is {})",
            budget.status.as_str()
        )));
    }

    let rows_affected = if approve {
        sql_transaction.execute(
            "UPDATE budget SET board_approved = 1, review_notes = ?1
             WHERE id = ?2 AND status = 'REVIEW'",
            (notes, budget_id),
        )?
    } else {
        sql_transaction.execute(
            "UPDATE budget SET status = 'DRAFT', board_approved = 0, review_notes = ?1
             WHERE id = ?2 AND status = 'REVIEW'",
            (notes, budget_id),
        )?
    };
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    audit::record(
        "BUDGET_REVIEWED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({ "approved": approve }),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    Ok(())
}

/// Present a board-approved budget to parents for acknowledgment.
///
/// The association's threshold configuration is frozen into the budget's
/// own threshold config at this instant; acknowledgment never reads
/// governance live.
///
/// # Errors
/// Returns [Error::InvalidState] unless the budget is board-approved and
/// under REVIEW, plus the usual permission and SQL errors.
pub fn present_to_parents(
    budget_id: BudgetId,
    team_choice: Option<ThresholdChoice>,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<(), Error> {
    if !permissions::can_present_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not present budgets",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Review {
        return Err(Error::InvalidState(format!(
            "only budgets under REVIEW may be presented (status is {})",
            budget.status.as_str()
        )));
    }
    if !budget.board_approved {
        return Err(Error::InvalidState(
            "the budget has not been approved by the board".to_owned(),
        ));
    }

    let team = get_team(budget.team_id, &sql_transaction)?;
    let rule = governance::get_governance_rule(team.association_id, &sql_transaction)?;
    let choice = governance::resolve_threshold(&rule, team_choice)?;
    let eligible_family_count = family::eligible_family_count(team.id, &sql_transaction)?;

    let config = ThresholdConfig {
        mode: choice.mode,
        count_threshold: (choice.mode == ThresholdMode::Count).then_some(choice.value),
        percent_threshold: (choice.mode == ThresholdMode::Percent).then_some(choice.value),
        eligible_family_count,
        requires_association_approval: rule.requires_association_approval,
    };
    db::upsert_threshold_config(budget_id, &config, &sql_transaction)?;

    let rows_affected = sql_transaction.execute(
        "UPDATE budget SET status = 'PRESENTED', presented_version_number = current_version_number
         WHERE id = ?1 AND status = 'REVIEW' AND board_approved = 1",
        [budget_id],
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    audit::record(
        "BUDGET_PRESENTED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({
            "version": budget.current_version_number,
            "threshold_mode": choice.mode.as_str(),
            "threshold_value": choice.value,
            "eligible_family_count": eligible_family_count,
        }),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    Ok(())
}

/// Re-evaluate the threshold and lock the budget if it is satisfied.
///
/// Safe to call any number of times: on an already-LOCKED budget it is a
/// no-op that reports progress against the frozen denominator. Pre-lock,
/// the eligible family count is refreshed from the roster first.
///
/// # Errors
/// Returns [Error::InvalidState] if the budget has never been presented.
pub fn check_threshold_and_lock(
    budget_id: BudgetId,
    connection: &Connection,
) -> Result<LockOutcome, Error> {
    let budget = db::get_budget(budget_id, connection)?;
    let config = db::get_threshold_config(budget_id, connection)?.ok_or_else(|| {
        Error::InvalidState("the budget has not been presented to parents".to_owned())
    })?;
    let presented_version_number = budget.presented_version_number.ok_or_else(|| {
        Error::InvalidState("the budget has not been presented to parents".to_owned())
    })?;

    let version = db::get_version(budget_id, presented_version_number, connection)?;
    let approved_count = db::approval_count(version.id, connection)?;

    match budget.status {
        // Locking is a one-way ratchet. The denominator is frozen as of
        // the lock, so late roster changes cannot reopen the budget.
        BudgetStatus::Locked => Ok(LockOutcome {
            locked: false,
            progress: progress_for(&config, approved_count),
        }),
        BudgetStatus::Presented | BudgetStatus::Approved => {
            let eligible_family_count =
                family::eligible_family_count(budget.team_id, connection)?;
            if eligible_family_count != config.eligible_family_count {
                db::set_eligible_family_count(budget_id, eligible_family_count, connection)?;
            }
            let config = ThresholdConfig {
                eligible_family_count,
                ..config
            };

            let progress = progress_for(&config, approved_count);
            if !progress.threshold_met {
                return Ok(LockOutcome {
                    locked: false,
                    progress,
                });
            }

            if budget.status == BudgetStatus::Presented && config.requires_association_approval {
                let rows_affected = connection.execute(
                    "UPDATE budget SET status = 'APPROVED' WHERE id = ?1 AND status = 'PRESENTED'",
                    [budget_id],
                )?;
                if rows_affected > 0 {
                    audit::record(
                        "BUDGET_THRESHOLD_MET",
                        Actor::System,
                        "budget",
                        budget_id,
                        &json!({ "approved_count": approved_count }),
                        connection,
                    )?;
                }

                return Ok(LockOutcome {
                    locked: false,
                    progress,
                });
            }

            if budget.status == BudgetStatus::Presented {
                let rows_affected = connection.execute(
                    "UPDATE budget
                     SET status = 'LOCKED', locked_at = ?1, locked_by_type = 'SYSTEM',
                         locked_by_id = NULL
                     WHERE id = ?2 AND status = 'PRESENTED'",
                    (OffsetDateTime::now_utc(), budget_id),
                )?;
                if rows_affected > 0 {
                    audit::record(
                        "BUDGET_LOCKED",
                        Actor::System,
                        "budget",
                        budget_id,
                        &json!({ "approved_count": approved_count }),
                        connection,
                    )?;
                }

                return Ok(LockOutcome {
                    locked: rows_affected > 0,
                    progress,
                });
            }

            // APPROVED budgets wait for approve_as_association.
            Ok(LockOutcome {
                locked: false,
                progress,
            })
        }
        _ => Err(Error::InvalidState(format!(
            "the budget is not open for acknowledgment (status is {})",
            budget.status.as_str()
        ))),
    }
}

/// Record a family's acknowledgment of the presented version, then run the
/// threshold check, all in one transaction.
///
/// A repeat acknowledgment by the same family is an idempotent success:
/// no second record is written and current progress is returned.
///
/// # Errors
/// Returns [Error::InvalidState] unless the budget is PRESENTED and
/// `budget_version_id` is the presented version, or [Error::Validation]
/// if the family is not eligible.
pub fn acknowledge_budget(
    budget_id: BudgetId,
    budget_version_id: BudgetVersionId,
    family_id: FamilyId,
    identity: RequestIdentity,
    comment: Option<&str>,
    has_questions: bool,
    connection: &Connection,
) -> Result<AcknowledgeOutcome, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Presented {
        return Err(Error::InvalidState(format!(
            "the budget is not open for acknowledgment (status is {})",
            budget.status.as_str()
        )));
    }

    let presented_version_number = budget.presented_version_number.ok_or_else(|| {
        Error::InvalidState("the budget has not been presented to parents".to_owned())
    })?;
    let version = db::get_version(budget_id, presented_version_number, &sql_transaction)?;
    if version.id != budget_version_id {
        return Err(Error::InvalidState(
            "acknowledgments must target the currently presented version".to_owned(),
        ));
    }

    if !family::is_family_eligible(family_id, budget.team_id, &sql_transaction)? {
        return Err(Error::Validation {
            field: "family_id",
            message: "the family is not on this team's active roster".to_owned(),
        });
    }

    let inserted = db::insert_approval(
        version.id,
        family_id,
        identity.user_id,
        comment,
        has_questions,
        &sql_transaction,
    )?;
    if inserted {
        audit::record(
            "BUDGET_ACKNOWLEDGED",
            identity.actor(),
            "budget_version",
            version.id,
            &json!({ "family_id": family_id, "has_questions": has_questions }),
            &sql_transaction,
        )?;
    }

    let outcome = check_threshold_and_lock(budget_id, &sql_transaction)?;
    sql_transaction.commit()?;

    Ok(AcknowledgeOutcome {
        locked: outcome.locked,
        already_acknowledged: !inserted,
        progress: outcome.progress,
    })
}

/// The association's final sign-off, locking an APPROVED budget.
///
/// Unlike threshold locks, this one is attributed to the approving user.
///
/// # Errors
/// Returns [Error::InvalidState] unless the budget is APPROVED, or
/// [Error::ConcurrencyConflict] if another sign-off raced this one.
pub fn approve_as_association(
    budget_id: BudgetId,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<(), Error> {
    if !permissions::can_edit_governance(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not give association approval",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Approved {
        return Err(Error::InvalidState(format!(
            "the budget is not awaiting association approval (status is {})",
            budget.status.as_str()
        )));
    }

    let rows_affected = sql_transaction.execute(
        "UPDATE budget
         SET status = 'LOCKED', locked_at = ?1, locked_by_type = 'USER', locked_by_id = ?2
         WHERE id = ?3 AND status = 'APPROVED'",
        (OffsetDateTime::now_utc(), identity.user_id, budget_id),
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    audit::record(
        "BUDGET_LOCKED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({ "association_approval": true }),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    Ok(())
}

/// Refresh the threshold denominator after a roster change.
///
/// Pre-lock the denominator is live; post-lock it is frozen and this
/// function is a no-op. A shrinking roster can satisfy a percent
/// threshold, so the threshold check runs after the refresh.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn update_eligible_family_count(
    budget_id: BudgetId,
    connection: &Connection,
) -> Result<Option<ApprovalProgress>, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    if db::get_threshold_config(budget_id, &sql_transaction)?.is_none() {
        return Ok(None);
    }

    let outcome = check_threshold_and_lock(budget_id, &sql_transaction)?;
    sql_transaction.commit()?;

    Ok(Some(outcome.progress))
}

/// Create version N+1 of a PRESENTED budget.
///
/// All prior acknowledgments are void for threshold purposes: a changed
/// budget requires fresh consent, so the new version starts at zero
/// approvals.
///
/// # Errors
/// Returns [Error::Validation] if the change summary is shorter than 10
/// characters, [Error::InvalidState] unless the budget is PRESENTED, or
/// [Error::ConcurrencyConflict] if a concurrent proposal claimed the
/// version number first.
pub fn propose_update(
    budget_id: BudgetId,
    change_summary: &str,
    allocations: &[BudgetAllocation],
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<BudgetVersion, Error> {
    if !permissions::can_edit_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not propose budget updates",
            identity.role
        )));
    }

    if change_summary.chars().count() < 10 {
        return Err(Error::Validation {
            field: "change_summary",
            message: "the change summary must be at least 10 characters".to_owned(),
        });
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let budget = db::get_budget(budget_id, &sql_transaction)?;
    if budget.status != BudgetStatus::Presented {
        return Err(Error::InvalidState(format!(
            "updates may only be proposed while the budget is PRESENTED (status is {})",
            budget.status.as_str()
        )));
    }

    let total_cents = validate_allocations(budget.team_id, allocations, &sql_transaction)?;
    let new_version_number = budget.current_version_number + 1;
    let version_id = db::insert_version(
        budget_id,
        new_version_number,
        total_cents,
        Some(change_summary),
        identity.user_id,
        &sql_transaction,
    )?;
    db::insert_allocations(version_id, allocations, &sql_transaction)?;

    let rows_affected = sql_transaction.execute(
        "UPDATE budget SET current_version_number = ?1, presented_version_number = ?1
         WHERE id = ?2 AND status = 'PRESENTED' AND current_version_number = ?3",
        (new_version_number, budget_id, budget.current_version_number),
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    audit::record(
        "BUDGET_VERSION_PROPOSED",
        identity.actor(),
        "budget",
        budget_id,
        &json!({ "version": new_version_number, "change_summary": change_summary }),
        &sql_transaction,
    )?;
    sql_transaction.commit()?;

    db::get_version(budget_id, new_version_number, connection)
}

/// Read acknowledgment progress for a budget, or `None` if it has never
/// been presented.
///
/// Read-only: the stored denominator is not refreshed here, but the live
/// roster count is used for pre-lock budgets so displayed percentages
/// track reality.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_approval_progress(
    budget_id: BudgetId,
    connection: &Connection,
) -> Result<Option<ApprovalProgress>, Error> {
    let budget = db::get_budget(budget_id, connection)?;
    let Some(config) = db::get_threshold_config(budget_id, connection)? else {
        return Ok(None);
    };
    let Some(presented_version_number) = budget.presented_version_number else {
        return Ok(None);
    };

    let version = db::get_version(budget_id, presented_version_number, connection)?;
    let approved_count = db::approval_count(version.id, connection)?;

    let config = if budget.status == BudgetStatus::Locked {
        config
    } else {
        ThresholdConfig {
            eligible_family_count: family::eligible_family_count(budget.team_id, connection)?,
            ..config
        }
    };

    Ok(Some(progress_for(&config, approved_count)))
}

#[cfg(test)]
mod workflow_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        Error,
        budget::{
            db,
            models::{BudgetAllocation, BudgetStatus},
        },
        db::initialize,
        family::{PlayerStatus, add_player, create_family, set_player_status},
        governance::{
            GovernanceRule, ThresholdChoice, ThresholdMode, create_association,
            upsert_governance_rule,
        },
        identity::{Actor, RequestIdentity, Role},
        receipt::ReceiptPolicy,
        snapshot::create_team_season_with_snapshot,
        team::{create_category, create_team},
    };

    use super::{
        acknowledge_budget, approve_as_association, check_threshold_and_lock, create_budget,
        get_approval_progress, present_to_parents, propose_update, review_budget,
        submit_for_review, update_budget_draft, update_eligible_family_count,
    };

    const TREASURER: RequestIdentity = RequestIdentity {
        user_id: 1,
        role: Role::Treasurer,
    };
    const PRESIDENT: RequestIdentity = RequestIdentity {
        user_id: 2,
        role: Role::President,
    };
    const ADMIN: RequestIdentity = RequestIdentity {
        user_id: 3,
        role: Role::AssociationAdmin,
    };
    const PARENT: RequestIdentity = RequestIdentity {
        user_id: 100,
        role: Role::Parent,
    };

    struct Fixture {
        conn: Connection,
        team_id: i64,
        team_season_id: i64,
        category_id: i64,
        family_ids: Vec<i64>,
        family_player_ids: Vec<i64>,
    }

    /// An association in PERCENT mode at 60%, one team, one category, and
    /// five eligible families.
    fn fixture(mode: ThresholdMode, requires_association_approval: bool) -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let association_id = create_association("Test League", &conn).unwrap();
        let rule = GovernanceRule {
            association_id,
            parent_ack_mode: mode,
            default_count_threshold: (mode == ThresholdMode::Count).then_some(3),
            default_percent_threshold: (mode == ThresholdMode::Percent).then_some(60),
            allow_team_override: false,
            override_min_percent: None,
            override_max_percent: None,
            override_min_count: None,
            override_max_count: None,
            requires_association_approval,
            receipt_policy: ReceiptPolicy::default(),
        };
        upsert_governance_rule(&rule, &conn).unwrap();

        let team = create_team(association_id, "U12 Comets", &conn).unwrap();
        let season = create_team_season_with_snapshot(
            team.id,
            association_id,
            "2026 Spring",
            date!(2026 - 03 - 01),
            date!(2026 - 06 - 30),
            &conn,
        )
        .unwrap();
        let category = create_category(team.id, "Equipment", &conn).unwrap();

        let mut family_ids = Vec::new();
        let mut family_player_ids = Vec::new();
        for name in ["A", "B", "C", "D", "E"] {
            let family = create_family(team.id, name, &conn).unwrap();
            let player_id = add_player(family.id, name, PlayerStatus::Active, &conn).unwrap();
            family_ids.push(family.id);
            family_player_ids.push(player_id);
        }

        Fixture {
            conn,
            team_id: team.id,
            team_season_id: season.id,
            category_id: category.id,
            family_ids,
            family_player_ids,
        }
    }

    fn presented_budget(fixture: &Fixture) -> (i64, i64) {
        let allocations = [BudgetAllocation {
            category_id: fixture.category_id,
            allocated_cents: 100_000,
        }];

        let budget = create_budget(
            fixture.team_id,
            fixture.team_season_id,
            &allocations,
            TREASURER,
            &fixture.conn,
        )
        .unwrap();
        submit_for_review(budget.id, TREASURER, &fixture.conn).unwrap();
        review_budget(budget.id, true, None, PRESIDENT, &fixture.conn).unwrap();
        present_to_parents(budget.id, None, TREASURER, &fixture.conn).unwrap();

        let refreshed = db::get_budget(budget.id, &fixture.conn).unwrap();
        let version = db::get_version(
            budget.id,
            refreshed.presented_version_number.unwrap(),
            &fixture.conn,
        )
        .unwrap();

        (budget.id, version.id)
    }

    fn acknowledge(
        fixture: &Fixture,
        budget_id: i64,
        version_id: i64,
        family_index: usize,
    ) -> super::AcknowledgeOutcome {
        acknowledge_budget(
            budget_id,
            version_id,
            fixture.family_ids[family_index],
            RequestIdentity {
                user_id: 100 + family_index as i64,
                role: Role::Parent,
            },
            None,
            false,
            &fixture.conn,
        )
        .unwrap()
    }

    #[test]
    fn parents_may_not_create_budgets() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let allocations = [BudgetAllocation {
            category_id: fixture.category_id,
            allocated_cents: 100_000,
        }];

        let result = create_budget(
            fixture.team_id,
            fixture.team_season_id,
            &allocations,
            PARENT,
            &fixture.conn,
        );

        assert!(matches!(result, Err(Error::Permission(_))));
    }

    #[test]
    fn presenting_requires_board_approval() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let allocations = [BudgetAllocation {
            category_id: fixture.category_id,
            allocated_cents: 100_000,
        }];
        let budget = create_budget(
            fixture.team_id,
            fixture.team_season_id,
            &allocations,
            TREASURER,
            &fixture.conn,
        )
        .unwrap();
        submit_for_review(budget.id, TREASURER, &fixture.conn).unwrap();

        let result = present_to_parents(budget.id, None, TREASURER, &fixture.conn);

        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn send_back_returns_budget_to_draft() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let allocations = [BudgetAllocation {
            category_id: fixture.category_id,
            allocated_cents: 100_000,
        }];
        let budget = create_budget(
            fixture.team_id,
            fixture.team_season_id,
            &allocations,
            TREASURER,
            &fixture.conn,
        )
        .unwrap();
        submit_for_review(budget.id, TREASURER, &fixture.conn).unwrap();

        review_budget(
            budget.id,
            false,
            Some("Travel line looks too thin"),
            PRESIDENT,
            &fixture.conn,
        )
        .unwrap();

        let refreshed = db::get_budget(budget.id, &fixture.conn).unwrap();
        assert_eq!(refreshed.status, BudgetStatus::Draft);
        assert_eq!(
            refreshed.review_notes.as_deref(),
            Some("Travel line looks too thin")
        );

        // Sent-back drafts are editable again.
        update_budget_draft(budget.id, &allocations, TREASURER, &fixture.conn).unwrap();
    }

    #[test]
    fn percent_budget_locks_at_sixty_percent_of_five() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);

        let after_a = acknowledge(&fixture, budget_id, version_id, 0);
        assert!(!after_a.locked);
        assert_eq!(after_a.progress.percent_approved, 20.0);

        let after_b = acknowledge(&fixture, budget_id, version_id, 1);
        assert!(!after_b.locked);
        assert_eq!(after_b.progress.percent_approved, 40.0);

        let after_c = acknowledge(&fixture, budget_id, version_id, 2);
        assert!(after_c.locked);
        assert_eq!(after_c.progress.percent_approved, 60.0);

        let budget = db::get_budget(budget_id, &fixture.conn).unwrap();
        assert_eq!(budget.status, BudgetStatus::Locked);
        assert_eq!(budget.locked_by, Some(Actor::System));
        assert!(budget.locked_at.is_some());

        // Family D is too late: the budget is no longer PRESENTED.
        let result = acknowledge_budget(
            budget_id,
            version_id,
            fixture.family_ids[3],
            RequestIdentity {
                user_id: 103,
                role: Role::Parent,
            },
            None,
            false,
            &fixture.conn,
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn count_threshold_met_at_three_not_two() {
        let fixture = fixture(ThresholdMode::Count, false);
        let (budget_id, version_id) = presented_budget(&fixture);

        assert!(!acknowledge(&fixture, budget_id, version_id, 0).locked);
        let after_two = acknowledge(&fixture, budget_id, version_id, 1);
        assert!(!after_two.locked);
        assert!(!after_two.progress.threshold_met);

        let after_three = acknowledge(&fixture, budget_id, version_id, 2);
        assert!(after_three.locked);
        assert!(after_three.progress.threshold_met);
    }

    #[test]
    fn duplicate_acknowledgment_is_an_idempotent_success() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);

        let first = acknowledge(&fixture, budget_id, version_id, 0);
        let second = acknowledge(&fixture, budget_id, version_id, 0);

        assert!(!first.already_acknowledged);
        assert!(second.already_acknowledged);
        assert_eq!(second.progress.approved_count, 1);
    }

    #[test]
    fn acknowledgment_must_target_the_presented_version() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);

        let result = acknowledge_budget(
            budget_id,
            version_id + 999,
            fixture.family_ids[0],
            PARENT,
            None,
            false,
            &fixture.conn,
        );

        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn roster_changes_never_unlock_a_locked_budget() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);
        for family_index in 0..3 {
            acknowledge(&fixture, budget_id, version_id, family_index);
        }
        assert_eq!(
            db::get_budget(budget_id, &fixture.conn).unwrap().status,
            BudgetStatus::Locked
        );

        // Grow the roster so 3 of 7 would no longer satisfy 60%.
        for name in ["F", "G"] {
            let family = create_family(fixture.team_id, name, &fixture.conn).unwrap();
            add_player(family.id, name, PlayerStatus::Active, &fixture.conn).unwrap();
        }
        let progress = update_eligible_family_count(budget_id, &fixture.conn)
            .unwrap()
            .unwrap();

        assert_eq!(
            db::get_budget(budget_id, &fixture.conn).unwrap().status,
            BudgetStatus::Locked
        );
        // The denominator stays frozen at the value it locked with.
        assert_eq!(progress.eligible_count, 5);
    }

    #[test]
    fn denominator_is_live_before_the_lock() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);
        acknowledge(&fixture, budget_id, version_id, 0);
        acknowledge(&fixture, budget_id, version_id, 1);

        // Families D and E drop off the roster: 2 of 3 is 66%, over the
        // 60% threshold, so the refresh locks the budget.
        set_player_status(
            fixture.family_player_ids[3],
            PlayerStatus::Inactive,
            &fixture.conn,
        )
        .unwrap();
        set_player_status(
            fixture.family_player_ids[4],
            PlayerStatus::Inactive,
            &fixture.conn,
        )
        .unwrap();
        update_eligible_family_count(budget_id, &fixture.conn).unwrap();

        let budget = db::get_budget(budget_id, &fixture.conn).unwrap();
        assert_eq!(budget.status, BudgetStatus::Locked);
        assert_eq!(budget.locked_by, Some(Actor::System));
    }

    #[test]
    fn at_most_one_lock_under_concurrent_acknowledgments() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);
        acknowledge(&fixture, budget_id, version_id, 0);
        acknowledge(&fixture, budget_id, version_id, 1);

        // Three more families race to cross the 60% line.
        let shared = Arc::new(Mutex::new(fixture.conn));
        let mut handles = Vec::new();
        for family_index in 2..5 {
            let shared = Arc::clone(&shared);
            let family_id = fixture.family_ids[family_index];
            handles.push(std::thread::spawn(move || {
                let conn = shared.lock().unwrap();
                acknowledge_budget(
                    budget_id,
                    version_id,
                    family_id,
                    RequestIdentity {
                        user_id: 100 + family_index as i64,
                        role: Role::Parent,
                    },
                    None,
                    false,
                    &conn,
                )
            }));
        }

        let outcomes: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let locks = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, Ok(outcome) if outcome.locked))
            .count();
        assert_eq!(locks, 1);

        // Late acknowledgments fail with InvalidState rather than double
        // locking; none may report a second lock.
        let conn = shared.lock().unwrap();
        let lock_entries: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM audit_log
                 WHERE action = 'BUDGET_LOCKED' AND entity_id = ?1",
                [budget_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(lock_entries, 1);
    }

    #[test]
    fn propose_update_voids_prior_approvals() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);
        acknowledge(&fixture, budget_id, version_id, 0);
        acknowledge(&fixture, budget_id, version_id, 1);

        let new_version = propose_update(
            budget_id,
            "Raised the equipment line after sponsor pullout",
            &[BudgetAllocation {
                category_id: fixture.category_id,
                allocated_cents: 150_000,
            }],
            TREASURER,
            &fixture.conn,
        )
        .unwrap();

        assert_eq!(new_version.version_number, 2);
        let progress = get_approval_progress(budget_id, &fixture.conn)
            .unwrap()
            .unwrap();
        assert_eq!(progress.approved_count, 0);

        // Old acknowledgments no longer target the presented version.
        let result = acknowledge_budget(
            budget_id,
            version_id,
            fixture.family_ids[2],
            PARENT,
            None,
            false,
            &fixture.conn,
        );
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn propose_update_requires_a_real_change_summary() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, _version_id) = presented_budget(&fixture);

        let result = propose_update(
            budget_id,
            "typo fix",
            &[BudgetAllocation {
                category_id: fixture.category_id,
                allocated_cents: 100_000,
            }],
            TREASURER,
            &fixture.conn,
        );

        assert!(matches!(
            result,
            Err(Error::Validation {
                field: "change_summary",
                ..
            })
        ));
    }

    #[test]
    fn old_version_allocations_are_never_mutated() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, _) = presented_budget(&fixture);
        let version_one = db::get_version(budget_id, 1, &fixture.conn).unwrap();
        let before = db::get_allocations(version_one.id, &fixture.conn).unwrap();

        propose_update(
            budget_id,
            "Raised the equipment line after sponsor pullout",
            &[BudgetAllocation {
                category_id: fixture.category_id,
                allocated_cents: 150_000,
            }],
            TREASURER,
            &fixture.conn,
        )
        .unwrap();

        let after = db::get_allocations(version_one.id, &fixture.conn).unwrap();
        assert_eq!(before, after);
        assert_eq!(after[0].allocated_cents, 100_000);
    }

    #[test]
    fn association_approval_path_stops_at_approved_then_locks_with_user_actor() {
        let fixture = fixture(ThresholdMode::Percent, true);
        let (budget_id, version_id) = presented_budget(&fixture);

        for family_index in 0..3 {
            acknowledge(&fixture, budget_id, version_id, family_index);
        }

        let budget = db::get_budget(budget_id, &fixture.conn).unwrap();
        assert_eq!(budget.status, BudgetStatus::Approved);
        assert_eq!(budget.locked_by, None);

        approve_as_association(budget_id, ADMIN, &fixture.conn).unwrap();

        let locked = db::get_budget(budget_id, &fixture.conn).unwrap();
        assert_eq!(locked.status, BudgetStatus::Locked);
        assert_eq!(locked.locked_by, Some(Actor::User(ADMIN.user_id)));
    }

    #[test]
    fn progress_is_none_before_presentation() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let budget = create_budget(
            fixture.team_id,
            fixture.team_season_id,
            &[BudgetAllocation {
                category_id: fixture.category_id,
                allocated_cents: 100_000,
            }],
            TREASURER,
            &fixture.conn,
        )
        .unwrap();

        assert_eq!(get_approval_progress(budget.id, &fixture.conn).unwrap(), None);
    }

    #[test]
    fn threshold_check_on_locked_budget_is_a_no_op() {
        let fixture = fixture(ThresholdMode::Percent, false);
        let (budget_id, version_id) = presented_budget(&fixture);
        for family_index in 0..3 {
            acknowledge(&fixture, budget_id, version_id, family_index);
        }

        let outcome = check_threshold_and_lock(budget_id, &fixture.conn).unwrap();

        assert!(!outcome.locked);
        assert!(outcome.progress.threshold_met);
    }
}
