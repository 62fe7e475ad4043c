//! Gathering the facts the validation engine checks against.
//!
//! The engine itself is pure; everything it needs is loaded here into a
//! [ValidationContext] first. Loading and checking are split so the same
//! checks run identically for create, import, revalidation, and exception
//! resolution.

use std::collections::HashMap;

use rusqlite::Connection;
use time::{Date, OffsetDateTime};

use crate::{
    Error,
    budget::{BudgetAllocation, BudgetEnvelope, db as budget_db},
    governance::effective_receipt_policy,
    ids::{CategoryId, TeamId, TransactionId},
    receipt::ReceiptPolicy,
    snapshot::{AssociationRule, policy_in_force},
    team::{Category, get_active_categories, get_team_settings},
    transaction::models::TransactionType,
};

/// The transaction-shaped input to validation.
///
/// Carried separately from [crate::transaction::Transaction] so exception
/// resolution can validate proposed corrections before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFacts {
    /// The stored transaction this describes, unset for not-yet-saved data.
    pub id: Option<TransactionId>,
    /// The team that owns the transaction.
    pub team_id: TeamId,
    /// The amount in cents.
    pub amount_cents: i64,
    /// Income or expense.
    pub transaction_type: TransactionType,
    /// The spending category, if assigned.
    pub category_id: Option<CategoryId>,
    /// Who was paid or who paid.
    pub vendor: String,
    /// The day the money moved.
    pub transaction_date: Date,
    /// Whether a receipt is attached.
    pub has_receipt: bool,
}

/// An envelope together with the spend already counted against it.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeFacts {
    /// The envelope.
    pub envelope: BudgetEnvelope,
    /// Settled spend matched to this envelope, in cents.
    pub spent_cents: i64,
}

/// Everything the engine checks a transaction against.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationContext {
    /// The team's active categories.
    pub categories: Vec<Category>,
    /// The enforceable budget's allocations, or `None` when the team has no
    /// presented or locked budget. Draft budgets are not enforced.
    pub allocations: Option<Vec<BudgetAllocation>>,
    /// Settled expense spend per category, excluding the transaction under
    /// validation.
    pub spent_by_category: HashMap<CategoryId, i64>,
    /// The team's envelopes with their settled spend.
    pub envelopes: Vec<EnvelopeFacts>,
    /// The effective receipt policy (association plus team override).
    pub receipt_policy: ReceiptPolicy,
    /// The team's large-transaction review threshold, if set.
    pub large_transaction_threshold_cents: Option<i64>,
    /// The current season's date bounds, if a season is in progress.
    pub season_bounds: Option<(Date, Date)>,
    /// The association rules in force for this team.
    pub rules: Vec<AssociationRule>,
    /// Sibling transactions with the same vendor, amount and date.
    pub duplicate_count: i64,
    /// The evaluation date.
    pub today: Date,
}

/// Statuses whose spend counts toward budget and envelope caps.
const SETTLED_STATUSES: &str = "('VALIDATED', 'RESOLVED', 'LOCKED')";

fn settled_spend_by_category(
    team_id: TeamId,
    exclude: Option<TransactionId>,
    connection: &Connection,
) -> Result<HashMap<CategoryId, i64>, Error> {
    let rows: Vec<(CategoryId, i64)> = connection
        .prepare(&format!(
            "SELECT category_id, SUM(amount_cents) FROM team_transaction
             WHERE team_id = :team_id AND transaction_type = 'EXPENSE'
                AND category_id IS NOT NULL AND deleted_at IS NULL
                AND status IN {SETTLED_STATUSES}
                AND id != :exclude
             GROUP BY category_id"
        ))?
        .query_map(
            &[
                (":team_id", &team_id as &dyn rusqlite::ToSql),
                (":exclude", &exclude.unwrap_or(-1)),
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .collect::<Result<_, _>>()?;

    Ok(rows.into_iter().collect())
}

fn envelope_facts(
    team_id: TeamId,
    exclude: Option<TransactionId>,
    connection: &Connection,
) -> Result<Vec<EnvelopeFacts>, Error> {
    let envelopes = budget_db::envelopes_for_team(team_id, connection)?;
    if envelopes.is_empty() {
        return Ok(Vec::new());
    }

    // Vendor matching is a Rust-side concern (case folding, substring
    // modes), so pull the settled rows and fold in memory.
    let settled: Vec<(Option<CategoryId>, String, i64)> = connection
        .prepare(&format!(
            "SELECT category_id, vendor, amount_cents FROM team_transaction
             WHERE team_id = :team_id AND transaction_type = 'EXPENSE'
                AND deleted_at IS NULL AND status IN {SETTLED_STATUSES}
                AND id != :exclude"
        ))?
        .query_map(
            &[
                (":team_id", &team_id as &dyn rusqlite::ToSql),
                (":exclude", &exclude.unwrap_or(-1)),
            ],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?
        .collect::<Result<_, _>>()?;

    Ok(envelopes
        .into_iter()
        .map(|envelope| {
            let spent_cents = settled
                .iter()
                .filter(|(category_id, vendor, _)| {
                    *category_id == Some(envelope.category_id)
                        && envelope
                            .match_type
                            .matches(envelope.vendor_match.as_deref(), vendor)
                })
                .map(|(_, _, amount_cents)| amount_cents)
                .sum();

            EnvelopeFacts {
                envelope,
                spent_cents,
            }
        })
        .collect())
}

fn duplicate_count(facts: &TransactionFacts, connection: &Connection) -> Result<i64, Error> {
    connection
        .prepare(
            "SELECT COUNT(*) FROM team_transaction
             WHERE team_id = :team_id AND vendor = :vendor COLLATE NOCASE
                AND amount_cents = :amount_cents AND transaction_date = :transaction_date
                AND deleted_at IS NULL AND id != :exclude",
        )?
        .query_row(
            &[
                (":team_id", &facts.team_id as &dyn rusqlite::ToSql),
                (":vendor", &facts.vendor),
                (":amount_cents", &facts.amount_cents),
                (":transaction_date", &facts.transaction_date),
                (":exclude", &facts.id.unwrap_or(-1)),
            ],
            |row| row.get(0),
        )
        .map_err(|error| error.into())
}

fn enforceable_allocations(
    team_id: TeamId,
    connection: &Connection,
) -> Result<Option<Vec<BudgetAllocation>>, Error> {
    let Some(budget) = budget_db::latest_budget_for_team(team_id, connection)? else {
        return Ok(None);
    };
    let Some(presented_version_number) = budget.presented_version_number else {
        return Ok(None);
    };

    let version = budget_db::get_version(budget.id, presented_version_number, connection)?;

    Ok(Some(budget_db::get_allocations(version.id, connection)?))
}

/// Load everything validation needs for one transaction.
///
/// Policy comes from the season's frozen snapshot when a season is in
/// progress, and from live governance otherwise. A team whose association
/// has no governance rule validates under the default receipt policy and no
/// association rules.
///
/// # Errors
/// Returns [Error::NotFound] if the team does not exist, or an error if
/// there is an SQL error.
pub fn load_context(
    facts: &TransactionFacts,
    today: Date,
    connection: &Connection,
) -> Result<ValidationContext, Error> {
    let settings = get_team_settings(facts.team_id, connection)?;
    let (governance, rules, season) = policy_in_force(facts.team_id, today, connection)?;

    let season_bounds = season
        .as_ref()
        .map(|season| (season.start_date, season.end_date));

    let receipt_policy = governance
        .as_ref()
        .map(|governance| effective_receipt_policy(governance, &settings))
        .unwrap_or_default();

    Ok(ValidationContext {
        categories: get_active_categories(facts.team_id, connection)?,
        allocations: enforceable_allocations(facts.team_id, connection)?,
        spent_by_category: settled_spend_by_category(facts.team_id, facts.id, connection)?,
        envelopes: envelope_facts(facts.team_id, facts.id, connection)?,
        receipt_policy,
        large_transaction_threshold_cents: settings.large_transaction_threshold_cents,
        season_bounds,
        rules,
        duplicate_count: duplicate_count(facts, connection)?,
        today,
    })
}

/// [load_context] evaluated at today's date.
///
/// # Errors
/// Returns the same errors as [load_context].
pub fn load_context_now(
    facts: &TransactionFacts,
    connection: &Connection,
) -> Result<ValidationContext, Error> {
    load_context(facts, OffsetDateTime::now_utc().date(), connection)
}
