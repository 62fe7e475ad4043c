//! Budget persistence: tables, row mapping, and low-level queries.
//!
//! The workflow rules live in [super::workflow]; this module only moves
//! rows. Multi-row invariants (version monotonicity, at-most-one lock) are
//! backed here by UNIQUE constraints and status-guarded updates.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::{
    Error,
    budget::models::{
        Budget, BudgetAllocation, BudgetEnvelope, BudgetStatus, BudgetVersion, EnvelopeMatchType,
        ThresholdConfig,
    },
    governance::ThresholdMode,
    identity::Actor,
    ids::{BudgetId, BudgetVersionId, CategoryId, FamilyId, TeamId, TeamSeasonId, UserId},
};

/// Create the budget tables.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_budget_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                team_season_id INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'DRAFT',
                current_version_number INTEGER NOT NULL DEFAULT 1,
                presented_version_number INTEGER,
                board_approved INTEGER NOT NULL DEFAULT 0,
                locked_at TEXT,
                locked_by_type TEXT,
                locked_by_id INTEGER,
                review_notes TEXT,
                FOREIGN KEY(team_id) REFERENCES team(id),
                FOREIGN KEY(team_season_id) REFERENCES team_season(id),
                UNIQUE(team_id, team_season_id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget_version (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                budget_id INTEGER NOT NULL,
                version_number INTEGER NOT NULL,
                total_cents INTEGER NOT NULL,
                change_summary TEXT,
                created_by INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(budget_id) REFERENCES budget(id),
                UNIQUE(budget_id, version_number)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget_allocation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                allocated_cents INTEGER NOT NULL,
                FOREIGN KEY(version_id) REFERENCES budget_version(id),
                FOREIGN KEY(category_id) REFERENCES category(id),
                UNIQUE(version_id, category_id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget_threshold_config (
                budget_id INTEGER PRIMARY KEY,
                mode TEXT NOT NULL,
                count_threshold INTEGER,
                percent_threshold INTEGER,
                eligible_family_count INTEGER NOT NULL,
                requires_association_approval INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(budget_id) REFERENCES budget(id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget_version_approval (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version_id INTEGER NOT NULL,
                family_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                comment TEXT,
                has_questions INTEGER NOT NULL DEFAULT 0,
                acknowledged_at TEXT NOT NULL,
                FOREIGN KEY(version_id) REFERENCES budget_version(id),
                FOREIGN KEY(family_id) REFERENCES family(id),
                UNIQUE(version_id, family_id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget_envelope (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL,
                vendor_match TEXT,
                match_type TEXT NOT NULL DEFAULT 'ANY',
                cap_cents INTEGER NOT NULL,
                max_single_transaction_cents INTEGER,
                FOREIGN KEY(team_id) REFERENCES team(id),
                FOREIGN KEY(category_id) REFERENCES category(id)
            );",
        (),
    )?;

    Ok(())
}

fn map_budget_row(row: &Row) -> Result<Budget, rusqlite::Error> {
    let status: String = row.get(3)?;
    let status = BudgetStatus::parse(&status).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown budget status {status}").into(),
        )
    })?;

    let locked_by_type: Option<String> = row.get(8)?;
    let locked_by_id: Option<UserId> = row.get(9)?;
    let locked_by = locked_by_type.map(|actor_type| Actor::from_columns(&actor_type, locked_by_id));

    Ok(Budget {
        id: row.get(0)?,
        team_id: row.get(1)?,
        team_season_id: row.get(2)?,
        status,
        current_version_number: row.get(4)?,
        presented_version_number: row.get(5)?,
        board_approved: row.get(6)?,
        locked_at: row.get(7)?,
        locked_by,
        review_notes: row.get(10)?,
    })
}

const BUDGET_COLUMNS: &str = "id, team_id, team_season_id, status, current_version_number,
    presented_version_number, board_approved, locked_at, locked_by_type, locked_by_id,
    review_notes";

/// Insert a new DRAFT budget at version 1.
///
/// # Errors
/// Returns [Error::InvalidState] if the team already has a budget for the
/// season, or an error if there is an SQL error.
pub fn insert_budget(
    team_id: TeamId,
    team_season_id: TeamSeasonId,
    connection: &Connection,
) -> Result<BudgetId, Error> {
    connection
        .execute(
            "INSERT INTO budget (team_id, team_season_id) VALUES (?1, ?2)",
            (team_id, team_season_id),
        )
        .map_err(|error| match error {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(_))
                if sql_error.extended_code == 2067 =>
            {
                Error::InvalidState(
                    "the team already has a budget for this season".to_owned(),
                )
            }
            error => error.into(),
        })?;

    Ok(connection.last_insert_rowid())
}

/// Retrieve a budget by `budget_id`.
///
/// # Errors
/// Returns [Error::NotFound] if `budget_id` does not refer to a budget.
pub fn get_budget(budget_id: BudgetId, connection: &Connection) -> Result<Budget, Error> {
    connection
        .prepare(&format!("SELECT {BUDGET_COLUMNS} FROM budget WHERE id = :id"))?
        .query_row(&[(":id", &budget_id)], map_budget_row)
        .map_err(|error| error.into())
}

/// Retrieve the most recently created budget for a team, if any.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn latest_budget_for_team(
    team_id: TeamId,
    connection: &Connection,
) -> Result<Option<Budget>, Error> {
    connection
        .prepare(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budget
             WHERE team_id = :team_id ORDER BY id DESC LIMIT 1"
        ))?
        .query_row(&[(":team_id", &team_id)], map_budget_row)
        .optional()
        .map_err(|error| error.into())
}

/// Insert a budget version.
///
/// Version numbers are serialized by the UNIQUE(budget_id, version_number)
/// constraint: when two writers race to create the same version, the loser
/// gets [Error::ConcurrencyConflict].
///
/// # Errors
/// Returns [Error::ConcurrencyConflict] on a version-number collision, or
/// an error if there is an SQL error.
pub fn insert_version(
    budget_id: BudgetId,
    version_number: i64,
    total_cents: i64,
    change_summary: Option<&str>,
    created_by: UserId,
    connection: &Connection,
) -> Result<BudgetVersionId, Error> {
    connection
        .execute(
            "INSERT INTO budget_version
                (budget_id, version_number, total_cents, change_summary, created_by, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                budget_id,
                version_number,
                total_cents,
                change_summary,
                created_by,
                time::OffsetDateTime::now_utc(),
            ),
        )
        .map_err(|error| match error {
            rusqlite::Error::SqliteFailure(sql_error, Some(_))
                if sql_error.extended_code == 2067 =>
            {
                Error::ConcurrencyConflict
            }
            error => error.into(),
        })?;

    Ok(connection.last_insert_rowid())
}

/// Retrieve a budget version by its number.
///
/// # Errors
/// Returns [Error::NotFound] if the version does not exist.
pub fn get_version(
    budget_id: BudgetId,
    version_number: i64,
    connection: &Connection,
) -> Result<BudgetVersion, Error> {
    connection
        .prepare(
            "SELECT id, budget_id, version_number, total_cents, change_summary, created_by,
                    created_at
             FROM budget_version
             WHERE budget_id = :budget_id AND version_number = :version_number",
        )?
        .query_row(
            &[
                (":budget_id", &budget_id),
                (":version_number", &version_number),
            ],
            |row| {
                Ok(BudgetVersion {
                    id: row.get(0)?,
                    budget_id: row.get(1)?,
                    version_number: row.get(2)?,
                    total_cents: row.get(3)?,
                    change_summary: row.get(4)?,
                    created_by: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .map_err(|error| error.into())
}

/// Insert allocations under a version.
///
/// # Errors
/// Returns [Error::Validation] if a category appears twice, or an error if
/// there is an SQL error.
pub fn insert_allocations(
    version_id: BudgetVersionId,
    allocations: &[BudgetAllocation],
    connection: &Connection,
) -> Result<(), Error> {
    let mut statement = connection.prepare(
        "INSERT INTO budget_allocation (version_id, category_id, allocated_cents)
         VALUES (?1, ?2, ?3)",
    )?;

    for allocation in allocations {
        statement
            .execute((version_id, allocation.category_id, allocation.allocated_cents))
            .map_err(|error| match error {
                rusqlite::Error::SqliteFailure(sql_error, Some(_))
                    if sql_error.extended_code == 2067 =>
                {
                    Error::Validation {
                        field: "allocations",
                        message: "a category may appear at most once per version".to_owned(),
                    }
                }
                error => error.into(),
            })?;
    }

    Ok(())
}

/// Delete and re-insert a version's allocations, updating the total.
///
/// Only draft editing may call this; presented and locked versions are
/// append-only.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn replace_allocations(
    version_id: BudgetVersionId,
    allocations: &[BudgetAllocation],
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "DELETE FROM budget_allocation WHERE version_id = ?1",
        [version_id],
    )?;
    insert_allocations(version_id, allocations, connection)?;

    let total_cents: i64 = allocations
        .iter()
        .map(|allocation| allocation.allocated_cents)
        .sum();
    connection.execute(
        "UPDATE budget_version SET total_cents = ?1 WHERE id = ?2",
        (total_cents, version_id),
    )?;

    Ok(())
}

/// Retrieve a version's allocations.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_allocations(
    version_id: BudgetVersionId,
    connection: &Connection,
) -> Result<Vec<BudgetAllocation>, Error> {
    connection
        .prepare(
            "SELECT category_id, allocated_cents FROM budget_allocation
             WHERE version_id = :version_id ORDER BY category_id ASC",
        )?
        .query_map(&[(":version_id", &version_id)], |row| {
            Ok(BudgetAllocation {
                category_id: row.get(0)?,
                allocated_cents: row.get(1)?,
            })
        })?
        .map(|maybe_allocation| maybe_allocation.map_err(|error| error.into()))
        .collect()
}

/// Insert or replace a budget's threshold config.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn upsert_threshold_config(
    budget_id: BudgetId,
    config: &ThresholdConfig,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO budget_threshold_config
            (budget_id, mode, count_threshold, percent_threshold, eligible_family_count,
             requires_association_approval)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(budget_id) DO UPDATE SET
            mode = excluded.mode,
            count_threshold = excluded.count_threshold,
            percent_threshold = excluded.percent_threshold,
            eligible_family_count = excluded.eligible_family_count,
            requires_association_approval = excluded.requires_association_approval",
        (
            budget_id,
            config.mode.as_str(),
            config.count_threshold,
            config.percent_threshold,
            config.eligible_family_count,
            config.requires_association_approval,
        ),
    )?;

    Ok(())
}

/// Retrieve a budget's threshold config, if it has been presented.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_threshold_config(
    budget_id: BudgetId,
    connection: &Connection,
) -> Result<Option<ThresholdConfig>, Error> {
    connection
        .prepare(
            "SELECT mode, count_threshold, percent_threshold, eligible_family_count,
                    requires_association_approval
             FROM budget_threshold_config WHERE budget_id = :budget_id",
        )?
        .query_row(&[(":budget_id", &budget_id)], |row| {
            let mode: String = row.get(0)?;
            let mode = ThresholdMode::parse(&mode).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown threshold mode {mode}").into(),
                )
            })?;

            Ok(ThresholdConfig {
                mode,
                count_threshold: row.get(1)?,
                percent_threshold: row.get(2)?,
                eligible_family_count: row.get(3)?,
                requires_association_approval: row.get(4)?,
            })
        })
        .optional()
        .map_err(|error| error.into())
}

/// Update the stored eligible family count.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn set_eligible_family_count(
    budget_id: BudgetId,
    eligible_family_count: i64,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "UPDATE budget_threshold_config SET eligible_family_count = ?1 WHERE budget_id = ?2",
        (eligible_family_count, budget_id),
    )?;

    Ok(())
}

/// Record a family's acknowledgment of a version.
///
/// Returns `false` when the family already acknowledged this version; the
/// UNIQUE(version_id, family_id) constraint makes the second write a no-op
/// rather than a duplicate row.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn insert_approval(
    version_id: BudgetVersionId,
    family_id: FamilyId,
    user_id: UserId,
    comment: Option<&str>,
    has_questions: bool,
    connection: &Connection,
) -> Result<bool, Error> {
    let rows_affected = connection.execute(
        "INSERT OR IGNORE INTO budget_version_approval
            (version_id, family_id, user_id, comment, has_questions, acknowledged_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            version_id,
            family_id,
            user_id,
            comment,
            has_questions,
            time::OffsetDateTime::now_utc(),
        ),
    )?;

    Ok(rows_affected > 0)
}

/// Count acknowledgments of a version.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn approval_count(
    version_id: BudgetVersionId,
    connection: &Connection,
) -> Result<i64, Error> {
    connection
        .prepare("SELECT COUNT(*) FROM budget_version_approval WHERE version_id = :version_id")?
        .query_row(&[(":version_id", &version_id)], |row| row.get(0))
        .map_err(|error| error.into())
}

/// Create a vendor-scoped envelope within a category.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_envelope(
    team_id: TeamId,
    category_id: CategoryId,
    vendor_match: Option<&str>,
    match_type: EnvelopeMatchType,
    cap_cents: i64,
    max_single_transaction_cents: Option<i64>,
    connection: &Connection,
) -> Result<BudgetEnvelope, Error> {
    connection.execute(
        "INSERT INTO budget_envelope
            (team_id, category_id, vendor_match, match_type, cap_cents,
             max_single_transaction_cents)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            team_id,
            category_id,
            vendor_match,
            match_type.as_str(),
            cap_cents,
            max_single_transaction_cents,
        ),
    )?;

    Ok(BudgetEnvelope {
        id: connection.last_insert_rowid(),
        team_id,
        category_id,
        vendor_match: vendor_match.map(str::to_owned),
        match_type,
        cap_cents,
        max_single_transaction_cents,
    })
}

/// Retrieve a team's envelopes.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn envelopes_for_team(
    team_id: TeamId,
    connection: &Connection,
) -> Result<Vec<BudgetEnvelope>, Error> {
    connection
        .prepare(
            "SELECT id, team_id, category_id, vendor_match, match_type, cap_cents,
                    max_single_transaction_cents
             FROM budget_envelope WHERE team_id = :team_id ORDER BY id ASC",
        )?
        .query_map(&[(":team_id", &team_id)], |row| {
            let match_type: String = row.get(4)?;
            let match_type = EnvelopeMatchType::parse(&match_type).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    4,
                    rusqlite::types::Type::Text,
                    format!("unknown envelope match type {match_type}").into(),
                )
            })?;

            Ok(BudgetEnvelope {
                id: row.get(0)?,
                team_id: row.get(1)?,
                category_id: row.get(2)?,
                vendor_match: row.get(3)?,
                match_type,
                cap_cents: row.get(5)?,
                max_single_transaction_cents: row.get(6)?,
            })
        })?
        .map(|maybe_envelope| maybe_envelope.map_err(|error| error.into()))
        .collect()
}
