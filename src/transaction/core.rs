//! Transaction persistence and the validate-on-write pipeline.
//!
//! Every write path runs the validation engine before the transaction
//! settles: manual entry and bank-feed import both land in VALIDATED or
//! EXCEPTION, never in an unchecked state. Status changes are guarded
//! updates so concurrent writers surface as conflicts instead of lost
//! updates.

use rusqlite::{Connection, Row};
use serde::Deserialize;
use serde_json::json;
use time::{Date, OffsetDateTime};

use crate::{
    Error, audit,
    identity::{Actor, RequestIdentity},
    ids::{CategoryId, TeamId, TransactionId},
    permissions,
    receipt::{ReceiptStatus, calculate_receipt_requirement, receipt_status},
    transaction::models::{Transaction, TransactionStatus, TransactionType},
    validation::{
        TransactionFacts, ValidationResult, load_context_now, validate,
    },
};

/// Create the transaction table.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_transaction_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS team_transaction (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                amount_cents INTEGER NOT NULL,
                transaction_type TEXT NOT NULL,
                category_id INTEGER,
                vendor TEXT NOT NULL,
                transaction_date TEXT NOT NULL,
                receipt_url TEXT,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'DRAFT',
                validation TEXT,
                exception_severity TEXT,
                receipt_status TEXT NOT NULL DEFAULT 'NONE',
                import_id TEXT,
                deleted_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY(team_id) REFERENCES team(id),
                FOREIGN KEY(category_id) REFERENCES category(id),
                UNIQUE(team_id, import_id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_team_transaction_team_status
         ON team_transaction(team_id, status)",
        (),
    )?;

    Ok(())
}

/// The caller-supplied fields of a transaction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTransaction {
    /// The team that owns the transaction.
    pub team_id: TeamId,
    /// The amount in cents, always positive.
    pub amount_cents: i64,
    /// Income or expense.
    pub transaction_type: TransactionType,
    /// The spending category, if assigned.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// Who was paid or who paid.
    pub vendor: String,
    /// The day the money moved.
    pub transaction_date: Date,
    /// Where the receipt is stored, if one was attached.
    #[serde(default)]
    pub receipt_url: Option<String>,
    /// A human-readable description.
    #[serde(default)]
    pub description: String,
}

fn validate_input(new: &NewTransaction) -> Result<(), Error> {
    if new.amount_cents <= 0 {
        return Err(Error::Validation {
            field: "amount_cents",
            message: "the amount must be positive".to_owned(),
        });
    }

    if new.vendor.trim().is_empty() {
        return Err(Error::Validation {
            field: "vendor",
            message: "a vendor is required".to_owned(),
        });
    }

    Ok(())
}

const TRANSACTION_COLUMNS: &str = "id, team_id, amount_cents, transaction_type, category_id,
    vendor, transaction_date, receipt_url, description, status, validation, exception_severity,
    receipt_status, import_id, deleted_at";

fn map_transaction_row(row: &Row) -> Result<Transaction, rusqlite::Error> {
    fn text_column<T>(
        row: &Row,
        index: usize,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<T, rusqlite::Error> {
        let value: String = row.get(index)?;
        parse(&value).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                format!("unknown value {value}").into(),
            )
        })
    }

    let validation_json: Option<String> = row.get(10)?;
    let validation = validation_json
        .map(|json| {
            serde_json::from_str::<ValidationResult>(&json).map_err(|error| {
                rusqlite::Error::FromSqlConversionFailure(
                    10,
                    rusqlite::types::Type::Text,
                    Box::new(error),
                )
            })
        })
        .transpose()?;

    let exception_severity: Option<String> = row.get(11)?;
    let exception_severity = exception_severity
        .map(|value| {
            crate::validation::ExceptionSeverity::parse(&value).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    11,
                    rusqlite::types::Type::Text,
                    format!("unknown exception severity {value}").into(),
                )
            })
        })
        .transpose()?;

    Ok(Transaction {
        id: row.get(0)?,
        team_id: row.get(1)?,
        amount_cents: row.get(2)?,
        transaction_type: text_column(row, 3, TransactionType::parse)?,
        category_id: row.get(4)?,
        vendor: row.get(5)?,
        transaction_date: row.get(6)?,
        receipt_url: row.get(7)?,
        description: row.get(8)?,
        status: text_column(row, 9, TransactionStatus::parse)?,
        validation,
        exception_severity,
        receipt_status: text_column(row, 12, ReceiptStatus::parse)?,
        import_id: row.get(13)?,
        deleted_at: row.get(14)?,
    })
}

/// Retrieve a transaction by `transaction_id`, soft-deleted ones included.
///
/// # Errors
/// Returns [Error::NotFound] if `transaction_id` does not refer to a
/// transaction.
pub fn get_transaction(
    transaction_id: TransactionId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM team_transaction WHERE id = :id"
        ))?
        .query_row(&[(":id", &transaction_id)], map_transaction_row)
        .map_err(|error| error.into())
}

/// Retrieve a team's transactions, newest first, excluding soft-deleted
/// ones.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn list_transactions(
    team_id: TeamId,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM team_transaction
             WHERE team_id = :team_id AND deleted_at IS NULL
             ORDER BY transaction_date DESC, id DESC"
        ))?
        .query_map(&[(":team_id", &team_id)], map_transaction_row)?
        .map(|maybe_transaction| maybe_transaction.map_err(|error| error.into()))
        .collect()
}

/// The validation-shaped view of a stored transaction.
pub(crate) fn facts_for(transaction: &Transaction) -> TransactionFacts {
    TransactionFacts {
        id: Some(transaction.id),
        team_id: transaction.team_id,
        amount_cents: transaction.amount_cents,
        transaction_type: transaction.transaction_type,
        category_id: transaction.category_id,
        vendor: transaction.vendor.clone(),
        transaction_date: transaction.transaction_date,
        has_receipt: transaction.receipt_url.is_some(),
    }
}

/// Run the engine over `facts` and derive the persisted receipt status.
pub(crate) fn run_validation(
    facts: &TransactionFacts,
    connection: &Connection,
) -> Result<(ValidationResult, ReceiptStatus), Error> {
    let context = load_context_now(facts, connection)?;
    let result = validate(facts, &context);

    let requirement = calculate_receipt_requirement(
        facts.amount_cents,
        facts.category_id,
        &context.receipt_policy,
    );

    Ok((result, receipt_status(facts.has_receipt, &requirement)))
}

/// Persist a validation outcome with a status-guarded update.
///
/// # Errors
/// Returns [Error::ConcurrencyConflict] if the transaction's status changed
/// since it was read.
pub(crate) fn store_outcome(
    transaction_id: TransactionId,
    expected_status: TransactionStatus,
    new_status: TransactionStatus,
    result: &ValidationResult,
    receipt: ReceiptStatus,
    connection: &Connection,
) -> Result<(), Error> {
    let validation_json = serde_json::to_string(result).map_err(|error| Error::Validation {
        field: "validation",
        message: error.to_string(),
    })?;
    let exception_severity = (new_status == TransactionStatus::Exception)
        .then(|| result.exception_severity().map(|severity| severity.as_str()))
        .flatten();

    let rows_affected = connection.execute(
        "UPDATE team_transaction
         SET status = ?1, validation = ?2, exception_severity = ?3, receipt_status = ?4
         WHERE id = ?5 AND status = ?6",
        (
            new_status.as_str(),
            validation_json,
            exception_severity,
            receipt.as_str(),
            transaction_id,
            expected_status.as_str(),
        ),
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    Ok(())
}

/// Insert a transaction in `entry_status` and validate it immediately.
///
/// Used by manual entry (DRAFT) and bank-feed import (IMPORTED); both land
/// in VALIDATED or EXCEPTION before the surrounding transaction commits.
pub(crate) fn insert_and_validate(
    new: &NewTransaction,
    import_id: Option<&str>,
    entry_status: TransactionStatus,
    connection: &Connection,
) -> Result<Transaction, Error> {
    validate_input(new)?;

    connection.execute(
        "INSERT INTO team_transaction
            (team_id, amount_cents, transaction_type, category_id, vendor, transaction_date,
             receipt_url, description, status, import_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        (
            new.team_id,
            new.amount_cents,
            new.transaction_type.as_str(),
            new.category_id,
            &new.vendor,
            new.transaction_date,
            new.receipt_url.as_deref(),
            &new.description,
            entry_status.as_str(),
            import_id,
            OffsetDateTime::now_utc(),
        ),
    )?;
    let transaction_id = connection.last_insert_rowid();

    let transaction = get_transaction(transaction_id, connection)?;
    let facts = facts_for(&transaction);
    let (result, receipt) = run_validation(&facts, connection)?;

    let new_status = if result.compliant {
        TransactionStatus::Validated
    } else {
        TransactionStatus::Exception
    };
    store_outcome(
        transaction_id,
        entry_status,
        new_status,
        &result,
        receipt,
        connection,
    )?;

    if new_status == TransactionStatus::Exception
        && let Some(severity) = result.exception_severity()
    {
        audit::record(
            "EXCEPTION_RAISED",
            Actor::System,
            "transaction",
            transaction_id,
            &json!({ "severity": severity.as_str() }),
            connection,
        )?;
    }

    get_transaction(transaction_id, connection)
}

/// Record a manually entered transaction, validating it on the way in.
///
/// # Errors
/// Returns [Error::Permission] unless the caller manages money,
/// [Error::Validation] for bad input, or an error if there is an SQL error.
/// A non-compliant transaction is NOT an error; it comes back in EXCEPTION
/// status with its violations.
pub fn create_transaction(
    new: &NewTransaction,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<Transaction, Error> {
    if !permissions::can_manage_transactions(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not record transactions",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let transaction = insert_and_validate(new, None, TransactionStatus::Draft, &sql_transaction)?;
    audit::record(
        "TRANSACTION_CREATED",
        identity.actor(),
        "transaction",
        transaction.id,
        &json!({
            "amount_cents": transaction.amount_cents,
            "status": transaction.status.as_str(),
        }),
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(transaction)
}

/// Re-run validation on a stored transaction.
///
/// Useful after the surrounding facts change: a receipt was attached, the
/// budget was updated, a category was renamed. RESOLVED and LOCKED
/// transactions are settled and cannot be reopened this way.
///
/// # Errors
/// Returns [Error::InvalidState] for settled or deleted transactions, or
/// [Error::ConcurrencyConflict] if the status changed mid-flight.
pub fn revalidate_transaction(
    transaction_id: TransactionId,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<Transaction, Error> {
    if !permissions::can_manage_transactions(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not revalidate transactions",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let transaction = get_transaction(transaction_id, &sql_transaction)?;
    if transaction.deleted_at.is_some() {
        return Err(Error::InvalidState(
            "the transaction has been deleted".to_owned(),
        ));
    }

    match transaction.status {
        TransactionStatus::Draft
        | TransactionStatus::Imported
        | TransactionStatus::Validated
        | TransactionStatus::Exception => {}
        settled => {
            return Err(Error::InvalidState(format!(
                "a {} transaction cannot be revalidated",
                settled.as_str()
            )));
        }
    }

    let facts = facts_for(&transaction);
    let (result, receipt) = run_validation(&facts, &sql_transaction)?;

    let new_status = if result.compliant {
        TransactionStatus::Validated
    } else {
        TransactionStatus::Exception
    };
    // Same-status outcomes refresh the stored result; anything else must be
    // a legal transition.
    if new_status != transaction.status && !transaction.status.can_transition_to(new_status) {
        return Err(Error::InvalidState(format!(
            "a {} transaction cannot move to {}",
            transaction.status.as_str(),
            new_status.as_str()
        )));
    }

    store_outcome(
        transaction_id,
        transaction.status,
        new_status,
        &result,
        receipt,
        &sql_transaction,
    )?;

    audit::record(
        "TRANSACTION_REVALIDATED",
        identity.actor(),
        "transaction",
        transaction_id,
        &json!({ "status": new_status.as_str(), "score": result.score }),
        &sql_transaction,
    )?;
    if new_status == TransactionStatus::Exception
        && transaction.status != TransactionStatus::Exception
        && let Some(severity) = result.exception_severity()
    {
        audit::record(
            "EXCEPTION_RAISED",
            Actor::System,
            "transaction",
            transaction_id,
            &json!({ "severity": severity.as_str() }),
            &sql_transaction,
        )?;
    }

    sql_transaction.commit()?;

    get_transaction(transaction_id, connection)
}

/// Soft-delete a transaction.
///
/// Deleted transactions keep their row for the audit trail but drop out of
/// listings, spend sums, and duplicate detection. Idempotent.
///
/// # Errors
/// Returns [Error::InvalidState] for LOCKED transactions.
pub fn soft_delete_transaction(
    transaction_id: TransactionId,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<(), Error> {
    if !permissions::can_manage_transactions(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not delete transactions",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let transaction = get_transaction(transaction_id, &sql_transaction)?;
    if transaction.status == TransactionStatus::Locked {
        return Err(Error::InvalidState(
            "locked transactions cannot be deleted".to_owned(),
        ));
    }
    if transaction.deleted_at.is_some() {
        return Ok(());
    }

    sql_transaction.execute(
        "UPDATE team_transaction SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        (OffsetDateTime::now_utc(), transaction_id),
    )?;
    audit::record(
        "TRANSACTION_DELETED",
        identity.actor(),
        "transaction",
        transaction_id,
        &json!({}),
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(())
}
