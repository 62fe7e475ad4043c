//! Exception resolution.
//!
//! A transaction in EXCEPTION status is resolved one of three ways:
//! REVALIDATE re-runs the engine against current facts, CORRECT fixes the
//! underlying data first, and OVERRIDE forces the transaction to RESOLVED
//! despite its violations. Who may do what depends on the exception's
//! severity; the matrix lives in [crate::permissions].

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use time::Date;

use crate::{
    AppState, Error, audit,
    identity::RequestIdentity,
    ids::{CategoryId, TransactionId},
    notify::Notification,
    permissions::{self, Resolution},
    transaction::{
        core::{facts_for, get_transaction, run_validation, store_outcome},
        models::{Transaction, TransactionStatus},
    },
    validation::{ExceptionSeverity, ViolationSeverity},
};

/// Replacement values for the CORRECT resolution. Unset fields keep their
/// stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CorrectionData {
    /// A corrected amount, in cents.
    #[serde(default)]
    pub amount_cents: Option<i64>,
    /// A corrected category.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// A corrected vendor.
    #[serde(default)]
    pub vendor: Option<String>,
    /// A corrected transaction date.
    #[serde(default)]
    pub transaction_date: Option<Date>,
    /// A newly attached receipt.
    #[serde(default)]
    pub receipt_url: Option<String>,
    /// A corrected description.
    #[serde(default)]
    pub description: Option<String>,
}

impl CorrectionData {
    fn is_empty(&self) -> bool {
        self == &CorrectionData::default()
    }
}

/// The request body for [resolve_exception_endpoint].
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// How to resolve the exception.
    pub resolution: Resolution,
    /// A free-form explanation, recorded in the audit trail.
    #[serde(default)]
    pub note: Option<String>,
    /// Replacement data, required for CORRECT.
    #[serde(default)]
    pub corrections: Option<CorrectionData>,
}

fn apply_corrections(
    transaction_id: TransactionId,
    corrections: &CorrectionData,
    connection: &rusqlite::Connection,
) -> Result<(), Error> {
    if corrections.is_empty() {
        return Err(Error::Validation {
            field: "corrections",
            message: "the CORRECT resolution needs at least one corrected field".to_owned(),
        });
    }

    if let Some(amount_cents) = corrections.amount_cents
        && amount_cents <= 0
    {
        return Err(Error::Validation {
            field: "amount_cents",
            message: "the amount must be positive".to_owned(),
        });
    }

    connection.execute(
        "UPDATE team_transaction SET
            amount_cents = COALESCE(?1, amount_cents),
            category_id = COALESCE(?2, category_id),
            vendor = COALESCE(?3, vendor),
            transaction_date = COALESCE(?4, transaction_date),
            receipt_url = COALESCE(?5, receipt_url),
            description = COALESCE(?6, description)
         WHERE id = ?7",
        (
            corrections.amount_cents,
            corrections.category_id,
            corrections.vendor.as_deref(),
            corrections.transaction_date,
            corrections.receipt_url.as_deref(),
            corrections.description.as_deref(),
            transaction_id,
        ),
    )?;

    Ok(())
}

fn override_to_resolved(
    transaction: &Transaction,
    note: Option<&str>,
    identity: RequestIdentity,
    connection: &rusqlite::Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE team_transaction SET status = 'RESOLVED', exception_severity = NULL
         WHERE id = ?1 AND status = 'EXCEPTION'",
        [transaction.id],
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    // Overrides keep a separate audit entry naming exactly which blocking
    // violations were waved through.
    let overridden_codes: Vec<_> = transaction
        .validation
        .iter()
        .flat_map(|validation| &validation.violations)
        .filter(|violation| violation.severity >= ViolationSeverity::Error)
        .map(|violation| violation.code)
        .collect();
    audit::record(
        "EXCEPTION_OVERRIDDEN",
        identity.actor(),
        "transaction",
        transaction.id,
        &json!({ "overridden_violations": overridden_codes, "note": note }),
        connection,
    )?;

    Ok(())
}

/// Resolve a transaction in EXCEPTION status.
///
/// # Errors
/// Returns [Error::InvalidState] unless the transaction is in EXCEPTION,
/// [Error::Permission] per the severity matrix, or
/// [Error::ConcurrencyConflict] if another resolution raced this one.
pub fn resolve_exception(
    transaction_id: TransactionId,
    request: &ResolveRequest,
    identity: RequestIdentity,
    connection: &rusqlite::Connection,
) -> Result<Transaction, Error> {
    let sql_transaction = connection.unchecked_transaction()?;

    let transaction = get_transaction(transaction_id, &sql_transaction)?;
    if transaction.deleted_at.is_some() {
        return Err(Error::InvalidState(
            "the transaction has been deleted".to_owned(),
        ));
    }
    if transaction.status != TransactionStatus::Exception {
        return Err(Error::InvalidState(format!(
            "the transaction is not awaiting resolution (status is {})",
            transaction.status.as_str()
        )));
    }

    let severity = transaction
        .exception_severity
        .unwrap_or(ExceptionSeverity::Low);
    permissions::check_exception_resolution(identity.role, severity, request.resolution)?;

    match request.resolution {
        Resolution::Override => {
            override_to_resolved(
                &transaction,
                request.note.as_deref(),
                identity,
                &sql_transaction,
            )?;
        }
        Resolution::Correct => {
            let corrections = request.corrections.as_ref().ok_or(Error::Validation {
                field: "corrections",
                message: "the CORRECT resolution needs corrected data".to_owned(),
            })?;
            apply_corrections(transaction_id, corrections, &sql_transaction)?;

            let corrected = get_transaction(transaction_id, &sql_transaction)?;
            let (result, receipt) = run_validation(&facts_for(&corrected), &sql_transaction)?;
            let new_status = if result.compliant {
                TransactionStatus::Validated
            } else {
                TransactionStatus::Exception
            };
            store_outcome(
                transaction_id,
                TransactionStatus::Exception,
                new_status,
                &result,
                receipt,
                &sql_transaction,
            )?;
        }
        Resolution::Revalidate => {
            let (result, receipt) = run_validation(&facts_for(&transaction), &sql_transaction)?;
            let new_status = if result.compliant {
                TransactionStatus::Validated
            } else {
                TransactionStatus::Exception
            };
            store_outcome(
                transaction_id,
                TransactionStatus::Exception,
                new_status,
                &result,
                receipt,
                &sql_transaction,
            )?;
        }
    }

    let resolved = get_transaction(transaction_id, &sql_transaction)?;
    if resolved.status != TransactionStatus::Exception {
        audit::record(
            "EXCEPTION_RESOLVED",
            identity.actor(),
            "transaction",
            transaction_id,
            &json!({
                "resolution": request.resolution,
                "status": resolved.status.as_str(),
                "note": request.note,
            }),
            &sql_transaction,
        )?;
    }

    sql_transaction.commit()?;

    Ok(resolved)
}

/// Resolve a transaction in EXCEPTION status.
pub async fn resolve_exception_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(transaction_id): Path<TransactionId>,
    Json(request): Json<ResolveRequest>,
) -> Result<impl IntoResponse, Error> {
    let transaction = {
        let connection = state.connection()?;
        resolve_exception(transaction_id, &request, identity, &connection)?
    };

    if transaction.status != TransactionStatus::Exception {
        state.notifier.notify(Notification::ExceptionResolved {
            transaction_id,
            resolution: format!("{:?}", request.resolution).to_uppercase(),
        });
    }

    Ok(Json(transaction))
}
