//! HTTP endpoints for transactions, bank-feed import, and receipt-policy
//! lookups.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use time::OffsetDateTime;

use crate::{
    AppState, Error,
    governance::effective_receipt_policy,
    identity::RequestIdentity,
    ids::{CategoryId, TeamId, TransactionId},
    notify::Notification,
    receipt::calculate_receipt_requirement,
    snapshot::policy_in_force,
    team::get_team_settings,
    transaction::{
        core::{
            NewTransaction, create_transaction, get_transaction, list_transactions,
            revalidate_transaction, soft_delete_transaction,
        },
        import::import_bank_feed,
        models::{Transaction, TransactionStatus},
    },
};

fn notify_if_exception(state: &AppState, transaction: &Transaction) {
    if transaction.status == TransactionStatus::Exception
        && let Some(severity) = transaction.exception_severity
    {
        state.notifier.notify(Notification::ExceptionRaised {
            transaction_id: transaction.id,
            severity: severity.as_str().to_owned(),
        });
    }
}

/// Record a manually entered transaction.
pub async fn create_transaction_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(new): Json<NewTransaction>,
) -> Result<impl IntoResponse, Error> {
    let transaction = {
        let connection = state.connection()?;
        create_transaction(&new, identity, &connection)?
    };

    notify_if_exception(&state, &transaction);

    Ok((StatusCode::CREATED, Json(transaction)))
}

/// The query string for [list_transactions_endpoint].
#[derive(Debug, Deserialize)]
pub struct ListTransactionsQuery {
    /// The team whose transactions to list.
    pub team_id: TeamId,
}

/// List a team's transactions, newest first.
pub async fn list_transactions_endpoint(
    State(state): State<AppState>,
    _identity: RequestIdentity,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    Ok(Json(list_transactions(query.team_id, &connection)?))
}

/// Fetch one transaction with its latest validation result.
pub async fn get_transaction_endpoint(
    State(state): State<AppState>,
    _identity: RequestIdentity,
    Path(transaction_id): Path<TransactionId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    Ok(Json(get_transaction(transaction_id, &connection)?))
}

/// Soft-delete a transaction.
pub async fn delete_transaction_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(transaction_id): Path<TransactionId>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    soft_delete_transaction(transaction_id, identity, &connection)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Re-run validation on a transaction.
pub async fn revalidate_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(transaction_id): Path<TransactionId>,
) -> Result<impl IntoResponse, Error> {
    let transaction = {
        let connection = state.connection()?;
        revalidate_transaction(transaction_id, identity, &connection)?
    };

    notify_if_exception(&state, &transaction);

    Ok(Json(transaction))
}

/// The request body for [import_endpoint].
#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// The team the feed belongs to.
    pub team_id: TeamId,
    /// The CSV export, `date,amount,vendor,description` with a header row.
    pub csv: String,
}

/// Import a bank-feed CSV export.
pub async fn import_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(request): Json<ImportRequest>,
) -> Result<impl IntoResponse, Error> {
    let outcome = {
        let connection = state.connection()?;
        import_bank_feed(
            request.team_id,
            request.csv.as_bytes(),
            identity,
            &connection,
        )?
    };

    for transaction_id in &outcome.transaction_ids {
        let connection = state.connection()?;
        let transaction = get_transaction(*transaction_id, &connection)?;
        drop(connection);
        notify_if_exception(&state, &transaction);
    }

    Ok((StatusCode::CREATED, Json(outcome)))
}

/// The query string for [receipt_requirement_endpoint].
#[derive(Debug, Deserialize)]
pub struct ReceiptRequirementQuery {
    /// The team whose policy applies.
    pub team_id: TeamId,
    /// The hypothetical amount, in cents.
    pub amount_cents: i64,
    /// The hypothetical category, if any.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
}

/// Evaluate the receipt policy for a hypothetical transaction, so clients
/// can tell users up front whether a receipt will be needed.
pub async fn receipt_requirement_endpoint(
    State(state): State<AppState>,
    _identity: RequestIdentity,
    Query(query): Query<ReceiptRequirementQuery>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    let today = OffsetDateTime::now_utc().date();
    let (governance, _rules, _season) = policy_in_force(query.team_id, today, &connection)?;
    let settings = get_team_settings(query.team_id, &connection)?;
    let policy = governance
        .as_ref()
        .map(|governance| effective_receipt_policy(governance, &settings))
        .unwrap_or_default();

    let requirement =
        calculate_receipt_requirement(query.amount_cents, query.category_id, &policy);

    Ok(Json(requirement))
}
