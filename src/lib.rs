//! Teamledger is the treasury core for youth sports team finances: budget
//! drafting, parent acknowledgment thresholds with automatic locking,
//! transaction validation with exception workflows, and association-level
//! governance snapshots.
//!
//! This library provides a JSON REST API. Identity is supplied by an
//! upstream auth gateway via the `X-User-Id` and `X-User-Role` headers.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod app_state;
mod audit;
mod budget;
mod compensation;
mod db;
mod endpoints;
mod exception;
mod family;
mod governance;
mod identity;
mod ids;
mod logging;
mod notify;
mod permissions;
mod receipt;
mod routing;
mod snapshot;
mod team;
mod transaction;
mod validation;

pub use app_state::AppState;
pub use db::initialize as initialize_db;
pub use identity::{Actor, Role};
pub use logging::logging_middleware;
pub use notify::{LogNotifier, Notifier};
pub use routing::build_router;

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first, and then signals the server to shut down
/// gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
///
/// The first five variants are expected, typed outcomes that are returned to
/// the caller. Only [Error::SqlError] represents an unexpected condition.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The caller supplied malformed input. Carries field-level detail and
    /// should never be retried unchanged.
    #[error("invalid {field}: {message}")]
    Validation {
        /// The input field that failed validation.
        field: &'static str,
        /// What was wrong with the value.
        message: String,
    },

    /// A role or ownership check failed. The reason distinguishes a wrong
    /// role from a wrong severity tier so clients can explain the refusal.
    #[error("{0}")]
    Permission(String),

    /// The operation was attempted from the wrong lifecycle state, e.g.
    /// acknowledging a budget that is not PRESENTED or resolving a
    /// transaction that is not in EXCEPTION status.
    ///
    /// Surfaced distinctly from [Error::Validation] so callers can show
    /// "already handled" instead of "bad request".
    #[error("{0}")]
    InvalidState(String),

    /// The requested resource could not be found.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The operation lost a race against a concurrent update. The caller
    /// should re-read the entity and retry, not silently swallow this.
    #[error("the record was modified concurrently, retry with fresh state")]
    ConcurrencyConflict,

    /// The database connection could not be acquired, e.g. the lock was
    /// poisoned by a panicking thread.
    #[error("the database connection is unavailable")]
    DatabaseUnavailable,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::Permission(_) => StatusCode::FORBIDDEN,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::NotFound => StatusCode::NOT_FOUND,
            Error::ConcurrencyConflict => StatusCode::CONFLICT,
            Error::DatabaseUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            Error::SqlError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // SQL errors are not intended to be shown to the client.
        let message = match &self {
            Error::SqlError(error) => {
                tracing::error!("An unexpected error occurred: {}", error);
                "an internal error occurred, check the server logs".to_owned()
            }
            error => error.to_string(),
        };

        let body = Json(json!({ "success": false, "error": message }));

        (status, body).into_response()
    }
}
