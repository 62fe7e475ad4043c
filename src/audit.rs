//! Append-only audit log.
//!
//! Every state transition in the treasury workflows writes a row here,
//! inside the same database transaction as the change itself. Presentation
//! of the log is out of scope; this module only appends.

use rusqlite::Connection;
use serde_json::Value;

use crate::{Error, identity::Actor, ids::DatabaseId};

/// Create the audit log table.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_audit_log_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor_id INTEGER,
                entity_type TEXT NOT NULL,
                entity_id INTEGER NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            );",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_log_entity ON audit_log(entity_type, entity_id)",
        (),
    )?;

    Ok(())
}

/// Append an audit entry.
///
/// Call this inside the transaction that performs the change being audited,
/// so the entry and the change commit or roll back together.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn record(
    action: &str,
    actor: Actor,
    entity_type: &str,
    entity_id: DatabaseId,
    metadata: &Value,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO audit_log (action, actor_type, actor_id, entity_type, entity_id, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (
            action,
            actor.type_str(),
            actor.user_id(),
            entity_type,
            entity_id,
            metadata.to_string(),
        ),
    )?;

    Ok(())
}
