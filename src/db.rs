//! Database schema setup.

use rusqlite::{Connection, Transaction as SqlTransaction};

use crate::{
    audit::create_audit_log_table,
    budget::db::create_budget_tables,
    compensation::create_compensation_tables,
    family::create_family_tables,
    governance::create_governance_tables,
    snapshot::create_snapshot_tables,
    team::create_team_tables,
    transaction::{core::create_transaction_tables, models::LEGACY_STATUS_MAP},
};

/// Rewrite any rows still carrying a retired status onto the current state
/// machine. Runs on every startup and is a no-op once the data is clean.
fn migrate_legacy_statuses(connection: &Connection) -> Result<(), rusqlite::Error> {
    for (legacy, current) in LEGACY_STATUS_MAP {
        let rewritten = connection.execute(
            "UPDATE team_transaction SET status = ?1 WHERE status = ?2",
            (current, legacy),
        )?;
        if rewritten > 0 {
            tracing::info!("migrated {rewritten} transactions from status {legacy} to {current}");
        }
    }

    Ok(())
}

/// Create the application tables if they do not exist and migrate legacy
/// data, all in one exclusive transaction.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn initialize(connection: &Connection) -> Result<(), rusqlite::Error> {
    let transaction =
        SqlTransaction::new_unchecked(connection, rusqlite::TransactionBehavior::Exclusive)?;

    create_governance_tables(&transaction)?;
    create_team_tables(&transaction)?;
    create_family_tables(&transaction)?;
    create_snapshot_tables(&transaction)?;
    create_budget_tables(&transaction)?;
    create_transaction_tables(&transaction)?;
    create_compensation_tables(&transaction)?;
    create_audit_log_table(&transaction)?;

    migrate_legacy_statuses(&transaction)?;

    transaction.commit()?;

    Ok(())
}

#[cfg(test)]
mod db_tests {
    use rusqlite::Connection;

    use super::initialize;

    #[test]
    fn initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
    }

    #[test]
    fn legacy_statuses_are_rewritten_on_startup() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        conn.execute(
            "INSERT INTO team_transaction
                (team_id, amount_cents, transaction_type, vendor, transaction_date, status,
                 created_at)
             VALUES
                (1, 1000, 'EXPENSE', 'Acme Sports', '2024-05-01', 'PENDING', '2024-05-01T00:00:00Z'),
                (1, 2000, 'EXPENSE', 'Acme Sports', '2024-05-02', 'APPROVED', '2024-05-02T00:00:00Z'),
                (1, 3000, 'EXPENSE', 'Acme Sports', '2024-05-03', 'APPROVED_AUTOMATIC', '2024-05-03T00:00:00Z'),
                (1, 4000, 'EXPENSE', 'Acme Sports', '2024-05-04', 'REJECTED', '2024-05-04T00:00:00Z')",
            (),
        )
        .unwrap();

        initialize(&conn).unwrap();

        let mut statement = conn
            .prepare("SELECT amount_cents, status FROM team_transaction ORDER BY amount_cents")
            .unwrap();
        let statuses: Vec<(i64, String)> = statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(Result::unwrap)
            .collect();

        assert_eq!(
            statuses,
            vec![
                (1000, "EXCEPTION".to_owned()),
                (2000, "RESOLVED".to_owned()),
                (3000, "VALIDATED".to_owned()),
                (4000, "EXCEPTION".to_owned()),
            ]
        );
    }
}
