//! Bank-feed CSV import.
//!
//! Feeds arrive as `date,amount,vendor,description` rows with signed dollar
//! amounts (negative for money out). Each row is keyed by a deterministic
//! import ID so re-importing an overlapping export skips what is already
//! recorded instead of duplicating it. Imported rows validate on the way in
//! like manual entries; an import is all-or-nothing.

use std::io::Read;

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Date, macros::format_description};

use crate::{
    Error, audit,
    identity::RequestIdentity,
    ids::{TeamId, TransactionId},
    permissions,
    transaction::{
        core::insert_and_validate,
        models::{TransactionStatus, TransactionType},
    },
};

use super::core::NewTransaction;

#[derive(Debug, Deserialize)]
struct BankFeedRow {
    date: String,
    amount: String,
    vendor: String,
    #[serde(default)]
    description: String,
}

/// The result of one bank-feed import.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    /// The IDs of the newly recorded transactions.
    pub transaction_ids: Vec<TransactionId>,
    /// Rows skipped because they were already imported.
    pub skipped_duplicates: usize,
    /// How many of the new transactions failed validation.
    pub exceptions: usize,
}

/// Parse a signed decimal dollar amount into cents without going through
/// floating point.
fn parse_amount_cents(value: &str, row_number: usize) -> Result<i64, Error> {
    let bad_amount = || Error::Validation {
        field: "csv",
        message: format!("row {row_number}: '{value}' is not a valid amount"),
    };

    let trimmed = value.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let (dollars, cents) = match digits.split_once('.') {
        Some((dollars, cents)) if cents.len() == 2 => (dollars, cents),
        None => (digits, "00"),
        Some(_) => return Err(bad_amount()),
    };

    let dollars: i64 = dollars.parse().map_err(|_| bad_amount())?;
    let cents: i64 = cents.parse().map_err(|_| bad_amount())?;
    let amount_cents = dollars * 100 + cents;

    Ok(if negative { -amount_cents } else { amount_cents })
}

fn parse_row(row: &BankFeedRow, row_number: usize) -> Result<(NewTransaction, String), Error> {
    let date_format = format_description!("[year]-[month]-[day]");
    let transaction_date = Date::parse(row.date.trim(), &date_format).map_err(|_| {
        Error::Validation {
            field: "csv",
            message: format!("row {row_number}: '{}' is not a valid date", row.date),
        }
    })?;

    let signed_cents = parse_amount_cents(&row.amount, row_number)?;
    if signed_cents == 0 {
        return Err(Error::Validation {
            field: "csv",
            message: format!("row {row_number}: the amount must not be zero"),
        });
    }

    let transaction_type = if signed_cents < 0 {
        TransactionType::Expense
    } else {
        TransactionType::Income
    };

    let vendor = row.vendor.trim().to_owned();
    let import_id = format!(
        "{}|{}|{}",
        transaction_date,
        signed_cents,
        vendor.to_lowercase()
    );

    Ok((
        NewTransaction {
            team_id: 0, // filled in by the caller
            amount_cents: signed_cents.abs(),
            transaction_type,
            category_id: None,
            vendor,
            transaction_date,
            receipt_url: None,
            description: row.description.trim().to_owned(),
        },
        import_id,
    ))
}

fn already_imported(
    team_id: TeamId,
    import_id: &str,
    connection: &rusqlite::Connection,
) -> Result<bool, Error> {
    let count: i64 = connection
        .prepare(
            "SELECT COUNT(*) FROM team_transaction
             WHERE team_id = :team_id AND import_id = :import_id",
        )?
        .query_row(
            &[
                (":team_id", &team_id as &dyn rusqlite::ToSql),
                (":import_id", &import_id),
            ],
            |row| row.get(0),
        )?;

    Ok(count > 0)
}

/// Import a bank-feed CSV export for a team.
///
/// Rows already imported (same date, amount and vendor) are skipped; new
/// rows land uncategorized in IMPORTED and are validated immediately. The
/// whole import is one database transaction: a malformed row aborts it
/// without recording anything.
///
/// # Errors
/// Returns [Error::Permission] unless the caller manages money, or
/// [Error::Validation] naming the first malformed row.
pub fn import_bank_feed<R: Read>(
    team_id: TeamId,
    reader: R,
    identity: RequestIdentity,
    connection: &rusqlite::Connection,
) -> Result<ImportOutcome, Error> {
    if !permissions::can_manage_transactions(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not import transactions",
            identity.role
        )));
    }

    let mut csv_reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let sql_transaction = connection.unchecked_transaction()?;

    let mut outcome = ImportOutcome {
        transaction_ids: Vec::new(),
        skipped_duplicates: 0,
        exceptions: 0,
    };

    for (index, record) in csv_reader.deserialize::<BankFeedRow>().enumerate() {
        // Row numbers are 1-based and count the header.
        let row_number = index + 2;
        let row = record.map_err(|error| Error::Validation {
            field: "csv",
            message: format!("row {row_number}: {error}"),
        })?;

        let (new, import_id) = parse_row(&row, row_number)?;
        let new = NewTransaction { team_id, ..new };

        if already_imported(team_id, &import_id, &sql_transaction)? {
            outcome.skipped_duplicates += 1;
            continue;
        }

        let transaction = insert_and_validate(
            &new,
            Some(&import_id),
            TransactionStatus::Imported,
            &sql_transaction,
        )?;
        if transaction.status == TransactionStatus::Exception {
            outcome.exceptions += 1;
        }
        outcome.transaction_ids.push(transaction.id);
    }

    audit::record(
        "TRANSACTIONS_IMPORTED",
        identity.actor(),
        "team",
        team_id,
        &json!({
            "imported": outcome.transaction_ids.len(),
            "skipped_duplicates": outcome.skipped_duplicates,
            "exceptions": outcome.exceptions,
        }),
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(outcome)
}

#[cfg(test)]
mod import_tests {
    use rusqlite::Connection;

    use crate::{
        Error,
        db::initialize,
        governance::{GovernanceRule, ThresholdMode, create_association, upsert_governance_rule},
        identity::{RequestIdentity, Role},
        receipt::ReceiptPolicy,
        team::create_team,
        transaction::{core::get_transaction, models::TransactionType},
    };

    use super::import_bank_feed;

    const TREASURER: RequestIdentity = RequestIdentity {
        user_id: 1,
        role: Role::Treasurer,
    };

    fn fixture() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let association_id = create_association("Test League", &conn).unwrap();
        upsert_governance_rule(
            &GovernanceRule {
                association_id,
                parent_ack_mode: ThresholdMode::Percent,
                default_count_threshold: None,
                default_percent_threshold: Some(60),
                allow_team_override: false,
                override_min_percent: None,
                override_max_percent: None,
                override_min_count: None,
                override_max_count: None,
                requires_association_approval: false,
                receipt_policy: ReceiptPolicy::default(),
            },
            &conn,
        )
        .unwrap();
        let team = create_team(association_id, "U12 Comets", &conn).unwrap();

        (conn, team.id)
    }

    const FEED: &str = "\
date,amount,vendor,description
2026-04-01,-45.00,Acme Sports,Practice cones
2026-04-03,250.00,Snack shack,Fundraiser proceeds
";

    #[test]
    fn import_records_expenses_and_income() {
        let (conn, team_id) = fixture();

        let outcome = import_bank_feed(team_id, FEED.as_bytes(), TREASURER, &conn).unwrap();

        assert_eq!(outcome.transaction_ids.len(), 2);
        assert_eq!(outcome.skipped_duplicates, 0);

        let expense = get_transaction(outcome.transaction_ids[0], &conn).unwrap();
        assert_eq!(expense.transaction_type, TransactionType::Expense);
        assert_eq!(expense.amount_cents, 4_500);
        assert!(expense.import_id.is_some());

        let income = get_transaction(outcome.transaction_ids[1], &conn).unwrap();
        assert_eq!(income.transaction_type, TransactionType::Income);
        assert_eq!(income.amount_cents, 25_000);
    }

    #[test]
    fn reimporting_an_overlapping_feed_skips_known_rows() {
        let (conn, team_id) = fixture();
        import_bank_feed(team_id, FEED.as_bytes(), TREASURER, &conn).unwrap();

        let overlapping = format!("{FEED}2026-04-05,-12.50,Acme Sports,Water bottles\n");
        let outcome =
            import_bank_feed(team_id, overlapping.as_bytes(), TREASURER, &conn).unwrap();

        assert_eq!(outcome.skipped_duplicates, 2);
        assert_eq!(outcome.transaction_ids.len(), 1);
    }

    #[test]
    fn malformed_row_aborts_the_whole_import() {
        let (conn, team_id) = fixture();
        let feed = "\
date,amount,vendor,description
2026-04-01,-45.00,Acme Sports,Practice cones
2026-04-02,not-money,Acme Sports,Broken row
";

        let result = import_bank_feed(team_id, feed.as_bytes(), TREASURER, &conn);

        assert!(matches!(result, Err(Error::Validation { field: "csv", .. })));
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM team_transaction", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn parents_may_not_import() {
        let (conn, team_id) = fixture();
        let parent = RequestIdentity {
            user_id: 100,
            role: Role::Parent,
        };

        let result = import_bank_feed(team_id, FEED.as_bytes(), parent, &conn);

        assert!(matches!(result, Err(Error::Permission(_))));
    }
}
