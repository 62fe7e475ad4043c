//! Coach-compensation cap compliance.
//!
//! An association publishes a compensation-cap rule naming the spend
//! categories that count as coach pay, a default cap, and optional limits
//! keyed by season, age group, and skill level. A team's effective cap is
//! the most specific matching limit plus the delta of an approved
//! [TeamRuleOverride], and its spend is compared against that cap as a
//! tri-state OK / APPROACHING / OVER.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::{
    AppState, Error, audit,
    identity::RequestIdentity,
    ids::{RuleId, RuleOverrideId, TeamId, UserId},
    notify::Notification,
    permissions,
    snapshot::{AssociationRule, CompensationLimit, RuleConfig, get_rule, policy_in_force},
};

/// The lifecycle of a [TeamRuleOverride] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideStatus {
    /// Requested, awaiting an association decision.
    Pending,
    /// Approved; the delta is in force.
    Approved,
    /// Rejected; the delta never takes effect.
    Rejected,
}

impl OverrideStatus {
    /// The status as stored in the database.
    pub fn as_str(self) -> &'static str {
        match self {
            OverrideStatus::Pending => "PENDING",
            OverrideStatus::Approved => "APPROVED",
            OverrideStatus::Rejected => "REJECTED",
        }
    }

    /// Parse a stored status string.
    pub fn parse(value: &str) -> Option<OverrideStatus> {
        match value {
            "PENDING" => Some(OverrideStatus::Pending),
            "APPROVED" => Some(OverrideStatus::Approved),
            "REJECTED" => Some(OverrideStatus::Rejected),
            _ => None,
        }
    }
}

/// A team's request to adjust a rule's cap by a delta.
///
/// At most one active (PENDING or APPROVED) override exists per
/// (team, rule); resubmitting while one is active updates it in place and
/// keeps the prior status in `previous_status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamRuleOverride {
    /// The override's database ID.
    pub id: RuleOverrideId,
    /// The requesting team.
    pub team_id: TeamId,
    /// The rule being overridden.
    pub rule_id: RuleId,
    /// The requested cap adjustment, in cents. May be negative.
    pub requested_delta_cents: i64,
    /// Why the team is asking.
    pub reason: String,
    /// Where the request is in its lifecycle.
    pub status: OverrideStatus,
    /// The status before the most recent resubmission or decision.
    pub previous_status: Option<OverrideStatus>,
    /// Who decided the request, once decided.
    pub decided_by: Option<UserId>,
}

/// The cap that applies to one team, before comparing spend against it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectiveCap {
    /// The cap from the rule's limits, before any override.
    pub base_cap_cents: i64,
    /// The cap after applying an approved override delta.
    pub effective_cap_cents: i64,
    /// Whether an approved override is in force.
    pub has_exception: bool,
    /// The approved delta, zero when none is in force.
    pub exception_delta_cents: i64,
}

/// Where a team's compensation spend sits relative to its cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapStatus {
    /// Spend is comfortably under the cap.
    Ok,
    /// Spend has crossed the approaching threshold but not the cap.
    Approaching,
    /// Spend has reached or passed the cap.
    Over,
}

/// The dimensions a [CompensationLimit] may be keyed on.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CapProfile {
    /// The season label, e.g. "2026 Spring".
    #[serde(default)]
    pub season: Option<String>,
    /// The age group, e.g. "U12".
    #[serde(default)]
    pub age_group: Option<String>,
    /// The skill level, e.g. "COMPETITIVE".
    #[serde(default)]
    pub skill_level: Option<String>,
}

/// Create the rule override table.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_compensation_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS team_rule_override (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                rule_id INTEGER NOT NULL,
                requested_delta_cents INTEGER NOT NULL,
                reason TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'PENDING',
                previous_status TEXT,
                decided_by INTEGER,
                FOREIGN KEY(team_id) REFERENCES team(id),
                FOREIGN KEY(rule_id) REFERENCES association_rule(id)
            );",
        (),
    )?;

    // Only one in-flight or in-force override per (team, rule); decided
    // rejections drop out of the index and stay as history.
    connection.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_team_rule_override_active
         ON team_rule_override(team_id, rule_id)
         WHERE status IN ('PENDING', 'APPROVED')",
        (),
    )?;

    Ok(())
}

fn map_override_row(row: &Row) -> Result<TeamRuleOverride, rusqlite::Error> {
    fn status_column(row: &Row, index: usize) -> Result<OverrideStatus, rusqlite::Error> {
        let value: String = row.get(index)?;
        OverrideStatus::parse(&value).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                format!("unknown override status {value}").into(),
            )
        })
    }

    let previous_status = match row.get::<_, Option<String>>(6)? {
        Some(value) => Some(OverrideStatus::parse(&value).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                6,
                rusqlite::types::Type::Text,
                format!("unknown override status {value}").into(),
            )
        })?),
        None => None,
    };

    Ok(TeamRuleOverride {
        id: row.get(0)?,
        team_id: row.get(1)?,
        rule_id: row.get(2)?,
        requested_delta_cents: row.get(3)?,
        reason: row.get(4)?,
        status: status_column(row, 5)?,
        previous_status,
        decided_by: row.get(7)?,
    })
}

const OVERRIDE_COLUMNS: &str =
    "id, team_id, rule_id, requested_delta_cents, reason, status, previous_status, decided_by";

/// Fetch one override request.
///
/// # Errors
/// Returns [Error::NotFound] if `override_id` does not resolve.
pub fn get_override(
    override_id: RuleOverrideId,
    connection: &Connection,
) -> Result<TeamRuleOverride, Error> {
    let override_request = connection
        .prepare(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM team_rule_override WHERE id = ?1"
        ))?
        .query_row([override_id], map_override_row)?;

    Ok(override_request)
}

fn active_override(
    team_id: TeamId,
    rule_id: RuleId,
    connection: &Connection,
) -> Result<Option<TeamRuleOverride>, Error> {
    let override_request = connection
        .prepare(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM team_rule_override
             WHERE team_id = :team_id AND rule_id = :rule_id
             AND status IN ('PENDING', 'APPROVED')"
        ))?
        .query_row(
            &[
                (":team_id", &team_id as &dyn rusqlite::ToSql),
                (":rule_id", &rule_id),
            ],
            map_override_row,
        )
        .optional()?;

    Ok(override_request)
}

/// Request (or resubmit) a cap override for a team.
///
/// A resubmission while a request is PENDING updates the delta and reason
/// in place. Resubmitting over an APPROVED override reopens it as PENDING
/// with the prior status preserved.
///
/// # Errors
/// Returns [Error::Permission] unless the caller manages the team's money,
/// or [Error::NotFound] if the rule does not resolve.
pub fn request_override(
    team_id: TeamId,
    rule_id: RuleId,
    requested_delta_cents: i64,
    reason: &str,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<TeamRuleOverride, Error> {
    if !permissions::can_edit_budget(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not request rule overrides",
            identity.role
        )));
    }
    if reason.trim().is_empty() {
        return Err(Error::Validation {
            field: "reason",
            message: "an override request needs a reason".to_owned(),
        });
    }

    let sql_transaction = connection.unchecked_transaction()?;

    // NotFound if the rule does not exist.
    get_rule(rule_id, &sql_transaction)?;

    let override_id = match active_override(team_id, rule_id, &sql_transaction)? {
        Some(existing) => {
            let previous_status = match existing.status {
                // An in-place edit of a pending request keeps whatever
                // history it already carried.
                OverrideStatus::Pending => existing.previous_status,
                status => Some(status),
            };
            sql_transaction.execute(
                "UPDATE team_rule_override
                 SET requested_delta_cents = ?1, reason = ?2, status = 'PENDING',
                     previous_status = ?3, decided_by = NULL
                 WHERE id = ?4",
                (
                    requested_delta_cents,
                    reason,
                    previous_status.map(OverrideStatus::as_str),
                    existing.id,
                ),
            )?;
            existing.id
        }
        None => {
            sql_transaction.execute(
                "INSERT INTO team_rule_override (team_id, rule_id, requested_delta_cents, reason)
                 VALUES (?1, ?2, ?3, ?4)",
                (team_id, rule_id, requested_delta_cents, reason),
            )?;
            sql_transaction.last_insert_rowid()
        }
    };

    audit::record(
        "RULE_OVERRIDE_REQUESTED",
        identity.actor(),
        "team_rule_override",
        override_id,
        &json!({ "rule_id": rule_id, "requested_delta_cents": requested_delta_cents }),
        &sql_transaction,
    )?;

    let override_request = get_override(override_id, &sql_transaction)?;
    sql_transaction.commit()?;

    Ok(override_request)
}

/// Approve or reject a pending override request.
///
/// # Errors
/// Returns [Error::Permission] unless the caller is an association admin,
/// [Error::InvalidState] if the request is not PENDING, or
/// [Error::ConcurrencyConflict] if another decision raced this one.
pub fn decide_override(
    override_id: RuleOverrideId,
    approve: bool,
    identity: RequestIdentity,
    connection: &Connection,
) -> Result<TeamRuleOverride, Error> {
    if !permissions::can_decide_rule_override(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not decide rule overrides",
            identity.role
        )));
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let override_request = get_override(override_id, &sql_transaction)?;
    if override_request.status != OverrideStatus::Pending {
        return Err(Error::InvalidState(format!(
            "the override request has already been decided ({})",
            override_request.status.as_str()
        )));
    }

    let new_status = if approve {
        OverrideStatus::Approved
    } else {
        OverrideStatus::Rejected
    };
    let rows_affected = sql_transaction.execute(
        "UPDATE team_rule_override
         SET status = ?1, previous_status = 'PENDING', decided_by = ?2
         WHERE id = ?3 AND status = 'PENDING'",
        (new_status.as_str(), identity.user_id, override_id),
    )?;
    if rows_affected == 0 {
        return Err(Error::ConcurrencyConflict);
    }

    audit::record(
        "RULE_OVERRIDE_DECIDED",
        identity.actor(),
        "team_rule_override",
        override_id,
        &json!({ "approved": approve }),
        &sql_transaction,
    )?;

    let decided = get_override(override_id, &sql_transaction)?;
    sql_transaction.commit()?;

    Ok(decided)
}

/// How many of a limit's dimensions match the profile, or None if any set
/// dimension contradicts it.
fn limit_specificity(limit: &CompensationLimit, profile: &CapProfile) -> Option<usize> {
    fn dimension(required: Option<&String>, actual: Option<&String>) -> Option<usize> {
        match required {
            None => Some(0),
            Some(required) => match actual {
                Some(actual) if required.eq_ignore_ascii_case(actual) => Some(1),
                _ => None,
            },
        }
    }

    let season = dimension(limit.season.as_ref(), profile.season.as_ref())?;
    let age_group = dimension(limit.age_group.as_ref(), profile.age_group.as_ref())?;
    let skill_level = dimension(limit.skill_level.as_ref(), profile.skill_level.as_ref())?;

    Some(season + age_group + skill_level)
}

/// The cap that applies to `team_id` under a compensation-cap rule.
///
/// The base cap is the most specific matching [CompensationLimit], falling
/// back to the rule's default. An approved override shifts it by the
/// requested delta; a base cap of zero means uncapped and stays uncapped.
///
/// # Errors
/// Returns [Error::Validation] if the rule is not a compensation cap.
pub fn effective_cap_for_team(
    rule: &AssociationRule,
    team_id: TeamId,
    profile: &CapProfile,
    connection: &Connection,
) -> Result<EffectiveCap, Error> {
    let RuleConfig::CompensationCap {
        default_cap_cents,
        limits,
        ..
    } = &rule.config
    else {
        return Err(Error::Validation {
            field: "rule_id",
            message: format!("rule '{}' is not a compensation cap", rule.name),
        });
    };

    let base_cap_cents = limits
        .iter()
        .filter_map(|limit| limit_specificity(limit, profile).map(|score| (score, limit)))
        .max_by_key(|(score, _)| *score)
        .map(|(_, limit)| limit.cap_cents)
        .unwrap_or(*default_cap_cents);

    let approved = active_override(team_id, rule.id, connection)?
        .filter(|request| request.status == OverrideStatus::Approved);

    let (has_exception, exception_delta_cents) = match &approved {
        Some(request) => (true, request.requested_delta_cents),
        None => (false, 0),
    };
    let effective_cap_cents = if base_cap_cents == 0 {
        0
    } else {
        base_cap_cents + exception_delta_cents
    };

    Ok(EffectiveCap {
        base_cap_cents,
        effective_cap_cents,
        has_exception,
        exception_delta_cents,
    })
}

/// Sum a team's settled expense spend in the named categories.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn calculate_actual_spend(
    team_id: TeamId,
    category_names: &[String],
    connection: &Connection,
) -> Result<i64, Error> {
    let mut statement = connection.prepare(
        "SELECT category.name, team_transaction.amount_cents
         FROM team_transaction
         JOIN category ON category.id = team_transaction.category_id
         WHERE team_transaction.team_id = :team_id
         AND team_transaction.transaction_type = 'EXPENSE'
         AND team_transaction.status IN ('VALIDATED', 'RESOLVED', 'LOCKED')
         AND team_transaction.deleted_at IS NULL",
    )?;
    let rows = statement.query_map(&[(":team_id", &team_id)], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut total = 0;
    for row in rows {
        let (category_name, amount_cents) = row?;
        if category_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&category_name))
        {
            total += amount_cents;
        }
    }

    Ok(total)
}

/// Classify spend against a cap.
///
/// `approaching_threshold_percent` is the OK/APPROACHING boundary; the cap
/// itself is the APPROACHING/OVER boundary. A cap of zero means no cap.
pub fn evaluate_cap_status(
    actual_cents: i64,
    cap_cents: i64,
    approaching_threshold_percent: i64,
) -> CapStatus {
    if cap_cents <= 0 {
        return CapStatus::Ok;
    }
    if actual_cents >= cap_cents {
        return CapStatus::Over;
    }
    if actual_cents * 100 >= cap_cents * approaching_threshold_percent {
        return CapStatus::Approaching;
    }

    CapStatus::Ok
}

/// A team's full compensation compliance picture.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompensationStatus {
    /// The compensation-cap rule that was evaluated.
    pub rule_id: RuleId,
    /// The cap before any override.
    pub base_cap_cents: i64,
    /// The cap in force.
    pub effective_cap_cents: i64,
    /// Whether an approved override adjusts the cap.
    pub has_exception: bool,
    /// The approved adjustment, zero when none.
    pub exception_delta_cents: i64,
    /// The team's settled compensation spend.
    pub actual_spend_cents: i64,
    /// Where the spend sits relative to the cap.
    pub status: CapStatus,
}

/// Evaluate a team's compensation spend against the cap rule in force.
///
/// The rule comes from the season's policy snapshot while a season is in
/// progress, and from the live rule set otherwise.
///
/// # Errors
/// Returns [Error::NotFound] if the team does not resolve or no
/// compensation-cap rule is in force.
pub fn compensation_status_for_team(
    team_id: TeamId,
    profile: &CapProfile,
    connection: &Connection,
) -> Result<CompensationStatus, Error> {
    let today = OffsetDateTime::now_utc().date();
    let (_governance, rules, season) = policy_in_force(team_id, today, connection)?;

    let rule = rules
        .into_iter()
        .find(|rule| matches!(rule.config, RuleConfig::CompensationCap { .. }))
        .ok_or(Error::NotFound)?;

    // An unqualified query defaults to the season in progress.
    let profile = match (&profile.season, season) {
        (None, Some(season)) => CapProfile {
            season: Some(season.label),
            ..profile.clone()
        },
        _ => profile.clone(),
    };

    let cap = effective_cap_for_team(&rule, team_id, &profile, connection)?;

    let RuleConfig::CompensationCap {
        approaching_threshold_percent,
        category_names,
        ..
    } = &rule.config
    else {
        return Err(Error::NotFound);
    };

    let actual_spend_cents = calculate_actual_spend(team_id, category_names, connection)?;
    let status = evaluate_cap_status(
        actual_spend_cents,
        cap.effective_cap_cents,
        *approaching_threshold_percent,
    );

    Ok(CompensationStatus {
        rule_id: rule.id,
        base_cap_cents: cap.base_cap_cents,
        effective_cap_cents: cap.effective_cap_cents,
        has_exception: cap.has_exception,
        exception_delta_cents: cap.exception_delta_cents,
        actual_spend_cents,
        status,
    })
}

/// The request body for [request_override_endpoint].
#[derive(Debug, Deserialize)]
pub struct RequestOverrideRequest {
    /// The requesting team.
    pub team_id: TeamId,
    /// The rule to override.
    pub rule_id: RuleId,
    /// The requested cap adjustment, in cents.
    pub requested_delta_cents: i64,
    /// Why the team is asking.
    pub reason: String,
}

/// Request a cap override for a team.
pub async fn request_override_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(request): Json<RequestOverrideRequest>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    let override_request = request_override(
        request.team_id,
        request.rule_id,
        request.requested_delta_cents,
        &request.reason,
        identity,
        &connection,
    )?;

    Ok((StatusCode::CREATED, Json(override_request)))
}

/// The request body for [decide_override_endpoint].
#[derive(Debug, Deserialize)]
pub struct DecideOverrideRequest {
    /// Whether to approve the request.
    pub approve: bool,
}

/// Approve or reject a pending override request.
pub async fn decide_override_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Path(override_id): Path<RuleOverrideId>,
    Json(request): Json<DecideOverrideRequest>,
) -> Result<impl IntoResponse, Error> {
    let decided = {
        let connection = state.connection()?;
        decide_override(override_id, request.approve, identity, &connection)?
    };

    state.notifier.notify(Notification::RuleOverrideDecided {
        override_id,
        approved: decided.status == OverrideStatus::Approved,
    });

    Ok(Json(decided))
}

/// Read a team's compensation cap status.
pub async fn compensation_status_endpoint(
    State(state): State<AppState>,
    _identity: RequestIdentity,
    Path(team_id): Path<TeamId>,
    Query(profile): Query<CapProfile>,
) -> Result<impl IntoResponse, Error> {
    let connection = state.connection()?;

    Ok(Json(compensation_status_for_team(
        team_id, &profile, &connection,
    )?))
}

#[cfg(test)]
mod compensation_tests {
    use rusqlite::Connection;
    use time::{Duration, OffsetDateTime};

    use crate::{
        Error,
        db::initialize,
        governance::{GovernanceRule, ThresholdMode, create_association, upsert_governance_rule},
        identity::{RequestIdentity, Role},
        receipt::ReceiptPolicy,
        snapshot::{CompensationLimit, RuleConfig, create_association_rule},
        team::{create_category, create_team},
        transaction::{
            core::{NewTransaction, create_transaction},
            models::TransactionType,
        },
    };

    use super::{
        CapProfile, CapStatus, OverrideStatus, compensation_status_for_team, decide_override,
        evaluate_cap_status, request_override,
    };

    const TREASURER: RequestIdentity = RequestIdentity {
        user_id: 1,
        role: Role::Treasurer,
    };
    const ADMIN: RequestIdentity = RequestIdentity {
        user_id: 3,
        role: Role::AssociationAdmin,
    };

    fn cap_config() -> RuleConfig {
        RuleConfig::CompensationCap {
            default_cap_cents: 500_000,
            approaching_threshold_percent: 90,
            category_names: vec!["Coach Pay".to_owned()],
            limits: vec![
                CompensationLimit {
                    season: Some("2026 Spring".to_owned()),
                    age_group: None,
                    skill_level: None,
                    cap_cents: 400_000,
                },
                CompensationLimit {
                    season: Some("2026 Spring".to_owned()),
                    age_group: Some("U12".to_owned()),
                    skill_level: None,
                    cap_cents: 300_000,
                },
            ],
        }
    }

    fn fixture() -> (Connection, i64, i64, i64) {
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
        let rule = create_association_rule(association_id, "Coach pay cap", &cap_config(), &conn)
            .unwrap();
        let team = create_team(association_id, "U12 Comets", &conn).unwrap();
        let category = create_category(team.id, "Coach Pay", &conn).unwrap();

        (conn, team.id, rule.id, category.id)
    }

    fn settle_expense(conn: &Connection, team_id: i64, category_id: i64, amount_cents: i64) {
        create_transaction(
            &NewTransaction {
                team_id,
                amount_cents,
                transaction_type: TransactionType::Expense,
                category_id: Some(category_id),
                vendor: "Coach Taylor".to_owned(),
                transaction_date: OffsetDateTime::now_utc().date() - Duration::days(1),
                receipt_url: Some("https://receipts.example/pay.pdf".to_owned()),
                description: "Session fees".to_owned(),
            },
            TREASURER,
            conn,
        )
        .unwrap();
    }

    #[test]
    fn cap_status_boundaries() {
        assert_eq!(evaluate_cap_status(0, 100_000, 90), CapStatus::Ok);
        assert_eq!(evaluate_cap_status(89_999, 100_000, 90), CapStatus::Ok);
        assert_eq!(
            evaluate_cap_status(90_000, 100_000, 90),
            CapStatus::Approaching
        );
        assert_eq!(evaluate_cap_status(100_000, 100_000, 90), CapStatus::Over);
        // Zero cap means uncapped.
        assert_eq!(evaluate_cap_status(1_000_000, 0, 90), CapStatus::Ok);
    }

    #[test]
    fn most_specific_limit_wins() {
        let (conn, team_id, _rule_id, _category_id) = fixture();

        let status = compensation_status_for_team(
            team_id,
            &CapProfile {
                season: Some("2026 Spring".to_owned()),
                age_group: Some("U12".to_owned()),
                skill_level: None,
            },
            &conn,
        )
        .unwrap();
        assert_eq!(status.base_cap_cents, 300_000);

        let season_only = compensation_status_for_team(
            team_id,
            &CapProfile {
                season: Some("2026 Spring".to_owned()),
                age_group: None,
                skill_level: None,
            },
            &conn,
        )
        .unwrap();
        assert_eq!(season_only.base_cap_cents, 400_000);

        let no_match = compensation_status_for_team(
            team_id,
            &CapProfile {
                season: Some("2026 Fall".to_owned()),
                age_group: None,
                skill_level: None,
            },
            &conn,
        )
        .unwrap();
        assert_eq!(no_match.base_cap_cents, 500_000);
    }

    #[test]
    fn spend_crosses_approaching_then_over() {
        let (conn, team_id, _rule_id, category_id) = fixture();
        let profile = CapProfile {
            season: Some("2026 Spring".to_owned()),
            age_group: Some("U12".to_owned()),
            skill_level: None,
        };

        settle_expense(&conn, team_id, category_id, 200_000);
        let status = compensation_status_for_team(team_id, &profile, &conn).unwrap();
        assert_eq!(status.actual_spend_cents, 200_000);
        assert_eq!(status.status, CapStatus::Ok);

        settle_expense(&conn, team_id, category_id, 75_000);
        let status = compensation_status_for_team(team_id, &profile, &conn).unwrap();
        assert_eq!(status.status, CapStatus::Approaching);

        settle_expense(&conn, team_id, category_id, 30_000);
        let status = compensation_status_for_team(team_id, &profile, &conn).unwrap();
        assert_eq!(status.status, CapStatus::Over);
    }

    #[test]
    fn only_an_approved_override_raises_the_cap() {
        let (conn, team_id, rule_id, _category_id) = fixture();
        let profile = CapProfile {
            season: Some("2026 Spring".to_owned()),
            age_group: Some("U12".to_owned()),
            skill_level: None,
        };

        let request = request_override(
            team_id,
            rule_id,
            100_000,
            "Second coach for a larger roster",
            TREASURER,
            &conn,
        )
        .unwrap();

        let pending = compensation_status_for_team(team_id, &profile, &conn).unwrap();
        assert!(!pending.has_exception);
        assert_eq!(pending.effective_cap_cents, 300_000);

        decide_override(request.id, true, ADMIN, &conn).unwrap();

        let approved = compensation_status_for_team(team_id, &profile, &conn).unwrap();
        assert!(approved.has_exception);
        assert_eq!(approved.exception_delta_cents, 100_000);
        assert_eq!(approved.effective_cap_cents, 400_000);
    }

    #[test]
    fn resubmission_updates_in_place_and_preserves_history() {
        let (conn, team_id, rule_id, _category_id) = fixture();

        let first = request_override(team_id, rule_id, 50_000, "First ask", TREASURER, &conn)
            .unwrap();
        let second = request_override(team_id, rule_id, 80_000, "Revised ask", TREASURER, &conn)
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.requested_delta_cents, 80_000);
        assert_eq!(second.status, OverrideStatus::Pending);

        decide_override(first.id, true, ADMIN, &conn).unwrap();

        // Asking again over an approved override reopens it.
        let reopened = request_override(team_id, rule_id, 120_000, "Another coach", TREASURER, &conn)
            .unwrap();
        assert_eq!(reopened.id, first.id);
        assert_eq!(reopened.status, OverrideStatus::Pending);
        assert_eq!(reopened.previous_status, Some(OverrideStatus::Approved));
        assert_eq!(reopened.decided_by, None);
    }

    #[test]
    fn deciding_twice_is_an_invalid_state() {
        let (conn, team_id, rule_id, _category_id) = fixture();
        let request = request_override(team_id, rule_id, 50_000, "First ask", TREASURER, &conn)
            .unwrap();

        decide_override(request.id, false, ADMIN, &conn).unwrap();
        let result = decide_override(request.id, true, ADMIN, &conn);

        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn treasurers_may_not_decide_overrides() {
        let (conn, team_id, rule_id, _category_id) = fixture();
        let request = request_override(team_id, rule_id, 50_000, "First ask", TREASURER, &conn)
            .unwrap();

        let result = decide_override(request.id, true, TREASURER, &conn);

        assert!(matches!(result, Err(Error::Permission(_))));
    }

    #[test]
    fn parents_may_not_request_overrides() {
        let (conn, team_id, rule_id, _category_id) = fixture();
        let parent = RequestIdentity {
            user_id: 100,
            role: Role::Parent,
        };

        let result = request_override(team_id, rule_id, 50_000, "Please", parent, &conn);

        assert!(matches!(result, Err(Error::Permission(_))));
    }
}
