//! Association rules, policy snapshots, and team seasons.
//!
//! When a team season starts, the association's governance configuration and
//! active rule set are copied into an immutable snapshot. The season reads
//! policy from its snapshot for its entire lifetime, so later association
//! edits can never retroactively change an in-flight season.

use axum::{Json, extract::State, response::IntoResponse};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Date, OffsetDateTime};

use crate::{
    AppState, Error, audit,
    governance::{GovernanceRule, get_governance_rule},
    identity::{Actor, RequestIdentity},
    ids::{AssociationId, RuleId, SnapshotId, TeamId, TeamSeasonId},
    permissions,
    team::get_team,
};

/// A cap on one dimension of coach compensation, matched by specificity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationLimit {
    /// The season label this limit applies to, or any season if unset.
    pub season: Option<String>,
    /// The age group this limit applies to, or any if unset.
    pub age_group: Option<String>,
    /// The skill level this limit applies to, or any if unset.
    pub skill_level: Option<String>,
    /// The cap in cents. Zero means no cap.
    pub cap_cents: i64,
}

/// The typed configuration of an [AssociationRule].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleConfig {
    /// A per-category spending limit enforced by transaction validation.
    SpendingLimit {
        /// The category name the limit applies to.
        category_name: String,
        /// The maximum single-transaction amount, in cents.
        limit_cents: i64,
    },
    /// A coach-compensation cap policy.
    CompensationCap {
        /// The cap applied when no specific limit matches, in cents.
        default_cap_cents: i64,
        /// The OK/APPROACHING boundary as a percent of the cap.
        approaching_threshold_percent: i64,
        /// The category names whose expenses count as compensation spend.
        category_names: Vec<String>,
        /// Specific limits, matched most-specific first.
        limits: Vec<CompensationLimit>,
    },
}

/// A named association-wide rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationRule {
    /// The rule's database ID.
    pub id: RuleId,
    /// The association that owns the rule.
    pub association_id: AssociationId,
    /// The rule's display name.
    pub name: String,
    /// The rule's typed configuration.
    pub config: RuleConfig,
    /// Whether the rule is currently in force.
    pub active: bool,
}

/// An immutable copy of governance config and active rules.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnapshot {
    /// The snapshot's database ID.
    pub id: SnapshotId,
    /// The association the snapshot was taken from.
    pub association_id: AssociationId,
    /// The governance rule as of the snapshot instant.
    pub governance: GovernanceRule,
    /// The active rules as of the snapshot instant.
    pub rules: Vec<AssociationRule>,
    /// When the snapshot was taken.
    pub created_at: OffsetDateTime,
}

/// One season of a team's lifetime, bound to a policy snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamSeason {
    /// The season's database ID.
    pub id: TeamSeasonId,
    /// The team playing the season.
    pub team_id: TeamId,
    /// The association the team belongs to.
    pub association_id: AssociationId,
    /// The frozen policy snapshot for this season.
    pub snapshot_id: SnapshotId,
    /// The season label, e.g. "2026 Spring".
    pub label: String,
    /// The first day of the season.
    pub start_date: Date,
    /// The last day of the season.
    pub end_date: Date,
}

/// Create the rule, snapshot and season tables.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_snapshot_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS association_rule (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                association_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                config TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY(association_id) REFERENCES association(id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS team_policy_snapshot (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                association_id INTEGER NOT NULL,
                governance TEXT NOT NULL,
                rules TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY(association_id) REFERENCES association(id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS team_season (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                association_id INTEGER NOT NULL,
                snapshot_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                FOREIGN KEY(team_id) REFERENCES team(id),
                FOREIGN KEY(snapshot_id) REFERENCES team_policy_snapshot(id),
                UNIQUE(team_id, label)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS team_season_state_change (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_season_id INTEGER NOT NULL,
                event TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor_id INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY(team_season_id) REFERENCES team_season(id)
            );",
        (),
    )?;

    Ok(())
}

fn serialize_config<T: Serialize>(value: &T, field: &'static str) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|error| Error::Validation {
        field,
        message: error.to_string(),
    })
}

fn deserialize_column<T: serde::de::DeserializeOwned>(
    json: &str,
    column: usize,
) -> Result<T, rusqlite::Error> {
    serde_json::from_str(json).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(error),
        )
    })
}

/// Create an association rule.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_association_rule(
    association_id: AssociationId,
    name: &str,
    config: &RuleConfig,
    connection: &Connection,
) -> Result<AssociationRule, Error> {
    connection.execute(
        "INSERT INTO association_rule (association_id, name, config) VALUES (?1, ?2, ?3)",
        (
            association_id,
            name,
            serialize_config(config, "config")?,
        ),
    )?;

    Ok(AssociationRule {
        id: connection.last_insert_rowid(),
        association_id,
        name: name.to_owned(),
        config: config.clone(),
        active: true,
    })
}

fn map_rule_row(row: &Row) -> Result<AssociationRule, rusqlite::Error> {
    let config_json: String = row.get(3)?;

    Ok(AssociationRule {
        id: row.get(0)?,
        association_id: row.get(1)?,
        name: row.get(2)?,
        config: deserialize_column(&config_json, 3)?,
        active: row.get(4)?,
    })
}

/// Retrieve a rule by `rule_id`.
///
/// # Errors
/// Returns [Error::NotFound] if `rule_id` does not refer to a rule.
pub fn get_rule(rule_id: RuleId, connection: &Connection) -> Result<AssociationRule, Error> {
    connection
        .prepare(
            "SELECT id, association_id, name, config, active
             FROM association_rule WHERE id = :id",
        )?
        .query_row(&[(":id", &rule_id)], map_rule_row)
        .map_err(|error| error.into())
}

/// Retrieve an association's active rules.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_active_rules(
    association_id: AssociationId,
    connection: &Connection,
) -> Result<Vec<AssociationRule>, Error> {
    connection
        .prepare(
            "SELECT id, association_id, name, config, active
             FROM association_rule
             WHERE association_id = :association_id AND active = 1
             ORDER BY id ASC",
        )?
        .query_map(&[(":association_id", &association_id)], map_rule_row)?
        .map(|maybe_rule| maybe_rule.map_err(|error| error.into()))
        .collect()
}

/// Capture the association's governance config and active rules as an
/// immutable snapshot.
///
/// # Errors
/// Returns [Error::NotFound] if the association has no governance rule, or
/// an error if there is an SQL error.
pub fn create_policy_snapshot(
    association_id: AssociationId,
    connection: &Connection,
) -> Result<SnapshotId, Error> {
    let governance = get_governance_rule(association_id, connection)?;
    let rules = get_active_rules(association_id, connection)?;

    connection.execute(
        "INSERT INTO team_policy_snapshot (association_id, governance, rules, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        (
            association_id,
            serialize_config(&governance, "governance")?,
            serialize_config(&rules, "rules")?,
            OffsetDateTime::now_utc(),
        ),
    )?;

    Ok(connection.last_insert_rowid())
}

/// Retrieve a policy snapshot by `snapshot_id`.
///
/// # Errors
/// Returns [Error::NotFound] if `snapshot_id` does not refer to a snapshot.
pub fn get_policy_snapshot(
    snapshot_id: SnapshotId,
    connection: &Connection,
) -> Result<PolicySnapshot, Error> {
    connection
        .prepare(
            "SELECT id, association_id, governance, rules, created_at
             FROM team_policy_snapshot WHERE id = :id",
        )?
        .query_row(&[(":id", &snapshot_id)], |row| {
            let governance_json: String = row.get(2)?;
            let rules_json: String = row.get(3)?;

            Ok(PolicySnapshot {
                id: row.get(0)?,
                association_id: row.get(1)?,
                governance: deserialize_column(&governance_json, 2)?,
                rules: deserialize_column(&rules_json, 3)?,
                created_at: row.get(4)?,
            })
        })
        .map_err(|error| error.into())
}

/// Record a lifecycle event for a team season.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn record_state_change(
    team_season_id: TeamSeasonId,
    event: &str,
    actor: Actor,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO team_season_state_change (team_season_id, event, actor_type, actor_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        (
            team_season_id,
            event,
            actor.type_str(),
            actor.user_id(),
            OffsetDateTime::now_utc(),
        ),
    )?;

    Ok(())
}

/// Start a team season, freezing the association's policy into a snapshot.
///
/// Snapshot, season row, and the initial SETUP state change (attributed to
/// the system) are written in one transaction; a partial season can never
/// be observed.
///
/// # Errors
/// Returns [Error::NotFound] if the team or the association's governance
/// rule does not exist, [Error::Validation] if the dates are inverted, or
/// an error if there is an SQL error.
pub fn create_team_season_with_snapshot(
    team_id: TeamId,
    association_id: AssociationId,
    label: &str,
    start_date: Date,
    end_date: Date,
    connection: &Connection,
) -> Result<TeamSeason, Error> {
    if label.trim().is_empty() {
        return Err(Error::Validation {
            field: "label",
            message: "the season label must not be empty".to_owned(),
        });
    }

    if start_date >= end_date {
        return Err(Error::Validation {
            field: "start_date",
            message: "the season must start before it ends".to_owned(),
        });
    }

    let sql_transaction = connection.unchecked_transaction()?;

    let team = get_team(team_id, &sql_transaction)?;
    if team.association_id != association_id {
        return Err(Error::NotFound);
    }

    let snapshot_id = create_policy_snapshot(association_id, &sql_transaction)?;

    sql_transaction.execute(
        "INSERT INTO team_season (team_id, association_id, snapshot_id, label, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        (team_id, association_id, snapshot_id, label, start_date, end_date),
    )?;
    let team_season_id = sql_transaction.last_insert_rowid();

    record_state_change(team_season_id, "SETUP", Actor::System, &sql_transaction)?;
    audit::record(
        "TEAM_SEASON_CREATED",
        Actor::System,
        "team_season",
        team_season_id,
        &json!({ "snapshot_id": snapshot_id, "label": label }),
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(TeamSeason {
        id: team_season_id,
        team_id,
        association_id,
        snapshot_id,
        label: label.to_owned(),
        start_date,
        end_date,
    })
}

fn map_season_row(row: &Row) -> Result<TeamSeason, rusqlite::Error> {
    Ok(TeamSeason {
        id: row.get(0)?,
        team_id: row.get(1)?,
        association_id: row.get(2)?,
        snapshot_id: row.get(3)?,
        label: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
    })
}

/// Retrieve the season containing `today` for a team, if any.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn current_season_for_team(
    team_id: TeamId,
    today: Date,
    connection: &Connection,
) -> Result<Option<TeamSeason>, Error> {
    connection
        .prepare(
            "SELECT id, team_id, association_id, snapshot_id, label, start_date, end_date
             FROM team_season
             WHERE team_id = :team_id AND start_date <= :today AND end_date >= :today
             ORDER BY start_date DESC
             LIMIT 1",
        )?
        .query_row(
            &[
                (":team_id", &team_id as &dyn rusqlite::ToSql),
                (":today", &today),
            ],
            map_season_row,
        )
        .optional()
        .map_err(|error| error.into())
}

/// The governance rule and association rules a team is subject to on `today`.
///
/// Reads from the season's frozen snapshot while a season is in progress,
/// and from live governance otherwise. A team whose association has no
/// governance rule yet gets no governance and an empty rule set.
///
/// # Errors
/// Returns [Error::NotFound] if the team does not exist, or an error if
/// there is an SQL error.
pub fn policy_in_force(
    team_id: TeamId,
    today: Date,
    connection: &Connection,
) -> Result<(Option<GovernanceRule>, Vec<AssociationRule>, Option<TeamSeason>), Error> {
    let team = get_team(team_id, connection)?;
    let season = current_season_for_team(team_id, today, connection)?;

    if let Some(season) = season {
        let snapshot = get_policy_snapshot(season.snapshot_id, connection)?;
        return Ok((Some(snapshot.governance), snapshot.rules, Some(season)));
    }

    match get_governance_rule(team.association_id, connection) {
        Ok(governance) => {
            let rules = get_active_rules(team.association_id, connection)?;
            Ok((Some(governance), rules, None))
        }
        Err(Error::NotFound) => Ok((None, Vec::new(), None)),
        Err(error) => Err(error),
    }
}

/// The request body for [create_team_season_endpoint].
#[derive(Debug, Deserialize)]
pub struct CreateTeamSeasonRequest {
    /// The team starting a season.
    pub team_id: TeamId,
    /// The association whose policy is snapshotted.
    pub association_id: AssociationId,
    /// The season label, e.g. "2026 Spring".
    pub label: String,
    /// The first day of the season.
    pub start_date: Date,
    /// The last day of the season.
    pub end_date: Date,
}

/// Start a team season with a frozen policy snapshot. ASSOCIATION_ADMIN only.
pub async fn create_team_season_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(request): Json<CreateTeamSeasonRequest>,
) -> Result<impl IntoResponse, Error> {
    if !permissions::can_edit_governance(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not start team seasons",
            identity.role
        )));
    }

    let connection = state.connection()?;
    let season = create_team_season_with_snapshot(
        request.team_id,
        request.association_id,
        &request.label,
        request.start_date,
        request.end_date,
        &connection,
    )?;

    Ok(Json(json!({ "success": true, "data": season })))
}
