//! Association-level governance configuration.
//!
//! Each association has exactly one governance rule describing how its
//! teams collect parent acknowledgments (count or percent mode, default
//! thresholds, whether and how far teams may deviate) and the association's
//! receipt policy. Governance is read-only input to team workflows; team
//! actions never mutate it.

use axum::{Json, extract::State, response::IntoResponse};
use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    AppState, Error, audit,
    identity::RequestIdentity,
    ids::AssociationId,
    permissions,
    receipt::ReceiptPolicy,
    team::TeamSettings,
};

/// How acknowledgment thresholds are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdMode {
    /// An absolute number of acknowledging families.
    Count,
    /// A share of eligible families, 1 to 100.
    Percent,
}

impl ThresholdMode {
    /// The stored form of this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            ThresholdMode::Count => "COUNT",
            ThresholdMode::Percent => "PERCENT",
        }
    }

    /// Parse a mode from its stored form.
    pub fn parse(value: &str) -> Option<ThresholdMode> {
        match value {
            "COUNT" => Some(ThresholdMode::Count),
            "PERCENT" => Some(ThresholdMode::Percent),
            _ => None,
        }
    }
}

/// An association's governance rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceRule {
    /// The association this rule governs.
    pub association_id: AssociationId,
    /// The default acknowledgment threshold mode for new budgets.
    pub parent_ack_mode: ThresholdMode,
    /// The default count threshold, set iff mode is COUNT.
    pub default_count_threshold: Option<i64>,
    /// The default percent threshold (1-100), set iff mode is PERCENT.
    pub default_percent_threshold: Option<i64>,
    /// Whether teams may choose their own threshold within the bounds below.
    pub allow_team_override: bool,
    /// The lowest percent a team may choose.
    pub override_min_percent: Option<i64>,
    /// The highest percent a team may choose.
    pub override_max_percent: Option<i64>,
    /// The lowest count a team may choose.
    pub override_min_count: Option<i64>,
    /// The highest count a team may choose.
    pub override_max_count: Option<i64>,
    /// Whether a threshold-met budget still needs association sign-off
    /// before it locks.
    pub requires_association_approval: bool,
    /// The association's receipt policy. The team-override fields are left
    /// unset here and merged in by [effective_receipt_policy].
    pub receipt_policy: ReceiptPolicy,
}

/// Create the association and governance rule tables.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_governance_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS association (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS association_governance_rule (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                association_id INTEGER NOT NULL UNIQUE,
                parent_ack_mode TEXT NOT NULL,
                default_count_threshold INTEGER,
                default_percent_threshold INTEGER,
                allow_team_override INTEGER NOT NULL DEFAULT 0,
                override_min_percent INTEGER,
                override_max_percent INTEGER,
                override_min_count INTEGER,
                override_max_count INTEGER,
                requires_association_approval INTEGER NOT NULL DEFAULT 0,
                receipt_policy TEXT NOT NULL,
                FOREIGN KEY(association_id) REFERENCES association(id)
            );",
        (),
    )?;

    Ok(())
}

/// Create an association.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_association(name: &str, connection: &Connection) -> Result<AssociationId, Error> {
    connection.execute("INSERT INTO association (name) VALUES (?1)", [name])?;

    Ok(connection.last_insert_rowid())
}

/// Whether `association_id` refers to an existing association.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn association_exists(
    association_id: AssociationId,
    connection: &Connection,
) -> Result<bool, Error> {
    let count: i64 = connection
        .prepare("SELECT COUNT(*) FROM association WHERE id = :id")?
        .query_row(&[(":id", &association_id)], |row| row.get(0))?;

    Ok(count > 0)
}

fn validate_rule(rule: &GovernanceRule) -> Result<(), Error> {
    match rule.parent_ack_mode {
        ThresholdMode::Count => {
            let threshold = rule.default_count_threshold.ok_or(Error::Validation {
                field: "default_count_threshold",
                message: "a count threshold is required in COUNT mode".to_owned(),
            })?;

            if threshold < 1 {
                return Err(Error::Validation {
                    field: "default_count_threshold",
                    message: "the count threshold must be at least 1".to_owned(),
                });
            }

            if rule.default_percent_threshold.is_some() {
                return Err(Error::Validation {
                    field: "default_percent_threshold",
                    message: "a percent threshold may not be set in COUNT mode".to_owned(),
                });
            }
        }
        ThresholdMode::Percent => {
            let threshold = rule.default_percent_threshold.ok_or(Error::Validation {
                field: "default_percent_threshold",
                message: "a percent threshold is required in PERCENT mode".to_owned(),
            })?;

            if !(1..=100).contains(&threshold) {
                return Err(Error::Validation {
                    field: "default_percent_threshold",
                    message: "the percent threshold must be between 1 and 100".to_owned(),
                });
            }

            if rule.default_count_threshold.is_some() {
                return Err(Error::Validation {
                    field: "default_count_threshold",
                    message: "a count threshold may not be set in PERCENT mode".to_owned(),
                });
            }
        }
    }

    if let (Some(min), Some(max)) = (rule.override_min_percent, rule.override_max_percent)
        && min > max
    {
        return Err(Error::Validation {
            field: "override_min_percent",
            message: "the minimum percent bound exceeds the maximum".to_owned(),
        });
    }

    if let (Some(min), Some(max)) = (rule.override_min_count, rule.override_max_count)
        && min > max
    {
        return Err(Error::Validation {
            field: "override_min_count",
            message: "the minimum count bound exceeds the maximum".to_owned(),
        });
    }

    Ok(())
}

/// Insert or replace the association's governance rule.
///
/// # Errors
/// Returns [Error::Validation] if the thresholds do not match the mode or
/// the override bounds are inverted, [Error::NotFound] if the association
/// does not exist, or an error if there is an SQL error.
pub fn upsert_governance_rule(rule: &GovernanceRule, connection: &Connection) -> Result<(), Error> {
    validate_rule(rule)?;

    if !association_exists(rule.association_id, connection)? {
        return Err(Error::NotFound);
    }

    let receipt_policy = serde_json::to_string(&rule.receipt_policy).map_err(|error| {
        Error::Validation {
            field: "receipt_policy",
            message: error.to_string(),
        }
    })?;

    connection.execute(
        "INSERT INTO association_governance_rule
            (association_id, parent_ack_mode, default_count_threshold,
             default_percent_threshold, allow_team_override, override_min_percent,
             override_max_percent, override_min_count, override_max_count,
             requires_association_approval, receipt_policy)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(association_id) DO UPDATE SET
            parent_ack_mode = excluded.parent_ack_mode,
            default_count_threshold = excluded.default_count_threshold,
            default_percent_threshold = excluded.default_percent_threshold,
            allow_team_override = excluded.allow_team_override,
            override_min_percent = excluded.override_min_percent,
            override_max_percent = excluded.override_max_percent,
            override_min_count = excluded.override_min_count,
            override_max_count = excluded.override_max_count,
            requires_association_approval = excluded.requires_association_approval,
            receipt_policy = excluded.receipt_policy",
        (
            rule.association_id,
            rule.parent_ack_mode.as_str(),
            rule.default_count_threshold,
            rule.default_percent_threshold,
            rule.allow_team_override,
            rule.override_min_percent,
            rule.override_max_percent,
            rule.override_min_count,
            rule.override_max_count,
            rule.requires_association_approval,
            receipt_policy,
        ),
    )?;

    Ok(())
}

/// Retrieve the association's governance rule.
///
/// # Errors
/// Returns [Error::NotFound] if the association has no governance rule.
pub fn get_governance_rule(
    association_id: AssociationId,
    connection: &Connection,
) -> Result<GovernanceRule, Error> {
    connection
        .prepare(
            "SELECT association_id, parent_ack_mode, default_count_threshold,
                    default_percent_threshold, allow_team_override, override_min_percent,
                    override_max_percent, override_min_count, override_max_count,
                    requires_association_approval, receipt_policy
             FROM association_governance_rule WHERE association_id = :association_id",
        )?
        .query_row(&[(":association_id", &association_id)], map_rule_row)
        .map_err(|error| error.into())
}

fn map_rule_row(row: &Row) -> Result<GovernanceRule, rusqlite::Error> {
    let mode: String = row.get(1)?;
    let parent_ack_mode = ThresholdMode::parse(&mode).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown threshold mode {mode}").into(),
        )
    })?;

    let receipt_policy_json: String = row.get(10)?;
    let receipt_policy = serde_json::from_str(&receipt_policy_json).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            10,
            rusqlite::types::Type::Text,
            Box::new(error),
        )
    })?;

    Ok(GovernanceRule {
        association_id: row.get(0)?,
        parent_ack_mode,
        default_count_threshold: row.get(2)?,
        default_percent_threshold: row.get(3)?,
        allow_team_override: row.get(4)?,
        override_min_percent: row.get(5)?,
        override_max_percent: row.get(6)?,
        override_min_count: row.get(7)?,
        override_max_count: row.get(8)?,
        requires_association_approval: row.get(9)?,
        receipt_policy,
    })
}

/// A team's requested acknowledgment threshold, replacing the association
/// default when governance allows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdChoice {
    /// The requested mode, which must match the association's mode.
    pub mode: ThresholdMode,
    /// The requested threshold value.
    pub value: i64,
}

/// Resolve the acknowledgment threshold a budget will be presented with.
///
/// With no team choice, the association defaults apply. A team choice must
/// match the association's mode, be permitted by `allow_team_override`, and
/// fall within the configured bounds.
///
/// # Errors
/// Returns [Error::Validation] if the choice is out of bounds or the wrong
/// mode, or [Error::Permission] if governance forbids team overrides.
pub fn resolve_threshold(
    rule: &GovernanceRule,
    team_choice: Option<ThresholdChoice>,
) -> Result<ThresholdChoice, Error> {
    let Some(choice) = team_choice else {
        let value = match rule.parent_ack_mode {
            ThresholdMode::Count => rule.default_count_threshold,
            ThresholdMode::Percent => rule.default_percent_threshold,
        }
        .ok_or(Error::NotFound)?;

        return Ok(ThresholdChoice {
            mode: rule.parent_ack_mode,
            value,
        });
    };

    if !rule.allow_team_override {
        return Err(Error::Permission(
            "this association does not allow teams to change the acknowledgment threshold"
                .to_owned(),
        ));
    }

    if choice.mode != rule.parent_ack_mode {
        return Err(Error::Validation {
            field: "mode",
            message: format!(
                "the association collects acknowledgments in {} mode",
                rule.parent_ack_mode.as_str()
            ),
        });
    }

    let (min, max) = match choice.mode {
        ThresholdMode::Count => (rule.override_min_count, rule.override_max_count),
        ThresholdMode::Percent => (
            rule.override_min_percent.or(Some(1)),
            rule.override_max_percent.or(Some(100)),
        ),
    };

    if min.is_some_and(|min| choice.value < min) || max.is_some_and(|max| choice.value > max) {
        return Err(Error::Validation {
            field: "value",
            message: "the requested threshold is outside the association's allowed bounds"
                .to_owned(),
        });
    }

    Ok(choice)
}

/// Merge the team's receipt threshold override into the association policy.
pub fn effective_receipt_policy(rule: &GovernanceRule, settings: &TeamSettings) -> ReceiptPolicy {
    ReceiptPolicy {
        team_threshold_override_cents: settings.receipt_threshold_override_cents,
        ..rule.receipt_policy.clone()
    }
}

/// The request body for [upsert_governance_endpoint].
pub type GovernanceUpsertRequest = GovernanceRule;

/// Upsert an association's governance rule. ASSOCIATION_ADMIN only.
pub async fn upsert_governance_endpoint(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(rule): Json<GovernanceUpsertRequest>,
) -> Result<impl IntoResponse, Error> {
    if !permissions::can_edit_governance(identity.role) {
        return Err(Error::Permission(format!(
            "the {} role may not edit association governance",
            identity.role
        )));
    }

    let connection = state.connection()?;
    let sql_transaction = connection.unchecked_transaction()?;

    upsert_governance_rule(&rule, &sql_transaction)?;
    audit::record(
        "GOVERNANCE_UPDATED",
        identity.actor(),
        "association",
        rule.association_id,
        &json!({ "parent_ack_mode": rule.parent_ack_mode.as_str() }),
        &sql_transaction,
    )?;

    sql_transaction.commit()?;

    Ok(Json(json!({ "success": true })))
}
