//! Roster families and players.
//!
//! A family is eligible to acknowledge budgets while it has at least one
//! ACTIVE player on the roster. Families are never hard-deleted while
//! approvals or transactions reference them; eligibility is recomputed from
//! player status instead.

use rusqlite::Connection;

use crate::{
    Error,
    ids::{DatabaseId, FamilyId, TeamId},
};

/// A roster household unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    /// The family's database ID.
    pub id: FamilyId,
    /// The team whose roster this family is on.
    pub team_id: TeamId,
    /// The family's display name.
    pub name: String,
}

/// The roster status of a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    /// On the active roster.
    Active,
    /// Off the roster, e.g. left mid-season.
    Inactive,
}

impl PlayerStatus {
    fn as_str(self) -> &'static str {
        match self {
            PlayerStatus::Active => "ACTIVE",
            PlayerStatus::Inactive => "INACTIVE",
        }
    }
}

/// Create the family and player tables.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_family_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS family (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                FOREIGN KEY(team_id) REFERENCES team(id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS player (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                family_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ACTIVE',
                FOREIGN KEY(family_id) REFERENCES family(id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS idx_player_family_id ON player(family_id)",
        (),
    )?;

    Ok(())
}

/// Create a family on a team's roster.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_family(
    team_id: TeamId,
    name: &str,
    connection: &Connection,
) -> Result<Family, Error> {
    connection.execute(
        "INSERT INTO family (team_id, name) VALUES (?1, ?2)",
        (team_id, name),
    )?;

    Ok(Family {
        id: connection.last_insert_rowid(),
        team_id,
        name: name.to_owned(),
    })
}

/// Add a player to a family.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn add_player(
    family_id: FamilyId,
    name: &str,
    status: PlayerStatus,
    connection: &Connection,
) -> Result<DatabaseId, Error> {
    connection.execute(
        "INSERT INTO player (family_id, name, status) VALUES (?1, ?2, ?3)",
        (family_id, name, status.as_str()),
    )?;

    Ok(connection.last_insert_rowid())
}

/// Change a player's roster status.
///
/// Callers mutating rosters while a budget is presented should follow up
/// with `budget::workflow::update_eligible_family_count` so the threshold
/// denominator tracks the roster.
///
/// # Errors
/// Returns [Error::NotFound] if `player_id` does not refer to a player.
pub fn set_player_status(
    player_id: DatabaseId,
    status: PlayerStatus,
    connection: &Connection,
) -> Result<(), Error> {
    let rows_affected = connection.execute(
        "UPDATE player SET status = ?1 WHERE id = ?2",
        (status.as_str(), player_id),
    )?;

    if rows_affected == 0 {
        return Err(Error::NotFound);
    }

    Ok(())
}

/// Count the families on `team_id`'s roster with at least one ACTIVE player.
///
/// This is the denominator for percent-mode acknowledgment thresholds.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn eligible_family_count(team_id: TeamId, connection: &Connection) -> Result<i64, Error> {
    connection
        .prepare(
            "SELECT COUNT(DISTINCT f.id) FROM family f
             INNER JOIN player p ON p.family_id = f.id
             WHERE f.team_id = :team_id AND p.status = 'ACTIVE'",
        )?
        .query_row(&[(":team_id", &team_id)], |row| row.get(0))
        .map_err(|error| error.into())
}

/// Whether `family_id` belongs to `team_id` and is currently eligible.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn is_family_eligible(
    family_id: FamilyId,
    team_id: TeamId,
    connection: &Connection,
) -> Result<bool, Error> {
    let count: i64 = connection
        .prepare(
            "SELECT COUNT(*) FROM family f
             INNER JOIN player p ON p.family_id = f.id
             WHERE f.id = :family_id AND f.team_id = :team_id AND p.status = 'ACTIVE'",
        )?
        .query_row(
            &[(":family_id", &family_id), (":team_id", &team_id)],
            |row| row.get(0),
        )?;

    Ok(count > 0)
}
