//! Teams, their spending categories, and team-level settings.

use rusqlite::{Connection, OptionalExtension, Row};

use crate::{
    Error,
    ids::{AssociationId, CategoryId, TeamId},
};

/// A team within an association.
#[derive(Debug, Clone, PartialEq)]
pub struct Team {
    /// The team's database ID.
    pub id: TeamId,
    /// The association this team belongs to.
    pub association_id: AssociationId,
    /// The team's display name.
    pub name: String,
}

/// A spending category owned by a team.
#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    /// The category's database ID.
    pub id: CategoryId,
    /// The team that owns this category.
    pub team_id: TeamId,
    /// The category's display name.
    pub name: String,
    /// Whether the category may be used on new transactions.
    pub active: bool,
}

/// Team-level knobs consulted by the validation engine.
///
/// All fields are optional; an unset field falls back to association policy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TeamSettings {
    /// The team's own receipt threshold, applied only when the association
    /// allows teams to tighten its threshold.
    pub receipt_threshold_override_cents: Option<i64>,
    /// Flag transactions at or above this amount for extra review.
    pub large_transaction_threshold_cents: Option<i64>,
}

/// Create the team, category and team settings tables.
///
/// # Errors
/// Returns an error if there is an SQL error.
pub fn create_team_tables(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS team (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                association_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                FOREIGN KEY(association_id) REFERENCES association(id)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS category (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY(team_id) REFERENCES team(id),
                UNIQUE(team_id, name)
            );",
        (),
    )?;

    connection.execute(
        "CREATE TABLE IF NOT EXISTS team_settings (
                team_id INTEGER PRIMARY KEY,
                receipt_threshold_override_cents INTEGER,
                large_transaction_threshold_cents INTEGER,
                FOREIGN KEY(team_id) REFERENCES team(id)
            );",
        (),
    )?;

    Ok(())
}

/// Create a team in the database.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_team(
    association_id: AssociationId,
    name: &str,
    connection: &Connection,
) -> Result<Team, Error> {
    connection.execute(
        "INSERT INTO team (association_id, name) VALUES (?1, ?2)",
        (association_id, name),
    )?;

    Ok(Team {
        id: connection.last_insert_rowid(),
        association_id,
        name: name.to_owned(),
    })
}

/// Retrieve a team in the database by `team_id`.
///
/// # Errors
/// Returns [Error::NotFound] if `team_id` does not refer to a team.
pub fn get_team(team_id: TeamId, connection: &Connection) -> Result<Team, Error> {
    connection
        .prepare("SELECT id, association_id, name FROM team WHERE id = :id")?
        .query_row(&[(":id", &team_id)], map_team_row)
        .map_err(|error| error.into())
}

fn map_team_row(row: &Row) -> Result<Team, rusqlite::Error> {
    Ok(Team {
        id: row.get(0)?,
        association_id: row.get(1)?,
        name: row.get(2)?,
    })
}

/// Create a spending category for a team.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn create_category(
    team_id: TeamId,
    name: &str,
    connection: &Connection,
) -> Result<Category, Error> {
    connection.execute(
        "INSERT INTO category (team_id, name) VALUES (?1, ?2)",
        (team_id, name),
    )?;

    Ok(Category {
        id: connection.last_insert_rowid(),
        team_id,
        name: name.to_owned(),
        active: true,
    })
}

/// Retrieve the active categories for a team.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_active_categories(
    team_id: TeamId,
    connection: &Connection,
) -> Result<Vec<Category>, Error> {
    connection
        .prepare(
            "SELECT id, team_id, name, active FROM category
             WHERE team_id = :team_id AND active = 1
             ORDER BY name ASC",
        )?
        .query_map(&[(":team_id", &team_id)], |row| {
            Ok(Category {
                id: row.get(0)?,
                team_id: row.get(1)?,
                name: row.get(2)?,
                active: row.get(3)?,
            })
        })?
        .map(|maybe_category| maybe_category.map_err(|error| error.into()))
        .collect()
}

/// Replace the team's settings row.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn set_team_settings(
    team_id: TeamId,
    settings: TeamSettings,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO team_settings
            (team_id, receipt_threshold_override_cents, large_transaction_threshold_cents)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(team_id) DO UPDATE SET
            receipt_threshold_override_cents = excluded.receipt_threshold_override_cents,
            large_transaction_threshold_cents = excluded.large_transaction_threshold_cents",
        (
            team_id,
            settings.receipt_threshold_override_cents,
            settings.large_transaction_threshold_cents,
        ),
    )?;

    Ok(())
}

/// Retrieve the team's settings, defaulting every field when the team has
/// never set any.
///
/// # Errors
/// This function will return an error if there is an SQL error.
pub fn get_team_settings(team_id: TeamId, connection: &Connection) -> Result<TeamSettings, Error> {
    let settings = connection
        .prepare(
            "SELECT receipt_threshold_override_cents, large_transaction_threshold_cents
             FROM team_settings WHERE team_id = :team_id",
        )?
        .query_row(&[(":team_id", &team_id)], |row| {
            Ok(TeamSettings {
                receipt_threshold_override_cents: row.get(0)?,
                large_transaction_threshold_cents: row.get(1)?,
            })
        })
        .optional()?;

    Ok(settings.unwrap_or_default())
}

#[cfg(test)]
mod team_tests {
    use rusqlite::Connection;

    use crate::db::initialize;

    use super::{
        TeamSettings, create_category, create_team, get_active_categories, get_team,
        get_team_settings, set_team_settings,
    };

    fn init_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        conn
    }

    fn insert_association(conn: &Connection) -> i64 {
        conn.execute("INSERT INTO association (name) VALUES ('Test League')", ())
            .unwrap();
        conn.last_insert_rowid()
    }

    #[test]
    fn create_and_get_team() {
        let conn = init_db();
        let association_id = insert_association(&conn);

        let team = create_team(association_id, "U12 Comets", &conn).unwrap();

        assert_eq!(get_team(team.id, &conn).unwrap(), team);
    }

    #[test]
    fn active_categories_excludes_inactive() {
        let conn = init_db();
        let association_id = insert_association(&conn);
        let team = create_team(association_id, "U12 Comets", &conn).unwrap();

        create_category(team.id, "Equipment", &conn).unwrap();
        let retired = create_category(team.id, "Travel", &conn).unwrap();
        conn.execute("UPDATE category SET active = 0 WHERE id = ?1", [retired.id])
            .unwrap();

        let categories = get_active_categories(team.id, &conn).unwrap();

        assert_eq!(categories.len(), 1);
        assert_eq!(categories[0].name, "Equipment");
    }

    #[test]
    fn settings_default_when_unset() {
        let conn = init_db();
        let association_id = insert_association(&conn);
        let team = create_team(association_id, "U12 Comets", &conn).unwrap();

        assert_eq!(
            get_team_settings(team.id, &conn).unwrap(),
            TeamSettings::default()
        );
    }

    #[test]
    fn settings_round_trip() {
        let conn = init_db();
        let association_id = insert_association(&conn);
        let team = create_team(association_id, "U12 Comets", &conn).unwrap();

        let settings = TeamSettings {
            receipt_threshold_override_cents: Some(5_000),
            large_transaction_threshold_cents: Some(100_000),
        };
        set_team_settings(team.id, settings, &conn).unwrap();

        assert_eq!(get_team_settings(team.id, &conn).unwrap(), settings);
    }
}
