//! App-profile repository: the registry of owners allowed to submit work.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A registered application profile.
#[derive(Debug, Clone)]
pub struct ProfileRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

impl ProfileRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(
    db: &Database,
    id: &str,
    name: &str,
    description: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO app_profiles (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, description, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProfileRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM app_profiles WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], ProfileRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// True when the owner id is registered.
pub fn exists(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let found: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM app_profiles WHERE id = ?1)",
            params![id],
            |r| r.get(0),
        )?;
        Ok(found)
    })
}
