//! Project database operations

use chrono::Utc;
use rusqlite::Result as SqliteResult;
use uuid::Uuid;

use crate::db::{parse_enum, parse_ts};
use crate::models::{OwnerType, Project};
use super::super::Database;

impl Database {
    pub fn create_project(
        &self,
        name: &str,
        description: Option<&str>,
        owner_type: OwnerType,
        owner_id: &str,
        site_id: Option<&str>,
    ) -> SqliteResult<Project> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO projects (id, name, description, owner_type, owner_id, site_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7)",
            rusqlite::params![&id, name, description, owner_type.as_ref(), owner_id, site_id, now.to_rfc3339()],
        )?;
        Ok(Project {
            id,
            name: name.to_string(),
            description: description.map(String::from),
            owner_type,
            owner_id: owner_id.to_string(),
            site_id: site_id.map(String::from),
            status: "active".to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn list_projects_for_user(&self, user_id: &str) -> SqliteResult<Vec<Project>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, owner_type, owner_id, site_id, status, created_at, updated_at FROM projects
             WHERE (owner_type = 'user' AND owner_id = ?1)
                OR (owner_type = 'team' AND owner_id IN (SELECT team_id FROM team_members WHERE user_id = ?1))
             ORDER BY created_at DESC",
        )?;
        let projects = stmt
            .query_map([user_id], |row| {
                let owner_type: String = row.get(3)?;
                let created_at: String = row.get(7)?;
                let updated_at: String = row.get(8)?;
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    owner_type: parse_enum(3, &owner_type)?,
                    owner_id: row.get(4)?,
                    site_id: row.get(5)?,
                    status: row.get(6)?,
                    created_at: parse_ts(7, &created_at)?,
                    updated_at: parse_ts(8, &updated_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(projects)
    }
}
