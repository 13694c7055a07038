//! Team, membership and role database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_json, parse_ts, to_json};
use crate::models::{default_team_roles, RoleKind, Team, TeamMember, TeamRole};
use super::super::Database;

impl Database {
    pub fn create_team(&self, name: &str, description: Option<&str>, owner_id: &str) -> SqliteResult<Team> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO teams (id, name, description, owner_id, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![&id, name, description, owner_id, now.to_rfc3339()],
        )?;
        Ok(Team {
            id,
            name: name.to_string(),
            description: description.map(String::from),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_team(&self, id: &str) -> SqliteResult<Option<Team>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, name, description, owner_id, created_at, updated_at FROM teams WHERE id = ?1",
            [id],
            |row| Self::row_to_team(row),
        )
        .optional()
    }

    /// Teams the user owns or belongs to
    pub fn list_teams_for_user(&self, user_id: &str) -> SqliteResult<Vec<Team>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, owner_id, created_at, updated_at FROM teams
             WHERE owner_id = ?1 OR id IN (SELECT team_id FROM team_members WHERE user_id = ?1)
             ORDER BY name",
        )?;
        let teams = stmt
            .query_map([user_id], |row| Self::row_to_team(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(teams)
    }

    fn row_to_team(row: &rusqlite::Row) -> rusqlite::Result<Team> {
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;
        Ok(Team {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            owner_id: row.get(3)?,
            created_at: parse_ts(4, &created_at)?,
            updated_at: parse_ts(5, &updated_at)?,
        })
    }

    // -- members --

    pub fn add_team_member(&self, team_id: &str, user_id: &str, role_id: Option<&str>) -> SqliteResult<TeamMember> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO team_members (id, team_id, user_id, role_id, status, joined_at) VALUES (?1, ?2, ?3, ?4, 'active', ?5)",
            rusqlite::params![&id, team_id, user_id, role_id, now.to_rfc3339()],
        )?;
        Ok(TeamMember {
            id,
            team_id: team_id.to_string(),
            user_id: user_id.to_string(),
            role_id: role_id.map(String::from),
            status: "active".to_string(),
            joined_at: now,
        })
    }

    pub fn get_team_member(&self, team_id: &str, user_id: &str) -> SqliteResult<Option<TeamMember>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, team_id, user_id, role_id, status, joined_at FROM team_members WHERE team_id = ?1 AND user_id = ?2",
            [team_id, user_id],
            |row| Self::row_to_member(row),
        )
        .optional()
    }

    pub fn list_team_members(&self, team_id: &str) -> SqliteResult<Vec<TeamMember>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, team_id, user_id, role_id, status, joined_at FROM team_members WHERE team_id = ?1 ORDER BY joined_at",
        )?;
        let members = stmt
            .query_map([team_id], |row| Self::row_to_member(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(members)
    }

    pub fn is_team_member(&self, team_id: &str, user_id: &str) -> SqliteResult<bool> {
        Ok(self.get_team_member(team_id, user_id)?.is_some())
    }

    fn row_to_member(row: &rusqlite::Row) -> rusqlite::Result<TeamMember> {
        let joined_at: String = row.get(5)?;
        Ok(TeamMember {
            id: row.get(0)?,
            team_id: row.get(1)?,
            user_id: row.get(2)?,
            role_id: row.get(3)?,
            status: row.get(4)?,
            joined_at: parse_ts(5, &joined_at)?,
        })
    }

    // -- roles --

    /// Install the default roles unless the team already has them
    pub fn ensure_default_roles(&self, team_id: &str) -> SqliteResult<Vec<TeamRole>> {
        let existing: Vec<TeamRole> = self
            .list_team_roles(team_id)?
            .into_iter()
            .filter(|r| r.kind == RoleKind::Default)
            .collect();
        let templates = default_team_roles();
        if existing.len() >= templates.len() {
            return Ok(existing);
        }

        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();
            for template in templates {
                if existing.iter().any(|r| r.name == template.name) {
                    continue;
                }
                tx.execute(
                    "INSERT INTO team_roles (id, team_id, name, description, kind, permissions, created_at)
                     VALUES (?1, ?2, ?3, ?4, 'default', ?5, ?6)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        team_id,
                        template.name,
                        template.description,
                        to_json(&template.permissions)?,
                        &now,
                    ],
                )?;
            }
            tx.commit()?;
        }

        Ok(self
            .list_team_roles(team_id)?
            .into_iter()
            .filter(|r| r.kind == RoleKind::Default)
            .collect())
    }

    pub fn list_team_roles(&self, team_id: &str) -> SqliteResult<Vec<TeamRole>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, team_id, name, description, kind, permissions, created_at FROM team_roles
             WHERE team_id = ?1 ORDER BY rowid",
        )?;
        let roles = stmt
            .query_map([team_id], |row| Self::row_to_role(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(roles)
    }

    pub fn get_team_role(&self, role_id: &str) -> SqliteResult<Option<TeamRole>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, team_id, name, description, kind, permissions, created_at FROM team_roles WHERE id = ?1",
            [role_id],
            |row| Self::row_to_role(row),
        )
        .optional()
    }

    fn row_to_role(row: &rusqlite::Row) -> rusqlite::Result<TeamRole> {
        let kind: String = row.get(4)?;
        let created_at: String = row.get(6)?;
        Ok(TeamRole {
            id: row.get(0)?,
            team_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            kind: parse_enum(4, &kind)?,
            permissions: parse_json(5, row.get(5)?)?,
            created_at: parse_ts(6, &created_at)?,
        })
    }
}
