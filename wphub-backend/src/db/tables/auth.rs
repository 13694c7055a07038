//! Session token database operations

use chrono::{Duration, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::parse_ts;
use crate::models::Session;
use super::super::Database;

impl Database {
    /// Issue a new bearer token for `user_id`
    pub fn create_session(&self, user_id: &str, ttl_hours: i64) -> SqliteResult<Session> {
        let conn = self.conn.lock().unwrap();
        let token = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let expires_at = created_at + Duration::hours(ttl_hours);

        conn.execute(
            "INSERT INTO auth_sessions (token, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![&token, user_id, created_at.to_rfc3339(), expires_at.to_rfc3339()],
        )?;

        Ok(Session {
            id: conn.last_insert_rowid(),
            token,
            user_id: user_id.to_string(),
            created_at,
            expires_at,
        })
    }

    /// Look up a live session. Expired rows are removed and reported as absent.
    pub fn validate_session(&self, token: &str) -> SqliteResult<Option<Session>> {
        let conn = self.conn.lock().unwrap();

        let session = conn
            .query_row(
                "SELECT id, token, user_id, created_at, expires_at FROM auth_sessions WHERE token = ?1",
                [token],
                |row| {
                    let created_at: String = row.get(3)?;
                    let expires_at: String = row.get(4)?;
                    Ok(Session {
                        id: row.get(0)?,
                        token: row.get(1)?,
                        user_id: row.get(2)?,
                        created_at: parse_ts(3, &created_at)?,
                        expires_at: parse_ts(4, &expires_at)?,
                    })
                },
            )
            .optional()?;

        match session {
            Some(s) if s.is_expired() => {
                conn.execute("DELETE FROM auth_sessions WHERE id = ?1", [s.id])?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    pub fn delete_session(&self, token: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows_affected = conn.execute("DELETE FROM auth_sessions WHERE token = ?1", [token])?;
        Ok(rows_affected > 0)
    }

    /// Revoke every session of a user (used when an account is deactivated)
    pub fn delete_sessions_for_user(&self, user_id: &str) -> SqliteResult<usize> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM auth_sessions WHERE user_id = ?1", [user_id])
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::UserRole;

    #[test]
    fn test_session_lifecycle() {
        let db = Database::in_memory();
        let user = db.create_user("a@example.com", "hash", None, UserRole::User).unwrap();

        let session = db.create_session(&user.id, 1).unwrap();
        let found = db.validate_session(&session.token).unwrap().unwrap();
        assert_eq!(found.user_id, user.id);

        assert!(db.delete_session(&session.token).unwrap());
        assert!(db.validate_session(&session.token).unwrap().is_none());
    }

    #[test]
    fn test_expired_session_is_rejected() {
        let db = Database::in_memory();
        let user = db.create_user("b@example.com", "hash", None, UserRole::User).unwrap();

        let session = db.create_session(&user.id, -1).unwrap();
        assert!(db.validate_session(&session.token).unwrap().is_none());
    }
}
