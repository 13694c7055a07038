//! User account database operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_opt_ts, parse_ts};
use crate::models::{UpdateUserRequest, User, UserRole};
use super::super::Database;

const USER_COLUMNS: &str = "id, email, password_hash, full_name, role, status, stripe_customer_id,
    subscription_updated_at, subscription_paused_at, pause_reason, two_fa_enabled, two_fa_code,
    two_fa_code_expires_at, two_fa_verified_session, created_at, updated_at";

impl Database {
    /// Insert a new account. Emails are stored lowercased.
    pub fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        full_name: Option<&str>,
        role: UserRole,
    ) -> SqliteResult<User> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (id, email, password_hash, full_name, role, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6, ?6)",
                rusqlite::params![&id, email.trim().to_lowercase(), password_hash, full_name, role.as_ref(), &now],
            )?;
        }
        self.get_user(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_user(&self, id: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_user(row)).optional()
    }

    pub fn get_user_by_email(&self, email: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS);
        conn.query_row(&sql, [email.trim().to_lowercase()], |row| Self::row_to_user(row))
            .optional()
    }

    pub fn list_users(&self) -> SqliteResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM users ORDER BY created_at DESC", USER_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let users = stmt
            .query_map([], |row| Self::row_to_user(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(users)
    }

    pub fn has_admin(&self) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users WHERE role = 'admin'", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// Apply an admin edit; absent fields keep their value
    pub fn update_user_admin(&self, req: &UpdateUserRequest) -> SqliteResult<Option<User>> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            let rows = conn.execute(
                "UPDATE users SET
                    role = COALESCE(?1, role),
                    status = COALESCE(?2, status),
                    full_name = COALESCE(?3, full_name),
                    updated_at = ?4
                 WHERE id = ?5",
                rusqlite::params![
                    req.role.map(|r| r.to_string()),
                    req.status.map(|s| s.to_string()),
                    req.full_name.as_deref(),
                    &now,
                    &req.user_id,
                ],
            )?;
            if rows == 0 {
                return Ok(None);
            }
        }
        self.get_user(&req.user_id)
    }

    pub fn set_stripe_customer_id(&self, user_id: &str, customer_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET stripe_customer_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![customer_id, &now, user_id],
        )?;
        Ok(())
    }

    pub fn get_user_by_stripe_customer(&self, customer_id: &str) -> SqliteResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM users WHERE stripe_customer_id = ?1", USER_COLUMNS);
        conn.query_row(&sql, [customer_id], |row| Self::row_to_user(row)).optional()
    }

    pub fn touch_subscription_updated(&self, user_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET subscription_updated_at = ?1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![&now, user_id],
        )?;
        Ok(())
    }

    /// Set or clear the pause marker on the user row
    pub fn set_subscription_paused(
        &self,
        user_id: &str,
        paused_at: Option<DateTime<Utc>>,
        reason: Option<&str>,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET subscription_paused_at = ?1, pause_reason = ?2, subscription_updated_at = ?3, updated_at = ?3
             WHERE id = ?4",
            rusqlite::params![paused_at.map(|t| t.to_rfc3339()), reason, &now, user_id],
        )?;
        Ok(())
    }

    pub fn set_two_fa_enabled(&self, user_id: &str, enabled: bool) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        // disabling also drops any pending code and verified session
        conn.execute(
            "UPDATE users SET two_fa_enabled = ?1,
                two_fa_code = CASE WHEN ?1 THEN two_fa_code ELSE NULL END,
                two_fa_code_expires_at = CASE WHEN ?1 THEN two_fa_code_expires_at ELSE NULL END,
                two_fa_verified_session = CASE WHEN ?1 THEN two_fa_verified_session ELSE NULL END,
                updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![enabled, &now, user_id],
        )?;
        Ok(())
    }

    pub fn set_two_fa_code(&self, user_id: &str, code: &str, expires_at: DateTime<Utc>) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET two_fa_code = ?1, two_fa_code_expires_at = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![code, expires_at.to_rfc3339(), &now, user_id],
        )?;
        Ok(())
    }

    /// Consume the pending code and record the verified session id
    pub fn complete_two_fa(&self, user_id: &str, verified_session: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET two_fa_code = NULL, two_fa_code_expires_at = NULL,
                two_fa_verified_session = ?1, updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![verified_session, &now, user_id],
        )?;
        Ok(())
    }

    pub fn clear_two_fa_session(&self, user_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE users SET two_fa_verified_session = NULL, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![&now, user_id],
        )?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let role: String = row.get(4)?;
        let status: String = row.get(5)?;
        let created_at: String = row.get(14)?;
        let updated_at: String = row.get(15)?;

        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            full_name: row.get(3)?,
            role: parse_enum(4, &role)?,
            status: parse_enum(5, &status)?,
            stripe_customer_id: row.get(6)?,
            subscription_updated_at: parse_opt_ts(7, row.get(7)?)?,
            subscription_paused_at: parse_opt_ts(8, row.get(8)?)?,
            pause_reason: row.get(9)?,
            two_fa_enabled: row.get(10)?,
            two_fa_code: row.get(11)?,
            two_fa_code_expires_at: parse_opt_ts(12, row.get(12)?)?,
            two_fa_verified_session: row.get(13)?,
            created_at: parse_ts(14, &created_at)?,
            updated_at: parse_ts(15, &updated_at)?,
        })
    }
}
