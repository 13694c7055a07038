//! Activity log database operations

use rusqlite::Result as SqliteResult;

use crate::db::parse_ts;
use crate::models::ActivityLog;
use super::super::Database;

impl Database {
    /// Append one audit entry
    pub fn log_activity(
        &self,
        user_email: &str,
        action: &str,
        entity_type: Option<&str>,
        entity_id: Option<&str>,
        details: Option<&str>,
    ) -> SqliteResult<i64> {
        let conn = self.conn.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO activity_logs (user_email, action, entity_type, entity_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![user_email, action, entity_type, entity_id, details, &now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Entries for one user, or everyone's when `user_email` is None
    pub fn list_activity(&self, user_email: Option<&str>, limit: i64) -> SqliteResult<Vec<ActivityLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, user_email, action, entity_type, entity_id, details, created_at FROM activity_logs
             WHERE ?1 IS NULL OR user_email = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let logs = stmt
            .query_map(rusqlite::params![user_email, limit], |row| {
                let created_at: String = row.get(6)?;
                Ok(ActivityLog {
                    id: row.get(0)?,
                    user_email: row.get(1)?,
                    action: row.get(2)?,
                    entity_type: row.get(3)?,
                    entity_id: row.get(4)?,
                    details: row.get(5)?,
                    created_at: parse_ts(6, &created_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    #[test]
    fn test_activity_scoping() {
        let db = Database::in_memory();
        db.log_activity("a@example.com", "Site added", Some("site"), Some("s1"), None).unwrap();
        db.log_activity("b@example.com", "Plugin installed", Some("plugin"), Some("p1"), Some("on s1")).unwrap();
        db.log_activity("a@example.com", "Site removed", Some("site"), Some("s1"), None).unwrap();

        let mine = db.list_activity(Some("a@example.com"), 50).unwrap();
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].action, "Site removed");

        assert_eq!(db.list_activity(None, 50).unwrap().len(), 3);
        assert_eq!(db.list_activity(None, 1).unwrap().len(), 1);
    }
}
