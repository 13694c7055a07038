//! Connector release database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::parse_ts;
use crate::models::{Connector, RegisterConnectorRequest};
use super::super::Database;

impl Database {
    pub fn create_connector(&self, req: &RegisterConnectorRequest) -> SqliteResult<Connector> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO connectors (id, version, file_url, description, changelog, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![&id, &req.version, &req.file_url, req.description.as_deref(), req.changelog.as_deref(), now.to_rfc3339()],
        )?;
        Ok(Connector {
            id,
            version: req.version.clone(),
            file_url: req.file_url.clone(),
            description: req.description.clone(),
            changelog: req.changelog.clone(),
            created_at: now,
        })
    }

    pub fn get_connector_by_version(&self, version: &str) -> SqliteResult<Option<Connector>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, version, file_url, description, changelog, created_at FROM connectors WHERE version = ?1",
            [version],
            |row| Self::row_to_connector(row),
        )
        .optional()
    }

    /// All releases, newest version first
    pub fn list_connectors(&self) -> SqliteResult<Vec<Connector>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id, version, file_url, description, changelog, created_at FROM connectors")?;
        let mut connectors = stmt
            .query_map([], |row| Self::row_to_connector(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        connectors.sort_by_key(|c| std::cmp::Reverse(c.version_key()));
        Ok(connectors)
    }

    fn row_to_connector(row: &rusqlite::Row) -> rusqlite::Result<Connector> {
        let created_at: String = row.get(5)?;
        Ok(Connector {
            id: row.get(0)?,
            version: row.get(1)?,
            file_url: row.get(2)?,
            description: row.get(3)?,
            changelog: row.get(4)?,
            created_at: parse_ts(5, &created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::models::RegisterConnectorRequest;

    fn release(version: &str) -> RegisterConnectorRequest {
        RegisterConnectorRequest {
            version: version.to_string(),
            file_url: format!("https://files.example/wphub-connector-{}.zip", version),
            description: None,
            changelog: None,
        }
    }

    #[test]
    fn test_versions_sorted_semantically() {
        let db = Database::in_memory();
        for v in ["1.9.0", "1.10.0", "1.2.3"] {
            db.create_connector(&release(v)).unwrap();
        }
        let versions: Vec<_> = db.list_connectors().unwrap().into_iter().map(|c| c.version).collect();
        assert_eq!(versions, vec!["1.10.0", "1.9.0", "1.2.3"]);
        assert!(db.create_connector(&release("1.9.0")).is_err());
    }
}
