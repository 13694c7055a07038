//! Site database operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_json, parse_opt_ts, parse_ts, to_json};
use crate::models::{OwnerType, Site, SitePluginEntry, SiteStatus};
use super::super::Database;

const SITE_COLUMNS: &str = "id, name, url, api_key, owner_type, owner_id, status, wp_version,
    last_connection, plugins, health_check, created_at, updated_at";

impl Database {
    pub fn create_site(
        &self,
        name: &str,
        url: &str,
        api_key: &str,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> SqliteResult<Site> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sites (id, name, url, api_key, owner_type, owner_id, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'inactive', ?7, ?7)",
                rusqlite::params![&id, name, url, api_key, owner_type.as_ref(), owner_id, &now],
            )?;
        }
        self.get_site(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_site(&self, id: &str) -> SqliteResult<Option<Site>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_site(row)).optional()
    }

    /// First site registered under `url`, ignoring a trailing slash
    pub fn get_site_by_url(&self, url: &str) -> SqliteResult<Option<Site>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM sites WHERE rtrim(url, '/') = rtrim(?1, '/') ORDER BY created_at LIMIT 1",
            SITE_COLUMNS
        );
        conn.query_row(&sql, [url], |row| Self::row_to_site(row)).optional()
    }

    /// Sites owned by the user directly or by a team they belong to
    pub fn list_sites_for_user(&self, user_id: &str) -> SqliteResult<Vec<Site>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM sites
             WHERE (owner_type = 'user' AND owner_id = ?1)
                OR (owner_type = 'team' AND owner_id IN (SELECT team_id FROM team_members WHERE user_id = ?1))
             ORDER BY created_at DESC",
            SITE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let sites = stmt
            .query_map([user_id], |row| Self::row_to_site(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(sites)
    }

    pub fn list_all_sites(&self) -> SqliteResult<Vec<Site>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM sites ORDER BY created_at", SITE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let sites = stmt
            .query_map([], |row| Self::row_to_site(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(sites)
    }

    pub fn delete_site(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows_affected = conn.execute("DELETE FROM sites WHERE id = ?1", [id])?;
        Ok(rows_affected > 0)
    }

    /// Record the outcome of a connector round-trip
    pub fn update_site_connection(
        &self,
        id: &str,
        status: SiteStatus,
        wp_version: Option<&str>,
        last_connection: Option<DateTime<Utc>>,
    ) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE sites SET status = ?1,
                wp_version = COALESCE(?2, wp_version),
                last_connection = COALESCE(?3, last_connection),
                updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![status.as_ref(), wp_version, last_connection.map(|t| t.to_rfc3339()), &now, id],
        )?;
        Ok(())
    }

    pub fn save_site_plugins(&self, id: &str, plugins: &[SitePluginEntry]) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE sites SET plugins = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![to_json(&plugins)?, &now, id],
        )?;
        Ok(())
    }

    pub fn save_site_health_check(&self, id: &str, health_check: &serde_json::Value) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE sites SET health_check = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![health_check.to_string(), &now, id],
        )?;
        Ok(())
    }

    /// Move a site into a user's personal ownership
    pub fn transfer_site(&self, id: &str, new_owner_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE sites SET owner_type = 'user', owner_id = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_owner_id, &now, id],
        )?;
        Ok(())
    }

    fn row_to_site(row: &rusqlite::Row) -> rusqlite::Result<Site> {
        let owner_type: String = row.get(4)?;
        let status: String = row.get(6)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;
        let health_check: Option<String> = row.get(10)?;

        Ok(Site {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            api_key: row.get(3)?,
            owner_type: parse_enum(4, &owner_type)?,
            owner_id: row.get(5)?,
            status: parse_enum(6, &status)?,
            wp_version: row.get(7)?,
            last_connection: parse_opt_ts(8, row.get(8)?)?,
            plugins: parse_json(9, row.get(9)?)?,
            health_check: parse_json::<Option<serde_json::Value>>(10, health_check)?
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: parse_ts(11, &created_at)?,
            updated_at: parse_ts(12, &updated_at)?,
        })
    }
}
