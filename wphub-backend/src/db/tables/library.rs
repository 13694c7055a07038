//! Plugin and theme library database operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_json, parse_ts, to_json};
use crate::models::{CreatePluginRequest, CreateThemeRequest, InstallationRef, OwnerType, Plugin, Theme};
use super::super::Database;

const LIBRARY_COLUMNS: &str = "id, name, slug, description, owner_type, owner_id, is_public,
    latest_version, download_url, installed_on, created_at, updated_at";

/// Columns shared by `plugins` and `themes`
struct LibraryRow {
    id: String,
    name: String,
    slug: String,
    description: Option<String>,
    owner_type: OwnerType,
    owner_id: String,
    is_public: bool,
    latest_version: Option<String>,
    download_url: Option<String>,
    installed_on: Vec<InstallationRef>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

impl LibraryRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let owner_type: String = row.get(4)?;
        let created_at: String = row.get(10)?;
        let updated_at: String = row.get(11)?;
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            slug: row.get(2)?,
            description: row.get(3)?,
            owner_type: parse_enum(4, &owner_type)?,
            owner_id: row.get(5)?,
            is_public: row.get(6)?,
            latest_version: row.get(7)?,
            download_url: row.get(8)?,
            installed_on: parse_json(9, row.get(9)?)?,
            created_at: parse_ts(10, &created_at)?,
            updated_at: parse_ts(11, &updated_at)?,
        })
    }
}

impl From<LibraryRow> for Plugin {
    fn from(r: LibraryRow) -> Self {
        Plugin {
            id: r.id,
            name: r.name,
            slug: r.slug,
            description: r.description,
            owner_type: r.owner_type,
            owner_id: r.owner_id,
            is_public: r.is_public,
            latest_version: r.latest_version,
            download_url: r.download_url,
            installed_on: r.installed_on,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl From<LibraryRow> for Theme {
    fn from(r: LibraryRow) -> Self {
        Theme {
            id: r.id,
            name: r.name,
            slug: r.slug,
            description: r.description,
            owner_type: r.owner_type,
            owner_id: r.owner_id,
            is_public: r.is_public,
            latest_version: r.latest_version,
            download_url: r.download_url,
            installed_on: r.installed_on,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

impl Database {
    fn insert_library_row(
        &self,
        table: &str,
        name: &str,
        slug: &str,
        description: Option<&str>,
        owner_id: &str,
        is_public: bool,
        latest_version: Option<&str>,
        download_url: Option<&str>,
    ) -> SqliteResult<String> {
        let conn = self.conn.lock().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (id, name, slug, description, owner_type, owner_id, is_public, latest_version, download_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'user', ?5, ?6, ?7, ?8, ?9, ?9)",
            table
        );
        conn.execute(
            &sql,
            rusqlite::params![&id, name, slug, description, owner_id, is_public, latest_version, download_url, &now],
        )?;
        Ok(id)
    }

    fn get_library_row(&self, table: &str, id: &str) -> SqliteResult<Option<LibraryRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM {} WHERE id = ?1", LIBRARY_COLUMNS, table);
        conn.query_row(&sql, [id], |row| LibraryRow::from_row(row)).optional()
    }

    /// Own rows first, then public ones from other owners
    fn find_library_row_by_slug(&self, table: &str, slug: &str, user_id: &str) -> SqliteResult<Option<LibraryRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM {} WHERE slug = ?1 AND ((owner_type = 'user' AND owner_id = ?2) OR is_public = 1)
             ORDER BY (owner_id = ?2) DESC, created_at LIMIT 1",
            LIBRARY_COLUMNS, table
        );
        conn.query_row(&sql, [slug, user_id], |row| LibraryRow::from_row(row)).optional()
    }

    fn list_library_rows_for_user(&self, table: &str, user_id: &str) -> SqliteResult<Vec<LibraryRow>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM {}
             WHERE (owner_type = 'user' AND owner_id = ?1)
                OR (owner_type = 'team' AND owner_id IN (SELECT team_id FROM team_members WHERE user_id = ?1))
                OR is_public = 1
             ORDER BY name",
            LIBRARY_COLUMNS, table
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([user_id], |row| LibraryRow::from_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }

    fn save_installations(&self, table: &str, id: &str, installed_on: &[InstallationRef]) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let sql = format!("UPDATE {} SET installed_on = ?1, updated_at = ?2 WHERE id = ?3", table);
        conn.execute(&sql, rusqlite::params![to_json(&installed_on)?, &now, id])?;
        Ok(())
    }

    // -- plugins --

    pub fn create_plugin(&self, req: &CreatePluginRequest, owner_id: &str) -> SqliteResult<Plugin> {
        let id = self.insert_library_row(
            "plugins",
            &req.name,
            &req.slug,
            req.description.as_deref(),
            owner_id,
            req.is_public,
            req.latest_version.as_deref(),
            req.download_url.as_deref(),
        )?;
        self.get_plugin(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_plugin(&self, id: &str) -> SqliteResult<Option<Plugin>> {
        Ok(self.get_library_row("plugins", id)?.map(Plugin::from))
    }

    pub fn find_plugin_by_slug(&self, slug: &str, user_id: &str) -> SqliteResult<Option<Plugin>> {
        Ok(self.find_library_row_by_slug("plugins", slug, user_id)?.map(Plugin::from))
    }

    /// Plugin with the slug held by exactly this owner
    pub fn find_owned_plugin_by_slug(
        &self,
        slug: &str,
        owner_type: OwnerType,
        owner_id: &str,
    ) -> SqliteResult<Option<Plugin>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM plugins WHERE slug = ?1 AND owner_type = ?2 AND owner_id = ?3 ORDER BY created_at LIMIT 1",
            LIBRARY_COLUMNS
        );
        conn.query_row(&sql, [slug, owner_type.as_ref(), owner_id], |row| {
            LibraryRow::from_row(row).map(Plugin::from)
        })
        .optional()
    }

    pub fn list_plugins_for_user(&self, user_id: &str) -> SqliteResult<Vec<Plugin>> {
        Ok(self
            .list_library_rows_for_user("plugins", user_id)?
            .into_iter()
            .map(Plugin::from)
            .collect())
    }

    /// Library plugins whose `installed_on` lists the site
    pub fn list_plugins_installed_on(&self, site_id: &str) -> SqliteResult<Vec<Plugin>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM plugins
             WHERE EXISTS (SELECT 1 FROM json_each(plugins.installed_on) WHERE json_extract(value, '$.site_id') = ?1)",
            LIBRARY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let plugins = stmt
            .query_map([site_id], |row| LibraryRow::from_row(row).map(Plugin::from))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(plugins)
    }

    pub fn save_plugin_installations(&self, id: &str, installed_on: &[InstallationRef]) -> SqliteResult<()> {
        self.save_installations("plugins", id, installed_on)
    }

    pub fn set_plugin_owner(&self, id: &str, owner_type: OwnerType, owner_id: &str) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE plugins SET owner_type = ?1, owner_id = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![owner_type.as_ref(), owner_id, &now, id],
        )?;
        Ok(())
    }

    // -- themes --

    pub fn create_theme(&self, req: &CreateThemeRequest, owner_id: &str) -> SqliteResult<Theme> {
        let id = self.insert_library_row(
            "themes",
            &req.name,
            &req.slug,
            req.description.as_deref(),
            owner_id,
            req.is_public,
            req.latest_version.as_deref(),
            req.download_url.as_deref(),
        )?;
        self.get_theme(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_theme(&self, id: &str) -> SqliteResult<Option<Theme>> {
        Ok(self.get_library_row("themes", id)?.map(Theme::from))
    }

    pub fn find_theme_by_slug(&self, slug: &str, user_id: &str) -> SqliteResult<Option<Theme>> {
        Ok(self.find_library_row_by_slug("themes", slug, user_id)?.map(Theme::from))
    }

    pub fn list_themes_for_user(&self, user_id: &str) -> SqliteResult<Vec<Theme>> {
        Ok(self
            .list_library_rows_for_user("themes", user_id)?
            .into_iter()
            .map(Theme::from)
            .collect())
    }

    pub fn save_theme_installations(&self, id: &str, installed_on: &[InstallationRef]) -> SqliteResult<()> {
        self.save_installations("themes", id, installed_on)
    }
}
