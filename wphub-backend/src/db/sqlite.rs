//! SQLite database - schema definitions and connection management
//!
//! This file contains:
//! - Database struct definition
//! - Connection management (new, init)
//! - Schema creation
//!
//! All table operations are in the tables/ subdirectory.

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// Main database wrapper; the Mutex serializes statements
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection and initialize schema
    pub fn new(database_url: &str) -> SqliteResult<Self> {
        // Create parent directory if it doesn't exist
        if database_url != ":memory:" {
            if let Some(parent) = Path::new(database_url).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).ok();
                }
            }
        }

        let conn = Connection::open(database_url)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// In-memory store for tests
    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(":memory:").expect("in-memory database")
    }

    /// Cheap liveness check for the health endpoint
    pub fn ping(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    /// Initialize all database tables
    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        // Accounts
        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                full_name TEXT,
                role TEXT NOT NULL DEFAULT 'user',
                status TEXT NOT NULL DEFAULT 'active',
                stripe_customer_id TEXT,
                subscription_updated_at TEXT,
                subscription_paused_at TEXT,
                pause_reason TEXT,
                two_fa_enabled INTEGER NOT NULL DEFAULT 0,
                two_fa_code TEXT,
                two_fa_code_expires_at TEXT,
                two_fa_verified_session TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token TEXT UNIQUE NOT NULL,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            )",
            [],
        )?;

        // Sites and the plugin/theme library
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sites (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                api_key TEXT NOT NULL,
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'inactive',
                wp_version TEXT,
                last_connection TEXT,
                plugins TEXT NOT NULL DEFAULT '[]',
                health_check TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sites_owner ON sites(owner_type, owner_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugins (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                latest_version TEXT,
                download_url TEXT,
                installed_on TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS themes (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                slug TEXT NOT NULL,
                description TEXT,
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                latest_version TEXT,
                download_url TEXT,
                installed_on TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Teams
        conn.execute(
            "CREATE TABLE IF NOT EXISTS teams (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                owner_id TEXT NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS team_roles (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                kind TEXT NOT NULL DEFAULT 'custom',
                permissions TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS team_members (
                id TEXT PRIMARY KEY,
                team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role_id TEXT REFERENCES team_roles(id) ON DELETE SET NULL,
                status TEXT NOT NULL DEFAULT 'active',
                joined_at TEXT NOT NULL,
                UNIQUE(team_id, user_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                owner_type TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                site_id TEXT REFERENCES sites(id) ON DELETE SET NULL,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        // Billing
        conn.execute(
            "CREATE TABLE IF NOT EXISTS subscription_plans (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                price_amount INTEGER NOT NULL,
                currency TEXT NOT NULL DEFAULT 'eur',
                interval TEXT NOT NULL DEFAULT 'month',
                trial_days INTEGER NOT NULL DEFAULT 0,
                features TEXT NOT NULL DEFAULT '[]',
                stripe_product_id TEXT,
                stripe_price_id TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_subscriptions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                plan_id TEXT,
                stripe_subscription_id TEXT UNIQUE,
                status TEXT NOT NULL,
                is_manual INTEGER NOT NULL DEFAULT 0,
                interval TEXT,
                amount INTEGER,
                currency TEXT,
                cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
                canceled_at TEXT,
                paused_at TEXT,
                current_period_start TEXT,
                current_period_end TEXT,
                assigned_by TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_user_subscriptions_user ON user_subscriptions(user_id, status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                stripe_invoice_id TEXT UNIQUE NOT NULL,
                stripe_subscription_id TEXT,
                status TEXT NOT NULL,
                total INTEGER NOT NULL DEFAULT 0,
                currency TEXT,
                period_start TEXT,
                period_end TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS coupons (
                id TEXT PRIMARY KEY,
                code TEXT UNIQUE NOT NULL,
                stripe_coupon_id TEXT,
                type TEXT NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                valid_from TEXT,
                valid_until TEXT,
                max_redemptions INTEGER,
                redemptions_used INTEGER NOT NULL DEFAULT 0,
                applies_to_plans TEXT NOT NULL DEFAULT '[]',
                minimum_amount INTEGER,
                applies_once INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                created_by TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS coupon_usage (
                id TEXT PRIMARY KEY,
                coupon_id TEXT NOT NULL REFERENCES coupons(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                used_at TEXT NOT NULL
            )",
            [],
        )?;

        // Connector releases
        conn.execute(
            "CREATE TABLE IF NOT EXISTS connectors (
                id TEXT PRIMARY KEY,
                version TEXT UNIQUE NOT NULL,
                file_url TEXT NOT NULL,
                description TEXT,
                changelog TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        // Messaging and audit
        conn.execute(
            "CREATE TABLE IF NOT EXISTS activity_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_email TEXT NOT NULL,
                action TEXT NOT NULL,
                entity_type TEXT,
                entity_id TEXT,
                details TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_activity_logs_email ON activity_logs(user_email)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                subject TEXT NOT NULL,
                message TEXT NOT NULL,
                sender_id TEXT,
                sender_email TEXT,
                sender_name TEXT,
                recipient_id TEXT NOT NULL,
                recipient_email TEXT NOT NULL,
                is_read INTEGER NOT NULL DEFAULT 0,
                priority TEXT NOT NULL DEFAULT 'normal',
                status TEXT NOT NULL DEFAULT 'open',
                category TEXT NOT NULL DEFAULT 'general',
                context TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient_id)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                recipient_id TEXT NOT NULL,
                recipient_email TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                type TEXT NOT NULL DEFAULT 'info',
                is_read INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS support_tickets (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                subject TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                priority TEXT NOT NULL DEFAULT 'normal',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wphub.db");
        let path = path.to_str().unwrap();

        let db = Database::new(path).unwrap();
        drop(db);
        // second open must not fail on existing tables
        let db = Database::new(path).unwrap();

        let conn = db.conn.lock().unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('users', 'sites', 'messages', 'user_subscriptions')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
