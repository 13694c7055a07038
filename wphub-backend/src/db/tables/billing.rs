//! Plans, mirrored subscriptions and invoices

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_json, parse_opt_ts, parse_ts, to_json};
use crate::models::{
    BillingInterval, Invoice, InvoiceSync, NewSubscription, SubscriptionPlan, SubscriptionStatus,
    SubscriptionSync, UpdatePlanRequest, UserSubscription,
};
use super::super::Database;

const PLAN_COLUMNS: &str = "id, name, description, price_amount, currency, interval, trial_days, features,
    stripe_product_id, stripe_price_id, is_active, created_at, updated_at";

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, stripe_subscription_id, status, is_manual, interval,
    amount, currency, cancel_at_period_end, canceled_at, paused_at, current_period_start, current_period_end,
    assigned_by, created_at, updated_at";

const INVOICE_COLUMNS: &str = "id, user_id, stripe_invoice_id, stripe_subscription_id, status, total, currency,
    period_start, period_end, created_at, updated_at";

impl Database {
    // -- plans --

    pub fn create_plan(
        &self,
        name: &str,
        description: Option<&str>,
        price_amount: i64,
        currency: &str,
        interval: BillingInterval,
        trial_days: i64,
        features: &[String],
        stripe_product_id: Option<&str>,
        stripe_price_id: Option<&str>,
    ) -> SqliteResult<SubscriptionPlan> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO subscription_plans (id, name, description, price_amount, currency, interval, trial_days,
                    features, stripe_product_id, stripe_price_id, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 1, ?11, ?11)",
                rusqlite::params![
                    &id,
                    name,
                    description,
                    price_amount,
                    currency,
                    interval.as_ref(),
                    trial_days,
                    to_json(&features)?,
                    stripe_product_id,
                    stripe_price_id,
                    &now,
                ],
            )?;
        }
        self.get_plan(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_plan(&self, id: &str) -> SqliteResult<Option<SubscriptionPlan>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM subscription_plans WHERE id = ?1", PLAN_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_plan(row)).optional()
    }

    pub fn list_plans(&self, active_only: bool) -> SqliteResult<Vec<SubscriptionPlan>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM subscription_plans WHERE (?1 = 0 OR is_active = 1) ORDER BY price_amount",
            PLAN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let plans = stmt
            .query_map([active_only], |row| Self::row_to_plan(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(plans)
    }

    pub fn update_plan(&self, req: &UpdatePlanRequest) -> SqliteResult<Option<SubscriptionPlan>> {
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            let features = req.features.as_ref().map(to_json).transpose()?;
            let rows = conn.execute(
                "UPDATE subscription_plans SET
                    name = COALESCE(?1, name),
                    description = COALESCE(?2, description),
                    trial_days = COALESCE(?3, trial_days),
                    features = COALESCE(?4, features),
                    is_active = COALESCE(?5, is_active),
                    updated_at = ?6
                 WHERE id = ?7",
                rusqlite::params![
                    req.name.as_deref(),
                    req.description.as_deref(),
                    req.trial_days,
                    features,
                    req.is_active,
                    &now,
                    &req.plan_id,
                ],
            )?;
            if rows == 0 {
                return Ok(None);
            }
        }
        self.get_plan(&req.plan_id)
    }

    pub fn delete_plan(&self, id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let rows_affected = conn.execute("DELETE FROM subscription_plans WHERE id = ?1", [id])?;
        Ok(rows_affected > 0)
    }

    fn row_to_plan(row: &rusqlite::Row) -> rusqlite::Result<SubscriptionPlan> {
        let interval: String = row.get(5)?;
        let created_at: String = row.get(11)?;
        let updated_at: String = row.get(12)?;
        Ok(SubscriptionPlan {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            price_amount: row.get(3)?,
            currency: row.get(4)?,
            interval: parse_enum(5, &interval)?,
            trial_days: row.get(6)?,
            features: parse_json(7, row.get(7)?)?,
            stripe_product_id: row.get(8)?,
            stripe_price_id: row.get(9)?,
            is_active: row.get(10)?,
            created_at: parse_ts(11, &created_at)?,
            updated_at: parse_ts(12, &updated_at)?,
        })
    }

    // -- subscriptions --

    pub fn create_subscription(&self, new: &NewSubscription) -> SqliteResult<UserSubscription> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO user_subscriptions (id, user_id, plan_id, stripe_subscription_id, status, is_manual,
                    interval, amount, currency, current_period_start, current_period_end, assigned_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                rusqlite::params![
                    &id,
                    &new.user_id,
                    new.plan_id.as_deref(),
                    new.stripe_subscription_id.as_deref(),
                    new.status.as_ref(),
                    new.is_manual,
                    new.interval.as_deref(),
                    new.amount,
                    new.currency.as_deref(),
                    new.current_period_start.map(|t| t.to_rfc3339()),
                    new.current_period_end.map(|t| t.to_rfc3339()),
                    new.assigned_by.as_deref(),
                    &now,
                ],
            )?;
        }
        self.get_subscription(&id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Insert a Stripe-backed subscription, or merge into the row a webhook already created
    pub fn upsert_stripe_subscription(&self, new: &NewSubscription) -> SqliteResult<UserSubscription> {
        let Some(stripe_id) = new.stripe_subscription_id.as_deref() else {
            return self.create_subscription(new);
        };
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO user_subscriptions (id, user_id, plan_id, stripe_subscription_id, status, is_manual,
                    interval, amount, currency, current_period_start, current_period_end, assigned_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)
                 ON CONFLICT(stripe_subscription_id) DO UPDATE SET
                    plan_id = COALESCE(excluded.plan_id, plan_id),
                    status = excluded.status,
                    interval = COALESCE(excluded.interval, interval),
                    amount = COALESCE(excluded.amount, amount),
                    currency = COALESCE(excluded.currency, currency),
                    current_period_start = COALESCE(excluded.current_period_start, current_period_start),
                    current_period_end = COALESCE(excluded.current_period_end, current_period_end),
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    Uuid::new_v4().to_string(),
                    &new.user_id,
                    new.plan_id.as_deref(),
                    stripe_id,
                    new.status.as_ref(),
                    new.is_manual,
                    new.interval.as_deref(),
                    new.amount,
                    new.currency.as_deref(),
                    new.current_period_start.map(|t| t.to_rfc3339()),
                    new.current_period_end.map(|t| t.to_rfc3339()),
                    new.assigned_by.as_deref(),
                    &now,
                ],
            )?;
        }
        self.get_subscription_by_stripe_id(stripe_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_subscription(&self, id: &str) -> SqliteResult<Option<UserSubscription>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM user_subscriptions WHERE id = ?1", SUBSCRIPTION_COLUMNS);
        conn.query_row(&sql, [id], |row| Self::row_to_subscription(row)).optional()
    }

    pub fn get_subscription_by_stripe_id(&self, stripe_id: &str) -> SqliteResult<Option<UserSubscription>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM user_subscriptions WHERE stripe_subscription_id = ?1",
            SUBSCRIPTION_COLUMNS
        );
        conn.query_row(&sql, [stripe_id], |row| Self::row_to_subscription(row)).optional()
    }

    pub fn list_subscriptions_for_user(&self, user_id: &str) -> SqliteResult<Vec<UserSubscription>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM user_subscriptions WHERE user_id = ?1 ORDER BY created_at DESC",
            SUBSCRIPTION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let subs = stmt
            .query_map([user_id], |row| Self::row_to_subscription(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(subs)
    }

    /// Active or trialing subscriptions, newest first
    pub fn list_live_subscriptions(&self, user_id: &str) -> SqliteResult<Vec<UserSubscription>> {
        Ok(self
            .list_subscriptions_for_user(user_id)?
            .into_iter()
            .filter(|s| s.status.is_live())
            .collect())
    }

    /// Apply the fields present in `sync`
    pub fn sync_subscription(&self, id: &str, sync: &SubscriptionSync) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let ts = |t: &Option<DateTime<Utc>>| t.map(|t| t.to_rfc3339());

        conn.execute(
            "UPDATE user_subscriptions SET
                status = COALESCE(?1, status),
                cancel_at_period_end = COALESCE(?2, cancel_at_period_end),
                canceled_at = CASE WHEN ?3 THEN ?4 ELSE canceled_at END,
                paused_at = CASE WHEN ?5 THEN ?6 ELSE paused_at END,
                current_period_start = COALESCE(?7, current_period_start),
                current_period_end = COALESCE(?8, current_period_end),
                plan_id = COALESCE(?9, plan_id),
                updated_at = ?10
             WHERE id = ?11",
            rusqlite::params![
                sync.status.map(|s| s.to_string()),
                sync.cancel_at_period_end,
                sync.canceled_at.is_some(),
                sync.canceled_at.as_ref().and_then(ts),
                sync.paused_at.is_some(),
                sync.paused_at.as_ref().and_then(ts),
                sync.current_period_start.map(|t| t.to_rfc3339()),
                sync.current_period_end.map(|t| t.to_rfc3339()),
                sync.plan_id.as_deref(),
                &now,
                id,
            ],
        )?;
        Ok(())
    }

    fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<UserSubscription> {
        let status: String = row.get(4)?;
        let created_at: String = row.get(15)?;
        let updated_at: String = row.get(16)?;
        Ok(UserSubscription {
            id: row.get(0)?,
            user_id: row.get(1)?,
            plan_id: row.get(2)?,
            stripe_subscription_id: row.get(3)?,
            status: SubscriptionStatus::from_stripe(&status),
            is_manual: row.get(5)?,
            interval: row.get(6)?,
            amount: row.get(7)?,
            currency: row.get(8)?,
            cancel_at_period_end: row.get(9)?,
            canceled_at: parse_opt_ts(10, row.get(10)?)?,
            paused_at: parse_opt_ts(11, row.get(11)?)?,
            current_period_start: parse_opt_ts(12, row.get(12)?)?,
            current_period_end: parse_opt_ts(13, row.get(13)?)?,
            assigned_by: row.get(14)?,
            created_at: parse_ts(15, &created_at)?,
            updated_at: parse_ts(16, &updated_at)?,
        })
    }

    // -- invoices --

    /// Insert or refresh an invoice keyed by its Stripe id
    pub fn upsert_invoice(&self, inv: &InvoiceSync) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO invoices (id, user_id, stripe_invoice_id, stripe_subscription_id, status, total, currency,
                period_start, period_end, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(stripe_invoice_id) DO UPDATE SET
                user_id = COALESCE(excluded.user_id, invoices.user_id),
                stripe_subscription_id = COALESCE(excluded.stripe_subscription_id, invoices.stripe_subscription_id),
                status = excluded.status,
                total = excluded.total,
                currency = COALESCE(excluded.currency, invoices.currency),
                period_start = COALESCE(excluded.period_start, invoices.period_start),
                period_end = COALESCE(excluded.period_end, invoices.period_end),
                updated_at = excluded.updated_at",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                inv.user_id.as_deref(),
                &inv.stripe_invoice_id,
                inv.stripe_subscription_id.as_deref(),
                &inv.status,
                inv.total,
                inv.currency.as_deref(),
                inv.period_start.map(|t| t.to_rfc3339()),
                inv.period_end.map(|t| t.to_rfc3339()),
                &now,
            ],
        )?;
        Ok(())
    }

    pub fn list_invoices_for_user(&self, user_id: &str) -> SqliteResult<Vec<Invoice>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {} FROM invoices WHERE user_id = ?1 ORDER BY created_at DESC",
            INVOICE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let invoices = stmt
            .query_map([user_id], |row| {
                let created_at: String = row.get(9)?;
                let updated_at: String = row.get(10)?;
                Ok(Invoice {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    stripe_invoice_id: row.get(2)?,
                    stripe_subscription_id: row.get(3)?,
                    status: row.get(4)?,
                    total: row.get(5)?,
                    currency: row.get(6)?,
                    period_start: parse_opt_ts(7, row.get(7)?)?,
                    period_end: parse_opt_ts(8, row.get(8)?)?,
                    created_at: parse_ts(9, &created_at)?,
                    updated_at: parse_ts(10, &updated_at)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(invoices)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::Database;
    use crate::models::{
        BillingInterval, InvoiceSync, NewSubscription, SubscriptionStatus, SubscriptionSync, UpdatePlanRequest,
        UserRole,
    };

    fn new_sub(user_id: &str, stripe_id: Option<&str>, status: SubscriptionStatus) -> NewSubscription {
        NewSubscription {
            user_id: user_id.to_string(),
            plan_id: Some("plan".to_string()),
            stripe_subscription_id: stripe_id.map(String::from),
            status,
            is_manual: stripe_id.is_none(),
            interval: Some("month".to_string()),
            amount: Some(1900),
            currency: Some("eur".to_string()),
            current_period_start: Some(Utc::now()),
            current_period_end: None,
            assigned_by: None,
        }
    }

    #[test]
    fn test_upsert_merges_into_webhook_row() {
        let db = Database::in_memory();
        let user = db.create_user("u@example.com", "h", None, UserRole::User).unwrap();

        // the webhook row knows the plan but not the price details
        let early = db
            .upsert_stripe_subscription(&NewSubscription {
                interval: None,
                amount: None,
                currency: None,
                ..new_sub(&user.id, Some("sub_1"), SubscriptionStatus::Incomplete)
            })
            .unwrap();
        let merged = db
            .upsert_stripe_subscription(&new_sub(&user.id, Some("sub_1"), SubscriptionStatus::Active))
            .unwrap();

        assert_eq!(merged.id, early.id);
        assert_eq!(merged.status, SubscriptionStatus::Active);
        assert_eq!(merged.amount, Some(1900));
        assert_eq!(db.list_subscriptions_for_user(&user.id).unwrap().len(), 1);
    }

    #[test]
    fn test_plan_crud() {
        let db = Database::in_memory();
        let features = vec!["10 sites".to_string()];
        let plan = db
            .create_plan("Pro", None, 1900, "eur", BillingInterval::Month, 14, &features, Some("prod_1"), Some("price_1"))
            .unwrap();
        assert_eq!(plan.features, features);
        assert!(plan.is_active);

        let updated = db
            .update_plan(&UpdatePlanRequest {
                plan_id: plan.id.clone(),
                name: None,
                description: Some("For agencies".to_string()),
                trial_days: None,
                features: None,
                is_active: Some(false),
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Pro");
        assert_eq!(updated.trial_days, 14);
        assert!(!updated.is_active);
        assert!(db.list_plans(true).unwrap().is_empty());
        assert_eq!(db.list_plans(false).unwrap().len(), 1);

        assert!(db.delete_plan(&plan.id).unwrap());
        assert!(db.get_plan(&plan.id).unwrap().is_none());
    }

    #[test]
    fn test_live_subscriptions_and_sync() {
        let db = Database::in_memory();
        let user = db.create_user("s@example.com", "h", None, UserRole::User).unwrap();
        let live = db.create_subscription(&new_sub(&user.id, Some("sub_1"), SubscriptionStatus::Active)).unwrap();
        db.create_subscription(&new_sub(&user.id, Some("sub_2"), SubscriptionStatus::Canceled)).unwrap();

        assert_eq!(db.list_live_subscriptions(&user.id).unwrap().len(), 1);

        let now = Utc::now();
        db.sync_subscription(
            &live.id,
            &SubscriptionSync {
                status: Some(SubscriptionStatus::Canceled),
                canceled_at: Some(Some(now)),
                ..Default::default()
            },
        )
        .unwrap();

        let synced = db.get_subscription_by_stripe_id("sub_1").unwrap().unwrap();
        assert_eq!(synced.status, SubscriptionStatus::Canceled);
        assert!(synced.canceled_at.is_some());
        assert!(synced.current_period_start.is_some());
        assert!(db.list_live_subscriptions(&user.id).unwrap().is_empty());
    }

    #[test]
    fn test_invoice_upsert() {
        let db = Database::in_memory();
        let mut inv = InvoiceSync {
            user_id: Some("u1".to_string()),
            stripe_invoice_id: "in_1".to_string(),
            stripe_subscription_id: Some("sub_1".to_string()),
            status: "open".to_string(),
            total: 1900,
            currency: Some("eur".to_string()),
            period_start: None,
            period_end: None,
        };
        db.upsert_invoice(&inv).unwrap();
        inv.status = "paid".to_string();
        inv.user_id = None;
        db.upsert_invoice(&inv).unwrap();

        let invoices = db.list_invoices_for_user("u1").unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].status, "paid");
    }
}
