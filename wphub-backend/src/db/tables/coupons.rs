//! Coupon database operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result as SqliteResult};
use uuid::Uuid;

use crate::db::{parse_enum, parse_json, parse_opt_ts, parse_ts, to_json};
use crate::models::{Coupon, CouponType};
use super::super::Database;

const COUPON_COLUMNS: &str = "id, code, stripe_coupon_id, type, amount, currency, is_active, valid_from, valid_until,
    max_redemptions, redemptions_used, applies_to_plans, minimum_amount, applies_once, description, created_by, created_at";

/// Insert payload for `coupons`
#[derive(Debug, Clone)]
pub struct NewCoupon<'a> {
    pub code: &'a str,
    pub stripe_coupon_id: Option<&'a str>,
    pub coupon_type: CouponType,
    pub amount: i64,
    pub currency: Option<&'a str>,
    pub valid_until: Option<DateTime<Utc>>,
    pub max_redemptions: Option<i64>,
    pub applies_to_plans: &'a [String],
    pub minimum_amount: Option<i64>,
    pub applies_once: bool,
    pub description: Option<&'a str>,
    pub created_by: Option<&'a str>,
}

impl Database {
    pub fn create_coupon(&self, new: &NewCoupon) -> SqliteResult<Coupon> {
        let id = Uuid::new_v4().to_string();
        {
            let conn = self.conn.lock().unwrap();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO coupons (id, code, stripe_coupon_id, type, amount, currency, is_active, valid_from,
                    valid_until, max_redemptions, applies_to_plans, minimum_amount, applies_once, description, created_by, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?7)",
                rusqlite::params![
                    &id,
                    new.code.to_uppercase(),
                    new.stripe_coupon_id,
                    new.coupon_type.as_ref(),
                    new.amount,
                    new.currency,
                    &now,
                    new.valid_until.map(|t| t.to_rfc3339()),
                    new.max_redemptions,
                    to_json(&new.applies_to_plans)?,
                    new.minimum_amount,
                    new.applies_once,
                    new.description,
                    new.created_by,
                ],
            )?;
        }
        self.get_coupon_by_code(new.code)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Codes are matched case-insensitively
    pub fn get_coupon_by_code(&self, code: &str) -> SqliteResult<Option<Coupon>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {} FROM coupons WHERE code = ?1", COUPON_COLUMNS);
        conn.query_row(&sql, [code.trim().to_uppercase()], |row| Self::row_to_coupon(row))
            .optional()
    }

    pub fn has_used_coupon(&self, coupon_id: &str, user_id: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM coupon_usage WHERE coupon_id = ?1 AND user_id = ?2",
            [coupon_id, user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Record a redemption and bump the counter
    pub fn record_coupon_usage(&self, coupon_id: &str, user_id: &str) -> SqliteResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO coupon_usage (id, coupon_id, user_id, used_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![Uuid::new_v4().to_string(), coupon_id, user_id, &now],
        )?;
        tx.execute(
            "UPDATE coupons SET redemptions_used = redemptions_used + 1 WHERE id = ?1",
            [coupon_id],
        )?;
        tx.commit()
    }

    fn row_to_coupon(row: &rusqlite::Row) -> rusqlite::Result<Coupon> {
        let coupon_type: String = row.get(3)?;
        let created_at: String = row.get(16)?;
        Ok(Coupon {
            id: row.get(0)?,
            code: row.get(1)?,
            stripe_coupon_id: row.get(2)?,
            coupon_type: parse_enum(3, &coupon_type)?,
            amount: row.get(4)?,
            currency: row.get(5)?,
            is_active: row.get(6)?,
            valid_from: parse_opt_ts(7, row.get(7)?)?,
            valid_until: parse_opt_ts(8, row.get(8)?)?,
            max_redemptions: row.get(9)?,
            redemptions_used: row.get(10)?,
            applies_to_plans: parse_json(11, row.get(11)?)?,
            minimum_amount: row.get(12)?,
            applies_once: row.get(13)?,
            description: row.get(14)?,
            created_by: row.get(15)?,
            created_at: parse_ts(16, &created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::NewCoupon;
    use crate::db::Database;
    use crate::models::CouponType;

    fn sample(code: &str) -> NewCoupon<'_> {
        NewCoupon {
            code,
            stripe_coupon_id: None,
            coupon_type: CouponType::Percentage,
            amount: 20,
            currency: Some("eur"),
            valid_until: None,
            max_redemptions: Some(5),
            applies_to_plans: &[],
            minimum_amount: None,
            applies_once: true,
            description: None,
            created_by: None,
        }
    }

    #[test]
    fn test_codes_are_case_insensitive_and_unique() {
        let db = Database::in_memory();
        let coupon = db.create_coupon(&sample("spring")).unwrap();
        assert_eq!(coupon.code, "SPRING");
        assert!(coupon.valid_from.is_some());
        assert!(db.get_coupon_by_code(" Spring ").unwrap().is_some());
        assert!(db.create_coupon(&sample("SPRING")).is_err());
    }

    #[test]
    fn test_usage_is_recorded() {
        let db = Database::in_memory();
        let coupon = db.create_coupon(&sample("ONCE")).unwrap();
        assert!(!db.has_used_coupon(&coupon.id, "u1").unwrap());

        db.record_coupon_usage(&coupon.id, "u1").unwrap();
        assert!(db.has_used_coupon(&coupon.id, "u1").unwrap());
        assert_eq!(db.get_coupon_by_code("ONCE").unwrap().unwrap().redemptions_used, 1);
    }
}
