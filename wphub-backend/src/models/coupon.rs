//! Coupons and the business rules that decide whether one can be redeemed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CouponType {
    FixedAmount,
    Percentage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Coupon {
    pub id: String,
    pub code: String,
    pub stripe_coupon_id: Option<String>,
    #[serde(rename = "type")]
    pub coupon_type: CouponType,
    pub amount: i64,
    pub currency: Option<String>,
    pub is_active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub max_redemptions: Option<i64>,
    pub redemptions_used: i64,
    pub applies_to_plans: Vec<String>,
    pub minimum_amount: Option<i64>,
    pub applies_once: bool,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Why a coupon cannot be redeemed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRejection {
    Inactive,
    Expired,
    NotYetValid,
    Exhausted,
    PlanNotApplicable,
    BelowMinimum { minimum: i64, currency: String },
    AlreadyUsed,
}

impl CouponRejection {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Inactive | Self::Expired | Self::NotYetValid | Self::Exhausted => 410,
            Self::PlanNotApplicable | Self::BelowMinimum { .. } | Self::AlreadyUsed => 422,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Inactive => "Coupon is no longer active".to_string(),
            Self::Expired => "Coupon has expired".to_string(),
            Self::NotYetValid => "Coupon is not yet valid".to_string(),
            Self::Exhausted => "Coupon has reached maximum redemptions".to_string(),
            Self::PlanNotApplicable => "Coupon does not apply to this plan".to_string(),
            Self::BelowMinimum { minimum, currency } => format!(
                "Minimum purchase amount of {} {} required",
                *minimum as f64 / 100.0,
                currency
            ),
            Self::AlreadyUsed => "You have already used this coupon".to_string(),
        }
    }
}

/// Largest amount, in cents, a coupon can be evaluated against
pub const MAX_COUPON_AMOUNT: i64 = 99_999_999_999;

/// Discount a coupon grants on an amount
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Discount {
    pub amount: i64,
    #[serde(rename = "type")]
    pub coupon_type: CouponType,
    pub percentage: Option<i64>,
}

impl Coupon {
    /// Activity, validity window and redemption limit, in that order
    pub fn check_availability(&self, now: DateTime<Utc>) -> Result<(), CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive);
        }
        if self.valid_until.is_some_and(|until| until < now) {
            return Err(CouponRejection::Expired);
        }
        if self.valid_from.is_some_and(|from| from > now) {
            return Err(CouponRejection::NotYetValid);
        }
        // zero or absent means unlimited
        if let Some(max) = self.max_redemptions.filter(|m| *m > 0) {
            if self.redemptions_used >= max {
                return Err(CouponRejection::Exhausted);
            }
        }
        Ok(())
    }

    /// An empty plan list means the coupon applies everywhere
    pub fn check_plan(&self, plan_id: Option<&str>) -> Result<(), CouponRejection> {
        match plan_id {
            Some(plan) if !self.applies_to_plans.is_empty() => {
                if self.applies_to_plans.iter().any(|p| p == plan) {
                    Ok(())
                } else {
                    Err(CouponRejection::PlanNotApplicable)
                }
            }
            _ => Ok(()),
        }
    }

    pub fn check_minimum(&self, amount: Option<i64>) -> Result<(), CouponRejection> {
        match (self.minimum_amount.filter(|m| *m > 0), amount) {
            (Some(minimum), Some(amount)) if amount > 0 && amount < minimum => {
                Err(CouponRejection::BelowMinimum {
                    minimum,
                    currency: self.currency.clone().unwrap_or_default(),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn discount_for(&self, amount: Option<i64>) -> Discount {
        let discount = match self.coupon_type {
            CouponType::FixedAmount => self.amount,
            CouponType::Percentage => amount
                .filter(|a| *a > 0)
                .map(|a| {
                    let discount = (i128::from(a) * i128::from(self.amount)).div_euclid(100);
                    i64::try_from(discount).unwrap_or(i64::MAX)
                })
                .unwrap_or(0),
        };
        Discount {
            amount: discount,
            coupon_type: self.coupon_type,
            percentage: (self.coupon_type == CouponType::Percentage).then_some(self.amount),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCouponRequest {
    pub code: String,
    #[serde(rename = "type")]
    pub coupon_type: Option<String>,
    pub amount: i64,
    pub currency: Option<String>,
    pub max_redemptions: Option<i64>,
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub applies_to_plans: Vec<String>,
    pub minimum_amount: Option<i64>,
    #[serde(default)]
    pub applies_once: bool,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateCouponRequest {
    #[serde(default)]
    pub code: String,
    pub plan_id: Option<String>,
    pub subscription_id: Option<String>,
    pub amount: Option<i64>,
}
