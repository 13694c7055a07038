use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

/// Subscription status, mirroring Stripe's vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    Canceled,
    Inactive,
}

impl SubscriptionStatus {
    /// Parse a Stripe status string; unknown values count as inactive
    pub fn from_stripe(s: &str) -> Self {
        s.parse().unwrap_or(SubscriptionStatus::Inactive)
    }

    /// Active or trialing: the states a user may hold at most one of
    pub fn is_live(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionPlan {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Price in the smallest currency unit
    pub price_amount: i64,
    pub currency: String,
    pub interval: BillingInterval,
    pub trial_days: i64,
    pub features: Vec<String>,
    pub stripe_product_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserSubscription {
    pub id: String,
    pub user_id: String,
    pub plan_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub is_manual: bool,
    pub interval: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for `user_subscriptions`
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_id: String,
    pub plan_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub status: SubscriptionStatus,
    pub is_manual: bool,
    pub interval: Option<String>,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub assigned_by: Option<String>,
}

/// Fields a Stripe response or webhook can change on a mirrored subscription
#[derive(Debug, Clone, Default)]
pub struct SubscriptionSync {
    pub status: Option<SubscriptionStatus>,
    pub cancel_at_period_end: Option<bool>,
    pub canceled_at: Option<Option<DateTime<Utc>>>,
    pub paused_at: Option<Option<DateTime<Utc>>>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub plan_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    pub name: String,
    pub description: Option<String>,
    pub price_amount: i64,
    pub currency: Option<String>,
    pub interval: Option<BillingInterval>,
    #[serde(default)]
    pub trial_days: i64,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub plan_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub trial_days: Option<i64>,
    pub features: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PlanIdRequest {
    pub plan_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan_id: String,
    pub payment_method_id: Option<String>,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub cancel_immediately: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan_id: String,
    pub proration_behavior: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseAction {
    Pause,
    Resume,
}

#[derive(Debug, Deserialize)]
pub struct PauseSubscriptionRequest {
    pub action: PauseAction,
    pub pause_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignManualSubscriptionRequest {
    pub user_id: String,
    pub plan_id: String,
    pub custom_amount: Option<i64>,
    pub interval: Option<String>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct AdminCancelSubscriptionRequest {
    pub subscription_id: String,
}
