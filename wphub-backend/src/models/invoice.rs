use chrono::{DateTime, Utc};
use serde::Serialize;

/// Local mirror of a Stripe invoice, written by the webhook
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: String,
    pub user_id: Option<String>,
    pub stripe_invoice_id: String,
    pub stripe_subscription_id: Option<String>,
    pub status: String,
    pub total: i64,
    pub currency: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload keyed by `stripe_invoice_id`
#[derive(Debug, Clone)]
pub struct InvoiceSync {
    pub user_id: Option<String>,
    pub stripe_invoice_id: String,
    pub stripe_subscription_id: Option<String>,
    pub status: String,
    pub total: i64,
    pub currency: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}
