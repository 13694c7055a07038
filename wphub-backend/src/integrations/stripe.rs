//! Minimal Stripe REST client.
//!
//! Requests are form-encoded with bracketed keys (`metadata[user_id]=...`),
//! responses are JSON. Only the handful of objects the billing handlers touch
//! are modelled.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::{header, Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{BillingInterval, CouponType, SubscriptionStatus, SubscriptionSync};

#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    #[error("Stripe request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Error object returned by the API
    #[error("Stripe error: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid Stripe response: {0}")]
    Decode(String),
    #[error("Invalid Stripe configuration: {0}")]
    Config(String),
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub id: String,
    pub price: StripePrice,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub pause_collection: Option<serde_json::Value>,
    #[serde(default)]
    pub default_payment_method: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: Option<SubscriptionItems>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardDetails {
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub last4: String,
    #[serde(default)]
    pub exp_month: i64,
    #[serde(default)]
    pub exp_year: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethod {
    pub id: String,
    #[serde(rename = "type", default)]
    pub method_type: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub card: Option<CardDetails>,
    #[serde(default)]
    pub billing_details: serde_json::Value,
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvoiceSettings {
    #[serde(default)]
    pub default_payment_method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub invoice_settings: InvoiceSettings,
}

impl StripeCustomer {
    pub fn default_payment_method(&self) -> Option<&str> {
        self.invoice_settings.default_payment_method.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpcomingInvoice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub period_start: Option<i64>,
    #[serde(default)]
    pub period_end: Option<i64>,
    #[serde(default)]
    pub amount_due: i64,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub due_date: Option<i64>,
    #[serde(default)]
    pub next_payment_attempt: Option<i64>,
    #[serde(default)]
    pub lines: Option<serde_json::Value>,
}

impl UpcomingInvoice {
    /// When Stripe will attempt the charge
    pub fn charge_at(&self) -> Option<DateTime<Utc>> {
        self.next_payment_attempt.or(self.period_end).and_then(from_unix)
    }
}

/// A one-off percentage coupon an admin grants to a single subscription
#[derive(Debug, Clone)]
pub struct DiscountCoupon<'a> {
    pub percent_off: i64,
    pub duration: &'a str,
    pub duration_in_months: Option<i64>,
    pub name: &'a str,
    pub metadata: &'a [(&'a str, String)],
}

pub fn from_unix(ts: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(ts, 0).single()
}

impl StripeSubscription {
    pub fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus::from_stripe(&self.status)
    }

    pub fn first_item(&self) -> Option<&SubscriptionItem> {
        self.items.as_ref().and_then(|i| i.data.first())
    }

    pub fn is_paused(&self) -> bool {
        self.pause_collection.as_ref().is_some_and(|p| !p.is_null())
    }

    /// Local mirror fields derived from this object
    pub fn to_sync(&self) -> SubscriptionSync {
        SubscriptionSync {
            status: Some(self.status()),
            cancel_at_period_end: Some(self.cancel_at_period_end),
            canceled_at: Some(self.canceled_at.and_then(from_unix)),
            paused_at: None,
            current_period_start: self.current_period_start.and_then(from_unix),
            current_period_end: self.current_period_end.and_then(from_unix),
            plan_id: None,
        }
    }
}

/// Parameters for a new subscription
#[derive(Debug, Clone)]
pub struct NewStripeSubscription<'a> {
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub trial_days: i64,
    pub payment_method_id: Option<&'a str>,
    pub coupon_id: Option<&'a str>,
    pub metadata: &'a [(&'a str, String)],
}

pub struct StripeClient {
    client: Client,
    base_url: String,
}

impl StripeClient {
    pub fn new(secret_key: &str, base_url: &str) -> Result<Self, StripeError> {
        let mut headers = header::HeaderMap::new();
        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", secret_key))
            .map_err(|e| StripeError::Config(format!("Invalid secret key format: {}", e)))?;
        headers.insert(header::AUTHORIZATION, auth_value);

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, StripeError> {
        let url = format!("{}/v1/{}", self.base_url, path);
        let mut request = self.client.request(method.clone(), &url);
        if !params.is_empty() {
            request = if method == Method::GET {
                request.query(params)
            } else {
                request.form(params)
            };
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            log::error!("[STRIPE] {} {} failed: {}", method, path, message);
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| StripeError::Decode(e.to_string()))
    }

    // -- customers --

    /// Reuse a customer with this email if Stripe has one, else create it
    pub async fn find_or_create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        user_id: &str,
    ) -> Result<String, StripeError> {
        let existing: StripeList<StripeObject> = self
            .send(
                Method::GET,
                "customers",
                &[param("email", email), param("limit", "1")],
            )
            .await?;

        let now = Utc::now().to_rfc3339();
        if let Some(customer) = existing.data.into_iter().next() {
            log::info!("[STRIPE] Linking existing customer {} to user {}", customer.id, user_id);
            let _: StripeObject = self
                .send(
                    Method::POST,
                    &format!("customers/{}", customer.id),
                    &[param("metadata[platform_user_id]", user_id), param("metadata[linked_at]", &now)],
                )
                .await?;
            return Ok(customer.id);
        }

        let mut params = vec![
            param("email", email),
            param("metadata[platform_user_id]", user_id),
            param("metadata[created_at]", &now),
        ];
        if let Some(name) = name {
            params.push(param("name", name));
        }
        let customer: StripeObject = self.send(Method::POST, "customers", &params).await?;
        Ok(customer.id)
    }

    pub async fn retrieve_customer(&self, id: &str) -> Result<StripeCustomer, StripeError> {
        self.send(Method::GET, &format!("customers/{}", id), &[]).await
    }

    // -- payment methods --

    pub async fn list_payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>, StripeError> {
        let list: StripeList<PaymentMethod> = self
            .send(
                Method::GET,
                "payment_methods",
                &[param("customer", customer_id), param("type", "card"), param("limit", "100")],
            )
            .await?;
        Ok(list.data)
    }

    pub async fn retrieve_payment_method(&self, id: &str) -> Result<PaymentMethod, StripeError> {
        self.send(Method::GET, &format!("payment_methods/{}", id), &[]).await
    }

    pub async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<StripeCustomer, StripeError> {
        self.send(
            Method::POST,
            &format!("customers/{}", customer_id),
            &[param("invoice_settings[default_payment_method]", payment_method_id)],
        )
        .await
    }

    pub async fn detach_payment_method(&self, id: &str) -> Result<PaymentMethod, StripeError> {
        self.send(Method::POST, &format!("payment_methods/{}/detach", id), &[]).await
    }

    // -- setup intents --

    /// Card setup for future off-session charges
    pub async fn create_setup_intent(&self, customer_id: &str) -> Result<SetupIntent, StripeError> {
        self.send(
            Method::POST,
            "setup_intents",
            &[
                param("customer", customer_id),
                param("payment_method_types[0]", "card"),
                param("usage", "off_session"),
            ],
        )
        .await
    }

    pub async fn retrieve_setup_intent(&self, id: &str) -> Result<SetupIntent, StripeError> {
        self.send(Method::GET, &format!("setup_intents/{}", id), &[]).await
    }

    // -- invoices --

    pub async fn upcoming_invoice(&self, subscription_id: &str) -> Result<UpcomingInvoice, StripeError> {
        self.send(
            Method::GET,
            "invoices/upcoming",
            &[param("subscription", subscription_id), param("expand[0]", "lines")],
        )
        .await
    }

    // -- products and prices --

    pub async fn create_product(&self, name: &str, description: Option<&str>) -> Result<String, StripeError> {
        let mut params = vec![param("name", name)];
        if let Some(d) = description.filter(|d| !d.is_empty()) {
            params.push(param("description", d));
        }
        let product: StripeObject = self.send(Method::POST, "products", &params).await?;
        Ok(product.id)
    }

    pub async fn create_price(
        &self,
        product_id: &str,
        unit_amount: i64,
        currency: &str,
        interval: BillingInterval,
    ) -> Result<String, StripeError> {
        let price: StripeObject = self
            .send(
                Method::POST,
                "prices",
                &[
                    param("product", product_id),
                    param("unit_amount", &unit_amount.to_string()),
                    param("currency", currency),
                    param("recurring[interval]", interval.as_ref()),
                ],
            )
            .await?;
        Ok(price.id)
    }

    /// Products with prices cannot be deleted, only deactivated
    pub async fn archive_product(&self, product_id: &str) -> Result<(), StripeError> {
        let _: StripeObject = self
            .send(Method::POST, &format!("products/{}", product_id), &[param("active", "false")])
            .await?;
        Ok(())
    }

    // -- coupons --

    pub async fn create_coupon(
        &self,
        code: &str,
        coupon_type: CouponType,
        amount: i64,
        currency: Option<&str>,
        max_redemptions: Option<i64>,
        redeem_by: Option<DateTime<Utc>>,
    ) -> Result<String, StripeError> {
        let mut params = vec![param("id", code), param("duration", "forever")];
        match coupon_type {
            CouponType::Percentage => params.push(param("percent_off", &amount.to_string())),
            CouponType::FixedAmount => {
                params.push(param("amount_off", &amount.to_string()));
                params.push(param("currency", currency.unwrap_or("eur")));
            }
        }
        if let Some(max) = max_redemptions.filter(|m| *m > 0) {
            params.push(param("max_redemptions", &max.to_string()));
        }
        if let Some(until) = redeem_by {
            params.push(param("redeem_by", &until.timestamp().to_string()));
        }
        let coupon: StripeObject = self.send(Method::POST, "coupons", &params).await?;
        Ok(coupon.id)
    }

    pub async fn create_discount_coupon(&self, discount: &DiscountCoupon<'_>) -> Result<String, StripeError> {
        let mut params = vec![
            param("percent_off", &discount.percent_off.to_string()),
            param("duration", discount.duration),
            param("name", discount.name),
        ];
        if let Some(months) = discount.duration_in_months {
            params.push(param("duration_in_months", &months.to_string()));
        }
        for (key, value) in discount.metadata {
            params.push(param(&format!("metadata[{}]", key), value));
        }
        let coupon: StripeObject = self.send(Method::POST, "coupons", &params).await?;
        Ok(coupon.id)
    }

    // -- subscriptions --

    pub async fn list_active_subscriptions(&self, customer_id: &str) -> Result<Vec<StripeSubscription>, StripeError> {
        let list: StripeList<StripeSubscription> = self
            .send(
                Method::GET,
                "subscriptions",
                &[param("customer", customer_id), param("status", "active")],
            )
            .await?;
        Ok(list.data)
    }

    /// Takes effect from the next billing cycle
    pub async fn apply_coupon(&self, id: &str, coupon_id: &str) -> Result<StripeSubscription, StripeError> {
        self.update_subscription(id, &[param("coupon", coupon_id), param("proration_behavior", "none")])
            .await
    }

    pub async fn create_subscription(&self, new: &NewStripeSubscription<'_>) -> Result<StripeSubscription, StripeError> {
        let mut params = vec![
            param("customer", new.customer_id),
            param("items[0][price]", new.price_id),
            param("payment_behavior", "default_incomplete"),
        ];
        if new.trial_days > 0 {
            params.push(param("trial_period_days", &new.trial_days.to_string()));
        }
        if let Some(pm) = new.payment_method_id {
            params.push(param("default_payment_method", pm));
        }
        if let Some(coupon) = new.coupon_id {
            params.push(param("coupon", coupon));
        }
        for (key, value) in new.metadata {
            params.push(param(&format!("metadata[{}]", key), value));
        }
        self.send(Method::POST, "subscriptions", &params).await
    }

    pub async fn retrieve_subscription(&self, id: &str) -> Result<StripeSubscription, StripeError> {
        self.send(Method::GET, &format!("subscriptions/{}", id), &[]).await
    }

    /// Immediate cancellation
    pub async fn cancel_subscription(&self, id: &str) -> Result<StripeSubscription, StripeError> {
        self.send(Method::DELETE, &format!("subscriptions/{}", id), &[]).await
    }

    /// Generic update with raw form params
    pub async fn update_subscription(
        &self,
        id: &str,
        params: &[(String, String)],
    ) -> Result<StripeSubscription, StripeError> {
        self.send(Method::POST, &format!("subscriptions/{}", id), params).await
    }

    pub async fn cancel_at_period_end(&self, id: &str, requested_by: &str) -> Result<StripeSubscription, StripeError> {
        self.update_subscription(
            id,
            &[
                param("cancel_at_period_end", "true"),
                param("metadata[cancellation_requested_at]", &Utc::now().to_rfc3339()),
                param("metadata[cancellation_requested_by]", requested_by),
            ],
        )
        .await
    }

    pub async fn change_price(
        &self,
        id: &str,
        item_id: &str,
        price_id: &str,
        proration_behavior: &str,
        plan_id: &str,
    ) -> Result<StripeSubscription, StripeError> {
        self.update_subscription(
            id,
            &[
                param("items[0][id]", item_id),
                param("items[0][price]", price_id),
                param("proration_behavior", proration_behavior),
                param("metadata[plan_id]", plan_id),
                param("metadata[plan_changed_at]", &Utc::now().to_rfc3339()),
            ],
        )
        .await
    }

    pub async fn pause_collection(&self, id: &str, reason: &str) -> Result<StripeSubscription, StripeError> {
        self.update_subscription(
            id,
            &[
                param("pause_collection[behavior]", "mark_uncollectible"),
                param("metadata[paused_at]", &Utc::now().to_rfc3339()),
                param("metadata[pause_reason]", reason),
            ],
        )
        .await
    }

    /// Empty values unset the field on Stripe's side
    pub async fn resume_collection(&self, id: &str) -> Result<StripeSubscription, StripeError> {
        self.update_subscription(
            id,
            &[
                param("pause_collection", ""),
                param("metadata[resumed_at]", &Utc::now().to_rfc3339()),
                param("metadata[paused_at]", ""),
                param("metadata[pause_reason]", ""),
            ],
        )
        .await
    }
}

fn param(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}
