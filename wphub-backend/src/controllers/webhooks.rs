use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;

use crate::controllers::error_json;
use crate::integrations::stripe::{from_unix, StripeSubscription};
use crate::models::{InvoiceSync, NewSubscription, SubscriptionStatus};
use crate::security::verify_stripe_signature;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    id: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    total: i64,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    period_start: Option<i64>,
    #[serde(default)]
    period_end: Option<i64>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/webhooks/stripe").route(web::post().to(stripe_webhook)));
}

async fn stripe_webhook(state: web::Data<AppState>, req: HttpRequest, body: web::Bytes) -> impl Responder {
    if let Some(secret) = &state.config.stripe_webhook_secret {
        let Some(header) = req.headers().get("Stripe-Signature").and_then(|h| h.to_str().ok()) else {
            return error_json(StatusCode::BAD_REQUEST, "Missing Stripe-Signature header");
        };
        if let Err(e) = verify_stripe_signature(&body, header, secret, Utc::now().timestamp()) {
            log::warn!("[WEBHOOK] Rejected Stripe event: {}", e);
            return error_json(StatusCode::BAD_REQUEST, format!("Webhook signature verification failed: {}", e));
        }
    }

    let event: StripeEvent = match serde_json::from_slice(&body) {
        Ok(ev) => ev,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, format!("Invalid event payload: {}", e)),
    };

    log::info!(
        "[WEBHOOK] Stripe event {} ({})",
        event.event_type,
        event.id.as_deref().unwrap_or("no id")
    );

    let result = match event.event_type.as_str() {
        "customer.subscription.created" | "customer.subscription.updated" | "customer.subscription.deleted" => {
            handle_subscription_event(&state, &event.event_type, event.data.object)
        }
        "invoice.payment_succeeded" | "invoice.payment_failed" | "invoice.paid" => {
            handle_invoice_event(&state, event.data.object)
        }
        other => {
            log::debug!("[WEBHOOK] Ignoring event type {}", other);
            Ok(())
        }
    };

    match result {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({ "received": true })),
        Err(message) => {
            log::error!("[WEBHOOK] Failed to process {}: {}", event.event_type, message);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

fn handle_subscription_event(state: &AppState, event_type: &str, object: serde_json::Value) -> Result<(), String> {
    let stripe_sub: StripeSubscription =
        serde_json::from_value(object).map_err(|e| format!("Invalid subscription object: {}", e))?;

    let mut sync = stripe_sub.to_sync();
    if event_type == "customer.subscription.deleted" {
        sync.status = Some(SubscriptionStatus::Canceled);
        if stripe_sub.canceled_at.is_none() {
            sync.canceled_at = Some(Some(Utc::now()));
        }
    }
    if let Some(plan_id) = stripe_sub.metadata.get("plan_id") {
        sync.plan_id = Some(plan_id.clone());
    }

    let existing = state
        .db
        .get_subscription_by_stripe_id(&stripe_sub.id)
        .map_err(|e| e.to_string())?;

    let user_id = match existing {
        Some(local) => {
            // pausing can also happen from the Stripe dashboard
            match (stripe_sub.is_paused(), local.paused_at) {
                (true, None) => sync.paused_at = Some(Some(Utc::now())),
                (false, Some(_)) => sync.paused_at = Some(None),
                _ => {}
            }
            state.db.sync_subscription(&local.id, &sync).map_err(|e| e.to_string())?;
            if let Some(paused_at) = sync.paused_at {
                state
                    .db
                    .set_subscription_paused(&local.user_id, paused_at, None)
                    .map_err(|e| e.to_string())?;
            }
            local.user_id
        }
        None => {
            // subscription created outside this server, e.g. from the dashboard
            let Some(user) = owning_user(state, &stripe_sub)? else {
                log::warn!("[WEBHOOK] No local user for subscription {}", stripe_sub.id);
                return Ok(());
            };
            let new = NewSubscription {
                user_id: user.clone(),
                plan_id: sync.plan_id.clone(),
                stripe_subscription_id: Some(stripe_sub.id.clone()),
                status: sync.status.unwrap_or(SubscriptionStatus::Inactive),
                is_manual: false,
                interval: None,
                amount: None,
                currency: None,
                current_period_start: sync.current_period_start,
                current_period_end: sync.current_period_end,
                assigned_by: None,
            };
            state.db.upsert_stripe_subscription(&new).map_err(|e| e.to_string())?;
            user
        }
    };

    state.db.touch_subscription_updated(&user_id).map_err(|e| e.to_string())
}

/// Local user for a Stripe object, via metadata or the customer id
fn owning_user(state: &AppState, stripe_sub: &StripeSubscription) -> Result<Option<String>, String> {
    if let Some(user_id) = stripe_sub.metadata.get("user_id") {
        if state.db.get_user(user_id).map_err(|e| e.to_string())?.is_some() {
            return Ok(Some(user_id.clone()));
        }
    }
    match &stripe_sub.customer {
        Some(customer) => Ok(state
            .db
            .get_user_by_stripe_customer(customer)
            .map_err(|e| e.to_string())?
            .map(|u| u.id)),
        None => Ok(None),
    }
}

fn handle_invoice_event(state: &AppState, object: serde_json::Value) -> Result<(), String> {
    let invoice: StripeInvoice = serde_json::from_value(object).map_err(|e| format!("Invalid invoice object: {}", e))?;

    let user_id = match &invoice.customer {
        Some(customer) => state
            .db
            .get_user_by_stripe_customer(customer)
            .map_err(|e| e.to_string())?
            .map(|u| u.id),
        None => None,
    };

    state
        .db
        .upsert_invoice(&InvoiceSync {
            user_id,
            stripe_invoice_id: invoice.id,
            stripe_subscription_id: invoice.subscription,
            status: invoice.status.unwrap_or_else(|| "open".to_string()),
            total: invoice.total,
            currency: invoice.currency,
            period_start: invoice.period_start.and_then(from_unix),
            period_end: invoice.period_end.and_then(from_unix),
        })
        .map_err(|e| e.to_string())
}
