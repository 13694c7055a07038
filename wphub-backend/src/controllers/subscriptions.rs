use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use std::collections::HashMap;

use crate::controllers::billing::evaluate_coupon;
use crate::controllers::{db_error, error_json, record_activity, stripe_client, stripe_error};
use crate::integrations::stripe::NewStripeSubscription;
use crate::middleware::session_auth::authenticate;
use crate::models::{
    CancelSubscriptionRequest, CreateSubscriptionRequest, NewSubscription, PauseAction,
    PauseSubscriptionRequest, SubscriptionSync, UpdateSubscriptionRequest, User, UserSubscription,
};
use crate::AppState;

const PRORATION_BEHAVIORS: [&str; 3] = ["create_invoices", "always_invoice", "none"];
const DEFAULT_PAUSE_REASON: &str = "user_requested";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/subscriptions")
            .route("", web::get().to(list_subscriptions))
            .route("/plans", web::get().to(list_plans))
            .route("/create", web::post().to(create_subscription))
            .route("/cancel", web::post().to(cancel_subscription))
            .route("/update", web::post().to(update_subscription))
            .route("/pause", web::post().to(pause_subscription)),
    );
}

async fn list_plans(state: web::Data<AppState>) -> impl Responder {
    match state.db.list_plans(true) {
        Ok(plans) => HttpResponse::Ok().json(serde_json::json!({ "plans": plans })),
        Err(e) => db_error("Failed to list plans", e),
    }
}

async fn list_subscriptions(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let subs = match state.db.list_subscriptions_for_user(&user.id) {
        Ok(s) => s,
        Err(e) => return db_error("Failed to list subscriptions", e),
    };
    let plan_names: HashMap<String, String> = match state.db.list_plans(false) {
        Ok(plans) => plans.into_iter().map(|p| (p.id, p.name)).collect(),
        Err(e) => return db_error("Failed to list plans", e),
    };

    let subscriptions: Vec<serde_json::Value> = subs
        .into_iter()
        .map(|sub| {
            let plan_name = sub.plan_id.as_ref().and_then(|id| plan_names.get(id)).cloned();
            let mut value = serde_json::json!(sub);
            value["plan_name"] = serde_json::json!(plan_name);
            value
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({ "subscriptions": subscriptions }))
}

/// The caller's current active/trialing subscription
fn current_subscription(state: &AppState, user: &User) -> Result<UserSubscription, HttpResponse> {
    match state.db.list_live_subscriptions(&user.id) {
        Ok(subs) => subs
            .into_iter()
            .next()
            .ok_or_else(|| error_json(StatusCode::NOT_FOUND, "No active subscription found")),
        Err(e) => Err(db_error("Failed to load subscriptions", e)),
    }
}

async fn create_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateSubscriptionRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let Some(customer_id) = user.stripe_customer_id.clone() else {
        return error_json(StatusCode::BAD_REQUEST, "No Stripe customer found. Create a customer first.");
    };

    let plan = match state.db.get_plan(&body.plan_id) {
        Ok(Some(plan)) if plan.is_active => plan,
        Ok(_) => return error_json(StatusCode::NOT_FOUND, "Plan not found or inactive"),
        Err(e) => return db_error("Failed to load plan", e),
    };
    let Some(price_id) = plan.stripe_price_id.clone() else {
        return error_json(StatusCode::BAD_REQUEST, "Plan has no Stripe price configured");
    };

    match state.db.list_live_subscriptions(&user.id) {
        Ok(existing) if !existing.is_empty() => {
            return error_json(StatusCode::CONFLICT, "User already has an active subscription");
        }
        Ok(_) => {}
        Err(e) => return db_error("Failed to load subscriptions", e),
    }

    let coupon = match body.coupon_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => match evaluate_coupon(&state, &user, code, Some(plan.id.as_str()), None, Some(plan.price_amount)) {
            Ok(coupon) => Some(coupon),
            Err(resp) => return resp,
        },
        None => None,
    };

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let metadata = [("user_id", user.id.clone()), ("plan_id", plan.id.clone())];
    let stripe_coupon = coupon
        .as_ref()
        .map(|c| c.stripe_coupon_id.clone().unwrap_or_else(|| c.code.clone()));
    let stripe_sub = match stripe
        .create_subscription(&NewStripeSubscription {
            customer_id: &customer_id,
            price_id: &price_id,
            trial_days: plan.trial_days,
            payment_method_id: body.payment_method_id.as_deref(),
            coupon_id: stripe_coupon.as_deref(),
            metadata: &metadata,
        })
        .await
    {
        Ok(s) => s,
        Err(e) => return stripe_error(e),
    };

    let sync = stripe_sub.to_sync();
    let new = NewSubscription {
        user_id: user.id.clone(),
        plan_id: Some(plan.id.clone()),
        stripe_subscription_id: Some(stripe_sub.id.clone()),
        status: stripe_sub.status(),
        is_manual: false,
        interval: Some(plan.interval.to_string()),
        amount: Some(plan.price_amount),
        currency: Some(plan.currency.clone()),
        current_period_start: sync.current_period_start,
        current_period_end: sync.current_period_end,
        assigned_by: None,
    };

    let subscription = match state.db.upsert_stripe_subscription(&new) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Stripe subscription {} created but not stored", stripe_sub.id);
            return db_error("Failed to store subscription", e);
        }
    };

    if let Some(coupon) = &coupon {
        if let Err(e) = state.db.record_coupon_usage(&coupon.id, &user.id) {
            log::warn!("Failed to record usage of coupon {}: {}", coupon.code, e);
        }
    }
    if let Err(e) = state.db.touch_subscription_updated(&user.id) {
        log::warn!("Failed to touch subscription_updated_at for {}: {}", user.id, e);
    }

    record_activity(
        &state,
        &user,
        "subscription_created",
        "user_subscription",
        Some(&subscription.id),
        Some(format!("plan={}", plan.name)),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "subscription": subscription,
        "stripe_subscription_id": stripe_sub.id,
        "status": stripe_sub.status,
    }))
}

async fn cancel_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CancelSubscriptionRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let sub = match &body.subscription_id {
        Some(id) => match state.db.get_subscription(id) {
            Ok(Some(sub)) if sub.user_id == user.id => sub,
            Ok(Some(_)) => return error_json(StatusCode::FORBIDDEN, "Subscription does not belong to you"),
            Ok(None) => return error_json(StatusCode::NOT_FOUND, "Subscription not found"),
            Err(e) => return db_error("Failed to load subscription", e),
        },
        None => match current_subscription(&state, &user) {
            Ok(sub) => sub,
            Err(resp) => return resp,
        },
    };

    if sub.is_manual {
        return error_json(StatusCode::BAD_REQUEST, "Manual subscriptions must be canceled by an administrator");
    }
    let Some(stripe_id) = sub.stripe_subscription_id.clone() else {
        return error_json(StatusCode::BAD_REQUEST, "Subscription has no Stripe billing record");
    };

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let result = if body.cancel_immediately {
        stripe.cancel_subscription(&stripe_id).await
    } else {
        stripe.cancel_at_period_end(&stripe_id, &user.email).await
    };
    let stripe_sub = match result {
        Ok(s) => s,
        Err(e) => return stripe_error(e),
    };

    if let Err(e) = state.db.sync_subscription(&sub.id, &stripe_sub.to_sync()) {
        return db_error("Failed to update subscription", e);
    }
    if let Err(e) = state.db.touch_subscription_updated(&user.id) {
        log::warn!("Failed to touch subscription_updated_at for {}: {}", user.id, e);
    }

    let message = if body.cancel_immediately {
        "Subscription canceled immediately"
    } else {
        "Subscription will be canceled at the end of the billing period"
    };
    record_activity(&state, &user, "subscription_canceled", "user_subscription", Some(&sub.id), Some(message.to_string()));

    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": message,
        "status": stripe_sub.status,
        "cancel_at_period_end": stripe_sub.cancel_at_period_end,
    }))
}

async fn update_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UpdateSubscriptionRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let proration = body.proration_behavior.as_deref().unwrap_or("create_invoices");
    if !PRORATION_BEHAVIORS.contains(&proration) {
        return error_json(
            StatusCode::BAD_REQUEST,
            format!("proration_behavior must be one of: {}", PRORATION_BEHAVIORS.join(", ")),
        );
    }

    let plan = match state.db.get_plan(&body.plan_id) {
        Ok(Some(plan)) if plan.is_active => plan,
        Ok(_) => return error_json(StatusCode::NOT_FOUND, "Plan not found or inactive"),
        Err(e) => return db_error("Failed to load plan", e),
    };
    let Some(price_id) = plan.stripe_price_id.clone() else {
        return error_json(StatusCode::BAD_REQUEST, "Plan has no Stripe price configured");
    };

    let sub = match current_subscription(&state, &user) {
        Ok(sub) => sub,
        Err(resp) => return resp,
    };
    if sub.is_manual {
        return error_json(StatusCode::BAD_REQUEST, "Manual subscriptions cannot be changed");
    }
    if sub.plan_id.as_deref() == Some(plan.id.as_str()) {
        return error_json(StatusCode::BAD_REQUEST, "Subscription is already on this plan");
    }
    let Some(stripe_id) = sub.stripe_subscription_id.clone() else {
        return error_json(StatusCode::BAD_REQUEST, "Subscription has no Stripe billing record");
    };

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let current = match stripe.retrieve_subscription(&stripe_id).await {
        Ok(s) => s,
        Err(e) => return stripe_error(e),
    };
    let Some(item) = current.first_item() else {
        return error_json(StatusCode::BAD_REQUEST, "Stripe subscription has no items");
    };

    let updated = match stripe.change_price(&stripe_id, &item.id, &price_id, proration, &plan.id).await {
        Ok(s) => s,
        Err(e) => return stripe_error(e),
    };

    let sync = SubscriptionSync {
        plan_id: Some(plan.id.clone()),
        ..updated.to_sync()
    };
    if let Err(e) = state.db.sync_subscription(&sub.id, &sync) {
        return db_error("Failed to update subscription", e);
    }
    if let Err(e) = state.db.touch_subscription_updated(&user.id) {
        log::warn!("Failed to touch subscription_updated_at for {}: {}", user.id, e);
    }

    record_activity(
        &state,
        &user,
        "subscription_plan_changed",
        "user_subscription",
        Some(&sub.id),
        Some(format!("plan={} proration={}", plan.name, proration)),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Subscription updated",
        "plan_id": plan.id,
        "status": updated.status,
    }))
}

async fn pause_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<PauseSubscriptionRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let sub = match current_subscription(&state, &user) {
        Ok(sub) => sub,
        Err(resp) => return resp,
    };
    if sub.is_manual {
        return error_json(StatusCode::BAD_REQUEST, "Manual subscriptions cannot be paused");
    }
    let Some(stripe_id) = sub.stripe_subscription_id.clone() else {
        return error_json(StatusCode::BAD_REQUEST, "Subscription has no Stripe billing record");
    };

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let reason = body.pause_reason.as_deref().unwrap_or(DEFAULT_PAUSE_REASON);
    let now = Utc::now();
    let (result, paused_at) = match body.action {
        PauseAction::Pause => (stripe.pause_collection(&stripe_id, reason).await, Some(now)),
        PauseAction::Resume => (stripe.resume_collection(&stripe_id).await, None),
    };
    let stripe_sub = match result {
        Ok(s) => s,
        Err(e) => return stripe_error(e),
    };

    let sync = SubscriptionSync {
        paused_at: Some(paused_at),
        ..stripe_sub.to_sync()
    };
    if let Err(e) = state.db.sync_subscription(&sub.id, &sync) {
        return db_error("Failed to update subscription", e);
    }
    let user_reason = paused_at.map(|_| reason);
    if let Err(e) = state.db.set_subscription_paused(&user.id, paused_at, user_reason) {
        return db_error("Failed to update pause state", e);
    }

    let (action, message) = match body.action {
        PauseAction::Pause => ("subscription_paused", "Subscription paused"),
        PauseAction::Resume => ("subscription_resumed", "Subscription resumed"),
    };
    record_activity(&state, &user, action, "user_subscription", Some(&sub.id), user_reason.map(String::from));

    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": message,
        "paused_at": paused_at,
    }))
}
