use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;

use crate::controllers::{db_error, error_json, record_activity, stripe_client, stripe_error};
use crate::db::NewCoupon;
use crate::integrations::stripe::DiscountCoupon;
use crate::middleware::session_auth::{authenticate, require_admin};
use crate::models::{
    AdminCancelSubscriptionRequest, AssignManualSubscriptionRequest, BillingInterval, CouponType,
    CreateCouponRequest, CreatePlanRequest, NewSubscription, PlanIdRequest, SubscriptionStatus,
    SubscriptionSync, UpdatePlanRequest, UpdateUserRequest, UserSubscription,
};
use crate::AppState;

const DEFAULT_PLAN_CURRENCY: &str = "usd";
const DEFAULT_ACTIVITY_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyDiscountRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    discount_percent: Option<i64>,
    #[serde(default)]
    duration_type: Option<String>,
    #[serde(default)]
    duration_months: Option<i64>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/admin")
            .route("/check", web::get().to(check))
            .route("/users", web::get().to(list_users))
            .route("/users/update", web::post().to(update_user))
            .route("/plans", web::post().to(create_plan))
            .route("/plans/update", web::post().to(update_plan))
            .route("/plans/delete", web::post().to(delete_plan))
            .route("/subscriptions/assign", web::post().to(assign_subscription))
            .route("/subscriptions/cancel", web::post().to(cancel_subscription))
            .route("/subscriptions/discount", web::post().to(apply_subscription_discount))
            .route("/coupons", web::post().to(create_coupon))
            .route("/activity", web::get().to(list_activity)),
    );
}

/// Diagnostic view of how the caller's admin status was derived
async fn check(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let is_admin = user.is_admin();
    HttpResponse::Ok().json(serde_json::json!({
        "authenticated_user_id": user.id,
        "authenticated_user_email": user.email,
        "is_admin_in_db": is_admin,
        "user_role": user.role,
        "is_admin_by_role": is_admin,
        "is_admin_overall": is_admin,
        "can_sync": is_admin,
    }))
}

async fn list_users(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    if let Err(resp) = require_admin(&state.db, &req) {
        return resp;
    }

    match state.db.list_users() {
        Ok(users) => HttpResponse::Ok().json(serde_json::json!({ "users": users })),
        Err(e) => db_error("Failed to list users", e),
    }
}

async fn update_user(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UpdateUserRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.update_user_admin(&body) {
        Ok(Some(user)) => {
            // a deactivated account loses its sessions immediately
            if !user.is_active() {
                match state.db.delete_sessions_for_user(&user.id) {
                    Ok(n) if n > 0 => log::info!("Revoked {} session(s) for deactivated user {}", n, user.email),
                    Ok(_) => {}
                    Err(e) => log::warn!("Failed to revoke sessions for {}: {}", user.email, e),
                }
            }
            record_activity(
                &state,
                &admin,
                "user_updated",
                "user",
                Some(&user.id),
                Some(format!("role={} status={}", user.role, user.status)),
            );
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "user": user }))
        }
        Ok(None) => error_json(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => db_error("Failed to update user", e),
    }
}

// -- plans --

async fn create_plan(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreatePlanRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if body.name.trim().is_empty() || body.price_amount <= 0 {
        return error_json(StatusCode::BAD_REQUEST, "name and a positive price_amount are required");
    }

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let currency = body
        .currency
        .as_deref()
        .unwrap_or(DEFAULT_PLAN_CURRENCY)
        .to_lowercase();
    let interval = body.interval.unwrap_or(BillingInterval::Month);

    let product_id = match stripe.create_product(body.name.trim(), body.description.as_deref()).await {
        Ok(id) => id,
        Err(e) => return stripe_error(e),
    };
    let price_id = match stripe.create_price(&product_id, body.price_amount, &currency, interval).await {
        Ok(id) => id,
        Err(e) => return stripe_error(e),
    };

    match state.db.create_plan(
        body.name.trim(),
        body.description.as_deref(),
        body.price_amount,
        &currency,
        interval,
        body.trial_days.max(0),
        &body.features,
        Some(&product_id),
        Some(&price_id),
    ) {
        Ok(plan) => {
            log::info!("Created plan {} ({}) with Stripe price {}", plan.name, plan.id, price_id);
            record_activity(&state, &admin, "plan_created", "subscription_plan", Some(&plan.id), None);
            HttpResponse::Ok().json(serde_json::json!({
                "success": true,
                "plan": plan,
                "message": "Subscription plan created successfully"
            }))
        }
        Err(e) => db_error("Failed to create plan", e),
    }
}

async fn update_plan(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UpdatePlanRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.update_plan(&body) {
        Ok(Some(plan)) => {
            record_activity(&state, &admin, "plan_updated", "subscription_plan", Some(&plan.id), None);
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "plan": plan }))
        }
        Ok(None) => error_json(StatusCode::NOT_FOUND, "Plan not found"),
        Err(e) => db_error("Failed to update plan", e),
    }
}

async fn delete_plan(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<PlanIdRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let plan = match state.db.get_plan(&body.plan_id) {
        Ok(Some(plan)) => plan,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Plan not found"),
        Err(e) => return db_error("Failed to load plan", e),
    };

    if let Some(product_id) = &plan.stripe_product_id {
        match state.stripe.as_deref() {
            Some(stripe) => {
                if let Err(e) = stripe.archive_product(product_id).await {
                    log::warn!("Failed to archive Stripe product {}: {}", product_id, e);
                }
            }
            None => log::warn!("Stripe not configured; product {} left active", product_id),
        }
    }

    match state.db.delete_plan(&plan.id) {
        Ok(_) => {
            record_activity(&state, &admin, "plan_deleted", "subscription_plan", Some(&plan.id), Some(plan.name));
            HttpResponse::Ok().json(serde_json::json!({ "success": true }))
        }
        Err(e) => db_error("Failed to delete plan", e),
    }
}

// -- subscriptions --

fn canceled_now() -> SubscriptionSync {
    SubscriptionSync {
        status: Some(SubscriptionStatus::Canceled),
        canceled_at: Some(Some(Utc::now())),
        ..Default::default()
    }
}

/// Cancel one subscription locally, and in Stripe when it has a billing object
async fn cancel_everywhere(state: &AppState, sub: &UserSubscription) -> Result<(), HttpResponse> {
    if let (Some(stripe_id), false) = (&sub.stripe_subscription_id, sub.is_manual) {
        let stripe = stripe_client(state)?;
        stripe.cancel_subscription(stripe_id).await.map_err(stripe_error)?;
    }
    state
        .db
        .sync_subscription(&sub.id, &canceled_now())
        .map_err(|e| db_error("Failed to cancel subscription", e))
}

async fn assign_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AssignManualSubscriptionRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let plan = match state.db.get_plan(&body.plan_id) {
        Ok(Some(plan)) => plan,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Plan not found"),
        Err(e) => return db_error("Failed to load plan", e),
    };
    let user = match state.db.get_user(&body.user_id) {
        Ok(Some(user)) => user,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "User not found"),
        Err(e) => return db_error("Failed to load user", e),
    };

    let existing = match state.db.list_live_subscriptions(&user.id) {
        Ok(subs) => subs,
        Err(e) => return db_error("Failed to load subscriptions", e),
    };
    for sub in &existing {
        if let Err(resp) = cancel_everywhere(&state, sub).await {
            return resp;
        }
        log::info!("Canceled subscription {} before manual assignment", sub.id);
    }

    let new = NewSubscription {
        user_id: user.id.clone(),
        plan_id: Some(plan.id.clone()),
        stripe_subscription_id: None,
        status: SubscriptionStatus::Active,
        is_manual: true,
        interval: Some(body.interval.clone().unwrap_or_else(|| "lifetime".to_string())),
        amount: Some(body.custom_amount.unwrap_or(0)),
        currency: Some(plan.currency.clone()),
        current_period_start: Some(Utc::now()),
        current_period_end: body.end_date,
        assigned_by: Some(admin.email.clone()),
    };

    match state.db.create_subscription(&new) {
        Ok(subscription) => {
            if let Err(e) = state.db.touch_subscription_updated(&user.id) {
                log::warn!("Failed to touch subscription_updated_at for {}: {}", user.id, e);
            }
            record_activity(
                &state,
                &admin,
                "manual_subscription_assigned",
                "user_subscription",
                Some(&subscription.id),
                Some(format!("user={} plan={}", user.email, plan.name)),
            );
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "subscription": subscription }))
        }
        Err(e) => db_error("Failed to create subscription", e),
    }
}

async fn cancel_subscription(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AdminCancelSubscriptionRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let sub = match state.db.get_subscription(&body.subscription_id) {
        Ok(Some(sub)) => sub,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Subscription not found"),
        Err(e) => return db_error("Failed to load subscription", e),
    };

    if let Err(resp) = cancel_everywhere(&state, &sub).await {
        return resp;
    }
    if let Err(e) = state.db.touch_subscription_updated(&sub.user_id) {
        log::warn!("Failed to touch subscription_updated_at for {}: {}", sub.user_id, e);
    }

    record_activity(&state, &admin, "subscription_canceled_by_admin", "user_subscription", Some(&sub.id), None);
    HttpResponse::Ok().json(serde_json::json!({ "success": true, "message": "Subscription canceled" }))
}

/// Check a discount request; returns the duration and its month count
fn validate_discount(body: &ApplyDiscountRequest) -> Result<(&str, Option<i64>), HttpResponse> {
    if body.discount_percent.is_some_and(|p| !(0..=100).contains(&p)) {
        return Err(error_json(StatusCode::BAD_REQUEST, "discount_percent must be between 0 and 100"));
    }
    let duration = body.duration_type.as_deref().unwrap_or_default();
    match duration {
        "once" | "forever" => Ok((duration, None)),
        "repeating" => match body.duration_months {
            Some(months) if months >= 1 => Ok((duration, Some(months))),
            _ => Err(error_json(
                StatusCode::BAD_REQUEST,
                "duration_months is required and must be >= 1 for repeating discounts",
            )),
        },
        _ => Err(error_json(
            StatusCode::BAD_REQUEST,
            "duration_type must be one of: once, repeating, forever",
        )),
    }
}

/// One-off percentage coupon on a user's Stripe subscription, from the next cycle
async fn apply_subscription_discount(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ApplyDiscountRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let (Some(user_id), Some(percent)) = (
        body.user_id.as_deref().filter(|id| !id.is_empty()),
        body.discount_percent.filter(|p| *p != 0),
    ) else {
        return error_json(StatusCode::BAD_REQUEST, "user_id and discount_percent are required");
    };
    let (duration, months) = match validate_discount(&body) {
        Ok(d) => d,
        Err(resp) => return resp,
    };

    let stripe_id = match state.db.list_live_subscriptions(user_id) {
        Ok(subs) => subs
            .into_iter()
            .find(|s| !s.is_manual)
            .and_then(|s| s.stripe_subscription_id),
        Err(e) => return db_error("Failed to load subscription", e),
    };
    let Some(stripe_id) = stripe_id else {
        return error_json(StatusCode::NOT_FOUND, "No active subscription found for this user");
    };

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let name = format!("Admin discount for user {} - {}% off", user_id, percent);
    let metadata = [("applied_by_admin", admin.id.clone()), ("user_id", user_id.to_string())];
    let coupon_id = match stripe
        .create_discount_coupon(&DiscountCoupon {
            percent_off: percent,
            duration,
            duration_in_months: months,
            name: &name,
            metadata: &metadata,
        })
        .await
    {
        Ok(id) => id,
        Err(e) => return stripe_error(e),
    };
    if let Err(e) = stripe.apply_coupon(&stripe_id, &coupon_id).await {
        return stripe_error(e);
    }

    log::info!("Discount applied: {}% off {} for {}", percent, stripe_id, duration);
    record_activity(
        &state,
        &admin,
        "subscription_discount_applied",
        "user",
        Some(user_id),
        Some(format!("{}% {} coupon={}", percent, duration, coupon_id)),
    );
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Discount applied successfully",
        "coupon_id": coupon_id,
        "discount": {
            "percent_off": percent,
            "duration": duration,
            "duration_in_months": months,
        },
    }))
}

// -- coupons --

fn validate_coupon_request(body: &CreateCouponRequest) -> Result<CouponType, HttpResponse> {
    let (code, Some(raw_type)) = (body.code.trim(), body.coupon_type.as_deref()) else {
        return Err(error_json(StatusCode::BAD_REQUEST, "code, type and amount are required"));
    };
    if code.is_empty() {
        return Err(error_json(StatusCode::BAD_REQUEST, "code, type and amount are required"));
    }

    let coupon_type: CouponType = raw_type
        .parse()
        .map_err(|_| error_json(StatusCode::BAD_REQUEST, "type must be fixed_amount or percentage"))?;

    if body.amount <= 0 {
        return Err(error_json(StatusCode::BAD_REQUEST, "amount must be greater than 0"));
    }
    if coupon_type == CouponType::Percentage && body.amount > 100 {
        return Err(error_json(StatusCode::BAD_REQUEST, "Percentage discount cannot exceed 100"));
    }
    Ok(coupon_type)
}

async fn create_coupon(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<CreateCouponRequest>,
) -> impl Responder {
    let admin = match require_admin(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let coupon_type = match validate_coupon_request(&body) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let code = body.code.trim().to_uppercase();

    match state.db.get_coupon_by_code(&code) {
        Ok(Some(_)) => return error_json(StatusCode::CONFLICT, "Coupon code already exists"),
        Ok(None) => {}
        Err(e) => return db_error("Failed to check coupon code", e),
    }

    let currency = body.currency.as_deref().map(str::to_lowercase);
    let stripe_coupon_id = create_stripe_coupon(&state, &code, coupon_type, &body, currency.as_deref()).await;

    let new = NewCoupon {
        code: &code,
        stripe_coupon_id: stripe_coupon_id.as_deref(),
        coupon_type,
        amount: body.amount,
        currency: currency.as_deref(),
        valid_until: body.valid_until,
        max_redemptions: body.max_redemptions,
        applies_to_plans: &body.applies_to_plans,
        minimum_amount: body.minimum_amount,
        applies_once: body.applies_once,
        description: body.description.as_deref(),
        created_by: Some(&admin.id),
    };

    match state.db.create_coupon(&new) {
        Ok(coupon) => {
            record_activity(&state, &admin, "coupon_created", "coupon", Some(&coupon.id), Some(coupon.code.clone()));
            HttpResponse::Ok().json(serde_json::json!({ "success": true, "coupon": coupon }))
        }
        Err(e) => db_error("Failed to create coupon", e),
    }
}

/// Mirror the coupon in Stripe; the local row is created either way
async fn create_stripe_coupon(
    state: &AppState,
    code: &str,
    coupon_type: CouponType,
    body: &CreateCouponRequest,
    currency: Option<&str>,
) -> Option<String> {
    let Some(stripe) = state.stripe.as_deref() else {
        log::warn!("Stripe not configured; coupon {} created locally only", code);
        return None;
    };

    match stripe
        .create_coupon(code, coupon_type, body.amount, currency, body.max_redemptions, body.valid_until)
        .await
    {
        Ok(id) => Some(id),
        Err(e) => {
            log::warn!("Failed to create Stripe coupon {}: {}", code, e);
            None
        }
    }
}

async fn list_activity(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<ActivityQuery>,
) -> impl Responder {
    if let Err(resp) = require_admin(&state.db, &req) {
        return resp;
    }

    let limit = query.limit.unwrap_or(DEFAULT_ACTIVITY_LIMIT).clamp(1, 1000);
    match state.db.list_activity(None, limit) {
        Ok(logs) => HttpResponse::Ok().json(serde_json::json!({ "logs": logs })),
        Err(e) => db_error("Failed to list activity", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, app_state_with_stripe, seed_user};
    use crate::models::UserRole;
    use actix_web::{test, App};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[actix_web::test]
    async fn test_admin_routes_reject_anonymous_and_non_admins() {
        let state = app_state();
        let (_, user_auth) = seed_user(&state.db, "user@example.com", UserRole::User);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/admin/users").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/admin/users")
            .insert_header(("Authorization", user_auth.clone()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Admin access required");

        let req = test::TestRequest::post()
            .uri("/api/admin/coupons")
            .insert_header(("Authorization", user_auth.clone()))
            .set_json(json!({ "code": "X", "type": "percentage", "amount": 10 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        // check is open to any signed-in user
        let req = test::TestRequest::get()
            .uri("/api/admin/check")
            .insert_header(("Authorization", user_auth))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["is_admin_overall"], false);
        assert_eq!(body["user_role"], "user");
    }

    #[actix_web::test]
    async fn test_coupon_creation_rules() {
        let state = app_state();
        let (_, admin_auth) = seed_user(&state.db, "admin@example.com", UserRole::Admin);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        for (payload, expected) in [
            (json!({ "code": "", "type": "percentage", "amount": 10 }), StatusCode::BAD_REQUEST),
            (json!({ "code": "A", "type": "bogus", "amount": 10 }), StatusCode::BAD_REQUEST),
            (json!({ "code": "A", "type": "percentage", "amount": 0 }), StatusCode::BAD_REQUEST),
            (json!({ "code": "A", "type": "percentage", "amount": 150 }), StatusCode::BAD_REQUEST),
            (json!({ "code": "spring", "type": "percentage", "amount": 20 }), StatusCode::OK),
            (json!({ "code": "SPRING", "type": "fixed_amount", "amount": 500 }), StatusCode::CONFLICT),
        ] {
            let req = test::TestRequest::post()
                .uri("/api/admin/coupons")
                .insert_header(("Authorization", admin_auth.clone()))
                .set_json(payload)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected);
        }
    }

    #[actix_web::test]
    async fn test_manual_assignment_replaces_live_subscription() {
        let state = app_state();
        let (admin, admin_auth) = seed_user(&state.db, "admin@example.com", UserRole::Admin);
        let (user, _) = seed_user(&state.db, "user@example.com", UserRole::User);
        let plan = state
            .db
            .create_plan("Pro", None, 1900, "usd", BillingInterval::Month, 0, &[], None, None)
            .unwrap();
        let old = state
            .db
            .create_subscription(&NewSubscription {
                user_id: user.id.clone(),
                plan_id: Some(plan.id.clone()),
                stripe_subscription_id: None,
                status: SubscriptionStatus::Active,
                is_manual: true,
                interval: None,
                amount: None,
                currency: None,
                current_period_start: None,
                current_period_end: None,
                assigned_by: Some(admin.email.clone()),
            })
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/admin/subscriptions/assign")
            .insert_header(("Authorization", admin_auth))
            .set_json(json!({ "user_id": user.id, "plan_id": plan.id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["subscription"]["is_manual"], true);
        assert_eq!(body["subscription"]["interval"], "lifetime");

        assert_eq!(db.get_subscription(&old.id).unwrap().unwrap().status, SubscriptionStatus::Canceled);
        assert_eq!(db.list_live_subscriptions(&user.id).unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_delete_unknown_plan_is_404() {
        let state = app_state();
        let (_, admin_auth) = seed_user(&state.db, "admin@example.com", UserRole::Admin);
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/admin/plans/delete")
            .insert_header(("Authorization", admin_auth))
            .set_json(json!({ "plan_id": "missing" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_subscription_discount() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/coupons"))
            .and(body_string_contains("percent_off=30"))
            .and(body_string_contains("duration=repeating"))
            .and(body_string_contains("duration_in_months=3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "co_admin" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/subscriptions/sub_1"))
            .and(body_string_contains("coupon=co_admin"))
            .and(body_string_contains("proration_behavior=none"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "sub_1", "status": "active" })))
            .expect(1)
            .mount(&server)
            .await;

        let state = app_state_with_stripe(&server.uri());
        let (_, admin_auth) = seed_user(&state.db, "admin@example.com", UserRole::Admin);
        let (user, _) = seed_user(&state.db, "user@example.com", UserRole::User);
        let (idle, _) = seed_user(&state.db, "idle@example.com", UserRole::User);
        state
            .db
            .create_subscription(&NewSubscription {
                user_id: user.id.clone(),
                plan_id: None,
                stripe_subscription_id: Some("sub_1".to_string()),
                status: SubscriptionStatus::Active,
                is_manual: false,
                interval: None,
                amount: None,
                currency: None,
                current_period_start: None,
                current_period_end: None,
                assigned_by: None,
            })
            .unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let cases = [
            (json!({ "user_id": user.id }), "user_id and discount_percent are required"),
            (json!({ "user_id": user.id, "discount_percent": 150, "duration_type": "once" }), "discount_percent must be between 0 and 100"),
            (json!({ "user_id": user.id, "discount_percent": 30, "duration_type": "weekly" }), "duration_type must be one of: once, repeating, forever"),
            (json!({ "user_id": user.id, "discount_percent": 30, "duration_type": "repeating" }), "duration_months is required and must be >= 1 for repeating discounts"),
        ];
        for (payload, message) in cases {
            let req = test::TestRequest::post()
                .uri("/api/admin/subscriptions/discount")
                .insert_header(("Authorization", admin_auth.clone()))
                .set_json(&payload)
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = test::read_body_json(resp).await;
            assert_eq!(body["error"], message);
        }

        let req = test::TestRequest::post()
            .uri("/api/admin/subscriptions/discount")
            .insert_header(("Authorization", admin_auth.clone()))
            .set_json(json!({ "user_id": idle.id, "discount_percent": 30, "duration_type": "once" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/api/admin/subscriptions/discount")
            .insert_header(("Authorization", admin_auth))
            .set_json(json!({
                "user_id": user.id, "discount_percent": 30,
                "duration_type": "repeating", "duration_months": 3
            }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["coupon_id"], "co_admin");
        assert_eq!(body["discount"]["duration_in_months"], 3);
    }
}
