use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};
use chrono::Utc;
use serde::Deserialize;

use crate::controllers::{db_error, error_json, record_activity, stripe_client, stripe_error};
use crate::integrations::stripe::from_unix;
use crate::integrations::{StripeClient, StripeError};
use crate::middleware::session_auth::authenticate;
use crate::models::{Coupon, CouponRejection, User, ValidateCouponRequest, MAX_COUPON_AMOUNT};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/billing")
            .route("/customer", web::post().to(create_customer))
            .route("/coupons/validate", web::post().to(validate_coupon))
            .route("/invoices", web::get().to(list_invoices))
            .route("/upcoming-invoice", web::get().to(upcoming_invoice))
            .route("/payment-methods", web::get().to(list_payment_methods))
            .route("/payment-methods/default", web::post().to(set_default_payment_method))
            .route("/payment-methods/delete", web::post().to(delete_payment_method))
            .route("/setup-intent", web::post().to(create_setup_intent))
            .route("/setup-intent/confirm", web::post().to(confirm_setup_intent)),
    );
}

#[derive(Debug, Deserialize)]
pub struct PaymentMethodRequest {
    #[serde(default)]
    payment_method_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmSetupIntentRequest {
    #[serde(default)]
    setup_intent_id: Option<String>,
}

fn rejection_response(rejection: CouponRejection) -> HttpResponse {
    let status = StatusCode::from_u16(rejection.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    HttpResponse::build(status).json(serde_json::json!({
        "valid": false,
        "error": rejection.message(),
    }))
}

/// Run every redemption check, in order, for `user` redeeming `code`
pub(crate) fn evaluate_coupon(
    state: &AppState,
    user: &User,
    code: &str,
    plan_id: Option<&str>,
    subscription_id: Option<&str>,
    amount: Option<i64>,
) -> Result<Coupon, HttpResponse> {
    let coupon = match state.db.get_coupon_by_code(code) {
        Ok(Some(c)) => c,
        Ok(None) => {
            return Err(HttpResponse::NotFound().json(serde_json::json!({
                "valid": false,
                "error": "Coupon not found",
            })));
        }
        Err(e) => return Err(db_error("Failed to load coupon", e)),
    };

    coupon.check_availability(Utc::now()).map_err(rejection_response)?;

    // the subscription's plan stands in for a missing plan_id
    let mut plan_id = plan_id.map(String::from);
    if let Some(sub_id) = subscription_id {
        match state.db.get_subscription(sub_id) {
            Ok(Some(sub)) if sub.user_id == user.id => {
                plan_id = plan_id.or(sub.plan_id);
            }
            Ok(_) => return Err(error_json(StatusCode::NOT_FOUND, "Subscription not found")),
            Err(e) => return Err(db_error("Failed to load subscription", e)),
        }
    }

    coupon.check_plan(plan_id.as_deref()).map_err(rejection_response)?;
    coupon.check_minimum(amount).map_err(rejection_response)?;

    if coupon.applies_once {
        match state.db.has_used_coupon(&coupon.id, &user.id) {
            Ok(true) => return Err(rejection_response(CouponRejection::AlreadyUsed)),
            Ok(false) => {}
            Err(e) => return Err(db_error("Failed to check coupon usage", e)),
        }
    }

    Ok(coupon)
}

async fn validate_coupon(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ValidateCouponRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let code = body.code.trim();
    if code.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Coupon code is required");
    }
    if body.amount.is_some_and(|a| !(0..=MAX_COUPON_AMOUNT).contains(&a)) {
        return error_json(StatusCode::BAD_REQUEST, "Amount is out of range");
    }

    match evaluate_coupon(
        &state,
        &user,
        code,
        body.plan_id.as_deref(),
        body.subscription_id.as_deref(),
        body.amount,
    ) {
        Ok(coupon) => {
            let discount = coupon.discount_for(body.amount);
            HttpResponse::Ok().json(serde_json::json!({
                "valid": true,
                "coupon": {
                    "id": coupon.id,
                    "code": coupon.code,
                    "type": coupon.coupon_type,
                    "amount": coupon.amount,
                    "currency": coupon.currency,
                    "description": coupon.description,
                    "applies_once": coupon.applies_once,
                },
                "discount": discount,
            }))
        }
        Err(resp) => resp,
    }
}

/// Idempotent: an existing customer id is returned as-is
async fn create_customer(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if let Some(customer_id) = &user.stripe_customer_id {
        return HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "customer_id": customer_id,
            "existing": true,
        }));
    }

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let customer_id = match stripe
        .find_or_create_customer(&user.email, user.full_name.as_deref(), &user.id)
        .await
    {
        Ok(id) => id,
        Err(e) => return stripe_error(e),
    };

    if let Err(e) = state.db.set_stripe_customer_id(&user.id, &customer_id) {
        log::error!("Stripe customer {} created but not linked to {}", customer_id, user.id);
        return db_error("Failed to store Stripe customer", e);
    }

    record_activity(&state, &user, "stripe_customer_created", "user", Some(&user.id), Some(customer_id.clone()));
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "customer_id": customer_id,
        "existing": false,
    }))
}

async fn list_invoices(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.list_invoices_for_user(&user.id) {
        Ok(invoices) => HttpResponse::Ok().json(serde_json::json!({ "invoices": invoices })),
        Err(e) => db_error("Failed to list invoices", e),
    }
}

async fn upcoming_invoice(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let stripe_id = match state.db.list_live_subscriptions(&user.id) {
        Ok(subs) => subs.into_iter().find_map(|s| s.stripe_subscription_id),
        Err(e) => return db_error("Failed to load subscription", e),
    };
    let Some(stripe_id) = stripe_id else {
        return error_json(StatusCode::NOT_FOUND, "User does not have an active subscription");
    };

    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let invoice = match stripe.upcoming_invoice(&stripe_id).await {
        Ok(invoice) => invoice,
        Err(StripeError::Api { status: 404, .. }) => {
            return error_json(StatusCode::NOT_FOUND, "No upcoming invoices found");
        }
        Err(e) => return stripe_error(e),
    };

    let charge_at = invoice.charge_at();
    let message = match charge_at {
        Some(at) => format!(
            "You will be charged {} on {}",
            format_amount(invoice.amount_due, invoice.currency.as_deref()),
            at.format("%Y-%m-%d")
        ),
        None => "No charge date scheduled".to_string(),
    };

    HttpResponse::Ok().json(serde_json::json!({
        "id": invoice.id,
        "subscription_id": invoice.subscription.as_deref().unwrap_or(&stripe_id),
        "customer_id": invoice.customer,
        "status": invoice.status,
        "period_start": invoice.period_start.and_then(from_unix),
        "period_end": invoice.period_end.and_then(from_unix),
        "amount_due": invoice.amount_due,
        "amount_paid": invoice.amount_paid,
        "currency": invoice.currency,
        "due_date": invoice.due_date.and_then(from_unix),
        "next_payment_attempt": invoice.next_payment_attempt.and_then(from_unix),
        "lines": invoice
            .lines
            .as_ref()
            .and_then(|l| l.get("data"))
            .cloned()
            .unwrap_or_else(|| serde_json::json!([])),
        "metadata": {
            "message": message,
            "will_be_charged": invoice.amount_due > 0,
        },
    }))
}

/// Minor units to a display string, e.g. `19.00 USD`
fn format_amount(amount: i64, currency: Option<&str>) -> String {
    let currency = currency.unwrap_or("usd").to_uppercase();
    format!("{}.{:02} {}", amount / 100, (amount % 100).abs(), currency)
}

// -- payment methods --

async fn list_payment_methods(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(customer_id) = user.stripe_customer_id.as_deref() else {
        return error_json(StatusCode::NOT_FOUND, "No Stripe customer found");
    };
    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let (methods, customer) = match tokio::try_join!(
        stripe.list_payment_methods(customer_id),
        stripe.retrieve_customer(customer_id)
    ) {
        Ok(pair) => pair,
        Err(e) => return stripe_error(e),
    };
    let default_id = customer.default_payment_method();

    let payment_methods: Vec<serde_json::Value> = methods
        .iter()
        .map(|pm| {
            serde_json::json!({
                "id": pm.id,
                "type": pm.method_type,
                "card": pm.card,
                "billing_details": pm.billing_details,
                "created": from_unix(pm.created),
                "is_default": Some(pm.id.as_str()) == default_id,
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "total": payment_methods.len(),
        "payment_methods": payment_methods,
        "default_payment_method": default_id,
    }))
}

/// Loads the payment method and checks it is attached to `customer_id`
async fn owned_payment_method(
    stripe: &StripeClient,
    customer_id: &str,
    payment_method_id: &str,
) -> Result<(), HttpResponse> {
    let pm = stripe.retrieve_payment_method(payment_method_id).await.map_err(stripe_error)?;
    if pm.customer.as_deref() != Some(customer_id) {
        return Err(error_json(StatusCode::FORBIDDEN, "Payment method does not belong to this customer"));
    }
    Ok(())
}

async fn set_default_payment_method(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<PaymentMethodRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(pm_id) = body.payment_method_id.as_deref().filter(|id| !id.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "payment_method_id is required");
    };
    let Some(customer_id) = user.stripe_customer_id.as_deref() else {
        return error_json(StatusCode::NOT_FOUND, "No Stripe customer found");
    };
    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    if let Err(resp) = owned_payment_method(stripe, customer_id, pm_id).await {
        return resp;
    }
    if let Err(e) = stripe.set_default_payment_method(customer_id, pm_id).await {
        return stripe_error(e);
    }

    record_activity(&state, &user, "default_payment_method_set", "user", Some(&user.id), Some(pm_id.to_string()));
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Default payment method updated successfully",
        "payment_method_id": pm_id,
    }))
}

async fn delete_payment_method(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<PaymentMethodRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(pm_id) = body.payment_method_id.as_deref().filter(|id| !id.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "payment_method_id is required");
    };
    let Some(customer_id) = user.stripe_customer_id.as_deref() else {
        return error_json(StatusCode::BAD_REQUEST, "User does not have a Stripe customer account");
    };
    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    if let Err(resp) = owned_payment_method(stripe, customer_id, pm_id).await {
        return resp;
    }

    // a subscription's own default card cannot be removed out from under it
    match stripe.list_active_subscriptions(customer_id).await {
        Ok(subs) if subs.iter().any(|s| s.default_payment_method.as_deref() == Some(pm_id)) => {
            return error_json(
                StatusCode::BAD_REQUEST,
                "Cannot delete default payment method. Please set another payment method as default first.",
            );
        }
        Ok(_) => {}
        Err(e) => return stripe_error(e),
    }

    if let Err(e) = stripe.detach_payment_method(pm_id).await {
        return stripe_error(e);
    }

    record_activity(&state, &user, "payment_method_deleted", "user", Some(&user.id), Some(pm_id.to_string()));
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "payment_method_id": pm_id,
        "message": "Payment method deleted successfully",
    }))
}

// -- setup intents --

/// Starts card collection; creates the Stripe customer on first use
async fn create_setup_intent(state: web::Data<AppState>, req: HttpRequest) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let customer_id = match &user.stripe_customer_id {
        Some(id) => id.clone(),
        None => {
            let id = match stripe
                .find_or_create_customer(&user.email, user.full_name.as_deref(), &user.id)
                .await
            {
                Ok(id) => id,
                Err(e) => return stripe_error(e),
            };
            if let Err(e) = state.db.set_stripe_customer_id(&user.id, &id) {
                return db_error("Failed to store Stripe customer", e);
            }
            id
        }
    };

    match stripe.create_setup_intent(&customer_id).await {
        Ok(intent) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "client_secret": intent.client_secret,
            "customer_id": customer_id,
        })),
        Err(e) => stripe_error(e),
    }
}

async fn confirm_setup_intent(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ConfirmSetupIntentRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(intent_id) = body.setup_intent_id.as_deref().filter(|id| !id.is_empty()) else {
        return error_json(StatusCode::BAD_REQUEST, "setup_intent_id is required");
    };
    let stripe = match stripe_client(&state) {
        Ok(s) => s,
        Err(resp) => return resp,
    };

    let intent = match stripe.retrieve_setup_intent(intent_id).await {
        Ok(intent) => intent,
        Err(e) => return stripe_error(e),
    };
    if intent.status != "succeeded" {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": format!("Setup failed: {}", intent.status),
            "status": intent.status,
        }));
    }
    let Some(pm_id) = intent.payment_method.as_deref() else {
        return error_json(StatusCode::BAD_REQUEST, "No payment method attached to SetupIntent");
    };
    let Some(customer_id) = user.stripe_customer_id.as_deref() else {
        return error_json(StatusCode::BAD_REQUEST, "User has no Stripe customer");
    };

    let pm = match stripe.retrieve_payment_method(pm_id).await {
        Ok(pm) => pm,
        Err(e) => return stripe_error(e),
    };
    if pm.customer.as_deref() != Some(customer_id) {
        return error_json(StatusCode::FORBIDDEN, "Payment method does not belong to this customer");
    }

    record_activity(&state, &user, "payment_method_added", "user", Some(&user.id), Some(pm.id.clone()));
    let card = pm.card.unwrap_or_default();
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Payment method added successfully",
        "payment_method": {
            "id": pm.id,
            "brand": card.brand,
            "last4": card.last4,
            "exp_month": card.exp_month,
            "exp_year": card.exp_year,
        },
    }))
}
