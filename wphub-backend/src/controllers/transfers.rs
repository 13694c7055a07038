//! Site ownership transfers
//!
//! A request is an open `site_transfer_request` message addressed to the
//! site's owner (the team owner for team sites). At most one request per
//! site may be open at a time.

use actix_web::{http::StatusCode, web, HttpRequest, HttpResponse, Responder};

use crate::controllers::{db_error, error_json, record_activity};
use crate::middleware::session_auth::authenticate;
use crate::models::{
    remove_installation, HandleTransferRequest, Message, MessageCategory, MessageStatus, NewMessage, NonTransferAction,
    NotificationType, OwnerType, Plugin, Priority, Site, SiteIdRequest, TransferAction, TransferContext,
    TransferRequest, User,
};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/transfers")
            .route("/request", web::post().to(request_transfer))
            .route("/handle", web::post().to(handle_transfer))
            .route("/decline", web::post().to(decline_transfer)),
    );
}

/// Plain message from `sender`; delivery failures are logged, not surfaced
fn send_message(
    state: &AppState,
    sender: &User,
    recipient_id: &str,
    recipient_email: &str,
    subject: String,
    body: String,
    priority: Priority,
) {
    let new = NewMessage {
        subject,
        message: body,
        sender_id: Some(sender.id.clone()),
        sender_email: Some(sender.email.clone()),
        sender_name: Some(sender.display_name().to_string()),
        recipient_id: recipient_id.to_string(),
        recipient_email: recipient_email.to_string(),
        priority,
        category: MessageCategory::General,
        context: None,
    };
    if let Err(e) = state.db.create_message(&new) {
        log::warn!("[TRANSFER] Failed to message {}: {}", recipient_email, e);
    }
}

fn notify(state: &AppState, recipient_id: &str, recipient_email: &str, title: &str, body: &str) {
    if let Err(e) = state
        .db
        .create_notification(recipient_id, recipient_email, title, body, NotificationType::Warning)
    {
        log::warn!("[TRANSFER] Failed to notify {}: {}", recipient_email, e);
    }
}

/// The person who answers for a site: its user owner, or the owning team's owner
fn resolve_site_owner(state: &AppState, site: &Site) -> rusqlite::Result<Option<User>> {
    let owner_id = match site.owner_type {
        OwnerType::User => site.owner_id.clone(),
        OwnerType::Team => match state.db.get_team(&site.owner_id)? {
            Some(team) => team.owner_id,
            None => return Ok(None),
        },
    };
    state.db.get_user(&owner_id)
}

async fn request_transfer(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<TransferRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let lookup = match (&body.site_id, &body.site_url) {
        (Some(id), _) if !id.is_empty() => state.db.get_site(id),
        (_, Some(url)) if !url.is_empty() => state.db.get_site_by_url(url),
        _ => return error_json(StatusCode::BAD_REQUEST, "site_id or site_url is required"),
    };
    let site = match lookup {
        Ok(Some(s)) => s,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Site not found"),
        Err(e) => return db_error("Failed to load site", e),
    };

    if site.is_owned_by_user(&user.id) {
        return error_json(StatusCode::BAD_REQUEST, "You already own this site");
    }

    match state.db.find_open_transfer_request(&site.id) {
        Ok(Some(_)) => {
            return error_json(StatusCode::CONFLICT, "A transfer request is already pending for this site");
        }
        Ok(None) => {}
        Err(e) => return db_error("Failed to check pending transfers", e),
    }

    let owner = match resolve_site_owner(&state, &site) {
        Ok(Some(o)) => o,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Site owner not found"),
        Err(e) => return db_error("Failed to load site owner", e),
    };

    let context = TransferContext {
        site_id: site.id.clone(),
        site_name: site.name.clone(),
        site_url: site.url.clone(),
        requesting_user_id: user.id.clone(),
        requesting_user_name: user.display_name().to_string(),
        requesting_user_email: user.email.clone(),
        current_owner_id: site.owner_id.clone(),
        current_owner_type: site.owner_type.to_string(),
    };
    let context = match serde_json::to_value(&context) {
        Ok(v) => v,
        Err(e) => return db_error("Failed to encode transfer context", e),
    };

    let message = match state.db.create_message(&NewMessage {
        subject: format!("Transfer request for site: {}", site.name),
        message: format!(
            "{} ({}) requests ownership of the site \"{}\" ({}). Accept to start the transfer or reject to decline it.",
            user.display_name(),
            user.email,
            site.name,
            site.url
        ),
        sender_id: Some(user.id.clone()),
        sender_email: Some(user.email.clone()),
        sender_name: Some(user.display_name().to_string()),
        recipient_id: owner.id.clone(),
        recipient_email: owner.email.clone(),
        priority: Priority::High,
        category: MessageCategory::SiteTransferRequest,
        context: Some(context),
    }) {
        Ok(m) => m,
        Err(e) => return db_error("Failed to create transfer request", e),
    };

    notify(
        &state,
        &owner.id,
        &owner.email,
        &format!("Transfer request for site: {}", site.name),
        &format!(
            "{} requests ownership of your site \"{}\". Check your messages for details.",
            user.display_name(),
            site.name
        ),
    );
    record_activity(
        &state,
        &user,
        "site_transfer_requested",
        "site",
        Some(&site.id),
        Some(format!("Request sent to {}", owner.email)),
    );
    log::info!("[TRANSFER] {} requested site {} from {}", user.email, site.id, owner.email);

    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Transfer request sent",
        "message_id": message.id,
    }))
}

/// Resolve an open request as rejected and tell the requester
fn reject(state: &AppState, user: &User, message: &Message, ctx: &TransferContext, action: &str) -> HttpResponse {
    if let Err(e) = state.db.resolve_message(&message.id) {
        return db_error("Failed to resolve transfer request", e);
    }

    let subject = format!("Transfer request rejected: {}", ctx.site_name);
    send_message(
        state,
        user,
        &ctx.requesting_user_id,
        &ctx.requesting_user_email,
        subject.clone(),
        format!(
            "Your transfer request for site \"{}\" was rejected by {}.",
            ctx.site_name,
            user.display_name()
        ),
        Priority::Normal,
    );
    notify(
        state,
        &ctx.requesting_user_id,
        &ctx.requesting_user_email,
        &subject,
        &format!("Your transfer request for \"{}\" was rejected.", ctx.site_name),
    );
    record_activity(
        state,
        user,
        action,
        "site",
        Some(&ctx.site_id),
        Some(format!("Request from {} rejected", ctx.requesting_user_email)),
    );

    HttpResponse::Ok().json(serde_json::json!({ "success": true, "message": "Transfer request rejected" }))
}

/// Plugins chosen to move with the site. Each must exist, belong to the site's
/// owner and be installed on this site alone (or nowhere).
fn validate_transfer_plugins(
    state: &AppState,
    site: &Site,
    ids: &[String],
) -> rusqlite::Result<Result<Vec<Plugin>, Vec<String>>> {
    let mut plugins = Vec::new();
    let mut errors = Vec::new();
    for id in ids {
        match state.db.get_plugin(id)? {
            None => errors.push(format!("Plugin with ID {} not found", id)),
            Some(p) if p.owner_type != site.owner_type || p.owner_id != site.owner_id => {
                errors.push(format!("Plugin \"{}\" does not belong to the site owner", p.name))
            }
            Some(p) if p.installed_on.len() > 1 => errors.push(format!(
                "Plugin \"{}\" is installed on multiple sites and cannot be transferred",
                p.name
            )),
            Some(p) if !p.installed_on.is_empty() && !p.is_installed_on(&site.id) => {
                errors.push(format!("Plugin \"{}\" is installed on another site", p.name))
            }
            Some(p) => plugins.push(p),
        }
    }
    Ok(if errors.is_empty() { Ok(plugins) } else { Err(errors) })
}

async fn handle_transfer(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<HandleTransferRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let message = match state.db.get_message(&body.message_id) {
        Ok(Some(m)) => m,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Transfer request not found"),
        Err(e) => return db_error("Failed to load message", e),
    };
    let Some(ctx) = message.transfer_context() else {
        return error_json(StatusCode::NOT_FOUND, "Transfer request not found");
    };
    if message.status != MessageStatus::Open {
        return error_json(StatusCode::BAD_REQUEST, "This transfer request has already been handled");
    }
    if message.recipient_id != user.id {
        return error_json(StatusCode::FORBIDDEN, "You are not allowed to handle this request");
    }

    let site = match state.db.get_site(&ctx.site_id) {
        Ok(Some(s)) => s,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Site or requesting user not found"),
        Err(e) => return db_error("Failed to load site", e),
    };
    let requester = match state.db.get_user(&ctx.requesting_user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Site or requesting user not found"),
        Err(e) => return db_error("Failed to load requesting user", e),
    };

    if body.action == TransferAction::Reject {
        return reject(&state, &user, &message, &ctx, "site_transfer_rejected");
    }

    let to_transfer = match validate_transfer_plugins(&state, &site, &body.transfer_plugins) {
        Ok(Ok(p)) => p,
        Ok(Err(errors)) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "error": "Validation errors",
                "errors": errors,
            }));
        }
        Err(e) => return db_error("Failed to load plugins", e),
    };

    let to_disconnect: Vec<Plugin> = match state.db.list_plugins_installed_on(&site.id) {
        Ok(installed) => installed
            .into_iter()
            .filter(|p| !body.transfer_plugins.contains(&p.id))
            .collect(),
        Err(e) => return db_error("Failed to load site plugins", e),
    };

    if let Err(e) = state.db.transfer_site(&site.id, &requester.id) {
        return db_error("Failed to transfer site", e);
    }
    for plugin in &to_transfer {
        if let Err(e) = state.db.set_plugin_owner(&plugin.id, OwnerType::User, &requester.id) {
            return db_error("Failed to transfer plugin ownership", e);
        }
    }

    let mut site = site;
    for plugin in &to_disconnect {
        let mut installed_on = plugin.installed_on.clone();
        if remove_installation(&mut installed_on, &site.id) {
            if let Err(e) = state.db.save_plugin_installations(&plugin.id, &installed_on) {
                return db_error("Failed to disconnect plugin", e);
            }
        }

        if body.non_transfer_action == NonTransferAction::Uninstall {
            match state.connector.uninstall_plugin(&site, &plugin.slug).await {
                Ok(_) => {
                    site.remove_plugin(&plugin.slug);
                }
                Err(e) => log::warn!("[TRANSFER] Uninstall of {} on {} failed: {}", plugin.slug, site.url, e),
            }
        }
    }
    if body.non_transfer_action == NonTransferAction::Uninstall {
        if let Err(e) = state.db.save_site_plugins(&site.id, &site.plugins) {
            log::warn!("[TRANSFER] Failed to store plugin list for {}: {}", site.id, e);
        }
    }

    if let Err(e) = state.db.resolve_message(&message.id) {
        return db_error("Failed to resolve transfer request", e);
    }

    let names = |plugins: &[Plugin]| plugins.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
    let mut requester_body = format!(
        "{} accepted your transfer request. The site \"{}\" is now yours.",
        user.display_name(),
        site.name
    );
    let mut owner_body = format!(
        "You transferred the site \"{}\" to {}.",
        site.name,
        requester.display_name()
    );
    if !to_transfer.is_empty() {
        let line = format!("\n\nPlugins transferred with the site: {}", names(&to_transfer));
        requester_body.push_str(&line);
        owner_body.push_str(&line);
    }
    if !to_disconnect.is_empty() {
        owner_body.push_str(&format!("\n\nPlugins disconnected from the site: {}", names(&to_disconnect)));
    }

    send_message(
        &state,
        &user,
        &requester.id,
        &requester.email,
        format!("Site transferred to you: {}", site.name),
        requester_body,
        Priority::High,
    );
    send_message(
        &state,
        &user,
        &user.id,
        &user.email,
        format!("Site transferred: {}", site.name),
        owner_body,
        Priority::Normal,
    );
    record_activity(
        &state,
        &user,
        "site_transferred",
        "site",
        Some(&site.id),
        Some(format!(
            "Transferred to {}; {} plugin(s) transferred, {} disconnected",
            requester.email,
            to_transfer.len(),
            to_disconnect.len()
        )),
    );
    log::info!("[TRANSFER] Site {} moved from {} to {}", site.id, user.email, requester.email);

    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Site transferred",
        "transferred_plugins": to_transfer.len(),
        "disconnected_plugins": to_disconnect.len(),
    }))
}

/// Site-centric reject for owners who start from the site page
async fn decline_transfer(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<SiteIdRequest>,
) -> impl Responder {
    let user = match authenticate(&state.db, &req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.db.get_site(&body.site_id) {
        Ok(Some(_)) => {}
        Ok(None) => return error_json(StatusCode::NOT_FOUND, "Site not found"),
        Err(e) => return db_error("Failed to load site", e),
    }

    let message = match state.db.find_open_transfer_request(&body.site_id) {
        Ok(Some(m)) => m,
        Ok(None) => return error_json(StatusCode::BAD_REQUEST, "No pending transfer request for this site"),
        Err(e) => return db_error("Failed to load transfer request", e),
    };
    if message.recipient_id != user.id {
        return error_json(StatusCode::FORBIDDEN, "You are not allowed to handle this request");
    }
    let Some(ctx) = message.transfer_context() else {
        return db_error("Failed to read transfer request", "missing context");
    };

    reject(&state, &user, &message, &ctx, "site_transfer_declined")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controllers::test_support::{app_state, seed_user};
    use crate::models::{add_installation, CreatePluginRequest, UserRole};
    use actix_web::{test, App};
    use serde_json::json;

    fn plugin_request(slug: &str) -> CreatePluginRequest {
        CreatePluginRequest {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            description: None,
            is_public: false,
            latest_version: None,
            download_url: None,
        }
    }

    #[actix_web::test]
    async fn test_second_pending_request_conflicts() {
        let state = app_state();
        let (owner, _) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let (_, alice) = seed_user(&state.db, "alice@example.com", UserRole::User);
        let (_, bob) = seed_user(&state.db, "bob@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", "https://blog.example", "key", OwnerType::User, &owner.id)
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/transfers/request")
            .insert_header(("Authorization", alice))
            .set_json(json!({ "site_url": "https://blog.example/" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);

        let req = test::TestRequest::post()
            .uri("/api/transfers/request")
            .insert_header(("Authorization", bob))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let inbox = db.list_inbox(&owner.id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].category, MessageCategory::SiteTransferRequest);
        assert_eq!(db.list_notifications(&owner.id).unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn test_request_validation() {
        let state = app_state();
        let (owner, auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", "https://blog.example", "key", OwnerType::User, &owner.id)
            .unwrap();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let cases = [
            (json!({}), StatusCode::BAD_REQUEST),
            (json!({ "site_id": "missing" }), StatusCode::NOT_FOUND),
            (json!({ "site_id": site.id }), StatusCode::BAD_REQUEST),
        ];
        for (payload, expected) in cases {
            let req = test::TestRequest::post()
                .uri("/api/transfers/request")
                .insert_header(("Authorization", auth.clone()))
                .set_json(&payload)
                .to_request();
            assert_eq!(test::call_service(&app, req).await.status(), expected, "payload {}", payload);
        }
    }

    #[actix_web::test]
    async fn test_accept_moves_site_and_selected_plugins() {
        let state = app_state();
        let (owner, owner_auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let (alice, alice_auth) = seed_user(&state.db, "alice@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", "https://blog.example", "key", OwnerType::User, &owner.id)
            .unwrap();
        let other_site = state
            .db
            .create_site("Shop", "https://shop.example", "key2", OwnerType::User, &owner.id)
            .unwrap();

        let mut seo = state.db.create_plugin(&plugin_request("seo"), &owner.id).unwrap();
        add_installation(&mut seo.installed_on, &site.id, None);
        state.db.save_plugin_installations(&seo.id, &seo.installed_on).unwrap();

        let mut cache = state.db.create_plugin(&plugin_request("cache"), &owner.id).unwrap();
        add_installation(&mut cache.installed_on, &site.id, None);
        add_installation(&mut cache.installed_on, &other_site.id, None);
        state.db.save_plugin_installations(&cache.id, &cache.installed_on).unwrap();

        let mut shop_only = state.db.create_plugin(&plugin_request("shop-tools"), &owner.id).unwrap();
        add_installation(&mut shop_only.installed_on, &other_site.id, None);
        state.db.save_plugin_installations(&shop_only.id, &shop_only.installed_on).unwrap();

        let (stranger, _) = seed_user(&state.db, "stranger@example.com", UserRole::User);
        let foreign = state.db.create_plugin(&plugin_request("foreign"), &stranger.id).unwrap();

        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/transfers/request")
            .insert_header(("Authorization", alice_auth.clone()))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        let message_id = body["message_id"].as_str().unwrap().to_string();

        // only the recipient may answer
        let req = test::TestRequest::post()
            .uri("/api/transfers/handle")
            .insert_header(("Authorization", alice_auth))
            .set_json(json!({ "message_id": message_id, "action": "accept" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        // cache lives on two sites, shop-tools on another site, foreign is someone else's
        let req = test::TestRequest::post()
            .uri("/api/transfers/handle")
            .insert_header(("Authorization", owner_auth.clone()))
            .set_json(json!({
                "message_id": message_id,
                "action": "accept",
                "transfer_plugins": [cache.id, "ghost", shop_only.id, foreign.id]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["errors"].as_array().unwrap().len(), 4);
        assert_eq!(db.get_plugin(&foreign.id).unwrap().unwrap().owner_id, stranger.id);
        assert!(db.get_site(&site.id).unwrap().unwrap().is_owned_by_user(&owner.id));

        let req = test::TestRequest::post()
            .uri("/api/transfers/handle")
            .insert_header(("Authorization", owner_auth.clone()))
            .set_json(json!({ "message_id": message_id, "action": "accept", "transfer_plugins": [seo.id] }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["transferred_plugins"], 1);
        assert_eq!(body["disconnected_plugins"], 1);

        assert!(db.get_site(&site.id).unwrap().unwrap().is_owned_by_user(&alice.id));
        assert_eq!(db.get_plugin(&seo.id).unwrap().unwrap().owner_id, alice.id);
        let cache = db.get_plugin(&cache.id).unwrap().unwrap();
        assert_eq!(cache.owner_id, owner.id);
        assert!(!cache.is_installed_on(&site.id));
        assert!(cache.is_installed_on(&other_site.id));
        assert_eq!(db.get_message(&message_id).unwrap().unwrap().status, MessageStatus::Resolved);
        assert_eq!(db.list_inbox(&alice.id).unwrap().len(), 1);

        let req = test::TestRequest::post()
            .uri("/api/transfers/handle")
            .insert_header(("Authorization", owner_auth))
            .set_json(json!({ "message_id": message_id, "action": "reject" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_decline_resolves_request_and_allows_a_new_one() {
        let state = app_state();
        let (owner, owner_auth) = seed_user(&state.db, "owner@example.com", UserRole::User);
        let (alice, alice_auth) = seed_user(&state.db, "alice@example.com", UserRole::User);
        let site = state
            .db
            .create_site("Blog", "https://blog.example", "key", OwnerType::User, &owner.id)
            .unwrap();
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

        let request = || {
            test::TestRequest::post()
                .uri("/api/transfers/request")
                .insert_header(("Authorization", alice_auth.clone()))
                .set_json(json!({ "site_id": site.id }))
                .to_request()
        };
        assert!(test::call_service(&app, request()).await.status().is_success());

        let req = test::TestRequest::post()
            .uri("/api/transfers/decline")
            .insert_header(("Authorization", owner_auth.clone()))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert!(db.find_open_transfer_request(&site.id).unwrap().is_none());
        assert_eq!(db.list_notifications(&alice.id).unwrap().len(), 1);

        let req = test::TestRequest::post()
            .uri("/api/transfers/decline")
            .insert_header(("Authorization", owner_auth))
            .set_json(json!({ "site_id": site.id }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        assert!(test::call_service(&app, request()).await.status().is_success());
    }
}
