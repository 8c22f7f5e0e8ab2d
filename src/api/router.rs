use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use super::{
    handlers,
    middleware::{admin_middleware, auth_middleware},
    websocket::handle_websocket,
};
use crate::{services::media::MAX_UPLOAD_BYTES, AppState};

// Room for multipart framing around the largest accepted file.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 64 * 1024;

pub fn create_router(state: AppState) -> Router<AppState> {
    // Public auth routes
    let auth_routes = Router::new()
        .route("/signup", post(handlers::auth::signup))
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh_token));

    // Protected auth routes
    let auth_protected = Router::new()
        .route("/logout", post(handlers::auth::logout))
        .route("/logout-all", post(handlers::auth::logout_all))
        .route("/me", get(handlers::auth::me))
        .route("/me", put(handlers::auth::update_me))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Profile administration (admin only)
    let profile_routes = Router::new()
        .route("/", get(handlers::profiles::list_profiles))
        .route("/:id/approve", post(handlers::profiles::approve_profile))
        .route("/:id/deactivate", post(handlers::profiles::deactivate_profile))
        .route("/:id/reactivate", post(handlers::profiles::reactivate_profile))
        .route("/:id/role", put(handlers::profiles::change_role))
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Conversation routes (protected)
    let conversation_routes = Router::new()
        .route("/", get(handlers::conversations::list_conversations))
        .route("/", post(handlers::conversations::create_conversation))
        .route("/:id", get(handlers::conversations::get_conversation))
        .route("/:id", delete(handlers::conversations::delete_conversation))
        .route("/:id/number", get(handlers::conversations::get_conversation_number))
        .route("/:id/status", put(handlers::conversations::update_status))
        .route("/:id/read", post(handlers::conversations::mark_read))
        .route("/:id/assign", put(handlers::conversations::assign))
        .route("/:id/stage", put(handlers::conversations::set_stage))
        .route("/:id/messages", get(handlers::conversations::get_messages))
        .route("/:id/messages", post(handlers::conversations::send_message))
        .route("/:id/tags", get(handlers::tags::list_tags))
        .route("/:id/tags", post(handlers::tags::add_tag))
        .route("/:id/tags/:tag_id", delete(handlers::tags::remove_tag))
        .route("/:id/attachments", get(handlers::media::list_attachments))
        .route(
            "/:id/attachments",
            post(handlers::media::attach)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(UPLOAD_BODY_LIMIT)),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Connection routes (protected)
    let connection_routes = Router::new()
        .route("/", get(handlers::connections::list_connections))
        .route("/", post(handlers::connections::create_instance))
        .route("/favorites", get(handlers::connections::favorites))
        .route("/:id", get(handlers::connections::get_connection))
        .route("/:id", delete(handlers::connections::delete_instance))
        .route("/:id/connect", post(handlers::connections::connect))
        .route("/:id/status", get(handlers::connections::status))
        .route("/:id/disconnect", post(handlers::connections::disconnect))
        .route("/:id/favorite", post(handlers::connections::toggle_favorite))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // CRM routes (protected)
    let crm_routes = Router::new()
        .route("/stages", get(handlers::crm::list_stages))
        .route("/stages", post(handlers::crm::create_stage))
        .route("/stages/:id", put(handlers::crm::update_stage))
        .route("/board", get(handlers::crm::board))
        .route("/conversations/:id/stage", put(handlers::crm::move_conversation))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // CRM admin routes
    let crm_admin_routes = Router::new()
        .route("/stages/reorder", put(handlers::crm::reorder_stages))
        .route("/stages/:id", delete(handlers::crm::delete_stage))
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Dashboard routes (protected)
    let dashboard_routes = Router::new()
        .route("/metrics", get(handlers::dashboard::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Agent routes (reads protected, writes admin only)
    let agent_routes = Router::new()
        .route("/", get(handlers::agents::list_agents))
        .route("/:id", get(handlers::agents::get_agent))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let agent_admin_routes = Router::new()
        .route("/", post(handlers::agents::create_agent))
        .route("/:id", put(handlers::agents::update_agent))
        .route("/:id", delete(handlers::agents::delete_agent))
        .layer(middleware::from_fn(admin_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Media library (protected)
    let media_routes = Router::new()
        .route("/", get(handlers::media::list_media))
        .route(
            "/",
            post(handlers::media::upload_media)
                .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(UPLOAD_BODY_LIMIT)),
        )
        .route("/:id", delete(handlers::media::delete_media))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Webhooks: inbound and relay authenticate by other means
    let webhook_public_routes = Router::new()
        .route("/inbound", post(handlers::webhooks::inbound))
        .route("/relay", post(handlers::webhooks::relay));

    let webhook_protected_routes = Router::new()
        .route("/whatsapp-connect", post(handlers::webhooks::whatsapp_connect))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // WebSocket route (protected)
    let ws_route = Router::new()
        .route("/ws", get(handle_websocket))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Combine all routes
    Router::new()
        .nest("/auth", auth_routes.merge(auth_protected))
        .nest("/profiles", profile_routes)
        .nest("/conversations", conversation_routes)
        .nest("/connections", connection_routes)
        .nest("/crm", crm_routes.merge(crm_admin_routes))
        .nest("/dashboard", dashboard_routes)
        .nest("/agents", agent_routes.merge(agent_admin_routes))
        .nest("/media", media_routes)
        .nest("/webhooks", webhook_public_routes.merge(webhook_protected_routes))
        .merge(ws_route)
        .with_state(state)
}
