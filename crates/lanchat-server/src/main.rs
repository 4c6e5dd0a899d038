use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Router, middleware};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use lanchat_api::auth::{self, require_auth, verify_token};
use lanchat_api::{files, groups, history, messages, users};
use lanchat_crypto::{MessageCipher, keys};
use lanchat_gateway::dispatcher::Dispatcher;
use lanchat_gateway::registry::Registry;
use lanchat_gateway::{CoreState, CoreStateInner, connection};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lanchat=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("LANCHAT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let data_dir = PathBuf::from(
        std::env::var("LANCHAT_DATA_DIR").unwrap_or_else(|_| "data".into()),
    );
    let host = std::env::var("LANCHAT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("LANCHAT_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    std::fs::create_dir_all(&data_dir)?;
    let upload_dir = data_dir.join("uploads");
    std::fs::create_dir_all(&upload_dir)?;

    // Store + at-rest crypto; the key lives next to the database, never in it
    let db = lanchat_db::Database::open(&data_dir.join("chat.db"))?;
    let key = keys::load_or_generate(&data_dir.join("chat.key"))?;
    let cipher = MessageCipher::new(&key);

    // Real-time core
    let registry = Registry::new();
    let dispatcher = Dispatcher::new(registry);

    let core: CoreState = Arc::new(CoreStateInner {
        db,
        cipher,
        dispatcher,
        upload_dir: upload_dir.clone(),
        jwt_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(core.clone());

    let protected_routes = Router::new()
        .route("/history", get(history::history))
        .route("/unread_counts", get(history::unread_counts))
        .route("/mark_read", post(history::mark_read))
        .route("/messages/{msg_id}/delete", post(messages::delete_message))
        .route("/clear_chat", post(messages::clear_chat))
        .route("/clear_group_chat", post(messages::clear_group_chat))
        .route("/upload", post(files::upload))
        .route("/files", get(files::list_files))
        .route("/files/{file_id}/delete", post(files::delete_file))
        .route("/users", get(users::online_users))
        .route("/users_status", get(users::users_status))
        .route("/users/{username}/promote", post(users::promote))
        .route("/users/{username}/demote", post(users::demote))
        .route("/users/{username}/delete", post(users::delete_user))
        .route("/groups", post(groups::create_group).get(groups::my_groups))
        .route("/groups/{group_id}", get(groups::group_info))
        .route("/groups/{group_id}/update", post(groups::update_group))
        .route("/groups/{group_id}/add_member", post(groups::add_member))
        .route("/groups/{group_id}/remove_member", post(groups::remove_member))
        .route("/groups/{group_id}/set_admin", post(groups::set_admin))
        .route("/groups/{group_id}/set_role", post(groups::set_role))
        .route(
            "/groups/{group_id}/notification_preference",
            post(groups::set_notification_preference),
        )
        .route("/groups/{group_id}/leave", post(groups::leave_group))
        .route("/groups/{group_id}/delete", post(groups::delete_group))
        .route("/groups/{group_id}/mute", post(groups::mute))
        .route("/groups/{group_id}/unmute", post(groups::unmute))
        .route("/groups/{group_id}/pin_message", post(groups::pin_message))
        .route("/groups/{group_id}/unpin_message", post(groups::unpin_message))
        .route(
            "/groups/{group_id}/pinned_messages",
            get(groups::pinned_messages),
        )
        .route("/groups/{group_id}/activity", get(groups::activity))
        .route("/groups/{group_id}/files", get(groups::group_files))
        .layer(middleware::from_fn_with_state(core.clone(), require_auth))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024 * 1024))
        .with_state(core.clone());

    let ws_route = Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(core.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("LAN chat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Deserialize)]
struct WsQuery {
    token: String,
}

/// Authenticate the upgrade before the socket is accepted; the connection
/// loop receives an already-verified identity.
async fn ws_upgrade(
    State(core): State<CoreState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let Some(claims) = verify_token(&core.jwt_secret, &query.token) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| connection::handle_connection(socket, core, claims.sub))
        .into_response()
}
