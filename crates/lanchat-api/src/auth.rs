use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use axum::Json;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::info;

use lanchat_db::ChatError;
use lanchat_gateway::CoreState;
use lanchat_types::api::{
    Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};

use crate::blocking;
use crate::error::{ApiError, ApiResult};

/// Register a new account. The very first account on a fresh server becomes
/// the bootstrap admin.
pub async fn register(
    State(state): State<CoreState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let username = req.username.trim().to_string();
    if username.len() < 2 || username.len() > 32 || username.contains(',') {
        return Err(ApiError(ChatError::validation(
            "username must be 2-32 characters without commas",
        )));
    }
    if username == lanchat_types::models::SYSTEM_SENDER
        || username == "all"
        || username.starts_with("group-")
    {
        return Err(ApiError(ChatError::validation("username is reserved")));
    }
    if req.password.len() < 8 {
        return Err(ApiError(ChatError::validation(
            "password must be at least 8 characters",
        )));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError(ChatError::Persistence(format!("password hash: {e}"))))?
        .to_string();

    let core = state.clone();
    let name = username.clone();
    let is_admin = blocking(move || {
        if core.db.get_user(&name)?.is_some() {
            return Err(ChatError::validation("username already exists"));
        }
        let is_admin = core.db.user_count()? == 0;
        core.db.create_user(&name, &password_hash, is_admin)?;
        Ok(is_admin)
    })
    .await?;

    if is_admin {
        info!("bootstrap admin account created: {}", username);
    }

    let token = create_token(&state.jwt_secret, &username, is_admin)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            username,
            is_admin,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<CoreState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let core = state.clone();
    let name = req.username.trim().to_string();
    let user = blocking(move || {
        core.db
            .get_user(&name)?
            .ok_or_else(|| ChatError::policy("invalid username or password"))
    })
    .await?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError(ChatError::Persistence(format!("stored hash: {e}"))))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError(ChatError::policy("invalid username or password")))?;

    let token = create_token(&state.jwt_secret, &user.username, user.is_admin)?;
    Ok(Json(LoginResponse {
        username: user.username,
        is_admin: user.is_admin,
        token,
    }))
}

/// Extract and validate the bearer token; downstream handlers read the
/// claims from request extensions.
pub async fn require_auth(
    State(state): State<CoreState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_token(&state.jwt_secret, token).ok_or(StatusCode::UNAUTHORIZED)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn verify_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .ok()
}

fn create_token(secret: &str, username: &str, is_admin: bool) -> Result<String, ApiError> {
    let claims = Claims {
        sub: username.to_string(),
        is_admin,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError(ChatError::Persistence(format!("token encode: {e}"))))
}

/// Admin-gated handlers call this first.
pub fn require_admin_claims(claims: &Claims) -> Result<(), ApiError> {
    if claims.is_admin {
        Ok(())
    } else {
        Err(ApiError(ChatError::policy("admin access required")))
    }
}
