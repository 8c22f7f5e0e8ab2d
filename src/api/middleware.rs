use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::{
    error::{AppError, AppResult},
    models::Profile,
    services::auth::{check_access, AuthService},
    AppState,
};

/// Authentication middleware.
///
/// The profile status is checked on every request, so a profile that is
/// deactivated after login loses access immediately.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let auth_service = AuthService::new(
        state.db.clone(),
        state.redis.clone(),
        (*state.config).clone(),
    );

    let claims = auth_service.validate_access_token(token)?;
    let profile_id = claims.sub.parse().map_err(|_| AppError::InvalidToken)?;
    let profile = auth_service.get_user_profile_fast(profile_id).await?;
    check_access(profile.status)?;

    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(profile);

    Ok(next.run(request).await)
}

/// Must be layered inside [`auth_middleware`].
pub async fn admin_middleware(request: Request, next: Next) -> Result<Response, AppError> {
    let profile = request
        .extensions()
        .get::<Profile>()
        .ok_or(AppError::Unauthorized)?;
    require_admin(profile)?;
    Ok(next.run(request).await)
}

pub fn require_admin(profile: &Profile) -> AppResult<()> {
    if profile.is_admin() {
        Ok(())
    } else {
        Err(AppError::AdminRequired)
    }
}
