use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use duet_db::Database;
use duet_db::models::{ProfileUpdate, UserRow};
use duet_db::queries::timestamp_now;
use duet_gateway::dispatcher::Dispatcher;
use duet_types::api::{
    AuthResponse, LoginRequest, SignupRequest, StatusResponse, UpdateProfileRequest, UserResponse,
};

use crate::error::{ApiError, path_id};
use crate::images::ImageHost;
use crate::middleware::Claims;
use crate::rows::user_from_row;

/// Tokens stay valid for a week.
const TOKEN_TTL_DAYS: i64 = 7;

const MIN_PASSWORD_LEN: usize = 8;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub images: ImageHost,
}

/// Run a blocking DB closure off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let full_name = req.full_name.trim().to_string();
    let email = req.email.trim().to_lowercase();
    if full_name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(ApiError::Failed("Missing Details".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Failed(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let lookup = email.clone();
    if with_db(&state, move |db| db.get_user_by_email(&lookup))
        .await
        .map_err(ApiError::failed)?
        .is_some()
    {
        return Err(ApiError::Failed("Account already exists".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("password hashing failed: {}", e);
            ApiError::Failed("Failed to create account".into())
        })?
        .to_string();

    let row = UserRow {
        id: Uuid::new_v4().to_string(),
        email,
        full_name,
        password: password_hash,
        profile_pic: String::new(),
        bio: req.bio.trim().to_string(),
        created_at: timestamp_now(),
    };
    let insert = row.clone();
    with_db(&state, move |db| db.create_user(&insert))
        .await
        .map_err(ApiError::failed)?;

    let user = user_from_row(row);
    let token = create_token(&state.jwt_secret, user.id, &user.email).map_err(ApiError::failed)?;
    info!("New account {} ({})", user.id, user.email);

    Ok(Json(AuthResponse {
        success: true,
        user_data: user,
        token,
        message: "Account created successfully".into(),
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let email = req.email.trim().to_lowercase();
    let row = with_db(&state, move |db| db.get_user_by_email(&email))
        .await
        .map_err(ApiError::failed)?
        .ok_or_else(|| ApiError::Failed("Invalid credentials".into()))?;

    let parsed_hash = PasswordHash::new(&row.password).map_err(ApiError::failed)?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Failed("Invalid credentials".into()))?;

    let user = user_from_row(row);
    let token = create_token(&state.jwt_secret, user.id, &user.email).map_err(ApiError::failed)?;

    Ok(Json(AuthResponse {
        success: true,
        user_data: user,
        token,
        message: "Login successful".into(),
    }))
}

/// Returns the authenticated user's profile.
pub async fn check(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, ApiError> {
    let id = claims.sub.to_string();
    let row = with_db(&state, move |db| db.get_user_by_id(&id))
        .await
        .map_err(ApiError::failed)?
        .ok_or_else(|| ApiError::Failed("User not found".into()))?;

    Ok(Json(UserResponse { success: true, user: user_from_row(row) }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let profile_pic = match req.profile_pic.as_deref() {
        Some(data_url) => Some(state.images.upload(data_url).await.map_err(ApiError::failed)?),
        None => None,
    };
    let update = ProfileUpdate {
        full_name: req.full_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
        bio: req.bio,
        profile_pic,
    };

    let id = claims.sub.to_string();
    let row = with_db(&state, move |db| db.update_profile(&id, &update))
        .await
        .map_err(ApiError::failed)?
        .ok_or_else(|| ApiError::Failed("User not found".into()))?;

    Ok(Json(UserResponse { success: true, user: user_from_row(row) }))
}

/// Deletes an account. Only the owner may do this; their messages stay behind.
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<StatusResponse>, ApiError> {
    let user_id = path_id(&user_id)?;
    if user_id != claims.sub {
        return Err(ApiError::Forbidden("You can only delete your own account.".into()));
    }

    let id = user_id.to_string();
    let removed = with_db(&state, move |db| db.delete_user(&id))
        .await
        .map_err(ApiError::failed)?;
    if !removed {
        return Err(ApiError::NotFound("User not found.".into()));
    }

    info!("Account {} deleted", user_id);
    Ok(Json(StatusResponse::ok_with("User deleted successfully")))
}

pub fn create_token(secret: &str, user_id: Uuid, email: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        email: email.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::images::LocalStore;
    use crate::middleware::verify_token;

    pub(crate) fn test_state() -> AppState {
        let uploads = std::env::temp_dir().join(format!("duet-test-{}", Uuid::new_v4()));
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            images: ImageHost::Local(LocalStore::new(uploads, "http://localhost:5000")),
        })
    }

    pub(crate) fn claims_for(user_id: Uuid) -> Claims {
        Claims { sub: user_id, email: format!("{}@duet.test", user_id), exp: usize::MAX }
    }

    async fn signup_as(state: &AppState, email: &str) -> AuthResponse {
        let Json(resp) = signup(
            State(state.clone()),
            Json(SignupRequest {
                full_name: "Test User".into(),
                email: email.into(),
                password: "correct horse".into(),
                bio: String::new(),
            }),
        )
        .await
        .unwrap();
        resp
    }

    #[tokio::test]
    async fn signup_then_login_issues_valid_tokens() {
        let state = test_state();
        let created = signup_as(&state, "Ada@Duet.test").await;
        assert_eq!(created.user_data.email, "ada@duet.test");

        let Json(logged_in) = login(
            State(state.clone()),
            Json(LoginRequest { email: "ada@duet.test".into(), password: "correct horse".into() }),
        )
        .await
        .unwrap();
        assert_eq!(logged_in.user_data.id, created.user_data.id);

        let claims = verify_token(&state.jwt_secret, &logged_in.token).unwrap();
        assert_eq!(claims.sub, created.user_data.id);
    }

    #[tokio::test]
    async fn duplicate_email_and_bad_password_are_soft_failures() {
        let state = test_state();
        signup_as(&state, "ada@duet.test").await;

        let dup = signup(
            State(state.clone()),
            Json(SignupRequest {
                full_name: "Other".into(),
                email: "ada@duet.test".into(),
                password: "another password".into(),
                bio: String::new(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(dup, ApiError::Failed(_)));

        let wrong = login(
            State(state.clone()),
            Json(LoginRequest { email: "ada@duet.test".into(), password: "nope nope".into() }),
        )
        .await
        .unwrap_err();
        assert!(matches!(wrong, ApiError::Failed(m) if m == "Invalid credentials"));
    }

    #[tokio::test]
    async fn profile_update_and_self_only_deletion() {
        let state = test_state();
        let me = signup_as(&state, "me@duet.test").await.user_data.id;
        let other = signup_as(&state, "other@duet.test").await.user_data.id;

        let Json(updated) = update_profile(
            State(state.clone()),
            Extension(claims_for(me)),
            Json(UpdateProfileRequest { bio: Some("hi there".into()), ..Default::default() }),
        )
        .await
        .unwrap();
        assert_eq!(updated.user.bio, "hi there");
        assert_eq!(updated.user.full_name, "Test User");

        let err = delete_user(State(state.clone()), Path(other.to_string()), Extension(claims_for(me)))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));

        delete_user(State(state.clone()), Path(me.to_string()), Extension(claims_for(me))).await.unwrap();
        let gone = check(State(state.clone()), Extension(claims_for(me))).await.unwrap_err();
        assert!(matches!(gone, ApiError::Failed(_)));
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = create_token("secret-a", Uuid::new_v4(), "a@duet.test").unwrap();
        assert!(matches!(verify_token("secret-b", &token), Err(ApiError::Unauthorized)));
    }
}
