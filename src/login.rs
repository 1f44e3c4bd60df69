use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
#[cfg(feature = "web")]
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
#[cfg(feature = "web")]
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::error::PortalError;
use crate::retry;
use crate::store::Store;

/// Account role. Admins run reviews and manage the master table;
/// customers submit formulas and pay for reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Customer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => f.write_str("admin"),
            Role::Customer => f.write_str("customer"),
        }
    }
}

/// A registered portal user.
///
/// Contains authentication details and password reset state. The
/// password itself is only ever stored as an Argon2 hash.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct User {
    /// Username (unique identifier for the user)
    pub username: String,

    /// Email address (used for notifications and password recovery)
    pub email: String,

    /// Argon2 hash of the user's password
    pub password_hash: String,

    /// Account role
    pub role: Role,

    /// Password reset code (if a reset has been requested)
    pub reset_code: Option<String>,

    /// Expiration time for the reset code
    pub reset_code_expires: Option<SystemTime>,
}

impl User {
    pub fn new(username: &str, email: &str, password_hash: &str, role: Role) -> Self {
        User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role,
            reset_code: None,
            reset_code_expires: None,
        }
    }
}

/// The public view of a user, safe to return to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for Profile {
    fn from(user: &User) -> Self {
        Profile {
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// The authenticated identity attached to a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Reject non-admin callers of admin-only operations.
pub fn require_admin(user: &AuthUser) -> Result<(), PortalError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(PortalError::Authorization(
            "This operation requires an admin account".to_string(),
        ))
    }
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    pub expires_at: SystemTime,
}

lazy_static! {
    /// Active sessions, keyed by session id.
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// Register a new user account.
///
/// The password is hashed before storage; the store rejects duplicate
/// usernames and email addresses.
///
/// # Arguments
/// * `store` - Record store
/// * `username` - Unique username for the new account
/// * `email` - Email address for the user
/// * `password` - Plain text password (will be hashed)
/// * `role` - Account role for the new user
///
/// # Returns
/// * `Result<(), PortalError>` - Success or a validation error
pub fn register_user(
    store: &Store,
    username: &str,
    email: &str,
    password: &str,
    role: Role,
) -> Result<(), PortalError> {
    if username.is_empty() || password.is_empty() || email.is_empty() {
        return Err(PortalError::validation(
            "Username, email and password cannot be empty",
        ));
    }

    let password_hash = hash_password(password)?;
    store.insert_user(&User::new(username, email, &password_hash, role))
}

/// Check whether the provided credentials match a registered user.
///
/// # Returns
/// * `Result<Option<User>, PortalError>` - The user on success, `None`
///   for wrong credentials, or an error from the store
pub fn verify_user(store: &Store, username: &str, password: &str) -> Result<Option<User>, PortalError> {
    match store.get_user(username)? {
        Some(user) => {
            if verify_password(password, &user.password_hash)? {
                Ok(Some(user))
            } else {
                Ok(None)
            }
        }
        None => Ok(None),
    }
}

/// Hash a password with Argon2id and a random salt.
pub fn hash_password(password: &str) -> Result<String, PortalError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| PortalError::External("Password hashing failed".into()))
}

/// Verify a password against a stored Argon2 hash.
fn verify_password(password: &str, hash: &str) -> Result<bool, PortalError> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|_| PortalError::External("Invalid password hash format".into()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Create a new session for an authenticated user.
///
/// # Returns
/// * `String` - A unique session id
pub fn create_session(username: &str, role: Role) -> String {
    let session_id = Uuid::new_v4().to_string();
    let expires_at = SystemTime::now() + Duration::from_secs(SESSION_DURATION);

    let session = Session {
        user_id: username.to_string(),
        role,
        expires_at,
    };

    let mut sessions = SESSIONS.write().unwrap();
    sessions.insert(session_id.clone(), session);

    session_id
}

/// Resolve a session id to the authenticated identity, if the session
/// exists and has not expired.
pub fn validate_session(session_id: &str) -> Option<AuthUser> {
    let sessions = SESSIONS.read().unwrap();

    if let Some(session) = sessions.get(session_id) {
        if session.expires_at > SystemTime::now() {
            return Some(AuthUser {
                username: session.user_id.clone(),
                role: session.role,
            });
        }
    }

    None
}

/// Drop a session (logout).
pub fn clear_session(session_id: &str) {
    let mut sessions = SESSIONS.write().unwrap();
    sessions.remove(session_id);
}

/// Cached profile reads with a bounded TTL.
///
/// Owned by the application state rather than hiding behind a global,
/// so tests can construct one with their own clock. Fetches go through
/// the bounded-retry combinator before giving up.
pub struct ProfileCache {
    ttl: Duration,
    clock: Box<dyn Fn() -> SystemTime + Send + Sync>,
    entries: RwLock<HashMap<String, (Profile, SystemTime)>>,
}

const PROFILE_FETCH_ATTEMPTS: usize = 3;

impl ProfileCache {
    /// A cache with the given TTL and the system clock.
    pub fn new(ttl: Duration) -> Self {
        ProfileCache::with_clock(ttl, SystemTime::now)
    }

    /// A cache with an injectable clock.
    pub fn with_clock(ttl: Duration, clock: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        ProfileCache {
            ttl,
            clock: Box::new(clock),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a profile, serving from cache while the entry is fresh.
    pub fn get(&self, store: &Store, username: &str) -> Result<Profile, PortalError> {
        let now = (self.clock)();

        {
            let entries = self.entries.read().unwrap();
            if let Some((profile, fetched_at)) = entries.get(username) {
                if now < *fetched_at + self.ttl {
                    return Ok(profile.clone());
                }
            }
        }

        let user = retry::with_retries(
            PROFILE_FETCH_ATTEMPTS,
            |attempt| Duration::from_millis(100 * attempt as u64),
            || store.get_user(username),
        )?
        .ok_or_else(|| PortalError::NotFound("User not found".to_string()))?;

        let profile = Profile::from(&user);
        let mut entries = self.entries.write().unwrap();
        entries.insert(username.to_string(), (profile.clone(), now));

        Ok(profile)
    }

    /// Forget a cached entry, forcing the next read through the store.
    pub fn invalidate(&self, username: &str) {
        let mut entries = self.entries.write().unwrap();
        entries.remove(username);
    }
}

// Web handler functions below (only compiled with "web" feature)

/// Credential data for login and registration.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserCredentials {
    /// Username for login/registration
    pub username: String,

    /// Email address (optional for login, required for registration)
    #[serde(default)]
    pub email: String,

    /// Password in plaintext (only transmitted, never stored)
    pub password: String,
}

/// Password reset request data.
#[cfg(feature = "web")]
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

/// Password reset confirmation data.
#[cfg(feature = "web")]
#[derive(Debug, Serialize, Deserialize)]
pub struct PasswordResetConfirm {
    pub email: String,
    pub reset_code: String,
    pub new_password: String,
}

#[cfg(feature = "web")]
use std::sync::Arc;

#[cfg(feature = "web")]
use crate::app::AppState;

/// Handle user login requests.
///
/// Validates the credentials and sets the session cookie.
#[cfg(feature = "web")]
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(credentials): Json<UserCredentials>,
) -> Response {
    match verify_user(&state.store, &credentials.username, &credentials.password) {
        Ok(Some(user)) => {
            let session_id = create_session(&user.username, user.role);
            let cookie = Cookie::new("session", session_id);
            (
                jar.add(cookie),
                Json(serde_json::json!({
                    "username": user.username,
                    "role": user.role,
                })),
            )
                .into_response()
        }
        Ok(None) => (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error").into_response(),
    }
}

/// Handle user registration. Public signups are always customers;
/// admin accounts are seeded from configuration.
#[cfg(feature = "web")]
pub async fn handle_signup(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<UserCredentials>,
) -> Result<Json<serde_json::Value>, PortalError> {
    register_user(
        &state.store,
        &credentials.username,
        &credentials.email,
        &credentials.password,
        Role::Customer,
    )?;

    Ok(Json(serde_json::json!({ "status": "registered" })))
}

/// Handle user logout. Clears the session on both sides.
#[cfg(feature = "web")]
pub async fn handle_logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    if let Some(cookie) = jar.get("session") {
        clear_session(cookie.value());
    }

    let cookie = Cookie::new("session", "");
    (jar.add(cookie), Json(serde_json::json!({ "status": "signed_out" })))
}

/// Return the authenticated user's profile, via the profile cache.
#[cfg(feature = "web")]
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    axum::Extension(user): axum::Extension<AuthUser>,
) -> Result<Json<Profile>, PortalError> {
    let profile = state.profiles.get(&state.store, &user.username)?;
    Ok(Json(profile))
}

/// Authentication middleware.
///
/// Resolves the session cookie and attaches the authenticated identity
/// to the request. Requests without a valid session are rejected.
#[cfg(feature = "web")]
pub async fn require_auth(
    jar: CookieJar,
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    if let Some(session_cookie) = jar.get("session") {
        if let Some(user) = validate_session(session_cookie.value()) {
            request.extensions_mut().insert(user);
            return next.run(request).await;
        }
    }

    (StatusCode::UNAUTHORIZED, "Authentication required").into_response()
}

/// Handle password reset requests by emailing a reset code.
#[cfg(feature = "web")]
pub async fn handle_forgot_password(
    State(state): State<Arc<AppState>>,
    Json(reset_req): Json<PasswordResetRequest>,
) -> Result<Json<serde_json::Value>, PortalError> {
    let user = state
        .store
        .find_user_by_email(&reset_req.email)?
        .ok_or_else(|| PortalError::NotFound("Email not found".to_string()))?;

    let reset_code = crate::mailer::generate_reset_code();
    let expires = SystemTime::now() + Duration::from_secs(3600); // 1 hour

    state.store.update_user(&user.username, |u| {
        u.reset_code = Some(reset_code.clone());
        u.reset_code_expires = Some(expires);
    })?;

    let mailer = crate::mailer::Mailer::from_config(&state.config)
        .map_err(|e| PortalError::External(format!("Failed to initialize mailer: {e}").into()))?;
    mailer
        .send_password_reset(&reset_req.email, &reset_code)
        .map_err(|e| PortalError::External(format!("Failed to send email: {e}").into()))?;

    Ok(Json(serde_json::json!({ "status": "email_sent" })))
}

/// Handle password reset confirmation.
#[cfg(feature = "web")]
pub async fn handle_reset_password(
    State(state): State<Arc<AppState>>,
    Json(reset_confirm): Json<PasswordResetConfirm>,
) -> Result<Json<serde_json::Value>, PortalError> {
    let user = state
        .store
        .find_user_by_email(&reset_confirm.email)?
        .ok_or_else(|| PortalError::NotFound("Email not found".to_string()))?;

    let stored_code = user
        .reset_code
        .as_ref()
        .ok_or_else(|| PortalError::validation("No reset code found"))?;

    let expires = user
        .reset_code_expires
        .ok_or_else(|| PortalError::validation("Reset code expired"))?;
    if SystemTime::now() > expires {
        return Err(PortalError::validation("Reset code expired"));
    }

    if stored_code != &reset_confirm.reset_code {
        return Err(PortalError::validation("Invalid reset code"));
    }

    let hash = hash_password(&reset_confirm.new_password)?;
    state.store.update_user(&user.username, |u| {
        u.password_hash = hash.clone();
        u.reset_code = None;
        u.reset_code_expires = None;
    })?;
    state.profiles.invalidate(&user.username);

    Ok(Json(serde_json::json!({ "status": "password_reset" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc as StdArc, Mutex};
    use tempfile::tempdir;

    #[test]
    fn register_and_verify_roundtrip() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();

        register_user(&store, "alice", "alice@example.com", "s3cret", Role::Customer).unwrap();

        let user = verify_user(&store, "alice", "s3cret").unwrap().unwrap();
        assert_eq!(user.role, Role::Customer);
        assert_ne!(user.password_hash, "s3cret");

        assert!(verify_user(&store, "alice", "wrong").unwrap().is_none());
        assert!(verify_user(&store, "nobody", "s3cret").unwrap().is_none());
    }

    #[test]
    fn empty_fields_are_rejected() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();

        let err = register_user(&store, "", "a@b.c", "pw", Role::Customer).unwrap_err();
        assert!(matches!(err, PortalError::Validation(_)));
    }

    #[test]
    fn sessions_resolve_to_the_right_role() {
        let session_id = create_session("root", Role::Admin);
        let user = validate_session(&session_id).unwrap();
        assert_eq!(user.username, "root");
        assert!(user.is_admin());

        clear_session(&session_id);
        assert!(validate_session(&session_id).is_none());
    }

    #[test]
    fn require_admin_rejects_customers() {
        let customer = AuthUser {
            username: "alice".to_string(),
            role: Role::Customer,
        };
        assert!(matches!(
            require_admin(&customer),
            Err(PortalError::Authorization(_))
        ));

        let admin = AuthUser {
            username: "root".to_string(),
            role: Role::Admin,
        };
        assert!(require_admin(&admin).is_ok());
    }

    #[test]
    fn profile_cache_serves_stale_until_ttl() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        register_user(&store, "alice", "old@example.com", "pw", Role::Customer).unwrap();

        let now = StdArc::new(Mutex::new(SystemTime::UNIX_EPOCH));
        let clock_now = StdArc::clone(&now);
        let cache = ProfileCache::with_clock(Duration::from_secs(300), move || {
            *clock_now.lock().unwrap()
        });

        let profile = cache.get(&store, "alice").unwrap();
        assert_eq!(profile.email, "old@example.com");

        store
            .update_user("alice", |u| u.email = "new@example.com".to_string())
            .unwrap();

        // Within the TTL the cached profile wins.
        let profile = cache.get(&store, "alice").unwrap();
        assert_eq!(profile.email, "old@example.com");

        // Past the TTL the store is consulted again.
        *now.lock().unwrap() = SystemTime::UNIX_EPOCH + Duration::from_secs(301);
        let profile = cache.get(&store, "alice").unwrap();
        assert_eq!(profile.email, "new@example.com");
    }

    #[test]
    fn profile_cache_invalidate_forces_refetch() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        register_user(&store, "bob", "old@example.com", "pw", Role::Customer).unwrap();

        let cache = ProfileCache::new(Duration::from_secs(300));
        assert_eq!(cache.get(&store, "bob").unwrap().email, "old@example.com");

        store
            .update_user("bob", |u| u.email = "new@example.com".to_string())
            .unwrap();
        cache.invalidate("bob");

        assert_eq!(cache.get(&store, "bob").unwrap().email, "new@example.com");
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let dir = tempdir().unwrap();
        let store = Store::new(dir.path()).unwrap();
        let cache = ProfileCache::new(Duration::from_secs(300));

        assert!(matches!(
            cache.get(&store, "ghost"),
            Err(PortalError::NotFound(_))
        ));
    }
}
