use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::db::{Database, EXPIRE_AT_KEY, TOKEN_KEY, USER_KEY};
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::models::{LoginRequest, LoginResponse, RegisterRequest, UserInfo};
use crate::navigation::{Navigator, Route};

const LOGIN_FAILED: &str = "login failed";
const REGISTER_FAILED: &str = "registration failed";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionData {
    pub token: Option<String>,
    pub user: Option<UserInfo>,
}

/// In-memory and persisted record of the bearer token and the signed-in user.
///
/// Shared by the [`Gateway`] (which reads the token and evicts on 401) and the
/// [`SessionManager`] (which establishes it).
pub struct Session {
    storage: Arc<Database>,
    data: Mutex<SessionData>,
}

impl Session {
    /// Read the persisted token. An expired token is dropped here; the user record is
    /// left for [`Session::load_user`].
    pub fn restore(storage: Arc<Database>) -> Self {
        let mut token = storage.get_raw(TOKEN_KEY).ok().flatten();

        if token.is_some() {
            let expire_at = storage
                .get_raw(EXPIRE_AT_KEY)
                .ok()
                .flatten()
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(0);
            if expire_at > 0 && expire_at <= Utc::now().timestamp() {
                info!("persisted token has expired, discarding it");
                storage.forget(TOKEN_KEY);
                storage.forget(USER_KEY);
                storage.forget(EXPIRE_AT_KEY);
                token = None;
            }
        }

        Session {
            storage,
            data: Mutex::new(SessionData { token, user: None }),
        }
    }

    /// Restore the cached user when a token is present. No server round trip is made.
    pub fn load_user(&self) {
        let mut data = self.data.lock();
        if data.token.is_none() {
            return;
        }
        data.user = self.storage.load_json(USER_KEY);
        debug!(restored = data.user.is_some(), "load user");
    }

    pub fn token(&self) -> Option<String> {
        self.data.lock().token.clone()
    }

    pub fn user(&self) -> Option<UserInfo> {
        self.data.lock().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.data.lock().token.is_some()
    }

    pub fn snapshot(&self) -> SessionData {
        self.data.lock().clone()
    }

    pub fn establish(&self, token: &str, user: Option<UserInfo>, expire_at: i64) {
        {
            let mut data = self.data.lock();
            data.token = Some(token.to_string());
            data.user = user.clone();
        }

        self.storage.persist_raw(TOKEN_KEY, token);
        match &user {
            Some(user) => self.storage.persist_json(USER_KEY, user),
            None => self.storage.forget(USER_KEY),
        }
        if expire_at > 0 {
            self.storage.persist_raw(EXPIRE_AT_KEY, &expire_at.to_string());
        } else {
            self.storage.forget(EXPIRE_AT_KEY);
        }
    }

    /// Drop token and user from memory and storage. Returns whether a token was held.
    pub fn clear(&self) -> bool {
        let had_token = {
            let mut data = self.data.lock();
            let had_token = data.token.is_some();
            *data = SessionData::default();
            had_token
        };

        self.storage.forget(TOKEN_KEY);
        self.storage.forget(USER_KEY);
        self.storage.forget(EXPIRE_AT_KEY);
        had_token
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticating,
    Authenticated,
}

#[derive(Debug, Default)]
struct Progress {
    in_flight: u32,
    error: Option<String>,
}

/// Login, registration and logout on top of the shared [`Session`].
pub struct SessionManager {
    session: Arc<Session>,
    gateway: Arc<Gateway>,
    navigator: Arc<dyn Navigator>,
    progress: Mutex<Progress>,
}

impl SessionManager {
    pub fn new(session: Arc<Session>, gateway: Arc<Gateway>, navigator: Arc<dyn Navigator>) -> Self {
        SessionManager {
            session,
            gateway,
            navigator,
            progress: Mutex::new(Progress::default()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn state(&self) -> AuthState {
        if self.progress.lock().in_flight > 0 {
            AuthState::Authenticating
        } else if self.session.is_authenticated() {
            AuthState::Authenticated
        } else {
            AuthState::Anonymous
        }
    }

    pub fn loading(&self) -> bool {
        self.progress.lock().in_flight > 0
    }

    /// Message from the last failed login or registration.
    pub fn error(&self) -> Option<String> {
        self.progress.lock().error.clone()
    }

    pub fn load_user(&self) {
        self.session.load_user();
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<UserInfo, ApiError> {
        self.begin();
        let result = self
            .gateway
            .post::<LoginResponse, _>("/api/auth/login", &LoginRequest { username, password })
            .await;

        match result {
            Ok(resp) => {
                self.session
                    .establish(&resp.token, Some(resp.user.clone()), resp.expire_at);
                info!(username = %resp.user.username, "logged in");
                self.navigator.navigate(Route::Home);
                self.finish(None);
                Ok(resp.user)
            }
            Err(err) => {
                self.finish(Some(err.user_message(LOGIN_FAILED)));
                Err(err)
            }
        }
    }

    /// Create an account, then send the user to the login screen. Does not sign in.
    pub async fn register(&self, username: &str, password: &str, email: &str) -> Result<(), ApiError> {
        self.begin();
        let result = self
            .gateway
            .post::<serde_json::Value, _>(
                "/api/auth/register",
                &RegisterRequest {
                    username,
                    password,
                    email,
                },
            )
            .await;

        match result {
            Ok(_) => {
                info!(username, "registered");
                self.navigator.navigate(Route::Login);
                self.finish(None);
                Ok(())
            }
            Err(err) => {
                self.finish(Some(err.user_message(REGISTER_FAILED)));
                Err(err)
            }
        }
    }

    pub fn logout(&self) {
        if self.session.clear() {
            info!("logged out");
        }
        self.navigator.navigate(Route::Login);
    }

    fn begin(&self) {
        let mut progress = self.progress.lock();
        progress.in_flight += 1;
        progress.error = None;
    }

    fn finish(&self, error: Option<String>) {
        let mut progress = self.progress.lock();
        progress.in_flight = progress.in_flight.saturating_sub(1);
        progress.error = error;
    }
}
