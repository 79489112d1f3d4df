//! Authenticated client for the Wattara backend.
//!
//! `SessionClient` owns the session, attaches the bearer token to every
//! call made through [`SessionClient::execute`], and on a 401 refreshes the
//! access token once and replays the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::auth::{
    AuthState, LoginRedirect, MemoryStore, NoRedirect, Session, SessionStore, User,
};

use super::error::error_field;
use super::request::{ApiResponse, PendingRequest};
use super::ClientError;

// ============================================================================
// Constants
// ============================================================================

/// Default backend address for a local development server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

const LOGIN_PATH: &str = "/api/auth/login/";
const REGISTER_PATH: &str = "/api/auth/register/";
const REFRESH_PATH: &str = "/api/auth/token/refresh/";
const PROFILE_PATH: &str = "/api/auth/profile/";

const LOGIN_FAILED: &str = "Login failed";
const REGISTRATION_FAILED: &str = "Registration failed";

/// Error-map keys that describe the whole form rather than one field.
const NON_FIELD_KEYS: [&str; 3] = ["error", "detail", "non_field_errors"];

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

// ============================================================================
// Builder
// ============================================================================

pub struct SessionClientBuilder {
    base_url: String,
    store: Option<Arc<dyn SessionStore>>,
    redirect: Option<Arc<dyn LoginRedirect>>,
    timeout: Option<Duration>,
}

impl SessionClientBuilder {
    /// Persistence backend. Defaults to an in-memory store.
    pub fn store<S: SessionStore + 'static>(mut self, store: S) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Hook invoked when a refresh fails during `execute`.
    pub fn redirect<R: LoginRedirect + 'static>(mut self, redirect: R) -> Self {
        self.redirect = Some(Arc::new(redirect));
        self
    }

    /// Per-request timeout. Without one the transport defaults apply.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<SessionClient, ClientError> {
        let mut http = Client::builder();
        if let Some(timeout) = self.timeout {
            http = http.timeout(timeout);
        }

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()) as Arc<dyn SessionStore>);
        let session = Session::load(store.as_ref());
        debug!(authenticated = session.is_some(), "Session client initialised");

        Ok(SessionClient {
            inner: Arc::new(Inner {
                http: http.build()?,
                base_url: self.base_url.trim_end_matches('/').to_string(),
                store,
                redirect: self
                    .redirect
                    .unwrap_or_else(|| Arc::new(NoRedirect) as Arc<dyn LoginRedirect>),
                session: RwLock::new(session),
                refresh_lock: tokio::sync::Mutex::new(()),
                refreshing: AtomicBool::new(false),
            }),
        })
    }
}

// ============================================================================
// Client
// ============================================================================

/// Session-aware API client.
/// Clone is cheap - all clones share one session and connection pool.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    base_url: String,
    store: Arc<dyn SessionStore>,
    redirect: Arc<dyn LoginRedirect>,
    session: RwLock<Option<Session>>,
    /// Serialises token refreshes so concurrent 401s share one exchange.
    refresh_lock: tokio::sync::Mutex<()>,
    refreshing: AtomicBool,
}

impl SessionClient {
    pub fn builder(base_url: impl Into<String>) -> SessionClientBuilder {
        SessionClientBuilder {
            base_url: base_url.into(),
            store: None,
            redirect: None,
            timeout: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    /// The persistence backend this client writes the session to.
    pub fn store(&self) -> &dyn SessionStore {
        self.inner.store.as_ref()
    }

    pub fn state(&self) -> AuthState {
        if self.read_session().is_none() {
            AuthState::Anonymous
        } else if self.inner.refreshing.load(Ordering::SeqCst) {
            AuthState::Refreshing
        } else {
            AuthState::Authenticated
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_session().is_some()
    }

    pub fn session(&self) -> Option<Session> {
        self.read_session().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.read_session().as_ref().map(|s| s.user.clone())
    }

    fn access_token(&self) -> Option<String> {
        self.read_session().as_ref().map(|s| s.tokens.access.clone())
    }

    fn read_session(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.inner
            .session
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.inner
            .session
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.inner.base_url, path)
        } else {
            format!("{}/{}", self.inner.base_url, path)
        }
    }

    // ===== Authentication =====

    /// Exchange credentials for a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ClientError> {
        let body = json!({ "username": username, "password": password });
        let response = self.dispatch_anonymous(LOGIN_PATH, &body).await?;

        if !response.status().is_success() {
            let reason =
                error_field(response.text()).unwrap_or_else(|| LOGIN_FAILED.to_string());
            warn!(status = response.status().as_u16(), username, "Login rejected");
            return Err(ClientError::Auth { reason });
        }

        let session: Session = response.json()?;
        info!(username = %session.user.username, "Login successful");
        Ok(self.establish(session))
    }

    /// Create an account and sign in. Validation is left entirely to the backend.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        password_confirmation: &str,
    ) -> Result<Session, ClientError> {
        let body = json!({
            "username": username,
            "email": email,
            "password": password,
            "password2": password_confirmation,
        });
        let response = self.dispatch_anonymous(REGISTER_PATH, &body).await?;

        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), username, "Registration rejected");
            return Err(match first_field_error(response.text()) {
                Some((field, message)) => ClientError::Validation { field, message },
                None => ClientError::Auth {
                    reason: REGISTRATION_FAILED.to_string(),
                },
            });
        }

        let session: Session = response.json()?;
        info!(username = %session.user.username, "Registration successful");
        Ok(self.establish(session))
    }

    /// Drop the session locally. Never touches the network.
    pub fn logout(&self) {
        let had_session = self.write_session().take().is_some();
        Session::erase(self.store());
        if had_session {
            info!("Logged out");
        }
    }

    /// Trade the refresh token for a new access token.
    ///
    /// Any failure clears the session and yields `SessionExpired`. The login
    /// redirect is left to the caller.
    pub async fn refresh(&self) -> Result<Session, ClientError> {
        let _guard = self.inner.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// Current user as the backend sees it.
    pub async fn profile(&self) -> Result<User, ClientError> {
        self.get_json(PROFILE_PATH).await
    }

    fn establish(&self, session: Session) -> Session {
        session.save(self.store());
        *self.write_session() = Some(session.clone());
        session
    }

    /// Must be called with `refresh_lock` held.
    ///
    /// A failure only clears the session the refresh was issued for. When
    /// another login replaced it in the meantime, the new session is kept
    /// and returned.
    async fn refresh_locked(&self) -> Result<Session, ClientError> {
        let Some(current) = self.session() else {
            debug!("Refresh requested without a session");
            self.logout();
            return Err(ClientError::SessionExpired);
        };
        let issued_for = current.tokens.refresh.clone();

        let result = {
            let _refreshing = RefreshingFlag::raise(&self.inner.refreshing);
            self.exchange_refresh_token(&issued_for).await
        };

        let mut guard = self.write_session();
        let still_current = guard
            .as_ref()
            .is_some_and(|s| s.tokens.refresh == issued_for);
        if !still_current {
            return match guard.as_ref() {
                Some(replaced) => {
                    debug!("Session replaced during refresh, keeping the new one");
                    Ok(replaced.clone())
                }
                None => {
                    debug!("Session cleared during refresh");
                    Err(ClientError::SessionExpired)
                }
            };
        }

        match result {
            Ok(refreshed) => {
                let mut session = current;
                session.tokens.access = refreshed.access;
                if let Some(rotated) = refreshed.refresh {
                    session.tokens.refresh = rotated;
                }
                *guard = Some(session.clone());
                drop(guard);
                session.save(self.store());
                debug!("Access token refreshed");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed, clearing session");
                guard.take();
                drop(guard);
                Session::erase(self.store());
                Err(ClientError::SessionExpired)
            }
        }
    }

    async fn exchange_refresh_token(&self, refresh: &str) -> Result<RefreshResponse, ClientError> {
        let body = json!({ "refresh": refresh });
        let response = self.dispatch_anonymous(REFRESH_PATH, &body).await?;
        if !response.status().is_success() {
            return Err(ClientError::from_status(response.status(), response.text()));
        }
        response.json()
    }

    /// Refresh on behalf of a call that was rejected while carrying `stale`.
    ///
    /// When another call already refreshed past `stale`, or a new login
    /// replaced the session, the current token is reused instead of
    /// refreshing again.
    async fn refresh_after(&self, stale: &str) -> Result<(), ClientError> {
        let _guard = self.inner.refresh_lock.lock().await;
        match self.access_token() {
            None => Err(ClientError::SessionExpired),
            Some(current) if current != stale => {
                debug!("Access token already refreshed by a concurrent request");
                Ok(())
            }
            Some(_) => self.refresh_locked().await.map(|_| ()),
        }
    }

    // ===== Requests =====

    /// Send an authenticated request. See [`SessionClient::execute`].
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: HeaderMap,
    ) -> Result<ApiResponse, ClientError> {
        let mut pending = PendingRequest::new(method, path).headers(headers);
        if let Some(body) = body {
            pending = pending.json(body);
        }
        self.execute(pending).await
    }

    /// Dispatch `pending` with the current access token.
    ///
    /// A 401 on a call that carried a token triggers one refresh and one
    /// replay. A failed refresh clears the session, invokes the login
    /// redirect and returns `SessionExpired`. Every other non-2xx response,
    /// including a second 401, is returned as `ClientError::Http`.
    pub async fn execute(&self, mut pending: PendingRequest) -> Result<ApiResponse, ClientError> {
        loop {
            let access = self.access_token();
            let response = self.dispatch(&pending, access.as_deref()).await?;

            if response.status() == StatusCode::UNAUTHORIZED && !pending.is_retried() {
                if let Some(stale) = access {
                    pending.mark_retried();
                    debug!(method = %pending.method, path = %pending.path, "Unauthorized, refreshing token");
                    if let Err(e) = self.refresh_after(&stale).await {
                        self.inner.redirect.redirect_to_login();
                        return Err(e);
                    }
                    continue;
                }
            }

            return Self::check_response(response);
        }
    }

    async fn dispatch(
        &self,
        pending: &PendingRequest,
        access: Option<&str>,
    ) -> Result<ApiResponse, ClientError> {
        let mut builder = self
            .inner
            .http
            .request(pending.method.clone(), self.url(&pending.path))
            .headers(pending.headers.clone());
        if let Some(ref body) = pending.body {
            builder = builder.json(body);
        }
        if let Some(token) = access {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(
            method = %pending.method,
            path = %pending.path,
            status = status.as_u16(),
            retried = pending.is_retried(),
            "Request completed"
        );
        Ok(ApiResponse::new(status, body))
    }

    /// POST without credentials, for the auth endpoints themselves.
    async fn dispatch_anonymous(&self, path: &str, body: &Value) -> Result<ApiResponse, ClientError> {
        let response = self.inner.http.post(self.url(path)).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(path, status = status.as_u16(), "Auth request completed");
        Ok(ApiResponse::new(status, text))
    }

    fn check_response(response: ApiResponse) -> Result<ApiResponse, ClientError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(ClientError::from_status(response.status(), response.text()))
        }
    }

    // ===== JSON helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(PendingRequest::new(Method::GET, path))
            .await?
            .json()
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.execute(PendingRequest::new(Method::POST, path).json(to_value(body)?))
            .await?
            .json()
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        self.execute(PendingRequest::new(Method::PUT, path).json(to_value(body)?))
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.execute(PendingRequest::new(Method::DELETE, path)).await?;
        Ok(())
    }
}

/// Holds the `refreshing` flag up until dropped, so a cancelled refresh
/// does not leave the client reporting `Refreshing`.
struct RefreshingFlag<'a>(&'a AtomicBool);

impl<'a> RefreshingFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn to_value<B: Serialize>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body).map_err(|e| ClientError::InvalidRequest(e.to_string()))
}

/// First field error of a registration failure body.
///
/// Takes the first key in the order the server sent it and, when its value
/// is a list, the first item of that list.
fn first_field_error(body: &str) -> Option<(Option<String>, String)> {
    let value: Value = serde_json::from_str(body).ok()?;
    let (key, detail) = value.as_object()?.iter().next()?;

    let message = match detail {
        Value::Array(items) => items.first().map(message_text)?,
        other => message_text(other),
    };
    let field = if NON_FIELD_KEYS.contains(&key.as_str()) {
        None
    } else {
        Some(key.clone())
    };
    Some((field, message))
}

fn message_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
