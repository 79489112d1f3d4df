use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::store::{SessionStore, StoreError};

/// Store key holding the `{access, refresh}` token pair.
pub const TOKENS_KEY: &str = "authTokens";

/// Store key holding the user record.
pub const USER_KEY: &str = "user";

/// Store key holding the selected device; cleared together with the session.
pub const ACTIVE_DEVICE_KEY: &str = "activeDevice";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl User {
    /// Full name when the backend has one, otherwise the username.
    pub fn display_name(&self) -> String {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.username.clone()
        } else {
            full
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access: String,
    pub refresh: String,
}

/// An authenticated identity. User and tokens only ever exist together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Anonymous,
    Authenticated,
    /// Transient: a 401 was seen and the refresh exchange is in flight.
    Refreshing,
}

impl Session {
    /// Restore a session from the store.
    ///
    /// Both keys must be present and parse; anything else is treated as
    /// anonymous and the leftovers are removed.
    pub fn load(store: &dyn SessionStore) -> Option<Session> {
        let tokens = store.load(TOKENS_KEY);
        let user = store.load(USER_KEY);

        match (tokens, user) {
            (Ok(Some(tokens)), Ok(Some(user))) => {
                let parsed = serde_json::from_str::<AuthTokens>(&tokens)
                    .and_then(|t| serde_json::from_str::<User>(&user).map(|u| (t, u)));
                match parsed {
                    Ok((tokens, user)) => {
                        debug!(username = %user.username, "Restored persisted session");
                        Some(Session { user, tokens })
                    }
                    Err(e) => {
                        warn!(error = %e, "Persisted session is malformed, discarding");
                        Self::erase(store);
                        None
                    }
                }
            }
            (Ok(None), Ok(None)) => None,
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Failed to read persisted session");
                None
            }
            _ => {
                warn!("Persisted session is incomplete, discarding");
                Self::erase(store);
                None
            }
        }
    }

    /// Write both halves of the session to the store.
    pub fn save(&self, store: &dyn SessionStore) {
        if let Err(e) = self.try_save(store) {
            warn!(error = %e, "Failed to save session");
        }
    }

    fn try_save(&self, store: &dyn SessionStore) -> Result<(), StoreError> {
        store.save(TOKENS_KEY, &serde_json::to_string(&self.tokens)?)?;
        store.save(USER_KEY, &serde_json::to_string(&self.user)?)?;
        Ok(())
    }

    /// Remove every persisted key tied to the session.
    pub fn erase(store: &dyn SessionStore) {
        for key in [TOKENS_KEY, USER_KEY, ACTIVE_DEVICE_KEY] {
            if let Err(e) = store.clear(key) {
                warn!(key, error = %e, "Failed to clear persisted key");
            }
        }
    }
}
