use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::domain::{Principal, Role};
use tracing::{info, warn};

use crate::{
    error::ClientError,
    http::{ClientResult, CrmApi},
    store::{keys, StateContainer},
};

/// What `auth.session` holds while someone is logged in. The bearer token
/// itself stays inside the HTTP client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: Principal,
}

#[derive(Clone)]
pub struct AuthSession {
    api: Arc<dyn CrmApi>,
    store: StateContainer,
}

impl AuthSession {
    pub fn new(api: Arc<dyn CrmApi>, store: StateContainer) -> Self {
        Self { api, store }
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<Principal> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ClientError::Validation(
                "username and password are required".into(),
            ));
        }
        let response = self.api.login(username.trim(), password).await?;
        let user = response.user;
        self.store.set(keys::AUTH_EXPIRED, Value::Bool(false));
        self.store.set_as(keys::AUTH_SESSION, &Session { user: user.clone() });

        if let Err(error) = self.api.touch_last_access(user.id).await {
            warn!(user_id = %user.id, %error, "could not record last access");
        }
        Ok(user)
    }

    pub fn logout(&self) {
        self.api.logout();
        if self.store.remove(keys::AUTH_SESSION) {
            info!("logged out");
        }
    }

    pub fn principal(&self) -> Option<Principal> {
        self.store
            .get_as::<Session>(keys::AUTH_SESSION)
            .map(|session| session.user)
    }

    pub fn is_expired(&self) -> bool {
        self.store.get_as::<bool>(keys::AUTH_EXPIRED).unwrap_or(false)
    }

    /// Admins pass every check; sellers only `Role::Seller`.
    pub fn require_role(&self, role: Role) -> ClientResult<Principal> {
        let principal = self
            .principal()
            .ok_or_else(|| ClientError::Auth("not logged in".into()))?;
        match (principal.role, role) {
            (Role::Admin, _) | (Role::Seller, Role::Seller) => Ok(principal),
            (Role::Seller, Role::Admin) => Err(ClientError::Forbidden(
                "this action needs an administrator".into(),
            )),
        }
    }
}

/// Called when the server rejects the token: the session is gone and the
/// operator has to log in again.
pub(crate) fn expire(store: &StateContainer) {
    store.remove(keys::AUTH_SESSION);
    store.set(keys::AUTH_EXPIRED, Value::Bool(true));
}
