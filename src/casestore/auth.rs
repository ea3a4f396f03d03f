//! Identity provider client with per-jurisdiction token caching.
//!
//! Each jurisdiction has its own system user. Tokens are cached until
//! shortly before expiry; a cache miss re-authenticates against the
//! identity provider.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::CaseStoreError;

/// Tokens cached for this long less than their reported lifetime, so a
/// token is never used right at its expiry edge.
const EXPIRY_SLACK_SECS: i64 = 60;

/// Credentials attached to store calls made on behalf of a user — either a
/// jurisdiction's system user (queue path) or the callback requester.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_token: SecretString,
    pub user_id: String,
}

impl UserCredentials {
    pub fn new(user_token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            user_token: SecretString::from(user_token.into()),
            user_id: user_id.into(),
        }
    }
}

/// Issues system-user credentials for a jurisdiction.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, jurisdiction: &str) -> Result<UserCredentials, CaseStoreError>;
}

/// A jurisdiction system user's login.
#[derive(Debug, Clone)]
pub struct JurisdictionUser {
    pub username: String,
    pub password: SecretString,
}

/// Map of jurisdiction → system user, read from the environment at startup
/// (`IDAM_USER_<JURISDICTION>=username:password`).
pub fn jurisdiction_users_from_env() -> HashMap<String, JurisdictionUser> {
    std::env::vars()
        .filter_map(|(key, value)| {
            let jurisdiction = key.strip_prefix("IDAM_USER_")?.to_lowercase();
            let (username, password) = value.split_once(':')?;
            Some((
                jurisdiction,
                JurisdictionUser {
                    username: username.to_string(),
                    password: SecretString::from(password.to_string()),
                },
            ))
        })
        .collect()
}

#[derive(Debug, Clone)]
struct CachedToken {
    credentials: UserCredentials,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct UserDetailsResponse {
    id: String,
}

/// Identity-provider client caching one token per jurisdiction.
pub struct CachedIdamClient {
    http: reqwest::Client,
    base_url: String,
    users: HashMap<String, JurisdictionUser>,
    cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl CachedIdamClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        users: HashMap<String, JurisdictionUser>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            users,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn user_for(&self, jurisdiction: &str) -> Result<&JurisdictionUser, CaseStoreError> {
        self.users
            .get(&jurisdiction.to_lowercase())
            .ok_or_else(|| CaseStoreError::Auth {
                jurisdiction: jurisdiction.to_string(),
                reason: "no system user configured".to_string(),
            })
    }

    async fn login(&self, jurisdiction: &str) -> Result<CachedToken, CaseStoreError> {
        let user = self.user_for(jurisdiction)?;

        let token: TokenResponse = self
            .http
            .post(format!("{}/o/token", self.base_url))
            .form(&[
                ("grant_type", "password"),
                ("username", user.username.as_str()),
                ("password", user.password.expose_secret()),
            ])
            .send()
            .await
            .map_err(|e| auth_error(jurisdiction, e))?
            .error_for_status()
            .map_err(|e| auth_error(jurisdiction, e))?
            .json()
            .await
            .map_err(|e| auth_error(jurisdiction, e))?;

        let details: UserDetailsResponse = self
            .http
            .get(format!("{}/details", self.base_url))
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| auth_error(jurisdiction, e))?
            .error_for_status()
            .map_err(|e| auth_error(jurisdiction, e))?
            .json()
            .await
            .map_err(|e| auth_error(jurisdiction, e))?;

        info!(jurisdiction = %jurisdiction, "Authenticated system user");

        Ok(CachedToken {
            credentials: UserCredentials::new(token.access_token, details.id),
            expires_at: Utc::now()
                + Duration::seconds((token.expires_in - EXPIRY_SLACK_SECS).max(0)),
        })
    }
}

fn auth_error(jurisdiction: &str, e: reqwest::Error) -> CaseStoreError {
    CaseStoreError::Auth {
        jurisdiction: jurisdiction.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl AuthProvider for CachedIdamClient {
    async fn authenticate(&self, jurisdiction: &str) -> Result<UserCredentials, CaseStoreError> {
        let key = jurisdiction.to_lowercase();

        if let Some(cached) = self.cache.read().await.get(&key) {
            if cached.expires_at > Utc::now() {
                debug!(jurisdiction = %jurisdiction, "Using cached token");
                return Ok(cached.credentials.clone());
            }
        }

        let fresh = self.login(jurisdiction).await?;
        let credentials = fresh.credentials.clone();
        self.cache.write().await.insert(key, fresh);
        Ok(credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jurisdiction_users_parse_user_colon_password() {
        // SAFETY: test-local env mutation; no concurrent readers of this var.
        unsafe { std::env::set_var("IDAM_USER_BULKSCAN", "system@example.com:hunter2") };
        let users = jurisdiction_users_from_env();
        let user = users.get("bulkscan").expect("bulkscan user");
        assert_eq!(user.username, "system@example.com");
        assert_eq!(user.password.expose_secret(), "hunter2");
        unsafe { std::env::remove_var("IDAM_USER_BULKSCAN") };
    }

    #[test]
    fn missing_jurisdiction_user_is_an_auth_error() {
        let client =
            CachedIdamClient::new(reqwest::Client::new(), "http://localhost:5000", HashMap::new());
        let err = client.user_for("probate").unwrap_err();
        assert!(matches!(err, CaseStoreError::Auth { ref jurisdiction, .. } if jurisdiction == "probate"));
    }
}
