//! App-only OAuth for Reddit.
//!
//! A "script" app can read public listings with the client-credentials grant:
//! no user, no redirect, just the app id and secret exchanged for a bearer
//! token that lasts about a day.

use crate::api::RedditEndpoints;
use grepr_core::{CoreError, RedditApiError};
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, Scope, TokenResponse, TokenUrl};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Tokens are renewed this long before Reddit would expire them.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug)]
pub struct AppOnlyAuth {
    oauth_client: BasicClient,
    token: Mutex<Option<CachedToken>>,
}

impl AppOnlyAuth {
    pub fn new(
        client_id: String,
        client_secret: String,
        endpoints: &RedditEndpoints,
    ) -> Result<Self, CoreError> {
        let auth_url = AuthUrl::new(endpoints.authorize_url.clone()).map_err(|e| {
            CoreError::InvalidInput {
                message: format!("Invalid Reddit authorize URL: {}", e),
            }
        })?;
        let token_url = TokenUrl::new(endpoints.token_url.clone()).map_err(|e| {
            CoreError::InvalidInput {
                message: format!("Invalid Reddit token URL: {}", e),
            }
        })?;

        let oauth_client = BasicClient::new(
            ClientId::new(client_id),
            Some(ClientSecret::new(client_secret)),
            auth_url,
            Some(token_url),
        );

        Ok(Self {
            oauth_client,
            token: Mutex::new(None),
        })
    }

    /// Returns a valid bearer token, requesting a new one when the cached
    /// token is missing or about to expire.
    pub async fn access_token(&self) -> Result<String, CoreError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }

        debug!("Requesting app-only Reddit token");
        let response = self
            .oauth_client
            .exchange_client_credentials()
            .add_scope(Scope::new("read".to_string()))
            .request_async(async_http_client)
            .await
            .map_err(|e| {
                CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                    reason: e.to_string(),
                })
            })?;

        let lifetime = response.expires_in().unwrap_or(DEFAULT_TOKEN_LIFETIME);
        let token = CachedToken {
            access_token: response.access_token().secret().clone(),
            expires_at: Instant::now() + lifetime,
        };
        info!("Obtained Reddit app token valid for {:?}", lifetime);

        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// Drops the cached token so the next call requests a fresh one.
    pub async fn invalidate(&self) {
        *self.token.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_freshness() {
        let fresh = CachedToken {
            access_token: "a".to_string(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        let stale = CachedToken {
            access_token: "b".to_string(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        assert!(fresh.is_fresh());
        assert!(!stale.is_fresh());
    }

    #[test]
    fn test_invalidate_clears_cached_token() {
        let auth = AppOnlyAuth::new(
            "id".to_string(),
            "secret".to_string(),
            &RedditEndpoints::default(),
        )
        .unwrap();

        tokio_test::block_on(async {
            *auth.token.lock().await = Some(CachedToken {
                access_token: "cached".to_string(),
                expires_at: Instant::now() + Duration::from_secs(3600),
            });
            assert_eq!(auth.access_token().await.unwrap(), "cached");

            auth.invalidate().await;
            assert!(auth.token.lock().await.is_none());
        });
    }

    #[test]
    fn test_rejects_malformed_token_url() {
        let endpoints = RedditEndpoints {
            token_url: "not a url".to_string(),
            ..RedditEndpoints::default()
        };
        let result = AppOnlyAuth::new("id".to_string(), "secret".to_string(), &endpoints);
        assert!(matches!(result, Err(CoreError::InvalidInput { .. })));
    }
}
