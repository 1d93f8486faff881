//! OAuth2 authentication and token management for Google Drive.

use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use drivesync_common::{Error, Result};

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Redirect URL for the installed-app flow.
const REDIRECT_URL: &str = "http://localhost:8080/callback";

/// Full Drive scope; the synchronizer reads folders it did not create.
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Remaining lifetime below which an access token counts as expired.
const EXPIRY_MARGIN_MINUTES: i64 = 5;

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// Refresh token for obtaining new access tokens.
    pub refresh_token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now() + Duration::minutes(EXPIRY_MARGIN_MINUTES)
    }

    /// Load tokens saved by [`Tokens::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::Authentication(format!(
                "No saved credentials at {}; run login first",
                path.display()
            )),
            _ => Error::Io(e),
        })?;
        serde_json::from_str(&json).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Persist tokens as JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// OAuth2 client registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Client ID issued by the Google Cloud console.
    pub client_id: String,
    /// Client secret issued alongside the ID.
    pub client_secret: String,
    /// Redirect URL for the OAuth2 callback.
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
}

fn default_redirect_url() -> String {
    REDIRECT_URL.to_string()
}

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: GoogleClient,
    http: oauth2::reqwest::Client,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager.
    ///
    /// # Errors
    /// - Empty client ID
    /// - Malformed redirect URL
    pub fn new(config: AuthConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "OAuth2 client ID must not be empty".to_string(),
            ));
        }

        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(GOOGLE_AUTH_URL.to_string())
                    .map_err(|e| Error::InvalidArgument(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(GOOGLE_TOKEN_URL.to_string())
                    .map_err(|e| Error::InvalidArgument(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_url.clone())
                    .map_err(|e| Error::InvalidArgument(format!("Invalid redirect URL: {}", e)))?,
            );

        // Token endpoints must not be followed through redirects.
        let http = oauth2::reqwest::Client::builder()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            http,
            config,
        })
    }

    /// Generate the authorization URL for the user to visit.
    ///
    /// Returns the URL and a CSRF token that should be verified on callback.
    pub fn authorization_url(&self) -> (String, String) {
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        (auth_url.to_string(), csrf_token.secret().clone())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - Invalid authorization code
    /// - No refresh token granted
    pub async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        let refresh_token = token_result
            .refresh_token()
            .ok_or_else(|| {
                Error::Authentication(
                    "No refresh token received; offline access was not granted".to_string(),
                )
            })?
            .secret()
            .clone();

        Ok(Tokens {
            access_token: token_result.access_token().secret().clone(),
            refresh_token,
            expires_at: expiry_from(token_result.expires_in()),
        })
    }

    /// Refresh an access token using the refresh token.
    ///
    /// # Errors
    /// - Invalid or revoked refresh token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        // Google usually omits the refresh token on refresh.
        let refresh_token = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(Tokens {
            access_token: token_result.access_token().secret().clone(),
            refresh_token,
            expires_at: expiry_from(token_result.expires_in()),
        })
    }

    /// Get the current configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

fn expiry_from(expires_in: Option<std::time::Duration>) -> DateTime<Utc> {
    let lifetime = expires_in
        .and_then(|d| Duration::from_std(d).ok())
        .unwrap_or_else(|| Duration::hours(1));
    Utc::now() + lifetime
}

/// Token manager that refreshes expired tokens on demand.
pub struct TokenManager {
    auth_manager: AuthManager,
    tokens: tokio::sync::RwLock<Tokens>,
}

impl TokenManager {
    /// Create a new token manager with initial tokens.
    pub fn new(auth_manager: AuthManager, tokens: Tokens) -> Self {
        Self {
            auth_manager,
            tokens: tokio::sync::RwLock::new(tokens),
        }
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn get_access_token(&self) -> Result<String> {
        let tokens = self.tokens.read().await;
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }
        drop(tokens);

        let mut tokens = self.tokens.write().await;

        // Another task may have refreshed while we waited.
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        tracing::info!("Refreshing expired access token");
        *tokens = self
            .auth_manager
            .refresh_token(&tokens.refresh_token)
            .await?;

        Ok(tokens.access_token.clone())
    }

    /// Get the current tokens.
    pub async fn get_tokens(&self) -> Tokens {
        self.tokens.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            client_id: "test_id".to_string(),
            client_secret: "test_secret".to_string(),
            redirect_url: REDIRECT_URL.to_string(),
        }
    }

    fn tokens(expires_at: DateTime<Utc>) -> Tokens {
        Tokens {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
        }
    }

    #[test]
    fn test_tokens_expiration() {
        assert!(tokens(Utc::now() - Duration::hours(1)).is_expired());
        assert!(!tokens(Utc::now() + Duration::hours(1)).is_expired());
        // Inside the safety margin counts as expired.
        assert!(tokens(Utc::now() + Duration::minutes(4)).is_expired());
    }

    #[test]
    fn test_tokens_save_load() {
        let dir = std::env::temp_dir().join(format!("drivesync-auth-{}", uuid::Uuid::new_v4()));
        let path = dir.join("tokens.json");

        let original = tokens(Utc::now());
        original.save(&path).unwrap();
        let loaded = Tokens::load(&path).unwrap();

        assert_eq!(loaded.access_token, original.access_token);
        assert_eq!(loaded.refresh_token, original.refresh_token);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_tokens_is_auth_error() {
        let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));
        assert!(matches!(Tokens::load(&path), Err(Error::Authentication(_))));
    }

    #[test]
    fn test_auth_config_default_redirect() {
        let parsed: AuthConfig =
            serde_json::from_str(r#"{"client_id":"a","client_secret":"b"}"#).unwrap();
        assert_eq!(parsed.redirect_url, REDIRECT_URL);
    }

    #[test]
    fn test_empty_client_id_rejected() {
        let mut bad = config();
        bad.client_id = "  ".to_string();
        assert!(matches!(AuthManager::new(bad), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_authorization_url_generation() {
        let manager = AuthManager::new(config()).unwrap();
        let (url, csrf_token) = manager.authorization_url();

        assert!(url.contains("accounts.google.com"));
        assert!(url.contains("client_id=test_id"));
        assert!(url.contains("access_type=offline"));
        assert!(!csrf_token.is_empty());
    }
}
