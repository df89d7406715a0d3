//! Access tokens for Cloud Storage.
//!
//! Credentials are resolved once, in this order:
//! 1. The file named by `GOOGLE_APPLICATION_CREDENTIALS` (must be valid if set)
//! 2. gcloud's application-default credentials file, if it exists
//! 3. The compute metadata server
//!
//! Supported credential files are `service_account` keys (exchanged through a
//! signed JWT assertion) and `authorized_user` refresh tokens. Tokens are
//! cached and refreshed shortly before they expire.

use super::StoreError;
use crate::config::Config;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

/// OAuth scope needed to create and delete objects.
pub const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Tokens closer than this to expiry are refreshed before use.
const REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// On-disk credential file, discriminated by its `type` field.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount(ServiceAccountKey),
    AuthorizedUser(AuthorizedUser),
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

#[derive(Deserialize)]
struct AuthorizedUser {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

/// Where access tokens come from.
enum Provider {
    ServiceAccount {
        email: String,
        key_id: Option<String>,
        key: EncodingKey,
        token_uri: String,
    },
    AuthorizedUser(AuthorizedUser),
    MetadataServer,
}

impl Provider {
    fn kind(&self) -> &'static str {
        match self {
            Provider::ServiceAccount { .. } => "service_account",
            Provider::AuthorizedUser(_) => "authorized_user",
            Provider::MetadataServer => "metadata_server",
        }
    }
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Cached source of bearer tokens for one set of credentials.
pub struct TokenSource {
    http: Client,
    provider: Provider,
    cached: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    /// Resolve credentials according to `config`. Does not contact any endpoint.
    pub fn from_config(http: Client, config: &Config) -> Result<Self, StoreError> {
        let provider = resolve_provider(config)?;
        debug!(credentials = provider.kind(), "resolved storage credentials");
        Ok(Self {
            http,
            provider,
            cached: Mutex::new(None),
        })
    }

    /// Return a valid access token, fetching a new one if needed.
    pub async fn access_token(&self) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }

        let token = self.fetch().await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn fetch(&self) -> Result<AccessToken, StoreError> {
        let request = match &self.provider {
            Provider::ServiceAccount {
                email,
                key_id,
                key,
                token_uri,
            } => {
                let assertion = sign_assertion(email, key_id.clone(), key, token_uri, Utc::now())?;
                self.http
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            Provider::AuthorizedUser(user) => self.http.post(DEFAULT_TOKEN_URI).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", user.client_id.as_str()),
                ("client_secret", user.client_secret.as_str()),
                ("refresh_token", user.refresh_token.as_str()),
            ]),
            Provider::MetadataServer => self
                .http
                .get(METADATA_TOKEN_URL)
                .header("Metadata-Flavor", "Google"),
        };

        let issued_at = Utc::now();
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Auth(format!("{} token request failed: {}", self.provider.kind(), e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Auth(format!(
                "{} token endpoint returned HTTP {}: {}",
                self.provider.kind(),
                status.as_u16(),
                body.trim()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StoreError::Auth(format!("invalid token response: {}", e)))?;

        Ok(AccessToken {
            value: token.access_token,
            expires_at: issued_at + Duration::seconds(token.expires_in),
        })
    }
}

fn resolve_provider(config: &Config) -> Result<Provider, StoreError> {
    if let Some(path) = &config.credentials_file {
        return load_credentials_file(path);
    }

    if let Some(path) = config.application_default_credentials()
        && path.is_file()
    {
        return load_credentials_file(&path);
    }

    Ok(Provider::MetadataServer)
}

fn load_credentials_file(path: &Path) -> Result<Provider, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        StoreError::Auth(format!(
            "failed to read credentials file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let parsed: CredentialsFile = serde_json::from_str(&content).map_err(|e| {
        StoreError::Auth(format!(
            "failed to parse credentials file '{}': {}",
            path.display(),
            e
        ))
    })?;

    match parsed {
        CredentialsFile::ServiceAccount(sa) => {
            let key = EncodingKey::from_rsa_pem(sa.private_key.as_bytes()).map_err(|e| {
                StoreError::Auth(format!(
                    "invalid private key in '{}': {}",
                    path.display(),
                    e
                ))
            })?;
            Ok(Provider::ServiceAccount {
                email: sa.client_email,
                key_id: sa.private_key_id,
                key,
                token_uri: sa.token_uri,
            })
        }
        CredentialsFile::AuthorizedUser(user) => Ok(Provider::AuthorizedUser(user)),
    }
}

fn sign_assertion(
    email: &str,
    key_id: Option<String>,
    key: &EncodingKey,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String, StoreError> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key_id;

    let iat = now.timestamp();
    let claims = AssertionClaims {
        iss: email,
        scope: STORAGE_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + 3600,
    };

    jsonwebtoken::encode(&header, &claims, key)
        .map_err(|e| StoreError::Auth(format!("failed to sign token assertion: {}", e)))
}
