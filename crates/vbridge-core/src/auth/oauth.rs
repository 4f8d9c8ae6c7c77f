use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{BridgeError, BridgeResult};

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expiry: OffsetDateTime,
}

/// "Fetch a bearer token and its expiry" capability of the credential
/// backend. Mocked in tests; implemented in production by the JWT-bearer
/// exchange below.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> BridgeResult<AccessToken>;
}

/// A Google service-account key file, as downloaded from the console.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub private_key_id: String,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &std::path::Path) -> BridgeResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            BridgeError::Credential(format!("cannot read {}: {err}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            BridgeError::Credential(format!("malformed service account key: {err}"))
        })
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// RS256 JWT-bearer grant against the service account's token endpoint.
pub struct JwtTokenSource {
    key: ServiceAccountKey,
    client: wreq::Client,
}

impl JwtTokenSource {
    pub fn new(key: ServiceAccountKey) -> BridgeResult<Self> {
        let client = wreq::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        Ok(Self { key, client })
    }

    fn token_uri(&self) -> &str {
        self.key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[async_trait::async_trait]
impl TokenSource for JwtTokenSource {
    async fn fetch(&self) -> BridgeResult<AccessToken> {
        use jsonwebtoken::{Algorithm, EncodingKey, Header};

        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = JwtClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: self.token_uri(),
            exp: now + TOKEN_LIFETIME_SECS,
            iat: now,
        };

        let mut header = Header::new(Algorithm::RS256);
        if !self.key.private_key_id.trim().is_empty() {
            header.kid = Some(self.key.private_key_id.clone());
        }
        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|err| BridgeError::Credential(err.to_string()))?;
        let assertion = jsonwebtoken::encode(&header, &claims, &encoding_key)
            .map_err(|err| BridgeError::Credential(err.to_string()))?;

        let body = format!(
            "grant_type=urn:ietf:params:oauth:grant-type:jwt-bearer&assertion={}",
            urlencoding::encode(&assertion)
        );
        let response = self
            .client
            .post(self.token_uri())
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::Credential(format!(
                "token endpoint returned {status}: {text}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| BridgeError::Transport(err.to_string()))?;
        let token: OAuthTokenResponse = serde_json::from_slice(&bytes)
            .map_err(|err| BridgeError::Credential(err.to_string()))?;

        let expires_at = now + token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS);
        let expiry = OffsetDateTime::from_unix_timestamp(expires_at)
            .map_err(|err| BridgeError::Credential(err.to_string()))?;
        Ok(AccessToken {
            token: token.access_token,
            expiry,
        })
    }
}
