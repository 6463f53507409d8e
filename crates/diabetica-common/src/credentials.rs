use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use google_cloud_auth::credentials::{user_account, CacheableResource, Credentials};
use oauth2::basic::{BasicClient, BasicRequestTokenError};
use oauth2::{
    AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, Scope, TokenResponse, TokenUrl,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::CredentialError;

pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Client-secret tokens are renewed this long before the server says they expire.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

type TokenClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

// ── Provider capability ─────────────────────────────────────────────

/// Something that can produce a bearer credential for the platform.
///
/// Two implementations exist: [`ClientSecretProvider`] exchanges a client
/// id/secret pair up front, [`StoredCredentialProvider`] reconstitutes a
/// previously authorized user credential and refreshes it on demand.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short identifier for logs, e.g. "client-secret".
    fn kind(&self) -> &'static str;

    async fn acquire(&self) -> Result<Credential, CredentialError>;
}

// ── Client id / secret exchange ─────────────────────────────────────

#[derive(Clone)]
pub struct ClientSecretProvider {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token_uri: String,
}

impl ClientSecretProvider {
    pub fn new(http: reqwest::Client, client_id: String, client_secret: String) -> Self {
        Self {
            http,
            client_id,
            client_secret,
            token_uri: GOOGLE_TOKEN_URI.to_string(),
        }
    }

    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }
}

impl fmt::Debug for ClientSecretProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretProvider")
            .field("client_id", &self.client_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for ClientSecretProvider {
    fn kind(&self) -> &'static str {
        "client-secret"
    }

    async fn acquire(&self) -> Result<Credential, CredentialError> {
        let token_url = TokenUrl::new(self.token_uri.clone()).map_err(|e| {
            CredentialError::Configuration(format!("invalid token URI {}: {e}", self.token_uri))
        })?;

        // Credentials travel in the form body, the way the platform's own
        // client libraries send them.
        let client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(token_url);

        let exchange = ClientCredentialsExchange {
            http: self.http.clone(),
            client,
            cached: Mutex::new(None),
        };
        exchange.refresh().await?;

        Ok(Credential {
            source: Source::ClientSecret(Box::new(exchange)),
        })
    }
}

struct IssuedToken {
    header: HeaderValue,
    /// `None` when the server gave no lifetime, or one too large to represent.
    renew_at: Option<Instant>,
}

impl IssuedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.renew_at.is_none_or(|at| at > now)
    }
}

struct ClientCredentialsExchange {
    http: reqwest::Client,
    client: TokenClient,
    cached: Mutex<Option<IssuedToken>>,
}

impl ClientCredentialsExchange {
    async fn headers(&self) -> Result<HeaderMap, CredentialError> {
        let mut guard = self.cached.lock().await;
        let header = match guard.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            Some(token) => token.header.clone(),
            None => {
                let fresh = self.exchange().await?;
                let header = fresh.header.clone();
                *guard = Some(fresh);
                header
            }
        };

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header);
        Ok(headers)
    }

    async fn refresh(&self) -> Result<(), CredentialError> {
        let fresh = self.exchange().await?;
        *self.cached.lock().await = Some(fresh);
        Ok(())
    }

    async fn exchange(&self) -> Result<IssuedToken, CredentialError> {
        tracing::debug!(token_uri=%self.client.token_uri().as_str(), "requesting access token");

        let issued_at = Instant::now();
        let token = self
            .client
            .exchange_client_credentials()
            .add_scope(Scope::new(CLOUD_PLATFORM_SCOPE.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| {
                let reason = describe_token_error(&e);
                tracing::error!(reason=%reason, "access token request failed");
                CredentialError::Authentication(reason)
            })?;

        let header = HeaderValue::from_str(&format!("Bearer {}", token.access_token().secret()))
            .map_err(|e| {
                CredentialError::Authentication(format!("access token is not a valid header: {e}"))
            })?;
        let renew_at = token
            .expires_in()
            .and_then(|ttl| issued_at.checked_add(ttl.saturating_sub(EXPIRY_SKEW)));

        Ok(IssuedToken { header, renew_at })
    }
}

fn describe_token_error(
    err: &BasicRequestTokenError<oauth2::HttpClientError<reqwest::Error>>,
) -> String {
    match err {
        oauth2::RequestTokenError::ServerResponse(resp) => match resp.error_description() {
            Some(desc) => format!("token endpoint rejected grant: {}: {desc}", resp.error()),
            None => format!("token endpoint rejected grant: {}", resp.error()),
        },
        other => format!("token request failed: {other}"),
    }
}

// ── Stored authorized-user credential ───────────────────────────────

/// Reconstitutes an authorized-user credential (client id/secret plus refresh
/// token, as written by the usual OAuth installed-app flows).
#[derive(Clone)]
pub struct StoredCredentialProvider {
    authorized_user: Value,
    token_uri: Option<String>,
}

impl StoredCredentialProvider {
    /// Parses and checks the serialized credential. Never performs I/O.
    pub fn from_json(raw: &str) -> Result<Self, CredentialError> {
        let authorized_user: Value = serde_json::from_str(raw).map_err(|e| {
            CredentialError::Configuration(format!("malformed authorized-user JSON: {e}"))
        })?;

        let Some(fields) = authorized_user.as_object() else {
            return Err(CredentialError::Configuration(
                "authorized-user credential must be a JSON object".to_string(),
            ));
        };
        for field in ["client_id", "client_secret", "refresh_token"] {
            let present = fields
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(CredentialError::Configuration(format!(
                    "authorized-user credential is missing `{field}`"
                )));
            }
        }

        Ok(Self {
            authorized_user,
            token_uri: None,
        })
    }

    /// Redirects refreshes to a different token endpoint than the one
    /// recorded in the credential.
    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = Some(token_uri.into());
        self
    }
}

impl fmt::Debug for StoredCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredCredentialProvider")
            .field("client_id", &self.authorized_user.get("client_id"))
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentialProvider {
    fn kind(&self) -> &'static str {
        "stored"
    }

    async fn acquire(&self) -> Result<Credential, CredentialError> {
        let mut builder = user_account::Builder::new(self.authorized_user.clone());
        if let Some(uri) = &self.token_uri {
            builder = builder.with_token_uri(uri.clone());
        }
        let credentials = builder
            .build()
            .map_err(|e| CredentialError::Configuration(format!("unusable stored credential: {e}")))?;

        Ok(Credential {
            source: Source::Stored(credentials),
        })
    }
}

// ── Credential ──────────────────────────────────────────────────────

enum Source {
    ClientSecret(Box<ClientCredentialsExchange>),
    Stored(Credentials),
}

/// A bearer credential shared read-only across requests. Token caching and
/// refresh happen inside; callers only ask for request headers.
pub struct Credential {
    source: Source,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            Source::ClientSecret(_) => "client-secret",
            Source::Stored(_) => "stored",
        };
        f.debug_struct("Credential").field("kind", &kind).finish()
    }
}

impl Credential {
    /// Authorization headers for one outbound call, refreshing the token
    /// first when it is missing or about to expire.
    pub async fn headers(&self) -> Result<HeaderMap, CredentialError> {
        match &self.source {
            Source::ClientSecret(exchange) => exchange.headers().await,
            Source::Stored(credentials) => {
                match credentials.headers(Default::default()).await.map_err(|e| {
                    CredentialError::Authentication(format!("token refresh failed: {e}"))
                })? {
                    CacheableResource::New { data, .. } => Ok(data),
                    CacheableResource::NotModified => Err(CredentialError::Authentication(
                        "credential returned no headers".to_string(),
                    )),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn token_body(token: &str) -> serde_json::Value {
        json!({"access_token": token, "expires_in": 3599, "token_type": "Bearer"})
    }

    fn stored_json() -> String {
        json!({
            "type": "authorized_user",
            "client_id": "cid.apps.googleusercontent.com",
            "client_secret": "shh",
            "refresh_token": "1//refresh",
        })
        .to_string()
    }

    fn bearer(headers: &HeaderMap) -> &str {
        headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn client_secret_refreshes_on_acquire() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=doctor%40example.com"))
            .and(body_string_contains("cloud-platform"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.first")))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClientSecretProvider::new(
            reqwest::Client::new(),
            "doctor@example.com".into(),
            "hunter2".into(),
        )
        .with_token_uri(format!("{}/token", server.uri()));

        let credential = provider.acquire().await.unwrap();
        // Served from cache, the mock only allows one exchange.
        let headers = credential.headers().await.unwrap();
        assert_eq!(bearer(&headers), "Bearer ya29.first");
    }

    #[tokio::test]
    async fn client_secret_rejection_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let provider = ClientSecretProvider::new(
            reqwest::Client::new(),
            "doctor@example.com".into(),
            "wrong".into(),
        )
        .with_token_uri(format!("{}/token", server.uri()));

        match provider.acquire().await.unwrap_err() {
            CredentialError::Authentication(msg) => {
                assert!(msg.contains("invalid_client"), "{msg}");
                assert!(msg.contains("Unauthorized"), "{msg}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_secret_network_failure_is_authentication_error() {
        let provider = ClientSecretProvider::new(reqwest::Client::new(), "a".into(), "b".into())
            .with_token_uri("http://127.0.0.1:9/token");

        let err = provider.acquire().await.unwrap_err();
        assert!(matches!(err, CredentialError::Authentication(_)));
    }

    #[tokio::test]
    async fn client_secret_bad_token_uri_is_configuration_error() {
        let provider = ClientSecretProvider::new(reqwest::Client::new(), "a".into(), "b".into())
            .with_token_uri("not a url");

        assert!(provider.acquire().await.unwrap_err().is_configuration());
    }

    #[tokio::test]
    async fn oversized_token_lifetime_does_not_panic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "t",
                "expires_in": 9223372036854775807u64,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = ClientSecretProvider::new(reqwest::Client::new(), "a".into(), "b".into())
            .with_token_uri(format!("{}/token", server.uri()));

        let credential = provider.acquire().await.unwrap();
        let headers = credential.headers().await.unwrap();
        assert_eq!(bearer(&headers), "Bearer t");
    }

    #[test]
    fn token_without_lifetime_stays_fresh() {
        let token = IssuedToken {
            header: HeaderValue::from_static("Bearer t"),
            renew_at: None,
        };
        assert!(token.is_fresh(Instant::now()));

        let expired = IssuedToken {
            header: HeaderValue::from_static("Bearer t"),
            renew_at: Some(Instant::now()),
        };
        assert!(!expired.is_fresh(Instant::now() + Duration::from_secs(1)));
    }

    #[test]
    fn stored_rejects_malformed_json() {
        let err = StoredCredentialProvider::from_json("{not json").unwrap_err();
        assert!(err.is_configuration());

        let err = StoredCredentialProvider::from_json("[1, 2]").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn stored_rejects_missing_refresh_token() {
        let raw = json!({"client_id": "a", "client_secret": "b"}).to_string();
        let err = StoredCredentialProvider::from_json(&raw).unwrap_err();
        assert!(err.is_configuration());

        let raw = json!({"client_id": "a", "client_secret": "b", "refresh_token": " "}).to_string();
        let err = StoredCredentialProvider::from_json(&raw).unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn stored_refreshes_through_token_uri() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("1//refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ya29.lazy")))
            .expect(1..)
            .mount(&server)
            .await;

        let credential = StoredCredentialProvider::from_json(&stored_json())
            .unwrap()
            .with_token_uri(format!("{}/token", server.uri()))
            .acquire()
            .await
            .unwrap();

        let headers = credential.headers().await.unwrap();
        assert_eq!(bearer(&headers), "Bearer ya29.lazy");
        let again = credential.headers().await.unwrap();
        assert_eq!(bearer(&again), "Bearer ya29.lazy");
    }

    #[tokio::test]
    async fn stored_refresh_failure_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let credential = StoredCredentialProvider::from_json(&stored_json())
            .unwrap()
            .with_token_uri(format!("{}/token", server.uri()))
            .acquire()
            .await
            .unwrap();

        let err = credential.headers().await.unwrap_err();
        assert!(matches!(err, CredentialError::Authentication(_)));
    }
}
