use std::fmt;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use diabetica_common::{
    ClientSecretProvider, CredentialError, CredentialProvider, StoredCredentialProvider,
};

use crate::predict::EndpointRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CredentialSource {
    /// Exchange GOOGLE_EMAIL / GOOGLE_PASSWORD at the token endpoint.
    ClientSecret,
    /// Reuse the authorized-user JSON in GOOGLE_CREDENTIALS.
    Stored,
}

#[derive(Parser)]
#[command(author, version, about = "Web form in front of a hosted prediction endpoint")]
pub struct Args {
    #[arg(long, env = "PROJECT_ID")]
    pub project_id: Option<String>,

    #[arg(long, env = "ENDPOINT_ID")]
    pub endpoint_id: Option<String>,

    #[arg(long, env = "REGION")]
    pub region: Option<String>,

    #[arg(long, env = "GOOGLE_EMAIL")]
    pub google_email: Option<String>,

    #[arg(long, env = "GOOGLE_PASSWORD", hide_env_values = true)]
    pub google_password: Option<String>,

    #[arg(long, env = "GOOGLE_CREDENTIALS", hide_env_values = true)]
    pub google_credentials: Option<String>,

    /// Which credential flow to use. Inferred from the variables present when unset.
    #[arg(long, env = "CREDENTIAL_SOURCE", value_enum)]
    pub credential_source: Option<CredentialSource>,

    #[arg(long, env = "DIABETICA_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Defaults to 8084 for client-secret credentials and 8080 for stored ones.
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the prediction API, e.g. "https://us-central1-aiplatform.googleapis.com".
    #[arg(long, env = "DIABETICA_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long, env = "DIABETICA_TOKEN_URI")]
    pub token_uri: Option<String>,

    #[arg(long, env = "DIABETICA_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,

    /// OTLP/HTTP endpoint for exporting traces.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_TOKEN", hide_env_values = true)]
    pub otlp_token: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration `{0}`")]
    Missing(&'static str),

    #[error("no credentials configured: set GOOGLE_CREDENTIALS, or GOOGLE_EMAIL and GOOGLE_PASSWORD")]
    NoCredentials,

    #[error("both GOOGLE_CREDENTIALS and GOOGLE_EMAIL are set: choose one with CREDENTIAL_SOURCE")]
    AmbiguousCredentials,

    #[error("DIABETICA_REQUEST_TIMEOUT_SECS must be greater than zero")]
    ZeroTimeout,
}

#[derive(Clone, PartialEq, Eq)]
pub enum CredentialSettings {
    ClientSecret {
        client_id: String,
        client_secret: String,
    },
    Stored {
        json: String,
    },
}

impl fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSettings::ClientSecret { client_id, .. } => f
                .debug_struct("ClientSecret")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            CredentialSettings::Stored { .. } => f.debug_struct("Stored").finish_non_exhaustive(),
        }
    }
}

impl CredentialSettings {
    /// Builds the provider for this credential flow. Stored credentials are
    /// parsed here, so malformed JSON fails before any network call.
    pub fn into_provider(
        self,
        http: reqwest::Client,
        token_uri: Option<String>,
    ) -> Result<Box<dyn CredentialProvider>, CredentialError> {
        match self {
            CredentialSettings::ClientSecret {
                client_id,
                client_secret,
            } => {
                let mut provider = ClientSecretProvider::new(http, client_id, client_secret);
                if let Some(uri) = token_uri {
                    provider = provider.with_token_uri(uri);
                }
                Ok(Box::new(provider))
            }
            CredentialSettings::Stored { json } => {
                let mut provider = StoredCredentialProvider::from_json(&json)?;
                if let Some(uri) = token_uri {
                    provider = provider.with_token_uri(uri);
                }
                Ok(Box::new(provider))
            }
        }
    }
}

/// Validated startup configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub endpoint: EndpointRef,
    pub credentials: CredentialSettings,
    pub listen_addr: String,
    pub api_base: Option<String>,
    pub token_uri: Option<String>,
    pub request_timeout: Duration,
}

fn required(value: Option<String>, var: &'static str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl Args {
    pub fn into_settings(self) -> Result<Settings, ConfigError> {
        let project = required(self.project_id, "PROJECT_ID")?;
        let endpoint_id = required(self.endpoint_id, "ENDPOINT_ID")?;
        let location = required(self.region, "REGION")?;

        let source = match self.credential_source {
            Some(source) => source,
            None => match (
                present(&self.google_credentials),
                present(&self.google_email) || present(&self.google_password),
            ) {
                (true, false) => CredentialSource::Stored,
                (false, true) => CredentialSource::ClientSecret,
                (true, true) => return Err(ConfigError::AmbiguousCredentials),
                (false, false) => return Err(ConfigError::NoCredentials),
            },
        };

        let credentials = match source {
            CredentialSource::ClientSecret => CredentialSettings::ClientSecret {
                client_id: required(self.google_email, "GOOGLE_EMAIL")?,
                client_secret: required(self.google_password, "GOOGLE_PASSWORD")?,
            },
            CredentialSource::Stored => CredentialSettings::Stored {
                json: required(self.google_credentials, "GOOGLE_CREDENTIALS")?,
            },
        };

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        let port = self.port.unwrap_or(match source {
            CredentialSource::ClientSecret => 8084,
            CredentialSource::Stored => 8080,
        });

        Ok(Settings {
            endpoint: EndpointRef {
                project,
                location,
                endpoint_id,
            },
            credentials,
            listen_addr: format!("{}:{port}", self.host),
            api_base: self.api_base.filter(|v| !v.trim().is_empty()),
            token_uri: self.token_uri.filter(|v| !v.trim().is_empty()),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        })
    }
}
