use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use diabetica_common::{Credential, CredentialError};

/// One unit of input submitted to the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub text: String,
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("request to prediction endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("prediction endpoint returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed prediction response: {0}")]
    Decode(String),

    #[error("prediction endpoint returned no predictions")]
    EmptyPredictions,
}

/// A remote model that turns instances into predictions. Implementations
/// make exactly one call per invocation and keep no per-call state.
#[async_trait]
pub trait PredictionEndpoint: Send + Sync {
    async fn predict(&self, instances: &[Instance]) -> Result<Vec<Value>, PredictError>;
}

/// Identifies a deployed endpoint within a project and location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRef {
    pub project: String,
    pub location: String,
    pub endpoint_id: String,
}

impl EndpointRef {
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/endpoints/{}",
            self.project, self.location, self.endpoint_id
        )
    }

    pub fn default_api_base(&self) -> String {
        format!("https://{}-aiplatform.googleapis.com", self.location)
    }
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    instances: &'a [Instance],
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Value>,
}

#[derive(Deserialize)]
struct EndpointResource {
    #[serde(default, rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Vertex AI online prediction endpoint, authenticated with a bearer credential.
#[derive(Debug, Clone)]
pub struct VertexEndpoint {
    http: reqwest::Client,
    api_base: String,
    endpoint: EndpointRef,
    credential: Arc<Credential>,
}

impl VertexEndpoint {
    pub fn new(
        http: reqwest::Client,
        api_base: Option<String>,
        endpoint: EndpointRef,
        credential: Arc<Credential>,
    ) -> Self {
        let api_base = api_base
            .unwrap_or_else(|| endpoint.default_api_base())
            .trim_end_matches('/')
            .to_string();
        Self {
            http,
            api_base,
            endpoint,
            credential,
        }
    }

    /// Builds the handle and confirms the endpoint exists and is reachable
    /// with this credential.
    pub async fn bind(
        http: reqwest::Client,
        api_base: Option<String>,
        endpoint: EndpointRef,
        credential: Arc<Credential>,
    ) -> Result<Self, PredictError> {
        let handle = Self::new(http, api_base, endpoint, credential);
        let url = format!("{}/v1/{}", handle.api_base, handle.endpoint.resource_name());
        let auth = handle.credential.headers().await?;

        let resp = handle.http.get(url).headers(auth).send().await?;
        let resp = check_status(resp).await?;
        let resource: EndpointResource = resp
            .json()
            .await
            .map_err(|e| PredictError::Decode(e.to_string()))?;

        tracing::info!(
            endpoint=%handle.endpoint.resource_name(),
            display_name=%resource.display_name.as_deref().unwrap_or("-"),
            "bound prediction endpoint"
        );
        Ok(handle)
    }

    pub fn endpoint(&self) -> &EndpointRef {
        &self.endpoint
    }

    fn predict_url(&self) -> String {
        format!(
            "{}/v1/{}:predict",
            self.api_base,
            self.endpoint.resource_name()
        )
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, PredictError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(ApiErrorBody { error }) => match error.status {
            Some(code) => format!("{code}: {}", error.message),
            None => error.message,
        },
        Err(_) => body,
    };
    Err(PredictError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl PredictionEndpoint for VertexEndpoint {
    async fn predict(&self, instances: &[Instance]) -> Result<Vec<Value>, PredictError> {
        let auth = self.credential.headers().await?;
        let resp = self
            .http
            .post(self.predict_url())
            .headers(auth)
            .json(&PredictRequest { instances })
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: PredictResponse = resp
            .json()
            .await
            .map_err(|e| PredictError::Decode(e.to_string()))?;
        Ok(body.predictions)
    }
}

/// Asks one question at a time against a bound endpoint.
#[derive(Clone)]
pub struct PredictionClient {
    endpoint: Arc<dyn PredictionEndpoint>,
}

impl PredictionClient {
    pub fn new(endpoint: Arc<dyn PredictionEndpoint>) -> Self {
        Self { endpoint }
    }

    /// Sends `question` verbatim as the only instance and returns the first
    /// prediction. String predictions come back as-is, anything else as JSON.
    pub async fn ask(&self, question: &str) -> Result<String, PredictError> {
        let instances = [Instance {
            text: question.to_string(),
        }];
        let predictions = self.endpoint.predict(&instances).await?;
        let first = predictions
            .into_iter()
            .next()
            .ok_or(PredictError::EmptyPredictions)?;
        Ok(match first {
            Value::String(s) => s,
            other => other.to_string(),
        })
    }
}
