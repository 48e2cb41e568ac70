//! Client for the code generation backend.
//!
//! ## Endpoints
//!
//! - `POST /generate-app` - `{ "user_prompt": ... }` → generated app source
//! - `GET /components` - component catalogue available to generated apps
//! - `GET /health` - health check

use crate::config::StudioConfig;
use crate::error::GenerateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Successful generation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Generated application source, possibly wrapped in a code fence.
    pub code: String,
    /// UI components the generated source imports.
    pub used_components: Vec<String>,
    /// Backend status message.
    pub message: String,
}

/// Something that turns a prompt into application source.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate an application for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerateError>;
}

/// Component available to generated apps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component name.
    pub name: String,
    /// Exported items.
    #[serde(default)]
    pub items: Vec<String>,
    /// Supported props.
    #[serde(default)]
    pub props: Vec<String>,
    /// Import statement for the component.
    #[serde(rename = "import", default)]
    pub import_statement: String,
}

/// Backend health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Status string, `healthy` when up.
    pub status: String,
    /// Service name.
    #[serde(default)]
    pub service: String,
}

impl HealthStatus {
    /// True if the backend reports itself healthy.
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    user_prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    success: bool,
    #[serde(default)]
    app_jsx_code: Option<String>,
    #[serde(default)]
    used_components: Vec<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComponentsResponse {
    components: Vec<ComponentInfo>,
}

/// [`Generator`] backed by the HTTP generation service.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    http: reqwest::Client,
    config: StudioConfig,
}

impl HttpGenerator {
    /// Create a client using the configured base URL and request timeout.
    pub fn new(config: StudioConfig) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerateError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    /// Check backend health.
    pub async fn health(&self) -> Result<HealthStatus, GenerateError> {
        let url = self.config.endpoint("/health");
        tracing::debug!(url = %url, "Checking backend health");
        let response = self.http.get(&url).send().await.map_err(request_error)?;
        decode(response).await
    }

    /// Fetch the component catalogue.
    pub async fn components(&self) -> Result<Vec<ComponentInfo>, GenerateError> {
        let url = self.config.endpoint("/components");
        tracing::debug!(url = %url, "Fetching component catalogue");
        let response = self.http.get(&url).send().await.map_err(request_error)?;
        let body: ComponentsResponse = decode(response).await?;
        tracing::debug!(count = body.components.len(), "Component catalogue received");
        Ok(body.components)
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerateError> {
        let url = self.config.endpoint("/generate-app");
        let start = std::time::Instant::now();
        tracing::info!(url = %url, prompt_len = prompt.len(), "Requesting app generation");

        let response = self
            .http
            .post(&url)
            .json(&GenerateRequest {
                user_prompt: prompt,
            })
            .send()
            .await
            .map_err(request_error)?;
        let body: GenerateResponse = decode(response).await?;

        if !body.success {
            let message = body
                .message
                .unwrap_or_else(|| "Failed to generate app".to_string());
            tracing::warn!(message = %message, "Backend declined generation");
            return Err(GenerateError::Rejected(message));
        }
        let code = body
            .app_jsx_code
            .filter(|code| !code.trim().is_empty())
            .ok_or_else(|| GenerateError::InvalidResponse("missing app_jsx_code".into()))?;

        tracing::info!(
            code_len = code.len(),
            components = body.used_components.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "App generated"
        );
        Ok(Generation {
            code,
            used_components: body.used_components,
            message: body.message.unwrap_or_default(),
        })
    }
}

fn request_error(e: reqwest::Error) -> GenerateError {
    if e.is_decode() {
        GenerateError::InvalidResponse(e.to_string())
    } else if e.is_builder() {
        GenerateError::Client(e.to_string())
    } else {
        tracing::warn!(error = %e, timeout = e.is_timeout(), "Backend request failed");
        GenerateError::BackendUnavailable(e.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, GenerateError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "Backend returned error status");
        return Err(GenerateError::Http {
            status: status.as_u16(),
            body,
        });
    }
    response.json().await.map_err(request_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn serve(router: Router) -> StudioConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        StudioConfig {
            api_url: format!("http://{addr}"),
            request_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_generate_success() {
        let router = Router::new().route(
            "/generate-app",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["user_prompt"], "build a counter");
                Json(json!({
                    "success": true,
                    "app_jsx_code": "```jsx\nexport default ...\n```",
                    "used_components": ["button", "card"],
                    "message": "App generated successfully"
                }))
            }),
        );
        let client = HttpGenerator::new(serve(router).await).unwrap();

        let generation = client.generate("build a counter").await.unwrap();
        assert_eq!(generation.code, "```jsx\nexport default ...\n```");
        assert_eq!(generation.used_components, vec!["button", "card"]);
        assert_eq!(generation.message, "App generated successfully");
    }

    #[tokio::test]
    async fn test_generate_rejected() {
        let router = Router::new().route(
            "/generate-app",
            post(|| async { Json(json!({ "success": false, "message": "no components" })) }),
        );
        let client = HttpGenerator::new(serve(router).await).unwrap();

        let err = client.generate("x").await.unwrap_err();
        assert_eq!(err, GenerateError::Rejected("no components".into()));
    }

    #[tokio::test]
    async fn test_generate_server_error() {
        let router = Router::new().route(
            "/generate-app",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Components not loaded") }),
        );
        let client = HttpGenerator::new(serve(router).await).unwrap();

        let err = client.generate("x").await.unwrap_err();
        assert_eq!(
            err,
            GenerateError::Http {
                status: 500,
                body: "Components not loaded".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_generate_timeout_is_backend_unavailable() {
        let router = Router::new().route(
            "/generate-app",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "success": true, "app_jsx_code": "late" }))
            }),
        );
        let client = HttpGenerator::new(serve(router).await).unwrap();

        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, GenerateError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_backend_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpGenerator::new(StudioConfig {
            api_url: format!("http://{addr}"),
            ..Default::default()
        })
        .unwrap();

        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, GenerateError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_code_is_invalid_response() {
        let router = Router::new().route(
            "/generate-app",
            post(|| async { Json(json!({ "success": true, "app_jsx_code": "" })) }),
        );
        let client = HttpGenerator::new(serve(router).await).unwrap();

        let err = client.generate("x").await.unwrap_err();
        assert!(matches!(err, GenerateError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_health_and_components() {
        let router = Router::new()
            .route(
                "/health",
                get(|| async {
                    Json(json!({ "status": "healthy", "service": "Shadcn React App Generator" }))
                }),
            )
            .route(
                "/components",
                get(|| async {
                    Json(json!({ "components": [{
                        "name": "button",
                        "items": ["Button"],
                        "props": ["variant", "size"],
                        "import": "import { Button } from \"@/components/ui/button\""
                    }] }))
                }),
            );
        let client = HttpGenerator::new(serve(router).await).unwrap();

        assert!(client.health().await.unwrap().is_healthy());
        let components = client.components().await.unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].name, "button");
        assert_eq!(components[0].items, vec!["Button"]);
        assert!(components[0].import_statement.contains("@/components/ui/button"));
    }
}
