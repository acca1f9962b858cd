//! HTTP calls to the coordinating server's registration API.

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AtpError, Result};
use crate::registry::{RegisteredTool, ToolRegistry};

/// Language tag sent with registrations.
pub const PROGRAMMING_LANGUAGE: &str = "Rust";

/// Metadata block of a registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationMetadata {
    /// Declared parameters.
    pub params: Vec<String>,
    /// Required parameters.
    pub required_params: Vec<String>,
    /// Human description.
    pub description: String,
    /// Auth provider.
    pub auth_provider: Option<String>,
    /// Auth type.
    pub auth_type: Option<String>,
    /// Auth mechanism.
    pub auth_with: Option<String>,
    /// Example output.
    pub sample_response: Value,
    /// Source text, when supplied.
    pub source_code: Option<String>,
}

/// Body of a `register_tool` call, minus the API key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolRegistration {
    /// Tool name.
    pub function_id: String,
    /// Application identity.
    pub app_name: String,
    /// Always [`PROGRAMMING_LANGUAGE`].
    pub programming_language: String,
    /// The tool's fingerprint.
    pub code_hash: String,
    /// Tool metadata.
    pub metadata: RegistrationMetadata,
    /// Public URL of the locally exposed tool routes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl ToolRegistration {
    /// Build the registration for a tool, producing its sample response.
    pub async fn for_tool(
        tool: &RegisteredTool,
        app_name: &str,
        endpoint_url: Option<&str>,
        sample_bound: Duration,
    ) -> Self {
        Self {
            function_id: tool.name.clone(),
            app_name: app_name.to_string(),
            programming_language: PROGRAMMING_LANGUAGE.to_string(),
            code_hash: tool.fingerprint.clone(),
            metadata: RegistrationMetadata {
                params: tool.params.clone(),
                required_params: tool.required.clone(),
                description: tool.description.clone(),
                auth_provider: tool.auth.provider.clone(),
                auth_type: tool.auth.auth_type.clone(),
                auth_with: tool.auth.auth_with.clone(),
                sample_response: tool.sample_response(sample_bound).await,
                source_code: tool.source.clone(),
            },
            endpoint_url: endpoint_url.map(str::to_owned),
        }
    }
}

#[derive(Serialize)]
struct Keyed<'a, T> {
    api_key: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize)]
struct FingerprintCheck<'a> {
    app_name: &'a str,
    toolkit_hash: &'a str,
}

#[derive(Deserialize)]
struct FingerprintStatus {
    #[serde(default)]
    up_to_date: bool,
}

#[derive(Deserialize)]
struct RegistrationReceipt {
    exchange_token: Option<String>,
}

#[derive(Serialize)]
struct ExecutionReport<'a> {
    exchange_token: &'a str,
    result: &'a Value,
    function_id: &'a str,
}

/// Client for the registration endpoints.
#[derive(Debug, Clone)]
pub struct RegistrationApi {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl RegistrationApi {
    /// Create a client for a server.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .user_agent(format!("atp-client/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AtpError::Configuration(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AtpError::Http(format!("{path} returned {status}: {text}")));
        }
        Ok(response)
    }

    /// Ask whether the server already holds this toolkit fingerprint.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn check_fingerprint(&self, app_name: &str, fingerprint: &str) -> Result<bool> {
        let body = Keyed {
            api_key: &self.api_key,
            body: &FingerprintCheck {
                app_name,
                toolkit_hash: fingerprint,
            },
        };
        let status: FingerprintStatus = self
            .post("/api/v1/toolkit/check_hash", &body)
            .await?
            .json()
            .await?;
        debug!(app_name, up_to_date = status.up_to_date, "Fingerprint checked");
        Ok(status.up_to_date)
    }

    /// Register one tool. Returns the exchange token the server issued, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::Registration`] on network failure or rejection.
    pub async fn register_tool(&self, registration: &ToolRegistration) -> Result<Option<String>> {
        let tool = &registration.function_id;
        let body = Keyed {
            api_key: &self.api_key,
            body: registration,
        };
        let response = self
            .post("/api/v1/register_tool", &body)
            .await
            .map_err(|e| AtpError::registration(tool, e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| AtpError::registration(tool, e.to_string()))?;
        let receipt = serde_json::from_str::<RegistrationReceipt>(&text)
            .map(|receipt| receipt.exchange_token)
            .unwrap_or_else(|e| {
                warn!(tool = %tool, "Registration response carried no readable token: {}", e);
                None
            });
        info!(tool = %tool, "Tool registered with server");
        Ok(receipt)
    }

    /// Report an execution result, authorized by a single-use exchange token.
    ///
    /// # Errors
    ///
    /// Returns an error on network failure or a non-success status.
    pub async fn report_execution(
        &self,
        exchange_token: &str,
        function_id: &str,
        result: &Value,
    ) -> Result<()> {
        let body = ExecutionReport {
            exchange_token,
            result,
            function_id,
        };
        self.post("/api/v1/execute_function", &body).await?;
        info!(tool = %function_id, "Execution reported");
        Ok(())
    }
}

/// Reports results using the exchange tokens held in a registry.
#[derive(Debug, Clone)]
pub struct ExecutionReporter {
    api: RegistrationApi,
}

impl ExecutionReporter {
    /// Report through `api`.
    pub fn new(api: RegistrationApi) -> Self {
        Self { api }
    }

    /// Consume the tool's exchange token and report `result`.
    ///
    /// Returns `Ok(false)` without calling the server when the tool holds no token.
    ///
    /// # Errors
    ///
    /// Returns the HTTP error; the token is consumed either way.
    pub async fn report(&self, registry: &ToolRegistry, tool: &str, result: &Value) -> Result<bool> {
        let Some(token) = registry.take_exchange_token(tool) else {
            warn!(tool, "No exchange token held; skipping execution report");
            return Ok(false);
        };
        self.api.report_execution(&token, tool, result).await?;
        Ok(true)
    }
}
