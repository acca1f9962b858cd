//! Tool registry and content fingerprints.
//!
//! Each registered tool carries a SHA-256 fingerprint over its metadata and
//! source text. The toolkit fingerprint hashes the per-tool fingerprints in
//! name order, so an unchanged tool set always yields the same value and the
//! server can confirm it is up to date without receiving the metadata again.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::{AtpError, Result};
use crate::tool::{
    AppHandler, FunctionTool, ToolArguments, ToolError, ToolHandler, invoke_isolated,
};

/// Parameter name under which auth tokens are injected. Tools may not declare it.
pub const AUTH_TOKEN_PARAM: &str = "auth_token";

const SAMPLE_VALUE: &str = "sample_value";
const SAMPLE_TOKEN: &str = "sample_token";
const SAMPLE_UNAVAILABLE: &str = "Sample response unavailable";

/// Describes how a tool authenticates against a third party.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthDescriptor {
    /// Identity provider, e.g. `google`.
    pub provider: Option<String>,
    /// Credential type, e.g. `oauth2`.
    pub auth_type: Option<String>,
    /// How the credential is presented, e.g. `token`.
    pub auth_with: Option<String>,
}

impl AuthDescriptor {
    /// A descriptor with every field set.
    pub fn new(
        provider: impl Into<String>,
        auth_type: impl Into<String>,
        auth_with: impl Into<String>,
    ) -> Self {
        Self {
            provider: Some(provider.into()),
            auth_type: Some(auth_type.into()),
            auth_with: Some(auth_with.into()),
        }
    }
}

/// How a tool consumes the invocation's auth token. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthTokenMode {
    /// The token is never passed to the tool.
    #[default]
    Ignore,
    /// The token is injected when supplied.
    Accept,
    /// The token is injected and invocations without one are refused.
    Require,
}

impl AuthTokenMode {
    /// Whether the token is injected into the parameters.
    pub fn injects(self) -> bool {
        !matches!(self, Self::Ignore)
    }
}

/// The executable behind a tool.
#[derive(Clone)]
pub enum ToolKind {
    /// Single-shot tool.
    Function(Arc<dyn ToolHandler>),
    /// Multi-turn interactive tool.
    App(Arc<dyn AppHandler>),
}

impl fmt::Debug for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::App(_) => f.write_str("App"),
        }
    }
}

impl ToolKind {
    fn declared_auth_mode(&self) -> AuthTokenMode {
        match self {
            Self::Function(handler) => handler.auth_token_mode(),
            Self::App(handler) => handler.auth_token_mode(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Function(_) => "function",
            Self::App(_) => "app",
        }
    }
}

/// A tool to register.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    name: String,
    params: Vec<String>,
    required: Vec<String>,
    description: String,
    auth: AuthDescriptor,
    auth_token_mode: Option<AuthTokenMode>,
    source: Option<String>,
    sample_response: Option<Value>,
    kind: ToolKind,
}

impl ToolDefinition {
    fn with_kind(name: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            required: Vec::new(),
            description: String::new(),
            auth: AuthDescriptor::default(),
            auth_token_mode: None,
            source: None,
            sample_response: None,
            kind,
        }
    }

    /// A single-shot tool.
    pub fn function(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self::with_kind(name, ToolKind::Function(Arc::new(handler)))
    }

    /// A single-shot tool backed by an async closure.
    pub fn from_fn<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, ToolError>> + Send + 'static,
    {
        Self::function(name, FunctionTool::new(handler))
    }

    /// An interactive tool.
    pub fn app(name: impl Into<String>, handler: impl AppHandler + 'static) -> Self {
        Self::with_kind(name, ToolKind::App(Arc::new(handler)))
    }

    /// Declare parameter names, in order.
    pub fn params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Mark parameters as required. Each must also be declared.
    pub fn required<I, S>(mut self, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = required.into_iter().map(Into::into).collect();
        self
    }

    /// Set the human description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the third-party auth descriptor.
    pub fn auth(mut self, auth: AuthDescriptor) -> Self {
        self.auth = auth;
        self
    }

    /// Inject the invocation's auth token when supplied.
    pub fn accepts_auth_token(mut self) -> Self {
        self.auth_token_mode = Some(AuthTokenMode::Accept);
        self
    }

    /// Refuse invocations that carry no auth token.
    pub fn requires_auth_token(mut self) -> Self {
        self.auth_token_mode = Some(AuthTokenMode::Require);
        self
    }

    /// Source text contributing to the fingerprint and sent with the registration.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sample response sent with the registration instead of invoking the tool.
    pub fn with_sample_response(mut self, sample: Value) -> Self {
        self.sample_response = Some(sample);
        self
    }

    /// Tool name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A tool as stored in the registry. Immutable; replaced by re-registration.
#[derive(Debug)]
pub struct RegisteredTool {
    /// Unique name.
    pub name: String,
    /// Declared parameters, in order.
    pub params: Vec<String>,
    /// Parameters that must be supplied.
    pub required: Vec<String>,
    /// Human description.
    pub description: String,
    /// Third-party auth descriptor.
    pub auth: AuthDescriptor,
    /// How the invocation's auth token is consumed.
    pub auth_token_mode: AuthTokenMode,
    /// Source text, if supplied.
    pub source: Option<String>,
    /// SHA-256 hex over metadata and source.
    pub fingerprint: String,
    /// The executable.
    pub kind: ToolKind,
    sample_response: Option<Value>,
}

impl RegisteredTool {
    fn from_definition(definition: ToolDefinition) -> Self {
        let auth_token_mode = definition
            .auth_token_mode
            .unwrap_or_else(|| definition.kind.declared_auth_mode());
        let mut tool = Self {
            name: definition.name,
            params: definition.params,
            required: definition.required,
            description: definition.description,
            auth: definition.auth,
            auth_token_mode,
            source: definition.source,
            fingerprint: String::new(),
            kind: definition.kind,
            sample_response: definition.sample_response,
        };
        tool.fingerprint = tool.compute_fingerprint();
        tool
    }

    fn compute_fingerprint(&self) -> String {
        let canonical = json!({
            "metadata": self.describe(),
            "kind": self.kind.label(),
            "auth_token_mode": self.auth_token_mode,
            "source": self.source,
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether this is an interactive tool.
    pub fn is_app(&self) -> bool {
        matches!(self.kind, ToolKind::App(_))
    }

    /// The tool context exposed to callers.
    pub fn describe(&self) -> Value {
        json!({
            "function": self.name,
            "params": self.params,
            "required_params": self.required,
            "description": self.description,
            "auth_provider": self.auth.provider,
            "auth_type": self.auth.auth_type,
            "auth_with": self.auth.auth_with,
        })
    }

    /// Required parameters absent from `params`.
    pub fn missing_required(&self, params: &Map<String, Value>) -> Vec<&str> {
        self.required
            .iter()
            .filter(|name| !params.contains_key(name.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// Sample response for the registration payload.
    ///
    /// Uses the explicit sample when one was given. Otherwise single-shot tools
    /// are invoked once with every parameter set to `"sample_value"`, bounded by
    /// `bound`; failures yield an error object. Interactive tools yield `null`.
    pub async fn sample_response(&self, bound: Duration) -> Value {
        if let Some(sample) = &self.sample_response {
            return sample.clone();
        }
        let ToolKind::Function(handler) = &self.kind else {
            return Value::Null;
        };

        let mut params: Map<String, Value> = self
            .params
            .iter()
            .map(|name| (name.clone(), Value::String(SAMPLE_VALUE.to_string())))
            .collect();
        if self.auth_token_mode.injects() {
            params.insert(
                AUTH_TOKEN_PARAM.to_string(),
                Value::String(SAMPLE_TOKEN.to_string()),
            );
        }

        let handler = handler.clone();
        let args = ToolArguments::new(format!("sample_{}", self.name), params);
        let invocation = invoke_isolated(&self.name, async move { handler.call(args).await });
        match tokio::time::timeout(bound, invocation).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                debug!(tool = %self.name, "Sample invocation failed: {}", e);
                json!({ "error": SAMPLE_UNAVAILABLE })
            }
            // The elapsed invocation is dropped here, which aborts its task.
            Err(_) => {
                debug!(tool = %self.name, ?bound, "Sample invocation timed out");
                json!({ "error": SAMPLE_UNAVAILABLE })
            }
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    tools: BTreeMap<String, Arc<RegisteredTool>>,
    fingerprint: String,
}

impl RegistryState {
    fn refresh_fingerprint(&mut self) {
        let mut hasher = Sha256::new();
        for tool in self.tools.values() {
            hasher.update(tool.fingerprint.as_bytes());
        }
        self.fingerprint = format!("{:x}", hasher.finalize());
    }
}

/// The tools a toolkit exposes, plus the exchange tokens issued for them.
#[derive(Debug)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
    exchange_tokens: Mutex<HashMap<String, String>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        let mut state = RegistryState::default();
        state.refresh_fingerprint();
        Self {
            state: RwLock::new(state),
            exchange_tokens: Mutex::new(HashMap::new()),
        }
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store a tool, replacing any tool with the same name.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::InvalidRegistration`] if the name is empty, a
    /// parameter is declared twice or uses the reserved `auth_token` name, or a
    /// required parameter is not declared.
    pub fn register(&self, definition: ToolDefinition) -> Result<Arc<RegisteredTool>> {
        validate(&definition)?;
        let tool = Arc::new(RegisteredTool::from_definition(definition));

        let mut state = self.state.write();
        let replaced = state.tools.insert(tool.name.clone(), tool.clone());
        state.refresh_fingerprint();
        drop(state);

        if replaced.is_some() {
            info!(tool = %tool.name, "Tool re-registered");
        } else {
            debug!(tool = %tool.name, fingerprint = %tool.fingerprint, "Tool registered");
        }
        Ok(tool)
    }

    /// Look up a tool by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.state.read().tools.get(name).cloned()
    }

    /// Remove a tool and its exchange token.
    pub fn remove(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        let mut state = self.state.write();
        let removed = state.tools.remove(name);
        if removed.is_some() {
            state.refresh_fingerprint();
        }
        drop(state);
        self.exchange_tokens.lock().remove(name);
        removed
    }

    /// All tools, in name order.
    pub fn tools(&self) -> Vec<Arc<RegisteredTool>> {
        self.state.read().tools.values().cloned().collect()
    }

    /// All tool names, in order.
    pub fn names(&self) -> Vec<String> {
        self.state.read().tools.keys().cloned().collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.state.read().tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.state.read().tools.is_empty()
    }

    /// The toolkit fingerprint over all registered tools.
    pub fn fingerprint(&self) -> String {
        self.state.read().fingerprint.clone()
    }

    /// Store the exchange token issued for a tool.
    pub fn store_exchange_token(&self, name: &str, token: impl Into<String>) {
        self.exchange_tokens.lock().insert(name.to_string(), token.into());
    }

    /// Consume a tool's exchange token.
    pub fn take_exchange_token(&self, name: &str) -> Option<String> {
        self.exchange_tokens.lock().remove(name)
    }

    /// Whether a tool currently holds an exchange token.
    pub fn has_exchange_token(&self, name: &str) -> bool {
        self.exchange_tokens.lock().contains_key(name)
    }

    /// Forget every exchange token.
    pub fn clear_exchange_tokens(&self) {
        self.exchange_tokens.lock().clear();
    }
}

fn validate(definition: &ToolDefinition) -> Result<()> {
    let name = &definition.name;
    if name.trim().is_empty() {
        return Err(AtpError::invalid_registration(name, "tool name must not be empty"));
    }

    let mut seen = std::collections::HashSet::new();
    for param in &definition.params {
        if param == AUTH_TOKEN_PARAM {
            return Err(AtpError::invalid_registration(
                name,
                format!("'{AUTH_TOKEN_PARAM}' is reserved for token injection"),
            ));
        }
        if !seen.insert(param.as_str()) {
            return Err(AtpError::invalid_registration(
                name,
                format!("parameter '{param}' declared twice"),
            ));
        }
    }

    for required in &definition.required {
        if required == AUTH_TOKEN_PARAM {
            return Err(AtpError::invalid_registration(
                name,
                format!("'{AUTH_TOKEN_PARAM}' is reserved for token injection"),
            ));
        }
        if !seen.contains(required.as_str()) {
            return Err(AtpError::invalid_registration(
                name,
                format!("required parameter '{required}' is not declared"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn echo() -> ToolDefinition {
        ToolDefinition::from_fn("echo", |args: ToolArguments| async move {
            Ok(Value::Object(args.into_params()))
        })
        .params(["text"])
        .required(["text"])
        .description("Echo the input")
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = ToolRegistry::new();
        registry.register(echo()).unwrap();

        let tool = registry.resolve("echo").unwrap();
        assert_eq!(tool.params, vec!["text".to_string()]);
        assert_eq!(tool.auth_token_mode, AuthTokenMode::Ignore);
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = ToolRegistry::new();
        registry.register(echo()).unwrap();
        registry
            .register(echo().description("Echo, louder"))
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("echo").unwrap().description, "Echo, louder");
    }

    #[test]
    fn test_reserved_and_undeclared_params_are_rejected() {
        let registry = ToolRegistry::new();
        let err = registry
            .register(echo().params(["text", "auth_token"]))
            .unwrap_err();
        assert!(matches!(err, AtpError::InvalidRegistration { .. }));

        let err = registry.register(echo().required(["query"])).unwrap_err();
        assert!(err.to_string().contains("required parameter 'query' is not declared"));

        let err = registry.register(echo().params(["text", "text"])).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable_and_change_sensitive() {
        let first = ToolRegistry::new();
        first.register(echo()).unwrap();
        let second = ToolRegistry::new();
        second.register(echo()).unwrap();
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);

        let before = first.fingerprint();
        first.register(echo().with_source("fn echo() {}")).unwrap();
        assert_ne!(first.fingerprint(), before);

        first.register(echo()).unwrap();
        assert_eq!(first.fingerprint(), before);
    }

    #[test]
    fn test_fingerprint_independent_of_registration_order() {
        let a = ToolDefinition::from_fn("a", |_args: ToolArguments| async { Ok(Value::Null) });
        let b = ToolDefinition::from_fn("b", |_args: ToolArguments| async { Ok(Value::Null) });

        let forward = ToolRegistry::new();
        forward.register(a.clone()).unwrap();
        forward.register(b.clone()).unwrap();
        let backward = ToolRegistry::new();
        backward.register(b).unwrap();
        backward.register(a).unwrap();
        assert_eq!(forward.fingerprint(), backward.fingerprint());
    }

    #[test]
    fn test_describe_shape() {
        let registry = ToolRegistry::new();
        let tool = registry
            .register(echo().auth(AuthDescriptor::new("google", "oauth2", "token")))
            .unwrap();
        assert_eq!(
            tool.describe(),
            json!({
                "function": "echo",
                "params": ["text"],
                "required_params": ["text"],
                "description": "Echo the input",
                "auth_provider": "google",
                "auth_type": "oauth2",
                "auth_with": "token"
            })
        );
    }

    #[test]
    fn test_exchange_tokens_are_consumed_once() {
        let registry = ToolRegistry::new();
        registry.store_exchange_token("echo", "tok-1");
        assert!(registry.has_exchange_token("echo"));
        assert_eq!(registry.take_exchange_token("echo").as_deref(), Some("tok-1"));
        assert_eq!(registry.take_exchange_token("echo"), None);
    }

    #[tokio::test]
    async fn test_sample_response() {
        let registry = ToolRegistry::new();
        let tool = registry.register(echo().accepts_auth_token()).unwrap();
        assert_eq!(
            tool.sample_response(Duration::from_secs(1)).await,
            json!({"text": "sample_value", "auth_token": "sample_token"})
        );

        let failing = registry
            .register(ToolDefinition::from_fn("fails", |_args: ToolArguments| async {
                Err(ToolError::new("no network"))
            }))
            .unwrap();
        assert_eq!(
            failing.sample_response(Duration::from_secs(1)).await,
            json!({"error": "Sample response unavailable"})
        );

        let explicit = registry
            .register(echo().with_sample_response(json!({"text": "example"})))
            .unwrap();
        assert_eq!(
            explicit.sample_response(Duration::from_secs(1)).await,
            json!({"text": "example"})
        );
    }

    #[tokio::test]
    async fn test_sample_timeout_cancels_invocation() {
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
        let slot = Arc::new(Mutex::new(Some(held_tx)));
        let registry = ToolRegistry::new();
        let slow = registry
            .register(ToolDefinition::from_fn("slow", move |_args: ToolArguments| {
                let held = slot.lock().take();
                async move {
                    let _held = held;
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                }
            }))
            .unwrap();

        assert_eq!(
            slow.sample_response(Duration::from_millis(50)).await,
            json!({"error": "Sample response unavailable"})
        );
        // The sender lives inside the tool task; it is released only when the
        // task is aborted.
        let released = tokio::time::timeout(Duration::from_secs(1), held_rx).await;
        assert!(matches!(released, Ok(Err(_))), "tool task still running");
    }
}
