//! Interactive session state.
//!
//! A session is created by the first invocation of an app tool and keyed by
//! that invocation's request id. Each action runs the app against the current
//! state and stores the state it returns. Sessions end when the app asks to
//! terminate, when the server sends a terminate message, or when they sit idle
//! past the configured bound.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AtpError, Result};
use crate::registry::AUTH_TOKEN_PARAM;
use crate::tool::{AppHandler, AppStep, ToolArguments, invoke_isolated};

struct Session {
    tool_name: String,
    handler: Arc<dyn AppHandler>,
    state: Value,
    auth_token: Option<String>,
    last_active: Instant,
    closed: bool,
}

impl Session {
    fn arguments(&self, request_id: &str) -> ToolArguments {
        let mut params = Map::new();
        if let Some(token) = &self.auth_token {
            params.insert(AUTH_TOKEN_PARAM.to_string(), Value::String(token.clone()));
        }
        ToolArguments::new(request_id, params)
    }
}

type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// Live interactive sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SharedSession>>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl SessionStore {
    /// Create a store evicting sessions idle longer than `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    /// Run the app's first round and keep the session unless it terminates at once.
    ///
    /// `auth_token` is held for the session's lifetime and passed on every round.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::ToolExecution`] if the app fails; no session is created.
    pub async fn start(
        &self,
        session_id: &str,
        tool_name: &str,
        handler: Arc<dyn AppHandler>,
        args: ToolArguments,
        auth_token: Option<String>,
    ) -> Result<AppStep> {
        let app = handler.clone();
        let step = invoke_isolated(tool_name, async move { app.start(args).await }).await?;

        if step.terminate {
            debug!(session_id, tool = tool_name, "Session ended on its first round");
            return Ok(step);
        }

        let session = Session {
            tool_name: tool_name.to_string(),
            handler,
            state: step.state.clone(),
            auth_token,
            last_active: Instant::now(),
            closed: false,
        };
        let replaced = self
            .sessions
            .lock()
            .insert(session_id.to_string(), Arc::new(tokio::sync::Mutex::new(session)));
        if replaced.is_some() {
            warn!(session_id, "Session restarted; previous state discarded");
        } else {
            info!(session_id, tool = tool_name, "Session started");
        }
        Ok(step)
    }

    /// Apply an action to a live session.
    ///
    /// `state`, when present, is the state the server last saw and takes
    /// precedence over the stored one. Actions on one session are serialized.
    ///
    /// # Errors
    ///
    /// Returns [`AtpError::SessionNotFound`] for unknown or ended sessions and
    /// [`AtpError::ToolExecution`] if the app fails, leaving the session intact.
    pub async fn act(
        &self,
        session_id: &str,
        request_id: &str,
        action: Value,
        state: Option<Value>,
    ) -> Result<AppStep> {
        let shared = self
            .sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AtpError::SessionNotFound(session_id.to_string()))?;

        let mut session = shared.lock().await;
        if session.closed {
            return Err(AtpError::SessionNotFound(session_id.to_string()));
        }

        let current = state.unwrap_or_else(|| session.state.clone());
        let args = session.arguments(request_id);
        let app = session.handler.clone();
        session.last_active = Instant::now();
        let outcome = invoke_isolated(&session.tool_name, async move {
            app.act(current, action, args).await
        })
        .await;
        session.last_active = Instant::now();
        let step = outcome?;

        session.state = step.state.clone();
        if step.terminate {
            session.closed = true;
            drop(session);
            self.remove_if_same(session_id, &shared);
            info!(session_id, "Session terminated by app");
        }
        Ok(step)
    }

    /// End a session on request from the server. Returns `false` if it was unknown.
    pub fn terminate(&self, session_id: &str) -> bool {
        let Some(shared) = self.sessions.lock().remove(session_id) else {
            return false;
        };
        // A round in progress still finishes; the session is already gone for the next one.
        if let Ok(mut session) = shared.try_lock() {
            session.closed = true;
        }
        info!(session_id, "Session terminated");
        true
    }

    /// Remove sessions idle past the bound. Sessions mid-round are skipped.
    pub fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|session_id, shared| match shared.try_lock() {
            Ok(mut session) if session.last_active.elapsed() >= self.idle_timeout => {
                session.closed = true;
                debug!(session_id = %session_id, "Evicting idle session");
                false
            }
            _ => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// The stored state of a session.
    pub async fn state_of(&self, session_id: &str) -> Option<Value> {
        let shared = self.sessions.lock().get(session_id).cloned()?;
        let session = shared.lock().await;
        Some(session.state.clone())
    }

    /// Whether a session is live.
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no sessions are live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drop every session.
    pub fn clear(&self) {
        self.sessions.lock().clear();
    }

    fn remove_if_same(&self, session_id: &str, shared: &SharedSession) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, shared))
        {
            sessions.remove(session_id);
        }
    }
}
