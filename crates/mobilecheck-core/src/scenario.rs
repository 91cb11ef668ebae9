//! Scenario lifecycle hooks and step plumbing.
//!
//! [`ScenarioHooks`] binds a scenario to its session: it opens the session on
//! start, captures a screenshot and the UI markup when the scenario fails,
//! and always tears the session down at the end.
//!
//! [`ScenarioHooks::run`] drives a whole scenario body. The body runs in its
//! own task, so a panic inside it is caught as a failed scenario and teardown
//! still happens.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mobilecheck_core::action::ActionPolicy;
//! use mobilecheck_core::config::RunConfig;
//! use mobilecheck_core::element::Locator;
//! use mobilecheck_core::page::Interactor;
//! use mobilecheck_core::scenario::{ensure_eq, ScenarioHooks};
//! use mobilecheck_core::session::{ContextKey, SessionRegistry, WebDriverSessionFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(SessionRegistry::new(Arc::new(WebDriverSessionFactory::new(
//!     RunConfig::load(None)?,
//! ))));
//! let hooks = ScenarioHooks::new(registry);
//!
//! let report = hooks
//!     .run("login", ContextKey::new(), |ctx| async move {
//!         let page = Interactor::new(ctx.session().driver_handle(), ActionPolicy::default());
//!         page.type_text(&Locator::accessibility_id("username").into(), "standard_user").await?;
//!         page.tap(&Locator::accessibility_id("login").into()).await?;
//!         let title = page.read_text(&Locator::accessibility_id("title").into()).await?;
//!         ensure_eq(title.as_str(), "Products", "page title")
//!     })
//!     .await;
//!
//! println!("{}: {}", report.name, report.status);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::driver::DriverError;
use crate::executor::ActionError;
use crate::gesture::GestureError;
use crate::screen::ScreenState;
use crate::session::{ContextKey, Session, SessionError, SessionRegistry};
use crate::wait::WaitError;

/// Errors a step definition can return.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Wait(#[from] WaitError),

    #[error(transparent)]
    Gesture(#[from] GestureError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A step's expectation did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// A step could not write a local file.
    #[error("cannot write {file}: {source}", file = .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The scenario body panicked.
    #[error("scenario panicked: {0}")]
    Panicked(String),
}

pub type StepResult<T = ()> = Result<T, StepError>;

/// Fails the step with `message` unless `condition` holds.
pub fn ensure(condition: bool, message: impl Into<String>) -> StepResult {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message.into()))
    }
}

/// Fails the step unless `actual == expected`.
pub fn ensure_eq<T: PartialEq + fmt::Debug + ?Sized>(actual: &T, expected: &T, what: &str) -> StepResult {
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "{what}: expected {expected:?}, got {actual:?}"
        )))
    }
}

/// Per-scenario state shared between steps.
///
/// Cheap to clone; clones share the same store and session.
#[derive(Clone)]
pub struct ScenarioContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: String,
    key: ContextKey,
    session: Arc<Session>,
    values: StdMutex<HashMap<String, Value>>,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl ScenarioContext {
    pub fn new(name: impl Into<String>, key: ContextKey, session: Arc<Session>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                key,
                session,
                values: StdMutex::new(HashMap::new()),
                started_at: Utc::now(),
                start: Instant::now(),
            }),
        }
    }

    /// Wall-clock time the scenario started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Time since the scenario started.
    pub fn elapsed(&self) -> Duration {
        self.inner.start.elapsed()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn key(&self) -> &ContextKey {
        &self.inner.key
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    fn values(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.inner.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a value for later steps, replacing any previous one.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values().get(key).cloned()
    }

    /// Reads a stored value as `T`. `None` when missing or of another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|value| serde_json::from_value(value).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values().contains_key(key)
    }

    pub fn clear(&self) {
        self.values().clear();
    }
}

impl fmt::Debug for ScenarioContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScenarioContext")
            .field("name", &self.inner.name)
            .field("key", &self.inner.key)
            .field("session", &self.inner.session.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Passed,
    Failed,
}

impl fmt::Display for ScenarioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioStatus::Passed => f.write_str("passed"),
            ScenarioStatus::Failed => f.write_str("failed"),
        }
    }
}

/// What was captured from the device when a scenario failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureArtifacts {
    /// PNG bytes.
    pub screenshot: Option<Vec<u8>>,
    pub markup: Option<String>,
}

/// Outcome of one scenario.
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub key: ContextKey,
    pub status: ScenarioStatus,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// The failure, with its cause chain intact.
    pub error: Option<StepError>,
    /// Captured before teardown, only for failed scenarios with a session.
    pub artifacts: Option<FailureArtifacts>,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.status == ScenarioStatus::Passed
    }
}

/// Start / failure / end hooks around a scenario.
pub struct ScenarioHooks {
    registry: Arc<SessionRegistry>,
    target_app: Option<String>,
    settle: Duration,
}

impl ScenarioHooks {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            target_app: None,
            settle: Duration::from_secs(1),
        }
    }

    /// The app to bring back when something else covers it at scenario start.
    pub fn with_target_app(mut self, app_id: impl Into<String>) -> Self {
        self.target_app = Some(app_id.into());
        self
    }

    /// Pause after re-activating the target app.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Opens (or reuses) the session for `key` and recovers the foreground.
    pub async fn on_scenario_start(&self, name: &str, key: ContextKey) -> Result<ScenarioContext, SessionError> {
        let session = self.registry.get_or_create(&key).await?;
        if let Some(app) = &self.target_app {
            ScreenState::dismiss_foreground_intrusion(session.driver(), app, self.settle).await;
        }
        info!(scenario = name, key = %key, session_id = %session.id, "scenario started");
        Ok(ScenarioContext::new(name, key, session))
    }

    /// Takes a screenshot for a failed step. Never fails.
    pub async fn on_step_failure(&self, session: &Session) -> Option<Vec<u8>> {
        match session.driver().screenshot().await {
            Ok(png) => Some(png),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to capture screenshot");
                None
            }
        }
    }

    /// Captures artifacts for failed scenarios, then tears the session down.
    pub async fn on_scenario_end(&self, ctx: &ScenarioContext, status: ScenarioStatus) -> ScenarioReport {
        let artifacts = match status {
            ScenarioStatus::Failed => Some(self.capture_artifacts(ctx.session()).await),
            ScenarioStatus::Passed => None,
        };
        ctx.clear();
        self.registry.destroy(ctx.key()).await;
        info!(scenario = ctx.name(), %status, "scenario ended");

        ScenarioReport {
            name: ctx.name().to_string(),
            key: ctx.key().clone(),
            status,
            started_at: ctx.started_at(),
            duration: ctx.elapsed(),
            error: None,
            artifacts,
        }
    }

    async fn capture_artifacts(&self, session: &Session) -> FailureArtifacts {
        let screenshot = self.on_step_failure(session).await;
        let markup = match ScreenState::snapshot_markup(session.driver()).await {
            Ok(markup) => Some(markup),
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "failed to capture page source");
                None
            }
        };
        FailureArtifacts { screenshot, markup }
    }

    /// Runs a scenario body between the start and end hooks.
    ///
    /// Teardown runs whether the body succeeds, returns an error or panics.
    pub async fn run<F, Fut>(&self, name: &str, key: ContextKey, body: F) -> ScenarioReport
    where
        F: FnOnce(ScenarioContext) -> Fut,
        Fut: Future<Output = StepResult> + Send + 'static,
    {
        let span = info_span!("scenario", name, key = %key);
        async {
            let started_at = Utc::now();
            let start = Instant::now();

            let ctx = match self.on_scenario_start(name, key.clone()).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!(error = %e, "scenario could not start");
                    self.registry.destroy(&key).await;
                    return ScenarioReport {
                        name: name.to_string(),
                        key,
                        status: ScenarioStatus::Failed,
                        started_at,
                        duration: start.elapsed(),
                        error: Some(e.into()),
                        artifacts: None,
                    };
                }
            };

            let outcome = match tokio::spawn(body(ctx.clone())).await {
                Ok(result) => result,
                Err(join) => Err(StepError::Panicked(panic_message(join))),
            };

            let status = match &outcome {
                Ok(()) => ScenarioStatus::Passed,
                Err(e) => {
                    error!(error = %e, "scenario failed");
                    ScenarioStatus::Failed
                }
            };

            let mut report = self.on_scenario_end(&ctx, status).await;
            report.error = outcome.err();
            report
        }
        .instrument(span)
        .await
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    if !join.is_panic() {
        return join.to_string();
    }
    let payload = join.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_helpers() {
        assert!(ensure(true, "never").is_ok());
        let err = ensure(false, "cart badge missing").unwrap_err();
        assert_eq!(err.to_string(), "assertion failed: cart badge missing");

        assert!(ensure_eq("a", "a", "title").is_ok());
        let err = ensure_eq(&2, &3, "item count").unwrap_err();
        assert_eq!(err.to_string(), "assertion failed: item count: expected 3, got 2");
    }

    #[test]
    fn status_display() {
        assert_eq!(ScenarioStatus::Passed.to_string(), "passed");
        assert_eq!(
            serde_json::to_value(ScenarioStatus::Failed).unwrap(),
            serde_json::json!("failed")
        );
    }

    #[test]
    fn step_error_keeps_wrapped_message() {
        let err: StepError = SessionError::Rejected {
            endpoint: "http://h:1".into(),
            reason: "bad caps".into(),
        }
        .into();
        assert_eq!(err.to_string(), "http://h:1 rejected the session: bad caps");
    }

    #[test]
    fn io_error_names_path_and_cause() {
        use std::error::Error as _;

        let err = StepError::Io {
            path: "/nowhere/shot.png".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
        };
        assert_eq!(err.to_string(), "cannot write /nowhere/shot.png: no such directory");
        assert!(!err.to_string().contains("assertion"));
        assert!(err.source().is_some());
    }
}
