//! Automation driver trait for backend-agnostic UI automation.
//!
//! This module defines the [`AutomationDriver`] trait, the single seam between
//! the interaction layer and a live automation backend. The production
//! implementation is [`WebDriverClient`](crate::webdriver::WebDriverClient),
//! which speaks W3C WebDriver with Appium extensions over HTTP; tests plug in
//! in-memory drivers.
//!
//! Every method is a single backend round-trip. Waiting, retrying and
//! fallback handling live above this trait, in [`wait`](crate::wait) and
//! [`executor`](crate::executor).

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::element::{ElementRect, ElementRef, Locator};
use crate::gesture::GestureSpec;

/// Errors that can occur during automation driver operations.
///
/// Backend error codes are folded into a handful of variants so callers can
/// tell transient lookup failures apart from a dead session.
#[derive(Error, Debug)]
pub enum DriverError {
    /// No element matched the locator.
    #[error("No such element: {0}")]
    NoSuchElement(String),

    /// The element handle no longer refers to a node in the current UI tree.
    #[error("Stale element reference: {0}")]
    StaleElement(String),

    /// The element exists but cannot receive the interaction right now.
    #[error("Element not interactable: {0}")]
    NotInteractable(String),

    /// The locator cannot be sent to the backend (e.g. a coordinate locator).
    #[error("Unsupported locator: {0}")]
    UnsupportedLocator(String),

    /// A command or operation failed with the given message.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The backend session is gone or was never created.
    #[error("Not connected to automation backend")]
    NotConnected,

    /// The HTTP connection to the backend failed.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// Failed to parse a backend response.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl DriverError {
    /// Returns true if the backend session or its transport is gone.
    ///
    /// Nothing sent on the same driver can succeed after such an error, so
    /// retries and fallback dispatch stop on it.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, DriverError::NotConnected | DriverError::ConnectionLost(_))
    }
}

/// Currently focused application and screen, as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ForegroundIdentity {
    /// Android package or iOS bundle id.
    pub package: String,
    /// Android activity or iOS scene. Empty when the backend cannot tell.
    pub activity: String,
}

/// Trait for backend-agnostic mobile UI automation.
///
/// Implementors provide element lookup and interaction, pointer-action
/// dispatch and coarse app-state queries. Element handles passed back in must
/// come from [`find_elements`](AutomationDriver::find_elements) on the same
/// driver.
///
/// All methods are async; implementations must be shareable across tasks.
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// The backend session identifier.
    fn session_id(&self) -> &str;

    /// Resolves all elements matching a locator.
    ///
    /// An empty vector means nothing matched; this is not an error.
    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError>;

    /// Whether the element is displayed on screen.
    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, DriverError>;

    /// Whether the element is enabled.
    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, DriverError>;

    /// Clicks (taps) the element.
    async fn click(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Clears an editable element.
    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Types text into the element.
    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), DriverError>;

    /// Reads the element's visible text.
    async fn text(&self, element: &ElementRef) -> Result<String, DriverError>;

    /// Reads the element's frame.
    async fn rect(&self, element: &ElementRef) -> Result<ElementRect, DriverError>;

    /// Dispatches a W3C pointer-action sequence.
    async fn perform_actions(&self, gesture: &GestureSpec) -> Result<(), DriverError>;

    /// Runs an Appium `mobile:` extension command.
    async fn execute_mobile(&self, command: &str, args: Value) -> Result<Value, DriverError>;

    /// Single coarse tap directive at screen coordinates.
    ///
    /// The default implementation issues `mobile: clickGesture`, which
    /// UiAutomator2 supports. Backends for other engines override it.
    async fn tap_directive(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.execute_mobile("mobile: clickGesture", json!({ "x": x, "y": y }))
            .await
            .map(|_| ())
    }

    /// The package (bundle id) of the foreground app.
    async fn current_package(&self) -> Result<String, DriverError>;

    /// The foreground activity. Backends without the notion return an empty string.
    async fn current_activity(&self) -> Result<String, DriverError> {
        Ok(String::new())
    }

    /// Full UI hierarchy dump as markup.
    async fn page_source(&self) -> Result<String, DriverError>;

    /// Brings the given app to the foreground.
    async fn activate_app(&self, app_id: &str) -> Result<(), DriverError>;

    /// Captures the screen.
    ///
    /// # Returns
    ///
    /// Raw PNG image bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, DriverError>;

    /// Viewport size as `(width, height)`.
    async fn window_size(&self) -> Result<(i32, i32), DriverError>;

    /// Ends the backend session.
    async fn quit(&self) -> Result<(), DriverError>;
}
