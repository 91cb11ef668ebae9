//! HTTP client for W3C WebDriver servers with Appium extensions.
//!
//! [`WebDriverClient`] is the production [`AutomationDriver`]. One client wraps
//! one remote session: it is created by [`WebDriverClient::create_session`]
//! and is unusable after [`quit`](AutomationDriver::quit).
//!
//! Every command is a JSON request against `/session/{id}/...`; responses are
//! unwrapped from the `{"value": ...}` envelope and W3C error codes are folded
//! into [`DriverError`] variants.
//!
//! # Example
//!
//! ```no_run
//! use mobilecheck_core::capabilities::Capabilities;
//! use mobilecheck_core::config::RunConfig;
//! use mobilecheck_core::driver::AutomationDriver;
//! use mobilecheck_core::element::Locator;
//! use mobilecheck_core::webdriver::WebDriverClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::load(None)?;
//! let caps = Capabilities::from_config(&config);
//! let client = WebDriverClient::create_session(&config.server_url, &caps).await?;
//!
//! let buttons = client.find_elements(&Locator::accessibility_id("login")).await?;
//! println!("{} login button(s)", buttons.len());
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Method, StatusCode, Url};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, trace, warn};

use crate::capabilities::Capabilities;
use crate::driver::{AutomationDriver, DriverError};
use crate::element::{ElementRect, ElementRef, Locator};
use crate::gesture::GestureSpec;
use crate::session::SessionError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timeout for establishing a TCP connection to the server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single session command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for `POST /session`, which installs and launches the app.
const SESSION_CREATE_TIMEOUT: Duration = Duration::from_secs(300);

/// W3C web element identifier key.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Element key used by older JSON Wire Protocol servers.
const LEGACY_ELEMENT_KEY: &str = "ELEMENT";

// ---------------------------------------------------------------------------
// WebDriverClient
// ---------------------------------------------------------------------------

/// A live remote automation session.
#[derive(Debug)]
pub struct WebDriverClient {
    http: reqwest::Client,
    endpoint: String,
    session_id: String,
    ios: bool,
    /// Capabilities as echoed back by the server.
    granted: Value,
    closed: AtomicBool,
}

impl WebDriverClient {
    /// Opens a new session on the server at `endpoint`.
    ///
    /// After creation the implicit wait from `caps` is applied. A server that
    /// rejects the timeout call still yields a usable session.
    #[instrument(skip(caps), fields(platform = %caps.platform_name, device = %caps.device_name))]
    pub async fn create_session(endpoint: &str, caps: &Capabilities) -> Result<Self, SessionError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let http = build_http()?;

        let url = format!("{endpoint}/session");
        let resp = http
            .post(&url)
            .timeout(SESSION_CREATE_TIMEOUT)
            .json(&caps.to_w3c())
            .send()
            .await
            .map_err(|e| SessionError::Unreachable {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        let value = unwrap_value(resp).await.map_err(|e| SessionError::Rejected {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Rejected {
                endpoint: endpoint.clone(),
                reason: "response carried no sessionId".to_string(),
            })?
            .to_string();
        let granted = value.get("capabilities").cloned().unwrap_or(Value::Null);

        info!(session_id = %session_id, "session created");

        let client = Self {
            http,
            endpoint,
            session_id,
            ios: caps.is_ios(),
            granted,
            closed: AtomicBool::new(false),
        };

        if let Err(e) = client.set_implicit_wait(caps.implicit_wait).await {
            warn!(error = %e, "failed to apply implicit wait");
        }
        Ok(client)
    }

    /// Queries `GET /status` on a server without opening a session.
    pub async fn status(endpoint: &str) -> Result<Value, SessionError> {
        let endpoint = normalize_endpoint(endpoint)?;
        let http = build_http()?;
        let resp = http
            .get(format!("{endpoint}/status"))
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(|e| SessionError::Unreachable {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        unwrap_value(resp).await.map_err(|e| SessionError::Rejected {
            endpoint,
            reason: e.to_string(),
        })
    }

    /// Server base URL, without a trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Capabilities the server reported for this session.
    pub fn granted_capabilities(&self) -> &Value {
        &self.granted
    }

    /// Sets the server-side implicit element lookup wait.
    pub async fn set_implicit_wait(&self, wait: Duration) -> Result<(), DriverError> {
        self.command(
            Method::POST,
            "/timeouts",
            Some(json!({ "implicit": wait.as_millis() as u64 })),
        )
        .await
        .map(|_| ())
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::NotConnected);
        }

        let url = format!("{}/session/{}{}", self.endpoint, self.session_id, path);
        debug!(%method, path, "webdriver command");

        let mut request = self.http.request(method, &url).timeout(COMMAND_TIMEOUT);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let resp = request.send().await.map_err(transport_error)?;
        let value = unwrap_value(resp).await?;
        trace!(path, response = %value, "webdriver response");
        Ok(value)
    }

    async fn get(&self, path: &str) -> Result<Value, DriverError> {
        self.command(Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, DriverError> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn element_bool(&self, element: &ElementRef, property: &str) -> Result<bool, DriverError> {
        let value = self.get(&format!("/element/{}/{property}", element.id())).await?;
        value
            .as_bool()
            .ok_or_else(|| DriverError::MalformedResponse(format!("expected boolean for {property}, got {value}")))
    }
}

#[async_trait]
impl AutomationDriver for WebDriverClient {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        let using = locator
            .strategy
            .wire_name()
            .ok_or_else(|| DriverError::UnsupportedLocator(locator.to_string()))?;
        let value = match self
            .post("/elements", json!({ "using": using, "value": locator.selector }))
            .await
        {
            Ok(value) => value,
            Err(DriverError::NoSuchElement(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let items = value
            .as_array()
            .ok_or_else(|| DriverError::MalformedResponse(format!("expected element array, got {value}")))?;
        items.iter().map(element_from_value).collect()
    }

    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, DriverError> {
        self.element_bool(element, "displayed").await
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, DriverError> {
        self.element_bool(element, "enabled").await
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/click", element.id()), json!({}))
            .await
            .map(|_| ())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.post(&format!("/element/{}/clear", element.id()), json!({}))
            .await
            .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        self.post(
            &format!("/element/{}/value", element.id()),
            json!({ "text": text, "value": chars }),
        )
        .await
        .map(|_| ())
    }

    async fn text(&self, element: &ElementRef) -> Result<String, DriverError> {
        let value = self.get(&format!("/element/{}/text", element.id())).await?;
        match value {
            Value::String(text) => Ok(text),
            Value::Null => Ok(String::new()),
            other => Err(DriverError::MalformedResponse(format!("expected text, got {other}"))),
        }
    }

    async fn rect(&self, element: &ElementRef) -> Result<ElementRect, DriverError> {
        let value = self.get(&format!("/element/{}/rect", element.id())).await?;
        let field = |name: &str| -> Result<f64, DriverError> {
            value
                .get(name)
                .and_then(Value::as_f64)
                .ok_or_else(|| DriverError::MalformedResponse(format!("rect missing '{name}': {value}")))
        };
        Ok(ElementRect {
            x: field("x")?,
            y: field("y")?,
            width: field("width")?,
            height: field("height")?,
        })
    }

    async fn perform_actions(&self, gesture: &GestureSpec) -> Result<(), DriverError> {
        self.post("/actions", gesture.to_w3c()).await.map(|_| ())
    }

    async fn execute_mobile(&self, command: &str, args: Value) -> Result<Value, DriverError> {
        self.post("/execute/sync", json!({ "script": command, "args": [args] }))
            .await
    }

    async fn tap_directive(&self, x: i32, y: i32) -> Result<(), DriverError> {
        let command = if self.ios { "mobile: tap" } else { "mobile: clickGesture" };
        self.execute_mobile(command, json!({ "x": x, "y": y }))
            .await
            .map(|_| ())
    }

    async fn current_package(&self) -> Result<String, DriverError> {
        let value = if self.ios {
            let info = self.execute_mobile("mobile: activeAppInfo", json!({})).await?;
            info.get("bundleId").cloned().unwrap_or(Value::Null)
        } else {
            self.get("/appium/device/current_package").await?
        };
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::MalformedResponse(format!("expected package name, got {value}")))
    }

    async fn current_activity(&self) -> Result<String, DriverError> {
        if self.ios {
            return Ok(String::new());
        }
        let value = self.get("/appium/device/current_activity").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        let value = self.get("/source").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::MalformedResponse("page source was not a string".to_string()))
    }

    async fn activate_app(&self, app_id: &str) -> Result<(), DriverError> {
        let args = if self.ios {
            json!({ "bundleId": app_id })
        } else {
            json!({ "appId": app_id })
        };
        self.execute_mobile("mobile: activateApp", args).await.map(|_| ())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        let value = self.get("/screenshot").await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| DriverError::MalformedResponse("screenshot was not a string".to_string()))?;
        let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| DriverError::MalformedResponse(format!("screenshot base64: {e}")))
    }

    async fn window_size(&self) -> Result<(i32, i32), DriverError> {
        let value = self.get("/window/rect").await?;
        let width = value.get("width").and_then(Value::as_f64);
        let height = value.get("height").and_then(Value::as_f64);
        match (width, height) {
            (Some(w), Some(h)) => Ok((w.round() as i32, h.round() as i32)),
            _ => Err(DriverError::MalformedResponse(format!("window rect: {value}"))),
        }
    }

    async fn quit(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let url = format!("{}/session/{}", self.endpoint, self.session_id);
        let resp = self
            .http
            .delete(&url)
            .timeout(COMMAND_TIMEOUT)
            .send()
            .await
            .map_err(transport_error)?;
        unwrap_value(resp).await?;
        info!(session_id = %self.session_id, "session deleted");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn build_http() -> Result<reqwest::Client, SessionError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| SessionError::Unreachable {
            endpoint: String::new(),
            reason: format!("cannot build HTTP client: {e}"),
        })
}

/// Validates an endpoint URL and strips any trailing slash.
pub fn normalize_endpoint(endpoint: &str) -> Result<String, SessionError> {
    let url = Url::parse(endpoint).map_err(|e| SessionError::MalformedEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(SessionError::MalformedEndpoint {
            endpoint: endpoint.to_string(),
            reason: "expected an http(s) URL with a host".to_string(),
        });
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}

fn transport_error(e: reqwest::Error) -> DriverError {
    if e.is_timeout() {
        DriverError::Timeout
    } else {
        DriverError::ConnectionLost(e.to_string())
    }
}

/// Reads the `value` member of a response, mapping error payloads.
async fn unwrap_value(resp: reqwest::Response) -> Result<Value, DriverError> {
    let status = resp.status();
    let text = resp.text().await.map_err(transport_error)?;
    let body: Value = match serde_json::from_str(&text) {
        Ok(body) => body,
        Err(_) if status.is_success() && text.trim().is_empty() => return Ok(Value::Null),
        Err(e) if status.is_success() => {
            return Err(DriverError::MalformedResponse(format!("invalid JSON: {e}")));
        }
        Err(_) => return Err(DriverError::CommandFailed(format!("HTTP {}: {}", status.as_u16(), text.trim()))),
    };

    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if status.is_success() && value.get("error").is_none() {
        return Ok(value);
    }
    Err(map_error(status, &value))
}

/// Maps a W3C error payload onto [`DriverError`].
fn map_error(status: StatusCode, value: &Value) -> DriverError {
    let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match code {
        "no such element" => DriverError::NoSuchElement(message),
        "stale element reference" => DriverError::StaleElement(message),
        "element not interactable" | "element click intercepted" | "invalid element state" => {
            DriverError::NotInteractable(message)
        }
        "invalid selector" => DriverError::UnsupportedLocator(message),
        "invalid session id" => DriverError::NotConnected,
        "timeout" | "script timeout" => DriverError::Timeout,
        _ => DriverError::CommandFailed(format!("{code} (HTTP {}): {message}", status.as_u16())),
    }
}

fn element_from_value(value: &Value) -> Result<ElementRef, DriverError> {
    value
        .get(ELEMENT_KEY)
        .or_else(|| value.get(LEGACY_ELEMENT_KEY))
        .and_then(Value::as_str)
        .map(ElementRef::new)
        .ok_or_else(|| DriverError::MalformedResponse(format!("not an element reference: {value}")))
}
