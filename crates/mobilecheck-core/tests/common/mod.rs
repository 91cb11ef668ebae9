//! Shared test helpers for mobilecheck-core integration tests.
//!
//! This module provides an in-memory [`MockDriver`] whose UI can be scripted
//! against the tokio clock, a [`MockFactory`] for registry tests, and a mock
//! WebDriver HTTP server for exercising the real client.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

use mobilecheck_core::capabilities::Capabilities;
use mobilecheck_core::config::RunConfig;
use mobilecheck_core::driver::{AutomationDriver, DriverError};
use mobilecheck_core::element::{ElementRect, ElementRef, Locator};
use mobilecheck_core::gesture::GestureSpec;
use mobilecheck_core::session::{ContextKey, Session, SessionError, SessionFactory};

// ---------------------------------------------------------------------------
// MockDriver
// ---------------------------------------------------------------------------

/// How a scripted element looks to the driver.
#[derive(Debug, Clone)]
pub struct MockElement {
    pub id: String,
    /// Offset from driver creation at which the element enters the tree.
    pub appears_at: Duration,
    /// Offset at which it becomes displayed.
    pub visible_at: Duration,
    pub enabled: bool,
    pub text: String,
    pub rect: ElementRect,
}

impl MockElement {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            appears_at: Duration::ZERO,
            visible_at: Duration::ZERO,
            enabled: true,
            text: String::new(),
            rect: ElementRect {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 40.0,
            },
        }
    }

    pub fn appearing_at(mut self, at: Duration) -> Self {
        self.appears_at = at;
        self.visible_at = self.visible_at.max(at);
        self
    }

    pub fn visible_at(mut self, at: Duration) -> Self {
        self.visible_at = at;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn with_rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = ElementRect { x, y, width, height };
        self
    }
}

#[derive(Default)]
struct MockState {
    elements: HashMap<Locator, Vec<MockElement>>,
    failing_lookups: HashMap<Locator, usize>,
    lookups_before_failure: HashMap<Locator, usize>,
    disconnected: bool,
    click_failures: usize,
    send_keys_failures: usize,
    actions_fail: bool,
    directive_fails: bool,
    scroll_fails: bool,
    quit_fails: bool,
    screenshot_fails: bool,
    source_fails: bool,
    foreground_package: String,
    foreground_activity: String,
    window: (i32, i32),
    calls: Vec<String>,
    typed: Vec<(String, String)>,
    gestures: Vec<GestureSpec>,
    directives: Vec<(i32, i32)>,
    mobile_commands: Vec<(String, Value)>,
    activated: Vec<String>,
}

/// Scriptable in-memory driver.
///
/// Element visibility is expressed as offsets on the tokio clock, so tests
/// using `start_paused = true` get exact timing.
pub struct MockDriver {
    session_id: String,
    start: Instant,
    state: Mutex<MockState>,
    pub clicks: AtomicUsize,
    pub quits: AtomicUsize,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_session_id(&format!("mock-{}", uuid::Uuid::new_v4()))
    }

    pub fn with_session_id(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            start: Instant::now(),
            state: Mutex::new(MockState {
                foreground_package: "com.example.app".to_string(),
                window: (1080, 1920),
                ..MockState::default()
            }),
            clicks: AtomicUsize::new(0),
            quits: AtomicUsize::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn add_element(&self, locator: Locator, element: MockElement) {
        self.state().elements.entry(locator).or_default().push(element);
    }

    /// The next `times` lookups for `locator` fail with a stale-element error.
    pub fn fail_lookups(&self, locator: Locator, times: usize) {
        self.state().failing_lookups.insert(locator, times);
    }

    /// The first `successes` finds of `locator` work, every later one fails.
    pub fn fail_lookups_after(&self, locator: Locator, successes: usize) {
        self.state().lookups_before_failure.insert(locator, successes);
    }

    /// Interactions and pointer dispatch report a dead session from now on.
    pub fn disconnect(&self) {
        self.state().disconnected = true;
    }

    /// The next `times` clicks fail (`usize::MAX` for always).
    pub fn fail_clicks(&self, times: usize) {
        self.state().click_failures = times;
    }

    pub fn fail_send_keys(&self, times: usize) {
        self.state().send_keys_failures = times;
    }

    pub fn fail_pointer_actions(&self) {
        self.state().actions_fail = true;
    }

    pub fn fail_tap_directive(&self) {
        self.state().directive_fails = true;
    }

    pub fn fail_scroll(&self) {
        self.state().scroll_fails = true;
    }

    pub fn fail_quit(&self) {
        self.state().quit_fails = true;
    }

    pub fn fail_artifacts(&self) {
        let mut state = self.state();
        state.screenshot_fails = true;
        state.source_fails = true;
    }

    pub fn set_foreground(&self, package: &str, activity: &str) {
        let mut state = self.state();
        state.foreground_package = package.to_string();
        state.foreground_activity = activity.to_string();
    }

    pub fn set_window(&self, width: i32, height: i32) {
        self.state().window = (width, height);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state().calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.state().typed.clone()
    }

    pub fn gestures(&self) -> Vec<GestureSpec> {
        self.state().gestures.clone()
    }

    pub fn directives(&self) -> Vec<(i32, i32)> {
        self.state().directives.clone()
    }

    pub fn mobile_commands(&self) -> Vec<(String, Value)> {
        self.state().mobile_commands.clone()
    }

    pub fn activated(&self) -> Vec<String> {
        self.state().activated.clone()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    fn lookup(&self, element: &ElementRef) -> Result<MockElement, DriverError> {
        let found = self
            .state()
            .elements
            .values()
            .flatten()
            .find(|e| e.id == element.id())
            .cloned();
        found.ok_or_else(|| DriverError::StaleElement(element.id().to_string()))
    }
}

#[async_trait]
impl AutomationDriver for MockDriver {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn find_elements(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        self.record(format!("find {locator}"));
        let elapsed = self.start.elapsed();
        let mut state = self.state();
        if let Some(remaining) = state.failing_lookups.get_mut(locator) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DriverError::StaleElement(locator.to_string()));
            }
        }
        if let Some(remaining) = state.lookups_before_failure.get_mut(locator) {
            if *remaining == 0 {
                return Err(DriverError::CommandFailed(format!("lookup of {locator} rejected")));
            }
            *remaining -= 1;
        }
        Ok(state
            .elements
            .get(locator)
            .map(|elements| {
                elements
                    .iter()
                    .filter(|e| e.appears_at <= elapsed)
                    .map(|e| ElementRef::new(e.id.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_displayed(&self, element: &ElementRef) -> Result<bool, DriverError> {
        let found = self.lookup(element)?;
        Ok(found.visible_at <= self.start.elapsed())
    }

    async fn is_enabled(&self, element: &ElementRef) -> Result<bool, DriverError> {
        Ok(self.lookup(element)?.enabled)
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.record(format!("click {}", element.id()));
        self.clicks.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if state.disconnected {
            return Err(DriverError::NotConnected);
        }
        if state.click_failures > 0 {
            if state.click_failures != usize::MAX {
                state.click_failures -= 1;
            }
            return Err(DriverError::NotInteractable(element.id().to_string()));
        }
        Ok(())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.record(format!("clear {}", element.id()));
        Ok(())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.record(format!("send_keys {}", element.id()));
        let mut state = self.state();
        if state.send_keys_failures > 0 {
            if state.send_keys_failures != usize::MAX {
                state.send_keys_failures -= 1;
            }
            return Err(DriverError::StaleElement(element.id().to_string()));
        }
        state.typed.push((element.id().to_string(), text.to_string()));
        Ok(())
    }

    async fn text(&self, element: &ElementRef) -> Result<String, DriverError> {
        Ok(self.lookup(element)?.text)
    }

    async fn rect(&self, element: &ElementRef) -> Result<ElementRect, DriverError> {
        Ok(self.lookup(element)?.rect)
    }

    async fn perform_actions(&self, gesture: &GestureSpec) -> Result<(), DriverError> {
        self.record("actions".to_string());
        let mut state = self.state();
        if state.disconnected {
            return Err(DriverError::ConnectionLost("socket closed".to_string()));
        }
        if state.actions_fail {
            return Err(DriverError::CommandFailed("pointer actions unsupported".to_string()));
        }
        state.gestures.push(gesture.clone());
        Ok(())
    }

    async fn execute_mobile(&self, command: &str, args: Value) -> Result<Value, DriverError> {
        self.record(format!("mobile {command}"));
        let mut state = self.state();
        if command == "mobile: scrollGesture" && state.scroll_fails {
            return Err(DriverError::CommandFailed("scroll rejected".to_string()));
        }
        state.mobile_commands.push((command.to_string(), args));
        Ok(Value::Null)
    }

    async fn tap_directive(&self, x: i32, y: i32) -> Result<(), DriverError> {
        self.record("tap_directive".to_string());
        let mut state = self.state();
        if state.disconnected {
            return Err(DriverError::ConnectionLost("socket closed".to_string()));
        }
        if state.directive_fails {
            return Err(DriverError::CommandFailed("tap directive rejected".to_string()));
        }
        state.directives.push((x, y));
        Ok(())
    }

    async fn current_package(&self) -> Result<String, DriverError> {
        Ok(self.state().foreground_package.clone())
    }

    async fn current_activity(&self) -> Result<String, DriverError> {
        Ok(self.state().foreground_activity.clone())
    }

    async fn page_source(&self) -> Result<String, DriverError> {
        if self.state().source_fails {
            return Err(DriverError::ConnectionLost("source".to_string()));
        }
        Ok("<hierarchy><node text=\"Products\"/></hierarchy>".to_string())
    }

    async fn activate_app(&self, app_id: &str) -> Result<(), DriverError> {
        let mut state = self.state();
        state.activated.push(app_id.to_string());
        state.foreground_package = app_id.to_string();
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, DriverError> {
        if self.state().screenshot_fails {
            return Err(DriverError::ConnectionLost("screenshot".to_string()));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn window_size(&self) -> Result<(i32, i32), DriverError> {
        Ok(self.state().window)
    }

    async fn quit(&self) -> Result<(), DriverError> {
        self.quits.fetch_add(1, Ordering::SeqCst);
        if self.state().quit_fails {
            return Err(DriverError::ConnectionLost("quit".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockFactory
// ---------------------------------------------------------------------------

/// Session factory producing [`MockDriver`]-backed sessions.
pub struct MockFactory {
    pub opened: AtomicUsize,
    open_delay: Duration,
    fail_with: Mutex<Option<SessionError>>,
    configure: Box<dyn Fn(&MockDriver) + Send + Sync>,
    drivers: Mutex<Vec<Arc<MockDriver>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self {
            opened: AtomicUsize::new(0),
            open_delay: Duration::ZERO,
            fail_with: Mutex::new(None),
            configure: Box::new(|_| {}),
            drivers: Mutex::new(Vec::new()),
        }
    }

    /// Each open takes this long, to widen race windows.
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Applied to every driver the factory creates.
    pub fn with_setup(mut self, configure: impl Fn(&MockDriver) + Send + Sync + 'static) -> Self {
        self.configure = Box::new(configure);
        self
    }

    pub fn fail_next(&self, error: SessionError) {
        *self.fail_with.lock().unwrap() = Some(error);
    }

    pub fn drivers(&self) -> Vec<Arc<MockDriver>> {
        self.drivers.lock().unwrap().clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn open(&self, key: &ContextKey) -> Result<Session, SessionError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if let Some(error) = self.fail_with.lock().unwrap().take() {
            return Err(error);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let driver = Arc::new(MockDriver::new());
        (self.configure)(driver.as_ref());
        self.drivers.lock().unwrap().push(Arc::clone(&driver));
        Ok(Session::new(
            key.clone(),
            "http://mock:4723",
            Capabilities::from_config(&RunConfig::default()),
            driver,
        ))
    }
}

// ---------------------------------------------------------------------------
// Mock WebDriver HTTP server
// ---------------------------------------------------------------------------

/// One request as seen by the mock server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: Value,
}

pub type Router = Arc<dyn Fn(&RecordedRequest) -> (u16, Value) + Send + Sync>;

/// A minimal HTTP/1.1 server answering WebDriver-style JSON.
///
/// Every connection serves one request and closes.
pub struct MockWebDriver {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockWebDriver {
    pub async fn start(router: impl Fn(&RecordedRequest) -> (u16, Value) + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::default();
        let router: Router = Arc::new(router);

        let recorded = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let router = Arc::clone(&router);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let Some(request) = read_request(&mut stream).await else {
                        return;
                    };
                    recorded.lock().unwrap().push(request.clone());
                    let (status, body) = router(&request);
                    let body = body.to_string();
                    let response = format!(
                        "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        reason(status),
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.flush().await;
                });
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn find(&self, method: &str, path_suffix: &str) -> Option<RecordedRequest> {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path.ends_with(path_suffix))
    }
}

impl Drop for MockWebDriver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_bytes = &buf[header_end..(header_end + content_length).min(buf.len())];
    let body = serde_json::from_slice(body_bytes).unwrap_or(Value::Null);

    Some(RecordedRequest { method, path, body })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Wraps a value in the WebDriver response envelope.
pub fn ok(value: Value) -> (u16, Value) {
    (200, json!({ "value": value }))
}

/// A W3C error response.
pub fn w3c_error(status: u16, error: &str, message: &str) -> (u16, Value) {
    (
        status,
        json!({ "value": { "error": error, "message": message, "stacktrace": "" } }),
    )
}

/// Capabilities pointing at nothing in particular, for client tests.
pub fn test_capabilities() -> Capabilities {
    let config = RunConfig::from_properties_str("implicit.wait=0").unwrap();
    Capabilities::from_config(&config)
}
