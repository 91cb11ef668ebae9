//! Session capabilities.
//!
//! [`Capabilities`] is the immutable description of the session to open:
//! platform, automation engine, device, app and launch behaviour. It is built
//! from a [`RunConfig`] and rendered into the W3C `POST /session` payload,
//! with every non-standard key under the `appium:` vendor prefix.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::RunConfig;

const VENDOR_PREFIX: &str = "appium:";

/// Install and launch timeouts for the UiAutomator2 server, in milliseconds.
const SERVER_LAUNCH_TIMEOUT_MS: u64 = 120_000;
const ADB_EXEC_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub platform_name: String,
    pub automation_name: String,
    pub device_name: String,
    pub app: String,
    pub no_reset: bool,
    pub full_reset: bool,
    pub new_command_timeout: Duration,
    pub app_wait_activity: String,
    pub app_wait_duration: Duration,
    pub auto_grant_permissions: bool,
    pub disable_window_animation: bool,
    /// Implicit wait applied to the session after creation.
    pub implicit_wait: Duration,
    /// Extra capabilities, passed through as-is (prefixed when needed).
    pub extra: BTreeMap<String, String>,
}

impl Capabilities {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            platform_name: config.platform_name.clone(),
            automation_name: config.automation_name.clone(),
            device_name: config.device_name.clone(),
            app: config.app_path.display().to_string(),
            no_reset: config.no_reset,
            full_reset: config.full_reset,
            new_command_timeout: config.new_command_timeout,
            app_wait_activity: config.app_wait_activity.clone(),
            app_wait_duration: config.app_wait_duration,
            auto_grant_permissions: config.auto_grant_permissions,
            disable_window_animation: config.disable_window_animation,
            implicit_wait: config.implicit_wait,
            extra: config.extra.clone(),
        }
    }

    pub fn is_ios(&self) -> bool {
        self.platform_name.eq_ignore_ascii_case("ios")
    }

    /// The `alwaysMatch` capability object.
    pub fn always_match(&self) -> Map<String, Value> {
        let mut caps = Map::new();
        caps.insert("platformName".into(), json!(self.platform_name));
        let mut vendor = |key: &str, value: Value| {
            caps.insert(format!("{VENDOR_PREFIX}{key}"), value);
        };
        vendor("automationName", json!(self.automation_name));
        vendor("deviceName", json!(self.device_name));
        vendor("app", json!(self.app));
        vendor("noReset", json!(self.no_reset));
        vendor("fullReset", json!(self.full_reset));
        vendor("newCommandTimeout", json!(self.new_command_timeout.as_secs()));
        vendor("autoGrantPermissions", json!(self.auto_grant_permissions));
        vendor("disableWindowAnimation", json!(self.disable_window_animation));
        if !self.is_ios() {
            vendor("appWaitActivity", json!(self.app_wait_activity));
            vendor("appWaitDuration", json!(self.app_wait_duration.as_millis() as u64));
            vendor("uiautomator2ServerLaunchTimeout", json!(SERVER_LAUNCH_TIMEOUT_MS));
            vendor("uiautomator2ServerInstallTimeout", json!(SERVER_LAUNCH_TIMEOUT_MS));
            vendor("adbExecTimeout", json!(ADB_EXEC_TIMEOUT_MS));
        }

        for (key, value) in &self.extra {
            let key = if key.contains(':') || key == "platformName" {
                key.clone()
            } else {
                format!("{VENDOR_PREFIX}{key}")
            };
            caps.insert(key, extra_value(value));
        }
        caps
    }

    /// The full `POST /session` request body.
    pub fn to_w3c(&self) -> Value {
        json!({
            "capabilities": {
                "alwaysMatch": Value::Object(self.always_match()),
                "firstMatch": [{}],
            }
        })
    }
}

/// Properties values are strings; send booleans and integers as JSON scalars.
fn extra_value(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}
