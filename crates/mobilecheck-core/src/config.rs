//! Run configuration.
//!
//! Settings come from a flat `key=value` properties file, by default
//! `~/.mobilecheck/config.properties`, with `MOBILECHECK_*` environment
//! variables layered on top (`implicit.wait` is overridden by
//! `MOBILECHECK_IMPLICIT_WAIT`). Missing keys fall back to the defaults listed
//! on [`RunConfig::default`].
//!
//! Keys this crate does not know are kept in [`RunConfig::extra`] and sent to
//! the backend as additional `appium:` capabilities.
//!
//! # Example
//!
//! ```
//! use mobilecheck_core::config::RunConfig;
//!
//! let config = RunConfig::from_properties_str("
//!     ## local emulator
//!     device.name=Pixel_7
//!     explicit.wait=5
//!     appium:language=en
//! ").unwrap();
//!
//! assert_eq!(config.device_name, "Pixel_7");
//! assert_eq!(config.explicit_wait.as_secs(), 5);
//! assert_eq!(config.extra.get("appium:language").map(String::as_str), Some("en"));
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::ActionPolicy;
use crate::wait::{Condition, WaitPolicy};

const CONFIG_FILENAME: &str = "config.properties";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "MOBILECHECK_";

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line was neither a comment nor `key=value`.
    #[error("line {line}: expected 'key=value', got '{text}'")]
    Syntax { line: usize, text: String },

    /// A value could not be parsed for its key.
    #[error("invalid value '{value}' for '{key}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },
}

/// Returns the mobilecheck home directory (`~/.mobilecheck`).
pub fn mobilecheck_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mobilecheck")
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    mobilecheck_dir().join(CONFIG_FILENAME)
}

/// Everything needed to open sessions and tune interactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// `appium.server.url`
    pub server_url: String,
    /// `platform.name`
    pub platform_name: String,
    /// `automation.name`
    pub automation_name: String,
    /// `device.name`
    pub device_name: String,
    /// `app.path`, made absolute when loaded.
    pub app_path: PathBuf,
    /// `app.package`: the app under test, used to recover from foreground intrusions.
    pub app_package: Option<String>,
    /// `implicit.wait` (seconds)
    pub implicit_wait: Duration,
    /// `explicit.wait` (seconds)
    pub explicit_wait: Duration,
    /// `no.reset`
    pub no_reset: bool,
    /// `full.reset`
    pub full_reset: bool,
    /// `new.command.timeout` (seconds)
    pub new_command_timeout: Duration,
    /// `app.wait.activity`
    pub app_wait_activity: String,
    /// `app.wait.duration` (milliseconds)
    pub app_wait_duration: Duration,
    /// `auto.grant.permissions`
    pub auto_grant_permissions: bool,
    /// `disable.window.animation`
    pub disable_window_animation: bool,
    /// `action.max.attempts`
    pub max_attempts: u32,
    /// `action.retry.delay.ms`
    pub retry_delay: Duration,
    /// `action.settle.ms`
    pub settle_delay: Duration,
    /// `wait.poll.ms`
    pub poll_interval: Duration,
    /// Unrecognized keys, forwarded as capabilities.
    pub extra: BTreeMap<String, String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4723".to_string(),
            platform_name: "Android".to_string(),
            automation_name: "UiAutomator2".to_string(),
            device_name: "emulator-5554".to_string(),
            app_path: PathBuf::from("app.apk"),
            app_package: None,
            implicit_wait: Duration::from_secs(10),
            explicit_wait: Duration::from_secs(15),
            no_reset: false,
            full_reset: false,
            new_command_timeout: Duration::from_secs(600),
            app_wait_activity: "*".to_string(),
            app_wait_duration: Duration::from_millis(120_000),
            auto_grant_permissions: true,
            disable_window_animation: true,
            max_attempts: crate::action::DEFAULT_MAX_ATTEMPTS,
            retry_delay: crate::action::DEFAULT_RETRY_DELAY,
            settle_delay: crate::action::DEFAULT_SETTLE_DELAY,
            poll_interval: crate::wait::DEFAULT_POLL_INTERVAL,
            extra: BTreeMap::new(),
        }
    }
}

impl RunConfig {
    /// Loads configuration.
    ///
    /// With `path`, that file must exist. Without it, the default location is
    /// used when present and the built-in defaults otherwise. Environment
    /// overrides apply in both cases, and `app.path` is made absolute.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = default_config_path();
                if path.is_file() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(std::env::vars())?;
        config.app_path = absolutize(&config.app_path);
        Ok(config)
    }

    /// Reads a properties file without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_properties_str(&text)
    }

    /// Parses properties text on top of the defaults.
    pub fn from_properties_str(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Syntax {
                line: index + 1,
                text: line.to_string(),
            })?;
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Applies `MOBILECHECK_*` variables from `vars`.
    ///
    /// Variable names map to keys by dropping the prefix, lowercasing, and
    /// turning `_` into `.`.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = rest.to_ascii_lowercase().replace('_', ".");
            if is_known_key(&key) {
                self.set(&key, &value)?;
            }
        }
        Ok(())
    }

    /// Sets one key. Unknown keys land in [`RunConfig::extra`].
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "appium.server.url" => self.server_url = value.trim_end_matches('/').to_string(),
            "platform.name" => self.platform_name = value.to_string(),
            "automation.name" => self.automation_name = value.to_string(),
            "device.name" => self.device_name = value.to_string(),
            "app.path" => self.app_path = PathBuf::from(value),
            "app.package" => {
                self.app_package = (!value.is_empty()).then(|| value.to_string());
            }
            "implicit.wait" => self.implicit_wait = Duration::from_secs(parse_u64(key, value)?),
            "explicit.wait" => self.explicit_wait = Duration::from_secs(parse_u64(key, value)?),
            "no.reset" => self.no_reset = parse_bool(key, value)?,
            "full.reset" => self.full_reset = parse_bool(key, value)?,
            "new.command.timeout" => {
                self.new_command_timeout = Duration::from_secs(parse_u64(key, value)?)
            }
            "app.wait.activity" => self.app_wait_activity = value.to_string(),
            "app.wait.duration" => {
                self.app_wait_duration = Duration::from_millis(parse_u64(key, value)?)
            }
            "auto.grant.permissions" => self.auto_grant_permissions = parse_bool(key, value)?,
            "disable.window.animation" => self.disable_window_animation = parse_bool(key, value)?,
            "action.max.attempts" => {
                self.max_attempts = u32::try_from(parse_u64(key, value)?).map_err(|_| {
                    ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                        expected: "an attempt count",
                    }
                })?
            }
            "action.retry.delay.ms" => self.retry_delay = Duration::from_millis(parse_u64(key, value)?),
            "action.settle.ms" => self.settle_delay = Duration::from_millis(parse_u64(key, value)?),
            "wait.poll.ms" => self.poll_interval = Duration::from_millis(parse_u64(key, value)?),
            _ => {
                self.extra.insert(key.to_string(), value.to_string());
            }
        }
        Ok(())
    }

    /// The explicit-wait policy for element conditions.
    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(self.explicit_wait, self.poll_interval, Condition::Visibility)
    }

    /// Retry and settle settings for interactions.
    pub fn action_policy(&self) -> ActionPolicy {
        ActionPolicy {
            max_attempts: self.max_attempts,
            retry_delay: self.retry_delay,
            settle_delay: self.settle_delay,
            wait: self.wait_policy(),
        }
    }

    /// Whether the platform is iOS.
    pub fn is_ios(&self) -> bool {
        self.platform_name.eq_ignore_ascii_case("ios")
    }
}

const KNOWN_KEYS: &[&str] = &[
    "appium.server.url",
    "platform.name",
    "automation.name",
    "device.name",
    "app.path",
    "app.package",
    "implicit.wait",
    "explicit.wait",
    "no.reset",
    "full.reset",
    "new.command.timeout",
    "app.wait.activity",
    "app.wait.duration",
    "auto.grant.permissions",
    "disable.window.animation",
    "action.max.attempts",
    "action.retry.delay.ms",
    "action.settle.ms",
    "wait.poll.ms",
];

fn is_known_key(key: &str) -> bool {
    KNOWN_KEYS.contains(&key)
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected: "a non-negative integer",
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "true or false",
        }),
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|dir| dir.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
