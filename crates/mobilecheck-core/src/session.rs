//! Per-context session lifecycle.
//!
//! A [`Session`] wraps one live automation connection. The
//! [`SessionRegistry`] hands out at most one session per [`ContextKey`],
//! opening it lazily through a [`SessionFactory`] and quitting it on
//! [`destroy`](SessionRegistry::destroy).
//!
//! # Architecture
//!
//! - Each scenario runs as its own task and carries its key explicitly.
//! - The registry map holds one slot per key. Opening a session locks only
//!   that key's slot, so a slow session start for one scenario does not stall
//!   the others.
//! - Two concurrent `get_or_create` calls for the same key serialize on the
//!   slot and the second one sees the session the first created.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mobilecheck_core::config::RunConfig;
//! use mobilecheck_core::session::{ContextKey, SessionRegistry, WebDriverSessionFactory};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = WebDriverSessionFactory::new(RunConfig::load(None)?);
//! let registry = SessionRegistry::new(Arc::new(factory));
//!
//! let key = ContextKey::new();
//! let session = registry.get_or_create(&key).await?;
//! println!("session {} on {}", session.id, session.endpoint);
//!
//! registry.destroy(&key).await;
//! assert!(!registry.is_active(&key).await);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::config::RunConfig;
use crate::driver::AutomationDriver;
use crate::webdriver::WebDriverClient;

/// Errors raised while opening a session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The endpoint is not a usable URL.
    #[error("malformed endpoint '{endpoint}': {reason}")]
    MalformedEndpoint { endpoint: String, reason: String },

    /// The endpoint could not be reached.
    #[error("cannot reach {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// The server refused to create the session.
    #[error("{endpoint} rejected the session: {reason}")]
    Rejected { endpoint: String, reason: String },
}

/// Identifies one execution context (a scenario).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextKey(String);

impl ContextKey {
    /// A fresh, unique key.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// A key with a caller-chosen name.
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContextKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One live automation connection.
pub struct Session {
    /// The context that owns this session.
    pub key: ContextKey,
    /// Backend session identifier.
    pub id: String,
    /// Server URL the session lives on.
    pub endpoint: String,
    /// Capabilities the session was requested with.
    pub capabilities: Capabilities,
    pub created_at: DateTime<Utc>,
    driver: Arc<dyn AutomationDriver>,
}

impl Session {
    pub fn new(
        key: ContextKey,
        endpoint: impl Into<String>,
        capabilities: Capabilities,
        driver: Arc<dyn AutomationDriver>,
    ) -> Self {
        Self {
            key,
            id: driver.session_id().to_string(),
            endpoint: endpoint.into(),
            capabilities,
            created_at: Utc::now(),
            driver,
        }
    }

    /// The driver bound to this session.
    pub fn driver(&self) -> &dyn AutomationDriver {
        self.driver.as_ref()
    }

    /// A shared handle to the driver, for page objects that outlive a borrow.
    pub fn driver_handle(&self) -> Arc<dyn AutomationDriver> {
        Arc::clone(&self.driver)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("platform", &self.capabilities.platform_name)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Opens sessions for the registry.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, key: &ContextKey) -> Result<Session, SessionError>;
}

/// Opens sessions on a WebDriver server described by a [`RunConfig`].
pub struct WebDriverSessionFactory {
    config: RunConfig,
    capabilities: Capabilities,
}

impl WebDriverSessionFactory {
    pub fn new(config: RunConfig) -> Self {
        let capabilities = Capabilities::from_config(&config);
        Self {
            config,
            capabilities,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}

#[async_trait]
impl SessionFactory for WebDriverSessionFactory {
    async fn open(&self, key: &ContextKey) -> Result<Session, SessionError> {
        let client = WebDriverClient::create_session(&self.config.server_url, &self.capabilities).await?;
        let endpoint = client.endpoint().to_string();
        Ok(Session::new(
            key.clone(),
            endpoint,
            self.capabilities.clone(),
            Arc::new(client),
        ))
    }
}

type Slot = Arc<Mutex<Option<Arc<Session>>>>;

/// Process-wide map from context key to live session.
pub struct SessionRegistry {
    factory: Arc<dyn SessionFactory>,
    slots: StdMutex<HashMap<ContextKey, Slot>>,
}

impl SessionRegistry {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            factory,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &ContextKey) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn existing_slot(&self, key: &ContextKey) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(key).cloned()
    }

    /// Returns the session for `key`, opening one if there is none.
    ///
    /// A failed open leaves nothing behind, so the next call tries again.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn get_or_create(&self, key: &ContextKey) -> Result<Arc<Session>, SessionError> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = match self.factory.open(key).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                drop(guard);
                self.forget_if_idle(key, slot);
                return Err(e);
            }
        };
        info!(session_id = %session.id, endpoint = %session.endpoint, "session opened");
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    /// Whether `key` currently has a live session.
    pub async fn is_active(&self, key: &ContextKey) -> bool {
        let Some(slot) = self.existing_slot(key) else {
            return false;
        };
        let active = slot.lock().await.is_some();
        active
    }

    /// Quits and forgets the session for `key`.
    ///
    /// Calling this for a key without a session does nothing. A failing quit
    /// is logged; the slot is cleared either way.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn destroy(&self, key: &ContextKey) {
        let Some(slot) = self.existing_slot(key) else {
            return;
        };

        let taken = slot.lock().await.take();
        if let Some(session) = taken {
            match session.driver().quit().await {
                Ok(()) => info!(session_id = %session.id, "session closed"),
                Err(e) => warn!(session_id = %session.id, error = %e, "failed to quit session"),
            }
        }
        self.forget_if_idle(key, slot);
    }

    /// Drops the map entry for `key` when it is empty and nobody else holds it.
    ///
    /// Slots are only cloned under the map lock, so with the lock held a
    /// strong count of two (the map and `slot`) means no caller can be
    /// waiting on it.
    fn forget_if_idle(&self, key: &ContextKey, slot: Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let is_current = slots.get(key).is_some_and(|current| Arc::ptr_eq(current, &slot));
        if !is_current || Arc::strong_count(&slot) != 2 {
            return;
        }
        let empty = slot.try_lock().map(|guard| guard.is_none()).unwrap_or(false);
        if empty {
            slots.remove(key);
            debug!(key = %key, "slot released");
        }
    }

    /// Number of keys the registry tracks, including opens in progress.
    pub fn tracked_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Number of keys with a live session.
    pub async fn active_count(&self) -> usize {
        let slots: Vec<Slot> = {
            let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.values().cloned().collect()
        };
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }
}
