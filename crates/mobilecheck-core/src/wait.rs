//! Polling waits over locator chains.
//!
//! [`ElementWait::wait_until`] polls the live session every
//! [`WaitPolicy::poll_interval`] until some locator in the chain resolves to an
//! element satisfying the policy's [`Condition`], or the timeout elapses.
//!
//! Within a poll the chain is walked in order and the first satisfying
//! locator wins, even if later ones would also match. Backend errors during a
//! poll (stale handles, transient lookup failures) count as "not yet" and
//! the poll moves on to the next locator.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::driver::{AutomationDriver, DriverError};
use crate::element::{ElementRef, Locator, LocatorChain};

/// Default explicit wait budget.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Floor applied to the poll interval so a zero interval cannot spin.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// What an element must satisfy for a wait to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The element exists in the UI tree.
    Presence,
    /// The element exists and is displayed.
    Visibility,
    /// The element is displayed and enabled.
    Clickable,
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Condition::Presence => "present",
            Condition::Visibility => "visible",
            Condition::Clickable => "clickable",
        };
        f.write_str(name)
    }
}

/// Timeout, poll interval and condition for a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub condition: Condition,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            condition: Condition::Visibility,
        }
    }
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration, condition: Condition) -> Self {
        Self {
            timeout,
            poll_interval,
            condition,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = condition;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// What a locator resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A backend element handle, valid only for the current UI tree.
    Element(ElementRef),
    /// A fixed screen point from a coordinate locator.
    Point { x: i32, y: i32 },
}

/// The outcome of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedElement {
    pub target: Target,
    /// The locator that resolved.
    pub locator: Locator,
    /// Position of that locator in the chain.
    pub locator_index: usize,
    /// Time from the start of the wait to resolution.
    pub elapsed: Duration,
}

/// Errors produced by waits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// No locator satisfied the condition within the timeout.
    #[error("timed out after {elapsed_ms}ms waiting for {chain} to be {condition}{}", last_error_suffix(.last_error))]
    Timeout {
        chain: LocatorChain,
        condition: Condition,
        elapsed_ms: u64,
        last_error: Option<String>,
    },

    /// At least one locator still satisfied the condition when the timeout elapsed.
    #[error("{chain} still {condition} after {elapsed_ms}ms")]
    StillPresent {
        chain: LocatorChain,
        condition: Condition,
        elapsed_ms: u64,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

/// Condition polling against a live driver.
pub struct ElementWait;

impl ElementWait {
    /// Waits until some locator in `chain` satisfies `policy.condition`.
    ///
    /// Locators are tried in chain order on every poll. Polls happen at the
    /// start and then every `poll_interval`; the last poll lands on the
    /// deadline.
    pub async fn wait_until(
        driver: &dyn AutomationDriver,
        chain: &LocatorChain,
        policy: &WaitPolicy,
    ) -> Result<ResolvedElement, WaitError> {
        let start = Instant::now();
        let poll_interval = policy.poll_interval.max(MIN_POLL_INTERVAL);
        let mut last_error: Option<String> = None;
        let mut polls: u32 = 0;

        loop {
            polls += 1;
            for (index, locator) in chain.iter().enumerate() {
                match probe(driver, locator, policy.condition).await {
                    Ok(Some(target)) => {
                        let elapsed = start.elapsed();
                        debug!(
                            locator = %locator,
                            index,
                            polls,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "resolved"
                        );
                        return Ok(ResolvedElement {
                            target,
                            locator: locator.clone(),
                            locator_index: index,
                            elapsed,
                        });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        trace!(locator = %locator, error = %e, "probe failed");
                        last_error = Some(e.to_string());
                    }
                }
            }

            let elapsed = start.elapsed();
            if elapsed >= policy.timeout {
                debug!(chain = %chain, polls, "wait timed out");
                return Err(WaitError::Timeout {
                    chain: chain.clone(),
                    condition: policy.condition,
                    elapsed_ms: elapsed.as_millis() as u64,
                    last_error,
                });
            }
            tokio::time::sleep(poll_interval.min(policy.timeout - elapsed)).await;
        }
    }

    /// Waits until no locator in `chain` satisfies `policy.condition`.
    ///
    /// Used for transient overlays such as loading spinners. A poll where the
    /// backend errors is not counted as "gone".
    pub async fn wait_until_absent(
        driver: &dyn AutomationDriver,
        chain: &LocatorChain,
        policy: &WaitPolicy,
    ) -> Result<Duration, WaitError> {
        let start = Instant::now();
        let poll_interval = policy.poll_interval.max(MIN_POLL_INTERVAL);

        loop {
            let mut present = false;
            for locator in chain {
                match probe(driver, locator, policy.condition).await {
                    Ok(None) => {}
                    Ok(Some(_)) | Err(_) => {
                        present = true;
                        break;
                    }
                }
            }
            let elapsed = start.elapsed();
            if !present {
                return Ok(elapsed);
            }
            if elapsed >= policy.timeout {
                return Err(WaitError::StillPresent {
                    chain: chain.clone(),
                    condition: policy.condition,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
            tokio::time::sleep(poll_interval.min(policy.timeout - elapsed)).await;
        }
    }
}

/// Checks one locator once. `Ok(None)` means "not satisfied yet".
async fn probe(
    driver: &dyn AutomationDriver,
    locator: &Locator,
    condition: Condition,
) -> Result<Option<Target>, DriverError> {
    if let Some((x, y)) = locator.as_point() {
        return Ok(Some(Target::Point { x, y }));
    }
    if locator.strategy.wire_name().is_none() {
        return Err(DriverError::UnsupportedLocator(locator.to_string()));
    }

    let Some(element) = driver.find_elements(locator).await?.into_iter().next() else {
        return Ok(None);
    };

    let satisfied = match condition {
        Condition::Presence => true,
        Condition::Visibility => driver.is_displayed(&element).await?,
        Condition::Clickable => {
            driver.is_displayed(&element).await? && driver.is_enabled(&element).await?
        }
    };
    Ok(satisfied.then_some(Target::Element(element)))
}
