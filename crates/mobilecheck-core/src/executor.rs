//! Resilient interaction execution.
//!
//! [`ResilientAction::perform`] resolves a [`LocatorChain`] through
//! [`ElementWait`] and runs an [`Interaction`] on the result.
//!
//! Mutating interactions (tap, type) get the full loop: wait, act, and on any
//! failure pause for `retry_delay` and go again with a freshly resolved
//! element, up to `max_attempts`. After a success the executor sleeps for
//! `settle_delay` so the next query does not race an animation.
//!
//! Queries wait once. `is_present` / `is_visible` / `count` turn absence into
//! `false` / `0`; `read_text` surfaces the wait failure.
//!
//! Coordinate locators are tapped through [`GestureComposer::tap_at`]. Gesture
//! failures are never retried.

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};

use crate::action::{ActionPolicy, ActionValue, Interaction};
use crate::driver::{AutomationDriver, DriverError};
use crate::element::{Locator, LocatorChain};
use crate::gesture::{GestureComposer, GestureError};
use crate::wait::{ElementWait, ResolvedElement, Target, WaitError, WaitPolicy};

/// Why a single attempt failed.
#[derive(Error, Debug)]
pub enum AttemptFailure {
    /// The element never met the required condition.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// The element resolved but the backend rejected the interaction.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl AttemptFailure {
    /// Whether the backend session is gone, making further attempts pointless.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, AttemptFailure::Driver(e) if e.is_connection_loss())
    }
}

/// Errors returned by [`ResilientAction::perform`].
#[derive(Error, Debug)]
pub enum ActionError {
    /// Every attempt of a mutating interaction failed.
    #[error("{op} on {chain} failed after {attempts} attempt(s): {last_cause}")]
    Exhausted {
        op: &'static str,
        chain: LocatorChain,
        attempts: u32,
        #[source]
        last_cause: AttemptFailure,
    },

    /// A query could not resolve its element.
    #[error(transparent)]
    Wait(#[from] WaitError),

    /// A query resolved its element but reading it failed.
    #[error("{op} on {locator} failed: {source}")]
    Query {
        op: &'static str,
        locator: Locator,
        #[source]
        source: DriverError,
    },

    /// A coordinate tap could not be dispatched.
    #[error(transparent)]
    Gesture(#[from] GestureError),

    /// The interaction makes no sense for the resolved target.
    #[error("{op} is not supported on coordinate locator {locator}")]
    Unsupported { op: &'static str, locator: Locator },
}

impl ActionError {
    /// Number of attempts made before giving up, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ActionError::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}

/// Single-attempt outcome inside the retry loop.
enum Attempt {
    /// Record the cause and try again.
    Retry(AttemptFailure),
    /// Stop immediately.
    Abort(ActionError),
}

/// The state-changing part of a mutating interaction.
#[derive(Clone, Copy)]
enum Mutation<'a> {
    Tap,
    Type(&'a str),
}

/// Executes interactions with wait, retry and fallback-locator handling.
pub struct ResilientAction;

impl ResilientAction {
    /// Performs `op` on whatever `chain` resolves to.
    ///
    /// # Returns
    ///
    /// The value the interaction produced: [`ActionValue::None`] for taps
    /// and typing, `Text` / `Flag` / `Count` for queries.
    pub async fn perform(
        driver: &dyn AutomationDriver,
        chain: &LocatorChain,
        op: &Interaction,
        policy: &ActionPolicy,
    ) -> Result<ActionValue, ActionError> {
        let span = info_span!("perform", op = op.name(), chain = %chain);
        async {
            let start = Instant::now();
            let wait = policy.wait_for(op);
            let result = match op {
                Interaction::Tap => Self::mutate(driver, chain, op, Mutation::Tap, policy).await,
                Interaction::TypeText { text } => {
                    Self::mutate(driver, chain, op, Mutation::Type(text), policy).await
                }
                Interaction::ReadText => Self::read_text(driver, chain, &wait).await,
                Interaction::IsPresent | Interaction::IsVisible => Ok(ActionValue::Flag(
                    ElementWait::wait_until(driver, chain, &wait).await.is_ok(),
                )),
                Interaction::Count => match ElementWait::wait_until(driver, chain, &wait).await {
                    Ok(resolved) => Ok(ActionValue::Count(Self::count(driver, &resolved).await)),
                    Err(_) => Ok(ActionValue::Count(0)),
                },
            };
            debug!(
                elapsed_ms = start.elapsed().as_millis() as u64,
                success = result.is_ok(),
                "interaction complete"
            );
            result
        }
        .instrument(span)
        .await
    }

    async fn mutate(
        driver: &dyn AutomationDriver,
        chain: &LocatorChain,
        op: &Interaction,
        mutation: Mutation<'_>,
        policy: &ActionPolicy,
    ) -> Result<ActionValue, ActionError> {
        let attempts = policy.max_attempts.max(1);
        let wait = policy.wait_for(op);
        let mut attempt = 1;

        loop {
            match Self::attempt(driver, chain, op, mutation, &wait).await {
                Ok(()) => {
                    debug!(attempt, "succeeded");
                    if !policy.settle_delay.is_zero() {
                        tokio::time::sleep(policy.settle_delay).await;
                    }
                    return Ok(ActionValue::None);
                }
                Err(Attempt::Abort(e)) => return Err(e),
                Err(Attempt::Retry(cause)) => {
                    warn!(attempt, max_attempts = attempts, error = %cause, "attempt failed");
                    if attempt >= attempts || cause.is_connection_loss() {
                        return Err(ActionError::Exhausted {
                            op: op.name(),
                            chain: chain.clone(),
                            attempts: attempt,
                            last_cause: cause,
                        });
                    }
                    tokio::time::sleep(policy.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn attempt(
        driver: &dyn AutomationDriver,
        chain: &LocatorChain,
        op: &Interaction,
        mutation: Mutation<'_>,
        wait: &WaitPolicy,
    ) -> Result<(), Attempt> {
        let resolved = ElementWait::wait_until(driver, chain, wait)
            .await
            .map_err(|e| Attempt::Retry(e.into()))?;

        let element = match resolved.target {
            Target::Element(element) => element,
            Target::Point { x, y } => {
                return match mutation {
                    Mutation::Tap => GestureComposer::tap_at(driver, x, y)
                        .await
                        .map_err(|e| Attempt::Abort(e.into())),
                    Mutation::Type(_) => Err(Attempt::Abort(ActionError::Unsupported {
                        op: op.name(),
                        locator: resolved.locator,
                    })),
                };
            }
        };

        let outcome = match mutation {
            Mutation::Tap => driver.click(&element).await,
            Mutation::Type(text) => match driver.clear(&element).await {
                Ok(()) => driver.send_keys(&element, text).await,
                Err(e) => Err(e),
            },
        };
        outcome.map_err(|e| Attempt::Retry(e.into()))
    }

    async fn read_text(
        driver: &dyn AutomationDriver,
        chain: &LocatorChain,
        wait: &WaitPolicy,
    ) -> Result<ActionValue, ActionError> {
        let op = Interaction::ReadText.name();
        let resolved = ElementWait::wait_until(driver, chain, wait).await?;
        match resolved.target {
            Target::Element(ref element) => driver
                .text(element)
                .await
                .map(ActionValue::Text)
                .map_err(|source| ActionError::Query {
                    op,
                    locator: resolved.locator.clone(),
                    source,
                }),
            Target::Point { .. } => Err(ActionError::Unsupported {
                op,
                locator: resolved.locator,
            }),
        }
    }

    async fn count(driver: &dyn AutomationDriver, resolved: &ResolvedElement) -> usize {
        if let Target::Point { .. } = resolved.target {
            return 1;
        }
        // The locator has just resolved, so a failed re-query still counts one.
        match driver.find_elements(&resolved.locator).await {
            Ok(elements) => elements.len(),
            Err(e) => {
                debug!(locator = %resolved.locator, error = %e, "count query failed");
                1
            }
        }
    }
}
