//! Interaction types, values and retry policy.
//!
//! This module defines what can be done to an element ([`Interaction`]), what
//! comes back ([`ActionValue`]) and how hard to try ([`ActionPolicy`]). The
//! retry loop itself lives in [`executor`](crate::executor).
//!
//! # Interaction categories
//!
//! - **Mutating**: [`Interaction::Tap`], [`Interaction::TypeText`]. These run
//!   the full attempt/retry loop and fail loudly when attempts run out.
//! - **Queries**: [`Interaction::ReadText`], [`Interaction::IsPresent`],
//!   [`Interaction::IsVisible`], [`Interaction::Count`]. These wait once;
//!   absence is a valid answer for the boolean and count queries.
//!
//! # Example
//!
//! ```
//! use mobilecheck_core::action::{ActionPolicy, Interaction};
//! use mobilecheck_core::wait::Condition;
//!
//! let op = Interaction::TypeText { text: "standard_user".to_string() };
//! assert!(op.is_mutating());
//! assert_eq!(op.condition(), Condition::Visibility);
//!
//! let policy = ActionPolicy::default();
//! assert_eq!(policy.max_attempts, 3);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wait::{Condition, WaitPolicy};

/// Default number of attempts for mutating interactions.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between failed attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Default pause after a successful tap or type, for animations to finish.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

/// Something to do to the element a locator chain resolves to.
///
/// Serialized with a `type` tag so step definitions and the CLI can carry
/// interactions as data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Interaction {
    /// Tap the element (or the point, for coordinate locators).
    Tap,

    /// Clear the element and type text into it.
    TypeText {
        /// The text to type.
        text: String,
    },

    /// Read the element's visible text.
    ReadText,

    /// Whether any locator resolves to an element in the UI tree.
    IsPresent,

    /// Whether any locator resolves to a displayed element.
    IsVisible,

    /// How many elements the first matching locator finds.
    Count,
}

impl Interaction {
    /// Returns a short, static name for span metadata and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Interaction::Tap => "tap",
            Interaction::TypeText { .. } => "type_text",
            Interaction::ReadText => "read_text",
            Interaction::IsPresent => "is_present",
            Interaction::IsVisible => "is_visible",
            Interaction::Count => "count",
        }
    }

    /// Whether the interaction changes UI state and so runs the retry loop.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Interaction::Tap | Interaction::TypeText { .. })
    }

    /// The condition an element must meet before the interaction runs.
    pub fn condition(&self) -> Condition {
        match self {
            Interaction::Tap => Condition::Clickable,
            Interaction::TypeText { .. } | Interaction::ReadText | Interaction::IsVisible => {
                Condition::Visibility
            }
            Interaction::IsPresent | Interaction::Count => Condition::Presence,
        }
    }
}

/// The value an interaction produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionValue {
    /// Mutating interactions produce nothing.
    None,
    Text(String),
    Flag(bool),
    Count(usize),
}

impl ActionValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ActionValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            ActionValue::Flag(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<usize> {
        match self {
            ActionValue::Count(count) => Some(*count),
            _ => None,
        }
    }
}

/// Retry, settle and wait budget for one interaction.
///
/// The wait condition is taken from the interaction, not from `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub settle_delay: Duration,
    pub wait: WaitPolicy,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            settle_delay: DEFAULT_SETTLE_DELAY,
            wait: WaitPolicy::default(),
        }
    }
}

impl ActionPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_wait(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    /// The wait policy for `interaction`, with its required condition.
    pub fn wait_for(&self, interaction: &Interaction) -> WaitPolicy {
        self.wait.with_condition(interaction.condition())
    }
}
