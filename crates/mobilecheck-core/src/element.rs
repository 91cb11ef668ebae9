//! Locators, locator chains and transient element handles.
//!
//! A [`Locator`] pairs a [`Strategy`] with a selector. A [`LocatorChain`] is an
//! ordered, non-empty list of locators tried in order: the first one that
//! resolves wins. Chains are how page objects express "try the resource id,
//! then the accessibility id, then the UiAutomator text query" without nesting
//! fallbacks by hand.
//!
//! Element handles ([`ElementRef`]) returned by a backend are only valid for
//! the UI tree they were resolved against. They are never cached: every poll
//! and every retry resolves the chain again.
//!
//! # Example
//!
//! ```
//! use mobilecheck_core::element::{Locator, LocatorChain, Strategy};
//!
//! let chain = LocatorChain::from_pairs([
//!     (Strategy::Id, "com.example:id/loginBtn"),
//!     (Strategy::AccessibilityId, "Tap to login"),
//! ])
//! .unwrap();
//!
//! assert_eq!(chain.len(), 2);
//! assert_eq!(chain.first(), &Locator::id("com.example:id/loginBtn"));
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a selector is matched against the UI tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Accessibility identifier (content-desc on Android, accessibilityIdentifier on iOS).
    AccessibilityId,
    /// Resource id (Android) or element name (iOS).
    Id,
    /// XPath over the page source.
    Xpath,
    /// Platform class name, e.g. `android.widget.Button`.
    ClassName,
    /// Android `UiSelector` expression.
    UiAutomator,
    /// iOS `NSPredicate` query.
    IosPredicate,
    /// iOS class chain query.
    IosClassChain,
    /// A fixed screen point. Resolved locally, never queried against the backend.
    Coordinate,
}

impl Strategy {
    /// The W3C / Appium `using` value for this strategy.
    ///
    /// Returns `None` for [`Strategy::Coordinate`], which has no backend
    /// representation.
    pub fn wire_name(&self) -> Option<&'static str> {
        match self {
            Strategy::AccessibilityId => Some("accessibility id"),
            Strategy::Id => Some("id"),
            Strategy::Xpath => Some("xpath"),
            Strategy::ClassName => Some("class name"),
            Strategy::UiAutomator => Some("-android uiautomator"),
            Strategy::IosPredicate => Some("-ios predicate string"),
            Strategy::IosClassChain => Some("-ios class chain"),
            Strategy::Coordinate => None,
        }
    }

    /// Short name used in the textual `strategy=selector` form.
    pub fn short_name(&self) -> &'static str {
        match self {
            Strategy::AccessibilityId => "accessibility-id",
            Strategy::Id => "id",
            Strategy::Xpath => "xpath",
            Strategy::ClassName => "class",
            Strategy::UiAutomator => "uiautomator",
            Strategy::IosPredicate => "predicate",
            Strategy::IosClassChain => "class-chain",
            Strategy::Coordinate => "point",
        }
    }

    fn from_short_name(name: &str) -> Option<Self> {
        let strategy = match name {
            "accessibility-id" | "aid" | "a11y" => Strategy::AccessibilityId,
            "id" => Strategy::Id,
            "xpath" => Strategy::Xpath,
            "class" | "class-name" => Strategy::ClassName,
            "uiautomator" => Strategy::UiAutomator,
            "predicate" => Strategy::IosPredicate,
            "class-chain" => Strategy::IosClassChain,
            "point" | "coordinate" => Strategy::Coordinate,
            _ => return None,
        };
        Some(strategy)
    }
}

/// Errors produced when parsing or building locators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocatorParseError {
    /// The text had no `=` separating strategy and selector.
    #[error("expected 'strategy=selector', got '{0}'")]
    MissingSeparator(String),

    /// The strategy name is not recognized.
    #[error("unknown locator strategy '{0}'")]
    UnknownStrategy(String),

    /// The selector part was empty.
    #[error("empty selector for strategy '{0}'")]
    EmptySelector(String),

    /// A coordinate selector was not of the form `x,y`.
    #[error("invalid coordinate '{0}', expected 'x,y'")]
    InvalidCoordinate(String),

    /// A chain was built from zero locators.
    #[error("a locator chain needs at least one locator")]
    EmptyChain,
}

/// A strategy and selector pair identifying a UI element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    /// The matching strategy.
    pub strategy: Strategy,
    /// The selector text, interpreted according to `strategy`.
    pub selector: String,
}

impl Locator {
    /// Creates a locator from a strategy and selector.
    pub fn new(strategy: Strategy, selector: impl Into<String>) -> Self {
        Self {
            strategy,
            selector: selector.into(),
        }
    }

    pub fn accessibility_id(selector: impl Into<String>) -> Self {
        Self::new(Strategy::AccessibilityId, selector)
    }

    pub fn id(selector: impl Into<String>) -> Self {
        Self::new(Strategy::Id, selector)
    }

    pub fn xpath(selector: impl Into<String>) -> Self {
        Self::new(Strategy::Xpath, selector)
    }

    pub fn class_name(selector: impl Into<String>) -> Self {
        Self::new(Strategy::ClassName, selector)
    }

    pub fn ui_automator(selector: impl Into<String>) -> Self {
        Self::new(Strategy::UiAutomator, selector)
    }

    /// Android `UiSelector` matching an element by its exact visible text.
    pub fn text(text: &str) -> Self {
        Self::ui_automator(format!(
            "new UiSelector().text(\"{}\")",
            text.replace('"', "\\\"")
        ))
    }

    pub fn ios_predicate(selector: impl Into<String>) -> Self {
        Self::new(Strategy::IosPredicate, selector)
    }

    pub fn ios_class_chain(selector: impl Into<String>) -> Self {
        Self::new(Strategy::IosClassChain, selector)
    }

    /// A fixed screen point, for controls without a stable locator.
    pub fn point(x: i32, y: i32) -> Self {
        Self::new(Strategy::Coordinate, format!("{x},{y}"))
    }

    /// Returns the screen point if this is a coordinate locator.
    pub fn as_point(&self) -> Option<(i32, i32)> {
        if self.strategy != Strategy::Coordinate {
            return None;
        }
        parse_point(&self.selector)
    }
}

fn parse_point(text: &str) -> Option<(i32, i32)> {
    let (x, y) = text.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy.short_name(), self.selector)
    }
}

impl FromStr for Locator {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, selector) = s
            .split_once('=')
            .ok_or_else(|| LocatorParseError::MissingSeparator(s.to_string()))?;
        let name = name.trim();
        let strategy = Strategy::from_short_name(name)
            .ok_or_else(|| LocatorParseError::UnknownStrategy(name.to_string()))?;
        if selector.is_empty() {
            return Err(LocatorParseError::EmptySelector(name.to_string()));
        }
        if strategy == Strategy::Coordinate && parse_point(selector).is_none() {
            return Err(LocatorParseError::InvalidCoordinate(selector.to_string()));
        }
        Ok(Locator::new(strategy, selector))
    }
}

/// An ordered, non-empty list of fallback locators.
///
/// Order is preserved exactly as given: no deduplication, no reordering.
/// Serialized as a plain array of locators; an empty array fails to
/// deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Locator>", into = "Vec<Locator>")]
pub struct LocatorChain {
    locators: Vec<Locator>,
}

impl TryFrom<Vec<Locator>> for LocatorChain {
    type Error = LocatorParseError;

    fn try_from(locators: Vec<Locator>) -> Result<Self, Self::Error> {
        Self::new(locators)
    }
}

impl From<LocatorChain> for Vec<Locator> {
    fn from(chain: LocatorChain) -> Self {
        chain.locators
    }
}

impl LocatorChain {
    /// Builds a chain from a list of locators.
    pub fn new(locators: Vec<Locator>) -> Result<Self, LocatorParseError> {
        if locators.is_empty() {
            return Err(LocatorParseError::EmptyChain);
        }
        Ok(Self { locators })
    }

    /// A chain with a single locator.
    pub fn single(locator: Locator) -> Self {
        Self {
            locators: vec![locator],
        }
    }

    /// Builds a chain from `(strategy, selector)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, LocatorParseError>
    where
        I: IntoIterator<Item = (Strategy, S)>,
        S: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(strategy, selector)| Locator::new(strategy, selector))
                .collect(),
        )
    }

    /// Appends a fallback locator.
    pub fn or(mut self, locator: Locator) -> Self {
        self.locators.push(locator);
        self
    }

    pub fn first(&self) -> &Locator {
        &self.locators[0]
    }

    pub fn len(&self) -> usize {
        self.locators.len()
    }

    /// Always false; kept for API symmetry with collections.
    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Locator> {
        self.locators.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Locator> {
        self.locators.get(index)
    }
}

impl From<Locator> for LocatorChain {
    fn from(locator: Locator) -> Self {
        Self::single(locator)
    }
}

impl<'a> IntoIterator for &'a LocatorChain {
    type Item = &'a Locator;
    type IntoIter = std::slice::Iter<'a, Locator>;

    fn into_iter(self) -> Self::IntoIter {
        self.locators.iter()
    }
}

impl fmt::Display for LocatorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, locator) in self.locators.iter().enumerate() {
            if i > 0 {
                write!(f, " | ")?;
            }
            write!(f, "{locator}")?;
        }
        write!(f, "]")
    }
}

/// Opaque handle to an element, as returned by the backend.
///
/// Only valid against the UI tree it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Position and size of an element in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ElementRect {
    /// The centre point, truncated to whole pixels.
    pub fn center(&self) -> (i32, i32) {
        (
            (self.x + self.width / 2.0) as i32,
            (self.y + self.height / 2.0) as i32,
        )
    }
}
