//! # mobilecheck-core
//!
//! Core library for mobile UI test automation against an Appium / W3C
//! WebDriver server.
//!
//! This crate provides the resilient element-interaction layer (waits,
//! retries, fallback locators, coordinate gestures) and the per-scenario
//! session lifecycle that page objects and step definitions build on.
//!
//! ## Modules
//!
//! - [`config`] - Properties-file configuration with environment overrides
//! - [`capabilities`] - Session capabilities and their W3C payload
//! - [`driver`] - The [`AutomationDriver`](driver::AutomationDriver) backend trait
//! - [`webdriver`] - HTTP implementation of the driver trait
//! - [`session`] - Per-context session registry
//! - [`element`] - Locators, locator chains and element handles
//! - [`wait`] - Condition polling over locator chains
//! - [`action`] - Interaction types and retry policy
//! - [`executor`] - Wait / act / retry execution of interactions
//! - [`gesture`] - Pointer gestures: coordinate taps, strokes, scrolls
//! - [`screen`] - Foreground app state and intrusion recovery
//! - [`page`] - Page-object base
//! - [`scenario`] - Scenario hooks, shared step state and step errors
//!
//! ## Example
//!
//! ```no_run
//! use mobilecheck_core::action::{ActionPolicy, Interaction};
//! use mobilecheck_core::capabilities::Capabilities;
//! use mobilecheck_core::config::RunConfig;
//! use mobilecheck_core::element::{Locator, LocatorChain};
//! use mobilecheck_core::executor::ResilientAction;
//! use mobilecheck_core::webdriver::WebDriverClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RunConfig::load(None)?;
//! let client = WebDriverClient::create_session(
//!     &config.server_url,
//!     &Capabilities::from_config(&config),
//! ).await?;
//!
//! // Try the accessibility id first, then fall back to the resource id.
//! let login = LocatorChain::single(Locator::accessibility_id("test-LOGIN"))
//!     .or(Locator::id("com.example:id/login"));
//! ResilientAction::perform(&client, &login, &Interaction::Tap, &config.action_policy()).await?;
//! # Ok(())
//! # }
//! ```

pub mod action;
pub mod capabilities;
pub mod config;
pub mod driver;
pub mod element;
pub mod executor;
pub mod gesture;
pub mod page;
pub mod scenario;
pub mod screen;
pub mod session;
pub mod wait;
pub mod webdriver;
