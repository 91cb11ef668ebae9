//! Integration tests for ElementWait against the scriptable mock driver.
//!
//! All timing tests run on a paused tokio clock, so elapsed times are exact.

mod common;

use std::time::Duration;

use common::{MockDriver, MockElement};

use mobilecheck_core::element::{ElementRef, Locator, LocatorChain, Strategy};
use mobilecheck_core::wait::{Condition, ElementWait, Target, WaitError, WaitPolicy};

fn policy(timeout_ms: u64, poll_ms: u64, condition: Condition) -> WaitPolicy {
    WaitPolicy::new(
        Duration::from_millis(timeout_ms),
        Duration::from_millis(poll_ms),
        condition,
    )
}

// ---------------------------------------------------------------------------
// 1. Resolution timing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_wait_returns_on_first_poll_after_condition_holds() {
    let driver = MockDriver::new();
    let login = Locator::accessibility_id("login");
    driver.add_element(
        login.clone(),
        MockElement::new("e1").visible_at(Duration::from_millis(900)),
    );

    let resolved = ElementWait::wait_until(
        &driver,
        &LocatorChain::single(login),
        &policy(2000, 200, Condition::Visibility),
    )
    .await
    .expect("element becomes visible before the timeout");

    assert_eq!(resolved.elapsed, Duration::from_millis(1000));
    assert_eq!(resolved.target, Target::Element(ElementRef::new("e1")));
    assert_eq!(resolved.locator_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_wait_times_out_with_chain_and_condition() {
    let driver = MockDriver::new();
    let chain = LocatorChain::single(Locator::id("never")).or(Locator::xpath("//never"));

    let err = ElementWait::wait_until(&driver, &chain, &policy(2000, 200, Condition::Clickable))
        .await
        .unwrap_err();

    match err {
        WaitError::Timeout {
            chain: reported,
            condition,
            elapsed_ms,
            last_error,
        } => {
            assert_eq!(reported, chain);
            assert_eq!(condition, Condition::Clickable);
            assert_eq!(elapsed_ms, 2000);
            assert!(last_error.is_none());
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    // Polls at 0, 200, ..., 2000: eleven passes over two locators.
    assert_eq!(driver.count_calls("find "), 22);
}

#[tokio::test(start_paused = true)]
async fn test_zero_timeout_polls_exactly_once() {
    let driver = MockDriver::new();
    let chain = LocatorChain::single(Locator::id("gone"));

    let err = ElementWait::wait_until(&driver, &chain, &policy(0, 0, Condition::Presence))
        .await
        .unwrap_err();

    assert!(matches!(err, WaitError::Timeout { elapsed_ms: 0, .. }));
    assert_eq!(driver.count_calls("find "), 1);
}

// ---------------------------------------------------------------------------
// 2. Chain order
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_chain_order_breaks_ties() {
    let driver = MockDriver::new();
    let primary = Locator::id("com.example:id/login");
    let fallback = Locator::accessibility_id("Login");
    driver.add_element(primary.clone(), MockElement::new("by-id"));
    driver.add_element(fallback.clone(), MockElement::new("by-a11y"));

    let chain = LocatorChain::new(vec![fallback.clone(), primary.clone()]).unwrap();
    let resolved = ElementWait::wait_until(&driver, &chain, &WaitPolicy::default())
        .await
        .unwrap();
    assert_eq!(resolved.locator, fallback);
    assert_eq!(resolved.target, Target::Element(ElementRef::new("by-a11y")));

    let chain = LocatorChain::new(vec![primary.clone(), fallback]).unwrap();
    let resolved = ElementWait::wait_until(&driver, &chain, &WaitPolicy::default())
        .await
        .unwrap();
    assert_eq!(resolved.locator, primary);
    assert_eq!(resolved.locator_index, 0);
}

#[tokio::test(start_paused = true)]
async fn test_later_locator_resolves_when_earlier_never_matches() {
    let driver = MockDriver::new();
    let text = Locator::text("Tap to login");
    driver.add_element(
        text.clone(),
        MockElement::new("t1").appearing_at(Duration::from_millis(450)),
    );

    let chain = LocatorChain::from_pairs([
        (Strategy::Id, "com.example:id/missing"),
        (Strategy::AccessibilityId, "missing"),
    ])
    .unwrap()
    .or(text.clone());

    let resolved = ElementWait::wait_until(&driver, &chain, &policy(5000, 250, Condition::Visibility))
        .await
        .unwrap();
    assert_eq!(resolved.locator, text);
    assert_eq!(resolved.locator_index, 2);
    assert_eq!(resolved.elapsed, Duration::from_millis(500));
}

// ---------------------------------------------------------------------------
// 3. Conditions and transient errors
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_clickable_requires_enabled() {
    let driver = MockDriver::new();
    let submit = Locator::id("submit");
    driver.add_element(submit.clone(), MockElement::new("s1").disabled());
    let chain = LocatorChain::single(submit);

    let present = ElementWait::wait_until(&driver, &chain, &policy(1000, 100, Condition::Presence)).await;
    assert!(present.is_ok());

    let clickable = ElementWait::wait_until(&driver, &chain, &policy(1000, 100, Condition::Clickable)).await;
    assert!(matches!(clickable, Err(WaitError::Timeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn test_backend_errors_count_as_not_yet() {
    let driver = MockDriver::new();
    let cart = Locator::accessibility_id("cart");
    driver.add_element(cart.clone(), MockElement::new("c1"));
    driver.fail_lookups(cart.clone(), 3);

    let resolved = ElementWait::wait_until(
        &driver,
        &LocatorChain::single(cart),
        &policy(2000, 100, Condition::Visibility),
    )
    .await
    .expect("lookups recover before the timeout");
    assert_eq!(resolved.elapsed, Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_reports_last_backend_error() {
    let driver = MockDriver::new();
    let flaky = Locator::id("flaky");
    driver.fail_lookups(flaky.clone(), usize::MAX);

    let err = ElementWait::wait_until(
        &driver,
        &LocatorChain::single(flaky),
        &policy(300, 100, Condition::Presence),
    )
    .await
    .unwrap_err();
    let message = err.to_string();
    assert!(message.contains("last error"), "unexpected message: {message}");
    assert!(message.contains("Stale element"), "unexpected message: {message}");
}

#[tokio::test(start_paused = true)]
async fn test_coordinate_locator_resolves_without_backend() {
    let driver = MockDriver::new();
    let chain = LocatorChain::single(Locator::id("missing")).or(Locator::point(120, 480));

    let resolved = ElementWait::wait_until(&driver, &chain, &WaitPolicy::default())
        .await
        .unwrap();
    assert_eq!(resolved.target, Target::Point { x: 120, y: 480 });
    assert_eq!(resolved.locator_index, 1);
    assert_eq!(driver.count_calls("find "), 1);
}

// ---------------------------------------------------------------------------
// 4. Waiting for absence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_wait_until_absent_succeeds_immediately_when_gone() {
    let driver = MockDriver::new();
    let elapsed = ElementWait::wait_until_absent(
        &driver,
        &LocatorChain::single(Locator::id("spinner")),
        &policy(1000, 100, Condition::Visibility),
    )
    .await
    .unwrap();
    assert_eq!(elapsed, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_wait_until_absent_reports_still_present() {
    let driver = MockDriver::new();
    let spinner = Locator::id("spinner");
    driver.add_element(spinner.clone(), MockElement::new("sp"));

    let err = ElementWait::wait_until_absent(
        &driver,
        &LocatorChain::single(spinner),
        &policy(600, 200, Condition::Visibility),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WaitError::StillPresent { elapsed_ms: 600, .. }));
}
