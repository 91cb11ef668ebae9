//! Pointer gestures: coordinate taps, freehand strokes and scrolls.
//!
//! A [`GestureSpec`] is an ordered list of [`PointerEvent`]s for a single
//! touch pointer, serialised into a W3C `actions` payload by
//! [`GestureSpec::to_w3c`]. [`GestureComposer`] builds the common shapes and
//! dispatches them.
//!
//! Nothing here retries. A partially applied gesture (half a stroke on a
//! signature pad) must not be replayed blindly, so dispatch failures go
//! straight back to the caller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::driver::{AutomationDriver, DriverError};

/// How long the finger stays down for a tap.
pub const TAP_HOLD: Duration = Duration::from_millis(150);

/// Errors raised while dispatching gestures.
#[derive(Error, Debug)]
pub enum GestureError {
    /// Both the pointer sequence and the tap directive failed.
    #[error("tap at ({x}, {y}) failed: pointer sequence: {primary}; tap directive: {fallback}")]
    Dispatch {
        x: i32,
        y: i32,
        primary: DriverError,
        #[source]
        fallback: DriverError,
    },

    /// The pointer sequence failed because the session is gone; no fallback was tried.
    #[error("tap at ({x}, {y}) failed: {source}")]
    Disconnected {
        x: i32,
        y: i32,
        #[source]
        source: DriverError,
    },

    /// A stroke needs at least one point.
    #[error("a stroke needs at least one point")]
    EmptyStroke,

    /// The stroke sequence was rejected by the backend.
    #[error("stroke dispatch failed: {0}")]
    Stroke(#[source] DriverError),

    /// The scroll gesture was rejected by the backend.
    #[error("scroll {direction} failed: {source}")]
    Scroll {
        direction: ScrollDirection,
        #[source]
        source: DriverError,
    },
}

/// One step of a single-pointer gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerEvent {
    /// Move to absolute viewport coordinates over `duration_ms`.
    MoveTo { x: i32, y: i32, duration_ms: u64 },
    /// Press the pointer down.
    Down,
    /// Hold still.
    Pause { duration_ms: u64 },
    /// Lift the pointer.
    Up,
}

/// An ordered sequence of pointer events, built per call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestureSpec {
    events: Vec<PointerEvent>,
}

impl GestureSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(mut self, x: i32, y: i32, duration: Duration) -> Self {
        self.events.push(PointerEvent::MoveTo {
            x,
            y,
            duration_ms: duration.as_millis() as u64,
        });
        self
    }

    pub fn press(mut self) -> Self {
        self.events.push(PointerEvent::Down);
        self
    }

    pub fn pause(mut self, duration: Duration) -> Self {
        self.events.push(PointerEvent::Pause {
            duration_ms: duration.as_millis() as u64,
        });
        self
    }

    pub fn release(mut self) -> Self {
        self.events.push(PointerEvent::Up);
        self
    }

    pub fn events(&self) -> &[PointerEvent] {
        &self.events
    }

    /// Press, hold for [`TAP_HOLD`], release at a point.
    pub fn tap(x: i32, y: i32) -> Self {
        Self::new()
            .move_to(x, y, Duration::ZERO)
            .press()
            .pause(TAP_HOLD)
            .release()
    }

    /// Press at the first point, move through the rest, release.
    pub fn stroke(points: &[(i32, i32)], move_duration: Duration) -> Self {
        let mut spec = Self::new();
        if let Some(&(x, y)) = points.first() {
            spec = spec.move_to(x, y, Duration::ZERO).press();
            for &(x, y) in &points[1..] {
                spec = spec.move_to(x, y, move_duration);
            }
            spec = spec.release();
        }
        spec
    }

    /// The W3C `POST /actions` request body for a touch pointer.
    pub fn to_w3c(&self) -> Value {
        let actions: Vec<Value> = self
            .events
            .iter()
            .map(|event| match *event {
                PointerEvent::MoveTo { x, y, duration_ms } => json!({
                    "type": "pointerMove",
                    "duration": duration_ms,
                    "origin": "viewport",
                    "x": x,
                    "y": y,
                }),
                PointerEvent::Down => json!({ "type": "pointerDown", "button": 0 }),
                PointerEvent::Pause { duration_ms } => json!({ "type": "pause", "duration": duration_ms }),
                PointerEvent::Up => json!({ "type": "pointerUp", "button": 0 }),
            })
            .collect();

        json!({
            "actions": [{
                "type": "pointer",
                "id": "finger",
                "parameters": { "pointerType": "touch" },
                "actions": actions,
            }]
        })
    }
}

/// Direction of a scroll gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl std::fmt::Display for ScrollDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        };
        f.write_str(name)
    }
}

/// A scroll over a screen region, as a fraction of the region's size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollSpec {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
    pub direction: ScrollDirection,
    pub percent: f64,
}

impl ScrollSpec {
    /// The region used by the stock page-level scroll helpers.
    pub fn page(direction: ScrollDirection) -> Self {
        let top = match direction {
            ScrollDirection::Up => 200,
            _ => 500,
        };
        Self {
            left: 100,
            top,
            width: 200,
            height: 500,
            direction,
            percent: 0.75,
        }
    }
}

/// Builds and dispatches pointer gestures.
pub struct GestureComposer;

impl GestureComposer {
    /// Taps at absolute coordinates.
    ///
    /// Dispatches a press-pause-release pointer sequence first. If the
    /// backend rejects it, a single coarse tap directive is sent to the same
    /// point. Only when both fail does this return an error. A lost
    /// connection is returned as is, without the fallback.
    pub async fn tap_at(driver: &dyn AutomationDriver, x: i32, y: i32) -> Result<(), GestureError> {
        let primary = match driver.perform_actions(&GestureSpec::tap(x, y)).await {
            Ok(()) => {
                debug!(x, y, "tapped via pointer sequence");
                return Ok(());
            }
            Err(e) if e.is_connection_loss() => {
                return Err(GestureError::Disconnected { x, y, source: e });
            }
            Err(e) => e,
        };

        warn!(x, y, error = %primary, "pointer tap failed, falling back to tap directive");
        match driver.tap_directive(x, y).await {
            Ok(()) => {
                debug!(x, y, "tapped via tap directive");
                Ok(())
            }
            Err(fallback) => Err(GestureError::Dispatch {
                x,
                y,
                primary,
                fallback,
            }),
        }
    }

    /// Draws a freehand stroke through `points`.
    pub async fn freehand_stroke(
        driver: &dyn AutomationDriver,
        points: &[(i32, i32)],
        move_duration: Duration,
    ) -> Result<(), GestureError> {
        if points.is_empty() {
            return Err(GestureError::EmptyStroke);
        }
        driver
            .perform_actions(&GestureSpec::stroke(points, move_duration))
            .await
            .map_err(GestureError::Stroke)?;
        debug!(points = points.len(), "stroke dispatched");
        Ok(())
    }

    /// Scrolls a region.
    pub async fn scroll(driver: &dyn AutomationDriver, spec: ScrollSpec) -> Result<(), GestureError> {
        let args = json!({
            "left": spec.left,
            "top": spec.top,
            "width": spec.width,
            "height": spec.height,
            "direction": spec.direction,
            "percent": spec.percent,
        });
        driver
            .execute_mobile("mobile: scrollGesture", args)
            .await
            .map(|_| ())
            .map_err(|source| GestureError::Scroll {
                direction: spec.direction,
                source,
            })
    }

    /// Closed square outline of side `2 * half` centred on a point.
    pub fn square_around(cx: i32, cy: i32, half: i32) -> Vec<(i32, i32)> {
        vec![
            (cx - half, cy - half),
            (cx + half, cy - half),
            (cx + half, cy + half),
            (cx - half, cy + half),
            (cx - half, cy - half),
        ]
    }
}
