//! Page-object base.
//!
//! Page objects hold an [`Interactor`] and describe their elements as
//! [`LocatorChain`]s; every call goes through [`ResilientAction`] with the
//! interactor's policy.

use std::sync::Arc;
use std::time::Duration;

use crate::action::{ActionPolicy, ActionValue, Interaction};
use crate::driver::{AutomationDriver, DriverError};
use crate::element::{Locator, LocatorChain};
use crate::executor::{ActionError, ResilientAction};
use crate::gesture::{GestureComposer, GestureError, ScrollDirection, ScrollSpec};
use crate::wait::{ElementWait, ResolvedElement, Target, WaitError};

/// Default duration of each segment of a freehand stroke.
pub const STROKE_SEGMENT: Duration = Duration::from_millis(300);

#[derive(Clone)]
pub struct Interactor {
    driver: Arc<dyn AutomationDriver>,
    policy: ActionPolicy,
}

impl Interactor {
    pub fn new(driver: Arc<dyn AutomationDriver>, policy: ActionPolicy) -> Self {
        Self { driver, policy }
    }

    pub fn driver(&self) -> &dyn AutomationDriver {
        self.driver.as_ref()
    }

    pub fn policy(&self) -> &ActionPolicy {
        &self.policy
    }

    /// A copy with a different policy, for screens that need longer waits.
    pub fn with_policy(&self, policy: ActionPolicy) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            policy,
        }
    }

    async fn perform(&self, chain: &LocatorChain, op: Interaction) -> Result<ActionValue, ActionError> {
        ResilientAction::perform(self.driver(), chain, &op, &self.policy).await
    }

    pub async fn tap(&self, chain: &LocatorChain) -> Result<(), ActionError> {
        self.perform(chain, Interaction::Tap).await.map(|_| ())
    }

    pub async fn type_text(&self, chain: &LocatorChain, text: &str) -> Result<(), ActionError> {
        self.perform(chain, Interaction::TypeText { text: text.to_string() })
            .await
            .map(|_| ())
    }

    pub async fn read_text(&self, chain: &LocatorChain) -> Result<String, ActionError> {
        let value = self.perform(chain, Interaction::ReadText).await?;
        Ok(value.as_text().unwrap_or_default().to_string())
    }

    pub async fn is_present(&self, chain: &LocatorChain) -> bool {
        self.flag(chain, Interaction::IsPresent).await
    }

    pub async fn is_visible(&self, chain: &LocatorChain) -> bool {
        self.flag(chain, Interaction::IsVisible).await
    }

    async fn flag(&self, chain: &LocatorChain, op: Interaction) -> bool {
        matches!(self.perform(chain, op).await, Ok(ActionValue::Flag(true)))
    }

    pub async fn count(&self, chain: &LocatorChain) -> usize {
        match self.perform(chain, Interaction::Count).await {
            Ok(value) => value.as_count().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Waits for an element under the interactor's wait policy.
    pub async fn wait_for(&self, chain: &LocatorChain) -> Result<ResolvedElement, WaitError> {
        ElementWait::wait_until(self.driver(), chain, &self.policy.wait).await
    }

    pub async fn tap_at(&self, x: i32, y: i32) -> Result<(), GestureError> {
        GestureComposer::tap_at(self.driver(), x, y).await
    }

    /// Draws a stroke through `points`.
    pub async fn draw(&self, points: &[(i32, i32)]) -> Result<(), GestureError> {
        GestureComposer::freehand_stroke(self.driver(), points, STROKE_SEGMENT).await
    }

    /// Draws a closed square of side `2 * half`, centred on `canvas` if it
    /// resolves, otherwise on the middle of the screen.
    pub async fn draw_square(&self, canvas: Option<&LocatorChain>, half: i32) -> Result<(), GestureError> {
        let (cx, cy) = self.drawing_centre(canvas).await.map_err(GestureError::Stroke)?;
        self.draw(&GestureComposer::square_around(cx, cy, half)).await
    }

    async fn drawing_centre(&self, canvas: Option<&LocatorChain>) -> Result<(i32, i32), DriverError> {
        if let Some(chain) = canvas {
            if let Ok(resolved) = self.wait_for(chain).await {
                match resolved.target {
                    Target::Element(element) => {
                        return Ok(self.driver().rect(&element).await?.center());
                    }
                    Target::Point { x, y } => return Ok((x, y)),
                }
            }
        }
        let (width, height) = self.driver().window_size().await?;
        Ok((width / 2, height / 2))
    }

    pub async fn scroll(&self, direction: ScrollDirection) -> Result<(), GestureError> {
        GestureComposer::scroll(self.driver(), ScrollSpec::page(direction)).await
    }

    /// Whether a single locator resolves right now, without waiting.
    pub async fn exists_now(&self, locator: &Locator) -> bool {
        matches!(self.driver().find_elements(locator).await, Ok(found) if !found.is_empty())
    }
}
