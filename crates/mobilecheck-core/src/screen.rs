//! Foreground app state and recovery.
//!
//! Locator presence alone is a weak page-identity signal: a system dialog or
//! the launcher can cover the app while old elements linger in the tree.
//! [`ScreenState`] reads the foreground package/activity and, when something
//! else has taken over, brings the app under test back.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::driver::{AutomationDriver, DriverError, ForegroundIdentity};

/// Foreground queries and best-effort intrusion recovery.
pub struct ScreenState;

impl ScreenState {
    /// The app and screen currently in front.
    pub async fn foreground_identity(driver: &dyn AutomationDriver) -> Result<ForegroundIdentity, DriverError> {
        let package = driver.current_package().await?;
        let activity = driver.current_activity().await?;
        Ok(ForegroundIdentity { package, activity })
    }

    /// The UI hierarchy as markup. Opaque; callers attach it to reports.
    pub async fn snapshot_markup(driver: &dyn AutomationDriver) -> Result<String, DriverError> {
        driver.page_source().await
    }

    /// Re-activates `target_app` if another package is in the foreground.
    ///
    /// Returns whether an activation was issued. Backend failures are logged
    /// and reported as `false`; this never fails a scenario.
    pub async fn dismiss_foreground_intrusion(
        driver: &dyn AutomationDriver,
        target_app: &str,
        settle: Duration,
    ) -> bool {
        let current = match driver.current_package().await {
            Ok(package) => package,
            Err(e) => {
                warn!(error = %e, "cannot read foreground package");
                return false;
            }
        };

        if current == target_app {
            debug!(package = %current, "target app already in foreground");
            return false;
        }

        info!(foreground = %current, target = target_app, "foreground intrusion, re-activating app");
        if let Err(e) = driver.activate_app(target_app).await {
            warn!(target = target_app, error = %e, "failed to re-activate app");
            return false;
        }
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        true
    }

    /// Whether the foreground activity contains `activity_fragment`.
    ///
    /// A backend error reads as "not on screen".
    pub async fn is_on_screen(driver: &dyn AutomationDriver, activity_fragment: &str) -> bool {
        match driver.current_activity().await {
            Ok(activity) => activity.contains(activity_fragment),
            Err(e) => {
                debug!(error = %e, "cannot read foreground activity");
                false
            }
        }
    }
}
