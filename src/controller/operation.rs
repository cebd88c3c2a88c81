use tracing::trace;

use crate::controller::{ComponentId, MonitoringController, MonitoringVersion};
use crate::error::{Result, TrazaError};

/// A span during which gating is evaluated against a pinned version.
///
/// The scope is valid while the controller's version still equals the pin;
/// any state change invalidates it, permanently, until it is closed and a
/// new scope is opened. Dropping the scope releases the pin.
pub struct OperationScope {
    controller: MonitoringController,
    pinned: MonitoringVersion,
}

impl OperationScope {
    pub(crate) fn new(controller: MonitoringController, pinned: MonitoringVersion) -> Self {
        Self { controller, pinned }
    }

    /// The version this scope was pinned to at open time.
    pub fn version(&self) -> MonitoringVersion {
        self.pinned
    }

    /// True only while no version change has occurred since the pin.
    pub fn is_valid(&self) -> bool {
        self.controller.current_version() == self.pinned
    }

    /// Surfaces invalidation as a [`TrazaError::State`] for callers that
    /// must not proceed against a stale pin.
    pub fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(TrazaError::State(format!(
                "operation pinned at {} invalidated at {}",
                self.pinned,
                self.controller.current_version()
            )))
        }
    }

    /// Gating decision against the pinned version.
    pub fn should_track(&self, reporter: Option<&ComponentId>, filter: Option<&ComponentId>) -> bool {
        self.controller.should_track(self.pinned, reporter, filter)
    }

    /// Closes the scope, releasing the pin.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        trace!(version = %self.pinned, "operation closed");
    }
}
