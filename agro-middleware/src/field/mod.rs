//! Field devices driven by the active controller: one periodic sensor emitter
//! and one actuator agent per subsystem. Both run as background tasks bound to
//! a broker session and stop through a `watch` signal.

pub mod actuator;
pub mod sensor;

pub use actuator::ActuatorAgent;
pub use sensor::SensorEmitter;

use crate::broker::Link;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

/// Handle on a running background task and the session it owns.
pub(crate) struct Running {
    pub link: Arc<dyn Link>,
    pub stop: watch::Sender<bool>,
    pub task: JoinHandle<()>,
}

impl Running {
    /// Signals the loop, waits for it to finish its current iteration, then disconnects.
    pub async fn halt(self, name: &str) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(device = name, error = %e, "background task ended abnormally");
        }
        self.link.disconnect();
    }
}
