use super::Running;
use crate::broker::{BrokerError, Delivery, Link, SharedBroker};
use crate::contracts::{decode_command, encode_command, state_topic};
use crate::models::ActuatorState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Listens for `ON`/`OFF` on the actuator topic and announces the resulting
/// state on `{topic}/state` after every message, valid or not.
pub struct ActuatorAgent {
    name: &'static str,
    topic: &'static str,
    broker: SharedBroker,
    active: Arc<AtomicBool>,
    running: Option<Running>,
}

impl ActuatorAgent {
    pub fn new(name: &'static str, topic: &'static str, broker: SharedBroker) -> Self {
        Self { name, topic, broker, active: Arc::new(AtomicBool::new(false)), running: None }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub async fn start(&mut self) -> Result<(), BrokerError> {
        if self.running.is_some() {
            return Ok(());
        }
        let short = self.topic.rsplit('/').next().unwrap_or("x");
        let client_id = format!("actuator-{}-{}", short, Uuid::new_v4().simple());
        let session = self.broker.connect(&client_id).await?;
        if let Err(e) = session.link.subscribe(self.topic) {
            session.link.disconnect();
            return Err(e);
        }

        let (stop, stop_rx) = watch::channel(false);
        let device = Device {
            name: self.name,
            topic: self.topic,
            link: session.link.clone(),
            active: self.active.clone(),
        };
        let task = tokio::spawn(command_loop(device, session.deliveries, stop_rx));
        self.running = Some(Running { link: session.link, stop, task });
        info!(actuator = self.name, topic = self.topic, "actuator listening");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.halt(self.name).await;
            info!(actuator = self.name, "actuator stopped");
        }
    }
}

struct Device {
    name: &'static str,
    topic: &'static str,
    link: Arc<dyn Link>,
    active: Arc<AtomicBool>,
}

impl Device {
    fn handle(&self, delivery: &Delivery) {
        match decode_command(&delivery.payload) {
            Ok(ActuatorState::On) => {
                if !self.active.swap(true, Ordering::AcqRel) {
                    info!(actuator = self.name, "activated");
                    self.perform_action();
                }
            }
            Ok(ActuatorState::Off) => {
                if self.active.swap(false, Ordering::AcqRel) {
                    info!(actuator = self.name, "deactivated");
                }
            }
            Err(e) => warn!(actuator = self.name, error = %e, "command ignored"),
        }
        self.publish_state();
    }

    /// Physical action stub.
    fn perform_action(&self) {
        debug!(actuator = self.name, "physical action triggered");
    }

    fn publish_state(&self) {
        let state = match self.active.load(Ordering::Acquire) {
            true => ActuatorState::On,
            false => ActuatorState::Off,
        };
        let topic = state_topic(self.topic);
        if let Err(e) = self.link.publish(&topic, encode_command(state)) {
            warn!(actuator = self.name, error = %e, "state not published");
        }
    }
}

async fn command_loop(
    device: Device,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => device.handle(&delivery),
                None => break,
            },
        }
    }
}
