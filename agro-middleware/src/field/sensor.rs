use super::Running;
use crate::broker::{BrokerError, Link, SharedBroker};
use crate::contracts::encode_reading;
use crate::models::SensorReading;
use crate::subsystems::SensorSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Publishes a simulated reading on the sensor topic every `period`.
pub struct SensorEmitter {
    spec: SensorSpec,
    period: Duration,
    broker: SharedBroker,
    running: Option<Running>,
}

impl SensorEmitter {
    pub fn new(spec: SensorSpec, period: Duration, broker: SharedBroker) -> Self {
        Self { spec, period, broker, running: None }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Idempotent: a running emitter is left alone.
    pub async fn start(&mut self) -> Result<(), BrokerError> {
        if self.running.is_some() {
            return Ok(());
        }
        let client_id = format!("sensor-{}-{}", self.spec.kind, Uuid::new_v4().simple());
        let session = self.broker.connect(&client_id).await?;
        let (stop, stop_rx) = watch::channel(false);
        let publisher = publish_loop(self.spec.clone(), self.period, session.link.clone(), stop_rx);
        let task = tokio::spawn(publisher);
        self.running = Some(Running { link: session.link, stop, task });
        info!(sensor = self.spec.name, topic = self.spec.topic, "sensor started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.halt(self.spec.name).await;
            info!(sensor = self.spec.name, "sensor stopped");
        }
    }
}

async fn publish_loop(
    spec: SensorSpec,
    period: Duration,
    link: Arc<dyn Link>,
    mut stop: watch::Receiver<bool>,
) {
    // first tick completes immediately
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                // checked before publishing, never in the middle of it
                if *stop.borrow() {
                    break;
                }
                let reading = SensorReading { value: sample(&spec), unit: spec.unit.to_string() };
                match link.publish(spec.topic, encode_reading(&reading)) {
                    Ok(()) => debug!(sensor = spec.name, value = reading.value, "published"),
                    Err(e) => warn!(sensor = spec.name, error = %e, "reading not published"),
                }
            }
        }
    }
}

/// Uniform draw over the sensor's simulation range.
pub fn sample(spec: &SensorSpec) -> f64 {
    // the low 53 bits of a v4 UUID are all random
    let bits = Uuid::new_v4().as_u128() & ((1u128 << 53) - 1);
    let unit = bits as f64 / (1u64 << 53) as f64;
    let (lo, hi) = spec.range;
    let value = lo + unit * (hi - lo);
    if spec.integral {
        value.round()
    } else {
        (value * 100.0).round() / 100.0
    }
}
