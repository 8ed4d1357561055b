/**
 * CONTROLLER - One control loop instance (sensor reading → actuator command)
 *
 * ROLE :
 * A controller belongs to a replica pool. The pool head is connected: it owns a
 * broker session subscribed to the sensor topic, a running sensor emitter and a
 * running actuator agent. Standbys hold no connection and no task.
 *
 * FLOW (active controller) :
 * reading → last sensor value → sensor record → threshold decision →
 * command published → last actuator value → actuator record
 *
 * Every reading yields a command, even when it repeats the previous one.
 * Store failures are logged and never interrupt the flow.
 */

use crate::broker::{Delivery, Link, SharedBroker};
use crate::config::HistoryKey;
use crate::contracts::{decode_reading, encode_command};
use crate::error::ControlError;
use crate::field::{ActuatorAgent, Running, SensorEmitter};
use crate::models::{
    ActuatorCommand, ActuatorState, ConnectionState, DataType, HistoryPoint, HistoryRecord,
    RecordValue, Role, Toggle,
};
use crate::ports::{HistoryFilter, SharedStore};
use crate::subsystems::SubsystemProfile;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Last values seen by the controller; `None` until something arrives or is recovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Telemetry {
    pub last_sensor: Option<f64>,
    pub last_actuator: Option<ActuatorState>,
}

/// Per-controller knobs handed down by the pool.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub sensor_interval: Duration,
    pub history_key: HistoryKey,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self { sensor_interval: Duration::from_secs(30), history_key: HistoryKey::Instance }
    }
}

/// State shared between the controller handle and its message loop.
struct ControllerCore {
    identity: String,
    history_key: String,
    profile: SubsystemProfile,
    store: SharedStore,
    telemetry: Mutex<Telemetry>,
    link: Mutex<Option<Arc<dyn Link>>>,
}

impl ControllerCore {
    fn on_reading(&self, payload: &[u8]) -> Result<ActuatorState, ControlError> {
        let reading = decode_reading(payload).inspect_err(|e| {
            warn!(controller = %self.identity, error = %e, "reading dropped");
        })?;
        let received_at = OffsetDateTime::now_utc();

        debug!(controller = %self.identity, value = reading.value, unit = %reading.unit, "reading");
        self.telemetry.lock().last_sensor = Some(reading.value);
        self.persist(DataType::Sensor, RecordValue::Reading(reading.value), received_at);

        let command = self.profile.decide(reading.value);
        self.send_command(command);
        Ok(command)
    }

    fn send_command(&self, state: ActuatorState) {
        let command = ActuatorCommand { state, timestamp: OffsetDateTime::now_utc() };
        let topic = self.profile.actuator_topic;
        let link = self.link.lock().clone();
        match link {
            Some(link) => match link.publish(topic, encode_command(command.state)) {
                Ok(()) => info!(controller = %self.identity, %state, topic, "command sent"),
                Err(e) => {
                    warn!(controller = %self.identity, %state, error = %e, "command not published")
                }
            },
            None => warn!(controller = %self.identity, %state, "not connected, command dropped"),
        }

        self.telemetry.lock().last_actuator = Some(command.state);
        self.persist(DataType::Actuator, RecordValue::Command(command.state), command.timestamp);
    }

    fn persist(&self, data_type: DataType, value: RecordValue, timestamp: OffsetDateTime) {
        let topic = match data_type {
            DataType::Sensor => self.profile.sensor.topic,
            DataType::Actuator => self.profile.actuator_topic,
        };
        let record = HistoryRecord {
            controller: self.history_key.clone(),
            data_type,
            topic: topic.to_string(),
            value,
            timestamp,
        };
        if let Err(e) = self.store.insert(&record) {
            error!(controller = %self.identity, error = %e, "persistence unavailable, record lost");
        }
    }
}

pub struct Controller {
    core: Arc<ControllerCore>,
    role: Role,
    connection: ConnectionState,
    broker: SharedBroker,
    listener: Option<Running>,
    sensor: SensorEmitter,
    actuator: ActuatorAgent,
}

impl Controller {
    pub fn new(
        profile: SubsystemProfile,
        role: Role,
        settings: &ControllerSettings,
        broker: SharedBroker,
        store: SharedStore,
    ) -> Self {
        let identity = format!("{} ({})", profile.display_name, role);
        let history_key = match settings.history_key {
            HistoryKey::Instance => identity.clone(),
            HistoryKey::Subsystem => profile.subsystem.key().to_string(),
        };
        let sensor =
            SensorEmitter::new(profile.sensor.clone(), settings.sensor_interval, broker.clone());
        let actuator =
            ActuatorAgent::new(profile.actuator_name, profile.actuator_topic, broker.clone());

        Self {
            core: Arc::new(ControllerCore {
                identity,
                history_key,
                profile,
                store,
                telemetry: Mutex::new(Telemetry::default()),
                link: Mutex::new(None),
            }),
            role,
            connection: ConnectionState::Standby,
            broker,
            listener: None,
            sensor,
            actuator,
        }
    }

    /// Role-qualified name fixed at construction, e.g. `Cooling (Replica1)`.
    pub fn identity(&self) -> &str {
        &self.core.identity
    }

    /// Key under which this controller writes and recovers history.
    pub fn history_key(&self) -> &str {
        &self.core.history_key
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn profile(&self) -> &SubsystemProfile {
        &self.core.profile
    }

    pub fn telemetry(&self) -> Telemetry {
        *self.core.telemetry.lock()
    }

    pub fn last_sensor_value(&self) -> Option<f64> {
        self.telemetry().last_sensor
    }

    pub fn last_actuator_value(&self) -> Option<ActuatorState> {
        self.telemetry().last_actuator
    }

    pub fn sensor_running(&self) -> bool {
        self.sensor.is_running()
    }

    pub fn actuator_active(&self) -> bool {
        self.actuator.is_active()
    }

    /// Handles one raw sensor payload. Malformed payloads are dropped without side effect.
    pub fn on_reading(&self, payload: &[u8]) -> Result<ActuatorState, ControlError> {
        self.core.on_reading(payload)
    }

    pub fn decide(&self, value: f64) -> ActuatorState {
        self.core.profile.decide(value)
    }

    /// One publish (when connected) and one actuator record per call.
    pub fn send_command(&self, command: ActuatorState) {
        self.core.send_command(command)
    }

    pub async fn control_sensor(&mut self, action: &str) -> Result<(), ControlError> {
        match Toggle::parse(action) {
            Some(Toggle::On) => {
                info!(controller = %self.core.identity, "sensor on");
                self.sensor.start().await?;
                Ok(())
            }
            Some(Toggle::Off) => {
                info!(controller = %self.core.identity, "sensor off");
                self.sensor.stop().await;
                Ok(())
            }
            None => {
                warn!(controller = %self.core.identity, action, "invalid sensor action ignored");
                Err(ControlError::UnknownCommand(action.to_string()))
            }
        }
    }

    pub fn control_actuator(&self, action: &str) -> Result<(), ControlError> {
        match Toggle::parse(action) {
            Some(Toggle::On) => self.send_command(ActuatorState::On),
            Some(Toggle::Off) => self.send_command(ActuatorState::Off),
            None => {
                warn!(controller = %self.core.identity, action, "invalid actuator action ignored");
                return Err(ControlError::UnknownCommand(action.to_string()));
            }
        }
        Ok(())
    }

    /// Loads the latest sensor and actuator records stored under this
    /// controller's history key. Missing records leave the values unset.
    pub fn recover_state(&self) {
        let store = &self.core.store;
        let key = &self.core.history_key;
        let controller = &self.core.identity;

        match store.find_latest(&HistoryFilter::new(key, DataType::Sensor)) {
            Ok(Some(HistoryRecord { value: RecordValue::Reading(v), .. })) => {
                self.core.telemetry.lock().last_sensor = Some(v);
                info!(%controller, value = v, "sensor state recovered");
            }
            Ok(_) => info!(%controller, %key, "no sensor history to recover"),
            Err(e) => error!(%controller, error = %e, "sensor recovery failed"),
        }

        match store.find_latest(&HistoryFilter::new(key, DataType::Actuator)) {
            Ok(Some(HistoryRecord { value: RecordValue::Command(state), .. })) => {
                self.core.telemetry.lock().last_actuator = Some(state);
                info!(%controller, %state, "actuator state recovered");
            }
            Ok(_) => info!(%controller, %key, "no actuator history to recover"),
            Err(e) => error!(%controller, error = %e, "actuator recovery failed"),
        }
    }

    /// Up to `limit` sensor points, most recent first. Empty when the store is down.
    pub fn get_history(&self, limit: usize) -> Vec<HistoryPoint> {
        let filter = HistoryFilter::new(&self.core.history_key, DataType::Sensor);
        match self.core.store.find_many(&filter, limit) {
            Ok(records) => records
                .into_iter()
                .filter_map(|r| match r.value {
                    RecordValue::Reading(value) => Some(HistoryPoint {
                        timestamp: r.timestamp.format(&Rfc3339).unwrap_or_default(),
                        value,
                    }),
                    RecordValue::Command(_) => None,
                })
                .collect(),
            Err(e) => {
                error!(controller = %self.core.identity, error = %e, "history unavailable");
                Vec::new()
            }
        }
    }

    /// Standby → Starting → Active: opens the session, subscribes to the
    /// sensor topic and brings the actuator agent up. On failure the
    /// controller falls back to Standby.
    pub async fn connect(&mut self) -> Result<(), ControlError> {
        if self.connection == ConnectionState::Active {
            return Ok(());
        }
        self.connection = ConnectionState::Starting;

        match self.open_session().await {
            Ok(()) => {
                self.connection = ConnectionState::Active;
                let topic = self.core.profile.sensor.topic;
                info!(controller = %self.core.identity, topic, "connected and monitoring");
                Ok(())
            }
            Err(e) => {
                self.connection = ConnectionState::Standby;
                error!(controller = %self.core.identity, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn open_session(&mut self) -> Result<(), ControlError> {
        let subsystem = self.core.profile.subsystem.key();
        let client_id = format!("controller-{}-{}", subsystem, Uuid::new_v4().simple());
        let session = self.broker.connect(&client_id).await?;
        if let Err(e) = session.link.subscribe(self.core.profile.sensor.topic) {
            session.link.disconnect();
            return Err(e.into());
        }
        if let Err(e) = self.actuator.start().await {
            session.link.disconnect();
            return Err(e.into());
        }

        *self.core.link.lock() = Some(session.link.clone());
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(listen(self.core.clone(), session.deliveries, stop_rx));
        self.listener = Some(Running { link: session.link, stop, task });
        Ok(())
    }

    /// Connect, then sensor on and actuator on.
    pub async fn start(&mut self) -> Result<(), ControlError> {
        self.connect().await?;
        self.control_sensor("on").await?;
        self.control_actuator("on")
    }

    /// Halts every loop (joined), disconnects and retires the controller for good.
    pub async fn stop(&mut self) {
        self.sensor.stop().await;
        if let Some(listener) = self.listener.take() {
            listener.halt(&self.core.identity).await;
        }
        self.actuator.stop().await;
        *self.core.link.lock() = None;
        if self.connection != ConnectionState::Retired {
            info!(controller = %self.core.identity, "disconnected");
        }
        self.connection = ConnectionState::Retired;
    }
}

async fn listen(
    core: Arc<ControllerCore>,
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            delivery = deliveries.recv() => match delivery {
                // errors are logged by on_reading
                Some(delivery) => { let _ = core.on_reading(&delivery.payload); }
                None => break,
            },
        }
    }
    debug!(controller = %core.identity, "message loop stopped");
}
