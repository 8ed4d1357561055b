/**
 * BROKER - Publish/subscribe seam between controllers, sensors and actuators
 *
 * ROLE :
 * Every component that talks on a topic opens its own `Session` through a
 * `Broker`. A session is a `Link` (subscribe, publish, disconnect) plus the
 * receiving end of its deliveries, which feeds the owner's background loop.
 *
 * IMPLEMENTATIONS :
 * - `MqttBroker`   : rumqttc client, bounded connect timeout with retry/backoff
 * - `MemoryBroker` : in-process fan-out used by tests and `--offline` runs
 *
 * Publishing is fire-and-forget: no acknowledgement reaches the caller.
 */

pub mod memory;
pub mod mqtt;

pub use memory::MemoryBroker;
pub use mqtt::MqttBroker;

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no CONNACK within {0:?}")]
    ConnectTimeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("broker {address} unreachable after {attempts} attempt(s): {last}")]
    Unreachable { address: String, attempts: u32, last: String },
    #[error("client error: {0}")]
    Client(String),
    #[error("session closed")]
    Closed,
}

pub trait Link: Send + Sync {
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError>;
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
    fn disconnect(&self);
}

pub struct Session {
    pub link: Arc<dyn Link>,
    pub deliveries: mpsc::UnboundedReceiver<Delivery>,
}

pub trait Broker: Send + Sync {
    fn connect<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<Session, BrokerError>>;

    /// "mqtt" or "memory", reported by `/system/health`
    fn kind(&self) -> &'static str;
}

pub type SharedBroker = Arc<dyn Broker>;
