use super::{Broker, BrokerError, Delivery, Link, Session};
use crate::config::MqttConf;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub struct MqttBroker {
    conf: MqttConf,
}

impl MqttBroker {
    pub fn new(conf: MqttConf) -> Self {
        Self { conf }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.conf.host, self.conf.port)
    }

    async fn connect_with_retry(&self, client_id: &str) -> Result<Session, BrokerError> {
        let attempts = self.conf.connect_attempts.max(1);
        let mut backoff = self.conf.retry_backoff();
        let mut last = String::new();

        for attempt in 1..=attempts {
            match self.connect_once(client_id).await {
                Ok(session) => {
                    info!(client = client_id, broker = %self.address(), "MQTT connected");
                    return Ok(session);
                }
                Err(e) => {
                    warn!(client = client_id, attempt, attempts, error = %e, "MQTT connect failed");
                    last = e.to_string();
                    if attempt < attempts {
                        sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        Err(BrokerError::Unreachable { address: self.address(), attempts, last })
    }

    async fn connect_once(&self, client_id: &str) -> Result<Session, BrokerError> {
        let mut opts = MqttOptions::new(client_id, &self.conf.host, self.conf.port);
        opts.set_keep_alive(Duration::from_secs(self.conf.keep_alive_secs.max(5)));
        opts.set_clean_session(true);
        let (client, mut eventloop) = AsyncClient::new(opts, 64);

        // the event loop only opens the socket once polled
        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(BrokerError::Connection(format!("{:?}", ack.code)))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(BrokerError::Connection(e.to_string())),
                }
            }
        };
        match timeout(self.conf.connect_timeout(), handshake).await {
            Ok(result) => result?,
            Err(_) => return Err(BrokerError::ConnectTimeout(self.conf.connect_timeout())),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let link = Arc::new(MqttLink {
            client: client.clone(),
            topics: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        });
        let pump = Pump {
            client,
            topics: link.topics.clone(),
            closed: link.closed.clone(),
            client_id: client_id.to_string(),
        };
        tokio::spawn(pump.run(eventloop, tx));

        Ok(Session { link, deliveries: rx })
    }
}

impl Broker for MqttBroker {
    fn connect<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<Session, BrokerError>> {
        self.connect_with_retry(client_id).boxed()
    }

    fn kind(&self) -> &'static str {
        "mqtt"
    }
}

/// Re-issues every recorded subscription. Clean sessions forget them on reconnect.
fn restore_subscriptions(client: &AsyncClient, topics: &Mutex<Vec<String>>) -> usize {
    let topics = topics.lock().clone();
    let mut restored = 0;
    for topic in &topics {
        match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
            Ok(()) => restored += 1,
            Err(e) => warn!(%topic, error = %e, "subscription not restored"),
        }
    }
    restored
}

/// Drives the rumqttc event loop for one session until the link is closed.
struct Pump {
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    client_id: String,
}

impl Pump {
    async fn run(self, mut eventloop: EventLoop, tx: mpsc::UnboundedSender<Delivery>) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    let delivery = Delivery { topic: p.topic.clone(), payload: p.payload.to_vec() };
                    // publish-only sessions drop their receiver
                    let _ = tx.send(delivery);
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    let restored = restore_subscriptions(&self.client, &self.topics);
                    info!(client = %self.client_id, restored, "MQTT reconnected");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!(client = %self.client_id, "disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closed.load(Ordering::Acquire) {
                        break;
                    }
                    warn!(client = %self.client_id, error = %e, "MQTT connection lost");
                    sleep(RECONNECT_DELAY).await;
                }
            }
        }
        debug!(client = %self.client_id, "MQTT event loop stopped");
    }
}

struct MqttLink {
    client: AsyncClient,
    topics: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl Link for MqttLink {
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| BrokerError::Client(e.to_string()))?;
        let mut topics = self.topics.lock();
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload)
            .map_err(|e| BrokerError::Client(e.to_string()))
    }

    fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.client.try_disconnect() {
                debug!(error = %e, "MQTT disconnect request dropped");
            }
        }
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // nothing listens on port 1 on loopback
    fn dead_end(attempts: u32) -> MqttConf {
        MqttConf {
            host: "127.0.0.1".into(),
            port: 1,
            keep_alive_secs: 5,
            connect_timeout_ms: 200,
            connect_attempts: attempts,
            retry_backoff_ms: 10,
        }
    }

    fn offline_link() -> (MqttLink, EventLoop) {
        let opts = MqttOptions::new("agro-test", "127.0.0.1", 1);
        let (client, eventloop) = AsyncClient::new(opts, 16);
        let link = MqttLink {
            client,
            topics: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        (link, eventloop)
    }

    #[tokio::test]
    async fn test_unreachable_broker_gives_up_after_bounded_attempts() {
        let broker = MqttBroker::new(dead_end(2));
        let started = std::time::Instant::now();
        let err = broker.connect("agro-test").await.err().expect("connect must fail");
        assert!(matches!(err, BrokerError::Unreachable { attempts: 2, .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_subscriptions_are_recorded_once_and_restored() {
        let (link, _eventloop) = offline_link();
        link.subscribe("agriculture/sensors/light").unwrap();
        link.subscribe("agriculture/sensors/light").unwrap();
        link.subscribe("agriculture/actuators/lighting").unwrap();
        assert_eq!(link.topics.lock().len(), 2);

        assert_eq!(restore_subscriptions(&link.client, &link.topics), 2);
    }

    #[tokio::test]
    async fn test_pump_survives_dropped_receiver_until_closed() {
        let (link, eventloop) = offline_link();
        let pump = Pump {
            client: link.client.clone(),
            topics: link.topics.clone(),
            closed: link.closed.clone(),
            client_id: "agro-test".into(),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let task = tokio::spawn(pump.run(eventloop, tx));

        // a publish-only session keeps retrying through connection errors
        sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished());

        link.disconnect();
        assert!(matches!(link.publish("t", b"ON".to_vec()), Err(BrokerError::Closed)));
        timeout(RECONNECT_DELAY * 3, task).await.expect("pump must stop once closed").unwrap();
    }
}
