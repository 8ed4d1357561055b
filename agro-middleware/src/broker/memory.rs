//! In-process broker. Exact-topic fan-out plus a log of everything published,
//! which tests use the way a mock MQTT client would be used.

use super::{Broker, BrokerError, Delivery, Link, Session};
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Default)]
struct Inner {
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Delivery>)>>,
    published: Vec<Delivery>,
    next_session: u64,
    unreachable: bool,
    connect_budget: Option<usize>,
}

impl Inner {
    fn route(&mut self, topic: &str, payload: Vec<u8>) {
        let delivery = Delivery { topic: topic.to_string(), payload };
        if let Some(subs) = self.subscribers.get_mut(topic) {
            subs.retain(|(_, tx)| tx.send(delivery.clone()).is_ok());
        }
        self.published.push(delivery);
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `connect` fail, as if the broker were down.
    pub fn set_reachable(&self, reachable: bool) {
        let mut inner = self.inner.lock();
        inner.unreachable = !reachable;
        inner.connect_budget = None;
    }

    /// Lets `connects` more sessions open, then behaves as unreachable.
    #[cfg(test)]
    pub(crate) fn refuse_after(&self, connects: usize) {
        self.inner.lock().connect_budget = Some(connects);
    }

    /// Publishes from outside any session (a remote sensor, a test).
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.inner.lock().route(topic, payload.into());
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .published
            .iter()
            .filter(|d| d.topic == topic)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .subscribers
            .get(topic)
            .map(|subs| subs.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.inner.lock().published.clear();
    }
}

impl Broker for MemoryBroker {
    fn connect<'a>(&'a self, client_id: &'a str) -> BoxFuture<'a, Result<Session, BrokerError>> {
        let mut inner = self.inner.lock();
        if inner.connect_budget == Some(0) {
            inner.unreachable = true;
        }
        if inner.unreachable {
            let refused = BrokerError::Connection("memory broker unreachable".into());
            return future::ready(Err(refused)).boxed();
        }
        if let Some(budget) = inner.connect_budget.as_mut() {
            *budget -= 1;
        }
        inner.next_session += 1;
        let id = inner.next_session;
        drop(inner);

        debug!(client = client_id, session = id, "memory session opened");
        let (tx, rx) = mpsc::unbounded_channel();
        let link = MemoryLink {
            broker: self.inner.clone(),
            session: id,
            tx,
            closed: AtomicBool::new(false),
        };
        future::ready(Ok(Session { link: Arc::new(link), deliveries: rx })).boxed()
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

struct MemoryLink {
    broker: Arc<Mutex<Inner>>,
    session: u64,
    tx: mpsc::UnboundedSender<Delivery>,
    closed: AtomicBool,
}

impl Link for MemoryLink {
    fn subscribe(&self, topic: &str) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.broker
            .lock()
            .subscribers
            .entry(topic.to_string())
            .or_default()
            .push((self.session, self.tx.clone()));
        Ok(())
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        self.broker.lock().route(topic, payload);
        Ok(())
    }

    fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.broker.lock();
        for subs in inner.subscribers.values_mut() {
            subs.retain(|(session, _)| *session != self.session);
        }
    }
}
