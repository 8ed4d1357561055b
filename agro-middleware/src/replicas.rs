/**
 * REPLICA POOLS - One primary and N-1 standbys per subsystem
 *
 * INVARIANTS :
 * - a pool is never empty
 * - the head (index 0) is the only connected member and has role Primary
 * - promotion keeps the pool size constant
 *
 * FAILOVER (manual, triggered from the facade) :
 * 1. stop the head (loops joined, session closed)
 * 2. drop it from the pool
 * 3. the next member becomes Primary and recovers state from history
 * 4. it is started (connect, sensor on, actuator on)
 * 5. a fresh standby is appended at the tail
 *
 * The retired head hands nothing over: continuity only comes from the store.
 */

use crate::broker::SharedBroker;
use crate::controller::{Controller, ControllerSettings};
use crate::error::ControlError;
use crate::models::{ConnectionState, PoolMember, Role};
use crate::ports::SharedStore;
use crate::subsystems::{Subsystem, SubsystemProfile};
use serde::Serialize;
use tracing::{error, info, warn};

/// Builds controllers of one subsystem with the same broker, store and settings.
#[derive(Clone)]
pub struct ControllerFactory {
    profile: SubsystemProfile,
    settings: ControllerSettings,
    broker: SharedBroker,
    store: SharedStore,
}

impl ControllerFactory {
    pub fn new(
        profile: SubsystemProfile,
        settings: ControllerSettings,
        broker: SharedBroker,
        store: SharedStore,
    ) -> Self {
        Self { profile, settings, broker, store }
    }

    pub fn build(&self, role: Role) -> Controller {
        let (broker, store) = (self.broker.clone(), self.store.clone());
        Controller::new(self.profile.clone(), role, &self.settings, broker, store)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Promotion {
    pub retired: String,
    pub promoted: String,
    pub appended: String,
}

pub struct ReplicaSet {
    subsystem: Subsystem,
    members: Vec<Controller>,
    next_replica: usize,
    factory: ControllerFactory,
}

impl ReplicaSet {
    /// Instantiates `size` controllers (Primary, Replica1, Replica2, ...)
    /// without starting any of them.
    pub fn new(factory: ControllerFactory, size: usize) -> Result<Self, ControlError> {
        if size == 0 {
            return Err(ControlError::InvalidPoolSize(size));
        }
        let subsystem = factory.profile.subsystem;
        let members: Vec<Controller> = (0..size)
            .map(|i| factory.build(if i == 0 { Role::Primary } else { Role::Replica(i) }))
            .collect();
        for member in &members {
            info!(pool = %subsystem, controller = member.identity(), "controller created");
        }
        Ok(Self { subsystem, members, next_replica: size, factory })
    }

    /// Creates the pool and starts its head.
    pub async fn create_pool(
        factory: ControllerFactory,
        size: usize,
    ) -> Result<Self, ControlError> {
        let mut pool = Self::new(factory, size)?;
        if let Err(e) = pool.members[0].start().await {
            // a partial start may have left sessions open
            pool.members[0].stop().await;
            return Err(e);
        }
        Ok(pool)
    }

    pub fn subsystem(&self) -> Subsystem {
        self.subsystem
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn head(&self) -> &Controller {
        &self.members[0]
    }

    pub fn head_mut(&mut self) -> &mut Controller {
        &mut self.members[0]
    }

    pub fn members(&self) -> Vec<PoolMember> {
        self.members
            .iter()
            .map(|c| PoolMember { name: c.identity().to_string(), role: c.role().to_string() })
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.members.iter().filter(|c| c.connection_state() == ConnectionState::Active).count()
    }

    pub async fn promote(&mut self) -> Result<Promotion, ControlError> {
        if self.members.len() < 2 {
            warn!(pool = %self.subsystem, "no standby available, failover aborted");
            return Err(ControlError::NoStandbyAvailable(self.subsystem.key().to_string()));
        }

        self.members[0].stop().await;
        let retired = self.members.remove(0);

        let head = &mut self.members[0];
        warn!(
            pool = %self.subsystem,
            failed = retired.identity(),
            promoted = head.identity(),
            "failover"
        );
        head.set_role(Role::Primary);
        head.recover_state();
        let started = head.start().await;
        let promoted = head.identity().to_string();

        let standby = self.factory.build(Role::Replica(self.next_replica));
        self.next_replica += 1;
        let appended = standby.identity().to_string();
        info!(pool = %self.subsystem, controller = %appended, "standby appended");
        self.members.push(standby);

        if let Err(e) = started {
            let pool = self.subsystem;
            error!(%pool, controller = %promoted, error = %e, "promoted head failed to start");
            self.members[0].stop().await;
            return Err(e);
        }
        Ok(Promotion { retired: retired.identity().to_string(), promoted, appended })
    }

    /// Stops the head; standbys hold no resources.
    pub async fn shutdown(&mut self) {
        self.members[0].stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::HistoryKey;
    use crate::models::ActuatorState;
    use crate::ports::MemoryHistoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    fn factory(subsystem: Subsystem, broker: &MemoryBroker, key: HistoryKey) -> ControllerFactory {
        let settings =
            ControllerSettings { sensor_interval: Duration::from_secs(3600), history_key: key };
        ControllerFactory::new(
            subsystem.profile(),
            settings,
            Arc::new(broker.clone()),
            Arc::new(MemoryHistoryStore::new()),
        )
    }

    async fn started(
        subsystem: Subsystem,
        broker: &MemoryBroker,
        key: HistoryKey,
        size: usize,
    ) -> ReplicaSet {
        ReplicaSet::create_pool(factory(subsystem, broker, key), size).await.unwrap()
    }

    fn primaries(pool: &ReplicaSet) -> usize {
        pool.members().iter().filter(|m| m.role == "Primary").count()
    }

    #[tokio::test]
    async fn test_create_pool_starts_only_the_head() {
        let broker = MemoryBroker::new();
        let pool = started(Subsystem::Lighting, &broker, HistoryKey::Instance, 3).await;

        let members = pool.members();
        assert_eq!(members.len(), 3);
        assert_eq!(members[0].role, "Primary");
        assert_eq!(members[1].role, "Replica1");
        assert_eq!(members[2].role, "Replica2");
        assert_eq!(members[2].name, "Lighting (Replica2)");
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.head().connection_state(), ConnectionState::Active);
        assert_eq!(broker.subscriber_count("agriculture/sensors/light"), 1);
    }

    #[tokio::test]
    async fn test_empty_pool_is_rejected() {
        let broker = MemoryBroker::new();
        let result = ReplicaSet::new(factory(Subsystem::Cooling, &broker, HistoryKey::Instance), 0);
        assert!(matches!(result, Err(ControlError::InvalidPoolSize(0))));
    }

    #[tokio::test]
    async fn test_promote_keeps_size_and_single_primary() {
        let broker = MemoryBroker::new();
        let mut pool = started(Subsystem::Lighting, &broker, HistoryKey::Instance, 3).await;

        let first = pool.promote().await.unwrap();
        assert_eq!(first.retired, "Lighting (Primary)");
        assert_eq!(first.promoted, "Lighting (Replica1)");
        assert_eq!(first.appended, "Lighting (Replica3)");

        let second = pool.promote().await.unwrap();
        assert_eq!(second.promoted, "Lighting (Replica2)");
        assert_eq!(second.appended, "Lighting (Replica4)");

        assert_eq!(pool.len(), 3);
        assert_eq!(primaries(&pool), 1);
        assert_eq!(pool.members()[0].role, "Primary");
        assert_eq!(pool.members()[0].name, "Lighting (Replica2)");
        assert_eq!(pool.active_count(), 1);
        // only the new head listens
        assert_eq!(broker.subscriber_count("agriculture/sensors/light"), 1);
    }

    #[tokio::test]
    async fn test_repeated_promotions_always_succeed_on_a_full_pool() {
        let broker = MemoryBroker::new();
        let mut pool = started(Subsystem::Cooling, &broker, HistoryKey::Instance, 3).await;
        for _ in 0..5 {
            pool.promote().await.unwrap();
            assert_eq!(pool.len(), 3);
            assert_eq!(primaries(&pool), 1);
        }
    }

    #[tokio::test]
    async fn test_single_member_pool_cannot_fail_over() {
        let broker = MemoryBroker::new();
        let mut pool = started(Subsystem::Irrigation, &broker, HistoryKey::Instance, 1).await;
        let before = pool.members();

        let result = pool.promote().await;
        assert!(matches!(result, Err(ControlError::NoStandbyAvailable(_))));
        assert_eq!(pool.members(), before);
        assert_eq!(pool.head().connection_state(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn test_promoted_head_recovers_under_subsystem_key() {
        let broker = MemoryBroker::new();
        let mut pool = started(Subsystem::Cooling, &broker, HistoryKey::Subsystem, 2).await;
        pool.head().on_reading(r#"{"value": 34.0, "unit": "°C"}"#.as_bytes()).unwrap();

        pool.promote().await.unwrap();
        assert_eq!(pool.head().last_sensor_value(), Some(34.0));
        // start-up ON from the new head is the latest actuator value
        assert_eq!(pool.head().last_actuator_value(), Some(ActuatorState::On));
    }

    #[tokio::test]
    async fn test_promoted_head_recovers_nothing_under_instance_key() {
        let broker = MemoryBroker::new();
        let mut pool = started(Subsystem::Cooling, &broker, HistoryKey::Instance, 2).await;
        pool.head().on_reading(r#"{"value": 34.0, "unit": "°C"}"#.as_bytes()).unwrap();

        pool.promote().await.unwrap();
        assert_eq!(pool.head().last_sensor_value(), None);
    }

    #[tokio::test]
    async fn test_failed_start_still_restores_pool_size() {
        let broker = MemoryBroker::new();
        let mut pool = started(Subsystem::Lighting, &broker, HistoryKey::Instance, 3).await;
        broker.set_reachable(false);

        assert!(matches!(pool.promote().await, Err(ControlError::Broker(_))));
        assert_eq!(pool.len(), 3);
        assert_eq!(primaries(&pool), 1);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_partial_start_is_rolled_back() {
        let broker = MemoryBroker::new();
        // controller and actuator sessions open, the sensor session is refused
        broker.refuse_after(2);
        let factory = factory(Subsystem::Cooling, &broker, HistoryKey::Instance);
        let result = ReplicaSet::create_pool(factory, 3).await;

        assert!(matches!(result, Err(ControlError::Broker(_))));
        assert_eq!(broker.subscriber_count("agriculture/sensors/temperature"), 0);
        assert_eq!(broker.subscriber_count("agriculture/actuators/cooling"), 0);
    }
}
