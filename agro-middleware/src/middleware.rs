/**
 * MIDDLEWARE - Process-wide context owning one replica pool per subsystem
 *
 * LIFECYCLE :
 * - `bootstrap` builds the irrigation, cooling and lighting pools and starts
 *   each head; a failure stops whatever was already started
 * - the facade calls the operations below while the process runs
 * - `shutdown` stops every head (loops joined, sessions closed) before exit
 *
 * Each pool sits behind its own `RwLock`: snapshots take read locks, control
 * and failover take the write lock, so a promotion never overlaps with
 * another writer on the same subsystem.
 */

use crate::broker::SharedBroker;
use crate::config::MiddlewareConfig;
use crate::contracts::{validate_reading, ContractRegistry};
use crate::controller::ControllerSettings;
use crate::error::ControlError;
use crate::health::{memory_usage_mb, HealthTracker, MiddlewareHealth};
use crate::models::{ActuatorState, HistoryPoint, PoolMember};
use crate::ports::SharedStore;
use crate::replicas::{ControllerFactory, Promotion, ReplicaSet};
use crate::subsystems::Subsystem;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct Middleware {
    pools: BTreeMap<Subsystem, RwLock<ReplicaSet>>,
    contracts: ContractRegistry,
    health: HealthTracker,
    broker_kind: &'static str,
    store_description: String,
}

impl Middleware {
    pub async fn bootstrap(
        cfg: &MiddlewareConfig,
        broker: SharedBroker,
        store: SharedStore,
    ) -> Result<Self, ControlError> {
        let settings = ControllerSettings {
            sensor_interval: cfg.sensor_interval(),
            history_key: cfg.history_key,
        };
        let mut pools = BTreeMap::new();

        for subsystem in Subsystem::ALL {
            let mut profile = subsystem.profile();
            if let Some(limit) = cfg.limits.get(&subsystem) {
                profile.threshold = profile.threshold.with_limit(*limit);
            }
            let factory =
                ControllerFactory::new(profile, settings.clone(), broker.clone(), store.clone());

            match ReplicaSet::create_pool(factory, cfg.pool_size).await {
                Ok(pool) => {
                    info!(pool = %subsystem, size = pool.len(), "pool ready");
                    pools.insert(subsystem, RwLock::new(pool));
                }
                Err(e) => {
                    for pool in pools.values_mut() {
                        RwLock::get_mut(pool).shutdown().await;
                    }
                    return Err(e);
                }
            }
        }

        info!(
            broker = broker.kind(),
            store = %store.describe(),
            history_key = ?cfg.history_key,
            "middleware started"
        );
        Ok(Self {
            pools,
            contracts: ContractRegistry::for_subsystems(&Subsystem::ALL),
            health: HealthTracker::new(),
            broker_kind: broker.kind(),
            store_description: store.describe(),
        })
    }

    fn pool(&self, name: &str) -> Result<(Subsystem, &RwLock<ReplicaSet>), ControlError> {
        let subsystem = Subsystem::parse(name).ok_or_else(|| {
            warn!(name, "unknown subsystem");
            ControlError::UnknownSubsystem(name.to_string())
        })?;
        let pool = self
            .pools
            .get(&subsystem)
            .ok_or_else(|| ControlError::UnknownSubsystem(name.to_string()))?;
        Ok((subsystem, pool))
    }

    pub fn validate_reading(kind: &str, value: f64) -> bool {
        validate_reading(kind, value)
    }

    /// Last reading of each head, keyed by sensor kind. Unset or implausible
    /// values are left out, not corrected.
    pub async fn snapshot_sensors(&self) -> BTreeMap<String, f64> {
        let mut snapshot = BTreeMap::new();
        for pool in self.pools.values() {
            let pool = pool.read().await;
            let head = pool.head();
            let kind = head.profile().sensor.kind;
            match head.last_sensor_value() {
                Some(value) if Self::validate_reading(kind, value) => {
                    snapshot.insert(kind.to_string(), value);
                }
                value => warn!(sensor = kind, ?value, "invalid reading left out of snapshot"),
            }
        }
        snapshot
    }

    pub async fn snapshot_actuators(&self) -> BTreeMap<String, Option<ActuatorState>> {
        let mut snapshot = BTreeMap::new();
        for (subsystem, pool) in &self.pools {
            let state = pool.read().await.head().last_actuator_value();
            snapshot.insert(subsystem.key().to_string(), state);
        }
        snapshot
    }

    pub async fn control_actuator(&self, name: &str, action: &str) -> Result<(), ControlError> {
        let (_, pool) = self.pool(name)?;
        pool.read().await.head().control_actuator(action)
    }

    pub async fn control_sensor(&self, name: &str, action: &str) -> Result<(), ControlError> {
        let (_, pool) = self.pool(name)?;
        pool.write().await.head_mut().control_sensor(action).await
    }

    pub async fn simulate_failover(&self, name: &str) -> Result<Promotion, ControlError> {
        let (subsystem, pool) = self.pool(name)?;
        warn!(pool = %subsystem, "simulating primary failure");
        pool.write().await.promote().await
    }

    pub async fn history(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<Vec<HistoryPoint>, ControlError> {
        let (_, pool) = self.pool(name)?;
        Ok(pool.read().await.head().get_history(limit))
    }

    pub async fn list_pools(&self) -> BTreeMap<String, Vec<PoolMember>> {
        let mut listing = BTreeMap::new();
        for (subsystem, pool) in &self.pools {
            listing.insert(subsystem.key().to_string(), pool.read().await.members());
        }
        listing
    }

    pub fn contracts(&self) -> &ContractRegistry {
        &self.contracts
    }

    pub async fn health(&self) -> MiddlewareHealth {
        let mut controllers = 0;
        let mut active = 0;
        for pool in self.pools.values() {
            let pool = pool.read().await;
            controllers += pool.len() as u32;
            active += pool.active_count() as u32;
        }
        MiddlewareHealth {
            uptime_seconds: self.health.uptime_seconds(),
            broker: self.broker_kind.to_string(),
            store: self.store_description.clone(),
            pools: self.pools.len() as u32,
            controllers,
            active_controllers: active,
            memory_usage_mb: memory_usage_mb(),
        }
    }

    pub async fn shutdown(&self) {
        info!("shutting down controller pools");
        for (subsystem, pool) in &self.pools {
            pool.write().await.shutdown().await;
            info!(pool = %subsystem, "pool stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::config::{HistoryKey, StoreConf};
    use crate::ports::MemoryHistoryStore;
    use std::sync::Arc;
    use std::time::Duration;

    const TOPICS: [&str; 6] = [
        "agriculture/sensors/soil_moisture",
        "agriculture/sensors/temperature",
        "agriculture/sensors/light",
        "agriculture/actuators/irrigation",
        "agriculture/actuators/cooling",
        "agriculture/actuators/lighting",
    ];

    async fn boot(cfg: MiddlewareConfig) -> (Middleware, MemoryBroker) {
        let broker = MemoryBroker::new();
        let store = Arc::new(MemoryHistoryStore::new());
        let mw = Middleware::bootstrap(&cfg, Arc::new(broker.clone()), store).await.unwrap();
        (mw, broker)
    }

    fn quiet_config() -> MiddlewareConfig {
        MiddlewareConfig {
            sensor_interval_secs: 3600,
            store: StoreConf { path: None },
            ..Default::default()
        }
    }

    /// Stops the emitters and lets their start-up readings drain through the heads.
    async fn silence_sensors(mw: &Middleware) {
        for subsystem in Subsystem::ALL {
            mw.control_sensor(subsystem.key(), "off").await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_validate_reading_table() {
        assert!(!Middleware::validate_reading("soil_moisture", 5.0));
        assert!(Middleware::validate_reading("soil_moisture", 30.0));
    }

    #[tokio::test]
    async fn test_bootstrap_builds_three_pools() {
        let (mw, broker) = boot(quiet_config()).await;
        let pools = mw.list_pools().await;
        assert_eq!(pools.len(), 3);
        for members in pools.values() {
            assert_eq!(members.len(), 3);
            assert_eq!(members.iter().filter(|m| m.role == "Primary").count(), 1);
        }
        for topic in TOPICS {
            assert_eq!(broker.subscriber_count(topic), 1, "{topic}");
        }
        let health = mw.health().await;
        assert_eq!(health.controllers, 9);
        assert_eq!(health.active_controllers, 3);
        assert_eq!(health.broker, "memory");
    }

    #[tokio::test]
    async fn test_shutdown_stops_every_loop() {
        let (mw, broker) = boot(quiet_config()).await;
        mw.shutdown().await;

        assert_eq!(mw.health().await.active_controllers, 0);
        for topic in TOPICS {
            assert_eq!(broker.subscriber_count(topic), 0, "{topic}");
        }

        // stopped emitters publish nothing more
        broker.clear();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TOPICS.iter().all(|topic| broker.published_on(topic).is_empty()));
    }

    #[tokio::test]
    async fn test_lighting_failover_scenario() {
        let (mw, _broker) = boot(quiet_config()).await;
        mw.simulate_failover("lighting").await.unwrap();
        mw.simulate_failover("lighting").await.unwrap();

        let pools = mw.list_pools().await;
        let lighting = &pools["lighting"];
        assert_eq!(lighting.len(), 3);
        assert_eq!(lighting.iter().filter(|m| m.role == "Primary").count(), 1);
        assert_eq!(mw.health().await.active_controllers, 3);
    }

    #[tokio::test]
    async fn test_single_member_pools_refuse_failover() {
        let (mw, _broker) = boot(MiddlewareConfig { pool_size: 1, ..quiet_config() }).await;
        let before = mw.list_pools().await;
        let result = mw.simulate_failover("cooling").await;
        assert!(matches!(result, Err(ControlError::NoStandbyAvailable(_))));
        assert_eq!(mw.list_pools().await, before);
    }

    #[tokio::test]
    async fn test_fresh_heads_report_right_away() {
        let (mw, _broker) = boot(quiet_config()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // simulated ranges match the validation table
        let sensors = mw.snapshot_sensors().await;
        assert_eq!(sensors.len(), 3);
        assert!(mw.snapshot_actuators().await.values().all(Option::is_some));
    }

    #[tokio::test]
    async fn test_snapshots_filter_out_of_range_values() {
        let (mw, broker) = boot(quiet_config()).await;
        silence_sensors(&mw).await;
        let hot = r#"{"value": 40.0, "unit": "°C"}"#;
        broker.inject("agriculture/sensors/temperature", hot.as_bytes().to_vec());
        let dry = br#"{"value": 25.0, "unit": "%"}"#;
        broker.inject("agriculture/sensors/soil_moisture", dry.to_vec());

        let mut sensors = BTreeMap::new();
        for _ in 0..100 {
            sensors = mw.snapshot_sensors().await;
            let cooling = mw.snapshot_actuators().await["cooling"];
            if sensors.get("soil_moisture") == Some(&25.0)
                && !sensors.contains_key("temperature")
                && cooling == Some(ActuatorState::On)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // 40 °C drove the cooling decision but is outside [15, 35]
        assert_eq!(sensors.get("soil_moisture"), Some(&25.0));
        assert!(!sensors.contains_key("temperature"));
        assert_eq!(mw.snapshot_actuators().await["cooling"], Some(ActuatorState::On));
        assert_eq!(mw.snapshot_actuators().await["irrigation"], Some(ActuatorState::On));
    }

    #[tokio::test]
    async fn test_manual_control_routes_to_the_head() {
        let (mw, broker) = boot(quiet_config()).await;
        silence_sensors(&mw).await;
        broker.clear();

        mw.control_actuator("irrigation", "off").await.unwrap();
        assert_eq!(mw.snapshot_actuators().await["irrigation"], Some(ActuatorState::Off));
        assert_eq!(broker.published_on("agriculture/actuators/irrigation"), vec![b"OFF".to_vec()]);

        let unknown_action = mw.control_actuator("irrigation", "maybe").await;
        assert!(matches!(unknown_action, Err(ControlError::UnknownCommand(_))));
        let unknown_subsystem = mw.control_actuator("heating", "on").await;
        assert!(matches!(unknown_subsystem, Err(ControlError::UnknownSubsystem(_))));

        mw.control_sensor("soil-moisture", "off").await.unwrap();
        mw.control_sensor("temperature", "on").await.unwrap();
    }

    #[tokio::test]
    async fn test_history_survives_failover_under_subsystem_key() {
        let cfg = MiddlewareConfig { history_key: HistoryKey::Subsystem, ..quiet_config() };
        let (mw, broker) = boot(cfg).await;
        silence_sensors(&mw).await;
        broker.inject("agriculture/sensors/light", br#"{"value": 150, "unit": "lux"}"#.to_vec());
        for _ in 0..100 {
            let latest = mw.history("lighting", 1).await.unwrap();
            if latest.first().map(|p| p.value) == Some(150.0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        mw.simulate_failover("lighting").await.unwrap();

        let history = mw.history("luminosity", 50).await.unwrap();
        assert!(history.iter().any(|p| p.value == 150.0));
        assert!(mw.history("greenhouse", 50).await.is_err());
    }
}
