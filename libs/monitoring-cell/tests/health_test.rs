// =====================================================================================
// HEALTH AGGREGATOR TESTS
// =====================================================================================

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::FixedSampler;
use monitoring_cell::services::{
    BreakerProbe, EventBus, HealthProbe, PersistentStoreProbe, ProbeReport, ResourceProbe, SharedStoreProbe,
};
use monitoring_cell::{HealthAggregator, HealthEventKind, MetricsCollectorService, MonitoringError};
use resilience_cell::{CircuitBreakerFactory, CircuitBreakerOptions};
use shared_database::{MemoryPersistentStore, MemoryStore};
use shared_models::HealthState;

enum Behavior {
    Report(HealthState),
    Fail,
    Hang,
}

struct ScriptedProbe {
    name: &'static str,
    behavior: Mutex<Behavior>,
    failure_state: HealthState,
}

impl ScriptedProbe {
    fn new(name: &'static str, state: HealthState) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior: Mutex::new(Behavior::Report(state)),
            failure_state: HealthState::Critical,
        })
    }

    fn soft(name: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name,
            behavior: Mutex::new(behavior),
            failure_state: HealthState::Degraded,
        })
    }

    fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }
}

#[async_trait]
impl HealthProbe for ScriptedProbe {
    fn name(&self) -> &str {
        self.name
    }

    fn failure_state(&self) -> HealthState {
        self.failure_state
    }

    async fn check(&self) -> Result<ProbeReport, MonitoringError> {
        let outcome = match &*self.behavior.lock().unwrap() {
            Behavior::Report(state) => Some(Ok(ProbeReport::new(*state))),
            Behavior::Fail => Some(Err(MonitoringError::Probe("scripted failure".to_string()))),
            Behavior::Hang => None,
        };
        match outcome {
            Some(result) => result,
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ProbeReport::new(HealthState::Optimal))
            }
        }
    }
}

fn aggregator() -> (HealthAggregator, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    let aggregator = HealthAggregator::new(
        Duration::from_millis(100),
        bus.clone(),
        Arc::new(MetricsCollectorService::new()),
    );
    (aggregator, bus)
}

#[tokio::test]
async fn test_overall_is_worst_component() {
    let (health, _) = aggregator();
    health.register(ScriptedProbe::new("a", HealthState::Optimal));
    health.register(ScriptedProbe::new("b", HealthState::Degraded));
    health.register(ScriptedProbe::new("c", HealthState::Healthy));

    let cycle = health.probe().await;

    assert_eq!(cycle.status.overall, HealthState::Degraded);
    assert_eq!(cycle.status.components.len(), 3);
    assert_eq!(cycle.status.component("b").map(|c| c.state), Some(HealthState::Degraded));
    assert_eq!(health.current().overall, HealthState::Degraded);
}

#[tokio::test]
async fn test_no_probes_is_optimal() {
    let (health, _) = aggregator();
    assert_eq!(health.probe().await.status.overall, HealthState::Optimal);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_probe_times_out_to_failure_state() {
    let (health, _) = aggregator();
    health.register(ScriptedProbe::new("ok", HealthState::Optimal));
    let stuck = ScriptedProbe::new("stuck", HealthState::Optimal);
    stuck.set(Behavior::Hang);
    health.register(stuck);

    let cycle = health.probe().await;

    assert_eq!(cycle.status.overall, HealthState::Critical);
    let component = cycle.status.component("stuck").unwrap();
    assert!(component.message.as_deref().unwrap_or_default().contains("timed out"));
}

#[tokio::test]
async fn test_probe_error_maps_to_its_failure_state() {
    let (health, _) = aggregator();
    health.register(ScriptedProbe::soft("optional", Behavior::Fail));

    let cycle = health.probe().await;

    assert_eq!(cycle.status.overall, HealthState::Degraded);
    assert!(!cycle.entered_critical);
}

#[tokio::test]
async fn test_critical_is_edge_triggered() {
    let (health, bus) = aggregator();
    let mut events = bus.subscribe_health();
    let store = ScriptedProbe::new("store", HealthState::Optimal);
    health.register(store.clone());

    assert!(health.probe().await.event.is_none());

    store.set(Behavior::Fail);
    let first = health.probe().await;
    assert!(first.entered_critical);
    assert_eq!(first.event.map(|e| e.kind), Some(HealthEventKind::Critical));

    let second = health.probe().await;
    assert!(!second.entered_critical);
    assert!(second.event.is_none());

    store.set(Behavior::Report(HealthState::Optimal));
    let recovered = health.probe().await;
    assert_eq!(recovered.previous, HealthState::Critical);
    assert_eq!(recovered.event.map(|e| e.kind), Some(HealthEventKind::Recovered));

    let kinds: Vec<HealthEventKind> = std::iter::from_fn(|| events.try_recv().ok()).map(|e| e.kind).collect();
    assert_eq!(kinds, vec![HealthEventKind::Critical, HealthEventKind::Recovered]);
}

#[tokio::test]
async fn test_degraded_event_names_components() {
    let (health, _) = aggregator();
    health.register(ScriptedProbe::new("fine", HealthState::Optimal));
    health.register(ScriptedProbe::new("slow", HealthState::AtRisk));

    let event = health.probe().await.event.expect("transition event");

    assert_eq!(event.kind, HealthEventKind::Degraded);
    assert_eq!(event.components, vec!["slow".to_string()]);
}

#[tokio::test]
async fn test_store_probes_report_outages_as_critical() {
    let (health, _) = aggregator();
    let shared = Arc::new(MemoryStore::new("shared"));
    let persistent = Arc::new(MemoryPersistentStore::new());
    health.register(Arc::new(SharedStoreProbe::new(shared.clone())));
    health.register(Arc::new(PersistentStoreProbe::new(persistent.clone())));

    assert_eq!(health.probe().await.status.overall, HealthState::Optimal);

    persistent.set_available(false);
    let cycle = health.probe().await;
    assert_eq!(cycle.status.overall, HealthState::Critical);
    assert_eq!(
        cycle.status.component("persistent_store").map(|c| c.state),
        Some(HealthState::Critical)
    );
    assert_eq!(
        cycle.status.component("shared_store").map(|c| c.state),
        Some(HealthState::Optimal)
    );
}

#[tokio::test]
async fn test_breaker_probe_reflects_open_breakers() {
    let (health, _) = aggregator();
    let breakers = Arc::new(CircuitBreakerFactory::new());
    let breaker = breakers.get_or_create(CircuitBreakerOptions::new("notifier:webhook"));
    health.register(Arc::new(BreakerProbe::new(breakers.clone())));

    assert_eq!(health.probe().await.status.overall, HealthState::Optimal);

    breaker.force_open();
    let cycle = health.probe().await;
    assert_eq!(cycle.status.overall, HealthState::AtRisk);
    assert!(cycle.status.components[0]
        .message
        .as_deref()
        .unwrap_or_default()
        .contains("notifier:webhook"));
}

#[tokio::test]
async fn test_resource_probe_uses_memory_bands() {
    let (health, _) = aggregator();
    let sampler = Arc::new(FixedSampler::new(Some(0.96)));
    health.register(Arc::new(ResourceProbe::new(sampler.clone())));

    assert_eq!(health.probe().await.status.overall, HealthState::Critical);

    sampler.set(None);
    assert_eq!(health.probe().await.status.overall, HealthState::Healthy);
}
