// =====================================================================================
// RECOVERY ORCHESTRATOR TESTS
// =====================================================================================

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockall::{mock, Sequence};

use common::{pipeline_fixture, test_config, HangingStore, PipelineFixture};
use monitoring_cell::services::metrics::names;
use monitoring_cell::services::{
    HealthAggregator, ReconnectPersistentStore, ReconnectSharedStore, RecoveryAction, RecoveryOutcome,
    RestartComponents, SharedStoreProbe,
};
use monitoring_cell::{ManagedComponent, MetricsSink, MonitoringError, RecoveryOrchestrator};
use shared_database::{MemoryPersistentStore, MemoryStore, PersistentStore};
use shared_models::{AlertPriority, AlertType};

mock! {
    pub Action {}

    #[async_trait]
    impl RecoveryAction for Action {
        fn name(&self) -> &str;
        async fn execute(&self) -> Result<(), MonitoringError>;
    }
}

mock! {
    pub Component {}

    #[async_trait]
    impl ManagedComponent for Component {
        fn name(&self) -> &str;
        async fn stop(&self) -> Result<(), MonitoringError>;
        async fn start(&self) -> Result<(), MonitoringError>;
    }
}

struct Setup {
    store: Arc<MemoryStore>,
    health: Arc<HealthAggregator>,
    fixture: PipelineFixture,
}

/// Health hinges on one shared store, which starts out unreachable.
fn setup() -> Setup {
    let fixture = pipeline_fixture(test_config().alerts, |p| p);
    let sink: Arc<dyn MetricsSink> = fixture.metrics.clone();
    let health = Arc::new(HealthAggregator::new(
        Duration::from_millis(100),
        fixture.bus.clone(),
        sink,
    ));
    let store = Arc::new(MemoryStore::new("redis"));
    store.set_available(false);
    store.set_reconnect_restores(false);
    health.register(Arc::new(SharedStoreProbe::new(store.clone())));

    Setup { store, health, fixture }
}

fn orchestrator(setup: &Setup, actions: Vec<Arc<dyn RecoveryAction>>) -> RecoveryOrchestrator {
    RecoveryOrchestrator::new(
        actions,
        setup.health.clone(),
        setup.fixture.pipeline.clone(),
        setup.fixture.metrics.clone(),
    )
}

fn action(name: &str) -> MockAction {
    let mut action = MockAction::new();
    action.expect_name().return_const(name.to_string());
    action
}

/// An action that brings the store back when run.
fn fixing_action(name: &str, store: &Arc<MemoryStore>) -> MockAction {
    let mut action = action(name);
    let store = store.clone();
    action.expect_execute().times(1).returning(move || {
        store.set_available(true);
        Ok(())
    });
    action
}

#[tokio::test]
async fn test_stops_at_first_action_that_restores_health() {
    let s = setup();

    let mut noop = action("noop");
    noop.expect_execute().times(1).returning(|| Ok(()));
    let fix = fixing_action("fix", &s.store);
    let mut never = action("never");
    never.expect_execute().times(0);

    let recovery = orchestrator(&s, vec![Arc::new(noop), Arc::new(fix), Arc::new(never)]);

    let outcome = recovery.recover().await;

    assert_eq!(outcome, RecoveryOutcome::Recovered { action: "fix".to_string() });
    assert!(!recovery.is_degraded());
    assert_eq!(s.fixture.metrics.counter(names::RECOVERY_ATTEMPTS), 1);
    assert_eq!(s.fixture.metrics.counter(names::RECOVERY_SUCCEEDED), 1);
}

#[tokio::test]
async fn test_failing_action_escalates_to_next_step() {
    let s = setup();

    let mut broken = action("broken");
    broken
        .expect_execute()
        .times(1)
        .returning(|| Err(MonitoringError::Recovery("still down".to_string())));
    let fix = fixing_action("fix", &s.store);

    let recovery = orchestrator(&s, vec![Arc::new(broken), Arc::new(fix)]);

    assert_eq!(
        recovery.recover().await,
        RecoveryOutcome::Recovered { action: "fix".to_string() }
    );
}

#[tokio::test]
async fn test_exhausted_ladder_enters_degraded_mode() {
    let s = setup();
    let mut alerts = s.fixture.bus.subscribe_alerts();

    let mut first = action("first");
    first.expect_execute().times(1).returning(|| Ok(()));
    let mut second = action("second");
    second.expect_execute().times(1).returning(|| Ok(()));

    let mut scheduler = MockComponent::new();
    scheduler.expect_name().return_const("scheduler".to_string());
    scheduler.expect_stop().times(1).returning(|| Ok(()));
    scheduler.expect_start().times(0);

    let recovery = orchestrator(&s, vec![Arc::new(first), Arc::new(second)])
        .with_halt_on_exhaustion(Arc::new(scheduler));

    let outcome = recovery.recover().await;

    assert_eq!(
        outcome,
        RecoveryOutcome::Exhausted {
            attempted: vec!["first".to_string(), "second".to_string()]
        }
    );
    assert!(recovery.is_degraded());
    assert_eq!(s.fixture.metrics.counter(names::RECOVERY_EXHAUSTED), 1);

    let alert = alerts.try_recv().unwrap();
    assert_eq!(alert.alert_type, AlertType::System);
    assert_eq!(alert.priority, AlertPriority::Critical);
    assert!(alert.message.contains("first, second"));
}

#[tokio::test]
async fn test_later_success_clears_degraded_mode() {
    let s = setup();

    let mut noop = action("noop");
    noop.expect_execute().returning(|| Ok(()));
    let recovery = orchestrator(&s, vec![Arc::new(noop)]);

    assert!(matches!(recovery.recover().await, RecoveryOutcome::Exhausted { .. }));
    assert!(recovery.is_degraded());

    s.store.set_available(true);
    assert_eq!(
        recovery.recover().await,
        RecoveryOutcome::Recovered { action: "noop".to_string() }
    );
    assert!(!recovery.is_degraded());
}

struct SlowAction;

#[async_trait]
impl RecoveryAction for SlowAction {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(&self) -> Result<(), MonitoringError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_action_times_out_and_ladder_continues() {
    let s = setup();
    let silent = Arc::new(HangingStore::new());
    let fix = fixing_action("fix", &s.store);
    let recovery = orchestrator(
        &s,
        vec![Arc::new(ReconnectSharedStore::new(silent.clone())), Arc::new(fix)],
    )
    .with_step_timeout(Duration::from_secs(2));

    let started = tokio::time::Instant::now();
    let outcome = tokio::time::timeout(Duration::from_secs(60), recovery.recover())
        .await
        .expect("recovery must not hang on a silent store");

    assert_eq!(outcome, RecoveryOutcome::Recovered { action: "fix".to_string() });
    assert_eq!(silent.calls(), 1);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_recovery_reports_in_progress() {
    let s = setup();
    let recovery = Arc::new(orchestrator(&s, vec![Arc::new(SlowAction)]));

    let running = {
        let recovery = recovery.clone();
        tokio::spawn(async move { recovery.recover().await })
    };
    tokio::task::yield_now().await;

    assert_eq!(recovery.recover().await, RecoveryOutcome::InProgress);
    assert!(matches!(running.await.unwrap(), RecoveryOutcome::Exhausted { .. }));
    assert_eq!(s.fixture.metrics.counter(names::RECOVERY_ATTEMPTS), 1);
}

#[tokio::test]
async fn test_reconnect_actions_restore_stores() {
    let s = setup();
    s.store.set_reconnect_restores(true);
    let persistent = Arc::new(MemoryPersistentStore::new());
    persistent.set_available(false);

    let shared_action = ReconnectSharedStore::new(s.store.clone());
    let persistent_action = ReconnectPersistentStore::new(persistent.clone());

    shared_action.execute().await.unwrap();
    persistent_action.execute().await.unwrap();

    assert_eq!(s.store.reconnect_calls(), 1);
    assert!(s.store.is_available());
    assert!(persistent.ping().await.is_ok());
}

#[tokio::test]
async fn test_reconnect_action_surfaces_store_error() {
    let s = setup();
    let action = ReconnectSharedStore::new(s.store.clone());

    let result = action.execute().await;

    assert!(matches!(result, Err(MonitoringError::Store(_))));
}

#[tokio::test]
async fn test_restart_stops_in_reverse_and_starts_in_order() {
    let mut seq = Sequence::new();
    let mut throttle = MockComponent::new();
    let mut scheduler = MockComponent::new();
    throttle.expect_name().return_const("throttle".to_string());
    scheduler.expect_name().return_const("scheduler".to_string());

    scheduler.expect_stop().times(1).in_sequence(&mut seq).returning(|| Ok(()));
    throttle
        .expect_stop()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Err(MonitoringError::Component("already stopped".to_string())));
    throttle.expect_start().times(1).in_sequence(&mut seq).returning(|| Ok(()));
    scheduler.expect_start().times(1).in_sequence(&mut seq).returning(|| Ok(()));

    let restart = RestartComponents::new(vec![Arc::new(throttle), Arc::new(scheduler)]);

    assert!(restart.execute().await.is_ok());
    assert_eq!(restart.name(), "restart_components");
}

#[tokio::test]
async fn test_restart_fails_when_a_component_cannot_start() {
    let mut component = MockComponent::new();
    component.expect_name().return_const("detector".to_string());
    component.expect_stop().returning(|| Ok(()));
    component
        .expect_start()
        .returning(|| Err(MonitoringError::Component("no route".to_string())));

    let restart = RestartComponents::new(vec![Arc::new(component)]);

    assert!(matches!(restart.execute().await, Err(MonitoringError::Component(_))));
}
