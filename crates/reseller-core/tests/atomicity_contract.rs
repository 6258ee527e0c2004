//! Contract Test: Provisioning attempts are all-or-nothing
//!
//! Constraints verified:
//! - A failure after partial registry work leaves no service row
//! - A failed attempt returns the order to the status it was claimed from,
//!   or to `failed` when failed-order marking is enabled
//! - Every failed attempt appends an `order_activation_failed` log entry
//! - Attempt bookkeeping survives the rollback
//! - An already provisioned invoice cannot be provisioned twice
//! - No store transaction stays open across registry calls
//!
//! If this test fails, a partially provisioned order can leak into storage.

mod common;

use common::*;
use reseller_core::Error;
use std::sync::Arc;
use std::time::Duration;
use reseller_core::config::EngineConfig;
use reseller_core::model::{OrderStatus, Role, events};
use std::collections::BTreeMap;

/// Paid order whose four roles are four different parties
async fn four_party_store(invoice_id: i64) -> reseller_core::MemoryStore {
    let store = store_with_provider().await;
    let contacts: BTreeMap<String, _> = Role::ALL
        .iter()
        .enumerate()
        .map(|(i, role)| {
            (
                role.as_str().to_string(),
                contact(&format!("Party {}", i), &format!("p{}@example.test", i)),
            )
        })
        .collect();
    seed_paid_order(
        &store,
        1,
        invoice_id,
        "domain.register",
        register_data("atomic.test", contacts),
    )
    .await;
    store
}

#[tokio::test]
async fn domain_create_failure_rolls_back_everything() {
    let store = four_party_store(30).await;
    let connector = ScriptedConnector::with_behaviour(Behaviour {
        fail_domain_create: Some("Domain name not available".into()),
        ..Default::default()
    });
    let engine = engine(&store, &connector);

    let err = engine.provision_service(30, 42).await.unwrap_err();

    assert_eq!(err.to_string(), "DomainCreate error: Domain name not available");
    assert_eq!(connector.contact_create_count(), 4);
    assert!(store.services().await.is_empty());

    let order = store.order(1).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    // Registry ids of the rolled-back attempt are not kept
    assert!(
        order
            .service_data
            .contact(Role::Registrant)
            .and_then(|c| c.registry_id())
            .is_none()
    );

    let logs = store.logs().await;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].event, events::ORDER_ACTIVATION_FAILED);
    assert_eq!(logs[0].service_id, 0);
    assert_eq!(logs[0].actor_id, 42);
    assert!(logs[0].details.contains("Domain name not available"));

    // Session is closed on the error path too
    assert_eq!(connector.logout_count(), 1);
}

#[tokio::test]
async fn contact_failure_stops_before_domain_command() {
    let store = four_party_store(31).await;
    let connector = ScriptedConnector::with_behaviour(Behaviour {
        fail_contact_after: Some(2),
        ..Default::default()
    });
    let engine = engine(&store, &connector);

    let err = engine.provision_service(31, 42).await.unwrap_err();

    assert!(matches!(err, Error::RegistryProtocol { ref command, .. } if command == "ContactCreate (tech)"));
    assert_eq!(connector.contact_create_count(), 2);
    assert_eq!(connector.domain_create_count(), 0);
    assert!(store.services().await.is_empty());
    assert_eq!(store.logs().await.len(), 1);
}

#[tokio::test]
async fn failed_attempt_is_recorded_on_the_order() {
    let store = seeded_store(32, "book.test").await;
    let connector = ScriptedConnector::with_behaviour(Behaviour {
        fail_connect: true,
        ..Default::default()
    });
    let engine = engine(&store, &connector);

    engine.provision_service(32, 42).await.unwrap_err();
    engine.provision_service(32, 42).await.unwrap_err();

    let order = store.order(1).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    let state = order.service_data.provisioning.expect("bookkeeping recorded");
    assert_eq!(state.attempts, 2);
    assert_eq!(state.last_error_kind.as_deref(), Some("connection"));
    assert!(state.last_attempt_at.is_some());
    assert!(order.service_data.last_error.is_some());
}

#[tokio::test]
async fn failed_orders_are_marked_when_enabled() {
    let store = seeded_store(33, "mark.test").await;
    let connector = ScriptedConnector::with_behaviour(Behaviour {
        fail_domain_create: Some("Registry busy".into()),
        ..Default::default()
    });
    let config = EngineConfig {
        mark_failed_orders: true,
        ..Default::default()
    };
    let engine = engine_with(&store, &connector, config);

    engine.provision_service(33, 42).await.unwrap_err();

    assert_eq!(store.order(1).await.unwrap().status, OrderStatus::Failed);
}

#[tokio::test]
async fn provisioned_invoice_is_not_claimed_again() {
    let store = seeded_store(34, "once.test").await;
    let connector = ScriptedConnector::new();
    let engine = engine(&store, &connector);

    engine.provision_service(34, 42).await.unwrap();
    let err = engine.provision_service(34, 42).await.unwrap_err();

    assert!(matches!(err, Error::Consistency(_)));
    assert_eq!(connector.domain_create_count(), 1);
    assert_eq!(store.services().await.len(), 1);
    assert_eq!(store.order(1).await.unwrap().status, OrderStatus::Active);
}

#[tokio::test]
async fn concurrent_triggers_provision_once() {
    let store = seeded_store(35, "race.test").await;
    let connector = ScriptedConnector::new();
    let engine = std::sync::Arc::new(engine(&store, &connector));

    let a = tokio::spawn({
        let engine = std::sync::Arc::clone(&engine);
        async move { engine.provision_service(35, 42).await }
    });
    let b = tokio::spawn({
        let engine = std::sync::Arc::clone(&engine);
        async move { engine.provision_service(35, 7).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(connector.domain_create_count(), 1);
    assert_eq!(store.services().await.len(), 1);
}

#[tokio::test]
async fn failed_order_is_returned_to_failed_without_marking() {
    let store = seeded_store(36, "refail.test").await;
    let mut order = store.order(1).await.unwrap();
    order.status = OrderStatus::Failed;
    store.seed_order(order).await;
    let connector = ScriptedConnector::with_behaviour(Behaviour {
        fail_domain_create: Some("Registry busy".into()),
        ..Default::default()
    });
    let engine = engine(&store, &connector);

    engine.provision_service(36, 42).await.unwrap_err();

    assert_eq!(store.order(1).await.unwrap().status, OrderStatus::Failed);
    assert_eq!(store.claimed_at(1).await, None);
}

#[tokio::test]
async fn registry_call_does_not_block_other_attempts() {
    let store = seeded_store(37, "slow.test").await;
    let data = register_data("quick.test", everywhere(&contact("Jane Roe", "jane@example.test")));
    seed_paid_order(&store, 2, 38, "domain.register", data).await;
    let connector = ScriptedConnector::with_behaviour(Behaviour {
        slow_create: Some(("slow.test".into(), Duration::from_millis(800))),
        ..Default::default()
    });
    let engine = Arc::new(engine(&store, &connector));

    let slow = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.provision_service(37, 42).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The slow order is claimed and visible while its create is in flight
    assert_eq!(store.order(1).await.unwrap().status, OrderStatus::Provisioning);
    assert!(store.claimed_at(1).await.is_some());

    let quick = tokio::time::timeout(Duration::from_millis(500), engine.provision_service(38, 42))
        .await
        .expect("second attempt is not held up by the first");
    assert_eq!(quick.unwrap().service_name, "quick.test");

    slow.await.unwrap().unwrap();
    assert_eq!(store.services().await.len(), 2);
}
