//! E2E tests for polling mode against scripted registry and webui servers.

mod common;

use std::time::Duration;

use common::{MockNrf, MockWebui};
use nf_sync_core::backoff::BackoffConfig;
use nf_sync_core::poller::PollerConfig;
use nf_sync_core::{
    CountingTelemetry, Orchestrator, PlmnId, RegistrationSettings, RegistrationState, SyncMode,
};
use serde_json::json;
use std::sync::Arc;

fn fast_poller(webui: &MockWebui) -> PollerConfig {
    PollerConfig {
        base_uri: webui.base(),
        backoff: BackoffConfig {
            initial: Duration::from_millis(50),
            max: Duration::from_millis(200),
            factor: 2.0,
        },
        request_timeout: Duration::from_secs(2),
    }
}

fn settings(nrf: &MockNrf) -> RegistrationSettings {
    RegistrationSettings {
        registry_uri: nrf.base(),
        proposed_instance_id: "proposed".to_string(),
        ..Default::default()
    }
}

/// Registration waits for a non-empty list and carries it in the profile.
#[tokio::test]
async fn test_polling_registers_once_plmns_appear() {
    let nrf = MockNrf::start("assigned-1", 60).await;
    let webui = MockWebui::start(json!([])).await;
    let telemetry = CountingTelemetry::default();

    let handle = Orchestrator::new(settings(&nrf), SyncMode::Polling(fast_poller(&webui)))
        .with_telemetry(Arc::new(telemetry.clone()))
        .start()
        .expect("orchestrator starts");
    let mut served = handle.served();
    let mut state = handle.registration_state();

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(nrf.requests().is_empty(), "no registration without PLMNs");

    webui.set_plmns(json!([{ "mcc": "208", "mnc": "93" }]));
    served
        .wait_for(|plmns| !plmns.is_empty())
        .await
        .expect("served list published");
    assert_eq!(*served.borrow(), vec![PlmnId::new("208", "93")]);

    let requests = nrf
        .wait_for("initial registration", |r| !r.is_empty())
        .await;
    assert_eq!(requests[0].line(), "PUT proposed");
    assert_eq!(
        requests[0].body["plmnList"],
        json!([{ "mcc": "208", "mnc": "93" }])
    );
    assert_eq!(requests[0].body["nfType"], "UDR");
    state
        .wait_for(|s| *s == RegistrationState::Registered)
        .await
        .expect("registered");

    handle.shutdown().await;
    let lines = nrf.lines();
    assert_eq!(lines.last().map(String::as_str), Some("DELETE assigned-1"));
    assert_eq!(*state.borrow(), RegistrationState::Terminated);

    let snapshot = telemetry.counters().snapshot();
    assert_eq!(snapshot.registration_success, 1);
    assert_eq!(snapshot.deregistration_success, 1);
    assert!(snapshot.poll_delivered >= 1);
}

/// A PLMN change triggers a new full registration with the updated list.
#[tokio::test]
async fn test_polling_reregisters_on_change() {
    let nrf = MockNrf::start("assigned-1", 60).await;
    let webui = MockWebui::start(json!([{ "mcc": "001", "mnc": "01" }])).await;

    let handle = Orchestrator::new(settings(&nrf), SyncMode::Polling(fast_poller(&webui)))
        .start()
        .expect("orchestrator starts");

    nrf.wait_for("initial registration", |r| r.len() == 1).await;
    webui.set_plmns(json!([
        { "mcc": "001", "mnc": "01" },
        { "mcc": "002", "mnc": "02" }
    ]));

    let requests = nrf
        .wait_for("second registration", |r| r.len() >= 2)
        .await;
    assert_eq!(requests[1].line(), "PUT assigned-1");
    assert_eq!(
        requests[1].body["plmnList"],
        json!([{ "mcc": "001", "mnc": "01" }, { "mcc": "002", "mnc": "02" }])
    );
    assert_eq!(requests[1].body["nfInstanceId"], "assigned-1");

    // Unchanged polls must not cause further registrations.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(nrf.requests().len(), 2);

    handle.shutdown().await;
}
