#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use facegate_kernel_contracts::access::{
    AccessDecision, AccessDecisionRequest, AccessFailureKind, ActuationStatus,
    DecisionCycleState,
};
use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac, DeviceRecord};
use facegate_kernel_contracts::history::{HistoryRecordInput, UNKNOWN_REQUESTER_IP};
use facegate_kernel_contracts::identity::{
    EmailAddress, FaceEncoding, IdentityId, IdentityRecord, NationalId, PermissionLevel,
    FACE_ENCODING_DIM,
};
use facegate_kernel_contracts::{MonotonicTimeNs, Validate};
use facegate_os::access_engine::AccessDecisionEngine;
use facegate_os::clock::ManualClock;
use facegate_os::config::AccessEngineConfig;
use facegate_os::device_session::{HistoryUnavailable, LoopbackDeviceChannel, OutcomeHistorySource};
use facegate_os::history_ledger::{HistorySink, LedgerUnavailable, StoreHistorySink};
use facegate_os::registry::{shared_store, SharedAccessStore};
use facegate_engines::trust::RecentOutcome;
use facegate_storage::access_store::AccessStore;
use facegate_storage::ledger::LedgerAppendOutcome;
use facegate_storage::repo::{DeviceRegistryRepo, HistoryLedgerRepo, IdentityRegistryRepo};

const DOOR_A: &str = "aa:00:00:00:00:01";
const ANA: &str = "00000001";

fn mac(s: &str) -> DeviceMac {
    DeviceMac::new(s).unwrap()
}

fn enrolled_encoding() -> Vec<f64> {
    vec![0.2; FACE_ENCODING_DIM]
}

/// Enrolled encoding shifted on one axis, so the distance is exactly `offset`.
fn observed_at(offset: f64) -> Vec<f64> {
    let mut v = enrolled_encoding();
    v[0] += offset;
    v
}

fn seeded_store() -> SharedAccessStore {
    let mut s = AccessStore::new_in_memory();
    s.insert_identity_row(
        IdentityRecord::v1(
            IdentityId::new(ANA).unwrap(),
            "Ana Lima".to_string(),
            "ana".to_string(),
            NationalId::new("123.456.789-01").unwrap(),
            EmailAddress::new("ana@campus.edu.br").unwrap(),
            Some("2020011".to_string()),
            None,
            None,
            PermissionLevel::Discente,
            FaceEncoding::v1(enrolled_encoding()).unwrap(),
        )
        .unwrap(),
    )
    .unwrap();
    s.insert_device_row(
        DeviceRecord::v1(mac(DOOR_A), DeviceLocation::new("Bloco A").unwrap()).unwrap(),
    )
    .unwrap();
    shared_store(s)
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        MonotonicTimeNs(1_000_000_000),
        NaiveDate::from_ymd_opt(2026, 3, 9)
            .unwrap()
            .and_hms_opt(8, 15, 0)
            .unwrap(),
    ))
}

fn fast_config() -> AccessEngineConfig {
    let mut c = AccessEngineConfig::mvp_v1();
    c.devices.actuation_timeout_ms = 50;
    c.devices.turn_wait_timeout_ms = 500;
    c.ledger_timeout_ms = 50;
    c
}

struct Rig {
    store: SharedAccessStore,
    channel: Arc<LoopbackDeviceChannel>,
    clock: Arc<ManualClock>,
    engine: AccessDecisionEngine,
}

fn rig() -> Rig {
    let store = seeded_store();
    let channel = Arc::new(LoopbackDeviceChannel::new());
    let clock = clock();
    let engine =
        AccessDecisionEngine::over_store(fast_config(), store.clone(), channel.clone(), clock.clone())
            .unwrap();
    engine.refresh_registry().unwrap();
    Rig {
        store,
        channel,
        clock,
        engine,
    }
}

fn request(encoding: Vec<f64>) -> AccessDecisionRequest {
    AccessDecisionRequest::v1(mac(DOOR_A), encoding, Some("192.168.0.40".to_string()))
}

fn history_len(store: &SharedAccessStore) -> usize {
    store.lock().history_rows().len()
}

#[tokio::test]
async fn at_access_01_close_match_allows_unlocks_once_and_logs_one_row() {
    let r = rig();
    let out = r.engine.decide(request(observed_at(0.02))).await;

    assert_eq!(out.decision, AccessDecision::Allow);
    assert!((90..=100).contains(&out.trust.value()));
    assert_eq!(out.matched_identity, Some(IdentityId::new(ANA).unwrap()));
    assert_eq!(out.actuation, ActuationStatus::Acknowledged);
    assert_eq!(out.final_state, DecisionCycleState::Logged);
    assert!(out.failure.is_none());
    assert!(out.validate().is_ok());

    let sent = r.channel.accepted();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].device_mac, mac(DOOR_A));
    assert_eq!(sent[0].requester_ip.as_str(), "192.168.0.40");

    let store = r.store.lock();
    let rows = store.history_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(Some(rows[0].row_id), out.history_row_id);
    assert_eq!(rows[0].identity_id(), Some(&IdentityId::new(ANA).unwrap()));
    assert_eq!(rows[0].trust, out.trust);
    assert!(rows[0].log.starts_with("Usuario ana entrou em Bloco A !"));
}

#[tokio::test]
async fn at_access_02_far_face_denies_with_zero_trust_and_no_unlock() {
    let r = rig();
    let out = r.engine.decide(request(observed_at(0.9))).await;

    assert_eq!(out.decision, AccessDecision::Deny);
    assert_eq!(out.trust.value(), 0);
    assert_eq!(out.matched_identity, None);
    assert_eq!(out.actuation, ActuationStatus::NotRequested);
    assert_eq!(out.final_state, DecisionCycleState::Logged);
    assert!(r.channel.accepted().is_empty());

    let store = r.store.lock();
    let rows = store.history_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].identity_id(), None);
    assert_eq!(rows[0].trust.value(), 0);
    assert!(rows[0].log.starts_with("Rosto nao reconhecido em Bloco A !"));
}

#[tokio::test]
async fn at_access_03_unknown_device_fails_without_row_or_unlock() {
    let r = rig();
    let req = AccessDecisionRequest::v1(mac("aa:00:00:00:00:99"), observed_at(0.02), None);
    let out = r.engine.decide(req).await;

    assert_eq!(out.final_state, DecisionCycleState::Failed);
    assert_eq!(out.decision, AccessDecision::Deny);
    assert_eq!(out.failure.as_ref().map(|f| f.kind), Some(AccessFailureKind::UnknownDevice));
    assert_eq!(history_len(&r.store), 0);
    assert!(r.channel.accepted().is_empty());
}

#[tokio::test]
async fn at_access_04_consecutive_denials_damp_a_genuine_match() {
    let r = rig();
    for _ in 0..5 {
        let out = r.engine.decide(request(observed_at(0.9))).await;
        assert_eq!(out.decision, AccessDecision::Deny);
    }

    let damped = r.engine.decide(request(observed_at(0.02))).await;
    assert_eq!(damped.decision, AccessDecision::Deny);
    assert_eq!(damped.trust.value(), 68);
    assert_eq!(damped.matched_identity, Some(IdentityId::new(ANA).unwrap()));
    assert!(r.channel.accepted().is_empty());
    assert_eq!(history_len(&r.store), 6);

    // Outside the damping window the same face is trusted again.
    r.clock.advance_ms(300_001);
    let recovered = r.engine.decide(request(observed_at(0.02))).await;
    assert_eq!(recovered.decision, AccessDecision::Allow);
    assert_eq!(recovered.trust.value(), 98);
}

#[tokio::test]
async fn at_access_05_never_loaded_registry_fails_with_store_unavailable_alert() {
    let store = seeded_store();
    let channel = Arc::new(LoopbackDeviceChannel::new());
    let engine =
        AccessDecisionEngine::over_store(fast_config(), store.clone(), channel.clone(), clock())
            .unwrap();
    engine.devices().register_device(
        DeviceRecord::v1(mac(DOOR_A), DeviceLocation::new("Bloco A").unwrap()).unwrap(),
    );
    let mut alerts = engine.subscribe_alerts();

    let out = engine.decide(request(observed_at(0.02))).await;

    assert_eq!(out.final_state, DecisionCycleState::Failed);
    assert_eq!(out.failure.as_ref().map(|f| f.kind), Some(AccessFailureKind::StoreUnavailable));
    assert_eq!(history_len(&store), 0);
    assert!(channel.accepted().is_empty());
    let alert = alerts.try_recv().unwrap();
    assert_eq!(alert.kind, AccessFailureKind::StoreUnavailable);
    assert_eq!(alert.cycle_id, Some(out.cycle_id));
}

#[tokio::test]
async fn at_access_06_malformed_observation_is_rejected_before_matching() {
    let r = rig();
    let short = r.engine.decide(request(vec![0.2; FACE_ENCODING_DIM - 1])).await;
    assert_eq!(
        short.failure.as_ref().map(|f| f.kind),
        Some(AccessFailureKind::MalformedObservation)
    );

    let mut nan = observed_at(0.0);
    nan[5] = f64::NAN;
    let non_finite = r.engine.decide(request(nan)).await;
    assert_eq!(
        non_finite.failure.as_ref().map(|f| f.kind),
        Some(AccessFailureKind::MalformedObservation)
    );

    let bad_ip = AccessDecisionRequest::v1(mac(DOOR_A), observed_at(0.02), Some("300.1.1.1".into()));
    let out = r.engine.decide(bad_ip).await;
    assert_eq!(out.failure.as_ref().map(|f| f.kind), Some(AccessFailureKind::MalformedObservation));

    assert_eq!(history_len(&r.store), 0);
    assert!(r.channel.accepted().is_empty());
}

#[tokio::test]
async fn at_access_07_missing_requester_ip_is_logged_with_sentinel() {
    let r = rig();
    let req = AccessDecisionRequest::v1(mac(DOOR_A), observed_at(0.02), None);
    let out = r.engine.decide(req).await;

    assert_eq!(out.final_state, DecisionCycleState::Logged);
    let store = r.store.lock();
    assert_eq!(store.history_rows()[0].ip.as_str(), UNKNOWN_REQUESTER_IP);
}

#[tokio::test]
async fn at_access_08_actuation_timeout_still_logs_the_allow() {
    let r = rig();
    r.channel.set_delay(&mac(DOOR_A), Duration::from_millis(300));

    let out = r.engine.decide(request(observed_at(0.02))).await;

    assert_eq!(out.decision, AccessDecision::Allow);
    assert_eq!(out.actuation, ActuationStatus::TimedOut);
    assert_eq!(out.final_state, DecisionCycleState::Logged);
    assert_eq!(out.failure.as_ref().map(|f| f.kind), Some(AccessFailureKind::ActuationTimeout));
    assert!(r.channel.accepted().is_empty());

    let store = r.store.lock();
    assert_eq!(store.history_rows().len(), 1);
    assert!(store.history_rows()[0].log.contains("[actuation_timeout]"));
    drop(store);
    assert_eq!(r.engine.counters().actuation_timeouts, 1);
}

#[tokio::test]
async fn at_access_09_rejected_history_row_fails_the_cycle_and_alerts() {
    let store = seeded_store();
    // Ledger backed by a store that has never seen the device.
    let ledger = Arc::new(StoreHistorySink::new(shared_store(AccessStore::new_in_memory())));
    let channel = Arc::new(LoopbackDeviceChannel::new());
    let engine = AccessDecisionEngine::new(fast_config(), clock(), store, channel, ledger).unwrap();
    engine.refresh_registry().unwrap();
    let mut alerts = engine.subscribe_alerts();

    let out = engine.decide(request(observed_at(0.9))).await;

    assert_eq!(out.final_state, DecisionCycleState::Failed);
    assert_eq!(out.failure.as_ref().map(|f| f.kind), Some(AccessFailureKind::LedgerRejected));
    assert_eq!(out.history_row_id, None);
    assert_eq!(alerts.try_recv().unwrap().kind, AccessFailureKind::LedgerRejected);
    assert_eq!(engine.counters().ledger_failures, 1);
}

struct DownLedger;

#[async_trait]
impl HistorySink for DownLedger {
    async fn append(&self, _input: HistoryRecordInput) -> Result<LedgerAppendOutcome, LedgerUnavailable> {
        Err(LedgerUnavailable("connection refused".to_string()))
    }
}

struct StalledLedger;

#[async_trait]
impl HistorySink for StalledLedger {
    async fn append(&self, _input: HistoryRecordInput) -> Result<LedgerAppendOutcome, LedgerUnavailable> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(LedgerUnavailable("never reached".to_string()))
    }
}

#[tokio::test]
async fn at_access_10_unavailable_ledger_fails_the_cycle_after_unlock() {
    let ledgers: [Arc<dyn HistorySink>; 2] = [Arc::new(DownLedger), Arc::new(StalledLedger)];
    for ledger in ledgers {
        let channel = Arc::new(LoopbackDeviceChannel::new());
        let engine =
            AccessDecisionEngine::new(fast_config(), clock(), seeded_store(), channel.clone(), ledger)
                .unwrap();
        engine.refresh_registry().unwrap();
        let mut alerts = engine.subscribe_alerts();

        let out = engine.decide(request(observed_at(0.02))).await;

        assert_eq!(out.decision, AccessDecision::Allow);
        assert_eq!(out.actuation, ActuationStatus::Acknowledged);
        assert_eq!(out.final_state, DecisionCycleState::Failed);
        assert_eq!(
            out.failure.as_ref().map(|f| f.kind),
            Some(AccessFailureKind::LedgerUnavailable)
        );
        assert_eq!(channel.accepted().len(), 1);
        assert_eq!(alerts.try_recv().unwrap().kind, AccessFailureKind::LedgerUnavailable);
    }
}

struct UnreadableHistory;

impl OutcomeHistorySource for UnreadableHistory {
    fn recent_outcomes(&self, _mac: &DeviceMac) -> Result<Vec<RecentOutcome>, HistoryUnavailable> {
        Err(HistoryUnavailable("history table locked".to_string()))
    }
}

#[tokio::test]
async fn at_access_11_unreadable_history_scores_base_only() {
    let store = seeded_store();
    let channel = Arc::new(LoopbackDeviceChannel::new());
    let mut config = fast_config();
    config.trust.trusted_locations.insert("Biblioteca".to_string());
    let engine = AccessDecisionEngine::over_store(config, store.clone(), channel, clock())
        .unwrap()
        .with_outcome_history(Arc::new(UnreadableHistory));
    engine.refresh_registry().unwrap();

    let out = engine.decide(request(observed_at(0.02))).await;

    assert!(out.degraded);
    assert_eq!(out.decision, AccessDecision::Allow);
    assert_eq!(out.trust.value(), 98);
    assert!(store.lock().history_rows()[0].log.contains("[degraded]"));
}

#[tokio::test]
async fn at_access_12_threshold_and_ceiling_boundaries() {
    let r = rig();

    let at_threshold = r.engine.decide(request(observed_at(0.30))).await;
    assert_eq!(at_threshold.trust.value(), 70);
    assert_eq!(at_threshold.decision, AccessDecision::Allow);

    let below = r.engine.decide(request(observed_at(0.31))).await;
    assert_eq!(below.trust.value(), 69);
    assert_eq!(below.decision, AccessDecision::Deny);
    assert!(below.matched_identity.is_some());

    let past_ceiling = r.engine.decide(request(observed_at(0.61))).await;
    assert_eq!(past_ceiling.matched_identity, None);
    assert_eq!(past_ceiling.trust.value(), 0);
}

#[tokio::test]
async fn at_access_13_identity_removed_after_snapshot_is_treated_as_no_match() {
    let r = rig();
    r.store
        .lock()
        .delete_identity_cascade(&IdentityId::new(ANA).unwrap())
        .unwrap();

    let out = r.engine.decide(request(observed_at(0.02))).await;

    assert_eq!(out.decision, AccessDecision::Deny);
    assert_eq!(out.matched_identity, None);
    assert_eq!(out.trust.value(), 0);
    assert_eq!(out.final_state, DecisionCycleState::Logged);
    assert!(r.engine.encoding_store().is_dirty());

    let next = r.engine.decide(request(observed_at(0.02))).await;
    assert_eq!(next.matched_identity, None);
    assert!(!r.engine.encoding_store().is_dirty());
}

#[tokio::test]
async fn at_access_14_invalidation_picks_up_new_enrollment() {
    let r = rig();
    let before = r.engine.encoding_store().current_generation();
    r.store
        .lock()
        .update_identity_encoding_row(
            &IdentityId::new(ANA).unwrap(),
            FaceEncoding::v1(vec![0.7; FACE_ENCODING_DIM]).unwrap(),
        )
        .unwrap();
    r.engine.invalidate_registry();

    let mut moved = vec![0.7; FACE_ENCODING_DIM];
    moved[0] += 0.02;
    let out = r.engine.decide(request(moved)).await;

    assert_eq!(out.decision, AccessDecision::Allow);
    assert!(r.engine.encoding_store().current_generation() > before);
}

#[tokio::test]
async fn at_access_15_counters_and_cycle_ids_track_every_cycle() {
    let r = rig();
    let a = r.engine.decide(request(observed_at(0.02))).await;
    let b = r.engine.decide(request(observed_at(0.9))).await;
    let c = r
        .engine
        .decide(AccessDecisionRequest::v1(mac("aa:00:00:00:00:42"), observed_at(0.02), None))
        .await;

    assert!(a.cycle_id < b.cycle_id && b.cycle_id < c.cycle_id);
    let counters = r.engine.counters();
    assert_eq!(counters.cycles, 3);
    assert_eq!(counters.allowed, 1);
    assert_eq!(counters.denied, 2);
    assert_eq!(counters.failed, 1);

    let health = r.engine.health();
    assert_eq!(health.device_count, 1);
    assert_eq!(health.device_channel, "loopback");
    assert!(health.registry_generation.is_some());
}

#[tokio::test]
async fn at_access_16_finite_but_huge_observation_is_a_logged_no_match() {
    let r = rig();
    let out = r.engine.decide(request(vec![1e200; FACE_ENCODING_DIM])).await;

    assert!(out.failure.is_none());
    assert_eq!(out.final_state, DecisionCycleState::Logged);
    assert_eq!(out.decision, AccessDecision::Deny);
    assert_eq!(out.trust.value(), 0);
    assert_eq!(out.matched_identity, None);
    assert!(r.channel.accepted().is_empty());
    assert_eq!(history_len(&r.store), 1);
}
