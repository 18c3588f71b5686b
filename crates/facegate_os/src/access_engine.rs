#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::Instrument;

use facegate_engines::access_decision::{
    decide, decision_reason_code, history_log_text, reason_code_for, unlock_command,
    DecisionCycle, HistoryLogFlags,
};
use facegate_engines::face_match::{match_observation, validate_observation};
use facegate_engines::trust::{score_trust, RecentOutcome};
use facegate_kernel_contracts::access::{
    AccessDecision, AccessDecisionRequest, AccessDecisionResult, AccessFailure,
    AccessFailureKind, ActuationStatus, CycleId, DecisionCycleState, ACCESS_CONTRACT_VERSION,
};
use facegate_kernel_contracts::device::DeviceMac;
use facegate_kernel_contracts::history::{HistoryRecordInput, HistoryRowId, TrustScore};
use facegate_kernel_contracts::identity::IdentityId;
use facegate_kernel_contracts::{MonotonicTimeNs, Validate};
use facegate_storage::ledger::LedgerAppendOutcome;

use crate::alerts::{AlertPublisher, OperationalAlert};
use crate::clock::AccessClock;
use crate::config::{AccessEngineConfig, EngineError};
use crate::device_session::{
    CycleTicket, DeviceChannel, DeviceSessionError, DeviceSessionManager, OutcomeHistorySource,
};
use crate::encoding_store::{EncodingStore, EncodingStoreError};
use crate::history_ledger::{HistorySink, StoreHistorySink};
use crate::registry::{RegistrySource, SharedAccessStore};

#[derive(Debug, Default)]
struct EngineCounters {
    cycles: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    failed: AtomicU64,
    actuation_timeouts: AtomicU64,
    ledger_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineCountersSnapshot {
    pub cycles: u64,
    pub allowed: u64,
    pub denied: u64,
    pub failed: u64,
    pub actuation_timeouts: u64,
    pub ledger_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHealth {
    pub registry_generation: Option<u64>,
    pub registry_dirty: bool,
    pub device_count: usize,
    pub devices_alive: usize,
    pub device_channel: &'static str,
    pub counters: EngineCountersSnapshot,
}

/// Access Decision Engine: one `decide` call is one decision cycle.
///
/// Cycles run independently; the only shared state is the registry snapshot
/// (read-only) and the per-device actuation order in the session manager.
pub struct AccessDecisionEngine {
    config: AccessEngineConfig,
    clock: Arc<dyn AccessClock>,
    registry: Arc<dyn RegistrySource>,
    encoding_store: Arc<EncodingStore>,
    devices: Arc<DeviceSessionManager>,
    outcome_history: Arc<dyn OutcomeHistorySource>,
    ledger: Arc<dyn HistorySink>,
    alerts: AlertPublisher,
    next_cycle_id: AtomicU64,
    counters: EngineCounters,
}

impl AccessDecisionEngine {
    pub fn new(
        config: AccessEngineConfig,
        clock: Arc<dyn AccessClock>,
        registry: Arc<dyn RegistrySource>,
        channel: Arc<dyn DeviceChannel>,
        ledger: Arc<dyn HistorySink>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let encoding_store = Arc::new(EncodingStore::new(registry.clone()));
        let devices = Arc::new(DeviceSessionManager::new(config.devices, channel));
        let alerts = AlertPublisher::new(config.alert_channel_capacity);
        Ok(Self {
            config,
            clock,
            registry,
            encoding_store,
            outcome_history: devices.clone(),
            devices,
            ledger,
            alerts,
            next_cycle_id: AtomicU64::new(1),
            counters: EngineCounters::default(),
        })
    }

    /// Wires every collaborator to one shared in-memory store.
    pub fn over_store(
        config: AccessEngineConfig,
        store: SharedAccessStore,
        channel: Arc<dyn DeviceChannel>,
        clock: Arc<dyn AccessClock>,
    ) -> Result<Self, EngineError> {
        let ledger = Arc::new(StoreHistorySink::new(store.clone()));
        Self::new(config, clock, store, channel, ledger)
    }

    pub fn with_outcome_history(mut self, source: Arc<dyn OutcomeHistorySource>) -> Self {
        self.outcome_history = source;
        self
    }

    pub fn config(&self) -> &AccessEngineConfig {
        &self.config
    }

    pub fn encoding_store(&self) -> &Arc<EncodingStore> {
        &self.encoding_store
    }

    pub fn devices(&self) -> &Arc<DeviceSessionManager> {
        &self.devices
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<OperationalAlert> {
        self.alerts.subscribe()
    }

    pub fn counters(&self) -> EngineCountersSnapshot {
        let c = &self.counters;
        EngineCountersSnapshot {
            cycles: c.cycles.load(Ordering::Relaxed),
            allowed: c.allowed.load(Ordering::Relaxed),
            denied: c.denied.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            actuation_timeouts: c.actuation_timeouts.load(Ordering::Relaxed),
            ledger_failures: c.ledger_failures.load(Ordering::Relaxed),
        }
    }

    pub fn health(&self) -> EngineHealth {
        let liveness = self.devices.liveness(self.clock.now());
        EngineHealth {
            registry_generation: self.encoding_store.current_generation(),
            registry_dirty: self.encoding_store.is_dirty(),
            device_count: liveness.len(),
            devices_alive: liveness.iter().filter(|d| d.alive).count(),
            device_channel: self.devices.channel_name(),
            counters: self.counters(),
        }
    }

    pub fn heartbeat(&self, mac: &DeviceMac) -> Result<(), DeviceSessionError> {
        self.devices.heartbeat(mac, self.clock.now())
    }

    /// Reloads the face registry and realigns device sessions with the device table.
    pub fn refresh_registry(&self) -> Result<u64, EncodingStoreError> {
        match self.registry.devices() {
            Ok(devices) => self.devices.sync_devices(devices),
            Err(e) => tracing::warn!(error = %e, "device table unavailable; keeping current sessions"),
        }
        match self.encoding_store.refresh() {
            Ok(snapshot) => Ok(snapshot.generation()),
            Err(e) => {
                if self.encoding_store.current_generation().is_none() {
                    self.alerts.publish(OperationalAlert {
                        kind: AccessFailureKind::StoreUnavailable,
                        cycle_id: None,
                        device_mac: None,
                        detail: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Invalidation signal from the administrative side.
    pub fn invalidate_registry(&self) {
        self.encoding_store.invalidate();
        if let Ok(devices) = self.registry.devices() {
            self.devices.sync_devices(devices);
        }
    }

    pub fn spawn_registry_worker(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.registry_refresh_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.refresh_registry() {
                    tracing::warn!(error = %e, "registry refresh pass failed");
                }
            }
        })
    }

    pub async fn decide(&self, request: AccessDecisionRequest) -> AccessDecisionResult {
        let now = self.clock.now();
        // Cycle ids for a known device are drawn under its slot lock.
        let ticket = self
            .devices
            .begin_cycle(&request.device_mac, now, || self.allocate_cycle_id());
        let cycle_id = match &ticket {
            Ok(t) => t.cycle_id(),
            Err(_) => self.allocate_cycle_id(),
        };
        let span = tracing::info_span!(
            "access_cycle",
            cycle_id = cycle_id.0,
            device_mac = %request.device_mac
        );
        let result = self
            .run_cycle(cycle_id, now, ticket, request)
            .instrument(span)
            .await;
        self.count(&result);
        result
    }

    fn allocate_cycle_id(&self) -> CycleId {
        CycleId(self.next_cycle_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn run_cycle(
        &self,
        cycle_id: CycleId,
        now: MonotonicTimeNs,
        ticket: Result<CycleTicket, DeviceSessionError>,
        request: AccessDecisionRequest,
    ) -> AccessDecisionResult {
        let mut cycle = DecisionCycle::start(cycle_id);
        let mac = request.device_mac.clone();

        let requester_ip = match request.validate().and_then(|_| request.requester_ip()) {
            Ok(ip) => ip,
            Err(v) => {
                return self.fail_early(&mut cycle, mac, AccessFailureKind::MalformedObservation, v.to_string())
            }
        };
        if let Err(v) = validate_observation(&request.observed_encoding) {
            return self.fail_early(&mut cycle, mac, AccessFailureKind::MalformedObservation, v.to_string());
        }

        let ticket = match ticket {
            Ok(t) => t,
            Err(e) => return self.fail_early(&mut cycle, mac, AccessFailureKind::UnknownDevice, e.to_string()),
        };

        let snapshot = match self.encoding_store.snapshot() {
            Ok(s) => s,
            Err(e) => return self.fail_early(&mut cycle, mac, AccessFailureKind::StoreUnavailable, e.to_string()),
        };
        let mut matched = match match_observation(&self.config.face_match, &snapshot, &request.observed_encoding) {
            Ok(m) => m,
            Err(v) => {
                return self.fail_early(&mut cycle, mac, AccessFailureKind::MalformedObservation, v.to_string())
            }
        };

        let identity = match matched.candidate.clone() {
            None => None,
            Some(id) => match self.registry.identity_snapshot(&id) {
                Ok(Some(snap)) => Some(snap),
                Ok(None) => {
                    tracing::warn!(identity_id = %id, "matched identity no longer enrolled; treating as no match");
                    self.encoding_store.invalidate();
                    matched.candidate = None;
                    None
                }
                Err(e) => {
                    return self.fail_early(&mut cycle, mac, AccessFailureKind::StoreUnavailable, e.to_string())
                }
            },
        };
        step(&mut cycle, DecisionCycleState::Matched);

        let recent = match self.outcome_history.recent_outcomes(&mac) {
            Ok(r) => Some(r),
            Err(e) => {
                tracing::warn!(error = %e, "scoring without device history");
                None
            }
        };
        let assessment = score_trust(
            &self.config.trust,
            &matched,
            ticket.location(),
            recent.as_deref(),
            now,
        );
        step(&mut cycle, DecisionCycleState::Scored);

        let candidate: Option<&IdentityId> = matched.candidate.as_ref();
        let decision = decide(&self.config.arbiter, assessment.trust, candidate);
        step(&mut cycle, DecisionCycleState::Decided);
        self.devices.record_outcome(&mac, RecentOutcome { at: now, decision });
        tracing::info!(
            decision = decision.as_str(),
            trust = assessment.trust.value(),
            base = assessment.base,
            consecutive_denials = assessment.consecutive_denials,
            distance = ?matched.distance(),
            identity_id = ?candidate.map(|c| c.as_str()),
            reason_code = decision_reason_code(decision, candidate).0,
            degraded = assessment.degraded,
            "access decided"
        );

        let actuation = match decision {
            AccessDecision::Allow => {
                let status = match unlock_command(
                    &self.config.arbiter,
                    cycle_id,
                    mac.clone(),
                    requester_ip.clone(),
                    self.clock.now(),
                ) {
                    Ok(command) => self.devices.actuate(&ticket, &command).await,
                    Err(v) => {
                        tracing::error!(error = %v, "could not build unlock command");
                        ActuationStatus::Failed
                    }
                };
                step(&mut cycle, DecisionCycleState::Actuated);
                status
            }
            AccessDecision::Deny => ActuationStatus::NotRequested,
        };
        let location = ticket.location().clone();
        ticket.release();

        let actuation_failure = match actuation {
            ActuationStatus::TimedOut => Some(AccessFailureKind::ActuationTimeout),
            ActuationStatus::Failed => Some(AccessFailureKind::ActuationFailed),
            _ => None,
        }
        .map(|kind| AccessFailure::new(kind, reason_code_for(kind), actuation.as_str()));

        let wall = self.clock.local_date_time();
        let flags = HistoryLogFlags {
            degraded: assessment.degraded,
            actuation_timeout: actuation == ActuationStatus::TimedOut,
            actuation_failed: actuation == ActuationStatus::Failed,
        };
        let log = history_log_text(
            decision,
            identity.as_ref().map(|i| i.alias.as_str()),
            &location,
            matched.distance(),
            assessment.trust,
            flags,
        );
        let input = HistoryRecordInput::v1(
            identity,
            Some(mac.clone()),
            Some(location),
            requester_ip.as_str().to_string(),
            assessment.trust.value(),
            wall.date(),
            wall.time(),
            log,
        );

        let appended = tokio::time::timeout(self.config.ledger_timeout(), self.ledger.append(input)).await;
        let history_row_id: Option<HistoryRowId> = match appended {
            Ok(Ok(LedgerAppendOutcome::Committed(row_id))) => {
                step(&mut cycle, DecisionCycleState::Logged);
                Some(row_id)
            }
            Ok(Ok(LedgerAppendOutcome::Rejected { reason, error })) => {
                self.fail_late(&mut cycle, &mac, AccessFailureKind::LedgerRejected, format!("{}: {error}", reason.as_str()));
                None
            }
            Ok(Err(e)) => {
                self.fail_late(&mut cycle, &mac, AccessFailureKind::LedgerUnavailable, e.to_string());
                None
            }
            Err(_) => {
                self.fail_late(&mut cycle, &mac, AccessFailureKind::LedgerUnavailable, "append timed out".to_string());
                None
            }
        };

        AccessDecisionResult {
            schema_version: ACCESS_CONTRACT_VERSION,
            cycle_id,
            device_mac: mac,
            decision,
            trust: assessment.trust,
            matched_identity: matched.candidate.clone(),
            distance: matched.distance(),
            final_state: cycle.state(),
            failure: cycle.failure().cloned().or(actuation_failure),
            actuation,
            degraded: assessment.degraded,
            history_row_id,
        }
    }

    /// Failure before any decision: deny, no actuation, no history row.
    fn fail_early(
        &self,
        cycle: &mut DecisionCycle,
        mac: DeviceMac,
        kind: AccessFailureKind,
        detail: String,
    ) -> AccessDecisionResult {
        let failure = self.fail_late(cycle, &mac, kind, detail);
        AccessDecisionResult {
            schema_version: ACCESS_CONTRACT_VERSION,
            cycle_id: cycle.cycle_id(),
            device_mac: mac,
            decision: AccessDecision::Deny,
            trust: TrustScore::ZERO,
            matched_identity: None,
            distance: None,
            final_state: cycle.state(),
            failure: Some(failure),
            actuation: ActuationStatus::NotRequested,
            degraded: false,
            history_row_id: None,
        }
    }

    fn fail_late(
        &self,
        cycle: &mut DecisionCycle,
        mac: &DeviceMac,
        kind: AccessFailureKind,
        detail: String,
    ) -> AccessFailure {
        let failure = cycle
            .fail(kind, detail.clone())
            .unwrap_or_else(|_| AccessFailure::new(kind, reason_code_for(kind), detail.clone()));
        if kind.raises_operational_alert() {
            self.alerts.publish(OperationalAlert {
                kind,
                cycle_id: Some(cycle.cycle_id()),
                device_mac: Some(mac.clone()),
                detail,
            });
        } else {
            tracing::info!(failure = kind.as_str(), detail = %detail, "access cycle failed");
        }
        failure
    }

    fn count(&self, result: &AccessDecisionResult) {
        let c = &self.counters;
        c.cycles.fetch_add(1, Ordering::Relaxed);
        if result.final_state == DecisionCycleState::Failed {
            c.failed.fetch_add(1, Ordering::Relaxed);
        }
        match result.decision {
            AccessDecision::Allow => c.allowed.fetch_add(1, Ordering::Relaxed),
            AccessDecision::Deny => c.denied.fetch_add(1, Ordering::Relaxed),
        };
        if result.actuation == ActuationStatus::TimedOut {
            c.actuation_timeouts.fetch_add(1, Ordering::Relaxed);
        }
        if matches!(
            result.failure.as_ref().map(|f| f.kind),
            Some(AccessFailureKind::LedgerRejected | AccessFailureKind::LedgerUnavailable)
        ) {
            c.ledger_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn step(cycle: &mut DecisionCycle, to: DecisionCycleState) {
    if let Err(v) = cycle.advance(to) {
        tracing::error!(from = cycle.state().as_str(), to = to.as_str(), error = %v, "illegal cycle transition");
    }
}
