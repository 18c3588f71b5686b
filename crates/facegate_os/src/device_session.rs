#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use facegate_engines::trust::RecentOutcome;
use facegate_kernel_contracts::access::{ActuationCommand, ActuationStatus, CycleId};
use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac, DeviceRecord};
use facegate_kernel_contracts::MonotonicTimeNs;

use crate::config::DeviceSessionConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceChannelError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("device rejected command: {0}")]
    Rejected(String),
    #[error("device did not answer in time: {0}")]
    TimedOut(String),
}

/// Outbound path to a physical lock controller.
#[async_trait]
pub trait DeviceChannel: Send + Sync {
    fn name(&self) -> &'static str;
    async fn actuate(&self, command: &ActuationCommand) -> Result<(), DeviceChannelError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceSessionError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceMac),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("device history unavailable: {0}")]
pub struct HistoryUnavailable(pub String);

/// Recent decisions per device, most recent first.
pub trait OutcomeHistorySource: Send + Sync {
    fn recent_outcomes(&self, mac: &DeviceMac) -> Result<Vec<RecentOutcome>, HistoryUnavailable>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLiveness {
    pub mac: DeviceMac,
    pub local: DeviceLocation,
    pub last_seen: Option<MonotonicTimeNs>,
    pub last_actuation: Option<ActuationStatus>,
    pub alive: bool,
}

#[derive(Debug)]
struct SlotState {
    record: DeviceRecord,
    next_ticket: u64,
    completed: BTreeSet<u64>,
    recent: VecDeque<RecentOutcome>,
    last_seen: Option<MonotonicTimeNs>,
    last_actuation: Option<ActuationStatus>,
}

#[derive(Debug)]
struct DeviceSlot {
    state: Mutex<SlotState>,
    serving: watch::Sender<u64>,
}

impl DeviceSlot {
    fn new(record: DeviceRecord) -> Self {
        let (serving, _) = watch::channel(0);
        Self {
            state: Mutex::new(SlotState {
                record,
                next_ticket: 0,
                completed: BTreeSet::new(),
                recent: VecDeque::new(),
                last_seen: None,
                last_actuation: None,
            }),
            serving,
        }
    }

    fn complete(&self, seq: u64) {
        let mut state = self.state.lock();
        state.completed.insert(seq);
        let mut next = *self.serving.borrow();
        while state.completed.remove(&next) {
            next += 1;
        }
        self.serving.send_replace(next);
    }
}

/// Place of one decision cycle in its device's actuation order. Taken when
/// the cycle starts; dropping it lets the next cycle of the device proceed.
#[derive(Debug)]
pub struct CycleTicket {
    cycle_id: CycleId,
    mac: DeviceMac,
    seq: u64,
    location: DeviceLocation,
    slot: Arc<DeviceSlot>,
}

impl CycleTicket {
    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    pub fn device_mac(&self) -> &DeviceMac {
        &self.mac
    }

    pub fn location(&self) -> &DeviceLocation {
        &self.location
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn release(self) {}
}

impl Drop for CycleTicket {
    fn drop(&mut self) {
        self.slot.complete(self.seq);
    }
}

/// One session slot per known device, keyed by MAC.
///
/// Slots of different devices share nothing but the map lock, which is only
/// held to look a slot up. Actuation within a slot runs in ticket order.
pub struct DeviceSessionManager {
    config: DeviceSessionConfig,
    channel: Arc<dyn DeviceChannel>,
    slots: RwLock<BTreeMap<DeviceMac, Arc<DeviceSlot>>>,
}

impl DeviceSessionManager {
    pub fn new(config: DeviceSessionConfig, channel: Arc<dyn DeviceChannel>) -> Self {
        Self {
            config,
            channel,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    pub fn register_device(&self, record: DeviceRecord) {
        let mut slots = self.slots.write();
        match slots.get(&record.mac) {
            Some(slot) => slot.state.lock().record = record,
            None => {
                tracing::info!(device_mac = %record.mac, local = record.local.as_str(), "device registered");
                slots.insert(record.mac.clone(), Arc::new(DeviceSlot::new(record)));
            }
        }
    }

    /// Aligns slots with the device table: adds new devices, updates
    /// locations, drops devices no longer provisioned.
    pub fn sync_devices(&self, records: Vec<DeviceRecord>) {
        let wanted: BTreeSet<DeviceMac> = records.iter().map(|r| r.mac.clone()).collect();
        {
            let mut slots = self.slots.write();
            let gone: Vec<DeviceMac> = slots
                .keys()
                .filter(|mac| !wanted.contains(*mac))
                .cloned()
                .collect();
            for mac in gone {
                slots.remove(&mac);
                tracing::info!(device_mac = %mac, "device removed from sessions");
            }
        }
        for record in records {
            self.register_device(record);
        }
    }

    pub fn remove_device(&self, mac: &DeviceMac) -> bool {
        self.slots.write().remove(mac).is_some()
    }

    pub fn is_known(&self, mac: &DeviceMac) -> bool {
        self.slots.read().contains_key(mac)
    }

    pub fn device_count(&self) -> usize {
        self.slots.read().len()
    }

    fn slot(&self, mac: &DeviceMac) -> Result<Arc<DeviceSlot>, DeviceSessionError> {
        self.slots
            .read()
            .get(mac)
            .cloned()
            .ok_or_else(|| DeviceSessionError::UnknownDevice(mac.clone()))
    }

    /// Takes the device's next ticket. `allocate` runs under the slot lock, so
    /// cycle ids and ticket order agree for every device.
    pub fn begin_cycle(
        &self,
        mac: &DeviceMac,
        now: MonotonicTimeNs,
        allocate: impl FnOnce() -> CycleId,
    ) -> Result<CycleTicket, DeviceSessionError> {
        let slot = self.slot(mac)?;
        let (cycle_id, seq, location) = {
            let mut state = slot.state.lock();
            let cycle_id = allocate();
            let seq = state.next_ticket;
            state.next_ticket += 1;
            state.last_seen = Some(now);
            (cycle_id, seq, state.record.local.clone())
        };
        Ok(CycleTicket {
            cycle_id,
            mac: mac.clone(),
            seq,
            location,
            slot,
        })
    }

    /// Waits for earlier cycles of the same device, then sends the command
    /// once, bounded by the actuation timeout. Never retries.
    pub async fn actuate(&self, ticket: &CycleTicket, command: &ActuationCommand) -> ActuationStatus {
        let mut rx = ticket.slot.serving.subscribe();
        // The watch guard must not live across the send below.
        let turn = tokio::time::timeout(
            self.config.turn_wait_timeout(),
            rx.wait_for(|serving| *serving >= ticket.seq),
        )
        .await
        .map(|r| r.is_ok());
        let status = match turn {
            Ok(true) => self.send_once(command).await,
            Ok(false) => ActuationStatus::Failed,
            Err(_) => {
                tracing::warn!(
                    device_mac = %ticket.mac,
                    cycle_id = %ticket.cycle_id,
                    "gave up waiting for earlier actuation on device"
                );
                ActuationStatus::TimedOut
            }
        };
        ticket.slot.state.lock().last_actuation = Some(status);
        status
    }

    async fn send_once(&self, command: &ActuationCommand) -> ActuationStatus {
        let timeout = self.config.actuation_timeout();
        match tokio::time::timeout(timeout, self.channel.actuate(command)).await {
            Ok(Ok(())) => {
                tracing::info!(
                    device_mac = %command.device_mac,
                    cycle_id = %command.cycle_id,
                    validity_window_ms = command.validity_window_ms,
                    "unlock acknowledged"
                );
                ActuationStatus::Acknowledged
            }
            Ok(Err(e @ DeviceChannelError::TimedOut(_))) => {
                tracing::warn!(device_mac = %command.device_mac, error = %e, "unlock not acknowledged in time");
                ActuationStatus::TimedOut
            }
            Ok(Err(e)) => {
                tracing::warn!(device_mac = %command.device_mac, error = %e, "unlock failed");
                ActuationStatus::Failed
            }
            Err(_) => {
                tracing::warn!(
                    device_mac = %command.device_mac,
                    timeout_ms = timeout.as_millis() as u64,
                    "unlock not acknowledged in time"
                );
                ActuationStatus::TimedOut
            }
        }
    }

    pub fn record_outcome(&self, mac: &DeviceMac, outcome: RecentOutcome) {
        let Ok(slot) = self.slot(mac) else {
            return;
        };
        let mut state = slot.state.lock();
        state.recent.push_front(outcome);
        state.recent.truncate(self.config.recent_outcome_depth);
    }

    pub fn heartbeat(&self, mac: &DeviceMac, now: MonotonicTimeNs) -> Result<(), DeviceSessionError> {
        let slot = self.slot(mac)?;
        slot.state.lock().last_seen = Some(now);
        Ok(())
    }

    pub fn liveness(&self, now: MonotonicTimeNs) -> Vec<DeviceLiveness> {
        let window_ns = Duration::from_millis(self.config.liveness_window_ms).as_nanos() as u64;
        self.slots
            .read()
            .iter()
            .map(|(mac, slot)| {
                let state = slot.state.lock();
                DeviceLiveness {
                    mac: mac.clone(),
                    local: state.record.local.clone(),
                    last_seen: state.last_seen,
                    last_actuation: state.last_actuation,
                    alive: state
                        .last_seen
                        .map(|t| now.saturating_elapsed_since(t) <= window_ns)
                        .unwrap_or(false),
                }
            })
            .collect()
    }
}

impl OutcomeHistorySource for DeviceSessionManager {
    fn recent_outcomes(&self, mac: &DeviceMac) -> Result<Vec<RecentOutcome>, HistoryUnavailable> {
        let slot = self
            .slot(mac)
            .map_err(|e| HistoryUnavailable(e.to_string()))?;
        let state = slot.state.lock();
        Ok(state.recent.iter().copied().collect())
    }
}

/// In-process channel that acknowledges after an optional per-device delay
/// and records every command it accepted, in arrival order.
#[derive(Debug, Default)]
pub struct LoopbackDeviceChannel {
    delays: Mutex<BTreeMap<DeviceMac, Duration>>,
    failing: Mutex<BTreeSet<DeviceMac>>,
    accepted: Mutex<Vec<ActuationCommand>>,
}

impl LoopbackDeviceChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_delay(&self, mac: &DeviceMac, delay: Duration) {
        self.delays.lock().insert(mac.clone(), delay);
    }

    pub fn set_failing(&self, mac: &DeviceMac) {
        self.failing.lock().insert(mac.clone());
    }

    pub fn accepted(&self) -> Vec<ActuationCommand> {
        self.accepted.lock().clone()
    }
}

#[async_trait]
impl DeviceChannel for LoopbackDeviceChannel {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn actuate(&self, command: &ActuationCommand) -> Result<(), DeviceChannelError> {
        let delay = self.delays.lock().get(&command.device_mac).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().contains(&command.device_mac) {
            return Err(DeviceChannelError::Rejected("loopback failure".to_string()));
        }
        self.accepted.lock().push(command.clone());
        Ok(())
    }
}
