#![forbid(unsafe_code)]

use tokio::sync::broadcast;

use facegate_kernel_contracts::access::{AccessFailureKind, CycleId};
use facegate_kernel_contracts::device::DeviceMac;

pub const OPS_LOG_TARGET: &str = "facegate::ops";

/// Operational fault raised by a decision cycle or the registry worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationalAlert {
    pub kind: AccessFailureKind,
    pub cycle_id: Option<CycleId>,
    pub device_mac: Option<DeviceMac>,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct AlertPublisher {
    tx: broadcast::Sender<OperationalAlert>,
}

impl AlertPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationalAlert> {
        self.tx.subscribe()
    }

    pub fn publish(&self, alert: OperationalAlert) {
        tracing::error!(
            target: OPS_LOG_TARGET,
            kind = alert.kind.as_str(),
            cycle_id = ?alert.cycle_id.map(|c| c.0),
            device_mac = ?alert.device_mac.as_ref().map(|m| m.as_str()),
            detail = %alert.detail,
            "operational alert"
        );
        // No subscribers is fine; the log line above is the durable record.
        let _ = self.tx.send(alert);
    }
}
