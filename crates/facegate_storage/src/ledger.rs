#![forbid(unsafe_code)]

use facegate_kernel_contracts::device::DeviceMac;
use facegate_kernel_contracts::history::{
    HistoryRecordInput, HistoryRowId, RequesterIp, TrustScore,
};
use facegate_kernel_contracts::identity::IdentityId;

use crate::access_store::{AccessStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRejectReason {
    TrustOutOfRange,
    InvalidIp,
    UnknownIdentity,
    UnknownDevice,
    MalformedRecord,
}

impl LedgerRejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerRejectReason::TrustOutOfRange => "trust_out_of_range",
            LedgerRejectReason::InvalidIp => "invalid_ip",
            LedgerRejectReason::UnknownIdentity => "unknown_identity",
            LedgerRejectReason::UnknownDevice => "unknown_device",
            LedgerRejectReason::MalformedRecord => "malformed_record",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerAppendOutcome {
    Committed(HistoryRowId),
    Rejected {
        reason: LedgerRejectReason,
        error: StorageError,
    },
}

impl LedgerAppendOutcome {
    pub fn row_id(&self) -> Option<HistoryRowId> {
        match self {
            LedgerAppendOutcome::Committed(id) => Some(*id),
            LedgerAppendOutcome::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityPurge {
    pub history_rows_deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DevicePurge {
    pub history_rows_nulled: usize,
}

/// History ledger runtime over the access store.
///
/// Appends are the only write path for history rows. The two referential
/// delete policies live here: identity removal cascades, device removal
/// nulls `mac`/`local` and keeps the rows.
#[derive(Debug, Default)]
pub struct HistoryLedgerRuntime;

impl HistoryLedgerRuntime {
    pub fn append(store: &mut AccessStore, input: HistoryRecordInput) -> LedgerAppendOutcome {
        if let Err(v) = TrustScore::new(input.trust) {
            return LedgerAppendOutcome::Rejected {
                reason: LedgerRejectReason::TrustOutOfRange,
                error: v.into(),
            };
        }
        if let Err(v) = RequesterIp::new(input.ip.clone()) {
            return LedgerAppendOutcome::Rejected {
                reason: LedgerRejectReason::InvalidIp,
                error: v.into(),
            };
        }
        match store.append_history(input) {
            Ok(row_id) => LedgerAppendOutcome::Committed(row_id),
            Err(error) => {
                let reason = match &error {
                    StorageError::ForeignKeyViolation { table, .. }
                        if table.starts_with("history.id") || table.starts_with("history.email") =>
                    {
                        LedgerRejectReason::UnknownIdentity
                    }
                    StorageError::ForeignKeyViolation { .. } => LedgerRejectReason::UnknownDevice,
                    _ => LedgerRejectReason::MalformedRecord,
                };
                LedgerAppendOutcome::Rejected { reason, error }
            }
        }
    }

    pub fn delete_identity(
        store: &mut AccessStore,
        id: &IdentityId,
    ) -> Result<IdentityPurge, StorageError> {
        store.remove_identity_row(id)?;
        let history_rows_deleted = store.purge_history_for_identity(id);
        Ok(IdentityPurge {
            history_rows_deleted,
        })
    }

    pub fn delete_device(
        store: &mut AccessStore,
        mac: &DeviceMac,
    ) -> Result<DevicePurge, StorageError> {
        let device = store.remove_device_row(mac)?;
        let history_rows_nulled = store.null_history_device_refs(&device);
        Ok(DevicePurge {
            history_rows_nulled,
        })
    }
}
