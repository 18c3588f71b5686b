#![forbid(unsafe_code)]

use facegate_kernel_contracts::device::{DeviceMac, DeviceRecord};
use facegate_kernel_contracts::face_match::EnrolledFace;
use facegate_kernel_contracts::history::{HistoryRecord, HistoryRecordInput, HistoryRowId};
use facegate_kernel_contracts::identity::{
    FaceEncoding, IdentityId, IdentityRecord, PasswordHash, PermissionLevel,
};

use crate::access_store::{AccessStore, StorageError};
use crate::ledger::{DevicePurge, HistoryLedgerRuntime, IdentityPurge, LedgerAppendOutcome};

/// Typed repository interface for the identity table.
pub trait IdentityRegistryRepo {
    fn insert_identity_row(&mut self, record: IdentityRecord) -> Result<(), StorageError>;
    fn get_identity_row(&self, id: &IdentityId) -> Option<&IdentityRecord>;
    fn update_identity_encoding_row(
        &mut self,
        id: &IdentityId,
        encoding: FaceEncoding,
    ) -> Result<(), StorageError>;
    fn set_identity_permission_row(
        &mut self,
        id: &IdentityId,
        permission_level: PermissionLevel,
        senha: Option<PasswordHash>,
    ) -> Result<(), StorageError>;
    fn enrolled_face_rows(&self) -> Vec<EnrolledFace>;
}

/// Typed repository interface for the device table.
pub trait DeviceRegistryRepo {
    fn insert_device_row(&mut self, record: DeviceRecord) -> Result<(), StorageError>;
    fn get_device_row(&self, mac: &DeviceMac) -> Option<&DeviceRecord>;
    fn device_rows(&self) -> Vec<DeviceRecord>;
}

/// Typed repository interface for append-only history persistence and the
/// referential delete policies that touch it.
pub trait HistoryLedgerRepo {
    fn append_history_row(&mut self, input: HistoryRecordInput) -> LedgerAppendOutcome;
    fn delete_identity_cascade(&mut self, id: &IdentityId) -> Result<IdentityPurge, StorageError>;
    fn delete_device_set_null(&mut self, mac: &DeviceMac) -> Result<DevicePurge, StorageError>;
    fn history_rows(&self) -> &[HistoryRecord];
    fn history_rows_for_identity(&self, id: &IdentityId) -> Vec<&HistoryRecord>;
    fn history_rows_for_device(&self, mac: &DeviceMac) -> Vec<&HistoryRecord>;
    fn attempt_overwrite_history(&mut self, row_id: HistoryRowId) -> Result<(), StorageError>;
}

impl IdentityRegistryRepo for AccessStore {
    fn insert_identity_row(&mut self, record: IdentityRecord) -> Result<(), StorageError> {
        self.insert_identity(record)
    }

    fn get_identity_row(&self, id: &IdentityId) -> Option<&IdentityRecord> {
        self.identity(id)
    }

    fn update_identity_encoding_row(
        &mut self,
        id: &IdentityId,
        encoding: FaceEncoding,
    ) -> Result<(), StorageError> {
        self.update_identity_encoding(id, encoding)
    }

    fn set_identity_permission_row(
        &mut self,
        id: &IdentityId,
        permission_level: PermissionLevel,
        senha: Option<PasswordHash>,
    ) -> Result<(), StorageError> {
        self.set_identity_permission(id, permission_level, senha)
    }

    fn enrolled_face_rows(&self) -> Vec<EnrolledFace> {
        self.enrolled_faces()
    }
}

impl DeviceRegistryRepo for AccessStore {
    fn insert_device_row(&mut self, record: DeviceRecord) -> Result<(), StorageError> {
        self.insert_device(record)
    }

    fn get_device_row(&self, mac: &DeviceMac) -> Option<&DeviceRecord> {
        self.device(mac)
    }

    fn device_rows(&self) -> Vec<DeviceRecord> {
        self.devices().cloned().collect()
    }
}

impl HistoryLedgerRepo for AccessStore {
    fn append_history_row(&mut self, input: HistoryRecordInput) -> LedgerAppendOutcome {
        HistoryLedgerRuntime::append(self, input)
    }

    fn delete_identity_cascade(&mut self, id: &IdentityId) -> Result<IdentityPurge, StorageError> {
        HistoryLedgerRuntime::delete_identity(self, id)
    }

    fn delete_device_set_null(&mut self, mac: &DeviceMac) -> Result<DevicePurge, StorageError> {
        HistoryLedgerRuntime::delete_device(self, mac)
    }

    fn history_rows(&self) -> &[HistoryRecord] {
        AccessStore::history_rows(self)
    }

    fn history_rows_for_identity(&self, id: &IdentityId) -> Vec<&HistoryRecord> {
        self.history_for_identity(id)
    }

    fn history_rows_for_device(&self, mac: &DeviceMac) -> Vec<&HistoryRecord> {
        self.history_for_device(mac)
    }

    fn attempt_overwrite_history(&mut self, row_id: HistoryRowId) -> Result<(), StorageError> {
        self.attempt_overwrite_history_row(row_id)
    }
}
