#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac, DeviceRecord};
use facegate_kernel_contracts::face_match::EnrolledFace;
use facegate_kernel_contracts::history::{HistoryRecord, HistoryRecordInput, HistoryRowId};
use facegate_kernel_contracts::identity::{
    check_credential_invariant, EmailAddress, FaceEncoding, IdentityId, IdentityRecord,
    NationalId, PasswordHash, PermissionLevel,
};
use facegate_kernel_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("foreign key violation on {table}: {key}")]
    ForeignKeyViolation { table: &'static str, key: String },
    #[error("duplicate key on {table}: {key}")]
    DuplicateKey { table: &'static str, key: String },
    #[error("{table} is append-only")]
    AppendOnlyViolation { table: &'static str },
    #[error("credential invariant violated for identity {identity_id}: {reason}")]
    CredentialInvariant {
        identity_id: String,
        reason: &'static str,
    },
    #[error("no row in {table} for {key}")]
    NotFound { table: &'static str, key: String },
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
}

fn credential_precondition(
    identity_id: &IdentityId,
    level: PermissionLevel,
    senha: Option<&PasswordHash>,
) -> Result<(), StorageError> {
    check_credential_invariant(level, senha).map_err(|v| match v {
        ContractViolation::InvalidValue { reason, .. } => StorageError::CredentialInvariant {
            identity_id: identity_id.as_str().to_string(),
            reason,
        },
        other => StorageError::ContractViolation(other),
    })
}

/// In-memory relational store for the identity, device and history tables.
///
/// Unique secondary keys (`cpf`, `email`, `local`) are kept as explicit indexes.
/// Referential actions on delete are not automatic here; the ledger applies them.
#[derive(Debug, Clone)]
pub struct AccessStore {
    identities: BTreeMap<IdentityId, IdentityRecord>,
    identity_by_cpf: BTreeMap<NationalId, IdentityId>,
    identity_by_email: BTreeMap<EmailAddress, IdentityId>,
    devices: BTreeMap<DeviceMac, DeviceRecord>,
    device_by_local: BTreeMap<DeviceLocation, DeviceMac>,
    history: Vec<HistoryRecord>,
    next_history_row_id: u64,
}

impl Default for AccessStore {
    fn default() -> Self {
        Self::new_in_memory()
    }
}

impl AccessStore {
    pub fn new_in_memory() -> Self {
        Self {
            identities: BTreeMap::new(),
            identity_by_cpf: BTreeMap::new(),
            identity_by_email: BTreeMap::new(),
            devices: BTreeMap::new(),
            device_by_local: BTreeMap::new(),
            history: Vec::new(),
            next_history_row_id: 1,
        }
    }

    pub fn insert_identity(&mut self, record: IdentityRecord) -> Result<(), StorageError> {
        credential_precondition(&record.id, record.permission_level, record.senha.as_ref())?;
        record.validate()?;
        if self.identities.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey {
                table: "identity",
                key: record.id.as_str().to_string(),
            });
        }
        if self.identity_by_cpf.contains_key(&record.cpf) {
            return Err(StorageError::DuplicateKey {
                table: "identity.cpf",
                key: record.cpf.as_str().to_string(),
            });
        }
        if self.identity_by_email.contains_key(&record.email) {
            return Err(StorageError::DuplicateKey {
                table: "identity.email",
                key: record.email.as_str().to_string(),
            });
        }
        self.identity_by_cpf
            .insert(record.cpf.clone(), record.id.clone());
        self.identity_by_email
            .insert(record.email.clone(), record.id.clone());
        self.identities.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn identity(&self, id: &IdentityId) -> Option<&IdentityRecord> {
        self.identities.get(id)
    }

    pub fn identity_by_email(&self, email: &EmailAddress) -> Option<&IdentityRecord> {
        self.identity_by_email
            .get(email)
            .and_then(|id| self.identities.get(id))
    }

    pub fn identities(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.identities.values()
    }

    pub fn contains_identity(&self, id: &IdentityId) -> bool {
        self.identities.contains_key(id)
    }

    pub fn update_identity_encoding(
        &mut self,
        id: &IdentityId,
        encoding: FaceEncoding,
    ) -> Result<(), StorageError> {
        encoding.validate()?;
        let record = self.identity_mut(id)?;
        record.encoding = encoding;
        Ok(())
    }

    /// Permission and credential change together so the invariant holds after every write.
    pub fn set_identity_permission(
        &mut self,
        id: &IdentityId,
        permission_level: PermissionLevel,
        senha: Option<PasswordHash>,
    ) -> Result<(), StorageError> {
        credential_precondition(id, permission_level, senha.as_ref())?;
        let record = self.identity_mut(id)?;
        record.permission_level = permission_level;
        record.senha = senha;
        Ok(())
    }

    fn identity_mut(&mut self, id: &IdentityId) -> Result<&mut IdentityRecord, StorageError> {
        self.identities
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "identity",
                key: id.as_str().to_string(),
            })
    }

    pub(crate) fn remove_identity_row(
        &mut self,
        id: &IdentityId,
    ) -> Result<IdentityRecord, StorageError> {
        let record = self
            .identities
            .remove(id)
            .ok_or_else(|| StorageError::NotFound {
                table: "identity",
                key: id.as_str().to_string(),
            })?;
        self.identity_by_cpf.remove(&record.cpf);
        self.identity_by_email.remove(&record.email);
        Ok(record)
    }

    /// Registry view for the encoding store, ordered by identity id.
    pub fn enrolled_faces(&self) -> Vec<EnrolledFace> {
        self.identities
            .values()
            .map(|r| EnrolledFace {
                identity_id: r.id.clone(),
                encoding: r.encoding.clone(),
                permission_level: r.permission_level,
            })
            .collect()
    }

    pub fn insert_device(&mut self, record: DeviceRecord) -> Result<(), StorageError> {
        record.validate()?;
        if self.devices.contains_key(&record.mac) {
            return Err(StorageError::DuplicateKey {
                table: "device",
                key: record.mac.as_str().to_string(),
            });
        }
        if self.device_by_local.contains_key(&record.local) {
            return Err(StorageError::DuplicateKey {
                table: "device.local",
                key: record.local.as_str().to_string(),
            });
        }
        self.device_by_local
            .insert(record.local.clone(), record.mac.clone());
        self.devices.insert(record.mac.clone(), record);
        Ok(())
    }

    pub fn device(&self, mac: &DeviceMac) -> Option<&DeviceRecord> {
        self.devices.get(mac)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.values()
    }

    pub(crate) fn remove_device_row(&mut self, mac: &DeviceMac) -> Result<DeviceRecord, StorageError> {
        let record = self
            .devices
            .remove(mac)
            .ok_or_else(|| StorageError::NotFound {
                table: "device",
                key: mac.as_str().to_string(),
            })?;
        self.device_by_local.remove(&record.local);
        Ok(record)
    }

    /// Validates and checks references before touching the table, so a
    /// rejected row leaves no trace.
    pub(crate) fn append_history(
        &mut self,
        input: HistoryRecordInput,
    ) -> Result<HistoryRowId, StorageError> {
        input.validate()?;

        if let Some(identity) = &input.identity {
            let Some(existing) = self.identities.get(&identity.id) else {
                return Err(StorageError::ForeignKeyViolation {
                    table: "history.id",
                    key: identity.id.as_str().to_string(),
                });
            };
            if existing.email != identity.email {
                return Err(StorageError::ForeignKeyViolation {
                    table: "history.email",
                    key: identity.email.as_str().to_string(),
                });
            }
        }
        if let Some(mac) = &input.mac {
            let Some(device) = self.devices.get(mac) else {
                return Err(StorageError::ForeignKeyViolation {
                    table: "history.mac",
                    key: mac.as_str().to_string(),
                });
            };
            if let Some(local) = &input.local {
                if device.local != *local {
                    return Err(StorageError::ForeignKeyViolation {
                        table: "history.local",
                        key: local.as_str().to_string(),
                    });
                }
            }
        } else if let Some(local) = &input.local {
            if !self.device_by_local.contains_key(local) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "history.local",
                    key: local.as_str().to_string(),
                });
            }
        }

        let row_id = HistoryRowId(self.next_history_row_id);
        let record = HistoryRecord::from_input(row_id, input)?;
        self.next_history_row_id = self.next_history_row_id.saturating_add(1);
        self.history.push(record);
        Ok(row_id)
    }

    pub fn attempt_overwrite_history_row(
        &mut self,
        _row_id: HistoryRowId,
    ) -> Result<(), StorageError> {
        Err(StorageError::AppendOnlyViolation { table: "history" })
    }

    pub(crate) fn purge_history_for_identity(&mut self, id: &IdentityId) -> usize {
        let before = self.history.len();
        self.history.retain(|r| r.identity_id() != Some(id));
        before - self.history.len()
    }

    pub(crate) fn null_history_device_refs(&mut self, device: &DeviceRecord) -> usize {
        let mut nulled = 0;
        for row in self.history.iter_mut() {
            let mut touched = false;
            if row.mac.as_ref() == Some(&device.mac) {
                row.mac = None;
                touched = true;
            }
            if row.local.as_ref() == Some(&device.local) {
                row.local = None;
                touched = true;
            }
            if touched {
                nulled += 1;
            }
        }
        nulled
    }

    pub fn history_rows(&self) -> &[HistoryRecord] {
        &self.history
    }

    pub fn history_for_identity(&self, id: &IdentityId) -> Vec<&HistoryRecord> {
        self.history
            .iter()
            .filter(|r| r.identity_id() == Some(id))
            .collect()
    }

    pub fn history_for_device(&self, mac: &DeviceMac) -> Vec<&HistoryRecord> {
        self.history
            .iter()
            .filter(|r| r.mac.as_ref() == Some(mac))
            .collect()
    }
}
