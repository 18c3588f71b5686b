#![forbid(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use facegate_kernel_contracts::device::DeviceRecord;
use facegate_kernel_contracts::face_match::EnrolledFace;
use facegate_kernel_contracts::history::IdentitySnapshot;
use facegate_kernel_contracts::identity::IdentityId;
use facegate_storage::access_store::AccessStore;
use facegate_storage::repo::{DeviceRegistryRepo, IdentityRegistryRepo};

pub type SharedAccessStore = Arc<Mutex<AccessStore>>;

pub fn shared_store(store: AccessStore) -> SharedAccessStore {
    Arc::new(Mutex::new(store))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("registry source unavailable: {0}")]
pub struct RegistryUnavailable(pub String);

/// Read side of the identity and device tables, as the engine needs it.
pub trait RegistrySource: Send + Sync {
    fn enrolled_faces(&self) -> Result<Vec<EnrolledFace>, RegistryUnavailable>;
    fn devices(&self) -> Result<Vec<DeviceRecord>, RegistryUnavailable>;
    fn identity_snapshot(
        &self,
        id: &IdentityId,
    ) -> Result<Option<IdentitySnapshot>, RegistryUnavailable>;
}

impl RegistrySource for Mutex<AccessStore> {
    fn enrolled_faces(&self) -> Result<Vec<EnrolledFace>, RegistryUnavailable> {
        Ok(self.lock().enrolled_face_rows())
    }

    fn devices(&self) -> Result<Vec<DeviceRecord>, RegistryUnavailable> {
        Ok(self.lock().device_rows())
    }

    fn identity_snapshot(
        &self,
        id: &IdentityId,
    ) -> Result<Option<IdentitySnapshot>, RegistryUnavailable> {
        Ok(self
            .lock()
            .get_identity_row(id)
            .map(IdentitySnapshot::from_record))
    }
}
