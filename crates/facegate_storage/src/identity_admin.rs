#![forbid(unsafe_code)]

use rand::Rng;
use sha2::{Digest, Sha256};

use facegate_kernel_contracts::identity::{
    EmailAddress, FaceEncoding, IdentityId, IdentityRecord, NationalId, PasswordHash,
    PermissionLevel,
};
use facegate_kernel_contracts::ContractViolation;

use crate::access_store::{AccessStore, StorageError};

pub use facegate_kernel_contracts::identity::check_credential_invariant;

const IDENTITY_ID_MAX_ATTEMPTS: u32 = 32;

/// SHA-256 hex digest of a plaintext credential.
pub fn hash_credential(plain: &str) -> Result<PasswordHash, ContractViolation> {
    if plain.is_empty() {
        return Err(ContractViolation::InvalidValue {
            field: "identity.senha",
            reason: "credential must not be empty",
        });
    }
    let digest = Sha256::digest(plain.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    PasswordHash::new(hex)
}

/// Fresh 8-digit, zero-padded identity id not yet present in `store`.
pub fn generate_identity_id<R: Rng>(
    store: &AccessStore,
    rng: &mut R,
) -> Result<IdentityId, StorageError> {
    for _ in 0..IDENTITY_ID_MAX_ATTEMPTS {
        let n: u32 = rng.gen_range(0..100_000_000);
        let id = IdentityId::new(format!("{n:08}"))?;
        if !store.contains_identity(&id) {
            return Ok(id);
        }
    }
    Err(StorageError::DuplicateKey {
        table: "identity",
        key: "generated id space exhausted".to_string(),
    })
}

/// Enrollment input from the administrative collaborator. The credential is
/// plaintext here and hashed before it reaches the store.
#[derive(Debug, Clone)]
pub struct IdentityDraft {
    pub nome: String,
    pub alias: String,
    pub cpf: NationalId,
    pub email: EmailAddress,
    pub matricula: Option<String>,
    pub credential: Option<String>,
    pub icon_path: Option<String>,
    pub permission_level: PermissionLevel,
    pub encoding: FaceEncoding,
}

fn hash_optional(
    id: &IdentityId,
    level: PermissionLevel,
    credential: Option<&str>,
) -> Result<Option<PasswordHash>, StorageError> {
    let senha = credential.map(hash_credential).transpose()?;
    check_credential_invariant(level, senha.as_ref()).map_err(|v| match v {
        ContractViolation::InvalidValue { reason, .. } => StorageError::CredentialInvariant {
            identity_id: id.as_str().to_string(),
            reason,
        },
        other => StorageError::ContractViolation(other),
    })?;
    Ok(senha)
}

#[derive(Debug, Default)]
pub struct IdentityAdminRuntime;

impl IdentityAdminRuntime {
    pub fn enroll<R: Rng>(
        store: &mut AccessStore,
        draft: IdentityDraft,
        rng: &mut R,
    ) -> Result<IdentityId, StorageError> {
        let id = generate_identity_id(store, rng)?;
        let senha = hash_optional(&id, draft.permission_level, draft.credential.as_deref())?;
        let record = IdentityRecord::v1(
            id.clone(),
            draft.nome,
            draft.alias,
            draft.cpf,
            draft.email,
            draft.matricula,
            senha,
            draft.icon_path,
            draft.permission_level,
            draft.encoding,
        )?;
        store.insert_identity(record)?;
        Ok(id)
    }

    pub fn change_permission(
        store: &mut AccessStore,
        id: &IdentityId,
        permission_level: PermissionLevel,
        credential: Option<&str>,
    ) -> Result<(), StorageError> {
        let senha = hash_optional(id, permission_level, credential)?;
        store.set_identity_permission(id, permission_level, senha)
    }
}
