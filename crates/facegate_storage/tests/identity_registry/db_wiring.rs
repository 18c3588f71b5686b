#![forbid(unsafe_code)]

use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac, DeviceRecord};
use facegate_kernel_contracts::identity::{
    EmailAddress, FaceEncoding, IdentityId, IdentityRecord, NationalId, PermissionLevel,
    FACE_ENCODING_DIM,
};
use facegate_storage::access_store::{AccessStore, StorageError};
use facegate_storage::identity_admin::{hash_credential, IdentityAdminRuntime};
use facegate_storage::repo::{DeviceRegistryRepo, IdentityRegistryRepo};

fn encoding(v: f64) -> FaceEncoding {
    FaceEncoding::v1(vec![v; FACE_ENCODING_DIM]).unwrap()
}

fn identity(id: &str, cpf: &str, email: &str, level: PermissionLevel) -> IdentityRecord {
    let senha = (level == PermissionLevel::Administrador).then(|| hash_credential("admin").unwrap());
    IdentityRecord::v1(
        IdentityId::new(id).unwrap(),
        "Elisa Prado".to_string(),
        "elisa".to_string(),
        NationalId::new(cpf).unwrap(),
        EmailAddress::new(email).unwrap(),
        None,
        senha,
        Some("/icons/elisa.png".to_string()),
        level,
        encoding(0.3),
    )
    .unwrap()
}

#[test]
fn at_registry_db_01_unique_keys_enforced() {
    let mut s = AccessStore::new_in_memory();
    s.insert_identity_row(identity("00000010", "200.000.000-01", "elisa@campus.edu.br", PermissionLevel::Docente))
        .unwrap();

    let dup_id = identity("00000010", "200.000.000-02", "x@campus.edu.br", PermissionLevel::Docente);
    assert!(matches!(
        s.insert_identity_row(dup_id),
        Err(StorageError::DuplicateKey { table: "identity", .. })
    ));
    let dup_cpf = identity("00000011", "200.000.000-01", "y@campus.edu.br", PermissionLevel::Docente);
    assert!(matches!(
        s.insert_identity_row(dup_cpf),
        Err(StorageError::DuplicateKey { table: "identity.cpf", .. })
    ));
    let dup_email =
        identity("00000012", "200.000.000-03", "elisa@campus.edu.br", PermissionLevel::Docente);
    assert!(matches!(
        s.insert_identity_row(dup_email),
        Err(StorageError::DuplicateKey { table: "identity.email", .. })
    ));
}

#[test]
fn at_registry_db_02_device_mac_and_location_are_unique() {
    let mut s = AccessStore::new_in_memory();
    let mac = DeviceMac::new("cc:00:00:00:00:01").unwrap();
    s.insert_device_row(DeviceRecord::v1(mac.clone(), DeviceLocation::new("Portaria").unwrap()).unwrap())
        .unwrap();
    assert!(matches!(
        s.insert_device_row(
            DeviceRecord::v1(mac.clone(), DeviceLocation::new("Laboratorio").unwrap()).unwrap()
        ),
        Err(StorageError::DuplicateKey { table: "device", .. })
    ));
    assert!(matches!(
        s.insert_device_row(
            DeviceRecord::v1(
                DeviceMac::new("cc:00:00:00:00:02").unwrap(),
                DeviceLocation::new("Portaria").unwrap()
            )
            .unwrap()
        ),
        Err(StorageError::DuplicateKey { table: "device.local", .. })
    ));
    assert_eq!(s.device_rows().len(), 1);
    assert!(s.get_device_row(&mac).is_some());
}

#[test]
fn at_registry_db_03_permission_change_keeps_credential_invariant() {
    let mut s = AccessStore::new_in_memory();
    let id = IdentityId::new("00000020").unwrap();
    s.insert_identity_row(identity("00000020", "300.000.000-01", "f@campus.edu.br", PermissionLevel::Discente))
        .unwrap();

    // promoting without a credential is refused before any write
    let err = IdentityAdminRuntime::change_permission(&mut s, &id, PermissionLevel::Administrador, None)
        .unwrap_err();
    assert!(matches!(err, StorageError::CredentialInvariant { .. }));
    assert_eq!(s.get_identity_row(&id).unwrap().permission_level, PermissionLevel::Discente);

    IdentityAdminRuntime::change_permission(&mut s, &id, PermissionLevel::Administrador, Some("pw"))
        .unwrap();
    let row = s.get_identity_row(&id).unwrap();
    assert_eq!(row.permission_level, PermissionLevel::Administrador);
    assert_eq!(row.senha, Some(hash_credential("pw").unwrap()));

    // demoting while keeping the credential is refused
    let keep = s.get_identity_row(&id).unwrap().senha.clone();
    assert!(matches!(
        s.set_identity_permission_row(&id, PermissionLevel::Docente, keep),
        Err(StorageError::CredentialInvariant { .. })
    ));

    s.set_identity_permission_row(&id, PermissionLevel::Docente, None)
        .unwrap();
    assert_eq!(s.get_identity_row(&id).unwrap().senha, None);
}

#[test]
fn at_registry_db_04_admin_without_credential_cannot_be_inserted() {
    let mut s = AccessStore::new_in_memory();
    let mut record =
        identity("00000030", "400.000.000-01", "g@campus.edu.br", PermissionLevel::Administrador);
    record.senha = None;
    assert!(matches!(
        s.insert_identity_row(record),
        Err(StorageError::CredentialInvariant { .. })
    ));
    assert_eq!(s.enrolled_face_rows().len(), 0);
}

#[test]
fn at_registry_db_05_encoding_update_visible_in_enrolled_faces() {
    let mut s = AccessStore::new_in_memory();
    let id = IdentityId::new("00000040").unwrap();
    s.insert_identity_row(identity("00000040", "500.000.000-01", "h@campus.edu.br", PermissionLevel::Docente))
        .unwrap();
    s.update_identity_encoding_row(&id, encoding(0.9)).unwrap();
    let faces = s.enrolled_face_rows();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].encoding, encoding(0.9));
    assert_eq!(faces[0].permission_level, PermissionLevel::Docente);

    assert!(matches!(
        s.update_identity_encoding_row(&IdentityId::new("00000041").unwrap(), encoding(0.1)),
        Err(StorageError::NotFound { .. })
    ));
}
