#![forbid(unsafe_code)]

use chrono::{NaiveDate, NaiveTime};
use facegate_kernel_contracts::device::{DeviceLocation, DeviceMac, DeviceRecord};
use facegate_kernel_contracts::history::{HistoryRecordInput, IdentitySnapshot, HistoryRowId};
use facegate_kernel_contracts::identity::{
    EmailAddress, FaceEncoding, IdentityId, IdentityRecord, NationalId, PermissionLevel,
    FACE_ENCODING_DIM,
};
use facegate_storage::access_store::{AccessStore, StorageError};
use facegate_storage::ledger::{LedgerAppendOutcome, LedgerRejectReason};
use facegate_storage::repo::{DeviceRegistryRepo, HistoryLedgerRepo, IdentityRegistryRepo};

fn identity(id: &str, cpf: &str, email: &str) -> IdentityRecord {
    IdentityRecord::v1(
        IdentityId::new(id).unwrap(),
        "Carla Dias".to_string(),
        "carla".to_string(),
        NationalId::new(cpf).unwrap(),
        EmailAddress::new(email).unwrap(),
        Some("2021042".to_string()),
        None,
        None,
        PermissionLevel::Discente,
        FaceEncoding::v1(vec![0.2; FACE_ENCODING_DIM]).unwrap(),
    )
    .unwrap()
}

fn mac(s: &str) -> DeviceMac {
    DeviceMac::new(s).unwrap()
}

fn local(s: &str) -> DeviceLocation {
    DeviceLocation::new(s).unwrap()
}

fn seeded_store() -> AccessStore {
    let mut s = AccessStore::new_in_memory();
    s.insert_identity_row(identity("00000001", "100.000.000-01", "carla@campus.edu.br"))
        .unwrap();
    s.insert_identity_row(identity("00000002", "100.000.000-02", "davi@campus.edu.br"))
        .unwrap();
    s.insert_device_row(DeviceRecord::v1(mac("aa:00:00:00:00:01"), local("Bloco A")).unwrap())
        .unwrap();
    s.insert_device_row(DeviceRecord::v1(mac("aa:00:00:00:00:02"), local("Biblioteca")).unwrap())
        .unwrap();
    s
}

fn snapshot_of(store: &AccessStore, id: &str) -> IdentitySnapshot {
    IdentitySnapshot::from_record(store.get_identity_row(&IdentityId::new(id).unwrap()).unwrap())
}

fn row(
    identity: Option<IdentitySnapshot>,
    device: Option<(&str, &str)>,
    ip: &str,
    trust: u8,
) -> HistoryRecordInput {
    HistoryRecordInput::v1(
        identity,
        device.map(|(m, _)| mac(m)),
        device.map(|(_, l)| local(l)),
        ip.to_string(),
        trust,
        NaiveDate::from_ymd_opt(2026, 5, 4).unwrap(),
        NaiveTime::from_hms_opt(9, 30, 12).unwrap(),
        "Usuario carla entrou em Bloco A !".to_string(),
    )
}

#[test]
fn at_ledger_db_01_append_commits_full_denormalized_row() {
    let mut s = seeded_store();
    let snap = snapshot_of(&s, "00000001");
    let out = s.append_history_row(row(
        Some(snap.clone()),
        Some(("aa:00:00:00:00:01", "Bloco A")),
        "192.168.1.20",
        97,
    ));
    assert_eq!(out, LedgerAppendOutcome::Committed(HistoryRowId(1)));

    let rows = s.history_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].identity, Some(snap));
    assert_eq!(rows[0].trust.value(), 97);
    assert_eq!(rows[0].ip.as_str(), "192.168.1.20");
    assert_eq!(rows[0].local, Some(local("Bloco A")));
}

#[test]
fn at_ledger_db_02_rejects_trust_out_of_range_without_writing() {
    let mut s = seeded_store();
    let snap = snapshot_of(&s, "00000001");
    let out = s.append_history_row(row(Some(snap), None, "10.0.0.1", 101));
    let LedgerAppendOutcome::Rejected { reason, .. } = out else {
        panic!("expected rejection");
    };
    assert_eq!(reason, LedgerRejectReason::TrustOutOfRange);
    assert!(s.history_rows().is_empty());
}

#[test]
fn at_ledger_db_03_rejects_invalid_ip_syntax() {
    let mut s = seeded_store();
    for ip in ["10.0.0", "300.1.1.1", "localhost", ""] {
        let out = s.append_history_row(row(None, None, ip, 0));
        let LedgerAppendOutcome::Rejected { reason, .. } = out else {
            panic!("expected rejection for {ip:?}");
        };
        assert_eq!(reason, LedgerRejectReason::InvalidIp);
    }
    assert!(s.history_rows().is_empty());
}

#[test]
fn at_ledger_db_04_rejects_reference_to_missing_identity() {
    let mut s = seeded_store();
    let mut ghost = snapshot_of(&s, "00000001");
    ghost.id = IdentityId::new("99999999").unwrap();
    let out = s.append_history_row(row(Some(ghost), None, "10.0.0.1", 50));
    let LedgerAppendOutcome::Rejected { reason, error } = out else {
        panic!("expected rejection");
    };
    assert_eq!(reason, LedgerRejectReason::UnknownIdentity);
    assert!(matches!(error, StorageError::ForeignKeyViolation { table: "history.id", .. }));

    let mut wrong_email = snapshot_of(&s, "00000001");
    wrong_email.email = EmailAddress::new("outra@campus.edu.br").unwrap();
    let out = s.append_history_row(row(Some(wrong_email), None, "10.0.0.1", 50));
    assert!(matches!(
        out,
        LedgerAppendOutcome::Rejected {
            reason: LedgerRejectReason::UnknownIdentity,
            ..
        }
    ));
    assert!(s.history_rows().is_empty());
}

#[test]
fn at_ledger_db_05_rejects_device_location_mismatch() {
    let mut s = seeded_store();
    let out = s.append_history_row(row(
        None,
        Some(("aa:00:00:00:00:01", "Biblioteca")),
        "10.0.0.1",
        0,
    ));
    assert!(matches!(
        out,
        LedgerAppendOutcome::Rejected {
            reason: LedgerRejectReason::UnknownDevice,
            ..
        }
    ));
}

#[test]
fn at_ledger_db_06_identity_delete_cascades_history() {
    let mut s = seeded_store();
    let a = snapshot_of(&s, "00000001");
    let b = snapshot_of(&s, "00000002");
    for _ in 0..3 {
        s.append_history_row(row(Some(a.clone()), Some(("aa:00:00:00:00:01", "Bloco A")), "10.0.0.1", 80));
    }
    s.append_history_row(row(Some(b.clone()), Some(("aa:00:00:00:00:01", "Bloco A")), "10.0.0.2", 80));
    s.append_history_row(row(None, Some(("aa:00:00:00:00:02", "Biblioteca")), "10.0.0.3", 0));

    let purge = s.delete_identity_cascade(&a.id).unwrap();
    assert_eq!(purge.history_rows_deleted, 3);
    assert!(s.get_identity_row(&a.id).is_none());
    assert!(s.history_rows_for_identity(&a.id).is_empty());
    assert_eq!(s.history_rows().len(), 2);
    assert_eq!(s.history_rows_for_identity(&b.id).len(), 1);

    // the freed email no longer satisfies the history reference
    let out = s.append_history_row(row(Some(a), None, "10.0.0.1", 80));
    assert!(matches!(out, LedgerAppendOutcome::Rejected { .. }));
}

#[test]
fn at_ledger_db_07_device_delete_nulls_mac_and_local_but_keeps_rows() {
    let mut s = seeded_store();
    let a = snapshot_of(&s, "00000001");
    s.append_history_row(row(Some(a.clone()), Some(("aa:00:00:00:00:01", "Bloco A")), "10.0.0.1", 90));
    s.append_history_row(row(Some(a.clone()), Some(("aa:00:00:00:00:02", "Biblioteca")), "10.0.0.1", 90));

    let purge = s.delete_device_set_null(&mac("aa:00:00:00:00:01")).unwrap();
    assert_eq!(purge.history_rows_nulled, 1);
    assert_eq!(s.history_rows().len(), 2);
    assert_eq!(s.history_rows()[0].mac, None);
    assert_eq!(s.history_rows()[0].local, None);
    assert_eq!(s.history_rows()[0].identity, Some(a));
    assert_eq!(s.history_rows()[1].mac, Some(mac("aa:00:00:00:00:02")));
    assert!(s.history_rows_for_device(&mac("aa:00:00:00:00:01")).is_empty());

    // the location is free for a replacement device
    s.insert_device_row(DeviceRecord::v1(mac("aa:00:00:00:00:03"), local("Bloco A")).unwrap())
        .unwrap();
}

#[test]
fn at_ledger_db_08_history_is_append_only() {
    let mut s = seeded_store();
    let out = s.append_history_row(row(None, None, "10.0.0.1", 0));
    let id = out.row_id().unwrap();
    assert_eq!(
        s.attempt_overwrite_history(id),
        Err(StorageError::AppendOnlyViolation { table: "history" })
    );
}

#[test]
fn at_ledger_db_09_deleting_unknown_rows_is_not_found() {
    let mut s = seeded_store();
    assert!(matches!(
        s.delete_identity_cascade(&IdentityId::new("12345678").unwrap()),
        Err(StorageError::NotFound { .. })
    ));
    assert!(matches!(
        s.delete_device_set_null(&mac("bb:00:00:00:00:09")),
        Err(StorageError::NotFound { .. })
    ));
}
