#[path = "../src/backup.rs"]
mod backup;

mod common;

use common::Sidecar;
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};

fn fake_sqlite(payload: &[u8]) -> Vec<u8> {
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = tempfile::tempdir().expect("src workspace");
    let workspace2 = tempfile::tempdir().expect("dst workspace");
    let out_dir = tempfile::tempdir().expect("out dir");

    let bytes = fake_sqlite(b"eduvision-test-payload");
    std::fs::write(workspace.path().join("eduvision.sqlite3"), &bytes).expect("write source db");
    let face_dir = workspace.path().join("storage").join("faces");
    std::fs::create_dir_all(&face_dir).expect("storage dir");
    std::fs::write(face_dir.join("face_1.jpg"), b"jpeg").expect("write face");

    let bundle_path = out_dir.path().join("workspace.evbackup.zip");
    let export =
        backup::export_workspace_bundle(workspace.path(), &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT);
    assert_eq!(export.entry_count, 4);
    assert_eq!(export.db_sha256.len(), 64);

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(backup::BUNDLE_FORMAT));
    assert!(manifest.contains(&export.db_sha256));
    archive
        .by_name("db/eduvision.sqlite3")
        .expect("database entry in bundle");
    archive
        .by_name("storage/faces/face_1.jpg")
        .expect("storage entry in bundle");

    let import =
        backup::import_workspace_bundle(&bundle_path, workspace2.path()).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT);
    assert_eq!(import.files_restored, 1);

    let restored = std::fs::read(workspace2.path().join("eduvision.sqlite3")).expect("read db");
    assert_eq!(restored, bytes);
    let face = std::fs::read(workspace2.path().join("storage/faces/face_1.jpg")).expect("face");
    assert_eq!(face, b"jpeg");
}

#[test]
fn raw_sqlite_file_is_accepted_and_other_files_are_not() {
    let workspace = tempfile::tempdir().expect("workspace");
    let inputs = tempfile::tempdir().expect("inputs");

    let raw = inputs.path().join("legacy.sqlite3");
    let bytes = fake_sqlite(b"raw");
    std::fs::write(&raw, &bytes).expect("write raw db");
    let import = backup::import_workspace_bundle(&raw, workspace.path()).expect("import raw");
    assert_eq!(import.bundle_format_detected, backup::RAW_SQLITE_FORMAT);
    assert_eq!(
        std::fs::read(workspace.path().join("eduvision.sqlite3")).expect("read"),
        bytes
    );

    let junk = inputs.path().join("notes.txt");
    std::fs::write(&junk, b"definitely not a database").expect("write junk");
    assert!(backup::import_workspace_bundle(&junk, workspace.path()).is_err());
}

#[test]
fn tampered_database_fails_checksum() {
    let workspace = tempfile::tempdir().expect("workspace");
    let out_dir = tempfile::tempdir().expect("out");
    let bundle_path = out_dir.path().join("tampered.zip");

    let file = File::create(&bundle_path).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest");
    zip.write_all(
        json!({ "format": backup::BUNDLE_FORMAT, "dbSha256": "00".repeat(32) })
            .to_string()
            .as_bytes(),
    )
    .expect("write manifest");
    zip.start_file("db/eduvision.sqlite3", opts).expect("db");
    zip.write_all(&fake_sqlite(b"x")).expect("write db");
    zip.finish().expect("finish");

    let err = backup::import_workspace_bundle(&bundle_path, workspace.path())
        .expect_err("checksum mismatch");
    assert!(format!("{err:#}").contains("checksum"));
    assert!(!workspace.path().join("eduvision.sqlite3").exists());
}

#[test]
fn ipc_export_then_import_restores_records() {
    let out_dir = tempfile::tempdir().expect("out");
    let bundle = out_dir.path().join("campus.zip");
    let bundle_str = bundle.to_string_lossy().to_string();

    let mut source = Sidecar::start();
    let student = source.create_student("Tara", "tara@college.edu", "CSE", "4");
    let exported = source.ok("backup.exportWorkspaceBundle", json!({ "outPath": bundle_str }));
    assert_eq!(exported["bundleFormat"], json!(backup::BUNDLE_FORMAT));
    assert!(exported["dbSha256"].is_string());

    let mut target = Sidecar::start();
    let imported = target.ok("backup.importWorkspaceBundle", json!({ "inPath": bundle_str }));
    assert_eq!(imported["bundleFormatDetected"], json!(backup::BUNDLE_FORMAT));
    let found = target.ok("students.get", json!({ "studentId": student }));
    assert_eq!(found["student"]["name"], json!("Tara"));

    let (code, status) = target.fail(
        "backup.importWorkspaceBundle",
        json!({ "inPath": out_dir.path().join("missing.zip").to_string_lossy() }),
    );
    assert_eq!((code.as_str(), status), ("not_found", 404));
}

#[test]
fn failed_storage_restore_keeps_existing_database() {
    let source = tempfile::tempdir().expect("source");
    let target = tempfile::tempdir().expect("target");
    let out_dir = tempfile::tempdir().expect("out");

    std::fs::write(source.path().join("eduvision.sqlite3"), fake_sqlite(b"incoming"))
        .expect("write source db");
    let faces = source.path().join("storage").join("faces");
    std::fs::create_dir_all(&faces).expect("faces dir");
    std::fs::write(faces.join("face_1.jpg"), b"jpeg").expect("write face");
    let bundle_path = out_dir.path().join("bundle.zip");
    backup::export_workspace_bundle(source.path(), &bundle_path).expect("export");

    let existing = fake_sqlite(b"existing");
    std::fs::write(target.path().join("eduvision.sqlite3"), &existing).expect("write target db");
    // A plain file where the faces directory has to go.
    std::fs::create_dir_all(target.path().join("storage")).expect("storage dir");
    std::fs::write(target.path().join("storage").join("faces"), b"blocker").expect("blocker");

    assert!(backup::import_workspace_bundle(&bundle_path, target.path()).is_err());
    assert_eq!(
        std::fs::read(target.path().join("eduvision.sqlite3")).expect("read db"),
        existing
    );
    assert!(!target.path().join("eduvision.sqlite3.importing").exists());
}
