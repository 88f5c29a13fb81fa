use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value, json};

use kira_sample_manager::app::{Annotation, App, LoadRequest};
use kira_sample_manager::document::SampleDocument;
use kira_sample_manager::domain::SampleStatus;
use kira_sample_manager::error::KiraError;
use kira_sample_manager::migration::Migrator;
use kira_sample_manager::output::JsonOutput;
use kira_sample_manager::store::SampleStore;

fn workdir() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, dir)
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, hour, minute, 0).unwrap()
}

fn payload(label: &str) -> Map<String, Value> {
    let Value::Object(map) = json!({
        "Sample": {
            "Label": label,
            "Components": [{"Name": "Lysozyme", "Concentration": 1, "Unit": "mM"}]
        },
        "Users": ["alice"]
    }) else {
        unreachable!()
    };
    map
}

#[test]
fn load_ejects_previous_and_creates_at_injection_time() {
    let (_temp, dir) = workdir();
    let app = App::new(SampleStore::default());
    let first = app
        .create(&dir, payload("A"), Some(at(9, 0)))
        .unwrap()
        .path
        .unwrap();

    let result = app
        .load_sample(
            &dir,
            LoadRequest {
                annotation: Annotation::New(SampleDocument::from_payload(payload("B"))),
                injected_at: at(11, 0),
                position: Some("12".to_string()),
            },
        )
        .unwrap();

    assert_eq!(result.ejected, Some(first.clone()));
    let created = result.created.unwrap();
    assert_eq!(created.file_name(), Some("2024-01-01_110000_B.json"));

    let ejected = app.store().read(&first).unwrap();
    assert_eq!(ejected.metadata.ejected_timestamp, Some(at(11, 0)));
    let loaded = app.store().read(&created).unwrap();
    assert_eq!(loaded.metadata.created_timestamp, Some(at(11, 0)));

    let active = app.active(&dir).unwrap();
    assert_eq!(active.active, Some(created));
    assert_eq!(active.label.as_deref(), Some("B"));
}

#[test]
fn load_without_annotation_only_ejects() {
    let (_temp, dir) = workdir();
    let app = App::new(SampleStore::default());
    app.create(&dir, payload("A"), Some(at(9, 0))).unwrap();

    let result = app
        .load_sample(
            &dir,
            LoadRequest {
                annotation: Annotation::Skip,
                injected_at: at(10, 0),
                position: None,
            },
        )
        .unwrap();

    assert!(result.ejected.is_some());
    assert!(result.created.is_none());
    assert!(app.active(&dir).unwrap().active.is_none());
}

#[test]
fn duplicate_copies_payload_with_fresh_lifecycle() {
    let (_temp, dir) = workdir();
    let app = App::new(SampleStore::default());
    let original = app
        .create(&dir, payload("A"), Some(at(9, 0)))
        .unwrap()
        .path
        .unwrap();
    app.store().eject_at(&original, at(10, 0)).unwrap();

    let copy = app.duplicate_last(&dir, Some(at(12, 0))).unwrap().path.unwrap();
    assert_ne!(copy, original);

    let document = app.store().read(&copy).unwrap();
    assert_eq!(document.status(), SampleStatus::Active);
    assert_eq!(document.metadata.created_timestamp, Some(at(12, 0)));
    assert_eq!(document.payload.get("Users"), Some(&json!(["alice"])));
    assert_eq!(document.label(), Some("A"));
}

#[test]
fn duplicate_needs_a_previous_sample() {
    let (_temp, dir) = workdir();
    let app = App::new(SampleStore::default());
    let err = app.duplicate_last(&dir, None).unwrap_err();
    assert_matches!(err, KiraError::DocumentNotFound(_));
}

#[test]
fn list_reports_status_per_file() {
    let (_temp, dir) = workdir();
    let app = App::new(SampleStore::default());
    let first = app
        .create(&dir, payload("A"), Some(at(9, 0)))
        .unwrap()
        .path
        .unwrap();
    app.eject(&first).unwrap();
    app.create(&dir, payload("B"), Some(at(11, 0))).unwrap();

    let result = app.list(&dir, &JsonOutput).unwrap();
    let statuses = result
        .samples
        .iter()
        .map(|entry| (entry.filename.as_str(), entry.status))
        .collect::<Vec<_>>();
    assert_eq!(
        statuses,
        vec![
            ("2024-01-01_090000_A.json", SampleStatus::Ejected),
            ("2024-01-01_110000_B.json", SampleStatus::Active),
        ]
    );
}

#[test]
fn explicit_migration_reports_and_writes() {
    let (_temp, dir) = workdir();
    let migrator = Migrator::from_json(
        r#"[
            {
                "from_version": null,
                "operations": [
                    {"op": "map", "path": "/Sample/Components/*/Unit", "from": "millimolar", "to": "mM"},
                    {"op": "set", "path": "/metadata/schema_version", "value": "0.0.1"}
                ]
            }
        ]"#,
    )
    .unwrap();
    let app = App::new(SampleStore::new("0.0.1", migrator));
    let path = dir.join("2024-01-01_090000_A.json");
    fs::write(
        path.as_std_path(),
        json!({
            "metadata": {"created_timestamp": "2024-01-01T09:00:00.000Z"},
            "Sample": {"Label": "A", "Components": [{"Name": "X", "Unit": "millimolar"}]}
        })
        .to_string(),
    )
    .unwrap();

    let dry_run = app.migrate_document(&path, false).unwrap();
    assert_eq!(dry_run.from_version, Value::Null);
    assert_eq!(dry_run.to_version, json!("0.0.1"));
    assert_eq!(dry_run.blocks_applied, 1);
    assert!(!dry_run.written);

    let written = app.migrate_document(&path, true).unwrap();
    assert!(written.written);

    let raw: Value = serde_json::from_str(&fs::read_to_string(path.as_std_path()).unwrap()).unwrap();
    assert_eq!(raw["Sample"]["Components"][0]["Unit"], json!("mM"));
    assert_eq!(raw["metadata"]["schema_version"], json!("0.0.1"));
    assert_eq!(
        raw["metadata"]["created_timestamp"],
        json!("2024-01-01T09:00:00.000Z")
    );

    let again = app.migrate_document(&path, true).unwrap();
    assert_eq!(again.blocks_applied, 0);
    assert!(!again.written);
}

#[test]
fn explicit_migration_surfaces_failures() {
    let (_temp, dir) = workdir();
    let migrator = Migrator::from_json(
        r#"[{"from_version": null, "operations": [{"op": "rename_key", "path": "/A", "to": "B"}]}]"#,
    )
    .unwrap();
    let app = App::new(SampleStore::new("0.0.1", migrator));
    let path = dir.join("2024-01-01_090000_A.json");
    fs::write(
        path.as_std_path(),
        json!({"metadata": {}, "Sample": {}, "A": 1, "B": 2}).to_string(),
    )
    .unwrap();

    let err = app.migrate_document(&path, true).unwrap_err();
    assert_matches!(err, KiraError::RenameConflict { .. });
}
