use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_sample_manager::config::{Config, ConfigLoader};
use kira_sample_manager::error::KiraError;
use kira_sample_manager::store::DEFAULT_SCHEMA_VERSION;

#[test]
fn resolve_explicit_config() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(
        &path,
        r#"{
            "search_roots": ["/data/nmr", "/archive/nmr"],
            "schema_version": "0.1.0",
            "migrations_path": "/etc/kira/migrations.json"
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(
        resolved.search_roots,
        vec![
            Utf8PathBuf::from("/data/nmr"),
            Utf8PathBuf::from("/archive/nmr")
        ]
    );
    assert_eq!(resolved.schema_version, "0.1.0");
    assert_eq!(
        resolved.migrations_path,
        Some(Utf8PathBuf::from("/etc/kira/migrations.json"))
    );
}

#[test]
fn explicit_config_must_exist() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("missing.json");
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn explicit_config_must_parse() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("config.json");
    fs::write(&path, "{ broken").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}

#[test]
fn defaults_fill_missing_fields() {
    let resolved = ConfigLoader::resolve_config("config.json".into(), Config::default());
    assert_eq!(resolved.schema_version, DEFAULT_SCHEMA_VERSION);
    assert!(resolved.search_roots.is_empty());

    let store = resolved.store().unwrap();
    assert_eq!(store.schema_version(), DEFAULT_SCHEMA_VERSION);
    assert!(store.migrator().blocks().is_empty());
}

#[test]
fn store_loads_migrations_from_config() {
    let temp = tempfile::tempdir().unwrap();
    let migrations = temp.path().join("migrations.json");
    fs::write(
        &migrations,
        r#"[{"from_version": null, "operations": [{"op": "remove", "path": "/Legacy"}]}]"#,
    )
    .unwrap();
    let config = Config {
        migrations_path: Some(migrations.to_string_lossy().into_owned()),
        ..Config::default()
    };

    let resolved = ConfigLoader::resolve_config(temp.path().join("config.json"), config);
    let store = resolved.store().unwrap();
    assert_eq!(store.migrator().blocks().len(), 1);
}

#[test]
fn search_roots_are_persisted() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira").join("config.json");
    let mut resolved = ConfigLoader::resolve_config(path.clone(), Config::default());

    assert!(resolved.add_search_root("/data/nmr").unwrap());
    assert!(!resolved.add_search_root("/data/nmr").unwrap());
    assert!(resolved.add_search_root("/archive").unwrap());
    assert!(resolved.remove_search_root("/archive").unwrap());
    assert!(!resolved.remove_search_root("/archive").unwrap());

    let reloaded = ConfigLoader::resolve(path.to_str()).unwrap();
    assert_eq!(reloaded.search_roots, vec![Utf8PathBuf::from("/data/nmr")]);
    assert_eq!(reloaded.config().search_roots, vec!["/data/nmr".to_string()]);
}
