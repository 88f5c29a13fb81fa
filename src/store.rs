use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SubsecRound, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::document::{SampleDocument, parse_document};
use crate::domain::{DEFAULT_LABEL, SampleFilename, SampleStatus, generate_filename, now_millis};
use crate::error::KiraError;
use crate::fs_util::write_atomic;
use crate::migration::Migrator;

pub const DEFAULT_SCHEMA_VERSION: &str = "0.0.1";

/// Reads and writes sample documents, one JSON file per sample.
///
/// Reads upgrade documents through the configured [`Migrator`] on a
/// best-effort basis. Writes always stamp `modified_timestamp` and the
/// store's schema version, so editing an old document upgrades it on disk.
#[derive(Debug, Clone)]
pub struct SampleStore {
    schema_version: String,
    migrator: Migrator,
}

impl Default for SampleStore {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEMA_VERSION, Migrator::empty())
    }
}

impl SampleStore {
    pub fn new(schema_version: impl Into<String>, migrator: Migrator) -> Self {
        Self {
            schema_version: schema_version.into(),
            migrator,
        }
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn migrator(&self) -> &Migrator {
        &self.migrator
    }

    pub fn read_raw(path: &Utf8Path) -> Result<Value, KiraError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                KiraError::DocumentNotFound(path.to_string())
            } else {
                KiraError::DocumentRead {
                    path: path.to_string(),
                    message: err.to_string(),
                }
            }
        })?;
        parse_document(path.as_str(), &content)
    }

    /// A migration whose output no longer types as a sample document is
    /// treated like a failed one: the unmigrated document is returned.
    pub fn read(&self, path: &Utf8Path) -> Result<SampleDocument, KiraError> {
        let original = Self::read_raw(path)?;
        let upgraded = self.upgrade(path, original.clone());
        if upgraded != original {
            match SampleDocument::from_value(upgraded) {
                Ok(document) => return Ok(document),
                Err(err) => {
                    warn!(path = %path, error = %err, "migrated document invalid; using unmigrated document");
                }
            }
        }
        SampleDocument::from_value(original).map_err(|err| KiraError::DocumentParse {
            path: path.to_string(),
            message: err.to_string(),
        })
    }

    /// Migrates a copy of `value`; the untouched input is returned when the
    /// migration fails.
    pub fn upgrade(&self, path: &Utf8Path, value: Value) -> Value {
        let mut migrated = value.clone();
        match self.migrator.migrate(&mut migrated) {
            Ok(0) => value,
            Ok(applied) => {
                debug!(path = %path, blocks = applied, "document migrated on read");
                migrated
            }
            Err(err) => {
                warn!(path = %path, error = %err, "migration failed; using unmigrated document");
                value
            }
        }
    }

    pub fn write(
        &self,
        path: &Utf8Path,
        document: &mut SampleDocument,
        is_new: bool,
    ) -> Result<(), KiraError> {
        self.write_at(path, document, is_new, now_millis())
    }

    pub fn write_at(
        &self,
        path: &Utf8Path,
        document: &mut SampleDocument,
        is_new: bool,
        now: DateTime<Utc>,
    ) -> Result<(), KiraError> {
        let now = now.trunc_subsecs(3);
        let metadata = &mut document.metadata;
        if is_new || metadata.created_timestamp.is_none() {
            metadata.created_timestamp = Some(now);
        }
        metadata.modified_timestamp = Some(now);
        metadata.schema_version = Some(self.schema_version.clone());

        let write_error = |message: String| KiraError::DocumentWrite {
            path: path.to_string(),
            message,
        };
        let content =
            serde_json::to_vec_pretty(document).map_err(|err| write_error(err.to_string()))?;
        write_atomic(path, &content).map_err(|err| write_error(err.to_string()))?;
        debug!(path = %path, is_new, "sample written");
        Ok(())
    }

    /// Never fails: unreadable documents report [`SampleStatus::Unknown`].
    pub fn status(&self, path: &Utf8Path) -> SampleStatus {
        match self.read(path) {
            Ok(document) => document.status(),
            Err(err) => {
                debug!(path = %path, error = %err, "status unknown");
                SampleStatus::Unknown
            }
        }
    }

    pub fn eject(&self, path: &Utf8Path) -> Result<(), KiraError> {
        self.eject_at(path, now_millis())
    }

    pub fn eject_at(&self, path: &Utf8Path, at: DateTime<Utc>) -> Result<(), KiraError> {
        let mut document = self.read(path)?;
        let at = at.trunc_subsecs(3);
        document.metadata.ejected_timestamp = Some(at);
        self.write_at(path, &mut document, false, at)
    }

    /// Sample filenames in `dir`, oldest first. A missing directory has no
    /// samples.
    pub fn list_documents(dir: &Utf8Path) -> Result<Vec<String>, KiraError> {
        if !dir.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read dir {dir}: {err}")))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| KiraError::Filesystem(err.to_string()))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.parse::<SampleFilename>().is_ok() && entry.path().is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn list_paths(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, KiraError> {
        Ok(Self::list_documents(dir)?
            .into_iter()
            .map(|name| dir.join(name))
            .collect())
    }

    /// Most recent document without an ejection stamp. If several qualify
    /// the newest one wins.
    pub fn find_active(&self, dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, KiraError> {
        for path in Self::list_paths(dir)?.into_iter().rev() {
            if self.status(&path) == SampleStatus::Active {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }

    pub fn auto_eject_active(&self, dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, KiraError> {
        self.auto_eject_active_at(dir, now_millis())
    }

    pub fn auto_eject_active_at(
        &self,
        dir: &Utf8Path,
        at: DateTime<Utc>,
    ) -> Result<Option<Utf8PathBuf>, KiraError> {
        let Some(active) = self.find_active(dir)? else {
            return Ok(None);
        };
        self.eject_at(&active, at)?;
        debug!(path = %active, "active sample ejected");
        Ok(Some(active))
    }

    pub fn has_documents(dir: &Utf8Path) -> Result<bool, KiraError> {
        Ok(!Self::list_documents(dir)?.is_empty())
    }

    pub fn latest_document(dir: &Utf8Path) -> Result<Option<Utf8PathBuf>, KiraError> {
        Ok(Self::list_paths(dir)?.pop())
    }

    /// Persists a draft as a new sample created at `at`. The filename is
    /// derived from the document label and `at`.
    pub fn create(
        &self,
        dir: &Utf8Path,
        mut document: SampleDocument,
        at: DateTime<Utc>,
    ) -> Result<Utf8PathBuf, KiraError> {
        let label = document.label().unwrap_or(DEFAULT_LABEL).to_string();
        let path = dir.join(generate_filename(&label, at));
        if path.as_std_path().exists() {
            return Err(KiraError::DocumentWrite {
                path: path.to_string(),
                message: "a sample with this name already exists".to_string(),
            });
        }
        self.write_at(&path, &mut document, true, at)?;
        Ok(path)
    }

    pub fn delete(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let document = self.read(path)?;
        if !document.is_ejected() {
            return Err(KiraError::SampleActive(path.to_string()));
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("remove {path}: {err}")))?;
        debug!(path = %path, "sample deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn created_equals_modified_on_new_write() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = SampleStore::default();
        let path = dir.join("2024-01-01_090000_A.json");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();

        let mut document = SampleDocument::default();
        store.write_at(&path, &mut document, true, t0).unwrap();
        let stored = store.read(&path).unwrap();
        assert_eq!(stored.metadata.created_timestamp, Some(t0));
        assert_eq!(stored.metadata.modified_timestamp, Some(t0));
        assert_eq!(
            stored.metadata.schema_version.as_deref(),
            Some(DEFAULT_SCHEMA_VERSION)
        );
    }
}
