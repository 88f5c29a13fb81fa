use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::document::{SampleDocument, schema_version_of};
use crate::domain::{SampleStatus, now_millis};
use crate::error::KiraError;
use crate::scanner::{CancelFlag, ScanReport, Scanner};
use crate::store::SampleStore;
use crate::timeline::{ReassignDirection, ReassignOptions, Reassignment, Timeline, TimelineEvent};

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub directory: Utf8PathBuf,
    pub samples: Vec<ListEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListEntry {
    pub filename: String,
    pub path: Utf8PathBuf,
    pub status: SampleStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub path: Utf8PathBuf,
    pub status: SampleStatus,
    pub document: SampleDocument,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveResult {
    pub directory: Utf8PathBuf,
    pub active: Option<Utf8PathBuf>,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleResult {
    pub action: String,
    pub path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub ejected: Option<Utf8PathBuf>,
    pub created: Option<Utf8PathBuf>,
    pub position: Option<String>,
    pub injected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrateResult {
    pub path: Utf8PathBuf,
    pub from_version: Value,
    pub to_version: Value,
    pub blocks_applied: usize,
    pub written: bool,
}

/// What to record when a new sample goes into the magnet.
#[derive(Debug, Clone)]
pub enum Annotation {
    New(SampleDocument),
    DuplicateLast,
    Skip,
}

#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub annotation: Annotation,
    /// Captured before the physical load command is issued.
    pub injected_at: DateTime<Utc>,
    pub position: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// One session over the sample store. The caller owns it and passes it
/// wherever it is needed.
#[derive(Debug, Clone)]
pub struct App {
    store: SampleStore,
}

impl App {
    pub fn new(store: SampleStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    pub fn list(&self, directory: &Utf8Path, sink: &dyn ProgressSink) -> Result<ListResult, KiraError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; listing {directory}"),
            elapsed: None,
        });
        let samples = SampleStore::list_documents(directory)?
            .into_iter()
            .map(|filename| {
                let path = directory.join(&filename);
                let status = self.store.status(&path);
                ListEntry {
                    filename,
                    path,
                    status,
                }
            })
            .collect();
        Ok(ListResult {
            directory: directory.to_path_buf(),
            samples,
        })
    }

    pub fn show(&self, path: &Utf8Path) -> Result<ShowResult, KiraError> {
        let document = self.store.read(path)?;
        Ok(ShowResult {
            path: path.to_path_buf(),
            status: document.status(),
            document,
        })
    }

    pub fn active(&self, directory: &Utf8Path) -> Result<ActiveResult, KiraError> {
        let active = self.store.find_active(directory)?;
        let label = match &active {
            Some(path) => self
                .store
                .read(path)
                .ok()
                .and_then(|document| document.label().map(str::to_string)),
            None => None,
        };
        Ok(ActiveResult {
            directory: directory.to_path_buf(),
            active,
            label,
        })
    }

    pub fn create(
        &self,
        directory: &Utf8Path,
        payload: Map<String, Value>,
        at: Option<DateTime<Utc>>,
    ) -> Result<SampleResult, KiraError> {
        let document = SampleDocument::from_payload(payload);
        let path = self
            .store
            .create(directory, document, at.unwrap_or_else(now_millis))?;
        Ok(SampleResult {
            action: "created".to_string(),
            path: Some(path),
        })
    }

    pub fn duplicate_last(
        &self,
        directory: &Utf8Path,
        at: Option<DateTime<Utc>>,
    ) -> Result<SampleResult, KiraError> {
        let path = self.duplicate_latest(directory, at.unwrap_or_else(now_millis))?;
        Ok(SampleResult {
            action: "duplicated".to_string(),
            path: Some(path),
        })
    }

    pub fn eject(&self, path: &Utf8Path) -> Result<SampleResult, KiraError> {
        self.store.eject(path)?;
        Ok(SampleResult {
            action: "ejected".to_string(),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn eject_active(&self, directory: &Utf8Path) -> Result<SampleResult, KiraError> {
        let ejected = self.store.auto_eject_active(directory)?;
        Ok(SampleResult {
            action: if ejected.is_some() { "ejected" } else { "none" }.to_string(),
            path: ejected,
        })
    }

    pub fn delete(&self, path: &Utf8Path) -> Result<SampleResult, KiraError> {
        self.store.delete(path)?;
        Ok(SampleResult {
            action: "deleted".to_string(),
            path: Some(path.to_path_buf()),
        })
    }

    /// Ejects whatever is loaded and records the incoming sample, both at
    /// the injection time.
    pub fn load_sample(
        &self,
        directory: &Utf8Path,
        request: LoadRequest,
    ) -> Result<LoadResult, KiraError> {
        let ejected = self
            .store
            .auto_eject_active_at(directory, request.injected_at)?;
        let created = match request.annotation {
            Annotation::New(document) => {
                Some(self.store.create(directory, document, request.injected_at)?)
            }
            Annotation::DuplicateLast => {
                Some(self.duplicate_latest(directory, request.injected_at)?)
            }
            Annotation::Skip => None,
        };
        info!(
            directory = %directory,
            position = request.position.as_deref().unwrap_or("manual"),
            ejected = ejected.is_some(),
            created = created.is_some(),
            "sample loaded"
        );
        Ok(LoadResult {
            ejected,
            created,
            position: request.position,
            injected_at: request.injected_at,
        })
    }

    fn duplicate_latest(
        &self,
        directory: &Utf8Path,
        at: DateTime<Utc>,
    ) -> Result<Utf8PathBuf, KiraError> {
        let latest = SampleStore::latest_document(directory)?
            .ok_or_else(|| KiraError::DocumentNotFound(format!("no previous sample in {directory}")))?;
        let draft = self.store.read(&latest)?.duplicate();
        self.store.create(directory, draft, at)
    }

    pub fn timeline(&self, directory: &Utf8Path, sink: &dyn ProgressSink) -> Result<Timeline, KiraError> {
        let start = Instant::now();
        let timeline = Timeline::build(&self.store, directory)?;
        sink.event(ProgressEvent {
            message: format!("phase=Timeline; {} events", timeline.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(timeline)
    }

    pub fn orphans(&self, directory: &Utf8Path) -> Result<Vec<TimelineEvent>, KiraError> {
        let timeline = Timeline::build(&self.store, directory)?;
        Ok(timeline.orphans().cloned().collect())
    }

    pub fn reassign_options(
        &self,
        directory: &Utf8Path,
        experiments: &[u32],
    ) -> Result<ReassignOptions, KiraError> {
        Timeline::build(&self.store, directory)?.offer(experiments)
    }

    pub fn reassign(
        &self,
        directory: &Utf8Path,
        experiments: &[u32],
        direction: ReassignDirection,
    ) -> Result<Reassignment, KiraError> {
        let timeline = Timeline::build(&self.store, directory)?;
        match direction {
            ReassignDirection::Previous => timeline.reassign_to_previous(&self.store, experiments),
            ReassignDirection::Next => timeline.reassign_to_next(&self.store, experiments),
        }
    }

    pub fn scan(
        &self,
        roots: &[Utf8PathBuf],
        cancel: CancelFlag,
        sink: &dyn ProgressSink,
    ) -> ScanReport {
        let start = Instant::now();
        let report = Scanner::with_cancel(&self.store, cancel).scan(roots, sink);
        sink.event(ProgressEvent {
            message: format!(
                "phase=Scan; {} samples in {} directories",
                report.samples.len(),
                report.dataset_dirs.len()
            ),
            elapsed: Some(start.elapsed()),
        });
        report
    }

    /// Explicit migration: unlike a read, failures are reported. With
    /// `write` the upgraded document is saved back.
    pub fn migrate_document(&self, path: &Utf8Path, write: bool) -> Result<MigrateResult, KiraError> {
        let mut value = SampleStore::read_raw(path)?;
        let from_version = schema_version_of(&value);
        let blocks_applied = self.store.migrator().migrate(&mut value)?;
        let to_version = schema_version_of(&value);
        let written = write && blocks_applied > 0;
        if written {
            let mut document =
                SampleDocument::from_value(value).map_err(|err| KiraError::DocumentParse {
                    path: path.to_string(),
                    message: err.to_string(),
                })?;
            self.store.write(path, &mut document, false)?;
        }
        Ok(MigrateResult {
            path: path.to_path_buf(),
            from_version,
            to_version,
            blocks_applied,
            written,
        })
    }
}
