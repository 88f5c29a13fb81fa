use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::acquisition::has_experiment_dir;
use crate::app::{ProgressEvent, ProgressSink};
use crate::document::{LEGACY_METADATA_KEY, METADATA_KEY, SAMPLE_KEY, has_sample_shape};
use crate::domain::{SAMPLE_EXTENSION, SampleStatus};
use crate::error::KiraError;
use crate::fs_util::{DirListing, is_hidden, list_dir};
use crate::store::SampleStore;

/// Instrument output directories that never hold sample documents.
pub const RESERVED_DIRS: [&str; 2] = ["pdata", "ser"];

const NOTES_PREVIEW_CHARS: usize = 100;

/// Shared flag checked between sibling directories.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Catalogue line for one sample document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SampleSummary {
    pub filepath: Utf8PathBuf,
    pub directory: Utf8PathBuf,
    pub filename: String,
    pub experiment: String,
    pub status: Option<SampleStatus>,
    pub created: String,
    pub label: String,
    pub label_tooltip: String,
    pub users: String,
    pub components: String,
    pub components_tooltip: String,
    pub buffer: String,
    pub buffer_tooltip: String,
    pub tube: String,
    pub tube_tooltip: String,
    pub notes: String,
    pub notes_tooltip: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub samples: Vec<SampleSummary>,
    pub dataset_dirs: Vec<Utf8PathBuf>,
    pub experiment_roots: Vec<Utf8PathBuf>,
    pub skipped: usize,
    pub cancelled: bool,
}

pub struct Scanner<'a> {
    store: &'a SampleStore,
    cancel: CancelFlag,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a SampleStore) -> Self {
        Self {
            store,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(store: &'a SampleStore, cancel: CancelFlag) -> Self {
        Self { store, cancel }
    }

    /// Scans every existing root. Unreadable directories and documents are
    /// logged and skipped; the scan itself never fails.
    pub fn scan(&self, roots: &[Utf8PathBuf], sink: &dyn ProgressSink) -> ScanReport {
        let mut report = ScanReport::default();
        for root in roots {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            if !root.as_std_path().is_dir() {
                debug!(root = %root, "search root missing; skipped");
                continue;
            }
            sink.event(ProgressEvent {
                message: format!("phase=Scan; root {root}"),
                elapsed: None,
            });
            self.scan_dir(root, &mut report, sink);
        }
        report
    }

    fn scan_dir(&self, dir: &Utf8Path, report: &mut ScanReport, sink: &dyn ProgressSink) {
        let listing = match list_dir(dir) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(path = %dir, error = %err, "cannot list directory; skipped");
                return;
            }
        };

        if self.collect_samples(dir, &listing, report) {
            report.dataset_dirs.push(dir.to_path_buf());
            sink.event(ProgressEvent {
                message: format!("phase=Scan; samples in {dir}"),
                elapsed: None,
            });
            return;
        }

        if has_experiment_dir(&listing.dirs) {
            debug!(path = %dir, "experiment root without samples; not descending");
            report.experiment_roots.push(dir.to_path_buf());
            return;
        }

        for child in &listing.dirs {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                return;
            }
            if is_hidden(child) || is_reserved(child) {
                continue;
            }
            self.scan_dir(child, report, sink);
        }
    }

    /// Returns true when `dir` holds at least one sample-shaped document.
    fn collect_samples(&self, dir: &Utf8Path, listing: &DirListing, report: &mut ScanReport) -> bool {
        let mut found = false;
        for file in &listing.files {
            if file.extension() != Some(SAMPLE_EXTENSION) {
                continue;
            }
            let value = match SampleStore::read_raw(file) {
                Ok(value) if has_sample_shape(&value) => value,
                Ok(_) => continue,
                Err(err) => {
                    debug!(path = %file, error = %err, "not a sample document");
                    continue;
                }
            };
            found = true;
            let value = self.store.upgrade(file, value);
            match SampleSummary::extract(file, &value) {
                Ok(summary) => report.samples.push(summary),
                Err(err) => {
                    warn!(path = %file, error = %err, "sample summary failed; skipped");
                    report.skipped += 1;
                }
            }
        }
        if found {
            debug!(path = %dir, "dataset directory; not descending");
        }
        found
    }
}

fn is_reserved(dir: &Utf8Path) -> bool {
    dir.file_name()
        .map(|name| RESERVED_DIRS.contains(&name))
        .unwrap_or(false)
}

impl SampleSummary {
    pub fn extract(path: &Utf8Path, value: &Value) -> Result<Self, KiraError> {
        let parse_error = |message: &str| KiraError::DocumentParse {
            path: path.to_string(),
            message: message.to_string(),
        };
        let root = value
            .as_object()
            .ok_or_else(|| parse_error("document is not an object"))?;
        let metadata = root
            .get(METADATA_KEY)
            .or_else(|| root.get(LEGACY_METADATA_KEY))
            .unwrap_or(&Value::Null);
        let sample = root.get(SAMPLE_KEY).unwrap_or(&Value::Null);

        let users = match root.get("Users") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| parse_error("Users must be a list of names"))?,
            Some(_) => return Err(parse_error("Users must be a list of names")),
        };

        let directory = path.parent().map(Utf8Path::to_path_buf).unwrap_or_default();
        let experiment = directory.file_name().unwrap_or_default().to_string();
        let status = match metadata.get("ejected_timestamp").map(text) {
            Some(stamp) if !stamp.is_empty() => SampleStatus::Ejected,
            _ => SampleStatus::Active,
        };
        let (components, components_tooltip) = components(sample);
        let (buffer, buffer_tooltip) = buffer(root.get("Buffer").unwrap_or(&Value::Null));
        let (tube, tube_tooltip) = tube(root.get("NMR Tube").unwrap_or(&Value::Null));
        let notes_tooltip = field(value, "Notes");

        Ok(Self {
            filepath: path.to_path_buf(),
            filename: path.file_name().unwrap_or_default().to_string(),
            directory,
            experiment,
            status: Some(status),
            created: field(metadata, "created_timestamp"),
            label: field(sample, "Label"),
            label_tooltip: lab_reference(root.get("Laboratory Reference").unwrap_or(&Value::Null)),
            users: users.join(", "),
            components,
            components_tooltip,
            buffer,
            buffer_tooltip,
            tube,
            tube_tooltip,
            notes: notes_preview(&notes_tooltip),
            notes_tooltip,
        })
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        _ => String::new(),
    }
}

fn field(value: &Value, key: &str) -> String {
    value.get(key).map(text).unwrap_or_default()
}

fn components(sample: &Value) -> (String, String) {
    let mut names = Vec::new();
    let mut details = Vec::new();
    let items = sample
        .get("Components")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for component in items {
        let name = field(component, "Name");
        if component.get("Name").is_none() {
            continue;
        }
        let labelling = field(component, "Isotopic labelling");
        let labelled = !labelling.is_empty() && labelling != "unlabelled";
        if labelling == "custom" {
            let custom = field(component, "Custom labelling");
            if custom.is_empty() {
                names.push(name.clone());
            } else {
                names.push(format!("{name} ({custom})"));
            }
        } else if labelled {
            names.push(format!("{name} ({labelling})"));
        } else {
            names.push(name.clone());
        }

        let mut detail = amount(component, &name);
        if labelled {
            detail.push_str(&format!(" [{labelling}]"));
        }
        details.push(detail);
    }
    (names.join(", "), details.join("\n"))
}

fn buffer(buffer: &Value) -> (String, String) {
    let mut parts = Vec::new();
    let mut details = Vec::new();
    let items = buffer
        .get("Components")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for component in items {
        if component.get("name").is_none() {
            continue;
        }
        let name = field(component, "name");
        details.push(amount(component, &name));
        parts.push(name);
    }

    let solvent = field(buffer, "Solvent");
    let solvent = if solvent == "custom" {
        field(buffer, "Custom solvent")
    } else {
        solvent
    };
    if !solvent.is_empty() {
        details.push(format!("Solvent: {solvent}"));
        parts.push(solvent);
    }

    let ph = field(buffer, "pH");
    if !ph.is_empty() {
        parts.push(format!("pH {ph}"));
        details.push(format!("pH: {ph}"));
    }

    let reference = field(buffer, "Chemical shift reference");
    if !reference.is_empty() && reference != "none" {
        let conc = field(buffer, "Reference concentration");
        let unit = field(buffer, "Reference unit");
        if !conc.is_empty() && !unit.is_empty() {
            details.push(format!("Reference: {reference} ({conc} {unit})"));
        } else {
            details.push(format!("Reference: {reference}"));
        }
    }
    (parts.join(", "), details.join("\n"))
}

fn tube(tube: &Value) -> (String, String) {
    let diameter = field(tube, "Diameter");
    let kind = field(tube, "Type");
    let short = [diameter.as_str(), kind.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    let mut details = Vec::new();
    if !diameter.is_empty() {
        details.push(format!("Diameter: {diameter}"));
    }
    if !kind.is_empty() {
        details.push(format!("Type: {kind}"));
    }
    let volume = field(tube, "Sample Volume (μL)");
    if !volume.is_empty() {
        details.push(format!("Volume: {volume} μL"));
    }
    let position = field(tube, "SampleJet Rack Position");
    if !position.is_empty() {
        details.push(format!("SampleJet Position: {position}"));
    }
    let rack = field(tube, "SampleJet Rack ID");
    if !rack.is_empty() {
        details.push(format!("SampleJet Rack: {rack}"));
    }
    (short, details.join("\n"))
}

fn lab_reference(reference: &Value) -> String {
    let mut details = Vec::new();
    let labbook = field(reference, "Labbook Entry");
    if !labbook.is_empty() {
        details.push(format!("Labbook: {labbook}"));
    }
    let experiment = field(reference, "Experiment ID");
    if !experiment.is_empty() {
        details.push(format!("Experiment ID: {experiment}"));
    }
    details.join("\n")
}

fn amount(component: &Value, name: &str) -> String {
    let conc = field(component, "Concentration");
    let unit = field(component, "Unit");
    if !conc.is_empty() && !unit.is_empty() {
        format!("{name}: {conc} {unit}")
    } else {
        name.to_string()
    }
}

/// First line of the notes, cut to a fixed number of characters.
fn notes_preview(notes: &str) -> String {
    let first = notes.lines().next().unwrap_or_default();
    if first.chars().count() > NOTES_PREVIEW_CHARS {
        let mut preview = first.chars().take(NOTES_PREVIEW_CHARS).collect::<String>();
        preview.push_str("...");
        preview
    } else {
        first.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_fields() {
        let value = json!({
            "metadata": {"created_timestamp": "2024-01-01T09:00:00.000Z"},
            "Sample": {
                "Label": "Ubiquitin",
                "Components": [
                    {"Name": "Ubq", "Isotopic labelling": "15N", "Concentration": 0.5, "Unit": "mM"},
                    {"Name": "DSS"}
                ]
            },
            "Buffer": {
                "Components": [{"name": "Tris", "Concentration": 20, "Unit": "mM"}],
                "Solvent": "custom",
                "Custom solvent": "95% H2O/5% D2O",
                "pH": 7.4,
                "Chemical shift reference": "DSS"
            },
            "NMR Tube": {"Diameter": "5 mm", "Type": "Shigemi", "SampleJet Rack Position": "A3"},
            "Users": ["ana", "ben"],
            "Notes": "first line\nsecond line"
        });
        let path = Utf8Path::new("/data/ds1/2024-01-01_090000_Ubiquitin.json");
        let summary = SampleSummary::extract(path, &value).unwrap();
        assert_eq!(summary.experiment, "ds1");
        assert_eq!(summary.label, "Ubiquitin");
        assert_eq!(summary.components, "Ubq (15N), DSS");
        assert_eq!(summary.components_tooltip, "Ubq: 0.5 mM [15N]\nDSS");
        assert_eq!(summary.buffer, "Tris, 95% H2O/5% D2O, pH 7.4");
        assert!(summary.buffer_tooltip.ends_with("Reference: DSS"));
        assert_eq!(summary.tube, "5 mm Shigemi");
        assert!(summary.tube_tooltip.contains("SampleJet Position: A3"));
        assert_eq!(summary.users, "ana, ben");
        assert_eq!(summary.notes, "first line");
        assert_eq!(summary.status, Some(SampleStatus::Active));
    }

    #[test]
    fn long_notes_are_truncated() {
        let preview = notes_preview(&"x".repeat(150));
        assert_eq!(preview.len(), NOTES_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn malformed_users_fail_extraction() {
        let value = json!({"metadata": {}, "Sample": {}, "Users": [1, 2]});
        assert!(SampleSummary::extract(Utf8Path::new("/x/a.json"), &value).is_err());
    }
}
