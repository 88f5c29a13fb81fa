use std::fs;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::KiraError;
use crate::fs_util::{experiment_number, list_dir, modified_utc};

/// Parameter file written when an experiment is set up.
pub const DEFINITION_FILE: &str = "acqu";
/// Parameter file written once acquisition has started.
pub const ACQUIRED_FILE: &str = "acqus";

const FALLBACK_SUMMARY: &str = "NMR experiment";

static STAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\$\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}:\d{2}(?:\.\d+)?)(?:\s+([+-]\d{4}))?",
    )
    .unwrap()
});

/// The handful of values read from an `acqus` file. Every field is
/// optional; a missing key never fails the parse.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionParameters {
    pub started_at: Option<DateTime<Utc>>,
    pub pulse_program: Option<String>,
    pub nucleus: Option<String>,
    pub scans: Option<u32>,
    pub holder: Option<u32>,
    pub dimensions: Option<u8>,
}

impl AcquisitionParameters {
    pub fn parse(content: &str) -> Self {
        let mut params = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if params.started_at.is_none() {
                if let Some(stamp) = parse_stamp_line(line) {
                    params.started_at = Some(stamp);
                    continue;
                }
            }
            let Some((key, value)) = line
                .strip_prefix("##$")
                .and_then(|rest| rest.split_once('='))
            else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "PULPROG" => params.pulse_program = non_empty(strip_brackets(value)),
                "NUC1" => params.nucleus = non_empty(strip_brackets(value)),
                "NS" => params.scans = value.parse().ok(),
                "HOLDER" => params.holder = value.parse().ok(),
                "PARMODE" => {
                    params.dimensions = value
                        .parse::<u8>()
                        .ok()
                        .and_then(|mode| mode.checked_add(1));
                }
                _ => {}
            }
        }
        params
    }

    pub fn read(path: &Utf8Path) -> Result<Self, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        Ok(Self::parse(&content))
    }

    /// `"zg30, 1H, 16 scans"`, or a generic label when nothing is known.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(pulse_program) = &self.pulse_program {
            parts.push(pulse_program.clone());
        }
        if let Some(nucleus) = &self.nucleus {
            parts.push(nucleus.clone());
        }
        if let Some(scans) = self.scans {
            parts.push(format!("{scans} scans"));
        }
        if parts.is_empty() {
            FALLBACK_SUMMARY.to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// `$$ 2023-10-11 11:04:48.196 +0100  user@host`. Without an offset the
/// stamp is taken as UTC.
fn parse_stamp_line(line: &str) -> Option<DateTime<Utc>> {
    let captures = STAMP_RE.captures(line)?;
    let local = format!("{} {}", &captures[1], &captures[2]);
    match captures.get(3) {
        Some(offset) => {
            DateTime::parse_from_str(&format!("{local} {}", offset.as_str()), "%Y-%m-%d %H:%M:%S%.f %z")
                .ok()
                .map(|stamp| stamp.with_timezone(&Utc))
        }
        None => NaiveDateTime::parse_from_str(&local, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc()),
    }
}

fn strip_brackets(value: &str) -> &str {
    value.trim_start_matches('<').trim_end_matches('>').trim()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Declared,
    FileModified,
}

/// Snapshot of one acquired experiment, taken at scan time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentRecord {
    pub number: u32,
    pub directory: Utf8PathBuf,
    pub started_at: DateTime<Utc>,
    pub timestamp_source: TimestampSource,
    pub pulse_program: Option<String>,
    pub nucleus: Option<String>,
    pub scans: Option<u32>,
    pub holder: Option<u32>,
    pub dimensions: Option<u8>,
}

impl ExperimentRecord {
    /// `None` for directories that are not numbered experiments or have
    /// not been acquired yet.
    pub fn read(dir: &Utf8Path) -> Result<Option<Self>, KiraError> {
        let Some(number) = experiment_number(dir) else {
            return Ok(None);
        };
        let definition = dir.join(DEFINITION_FILE);
        let acquired = dir.join(ACQUIRED_FILE);
        if !definition.as_std_path().is_file() || !acquired.as_std_path().is_file() {
            return Ok(None);
        }
        let params = AcquisitionParameters::read(&acquired)?;
        let (started_at, timestamp_source) = match params.started_at {
            Some(stamp) => (stamp, TimestampSource::Declared),
            None => {
                debug!(path = %acquired, "no acquisition stamp; using file modification time");
                (modified_utc(&acquired)?, TimestampSource::FileModified)
            }
        };
        Ok(Some(Self {
            number,
            directory: dir.to_path_buf(),
            started_at,
            timestamp_source,
            pulse_program: params.pulse_program,
            nucleus: params.nucleus,
            scans: params.scans,
            holder: params.holder,
            dimensions: params.dimensions,
        }))
    }

    pub fn summary(&self) -> String {
        AcquisitionParameters {
            started_at: Some(self.started_at),
            pulse_program: self.pulse_program.clone(),
            nucleus: self.nucleus.clone(),
            scans: self.scans,
            holder: self.holder,
            dimensions: self.dimensions,
        }
        .summary()
    }
}

/// Acquired experiments of a dataset directory, ordered by number.
/// Experiments that fail to read are logged and skipped.
pub fn discover_experiments(dataset_dir: &Utf8Path) -> Result<Vec<ExperimentRecord>, KiraError> {
    if !dataset_dir.as_std_path().is_dir() {
        return Ok(Vec::new());
    }
    let mut records = Vec::new();
    for dir in list_dir(dataset_dir)?.dirs {
        match ExperimentRecord::read(&dir) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(err) => warn!(path = %dir, error = %err, "skipping unreadable experiment"),
        }
    }
    records.sort_by_key(|record| record.number);
    Ok(records)
}

/// True when one of `dirs` is a numbered experiment holding a definition
/// file, acquired or not.
pub fn has_experiment_dir(dirs: &[Utf8PathBuf]) -> bool {
    dirs.iter().any(|dir| {
        experiment_number(dir).is_some() && dir.join(DEFINITION_FILE).as_std_path().exists()
    })
}
