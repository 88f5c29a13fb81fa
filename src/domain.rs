use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const SAMPLE_EXTENSION: &str = "json";
pub const DEFAULT_LABEL: &str = "Sample";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Active,
    Ejected,
    Unknown,
}

impl SampleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleStatus::Active => "active",
            SampleStatus::Ejected => "ejected",
            SampleStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SampleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Filename of a sample document: `YYYY-MM-DD_HHMMSS_<label>.json`.
///
/// The zero-padded date and time prefix makes lexicographic order of
/// filenames equal to chronological order of creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFilename {
    created: DateTime<Utc>,
    label: String,
}

impl SampleFilename {
    pub fn new(label: &str, created: DateTime<Utc>) -> Self {
        Self {
            created: created.trunc_subsecs(0),
            label: sanitize_label(label),
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for SampleFilename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}.{SAMPLE_EXTENSION}",
            self.created.format("%Y-%m-%d"),
            self.created.format("%H%M%S"),
            self.label
        )
    }
}

impl FromStr for SampleFilename {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || KiraError::InvalidFilename(value.to_string());
        let base = value
            .strip_suffix(&format!(".{SAMPLE_EXTENSION}"))
            .ok_or_else(invalid)?;
        let parts = base.split('_').collect::<Vec<_>>();
        if parts.len() < 3 {
            return Err(invalid());
        }
        let created =
            NaiveDateTime::parse_from_str(&format!("{} {}", parts[0], parts[1]), "%Y-%m-%d %H%M%S")
                .map_err(|_| invalid())?
                .and_utc();
        Ok(Self {
            created,
            label: parts[2..].join("_"),
        })
    }
}

pub fn generate_filename(label: &str, created: DateTime<Utc>) -> String {
    SampleFilename::new(label, created).to_string()
}

pub fn parse_filename(filename: &str) -> Option<(DateTime<Utc>, String)> {
    let parsed = filename.parse::<SampleFilename>().ok()?;
    Some((parsed.created, parsed.label))
}

/// Keeps alphanumerics, underscore and hyphen; spaces become underscores.
pub fn sanitize_label(label: &str) -> String {
    let safe = label
        .replace(' ', "_")
        .chars()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-')
        .collect::<String>();
    if safe.is_empty() {
        DEFAULT_LABEL.to_string()
    } else {
        safe
    }
}

/// Current UTC time at the millisecond precision used on disk.
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn display_timestamp(value: &DateTime<Utc>) -> String {
    value.format(DISPLAY_FORMAT).to_string()
}

/// Accepts RFC 3339 as well as the bare `YYYY-MM-DDTHH:MM:SS[.fff][Z]` form,
/// which is read as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, KiraError> {
    let trimmed = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| KiraError::InvalidTimestamp(value.to_string()))
}

/// Serde adapter for optional on-disk timestamps. Empty strings read as absent.
pub mod timestamp_serde {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&super::format_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(value) => super::parse_timestamp(value)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}
