use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::domain::{SampleStatus, timestamp_serde};
use crate::error::KiraError;

pub const METADATA_KEY: &str = "metadata";
pub const LEGACY_METADATA_KEY: &str = "Metadata";
pub const SAMPLE_KEY: &str = "Sample";

/// Reserved bookkeeping fields of a sample document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(
        default,
        with = "timestamp_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "timestamp_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub modified_timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "timestamp_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub ejected_timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "deserialize_version",
        skip_serializing_if = "Option::is_none"
    )]
    pub schema_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One persisted sample record. Everything outside `metadata` is kept
/// verbatim in `payload` and written back untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleDocument {
    #[serde(default, alias = "Metadata")]
    pub metadata: DocumentMetadata,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl SampleDocument {
    pub fn from_payload(payload: Map<String, Value>) -> Self {
        let mut document = Self {
            metadata: DocumentMetadata::default(),
            payload,
        };
        document.payload.shift_remove(METADATA_KEY);
        document.payload.shift_remove(LEGACY_METADATA_KEY);
        document
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Label stored at `/Sample/Label`, if non-empty.
    pub fn label(&self) -> Option<&str> {
        self.payload
            .get(SAMPLE_KEY)
            .and_then(|sample| sample.get("Label"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|label| !label.is_empty())
    }

    pub fn set_label(&mut self, label: &str) {
        let sample = self
            .payload
            .entry(SAMPLE_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !sample.is_object() {
            *sample = Value::Object(Map::new());
        }
        if let Value::Object(map) = sample {
            map.insert("Label".to_string(), Value::String(label.to_string()));
        }
    }

    pub fn status(&self) -> SampleStatus {
        if self.metadata.ejected_timestamp.is_some() {
            SampleStatus::Ejected
        } else {
            SampleStatus::Active
        }
    }

    pub fn is_ejected(&self) -> bool {
        self.metadata.ejected_timestamp.is_some()
    }

    /// A draft copy with lifecycle timestamps stripped, ready to be saved
    /// as a new sample.
    pub fn duplicate(&self) -> Self {
        let mut draft = self.clone();
        draft.metadata.created_timestamp = None;
        draft.metadata.modified_timestamp = None;
        draft.metadata.ejected_timestamp = None;
        draft
    }
}

/// A JSON value has the sample document shape when it carries both the
/// bookkeeping object and the `Sample` section at the top level.
pub fn has_sample_shape(value: &Value) -> bool {
    let Some(map) = value.as_object() else {
        return false;
    };
    let has_metadata = map
        .get(METADATA_KEY)
        .or_else(|| map.get(LEGACY_METADATA_KEY))
        .map(Value::is_object)
        .unwrap_or(false);
    has_metadata && map.contains_key(SAMPLE_KEY)
}

/// Schema version as stored in `/metadata/schema_version`, `Null` when absent.
pub fn schema_version_of(value: &Value) -> Value {
    value
        .get(METADATA_KEY)
        .filter(|metadata| metadata.is_object())
        .and_then(|metadata| metadata.get("schema_version"))
        .cloned()
        .unwrap_or(Value::Null)
}

pub fn parse_document(path: &str, content: &str) -> Result<Value, KiraError> {
    serde_json::from_str(content).map_err(|err| KiraError::DocumentParse {
        path: path.to_string(),
        message: err.to_string(),
    })
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(version)) => Ok(Some(version)),
        Some(Value::Number(version)) => Ok(Some(version.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "schema_version must be a string, got {other}"
        ))),
    }
}
