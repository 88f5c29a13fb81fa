use std::fmt;
use std::fs;
use std::str::FromStr;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::document::schema_version_of;
use crate::error::KiraError;

const WILDCARD: &str = "*";
const OPERATIONS: [&str; 5] = ["set", "remove", "rename_key", "map", "move"];

/// JSON Pointer (RFC 6901 escaping) where a `*` segment matches every
/// element of an array at that level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JsonPointer {
    segments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Key(String),
    Index(usize),
}

impl JsonPointer {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Concrete locations matching this pointer. Missing intermediate
    /// segments produce no matches.
    fn resolve(&self, root: &Value) -> Vec<Vec<Step>> {
        let mut matches = Vec::new();
        let mut prefix = Vec::new();
        walk(root, &self.segments, &mut prefix, &mut matches);
        matches
    }
}

fn walk(value: &Value, segments: &[String], prefix: &mut Vec<Step>, out: &mut Vec<Vec<Step>>) {
    let Some((segment, rest)) = segments.split_first() else {
        return;
    };
    if segment == WILDCARD {
        if let Value::Array(items) = value {
            for (index, item) in items.iter().enumerate() {
                prefix.push(Step::Index(index));
                if rest.is_empty() {
                    out.push(prefix.clone());
                } else {
                    walk(item, rest, prefix, out);
                }
                prefix.pop();
            }
        }
    } else if let Some(child) = value.as_object().and_then(|map| map.get(segment)) {
        prefix.push(Step::Key(segment.clone()));
        if rest.is_empty() {
            out.push(prefix.clone());
        } else {
            walk(child, rest, prefix, out);
        }
        prefix.pop();
    }
}

fn value_mut<'a>(root: &'a mut Value, steps: &[Step]) -> Option<&'a mut Value> {
    steps.iter().try_fold(root, |current, step| match step {
        Step::Key(key) => current.as_object_mut()?.get_mut(key),
        Step::Index(index) => current.as_array_mut()?.get_mut(*index),
    })
}

/// Walks to the parent of `segments`, replacing anything that is not an
/// object with an empty object on the way.
fn ensure_parent<'a>(
    root: &'a mut Value,
    segments: &[String],
) -> Option<&'a mut Map<String, Value>> {
    let (_, parents) = segments.split_last()?;
    let mut current = root;
    for segment in parents {
        let map = current.as_object_mut()?;
        let child = map
            .entry(segment.as_str())
            .or_insert_with(|| Value::Object(Map::new()));
        if !child.is_object() {
            *child = Value::Object(Map::new());
        }
        current = child;
    }
    current.as_object_mut()
}

impl FromStr for JsonPointer {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Ok(Self {
                segments: Vec::new(),
            });
        }
        let rest = value
            .strip_prefix('/')
            .ok_or_else(|| KiraError::InvalidPointer(format!("must start with '/': {value}")))?;
        let segments = rest
            .split('/')
            .map(|part| part.replace("~1", "/").replace("~0", "~"))
            .collect();
        Ok(Self { segments })
    }
}

impl TryFrom<String> for JsonPointer {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JsonPointer> for String {
    fn from(pointer: JsonPointer) -> Self {
        pointer.to_string()
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    Set {
        path: JsonPointer,
        value: Value,
    },
    Remove {
        path: JsonPointer,
    },
    RenameKey {
        path: JsonPointer,
        to: String,
    },
    Map {
        path: JsonPointer,
        from: Value,
        to: Value,
    },
    Move {
        path: JsonPointer,
        to: JsonPointer,
    },
}

impl PatchOp {
    pub fn name(&self) -> &'static str {
        match self {
            PatchOp::Set { .. } => "set",
            PatchOp::Remove { .. } => "remove",
            PatchOp::RenameKey { .. } => "rename_key",
            PatchOp::Map { .. } => "map",
            PatchOp::Move { .. } => "move",
        }
    }

    pub fn apply(&self, document: &mut Value) -> Result<(), KiraError> {
        match self {
            PatchOp::Set { path, value } => {
                let key = last_segment(path)?;
                let parent = ensure_parent(document, path.segments())
                    .ok_or_else(|| KiraError::InvalidPointer(path.to_string()))?;
                parent.insert(key.to_string(), value.clone());
            }
            PatchOp::Remove { path } => {
                for location in path.resolve(document) {
                    let Some((Step::Key(key), parent)) = location.split_last() else {
                        continue;
                    };
                    if let Some(map) = value_mut(document, parent).and_then(Value::as_object_mut) {
                        map.shift_remove(key);
                    }
                }
            }
            PatchOp::RenameKey { path, to } => {
                for location in path.resolve(document) {
                    let Some((Step::Key(key), parent)) = location.split_last() else {
                        continue;
                    };
                    let Some(map) = value_mut(document, parent).and_then(Value::as_object_mut)
                    else {
                        continue;
                    };
                    if map.contains_key(to) {
                        return Err(KiraError::RenameConflict {
                            path: path.to_string(),
                            to: to.clone(),
                        });
                    }
                    if let Some(value) = map.shift_remove(key) {
                        map.insert(to.clone(), value);
                    }
                }
            }
            PatchOp::Map { path, from, to } => {
                for location in path.resolve(document) {
                    if let Some(value) = value_mut(document, &location) {
                        if value == from {
                            *value = to.clone();
                        }
                    }
                }
            }
            PatchOp::Move { path, to } => {
                let Some(location) = path.resolve(document).into_iter().next() else {
                    return Ok(());
                };
                let key = last_segment(to)?;
                let Some((last, parent)) = location.split_last() else {
                    return Ok(());
                };
                let taken = match (value_mut(document, parent), last) {
                    (Some(Value::Object(map)), Step::Key(key)) => map.shift_remove(key),
                    (Some(Value::Array(items)), Step::Index(index)) if *index < items.len() => {
                        Some(items.remove(*index))
                    }
                    _ => None,
                };
                if let Some(value) = taken {
                    let destination = ensure_parent(document, to.segments())
                        .ok_or_else(|| KiraError::InvalidPointer(to.to_string()))?;
                    destination.insert(key.to_string(), value);
                }
            }
        }
        Ok(())
    }
}

fn last_segment(path: &JsonPointer) -> Result<&str, KiraError> {
    path.segments()
        .last()
        .map(String::as_str)
        .ok_or_else(|| KiraError::InvalidPointer("path must not be empty".to_string()))
}

/// Operations upgrading documents from `from_version` to the next version.
/// `from_version: null` matches documents that carry no version at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationBlock {
    #[serde(default)]
    pub from_version: Value,
    pub operations: Vec<PatchOp>,
}

#[derive(Deserialize)]
struct RawBlock {
    #[serde(default)]
    from_version: Value,
    #[serde(default)]
    operations: Vec<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct Migrator {
    blocks: Vec<MigrationBlock>,
}

impl Migrator {
    pub fn new(blocks: Vec<MigrationBlock>) -> Self {
        Self { blocks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A missing patch file is not an error: it yields a migrator that
    /// never changes anything.
    pub fn load(path: &Utf8Path) -> Result<Self, KiraError> {
        if !path.as_std_path().exists() {
            debug!(path = %path, "no migration patch file; migrations disabled");
            return Ok(Self::empty());
        }
        let content =
            fs::read_to_string(path.as_std_path()).map_err(|err| KiraError::MigrationLoad {
                path: path.to_string(),
                message: err.to_string(),
            })?;
        Self::from_json(&content).map_err(|err| match err {
            KiraError::MigrationLoad { message, .. } => KiraError::MigrationLoad {
                path: path.to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, KiraError> {
        let load_error = |message: String| KiraError::MigrationLoad {
            path: "<inline>".to_string(),
            message,
        };
        let raw: Vec<RawBlock> =
            serde_json::from_str(content).map_err(|err| load_error(err.to_string()))?;
        let mut blocks = Vec::with_capacity(raw.len());
        for block in raw {
            let mut operations = Vec::with_capacity(block.operations.len());
            for op in block.operations {
                let name = op
                    .get("op")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if !OPERATIONS.contains(&name.as_str()) {
                    return Err(KiraError::UnknownOperation(name));
                }
                let op: PatchOp = serde_json::from_value(op)
                    .map_err(|err| load_error(format!("{name}: {err}")))?;
                operations.push(op);
            }
            blocks.push(MigrationBlock {
                from_version: block.from_version,
                operations,
            });
        }
        Ok(Self { blocks })
    }

    pub fn blocks(&self) -> &[MigrationBlock] {
        &self.blocks
    }

    /// Applies chained blocks in place until no block matches the document's
    /// version. Returns the number of blocks applied.
    pub fn migrate(&self, document: &mut Value) -> Result<usize, KiraError> {
        let mut visited = Vec::new();
        loop {
            let version = schema_version_of(document);
            let Some(block) = self
                .blocks
                .iter()
                .find(|block| block.from_version == version)
            else {
                return Ok(visited.len());
            };
            if visited.contains(&version) {
                return Err(KiraError::MigrationCycle(version.to_string()));
            }
            debug!(
                from_version = %version,
                operations = block.operations.len(),
                "applying migration block"
            );
            for op in &block.operations {
                op.apply(document)?;
            }
            visited.push(version);
        }
    }
}
