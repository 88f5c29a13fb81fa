use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("failed to read sample file {path}: {message}")]
    DocumentRead { path: String, message: String },

    #[error("failed to parse sample file {path}: {message}")]
    DocumentParse { path: String, message: String },

    #[error("failed to write sample file {path}: {message}")]
    DocumentWrite { path: String, message: String },

    #[error("sample file not found: {0}")]
    DocumentNotFound(String),

    #[error("not a sample filename: {0}")]
    InvalidFilename(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid JSON pointer: {0}")]
    InvalidPointer(String),

    #[error("unknown migration operation: {0}")]
    UnknownOperation(String),

    #[error("rename_key: target key '{to}' already exists at path '{path}'")]
    #[diagnostic(help("the patch would overwrite existing data; fix the migration block"))]
    RenameConflict { path: String, to: String },

    #[error("migration cycle detected at schema version {0}")]
    MigrationCycle(String),

    #[error("failed to load migration patch file {path}: {message}")]
    MigrationLoad { path: String, message: String },

    #[error("sample is still active and cannot be deleted: {0}")]
    #[diagnostic(help("eject the sample first"))]
    SampleActive(String),

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("no sample available to absorb the selection: {0}")]
    NoReassignTarget(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
