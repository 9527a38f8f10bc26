use std::path::PathBuf;
use thiserror::Error;

use crate::data::SubjectId;

/// Errors raised while loading, windowing, splitting or scoring data.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("The required column '{0}' was not found in the input file. Please check spelling and case.")]
    MissingColumn(String),

    #[error("Window must contain exactly {expected} rows, got {found}")]
    WindowLength { expected: usize, found: usize },

    #[error("Column '{column}' value {value:?} is not an integer after removing scale descriptors")]
    GcsParse { column: String, value: String },

    #[error("Column '{column}' at line {line} holds an invalid value: {value:?}")]
    InvalidValue {
        column: String,
        line: usize,
        value: String,
    },

    #[error("Subject {0} is not present in the data dictionary")]
    UnknownSubject(SubjectId),

    #[error("{name} is invalid: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Metric is undefined: {0}")]
    UndefinedMetric(&'static str),

    #[error("Interrupted after {subjects} subjects; partial data dictionary written to {path:?}")]
    Interrupted { subjects: usize, path: PathBuf },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
