use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema mismatch at line {line}: {detail}")]
    SchemaMismatch { line: u64, detail: String },

    #[error("Field '{field}' is excluded from analysis ({status})")]
    ExcludedField { field: String, status: String },

    #[error("Field '{field}' is not numeric and cannot be aggregated with {func}")]
    NonNumericMeasure { field: String, func: String },

    #[error("Stage '{name}' not found")]
    StageNotFound { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
