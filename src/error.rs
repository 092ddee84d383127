use thiserror::Error;

/// Conditions raised by the study engine.
///
/// None of these abort a pipeline: an `Err` means the step was skipped and the
/// data was left as it was (or the affected aggregate cell is missing).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StudyError {
    #[error("schema mismatch in {operation}: {details}")]
    SchemaMismatch {
        operation: &'static str,
        details: String,
    },
    #[error("{operation}: column '{column}' not found")]
    ColumnNotFound {
        operation: &'static str,
        column: String,
    },
    #[error("configuration error: {0}")]
    ConfigurationError(String),
    #[error("empty input: {0}")]
    EmptyInput(String),
}

/// Log a recoverable condition and hand it back for the caller's diagnostics.
pub(crate) fn reported(err: StudyError) -> StudyError {
    log::warn!("{err}");
    err
}
