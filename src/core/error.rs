use std::path::PathBuf;

/// Errors raised by the annotation model.
///
/// Lenient paths (loading a file, editing a row with bad bounds) never surface
/// these; they are reserved for programmatic misuse and data-integrity refusals.
#[derive(Debug, thiserror::Error)]
pub enum AnnotationError {
    #[error("invalid event: {0}")]
    UnknownEvent(String),

    #[error("{event} cannot span frames {f0}..={f1}")]
    InvalidBounds { event: String, f0: usize, f1: usize },

    #[error("unknown event group: {0}")]
    UnknownGroup(String),

    #[error("row {index} of group {group} is no longer {expected}")]
    StaleReference {
        group: String,
        index: usize,
        expected: String,
    },

    #[error("annotations overlap inside a non-overlapping group, cannot save")]
    OverlapConflict,

    #[error("malformed event configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnnotationError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AnnotationError::Io {
            path: path.into(),
            source,
        }
    }
}
