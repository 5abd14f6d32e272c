//! Error taxonomy for the loader.

use thiserror::Error;

use crate::geometry::Index;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid index {index:?} at level {level}: {reason}")]
    InvalidIndex {
        index: Index,
        level: u32,
        reason: String,
    },

    #[error("reader failed: {0}")]
    ReaderError(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// The value handed back by `next_view`: either a populated view or an error tagged
/// with the request that triggered it.
pub struct RequestOutcome<V> {
    pub level: u32,
    pub index: Index,
    pub result: Result<V, LoaderError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_index_message() {
        let err = LoaderError::InvalidIndex {
            index: vec![3, 3],
            level: 0,
            reason: "out of range".into(),
        };
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn reader_error_from_boxed() {
        let boxed: Box<dyn std::error::Error + Send + Sync> =
            Box::new(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        let err: LoaderError = boxed.into();
        assert!(matches!(err, LoaderError::ReaderError(_)));
    }
}
