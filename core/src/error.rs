use crate::fusion::SignalKind;
use crate::index::DocId;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SearchError>;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Persisted posting data for one term could not be decoded. Other terms are unaffected.
    #[error("posting data for term `{term}` is corrupt: {reason}")]
    IndexCorruption { term: String, reason: String },

    #[error("document `{doc_id}` not found")]
    DocumentNotFound { doc_id: DocId },

    #[error("storage I/O failure: {0}")]
    StorageIo(#[from] sled::Error),

    #[error("failed to encode index record: {0}")]
    Encode(#[from] bincode::Error),

    #[error("{signal} lookup exceeded its {timeout:?} deadline")]
    QueryTimeout { signal: SignalKind, timeout: Duration },

    #[error("query has no usable terms")]
    EmptyQuery,

    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("every search signal failed")]
    AllSignalsFailed,
}

impl SearchError {
    pub fn corruption(term: impl Into<String>, reason: impl ToString) -> Self {
        Self::IndexCorruption { term: term.into(), reason: reason.to_string() }
    }

    pub fn not_found(doc_id: impl Into<DocId>) -> Self {
        Self::DocumentNotFound { doc_id: doc_id.into() }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }
}
