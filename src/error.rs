//! Error taxonomy for the ingestion and retrieval stages.
//!
//! Missing optional fields never surface here: they are resolved to
//! defaults where the records are read. Everything below is fatal for the
//! operation that raised it.

use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The archive could not be opened or its structure is not a JSON array
/// of user objects.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open archive {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read archive: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed archive: {0}")]
    Malformed(String),

    #[error("malformed user record #{index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// The redaction capability failed. Text that could not be redacted must
/// never reach the index.
#[derive(Debug, Error)]
pub enum RedactionError {
    #[error("redaction service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("redaction service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("invalid redaction response: {0}")]
    InvalidResponse(String),
}

/// A batch upsert was rejected by the index. Batches committed before this
/// one stay committed.
#[derive(Debug, Error)]
#[error("failed to commit batch #{batch} ({units} records): {source}")]
pub struct CommitError {
    pub batch: usize,
    pub units: usize,
    #[source]
    pub source: BoxError,
}

/// A search could not be served.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid search request: {0}")]
    InvalidRequest(String),

    #[error("search failed for query {query:?}: {source}")]
    Query {
        query: String,
        #[source]
        source: BoxError,
    },
}

/// Any fatal error raised while ingesting an archive.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("failed to redact record {record_id} in conversation {conversation_id}: {source}")]
    Redaction {
        record_id: String,
        conversation_id: String,
        #[source]
        source: RedactionError,
    },

    #[error(transparent)]
    Commit(#[from] CommitError),
}
