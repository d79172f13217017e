//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the boundary between the pipeline and the
//! embedding store. An index owns its embedding provider: callers hand it
//! documents and query text, never vectors.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorIndex::upsert) | Insert or replace a batch of records, all or nothing |
//! | [`query`](VectorIndex::query) | Nearest neighbors of a query text, ascending distance |
//! | [`count`](VectorIndex::count) | Number of records in the collection |
//!
//! Two backends are provided: [`memory::InMemoryIndex`] for tests and
//! embedding in other programs, and [`sqlite::SqliteIndex`] for the
//! persistent on-disk index used by the CLI.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::UnitMetadata;

/// A nearest-neighbor candidate returned by [`VectorIndex::query`].
///
/// Fields are optional because an index may hold records written by other
/// tools; the retrieval stage supplies defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: String,
    pub document: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Cosine distance; lower is more similar.
    pub distance: Option<f64>,
}

/// A named collection of embedded documents.
///
/// Implementations must be `Send + Sync` to work with async runtimes.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Name of the collection this handle points at.
    fn collection(&self) -> &str;

    /// Insert or replace records given as parallel arrays.
    ///
    /// Either every record is stored or none is. Within one call, a
    /// repeated id keeps its last occurrence.
    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[UnitMetadata],
    ) -> Result<()>;

    /// Return up to `n_results` candidates ordered by ascending distance.
    async fn query(&self, query_text: &str, n_results: usize) -> Result<Vec<Candidate>>;

    /// Number of records in the collection.
    async fn count(&self) -> Result<u64>;
}

/// Reject parallel arrays of different lengths.
pub(crate) fn check_parallel(
    ids: &[String],
    documents: &[String],
    metadatas: &[UnitMetadata],
) -> Result<()> {
    if ids.len() != documents.len() || ids.len() != metadatas.len() {
        anyhow::bail!(
            "upsert arrays differ in length: {} ids, {} documents, {} metadatas",
            ids.len(),
            documents.len(),
            metadatas.len()
        );
    }
    Ok(())
}

/// Sort candidates by ascending distance, ties broken by id.
pub(crate) fn rank(candidates: &mut Vec<Candidate>, n_results: usize) {
    candidates.sort_by(|a, b| {
        a.distance
            .unwrap_or(f64::INFINITY)
            .partial_cmp(&b.distance.unwrap_or(f64::INFINITY))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(n_results);
}
