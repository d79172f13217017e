//! In-memory [`VectorIndex`] implementation.
//!
//! Records live in an insertion-ordered map behind `std::sync::RwLock`.
//! Queries are brute-force cosine distance over every stored vector.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

use crate::embedding::{cosine_distance, embed_query, embed_texts, EmbeddingProvider};
use crate::models::UnitMetadata;

use super::{check_parallel, rank, Candidate, VectorIndex};

struct StoredRecord {
    document: String,
    metadata: serde_json::Map<String, serde_json::Value>,
    vector: Vec<f32>,
}

/// In-memory index for tests and embedding.
pub struct InMemoryIndex {
    name: String,
    provider: Arc<dyn EmbeddingProvider>,
    records: RwLock<IndexMap<String, StoredRecord>>,
}

impl InMemoryIndex {
    pub fn new(name: impl Into<String>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            records: RwLock::new(IndexMap::new()),
        }
    }

    /// Stored document text for `id`, if present.
    pub fn document(&self, id: &str) -> Option<String> {
        self.records
            .read()
            .ok()
            .and_then(|records| records.get(id).map(|r| r.document.clone()))
    }
}

fn metadata_map(metadata: &UnitMetadata) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::to_value(metadata)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("metadata did not serialize to an object"),
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn collection(&self) -> &str {
        &self.name
    }

    async fn upsert(
        &self,
        ids: &[String],
        documents: &[String],
        metadatas: &[UnitMetadata],
    ) -> Result<()> {
        check_parallel(ids, documents, metadatas)?;
        let vectors = embed_texts(self.provider.as_ref(), documents).await?;

        let mut staged = Vec::with_capacity(ids.len());
        for ((id, document), (metadata, vector)) in ids
            .iter()
            .zip(documents)
            .zip(metadatas.iter().zip(vectors))
        {
            staged.push((
                id.clone(),
                StoredRecord {
                    document: document.clone(),
                    metadata: metadata_map(metadata)?,
                    vector,
                },
            ));
        }

        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))?;
        for (id, record) in staged {
            records.insert(id, record);
        }
        Ok(())
    }

    async fn query(&self, query_text: &str, n_results: usize) -> Result<Vec<Candidate>> {
        let query_vec = embed_query(self.provider.as_ref(), query_text).await?;
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))?;

        let mut candidates: Vec<Candidate> = records
            .iter()
            .map(|(id, record)| Candidate {
                id: id.clone(),
                document: Some(record.document.clone()),
                metadata: Some(record.metadata.clone()),
                distance: Some(cosine_distance(&query_vec, &record.vector)),
            })
            .collect();
        rank(&mut candidates, n_results);
        Ok(candidates)
    }

    async fn count(&self) -> Result<u64> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))?;
        Ok(records.len() as u64)
    }
}
