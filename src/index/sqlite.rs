//! SQLite-backed [`VectorIndex`] implementation.
//!
//! Documents, metadata and embedding BLOBs share one `records` table keyed
//! by `(collection, id)`. A batch upsert runs in a single transaction.
//! Queries load the collection's vectors and rank them by cosine distance
//! in Rust.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{
    blob_to_vec, cosine_distance, embed_query, embed_texts, vec_to_blob, EmbeddingProvider,
};
use crate::migrate;
use crate::models::UnitMetadata;

use super::{check_parallel, rank, Candidate, VectorIndex};

/// SQLite implementation of the [`VectorIndex`] trait.
pub struct SqliteIndex {
    pool: SqlitePool,
    name: String,
    provider: Arc<dyn EmbeddingProvider>,
}

impl SqliteIndex {
    /// Connect to the configured database and open its collection.
    pub async fn open(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let pool = db::connect(config).await?;
        Self::get_or_create_collection(pool, &config.index.collection, provider).await
    }

    /// Open collection `name`, creating it (and the schema) if needed.
    ///
    /// A collection is pinned to the embedding model and dimensionality it
    /// was created with; opening it with a different provider fails.
    pub async fn get_or_create_collection(
        pool: SqlitePool,
        name: &str,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        migrate::migrate(&pool).await?;

        sqlx::query(
            r#"
            INSERT INTO collections (name, model, dims, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(provider.model_name())
        .bind(provider.dims() as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&pool)
        .await?;

        let row = sqlx::query("SELECT model, dims FROM collections WHERE name = ?")
            .bind(name)
            .fetch_one(&pool)
            .await?;
        let model: String = row.get("model");
        let dims: i64 = row.get("dims");
        if model != provider.model_name() || dims != provider.dims() as i64 {
            bail!(
                "Collection '{}' was built with {} ({} dims) but the configured provider is {} ({} dims)",
                name,
                model,
                dims,
                provider.model_name(),
                provider.dims()
            );
        }

        Ok(Self {
            pool,
            name: name.to_string(),
            provider,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorIndex for SqliteIndex {
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
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        for (((id, document), metadata), vector) in
            ids.iter().zip(documents).zip(metadatas).zip(&vectors)
        {
            sqlx::query(
                r#"
                INSERT INTO records (collection, id, document, metadata_json, embedding, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    document = excluded.document,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&self.name)
            .bind(id)
            .bind(document)
            .bind(serde_json::to_string(metadata)?)
            .bind(vec_to_blob(vector))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn query(&self, query_text: &str, n_results: usize) -> Result<Vec<Candidate>> {
        let query_vec = embed_query(self.provider.as_ref(), query_text).await?;

        let rows = sqlx::query(
            "SELECT id, document, metadata_json, embedding FROM records WHERE collection = ?",
        )
        .bind(&self.name)
        .fetch_all(&self.pool)
        .await?;

        let mut candidates: Vec<Candidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                Candidate {
                    id: row.get("id"),
                    document: row.get("document"),
                    metadata: serde_json::from_str(&metadata_json).ok(),
                    distance: Some(cosine_distance(&query_vec, &blob_to_vec(&blob))),
                }
            })
            .collect();
        rank(&mut candidates, n_results);

        Ok(candidates)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}
