//! Ingestion pipeline orchestration.
//!
//! Coordinates the write path: archive reader → flattening → redaction →
//! batched commit to the index. The pipeline is pull-based and sequential.
//! One user record is read at a time, every unit is redacted before it is
//! buffered, and at most one batch is in flight. Commit order therefore
//! equals flatten order.
//!
//! Any redaction or commit failure aborts the run. Batches committed
//! before the failure stay committed and are reflected in the run's
//! [`IngestStats`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{CommitError, PipelineError, SourceError};
use crate::extract;
use crate::flatten::flatten_conversation;
use crate::index::sqlite::SqliteIndex;
use crate::index::VectorIndex;
use crate::models::{FlattenedUnit, IngestStats, RedactedUnit, UserRecord};
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress, ProgressMode};
use crate::redact::{self, Redactor};

/// Default number of units per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Accumulates redacted units and commits them in fixed-size batches.
///
/// Owns the in-memory batch exclusively; it is cleared only after the
/// index accepts it. Also keeps the run's counters.
pub struct BatchCommitter {
    index: Arc<dyn VectorIndex>,
    reporter: Arc<dyn IngestProgressReporter>,
    batch: Vec<RedactedUnit>,
    flushes: usize,
    stats: IngestStats,
}

impl BatchCommitter {
    pub fn new(index: Arc<dyn VectorIndex>, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            index,
            reporter: Arc::new(NoProgress),
            batch: Vec::with_capacity(batch_size),
            flushes: 0,
            stats: IngestStats {
                batch_size,
                ..IngestStats::default()
            },
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IngestProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn record_user(&mut self) {
        self.stats.users_processed += 1;
    }

    pub fn record_conversation(&mut self, units: usize) {
        self.stats.conversations_processed += 1;
        self.stats.messages_transformed += units as u64;
    }

    /// Buffer a unit, flushing once the batch is full.
    pub async fn push(&mut self, unit: RedactedUnit) -> Result<(), CommitError> {
        self.batch.push(unit);
        if self.batch.len() >= self.stats.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush any residual partial batch and return the final counters.
    pub async fn finish(&mut self) -> Result<IngestStats, CommitError> {
        if !self.batch.is_empty() {
            self.flush().await?;
        }
        Ok(self.stats.clone())
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Number of successful flushes so far.
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Units buffered but not yet committed.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    async fn flush(&mut self) -> Result<(), CommitError> {
        let batch_no = self.flushes + 1;
        let units = self.batch.len();

        let ids: Vec<String> = self.batch.iter().map(|u| u.record_id.clone()).collect();
        let documents: Vec<String> = self.batch.iter().map(|u| u.text.clone()).collect();
        let metadatas: Vec<_> = self.batch.iter().map(|u| u.metadata.clone()).collect();

        if let Err(e) = self.index.upsert(&ids, &documents, &metadatas).await {
            tracing::error!(
                batch = batch_no,
                units,
                collection = self.index.collection(),
                error = %e,
                "batch upsert failed"
            );
            return Err(CommitError {
                batch: batch_no,
                units,
                source: e.into(),
            });
        }

        self.batch.clear();
        self.flushes = batch_no;
        self.stats.messages_upserted += units as u64;
        tracing::info!(
            batch = batch_no,
            units,
            upserted = self.stats.messages_upserted,
            "batch committed"
        );
        self.reporter.report(IngestProgressEvent::Flushed {
            batch: batch_no,
            units,
            upserted: self.stats.messages_upserted,
        });
        Ok(())
    }
}

/// The write path, wired to explicit redaction and index dependencies.
pub struct Pipeline {
    redactor: Arc<dyn Redactor>,
    committer: BatchCommitter,
    reporter: Arc<dyn IngestProgressReporter>,
}

impl Pipeline {
    pub fn new(
        redactor: Arc<dyn Redactor>,
        index: Arc<dyn VectorIndex>,
        batch_size: usize,
    ) -> Self {
        Self {
            redactor,
            committer: BatchCommitter::new(index, batch_size),
            reporter: Arc::new(NoProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn IngestProgressReporter>) -> Self {
        self.committer = self.committer.with_reporter(reporter.clone());
        self.reporter = reporter;
        self
    }

    /// Counters so far. After a failed run this reflects exactly the
    /// batches that were committed.
    pub fn stats(&self) -> &IngestStats {
        self.committer.stats()
    }

    pub fn flushes(&self) -> usize {
        self.committer.flushes()
    }

    /// Drain `records`, committing every unit, and return the run summary.
    pub async fn ingest<I>(&mut self, records: I) -> Result<IngestStats, PipelineError>
    where
        I: IntoIterator<Item = Result<UserRecord, SourceError>>,
    {
        for record in records {
            let user = record?;
            self.ingest_user(&user).await?;
        }
        let stats = self.committer.finish().await?;
        tracing::info!(
            users = stats.users_processed,
            conversations = stats.conversations_processed,
            transformed = stats.messages_transformed,
            upserted = stats.messages_upserted,
            "ingestion complete"
        );
        Ok(stats)
    }

    async fn ingest_user(&mut self, user: &UserRecord) -> Result<(), PipelineError> {
        self.committer.record_user();
        tracing::debug!(
            user_id = %user.user_id,
            conversations = user.conversations.len(),
            "processing user"
        );

        for conversation in &user.conversations {
            let units = flatten_conversation(&user.user_id, &user.email, conversation);
            self.committer.record_conversation(units.len());

            for unit in units {
                let text = self.redactor.redact(&unit.text).await.map_err(|source| {
                    PipelineError::Redaction {
                        record_id: unit.record_id.clone(),
                        conversation_id: conversation.conversation_id.clone(),
                        source,
                    }
                })?;
                self.committer
                    .push(FlattenedUnit { text, ..unit })
                    .await?;
            }
        }

        let stats = self.committer.stats();
        self.reporter.report(IngestProgressEvent::Ingesting {
            users: stats.users_processed,
            units: stats.messages_transformed,
        });
        Ok(())
    }
}

/// `sieve ingest`: run the pipeline over an archive into the configured index.
pub async fn run_ingest(
    config: &Config,
    archive: &Path,
    batch_size: Option<usize>,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    let batch_size = batch_size.unwrap_or(config.ingest.batch_size);
    if batch_size == 0 {
        bail!("batch size must be > 0");
    }

    let records = extract::open_archive(archive).map_err(|e| {
        tracing::error!(archive = %archive.display(), error = %e, "cannot open archive");
        e
    })?;

    let provider: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let redactor: Arc<dyn Redactor> = Arc::from(redact::create_redactor(&config.redaction)?);
    let index = Arc::new(SqliteIndex::open(config, provider).await?);

    let mut pipeline = Pipeline::new(redactor, index.clone(), batch_size)
        .with_reporter(Arc::from(progress.reporter()));

    let span = tracing::info_span!(
        "ingest",
        run_id = %Uuid::new_v4(),
        archive = %archive.display(),
        collection = %config.index.collection,
    );
    let result = pipeline.ingest(records).instrument(span).await;
    index.pool().close().await;

    let stats = match result {
        Ok(stats) => stats,
        Err(e) => {
            let partial = pipeline.stats();
            tracing::error!(
                archive = %archive.display(),
                upserted = partial.messages_upserted,
                error = %e,
                "ingestion aborted"
            );
            eprintln!(
                "ingest aborted after {} committed messages ({} batches)",
                partial.messages_upserted,
                pipeline.flushes()
            );
            return Err(e.into());
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("ingest {}", archive.display());
        println!("  users_processed: {}", stats.users_processed);
        println!("  conversations_processed: {}", stats.conversations_processed);
        println!("  messages_transformed: {}", stats.messages_transformed);
        println!("  messages_upserted: {}", stats.messages_upserted);
        println!("  batch_size: {}", stats.batch_size);
        println!("ok");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UnitMetadata;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records each upsert call; fails the call numbered `fail_on` (1-based).
    #[derive(Default)]
    struct RecordingIndex {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<usize>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        fn collection(&self) -> &str {
            "recording"
        }
        async fn upsert(
            &self,
            ids: &[String],
            _documents: &[String],
            _metadatas: &[UnitMetadata],
        ) -> anyhow::Result<()> {
            let mut calls = self.calls.lock().unwrap();
            if self.fail_on == Some(calls.len() + 1) {
                anyhow::bail!("index unavailable");
            }
            calls.push(ids.to_vec());
            Ok(())
        }
        async fn query(
            &self,
            _query_text: &str,
            _n_results: usize,
        ) -> anyhow::Result<Vec<crate::index::Candidate>> {
            Ok(Vec::new())
        }
        async fn count(&self) -> anyhow::Result<u64> {
            Ok(self.calls.lock().unwrap().iter().map(|c| c.len() as u64).sum())
        }
    }

    fn unit(id: &str) -> RedactedUnit {
        FlattenedUnit {
            record_id: id.to_string(),
            text: format!("[User] {}", id),
            metadata: UnitMetadata {
                user_id: "u".to_string(),
                user_email: String::new(),
                conversation_id: "c".to_string(),
                create_time: None,
            },
        }
    }

    #[tokio::test]
    async fn test_five_units_batch_of_two() {
        let index = Arc::new(RecordingIndex::default());
        let mut committer = BatchCommitter::new(index.clone(), 2);

        let mut flushes_after_push = Vec::new();
        for id in ["1", "2", "3", "4", "5"] {
            committer.push(unit(id)).await.unwrap();
            flushes_after_push.push(committer.flushes());
        }
        assert_eq!(flushes_after_push, vec![0, 1, 1, 2, 2]);
        assert_eq!(committer.pending(), 1);

        let stats = committer.finish().await.unwrap();
        assert_eq!(committer.flushes(), 3);
        assert_eq!(stats.messages_upserted, 5);
        assert_eq!(stats.batch_size, 2);

        let calls = index.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                vec!["1".to_string(), "2".to_string()],
                vec!["3".to_string(), "4".to_string()],
                vec!["5".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_even_division_has_no_residual_flush() {
        let index = Arc::new(RecordingIndex::default());
        let mut committer = BatchCommitter::new(index.clone(), 3);
        for i in 0..6 {
            committer.push(unit(&i.to_string())).await.unwrap();
        }
        let stats = committer.finish().await.unwrap();
        assert_eq!(committer.flushes(), 2);
        assert_eq!(stats.messages_upserted, 6);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_prior_batches() {
        let index = Arc::new(RecordingIndex {
            fail_on: Some(2),
            ..RecordingIndex::default()
        });
        let mut committer = BatchCommitter::new(index.clone(), 2);

        committer.push(unit("1")).await.unwrap();
        committer.push(unit("2")).await.unwrap();
        committer.push(unit("3")).await.unwrap();
        let err = committer.push(unit("4")).await.unwrap_err();

        assert_eq!(err.batch, 2);
        assert_eq!(err.units, 2);
        assert_eq!(committer.stats().messages_upserted, 2);
        assert_eq!(committer.flushes(), 1);
    }

    #[tokio::test]
    async fn test_finish_with_nothing_pending() {
        let index = Arc::new(RecordingIndex::default());
        let mut committer = BatchCommitter::new(index.clone(), 4);
        let stats = committer.finish().await.unwrap();
        assert_eq!(stats.messages_upserted, 0);
        assert!(index.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_zero_batch_size_clamped() {
        let committer = BatchCommitter::new(Arc::new(RecordingIndex::default()), 0);
        assert_eq!(committer.stats().batch_size, 1);
    }
}
