//! Retrieval stage.
//!
//! Issues a nearest-neighbor query against a [`VectorIndex`], drops
//! candidates farther than an optional distance threshold, and shapes the
//! survivors into [`SearchRow`]s. Rows keep the index's ranking (ascending
//! distance); filtering only removes rows, it never reorders them.
//!
//! [`get_messages`] is the user-level view: the sorted, de-duplicated set of
//! user ids behind the surviving rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::RetrievalError;
use crate::index::sqlite::SqliteIndex;
use crate::index::{Candidate, VectorIndex};
use crate::models::SearchRow;

/// Run a semantic query and return the rows within `threshold`.
///
/// A blank query returns no rows without touching the index. When a
/// threshold is given, a candidate must carry a distance `<= threshold` to
/// be kept.
pub async fn search(
    index: &dyn VectorIndex,
    query: &str,
    result_count: usize,
    threshold: Option<f64>,
) -> Result<Vec<SearchRow>, RetrievalError> {
    if result_count == 0 {
        return Err(RetrievalError::InvalidRequest(
            "result_count must be >= 1".to_string(),
        ));
    }
    if let Some(t) = threshold {
        if !t.is_finite() || t < 0.0 {
            return Err(RetrievalError::InvalidRequest(format!(
                "threshold must be a non-negative number, got {}",
                t
            )));
        }
    }
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let candidates = index.query(query, result_count).await.map_err(|e| {
        tracing::error!(query, collection = index.collection(), error = %e, "index query failed");
        RetrievalError::Query {
            query: query.to_string(),
            source: e.into(),
        }
    })?;

    let total = candidates.len();
    let rows: Vec<SearchRow> = candidates
        .into_iter()
        .filter(|c| within_threshold(c.distance, threshold))
        .map(to_row)
        .collect();
    tracing::debug!(query, candidates = total, kept = rows.len(), "search complete");

    Ok(rows)
}

/// Sorted unique user ids of the rows matching `query`.
pub async fn get_messages(
    index: &dyn VectorIndex,
    query: &str,
    result_count: usize,
    threshold: Option<f64>,
) -> Result<Vec<String>, RetrievalError> {
    let rows = search(index, query, result_count, threshold).await?;
    Ok(unique_user_ids(&rows))
}

/// Sorted, de-duplicated user ids; empty ids are dropped.
pub fn unique_user_ids(rows: &[SearchRow]) -> Vec<String> {
    rows.iter()
        .filter(|r| !r.user_id.is_empty())
        .map(|r| r.user_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn within_threshold(distance: Option<f64>, threshold: Option<f64>) -> bool {
    match (threshold, distance) {
        (None, _) => true,
        (Some(t), Some(d)) => d <= t,
        (Some(_), None) => false,
    }
}

fn to_row(candidate: Candidate) -> SearchRow {
    let metadata = candidate.metadata.unwrap_or_default();
    SearchRow {
        user_id: field(&metadata, "user_id"),
        conversation_id: field(&metadata, "conversation_id"),
        user_email: field(&metadata, "user_email"),
        create_time: field(&metadata, "create_time"),
        distance: candidate.distance,
        message: candidate.document.unwrap_or_default(),
    }
}

fn field(metadata: &Map<String, Value>, key: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

async fn open_index(config: &Config) -> Result<SqliteIndex> {
    let provider: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    SqliteIndex::open(config, provider).await
}

/// `sieve search`: print matching rows in index order.
pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
    json: bool,
) -> Result<()> {
    let index = open_index(config).await?;
    let result_count = limit.unwrap_or(config.retrieval.result_count);
    let threshold = threshold.or(config.retrieval.threshold);

    let rows = search(&index, query, result_count, threshold).await;
    index.close().await;
    let rows = rows?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, row) in rows.iter().enumerate() {
        let distance = row
            .distance
            .map(|d| format!("{:.3}", d))
            .unwrap_or_else(|| "-".to_string());
        println!("{}. [{}] {} / {}", i + 1, distance, row.user_id, row.conversation_id);
        if !row.user_email.is_empty() {
            println!("    email: {}", row.user_email);
        }
        if !row.create_time.is_empty() {
            println!("    created: {}", row.create_time);
        }
        println!("    message: \"{}\"", row.message.replace('\n', " ").trim());
        println!();
    }

    Ok(())
}

/// `sieve users`: print the sorted unique user ids behind a query.
pub async fn run_users(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
) -> Result<()> {
    let index = open_index(config).await?;
    let result_count = limit.unwrap_or(config.retrieval.result_count);
    let threshold = threshold.or(config.retrieval.threshold);

    let users = get_messages(&index, query, result_count, threshold).await;
    index.close().await;
    let users = users?;

    if users.is_empty() {
        println!("No users.");
    }
    for user in &users {
        println!("{}", user);
    }

    Ok(())
}
