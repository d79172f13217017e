//! Core data models used throughout Chat Sieve.
//!
//! The input side mirrors the transcript export format: a top-level array
//! of [`UserRecord`]s, each holding [`ConversationRecord`]s whose `mapping`
//! encodes a message tree through parent ids. The output side is the flat
//! [`FlattenedUnit`] committed to the index and the [`SearchRow`] shape
//! returned by retrieval.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One top-level element of an export archive.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub email: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub conversations: Vec<ConversationRecord>,
}

/// A single conversation: a tree of message nodes stored as a flat table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub conversation_id: String,
    /// Epoch seconds. Values that are neither numbers nor numeric strings
    /// are read as absent.
    #[serde(default, deserialize_with = "lenient_epoch")]
    pub create_time: Option<f64>,
    /// Node id → node, in the order the export wrote them. A node that is
    /// not an object is kept as an empty node.
    #[serde(default, deserialize_with = "lenient_mapping")]
    pub mapping: IndexMap<String, MessageNode>,
}

/// One position in a conversation tree.
///
/// Only the fields flattening reads are typed; `id`, `children` and the
/// rest of the export's node fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageNode {
    /// Key of the parent node in the same mapping.
    #[serde(default, deserialize_with = "lenient_parent")]
    pub parent: Option<String>,
    /// Placeholder and system nodes carry no message.
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Message {
    #[serde(default, deserialize_with = "lenient")]
    pub author: Author,
    #[serde(default, deserialize_with = "lenient")]
    pub content: Content,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Author {
    #[serde(default, deserialize_with = "lenient_string")]
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Content {
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_type: String,
    /// Text parts are strings; attachments show up as objects.
    #[serde(default, deserialize_with = "lenient")]
    pub parts: Vec<Value>,
}

/// Metadata attached to every indexed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    pub user_id: String,
    pub user_email: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

/// One context-bearing text unit per mapping node.
///
/// After redaction the same type carries the scrubbed text; `record_id`
/// and `metadata` never change between the two stages.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedUnit {
    pub record_id: String,
    pub text: String,
    pub metadata: UnitMetadata,
}

/// A [`FlattenedUnit`] whose text has passed through the redaction stage.
pub type RedactedUnit = FlattenedUnit;

/// A retrieval result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRow {
    pub user_id: String,
    pub conversation_id: String,
    pub user_email: String,
    pub create_time: String,
    pub distance: Option<f64>,
    pub message: String,
}

/// Summary of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub users_processed: u64,
    pub conversations_processed: u64,
    pub messages_transformed: u64,
    pub messages_upserted: u64,
    pub batch_size: usize,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_epoch<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Strings as-is, numbers in their decimal form, anything else empty.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_parent<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Any value that does not fit `T` reads as `T::default()`.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + DeserializeOwned,
{
    Ok(Option::<Value>::deserialize(deserializer)?
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default())
}

fn lenient_mapping<'de, D>(deserializer: D) -> Result<IndexMap<String, MessageNode>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Object(entries)) => entries,
        _ => return Ok(IndexMap::new()),
    };
    Ok(entries
        .into_iter()
        .map(|(id, node)| (id, serde_json::from_value(node).unwrap_or_default()))
        .collect())
}
