//! Conversation flattening.
//!
//! Turns a conversation's message tree into one [`FlattenedUnit`] per
//! mapping node. Each unit carries its own rendered turn, preceded by the
//! rendered turn of its immediate parent when there is one, so a unit read
//! in isolation still shows what it was answering.
//!
//! Parents are resolved with a single lookup in the mapping. No pointer
//! graph is built and no ancestor chain is followed, so malformed parent
//! links (dangling or cyclic) cannot cause unbounded work.

use chrono::{DateTime, SecondsFormat};

use crate::models::{ConversationRecord, FlattenedUnit, MessageNode, UnitMetadata};

/// Content types whose parts are rendered as text.
const RENDERED_CONTENT_TYPES: [&str; 2] = ["text", "code"];

/// Flatten a conversation into one unit per mapping entry, in mapping order.
///
/// Non-renderable nodes still produce a unit (with empty text) so that
/// the emitted `record_id`s are exactly the mapping keys.
pub fn flatten_conversation(
    user_id: &str,
    user_email: &str,
    conversation: &ConversationRecord,
) -> Vec<FlattenedUnit> {
    let metadata = UnitMetadata {
        user_id: user_id.to_string(),
        user_email: user_email.to_string(),
        conversation_id: conversation.conversation_id.clone(),
        create_time: conversation.create_time.and_then(format_create_time),
    };

    conversation
        .mapping
        .iter()
        .map(|(node_id, node)| {
            let own = render_node(node);
            let parent_text = node
                .parent
                .as_deref()
                .and_then(|parent_id| {
                    let parent = conversation.mapping.get(parent_id);
                    if parent.is_none() {
                        tracing::warn!(
                            conversation_id = %conversation.conversation_id,
                            node_id = %node_id,
                            parent_id = %parent_id,
                            "parent not found in mapping"
                        );
                    }
                    parent
                })
                .map(render_node)
                .unwrap_or_default();

            let text = if parent_text.is_empty() {
                own
            } else {
                format!("{}\n{}", parent_text, own)
            };

            FlattenedUnit {
                record_id: node_id.clone(),
                text,
                metadata: metadata.clone(),
            }
        })
        .collect()
}

/// Render a single node as `"[Role] text"`, or `""` when it carries no
/// text or code content.
pub fn render_node(node: &MessageNode) -> String {
    let Some(message) = node.message.as_ref() else {
        return String::new();
    };
    if !RENDERED_CONTENT_TYPES.contains(&message.content.content_type.as_str()) {
        return String::new();
    }

    let merged: String = message
        .content
        .parts
        .iter()
        .filter_map(|part| part.as_str())
        .collect();

    format!("[{}] {}", capitalize(&message.author.role), merged)
}

/// Convert epoch seconds to an ISO-8601 UTC timestamp.
///
/// Zero means "not recorded". Non-finite and out-of-range values yield
/// `None`; times before 1970 are kept.
pub fn format_create_time(epoch_secs: f64) -> Option<String> {
    if !epoch_secs.is_finite() || epoch_secs == 0.0 {
        return None;
    }
    let secs = epoch_secs.floor();
    if secs > i64::MAX as f64 || secs < i64::MIN as f64 {
        return None;
    }
    let nanos = ((epoch_secs - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Uppercase the first character and lowercase the rest.
fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
