//! Query text preprocessing for embedding generation.
//!
//! Prepares a free-text query for the embedding provider:
//! 1. Trim and collapse whitespace
//! 2. Reject if empty
//! 3. Truncate to max length with ellipsis

/// Maximum query length for embedding input (characters, not tokens)
const MAX_QUERY_LENGTH: usize = 512;

/// Ellipsis suffix when a query is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Normalize a query for embedding.
///
/// Returns `None` if the query is empty after trimming.
pub fn normalize_query(query: &str) -> Option<String> {
    let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return None;
    }

    Some(truncate_query(&collapsed))
}

/// Truncate to MAX_QUERY_LENGTH characters, adding ellipsis if truncated.
fn truncate_query(query: &str) -> String {
    if query.chars().count() <= MAX_QUERY_LENGTH {
        return query.to_string();
    }

    let max_chars = MAX_QUERY_LENGTH - TRUNCATION_SUFFIX.len();
    let truncated: String = query.chars().take(max_chars).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
