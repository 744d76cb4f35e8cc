//! The closed allow-list guarding the generic CRUD routes, and the
//! identifier grammar for payload-supplied column names.

/// Base tables and analytic views reachable through `/api/{table}`.
/// Anything else is a 404 before any SQL is built.
const VALID_TABLES: &[&str] = &[
    "users",
    "authors",
    "news_texts",
    "sources",
    "channels",
    "posts",
    "media",
    "tags",
    "post_tags",
    "comments",
    "channel_activity_stats",
    "author_performance",
    "tag_popularity_detailed",
    "source_post_stats",
    "user_comment_activity",
    "posts_ranked_by_popularity",
    "author_likes_trend",
    "cumulative_posts_analysis",
    "tag_rank_by_channel",
    "commenter_analysis",
    "posts_with_detailed_authors",
    "channels_with_sources",
    "posts_with_authors_and_texts",
    "comments_with_post_info",
    "posts_with_tags_and_channels",
    "media_with_context",
    "comprehensive_post_info",
    "extended_post_analytics",
];

pub fn is_valid_table(name: &str) -> bool {
    VALID_TABLES.contains(&name)
}

/// Primary-key column for tables addressable by a single id.
pub fn primary_key(table: &str) -> Option<&'static str> {
    match table {
        "users" => Some("user_id"),
        "authors" => Some("author_id"),
        "news_texts" => Some("text_id"),
        "sources" => Some("source_id"),
        "channels" => Some("channel_id"),
        "posts" => Some("post_id"),
        "media" => Some("media_id"),
        "tags" => Some("tag_id"),
        "comments" => Some("comment_id"),
        _ => None,
    }
}

/// Column names from request payloads must fit the ordinary SQL identifier
/// grammar before they are spliced into statement text. Values never are;
/// they travel as one jsonb parameter.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap();
    if !(first.is_ascii_lowercase() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_tables_and_views_are_allowed() {
        assert!(is_valid_table("posts"));
        assert!(is_valid_table("comprehensive_post_info"));
        assert!(!is_valid_table("pg_catalog"));
        assert!(!is_valid_table(""));
    }

    #[test]
    fn views_have_no_primary_key() {
        assert_eq!(primary_key("posts"), Some("post_id"));
        assert_eq!(primary_key("post_tags"), None);
        assert_eq!(primary_key("channel_activity_stats"), None);
    }

    #[test]
    fn identifier_grammar_rejects_injection_vectors() {
        assert!(is_valid_identifier("likes_count"));
        assert!(is_valid_identifier("_hidden"));
        assert!(!is_valid_identifier("count; DROP TABLE posts"));
        assert!(!is_valid_identifier("name\""));
        assert!(!is_valid_identifier("Name"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }
}
