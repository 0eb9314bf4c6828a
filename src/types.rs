//! Core domain types for the ingestion gateway
//!
//! Everything here is request-scoped: entities are produced by the
//! payload decoder, threaded through the scraper, and serialized out.
//! No shared mutable state survives a request.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Convert upstream epoch-seconds (a float in the raw payload) into an
/// instant. Sub-second precision is discarded on purpose: the upstream
/// emits it inconsistently and nothing downstream needs it.
pub fn instant_from_epoch(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Anything with a creation instant; the pagination walker filters
/// against a `since` cutoff through this seam.
pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;
}

/// A submission as returned by listing and search endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Upstream post id (without the `t3_` prefix)
    pub id: String,
    /// Post title
    pub title: String,
    /// Self-text body (empty for link posts)
    pub body: String,
    /// Author's username
    pub author: String,
    /// Score (upvotes minus downvotes)
    pub score: i64,
    /// Creation instant
    pub created_at: DateTime<Utc>,
    /// Flair text, when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flair: Option<String>,
    /// Canonical URL of the post
    pub url: String,
}

impl Timestamped for Post {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A comment tree node.
///
/// Three fields carry the expansion seed: `is_placeholder` marks a
/// synthetic node standing in for unloaded siblings, `has_more_children`
/// marks a real comment with unloaded descendants, and `more_ids` holds
/// the opaque ids the load-more endpoint resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    pub created_at: DateTime<Utc>,
    /// Direct replies, in upstream order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replies: Vec<Comment>,
    /// This node stands in for a batch of unloaded sibling comments
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_placeholder: bool,
    /// This comment has unloaded descendants
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub has_more_children: bool,
    /// Ids to hand to the load-more endpoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub more_ids: Vec<String>,
}

impl Comment {
    /// A bare comment with no body: the shape placeholders are built on.
    pub fn placeholder(id: String, more_ids: Vec<String>) -> Self {
        Comment {
            id,
            author: String::new(),
            body: String::new(),
            score: 0,
            created_at: instant_from_epoch(0.0),
            replies: Vec::new(),
            is_placeholder: true,
            has_more_children: false,
            more_ids,
        }
    }
}

impl Timestamped for Comment {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A post together with its comment forest.
///
/// A fully expanded detail contains no placeholder nodes; a partial
/// result cut short by a deadline may still carry some.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostDetail {
    pub post: Post,
    pub comments: Vec<Comment>,
}

/// Profile information for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub username: String,
    pub link_karma: i64,
    pub comment_karma: i64,
    pub created_at: DateTime<Utc>,
}

/// A submission as seen from a user's activity feed, tagged with the
/// subreddit it was posted in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPost {
    pub id: String,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub subreddit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flair: Option<String>,
    pub url: String,
}

impl Timestamped for UserPost {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A comment as seen from a user's activity feed, tagged with the
/// subreddit and the containing post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserComment {
    pub id: String,
    pub body: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub subreddit: String,
    /// Id of the containing post (without the `t3_` prefix)
    pub post_id: String,
    pub post_title: String,
}

impl Timestamped for UserComment {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A user's profile plus their recent posts and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivity {
    pub user_info: UserInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posts: Vec<UserPost>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<UserComment>,
}

/// Count every node in a comment forest, replies included.
pub fn count_comments(comments: &[Comment]) -> usize {
    comments
        .iter()
        .map(|c| 1 + count_comments(&c.replies))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_from_epoch_discards_subseconds() {
        let t = instant_from_epoch(1700000000.75);
        assert_eq!(t.timestamp(), 1700000000);
        assert_eq!(t.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_comment_serialization_skips_empty_fields() {
        let c = Comment {
            id: "abc".to_string(),
            author: "alice".to_string(),
            body: "hi".to_string(),
            score: 1,
            created_at: instant_from_epoch(1700000000.0),
            replies: Vec::new(),
            is_placeholder: false,
            has_more_children: false,
            more_ids: Vec::new(),
        };
        let v = serde_json::to_value(&c).unwrap();
        let obj = v.as_object().unwrap();
        assert!(!obj.contains_key("replies"));
        assert!(!obj.contains_key("is_placeholder"));
        assert!(!obj.contains_key("has_more_children"));
        assert!(!obj.contains_key("more_ids"));
    }

    #[test]
    fn test_placeholder_shape() {
        let p = Comment::placeholder("more_x".to_string(), vec!["a".to_string()]);
        assert!(p.is_placeholder);
        assert!(p.body.is_empty() && p.author.is_empty());
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["is_placeholder"], serde_json::json!(true));
    }

    #[test]
    fn test_count_comments_counts_nested() {
        let leaf = Comment {
            id: "l".into(),
            author: "a".into(),
            body: "b".into(),
            score: 0,
            created_at: instant_from_epoch(0.0),
            replies: vec![],
            is_placeholder: false,
            has_more_children: false,
            more_ids: vec![],
        };
        let mut parent = leaf.clone();
        parent.id = "p".into();
        parent.replies = vec![leaf.clone(), leaf.clone()];
        assert_eq!(count_comments(&[parent, leaf]), 4);
    }
}
