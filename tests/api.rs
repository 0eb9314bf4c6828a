//! API integration tests
//!
//! Exercise the HTTP boundary end-to-end against a recording mock of
//! the scrape service: parameter validation, defaulting, response
//! shapes, and error mapping.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use reddit_ingest::parser::ParseError;
use reddit_ingest::scraper::{ScrapeError, ScrapeService};
use reddit_ingest::server::{create_router, AppState};
use reddit_ingest::types::*;
use reddit_ingest::upstream::SearchQuery;

/// Arguments the mock saw, for asserting defaulting rules.
#[derive(Debug, Default, Clone)]
struct SeenArgs {
    subreddit_limit: Option<i64>,
    post_limit: Option<i64>,
    comment_limit: Option<i64>,
    search_query: Option<SearchQuery>,
    search_limit: Option<i64>,
}

#[derive(Default)]
struct MockService {
    seen: Mutex<SeenArgs>,
    fail_with_parse_error: bool,
}

fn sample_post(id: &str) -> Post {
    Post {
        id: id.to_string(),
        title: "Test Post".to_string(),
        body: "body".to_string(),
        author: "testuser".to_string(),
        score: 7,
        created_at: instant_from_epoch(1700000000.0),
        flair: None,
        url: format!("https://reddit.com/r/test/comments/{id}/"),
    }
}

#[async_trait]
impl ScrapeService for MockService {
    async fn scrape_subreddit(
        &self,
        _subreddit: &str,
        _since: i64,
        limit: i64,
        _token: &CancellationToken,
    ) -> Result<Vec<Post>, ScrapeError> {
        self.seen.lock().unwrap().subreddit_limit = Some(limit);
        Ok(vec![sample_post("abc123")])
    }

    async fn scrape_user_activity(
        &self,
        username: &str,
        _since: i64,
        post_limit: i64,
        comment_limit: i64,
        _token: &CancellationToken,
    ) -> Result<UserActivity, ScrapeError> {
        let mut seen = self.seen.lock().unwrap();
        seen.post_limit = Some(post_limit);
        seen.comment_limit = Some(comment_limit);

        Ok(UserActivity {
            user_info: UserInfo {
                username: username.to_string(),
                link_karma: 10,
                comment_karma: 20,
                created_at: instant_from_epoch(1500000000.0),
            },
            posts: vec![UserPost {
                id: "p1".to_string(),
                title: "post".to_string(),
                body: String::new(),
                score: 1,
                created_at: instant_from_epoch(1700000000.0),
                subreddit: "rust".to_string(),
                flair: None,
                url: "https://reddit.com/r/rust/comments/p1/".to_string(),
            }],
            comments: vec![UserComment {
                id: "c1".to_string(),
                body: "a comment".to_string(),
                score: 2,
                created_at: instant_from_epoch(1700000100.0),
                subreddit: "rust".to_string(),
                post_id: "p9".to_string(),
                post_title: "other".to_string(),
            }],
        })
    }

    async fn scrape_post(
        &self,
        post_id: &str,
        _token: &CancellationToken,
    ) -> Result<PostDetail, ScrapeError> {
        if self.fail_with_parse_error {
            return Err(ScrapeError::Parse(ParseError::PostNotFound));
        }
        let comment = Comment {
            id: "c1".to_string(),
            author: "commenter".to_string(),
            body: "This is a comment".to_string(),
            score: 5,
            created_at: instant_from_epoch(1700000100.0),
            replies: Vec::new(),
            is_placeholder: false,
            has_more_children: false,
            more_ids: Vec::new(),
        };
        Ok(PostDetail {
            post: sample_post(post_id),
            comments: vec![comment],
        })
    }

    async fn search(
        &self,
        query: &SearchQuery,
        _since: i64,
        limit: i64,
        _token: &CancellationToken,
    ) -> Result<Vec<Post>, ScrapeError> {
        let mut seen = self.seen.lock().unwrap();
        seen.search_query = Some(query.clone());
        seen.search_limit = Some(limit);
        Ok(vec![sample_post("s1")])
    }
}

fn router_with(mock: Arc<MockService>) -> axum::Router {
    create_router(AppState {
        service: mock,
        default_post_limit: 25,
        default_comment_limit: 50,
    })
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let (status, body) = get(router_with(Arc::default()), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], Value::Bool(true));
}

#[tokio::test]
async fn test_subreddit_listing() {
    let mock = Arc::new(MockService::default());
    let (status, body) = get(
        router_with(mock.clone()),
        "/subreddit?subreddit=test&limit=10",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"].as_array().unwrap().len(), 1);
    assert_eq!(body["posts"][0]["id"], "abc123");
    assert_eq!(body["meta"]["actual_count"], 1);
    assert_eq!(body["meta"]["requested_limit"], 10);
    assert_eq!(body["meta"]["subreddit"], "test");
    assert!(body["meta"]["processing_time_ms"].is_u64());
    assert_eq!(mock.seen.lock().unwrap().subreddit_limit, Some(10));
}

#[tokio::test]
async fn test_subreddit_limit_defaults_from_config() {
    let mock = Arc::new(MockService::default());
    let (status, _) = get(router_with(mock.clone()), "/subreddit?subreddit=test").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mock.seen.lock().unwrap().subreddit_limit, Some(25));
}

#[tokio::test]
async fn test_subreddit_missing_parameter() {
    let (status, body) = get(router_with(Arc::default()), "/subreddit").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("`subreddit`"));
}

#[tokio::test]
async fn test_subreddit_invalid_limit() {
    let (status, body) = get(
        router_with(Arc::default()),
        "/subreddit?subreddit=test&limit=lots",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("`limit`"));

    let (status, _) = get(
        router_with(Arc::default()),
        "/subreddit?subreddit=test&limit=-2",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_subreddit_unknown_parameters_ignored() {
    let (status, _) = get(
        router_with(Arc::default()),
        "/subreddit?subreddit=test&mystery=1&flavor=vanilla",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_user_activity() {
    let (status, body) = get(
        router_with(Arc::default()),
        "/user?username=tester&post_limit=10&comment_limit=10",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_info"]["username"], "tester");
    assert_eq!(body["posts"].as_array().unwrap().len(), 1);
    assert_eq!(body["comments"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_user_comment_limit_follows_post_limit() {
    let mock = Arc::new(MockService::default());
    let (status, _) = get(
        router_with(mock.clone()),
        "/user?username=tester&post_limit=40",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let seen = mock.seen.lock().unwrap().clone();
    assert_eq!(seen.post_limit, Some(40));
    assert_eq!(seen.comment_limit, Some(40));
}

#[tokio::test]
async fn test_user_limits_default_from_config() {
    let mock = Arc::new(MockService::default());
    let (status, _) = get(router_with(mock.clone()), "/user?username=tester").await;
    assert_eq!(status, StatusCode::OK);
    let seen = mock.seen.lock().unwrap().clone();
    assert_eq!(seen.post_limit, Some(25));
    assert_eq!(seen.comment_limit, Some(50));
}

#[tokio::test]
async fn test_user_rejects_limit_below_minus_one() {
    let (status, body) = get(
        router_with(Arc::default()),
        "/user?username=tester&post_limit=-3",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("-1"));
}

#[tokio::test]
async fn test_post_detail() {
    let (status, body) = get(router_with(Arc::default()), "/post?post_id=abc123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["post"]["id"], "abc123");
    assert_eq!(body["comments"][0]["body"], "This is a comment");
    assert!(body["comments"][0].get("replies").is_none());
    assert!(body["comments"][0].get("is_placeholder").is_none());
}

#[tokio::test]
async fn test_post_missing_id() {
    let (status, body) = get(router_with(Arc::default()), "/post").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("`post_id`"));
}

#[tokio::test]
async fn test_post_upstream_failure_is_bad_gateway() {
    let mock = Arc::new(MockService {
        fail_with_parse_error: true,
        ..Default::default()
    });
    let (status, body) = get(router_with(mock), "/post?post_id=gone").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("post not found"));
}

#[tokio::test]
async fn test_search_defaults_and_meta() {
    let mock = Arc::new(MockService::default());
    let (status, body) = get(
        router_with(mock.clone()),
        "/search?search_string=borrow+checker",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["query"], "borrow checker");
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["meta"]["requested_limit"], "25");
    assert_eq!(body["meta"]["params"]["sort"], "relevance");
    assert_eq!(body["meta"]["params"]["time"], "all");

    let seen = mock.seen.lock().unwrap().clone();
    assert_eq!(seen.search_limit, Some(25));
    let query = seen.search_query.unwrap();
    assert_eq!(query.search_string.as_deref(), Some("borrow checker"));
}

#[tokio::test]
async fn test_search_compound_query() {
    let mock = Arc::new(MockService::default());
    let (status, _) = get(
        router_with(mock.clone()),
        "/search?compound_query=subreddit:rust+lifetimes+explained",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let query = mock.seen.lock().unwrap().clone().search_query.unwrap();
    assert_eq!(query.subreddit.as_deref(), Some("rust"));
    assert_eq!(query.search_string.as_deref(), Some("lifetimes explained"));
}

#[tokio::test]
async fn test_search_unbounded_limit_description() {
    let (_, body) = get(
        router_with(Arc::default()),
        "/search?search_string=x&limit=-1&since_timestamp=1700000000",
    )
    .await;
    assert_eq!(body["meta"]["requested_limit"], "all items since timestamp");

    let (_, body) = get(
        router_with(Arc::default()),
        "/search?search_string=x&limit=-1",
    )
    .await;
    assert_eq!(body["meta"]["requested_limit"], "default maximum (1000)");
}
