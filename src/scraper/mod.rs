//! Scraping service
//!
//! The four operations the gateway serves: subreddit listing, user
//! activity, post-with-comments, and search. Each validates nothing —
//! that is the HTTP boundary's job — and drives the pagination walker
//! or the thread expander over the upstream adapter.

pub mod expand;
pub mod paginate;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::parser::{self, ParseError};
use crate::types::{count_comments, Post, PostDetail, UserActivity, UserComment, UserPost};
use crate::upstream::{SearchQuery, Upstream, UpstreamError};

use paginate::{walk_pages, WalkOptions};

/// Upstream page size ceiling.
const PAGE_SIZE_MAX: i64 = 100;

/// Scrape-operation failures.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("request cancelled")]
    Cancelled,
    #[error("fetch failed: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("decode failed: {0}")]
    Parse(#[from] ParseError),
}

impl ScrapeError {
    pub fn is_cancelled(&self) -> bool {
        match self {
            ScrapeError::Cancelled => true,
            ScrapeError::Upstream(err) => err.is_cancelled(),
            ScrapeError::Parse(_) => false,
        }
    }
}

/// The service seam the HTTP boundary depends on.
#[async_trait]
pub trait ScrapeService: Send + Sync {
    async fn scrape_subreddit(
        &self,
        subreddit: &str,
        since: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> Result<Vec<Post>, ScrapeError>;

    async fn scrape_user_activity(
        &self,
        username: &str,
        since: i64,
        post_limit: i64,
        comment_limit: i64,
        token: &CancellationToken,
    ) -> Result<UserActivity, ScrapeError>;

    async fn scrape_post(
        &self,
        post_id: &str,
        token: &CancellationToken,
    ) -> Result<PostDetail, ScrapeError>;

    async fn search(
        &self,
        query: &SearchQuery,
        since: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> Result<Vec<Post>, ScrapeError>;
}

/// Production scraper over any upstream adapter.
pub struct Scraper<U> {
    upstream: U,
    courtesy_delay: Duration,
}

impl<U: Upstream> Scraper<U> {
    pub fn new(upstream: U, config: &Config) -> Self {
        Scraper {
            upstream,
            courtesy_delay: config.rate_limit_delay,
        }
    }

    /// Walk options for the user posts/comments listings. Page
    /// ceilings estimate generously from the limit; unbounded walks
    /// get a fixed ceiling instead of running forever.
    fn user_walk(&self, since: i64, limit: i64) -> WalkOptions {
        let (max_pages, deadline) = match limit {
            0 => (1, Duration::from_secs(120)),
            -1 => {
                let pages = if since > 0 { 1000 } else { 500 };
                (pages, Duration::from_secs(300))
            }
            l => {
                let pages = ((l / 25 + 1) * 2).min(50) as u32;
                (pages, Duration::from_secs(120))
            }
        };
        WalkOptions {
            since,
            limit,
            max_pages,
            deadline,
            courtesy_delay: if limit == 0 {
                Duration::ZERO
            } else {
                self.courtesy_delay
            },
            initial_after: None,
        }
    }

    async fn fetch_user_posts(
        &self,
        username: &str,
        since: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> Result<Vec<UserPost>, ScrapeError> {
        let upstream = &self.upstream;
        walk_pages(
            self.user_walk(since, limit),
            token,
            move |after: String| async move {
                upstream.user_posts_page(username, &after, token).await
            },
            parser::parse_user_posts,
        )
        .await
    }

    async fn fetch_user_comments(
        &self,
        username: &str,
        since: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> Result<Vec<UserComment>, ScrapeError> {
        let upstream = &self.upstream;
        walk_pages(
            self.user_walk(since, limit),
            token,
            move |after: String| async move {
                upstream.user_comments_page(username, &after, token).await
            },
            parser::parse_user_comments,
        )
        .await
    }
}

#[async_trait]
impl<U: Upstream> ScrapeService for Scraper<U> {
    async fn scrape_subreddit(
        &self,
        subreddit: &str,
        since: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> Result<Vec<Post>, ScrapeError> {
        let started = Instant::now();

        let page_limit = match limit {
            0 => None,
            l if l > 0 => Some(l.min(PAGE_SIZE_MAX) as u32),
            _ => Some(PAGE_SIZE_MAX as u32),
        };
        let opts = WalkOptions {
            since,
            limit,
            max_pages: match limit {
                0 => 1,
                -1 => 1000,
                _ => 20,
            },
            deadline: if limit == -1 {
                Duration::from_secs(180)
            } else {
                Duration::from_secs(30)
            },
            courtesy_delay: if limit == 0 {
                Duration::ZERO
            } else {
                self.courtesy_delay
            },
            initial_after: None,
        };

        let upstream = &self.upstream;
        let posts = walk_pages(
            opts,
            token,
            move |after: String| async move {
                upstream
                    .subreddit_page(subreddit, page_limit, &after, token)
                    .await
            },
            parser::parse_post_listing,
        )
        .await?;

        info!(
            subreddit,
            count = posts.len(),
            elapsed = ?started.elapsed(),
            "subreddit scrape finished"
        );
        Ok(posts)
    }

    async fn scrape_user_activity(
        &self,
        username: &str,
        since: i64,
        post_limit: i64,
        comment_limit: i64,
        token: &CancellationToken,
    ) -> Result<UserActivity, ScrapeError> {
        let about = self.upstream.user_about(username, token).await?;
        let user_info = parser::parse_user_info(&about)?;

        let (posts, comments) = tokio::try_join!(
            self.fetch_user_posts(username, since, post_limit, token),
            self.fetch_user_comments(username, since, comment_limit, token),
        )?;

        info!(
            username,
            posts = posts.len(),
            comments = comments.len(),
            "user activity scrape finished"
        );
        Ok(UserActivity {
            user_info,
            posts,
            comments,
        })
    }

    async fn scrape_post(
        &self,
        post_id: &str,
        token: &CancellationToken,
    ) -> Result<PostDetail, ScrapeError> {
        let started = Instant::now();

        let body = self.upstream.post_thread(post_id, token).await?;
        let mut detail = parser::parse_post_thread(&body)?;

        let initial = count_comments(&detail.comments);
        debug!(post_id, initial, "initial thread fetched");

        let expanded = expand::expand_thread(&self.upstream, post_id, &mut detail, token).await;

        info!(
            post_id,
            total = count_comments(&detail.comments),
            expanded,
            elapsed = ?started.elapsed(),
            "post scrape finished"
        );
        Ok(detail)
    }

    async fn search(
        &self,
        query: &SearchQuery,
        since: i64,
        limit: i64,
        token: &CancellationToken,
    ) -> Result<Vec<Post>, ScrapeError> {
        let started = Instant::now();

        // An unbounded search with no cutoff has no natural stop, so it
        // is coerced to a large fixed budget.
        let limit = if limit == -1 && since == 0 { 1000 } else { limit };

        let page_limit = if limit > 0 {
            limit.min(PAGE_SIZE_MAX) as u32
        } else if limit == 0 {
            0
        } else {
            PAGE_SIZE_MAX as u32
        };
        let max_pages = if limit == -1 && since > 0 {
            1000
        } else if limit > 0 {
            ((limit + PAGE_SIZE_MAX - 1) / PAGE_SIZE_MAX * 2) as u32
        } else {
            1
        };
        let opts = WalkOptions {
            since,
            limit,
            max_pages,
            deadline: if limit == -1 {
                Duration::from_secs(180)
            } else {
                Duration::from_secs(60)
            },
            courtesy_delay: if limit == 0 {
                Duration::ZERO
            } else {
                self.courtesy_delay
            },
            initial_after: query.after.clone(),
        };

        let upstream = &self.upstream;
        let posts = walk_pages(
            opts,
            token,
            move |after: String| async move {
                upstream.search_page(query, page_limit, &after, token).await
            },
            parser::parse_post_listing,
        )
        .await?;

        info!(
            count = posts.len(),
            elapsed = ?started.elapsed(),
            "search finished"
        );
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Mock upstream serving fixtures keyed per endpoint, with paged
    /// responses popped in order.
    #[derive(Default)]
    struct FixtureUpstream {
        subreddit_pages: Mutex<Vec<Vec<u8>>>,
        about: Option<Vec<u8>>,
        user_post_pages: Mutex<Vec<Vec<u8>>>,
        user_comment_pages: Mutex<Vec<Vec<u8>>>,
        thread: Option<Vec<u8>>,
        search_pages: Mutex<Vec<Vec<u8>>>,
        more: Option<Vec<u8>>,
    }

    fn pop(pages: &Mutex<Vec<Vec<u8>>>) -> Vec<u8> {
        let mut pages = pages.lock().unwrap();
        if pages.is_empty() {
            br#"{"data": {"children": [], "after": ""}}"#.to_vec()
        } else {
            pages.remove(0)
        }
    }

    #[async_trait]
    impl Upstream for FixtureUpstream {
        async fn subreddit_page(
            &self,
            _: &str,
            _: Option<u32>,
            _: &str,
            _: &CancellationToken,
        ) -> Result<Vec<u8>, UpstreamError> {
            Ok(pop(&self.subreddit_pages))
        }
        async fn user_about(&self, _: &str, _: &CancellationToken) -> Result<Vec<u8>, UpstreamError> {
            Ok(self.about.clone().unwrap_or_default())
        }
        async fn user_posts_page(
            &self,
            _: &str,
            _: &str,
            _: &CancellationToken,
        ) -> Result<Vec<u8>, UpstreamError> {
            Ok(pop(&self.user_post_pages))
        }
        async fn user_comments_page(
            &self,
            _: &str,
            _: &str,
            _: &CancellationToken,
        ) -> Result<Vec<u8>, UpstreamError> {
            Ok(pop(&self.user_comment_pages))
        }
        async fn post_thread(&self, _: &str, _: &CancellationToken) -> Result<Vec<u8>, UpstreamError> {
            Ok(self.thread.clone().unwrap_or_default())
        }
        async fn search_page(
            &self,
            _: &SearchQuery,
            _: u32,
            _: &str,
            _: &CancellationToken,
        ) -> Result<Vec<u8>, UpstreamError> {
            Ok(pop(&self.search_pages))
        }
        async fn more_children(
            &self,
            _: &str,
            _: &[String],
            _: &CancellationToken,
        ) -> Result<Vec<u8>, UpstreamError> {
            Ok(self
                .more
                .clone()
                .unwrap_or_else(|| br#"{"json": {"data": {"things": []}}}"#.to_vec()))
        }
    }

    fn scraper(upstream: FixtureUpstream) -> Scraper<FixtureUpstream> {
        let vars: HashMap<String, String> = [(
            crate::config::ENV_PROXY_URLS.to_string(),
            "http://proxy.example:1".to_string(),
        )]
        .into_iter()
        .collect();
        let mut config = Config::from_vars(&vars).unwrap();
        config.rate_limit_delay = Duration::ZERO;
        Scraper::new(upstream, &config)
    }

    #[tokio::test]
    async fn test_scrape_subreddit_single_page() {
        let upstream = FixtureUpstream {
            subreddit_pages: Mutex::new(vec![br#"{"data": {"children": [
                {"kind": "t3", "data": {"id": "abc123", "title": "hello", "author": "testuser",
                 "score": 3, "created_utc": 1700000000.0, "permalink": "/r/test/abc123/"}}
            ], "after": ""}}"#
                .to_vec()]),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let posts = scraper(upstream)
            .scrape_subreddit("test", 0, 10, &token)
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "abc123");
        assert_eq!(posts[0].author, "testuser");
    }

    #[tokio::test]
    async fn test_scrape_post_resolves_placeholders() {
        let thread = br#"[
            {"data": {"children": [{"kind": "t3", "data": {
                "id": "abc123", "title": "Post", "author": "op", "score": 1,
                "created_utc": 1700000000.0, "permalink": "/r/t/abc123/", "selftext": ""
            }}]}},
            {"data": {"children": [
                {"kind": "t1", "data": {"id": "c1", "author": "u1", "body": "first",
                 "score": 1, "created_utc": 1700000500.0, "replies": ""}},
                {"kind": "more", "data": {"children": ["m1", "m2"], "parent_id": "t3_abc123"}}
            ]}}
        ]"#
        .to_vec();
        let more = br#"{"json": {"data": {"things": [
            {"kind": "t1", "data": {"id": "m1", "author": "u2", "body": "second",
             "score": 1, "created_utc": 1700000400.0, "replies": ""}},
            {"kind": "t1", "data": {"id": "m2", "author": "u3", "body": "third",
             "score": 1, "created_utc": 1700000300.0, "replies": ""}}
        ]}}}"#
            .to_vec();

        let upstream = FixtureUpstream {
            thread: Some(thread),
            more: Some(more),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let detail = scraper(upstream)
            .scrape_post("abc123", &token)
            .await
            .unwrap();

        assert_eq!(detail.post.id, "abc123");
        let ids: Vec<&str> = detail.comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "m1", "m2"]);
        assert!(detail.comments.iter().all(|c| !c.is_placeholder));
    }

    #[tokio::test]
    async fn test_scrape_post_not_found() {
        let upstream = FixtureUpstream {
            thread: Some(br#"[{"data": {"children": []}}, {"data": {"children": []}}]"#.to_vec()),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let err = scraper(upstream)
            .scrape_post("missing", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(ParseError::PostNotFound)));
    }

    #[tokio::test]
    async fn test_user_activity_combines_concurrent_fetches() {
        let upstream = FixtureUpstream {
            about: Some(
                br#"{"data": {"name": "tester", "created_utc": 1500000000.0,
                     "link_karma": 10, "comment_karma": 20}}"#
                    .to_vec(),
            ),
            user_post_pages: Mutex::new(vec![br#"{"data": {"children": [
                {"kind": "t3", "data": {"id": "p1", "title": "post", "score": 1,
                 "created_utc": 1700000000.0, "subreddit": "rust", "permalink": "/r/rust/p1/"}}
            ], "after": ""}}"#
                .to_vec()]),
            user_comment_pages: Mutex::new(vec![br#"{"data": {"children": [
                {"kind": "t1", "data": {"id": "c1", "body": "cmt", "score": 2,
                 "created_utc": 1700000100.0, "subreddit": "rust",
                 "link_id": "t3_p9", "link_title": "other"}}
            ], "after": ""}}"#
                .to_vec()]),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let activity = scraper(upstream)
            .scrape_user_activity("tester", 0, 10, 10, &token)
            .await
            .unwrap();

        assert_eq!(activity.user_info.username, "tester");
        assert_eq!(activity.posts.len(), 1);
        assert_eq!(activity.comments.len(), 1);
        assert_eq!(activity.comments[0].post_id, "p9");
    }

    #[tokio::test]
    async fn test_search_filters_by_since() {
        let upstream = FixtureUpstream {
            search_pages: Mutex::new(vec![br#"{"data": {"children": [
                {"kind": "t3", "data": {"id": "new1", "title": "a", "score": 1,
                 "created_utc": 2000.0, "permalink": "/r/x/new1/"}},
                {"kind": "t3", "data": {"id": "old1", "title": "b", "score": 1,
                 "created_utc": 500.0, "permalink": "/r/x/old1/"}}
            ], "after": "next"}}"#
                .to_vec()]),
            ..Default::default()
        };
        let query = SearchQuery {
            search_string: Some("anything".to_string()),
            sort: "relevance".to_string(),
            time: "all".to_string(),
            ..Default::default()
        };
        let token = CancellationToken::new();
        let posts = scraper(upstream)
            .search(&query, 1000, -1, &token)
            .await
            .unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].id, "new1");
    }
}
