//! Upstream site adapter
//!
//! Formulates the site-specific URLs, executes them through the
//! anti-detection transport, and exposes the uniform [`Upstream`]
//! fetch interface the scraper is written against. Load-more requests
//! carry their own retry policy with an extended backoff on explicit
//! rate-limit signals, independent of the transport's retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::transport::{cancellable_sleep, RetryableTransport, TransportError};

/// The load-more operation lives on the programmatic subdomain rather
/// than the listing host.
const MORE_CHILDREN_BASE: &str = "https://api.reddit.com/api/morechildren";

/// Load-more retry policy, separate from the transport's.
const MORE_CHILDREN_ATTEMPTS: u32 = 3;
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(30);

/// Failures from the upstream adapter.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid upstream URL: {0}")]
    Url(#[from] url::ParseError),
}

impl UpstreamError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UpstreamError::Transport(t) if t.is_cancelled())
    }
}

/// A typed search request. Qualified fields are folded into the `q=`
/// expression; the rest travel as direct query parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_string: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subreddit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selftext: Option<String>,
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub self_post: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nsfw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrict_sr: Option<String>,
    pub sort: String,
    pub time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl SearchQuery {
    /// The `q=` expression: free text first, then qualified sub-queries
    /// in a fixed order, joined by spaces.
    fn query_expression(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(text) = self.search_string.as_deref().filter(|s| !s.is_empty()) {
            parts.push(text.to_string());
        }
        for (field, value) in [
            ("subreddit", &self.subreddit),
            ("author", &self.author),
            ("site", &self.site),
            ("url", &self.url),
            ("selftext", &self.selftext),
            ("self", &self.self_post),
            ("nsfw", &self.nsfw),
        ] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                parts.push(format!("{field}:{value}"));
            }
        }
        parts.join(" ")
    }
}

/// Uniform fetch interface over the upstream site. Everything returns
/// the raw response body; decoding is the parser's contract.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn subreddit_page(
        &self,
        subreddit: &str,
        page_limit: Option<u32>,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn user_about(
        &self,
        username: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn user_posts_page(
        &self,
        username: &str,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn user_comments_page(
        &self,
        username: &str,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn post_thread(
        &self,
        post_id: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn search_page(
        &self,
        query: &SearchQuery,
        page_limit: u32,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;

    async fn more_children(
        &self,
        post_id: &str,
        child_ids: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError>;
}

/// Production adapter backed by the retryable transport.
pub struct UpstreamClient {
    transport: RetryableTransport,
    base_url: Url,
    user_agent: String,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let transport = RetryableTransport::new(config)?;
        let base_url = Url::parse(&config.base_url)?;
        Ok(UpstreamClient {
            transport,
            base_url,
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn subreddit_url(
        &self,
        subreddit: &str,
        page_limit: Option<u32>,
        after: &str,
    ) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.join(&format!("/r/{subreddit}/new.json"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("raw_json", "1");
            if let Some(limit) = page_limit.filter(|l| *l > 0) {
                pairs.append_pair("limit", &limit.to_string());
            }
            if !after.is_empty() {
                pairs.append_pair("after", after);
            }
        }
        Ok(url)
    }

    pub fn user_about_url(&self, username: &str) -> Result<Url, UpstreamError> {
        Ok(self.base_url.join(&format!("/user/{username}/about.json"))?)
    }

    pub fn user_posts_url(&self, username: &str, after: &str) -> Result<Url, UpstreamError> {
        let mut url = self
            .base_url
            .join(&format!("/user/{username}/submitted/new.json"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("raw_json", "1");
            pairs.append_pair("sort", "new");
            if !after.is_empty() {
                pairs.append_pair("after", after);
            }
        }
        Ok(url)
    }

    pub fn user_comments_url(&self, username: &str, after: &str) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.join(&format!("/user/{username}/comments/.json"))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("raw_json", "1");
            pairs.append_pair("limit", "100");
            if !after.is_empty() {
                pairs.append_pair("after", after);
            }
        }
        Ok(url)
    }

    pub fn post_thread_url(&self, post_id: &str) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.join(&format!("/comments/{post_id}.json"))?;
        url.query_pairs_mut()
            .append_pair("raw_json", "1")
            .append_pair("sort", "new");
        Ok(url)
    }

    pub fn search_url(
        &self,
        query: &SearchQuery,
        page_limit: u32,
        after: &str,
    ) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.join("/search.json")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("raw_json", "1");

            let q = query.query_expression();
            if !q.is_empty() {
                pairs.append_pair("q", &q);
            }
            if !query.sort.is_empty() {
                pairs.append_pair("sort", &query.sort);
            }
            if !query.time.is_empty() {
                pairs.append_pair("t", &query.time);
            }
            if page_limit > 0 {
                pairs.append_pair("limit", &page_limit.to_string());
            }
            if !after.is_empty() {
                pairs.append_pair("after", after);
            }
            if let Some(before) = query.before.as_deref().filter(|b| !b.is_empty()) {
                pairs.append_pair("before", before);
            }
            if let Some(restrict) = query.restrict_sr.as_deref().filter(|r| !r.is_empty()) {
                pairs.append_pair("restrict_sr", restrict);
            }
        }
        Ok(url)
    }

    pub fn more_children_url(
        &self,
        post_id: &str,
        child_ids: &[String],
    ) -> Result<Url, UpstreamError> {
        let link_id = if post_id.starts_with("t3_") {
            post_id.to_string()
        } else {
            format!("t3_{post_id}")
        };

        let children = child_ids
            .iter()
            .map(|id| id.strip_prefix("t1_").unwrap_or(id))
            .collect::<Vec<_>>()
            .join(",");

        let mut url = Url::parse(MORE_CHILDREN_BASE)?;
        url.query_pairs_mut()
            .append_pair("api_type", "json")
            .append_pair("link_id", &link_id)
            .append_pair("children", &children)
            .append_pair("limit_children", "false")
            .append_pair("sort", "new");
        Ok(url)
    }
}

#[async_trait]
impl Upstream for UpstreamClient {
    async fn subreddit_page(
        &self,
        subreddit: &str,
        page_limit: Option<u32>,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.subreddit_url(subreddit, page_limit, after)?;
        debug!(%url, "fetching subreddit page");
        Ok(self.transport.get(&url, token).await?)
    }

    async fn user_about(
        &self,
        username: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.user_about_url(username)?;
        Ok(self.transport.get(&url, token).await?)
    }

    async fn user_posts_page(
        &self,
        username: &str,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.user_posts_url(username, after)?;
        debug!(%url, "fetching user posts page");
        Ok(self.transport.get(&url, token).await?)
    }

    async fn user_comments_page(
        &self,
        username: &str,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.user_comments_url(username, after)?;
        debug!(%url, "fetching user comments page");
        Ok(self.transport.get(&url, token).await?)
    }

    async fn post_thread(
        &self,
        post_id: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.post_thread_url(post_id)?;
        debug!(%url, "fetching post thread");
        Ok(self.transport.get(&url, token).await?)
    }

    async fn search_page(
        &self,
        query: &SearchQuery,
        page_limit: u32,
        after: &str,
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.search_url(query, page_limit, after)?;
        debug!(%url, "fetching search page");
        Ok(self.transport.get(&url, token).await?)
    }

    /// Fetch replacement comments for a batch of child ids. Keeps its
    /// own attempt loop so a rate-limited load-more backs off far
    /// longer than a listing fetch would.
    async fn more_children(
        &self,
        post_id: &str,
        child_ids: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<u8>, UpstreamError> {
        let url = self.more_children_url(post_id, child_ids)?;

        let mut headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, agent);
        }

        let mut last_err = TransportError::Cancelled;
        for attempt in 0..MORE_CHILDREN_ATTEMPTS {
            if attempt > 0 {
                let backoff = Duration::from_secs(1u64 << attempt);
                debug!(attempt, ?backoff, "retrying load-more request");
                cancellable_sleep(backoff, token).await?;
            }

            match self
                .transport
                .get_with_headers(&url, headers.clone(), token)
                .await
            {
                Ok(body) => return Ok(body),
                Err(err) if err.is_cancelled() => return Err(err.into()),
                Err(err) => {
                    if err.is_rate_limited() {
                        warn!("load-more rate limited, backing off {RATE_LIMIT_BACKOFF:?}");
                        cancellable_sleep(RATE_LIMIT_BACKOFF, token).await?;
                    }
                    last_err = err;
                }
            }
        }

        Err(last_err.into())
    }
}
