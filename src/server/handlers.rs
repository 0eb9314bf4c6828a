//! Request handlers
//!
//! Each handler validates its query parameters, arms a per-request
//! deadline on a cancellation token, invokes the scrape service, and
//! serializes the result. Unknown query parameters are ignored;
//! unparseable ones name the offending parameter in a 400.

use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::types::{PostDetail, UserActivity};
use crate::upstream::SearchQuery;

use super::types::*;
use super::AppState;

/// Default per-request deadline; unbounded-with-cutoff user and search
/// requests and post expansion get larger ones.
const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
const UNBOUNDED_DEADLINE: Duration = Duration::from_secs(240);
const POST_DEADLINE: Duration = Duration::from_secs(300);

/// Cancels a token after a timeout; disarmed when the request finishes
/// first.
struct Deadline {
    handle: tokio::task::JoinHandle<()>,
}

impl Deadline {
    fn arm(token: &CancellationToken, after: Duration) -> Self {
        let token = token.clone();
        Deadline {
            handle: tokio::spawn(async move {
                tokio::time::sleep(after).await;
                token.cancel();
            }),
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn require<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing `{name}` parameter")))
}

fn parse_i64(value: &Option<String>, name: &str) -> Result<Option<i64>, ApiError> {
    match value.as_deref().filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("invalid `{name}` parameter"))),
    }
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SubredditParams {
    subreddit: Option<String>,
    since_timestamp: Option<String>,
    limit: Option<String>,
}

pub async fn get_subreddit(
    State(state): State<AppState>,
    Query(params): Query<SubredditParams>,
) -> Result<Json<SubredditResponse>, ApiError> {
    let subreddit = require(&params.subreddit, "subreddit")?.to_string();
    let since = parse_i64(&params.since_timestamp, "since_timestamp")?.unwrap_or(0);
    let limit = parse_i64(&params.limit, "limit")?.unwrap_or(state.default_post_limit);
    if limit < -1 {
        return Err(ApiError::bad_request("limit must be -1 or a positive integer"));
    }

    let token = CancellationToken::new();
    let _deadline = Deadline::arm(&token, DEFAULT_DEADLINE);
    let started = Instant::now();

    let posts = state
        .service
        .scrape_subreddit(&subreddit, since, limit, &token)
        .await
        .map_err(|err| {
            error!(error = %err, %subreddit, "subreddit scrape failed");
            ApiError::bad_gateway(format!("scrape error: {err}"))
        })?;

    Ok(Json(SubredditResponse {
        meta: SubredditMeta {
            requested_limit: limit,
            actual_count: posts.len(),
            subreddit,
            since_timestamp: since,
            processing_time_ms: started.elapsed().as_millis() as u64,
        },
        posts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UserParams {
    username: Option<String>,
    since_timestamp: Option<String>,
    post_limit: Option<String>,
    comment_limit: Option<String>,
}

pub async fn get_user_activity(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<UserActivity>, ApiError> {
    let username = require(&params.username, "username")?.to_string();
    let since = parse_i64(&params.since_timestamp, "since_timestamp")?.unwrap_or(0);

    let explicit_post_limit = parse_i64(&params.post_limit, "post_limit")?;
    let post_limit = explicit_post_limit.unwrap_or(state.default_post_limit);
    let comment_limit = match parse_i64(&params.comment_limit, "comment_limit")? {
        Some(v) => v,
        // an omitted comment limit follows the post limit when that was
        // given explicitly
        None => explicit_post_limit.unwrap_or(state.default_comment_limit),
    };
    if post_limit < -1 || comment_limit < -1 {
        return Err(ApiError::bad_request(
            "limits must be -1 or a positive integer",
        ));
    }

    let deadline = if (post_limit == -1 || comment_limit == -1) && since > 0 {
        UNBOUNDED_DEADLINE
    } else {
        DEFAULT_DEADLINE
    };
    let token = CancellationToken::new();
    let _deadline = Deadline::arm(&token, deadline);

    let activity = state
        .service
        .scrape_user_activity(&username, since, post_limit, comment_limit, &token)
        .await
        .map_err(|err| {
            error!(error = %err, %username, "user scrape failed");
            ApiError::bad_gateway(format!("scrape user data error: {err}"))
        })?;

    Ok(Json(activity))
}

#[derive(Debug, Deserialize)]
pub struct PostParams {
    post_id: Option<String>,
}

pub async fn get_post(
    State(state): State<AppState>,
    Query(params): Query<PostParams>,
) -> Result<Json<PostDetail>, ApiError> {
    let post_id = require(&params.post_id, "post_id")?.to_string();

    let token = CancellationToken::new();
    let _deadline = Deadline::arm(&token, POST_DEADLINE);

    let detail = state
        .service
        .scrape_post(&post_id, &token)
        .await
        .map_err(|err| {
            error!(error = %err, %post_id, "post scrape failed");
            ApiError::bad_gateway(err.to_string())
        })?;

    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    search_string: Option<String>,
    subreddit: Option<String>,
    author: Option<String>,
    site: Option<String>,
    url: Option<String>,
    selftext: Option<String>,
    #[serde(rename = "self")]
    self_post: Option<String>,
    nsfw: Option<String>,
    restrict_sr: Option<String>,
    sort: Option<String>,
    time: Option<String>,
    limit: Option<String>,
    after: Option<String>,
    before: Option<String>,
    since_timestamp: Option<String>,
    compound_query: Option<String>,
}

/// Fold a compound query into the typed search parameters: `key:value`
/// tokens with a known key populate that field, everything else joins
/// the free-text query.
fn apply_compound_query(query: &mut SearchQuery, compound: &str) {
    for token in compound.split_whitespace() {
        let known = token.split_once(':').and_then(|(key, value)| {
            let value = value.trim().to_string();
            let target = match key.trim() {
                "subreddit" => &mut query.subreddit,
                "author" => &mut query.author,
                "site" => &mut query.site,
                "url" => &mut query.url,
                "selftext" => &mut query.selftext,
                "self" => &mut query.self_post,
                "nsfw" => &mut query.nsfw,
                _ => return None,
            };
            *target = Some(value);
            Some(())
        });

        if known.is_none() {
            match &mut query.search_string {
                Some(existing) if !existing.is_empty() => {
                    existing.push(' ');
                    existing.push_str(token);
                }
                _ => query.search_string = Some(token.to_string()),
            }
        }
    }
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let since = parse_i64(&params.since_timestamp, "since_timestamp")?.unwrap_or(0);
    let limit = parse_i64(&params.limit, "limit")?.unwrap_or(state.default_post_limit);
    if limit < -1 {
        return Err(ApiError::bad_request("limit must be -1 or a positive integer"));
    }

    let raw_query = params.search_string.clone().unwrap_or_default();

    let mut query = SearchQuery {
        search_string: params.search_string,
        subreddit: params.subreddit,
        author: params.author,
        site: params.site,
        url: params.url,
        selftext: params.selftext,
        self_post: params.self_post,
        nsfw: params.nsfw,
        restrict_sr: params.restrict_sr,
        sort: params.sort.unwrap_or_else(|| "relevance".to_string()),
        time: params.time.unwrap_or_else(|| "all".to_string()),
        after: params.after,
        before: params.before,
    };
    if let Some(compound) = &params.compound_query {
        apply_compound_query(&mut query, compound);
    }

    let deadline = if limit == -1 && since > 0 {
        UNBOUNDED_DEADLINE
    } else {
        DEFAULT_DEADLINE
    };
    let token = CancellationToken::new();
    let _deadline = Deadline::arm(&token, deadline);
    let started = Instant::now();

    let posts = state
        .service
        .search(&query, since, limit, &token)
        .await
        .map_err(|err| {
            error!(error = %err, "search failed");
            ApiError::bad_gateway(format!("search error: {err}"))
        })?;

    let requested_limit = if limit == -1 {
        if since > 0 {
            "all items since timestamp".to_string()
        } else {
            "default maximum (1000)".to_string()
        }
    } else {
        limit.to_string()
    };

    Ok(Json(SearchResponse {
        meta: SearchMeta {
            query: raw_query,
            count: posts.len(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            requested_limit,
            params: query,
        },
        posts,
    }))
}
