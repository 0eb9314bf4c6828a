//! Thread expansion engine
//!
//! Resolves "load more" placeholders in a comment forest. Each round
//! traverses the tree for expansion seeds, fetches replacements through
//! a bounded worker pool, and grafts the results back in submission
//! order so placement is deterministic. Rounds are bounded three ways:
//! an iteration cap, a stuck detector for upstreams that keep returning
//! the same unresolved ids, and the request's cancellation token.

use std::collections::HashSet;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser::{self, CONTINUE_SENTINEL};
use crate::types::{Comment, PostDetail};
use crate::upstream::Upstream;

/// Round cap for the outer loop.
const MAX_ITERATIONS: usize = 60;
/// Expansion tasks dispatched per round.
const BATCH_MAX: usize = 15;
/// Consecutive no-progress rounds tolerated before bailing out.
const STUCK_LIMIT: u32 = 3;
/// Concurrent workers resolving tasks within a round.
const WORKER_COUNT: usize = 3;
/// Child ids per load-more request; the upstream rejects larger batches.
const SUB_BATCH_SIZE: usize = 100;
/// Concurrent load-more requests within one task.
const MAX_CONCURRENT_SUB_BATCHES: usize = 2;
/// Pacing between rounds, with a longer break on late rounds.
const ROUND_DELAY: Duration = Duration::from_secs(2);
const LONG_BREAK: Duration = Duration::from_secs(5);
const SUB_BATCH_DELAY: Duration = Duration::from_secs(1);

/// One unit of expansion work: a placeholder (or a comment with
/// unloaded descendants) and the child ids that resolve it.
#[derive(Debug, Clone)]
pub struct ExpansionTask {
    pub parent_id: String,
    pub placeholder_id: String,
    pub depth: usize,
    pub child_ids: Vec<String>,
}

/// A resolved task, carrying the comments fetched for it.
#[derive(Debug)]
pub struct ExpansionResult {
    pub task: ExpansionTask,
    pub comments: Vec<Comment>,
}

/// Expand a post's comment forest in place. Returns the number of
/// comments grafted in. Always finishes with a sweep that removes any
/// placeholder nodes still in the tree.
pub async fn expand_thread<U: Upstream + ?Sized>(
    upstream: &U,
    post_id: &str,
    detail: &mut PostDetail,
    token: &CancellationToken,
) -> usize {
    let mut expanded = 0usize;
    let mut previous_remaining = 0usize;
    let mut stuck_rounds = 0u32;

    for round in 0..MAX_ITERATIONS {
        if token.is_cancelled() {
            debug!(round, "expansion cancelled, keeping partial tree");
            break;
        }

        let mut tasks = collect_tasks(detail);
        if tasks.is_empty() {
            debug!(round, "no expansion seeds left");
            break;
        }

        // Largest batches first: more payload per round-trip.
        tasks.sort_by(|a, b| b.child_ids.len().cmp(&a.child_ids.len()));

        let remaining: usize = tasks.iter().map(|t| t.child_ids.len()).sum();
        if remaining == previous_remaining && remaining > 0 {
            stuck_rounds += 1;
            if stuck_rounds >= STUCK_LIMIT {
                debug!(round, remaining, "no progress after {stuck_rounds} rounds, stopping");
                break;
            }
        } else {
            stuck_rounds = 0;
        }
        previous_remaining = remaining;

        debug!(round, tasks = tasks.len(), remaining, "expansion round starting");

        if round > 0 && !pace_round(round, token).await {
            break;
        }

        tasks.truncate(BATCH_MAX);

        let results: Vec<ExpansionResult> = stream::iter(tasks)
            .map(|task| resolve_task(upstream, post_id, task, token))
            .buffered(WORKER_COUNT)
            .collect()
            .await;

        let mut round_added = 0usize;
        for result in results {
            if !result.comments.is_empty() {
                round_added += result.comments.len();
                graft(detail, &result.task, result.comments);
            }
        }
        expanded += round_added;

        if round_added == 0 {
            debug!(round, "round added no comments");
        }
    }

    let removed = remove_placeholders(&mut detail.comments);
    if removed > 0 {
        debug!(removed, "swept unresolved placeholders");
    }

    expanded
}

/// Sleep between rounds; late rounds take an extra break to ease
/// upstream pressure. Returns false when cancelled.
async fn pace_round(round: usize, token: &CancellationToken) -> bool {
    let mut delay = ROUND_DELAY;
    if round > 10 && round % 5 == 0 {
        delay += LONG_BREAK;
    }
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Depth-first traversal collecting expansion seeds. Placeholders are
/// visited keyed by their id, a real comment's unloaded-descendants
/// case by `id + "-more"`; continuation seeds are left alone.
fn collect_tasks(detail: &PostDetail) -> Vec<ExpansionTask> {
    let mut tasks = Vec::new();
    let mut visited = HashSet::new();
    walk(
        &detail.comments,
        &detail.post.id,
        0,
        &mut visited,
        &mut tasks,
    );
    tasks
}

fn walk(
    comments: &[Comment],
    parent_id: &str,
    depth: usize,
    visited: &mut HashSet<String>,
    tasks: &mut Vec<ExpansionTask>,
) {
    for comment in comments {
        if comment.is_placeholder
            && !comment.has_more_children
            && !comment.more_ids.is_empty()
            && !comment.more_ids.iter().any(|id| id == CONTINUE_SENTINEL)
            && visited.insert(comment.id.clone())
        {
            tasks.push(ExpansionTask {
                parent_id: parent_id.to_string(),
                placeholder_id: comment.id.clone(),
                depth,
                child_ids: comment.more_ids.clone(),
            });
        }

        if !comment.is_placeholder
            && comment.has_more_children
            && !comment.more_ids.is_empty()
            && !comment.more_ids.iter().any(|id| id == CONTINUE_SENTINEL)
            && visited.insert(format!("{}-more", comment.id))
        {
            tasks.push(ExpansionTask {
                parent_id: comment.id.clone(),
                placeholder_id: format!("{}-more", comment.id),
                depth: depth + 1,
                child_ids: comment.more_ids.clone(),
            });
        }

        if !comment.replies.is_empty() {
            walk(&comment.replies, &comment.id, depth + 1, visited, tasks);
        }
    }
}

/// Resolve one task: clean the ids, fetch in sub-batches with bounded
/// concurrency, parse. Fetch and parse failures are tolerated per
/// batch; the task simply yields fewer comments.
async fn resolve_task<U: Upstream + ?Sized>(
    upstream: &U,
    post_id: &str,
    task: ExpansionTask,
    token: &CancellationToken,
) -> ExpansionResult {
    let ids = clean_child_ids(&task.child_ids);
    if ids.is_empty() {
        return ExpansionResult {
            task,
            comments: Vec::new(),
        };
    }

    let batches: Vec<Vec<String>> = ids.chunks(SUB_BATCH_SIZE).map(|c| c.to_vec()).collect();

    let fetched: Vec<Vec<Comment>> = stream::iter(batches.into_iter().enumerate())
        .map(|(index, batch)| async move {
            if index > 0 {
                let keep_going = tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(SUB_BATCH_DELAY) => true,
                };
                if !keep_going {
                    return Vec::new();
                }
            }
            if token.is_cancelled() {
                return Vec::new();
            }

            match upstream.more_children(post_id, &batch, token).await {
                Ok(body) => match parser::parse_more_children(&body) {
                    Ok(comments) => comments,
                    Err(err) => {
                        warn!(error = %err, batch = index, "discarding unparseable load-more batch");
                        Vec::new()
                    }
                },
                Err(err) => {
                    if !err.is_cancelled() {
                        warn!(error = %err, batch = index, "load-more batch failed");
                    }
                    Vec::new()
                }
            }
        })
        .buffered(MAX_CONCURRENT_SUB_BATCHES)
        .collect()
        .await;

    ExpansionResult {
        comments: fetched.concat(),
        task,
    }
}

/// Deduplicate, drop the continuation sentinel, and strip the comment
/// type prefix the load-more endpoint rejects.
fn clean_child_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| id.as_str() != CONTINUE_SENTINEL)
        .map(|id| id.strip_prefix("t1_").unwrap_or(id).to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Graft a task's fetched comments into the tree. Depth 0 replaces the
/// placeholder in the root list in place; deeper tasks replace within
/// the parent's replies. Fallbacks append with dedup, ending at the
/// root so fetched comments are never dropped on a placement miss.
fn graft(detail: &mut PostDetail, task: &ExpansionTask, comments: Vec<Comment>) {
    let mut batch = dedupe_by_id(comments);
    if batch.is_empty() {
        return;
    }
    batch.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    if task.depth == 0 {
        if !replace_placeholder(&mut detail.comments, &task.placeholder_id, &batch) {
            warn!(
                placeholder = %task.placeholder_id,
                count = batch.len(),
                "placeholder missing from root list, appending"
            );
            append_without_duplicates(&mut detail.comments, batch);
        }
        return;
    }

    if replace_in_tree(
        &mut detail.comments,
        &task.parent_id,
        &task.placeholder_id,
        &batch,
    ) {
        return;
    }
    if append_to_parent(&mut detail.comments, &task.parent_id, &batch) {
        return;
    }
    warn!(
        parent = %task.parent_id,
        count = batch.len(),
        "parent vanished from tree, grafting at root"
    );
    append_without_duplicates(&mut detail.comments, batch);
}

fn dedupe_by_id(comments: Vec<Comment>) -> Vec<Comment> {
    let mut seen = HashSet::new();
    comments
        .into_iter()
        .filter(|c| seen.insert(c.id.clone()))
        .collect()
}

/// Replace a placeholder in a sibling list, preserving its position.
fn replace_placeholder(comments: &mut Vec<Comment>, placeholder_id: &str, batch: &[Comment]) -> bool {
    if comments.is_empty() || batch.is_empty() {
        return false;
    }
    if let Some(pos) = comments
        .iter()
        .position(|c| c.id == placeholder_id && c.is_placeholder)
    {
        comments.splice(pos..=pos, batch.iter().cloned());
        true
    } else {
        false
    }
}

fn replace_in_tree(
    comments: &mut [Comment],
    parent_id: &str,
    placeholder_id: &str,
    batch: &[Comment],
) -> bool {
    for comment in comments.iter_mut() {
        if comment.id == parent_id
            && replace_placeholder(&mut comment.replies, placeholder_id, batch)
        {
            return true;
        }
        if !comment.replies.is_empty()
            && replace_in_tree(&mut comment.replies, parent_id, placeholder_id, batch)
        {
            return true;
        }
    }
    false
}

fn append_to_parent(comments: &mut [Comment], parent_id: &str, batch: &[Comment]) -> bool {
    for comment in comments.iter_mut() {
        if comment.id == parent_id {
            append_without_duplicates(&mut comment.replies, batch.to_vec());
            return true;
        }
        if !comment.replies.is_empty() && append_to_parent(&mut comment.replies, parent_id, batch) {
            return true;
        }
    }
    false
}

fn append_without_duplicates(existing: &mut Vec<Comment>, batch: Vec<Comment>) {
    let present: HashSet<String> = existing.iter().map(|c| c.id.clone()).collect();
    for comment in batch {
        if !present.contains(&comment.id) {
            existing.push(comment);
        }
    }
}

/// Recursive sweep removing every placeholder still in the forest.
fn remove_placeholders(comments: &mut Vec<Comment>) -> usize {
    let before = comments.len();
    comments.retain(|c| !c.is_placeholder);
    let mut removed = before - comments.len();
    for comment in comments.iter_mut() {
        removed += remove_placeholders(&mut comment.replies);
    }
    removed
}
