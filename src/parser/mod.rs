//! Upstream payload decoding
//!
//! The upstream wraps everything in polymorphic "Things" tagged by a
//! `kind` string (`t3` post, `t1` comment, `more` load-more
//! placeholder, `t2` user). The raw layer tolerates unknown kinds by
//! skipping them; everything recognized is decoded into the tagged
//! [`Thing`] variant and dispatched exhaustively from there.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{instant_from_epoch, Comment, Post, PostDetail, UserComment, UserInfo, UserPost};

/// Sentinel child id marking a deep-thread continuation.
pub const CONTINUE_SENTINEL: &str = "continue";

/// Decoding failures. Listing-level failures abort the operation;
/// load-more callers tolerate them per batch.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed upstream JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("post thread payload must contain post and comment listings")]
    InvalidThread,
    #[error("post not found")]
    PostNotFound,
}

// Raw wire shapes ------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RawThing {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawListing {
    #[serde(default)]
    data: RawListingData,
}

#[derive(Debug, Default, Deserialize)]
struct RawListingData {
    #[serde(default)]
    children: Vec<RawThing>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAbout {
    data: UserData,
}

#[derive(Debug, Deserialize)]
struct MoreEnvelope {
    json: MoreEnvelopeJson,
}

#[derive(Debug, Deserialize)]
struct MoreEnvelopeJson {
    data: MoreEnvelopeData,
}

#[derive(Debug, Deserialize)]
struct MoreEnvelopeData {
    #[serde(default)]
    things: Vec<RawThing>,
}

// Typed payloads -------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PostData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommentData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub link_id: String,
    #[serde(default)]
    pub link_title: String,
    #[serde(default)]
    pub replies: Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct MoreData {
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub parent_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub link_karma: i64,
    #[serde(default)]
    pub comment_karma: i64,
}

/// A recognized upstream Thing.
#[derive(Debug)]
pub enum Thing {
    Post(PostData),
    Comment(CommentData),
    MorePlaceholder(MoreData),
    User(UserData),
}

/// Decode one raw Thing; unknown kinds yield `None`, malformed payloads
/// of a recognized kind are an error.
fn decode_thing(raw: RawThing) -> Result<Option<Thing>, ParseError> {
    let thing = match raw.kind.as_str() {
        "t3" => Some(Thing::Post(serde_json::from_value(raw.data)?)),
        "t1" => Some(Thing::Comment(serde_json::from_value(raw.data)?)),
        "more" => Some(Thing::MorePlaceholder(serde_json::from_value(raw.data)?)),
        "t2" => Some(Thing::User(serde_json::from_value(raw.data)?)),
        _ => None,
    };
    Ok(thing)
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

fn canonical_url(permalink: &str) -> String {
    format!("https://reddit.com{permalink}")
}

fn post_from(data: PostData) -> Post {
    Post {
        id: data.id,
        title: data.title,
        body: data.selftext,
        author: data.author,
        score: data.score,
        created_at: instant_from_epoch(data.created_utc),
        flair: non_empty(data.link_flair_text),
        url: canonical_url(&data.permalink),
    }
}

// Listings -------------------------------------------------------------

/// Decode a post listing (subreddit page or search page) into posts and
/// the pagination cursor.
pub fn parse_post_listing(data: &[u8]) -> Result<(Vec<Post>, Option<String>), ParseError> {
    let listing: RawListing = serde_json::from_slice(data)?;
    let after = non_empty(listing.data.after);

    let mut posts = Vec::new();
    for child in listing.data.children {
        match decode_thing(child)? {
            Some(Thing::Post(pd)) => posts.push(post_from(pd)),
            Some(Thing::Comment(_))
            | Some(Thing::MorePlaceholder(_))
            | Some(Thing::User(_))
            | None => {}
        }
    }
    Ok((posts, after))
}

/// Decode a user profile.
pub fn parse_user_info(data: &[u8]) -> Result<UserInfo, ParseError> {
    let about: RawAbout = serde_json::from_slice(data)?;
    Ok(UserInfo {
        username: about.data.name,
        link_karma: about.data.link_karma,
        comment_karma: about.data.comment_karma,
        created_at: instant_from_epoch(about.data.created_utc),
    })
}

/// Decode a user's submissions listing.
pub fn parse_user_posts(data: &[u8]) -> Result<(Vec<UserPost>, Option<String>), ParseError> {
    let listing: RawListing = serde_json::from_slice(data)?;
    let after = non_empty(listing.data.after);

    let mut posts = Vec::new();
    for child in listing.data.children {
        match decode_thing(child)? {
            Some(Thing::Post(pd)) => posts.push(UserPost {
                id: pd.id,
                title: pd.title,
                body: pd.selftext,
                score: pd.score,
                created_at: instant_from_epoch(pd.created_utc),
                subreddit: pd.subreddit,
                flair: non_empty(pd.link_flair_text),
                url: canonical_url(&pd.permalink),
            }),
            Some(Thing::Comment(_))
            | Some(Thing::MorePlaceholder(_))
            | Some(Thing::User(_))
            | None => {}
        }
    }
    Ok((posts, after))
}

/// Decode a user's comments listing.
pub fn parse_user_comments(data: &[u8]) -> Result<(Vec<UserComment>, Option<String>), ParseError> {
    let listing: RawListing = serde_json::from_slice(data)?;
    let after = non_empty(listing.data.after);

    let mut comments = Vec::new();
    for child in listing.data.children {
        match decode_thing(child)? {
            Some(Thing::Comment(cd)) => {
                let post_id = cd
                    .link_id
                    .strip_prefix("t3_")
                    .unwrap_or(&cd.link_id)
                    .to_string();
                comments.push(UserComment {
                    id: cd.id,
                    body: cd.body,
                    score: cd.score,
                    created_at: instant_from_epoch(cd.created_utc),
                    subreddit: cd.subreddit,
                    post_id,
                    post_title: cd.link_title,
                });
            }
            Some(Thing::Post(_))
            | Some(Thing::MorePlaceholder(_))
            | Some(Thing::User(_))
            | None => {}
        }
    }
    Ok((comments, after))
}

// Post threads ---------------------------------------------------------

/// Decode a post thread payload: a two-element array of the post
/// listing and the comment listing.
pub fn parse_post_thread(data: &[u8]) -> Result<PostDetail, ParseError> {
    let blocks: Vec<Value> = serde_json::from_slice(data)?;
    let mut blocks = blocks.into_iter();
    let (post_block, comment_block) = match (blocks.next(), blocks.next()) {
        (Some(p), Some(c)) => (p, c),
        _ => return Err(ParseError::InvalidThread),
    };

    let post_listing: RawListing = serde_json::from_value(post_block)?;
    let mut post = None;
    for child in post_listing.data.children {
        if let Some(Thing::Post(pd)) = decode_thing(child)? {
            post = Some(post_from(pd));
            break;
        }
    }
    let post = post.ok_or(ParseError::PostNotFound)?;

    let comment_listing: RawListing = serde_json::from_value(comment_block)?;
    let comments = decode_forest(comment_listing.data.children)?;

    Ok(PostDetail { post, comments })
}

/// Decode a load-more response into a flat comment list. Two shapes are
/// accepted: the standard `{json:{data:{things:[...]}}}` envelope and a
/// direct array of Things.
pub fn parse_more_children(data: &[u8]) -> Result<Vec<Comment>, ParseError> {
    match serde_json::from_slice::<MoreEnvelope>(data) {
        Ok(envelope) => decode_forest(envelope.json.data.things),
        Err(envelope_err) => match serde_json::from_slice::<Vec<RawThing>>(data) {
            Ok(things) => decode_forest(things),
            Err(_) => Err(ParseError::Json(envelope_err)),
        },
    }
}

// Comment forests ------------------------------------------------------

/// Decode a comment listing's children into a forest. `more` nodes at
/// this level become placeholder comments; `more` nodes nested inside a
/// comment's replies are absorbed into that comment's expansion seed.
fn decode_forest(children: Vec<RawThing>) -> Result<Vec<Comment>, ParseError> {
    let mut comments = Vec::new();

    for child in children {
        match decode_thing(child)? {
            Some(Thing::Comment(cd)) => comments.push(decode_comment(cd)?),
            Some(Thing::MorePlaceholder(md)) => {
                if md.children.is_empty() {
                    continue;
                }
                if md.children.iter().any(|id| id == CONTINUE_SENTINEL) {
                    // Deep-thread continuation: keep the node so the
                    // response shows where the thread goes on, but seed
                    // it with the parent id and flag it so the expander
                    // leaves it alone.
                    let mut cont = Comment::placeholder(
                        format!("continue_{}", Uuid::new_v4()),
                        vec![md.parent_id],
                    );
                    cont.has_more_children = true;
                    comments.push(cont);
                } else {
                    comments.push(Comment::placeholder(
                        format!("more_{}", Uuid::new_v4()),
                        md.children,
                    ));
                }
            }
            Some(Thing::Post(_)) | Some(Thing::User(_)) | None => {}
        }
    }

    Ok(comments)
}

fn decode_comment(cd: CommentData) -> Result<Comment, ParseError> {
    let mut comment = Comment {
        id: cd.id,
        author: cd.author,
        body: cd.body,
        score: cd.score,
        created_at: instant_from_epoch(cd.created_utc),
        replies: Vec::new(),
        is_placeholder: false,
        has_more_children: false,
        more_ids: Vec::new(),
    };

    // `replies` is either an empty string or a nested listing.
    if cd.replies.is_object() {
        if let Ok(listing) = serde_json::from_value::<RawListing>(cd.replies) {
            for child in listing.data.children {
                match decode_thing(child)? {
                    Some(Thing::Comment(inner)) => comment.replies.push(decode_comment(inner)?),
                    Some(Thing::MorePlaceholder(md)) => {
                        if !md.children.is_empty() {
                            comment.has_more_children = true;
                            comment.more_ids.extend(md.children);
                        }
                    }
                    Some(Thing::Post(_)) | Some(Thing::User(_)) | None => {}
                }
            }
        }
    }

    Ok(comment)
}
