use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::data::FeedStore;
use crate::error::{StoreError, CODE_PERMISSION};
use crate::model::{
    ActorId, Comment, CommentId, NewComment, NewPost, Post, PostId, ProfileShape,
};

const POST_SELECT: &str =
    "id,user_id,content,image_url,created_at,profiles(display_name,username,avatar_url)";
const COMMENT_SELECT: &str = "id,post_id,user_id,content,parent_id,created_at";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Project base url. `rest/v1/` is joined under any path it carries.
    pub base_url: String,
    pub api_key: String,
    /// Caller's session token. Falls back to the api key when empty.
    pub access_token: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub http_client: Option<HttpClient>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            access_token: String::new(),
            user_agent: format!("glowfeed/{}", crate::VERSION),
            timeout: Duration::from_secs(10),
            http_client: None,
        }
    }
}

/// Feed store over a PostgREST-style HTTP API.
pub struct Client {
    http: HttpClient,
    rest_url: Url,
    api_key: String,
    access_token: String,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct PostRow {
    id: String,
    user_id: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    profiles: ProfileShape,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            id: PostId::new(row.id),
            author_id: ActorId::new(row.user_id),
            body: row.content.unwrap_or_default(),
            image_url: row.image_url,
            created_at: row.created_at,
            author: row.profiles.normalize(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommentRow {
    id: String,
    post_id: String,
    user_id: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Comment {
            id: CommentId::new(row.id),
            post_id: PostId::new(row.post_id),
            author_id: ActorId::new(row.user_id),
            body: row.content.unwrap_or_default(),
            created_at: row.created_at,
            parent_id: row.parent_id.map(CommentId::new),
        }
    }
}

#[derive(Debug, Serialize)]
struct PostInsert<'a> {
    user_id: &'a str,
    content: &'a str,
    image_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct CommentInsert<'a> {
    post_id: &'a str,
    user_id: &'a str,
    content: &'a str,
    parent_id: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!("remote store url required");
        }
        if config.api_key.trim().is_empty() {
            bail!("remote store api key required");
        }
        let mut base = Url::parse(config.base_url.trim())?;
        // Relative join below keeps any path prefix only if it ends in a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let rest_url = base.join("rest/v1/")?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder().timeout(config.timeout).build()?,
        };
        let access_token = if config.access_token.trim().is_empty() {
            config.api_key.clone()
        } else {
            config.access_token
        };

        Ok(Client {
            http,
            rest_url,
            api_key: config.api_key,
            access_token,
            user_agent: config.user_agent,
        })
    }

    fn table_url(&self, table: &str, params: &[(&str, String)]) -> Result<Url, StoreError> {
        let mut url = self
            .rest_url
            .join(table)
            .map_err(|err| StoreError::new(format!("build url: {err}")))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("apikey", &self.api_key)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
    }

    fn get_rows<T>(&self, table: &str, params: &[(&str, String)]) -> Result<Vec<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        let url = self.table_url(table, params)?;
        debug!(%url, "remote select");
        let resp = self
            .authorized(self.http.get(url))
            .send()
            .map_err(transport_error)?;
        check(resp)?.json().map_err(transport_error)
    }

    fn insert_row<B, T>(&self, table: &str, body: &B) -> Result<T, StoreError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.table_url(table, &[])?;
        debug!(%url, "remote insert");
        let resp = self
            .authorized(self.http.post(url))
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .map_err(transport_error)?;
        let rows: Vec<T> = check(resp)?.json().map_err(transport_error)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::new("insert returned no rows"))
    }
}

impl FeedStore for Client {
    fn fetch_posts(&self) -> Result<Vec<Post>, StoreError> {
        let rows: Vec<PostRow> = self.get_rows(
            "posts",
            &[
                ("select", POST_SELECT.to_string()),
                ("order", "created_at.desc".to_string()),
            ],
        )?;
        Ok(rows.into_iter().map(Post::from).collect())
    }

    fn fetch_comments(&self, post_ids: &[PostId]) -> Result<Vec<Comment>, StoreError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<CommentRow> = self.get_rows(
            "comments",
            &[
                ("select", COMMENT_SELECT.to_string()),
                ("post_id", in_filter(post_ids)),
                ("order", "created_at.asc".to_string()),
            ],
        )?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    fn insert_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let row: PostRow = self.insert_row(
            "posts",
            &PostInsert {
                user_id: post.author_id.as_str(),
                content: &post.body,
                image_url: post.image_url.as_deref(),
            },
        )?;
        Ok(row.into())
    }

    fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let row: CommentRow = self.insert_row(
            "comments",
            &CommentInsert {
                post_id: comment.post_id.as_str(),
                user_id: comment.author_id.as_str(),
                content: &comment.body,
                parent_id: comment.parent_id.as_ref().map(CommentId::as_str),
            },
        )?;
        Ok(row.into())
    }
}

fn in_filter(post_ids: &[PostId]) -> String {
    let quoted = post_ids
        .iter()
        .map(|id| format!("\"{}\"", id.as_str().replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({quoted})")
}

fn transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::timeout(err.to_string())
    } else {
        StoreError::new(err.to_string())
    }
}

fn check(resp: Response) -> Result<Response, StoreError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().unwrap_or_default();
    Err(error_from_body(status.as_u16(), &body))
}

fn error_from_body(status: u16, body: &str) -> StoreError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| format!("remote store returned {status}: {body}"));
    match (parsed.code, status) {
        (Some(code), _) => StoreError::with_code(code, message),
        (None, 401 | 403) => StoreError::with_code(CODE_PERMISSION, message),
        (None, _) => StoreError::new(message),
    }
}
