use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, Row};
use tracing::info;
use uuid::Uuid;

use crate::data::FeedStore;
use crate::error::{StoreError, CODE_CHECK, CODE_FOREIGN_KEY, CODE_TIMEOUT};
use crate::model::{
    ActorId, AuthorProfile, Comment, CommentId, NewComment, NewPost, Post, PostId,
};

/// SQLite-backed feed store for local use.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
    pub busy_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("storage: enable foreign keys")?;
        conn.busy_timeout(opts.busy_timeout)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;
        info!(path = %path.display(), "opened feed store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn upsert_profile(&self, actor: &ActorId, profile: &AuthorProfile) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO profiles (id, display_name, username, avatar_url)
VALUES (?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET
  display_name = excluded.display_name,
  username = excluded.username,
  avatar_url = excluded.avatar_url
"#,
            params![
                actor.as_str(),
                profile.display_name,
                profile.username,
                profile.avatar_url,
            ],
        )
        .context("storage: upsert profile")?;
        Ok(())
    }
}

impl FeedStore for Store {
    fn fetch_posts(&self) -> Result<Vec<Post>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                r#"
SELECT p.id, p.user_id, p.content, p.image_url, p.created_at,
       pr.id, pr.display_name, pr.username, pr.avatar_url
FROM posts p
LEFT JOIN profiles pr ON pr.id = p.user_id
ORDER BY p.created_at DESC, p.rowid DESC
"#,
            )
            .map_err(store_error)?;
        let rows = stmt
            .query_map([], post_from_row)
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        Ok(rows)
    }

    fn fetch_comments(&self, post_ids: &[PostId]) -> Result<Vec<Comment>, StoreError> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = post_ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(",");
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                r#"
SELECT id, post_id, user_id, content, parent_id, created_at
FROM comments
WHERE post_id IN ({})
ORDER BY created_at ASC, rowid ASC
"#,
                placeholders
            ))
            .map_err(store_error)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(post_ids.iter().map(PostId::as_str)),
                comment_from_row,
            )
            .map_err(store_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_error)?;
        Ok(rows)
    }

    fn insert_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO posts (id, user_id, content, image_url, created_at)
VALUES (?1, ?2, ?3, ?4, ?5)
"#,
            params![
                id,
                post.author_id.as_str(),
                post.body,
                post.image_url,
                created_at.timestamp_millis(),
            ],
        )
        .map_err(store_error)?;
        Ok(Post {
            id: PostId::new(id),
            author_id: post.author_id,
            body: post.body,
            image_url: post.image_url,
            created_at: millis_to_utc(created_at.timestamp_millis()),
            author: None,
        })
    }

    fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO comments (id, post_id, user_id, content, parent_id, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                id,
                comment.post_id.as_str(),
                comment.author_id.as_str(),
                comment.body,
                comment.parent_id.as_ref().map(CommentId::as_str),
                created_at.timestamp_millis(),
            ],
        )
        .map_err(store_error)?;
        Ok(Comment {
            id: CommentId::new(id),
            post_id: comment.post_id,
            author_id: comment.author_id,
            body: comment.body,
            created_at: millis_to_utc(created_at.timestamp_millis()),
            parent_id: comment.parent_id,
        })
    }
}

fn store_error(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_TRIGGER {
            return StoreError::with_code(CODE_CHECK, err.to_string());
        }
    }
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            StoreError::with_code(CODE_TIMEOUT, err.to_string())
        }
        Some(ErrorCode::ConstraintViolation) if err.to_string().contains("FOREIGN KEY") => {
            StoreError::with_code(CODE_FOREIGN_KEY, err.to_string())
        }
        _ => StoreError::new(err.to_string()),
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    let created: i64 = row.get(4)?;
    let profile_id: Option<String> = row.get(5)?;
    let author = profile_id.map(|_| -> rusqlite::Result<AuthorProfile> {
        Ok(AuthorProfile {
            display_name: row.get(6)?,
            username: row.get(7)?,
            avatar_url: row.get(8)?,
        })
    });
    Ok(Post {
        id: PostId::new(row.get::<_, String>(0)?),
        author_id: ActorId::new(row.get::<_, String>(1)?),
        body: row.get(2)?,
        image_url: row.get(3)?,
        created_at: millis_to_utc(created),
        author: author.transpose()?,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    let created: i64 = row.get(5)?;
    let parent: Option<String> = row.get(4)?;
    Ok(Comment {
        id: CommentId::new(row.get::<_, String>(0)?),
        post_id: PostId::new(row.get::<_, String>(1)?),
        author_id: ActorId::new(row.get::<_, String>(2)?),
        body: row.get(3)?,
        created_at: millis_to_utc(created),
        parent_id: parent.map(CommentId::new),
    })
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)
            .with_context(|| format!("storage: apply migration {version}"))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![version, Utc::now().timestamp()],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS profiles (
  id TEXT PRIMARY KEY,
  display_name TEXT,
  username TEXT UNIQUE,
  avatar_url TEXT
);

CREATE TABLE IF NOT EXISTS posts (
  id TEXT PRIMARY KEY,
  user_id TEXT NOT NULL,
  content TEXT NOT NULL CHECK (length(content) BETWEEN 1 AND 500),
  image_url TEXT,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS comments (
  id TEXT PRIMARY KEY,
  post_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  content TEXT NOT NULL CHECK (length(content) BETWEEN 1 AND 500),
  parent_id TEXT,
  created_at INTEGER NOT NULL,
  FOREIGN KEY(post_id) REFERENCES posts(id) ON DELETE CASCADE,
  FOREIGN KEY(parent_id) REFERENCES comments(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
"#,
        r#"
CREATE TRIGGER IF NOT EXISTS comments_reply_shape
BEFORE INSERT ON comments
WHEN NEW.parent_id IS NOT NULL AND EXISTS (
  SELECT 1 FROM comments parent
  WHERE parent.id = NEW.parent_id
    AND (parent.post_id <> NEW.post_id OR parent.parent_id IS NOT NULL)
)
BEGIN
  SELECT RAISE(ABORT, 'reply parent must be a top-level comment on the same post');
END;
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("glowfeed").join("feed.db"))
}
