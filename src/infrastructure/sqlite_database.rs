use async_trait::async_trait;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, instrument};

use crate::core::{extract_tags, Id, Timestamp};
use crate::error::{AppError, AppResult};
use crate::infrastructure::graph_store::{ensure_distinct, GraphStore, RecommendationStore};
use crate::models::{
    CandidateQuery, CandidateRow, CandidateSource, EdgeLabel, Post, User, UserProfile,
    UserWithRelationships,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        created_at TEXT NOT NULL,
        username TEXT,
        name TEXT,
        bio TEXT,
        location TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        created_at TEXT NOT NULL,
        likes INTEGER NOT NULL DEFAULT 0,
        views INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS post_tags (
        post_id TEXT NOT NULL,
        tag TEXT NOT NULL,
        PRIMARY KEY (post_id, tag)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        src TEXT NOT NULL,
        label TEXT NOT NULL,
        dst TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (src, label, dst)
    )
    "#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_id ON users(id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_posts_id ON posts(id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_likes ON posts(likes)",
    "CREATE INDEX IF NOT EXISTS idx_posts_created_at_likes ON posts(created_at, likes)",
    "CREATE INDEX IF NOT EXISTS idx_posts_user_id ON posts(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_post_tags_tag ON post_tags(tag)",
    "CREATE INDEX IF NOT EXISTS idx_edges_dst_label ON edges(dst, label)",
];

const USER_COLUMNS: &str = "u.id, u.created_at, u.username, u.name, u.bio, u.location";

fn read_id(row: &SqliteRow, column: &str) -> AppResult<Id> {
    let raw: String = row.try_get(column)?;
    Id::parse(&raw).map_err(|e| AppError::Database(format!("corrupt id in {}: {}", column, e)))
}

fn read_user(row: &SqliteRow) -> AppResult<User> {
    Ok(User {
        id: read_id(row, "id")?,
        created_at: row.try_get("created_at")?,
        username: row.try_get("username")?,
        name: row.try_get("name")?,
        bio: row.try_get("bio")?,
        location: row.try_get("location")?,
    })
}

async fn user_exists(conn: &mut SqliteConnection, id: Id) -> AppResult<bool> {
    let row = sqlx::query("SELECT 1 FROM users WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

async fn post_exists(conn: &mut SqliteConnection, id: Id) -> AppResult<bool> {
    let row = sqlx::query("SELECT 1 FROM posts WHERE id = ?")
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

async fn require_user(conn: &mut SqliteConnection, id: Id) -> AppResult<()> {
    if user_exists(conn, id).await? {
        Ok(())
    } else {
        Err(AppError::NotFound(format!("user {} not found", id)))
    }
}

async fn require_users(conn: &mut SqliteConnection, a: Id, b: Id) -> AppResult<()> {
    ensure_distinct(a, b)?;
    require_user(conn, a).await?;
    require_user(conn, b).await
}

async fn edge_exists(
    conn: &mut SqliteConnection,
    src: Id,
    label: EdgeLabel,
    dst: Id,
) -> AppResult<bool> {
    let row = sqlx::query("SELECT 1 FROM edges WHERE src = ? AND label = ? AND dst = ?")
        .bind(src.to_string())
        .bind(label.as_str())
        .bind(dst.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.is_some())
}

async fn edge_exists_either_way(
    conn: &mut SqliteConnection,
    a: Id,
    label: EdgeLabel,
    b: Id,
) -> AppResult<bool> {
    Ok(edge_exists(conn, a, label, b).await? || edge_exists(conn, b, label, a).await?)
}

async fn insert_edge(
    conn: &mut SqliteConnection,
    src: Id,
    label: EdgeLabel,
    dst: Id,
) -> AppResult<bool> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO edges (src, label, dst, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(src.to_string())
    .bind(label.as_str())
    .bind(dst.to_string())
    .bind(chrono::Utc::now())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

async fn delete_edge(
    conn: &mut SqliteConnection,
    src: Id,
    label: EdgeLabel,
    dst: Id,
) -> AppResult<bool> {
    let result = sqlx::query("DELETE FROM edges WHERE src = ? AND label = ? AND dst = ?")
        .bind(src.to_string())
        .bind(label.as_str())
        .bind(dst.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

async fn ensure_not_blocked(conn: &mut SqliteConnection, a: Id, b: Id) -> AppResult<()> {
    if edge_exists_either_way(conn, a, EdgeLabel::Blocked, b).await? {
        return Err(AppError::Conflict(format!(
            "users {} and {} have blocked each other",
            a, b
        )));
    }
    Ok(())
}

async fn replace_tags(conn: &mut SqliteConnection, post_id: Id, content: &str) -> AppResult<()> {
    sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
        .bind(post_id.to_string())
        .execute(&mut *conn)
        .await?;
    for tag in extract_tags(content) {
        sqlx::query("INSERT OR IGNORE INTO post_tags (post_id, tag) VALUES (?, ?)")
            .bind(post_id.to_string())
            .bind(tag)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Outgoing,
    Incoming,
}

async fn neighbors(
    conn: &mut SqliteConnection,
    id: Id,
    label: EdgeLabel,
    direction: Direction,
) -> AppResult<Vec<User>> {
    let (join_column, anchor_column) = match direction {
        Direction::Outgoing => ("dst", "src"),
        Direction::Incoming => ("src", "dst"),
    };
    let sql = format!(
        "SELECT DISTINCT {} FROM edges e JOIN users u ON u.id = e.{} \
         WHERE e.{} = ? AND e.label = ? ORDER BY u.id",
        USER_COLUMNS, join_column, anchor_column
    );
    let rows = sqlx::query(&sql)
        .bind(id.to_string())
        .bind(label.as_str())
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(read_user).collect()
}

async fn neighborhood(
    conn: &mut SqliteConnection,
    id: Id,
) -> AppResult<Option<UserWithRelationships>> {
    let row = sqlx::query(&format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS))
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    Ok(Some(UserWithRelationships {
        user: read_user(&row)?,
        followers: neighbors(conn, id, EdgeLabel::Follows, Direction::Incoming).await?,
        followed: neighbors(conn, id, EdgeLabel::Follows, Direction::Outgoing).await?,
        blocked: neighbors(conn, id, EdgeLabel::Blocked, Direction::Outgoing).await?,
        friends: neighbors(conn, id, EdgeLabel::Friend, Direction::Outgoing).await?,
        sent_friend_requests: neighbors(conn, id, EdgeLabel::FriendRequest, Direction::Outgoing)
            .await?,
        received_friend_requests: neighbors(
            conn,
            id,
            EdgeLabel::FriendRequest,
            Direction::Incoming,
        )
        .await?,
    }))
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed property graph. Nodes and edges live in plain tables;
/// every mutation runs in one transaction.
///
/// SQLite admits a single writer. Mutations take `writer` before opening
/// their transaction so a read guard is never upgraded while another
/// connection holds the write lock; reads go straight to the pool.
#[derive(Debug, Clone)]
pub struct SqliteGraphStore {
    pool: SqlitePool,
    writer: Arc<Mutex<()>>,
}

/// An open write transaction and the writer slot it holds
type WriteTx<'a> = (MutexGuard<'a, ()>, Transaction<'static, Sqlite>);

impl SqliteGraphStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Connect to `url` (`sqlite:path` or `sqlite::memory:`), creating the
    /// database file if needed
    pub async fn connect(url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| AppError::Configuration(format!("invalid database url: {}", e)))?
            .create_if_missing(true)
            .busy_timeout(BUSY_TIMEOUT);
        let in_memory = url.contains(":memory:");
        let options = if in_memory {
            options
        } else {
            options.journal_mode(SqliteJournalMode::Wal)
        };
        let max_connections = if in_memory { 1 } else { 8 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to SQLite: {}", e)))?;
        Ok(Self::from_pool(pool))
    }

    async fn begin_write(&self) -> AppResult<WriteTx<'_>> {
        let guard = self.writer.lock().await;
        let tx = self.pool.begin().await?;
        Ok((guard, tx))
    }

    pub async fn new_in_memory() -> AppResult<Self> {
        let store = Self::connect("sqlite::memory:").await?;
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn index_names(&self) -> AppResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(AppError::from))
            .collect()
    }

    async fn load_tags(&self, post_id: Id) -> AppResult<Vec<String>> {
        let rows = sqlx::query("SELECT tag FROM post_tags WHERE post_id = ? ORDER BY rowid")
            .bind(post_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("tag").map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Database(format!("Failed to apply schema: {}", e)))?;
        }
        info!("SQLite graph schema ready");
        Ok(())
    }

    async fn create_user(&self, id: Id, created_at: Timestamp) -> AppResult<bool> {
        let _writer = self.writer.lock().await;
        let result = sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?, ?)")
            .bind(id.to_string())
            .bind(created_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_user(&self, id: Id, profile: UserProfile) -> AppResult<bool> {
        let _writer = self.writer.lock().await;
        let result = sqlx::query("UPDATE users SET name = ?, bio = ?, location = ? WHERE id = ?")
            .bind(profile.name)
            .bind(profile.bio)
            .bind(profile.location)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_user(&self, id: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        let removed = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM edges WHERE src = ? OR dst = ?")
            .bind(id.to_string())
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE posts SET user_id = NULL WHERE user_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn create_post(
        &self,
        post_id: Id,
        user_id: Id,
        content: &str,
        created_at: Timestamp,
    ) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_user(&mut tx, user_id).await?;
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO posts (id, user_id, created_at, likes, views) VALUES (?, ?, ?, 0, 0)",
        )
        .bind(post_id.to_string())
        .bind(user_id.to_string())
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if inserted == 0 {
            return Ok(false);
        }
        replace_tags(&mut tx, post_id, content).await?;
        insert_edge(&mut tx, user_id, EdgeLabel::Created, post_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn update_post_tags(&self, post_id: Id, content: &str) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        if !post_exists(&mut tx, post_id).await? {
            return Ok(false);
        }
        replace_tags(&mut tx, post_id, content).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn delete_post(&self, post_id: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        let removed = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM post_tags WHERE post_id = ?")
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM edges WHERE src = ? OR dst = ?")
            .bind(post_id.to_string())
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_post(&self, post_id: Id) -> AppResult<Option<Post>> {
        let row = sqlx::query("SELECT id, user_id, created_at, likes, views FROM posts WHERE id = ?")
            .bind(post_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let author: Option<String> = row.try_get("user_id")?;
        let user_id = author
            .map(|raw| Id::parse(&raw))
            .transpose()
            .map_err(|e| AppError::Database(format!("corrupt author id: {}", e)))?;
        Ok(Some(Post {
            id: read_id(&row, "id")?,
            user_id,
            created_at: row.try_get("created_at")?,
            tags: self.load_tags(post_id).await?,
            likes: row.try_get::<i64, _>("likes")?.max(0) as u64,
            views: row.try_get::<i64, _>("views")?.max(0) as u64,
        }))
    }

    async fn add_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        ensure_not_blocked(&mut tx, a, b).await?;
        let cleared = delete_edge(&mut tx, a, EdgeLabel::FriendRequest, b).await?
            | delete_edge(&mut tx, b, EdgeLabel::FriendRequest, a).await?;
        let forward = insert_edge(&mut tx, a, EdgeLabel::Friend, b).await?;
        let backward = insert_edge(&mut tx, b, EdgeLabel::Friend, a).await?;
        tx.commit().await?;
        Ok(cleared || forward || backward)
    }

    async fn remove_friend(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        let forward = delete_edge(&mut tx, a, EdgeLabel::Friend, b).await?;
        let backward = delete_edge(&mut tx, b, EdgeLabel::Friend, a).await?;
        tx.commit().await?;
        Ok(forward || backward)
    }

    async fn follow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        ensure_not_blocked(&mut tx, a, b).await?;
        let inserted = insert_edge(&mut tx, a, EdgeLabel::Follows, b).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn unfollow_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        let removed = delete_edge(&mut tx, a, EdgeLabel::Follows, b).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn send_friend_request(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        ensure_not_blocked(&mut tx, a, b).await?;
        if edge_exists_either_way(&mut tx, a, EdgeLabel::Friend, b).await? {
            return Err(AppError::Conflict(format!(
                "users {} and {} are already friends",
                a, b
            )));
        }
        if edge_exists(&mut tx, b, EdgeLabel::FriendRequest, a).await? {
            return Err(AppError::Conflict(format!(
                "{} already has a pending friend request from {}",
                a, b
            )));
        }
        // Replaying a pending request leaves it in place
        let inserted = insert_edge(&mut tx, a, EdgeLabel::FriendRequest, b).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn accept_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, receiver, sender).await?;
        if !delete_edge(&mut tx, sender, EdgeLabel::FriendRequest, receiver).await? {
            return Err(AppError::NotFound(format!(
                "no friend request from {} to {}",
                sender, receiver
            )));
        }
        insert_edge(&mut tx, sender, EdgeLabel::Friend, receiver).await?;
        insert_edge(&mut tx, receiver, EdgeLabel::Friend, sender).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn decline_friend_request(&self, receiver: Id, sender: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, receiver, sender).await?;
        if !delete_edge(&mut tx, sender, EdgeLabel::FriendRequest, receiver).await? {
            return Err(AppError::NotFound(format!(
                "no friend request from {} to {}",
                sender, receiver
            )));
        }
        tx.commit().await?;
        Ok(true)
    }

    async fn block_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        if edge_exists(&mut tx, a, EdgeLabel::Blocked, b).await? {
            return Ok(false);
        }
        sqlx::query(
            "DELETE FROM edges WHERE ((src = ? AND dst = ?) OR (src = ? AND dst = ?)) \
             AND label IN ('FOLLOWS', 'FRIEND_REQUEST', 'FRIEND', 'BLOCKED')",
        )
        .bind(a.to_string())
        .bind(b.to_string())
        .bind(b.to_string())
        .bind(a.to_string())
        .execute(&mut *tx)
        .await?;
        insert_edge(&mut tx, a, EdgeLabel::Blocked, b).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn unblock_user(&self, a: Id, b: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_users(&mut tx, a, b).await?;
        let removed = delete_edge(&mut tx, a, EdgeLabel::Blocked, b).await?;
        tx.commit().await?;
        Ok(removed)
    }

    async fn like_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_user(&mut tx, user_id).await?;
        if !post_exists(&mut tx, post_id).await? {
            return Err(AppError::NotFound(format!("post {} not found", post_id)));
        }
        if !insert_edge(&mut tx, user_id, EdgeLabel::Liked, post_id).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE posts SET likes = likes + 1 WHERE id = ?")
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn unlike_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        if !delete_edge(&mut tx, user_id, EdgeLabel::Liked, post_id).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE posts SET likes = MAX(likes - 1, 0) WHERE id = ?")
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn view_post(&self, user_id: Id, post_id: Id) -> AppResult<bool> {
        let (_writer, mut tx) = self.begin_write().await?;
        require_user(&mut tx, user_id).await?;
        if !post_exists(&mut tx, post_id).await? {
            return Err(AppError::NotFound(format!("post {} not found", post_id)));
        }
        if !insert_edge(&mut tx, user_id, EdgeLabel::Viewed, post_id).await? {
            return Ok(false);
        }
        sqlx::query("UPDATE posts SET views = views + 1 WHERE id = ?")
            .bind(post_id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_user_with_relationships(&self, id: Id) -> AppResult<Option<UserWithRelationships>> {
        let mut conn = self.pool.acquire().await?;
        neighborhood(&mut conn, id).await
    }

    async fn batch_get_user_with_relationships(
        &self,
        ids: &[Id],
    ) -> AppResult<HashMap<Id, UserWithRelationships>> {
        let mut conn = self.pool.acquire().await?;
        let mut found = HashMap::with_capacity(ids.len());
        for id in ids {
            if found.contains_key(id) {
                continue;
            }
            if let Some(hood) = neighborhood(&mut conn, *id).await? {
                found.insert(*id, hood);
            }
        }
        Ok(found)
    }
}

#[async_trait]
impl RecommendationStore for SqliteGraphStore {
    async fn candidates(
        &self,
        source: CandidateSource,
        query: &CandidateQuery,
    ) -> AppResult<Vec<CandidateRow>> {
        let viewer = query.viewer.to_string();
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT p.id, p.likes, p.created_at FROM posts p WHERE (p.user_id IS NULL OR p.user_id <> ",
        );
        qb.push_bind(viewer.clone());
        qb.push(")");

        match source {
            CandidateSource::Friends => {
                qb.push(" AND p.user_id IN (SELECT dst FROM edges WHERE label = 'FRIEND' AND src = ");
                qb.push_bind(viewer.clone());
                qb.push(")");
            }
            CandidateSource::Followers => {
                qb.push(" AND p.user_id IN (SELECT dst FROM edges WHERE label = 'FOLLOWS' AND src = ");
                qb.push_bind(viewer.clone());
                qb.push(")");
            }
            CandidateSource::Tags => {
                qb.push(
                    " AND EXISTS (SELECT 1 FROM post_tags t WHERE t.post_id = p.id AND t.tag IN \
                     (SELECT it.tag FROM post_tags it JOIN edges e ON e.dst = it.post_id \
                     WHERE e.label IN ('LIKED', 'VIEWED') AND e.src = ",
                );
                qb.push_bind(viewer.clone());
                qb.push("))");
            }
            CandidateSource::Popular => {
                qb.push(" AND p.likes >= ");
                qb.push_bind(query.min_likes as i64);
            }
            CandidateSource::Recent => {}
        }

        if let Some(cursor) = query.cursor {
            qb.push(" AND p.id <= ");
            qb.push_bind(cursor.to_string());
        }

        match source {
            CandidateSource::Popular => qb.push(" ORDER BY p.likes DESC, p.id DESC"),
            _ => qb.push(" ORDER BY p.id DESC"),
        };
        qb.push(" LIMIT ");
        qb.push_bind(query.limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(CandidateRow {
                    post_id: read_id(row, "id")?,
                    likes: row.try_get::<i64, _>("likes")?.max(0) as u64,
                    created_at: row.try_get("created_at")?,
                    source,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store_with_users(n: u128) -> (SqliteGraphStore, Vec<Id>) {
        let store = SqliteGraphStore::new_in_memory().await.unwrap();
        let mut ids = Vec::new();
        for i in 1..=n {
            let id = Id::from_u128(i);
            store.create_user(id, Utc::now()).await.unwrap();
            ids.push(id);
        }
        (store, ids)
    }

    #[tokio::test]
    async fn test_schema_is_idempotent_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("graph.db").display());

        let first = SqliteGraphStore::connect(&url).await.unwrap();
        first.ensure_schema().await.unwrap();
        first.ensure_schema().await.unwrap();
        first.create_user(Id::from_u128(1), Utc::now()).await.unwrap();
        drop(first);

        let reopened = SqliteGraphStore::connect(&url).await.unwrap();
        reopened.ensure_schema().await.unwrap();
        let indexes = reopened.index_names().await.unwrap();
        for expected in [
            "idx_posts_created_at",
            "idx_posts_created_at_likes",
            "idx_posts_id",
            "idx_posts_likes",
            "idx_post_tags_tag",
            "idx_users_id",
        ] {
            assert!(indexes.iter().any(|name| name == expected), "missing {}", expected);
        }
        assert!(!reopened.create_user(Id::from_u128(1), Utc::now()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_on_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("graph.db").display());
        let store = SqliteGraphStore::connect(&url).await.unwrap();
        store.ensure_schema().await.unwrap();
        for i in 0..64u128 {
            store.create_user(Id::from_u128(i), Utc::now()).await.unwrap();
        }

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..32u128 {
            let store = store.clone();
            tasks.spawn(async move {
                store
                    .follow_user(Id::from_u128(i), Id::from_u128(i + 32))
                    .await
            });
        }
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined.unwrap() {
                failures.push(e.to_string());
            }
        }
        assert!(failures.is_empty(), "{:?}", failures);

        for i in 0..32u128 {
            let hood = store
                .get_user_with_relationships(Id::from_u128(i + 32))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(hood.followers.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_friend_request_flow() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        assert!(store.send_friend_request(a, b).await.unwrap());
        assert!(!store.send_friend_request(a, b).await.unwrap());
        assert!(matches!(
            store.send_friend_request(b, a).await,
            Err(AppError::Conflict(_))
        ));
        assert!(store.accept_friend_request(b, a).await.unwrap());

        let hood = store.get_user_with_relationships(a).await.unwrap().unwrap();
        assert_eq!(hood.friends.len(), 1);
        assert_eq!(hood.friends[0].id, b);
        assert!(hood.sent_friend_requests.is_empty());
        assert!(matches!(
            store.decline_friend_request(b, a).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_block_purges_edges() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        store.follow_user(a, b).await.unwrap();
        store.add_friend(a, b).await.unwrap();
        assert!(store.block_user(a, b).await.unwrap());

        let hood_a = store.get_user_with_relationships(a).await.unwrap().unwrap();
        assert!(hood_a.followed.is_empty());
        assert!(hood_a.friends.is_empty());
        assert_eq!(hood_a.blocked[0].id, b);
        let hood_b = store.get_user_with_relationships(b).await.unwrap().unwrap();
        assert!(hood_b.followers.is_empty());
    }

    #[tokio::test]
    async fn test_like_counter_and_user_delete() {
        let (store, ids) = store_with_users(2).await;
        let (author, fan) = (ids[0], ids[1]);
        let post = Id::from_u128(100);
        store.create_post(post, author, "Hi #Rust #rust #db", Utc::now()).await.unwrap();
        assert_eq!(store.get_post(post).await.unwrap().unwrap().tags, vec!["rust", "db"]);

        store.like_post(fan, post).await.unwrap();
        store.like_post(fan, post).await.unwrap();
        assert_eq!(store.get_post(post).await.unwrap().unwrap().likes, 1);
        store.unlike_post(fan, post).await.unwrap();
        store.unlike_post(fan, post).await.unwrap();
        assert_eq!(store.get_post(post).await.unwrap().unwrap().likes, 0);

        assert!(store.delete_user(author).await.unwrap());
        let orphan = store.get_post(post).await.unwrap().unwrap();
        assert_eq!(orphan.user_id, None);
        assert!(store.get_user_with_relationships(author).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_view_counter_counts_each_viewer_once() {
        let (store, ids) = store_with_users(2).await;
        let post = Id::from_u128(100);
        store.create_post(post, ids[0], "#rust", Utc::now()).await.unwrap();

        assert!(store.view_post(ids[1], post).await.unwrap());
        assert!(!store.view_post(ids[1], post).await.unwrap());
        assert!(store.view_post(ids[0], post).await.unwrap());
        assert_eq!(store.get_post(post).await.unwrap().unwrap().views, 2);
        assert!(matches!(
            store.view_post(ids[1], Id::from_u128(101)).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_delete_post() {
        let (store, ids) = store_with_users(2).await;
        let post = Id::from_u128(100);
        store.create_post(post, ids[0], "#Rust #db", Utc::now()).await.unwrap();
        store.like_post(ids[1], post).await.unwrap();

        assert!(store.update_post_tags(post, "now #Async only").await.unwrap());
        let stored = store.get_post(post).await.unwrap().unwrap();
        assert_eq!(stored.tags, vec!["async"]);
        assert_eq!(stored.likes, 1);
        assert!(!store.update_post_tags(Id::from_u128(101), "#x").await.unwrap());

        assert!(store.delete_post(post).await.unwrap());
        assert!(!store.delete_post(post).await.unwrap());
        assert!(store.get_post(post).await.unwrap().is_none());
        let (edges,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM edges WHERE dst = ?")
            .bind(post.to_string())
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(edges, 0);
        let (tags,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM post_tags WHERE post_id = ?")
            .bind(post.to_string())
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(tags, 0);
    }

    #[tokio::test]
    async fn test_update_user_profile() {
        let (store, ids) = store_with_users(1).await;
        let profile = UserProfile {
            name: Some("Ada".to_string()),
            bio: None,
            location: Some("London".to_string()),
        };
        assert!(store.update_user(ids[0], profile).await.unwrap());
        let hood = store.get_user_with_relationships(ids[0]).await.unwrap().unwrap();
        assert_eq!(hood.user.name.as_deref(), Some("Ada"));
        assert_eq!(hood.user.location.as_deref(), Some("London"));

        assert!(!store
            .update_user(Id::from_u128(99), UserProfile::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_decline_friend_request_removes_request_only() {
        let (store, ids) = store_with_users(2).await;
        let (a, b) = (ids[0], ids[1]);
        store.send_friend_request(a, b).await.unwrap();

        assert!(store.decline_friend_request(b, a).await.unwrap());
        let hood = store.get_user_with_relationships(b).await.unwrap().unwrap();
        assert!(hood.received_friend_requests.is_empty());
        assert!(hood.friends.is_empty());
        assert!(store.send_friend_request(a, b).await.unwrap());
    }

    #[tokio::test]
    async fn test_candidates_respect_cursor_and_viewer() {
        let (store, ids) = store_with_users(2).await;
        let (viewer, friend) = (ids[0], ids[1]);
        store.add_friend(viewer, friend).await.unwrap();
        for i in 10..15u128 {
            store
                .create_post(Id::from_u128(i), friend, "#x", Utc::now())
                .await
                .unwrap();
        }
        store
            .create_post(Id::from_u128(20), viewer, "#x", Utc::now())
            .await
            .unwrap();

        let query = CandidateQuery {
            viewer,
            min_likes: 0,
            limit: 3,
            cursor: Some(Id::from_u128(13)),
        };
        let rows = store.candidates(CandidateSource::Friends, &query).await.unwrap();
        let ids: Vec<Id> = rows.iter().map(|r| r.post_id).collect();
        assert_eq!(ids, vec![Id::from_u128(13), Id::from_u128(12), Id::from_u128(11)]);

        let recent = store
            .candidates(CandidateSource::Recent, &CandidateQuery { cursor: None, ..query })
            .await
            .unwrap();
        assert!(recent.iter().all(|r| r.post_id != Id::from_u128(20)));
    }
}
