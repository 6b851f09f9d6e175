#![forbid(unsafe_code)]

//! Playlist persistence and the worker that serializes access to it.
//!
//! Saved videos live in a local SQLite database, one row per (user, URL)
//! pair. The backend never touches the database from request handlers;
//! everything goes through [`PlaylistService`], a single background task that
//! owns the connection and drains a command queue, replying to each caller
//! over a oneshot channel.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use libsql::{Builder, Connection, Row, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Title stored for newly saved items. The client saves the raw URL before
/// any metadata is known, so every row starts with this placeholder.
pub const DEFAULT_ITEM_TITLE: &str = "YouTube Video";

/// One saved video in a user's playlist, mirroring the `playlist_items` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub id: i64,
    pub owner_user_id: i64,
    pub url: String,
    pub title: String,
    pub added_at: String,
}

/// Outcome of a save request. `AlreadyExists` is informational, not an error:
/// the playlist is unchanged and the frontend tells the user so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AddOutcome {
    Added,
    AlreadyExists,
}

/// Failures surfaced by [`PlaylistService`]. `EmptyUrl` is the only
/// user-correctable variant; the rest are terminal for the request.
#[derive(Debug, Error)]
pub enum PlaylistError {
    #[error("a YouTube URL is required")]
    EmptyUrl,
    #[error("playlist storage failed: {0}")]
    Storage(#[source] anyhow::Error),
    #[error("playlist worker is no longer running")]
    WorkerGone,
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    // The UNIQUE index is what makes a save atomic: the insert either lands
    // or hits the conflict clause, with no check-then-insert window.
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS playlist_items (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_user_id INTEGER NOT NULL,
            url           TEXT NOT NULL,
            title         TEXT NOT NULL,
            added_at      TEXT NOT NULL
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_playlist_owner_url
            ON playlist_items(owner_user_id, url);
        "#,
    )
    .await?;
    Ok(())
}

/// Wrapper around the SQLite connection holding the saved playlists.
pub struct PlaylistStore {
    conn: Connection,
}

impl std::fmt::Debug for PlaylistStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistStore").finish_non_exhaustive()
    }
}

impl PlaylistStore {
    /// Opens (and if necessary creates) the playlist DB and ensures the
    /// expected schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating playlist directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening playlist DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Looks up a saved item by its exact URL. This is the existence probe
    /// the frontend uses; saving itself never relies on it.
    pub async fn get_item_by_url(
        &self,
        owner_user_id: i64,
        url: &str,
    ) -> Result<Option<PlaylistItem>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, owner_user_id, url, title, added_at
                FROM playlist_items
                WHERE owner_user_id = ?1 AND url = ?2
                "#,
            )
            .await?;

        let mut rows = stmt.query(params![owner_user_id, url]).await?;
        if let Some(row) = rows.next().await? {
            Ok(Some(row_to_item(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Returns every item a user has saved, oldest first, so the playlist
    /// screen shows saves in the order they were made.
    pub async fn list_items(&self, owner_user_id: i64) -> Result<Vec<PlaylistItem>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, owner_user_id, url, title, added_at
                FROM playlist_items
                WHERE owner_user_id = ?1
                ORDER BY id ASC
                "#,
            )
            .await?;

        let mut rows = stmt.query(params![owner_user_id]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }

    /// Saves a URL for a user. At most one write happens per call: the insert
    /// is a no-op when the (owner, url) pair already exists, which is how the
    /// two outcomes are told apart.
    pub async fn add_item(
        &self,
        owner_user_id: i64,
        url: &str,
        title: &str,
    ) -> Result<AddOutcome> {
        let added_at = Utc::now().to_rfc3339();
        let affected = self
            .conn
            .execute(
                r#"
                INSERT INTO playlist_items (owner_user_id, url, title, added_at)
                VALUES (:owner_user_id, :url, :title, :added_at)
                ON CONFLICT(owner_user_id, url) DO NOTHING
                "#,
                params![owner_user_id, url, title, added_at],
            )
            .await?;

        Ok(if affected > 0 {
            AddOutcome::Added
        } else {
            AddOutcome::AlreadyExists
        })
    }

    /// Removes a saved item. Returns whether a row was actually deleted.
    pub async fn delete_item(&self, owner_user_id: i64, url: &str) -> Result<bool> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM playlist_items WHERE owner_user_id = ?1 AND url = ?2",
                params![owner_user_id, url],
            )
            .await?;
        Ok(affected > 0)
    }
}

/// Converts a SQL row into a `PlaylistItem`.
fn row_to_item(row: &Row) -> Result<PlaylistItem> {
    Ok(PlaylistItem {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        url: row.get(2)?,
        title: row.get(3)?,
        added_at: row.get(4)?,
    })
}

enum Command {
    Add {
        user_id: i64,
        url: String,
        reply: oneshot::Sender<Result<AddOutcome>>,
    },
    List {
        user_id: i64,
        reply: oneshot::Sender<Result<Vec<PlaylistItem>>>,
    },
    Remove {
        user_id: i64,
        url: String,
        reply: oneshot::Sender<Result<bool>>,
    },
}

/// Cheap-to-clone handle to the single playlist worker.
///
/// Every storage operation issued by the backend funnels through one spawned
/// task, so writes and reads are serialized without the handlers ever
/// blocking on the database. Dropping every handle shuts the worker down.
#[derive(Clone)]
pub struct PlaylistService {
    tx: mpsc::Sender<Command>,
}

impl PlaylistService {
    /// Spawns the worker task that owns `store` and starts draining commands.
    pub fn spawn(store: PlaylistStore) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(32);

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Add {
                        user_id,
                        url,
                        reply,
                    } => {
                        let result = store.add_item(user_id, &url, DEFAULT_ITEM_TITLE).await;
                        let _ = reply.send(result);
                    }
                    Command::List { user_id, reply } => {
                        let result = store.list_items(user_id).await;
                        let _ = reply.send(result);
                    }
                    Command::Remove {
                        user_id,
                        url,
                        reply,
                    } => {
                        let result = store.delete_item(user_id, &url).await;
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Self { tx }
    }

    /// Saves `url` into `user_id`'s playlist.
    ///
    /// Empty and whitespace-only URLs are rejected before anything is queued,
    /// so validation failures never reach storage. Calling this twice with
    /// the same arguments yields `Added` then `AlreadyExists`.
    pub async fn add_to_playlist(
        &self,
        user_id: i64,
        url: &str,
    ) -> Result<AddOutcome, PlaylistError> {
        if url.trim().is_empty() {
            return Err(PlaylistError::EmptyUrl);
        }

        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Add {
                user_id,
                url: url.to_string(),
                reply,
            })
            .await
            .map_err(|_| PlaylistError::WorkerGone)?;

        response
            .await
            .map_err(|_| PlaylistError::WorkerGone)?
            .map_err(PlaylistError::Storage)
    }

    /// Returns `user_id`'s saved items in insertion order.
    pub async fn list_items(&self, user_id: i64) -> Result<Vec<PlaylistItem>, PlaylistError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::List { user_id, reply })
            .await
            .map_err(|_| PlaylistError::WorkerGone)?;

        response
            .await
            .map_err(|_| PlaylistError::WorkerGone)?
            .map_err(PlaylistError::Storage)
    }

    /// Removes a saved URL. Returns whether an item was actually removed.
    pub async fn remove_item(&self, user_id: i64, url: &str) -> Result<bool, PlaylistError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Remove {
                user_id,
                url: url.to_string(),
                reply,
            })
            .await
            .map_err(|_| PlaylistError::WorkerGone)?;

        response
            .await
            .map_err(|_| PlaylistError::WorkerGone)?
            .map_err(PlaylistError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const URL_A: &str = "https://www.youtube.com/watch?v=abc123";
    const URL_B: &str = "https://youtu.be/xyz789";

    /// Opens a brand-new temporary playlist store. A temp directory keeps
    /// tests isolated and mirrors how the backend opens the DB under its
    /// data root.
    async fn create_store() -> Result<(tempfile::TempDir, PlaylistStore, PathBuf)> {
        let dir = tempdir()?;
        let path = dir.path().join("playlist/playlist.db");
        let store = PlaylistStore::open(&path).await?;
        Ok((dir, store, path))
    }

    #[tokio::test]
    async fn opens_store_and_creates_schema() -> Result<()> {
        let (_temp, _store, path) = create_store().await?;
        assert!(path.exists(), "database file should be created");

        let db = Builder::new_local(&path).build().await?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name='playlist_items'",
                params![],
            )
            .await?;
        assert!(rows.next().await?.is_some(), "playlist_items table exists");

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='index' AND name='idx_playlist_owner_url'",
                params![],
            )
            .await?;
        assert!(rows.next().await?.is_some(), "uniqueness index exists");

        let mut rows = conn.query("PRAGMA journal_mode", params![]).await?;
        let row = rows.next().await?.context("missing journal_mode row")?;
        let journal: String = row.get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");
        Ok(())
    }

    #[tokio::test]
    async fn add_item_then_duplicate() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;

        let first = store.add_item(1, URL_A, DEFAULT_ITEM_TITLE).await?;
        assert_eq!(first, AddOutcome::Added);

        let second = store.add_item(1, URL_A, DEFAULT_ITEM_TITLE).await?;
        assert_eq!(second, AddOutcome::AlreadyExists);

        // The duplicate save must not have mutated anything.
        let items = store.list_items(1).await?;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, URL_A);
        assert_eq!(items[0].title, DEFAULT_ITEM_TITLE);
        Ok(())
    }

    #[tokio::test]
    async fn same_url_is_independent_per_user() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;

        assert_eq!(store.add_item(1, URL_A, DEFAULT_ITEM_TITLE).await?, AddOutcome::Added);
        assert_eq!(store.add_item(2, URL_A, DEFAULT_ITEM_TITLE).await?, AddOutcome::Added);

        assert_eq!(store.list_items(1).await?.len(), 1);
        assert_eq!(store.list_items(2).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn get_item_by_url_roundtrip() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        store.add_item(1, URL_A, DEFAULT_ITEM_TITLE).await?;

        let found = store.get_item_by_url(1, URL_A).await?.expect("item saved");
        assert_eq!(found.owner_user_id, 1);
        assert_eq!(found.url, URL_A);
        assert!(found.id > 0, "insert yields a positive identifier");
        assert!(!found.added_at.is_empty());

        assert!(store.get_item_by_url(1, URL_B).await?.is_none());
        assert!(store.get_item_by_url(2, URL_A).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn list_items_keeps_insertion_order() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        store.add_item(1, URL_A, DEFAULT_ITEM_TITLE).await?;
        store.add_item(1, URL_B, DEFAULT_ITEM_TITLE).await?;

        let items = store.list_items(1).await?;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, URL_A);
        assert_eq!(items[1].url, URL_B);
        assert!(items[0].id < items[1].id);
        Ok(())
    }

    #[tokio::test]
    async fn delete_item_reports_whether_anything_was_removed() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        store.add_item(1, URL_A, DEFAULT_ITEM_TITLE).await?;

        assert!(store.delete_item(1, URL_A).await?);
        assert!(!store.delete_item(1, URL_A).await?);
        assert!(store.list_items(1).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn service_add_twice_yields_added_then_already_exists() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        let service = PlaylistService::spawn(store);

        let first = service.add_to_playlist(1, URL_A).await.expect("first save");
        assert_eq!(first, AddOutcome::Added);

        let second = service.add_to_playlist(1, URL_A).await.expect("second save");
        assert_eq!(second, AddOutcome::AlreadyExists);
        Ok(())
    }

    #[tokio::test]
    async fn service_rejects_empty_url_without_touching_storage() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        let service = PlaylistService::spawn(store);

        for input in ["", "   ", "\n"] {
            let err = service.add_to_playlist(1, input).await.unwrap_err();
            assert!(matches!(err, PlaylistError::EmptyUrl), "rejected: {input:?}");
        }

        // Nothing may have been written by the rejected calls.
        let items = service.list_items(1).await.expect("list");
        assert!(items.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn service_list_and_remove_roundtrip() -> Result<()> {
        let (_temp, store, _path) = create_store().await?;
        let service = PlaylistService::spawn(store);

        service.add_to_playlist(7, URL_A).await.expect("save a");
        service.add_to_playlist(7, URL_B).await.expect("save b");

        let items = service.list_items(7).await.expect("list");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, URL_A);

        assert!(service.remove_item(7, URL_A).await.expect("remove"));
        assert!(!service.remove_item(7, URL_A).await.expect("second remove"));

        let items = service.list_items(7).await.expect("list again");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, URL_B);
        Ok(())
    }
}
