use async_trait::async_trait;
use collaboration::{DocumentId, MarkerSet, MetadataStore, RegionId, RegionMarkers};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("block_collab")
}

pub fn default_db_path() -> PathBuf {
    app_data_dir().join("documents.db")
}

#[derive(Debug, Error)]
pub enum DocumentDbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DocumentDbError>;

/// Documents, their blocks and per-document metadata in one SQLite file.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct DocumentDb {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentInfo {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRow {
    pub id: String,
    pub document_id: String,
    pub position: i64,
    pub class_name: String,
    pub content: String,
}

impl DocumentDb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        apply_migrations(&conn)?;
        tracing::debug!(path = %path.display(), "document database ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        apply_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn create_document(&self, title: &str) -> Result<DocumentInfo> {
        let id = Uuid::new_v4().to_string();
        self.ensure_document(&id, title)?;
        self.get_document(&id)?
            .ok_or(DocumentDbError::DocumentNotFound(id))
    }

    pub fn ensure_document(&self, id: &str, title: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO documents(id, title, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?3)",
            params![id, title, now],
        )?;
        Ok(())
    }

    pub fn get_document(&self, id: &str) -> Result<Option<DocumentInfo>> {
        let conn = self.conn.lock();
        let doc = conn
            .query_row(
                "SELECT id, title, created_at, updated_at FROM documents WHERE id = ?1",
                params![id],
                |row| {
                    Ok(DocumentInfo {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        created_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(doc)
    }

    pub fn list_documents(&self) -> Result<Vec<DocumentInfo>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, updated_at FROM documents
             ORDER BY updated_at DESC, created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(DocumentInfo {
                id: row.get(0)?,
                title: row.get(1)?,
                created_at: row.get(2)?,
                updated_at: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Removes the document with its blocks and metadata. Returns false if it did not exist.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute("DELETE FROM document_meta WHERE document_id = ?1", params![id])?;
        tx.execute("DELETE FROM blocks WHERE document_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM documents WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Append a block at the end of the document.
    pub fn add_block(
        &self,
        document_id: &str,
        content: &str,
        class_name: &str,
    ) -> Result<BlockRow> {
        self.require_document(document_id)?;
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        let position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM blocks WHERE document_id = ?1",
            params![document_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT INTO blocks(
                 id, document_id, position, class_name, content, created_at, updated_at
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![id, document_id, position, class_name, content, now],
        )?;
        Ok(BlockRow {
            id,
            document_id: document_id.to_string(),
            position,
            class_name: class_name.to_string(),
            content: content.to_string(),
        })
    }

    pub fn get_block(&self, block_id: &str) -> Result<Option<BlockRow>> {
        let conn = self.conn.lock();
        let block = conn
            .query_row(
                "SELECT id, document_id, position, class_name, content FROM blocks WHERE id = ?1",
                params![block_id],
                block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    pub fn list_blocks(&self, document_id: &str) -> Result<Vec<BlockRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, document_id, position, class_name, content FROM blocks
             WHERE document_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![document_id], block_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn remove_block(&self, block_id: &str) -> Result<()> {
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM blocks WHERE id = ?1", params![block_id])?;
        if removed == 0 {
            return Err(DocumentDbError::BlockNotFound(block_id.to_string()));
        }
        Ok(())
    }

    pub fn block_class_name(&self, block_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let class_name = conn
            .query_row(
                "SELECT class_name FROM blocks WHERE id = ?1",
                params![block_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(class_name)
    }

    /// Returns false when the block no longer exists.
    pub fn set_block_class_name(&self, block_id: &str, class_name: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let updated = self.conn.lock().execute(
            "UPDATE blocks SET class_name = ?2, updated_at = ?3 WHERE id = ?1",
            params![block_id, class_name, now],
        )?;
        Ok(updated > 0)
    }

    pub fn read_metadata(&self, document_id: &str, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM document_meta WHERE document_id = ?1 AND key = ?2",
                params![document_id, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn write_metadata(&self, document_id: &str, key: &str, value: &str) -> Result<()> {
        self.require_document(document_id)?;
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO document_meta(document_id, key, value, updated_at) VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(document_id, key)
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![document_id, key, value, now],
        )?;
        tx.execute(
            "UPDATE documents SET updated_at = ?2 WHERE id = ?1",
            params![document_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn require_document(&self, id: &str) -> Result<()> {
        let exists: bool = self.conn.lock().query_row(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if exists {
            Ok(())
        } else {
            Err(DocumentDbError::DocumentNotFound(id.to_string()))
        }
    }
}

fn block_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok(BlockRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        position: row.get(2)?,
        class_name: row.get(3)?,
        content: row.get(4)?,
    })
}

const V0001_DOCUMENTS: &str = "
CREATE TABLE IF NOT EXISTS migrations(
    name TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS documents(
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS document_meta(
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY(document_id, key)
);
";

const V0002_BLOCKS: &str = "
CREATE TABLE IF NOT EXISTS blocks(
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    class_name TEXT NOT NULL DEFAULT '',
    content TEXT NOT NULL DEFAULT '',
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_blocks_document ON blocks(document_id, position);
";

fn apply_migrations(conn: &Connection) -> Result<()> {
    for (name, sql) in [
        ("V0001__documents", V0001_DOCUMENTS),
        ("V0002__blocks", V0002_BLOCKS),
    ] {
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
            params![name],
        )?;
    }
    Ok(())
}

impl DocumentDb {
    /// Run a query on the blocking pool so async callers never wait on SQLite
    /// from a runtime worker.
    async fn blocking<T, F>(&self, query: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DocumentDb) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        Ok(tokio::task::spawn_blocking(move || query(&db)).await??)
    }
}

#[async_trait]
impl MetadataStore for DocumentDb {
    async fn get_metadata(
        &self,
        document: &DocumentId,
        key: &str,
    ) -> anyhow::Result<Option<String>> {
        let (document, key) = (document.0.clone(), key.to_string());
        self.blocking(move |db| db.read_metadata(&document, &key)).await
    }

    async fn set_metadata(
        &self,
        document: &DocumentId,
        key: &str,
        value: &str,
    ) -> anyhow::Result<()> {
        let (document, key, value) = (document.0.clone(), key.to_string(), value.to_string());
        self.blocking(move |db| db.write_metadata(&document, &key, &value)).await
    }
}

/// Blocks are regions; their class name is the marker set.
#[async_trait]
impl RegionMarkers for DocumentDb {
    async fn markers(&self, region: &RegionId) -> anyhow::Result<Option<MarkerSet>> {
        let block = region.0.clone();
        let class_name = self.blocking(move |db| db.block_class_name(&block)).await?;
        Ok(class_name.as_deref().map(MarkerSet::from_class_name))
    }

    async fn set_markers(&self, region: &RegionId, markers: MarkerSet) -> anyhow::Result<bool> {
        let block = region.0.clone();
        let class_name = markers.to_class_name();
        self.blocking(move |db| db.set_block_class_name(&block, &class_name)).await
    }
}
