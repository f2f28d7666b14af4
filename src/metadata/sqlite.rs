//! SQLite-backed image metadata store.
//!
//! Uses `rusqlite` with the `bundled` feature so no system SQLite
//! library is required.  All async trait methods are thin wrappers
//! around synchronous rusqlite calls executed under a `Mutex`.
//!
//! Multi-row writes (replace, merge) run inside a single transaction so a
//! failure never leaves an image with half of a write applied.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::store::{ImageMetadataStore, KeyAbsent, MetadataSet};

/// Current schema version. Bumped when migrations are added.
const SCHEMA_VERSION: i64 = 1;

/// Image metadata store backed by a single SQLite database file.
pub struct SqliteImageStore {
    /// The database connection, guarded by a mutex for Send + Sync.
    conn: Mutex<Connection>,
}

impl SqliteImageStore {
    /// Open (or create) the database at `path` and initialize the schema.
    ///
    /// Passing `":memory:"` creates an in-memory database (useful for tests).
    pub fn new(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.apply_pragmas()?;
        store.init_db()?;
        Ok(store)
    }

    /// Apply recommended SQLite pragmas for performance and safety.
    fn apply_pragmas(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        Ok(())
    }

    /// Create the required tables if they do not already exist.
    /// This is idempotent -- safe to call on every startup (crash-only design).
    fn init_db(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("mutex poisoned");
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version    INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS images (
                id          TEXT PRIMARY KEY,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS image_metadata (
                image_id  TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     TEXT NOT NULL,

                PRIMARY KEY (image_id, key),
                FOREIGN KEY (image_id) REFERENCES images(id) ON DELETE CASCADE
            );
            ",
        )?;

        let existing: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .optional()?
            .flatten();

        if existing.map_or(true, |version| version < SCHEMA_VERSION) {
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![SCHEMA_VERSION, now_http_date()],
            )?;
        }

        Ok(())
    }

    /// Register an image with its initial metadata (crash-only: every
    /// startup is recovery). Idempotent: an image that is already known
    /// keeps its current metadata.
    pub fn seed_image(&self, image_id: &str, metadata: MetadataSet) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().expect("mutex poisoned");
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO images (id, created_at) VALUES (?1, ?2)",
            params![image_id, now_http_date()],
        )?;
        if inserted > 0 {
            insert_entries(&tx, image_id, &metadata)?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Current time as an HTTP date string, used for bookkeeping columns.
fn now_http_date() -> String {
    httpdate::fmt_http_date(std::time::SystemTime::now())
}

fn ensure_image(conn: &Connection, image_id: &str) -> anyhow::Result<()> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM images WHERE id = ?1",
            params![image_id],
            |row| row.get(0),
        )
        .optional()?;
    match found {
        Some(_) => Ok(()),
        None => Err(anyhow::anyhow!("Image does not exist: {image_id}")),
    }
}

fn select_metadata(conn: &Connection, image_id: &str) -> anyhow::Result<MetadataSet> {
    let mut stmt = conn.prepare_cached("SELECT key, value FROM image_metadata WHERE image_id = ?1")?;
    let rows = stmt.query_map(params![image_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut metadata = MetadataSet::new();
    for row in rows {
        let (key, value) = row?;
        metadata.insert(key, value);
    }
    Ok(metadata)
}

fn insert_entries(conn: &Connection, image_id: &str, metadata: &MetadataSet) -> anyhow::Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR REPLACE INTO image_metadata (image_id, key, value) VALUES (?1, ?2, ?3)",
    )?;
    for (key, value) in metadata {
        stmt.execute(params![image_id, key, value])?;
    }
    Ok(())
}

impl ImageMetadataStore for SqliteImageStore {
    fn image_exists(
        &self,
        image_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM images WHERE id = ?1",
                params![image_id],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    fn get_metadata(
        &self,
        image_id: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetadataSet>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            ensure_image(&conn, &image_id)?;
            select_metadata(&conn, &image_id)
        })
    }

    fn replace_metadata(
        &self,
        image_id: &str,
        metadata: MetadataSet,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.transaction()?;
            ensure_image(&tx, &image_id)?;
            tx.execute(
                "DELETE FROM image_metadata WHERE image_id = ?1",
                params![image_id],
            )?;
            insert_entries(&tx, &image_id, &metadata)?;
            tx.commit()?;
            Ok(())
        })
    }

    fn merge_metadata(
        &self,
        image_id: &str,
        metadata: MetadataSet,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetadataSet>> + Send + '_>> {
        let image_id = image_id.to_string();
        Box::pin(async move {
            let mut conn = self.conn.lock().expect("mutex poisoned");
            let tx = conn.transaction()?;
            ensure_image(&tx, &image_id)?;
            insert_entries(&tx, &image_id, &metadata)?;
            let merged = select_metadata(&tx, &image_id)?;
            tx.commit()?;
            Ok(merged)
        })
    }

    fn set_item(
        &self,
        image_id: &str,
        key: &str,
        value: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let image_id = image_id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            ensure_image(&conn, &image_id)?;
            conn.execute(
                "INSERT OR REPLACE INTO image_metadata (image_id, key, value) VALUES (?1, ?2, ?3)",
                params![image_id, key, value],
            )?;
            Ok(())
        })
    }

    fn delete_item(
        &self,
        image_id: &str,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        let image_id = image_id.to_string();
        let key = key.to_string();
        Box::pin(async move {
            let conn = self.conn.lock().expect("mutex poisoned");
            let deleted = conn.execute(
                "DELETE FROM image_metadata WHERE image_id = ?1 AND key = ?2",
                params![image_id, key],
            )?;
            if deleted == 0 {
                return Err(KeyAbsent { image_id, key }.into());
            }
            Ok(())
        })
    }
}
