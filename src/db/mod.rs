pub mod models;
pub mod queries;

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),
    #[error("Database has no location other handles can connect to")]
    Detached,
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Where a database lives. Every handle opened from the same location sees the
/// same data, so concurrent workers each open their own connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    File(PathBuf),
    /// Named in-memory database shared between connections of this process.
    /// Lives as long as at least one connection to it is open.
    SharedMemory(String),
    /// Private in-memory database owned by a single connection.
    Detached,
}

pub struct Database {
    pub conn: Connection,
    location: DbLocation,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let location = DbLocation::File(path.to_path_buf());
        let db = Self::connect(&location)?;
        db.init()?;
        Ok(db)
    }

    /// Private in-memory database, not reachable from other handles.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn,
            location: DbLocation::Detached,
        };
        db.init()?;
        Ok(db)
    }

    /// In-memory database that further handles can attach to by name.
    pub fn open_shared_memory(name: &str) -> Result<Self> {
        let db = Self::connect(&DbLocation::SharedMemory(name.to_string()))?;
        db.init()?;
        Ok(db)
    }

    /// Open another connection to an already-initialized location.
    /// Skips migrations; used by per-candidate workers.
    pub fn connect(location: &DbLocation) -> Result<Self> {
        let conn = match location {
            DbLocation::File(path) => Connection::open(path)?,
            DbLocation::SharedMemory(name) => {
                let uri = format!("file:{name}?mode=memory&cache=shared");
                Connection::open_with_flags(
                    uri,
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                        | OpenFlags::SQLITE_OPEN_CREATE
                        | OpenFlags::SQLITE_OPEN_URI
                        | OpenFlags::SQLITE_OPEN_NO_MUTEX,
                )?
            }
            DbLocation::Detached => return Err(DbError::Detached),
        };
        Ok(Self {
            conn,
            location: location.clone(),
        })
    }

    pub fn location(&self) -> &DbLocation {
        &self.location
    }

    fn init(&self) -> Result<()> {
        if matches!(self.location, DbLocation::File(_)) {
            // WAL mode for concurrent readers during neighbor fan-out
            self.conn.pragma_update(None, "journal_mode", "WAL")?;
            self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version > SCHEMA_VERSION {
            return Err(DbError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }
        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    }

    /// V1: users, guild membership, per-user entity playcounts, raw plays.
    ///
    /// `name_key` columns hold the Unicode-lowercased name so case-insensitive
    /// lookups can use an index.
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id              INTEGER PRIMARY KEY,
                handle          TEXT NOT NULL,
                platform_id     INTEGER,
                private         INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS guild_members (
                guild_id        INTEGER NOT NULL,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                display_name    TEXT,
                nickname        TEXT,
                PRIMARY KEY (guild_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_guild_members_user ON guild_members(user_id);

            CREATE TABLE IF NOT EXISTS user_entities (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                kind            TEXT NOT NULL CHECK (kind IN ('artist', 'album', 'track')),
                name            TEXT NOT NULL,
                name_key        TEXT NOT NULL,
                playcount       INTEGER NOT NULL CHECK (playcount >= 0),
                UNIQUE(user_id, name_key, kind)
            );
            CREATE INDEX IF NOT EXISTS idx_entities_lookup ON user_entities(kind, name_key);
            CREATE INDEX IF NOT EXISTS idx_entities_user ON user_entities(user_id, kind, playcount);

            CREATE TABLE IF NOT EXISTS user_plays (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                artist_name     TEXT NOT NULL,
                artist_key      TEXT NOT NULL,
                album_name      TEXT,
                album_key       TEXT,
                track_name      TEXT,
                track_key       TEXT,
                played_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_plays_user_time ON user_plays(user_id, played_at);
            CREATE INDEX IF NOT EXISTS idx_plays_artist ON user_plays(artist_key);
            ",
        )?;
        Ok(())
    }
}

const SCHEMA_VERSION: i32 = 1;
