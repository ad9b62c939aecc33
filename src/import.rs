//! Load a JSON listening-history dump into the store.
//!
//! ```json
//! {
//!   "users":      [{ "id": 1, "handle": "fm_alice", "platform_id": 42, "private": false }],
//!   "guilds":     [{ "id": 10, "members": [{ "user_id": 1, "display_name": "Alice", "nickname": "Al" }] }],
//!   "playcounts": [{ "user_id": 1, "kind": "artist", "name": "Low", "playcount": 120 }],
//!   "plays":      [{ "user_id": 1, "artist": "Low", "track": "Words", "played_at": "2024-06-01T20:00:00Z" }]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::db::models::{EntityPlaycount, Member, TimestampedPlay};
use crate::db::{Database, DbError};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to read dump: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse dump: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Invalid dump: {0}")]
    Invalid(String),
}

impl From<rusqlite::Error> for ImportError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(e))
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Dump {
    pub users: Vec<UserRecord>,
    pub guilds: Vec<GuildRecord>,
    pub playcounts: Vec<EntityPlaycount>,
    pub plays: Vec<TimestampedPlay>,
}

#[derive(Debug, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub handle: String,
    #[serde(default)]
    pub platform_id: Option<i64>,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Deserialize)]
pub struct GuildRecord {
    pub id: i64,
    #[serde(default)]
    pub members: Vec<GuildMemberRecord>,
}

#[derive(Debug, Deserialize)]
pub struct GuildMemberRecord {
    pub user_id: i64,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportResult {
    pub users: usize,
    pub memberships: usize,
    pub playcounts: usize,
    pub plays: usize,
}

pub fn import_file(db: &Database, path: &Path) -> Result<ImportResult, ImportError> {
    let contents = std::fs::read_to_string(path)?;
    let dump: Dump = serde_json::from_str(&contents)?;
    log::info!(
        "Importing {} users, {} guilds, {} playcounts, {} plays from {}",
        dump.users.len(),
        dump.guilds.len(),
        dump.playcounts.len(),
        dump.plays.len(),
        path.display()
    );
    import_dump(db, &dump)
}

/// Write a dump in a single transaction. Nothing is written if any record is invalid.
pub fn import_dump(db: &Database, dump: &Dump) -> Result<ImportResult, ImportError> {
    validate(dump)?;

    let tx = db.conn.unchecked_transaction()?;
    let mut result = ImportResult::default();

    for u in &dump.users {
        db.upsert_user(&Member {
            user_id: u.id,
            handle: u.handle.clone(),
            display_name: None,
            platform_id: u.platform_id,
            private: u.private,
        })?;
        result.users += 1;
    }

    for g in &dump.guilds {
        for gm in &g.members {
            let member = Member {
                user_id: gm.user_id,
                handle: String::new(),
                display_name: gm.display_name.clone(),
                platform_id: None,
                private: false,
            };
            db.upsert_guild_member(g.id, &member, gm.nickname.as_deref())?;
            result.memberships += 1;
        }
    }

    for p in &dump.playcounts {
        db.upsert_playcount(p)?;
        result.playcounts += 1;
    }

    for p in &dump.plays {
        db.insert_play(p)?;
        result.plays += 1;
    }

    tx.commit()?;
    Ok(result)
}

fn validate(dump: &Dump) -> Result<(), ImportError> {
    if let Some(p) = dump.playcounts.iter().find(|p| p.playcount < 0) {
        return Err(ImportError::Invalid(format!(
            "negative playcount {} for user {} {} '{}'",
            p.playcount,
            p.user_id,
            p.kind.as_str(),
            p.name
        )));
    }
    if let Some(p) = dump.playcounts.iter().find(|p| p.name.trim().is_empty()) {
        return Err(ImportError::Invalid(format!(
            "empty {} name for user {}",
            p.kind.as_str(),
            p.user_id
        )));
    }
    if let Some(p) = dump.plays.iter().find(|p| p.artist.trim().is_empty()) {
        return Err(ImportError::Invalid(format!(
            "play at {} for user {} has no artist",
            p.played_at, p.user_id
        )));
    }
    Ok(())
}
