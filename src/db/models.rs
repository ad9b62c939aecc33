use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{DbError, Result};

/// What a playcount row counts plays of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    Album,
    Track,
}

impl EntityKind {
    /// Value stored in `user_entities.kind`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Track => "track",
        }
    }

    /// Lowercased name column for this kind in `user_plays`.
    pub(crate) fn play_key_column(&self) -> &'static str {
        match self {
            Self::Artist => "artist_key",
            Self::Album => "album_key",
            Self::Track => "track_key",
        }
    }

    pub(crate) fn play_name_column(&self) -> &'static str {
        match self {
            Self::Artist => "artist_name",
            Self::Album => "album_name",
            Self::Track => "track_name",
        }
    }
}

/// Case-insensitive lookup key for an entity name.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A tracked listener as seen from one guild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: i64,
    /// Username on the listening platform; last-resort display name.
    pub handle: String,
    /// Display name cached when the member was last seen in the guild.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Chat-platform identity, resolved lazily.
    #[serde(default)]
    pub platform_id: Option<i64>,
    /// Opted out of appearing in guild-visible rankings.
    #[serde(default)]
    pub private: bool,
}

/// Members allowed to appear in guild-visible ranked output.
pub fn visible_members(members: &[Member]) -> Vec<&Member> {
    members.iter().filter(|m| !m.private).collect()
}

pub fn member_ids<'a>(members: impl IntoIterator<Item = &'a Member>) -> Vec<i64> {
    members.into_iter().map(|m| m.user_id).collect()
}

/// Playcount row to store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPlaycount {
    pub user_id: i64,
    pub kind: EntityKind,
    pub name: String,
    pub playcount: i64,
}

/// One historical play event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedPlay {
    pub user_id: i64,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub track: Option<String>,
    pub played_at: DateTime<Utc>,
}

/// Which entity to aggregate over. Validated on construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFilter {
    pub kind: EntityKind,
    pub name: String,
    key: String,
}

impl EntityFilter {
    pub fn new(kind: EntityKind, name: &str) -> Result<Self> {
        let key = name_key(name);
        if key.is_empty() {
            return Err(DbError::InvalidFilter(format!(
                "{} name must not be empty",
                kind.as_str()
            )));
        }
        Ok(Self {
            kind,
            name: name.trim().to_string(),
            key,
        })
    }

    pub fn artist(name: &str) -> Result<Self> {
        Self::new(EntityKind::Artist, name)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Trailing window of UTC calendar days: `(now - days, now]` at day granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayWindow {
    /// Exclusive lower bound.
    pub after: NaiveDate,
    /// Inclusive upper bound.
    pub until: NaiveDate,
}

impl PlayWindow {
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Result<Self> {
        if days < 1 {
            return Err(DbError::InvalidFilter(format!(
                "window must cover at least one day, got {days}"
            )));
        }
        let after = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or_else(|| DbError::InvalidFilter(format!("window of {days} days is too long")))?;
        Ok(Self {
            after: after.date_naive(),
            until: now.date_naive(),
        })
    }

    /// The window of the same length that ends where this one begins.
    pub fn previous(&self) -> Result<Self> {
        let len = self.until - self.after;
        let after = self.after.checked_sub_signed(len).ok_or_else(|| {
            DbError::InvalidFilter(format!("no earlier window before {}", self.after))
        })?;
        Ok(Self {
            after,
            until: self.after,
        })
    }
}

/// Ordering for guild top lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    Playcount,
    Listeners,
}

/// One entity in a guild top list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    pub name: String,
    pub playcount: i64,
    pub listener_count: i64,
}

/// A member's playcount for a single entity, before display-name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberPlaycount {
    pub user_id: i64,
    pub name: String,
    pub playcount: i64,
}

/// A member row in a "who knows" listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedMember {
    pub user_id: i64,
    pub entity_name: String,
    pub playcount: i64,
    pub display_name: String,
    pub handle: String,
}

/// Neighbor match for a target member.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub user_id: i64,
    pub display_name: String,
    /// Normalized score in `[0, 100]`.
    pub match_percentage: f64,
    /// Raw weighted overlap the percentage was derived from.
    pub score: f64,
}

/// Store statistics.
#[derive(Debug)]
pub struct StoreStats {
    pub users: i64,
    pub guilds: i64,
    pub entity_rows: i64,
    pub plays: i64,
    pub kinds: Vec<(String, i64)>,
}
