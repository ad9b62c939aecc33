use super::models::{
    EntityFilter, EntityKind, EntityPlaycount, Member, MemberPlaycount, OrderBy, PlayWindow,
    RankedEntry, StoreStats, TimestampedPlay, name_key,
};
use super::{Database, Result};
use rusqlite::types::Value;
use rusqlite::{OptionalExtension, params, params_from_iter};

/// Stored `played_at` format; `date(played_at)` yields the UTC calendar day.
const PLAYED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DAY_FORMAT: &str = "%Y-%m-%d";

/// `?, ?, ?` for an `IN (...)` list.
fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Leading scalar params followed by the member ids of the `IN` list.
fn with_members(mut leading: Vec<Value>, member_ids: &[i64]) -> Vec<Value> {
    leading.extend(member_ids.iter().map(|&id| Value::Integer(id)));
    leading
}

fn window_params(window: &PlayWindow) -> [Value; 2] {
    [
        Value::Text(window.after.format(DAY_FORMAT).to_string()),
        Value::Text(window.until.format(DAY_FORMAT).to_string()),
    ]
}

impl Database {
    /// Insert or update a user.
    pub fn upsert_user(&self, m: &Member) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, handle, platform_id, private)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                handle = excluded.handle,
                platform_id = excluded.platform_id,
                private = excluded.private",
            params![m.user_id, m.handle, m.platform_id, m.private],
        )?;
        Ok(())
    }

    /// Add a user to a guild, caching their display name and guild nickname.
    pub fn upsert_guild_member(
        &self,
        guild_id: i64,
        m: &Member,
        nickname: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO guild_members (guild_id, user_id, display_name, nickname)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(guild_id, user_id) DO UPDATE SET
                display_name = excluded.display_name,
                nickname = excluded.nickname",
            params![guild_id, m.user_id, m.display_name, nickname],
        )?;
        Ok(())
    }

    /// Insert or replace a user's playcount for one entity.
    /// Names differing only in case collapse onto the same row.
    pub fn upsert_playcount(&self, p: &EntityPlaycount) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_entities (user_id, kind, name, name_key, playcount)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, name_key, kind) DO UPDATE SET
                name = excluded.name,
                playcount = excluded.playcount",
            params![
                p.user_id,
                p.kind.as_str(),
                p.name.trim(),
                name_key(&p.name),
                p.playcount
            ],
        )?;
        Ok(())
    }

    /// Record a play event.
    pub fn insert_play(&self, p: &TimestampedPlay) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO user_plays (
                user_id, artist_name, artist_key, album_name, album_key,
                track_name, track_key, played_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                p.user_id,
                p.artist.trim(),
                name_key(&p.artist),
                p.album.as_deref().map(str::trim),
                p.album.as_deref().map(name_key),
                p.track.as_deref().map(str::trim),
                p.track.as_deref().map(name_key),
                p.played_at.format(PLAYED_AT_FORMAT).to_string(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Members of a guild, in user id order.
    pub fn guild_members(&self, guild_id: i64) -> Result<Vec<Member>> {
        let mut stmt = self.conn.prepare(
            "SELECT u.id, u.handle, g.display_name, u.platform_id, u.private
             FROM guild_members g
             JOIN users u ON u.id = g.user_id
             WHERE g.guild_id = ?1
             ORDER BY u.id",
        )?;

        let members = stmt
            .query_map(params![guild_id], |row| {
                Ok(Member {
                    user_id: row.get(0)?,
                    handle: row.get(1)?,
                    display_name: row.get(2)?,
                    platform_id: row.get(3)?,
                    private: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(members)
    }

    /// Guild-specific nickname, if one is set.
    pub fn guild_nickname(&self, guild_id: i64, user_id: i64) -> Result<Option<String>> {
        let nickname = self
            .conn
            .query_row(
                "SELECT nickname FROM guild_members WHERE guild_id = ?1 AND user_id = ?2",
                params![guild_id, user_id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(nickname.flatten())
    }

    /// Top entities across the given members, grouped by lowercased name.
    /// Primary order is `order`; ties fall back to the other metric, then name.
    pub fn top_entities(
        &self,
        member_ids: &[i64],
        kind: EntityKind,
        order: OrderBy,
        limit: usize,
    ) -> Result<Vec<RankedEntry>> {
        if member_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let order_clause = match order {
            OrderBy::Playcount => "plays DESC, listeners DESC",
            OrderBy::Listeners => "listeners DESC, plays DESC",
        };
        let sql = format!(
            "SELECT MAX(name), SUM(playcount) AS plays, COUNT(*) AS listeners
             FROM user_entities
             WHERE kind = ? AND playcount > 0 AND user_id IN ({})
             GROUP BY name_key
             ORDER BY {order_clause}, name_key ASC
             LIMIT ?",
            placeholders(member_ids.len())
        );

        let mut values = with_members(vec![Value::Text(kind.as_str().into())], member_ids);
        values.push(Value::Integer(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(RankedEntry {
                    name: row.get(0)?,
                    playcount: row.get(1)?,
                    listener_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Top entities by raw plays inside a window. Listener count is distinct members.
    pub fn windowed_top_entities(
        &self,
        member_ids: &[i64],
        kind: EntityKind,
        window: &PlayWindow,
        limit: usize,
    ) -> Result<Vec<RankedEntry>> {
        if member_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let key_col = kind.play_key_column();
        let name_col = kind.play_name_column();
        let sql = format!(
            "SELECT MAX({name_col}), COUNT(*) AS plays, COUNT(DISTINCT user_id) AS listeners
             FROM user_plays
             WHERE {key_col} IS NOT NULL
               AND date(played_at) > ? AND date(played_at) <= ?
               AND user_id IN ({})
             GROUP BY {key_col}
             ORDER BY plays DESC, listeners DESC, {key_col} ASC
             LIMIT ?",
            placeholders(member_ids.len())
        );

        let mut values = with_members(window_params(window).to_vec(), member_ids);
        values.push(Value::Integer(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(RankedEntry {
                    name: row.get(0)?,
                    playcount: row.get(1)?,
                    listener_count: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Number of members with at least one play of the entity.
    pub fn listener_count(&self, member_ids: &[i64], filter: &EntityFilter) -> Result<i64> {
        if member_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*) FROM user_entities
             WHERE kind = ? AND name_key = ? AND playcount > 0 AND user_id IN ({})",
            placeholders(member_ids.len())
        );
        let values = with_members(entity_params(filter), member_ids);
        let count = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// Sum of playcounts across members. Zero when no member has the entity.
    pub fn total_playcount(&self, member_ids: &[i64], filter: &EntityFilter) -> Result<i64> {
        if member_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT COUNT(*), SUM(playcount) FROM user_entities
             WHERE kind = ? AND name_key = ? AND user_id IN ({})",
            placeholders(member_ids.len())
        );
        let values = with_members(entity_params(filter), member_ids);
        let (rows, sum): (i64, Option<i64>) = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        if rows == 0 {
            return Ok(0);
        }
        Ok(sum.unwrap_or(0))
    }

    /// Mean playcount over members who have played the entity. Zero when none have.
    pub fn average_playcount(&self, member_ids: &[i64], filter: &EntityFilter) -> Result<f64> {
        if member_ids.is_empty() {
            return Ok(0.0);
        }
        let sql = format!(
            "SELECT COUNT(*), AVG(playcount) FROM user_entities
             WHERE kind = ? AND name_key = ? AND playcount > 0 AND user_id IN ({})",
            placeholders(member_ids.len())
        );
        let values = with_members(entity_params(filter), member_ids);
        let (rows, avg): (i64, Option<f64>) = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;

        if rows == 0 {
            return Ok(0.0);
        }
        Ok(avg.unwrap_or(0.0))
    }

    /// A single user's playcount for an entity, `None` if they have no row.
    pub fn member_playcount(&self, user_id: i64, filter: &EntityFilter) -> Result<Option<i64>> {
        let playcount = self
            .conn
            .query_row(
                "SELECT playcount FROM user_entities
                 WHERE user_id = ?1 AND kind = ?2 AND name_key = ?3",
                params![user_id, filter.kind.as_str(), filter.key()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(playcount)
    }

    /// Per-member playcounts for an entity, highest first.
    pub fn members_for_entity(
        &self,
        member_ids: &[i64],
        filter: &EntityFilter,
        limit: usize,
    ) -> Result<Vec<MemberPlaycount>> {
        if member_ids.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT user_id, name, playcount FROM user_entities
             WHERE kind = ? AND name_key = ? AND playcount > 0 AND user_id IN ({})
             ORDER BY playcount DESC, user_id ASC
             LIMIT ?",
            placeholders(member_ids.len())
        );
        let mut values = with_members(entity_params(filter), member_ids);
        values.push(Value::Integer(limit as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(MemberPlaycount {
                    user_id: row.get(0)?,
                    name: row.get(1)?,
                    playcount: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Plays of an entity inside the window.
    pub fn windowed_playcount(
        &self,
        member_ids: &[i64],
        filter: &EntityFilter,
        window: &PlayWindow,
    ) -> Result<i64> {
        self.windowed_count(member_ids, filter, window, "COUNT(*)")
    }

    /// Distinct members with a play of the entity inside the window.
    pub fn windowed_listener_count(
        &self,
        member_ids: &[i64],
        filter: &EntityFilter,
        window: &PlayWindow,
    ) -> Result<i64> {
        self.windowed_count(member_ids, filter, window, "COUNT(DISTINCT user_id)")
    }

    fn windowed_count(
        &self,
        member_ids: &[i64],
        filter: &EntityFilter,
        window: &PlayWindow,
        aggregate: &str,
    ) -> Result<i64> {
        if member_ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "SELECT {aggregate} FROM user_plays
             WHERE {} = ?
               AND date(played_at) > ? AND date(played_at) <= ?
               AND user_id IN ({})",
            filter.kind.play_key_column(),
            placeholders(member_ids.len())
        );
        let mut leading = vec![Value::Text(filter.key().to_string())];
        leading.extend(window_params(window));
        let values = with_members(leading, member_ids);

        let count = self
            .conn
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count)
    }

    /// Highest single playcount a user has for any entity of this kind.
    pub fn member_top_playcount(&self, user_id: i64, kind: EntityKind) -> Result<Option<i64>> {
        let top = self.conn.query_row(
            "SELECT MAX(playcount) FROM user_entities WHERE user_id = ?1 AND kind = ?2",
            params![user_id, kind.as_str()],
            |row| row.get::<_, Option<i64>>(0),
        )?;
        Ok(top)
    }

    /// Mean playcount over a user's entities at or above `floor`. Zero when none qualify.
    pub fn member_average_playcount(
        &self,
        user_id: i64,
        kind: EntityKind,
        floor: i64,
    ) -> Result<f64> {
        let (rows, avg): (i64, Option<f64>) = self.conn.query_row(
            "SELECT COUNT(*), AVG(playcount) FROM user_entities
             WHERE user_id = ?1 AND kind = ?2 AND playcount >= ?3",
            params![user_id, kind.as_str(), floor],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if rows == 0 {
            return Ok(0.0);
        }
        Ok(avg.unwrap_or(0.0))
    }

    /// A user's (lowercased name, playcount) pairs at or above `floor`, highest first.
    pub fn member_weighted_entities(
        &self,
        user_id: i64,
        kind: EntityKind,
        floor: i64,
    ) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name_key, playcount FROM user_entities
             WHERE user_id = ?1 AND kind = ?2 AND playcount >= ?3
             ORDER BY playcount DESC, name_key ASC",
        )?;
        let rows = stmt
            .query_map(params![user_id, kind.as_str(), floor], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Store statistics.
    pub fn stats(&self) -> Result<StoreStats> {
        let users: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

        let guilds: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT guild_id) FROM guild_members",
            [],
            |row| row.get(0),
        )?;

        let entity_rows: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM user_entities", [], |row| row.get(0))?;

        let plays: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM user_plays", [], |row| row.get(0))?;

        let mut kind_stmt = self.conn.prepare(
            "SELECT kind, COUNT(*) FROM user_entities GROUP BY kind ORDER BY COUNT(*) DESC",
        )?;
        let kinds: Vec<(String, i64)> = kind_stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(StoreStats {
            users,
            guilds,
            entity_rows,
            plays,
            kinds,
        })
    }
}

fn entity_params(filter: &EntityFilter) -> Vec<Value> {
    vec![
        Value::Text(filter.kind.as_str().to_string()),
        Value::Text(filter.key().to_string()),
    ]
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::EntityKind::{Album, Artist};
    use chrono::{Duration, TimeZone, Utc};

    pub(crate) fn member(id: i64, handle: &str) -> Member {
        Member {
            user_id: id,
            handle: handle.to_string(),
            display_name: None,
            platform_id: None,
            private: false,
        }
    }

    pub(crate) fn seed_playcounts(db: &Database, rows: &[(i64, EntityKind, &str, i64)]) {
        for &(user_id, kind, name, playcount) in rows {
            db.conn
                .execute(
                    "INSERT OR IGNORE INTO users (id, handle) VALUES (?1, ?2)",
                    params![user_id, format!("user{user_id}")],
                )
                .unwrap();
            db.upsert_playcount(&EntityPlaycount {
                user_id,
                kind,
                name: name.to_string(),
                playcount,
            })
            .unwrap();
        }
    }

    #[test]
    fn test_upsert_playcount_is_case_insensitive() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(&db, &[(1, Artist, "Radiohead", 10), (1, Artist, "RADIOHEAD", 25)]);

        let stats = db.stats().unwrap();
        assert_eq!(stats.entity_rows, 1);
        let f = EntityFilter::artist("radiohead").unwrap();
        assert_eq!(db.member_playcount(1, &f).unwrap(), Some(25));
    }

    #[test]
    fn test_zero_row_aggregates() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(&db, &[(1, Artist, "Radiohead", 10)]);
        let f = EntityFilter::artist("Nobody Listens To This").unwrap();

        assert_eq!(db.total_playcount(&[1, 2], &f).unwrap(), 0);
        assert_eq!(db.average_playcount(&[1, 2], &f).unwrap(), 0.0);
        assert_eq!(db.listener_count(&[1, 2], &f).unwrap(), 0);
        assert_eq!(db.member_playcount(1, &f).unwrap(), None);
        assert!(db.members_for_entity(&[1, 2], &f, 14).unwrap().is_empty());
        assert_eq!(db.total_playcount(&[], &f).unwrap(), 0);
    }

    #[test]
    fn test_aggregates_exact_match_not_substring() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(
            &db,
            &[
                (1, Artist, "Radiohead", 10),
                (2, Artist, "radiohead", 30),
                (3, Artist, "Radiohead Tribute Band", 99),
                (4, Artist, "Radiohead", 1000),
            ],
        );
        let f = EntityFilter::artist("RadioHead").unwrap();
        let members = [1, 2, 3];

        assert_eq!(db.total_playcount(&members, &f).unwrap(), 40);
        assert_eq!(db.listener_count(&members, &f).unwrap(), 2);
        assert!((db.average_playcount(&members, &f).unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_playcount_rows_are_not_listeners() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(
            &db,
            &[(1, Artist, "Low", 10), (2, Artist, "Low", 0), (2, Artist, "Ghost", 0)],
        );
        let f = EntityFilter::artist("Low").unwrap();

        assert_eq!(db.listener_count(&[1, 2], &f).unwrap(), 1);
        assert_eq!(db.total_playcount(&[1, 2], &f).unwrap(), 10);
        assert!((db.average_playcount(&[1, 2], &f).unwrap() - 10.0).abs() < 1e-9);

        let rows = db.members_for_entity(&[1, 2], &f, 14).unwrap();
        assert_eq!(rows.iter().map(|r| r.user_id).collect::<Vec<_>>(), vec![1]);

        let top = db.top_entities(&[1, 2], Artist, OrderBy::Listeners, 14).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].name, "Low");
        assert_eq!(top[0].listener_count, 1);
        assert_eq!(top[0].playcount, 10);
    }

    #[test]
    fn test_top_entities_tie_breaks() {
        let db = Database::open_in_memory().unwrap();
        // Both total 100 plays; "Alpha" has more listeners.
        seed_playcounts(
            &db,
            &[
                (1, Artist, "Beta", 100),
                (1, Artist, "Alpha", 50),
                (2, Artist, "alpha", 50),
                (3, Artist, "Gamma", 10),
                (2, Artist, "Gamma", 10),
                (1, Artist, "Gamma", 10),
                (1, Album, "Alpha", 5000),
            ],
        );

        let by_plays = db.top_entities(&[1, 2, 3], Artist, OrderBy::Playcount, 14).unwrap();
        let names: Vec<_> = by_plays.iter().map(|e| e.name.to_lowercase()).collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(by_plays[0].playcount, 100);
        assert_eq!(by_plays[0].listener_count, 2);

        let by_listeners = db.top_entities(&[1, 2, 3], Artist, OrderBy::Listeners, 14).unwrap();
        let names: Vec<_> = by_listeners.iter().map(|e| e.name.to_lowercase()).collect();
        assert_eq!(names, vec!["gamma", "alpha", "beta"]);
    }

    #[test]
    fn test_top_entities_respects_limit_and_members() {
        let db = Database::open_in_memory().unwrap();
        let rows: Vec<(i64, EntityKind, String, i64)> = (0..20)
            .map(|i| (1, Artist, format!("Artist {i}"), 100 - i))
            .collect();
        let borrowed: Vec<_> = rows.iter().map(|(u, k, n, p)| (*u, *k, n.as_str(), *p)).collect();
        seed_playcounts(&db, &borrowed);
        seed_playcounts(&db, &[(2, Artist, "Outsider", 10_000)]);

        let top = db.top_entities(&[1], Artist, OrderBy::Playcount, 14).unwrap();
        assert_eq!(top.len(), 14);
        assert!(top.iter().all(|e| e.name != "Outsider"));
        assert!(top.windows(2).all(|w| w[0].playcount >= w[1].playcount));
    }

    #[test]
    fn test_members_for_entity_ordering() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(
            &db,
            &[(1, Artist, "Low", 40), (2, Artist, "LOW", 90), (3, Artist, "low", 40)],
        );
        let f = EntityFilter::artist("low").unwrap();
        let rows = db.members_for_entity(&[1, 2, 3], &f, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, 2);
        assert_eq!(rows[1].user_id, 1);
    }

    #[test]
    fn test_windowed_counts() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(&db, &[(1, Artist, "Low", 1), (2, Artist, "Low", 1)]);
        let now = Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap();
        let play = |user_id, artist: &str, at| TimestampedPlay {
            user_id,
            artist: artist.to_string(),
            album: None,
            track: Some("Words".to_string()),
            played_at: at,
        };
        db.insert_play(&play(1, "Low", now)).unwrap();
        db.insert_play(&play(1, "low", now - Duration::days(2))).unwrap();
        db.insert_play(&play(2, "Low", now - Duration::days(8))).unwrap();
        db.insert_play(&play(2, "Other", now)).unwrap();

        let window = PlayWindow::trailing_days(now, 7).unwrap();
        let f = EntityFilter::artist("LOW").unwrap();
        assert_eq!(db.windowed_playcount(&[1, 2], &f, &window).unwrap(), 2);
        assert_eq!(db.windowed_listener_count(&[1, 2], &f, &window).unwrap(), 1);

        let track = EntityFilter::new(EntityKind::Track, "words").unwrap();
        assert_eq!(db.windowed_playcount(&[1, 2], &track, &window).unwrap(), 3);

        let top = db.windowed_top_entities(&[1, 2], Artist, &window, 14).unwrap();
        assert_eq!(top[0].name.to_lowercase(), "low");
        assert_eq!(top[0].playcount, 2);
        assert_eq!(top[1].name, "Other");
    }

    #[test]
    fn test_member_vector_inputs() {
        let db = Database::open_in_memory().unwrap();
        seed_playcounts(
            &db,
            &[
                (1, Artist, "A", 300),
                (1, Artist, "B", 60),
                (1, Artist, "C", 29),
                (1, Album, "Huge", 9000),
            ],
        );
        assert_eq!(db.member_top_playcount(1, Artist).unwrap(), Some(300));
        assert_eq!(db.member_top_playcount(99, Artist).unwrap(), None);
        assert!((db.member_average_playcount(1, Artist, 30).unwrap() - 180.0).abs() < 1e-9);
        assert_eq!(db.member_average_playcount(99, Artist, 30).unwrap(), 0.0);

        let rows = db.member_weighted_entities(1, Artist, 30).unwrap();
        assert_eq!(rows, vec![("a".to_string(), 300), ("b".to_string(), 60)]);
    }

    #[test]
    fn test_guild_members_and_nicknames() {
        let db = Database::open_in_memory().unwrap();
        let mut alice = member(1, "alice_fm");
        alice.display_name = Some("Alice".into());
        let mut bob = member(2, "bob_fm");
        bob.private = true;
        db.upsert_user(&alice).unwrap();
        db.upsert_user(&bob).unwrap();
        db.upsert_guild_member(10, &alice, Some("Al")).unwrap();
        db.upsert_guild_member(10, &bob, None).unwrap();

        let members = db.guild_members(10).unwrap();
        assert_eq!(members, vec![alice, bob]);
        assert_eq!(db.guild_nickname(10, 1).unwrap().as_deref(), Some("Al"));
        assert_eq!(db.guild_nickname(10, 2).unwrap(), None);
        assert_eq!(db.guild_nickname(11, 1).unwrap(), None);
        assert_eq!(db.stats().unwrap().guilds, 1);
    }
}
