//! Guild leaderboards: who knows an entity, top entities, and weekly counts.
//!
//! Aggregates run over whatever member set the caller passes, so callers decide
//! whether private members count towards totals. Listings that name members
//! always drop private members.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::billboard::{self, RankDelta};
use crate::db::models::{
    EntityFilter, EntityKind, IndexedMember, Member, OrderBy, PlayWindow, RankedEntry, member_ids,
    visible_members,
};
use crate::db::{Database, DbError, Result};
use crate::guild::DisplayNameChain;

/// Rows per ranked list.
pub const PAGE_SIZE: usize = 14;

/// How far down last period's list to look when computing rank movement.
const BILLBOARD_HISTORY_DEPTH: usize = 200;

fn check_page_size(page_size: usize) -> Result<()> {
    if page_size == 0 {
        return Err(DbError::InvalidFilter("page size must be at least 1".into()));
    }
    Ok(())
}

/// Top entities of a kind across the guild, at most `page_size` of them.
pub fn top_entities(
    db: &Database,
    members: &[Member],
    kind: EntityKind,
    order: OrderBy,
    page_size: usize,
) -> Result<Vec<RankedEntry>> {
    check_page_size(page_size)?;
    db.top_entities(&member_ids(members), kind, order, page_size)
}

pub fn listener_count(db: &Database, members: &[Member], filter: &EntityFilter) -> Result<i64> {
    db.listener_count(&member_ids(members), filter)
}

pub fn total_playcount(db: &Database, members: &[Member], filter: &EntityFilter) -> Result<i64> {
    db.total_playcount(&member_ids(members), filter)
}

pub fn average_playcount(db: &Database, members: &[Member], filter: &EntityFilter) -> Result<f64> {
    db.average_playcount(&member_ids(members), filter)
}

/// Plays of the entity in the trailing `days` window ending at `now`.
pub fn windowed_playcount(
    db: &Database,
    members: &[Member],
    filter: &EntityFilter,
    now: DateTime<Utc>,
    days: i64,
) -> Result<i64> {
    let window = PlayWindow::trailing_days(now, days)?;
    db.windowed_playcount(&member_ids(members), filter, &window)
}

/// Distinct members who played the entity in the trailing window.
pub fn windowed_listener_count(
    db: &Database,
    members: &[Member],
    filter: &EntityFilter,
    now: DateTime<Utc>,
    days: i64,
) -> Result<i64> {
    let window = PlayWindow::trailing_days(now, days)?;
    db.windowed_listener_count(&member_ids(members), filter, &window)
}

/// "Who knows" listing: visible members with the entity, highest playcount first,
/// each with a resolved display name.
pub fn ranked_indexed_members(
    db: &Database,
    members: &[Member],
    filter: &EntityFilter,
    cap: usize,
    names: &DisplayNameChain<'_>,
) -> Result<Vec<IndexedMember>> {
    check_page_size(cap)?;
    let visible = visible_members(members);
    let by_id: HashMap<i64, &Member> = visible.iter().map(|m| (m.user_id, *m)).collect();

    let rows = db.members_for_entity(&member_ids(visible.iter().copied()), filter, cap)?;
    log::debug!("{} members know {} '{}'", rows.len(), filter.kind.as_str(), filter.name);

    let listing = rows
        .into_iter()
        .filter_map(|row| {
            let member = by_id.get(&row.user_id)?;
            Some(IndexedMember {
                user_id: row.user_id,
                entity_name: row.name,
                playcount: row.playcount,
                display_name: names.resolve(member),
                handle: member.handle.clone(),
            })
        })
        .collect();

    Ok(listing)
}

/// This window's top entities with their movement against the previous window
/// of the same length.
pub fn billboard(
    db: &Database,
    members: &[Member],
    kind: EntityKind,
    now: DateTime<Utc>,
    days: i64,
    page_size: usize,
) -> Result<Vec<(RankedEntry, RankDelta)>> {
    check_page_size(page_size)?;
    let ids = member_ids(members);
    let window = PlayWindow::trailing_days(now, days)?;

    let current = db.windowed_top_entities(&ids, kind, &window, page_size)?;
    let previous = db.windowed_top_entities(
        &ids,
        kind,
        &window.previous()?,
        page_size.max(BILLBOARD_HISTORY_DEPTH),
    )?;

    let previous_names: Vec<&str> = previous.iter().map(|e| e.name.as_str()).collect();
    let current_names: Vec<&str> = current.iter().map(|e| e.name.as_str()).collect();
    let deltas = billboard::compare_snapshots(&previous_names, &current_names);

    Ok(current.into_iter().zip(deltas).collect())
}
