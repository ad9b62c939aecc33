//! Taste-affinity ("neighbors") between one member and the rest of a guild.
//!
//! Each member's artist playcounts become a weight vector:
//! `weight = playcount / top_playcount × boost`, where the boost is larger for
//! artists played more than twice the member's average. The target's own vector
//! uses much larger boosts than its peers', so matches are driven by what the
//! target cares most about.
//!
//! `match = min(cap, Σ shared (peer × target) / Σ target × 100 × scale)`.
//! The scale and cap only spread scores across a readable range; they are tuning
//! constants, not derived.

use std::sync::Arc;

use chrono::Duration;
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;

use crate::cache::{AffinityCache, AffinityVector};
use crate::db::models::{EntityKind, MatchResult, Member};
use crate::db::{Database, DbError, DbLocation};

#[derive(Error, Debug)]
pub enum AffinityError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error("Invalid affinity settings: {0}")]
    InvalidSettings(String),
}

/// Longest a cached vector may live.
const MAX_CACHE_TTL_HOURS: i64 = 24 * 365;

/// Scoring constants. Defaults reproduce the production formula.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AffinitySettings {
    /// Minimum playcount for an artist to count towards a vector.
    pub noise_floor: i64,
    /// Playcounts above `boost_threshold × average` get the boosted multiplier.
    pub boost_threshold: f64,
    pub peer_boost: f64,
    pub peer_base: f64,
    pub target_boost: f64,
    pub target_base: f64,
    pub match_scale: f64,
    pub match_cap: f64,
    pub cache_ttl_hours: i64,
    /// Parallel vector workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
}

impl Default for AffinitySettings {
    fn default() -> Self {
        Self {
            noise_floor: 30,
            boost_threshold: 2.0,
            peer_boost: 3.0,
            peer_base: 1.0,
            target_boost: 24.0,
            target_base: 8.0,
            match_scale: 2.0,
            match_cap: 100.0,
            cache_ttl_hours: 12,
            workers: 0,
        }
    }
}

impl AffinitySettings {
    pub fn peer(&self) -> Boost {
        Boost {
            boosted: self.peer_boost,
            base: self.peer_base,
        }
    }

    pub fn target(&self) -> Boost {
        Boost {
            boosted: self.target_boost,
            base: self.target_base,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::try_hours(self.cache_ttl_hours.clamp(0, MAX_CACHE_TTL_HOURS))
            .unwrap_or_else(Duration::zero)
    }

    /// Reject values that would produce negative weights, a meaningless
    /// percentage, or an unrepresentable expiry.
    pub fn validate(&self) -> Result<(), AffinityError> {
        let non_negative = [
            ("boost_threshold", self.boost_threshold),
            ("peer_boost", self.peer_boost),
            ("peer_base", self.peer_base),
            ("target_boost", self.target_boost),
            ("target_base", self.target_base),
            ("match_scale", self.match_scale),
            ("match_cap", self.match_cap),
        ];
        if let Some((name, value)) = non_negative
            .iter()
            .find(|(_, v)| !v.is_finite() || *v < 0.0)
        {
            return Err(AffinityError::InvalidSettings(format!(
                "{name} must be a finite, non-negative number, got {value}"
            )));
        }
        if self.noise_floor < 0 {
            return Err(AffinityError::InvalidSettings(format!(
                "noise_floor must not be negative, got {}",
                self.noise_floor
            )));
        }
        if !(0..=MAX_CACHE_TTL_HOURS).contains(&self.cache_ttl_hours) {
            return Err(AffinityError::InvalidSettings(format!(
                "cache_ttl_hours must be between 0 and {MAX_CACHE_TTL_HOURS}, got {}",
                self.cache_ttl_hours
            )));
        }
        Ok(())
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }
}

/// Multipliers applied to normalized playcounts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Boost {
    pub boosted: f64,
    pub base: f64,
}

/// Build a weight vector from a member's (lowercased name, playcount) rows.
/// Returns `None` when nothing qualifies.
pub fn build_vector(
    user_id: i64,
    entities: &[(String, i64)],
    top_playcount: i64,
    average: f64,
    boost: Boost,
    boost_threshold: f64,
) -> Option<AffinityVector> {
    if entities.is_empty() || top_playcount <= 0 {
        return None;
    }

    let top = top_playcount as f64;
    let weights = entities
        .iter()
        .map(|(name, playcount)| {
            let pc = (*playcount).max(0) as f64;
            let multiplier = if pc > average * boost_threshold {
                boost.boosted
            } else {
                boost.base
            };
            (name.clone(), (pc / top * multiplier).max(0.0))
        })
        .collect();

    Some(AffinityVector { user_id, weights })
}

/// Weighted overlap of a candidate with the target. `None` if they share nothing.
pub fn overlap_score(candidate: &AffinityVector, target: &AffinityVector) -> Option<f64> {
    let mut shared = false;
    let mut score = 0.0;
    for (name, weight) in &candidate.weights {
        if let Some(target_weight) = target.weights.get(name) {
            shared = true;
            score += weight * target_weight;
        }
    }
    shared.then_some(score)
}

pub fn match_percentage(score: f64, target_total: f64, scale: f64, cap: f64) -> f64 {
    if target_total <= 0.0 || !score.is_finite() {
        return 0.0;
    }
    // NaN falls through `max` to zero.
    (score / target_total * 100.0 * scale).min(cap).max(0.0)
}

/// Load the inputs for one member's vector and build it.
pub fn compute_vector(
    db: &Database,
    user_id: i64,
    settings: &AffinitySettings,
    boost: Boost,
) -> Result<Option<AffinityVector>, DbError> {
    let Some(top) = db.member_top_playcount(user_id, EntityKind::Artist)? else {
        return Ok(None);
    };
    let average = db.member_average_playcount(user_id, EntityKind::Artist, settings.noise_floor)?;
    let entities = db.member_weighted_entities(user_id, EntityKind::Artist, settings.noise_floor)?;

    Ok(build_vector(
        user_id,
        &entities,
        top,
        average,
        boost,
        settings.boost_threshold,
    ))
}

pub struct AffinityEngine<'a> {
    location: DbLocation,
    cache: &'a AffinityCache,
    settings: AffinitySettings,
    pool: rayon::ThreadPool,
}

impl<'a> AffinityEngine<'a> {
    pub fn new(
        location: DbLocation,
        cache: &'a AffinityCache,
        settings: AffinitySettings,
    ) -> Result<Self, AffinityError> {
        settings.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.resolve_workers())
            .build()?;
        Ok(Self {
            location,
            cache,
            settings,
            pool,
        })
    }

    /// Rank the other visible members of `members` by taste overlap with `target`.
    pub fn neighbors(
        &self,
        target: &Member,
        members: &[Member],
    ) -> Result<Vec<MatchResult>, AffinityError> {
        let db = Database::connect(&self.location)?;
        let Some(target_vector) =
            compute_vector(&db, target.user_id, &self.settings, self.settings.target())?
        else {
            log::info!("User {} has no artists above the noise floor", target.user_id);
            return Ok(Vec::new());
        };
        drop(db);

        let candidates: Vec<&Member> = members
            .iter()
            .filter(|m| m.user_id != target.user_id && !m.private)
            .collect();

        log::debug!(
            "Resolving vectors for {} candidates with {} workers",
            candidates.len(),
            self.pool.current_num_threads()
        );

        let vectors: Vec<(&Member, Arc<AffinityVector>)> = self.pool.install(|| {
            candidates
                .par_iter()
                .filter_map(|&m| self.candidate_vector(m.user_id).map(|v| (m, v)))
                .collect()
        });

        let target_total = target_vector.total_weight();
        let mut results: Vec<MatchResult> = vectors
            .iter()
            .filter_map(|(m, v)| {
                let score = overlap_score(v, &target_vector)?;
                if score <= 0.0 {
                    return None;
                }
                Some(MatchResult {
                    user_id: m.user_id,
                    display_name: m.display_name.clone().unwrap_or_else(|| m.handle.clone()),
                    match_percentage: match_percentage(
                        score,
                        target_total,
                        self.settings.match_scale,
                        self.settings.match_cap,
                    ),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.user_id.cmp(&b.user_id))
        });

        Ok(results)
    }

    /// Cached vector, or compute and cache it. Any failure means "no vector".
    fn candidate_vector(&self, user_id: i64) -> Option<Arc<AffinityVector>> {
        if let Some(hit) = self.cache.get(user_id) {
            log::debug!("Affinity cache hit for user {user_id}");
            return Some(hit);
        }

        let computed = Database::connect(&self.location)
            .and_then(|db| compute_vector(&db, user_id, &self.settings, self.settings.peer()));

        match computed {
            Ok(Some(vector)) => {
                let vector = Arc::new(vector);
                self.cache
                    .put(user_id, Arc::clone(&vector), self.settings.cache_ttl());
                Some(vector)
            }
            Ok(None) => None,
            Err(e) => {
                log::warn!("Skipping user {user_id} in neighbor scoring: {e}");
                None
            }
        }
    }
}
