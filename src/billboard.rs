//! Period-over-period rank movement for ranked lists.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::db::models::name_key;

/// Moves smaller than this count as "small".
const LARGE_MOVE: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Movement {
    New,
    UpSmall,
    UpLarge,
    DownSmall,
    DownLarge,
    Unchanged,
}

impl Movement {
    /// Plain-text marker for list rendering.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::New => "[new]",
            Self::UpSmall => "[+]",
            Self::UpLarge => "[++]",
            Self::DownSmall => "[-]",
            Self::DownLarge => "[--]",
            Self::Unchanged => "[=]",
        }
    }
}

impl fmt::Display for Movement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

/// Ranks are 0-based internally; `display_*` fields are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankDelta {
    pub name: String,
    pub new_rank: usize,
    pub old_rank: Option<usize>,
    /// `old - new`; positive means the entry climbed. `None` for new entries.
    pub movement: Option<i64>,
    pub bucket: Movement,
    pub display_new: usize,
    pub display_old: Option<usize>,
}

impl RankDelta {
    /// `"[+] 3. Name"`, or without the position when `counter` is false.
    pub fn line(&self, counter: bool) -> String {
        if counter {
            format!("{} {}. {}", self.bucket, self.display_new, self.name)
        } else {
            format!("{} {}", self.bucket, self.name)
        }
    }
}

pub fn delta(name: &str, new_rank: usize, old_rank: Option<usize>) -> RankDelta {
    let movement = old_rank.map(|old| old as i64 - new_rank as i64);
    let bucket = match movement {
        None => Movement::New,
        Some(0) => Movement::Unchanged,
        Some(m) if m > 0 && m < LARGE_MOVE => Movement::UpSmall,
        Some(m) if m > 0 => Movement::UpLarge,
        Some(m) if m.abs() < LARGE_MOVE => Movement::DownSmall,
        Some(_) => Movement::DownLarge,
    };

    RankDelta {
        name: name.to_string(),
        new_rank,
        old_rank,
        movement,
        bucket,
        display_new: new_rank + 1,
        display_old: old_rank.map(|r| r + 1),
    }
}

/// One delta per entry of `current`, matching names case-insensitively against
/// `previous`. Both lists are in rank order.
pub fn compare_snapshots<S: AsRef<str>>(previous: &[S], current: &[S]) -> Vec<RankDelta> {
    let mut old_ranks: HashMap<String, usize> = HashMap::with_capacity(previous.len());
    for (rank, name) in previous.iter().enumerate() {
        old_ranks.entry(name_key(name.as_ref())).or_insert(rank);
    }

    current
        .iter()
        .enumerate()
        .map(|(rank, name)| {
            let name = name.as_ref();
            delta(name, rank, old_ranks.get(&name_key(name)).copied())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry() {
        let d = delta("Artist", 4, None);
        assert_eq!(d.bucket, Movement::New);
        assert_eq!(d.movement, None);
        assert_eq!(d.display_new, 5);
        assert_eq!(d.display_old, None);
    }

    #[test]
    fn test_small_drop() {
        let d = delta("Artist", 2, Some(0));
        assert_eq!(d.movement, Some(-2));
        assert_eq!(d.bucket, Movement::DownSmall);
        assert_eq!(d.display_new, 3);
        assert_eq!(d.display_old, Some(1));
    }

    #[test]
    fn test_large_drop() {
        let d = delta("Artist", 10, Some(2));
        assert_eq!(d.movement, Some(-8));
        assert_eq!(d.bucket, Movement::DownLarge);
    }

    #[test]
    fn test_climbs_and_unchanged() {
        assert_eq!(delta("a", 0, Some(4)).bucket, Movement::UpSmall);
        assert_eq!(delta("a", 0, Some(5)).bucket, Movement::UpLarge);
        assert_eq!(delta("a", 5, Some(0)).bucket, Movement::DownLarge);
        let same = delta("a", 3, Some(3));
        assert_eq!(same.bucket, Movement::Unchanged);
        assert_eq!(same.movement, Some(0));
    }

    #[test]
    fn test_line() {
        let d = delta("Low", 0, Some(1));
        assert_eq!(d.line(true), "[+] 1. Low");
        assert_eq!(d.line(false), "[+] Low");
        assert_eq!(delta("Low", 2, None).line(true), "[new] 3. Low");
    }

    #[test]
    fn test_compare_snapshots() {
        let previous = ["Low", "Slowdive", "Duster"];
        let current = ["slowdive", "Grouper", "LOW"];
        let deltas = compare_snapshots(&previous, &current);

        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0].movement, Some(1));
        assert_eq!(deltas[0].name, "slowdive");
        assert_eq!(deltas[1].bucket, Movement::New);
        assert_eq!(deltas[2].movement, Some(-2));
        assert_eq!(deltas[2].display_old, Some(1));
    }
}
