//! Guild collaborators: who is in a guild, and what to call them.

use thiserror::Error;

use crate::db::models::Member;
use crate::db::{Database, DbError};

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("identity lookup failed for user {user_id}: {reason}")]
    Lookup { user_id: i64, reason: String },
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Current member set of a guild. Never mutated by the engines.
pub trait MembershipProvider {
    fn members(&self, guild_id: i64) -> Result<Vec<Member>, DbError>;
}

impl MembershipProvider for Database {
    fn members(&self, guild_id: i64) -> Result<Vec<Member>, DbError> {
        self.guild_members(guild_id)
    }
}

/// Live lookup of a member's current guild nickname. May fail per member.
pub trait IdentityResolver {
    fn live_name(&self, guild_id: i64, member: &Member) -> Result<Option<String>, IdentityError>;
}

/// Nicknames stored alongside guild membership.
pub struct StoredNicknames<'a> {
    db: &'a Database,
}

impl<'a> StoredNicknames<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

impl IdentityResolver for StoredNicknames<'_> {
    fn live_name(&self, guild_id: i64, member: &Member) -> Result<Option<String>, IdentityError> {
        Ok(self.db.guild_nickname(guild_id, member.user_id)?)
    }
}

type NameStep<'a> = Box<dyn Fn(&Member) -> Option<String> + 'a>;

/// Ordered display-name sources; the first non-empty answer wins.
pub struct DisplayNameChain<'a> {
    steps: Vec<NameStep<'a>>,
}

impl<'a> DisplayNameChain<'a> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn then(mut self, step: impl Fn(&Member) -> Option<String> + 'a) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Live nickname, then cached display name, then platform handle.
    /// A failed live lookup is logged and skipped.
    pub fn standard(guild_id: i64, resolver: &'a dyn IdentityResolver) -> Self {
        Self::new()
            .then(move |m| match resolver.live_name(guild_id, m) {
                Ok(name) => name,
                Err(e) => {
                    log::warn!("Falling back from live name for user {}: {}", m.user_id, e);
                    None
                }
            })
            .then(|m| m.display_name.clone())
            .then(|m| Some(m.handle.clone()))
    }

    /// Resolve a member's display name. Falls back to the handle when every step
    /// comes up empty.
    pub fn resolve(&self, member: &Member) -> String {
        self.steps
            .iter()
            .filter_map(|step| step(member))
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| member.handle.clone())
    }
}

impl Default for DisplayNameChain<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Resolver with canned answers; users in `failing` error out.
    pub(crate) struct FakeResolver {
        pub names: HashMap<i64, String>,
        pub failing: Vec<i64>,
    }

    impl IdentityResolver for FakeResolver {
        fn live_name(&self, _guild_id: i64, member: &Member) -> Result<Option<String>, IdentityError> {
            if self.failing.contains(&member.user_id) {
                return Err(IdentityError::Lookup {
                    user_id: member.user_id,
                    reason: "gateway timeout".into(),
                });
            }
            Ok(self.names.get(&member.user_id).cloned())
        }
    }

    fn member(id: i64, display_name: Option<&str>) -> Member {
        Member {
            user_id: id,
            handle: format!("handle{id}"),
            display_name: display_name.map(String::from),
            platform_id: None,
            private: false,
        }
    }

    #[test]
    fn test_standard_chain_order() {
        let resolver = FakeResolver {
            names: HashMap::from([(1, "Nick".to_string()), (4, "  ".to_string())]),
            failing: vec![3],
        };
        let chain = DisplayNameChain::standard(10, &resolver);

        assert_eq!(chain.resolve(&member(1, Some("Cached"))), "Nick");
        assert_eq!(chain.resolve(&member(2, Some("Cached"))), "Cached");
        assert_eq!(chain.resolve(&member(3, Some("Stale"))), "Stale");
        assert_eq!(chain.resolve(&member(3, None)), "handle3");
        // Blank live name is treated as absent
        assert_eq!(chain.resolve(&member(4, None)), "handle4");
    }

    #[test]
    fn test_empty_chain_uses_handle() {
        let chain = DisplayNameChain::new();
        assert_eq!(chain.resolve(&member(5, Some("x"))), "handle5");
    }

    #[test]
    fn test_stored_nicknames() {
        let db = Database::open_in_memory().unwrap();
        let m = member(1, Some("Cached"));
        db.upsert_user(&m).unwrap();
        db.upsert_guild_member(10, &m, Some("Guild Nick")).unwrap();

        let resolver = StoredNicknames::new(&db);
        assert_eq!(resolver.live_name(10, &m).unwrap().as_deref(), Some("Guild Nick"));
        assert_eq!(resolver.live_name(11, &m).unwrap(), None);
        assert_eq!(db.members(10).unwrap().len(), 1);
    }
}
