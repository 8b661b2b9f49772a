//! Permission nodes granted to users and roles.
//!
//! Checks are expressed as a [`Requirement`] tree and evaluated against the full
//! set of nodes a member holds, fetched once per check.

use itertools::Itertools;
use serenity::all::{GuildId, RoleId, UserId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::DraftResult;
use crate::store::PermissionStore;

pub const PERM_ADMIN: &str = "administrate_lobby";
pub const PERM_SETUP: &str = "setup";
pub const PERM_GAMERULE: &str = "gamerules";
pub const PERM_CHANNELS: &str = "channels";
pub const PERM_PERMISSIONS: &str = "permissions";
pub const PERM_LISTING: &str = "listing";
pub const PERM_SETLEADER: &str = "setLeader";

/// Holding this node satisfies every requirement.
pub const OWNERSHIP_NODE: &str = "$ownership";

pub struct PermissionNode {
    pub node: &'static str,
    pub help_text: &'static str,
}

pub const PERMISSION_NODES: &[PermissionNode] = &[
    PermissionNode {
        node: PERM_ADMIN,
        help_text: "Allows administrating game sessions",
    },
    PermissionNode {
        node: PERM_SETUP,
        help_text: "Allows setting up, starting and ending game sessions",
    },
    PermissionNode {
        node: PERM_SETLEADER,
        help_text: "Allows setting team leaders",
    },
    PermissionNode {
        node: PERM_GAMERULE,
        help_text: "Allows changing the game rules",
    },
    PermissionNode {
        node: PERM_CHANNELS,
        help_text: "Allows using all the commands related to channel configuration",
    },
    PermissionNode {
        node: PERM_PERMISSIONS,
        help_text: "Allows managing permissions using the `perm` command",
    },
    PermissionNode {
        node: PERM_LISTING,
        help_text: "Allows listing and showing game rules and permission nodes",
    },
];

pub fn is_registered_node(node: &str) -> bool {
    node == OWNERSHIP_NODE || PERMISSION_NODES.iter().any(|p| p.node == node)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    User(UserId),
    Role(RoleId),
}

#[derive(Debug, Clone)]
pub enum Requirement {
    Node(&'static str),
    AnyOf(Vec<Requirement>),
    AllOf(Vec<Requirement>),
}

pub fn node(node: &'static str) -> Requirement {
    Requirement::Node(node)
}

pub fn any_of(requirements: impl IntoIterator<Item = Requirement>) -> Requirement {
    Requirement::AnyOf(requirements.into_iter().collect())
}

pub fn all_of(requirements: impl IntoIterator<Item = Requirement>) -> Requirement {
    Requirement::AllOf(requirements.into_iter().collect())
}

/// Read-only commands also accept the `listing` node.
pub fn listing_or(requirement: Requirement) -> Requirement {
    any_of([node(PERM_LISTING), requirement])
}

impl Requirement {
    pub fn is_met_by(&self, held: &HashSet<String>) -> bool {
        if held.contains(OWNERSHIP_NODE) {
            return true;
        }
        self.eval(held)
    }

    fn eval(&self, held: &HashSet<String>) -> bool {
        match self {
            Requirement::Node(n) => held.contains(*n),
            Requirement::AnyOf(reqs) => reqs.iter().any(|r| r.eval(held)),
            Requirement::AllOf(reqs) => reqs.iter().all(|r| r.eval(held)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Node(n) => write!(f, "`{n}`"),
            Requirement::AnyOf(reqs) => write!(f, "{}", reqs.iter().join(" or ")),
            Requirement::AllOf(reqs) => write!(f, "{}", reqs.iter().join(" and ")),
        }
    }
}

/// The member a check is made for.
#[derive(Debug, Clone)]
pub struct Requester {
    pub user_id: UserId,
    pub role_ids: Vec<RoleId>,
    pub is_guild_owner: bool,
}

pub struct PermissionManager {
    store: Arc<dyn PermissionStore>,
    cache: RwLock<HashMap<(GuildId, Subject), HashSet<String>>>,
}

impl PermissionManager {
    pub fn new(store: Arc<dyn PermissionStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn check(
        &self,
        guild_id: GuildId,
        requester: &Requester,
        requirement: &Requirement,
    ) -> DraftResult<bool> {
        if requester.is_guild_owner {
            return Ok(true);
        }
        let held = self.held_nodes(guild_id, requester).await?;
        let granted = requirement.is_met_by(&held);
        tracing::debug!(
            "Permission check {requirement} for {} in guild {guild_id}: {granted}",
            requester.user_id
        );
        Ok(granted)
    }

    /// Nodes granted to the user directly or through any of their roles.
    pub async fn held_nodes(
        &self,
        guild_id: GuildId,
        requester: &Requester,
    ) -> DraftResult<HashSet<String>> {
        let mut held = self
            .subject_nodes(guild_id, Subject::User(requester.user_id))
            .await?;
        for role_id in &requester.role_ids {
            held.extend(self.subject_nodes(guild_id, Subject::Role(*role_id)).await?);
        }
        Ok(held)
    }

    pub async fn subject_nodes(
        &self,
        guild_id: GuildId,
        subject: Subject,
    ) -> DraftResult<HashSet<String>> {
        let key = (guild_id, subject);
        if let Some(nodes) = self.cache.read().await.get(&key) {
            return Ok(nodes.clone());
        }
        // Filled under the write lock so a concurrent invalidation lands after the fill.
        let mut cache = self.cache.write().await;
        if let Some(nodes) = cache.get(&key) {
            return Ok(nodes.clone());
        }
        let nodes = self.store.nodes(guild_id, subject).await?;
        cache.insert(key, nodes.clone());
        Ok(nodes)
    }

    pub async fn grant(&self, guild_id: GuildId, subject: Subject, node: &str) -> DraftResult<bool> {
        let granted = self.store.grant(guild_id, subject, node).await;
        self.invalidate(guild_id, subject).await;
        Ok(granted?)
    }

    pub async fn revoke(
        &self,
        guild_id: GuildId,
        subject: Subject,
        node: &str,
    ) -> DraftResult<bool> {
        let revoked = self.store.revoke(guild_id, subject, node).await;
        self.invalidate(guild_id, subject).await;
        Ok(revoked?)
    }

    pub async fn clear(&self, guild_id: GuildId, subject: Subject) -> DraftResult<usize> {
        let cleared = self.store.clear(guild_id, subject).await;
        self.invalidate(guild_id, subject).await;
        Ok(cleared?)
    }

    async fn invalidate(&self, guild_id: GuildId, subject: Subject) {
        self.cache.write().await.remove(&(guild_id, subject));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreResult};

    const GUILD: GuildId = GuildId::new(1);
    const ALICE: UserId = UserId::new(100);
    const MODS: RoleId = RoleId::new(500);

    fn requester(user_id: UserId, role_ids: Vec<RoleId>) -> Requester {
        Requester {
            user_id,
            role_ids,
            is_guild_owner: false,
        }
    }

    #[test]
    fn combinators_evaluate_eagerly() {
        let held: HashSet<String> = [PERM_SETUP.to_owned()].into();
        assert!(any_of([node(PERM_SETUP), node(PERM_ADMIN)]).is_met_by(&held));
        assert!(!all_of([node(PERM_SETUP), node(PERM_ADMIN)]).is_met_by(&held));
        assert!(!node(PERM_CHANNELS).is_met_by(&held));

        let owner: HashSet<String> = [OWNERSHIP_NODE.to_owned()].into();
        assert!(all_of([node(PERM_SETUP), node(PERM_ADMIN)]).is_met_by(&owner));
    }

    #[test]
    fn requirements_render_for_help_text() {
        let req = any_of([node(PERM_SETUP), node(PERM_ADMIN)]);
        assert_eq!(req.to_string(), "`setup` or `administrate_lobby`");
    }

    #[tokio::test]
    async fn role_nodes_count_for_members() {
        let permissions = PermissionManager::new(Arc::new(MemoryStore::new()));
        let req = any_of([node(PERM_GAMERULE), node(PERM_ADMIN)]);

        assert!(!permissions
            .check(GUILD, &requester(ALICE, vec![MODS]), &req)
            .await
            .unwrap());

        permissions
            .grant(GUILD, Subject::Role(MODS), PERM_ADMIN)
            .await
            .unwrap();

        assert!(permissions
            .check(GUILD, &requester(ALICE, vec![MODS]), &req)
            .await
            .unwrap());
        assert!(!permissions
            .check(GUILD, &requester(ALICE, vec![]), &req)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn cache_is_invalidated_on_writes() {
        let permissions = PermissionManager::new(Arc::new(MemoryStore::new()));
        let alice = requester(ALICE, vec![]);
        let req = node(PERM_CHANNELS);

        assert!(!permissions.check(GUILD, &alice, &req).await.unwrap());
        assert!(permissions
            .grant(GUILD, Subject::User(ALICE), PERM_CHANNELS)
            .await
            .unwrap());
        assert!(permissions.check(GUILD, &alice, &req).await.unwrap());

        assert!(permissions
            .revoke(GUILD, Subject::User(ALICE), PERM_CHANNELS)
            .await
            .unwrap());
        assert!(!permissions.check(GUILD, &alice, &req).await.unwrap());

        permissions
            .grant(GUILD, Subject::User(ALICE), PERM_SETUP)
            .await
            .unwrap();
        assert_eq!(
            permissions.clear(GUILD, Subject::User(ALICE)).await.unwrap(),
            1
        );
        assert!(permissions
            .held_nodes(GUILD, &alice)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn listing_node_only_opens_read_only_checks() {
        let permissions = PermissionManager::new(Arc::new(MemoryStore::new()));
        let alice = requester(ALICE, vec![]);
        permissions
            .grant(GUILD, Subject::User(ALICE), PERM_LISTING)
            .await
            .unwrap();

        let change = any_of([node(PERM_GAMERULE), node(PERM_ADMIN)]);
        assert!(!permissions.check(GUILD, &alice, &change).await.unwrap());
        assert!(permissions
            .check(GUILD, &alice, &listing_or(change))
            .await
            .unwrap());
        assert!(permissions
            .check(GUILD, &alice, &listing_or(node(PERM_PERMISSIONS)))
            .await
            .unwrap());
    }

    /// Holds every `nodes` read until released, after the inner read is done.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        fetched: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[serenity::async_trait]
    impl PermissionStore for GatedStore {
        async fn nodes(&self, guild_id: GuildId, subject: Subject) -> StoreResult<HashSet<String>> {
            let nodes = self.inner.nodes(guild_id, subject).await;
            self.fetched.notify_one();
            self.release.notified().await;
            nodes
        }

        async fn grant(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool> {
            self.inner.grant(guild_id, subject, node).await
        }

        async fn revoke(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool> {
            self.inner.revoke(guild_id, subject, node).await
        }

        async fn clear(&self, guild_id: GuildId, subject: Subject) -> StoreResult<usize> {
            self.inner.clear(guild_id, subject).await
        }
    }

    #[tokio::test]
    async fn grant_during_a_cache_fill_is_not_lost() {
        let store = Arc::new(GatedStore::default());
        let permissions = Arc::new(PermissionManager::new(store.clone()));
        let alice = requester(ALICE, vec![]);

        let reader = tokio::spawn({
            let permissions = permissions.clone();
            let alice = alice.clone();
            async move { permissions.check(GUILD, &alice, &node(PERM_SETUP)).await }
        });
        store.fetched.notified().await;

        let writer = tokio::spawn({
            let permissions = permissions.clone();
            async move {
                permissions
                    .grant(GUILD, Subject::User(ALICE), PERM_SETUP)
                    .await
            }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        store.release.notify_one();

        assert!(!reader.await.unwrap().unwrap());
        assert!(writer.await.unwrap().unwrap());
        store.release.notify_one();
        assert!(permissions
            .check(GUILD, &alice, &node(PERM_SETUP))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn guild_owner_bypasses_checks() {
        let permissions = PermissionManager::new(Arc::new(MemoryStore::new()));
        let owner = Requester {
            user_id: ALICE,
            role_ids: vec![],
            is_guild_owner: true,
        };
        assert!(permissions
            .check(GUILD, &owner, &node(PERM_PERMISSIONS))
            .await
            .unwrap());
    }
}
