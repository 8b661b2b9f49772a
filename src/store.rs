//! Storage seams used by the managers, plus an in-memory backend.
//!
//! The MongoDB implementation lives in `mongo.rs`; `MemoryStore` backs the
//! tests and runs the bot when no database is configured.

use serenity::all::{ChannelId, GuildId};
use serenity::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::game_rules::RuleValue;
use crate::guild_settings::ChannelSetting;
use crate::permissions::Subject;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub guild_id: GuildId,
    pub cmd_channel_id: ChannelId,
    pub rule_name: String,
}

/// A persisted override, as read back from the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleRow {
    pub rule_name: String,
    pub enabled: Option<bool>,
    pub value: Option<RuleValue>,
}

/// Fields written by an upsert; `None` leaves the stored field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePatch {
    pub enabled: Option<bool>,
    pub value: Option<RuleValue>,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn find(&self, guild_id: GuildId, cmd_channel_id: ChannelId)
        -> StoreResult<Vec<RuleRow>>;

    async fn upsert(&self, key: &RuleKey, patch: RulePatch) -> StoreResult<()>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Returns `false` if the channel was already registered.
    async fn add_command_channel(&self, guild_id: GuildId, channel_id: ChannelId)
        -> StoreResult<bool>;

    /// Unregisters the channel and drops its voice channel settings.
    /// Returns `false` if it was not registered.
    async fn remove_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool>;

    async fn is_command_channel(&self, guild_id: GuildId, channel_id: ChannelId)
        -> StoreResult<bool>;

    async fn set_voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
        voice_channel_id: ChannelId,
    ) -> StoreResult<()>;

    async fn voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
    ) -> StoreResult<Option<ChannelId>>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn nodes(&self, guild_id: GuildId, subject: Subject) -> StoreResult<HashSet<String>>;

    /// Returns `false` if the node was already held.
    async fn grant(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool>;

    /// Returns `false` if the node was not held.
    async fn revoke(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool>;

    /// Returns how many nodes were removed.
    async fn clear(&self, guild_id: GuildId, subject: Subject) -> StoreResult<usize>;
}

#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<HashMap<RuleKey, RuleRow>>,
    command_channels: Mutex<HashMap<GuildId, Vec<ChannelId>>>,
    voice_channels: Mutex<HashMap<(GuildId, ChannelId, ChannelSetting), ChannelId>>,
    permissions: Mutex<HashMap<(GuildId, Subject), HashSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn find(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
    ) -> StoreResult<Vec<RuleRow>> {
        let rules = self.rules.lock().await;
        Ok(rules
            .iter()
            .filter(|(k, _)| k.guild_id == guild_id && k.cmd_channel_id == cmd_channel_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn upsert(&self, key: &RuleKey, patch: RulePatch) -> StoreResult<()> {
        let mut rules = self.rules.lock().await;
        let row = rules.entry(key.clone()).or_insert_with(|| RuleRow {
            rule_name: key.rule_name.clone(),
            ..Default::default()
        });
        if patch.enabled.is_some() {
            row.enabled = patch.enabled;
        }
        if patch.value.is_some() {
            row.value = patch.value;
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemoryStore {
    async fn add_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool> {
        let mut channels = self.command_channels.lock().await;
        let registered = channels.entry(guild_id).or_default();
        if registered.contains(&channel_id) {
            return Ok(false);
        }
        registered.push(channel_id);
        Ok(true)
    }

    async fn remove_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool> {
        let removed = {
            let mut channels = self.command_channels.lock().await;
            match channels.get_mut(&guild_id) {
                Some(registered) => {
                    let before = registered.len();
                    registered.retain(|c| *c != channel_id);
                    registered.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.voice_channels
                .lock()
                .await
                .retain(|(g, c, _), _| !(*g == guild_id && *c == channel_id));
        }
        Ok(removed)
    }

    async fn is_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool> {
        Ok(self
            .command_channels
            .lock()
            .await
            .get(&guild_id)
            .is_some_and(|c| c.contains(&channel_id)))
    }

    async fn set_voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
        voice_channel_id: ChannelId,
    ) -> StoreResult<()> {
        self.voice_channels
            .lock()
            .await
            .insert((guild_id, cmd_channel_id, setting), voice_channel_id);
        Ok(())
    }

    async fn voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
    ) -> StoreResult<Option<ChannelId>> {
        Ok(self
            .voice_channels
            .lock()
            .await
            .get(&(guild_id, cmd_channel_id, setting))
            .copied())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn nodes(&self, guild_id: GuildId, subject: Subject) -> StoreResult<HashSet<String>> {
        Ok(self
            .permissions
            .lock()
            .await
            .get(&(guild_id, subject))
            .cloned()
            .unwrap_or_default())
    }

    async fn grant(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool> {
        Ok(self
            .permissions
            .lock()
            .await
            .entry((guild_id, subject))
            .or_default()
            .insert(node.to_owned()))
    }

    async fn revoke(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool> {
        Ok(self
            .permissions
            .lock()
            .await
            .get_mut(&(guild_id, subject))
            .is_some_and(|nodes| nodes.remove(node)))
    }

    async fn clear(&self, guild_id: GuildId, subject: Subject) -> StoreResult<usize> {
        Ok(self
            .permissions
            .lock()
            .await
            .remove(&(guild_id, subject))
            .map_or(0, |nodes| nodes.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game_session::TeamName;

    const GUILD: GuildId = GuildId::new(1);
    const CMD: ChannelId = ChannelId::new(10);

    #[tokio::test]
    async fn rule_upsert_merges_fields() {
        let store = MemoryStore::new();
        let key = RuleKey {
            guild_id: GUILD,
            cmd_channel_id: CMD,
            rule_name: "maxteammembers".to_owned(),
        };
        store
            .upsert(
                &key,
                RulePatch {
                    enabled: Some(true),
                    value: Some(RuleValue::Integer(3)),
                },
            )
            .await
            .unwrap();
        store
            .upsert(
                &key,
                RulePatch {
                    enabled: Some(false),
                    value: None,
                },
            )
            .await
            .unwrap();

        let rows = store.find(GUILD, CMD).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].enabled, Some(false));
        assert_eq!(rows[0].value, Some(RuleValue::Integer(3)));
        assert!(store.find(GUILD, ChannelId::new(11)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_command_channel_drops_its_voice_settings() {
        let store = MemoryStore::new();
        assert!(store.add_command_channel(GUILD, CMD).await.unwrap());
        assert!(!store.add_command_channel(GUILD, CMD).await.unwrap());
        store
            .set_voice_channel(GUILD, CMD, ChannelSetting::Lobby, ChannelId::new(20))
            .await
            .unwrap();
        store
            .set_voice_channel(
                GUILD,
                CMD,
                ChannelSetting::Team(TeamName::Team1),
                ChannelId::new(21),
            )
            .await
            .unwrap();

        assert!(store.remove_command_channel(GUILD, CMD).await.unwrap());
        assert!(!store.remove_command_channel(GUILD, CMD).await.unwrap());
        assert!(!store.is_command_channel(GUILD, CMD).await.unwrap());
        assert_eq!(
            store
                .voice_channel(GUILD, CMD, ChannelSetting::Lobby)
                .await
                .unwrap(),
            None
        );
    }
}
