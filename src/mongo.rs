//! MongoDB backend for the rule, settings and permission stores.
//!
//! Ids are stored as decimal strings. Every write is a single-document upsert
//! or delete, so concurrent commands never read-modify-write a document.

use mongodb::bson::{doc, to_bson, DateTime, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use poise::futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use serenity::all::{ChannelId, GuildId};
use serenity::async_trait;
use std::collections::HashSet;

use crate::error::StoreError;
use crate::game_rules::RuleValue;
use crate::guild_settings::ChannelSetting;
use crate::permissions::Subject;
use crate::store::{
    PermissionStore, RuleKey, RulePatch, RuleRow, RuleStore, SettingsStore, StoreResult,
};

const GAME_RULES: &str = "gamerules";
const GUILDS: &str = "guilds";
const USER_PERMISSIONS: &str = "user_permissions";
const ROLE_PERMISSIONS: &str = "role_permissions";

const COMMAND_CHANNEL: &str = "commandChannel";
const LOBBY_CHANNEL: &str = "lobbyChannel";
const VOICE_CHANNEL: &str = "voiceChannel";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GameRuleDoc {
    guild_id: String,
    cmd_channel_id: String,
    rule_name: String,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    value: Option<RuleValue>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelSettingDoc {
    guild_id: String,
    cmd_channel_id: String,
    setting: String,
    #[serde(default)]
    team_name: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PermissionDoc {
    node: String,
}

pub struct MongoStore {
    game_rules: Collection<GameRuleDoc>,
    guilds: Collection<ChannelSettingDoc>,
    user_permissions: Collection<Document>,
    role_permissions: Collection<Document>,
}

impl MongoStore {
    /// Connects and makes sure the unique indexes exist.
    pub async fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(database);
        let store = Self {
            game_rules: db.collection(GAME_RULES),
            guilds: db.collection(GUILDS),
            user_permissions: db.collection(USER_PERMISSIONS),
            role_permissions: db.collection(ROLE_PERMISSIONS),
        };
        store.create_indexes().await?;
        tracing::info!("Connected to MongoDB database `{database}`");
        Ok(store)
    }

    async fn create_indexes(&self) -> StoreResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();
        self.game_rules
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "guildId": 1, "cmdChannelId": 1, "ruleName": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.guilds
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "guildId": 1, "cmdChannelId": 1, "setting": 1, "teamName": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.user_permissions
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "guildId": 1, "userId": 1, "node": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        self.role_permissions
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "guildId": 1, "roleId": 1, "node": 1 })
                    .options(unique())
                    .build(),
            )
            .await?;
        Ok(())
    }

    fn permissions_of(&self, guild_id: GuildId, subject: Subject) -> (&Collection<Document>, Document) {
        match subject {
            Subject::User(user_id) => (
                &self.user_permissions,
                doc! { "guildId": guild_id.to_string(), "userId": user_id.to_string() },
            ),
            Subject::Role(role_id) => (
                &self.role_permissions,
                doc! { "guildId": guild_id.to_string(), "roleId": role_id.to_string() },
            ),
        }
    }
}

fn setting_filter(guild_id: GuildId, cmd_channel_id: ChannelId, setting: ChannelSetting) -> Document {
    let (name, team) = match setting {
        ChannelSetting::Lobby => (LOBBY_CHANNEL, None),
        ChannelSetting::Team(team) => (VOICE_CHANNEL, Some(team.key())),
    };
    doc! {
        "guildId": guild_id.to_string(),
        "cmdChannelId": cmd_channel_id.to_string(),
        "setting": name,
        "teamName": team,
    }
}

fn command_channel_filter(guild_id: GuildId, channel_id: ChannelId) -> Document {
    doc! {
        "guildId": guild_id.to_string(),
        "cmdChannelId": channel_id.to_string(),
        "setting": COMMAND_CHANNEL,
        "teamName": None::<String>,
    }
}

/// Update for upserts whose filter already holds every field of the document.
fn created_now() -> Document {
    doc! { "$setOnInsert": { "createdAt": DateTime::now() } }
}

fn parse_channel_id(raw: &str) -> StoreResult<ChannelId> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
        .ok_or_else(|| StoreError::Malformed(format!("`{raw}` is not a channel id")))
}

#[async_trait]
impl RuleStore for MongoStore {
    async fn find(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
    ) -> StoreResult<Vec<RuleRow>> {
        let docs: Vec<GameRuleDoc> = self
            .game_rules
            .find(doc! {
                "guildId": guild_id.to_string(),
                "cmdChannelId": cmd_channel_id.to_string(),
            })
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| RuleRow {
                rule_name: d.rule_name,
                enabled: d.enabled,
                value: d.value,
            })
            .collect())
    }

    async fn upsert(&self, key: &RuleKey, patch: RulePatch) -> StoreResult<()> {
        let mut set = Document::new();
        if let Some(enabled) = patch.enabled {
            set.insert("enabled", enabled);
        }
        if let Some(value) = patch.value {
            let value = to_bson(&value).map_err(|e| StoreError::Malformed(e.to_string()))?;
            set.insert("value", value);
        }
        if set.is_empty() {
            return Ok(());
        }
        self.game_rules
            .update_one(
                doc! {
                    "guildId": key.guild_id.to_string(),
                    "cmdChannelId": key.cmd_channel_id.to_string(),
                    "ruleName": key.rule_name.as_str(),
                },
                doc! { "$set": set },
            )
            .upsert(true)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MongoStore {
    async fn add_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool> {
        let filter = command_channel_filter(guild_id, channel_id);
        let result = self
            .guilds
            .update_one(filter, created_now())
            .upsert(true)
            .await?;
        Ok(result.upserted_id.is_some())
    }

    async fn remove_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool> {
        let result = self
            .guilds
            .delete_one(command_channel_filter(guild_id, channel_id))
            .await?;
        if result.deleted_count == 0 {
            return Ok(false);
        }
        self.guilds
            .delete_many(doc! {
                "guildId": guild_id.to_string(),
                "cmdChannelId": channel_id.to_string(),
            })
            .await?;
        Ok(true)
    }

    async fn is_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> StoreResult<bool> {
        Ok(self
            .guilds
            .find_one(command_channel_filter(guild_id, channel_id))
            .await?
            .is_some())
    }

    async fn set_voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
        voice_channel_id: ChannelId,
    ) -> StoreResult<()> {
        self.guilds
            .update_one(
                setting_filter(guild_id, cmd_channel_id, setting),
                doc! { "$set": { "value": voice_channel_id.to_string() } },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
    ) -> StoreResult<Option<ChannelId>> {
        let found = self
            .guilds
            .find_one(setting_filter(guild_id, cmd_channel_id, setting))
            .await?;
        found
            .and_then(|d| d.value)
            .map(|raw| parse_channel_id(&raw))
            .transpose()
    }
}

#[async_trait]
impl PermissionStore for MongoStore {
    async fn nodes(&self, guild_id: GuildId, subject: Subject) -> StoreResult<HashSet<String>> {
        let (collection, filter) = self.permissions_of(guild_id, subject);
        let docs: Vec<PermissionDoc> = collection
            .clone_with_type::<PermissionDoc>()
            .find(filter)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.node).collect())
    }

    async fn grant(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool> {
        let (collection, mut filter) = self.permissions_of(guild_id, subject);
        filter.insert("node", node);
        let result = collection
            .update_one(filter, created_now())
            .upsert(true)
            .await?;
        Ok(result.upserted_id.is_some())
    }

    async fn revoke(&self, guild_id: GuildId, subject: Subject, node: &str) -> StoreResult<bool> {
        let (collection, mut filter) = self.permissions_of(guild_id, subject);
        filter.insert("node", node);
        Ok(collection.delete_one(filter).await?.deleted_count > 0)
    }

    async fn clear(&self, guild_id: GuildId, subject: Subject) -> StoreResult<usize> {
        let (collection, filter) = self.permissions_of(guild_id, subject);
        Ok(collection.delete_many(filter).await?.deleted_count as usize)
    }
}
