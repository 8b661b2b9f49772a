//! Per-guild command channel registry and voice channel settings.

use serenity::all::{ChannelId, GuildId};
use std::fmt;
use std::sync::Arc;

use crate::error::{DraftError, DraftResult};
use crate::game_session::TeamName;
use crate::store::SettingsStore;

/// Logical voice channel a command channel points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSetting {
    Lobby,
    Team(TeamName),
}

impl fmt::Display for ChannelSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSetting::Lobby => f.write_str("lobby"),
            ChannelSetting::Team(team) => f.write_str(team.key()),
        }
    }
}

pub struct GuildSettingsManager {
    store: Arc<dyn SettingsStore>,
}

impl GuildSettingsManager {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    /// Returns `false` if the channel was already registered.
    pub async fn add_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> DraftResult<bool> {
        let added = self.store.add_command_channel(guild_id, channel_id).await?;
        tracing::info!("Command channel {channel_id} registered in guild {guild_id} (new: {added})");
        Ok(added)
    }

    pub async fn remove_command_channel(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> DraftResult<()> {
        if !self.store.remove_command_channel(guild_id, channel_id).await? {
            return Err(DraftError::CommandChannelNotRegistered);
        }
        tracing::info!("Command channel {channel_id} removed from guild {guild_id}");
        Ok(())
    }

    pub async fn is_command_channel_registered(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> DraftResult<bool> {
        Ok(self.store.is_command_channel(guild_id, channel_id).await?)
    }

    pub async fn ensure_registered(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> DraftResult<()> {
        if self.is_command_channel_registered(guild_id, channel_id).await? {
            Ok(())
        } else {
            Err(DraftError::CommandChannelNotRegistered)
        }
    }

    pub async fn set_lobby_voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        voice_channel_id: ChannelId,
    ) -> DraftResult<()> {
        self.set_voice_channel(guild_id, cmd_channel_id, ChannelSetting::Lobby, voice_channel_id)
            .await
    }

    pub async fn set_team_voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        team: TeamName,
        voice_channel_id: ChannelId,
    ) -> DraftResult<()> {
        self.set_voice_channel(
            guild_id,
            cmd_channel_id,
            ChannelSetting::Team(team),
            voice_channel_id,
        )
        .await
    }

    async fn set_voice_channel(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
        voice_channel_id: ChannelId,
    ) -> DraftResult<()> {
        self.ensure_registered(guild_id, cmd_channel_id).await?;
        self.store
            .set_voice_channel(guild_id, cmd_channel_id, setting, voice_channel_id)
            .await?;
        Ok(())
    }

    /// Resolves a logical channel name to the configured voice channel.
    pub async fn get_voice_channel_id(
        &self,
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        setting: ChannelSetting,
    ) -> DraftResult<ChannelId> {
        self.ensure_registered(guild_id, cmd_channel_id).await?;
        self.store
            .voice_channel(guild_id, cmd_channel_id, setting)
            .await?
            .ok_or(DraftError::ChannelNotConfigured(setting))
    }
}
