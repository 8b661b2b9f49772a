use serenity::all::{ChannelId, GuildId, UserId};
use serenity::async_trait;

use crate::error::MoveError;

/// Where members are connected, and how to move them.
///
/// The Discord-backed implementation lives in `discord_helpers.rs`.
#[async_trait]
pub trait VoiceRegistry: Send + Sync {
    /// Voice channel the member is currently connected to, if any.
    fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;

    /// Members currently connected to `channel_id`.
    fn members_in(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId>;

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), MoveError>;
}
