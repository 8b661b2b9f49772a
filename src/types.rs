use std::sync::Arc;

use crate::game_session_manager::GameSessionManager;
use crate::guild_settings::GuildSettingsManager;
use crate::permissions::PermissionManager;

/// Shared state handed to every command.
pub struct Data {
    pub sessions: Arc<GameSessionManager>,
    pub guild_settings: Arc<GuildSettingsManager>,
    pub permissions: Arc<PermissionManager>,
}

pub type Context<'a> = poise::Context<'a, Data, anyhow::Error>;
