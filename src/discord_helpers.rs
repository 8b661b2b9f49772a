use anyhow::{ensure, Context as _, Result};
use regex::Regex;
use serenity::all::{Cache, ChannelId, GuildId, Http, Member, UserId};
use serenity::async_trait;
use std::sync::{Arc, LazyLock};

use crate::error::MoveError;
use crate::permissions::{Requester, Requirement};
use crate::types::Context;
use crate::voice::VoiceRegistry;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@!?([0-9]+)>$").expect("regex creation should succeed"));

/// Voice state read from the gateway cache; moves go through the HTTP API.
pub struct DiscordVoice {
    cache: Arc<Cache>,
    http: Arc<Http>,
}

impl DiscordVoice {
    pub fn new(cache: Arc<Cache>, http: Arc<Http>) -> Self {
        Self { cache, http }
    }
}

#[async_trait]
impl VoiceRegistry for DiscordVoice {
    fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.cache
            .guild(guild_id)?
            .voice_states
            .get(&user_id)
            .and_then(|state| state.channel_id)
    }

    fn members_in(&self, guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId> {
        let Some(guild) = self.cache.guild(guild_id) else {
            return Vec::new();
        };
        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .map(|state| state.user_id)
            .collect()
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), MoveError> {
        guild_id
            .move_member(self.http.as_ref(), user_id, channel_id)
            .await?;
        Ok(())
    }
}

/// Parses a user mention (`<@id>`, `<@!id>`) or a bare id.
pub fn parse_user_id(input: &str) -> Option<UserId> {
    let input = input.trim();
    let digits = match MENTION.captures(input) {
        Some(captures) => captures.get(1)?.as_str(),
        None => input,
    };
    digits
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
}

/// Looks up the guild member a mention or id refers to.
pub async fn resolve_member(
    ctx: &Context<'_>,
    guild_id: GuildId,
    input: &str,
) -> Result<Option<Member>> {
    let Some(user_id) = parse_user_id(input) else {
        return Ok(None);
    };
    match guild_id.member(ctx, user_id).await {
        Ok(member) => Ok(Some(member)),
        Err(serenity::Error::Http(e)) if e.status_code().is_some_and(|s| s.as_u16() == 404) => {
            Ok(None)
        }
        Err(e) => Err(e).context("Unable to look up the member"),
    }
}

/// The command author, as seen by permission checks.
pub async fn requester(ctx: &Context<'_>, guild_id: GuildId) -> Result<Requester> {
    let member = ctx
        .author_member()
        .await
        .context("This command must be called from a guild (server).")?;
    let role_ids = member.roles.clone();

    let cached_owner = ctx.guild().map(|g| g.owner_id);
    let owner_id = match cached_owner {
        Some(owner_id) => owner_id,
        None => guild_id.to_partial_guild(ctx).await?.owner_id,
    };

    Ok(Requester {
        user_id: ctx.author().id,
        role_ids,
        is_guild_owner: owner_id == ctx.author().id,
    })
}

pub fn guild_id(ctx: &Context<'_>) -> Result<GuildId> {
    ctx.guild_id()
        .context("This command must be called from a guild (server).")
}

/// Fails with `denied` unless the author meets `requirement`.
pub async fn ensure_permission(
    ctx: &Context<'_>,
    guild_id: GuildId,
    requirement: &Requirement,
    denied: &str,
) -> Result<Requester> {
    let requester = requester(ctx, guild_id).await?;
    let granted = ctx
        .data()
        .permissions
        .check(guild_id, &requester, requirement)
        .await?;
    ensure!(granted, "{denied} (requires {requirement})");
    Ok(requester)
}

/// Voice channel the command author is connected to.
pub fn author_voice_channel(ctx: &Context<'_>) -> Option<ChannelId> {
    let guild = ctx.guild()?;
    guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|state| state.channel_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mentions_and_ids() {
        assert_eq!(parse_user_id("<@1234>"), Some(UserId::new(1234)));
        assert_eq!(parse_user_id("<@!1234>"), Some(UserId::new(1234)));
        assert_eq!(parse_user_id(" 1234 "), Some(UserId::new(1234)));
        assert_eq!(parse_user_id("<@&1234>"), None);
        assert_eq!(parse_user_id("someone"), None);
        assert_eq!(parse_user_id("0"), None);
    }
}
