use anyhow::{Context as _, Result};

use crate::discord_helpers::{author_voice_channel, ensure_permission, guild_id};
use crate::game_session::TeamName;
use crate::permissions::{node, PERM_CHANNELS};
use crate::types::Context;

async fn handle_setchannel(ctx: Context<'_>) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &node(PERM_CHANNELS),
        "You don't have permission to set the command channel",
    )
    .await?;
    let added = ctx
        .data()
        .guild_settings
        .add_command_channel(guild_id, ctx.channel_id())
        .await?;
    Ok(if added {
        "Command channel successfully set".to_owned()
    } else {
        "This text channel is already a command channel".to_owned()
    })
}

/// Sets the channel to use to control and administrate the 6v6 lobby
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn setchannel(ctx: Context<'_>) -> Result<()> {
    let resp = handle_setchannel(ctx)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_setlobby(ctx: Context<'_>) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &node(PERM_CHANNELS),
        "You don't have permission to set the lobby voice channel",
    )
    .await?;
    let settings = &ctx.data().guild_settings;
    settings.ensure_registered(guild_id, ctx.channel_id()).await?;
    let voice_channel = author_voice_channel(&ctx)
        .context("You must be connected to a voice channel to set the lobby voice channel")?;

    settings
        .set_lobby_voice_channel(guild_id, ctx.channel_id(), voice_channel)
        .await?;
    Ok("Lobby voice channel successfully set".to_owned())
}

/// Sets your current voice channel as the lobby for regrouping players before and after games
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn setlobby(ctx: Context<'_>) -> Result<()> {
    let resp = handle_setlobby(ctx)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_setvoice(ctx: Context<'_>, team: String) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &node(PERM_CHANNELS),
        "You don't have permission to set team voice channels",
    )
    .await?;
    let team: TeamName = team.parse()?;
    let settings = &ctx.data().guild_settings;
    settings.ensure_registered(guild_id, ctx.channel_id()).await?;
    let voice_channel = author_voice_channel(&ctx).with_context(|| {
        format!("You must be connected to a voice channel to set the voice channel for {team}")
    })?;

    settings
        .set_team_voice_channel(guild_id, ctx.channel_id(), team, voice_channel)
        .await?;
    Ok(format!("Team voice channel successfully set for {team}"))
}

/// Sets your current voice channel as the voice channel for a team
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn setvoice(
    ctx: Context<'_>,
    #[description = "`team1` or `team2`"] team: String,
) -> Result<()> {
    let resp = handle_setvoice(ctx, team)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_deletechannel(ctx: Context<'_>) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &node(PERM_CHANNELS),
        "You don't have permission to remove command channels",
    )
    .await?;
    ctx.data()
        .guild_settings
        .remove_command_channel(guild_id, ctx.channel_id())
        .await?;
    Ok("Command channel successfully deleted".to_owned())
}

/// Unregisters the channel as a 6v6 command channel
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn deletechannel(ctx: Context<'_>) -> Result<()> {
    let resp = handle_deletechannel(ctx)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}
