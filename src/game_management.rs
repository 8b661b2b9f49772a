//! Draft commands: session lifecycle, picks, leaders, rosters and game rules.

use anyhow::{ensure, Context as _, Result};
use poise::CreateReply;
use serenity::all::{GuildId, Mentionable, UserId};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::discord_helpers::{ensure_permission, guild_id, requester, resolve_member};
use crate::error::DraftError;
use crate::game_rule_manager::Rule;
use crate::game_rules::{RuleType, AUTO_START, RANDOM_LEADERS, SESSION_TITLE};
use crate::game_session::{GameSession, Placement, TeamName};
use crate::helpers::{listing_embed, roster_embed, DEFAULT_TITLE};
use crate::permissions::{
    any_of, listing_or, node, Requirement, PERM_ADMIN, PERM_GAMERULE, PERM_SETLEADER, PERM_SETUP,
};
use crate::types::Context;

const MSG_INVALID_TARGET_MEMBER: &str = "Invalid target; the target user couldn't be resolved";
const MSG_RULES_LOCKED: &str =
    "Unable to change game rules during setup or during an on-going game session";

/// Who is picking, and whether they may force picks.
pub struct Picker {
    pub user_id: UserId,
    pub is_admin: bool,
}

pub enum LeaderChoice {
    Random,
    Member(UserId),
}

pub struct PickOutcome {
    pub message: String,
    pub auto_started: bool,
}

fn leader_mention(session: &GameSession, team: TeamName) -> String {
    session
        .team(team)
        .leader
        .map(|leader| leader.mention().to_string())
        .unwrap_or_else(|| team.to_string())
}

fn ensure_initialized(session: &GameSession) -> Result<()> {
    if !session.is_initialized() {
        return Err(DraftError::SessionNotInitialized.into());
    }
    Ok(())
}

/// Adds `target` to a team on behalf of `picker`.
///
/// Without `forced_team` the picker must be a leader whose team has the turn;
/// with it the picker must be an admin and the turn is left alone.
pub async fn pick_member(
    session: &mut GameSession,
    picker: &Picker,
    target: UserId,
    forced_team: Option<TeamName>,
) -> Result<PickOutcome> {
    ensure_initialized(session)?;
    ensure!(
        TeamName::ALL.iter().all(|t| session.team(*t).leader.is_some()),
        "Both team leaders need to be set before picking"
    );

    let (team, leader_pick) = match forced_team {
        Some(team) => {
            ensure!(picker.is_admin, "You don't have permission to force team picks");
            (team, false)
        }
        None => {
            let team = session
                .leader_of(picker.user_id)
                .context("Can't add players to team, you are not the team leader")?;
            let turn = session.get_turn();
            ensure!(
                turn == team,
                "It's currently {}'s turn to pick",
                leader_mention(session, turn)
            );
            (team, true)
        }
    };

    let placement = session.add_to_team(target, team).await?;
    if leader_pick {
        session.set_last_turn(team);
    }

    let mut message = format!("{} was added to {team}", target.mention());
    if let Placement::MoveFailed(err) = &placement {
        message.push_str(&format!("\n{err}"));
    }
    let next = session.get_turn();
    if leader_pick && next == team {
        message.push_str(&format!(
            "\nIt's still {}'s turn to pick",
            leader_mention(session, team)
        ));
    } else {
        message.push_str(&format!("\nIt's {}'s turn to pick", leader_mention(session, next)));
    }

    let mut auto_started = false;
    if !session.is_started()
        && session.game_rules().is_enabled(AUTO_START).await?
        && session.is_full().await?
    {
        match session.start().await {
            Ok(()) => {
                auto_started = true;
                message.push_str("\n\nBoth teams are full, the game session has started!");
            }
            Err(err) => {
                tracing::warn!("Automatic start failed: {err}");
                message.push_str(&format!(
                    "\n\nBoth teams are full but the game session could not be started: {err}"
                ));
            }
        }
    }

    Ok(PickOutcome {
        message,
        auto_started,
    })
}

pub fn unpick_member(session: &mut GameSession, picker: &Picker, target: UserId) -> Result<String> {
    ensure_initialized(session)?;
    ensure!(
        session.leader_of(target).is_none(),
        "You can't unpick a team leader"
    );
    let team = session
        .team_of(target)
        .with_context(|| format!("{} is not on a team", target.mention()))?;
    ensure!(
        picker.is_admin || session.team(team).leader == Some(picker.user_id),
        "Can't remove {} from the team, as you are not the team leader",
        target.mention()
    );

    session.remove_from_team(team, target)?;
    Ok(format!(
        "{} was removed from {team}\nIt's {}'s turn to pick",
        target.mention(),
        leader_mention(session, session.get_turn())
    ))
}

pub async fn set_leader(
    session: &mut GameSession,
    choice: LeaderChoice,
    team: TeamName,
) -> Result<String> {
    ensure_initialized(session)?;
    let (leader, removed_from) = match choice {
        LeaderChoice::Random => {
            let pool = session.lobby_members().await?;
            session.reroll_team_leader(team, pool)?
        }
        LeaderChoice::Member(user_id) => (user_id, session.set_team_leader(team, user_id)?),
    };
    Ok(match removed_from {
        Some(from) => format!(
            "{} has been removed from {from} and set as the team leader for {team}",
            leader.mention()
        ),
        None => format!("{} has been set as the team leader for {team}", leader.mention()),
    })
}

pub fn describe_rule(rule: &Rule) -> String {
    let definition = rule.definition;
    let state = if rule.enabled { "enabled" } else { "disabled" };
    match (&rule.value, definition.value_type) {
        (Some(value), ty) if ty != RuleType::Boolean => format!(
            "`{}` ({ty}) is {state}, value: `{value}`\n{}",
            definition.display_name, definition.help_text
        ),
        _ => format!(
            "`{}` ({}) is {state}\n{}",
            definition.display_name, definition.value_type, definition.help_text
        ),
    }
}

async fn roster_title(session: &mut GameSession) -> Result<String> {
    Ok(session
        .game_rules()
        .enabled_value(SESSION_TITLE)
        .await?
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_TITLE.to_owned()))
}

/// The session of the channel the command was sent in, which must be registered.
async fn channel_session(ctx: &Context<'_>, guild_id: GuildId) -> Result<Arc<Mutex<GameSession>>> {
    ctx.data()
        .guild_settings
        .ensure_registered(guild_id, ctx.channel_id())
        .await?;
    Ok(ctx.data().sessions.get_session(guild_id, ctx.channel_id()))
}

async fn picker(ctx: &Context<'_>, guild_id: GuildId) -> Result<Picker> {
    let requester = requester(ctx, guild_id).await?;
    let is_admin = ctx
        .data()
        .permissions
        .check(guild_id, &requester, &node(PERM_ADMIN))
        .await?;
    Ok(Picker {
        user_id: requester.user_id,
        is_admin,
    })
}

async fn target_member(ctx: &Context<'_>, guild_id: GuildId, input: &str) -> Result<UserId> {
    Ok(resolve_member(ctx, guild_id, input)
        .await?
        .context(MSG_INVALID_TARGET_MEMBER)?
        .user
        .id)
}

async fn respond(ctx: Context<'_>, reply: Result<CreateReply>) -> Result<()> {
    let reply = reply.unwrap_or_else(|e| CreateReply::default().content(format!("Error: {e}")));
    ctx.send(reply).await?;
    Ok(())
}

async fn handle_setup(ctx: Context<'_>) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &any_of([node(PERM_SETUP), node(PERM_ADMIN)]),
        "You don't have permission to setup a game session",
    )
    .await?;
    let session = channel_session(&ctx, guild_id).await?;
    let mut session = session.lock().await;

    session.setup(true).await?;
    let mut msg = "Game session initialized!".to_owned();
    if session.game_rules().is_enabled(RANDOM_LEADERS).await? {
        for team in TeamName::ALL {
            msg.push_str(&format!(
                "\n{} was randomly chosen as leader for {team}",
                leader_mention(&session, team)
            ));
        }
        msg.push_str(&format!(
            "\n\n{} gets to pick first",
            leader_mention(&session, session.get_turn())
        ));
    }
    Ok(msg)
}

/// Initializes (or resets) the game session
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn setup(ctx: Context<'_>) -> Result<()> {
    let resp = handle_setup(ctx)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_start(ctx: Context<'_>) -> Result<CreateReply> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &any_of([node(PERM_SETUP), node(PERM_ADMIN)]),
        "You don't have permission to start the game session",
    )
    .await?;
    let session = channel_session(&ctx, guild_id).await?;
    let mut session = session.lock().await;

    session.start().await?;
    let title = roster_title(&mut session).await?;
    Ok(CreateReply::default()
        .content("Game session started!")
        .embed(roster_embed(&session, &title)))
}

/// Starts the game session
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn start(ctx: Context<'_>) -> Result<()> {
    let reply = handle_start(ctx).await;
    respond(ctx, reply).await
}

async fn handle_end(ctx: Context<'_>) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &any_of([node(PERM_SETUP), node(PERM_ADMIN)]),
        "You don't have permission to terminate the game session",
    )
    .await?;
    let session = channel_session(&ctx, guild_id).await?;
    session.lock().await.end().await?;
    Ok("The game session has been terminated".to_owned())
}

/// Terminates the game session
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn end(ctx: Context<'_>) -> Result<()> {
    let resp = handle_end(ctx).await.unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_pick(ctx: Context<'_>, member: String, team: Option<String>) -> Result<CreateReply> {
    let guild_id = guild_id(&ctx)?;
    let forced_team = team.as_deref().map(str::parse::<TeamName>).transpose()?;
    let session = channel_session(&ctx, guild_id).await?;
    let picker = picker(&ctx, guild_id).await?;
    let target = target_member(&ctx, guild_id, &member).await?;

    let mut session = session.lock().await;
    let outcome = pick_member(&mut session, &picker, target, forced_team).await?;
    let mut reply = CreateReply::default().content(outcome.message);
    if outcome.auto_started {
        let title = roster_title(&mut session).await?;
        reply = reply.embed(roster_embed(&session, &title));
    }
    Ok(reply)
}

/// Adds the target user to the team
///
/// Only works if used by a team leader on their turn. Picks into an explicit team
/// are forced picks and require `administrate_lobby`.
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn pick(
    ctx: Context<'_>,
    #[description = "Member to pick (mention or id)"] member: String,
    #[description = "Force the pick into `team1` or `team2`"] team: Option<String>,
) -> Result<()> {
    let reply = handle_pick(ctx, member, team).await;
    respond(ctx, reply).await
}

async fn handle_unpick(ctx: Context<'_>, member: String) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    let session = channel_session(&ctx, guild_id).await?;
    let picker = picker(&ctx, guild_id).await?;
    let target = target_member(&ctx, guild_id, &member).await?;
    let mut session = session.lock().await;
    unpick_member(&mut session, &picker, target)
}

/// Removes the target user from the team
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn unpick(
    ctx: Context<'_>,
    #[description = "Member to remove (mention or id)"] member: String,
) -> Result<()> {
    let resp = handle_unpick(ctx, member)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_setleader(ctx: Context<'_>, member: String, team: String) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &any_of([node(PERM_SETLEADER), node(PERM_ADMIN)]),
        "You don't have permission to set team leaders",
    )
    .await?;
    let team: TeamName = team.parse()?;
    let session = channel_session(&ctx, guild_id).await?;

    let choice = if member.eq_ignore_ascii_case("random") {
        LeaderChoice::Random
    } else {
        LeaderChoice::Member(target_member(&ctx, guild_id, &member).await?)
    };
    let mut session = session.lock().await;
    set_leader(&mut session, choice, team).await
}

/// Sets the team leader for a specified team
#[poise::command(prefix_command, slash_command, guild_only, rename = "setleader")]
pub async fn set_leader_command(
    ctx: Context<'_>,
    #[description = "Member (mention or id), or `random` to draw from the lobby"] member: String,
    #[description = "`team1` or `team2`"] team: String,
) -> Result<()> {
    let resp = handle_setleader(ctx, member, team)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_teams(ctx: Context<'_>) -> Result<CreateReply> {
    let guild_id = guild_id(&ctx)?;
    let session = channel_session(&ctx, guild_id).await?;
    let mut session = session.lock().await;
    ensure_initialized(&session)?;
    let title = roster_title(&mut session).await?;
    Ok(CreateReply::default().embed(roster_embed(&session, &title)))
}

/// Displays the teams and their members
#[poise::command(prefix_command, slash_command, guild_only)]
pub async fn teams(ctx: Context<'_>) -> Result<()> {
    let reply = handle_teams(ctx).await;
    respond(ctx, reply).await
}

fn rule_change_requirement() -> Requirement {
    any_of([node(PERM_GAMERULE), node(PERM_ADMIN)])
}

/// The channel's session for a game rule command, once `requirement` is met.
async fn rule_session(
    ctx: &Context<'_>,
    requirement: Requirement,
) -> Result<Arc<Mutex<GameSession>>> {
    let guild_id = guild_id(ctx)?;
    ensure_permission(
        ctx,
        guild_id,
        &requirement,
        "You don't have permission to manage the game rules",
    )
    .await?;
    channel_session(ctx, guild_id).await
}

/// Manages game rules
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    subcommands("gamerule_list", "gamerule_show", "gamerule_set", "gamerule_enable", "gamerule_disable")
)]
pub async fn gamerule(ctx: Context<'_>) -> Result<()> {
    ctx.say("Invalid action name, check `help gamerule` for the usage information")
        .await?;
    Ok(())
}

async fn handle_gamerule_list(ctx: Context<'_>, page: Option<usize>) -> Result<CreateReply> {
    let session = rule_session(&ctx, listing_or(rule_change_requirement())).await?;
    let rules = session.lock().await.game_rules().list().await?;
    let entries = rules.iter().map(|rule| {
        (
            rule.definition.display_name.to_owned(),
            describe_rule(rule)
                .split_once('\n')
                .map_or_else(String::new, |(state, help)| format!("{help}\n*{state}*")),
        )
    });
    Ok(CreateReply::default().embed(listing_embed("6v6 - Game Rules", entries, page)))
}

/// Lists the game rules
#[poise::command(prefix_command, slash_command, guild_only, rename = "list")]
pub async fn gamerule_list(
    ctx: Context<'_>,
    #[description = "Page to show"] page: Option<usize>,
) -> Result<()> {
    let reply = handle_gamerule_list(ctx, page).await;
    respond(ctx, reply).await
}

async fn handle_gamerule_show(ctx: Context<'_>, rule: String) -> Result<String> {
    let session = rule_session(&ctx, listing_or(rule_change_requirement())).await?;
    let rule = session.lock().await.game_rules().get_rule(&rule).await?;
    Ok(describe_rule(&rule))
}

/// Shows a game rule's current state
#[poise::command(prefix_command, slash_command, guild_only, rename = "show")]
pub async fn gamerule_show(
    ctx: Context<'_>,
    #[description = "Game rule name"] rule: String,
) -> Result<()> {
    let resp = handle_gamerule_show(ctx, rule)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_gamerule_set(ctx: Context<'_>, rule: String, value: String) -> Result<String> {
    let session = rule_session(&ctx, rule_change_requirement()).await?;
    let mut session = session.lock().await;
    ensure!(!session.is_initialized(), MSG_RULES_LOCKED);
    let rule = session.game_rules().set_rule(&rule, &value).await?;
    Ok(format!("Game rule updated: {}", describe_rule(&rule)))
}

/// Sets a game rule's value (and enables it)
#[poise::command(prefix_command, slash_command, guild_only, rename = "set")]
pub async fn gamerule_set(
    ctx: Context<'_>,
    #[description = "Game rule name"] rule: String,
    #[description = "New value"]
    #[rest]
    value: String,
) -> Result<()> {
    let resp = handle_gamerule_set(ctx, rule, value)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_gamerule_toggle(ctx: Context<'_>, rule: String, enabled: bool) -> Result<String> {
    let session = rule_session(&ctx, rule_change_requirement()).await?;
    let mut session = session.lock().await;
    ensure!(!session.is_initialized(), MSG_RULES_LOCKED);
    let rules = session.game_rules();
    rules
        .set_enabled(&rule, if enabled { "true" } else { "false" })
        .await?;
    let rule = rules.get_rule(&rule).await?;
    Ok(format!(
        "Game rule `{}` {}",
        rule.definition.display_name,
        if enabled { "enabled" } else { "disabled" }
    ))
}

/// Enables a game rule
#[poise::command(prefix_command, slash_command, guild_only, rename = "enable")]
pub async fn gamerule_enable(
    ctx: Context<'_>,
    #[description = "Game rule name"] rule: String,
) -> Result<()> {
    let resp = handle_gamerule_toggle(ctx, rule, true)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

/// Disables a game rule
#[poise::command(prefix_command, slash_command, guild_only, rename = "disable")]
pub async fn gamerule_disable(
    ctx: Context<'_>,
    #[description = "Game rule name"] rule: String,
) -> Result<()> {
    let resp = handle_gamerule_toggle(ctx, rule, false)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}
