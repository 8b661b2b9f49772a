use anyhow::{bail, ensure, Context as _, Result};
use poise::CreateReply;
use regex::Regex;
use serenity::all::{GuildId, Mentionable, RoleId};
use std::sync::LazyLock;

use crate::discord_helpers::{ensure_permission, guild_id, parse_user_id};
use crate::helpers::listing_embed;
use crate::permissions::{
    all_of, is_registered_node, listing_or, node, Requester, Subject, OWNERSHIP_NODE,
    PERMISSION_NODES, PERM_ADMIN, PERM_PERMISSIONS,
};
use crate::types::Context;

static ROLE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@&([0-9]+)>$").expect("regex creation should succeed"));

fn parse_role_id(input: &str) -> Option<RoleId> {
    let input = input.trim();
    let digits = match ROLE_MENTION.captures(input) {
        Some(captures) => captures.get(1)?.as_str(),
        None => input,
    };
    digits
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(RoleId::new)
}

/// Parses `user <mention|id>` or `role <mention|id>`.
pub fn parse_subject(kind: &str, target: &str) -> Result<Subject> {
    match kind.to_ascii_lowercase().as_str() {
        "user" => parse_user_id(target)
            .map(Subject::User)
            .with_context(|| format!("`{target}` is not a user mention or id")),
        "role" => parse_role_id(target)
            .map(Subject::Role)
            .with_context(|| format!("`{target}` is not a role mention or id")),
        _ => bail!("Invalid subject `{kind}`, expected `user` or `role`"),
    }
}

fn subject_mention(subject: Subject) -> String {
    match subject {
        Subject::User(user_id) => user_id.mention().to_string(),
        Subject::Role(role_id) => role_id.mention().to_string(),
    }
}

/// Only registered nodes can be granted, and only the owner hands out ownership.
fn ensure_grantable(requester: &Requester, permission: &str) -> Result<()> {
    ensure!(
        is_registered_node(permission),
        "Unknown permission node `{permission}`, use `perm list` to see the available nodes"
    );
    ensure!(
        permission != OWNERSHIP_NODE || requester.is_guild_owner,
        "Only the server owner can grant or revoke `{OWNERSHIP_NODE}`"
    );
    Ok(())
}

async fn manager(ctx: &Context<'_>) -> Result<(GuildId, Requester)> {
    let guild_id = guild_id(ctx)?;
    let requester = ensure_permission(
        ctx,
        guild_id,
        &node(PERM_PERMISSIONS),
        "You don't have permission to manage permissions",
    )
    .await?;
    Ok((guild_id, requester))
}

/// Manages permissions
#[poise::command(
    prefix_command,
    slash_command,
    guild_only,
    subcommands("perm_list", "perm_grant", "perm_revoke", "perm_clear")
)]
pub async fn perm(ctx: Context<'_>) -> Result<()> {
    ctx.say("Invalid action name, check `help perm` for the usage information")
        .await?;
    Ok(())
}

async fn handle_perm_list(ctx: Context<'_>, page: Option<usize>) -> Result<CreateReply> {
    let guild_id = guild_id(&ctx)?;
    ensure_permission(
        &ctx,
        guild_id,
        &listing_or(node(PERM_PERMISSIONS)),
        "You don't have permission to list permissions",
    )
    .await?;
    let entries = PERMISSION_NODES
        .iter()
        .map(|p| (p.node.to_owned(), p.help_text.to_owned()));
    Ok(CreateReply::default().embed(listing_embed("6v6 - Permissions", entries, page)))
}

/// Lists the permission nodes
#[poise::command(prefix_command, slash_command, guild_only, rename = "list")]
pub async fn perm_list(
    ctx: Context<'_>,
    #[description = "Page to show"] page: Option<usize>,
) -> Result<()> {
    let reply = handle_perm_list(ctx, page)
        .await
        .unwrap_or_else(|e| CreateReply::default().content(format!("Error: {e}")));
    ctx.send(reply).await?;
    Ok(())
}

async fn handle_perm_grant(
    ctx: Context<'_>,
    kind: String,
    target: String,
    permission: String,
) -> Result<String> {
    let (guild_id, requester) = manager(&ctx).await?;
    let subject = parse_subject(&kind, &target)?;
    ensure_grantable(&requester, &permission)?;
    let granted = ctx
        .data()
        .permissions
        .grant(guild_id, subject, &permission)
        .await?;
    tracing::info!("{} granted `{permission}` to {subject:?} in {guild_id}", requester.user_id);
    Ok(if granted {
        format!("Granted `{permission}` to {}", subject_mention(subject))
    } else {
        format!("{} already has `{permission}`", subject_mention(subject))
    })
}

/// Grants a permission node to a user or role
#[poise::command(prefix_command, slash_command, guild_only, rename = "grant")]
pub async fn perm_grant(
    ctx: Context<'_>,
    #[description = "`user` or `role`"] kind: String,
    #[description = "User or role (mention or id)"] target: String,
    #[description = "Permission node"] permission: String,
) -> Result<()> {
    let resp = handle_perm_grant(ctx, kind, target, permission)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_perm_revoke(
    ctx: Context<'_>,
    kind: String,
    target: String,
    permission: String,
) -> Result<String> {
    let (guild_id, requester) = manager(&ctx).await?;
    let subject = parse_subject(&kind, &target)?;
    ensure_grantable(&requester, &permission)?;
    let revoked = ctx
        .data()
        .permissions
        .revoke(guild_id, subject, &permission)
        .await?;
    tracing::info!("{} revoked `{permission}` from {subject:?} in {guild_id}", requester.user_id);
    Ok(if revoked {
        format!("Revoked `{permission}` from {}", subject_mention(subject))
    } else {
        format!("{} doesn't have `{permission}`", subject_mention(subject))
    })
}

/// Revokes a permission node from a user or role
#[poise::command(prefix_command, slash_command, guild_only, rename = "revoke")]
pub async fn perm_revoke(
    ctx: Context<'_>,
    #[description = "`user` or `role`"] kind: String,
    #[description = "User or role (mention or id)"] target: String,
    #[description = "Permission node"] permission: String,
) -> Result<()> {
    let resp = handle_perm_revoke(ctx, kind, target, permission)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

async fn handle_perm_clear(ctx: Context<'_>, kind: String, target: String) -> Result<String> {
    let guild_id = guild_id(&ctx)?;
    let requester = ensure_permission(
        &ctx,
        guild_id,
        &all_of([node(PERM_PERMISSIONS), node(PERM_ADMIN)]),
        "You don't have permission to clear permissions",
    )
    .await?;
    let subject = parse_subject(&kind, &target)?;
    let cleared = ctx.data().permissions.clear(guild_id, subject).await?;
    tracing::info!("{} cleared permissions of {subject:?} in {guild_id}", requester.user_id);
    Ok(format!(
        "Cleared {cleared} permission node(s) from {}",
        subject_mention(subject)
    ))
}

/// Removes every permission node from a user or role
#[poise::command(prefix_command, slash_command, guild_only, rename = "clear")]
pub async fn perm_clear(
    ctx: Context<'_>,
    #[description = "`user` or `role`"] kind: String,
    #[description = "User or role (mention or id)"] target: String,
) -> Result<()> {
    let resp = handle_perm_clear(ctx, kind, target)
        .await
        .unwrap_or_else(|e| format!("Error: {e}"));
    ctx.say(resp).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PERM_SETUP;
    use serenity::all::UserId;

    fn requester(is_guild_owner: bool) -> Requester {
        Requester {
            user_id: UserId::new(5),
            role_ids: Vec::new(),
            is_guild_owner,
        }
    }

    #[test]
    fn subjects_parse_from_mentions_and_ids() {
        assert_eq!(
            parse_subject("user", "<@42>").unwrap(),
            Subject::User(UserId::new(42))
        );
        assert_eq!(
            parse_subject("ROLE", "<@&7>").unwrap(),
            Subject::Role(RoleId::new(7))
        );
        assert_eq!(parse_subject("role", "7").unwrap(), Subject::Role(RoleId::new(7)));
        assert!(parse_subject("role", "<@7>").is_err());
        assert!(parse_subject("channel", "7").is_err());
    }

    #[test]
    fn only_known_nodes_are_grantable() {
        assert!(ensure_grantable(&requester(false), PERM_SETUP).is_ok());
        assert!(ensure_grantable(&requester(false), PERM_ADMIN).is_ok());
        assert!(ensure_grantable(&requester(false), "fly").is_err());
        assert!(ensure_grantable(&requester(false), OWNERSHIP_NODE).is_err());
        assert!(ensure_grantable(&requester(true), OWNERSHIP_NODE).is_ok());
    }
}
