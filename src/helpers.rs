use anyhow::Error;
use serenity::all::{CreateEmbed, CreateEmbedFooter, Mentionable, Timestamp};
use std::ops::Range;

use crate::game_session::{GameSession, TeamName, TeamSlot};
use crate::types::Data;

pub const EMBED_COLOR: u32 = 0xA94AE8;
pub const ITEMS_PER_PAGE: usize = 5;
pub const DEFAULT_TITLE: &str = "6v6 Session";

const FOOTER_ICON: &str = "https://cdn.discordapp.com/embed/avatars/0.png";

pub async fn handle_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            tracing::error!(
                "Error in command `{}`: {:?}",
                ctx.command().qualified_name,
                error
            );
            if let Err(e) = ctx.say(format!("Error: {error}")).await {
                tracing::warn!("Unable to report command error: {e}");
            }
        }
        error => {
            if let Err(e) = poise::builtins::on_error(error).await {
                tracing::error!("Error while handling error: {e}");
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub count: usize,
    pub items: Range<usize>,
}

/// Picks the requested page of `len` items, clamped to the pages that exist.
pub fn paginate(len: usize, requested: Option<usize>) -> Page {
    let count = len.div_ceil(ITEMS_PER_PAGE).max(1);
    let number = requested.unwrap_or(1).clamp(1, count);
    let start = (number - 1) * ITEMS_PER_PAGE;
    Page {
        number,
        count,
        items: start.min(len)..(number * ITEMS_PER_PAGE).min(len),
    }
}

/// Embed listing `(name, help)` entries, one page at a time.
pub fn listing_embed(
    title: &str,
    entries: impl IntoIterator<Item = (String, String)>,
    requested_page: Option<usize>,
) -> CreateEmbed {
    let entries: Vec<_> = entries.into_iter().collect();
    let page = paginate(entries.len(), requested_page);
    entries[page.items.clone()].iter().fold(
        CreateEmbed::new()
            .title(title)
            .colour(EMBED_COLOR)
            .timestamp(Timestamp::now())
            .footer(
                CreateEmbedFooter::new(format!("Page {} of {}", page.number, page.count))
                    .icon_url(FOOTER_ICON),
            ),
        |embed, (name, help)| embed.field(format!("`{name}`"), help.as_str(), false),
    )
}

/// Leader (crowned) first, then members in pick order.
pub fn team_list(slot: &TeamSlot) -> String {
    let hero = |h: Option<&str>| h.map(|h| format!(" ({h})")).unwrap_or_default();
    let mut lines: Vec<String> = slot
        .leader
        .map(|leader| {
            format!(
                "**{}** \u{1F451}{}",
                leader.mention(),
                hero(slot.leader_hero)
            )
        })
        .into_iter()
        .collect();
    lines.extend(
        slot.members()
            .iter()
            .map(|m| format!("**{}**{}", m.user_id.mention(), hero(m.hero))),
    );
    if lines.is_empty() {
        "*Empty*".to_owned()
    } else {
        lines.join("\n")
    }
}

pub fn roster_embed(session: &GameSession, title: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(format!("__{title} - Team 1 vs. Team 2__"))
        .description("Drafted Teams")
        .colour(EMBED_COLOR)
        .timestamp(
            session
                .started_at()
                .map(Timestamp::from)
                .unwrap_or_else(Timestamp::now),
        )
        .footer(CreateEmbedFooter::new("Team drafts").icon_url(FOOTER_ICON));
    for team in TeamName::ALL {
        embed = embed.field(format!("__**{team}**__"), team_list(session.team(team)), true);
    }
    embed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, user};

    #[test]
    fn pages_are_clamped() {
        assert_eq!(
            paginate(8, None),
            Page {
                number: 1,
                count: 2,
                items: 0..5
            }
        );
        assert_eq!(paginate(8, Some(2)).items, 5..8);
        assert_eq!(paginate(8, Some(9)).number, 2);
        assert_eq!(paginate(8, Some(0)).number, 1);
        assert_eq!(paginate(10, Some(2)).count, 2);

        let empty = paginate(0, Some(3));
        assert_eq!(empty.number, 1);
        assert_eq!(empty.count, 1);
        assert!(empty.items.is_empty());
    }

    #[tokio::test]
    async fn team_list_crowns_the_leader() {
        let fx = fixture().await;
        let mut session = fx.session(1);
        assert_eq!(team_list(session.team(TeamName::Team1)), "*Empty*");

        session.set_team_leader(TeamName::Team1, user(1)).unwrap();
        session.add_to_team(user(2), TeamName::Team1).await.unwrap();
        assert_eq!(
            team_list(session.team(TeamName::Team1)),
            format!("**<@{}>** \u{1F451}\n**<@{}>**", user(1), user(2))
        );
    }
}
