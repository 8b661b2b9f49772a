use anyhow::{Error, Result};
use poise::serenity_prelude as serenity;

use crate::types::Data;

/// `6v6` gets a `v6v?` back, and the other way around.
pub fn banter_reply(content: &str) -> Option<&'static str> {
    let content = content.trim().to_lowercase();
    if content.contains("6v6") {
        Some("v6v?")
    } else if content.contains("v6v") {
        Some("6v6?")
    } else {
        None
    }
}

pub async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    framework: poise::FrameworkContext<'_, Data, Error>,
    _data: &Data,
) -> Result<()> {
    match event {
        serenity::FullEvent::Ready { data_about_bot } => {
            tracing::info!("Logged in as {}", data_about_bot.user.name);
        }
        serenity::FullEvent::Message { new_message } => {
            if new_message.author.bot {
                return Ok(());
            }
            let is_command = framework
                .options
                .prefix_options
                .prefix
                .as_deref()
                .is_some_and(|prefix| new_message.content.starts_with(prefix));
            if is_command {
                return Ok(());
            }
            if let Some(reply) = banter_reply(&new_message.content) {
                new_message.channel_id.say(ctx, reply).await?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_in_kind() {
        assert_eq!(banter_reply("anyone up for 6v6 tonight?"), Some("v6v?"));
        assert_eq!(banter_reply("  V6V "), Some("6v6?"));
        assert_eq!(banter_reply("hello"), None);
    }
}
