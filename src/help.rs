use anyhow::Result;

use crate::types::Context;

/// Displays the list of commands, or help for one command
#[poise::command(prefix_command, slash_command, track_edits)]
pub async fn help(
    ctx: Context<'_>,
    #[description = "Command to show help about"]
    #[autocomplete = "poise::builtins::autocomplete_command"]
    #[rest]
    command: Option<String>,
) -> Result<()> {
    poise::builtins::help(
        ctx,
        command.as_deref(),
        poise::builtins::HelpConfiguration {
            extra_text_at_bottom: "Use `help <command>` for more about a command. \
                Picks and game rules are per command channel; register one with `setchannel`.",
            ephemeral: true,
            ..Default::default()
        },
    )
    .await?;
    Ok(())
}
