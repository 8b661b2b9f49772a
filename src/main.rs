mod channel_settings;
mod config;
mod discord_helpers;
mod error;
mod events;
mod game_management;
mod game_rule_manager;
mod game_rules;
mod game_session;
mod game_session_manager;
mod guild_settings;
mod help;
mod helpers;
mod heroes;
mod mongo;
mod permission_commands;
mod permissions;
mod store;
#[cfg(test)]
mod testing;
mod types;
mod voice;

use crate::config::Config;
use crate::discord_helpers::DiscordVoice;
use crate::game_session::SessionEnv;
use crate::game_session_manager::GameSessionManager;
use crate::guild_settings::GuildSettingsManager;
use crate::helpers::handle_error;
use crate::mongo::MongoStore;
use crate::permissions::PermissionManager;
use crate::store::{MemoryStore, PermissionStore, RuleStore, SettingsStore};
use crate::types::Data;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

struct Stores {
    rules: Arc<dyn RuleStore>,
    settings: Arc<dyn SettingsStore>,
    permissions: Arc<dyn PermissionStore>,
}

async fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    Ok(match &config.mongodb_connection {
        Some(uri) => {
            let store = Arc::new(
                MongoStore::connect(uri, &config.mongodb_database)
                    .await
                    .context("Unable to connect to MongoDB")?,
            );
            Stores {
                rules: store.clone(),
                settings: store.clone(),
                permissions: store,
            }
        }
        None => {
            tracing::warn!("MONGODB_CONNECTION is not set, settings will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            Stores {
                rules: store.clone(),
                settings: store.clone(),
                permissions: store,
            }
        }
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    let stores = open_stores(&config).await?;
    let intents =
        serenity::GatewayIntents::non_privileged() | serenity::GatewayIntents::MESSAGE_CONTENT;
    let idle_timeout = config.session_idle_timeout;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            on_error: |err| Box::pin(handle_error(err)),
            pre_command: |ctx| {
                Box::pin(async move {
                    tracing::info!(
                        "{} used {} in {}",
                        ctx.author().name,
                        ctx.command().qualified_name,
                        ctx.channel_id()
                    );
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    tracing::debug!("Finished {}", ctx.command().qualified_name);
                })
            },
            event_handler: |ctx, event, framework, data| {
                Box::pin(events::event_handler(ctx, event, framework, data))
            },
            prefix_options: poise::PrefixFrameworkOptions {
                prefix: Some(config.command_prefix.clone()),
                edit_tracker: Some(Arc::new(poise::EditTracker::for_timespan(
                    Duration::from_secs(3600),
                ))),
                case_insensitive_commands: true,
                ..Default::default()
            },
            commands: vec![
                game_management::setup(),
                game_management::start(),
                game_management::end(),
                game_management::pick(),
                game_management::unpick(),
                game_management::set_leader_command(),
                game_management::teams(),
                game_management::gamerule(),
                channel_settings::setchannel(),
                channel_settings::setlobby(),
                channel_settings::setvoice(),
                channel_settings::deletechannel(),
                permission_commands::perm(),
                help::help(),
            ],
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let guild_settings = Arc::new(GuildSettingsManager::new(stores.settings));
                let sessions = Arc::new(GameSessionManager::new(SessionEnv {
                    rules: stores.rules,
                    guild_settings: guild_settings.clone(),
                    voice: Arc::new(DiscordVoice::new(ctx.cache.clone(), ctx.http.clone())),
                }));

                if let Some(max_idle) = idle_timeout {
                    let sessions = sessions.clone();
                    tokio::spawn(async move {
                        let mut interval = tokio::time::interval(max_idle);
                        loop {
                            interval.tick().await;
                            let evicted = sessions.evict_idle(max_idle);
                            if evicted > 0 {
                                tracing::debug!(
                                    "Evicted {evicted} idle session(s), {} left",
                                    sessions.session_count()
                                );
                            }
                        }
                    });
                }

                Ok(Data {
                    sessions,
                    guild_settings,
                    permissions: Arc::new(PermissionManager::new(stores.permissions)),
                })
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("Unable to create the Discord client")?;
    client.start().await?;
    Ok(())
}
