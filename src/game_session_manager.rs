use serenity::all::{ChannelId, GuildId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::game_session::{GameSession, SessionEnv};

struct Entry {
    session: Arc<Mutex<GameSession>>,
    last_access: Instant,
}

/// Owns one session per command channel.
///
/// A command locks its session for its whole duration, so commands addressed to
/// the same channel run one after the other.
pub struct GameSessionManager {
    env: SessionEnv,
    sessions: std::sync::Mutex<HashMap<GuildId, HashMap<ChannelId, Entry>>>,
}

impl GameSessionManager {
    pub fn new(env: SessionEnv) -> Self {
        Self {
            env,
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn get_session(&self, guild_id: GuildId, channel_id: ChannelId) -> Arc<Mutex<GameSession>> {
        let mut sessions = self.lock();
        let entry = sessions
            .entry(guild_id)
            .or_default()
            .entry(channel_id)
            .or_insert_with(|| {
                tracing::debug!("Creating game session for {guild_id}/{channel_id}");
                Entry {
                    session: Arc::new(Mutex::new(GameSession::new(
                        guild_id,
                        channel_id,
                        self.env.clone(),
                    ))),
                    last_access: Instant::now(),
                }
            });
        entry.last_access = Instant::now();
        entry.session.clone()
    }

    /// Drops sessions that are idle, not initialized and not in use.
    /// Returns how many were dropped.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = 0;
        let mut sessions = self.lock();
        for channels in sessions.values_mut() {
            channels.retain(|_, entry| {
                if now.duration_since(entry.last_access) < max_idle {
                    return true;
                }
                let keep = match entry.session.try_lock() {
                    Ok(session) => session.is_initialized(),
                    Err(_) => true,
                };
                if !keep {
                    evicted += 1;
                }
                keep
            });
        }
        sessions.retain(|_, channels| !channels.is_empty());
        if evicted > 0 {
            tracing::info!("Evicted {evicted} idle game sessions");
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<GuildId, HashMap<ChannelId, Entry>>> {
        // the map is never left half-updated, so a poisoned lock is still usable
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, CMD, GUILD, LOBBY};

    #[tokio::test]
    async fn one_session_per_channel() {
        let fx = fixture().await;
        let manager = GameSessionManager::new(fx.env.clone());

        let a = manager.get_session(GUILD, CMD);
        let b = manager.get_session(GUILD, CMD);
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.get_session(GUILD, ChannelId::new(11));
        assert!(!Arc::ptr_eq(&a, &other));
        let other_guild = manager.get_session(GuildId::new(2), CMD);
        assert!(!Arc::ptr_eq(&a, &other_guild));
        assert_eq!(manager.session_count(), 3);
    }

    #[tokio::test]
    async fn state_survives_between_lookups() {
        let fx = fixture().await;
        fx.voice.connect(crate::testing::user(1), LOBBY);
        fx.voice.connect(crate::testing::user(2), LOBBY);
        let manager = GameSessionManager::new(fx.env.clone());

        manager.get_session(GUILD, CMD).lock().await.setup(true).await.unwrap();
        assert!(manager.get_session(GUILD, CMD).lock().await.is_initialized());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_idle_unused_sessions() {
        let fx = fixture().await;
        fx.voice.connect(crate::testing::user(1), LOBBY);
        fx.voice.connect(crate::testing::user(2), LOBBY);
        let manager = GameSessionManager::new(fx.env.clone());
        let max_idle = Duration::from_secs(60);

        manager.get_session(GUILD, ChannelId::new(11));
        manager.get_session(GUILD, CMD).lock().await.setup(true).await.unwrap();
        let held = manager.get_session(GuildId::new(2), ChannelId::new(12));
        let _guard = held.lock().await;

        assert_eq!(manager.evict_idle(max_idle), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        manager.get_session(GuildId::new(3), ChannelId::new(13));

        // the idle one goes; initialized, locked and fresh sessions stay
        assert_eq!(manager.evict_idle(max_idle), 1);
        assert_eq!(manager.session_count(), 3);
    }
}
