//! Fakes shared by the unit tests.

use serenity::all::{ChannelId, GuildId, UserId};
use serenity::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MoveError;
use crate::game_session::{GameSession, SessionEnv, TeamName};
use crate::guild_settings::GuildSettingsManager;
use crate::store::MemoryStore;
use crate::voice::VoiceRegistry;

pub const GUILD: GuildId = GuildId::new(1);
pub const CMD: ChannelId = ChannelId::new(10);
pub const LOBBY: ChannelId = ChannelId::new(20);
pub const TEAM1_VOICE: ChannelId = ChannelId::new(21);
pub const TEAM2_VOICE: ChannelId = ChannelId::new(22);
pub const ELSEWHERE: ChannelId = ChannelId::new(29);

pub fn user(n: u64) -> UserId {
    UserId::new(1000 + n)
}

/// Voice state kept in memory; moves are applied and recorded.
#[derive(Default)]
pub struct FakeVoice {
    locations: Mutex<HashMap<UserId, ChannelId>>,
    moves: Mutex<Vec<(UserId, ChannelId)>>,
    deny_moves: AtomicBool,
    hang_moves: AtomicBool,
}

impl FakeVoice {
    pub fn connect(&self, user_id: UserId, channel_id: ChannelId) {
        self.locations.lock().unwrap().insert(user_id, channel_id);
    }

    pub fn location(&self, user_id: UserId) -> Option<ChannelId> {
        self.locations.lock().unwrap().get(&user_id).copied()
    }

    pub fn moves(&self) -> Vec<(UserId, ChannelId)> {
        self.moves.lock().unwrap().clone()
    }

    pub fn deny_moves(&self, deny: bool) {
        self.deny_moves.store(deny, Ordering::SeqCst);
    }

    pub fn hang_moves(&self, hang: bool) {
        self.hang_moves.store(hang, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceRegistry for FakeVoice {
    fn voice_channel_of(&self, _guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.location(user_id)
    }

    fn members_in(&self, _guild_id: GuildId, channel_id: ChannelId) -> Vec<UserId> {
        let mut members: Vec<_> = self
            .locations
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| **c == channel_id)
            .map(|(u, _)| *u)
            .collect();
        members.sort();
        members
    }

    async fn move_member(
        &self,
        _guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), MoveError> {
        if self.hang_moves.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.deny_moves.load(Ordering::SeqCst) {
            return Err(MoveError::PermissionDenied);
        }
        self.connect(user_id, channel_id);
        self.moves.lock().unwrap().push((user_id, channel_id));
        Ok(())
    }
}

pub struct Fixture {
    pub env: SessionEnv,
    pub voice: Arc<FakeVoice>,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn session(&self, seed: u64) -> GameSession {
        GameSession::seeded(GUILD, CMD, self.env.clone(), seed)
    }
}

/// A registered command channel with lobby and both team channels configured.
pub async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let voice = Arc::new(FakeVoice::default());
    let guild_settings = Arc::new(GuildSettingsManager::new(store.clone()));

    guild_settings.add_command_channel(GUILD, CMD).await.unwrap();
    guild_settings
        .set_lobby_voice_channel(GUILD, CMD, LOBBY)
        .await
        .unwrap();
    guild_settings
        .set_team_voice_channel(GUILD, CMD, TeamName::Team1, TEAM1_VOICE)
        .await
        .unwrap();
    guild_settings
        .set_team_voice_channel(GUILD, CMD, TeamName::Team2, TEAM2_VOICE)
        .await
        .unwrap();

    Fixture {
        env: SessionEnv {
            rules: store.clone(),
            guild_settings,
            voice: voice.clone(),
        },
        voice,
        store,
    }
}
