//! The draft state machine of one command channel.
//!
//! A session goes `setup` -> (picks) -> `start` -> `end`. Two leaders take turns
//! picking members from the lobby voice channel; the session moves members to
//! their team's voice channel as they are picked and back to the lobby on `end`.

use chrono::{DateTime, Utc};
use poise::futures_util::future::join_all;
use rand::prelude::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serenity::all::{ChannelId, GuildId, UserId};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DraftError, DraftResult, MoveError};
use crate::game_rule_manager::GameRuleManager;
use crate::game_rules::{
    FORCE_VOICE, MAX_TEAM_MEMBERS, MYSTERY_HEROES, NO_LIMITS, RANDOM_LEADERS, VOICE_MOVE_TIMEOUT,
};
use crate::guild_settings::{ChannelSetting, GuildSettingsManager};
use crate::heroes::{Hero, HEROES};
use crate::store::RuleStore;
use crate::voice::VoiceRegistry;

const DEFAULT_MOVE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamName {
    Team1,
    Team2,
}

impl TeamName {
    pub const ALL: [TeamName; 2] = [TeamName::Team1, TeamName::Team2];

    /// Name used in commands and stored settings.
    pub fn key(self) -> &'static str {
        match self {
            TeamName::Team1 => "team1",
            TeamName::Team2 => "team2",
        }
    }

    pub fn other(self) -> TeamName {
        match self {
            TeamName::Team1 => TeamName::Team2,
            TeamName::Team2 => TeamName::Team1,
        }
    }
}

impl fmt::Display for TeamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TeamName::Team1 => "Team 1",
            TeamName::Team2 => "Team 2",
        })
    }
}

impl FromStr for TeamName {
    type Err = DraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "team1" => Ok(TeamName::Team1),
            "team2" => Ok(TeamName::Team2),
            _ => Err(DraftError::InvalidTeamName(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeamMember {
    pub user_id: UserId,
    pub hero: Option<Hero>,
}

#[derive(Debug, Clone, Default)]
pub struct TeamSlot {
    pub leader: Option<UserId>,
    pub leader_hero: Option<Hero>,
    /// In pick order.
    members: Vec<TeamMember>,
}

impl TeamSlot {
    pub fn members(&self) -> &[TeamMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn has_member(&self, user_id: UserId) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    fn remove_member(&mut self, user_id: UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.user_id != user_id);
        self.members.len() != before
    }

    /// Leader first, then members in pick order.
    pub fn players(&self) -> impl Iterator<Item = UserId> + '_ {
        self.leader
            .into_iter()
            .chain(self.members.iter().map(|m| m.user_id))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Teams {
    pub team1: TeamSlot,
    pub team2: TeamSlot,
}

impl Teams {
    pub fn get(&self, team: TeamName) -> &TeamSlot {
        match team {
            TeamName::Team1 => &self.team1,
            TeamName::Team2 => &self.team2,
        }
    }

    fn get_mut(&mut self, team: TeamName) -> &mut TeamSlot {
        match team {
            TeamName::Team1 => &mut self.team1,
            TeamName::Team2 => &mut self.team2,
        }
    }
}

/// Collaborators shared by every session.
#[derive(Clone)]
pub struct SessionEnv {
    pub rules: Arc<dyn RuleStore>,
    pub guild_settings: Arc<GuildSettingsManager>,
    pub voice: Arc<dyn VoiceRegistry>,
}

/// What happened to a picked member's voice connection.
#[derive(Debug)]
pub enum Placement {
    Moved,
    /// Not in the lobby (or not connected), left where they are.
    Stayed,
    /// The pick stands but the move was refused.
    MoveFailed(DraftError),
}

pub struct GameSession {
    guild_id: GuildId,
    cmd_channel_id: ChannelId,
    teams: Teams,
    initialized: bool,
    started: bool,
    last_turn: Option<TeamName>,
    started_at: Option<DateTime<Utc>>,
    game_rules: GameRuleManager,
    env: SessionEnv,
    rng: ChaCha8Rng,
}

impl GameSession {
    pub fn new(guild_id: GuildId, cmd_channel_id: ChannelId, env: SessionEnv) -> Self {
        Self::with_rng(guild_id, cmd_channel_id, env, ChaCha8Rng::from_entropy())
    }

    #[cfg(test)]
    pub fn seeded(
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        env: SessionEnv,
        seed: u64,
    ) -> Self {
        Self::with_rng(guild_id, cmd_channel_id, env, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(
        guild_id: GuildId,
        cmd_channel_id: ChannelId,
        env: SessionEnv,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            guild_id,
            cmd_channel_id,
            teams: Teams::default(),
            initialized: false,
            started: false,
            last_turn: None,
            started_at: None,
            game_rules: GameRuleManager::new(guild_id, cmd_channel_id, env.rules.clone()),
            env,
            rng,
        }
    }

    pub fn team(&self, team: TeamName) -> &TeamSlot {
        self.teams.get(team)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn game_rules(&mut self) -> &mut GameRuleManager {
        &mut self.game_rules
    }

    pub fn reset_teams(&mut self) {
        self.teams = Teams::default();
    }

    /// Team whose member set holds `user_id`. Leaders are not members.
    pub fn team_of(&self, user_id: UserId) -> Option<TeamName> {
        TeamName::ALL
            .into_iter()
            .find(|t| self.teams.get(*t).has_member(user_id))
    }

    pub fn leader_of(&self, user_id: UserId) -> Option<TeamName> {
        TeamName::ALL
            .into_iter()
            .find(|t| self.teams.get(*t).leader == Some(user_id))
    }

    fn is_assigned(&self, user_id: UserId) -> bool {
        self.leader_of(user_id).is_some() || self.team_of(user_id).is_some()
    }

    /// Makes `user_id` the leader of `team`, pulling them out of any member set.
    fn assign_leader(&mut self, team: TeamName, user_id: UserId) -> Option<TeamName> {
        let removed_from = self.team_of(user_id);
        if let Some(from) = removed_from {
            self.teams.get_mut(from).remove_member(user_id);
        }
        let slot = self.teams.get_mut(team);
        slot.leader = Some(user_id);
        slot.leader_hero = None;
        removed_from
    }

    /// Draws a leader for `team` from `pool`, never the other team's leader.
    pub fn pick_random_team_leader(
        &mut self,
        team: TeamName,
        mut pool: Vec<UserId>,
    ) -> DraftResult<UserId> {
        if let Some(enemy_leader) = self.teams.get(team.other()).leader {
            pool.retain(|u| *u != enemy_leader);
        }
        let leader = *pool
            .choose(&mut self.rng)
            .ok_or(DraftError::NotEnoughPlayers)?;
        self.assign_leader(team, leader);
        tracing::debug!("{leader} randomly chosen as leader of {team}");
        Ok(leader)
    }

    /// Draws a new leader for `team`, excluding both current leaders.
    ///
    /// Returns the leader and the team they were pulled out of, if they had been picked.
    pub fn reroll_team_leader(
        &mut self,
        team: TeamName,
        mut pool: Vec<UserId>,
    ) -> DraftResult<(UserId, Option<TeamName>)> {
        if self.started {
            return Err(DraftError::SessionAlreadyStarted);
        }
        let leaders = [self.teams.team1.leader, self.teams.team2.leader];
        pool.retain(|u| !leaders.contains(&Some(*u)));
        let leader = *pool
            .choose(&mut self.rng)
            .ok_or(DraftError::NotEnoughPlayers)?;
        let removed_from = self.assign_leader(team, leader);
        Ok((leader, removed_from))
    }

    /// Sets `user_id` as leader of `team`.
    ///
    /// Returns the team they were pulled out of, if they had been picked.
    pub fn set_team_leader(
        &mut self,
        team: TeamName,
        user_id: UserId,
    ) -> DraftResult<Option<TeamName>> {
        if self.teams.get(team.other()).leader == Some(user_id) {
            return Err(DraftError::DuplicatePlayer(user_id));
        }
        Ok(self.assign_leader(team, user_id))
    }

    /// Assigns a random hero to every player of `team`.
    pub async fn pick_random_heroes(&mut self, team: TeamName) -> DraftResult<()> {
        let allow_duplicates = self.game_rules.is_enabled(NO_LIMITS).await?;

        let rng = &mut self.rng;
        let slot = self.teams.get_mut(team);
        let mut pool: Vec<Hero> = HEROES.to_vec();
        let mut draw = || {
            if pool.is_empty() {
                pool = HEROES.to_vec();
            }
            let i = rng.gen_range(0..pool.len());
            if allow_duplicates {
                pool[i]
            } else {
                pool.swap_remove(i)
            }
        };

        if slot.leader.is_some() {
            slot.leader_hero = Some(draw());
        }
        for member in &mut slot.members {
            member.hero = Some(draw());
        }
        Ok(())
    }

    /// Member cap per team, if the cap rule is enabled.
    pub async fn team_cap(&mut self) -> DraftResult<Option<usize>> {
        Ok(self
            .game_rules
            .enabled_value(MAX_TEAM_MEMBERS)
            .await?
            .and_then(|v| v.as_integer())
            .map(|cap| cap.max(0) as usize))
    }

    /// Both teams reached the cap. Always false without a cap.
    pub async fn is_full(&mut self) -> DraftResult<bool> {
        Ok(match self.team_cap().await? {
            Some(cap) => self.teams.team1.len() >= cap && self.teams.team2.len() >= cap,
            None => false,
        })
    }

    async fn move_timeout(&mut self) -> DraftResult<Duration> {
        Ok(self
            .game_rules
            .enabled_value(VOICE_MOVE_TIMEOUT)
            .await?
            .and_then(|v| v.as_number())
            .filter(|secs| *secs > 0.0)
            .map_or(DEFAULT_MOVE_TIMEOUT, Duration::from_secs_f64))
    }

    async fn channel(&self, setting: ChannelSetting) -> DraftResult<ChannelId> {
        self.env
            .guild_settings
            .get_voice_channel_id(self.guild_id, self.cmd_channel_id, setting)
            .await
    }

    /// Members currently connected to the lobby channel.
    pub async fn lobby_members(&self) -> DraftResult<Vec<UserId>> {
        let lobby = self.channel(ChannelSetting::Lobby).await?;
        Ok(self.env.voice.members_in(self.guild_id, lobby))
    }

    /// Whether a member should follow a team move, given where they are now.
    fn should_move(&self, user_id: UserId, lobby: ChannelId, target: ChannelId, force: bool) -> bool {
        match self.env.voice.voice_channel_of(self.guild_id, user_id) {
            Some(current) if current == target => false,
            Some(current) => force || current == lobby,
            None => false,
        }
    }

    /// Team channel a freshly picked member should be moved to, with the move timeout.
    async fn move_plan(
        &mut self,
        user_id: UserId,
        team: TeamName,
    ) -> DraftResult<Option<(ChannelId, Duration)>> {
        let lobby = self.channel(ChannelSetting::Lobby).await?;
        let target = self.channel(ChannelSetting::Team(team)).await?;
        let force = self.game_rules.is_enabled(FORCE_VOICE).await?;
        if !self.should_move(user_id, lobby, target, force) {
            return Ok(None);
        }
        Ok(Some((target, self.move_timeout().await?)))
    }

    pub async fn add_to_team(&mut self, user_id: UserId, team: TeamName) -> DraftResult<Placement> {
        if self.is_assigned(user_id) {
            return Err(DraftError::DuplicatePlayer(user_id));
        }
        if let Some(cap) = self.team_cap().await? {
            if self.teams.get(team).len() >= cap {
                return Err(DraftError::TeamFull { team, cap });
            }
        }

        self.teams.get_mut(team).members.push(TeamMember {
            user_id,
            hero: None,
        });
        tracing::debug!("{user_id} added to {team} in {}/{}", self.guild_id, self.cmd_channel_id);

        if self.env.voice.voice_channel_of(self.guild_id, user_id).is_none() {
            return Ok(Placement::Stayed);
        }
        let (target, timeout) = match self.move_plan(user_id, team).await {
            Ok(Some(plan)) => plan,
            Ok(None) => return Ok(Placement::Stayed),
            Err(err) => {
                tracing::warn!("Not moving {user_id} to {team}: {err}");
                return Ok(Placement::MoveFailed(err));
            }
        };
        match move_with_timeout(self.env.voice.as_ref(), self.guild_id, user_id, target, timeout).await {
            Ok(()) => Ok(Placement::Moved),
            Err(err) => {
                tracing::warn!("Failed to move {user_id} to {team}: {err}");
                Ok(Placement::MoveFailed(DraftError::from_move(err)))
            }
        }
    }

    pub fn remove_from_team(&mut self, team: TeamName, user_id: UserId) -> DraftResult<()> {
        if !self.teams.get_mut(team).remove_member(user_id) {
            return Err(DraftError::PlayerNotOnTeam(user_id));
        }
        tracing::debug!("{user_id} removed from {team}");
        Ok(())
    }

    /// Team that picks next: the smaller team, or when tied the team that did not pick last.
    pub fn get_turn(&self) -> TeamName {
        let delta = self.teams.team1.len() as isize - self.teams.team2.len() as isize;
        if delta >= 1 {
            TeamName::Team2
        } else if delta <= -1 {
            TeamName::Team1
        } else {
            self.last_turn.unwrap_or(TeamName::Team1).other()
        }
    }

    pub fn set_last_turn(&mut self, team: TeamName) {
        self.last_turn = Some(team);
    }

    /// Initializes the session, drawing leaders from the lobby when `randomLeaders` is on.
    ///
    /// With `should_reset == false` existing picks are kept. If a leader can not be
    /// drawn the teams are left as they were.
    pub async fn setup(&mut self, should_reset: bool) -> DraftResult<()> {
        if self.started {
            return Err(DraftError::SessionAlreadyStarted);
        }
        let pool = self.lobby_members().await?;
        let random_leaders = self.game_rules.is_enabled(RANDOM_LEADERS).await?;

        let previous = (self.teams.clone(), self.last_turn);
        if should_reset {
            self.reset_teams();
            self.last_turn = None;
        }

        if random_leaders {
            let drawn = self
                .pick_random_team_leader(TeamName::Team1, pool.clone())
                .and_then(|_| self.pick_random_team_leader(TeamName::Team2, pool));
            if let Err(err) = drawn {
                (self.teams, self.last_turn) = previous;
                return Err(err);
            }
        }

        self.initialized = true;
        tracing::info!("Game session initialized in {}/{}", self.guild_id, self.cmd_channel_id);
        Ok(())
    }

    pub async fn start(&mut self) -> DraftResult<()> {
        if !self.initialized {
            return Err(DraftError::SessionNotInitialized);
        }
        if self.started {
            return Err(DraftError::SessionAlreadyStarted);
        }

        if self.game_rules.is_enabled(MYSTERY_HEROES).await? {
            for team in TeamName::ALL {
                self.pick_random_heroes(team).await?;
            }
        }

        let lobby = self.channel(ChannelSetting::Lobby).await?;
        let force = self.game_rules.is_enabled(FORCE_VOICE).await?;
        let mut moves = Vec::new();
        for team in TeamName::ALL {
            let target = self.channel(ChannelSetting::Team(team)).await?;
            moves.extend(
                self.teams
                    .get(team)
                    .players()
                    .filter(|u| self.should_move(*u, lobby, target, force))
                    .map(|u| (u, target)),
            );
        }
        self.move_all(moves).await?;

        self.started = true;
        self.started_at = Some(Utc::now());
        tracing::info!("Game session started in {}/{}", self.guild_id, self.cmd_channel_id);
        Ok(())
    }

    /// Moves everybody back to the lobby and tears the session down.
    ///
    /// If any move fails nothing is reset, so `end` can be retried.
    pub async fn end(&mut self) -> DraftResult<()> {
        if !self.initialized {
            return Err(DraftError::SessionNotInitialized);
        }

        let lobby = self.channel(ChannelSetting::Lobby).await?;
        let moves: Vec<_> = TeamName::ALL
            .into_iter()
            .flat_map(|team| self.teams.get(team).players())
            .filter(|u| {
                self.env
                    .voice
                    .voice_channel_of(self.guild_id, *u)
                    .is_some_and(|current| current != lobby)
            })
            .map(|u| (u, lobby))
            .collect();
        self.move_all(moves).await?;

        self.reset_teams();
        self.last_turn = None;
        self.initialized = false;
        self.started = false;
        self.started_at = None;
        tracing::info!("Game session ended in {}/{}", self.guild_id, self.cmd_channel_id);
        Ok(())
    }

    /// Issues every move at once and waits for all of them; one failure does not
    /// cancel the others. Returns the first failure.
    async fn move_all(&mut self, moves: Vec<(UserId, ChannelId)>) -> DraftResult<()> {
        let timeout = self.move_timeout().await?;
        let voice = self.env.voice.clone();
        let guild_id = self.guild_id;

        let results = join_all(moves.into_iter().map(|(user_id, channel_id)| {
            let voice = voice.clone();
            async move {
                move_with_timeout(voice.as_ref(), guild_id, user_id, channel_id, timeout)
                    .await
                    .inspect_err(|e| tracing::warn!("Failed to move {user_id} to {channel_id}: {e}"))
            }
        }))
        .await;

        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(DraftError::from_move(err)),
            None => Ok(()),
        }
    }
}

async fn move_with_timeout(
    voice: &dyn VoiceRegistry,
    guild_id: GuildId,
    user_id: UserId,
    channel_id: ChannelId,
    timeout: Duration,
) -> Result<(), MoveError> {
    match tokio::time::timeout(timeout, voice.move_member(guild_id, user_id, channel_id)).await {
        Ok(result) => result,
        Err(_) => Err(MoveError::TimedOut(timeout)),
    }
}
