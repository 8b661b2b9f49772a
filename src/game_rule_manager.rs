//! Game rules of a single session: catalog defaults with persisted overrides on top.

use serenity::all::{ChannelId, GuildId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DraftError, DraftResult};
use crate::game_rules::{parse_bool, RuleDefinition, RuleSet, RuleType, RuleValue};
use crate::store::{RuleKey, RulePatch, RuleStore};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleOverride {
    pub enabled: Option<bool>,
    pub value: Option<RuleValue>,
}

/// A catalog entry merged with the session's override.
#[derive(Debug, Clone)]
pub struct Rule {
    pub definition: &'static RuleDefinition,
    pub enabled: bool,
    pub value: Option<RuleValue>,
}

impl Rule {
    fn merge(definition: &'static RuleDefinition, over: Option<&RuleOverride>) -> Self {
        let over = over.cloned().unwrap_or_default();
        Rule {
            definition,
            enabled: over.enabled.unwrap_or(definition.default_enabled),
            value: over.value.or_else(|| definition.default_value.clone()),
        }
    }
}

pub struct GameRuleManager {
    guild_id: GuildId,
    cmd_channel_id: ChannelId,
    store: Arc<dyn RuleStore>,
    loaded: bool,
    overrides: HashMap<String, RuleOverride>,
}

impl GameRuleManager {
    pub fn new(guild_id: GuildId, cmd_channel_id: ChannelId, store: Arc<dyn RuleStore>) -> Self {
        Self {
            guild_id,
            cmd_channel_id,
            store,
            loaded: false,
            overrides: HashMap::new(),
        }
    }

    /// Reads this session's overrides from the store, once.
    ///
    /// Rows naming rules that are no longer in the catalog are ignored. A failed
    /// read leaves the manager unloaded so the next access retries.
    async fn load_overrides(&mut self) -> DraftResult<()> {
        if self.loaded {
            return Ok(());
        }

        let rows = self
            .store
            .find(self.guild_id, self.cmd_channel_id)
            .await
            .inspect_err(|e| {
                tracing::warn!(
                    "Failed to load game rules for {}/{}: {e}",
                    self.guild_id,
                    self.cmd_channel_id
                )
            })?;

        self.overrides = rows
            .into_iter()
            .filter_map(|row| {
                let definition = RuleSet::by_name(&row.rule_name)?;
                let value = row.value.and_then(|v| v.coerce(definition.value_type));
                Some((
                    definition.name.clone(),
                    RuleOverride {
                        enabled: row.enabled,
                        value,
                    },
                ))
            })
            .collect();
        self.loaded = true;
        Ok(())
    }

    fn definition(name: &str) -> DraftResult<&'static RuleDefinition> {
        RuleSet::by_name(name).ok_or_else(|| DraftError::InvalidGameRule(name.to_owned()))
    }

    pub async fn get_rule(&mut self, name: &str) -> DraftResult<Rule> {
        let definition = Self::definition(name)?;
        self.load_overrides().await?;
        Ok(Rule::merge(definition, self.overrides.get(&definition.name)))
    }

    pub async fn is_enabled(&mut self, name: &str) -> DraftResult<bool> {
        Ok(self.get_rule(name).await?.enabled)
    }

    /// The rule's value if the rule is enabled.
    pub async fn enabled_value(&mut self, name: &str) -> DraftResult<Option<RuleValue>> {
        let rule = self.get_rule(name).await?;
        Ok(rule.value.filter(|_| rule.enabled))
    }

    /// Every catalog rule merged with this session's overrides.
    pub async fn list(&mut self) -> DraftResult<Vec<Rule>> {
        self.load_overrides().await?;
        Ok(RuleSet::all()
            .iter()
            .map(|definition| Rule::merge(definition, self.overrides.get(&definition.name)))
            .collect())
    }

    pub async fn set_enabled(&mut self, name: &str, raw: &str) -> DraftResult<()> {
        let definition = Self::definition(name)?;
        let enabled = parse_bool(raw).ok_or_else(|| DraftError::InvalidGameRuleValue {
            ty: RuleType::Boolean,
            value: raw.to_owned(),
        })?;

        self.write_override(
            definition,
            RulePatch {
                enabled: Some(enabled),
                value: None,
            },
        )
        .await
    }

    /// Validates and stores `raw` as the rule's value, enabling the rule.
    pub async fn set_rule(&mut self, name: &str, raw: &str) -> DraftResult<Rule> {
        let definition = Self::definition(name)?;

        if let Some(validate) = definition.validate {
            validate(raw).map_err(DraftError::Validation)?;
        }

        let invalid = || DraftError::InvalidGameRuleValue {
            ty: definition.value_type,
            value: raw.to_owned(),
        };

        let value = match definition.value_type {
            RuleType::Boolean => {
                self.set_enabled(name, raw).await?;
                return self.get_rule(name).await;
            }
            RuleType::String => RuleValue::String(raw.to_owned()),
            RuleType::Number => RuleValue::Number(parse_finite(raw).ok_or_else(invalid)?),
            RuleType::Integer => RuleValue::Integer(parse_integer(raw).ok_or_else(invalid)?),
        };

        self.write_override(
            definition,
            RulePatch {
                enabled: Some(true),
                value: Some(value),
            },
        )
        .await?;
        self.get_rule(name).await
    }

    /// Applies `patch` in memory, then persists it.
    ///
    /// If the store rejects the write the in-memory override is restored, so the
    /// session never reports a rule state the store does not hold.
    async fn write_override(
        &mut self,
        definition: &'static RuleDefinition,
        patch: RulePatch,
    ) -> DraftResult<()> {
        self.load_overrides().await?;

        let previous = self.overrides.get(&definition.name).cloned();
        let entry = self.overrides.entry(definition.name.clone()).or_default();
        if patch.enabled.is_some() {
            entry.enabled = patch.enabled;
        }
        if patch.value.is_some() {
            entry.value = patch.value.clone();
        }

        let key = RuleKey {
            guild_id: self.guild_id,
            cmd_channel_id: self.cmd_channel_id,
            rule_name: definition.name.clone(),
        };

        if let Err(err) = self.store.upsert(&key, patch).await {
            tracing::warn!("Failed to persist game rule {}: {err}", definition.display_name);
            match previous {
                Some(previous) => self.overrides.insert(definition.name.clone(), previous),
                None => self.overrides.remove(&definition.name),
            };
            return Err(err.into());
        }

        tracing::info!(
            "Game rule {} updated for {}/{}",
            definition.display_name,
            self.guild_id,
            self.cmd_channel_id
        );
        Ok(())
    }
}

fn parse_finite(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Decimals truncate toward zero. `maxTeamMembers` never gets here with one,
/// its validator only lets digits through.
fn parse_integer(raw: &str) -> Option<i64> {
    parse_finite(raw).map(|n| n.trunc() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::game_rules::{
        AUTO_START, MAX_TEAM_MEMBERS, RANDOM_LEADERS, SESSION_TITLE, VOICE_MOVE_TIMEOUT,
    };
    use crate::store::{MemoryStore, RuleRow, StoreResult};
    use serenity::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const GUILD: GuildId = GuildId::new(1);
    const CMD: ChannelId = ChannelId::new(10);

    /// Wraps a `MemoryStore`, counting reads and optionally failing.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl RuleStore for FlakyStore {
        async fn find(&self, guild_id: GuildId, cmd: ChannelId) -> StoreResult<Vec<RuleRow>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("reads disabled".to_owned()));
            }
            self.inner.find(guild_id, cmd).await
        }

        async fn upsert(&self, key: &RuleKey, patch: RulePatch) -> StoreResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("writes disabled".to_owned()));
            }
            self.inner.upsert(key, patch).await
        }
    }

    fn manager(store: Arc<dyn RuleStore>) -> GameRuleManager {
        GameRuleManager::new(GUILD, CMD, store)
    }

    #[tokio::test]
    async fn defaults_apply_without_overrides() {
        let mut rules = manager(Arc::new(MemoryStore::new()));
        assert!(rules.is_enabled(RANDOM_LEADERS).await.unwrap());
        assert!(!rules.is_enabled(AUTO_START).await.unwrap());

        let cap = rules.get_rule(MAX_TEAM_MEMBERS).await.unwrap();
        assert!(!cap.enabled);
        assert_eq!(cap.value, Some(RuleValue::Integer(5)));
        assert_eq!(rules.enabled_value(MAX_TEAM_MEMBERS).await.unwrap(), None);
    }

    #[test]
    fn integers_truncate_and_reject_non_finite_input() {
        assert_eq!(parse_integer("5.7"), Some(5));
        assert_eq!(parse_integer(" -2.9 "), Some(-2));
        assert_eq!(parse_integer("12"), Some(12));
        assert_eq!(parse_integer("inf"), None);
        assert_eq!(parse_integer("five"), None);
    }

    #[tokio::test]
    async fn stored_decimals_load_as_integers() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(
                &RuleKey {
                    guild_id: GUILD,
                    cmd_channel_id: CMD,
                    rule_name: MAX_TEAM_MEMBERS.to_lowercase(),
                },
                RulePatch {
                    enabled: Some(true),
                    value: Some(RuleValue::Number(5.7)),
                },
            )
            .await
            .unwrap();

        let mut rules = manager(store);
        let cap = rules.get_rule(MAX_TEAM_MEMBERS).await.unwrap();
        assert!(cap.enabled);
        assert_eq!(cap.value, Some(RuleValue::Integer(5)));
    }

    #[tokio::test]
    async fn unknown_rules_are_rejected() {
        let mut rules = manager(Arc::new(MemoryStore::new()));
        let err = rules.get_rule("friendlyFire").await.unwrap_err();
        assert!(matches!(err, DraftError::InvalidGameRule(name) if name == "friendlyFire"));
        let err = rules.set_enabled("friendlyFire", "true").await.unwrap_err();
        assert!(matches!(err, DraftError::InvalidGameRule(_)));
    }

    #[tokio::test]
    async fn set_enabled_round_trips_and_rejects_garbage() {
        let mut rules = manager(Arc::new(MemoryStore::new()));
        rules.set_enabled("autostart", "true").await.unwrap();
        assert!(rules.is_enabled(AUTO_START).await.unwrap());

        let err = rules.set_enabled(AUTO_START, "bogus").await.unwrap_err();
        assert!(matches!(
            err,
            DraftError::InvalidGameRuleValue { ty: RuleType::Boolean, ref value } if value == "bogus"
        ));
        assert!(rules.is_enabled(AUTO_START).await.unwrap());

        rules.set_enabled(AUTO_START, "0").await.unwrap();
        assert!(!rules.is_enabled(AUTO_START).await.unwrap());
    }

    #[tokio::test]
    async fn set_rule_coerces_and_enables() {
        let mut rules = manager(Arc::new(MemoryStore::new()));

        let cap = rules.set_rule(MAX_TEAM_MEMBERS, "3").await.unwrap();
        assert!(cap.enabled);
        assert_eq!(cap.value, Some(RuleValue::Integer(3)));

        let timeout = rules.set_rule(VOICE_MOVE_TIMEOUT, "2.5").await.unwrap();
        assert!(timeout.enabled);
        assert_eq!(timeout.value, Some(RuleValue::Number(2.5)));

        let title = rules.set_rule(SESSION_TITLE, "Friday scrims").await.unwrap();
        assert!(title.enabled);
        assert_eq!(title.value.unwrap().as_str(), Some("Friday scrims"));

        let leaders = rules.set_rule(RANDOM_LEADERS, "false").await.unwrap();
        assert!(!leaders.enabled);
    }

    #[tokio::test]
    async fn validators_and_numeric_parsing_reject_bad_values() {
        let mut rules = manager(Arc::new(MemoryStore::new()));

        let err = rules.set_rule(MAX_TEAM_MEMBERS, "0").await.unwrap_err();
        assert!(matches!(err, DraftError::Validation(_)));

        let err = rules.set_rule(VOICE_MOVE_TIMEOUT, "soon").await.unwrap_err();
        assert!(matches!(err, DraftError::Validation(_)));

        let cap = rules.get_rule(MAX_TEAM_MEMBERS).await.unwrap();
        assert!(!cap.enabled);
        assert_eq!(cap.value, Some(RuleValue::Integer(5)));
    }

    #[tokio::test]
    async fn overrides_are_loaded_once_and_survive_a_new_manager() {
        let store = Arc::new(FlakyStore::default());
        {
            let mut rules = manager(store.clone());
            rules.set_rule(MAX_TEAM_MEMBERS, "4").await.unwrap();
            rules.is_enabled(MAX_TEAM_MEMBERS).await.unwrap();
            assert_eq!(store.reads.load(Ordering::SeqCst), 1);
        }

        let mut rules = manager(store.clone());
        assert_eq!(
            rules.enabled_value(MAX_TEAM_MEMBERS).await.unwrap(),
            Some(RuleValue::Integer(4))
        );
    }

    #[tokio::test]
    async fn stale_rule_rows_are_dropped() {
        let store = Arc::new(MemoryStore::new());
        let key = |name: &str| RuleKey {
            guild_id: GUILD,
            cmd_channel_id: CMD,
            rule_name: name.to_owned(),
        };
        store
            .upsert(
                &key("ow_mysterycomps"),
                RulePatch {
                    enabled: Some(true),
                    value: None,
                },
            )
            .await
            .unwrap();
        store
            .upsert(
                &key("forcevoice"),
                RulePatch {
                    enabled: Some(true),
                    value: None,
                },
            )
            .await
            .unwrap();

        let mut rules = manager(store);
        let listed = rules.list().await.unwrap();
        assert_eq!(listed.len(), RuleSet::all().len());
        assert!(listed
            .iter()
            .any(|r| r.definition.display_name == "forceVoice" && r.enabled));
    }

    #[tokio::test]
    async fn failed_load_is_retried() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let mut rules = manager(store.clone());

        let err = rules.is_enabled(RANDOM_LEADERS).await.unwrap_err();
        assert!(matches!(err, DraftError::Store(_)));

        store.fail_reads.store(false, Ordering::SeqCst);
        assert!(rules.is_enabled(RANDOM_LEADERS).await.unwrap());
        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_write_rolls_back_memory() {
        let store = Arc::new(FlakyStore::default());
        let mut rules = manager(store.clone());
        rules.set_rule(MAX_TEAM_MEMBERS, "4").await.unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = rules.set_rule(MAX_TEAM_MEMBERS, "2").await.unwrap_err();
        assert!(matches!(err, DraftError::Store(_)));
        assert_eq!(
            rules.enabled_value(MAX_TEAM_MEMBERS).await.unwrap(),
            Some(RuleValue::Integer(4))
        );

        let err = rules.set_enabled(AUTO_START, "true").await.unwrap_err();
        assert!(matches!(err, DraftError::Store(_)));
        assert!(!rules.is_enabled(AUTO_START).await.unwrap());
    }
}
