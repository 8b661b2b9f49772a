//! Catalog of the game rules a session can toggle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub const RANDOM_LEADERS: &str = "randomLeaders";
pub const FORCE_VOICE: &str = "forceVoice";
pub const MYSTERY_HEROES: &str = "ow_mysteryHeroes";
pub const NO_LIMITS: &str = "ow_noLimits";
pub const MAX_TEAM_MEMBERS: &str = "maxTeamMembers";
pub const AUTO_START: &str = "autoStart";
pub const SESSION_TITLE: &str = "sessionTitle";
pub const VOICE_MOVE_TIMEOUT: &str = "voiceMoveTimeout";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Boolean,
    String,
    Number,
    Integer,
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RuleType::Boolean => "boolean",
            RuleType::String => "string",
            RuleType::Number => "number",
            RuleType::Integer => "integer",
        })
    }
}

/// Value carried by non-boolean rules. Boolean rules only use the enabled flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Integer(i64),
    Number(f64),
    String(String),
}

impl RuleValue {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RuleValue::Integer(i) => Some(*i),
            RuleValue::Number(n) => Some(n.trunc() as i64),
            RuleValue::String(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            RuleValue::Integer(i) => Some(*i as f64),
            RuleValue::Number(n) => Some(*n),
            RuleValue::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RuleValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Reinterprets a stored value as `ty`, the way it would have been written.
    ///
    /// Documents written by hand or by older versions may carry a double where an
    /// integer is expected; anything that cannot be reinterpreted is dropped.
    pub fn coerce(self, ty: RuleType) -> Option<RuleValue> {
        match (ty, self) {
            (RuleType::Boolean, _) => None,
            (RuleType::String, RuleValue::String(s)) => Some(RuleValue::String(s)),
            (RuleType::String, _) => None,
            (RuleType::Number, v) => v.as_number().map(RuleValue::Number),
            (RuleType::Integer, v) => v.as_integer().map(RuleValue::Integer),
        }
    }
}

impl fmt::Display for RuleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleValue::Integer(i) => write!(f, "{i}"),
            RuleValue::Number(n) => write!(f, "{n}"),
            RuleValue::String(s) => f.write_str(s),
        }
    }
}

pub type Validator = fn(&str) -> Result<(), String>;

#[derive(Debug)]
pub struct RuleDefinition {
    /// Lowercased lookup key.
    pub name: String,
    /// Name as shown to users.
    pub display_name: &'static str,
    pub value_type: RuleType,
    pub default_enabled: bool,
    pub default_value: Option<RuleValue>,
    pub help_text: &'static str,
    pub validate: Option<Validator>,
}

fn is_positive_integer(input: &str) -> bool {
    let digits = input.strip_prefix('+').unwrap_or(input);
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && (digits == "0" || !digits.starts_with('0'))
}

fn validate_team_size(input: &str) -> Result<(), String> {
    let input = input.trim();
    if !is_positive_integer(input) || input.trim_start_matches('+') == "0" {
        return Err(format!(
            "`{input}` is not a valid team size, it must be a whole number of at least 1"
        ));
    }
    Ok(())
}

fn validate_title(input: &str) -> Result<(), String> {
    let len = input.trim().chars().count();
    if len == 0 || len > 64 {
        return Err("The session title must be between 1 and 64 characters long".to_owned());
    }
    Ok(())
}

fn validate_timeout(input: &str) -> Result<(), String> {
    match input.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs > 0.0 => Ok(()),
        _ => Err(format!(
            "`{input}` is not a valid timeout, it must be a positive number of seconds"
        )),
    }
}

struct RuleSpec {
    name: &'static str,
    value_type: RuleType,
    enabled: bool,
    value: Option<RuleValue>,
    help_text: &'static str,
    validate: Option<Validator>,
}

fn build_catalog(specs: Vec<RuleSpec>) -> Vec<RuleDefinition> {
    specs
        .into_iter()
        .map(|spec| RuleDefinition {
            name: spec.name.to_lowercase(),
            display_name: spec.name,
            value_type: spec.value_type,
            default_enabled: spec.enabled,
            default_value: spec.value,
            help_text: spec.help_text,
            validate: spec.validate,
        })
        .collect()
}

static CATALOG: LazyLock<Vec<RuleDefinition>> = LazyLock::new(|| {
    build_catalog(vec![
        RuleSpec {
            name: RANDOM_LEADERS,
            value_type: RuleType::Boolean,
            enabled: true,
            value: None,
            help_text: "Picks random team leaders upon initializing a new game session (during setup)",
            validate: None,
        },
        RuleSpec {
            name: FORCE_VOICE,
            value_type: RuleType::Boolean,
            enabled: false,
            value: None,
            help_text: "Forces everybody to move to their respective team channel, regardless of which voice channel they're currently in",
            validate: None,
        },
        RuleSpec {
            name: MYSTERY_HEROES,
            value_type: RuleType::Boolean,
            enabled: false,
            value: None,
            help_text: "Selects random heroes upon starting the game",
            validate: None,
        },
        RuleSpec {
            name: NO_LIMITS,
            value_type: RuleType::Boolean,
            enabled: false,
            value: None,
            help_text: "Controls whether multiple of the same heroes can be picked",
            validate: None,
        },
        RuleSpec {
            name: MAX_TEAM_MEMBERS,
            value_type: RuleType::Integer,
            enabled: false,
            value: Some(RuleValue::Integer(5)),
            help_text: "Limits how many members (not counting the leader) can be picked for each team",
            validate: Some(validate_team_size),
        },
        RuleSpec {
            name: AUTO_START,
            value_type: RuleType::Boolean,
            enabled: false,
            value: None,
            help_text: "Starts the game session as soon as both teams are full",
            validate: None,
        },
        RuleSpec {
            name: SESSION_TITLE,
            value_type: RuleType::String,
            enabled: false,
            value: Some(RuleValue::String("6v6 Session".to_owned())),
            help_text: "Title shown above the drafted teams",
            validate: Some(validate_title),
        },
        RuleSpec {
            name: VOICE_MOVE_TIMEOUT,
            value_type: RuleType::Number,
            enabled: false,
            value: Some(RuleValue::Number(10.0)),
            help_text: "How many seconds to wait for Discord when moving a member between voice channels",
            validate: Some(validate_timeout),
        },
    ])
});

pub struct RuleSet;

impl RuleSet {
    pub fn by_name(name: &str) -> Option<&'static RuleDefinition> {
        let name = name.to_lowercase();
        CATALOG.iter().find(|rule| rule.name == name)
    }

    /// All rules in catalog order.
    pub fn all() -> &'static [RuleDefinition] {
        &CATALOG
    }
}

/// Parses the tri-state boolean accepted by `gamerule enable|disable|set`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
