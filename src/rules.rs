//! Declarative rule definitions and the typed rule set the engine runs.
//!
//! Rule files are JSON arrays of `{id, name, predicate, conditions, actions}`.
//! Anything the engine does not recognise is kept rather than rejected: an
//! unknown field or predicate becomes an [`Condition::Inert`] condition that
//! never matches, and an unknown action type becomes [`ActionKind::Unknown`],
//! which the dispatcher refuses to apply.

use crate::error::ConfigError;
use crate::models::Message;
use crate::predicates::{DatePredicate, StringPredicate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_predicate")]
    pub predicate: String,
    #[serde(default)]
    pub conditions: Vec<ConditionDefinition>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub field: Option<String>,
    pub predicate: Option<String>,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionDefinition {
    #[serde(rename = "type")]
    pub action_type: Option<String>,
    pub value: Option<Value>,
}

fn default_predicate() -> String {
    "all".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    From,
    To,
    Subject,
    Message,
}

impl TextField {
    pub fn name(self) -> &'static str {
        match self {
            TextField::From => "from",
            TextField::To => "to",
            TextField::Subject => "subject",
            TextField::Message => "message",
        }
    }

    /// Column in the `messages` table holding this field, lowercased the
    /// way [`StringPredicate::apply`] lowercases it.
    pub fn folded_column(self) -> &'static str {
        match self {
            TextField::From => "from_folded",
            TextField::To => "to_folded",
            TextField::Subject => "subject_folded",
            TextField::Message => "body_folded",
        }
    }

    pub fn value(self, message: &Message) -> Option<&str> {
        match self {
            TextField::From => message.from_address.as_deref(),
            TextField::To => message.to_address.as_deref(),
            TextField::Subject => message.subject.as_deref(),
            TextField::Message => message.body_plain.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Text {
        field: TextField,
        predicate: StringPredicate,
        value: String,
    },
    Received {
        predicate: DatePredicate,
        amount: i64,
    },
    /// Never matches. Keeps the reason for diagnostics.
    Inert { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchMode {
    All,
    Any,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    MarkAsRead,
    MarkAsUnread,
    MoveMessage,
    Unknown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub kind: ActionKind,
    pub value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub mode: MatchMode,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::MarkAsRead => "mark_as_read",
            ActionKind::MarkAsUnread => "mark_as_unread",
            ActionKind::MoveMessage => "move_message",
            ActionKind::Unknown(name) => name,
        }
    }
}

impl MatchMode {
    fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "all" => MatchMode::All,
            "any" => MatchMode::Any,
            _ => MatchMode::Invalid(raw.to_string()),
        }
    }
}

fn value_to_string(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

impl Condition {
    pub fn is_inert(&self) -> bool {
        matches!(self, Condition::Inert { .. })
    }

    fn from_definition(def: ConditionDefinition) -> Self {
        let (Some(field), Some(predicate), Some(value)) =
            (def.field, def.predicate, value_to_string(def.value))
        else {
            return Condition::Inert {
                reason: "missing field, predicate or value".to_string(),
            };
        };

        let text_field = match field.as_str() {
            "from" => Some(TextField::From),
            "to" => Some(TextField::To),
            "subject" => Some(TextField::Subject),
            "message" => Some(TextField::Message),
            "received_date" => None,
            _ => {
                return Condition::Inert {
                    reason: format!("unknown field '{}'", field),
                };
            }
        };

        match text_field {
            Some(text_field) => match predicate.parse::<StringPredicate>() {
                Ok(predicate) => Condition::Text {
                    field: text_field,
                    predicate,
                    value,
                },
                Err(()) => Condition::Inert {
                    reason: format!("unknown predicate '{}' for field '{}'", predicate, field),
                },
            },
            None => {
                let Ok(predicate) = predicate.parse::<DatePredicate>() else {
                    return Condition::Inert {
                        reason: format!("unknown predicate '{}' for field '{}'", predicate, field),
                    };
                };
                match value.trim().parse::<i64>() {
                    Ok(amount) => Condition::Received { predicate, amount },
                    Err(_) => Condition::Inert {
                        reason: format!("'{}' is not a whole number for {}", value, predicate),
                    },
                }
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Text {
                field,
                predicate,
                value,
            } => write!(f, "{} {} {:?}", field.name(), predicate, value),
            Condition::Received { predicate, amount } => {
                write!(f, "received_date {} {}", predicate, amount)
            }
            Condition::Inert { reason } => write!(f, "(ignored: {})", reason),
        }
    }
}

impl From<RuleDefinition> for Rule {
    fn from(def: RuleDefinition) -> Self {
        let mode = MatchMode::parse(&def.predicate);
        if let MatchMode::Invalid(raw) = &mode {
            warn!(rule = %def.id, predicate = %raw, "Invalid rule predicate, rule will never match");
        }

        let conditions: Vec<Condition> = def
            .conditions
            .into_iter()
            .map(Condition::from_definition)
            .collect();
        for condition in &conditions {
            if let Condition::Inert { reason } = condition {
                warn!(rule = %def.id, "Condition ignored: {}", reason);
            }
        }

        let actions = def
            .actions
            .into_iter()
            .filter_map(|a| {
                let Some(action_type) = a.action_type else {
                    warn!(rule = %def.id, "Action without a type skipped");
                    return None;
                };
                let kind = match action_type.as_str() {
                    "mark_as_read" => ActionKind::MarkAsRead,
                    "mark_as_unread" => ActionKind::MarkAsUnread,
                    "move_message" => ActionKind::MoveMessage,
                    _ => {
                        warn!(rule = %def.id, action = %action_type, "Unknown action type");
                        ActionKind::Unknown(action_type)
                    }
                };
                Some(Action {
                    kind,
                    value: value_to_string(a.value),
                })
            })
            .collect();

        Rule {
            id: def.id,
            name: def.name,
            mode,
            conditions,
            actions,
        }
    }
}

/// An immutable snapshot of the active rules, in file order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_definitions(definitions: Vec<RuleDefinition>) -> Self {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(definitions.len());
        for def in definitions {
            if !seen.insert(def.id.clone()) {
                warn!(rule = %def.id, "Duplicate rule id, keeping the first definition");
                continue;
            }
            rules.push(Rule::from(def));
        }
        Self { rules }
    }

    pub fn defaults() -> Self {
        Self::from_definitions(default_definitions())
    }

    /// Loads the rules at `path`. A missing file gives the built-in
    /// defaults; an unreadable or malformed one gives an empty set.
    pub fn load(path: &Path) -> Self {
        match read_definitions(path) {
            Ok(Some(definitions)) => {
                let set = Self::from_definitions(definitions);
                info!("Loaded {} rules from {}", set.len(), path.display());
                set
            }
            Ok(None) => {
                info!("No rules file at {}, using default rules", path.display());
                Self::defaults()
            }
            Err(e) => {
                error!("Error loading rules: {}", e);
                Self::default()
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

fn read_definitions(path: &Path) -> Result<Option<Vec<RuleDefinition>>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Rules {
            path: path.to_path_buf(),
            source,
        })
}

fn condition(field: &str, predicate: &str, value: &str) -> ConditionDefinition {
    ConditionDefinition {
        field: Some(field.to_string()),
        predicate: Some(predicate.to_string()),
        value: Some(Value::String(value.to_string())),
    }
}

pub fn default_definitions() -> Vec<RuleDefinition> {
    vec![
        RuleDefinition {
            id: "rule_1".to_string(),
            name: "Mark important emails as read".to_string(),
            predicate: "all".to_string(),
            conditions: vec![
                condition("from", "contains", "important@example.com"),
                condition("subject", "contains", "Important"),
            ],
            actions: vec![ActionDefinition {
                action_type: Some("mark_as_read".to_string()),
                value: None,
            }],
        },
        RuleDefinition {
            id: "rule_2".to_string(),
            name: "Move newsletters to newsletter label".to_string(),
            predicate: "any".to_string(),
            conditions: vec![
                condition("from", "contains", "newsletter"),
                condition("subject", "contains", "Newsletter"),
            ],
            actions: vec![ActionDefinition {
                action_type: Some("move_message".to_string()),
                value: Some(Value::String("CATEGORY_PROMOTIONS".to_string())),
            }],
        },
    ]
}

/// Writes the default rules to `path`. Returns `false` without touching an
/// existing file unless `force` is set.
pub fn write_default_rules(path: &Path, force: bool) -> Result<bool, ConfigError> {
    if path.exists() && !force {
        debug!("Rules file {} already exists", path.display());
        return Ok(false);
    }
    let content = serde_json::to_string_pretty(&default_definitions())?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}
