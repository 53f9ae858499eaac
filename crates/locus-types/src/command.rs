//! Structured commands, the output of the external semantic parser.
//!
//! A command is a nested mapping whose only required key is
//! `dialogue_type`. Commands of type `HUMAN_GIVE_COMMAND` carry either a
//! single `action` or an ordered `action_sequence`; every action carries an
//! `action_type` naming a dispatch-table entry.
//!
//! ```rust
//! use locus_types::{Command, DialogueType};
//!
//! let cmd: Command = serde_json::from_str(
//!     r#"{"dialogue_type": "HUMAN_GIVE_COMMAND",
//!         "action_sequence": [{"action_type": "MOVE"}, {"action_type": "STOP"}]}"#,
//! ).unwrap();
//! assert_eq!(cmd.dialogue_type, DialogueType::HumanGiveCommand);
//! let kinds: Vec<_> = cmd.actions().iter().map(|a| a.action_type.as_str()).collect();
//! assert_eq!(kinds, ["MOVE", "STOP"]);
//! ```

use crate::ParseError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Top-level routing key of a structured command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogueType {
    HumanGiveCommand,
    PutMemory,
    GetMemory,
    Noop,
}

impl DialogueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueType::HumanGiveCommand => "HUMAN_GIVE_COMMAND",
            DialogueType::PutMemory => "PUT_MEMORY",
            DialogueType::GetMemory => "GET_MEMORY",
            DialogueType::Noop => "NOOP",
        }
    }
}

impl fmt::Display for DialogueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialogueType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HUMAN_GIVE_COMMAND" => Ok(DialogueType::HumanGiveCommand),
            "PUT_MEMORY" => Ok(DialogueType::PutMemory),
            "GET_MEMORY" => Ok(DialogueType::GetMemory),
            "NOOP" => Ok(DialogueType::Noop),
            other => Err(ParseError {
                what: "dialogue type",
                value: other.to_string(),
            }),
        }
    }
}

/// One action of a command. Everything except `action_type` is kept as an
/// open JSON mapping for the sub-resolvers to interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ActionDict {
    pub action_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ActionDict {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// A structured command exactly as produced by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Command {
    pub dialogue_type: DialogueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionDict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_sequence: Option<Vec<ActionDict>>,
    /// Keys this workspace does not interpret (e.g. memory-type payloads).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Command {
    pub fn new(dialogue_type: DialogueType) -> Self {
        Self {
            dialogue_type,
            action: None,
            action_sequence: None,
            extra: Map::new(),
        }
    }

    pub fn give(actions: Vec<ActionDict>) -> Self {
        Self {
            action_sequence: Some(actions),
            ..Self::new(DialogueType::HumanGiveCommand)
        }
    }

    /// Every action of the command in original order. A single `action`
    /// comes before any `action_sequence` entries.
    pub fn actions(&self) -> Vec<&ActionDict> {
        self.action
            .iter()
            .chain(self.action_sequence.iter().flatten())
            .collect()
    }

    /// The `index`-th action in [`Command::actions`] order.
    pub fn action_mut(&mut self, index: usize) -> Option<&mut ActionDict> {
        match (&mut self.action, index) {
            (Some(single), 0) => Some(single),
            (Some(_), i) => self.action_sequence.as_mut()?.get_mut(i - 1),
            (None, i) => self.action_sequence.as_mut()?.get_mut(i),
        }
    }

    /// JSON Schema of the command contract, for parser authors.
    pub fn json_schema() -> Value {
        serde_json::to_value(schemars::schema_for!(Command)).unwrap_or(Value::Null)
    }
}
