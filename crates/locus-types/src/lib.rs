//! `locus-types` – shared vocabulary for the agent memory and interpreter.
//!
//! Everything in this crate is plain data: identifiers, the closed set of
//! entity kinds, spatial positions, serialisable task state and the
//! structured command produced by the external semantic parser.

pub mod command;

pub use command::{ActionDict, Command, DialogueType};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// MemId
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque, stable identifier of a memory entity.
///
/// Ids are 32 lowercase hex characters. They are never reused for the
/// lifetime of a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemId(String);

impl MemId {
    /// Generate a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The reserved id of the agent's own entity.
    pub fn self_id() -> Self {
        Self("0".repeat(32))
    }

    pub fn is_self(&self) -> bool {
        self.0.len() == 32 && self.0.bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Logical time, in ticks of the store clock.
pub type Timestamp = i64;

// ─────────────────────────────────────────────────────────────────────────────
// ParseError
// ─────────────────────────────────────────────────────────────────────────────

/// Returned when a vocabulary string does not name a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {what}: {value}")]
pub struct ParseError {
    pub what: &'static str,
    pub value: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// NodeKind
// ─────────────────────────────────────────────────────────────────────────────

/// The closed set of entity kinds. A kind decides which attribute table
/// holds an entity's typed attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// The agent itself. Exactly one exists per store.
    #[serde(rename = "Self")]
    SelfNode,
    Player,
    Location,
    /// Where someone is looking; written by perception.
    Attention,
    /// A generic spatial object usable as a reference.
    ReferenceObject,
    Chat,
    Task,
    Program,
    NamedAbstraction,
    Time,
}

impl NodeKind {
    pub const ALL: [NodeKind; 10] = [
        NodeKind::SelfNode,
        NodeKind::Player,
        NodeKind::Location,
        NodeKind::Attention,
        NodeKind::ReferenceObject,
        NodeKind::Chat,
        NodeKind::Task,
        NodeKind::Program,
        NodeKind::NamedAbstraction,
        NodeKind::Time,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::SelfNode => "Self",
            NodeKind::Player => "Player",
            NodeKind::Location => "Location",
            NodeKind::Attention => "Attention",
            NodeKind::ReferenceObject => "ReferenceObject",
            NodeKind::Chat => "Chat",
            NodeKind::Task => "Task",
            NodeKind::Program => "Program",
            NodeKind::NamedAbstraction => "NamedAbstraction",
            NodeKind::Time => "Time",
        }
    }

    /// `true` for kinds that carry a position in the reference-object table.
    pub fn is_spatial(&self) -> bool {
        matches!(
            self,
            NodeKind::SelfNode
                | NodeKind::Player
                | NodeKind::Location
                | NodeKind::Attention
                | NodeKind::ReferenceObject
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ParseError {
                what: "node kind",
                value: s.to_string(),
            })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Position
// ─────────────────────────────────────────────────────────────────────────────

/// A point in the agent's world frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn offset(&self, dx: f64, dy: f64, dz: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn distance(&self, other: &Position) -> f64 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

impl From<[f64; 3]> for Position {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task state
// ─────────────────────────────────────────────────────────────────────────────

/// Serialisable state of a task on the ledger.
///
/// Only explicit fields live here. Collaborators (the memory handle,
/// resolvers, the mover) are handed back to the task when it is stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "data")]
pub enum TaskData {
    Move(MoveTask),
    Loop(LoopTask),
    Undo(UndoTask),
    /// A domain-specific task implemented outside this workspace.
    External { action_name: String, state: Value },
}

impl TaskData {
    /// The action name persisted alongside the payload.
    pub fn action_name(&self) -> &str {
        match self {
            TaskData::Move(_) => "MOVE",
            TaskData::Loop(_) => "LOOP",
            TaskData::Undo(_) => "UNDO",
            TaskData::External { action_name, .. } => action_name,
        }
    }

    pub fn external(action_name: impl Into<String>, state: Value) -> Self {
        TaskData::External {
            action_name: action_name.into(),
            state,
        }
    }
}

/// Drive the agent to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveTask {
    pub target: Position,
    #[serde(default)]
    pub is_relative: bool,
    #[serde(default)]
    pub command_sent: bool,
    /// Where the agent stood when the movement started; used by undo.
    #[serde(default)]
    pub origin: Option<Position>,
}

impl MoveTask {
    pub fn to(target: Position) -> Self {
        Self {
            target,
            is_relative: false,
            command_sent: false,
            origin: None,
        }
    }
}

/// Re-run a named task factory until a stop condition holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopTask {
    pub body: TaskFactory,
    /// The `stop_condition` sub-tree of the originating action, resolved
    /// into a live condition every time the loop is stepped.
    pub stop_condition: Value,
    pub speaker: MemId,
    #[serde(default)]
    pub iterations: u32,
}

/// Named generators of child tasks, with their captured parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "factory", rename_all = "snake_case")]
pub enum TaskFactory {
    /// Resolve `location` for `speaker` and move there.
    MoveTo { speaker: MemId, location: Value },
    /// Push the same fixed list of tasks each iteration.
    Repeat { tasks: Vec<TaskData> },
}

/// Compensate for a finished root task and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoTask {
    pub memid: MemId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn self_id_is_reserved_zeros() {
        let id = MemId::self_id();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.is_self());
        assert!(!MemId::generate().is_self());
    }

    #[test]
    fn generated_ids_are_unique_hex() {
        let a = MemId::generate();
        let b = MemId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn node_kind_parses_its_own_names() {
        for kind in NodeKind::ALL {
            assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
        }
        let err = "Dance".parse::<NodeKind>().unwrap_err();
        assert_eq!(err.value, "Dance");
    }

    #[test]
    fn loop_task_serializes_factory_by_name() {
        let data = TaskData::Loop(LoopTask {
            body: TaskFactory::MoveTo {
                speaker: MemId::from("abc"),
                location: json!({"reference_object": {"special_reference": "SPEAKER_LOOK"}}),
            },
            stop_condition: json!({"condition_type": "NEVER"}),
            speaker: MemId::from("abc"),
            iterations: 2,
        });
        let v = serde_json::to_value(&data).unwrap();
        assert_eq!(v["task"], "Loop");
        assert_eq!(v["data"]["body"]["factory"], "move_to");
        let back: TaskData = serde_json::from_value(v).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn external_task_keeps_its_action_name() {
        let data = TaskData::external("BUILD", json!({"schematic": "house"}));
        assert_eq!(data.action_name(), "BUILD");
        assert_eq!(TaskData::Move(MoveTask::to(Position::default())).action_name(), "MOVE");
    }

    #[test]
    fn position_distance() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-9);
        assert_eq!(a.offset(1.0, 0.0, -1.0), Position::new(1.0, 0.0, -1.0));
    }
}
