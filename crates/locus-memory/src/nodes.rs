//! Per-kind attribute schemas and the kind-specific helpers built on them.
//!
//! Every [`NodeKind`] owns exactly one attribute table:
//!
//! | kinds                                                     | table              |
//! |-----------------------------------------------------------|--------------------|
//! | `Self`, `Player`, `Location`, `Attention`, `ReferenceObject` | `ReferenceObjects` |
//! | `Chat`                                                    | `Chats`            |
//! | `Task`                                                    | `Tasks`            |
//! | `Program`                                                 | `Programs`         |
//! | `NamedAbstraction`                                        | `NamedAbstractions`|
//! | `Time`                                                    | `Times`            |
//!
//! Adding a kind means adding a variant to [`NodeKind`], an arm to
//! [`NodeAttrs`] and a table here.

use crate::error::MemoryError;
use crate::store::{AgentMemory, insert_memory, write};
use crate::triples::{NodeRef, insert_triple};
use locus_types::{MemId, NodeKind, Position, TaskData, Timestamp};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, trace};

// ─────────────────────────────────────────────────────────────────────────────
// Attribute schemas
// ─────────────────────────────────────────────────────────────────────────────

/// Attributes of anything with a place in the world.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SpatialAttrs {
    pub pos: Position,
    pub yaw: f64,
    pub pitch: f64,
    /// Entity id assigned by the environment, if any.
    pub eid: Option<i64>,
    pub name: Option<String>,
    pub type_name: Option<String>,
    /// Who is looking, for `Attention` entities.
    pub attender: Option<MemId>,
}

impl SpatialAttrs {
    pub fn at(pos: Position) -> Self {
        Self {
            pos,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAttrs {
    pub speaker: MemId,
    pub text: String,
    pub time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttrs {
    pub data: TaskData,
    pub paused: bool,
    pub finished_at: Option<Timestamp>,
}

impl TaskAttrs {
    pub fn fresh(data: TaskData) -> Self {
        Self {
            data,
            paused: false,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramAttrs {
    /// The structured command exactly as the parser produced it.
    pub logical_form: Value,
    pub recorded_at: Timestamp,
}

/// Typed attributes of one entity, one arm per attribute table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeAttrs {
    Spatial(SpatialAttrs),
    Chat(ChatAttrs),
    Task(TaskAttrs),
    Program(ProgramAttrs),
    NamedAbstraction { name: String },
    Time { time: Timestamp },
}

impl NodeAttrs {
    /// The kind these attributes most naturally describe.
    pub fn natural_kind(&self) -> NodeKind {
        match self {
            NodeAttrs::Spatial(_) => NodeKind::ReferenceObject,
            NodeAttrs::Chat(_) => NodeKind::Chat,
            NodeAttrs::Task(_) => NodeKind::Task,
            NodeAttrs::Program(_) => NodeKind::Program,
            NodeAttrs::NamedAbstraction { .. } => NodeKind::NamedAbstraction,
            NodeAttrs::Time { .. } => NodeKind::Time,
        }
    }

    pub fn fits(&self, kind: NodeKind) -> bool {
        match self {
            NodeAttrs::Spatial(_) => kind.is_spatial(),
            other => other.natural_kind() == kind,
        }
    }

    pub fn as_spatial(&self) -> Option<&SpatialAttrs> {
        match self {
            NodeAttrs::Spatial(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_task(&self) -> Option<&TaskAttrs> {
        match self {
            NodeAttrs::Task(t) => Some(t),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Table I/O
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn table_for(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::SelfNode
        | NodeKind::Player
        | NodeKind::Location
        | NodeKind::Attention
        | NodeKind::ReferenceObject => "ReferenceObjects",
        NodeKind::Chat => "Chats",
        NodeKind::Task => "Tasks",
        NodeKind::Program => "Programs",
        NodeKind::NamedAbstraction => "NamedAbstractions",
        NodeKind::Time => "Times",
    }
}

/// Attribute columns of each table, excluding the `uuid` key.
fn columns_for(kind: NodeKind) -> &'static str {
    match table_for(kind) {
        "ReferenceObjects" => "eid, x, y, z, yaw, pitch, name, type_name, attender",
        "Chats" => "speaker, chat, time",
        "Tasks" => "action_name, payload, paused, created_at, finished_at",
        "Programs" => "logical_form, recorded_at",
        "NamedAbstractions" => "name",
        _ => "time",
    }
}

/// Insert the attribute row of a freshly created entity.
pub(crate) fn insert_attrs(
    conn: &Connection,
    id: &MemId,
    attrs: &NodeAttrs,
    created_at: Timestamp,
) -> Result<(), MemoryError> {
    match attrs {
        NodeAttrs::Spatial(s) => {
            write(
                conn,
                "INSERT INTO ReferenceObjects (uuid, eid, x, y, z, yaw, pitch, name, type_name, attender)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.as_str(),
                    s.eid,
                    s.pos.x,
                    s.pos.y,
                    s.pos.z,
                    s.yaw,
                    s.pitch,
                    s.name,
                    s.type_name,
                    s.attender.as_ref().map(MemId::as_str),
                ],
            )?;
        }
        NodeAttrs::Chat(c) => {
            write(
                conn,
                "INSERT INTO Chats (uuid, speaker, chat, time) VALUES (?1, ?2, ?3, ?4)",
                params![id.as_str(), c.speaker.as_str(), c.text, c.time],
            )?;
        }
        NodeAttrs::Task(t) => {
            let payload = serde_json::to_string(&t.data)?;
            write(
                conn,
                "INSERT INTO Tasks (uuid, action_name, payload, paused, created_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    id.as_str(),
                    t.data.action_name(),
                    payload,
                    t.paused,
                    created_at,
                    t.finished_at.unwrap_or(-1),
                ],
            )?;
        }
        NodeAttrs::Program(p) => {
            let lf = serde_json::to_string(&p.logical_form)?;
            write(
                conn,
                "INSERT INTO Programs (uuid, logical_form, recorded_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), lf, p.recorded_at],
            )?;
        }
        NodeAttrs::NamedAbstraction { name } => {
            write(
                conn,
                "INSERT INTO NamedAbstractions (uuid, name) VALUES (?1, ?2)",
                params![id.as_str(), name],
            )?;
        }
        NodeAttrs::Time { time } => {
            write(
                conn,
                "INSERT INTO Times (uuid, time) VALUES (?1, ?2)",
                params![id.as_str(), time],
            )?;
        }
    }
    Ok(())
}

/// Load the attribute row of `id`, interpreted as `kind`.
pub(crate) fn load_attrs(
    conn: &Connection,
    id: &MemId,
    kind: NodeKind,
) -> Result<Option<NodeAttrs>, MemoryError> {
    let attrs = match table_for(kind) {
        "ReferenceObjects" => conn
            .query_row(
                "SELECT eid, x, y, z, yaw, pitch, name, type_name, attender
                 FROM ReferenceObjects WHERE uuid = ?1",
                params![id.as_str()],
                |row| {
                    let attender: Option<String> = row.get(8)?;
                    Ok(NodeAttrs::Spatial(SpatialAttrs {
                        eid: row.get(0)?,
                        pos: Position::new(row.get(1)?, row.get(2)?, row.get(3)?),
                        yaw: row.get(4)?,
                        pitch: row.get(5)?,
                        name: row.get(6)?,
                        type_name: row.get(7)?,
                        attender: attender.map(MemId::from),
                    }))
                },
            )
            .optional()?,
        "Chats" => conn
            .query_row(
                "SELECT speaker, chat, time FROM Chats WHERE uuid = ?1",
                params![id.as_str()],
                |row| {
                    let speaker: String = row.get(0)?;
                    Ok(NodeAttrs::Chat(ChatAttrs {
                        speaker: MemId::from(speaker),
                        text: row.get(1)?,
                        time: row.get(2)?,
                    }))
                },
            )
            .optional()?,
        "Tasks" => {
            let row = conn
                .query_row(
                    "SELECT payload, paused, finished_at FROM Tasks WHERE uuid = ?1",
                    params![id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, bool>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )
                .optional()?;
            match row {
                Some((payload, paused, finished_at)) => Some(NodeAttrs::Task(TaskAttrs {
                    data: serde_json::from_str(&payload)?,
                    paused,
                    finished_at: (finished_at >= 0).then_some(finished_at),
                })),
                None => None,
            }
        }
        "Programs" => {
            let row = conn
                .query_row(
                    "SELECT logical_form, recorded_at FROM Programs WHERE uuid = ?1",
                    params![id.as_str()],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()?;
            match row {
                Some((lf, recorded_at)) => Some(NodeAttrs::Program(ProgramAttrs {
                    logical_form: serde_json::from_str(&lf)?,
                    recorded_at,
                })),
                None => None,
            }
        }
        "NamedAbstractions" => conn
            .query_row(
                "SELECT name FROM NamedAbstractions WHERE uuid = ?1",
                params![id.as_str()],
                |row| Ok(NodeAttrs::NamedAbstraction { name: row.get(0)? }),
            )
            .optional()?,
        _ => conn
            .query_row(
                "SELECT time FROM Times WHERE uuid = ?1",
                params![id.as_str()],
                |row| Ok(NodeAttrs::Time { time: row.get(0)? }),
            )
            .optional()?,
    };
    Ok(attrs)
}

pub(crate) fn delete_attrs(conn: &Connection, id: &MemId, kind: NodeKind) -> Result<(), MemoryError> {
    let sql = format!("DELETE FROM {} WHERE uuid = ?1", table_for(kind));
    write(conn, &sql, params![id.as_str()])?;
    Ok(())
}

/// Copy the attribute row of `from` verbatim onto `to`.
pub(crate) fn copy_attrs(
    conn: &Connection,
    kind: NodeKind,
    from: &MemId,
    to: &MemId,
) -> Result<(), MemoryError> {
    let table = table_for(kind);
    let cols = columns_for(kind);
    let sql = format!("INSERT INTO {table} (uuid, {cols}) SELECT ?2, {cols} FROM {table} WHERE uuid = ?1");
    write(conn, &sql, params![from.as_str(), to.as_str()])?;
    Ok(())
}

/// Get or create the live NamedAbstraction called `name`.
pub(crate) fn named_abstraction(
    conn: &Connection,
    name: &str,
    now: Timestamp,
) -> Result<MemId, MemoryError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT N.uuid FROM NamedAbstractions N
             JOIN Memories M ON M.uuid = N.uuid
             WHERE N.name = ?1 AND M.is_snapshot = 0
             ORDER BY M.create_time ASC LIMIT 1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(MemId::from(id));
    }
    let id = insert_memory(conn, NodeKind::NamedAbstraction, now, false)?;
    insert_attrs(
        conn,
        &id,
        &NodeAttrs::NamedAbstraction {
            name: name.to_string(),
        },
        now,
    )?;
    Ok(id)
}

// ─────────────────────────────────────────────────────────────────────────────
// Kind-specific helpers
// ─────────────────────────────────────────────────────────────────────────────

/// A stored chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: MemId,
    pub speaker: MemId,
    pub text: String,
    pub time: Timestamp,
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatRecord> {
    let id: String = row.get(0)?;
    let speaker: String = row.get(1)?;
    Ok(ChatRecord {
        id: MemId::from(id),
        speaker: MemId::from(speaker),
        text: row.get(2)?,
        time: row.get(3)?,
    })
}

/// Tags every player carries.
pub const PLAYER_TAGS: [&str; 4] = ["_player", "_physical_object", "_animate", "_not_location"];

impl AgentMemory {
    /// Record an utterance by `speaker` at the current time.
    pub fn add_chat(&self, speaker: &MemId, text: &str) -> Result<MemId, MemoryError> {
        let now = self.now();
        self.create(
            NodeKind::Chat,
            NodeAttrs::Chat(ChatAttrs {
                speaker: speaker.clone(),
                text: text.to_string(),
                time: now,
            }),
        )
    }

    /// The `n` most recent chats, newest first.
    pub fn recent_chats(&self, n: usize) -> Result<Vec<ChatRecord>, MemoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT C.uuid, C.speaker, C.chat, C.time FROM Chats C
                 JOIN Memories M ON M.uuid = C.uuid
                 WHERE M.is_snapshot = 0
                 ORDER BY C.time DESC, C.rowid DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![n as i64], row_to_chat)?;
            let chats = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(chats)
        })
    }

    /// Latest chat not spoken by the agent itself, strictly after `after`.
    pub fn most_recent_incoming_chat(
        &self,
        after: Timestamp,
    ) -> Result<Option<ChatRecord>, MemoryError> {
        let self_id = self.self_id();
        self.with_conn(|conn| {
            let chat = conn
                .query_row(
                    "SELECT C.uuid, C.speaker, C.chat, C.time FROM Chats C
                     JOIN Memories M ON M.uuid = C.uuid
                     WHERE M.is_snapshot = 0 AND C.speaker != ?1 AND C.time > ?2
                     ORDER BY C.time DESC, C.rowid DESC LIMIT 1",
                    params![self_id.as_str(), after],
                    row_to_chat,
                )
                .optional()?;
            Ok(chat)
        })
    }

    /// Create a player with the standard player tags and a `has_name` triple.
    pub fn add_player(&self, eid: i64, name: &str, pos: Position) -> Result<MemId, MemoryError> {
        let now = self.now();
        let id = self.with_tx(|conn| {
            let id = insert_memory(conn, NodeKind::Player, now, false)?;
            let attrs = NodeAttrs::Spatial(SpatialAttrs {
                eid: Some(eid),
                name: Some(name.to_string()),
                ..SpatialAttrs::at(pos)
            });
            insert_attrs(conn, &id, &attrs, now)?;
            for tag in PLAYER_TAGS {
                insert_triple(
                    conn,
                    now,
                    &NodeRef::Id(id.clone()),
                    "has_tag",
                    &NodeRef::text(tag),
                    1.0,
                )?;
            }
            insert_triple(
                conn,
                now,
                &NodeRef::Id(id.clone()),
                "has_name",
                &NodeRef::text(name),
                1.0,
            )?;
            Ok(id)
        })?;
        debug!(memid = %id, name, "player added");
        Ok(id)
    }

    pub fn player_by_name(&self, name: &str) -> Result<Option<MemId>, MemoryError> {
        self.spatial_lookup("R.name = ?1", rusqlite::types::Value::Text(name.to_string()))
    }

    pub fn player_by_eid(&self, eid: i64) -> Result<Option<MemId>, MemoryError> {
        self.spatial_lookup("R.eid = ?1", rusqlite::types::Value::Integer(eid))
    }

    fn spatial_lookup(
        &self,
        clause: &str,
        value: rusqlite::types::Value,
    ) -> Result<Option<MemId>, MemoryError> {
        let sql = format!(
            "SELECT R.uuid FROM ReferenceObjects R
             JOIN Memories M ON M.uuid = R.uuid
             WHERE M.node_type = 'Player' AND M.is_snapshot = 0 AND {clause}
             ORDER BY M.updated_time DESC LIMIT 1"
        );
        self.with_conn(|conn| {
            let id: Option<String> = conn
                .query_row(&sql, params![value], |row| row.get(0))
                .optional()?;
            Ok(id.map(MemId::from))
        })
    }

    pub fn add_location(&self, pos: Position) -> Result<MemId, MemoryError> {
        self.create(NodeKind::Location, NodeAttrs::Spatial(SpatialAttrs::at(pos)))
    }

    /// Record that `attender` is looking at `pos`.
    pub fn add_attention(&self, pos: Position, attender: &MemId) -> Result<MemId, MemoryError> {
        self.create(
            NodeKind::Attention,
            NodeAttrs::Spatial(SpatialAttrs {
                attender: Some(attender.clone()),
                ..SpatialAttrs::at(pos)
            }),
        )
    }

    /// Most recent live attention of `attender`.
    pub fn attention_of(&self, attender: &MemId) -> Result<Option<Position>, MemoryError> {
        self.with_conn(|conn| {
            let pos = conn
                .query_row(
                    "SELECT R.x, R.y, R.z FROM ReferenceObjects R
                     JOIN Memories M ON M.uuid = R.uuid
                     WHERE M.node_type = 'Attention' AND M.is_snapshot = 0 AND R.attender = ?1
                     ORDER BY M.updated_time DESC, R.rowid DESC LIMIT 1",
                    params![attender.as_str()],
                    |row| Ok(Position::new(row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            Ok(pos)
        })
    }

    pub fn add_time(&self, time: Timestamp) -> Result<MemId, MemoryError> {
        self.create(NodeKind::Time, NodeAttrs::Time { time })
    }

    /// Store an incoming structured command. Programs are never updated.
    pub fn add_program(&self, logical_form: &Value) -> Result<MemId, MemoryError> {
        let now = self.now();
        self.create(
            NodeKind::Program,
            NodeAttrs::Program(ProgramAttrs {
                logical_form: logical_form.clone(),
                recorded_at: now,
            }),
        )
    }

    /// Current position of a spatial entity; `None` for other kinds.
    pub fn position_of(&self, id: &MemId) -> Result<Option<Position>, MemoryError> {
        Ok(self
            .read(id)?
            .and_then(|rec| rec.attrs.as_spatial().map(|s| s.pos)))
    }

    /// Move a spatial entity, as perception would.
    pub fn set_position(&self, id: &MemId, pos: Position) -> Result<(), MemoryError> {
        let now = self.now();
        self.with_tx(|conn| {
            let changed = write(
                conn,
                "UPDATE ReferenceObjects SET x = ?2, y = ?3, z = ?4 WHERE uuid = ?1",
                params![id.as_str(), pos.x, pos.y, pos.z],
            )?;
            if changed == 0 {
                return Err(MemoryError::NotFound(id.clone()));
            }
            write(
                conn,
                "UPDATE Memories SET updated_time = ?2 WHERE uuid = ?1",
                params![id.as_str(), now],
            )?;
            Ok(())
        })
    }

    /// Write a consistent copy of the whole database to `path`.
    pub fn dump_to(&self, path: impl AsRef<Path>) -> Result<(), MemoryError> {
        let target = path.as_ref().to_string_lossy().replace('\'', "''");
        self.with_conn(|conn| {
            // VACUUM INTO takes a literal, not a bound parameter.
            let sql = format!("VACUUM INTO '{target}'");
            trace!(target: "locus_memory::sql", sql = %sql, "write");
            conn.execute_batch(&sql)?;
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
