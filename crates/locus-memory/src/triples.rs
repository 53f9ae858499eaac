//! Subject-predicate-object relations.
//!
//! Subjects and objects are either entity ids or literal text. Literal text
//! is materialised as a `NamedAbstraction` entity on first use, so every
//! triple row carries an id on both sides and optionally the text it was
//! written with. Predicates are always text and always resolved to their
//! `NamedAbstraction`.
//!
//! ```rust
//! use locus_memory::{AgentMemory, NodeRef, TripleQuery};
//!
//! let memory = AgentMemory::open_in_memory().unwrap();
//! let me = memory.self_id();
//! memory.add_triple(NodeRef::Id(me.clone()), "has_colour", NodeRef::text("blue"), 1.0).unwrap();
//!
//! let found = memory.query(&TripleQuery::subject(me).pred("has_colour")).unwrap();
//! assert_eq!(found[0].object(), "blue");
//! ```

use crate::error::MemoryError;
use crate::nodes::named_abstraction;
use crate::store::{AgentMemory, kind_of, write};
use locus_types::{MemId, Timestamp};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde::{Deserialize, Serialize};

pub const HAS_TAG: &str = "has_tag";

/// One side of a triple: an entity or a piece of literal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Id(MemId),
    Text(String),
}

impl NodeRef {
    pub fn text(s: impl Into<String>) -> Self {
        NodeRef::Text(s.into())
    }
}

impl From<MemId> for NodeRef {
    fn from(id: MemId) -> Self {
        NodeRef::Id(id)
    }
}

/// Which side(s) of a triple an entity is removed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Subject,
    Object,
    Both,
}

/// A stored relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    pub id: MemId,
    pub subj: MemId,
    pub subj_text: Option<String>,
    pub pred: MemId,
    pub pred_text: String,
    pub obj: MemId,
    pub obj_text: Option<String>,
    pub confidence: f64,
}

impl Triple {
    /// The object side, as text when the triple was written with text.
    pub fn object(&self) -> &str {
        self.obj_text.as_deref().unwrap_or(self.obj.as_str())
    }
}

fn row_to_triple(row: &rusqlite::Row<'_>) -> rusqlite::Result<Triple> {
    let id: String = row.get(0)?;
    let subj: String = row.get(1)?;
    let pred: String = row.get(3)?;
    let obj: String = row.get(5)?;
    Ok(Triple {
        id: MemId::from(id),
        subj: MemId::from(subj),
        subj_text: row.get(2)?,
        pred: MemId::from(pred),
        pred_text: row.get(4)?,
        obj: MemId::from(obj),
        obj_text: row.get(6)?,
        confidence: row.get(7)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// TripleQuery
// ─────────────────────────────────────────────────────────────────────────────

/// Filters for [`AgentMemory::query`]. At least one must be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripleQuery {
    pub subject: Option<NodeRef>,
    pub pred_text: Option<String>,
    pub object: Option<NodeRef>,
    /// Also match triples whose subject is a snapshot.
    pub include_snapshots: bool,
}

impl TripleQuery {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn subject(id: MemId) -> Self {
        Self {
            subject: Some(NodeRef::Id(id)),
            ..Self::default()
        }
    }

    pub fn subject_text(mut self, text: &str) -> Self {
        self.subject = Some(NodeRef::text(text));
        self
    }

    pub fn pred(mut self, pred_text: &str) -> Self {
        self.pred_text = Some(pred_text.to_string());
        self
    }

    pub fn object(mut self, obj: NodeRef) -> Self {
        self.object = Some(obj);
        self
    }

    pub fn object_id(self, id: MemId) -> Self {
        self.object(NodeRef::Id(id))
    }

    pub fn object_text(self, text: &str) -> Self {
        self.object(NodeRef::text(text))
    }

    pub fn including_snapshots(mut self) -> Self {
        self.include_snapshots = true;
        self
    }

    fn is_unfiltered(&self) -> bool {
        self.subject.is_none() && self.pred_text.is_none() && self.object.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection-level helpers
// ─────────────────────────────────────────────────────────────────────────────

fn resolve_side(
    conn: &Connection,
    side: &NodeRef,
    now: Timestamp,
) -> Result<(MemId, Option<String>), MemoryError> {
    match side {
        NodeRef::Id(id) => {
            if kind_of(conn, id)?.is_none() {
                return Err(MemoryError::InvalidReference(format!("unknown memory {id}")));
            }
            Ok((id.clone(), None))
        }
        NodeRef::Text(text) if text.is_empty() => Err(MemoryError::InvalidReference(
            "empty text in triple".to_string(),
        )),
        NodeRef::Text(text) => Ok((named_abstraction(conn, text, now)?, Some(text.clone()))),
    }
}

pub(crate) fn insert_triple(
    conn: &Connection,
    now: Timestamp,
    subj: &NodeRef,
    pred_text: &str,
    obj: &NodeRef,
    confidence: f64,
) -> Result<MemId, MemoryError> {
    if pred_text.is_empty() {
        return Err(MemoryError::InvalidReference(
            "triple predicate must not be empty".to_string(),
        ));
    }
    let (subj_id, subj_text) = resolve_side(conn, subj, now)?;
    let (obj_id, obj_text) = resolve_side(conn, obj, now)?;
    let pred = named_abstraction(conn, pred_text, now)?;
    let id = MemId::generate();
    write(
        conn,
        "INSERT INTO Triples (uuid, subj, subj_text, pred, pred_text, obj, obj_text, confidence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.as_str(),
            subj_id.as_str(),
            subj_text,
            pred.as_str(),
            pred_text,
            obj_id.as_str(),
            obj_text,
            confidence,
        ],
    )?;
    Ok(id)
}

pub(crate) fn remove_by_entity(conn: &Connection, id: &MemId, role: Role) -> Result<usize, MemoryError> {
    let mut removed = 0;
    if matches!(role, Role::Subject | Role::Both) {
        removed += write(conn, "DELETE FROM Triples WHERE subj = ?1", params![id.as_str()])?;
    }
    if matches!(role, Role::Object | Role::Both) {
        removed += write(conn, "DELETE FROM Triples WHERE obj = ?1", params![id.as_str()])?;
    }
    Ok(removed)
}

pub(crate) fn query_in(conn: &Connection, q: &TripleQuery) -> Result<Vec<Triple>, MemoryError> {
    if q.is_unfiltered() {
        return Err(MemoryError::InvalidReference(
            "triple query needs at least one filter".to_string(),
        ));
    }
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();
    if !q.include_snapshots {
        clauses.push("M.is_snapshot = 0");
    }
    match &q.subject {
        Some(NodeRef::Id(id)) => {
            clauses.push("T.subj = ?");
            args.push(SqlValue::Text(id.to_string()));
        }
        Some(NodeRef::Text(t)) => {
            clauses.push("T.subj_text = ?");
            args.push(SqlValue::Text(t.clone()));
        }
        None => {}
    }
    if let Some(p) = &q.pred_text {
        clauses.push("T.pred_text = ?");
        args.push(SqlValue::Text(p.clone()));
    }
    match &q.object {
        Some(NodeRef::Id(id)) => {
            clauses.push("T.obj = ?");
            args.push(SqlValue::Text(id.to_string()));
        }
        Some(NodeRef::Text(t)) => {
            clauses.push("T.obj_text = ?");
            args.push(SqlValue::Text(t.clone()));
        }
        None => {}
    }
    let sql = format!(
        "SELECT T.uuid, T.subj, T.subj_text, T.pred, T.pred_text, T.obj, T.obj_text, T.confidence
         FROM Triples T JOIN Memories M ON M.uuid = T.subj
         WHERE {} ORDER BY T.rowid ASC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_triple)?;
    let triples = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(triples)
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentMemory API
// ─────────────────────────────────────────────────────────────────────────────

impl AgentMemory {
    /// Add `(subj, pred_text, obj)`. Text on either side creates or reuses a
    /// NamedAbstraction.
    pub fn add_triple(
        &self,
        subj: NodeRef,
        pred_text: &str,
        obj: NodeRef,
        confidence: f64,
    ) -> Result<MemId, MemoryError> {
        let now = self.now();
        self.with_tx(|conn| insert_triple(conn, now, &subj, pred_text, &obj, confidence))
    }

    pub fn query(&self, q: &TripleQuery) -> Result<Vec<Triple>, MemoryError> {
        self.with_conn(|conn| query_in(conn, q))
    }

    /// Remove every triple naming `id` on the given side(s).
    pub fn remove_by_entity(&self, id: &MemId, role: Role) -> Result<usize, MemoryError> {
        self.with_conn(|conn| remove_by_entity(conn, id, role))
    }

    /// Remove one triple by its own id. Returns whether it existed.
    pub fn remove_triple(&self, triple: &MemId) -> Result<bool, MemoryError> {
        self.with_conn(|conn| {
            let removed = write(conn, "DELETE FROM Triples WHERE uuid = ?1", params![triple.as_str()])?;
            Ok(removed > 0)
        })
    }

    pub fn tag(&self, id: &MemId, tag: &str) -> Result<(), MemoryError> {
        self.add_triple(NodeRef::Id(id.clone()), HAS_TAG, NodeRef::text(tag), 1.0)?;
        Ok(())
    }

    pub fn untag(&self, id: &MemId, tag: &str) -> Result<(), MemoryError> {
        self.with_conn(|conn| {
            write(
                conn,
                "DELETE FROM Triples WHERE subj = ?1 AND pred_text = ?2 AND obj_text = ?3",
                params![id.as_str(), HAS_TAG, tag],
            )?;
            Ok(())
        })
    }

    /// Tags of `id`, each once, in the order they were first added.
    pub fn get_tags(&self, id: &MemId) -> Result<Vec<String>, MemoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT obj_text FROM Triples
                 WHERE subj = ?1 AND pred_text = ?2 AND obj_text IS NOT NULL
                 GROUP BY obj_text ORDER BY MIN(rowid)",
            )?;
            let rows = stmt.query_map(params![id.as_str(), HAS_TAG], |row| row.get(0))?;
            let tags = rows.collect::<Result<Vec<String>, _>>()?;
            Ok(tags)
        })
    }

    /// Live entities carrying `tag`.
    pub fn get_ids_by_tag(&self, tag: &str) -> Result<Vec<MemId>, MemoryError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT M.uuid FROM Memories M
                 JOIN Triples T ON T.subj = M.uuid
                 WHERE T.pred_text = ?1 AND T.obj_text = ?2 AND M.is_snapshot = 0
                 ORDER BY M.create_time ASC",
            )?;
            let rows = stmt.query_map(params![HAS_TAG, tag], |row| {
                row.get::<_, String>(0).map(MemId::from)
            })?;
            let ids = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
