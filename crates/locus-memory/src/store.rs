//! The entity store: one `Memories` row per entity plus its attribute row.
//!
//! # Storage layout
//!
//! | column        | type    | description                                  |
//! |---------------|---------|----------------------------------------------|
//! | uuid          | TEXT    | 32-hex primary key, never reused             |
//! | node_type     | TEXT    | [`NodeKind`] name                            |
//! | create_time   | INTEGER | logical creation time                        |
//! | updated_time  | INTEGER | logical time of the last attribute change    |
//! | attended_time | INTEGER | logical time the agent last attended to it   |
//! | is_snapshot   | INTEGER | `1` for read-only archive copies             |
//!
//! Attribute tables reference `Memories(uuid)` with `ON DELETE CASCADE`.
//! Every write is committed before the call returns; multi-statement writes
//! run in one transaction.

use crate::clock::Clock;
use crate::error::MemoryError;
use crate::nodes::{NodeAttrs, SpatialAttrs, copy_attrs, delete_attrs, insert_attrs, load_attrs};
use crate::triples::{NodeRef, Role, insert_triple, remove_by_entity};
use locus_types::{MemId, NodeKind, Timestamp};
use rusqlite::{Connection, OptionalExtension, Params, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace};

const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS Memories (
    uuid          TEXT    NOT NULL PRIMARY KEY,
    node_type     TEXT    NOT NULL,
    create_time   INTEGER NOT NULL,
    updated_time  INTEGER NOT NULL,
    attended_time INTEGER NOT NULL,
    is_snapshot   INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS memories_kind_attended ON Memories(node_type, attended_time);

CREATE TABLE IF NOT EXISTS ReferenceObjects (
    uuid      TEXT NOT NULL PRIMARY KEY REFERENCES Memories(uuid) ON DELETE CASCADE,
    eid       INTEGER,
    x         REAL NOT NULL,
    y         REAL NOT NULL,
    z         REAL NOT NULL,
    yaw       REAL NOT NULL DEFAULT 0,
    pitch     REAL NOT NULL DEFAULT 0,
    name      TEXT,
    type_name TEXT,
    attender  TEXT
);
CREATE INDEX IF NOT EXISTS reference_objects_eid ON ReferenceObjects(eid);

CREATE TABLE IF NOT EXISTS Chats (
    uuid    TEXT    NOT NULL PRIMARY KEY REFERENCES Memories(uuid) ON DELETE CASCADE,
    speaker TEXT    NOT NULL,
    chat    TEXT    NOT NULL,
    time    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Tasks (
    uuid        TEXT    NOT NULL PRIMARY KEY REFERENCES Memories(uuid) ON DELETE CASCADE,
    action_name TEXT    NOT NULL,
    payload     TEXT    NOT NULL,
    paused      INTEGER NOT NULL DEFAULT 0,
    created_at  INTEGER NOT NULL,
    finished_at INTEGER NOT NULL DEFAULT -1
);
CREATE INDEX IF NOT EXISTS tasks_state ON Tasks(finished_at, paused, created_at);

CREATE TABLE IF NOT EXISTS Programs (
    uuid         TEXT    NOT NULL PRIMARY KEY REFERENCES Memories(uuid) ON DELETE CASCADE,
    logical_form TEXT    NOT NULL,
    recorded_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS NamedAbstractions (
    uuid TEXT NOT NULL PRIMARY KEY REFERENCES Memories(uuid) ON DELETE CASCADE,
    name TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS named_abstractions_name ON NamedAbstractions(name);

CREATE TABLE IF NOT EXISTS Times (
    uuid TEXT    NOT NULL PRIMARY KEY REFERENCES Memories(uuid) ON DELETE CASCADE,
    time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS Triples (
    uuid       TEXT NOT NULL PRIMARY KEY,
    subj       TEXT NOT NULL,
    subj_text  TEXT,
    pred       TEXT NOT NULL,
    pred_text  TEXT NOT NULL,
    obj        TEXT NOT NULL,
    obj_text   TEXT,
    confidence REAL NOT NULL DEFAULT 1.0
);
CREATE INDEX IF NOT EXISTS triples_subj ON Triples(subj, pred_text);
CREATE INDEX IF NOT EXISTS triples_obj ON Triples(obj, pred_text);
CREATE INDEX IF NOT EXISTS triples_pred_obj_text ON Triples(pred_text, obj_text);
";

/// Execute a write, logging its SQL under the `locus_memory::sql` target.
pub(crate) fn write<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<usize> {
    trace!(target: "locus_memory::sql", sql = sql.trim(), "write");
    conn.execute(sql, params)
}

pub(crate) fn insert_memory(
    conn: &Connection,
    kind: NodeKind,
    now: Timestamp,
    snapshot: bool,
) -> Result<MemId, MemoryError> {
    let id = MemId::generate();
    insert_memory_with_id(conn, &id, kind, now, snapshot)?;
    Ok(id)
}

fn insert_memory_with_id(
    conn: &Connection,
    id: &MemId,
    kind: NodeKind,
    now: Timestamp,
    snapshot: bool,
) -> Result<(), MemoryError> {
    write(
        conn,
        "INSERT INTO Memories (uuid, node_type, create_time, updated_time, attended_time, is_snapshot)
         VALUES (?1, ?2, ?3, ?3, ?3, ?4)",
        params![id.as_str(), kind.as_str(), now, snapshot],
    )?;
    Ok(())
}

pub(crate) fn kind_of(conn: &Connection, id: &MemId) -> Result<Option<NodeKind>, MemoryError> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT node_type FROM Memories WHERE uuid = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    match kind {
        Some(k) => k
            .parse::<NodeKind>()
            .map(Some)
            .map_err(|e| MemoryError::InvalidReference(e.to_string())),
        None => Ok(None),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One entity: its `Memories` row together with its typed attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: MemId,
    pub kind: NodeKind,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub attended_at: Timestamp,
    pub is_snapshot: bool,
    pub attrs: NodeAttrs,
}

struct MemoryRow {
    kind: NodeKind,
    created_at: Timestamp,
    updated_at: Timestamp,
    attended_at: Timestamp,
    is_snapshot: bool,
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRow> {
    let kind_str: String = row.get(0)?;
    let kind = kind_str.parse::<NodeKind>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(0, kind_str, rusqlite::types::Type::Text)
    })?;
    Ok(MemoryRow {
        kind,
        created_at: row.get(1)?,
        updated_at: row.get(2)?,
        attended_at: row.get(3)?,
        is_snapshot: row.get(4)?,
    })
}

pub(crate) fn load_record(conn: &Connection, id: &MemId) -> Result<Option<MemoryRecord>, MemoryError> {
    let row = conn
        .query_row(
            "SELECT node_type, create_time, updated_time, attended_time, is_snapshot
             FROM Memories WHERE uuid = ?1",
            params![id.as_str()],
            row_to_memory,
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };
    let attrs = load_attrs(conn, id, row.kind)?.ok_or_else(|| MemoryError::NotFound(id.clone()))?;
    Ok(Some(MemoryRecord {
        id: id.clone(),
        kind: row.kind,
        created_at: row.created_at,
        updated_at: row.updated_at,
        attended_at: row.attended_at,
        is_snapshot: row.is_snapshot,
        attrs,
    }))
}

pub(crate) fn snapshot_in(
    conn: &Connection,
    id: &MemId,
    now: Timestamp,
) -> Result<MemId, MemoryError> {
    let kind = kind_of(conn, id)?.ok_or_else(|| MemoryError::NoSuchMemory(id.clone()))?;
    let archive = insert_memory(conn, kind, now, true)?;
    copy_attrs(conn, kind, id, &archive)?;
    insert_triple(
        conn,
        now,
        &NodeRef::Id(archive.clone()),
        "_archive_of",
        &NodeRef::Id(id.clone()),
        1.0,
    )?;
    insert_triple(
        conn,
        now,
        &NodeRef::Id(id.clone()),
        "_has_archive",
        &NodeRef::Id(archive.clone()),
        1.0,
    )?;
    Ok(archive)
}

pub(crate) fn hard_delete(conn: &Connection, id: &MemId) -> Result<bool, MemoryError> {
    if id.is_self() {
        return Err(MemoryError::ReservedEntity(id.clone()));
    }
    let removed = write(conn, "DELETE FROM Memories WHERE uuid = ?1", params![id.as_str()])?;
    remove_by_entity(conn, id, Role::Both)?;
    Ok(removed > 0)
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentMemory
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed agent memory.
///
/// The connection sits behind a [`Mutex`], so a single handle can be shared
/// (e.g. through an `Arc`) by the interpreter, perception writers and the
/// task executor; each call holds the lock for its whole read or write.
pub struct AgentMemory {
    conn: Mutex<Connection>,
    clock: Clock,
    self_id: MemId,
}

impl AgentMemory {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        let conn = Connection::open(path.as_ref())?;
        let store = Self::init(conn)?;
        info!(
            path = %path.as_ref().display(),
            now = store.now(),
            world_time = %store.clock.world_time(),
            "agent memory opened"
        );
        Ok(store)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, MemoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, MemoryError> {
        conn.execute_batch(SCHEMA)?;
        let resume_at: Timestamp = conn.query_row(
            "SELECT COALESCE(MAX(t), 0) FROM (
                 SELECT MAX(create_time) AS t FROM Memories
                 UNION ALL SELECT MAX(updated_time) FROM Memories
                 UNION ALL SELECT MAX(attended_time) FROM Memories
                 UNION ALL SELECT MAX(finished_at) FROM Tasks
             )",
            [],
            |row| row.get(0),
        )?;
        let store = Self {
            conn: Mutex::new(conn),
            clock: Clock::starting_at(resume_at),
            self_id: MemId::self_id(),
        };
        store.bootstrap_self()?;
        Ok(store)
    }

    /// Create the reserved self entity once per store.
    fn bootstrap_self(&self) -> Result<(), MemoryError> {
        let id = self.self_id.clone();
        let now = self.now();
        self.with_tx(|conn| {
            if kind_of(conn, &id)?.is_some() {
                return Ok(());
            }
            insert_memory_with_id(conn, &id, NodeKind::SelfNode, now, false)?;
            insert_attrs(conn, &id, &NodeAttrs::Spatial(SpatialAttrs::default()), now)?;
            for tag in ["_agent", "_self"] {
                insert_triple(conn, now, &NodeRef::Id(id.clone()), "has_tag", &NodeRef::text(tag), 1.0)?;
            }
            debug!(memid = %id, "self entity created");
            Ok(())
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, MemoryError> {
        self.conn.lock().map_err(|_| MemoryError::Poisoned)
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let conn = self.lock()?;
        f(&conn)
    }

    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Time ─────────────────────────────────────────────────────────────────

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn add_tick(&self, n: i64) -> Timestamp {
        self.clock.add_tick(n)
    }

    /// Count each unit passed to [`AgentMemory::round_time`] as
    /// `ticks_per_unit` ticks.
    pub fn with_time_resolution(mut self, ticks_per_unit: i64) -> Self {
        self.clock = std::mem::take(&mut self.clock).with_resolution(ticks_per_unit);
        self
    }

    /// A span of `units` in ticks. Recency windows go through this.
    pub fn round_time(&self, units: i64) -> i64 {
        self.clock.round_time(units)
    }

    /// The reserved id of the agent's own entity.
    pub fn self_id(&self) -> MemId {
        self.self_id.clone()
    }

    // ── CRUD ─────────────────────────────────────────────────────────────────

    /// Create an entity of `kind` with `attrs` and return its fresh id.
    pub fn create(&self, kind: NodeKind, attrs: NodeAttrs) -> Result<MemId, MemoryError> {
        if !attrs.fits(kind) {
            return Err(MemoryError::InvalidReference(format!(
                "{} attributes cannot describe a {kind}",
                attrs.natural_kind()
            )));
        }
        let now = self.now();
        let id = self.with_tx(|conn| {
            let id = insert_memory(conn, kind, now, false)?;
            insert_attrs(conn, &id, &attrs, now)?;
            Ok(id)
        })?;
        debug!(memid = %id, kind = %kind, "memory created");
        Ok(id)
    }

    /// Read an entity; `None` when the id is unknown.
    pub fn read(&self, id: &MemId) -> Result<Option<MemoryRecord>, MemoryError> {
        self.with_conn(|conn| load_record(conn, id))
    }

    /// Read an entity that must exist.
    pub fn get(&self, id: &MemId) -> Result<MemoryRecord, MemoryError> {
        self.read(id)?.ok_or_else(|| MemoryError::NotFound(id.clone()))
    }

    pub fn exists(&self, id: &MemId) -> Result<bool, MemoryError> {
        Ok(self.node_kind(id)?.is_some())
    }

    pub fn node_kind(&self, id: &MemId) -> Result<Option<NodeKind>, MemoryError> {
        self.with_conn(|conn| kind_of(conn, id))
    }

    /// Replace the attributes of a live entity.
    ///
    /// Snapshots and finished tasks are read-only.
    pub fn update(&self, id: &MemId, attrs: NodeAttrs) -> Result<(), MemoryError> {
        let now = self.now();
        self.with_tx(|conn| {
            let rec = load_record(conn, id)?.ok_or_else(|| MemoryError::NotFound(id.clone()))?;
            if !attrs.fits(rec.kind) {
                return Err(MemoryError::KindMismatch {
                    id: id.clone(),
                    expected: rec.kind,
                    actual: attrs.natural_kind(),
                });
            }
            if rec.is_snapshot {
                return Err(MemoryError::InvalidReference(format!(
                    "{id} is a snapshot and cannot be changed"
                )));
            }
            if rec.attrs.as_task().is_some_and(|t| t.finished_at.is_some()) {
                return Err(MemoryError::TaskFinished(id.clone()));
            }
            delete_attrs(conn, id, rec.kind)?;
            insert_attrs(conn, id, &attrs, rec.created_at)?;
            write(
                conn,
                "UPDATE Memories SET updated_time = ?2 WHERE uuid = ?1",
                params![id.as_str(), now],
            )?;
            Ok(())
        })
    }

    /// Forget an entity.
    ///
    /// A soft delete only tags the entity `_forgotten`. A hard delete removes
    /// the entity and every triple naming it as subject or object.
    pub fn delete(&self, id: &MemId, hard: bool) -> Result<(), MemoryError> {
        if !hard {
            self.tag(id, "_forgotten")?;
            debug!(memid = %id, "memory soft-deleted");
            return Ok(());
        }
        let removed = self.with_tx(|conn| hard_delete(conn, id))?;
        debug!(memid = %id, removed, "memory hard-deleted");
        Ok(())
    }

    /// Archive the current state of `id` and return the archive's id.
    pub fn snapshot(&self, id: &MemId) -> Result<MemId, MemoryError> {
        let now = self.now();
        let archive = self.with_tx(|conn| snapshot_in(conn, id, now))?;
        debug!(memid = %id, archive = %archive, "memory snapshotted");
        Ok(archive)
    }

    /// Live entities of `kind` attended within `window` ticks, most recent
    /// first.
    pub fn find_by_kind_and_recency(
        &self,
        kind: NodeKind,
        window: i64,
    ) -> Result<Vec<MemId>, MemoryError> {
        let since = self.now() - window;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT uuid FROM Memories
                 WHERE node_type = ?1 AND attended_time >= ?2 AND is_snapshot = 0
                 ORDER BY attended_time DESC, rowid DESC",
            )?;
            let rows = stmt.query_map(params![kind.as_str(), since], |row| {
                row.get::<_, String>(0).map(MemId::from)
            })?;
            let ids = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// "Look at" an entity: refresh its attended time and archive the state
    /// the agent saw. Returns the archive's id.
    pub fn mark_attended(&self, id: &MemId) -> Result<MemId, MemoryError> {
        let now = self.now();
        self.with_tx(|conn| {
            let changed = write(
                conn,
                "UPDATE Memories SET attended_time = ?2 WHERE uuid = ?1",
                params![id.as_str(), now],
            )?;
            if changed == 0 {
                return Err(MemoryError::NoSuchMemory(id.clone()));
            }
            snapshot_in(conn, id, now)
        })
    }

    pub fn set_attended(&self, id: &MemId) -> Result<(), MemoryError> {
        self.touch(id, "attended_time")
    }

    pub fn set_updated(&self, id: &MemId) -> Result<(), MemoryError> {
        self.touch(id, "updated_time")
    }

    fn touch(&self, id: &MemId, column: &str) -> Result<(), MemoryError> {
        let now = self.now();
        let sql = format!("UPDATE Memories SET {column} = ?2 WHERE uuid = ?1");
        self.with_conn(|conn| {
            if write(conn, &sql, params![id.as_str(), now])? == 0 {
                return Err(MemoryError::NotFound(id.clone()));
            }
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::ChatAttrs;
    use crate::triples::TripleQuery;
    use locus_types::Position;

    fn mem() -> AgentMemory {
        AgentMemory::open_in_memory().unwrap()
    }

    #[test]
    fn self_entity_exists_and_is_tagged() {
        let m = mem();
        let me = m.self_id();
        assert_eq!(m.node_kind(&me).unwrap(), Some(NodeKind::SelfNode));
        let tags = m.get_tags(&me).unwrap();
        assert!(tags.contains(&"_agent".to_string()));
        assert!(tags.contains(&"_self".to_string()));
    }

    #[test]
    fn read_returns_created_attrs_unchanged() {
        let m = mem();
        let attrs = NodeAttrs::Spatial(SpatialAttrs {
            name: Some("chair".into()),
            yaw: 0.5,
            ..SpatialAttrs::at(Position::new(1.0, 2.0, 3.0))
        });
        let id = m.create(NodeKind::ReferenceObject, attrs.clone()).unwrap();
        let rec = m.get(&id).unwrap();
        assert_eq!(rec.attrs, attrs);
        assert_eq!(rec.kind, NodeKind::ReferenceObject);
        assert!(!rec.is_snapshot);
    }

    #[test]
    fn create_rejects_attrs_of_another_kind() {
        let m = mem();
        let err = m
            .create(NodeKind::Chat, NodeAttrs::Time { time: 3 })
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReference(_)));
        let id = m.add_location(Position::default()).unwrap();
        let err = m.update(&id, NodeAttrs::Time { time: 1 }).unwrap_err();
        assert!(matches!(err, MemoryError::KindMismatch { .. }));
    }

    #[test]
    fn read_unknown_id_is_absent() {
        let m = mem();
        let missing = MemId::generate();
        assert!(m.read(&missing).unwrap().is_none());
        assert!(matches!(m.get(&missing), Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn update_replaces_attrs_and_bumps_updated_time() {
        let m = mem();
        let id = m.add_location(Position::default()).unwrap();
        m.add_tick(5);
        m.update(&id, NodeAttrs::Spatial(SpatialAttrs::at(Position::new(9.0, 0.0, 0.0))))
            .unwrap();
        let rec = m.get(&id).unwrap();
        assert_eq!(rec.updated_at, 5);
        assert_eq!(rec.created_at, 0);
        assert_eq!(rec.attrs.as_spatial().unwrap().pos.x, 9.0);
    }

    #[test]
    fn snapshot_copies_without_touching_original() {
        let m = mem();
        let id = m.add_location(Position::new(1.0, 1.0, 1.0)).unwrap();
        let before = m.get(&id).unwrap();
        m.add_tick(1);
        let archive = m.snapshot(&id).unwrap();

        assert_eq!(m.get(&id).unwrap(), before);
        let snap = m.get(&archive).unwrap();
        assert!(snap.is_snapshot);
        assert_eq!(snap.attrs, before.attrs);

        let has = m
            .query(&TripleQuery::subject(id.clone()).pred("_has_archive"))
            .unwrap();
        assert_eq!(has.len(), 1);
        assert_eq!(has[0].obj, archive);
        let of = m
            .query(
                &TripleQuery::subject(archive.clone())
                    .pred("_archive_of")
                    .including_snapshots(),
            )
            .unwrap();
        assert_eq!(of[0].obj, id);

        let recent = m.find_by_kind_and_recency(NodeKind::Location, 100).unwrap();
        assert_eq!(recent, vec![id]);
    }

    #[test]
    fn snapshot_of_missing_entity_fails() {
        let m = mem();
        let err = m.snapshot(&MemId::generate()).unwrap_err();
        assert!(matches!(err, MemoryError::NoSuchMemory(_)));
    }

    #[test]
    fn snapshots_are_read_only() {
        let m = mem();
        let id = m.add_location(Position::default()).unwrap();
        let archive = m.snapshot(&id).unwrap();
        let err = m
            .update(&archive, NodeAttrs::Spatial(SpatialAttrs::default()))
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidReference(_)));
    }

    #[test]
    fn soft_delete_only_tags() {
        let m = mem();
        let id = m.add_location(Position::default()).unwrap();
        m.delete(&id, false).unwrap();
        assert!(m.read(&id).unwrap().is_some());
        assert!(m.get_tags(&id).unwrap().contains(&"_forgotten".to_string()));
    }

    #[test]
    fn hard_delete_removes_entity_and_its_triples() {
        let m = mem();
        let a = m.add_location(Position::default()).unwrap();
        let b = m.add_location(Position::new(1.0, 0.0, 0.0)).unwrap();
        m.add_triple(NodeRef::Id(a.clone()), "near", NodeRef::Id(b.clone()), 1.0)
            .unwrap();
        m.add_triple(NodeRef::Id(b.clone()), "near", NodeRef::Id(a.clone()), 1.0)
            .unwrap();
        m.delete(&a, true).unwrap();
        assert!(m.read(&a).unwrap().is_none());
        assert!(m.read(&b).unwrap().is_some());
        assert!(m.query(&TripleQuery::any().pred("near")).unwrap().is_empty());
    }

    #[test]
    fn self_entity_cannot_be_hard_deleted() {
        let m = mem();
        let err = m.delete(&m.self_id(), true).unwrap_err();
        assert!(matches!(err, MemoryError::ReservedEntity(_)));
    }

    #[test]
    fn recency_window_filters_by_attended_time() {
        let m = mem();
        let old = m.add_location(Position::default()).unwrap();
        m.add_tick(50);
        let fresh = m.add_location(Position::default()).unwrap();
        assert_eq!(
            m.find_by_kind_and_recency(NodeKind::Location, 10).unwrap(),
            vec![fresh.clone()]
        );
        m.add_tick(1);
        let archive = m.mark_attended(&old).unwrap();
        let found = m.find_by_kind_and_recency(NodeKind::Location, 10).unwrap();
        assert_eq!(found, vec![old.clone(), fresh]);
        assert!(!found.contains(&archive));
        assert_eq!(m.get(&old).unwrap().attended_at, 51);
    }

    #[test]
    fn time_resolution_scales_recency_windows() {
        let m = AgentMemory::open_in_memory().unwrap().with_time_resolution(10);
        let old = m.add_location(Position::default()).unwrap();
        m.add_tick(25);
        assert_eq!(m.round_time(3), 30);
        assert_eq!(
            m.find_by_kind_and_recency(NodeKind::Location, m.round_time(3)).unwrap(),
            vec![old]
        );
        assert!(
            m.find_by_kind_and_recency(NodeKind::Location, m.round_time(2))
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn chat_attrs_round_trip_through_generic_create() {
        let m = mem();
        let attrs = NodeAttrs::Chat(ChatAttrs {
            speaker: m.self_id(),
            text: "hi".into(),
            time: 77,
        });
        let id = m.create(NodeKind::Chat, attrs.clone()).unwrap();
        assert_eq!(m.get(&id).unwrap().attrs, attrs);
    }

    #[test]
    fn reopened_store_resumes_its_clock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.db");
        {
            let m = AgentMemory::open(&path).unwrap();
            m.add_tick(10);
            m.add_location(Position::default()).unwrap();
        }
        let m = AgentMemory::open(&path).unwrap();
        assert_eq!(m.now(), 10);
        assert_eq!(m.node_kind(&m.self_id()).unwrap(), Some(NodeKind::SelfNode));
    }
}
