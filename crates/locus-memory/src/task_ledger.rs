//! Task ledger: a stack-shaped view over `Task` entities.
//!
//! There is no separate stack structure. A task is *active* while
//! `finished_at < 0` and `paused = 0`; the top of the stack is the most
//! recently created active task. Lineage is stored as a
//! `_has_parent_task` triple from child to parent, and the chat that caused
//! a push is linked with a `chat_effect_` triple from chat to task.
//!
//! # Example
//!
//! ```rust
//! use locus_memory::AgentMemory;
//! use locus_types::{MoveTask, Position, TaskData};
//!
//! let memory = AgentMemory::open_in_memory().unwrap();
//! let step = |x| TaskData::Move(MoveTask::to(Position::new(x, 0.0, 0.0)));
//!
//! memory.add_tick(1);
//! let parent = memory.push(&step(1.0), None, None).unwrap();
//! memory.add_tick(1);
//! let child = memory.push(&step(2.0), Some(&parent.id), None).unwrap();
//!
//! assert_eq!(memory.peek().unwrap().unwrap().id, child.id);
//! assert_eq!(memory.parent_of(&child.id).unwrap(), Some(parent.id.clone()));
//! memory.pop().unwrap();
//! assert_eq!(memory.peek().unwrap().unwrap().id, parent.id);
//! ```

use crate::error::MemoryError;
use crate::nodes::{NodeAttrs, TaskAttrs, insert_attrs};
use crate::store::{AgentMemory, hard_delete, insert_memory, kind_of, write};
use crate::triples::{NodeRef, TripleQuery, insert_triple, query_in};
use locus_types::{MemId, NodeKind, TaskData, Timestamp};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

pub const HAS_PARENT_TASK: &str = "_has_parent_task";
pub const CHAT_EFFECT: &str = "chat_effect_";

// ─────────────────────────────────────────────────────────────────────────────
// TaskRecord
// ─────────────────────────────────────────────────────────────────────────────

/// One task activation on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: MemId,
    pub action_name: String,
    pub data: TaskData,
    pub paused: bool,
    pub created_at: Timestamp,
    /// `None` while the task is unfinished.
    pub finished_at: Option<Timestamp>,
}

impl TaskRecord {
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        !self.paused && !self.is_finished()
    }
}

const TASK_COLUMNS: &str = "T.uuid, T.action_name, T.payload, T.paused, T.created_at, T.finished_at";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRecord> {
    let id: String = row.get(0)?;
    let payload: String = row.get(2)?;
    let data: TaskData = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let finished_at: i64 = row.get(5)?;
    Ok(TaskRecord {
        id: MemId::from(id),
        action_name: row.get(1)?,
        data,
        paused: row.get(3)?,
        created_at: row.get(4)?,
        finished_at: (finished_at >= 0).then_some(finished_at),
    })
}

/// Run a task query over live (non-snapshot) tasks.
fn select_tasks(
    conn: &Connection,
    where_clause: &str,
    order: &str,
    args: Vec<SqlValue>,
) -> Result<Vec<TaskRecord>, MemoryError> {
    let sql = format!(
        "SELECT {TASK_COLUMNS} FROM Tasks T JOIN Memories M ON M.uuid = T.uuid
         WHERE M.is_snapshot = 0 AND {where_clause} ORDER BY {order}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args), row_to_task)?;
    let tasks = rows.collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

fn get_task_in(conn: &Connection, id: &MemId) -> Result<Option<TaskRecord>, MemoryError> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM Tasks T WHERE T.uuid = ?1"),
            params![id.as_str()],
            row_to_task,
        )
        .optional()?;
    Ok(task)
}

fn require_task(conn: &Connection, id: &MemId) -> Result<TaskRecord, MemoryError> {
    match kind_of(conn, id)? {
        None => Err(MemoryError::NotFound(id.clone())),
        Some(NodeKind::Task) => get_task_in(conn, id)?.ok_or_else(|| MemoryError::NotFound(id.clone())),
        Some(actual) => Err(MemoryError::KindMismatch {
            id: id.clone(),
            expected: NodeKind::Task,
            actual,
        }),
    }
}

fn parents_in(conn: &Connection, id: &MemId) -> Result<Vec<MemId>, MemoryError> {
    let triples = query_in(
        conn,
        &TripleQuery::subject(id.clone()).pred(HAS_PARENT_TASK),
    )?;
    Ok(triples.into_iter().map(|t| t.obj).collect())
}

fn parent_in(conn: &Connection, id: &MemId) -> Result<Option<MemId>, MemoryError> {
    let mut parents = parents_in(conn, id)?;
    match parents.len() {
        0 => Ok(None),
        1 => Ok(parents.pop()),
        _ => Err(MemoryError::MultipleParents {
            task: id.clone(),
            parents,
        }),
    }
}

fn child_ids_in(conn: &Connection, id: &MemId) -> Result<Vec<MemId>, MemoryError> {
    let triples = query_in(
        conn,
        &TripleQuery::any().pred(HAS_PARENT_TASK).object_id(id.clone()),
    )?;
    Ok(triples.into_iter().map(|t| t.subj).collect())
}

fn top_in(conn: &Connection) -> Result<Option<TaskRecord>, MemoryError> {
    let mut top = select_tasks(
        conn,
        "T.finished_at < 0 AND T.paused = 0",
        "T.created_at DESC, T.rowid DESC LIMIT 1",
        Vec::new(),
    )?;
    Ok(top.pop())
}

fn set_finished(conn: &Connection, id: &MemId, now: Timestamp) -> Result<(), MemoryError> {
    write(
        conn,
        "UPDATE Tasks SET finished_at = ?2 WHERE uuid = ?1",
        params![id.as_str(), now],
    )?;
    write(
        conn,
        "UPDATE Memories SET updated_time = ?2 WHERE uuid = ?1",
        params![id.as_str(), now],
    )?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Ledger operations
// ─────────────────────────────────────────────────────────────────────────────

impl AgentMemory {
    /// Record a new task activation at the current time.
    ///
    /// Callers advance the clock before each push so that creation order is
    /// recoverable from `created_at`.
    pub fn push(
        &self,
        data: &TaskData,
        parent: Option<&MemId>,
        caused_by_chat: Option<&MemId>,
    ) -> Result<TaskRecord, MemoryError> {
        let now = self.now();
        let record = self.with_tx(|conn| {
            let newest: Option<i64> = conn.query_row("SELECT MAX(created_at) FROM Tasks", [], |row| {
                row.get(0)
            })?;
            if newest.is_some_and(|t| t >= now) {
                warn!(now, "task pushed without advancing the clock");
            }
            if let Some(p) = parent {
                require_task(conn, p)?;
            }
            let id = insert_memory(conn, NodeKind::Task, now, false)?;
            insert_attrs(conn, &id, &NodeAttrs::Task(TaskAttrs::fresh(data.clone())), now)?;
            if let Some(p) = parent {
                insert_triple(conn, now, &NodeRef::Id(id.clone()), HAS_PARENT_TASK, &NodeRef::Id(p.clone()), 1.0)?;
            }
            if let Some(chat) = caused_by_chat {
                insert_triple(conn, now, &NodeRef::Id(chat.clone()), CHAT_EFFECT, &NodeRef::Id(id.clone()), 1.0)?;
            }
            Ok(TaskRecord {
                id,
                action_name: data.action_name().to_string(),
                data: data.clone(),
                paused: false,
                created_at: now,
                finished_at: None,
            })
        })?;
        debug!(memid = %record.id, action = %record.action_name, "task pushed");
        Ok(record)
    }

    /// The most recently created active task.
    pub fn peek(&self) -> Result<Option<TaskRecord>, MemoryError> {
        self.with_conn(top_in)
    }

    /// Finish the top of the stack and return it.
    ///
    /// The lookup and the update share one transaction, so concurrent
    /// callers never finish the same task twice.
    pub fn pop(&self) -> Result<TaskRecord, MemoryError> {
        let now = self.now();
        let mut task = self.with_tx(|conn| {
            let task = top_in(conn)?.ok_or(MemoryError::EmptyStack)?;
            set_finished(conn, &task.id, now)?;
            Ok(task)
        })?;
        task.finished_at = Some(now);
        debug!(memid = %task.id, "task popped");
        Ok(task)
    }

    /// Finish a specific unfinished task.
    pub fn finish(&self, id: &MemId) -> Result<TaskRecord, MemoryError> {
        let now = self.now();
        let mut task = self.with_tx(|conn| {
            let task = require_task(conn, id)?;
            if task.is_finished() {
                return Err(MemoryError::TaskFinished(id.clone()));
            }
            set_finished(conn, id, now)?;
            Ok(task)
        })?;
        task.finished_at = Some(now);
        debug!(memid = %id, "task finished");
        Ok(task)
    }

    /// Pause every active task. Returns whether anything was paused.
    pub fn pause_all(&self) -> Result<bool, MemoryError> {
        self.with_conn(|conn| {
            let changed = write(
                conn,
                "UPDATE Tasks SET paused = 1
                 WHERE finished_at < 0 AND paused = 0
                   AND uuid IN (SELECT uuid FROM Memories WHERE is_snapshot = 0)",
                [],
            )?;
            Ok(changed > 0)
        })
    }

    /// Unpause every paused unfinished task. Returns whether anything
    /// was resumed.
    pub fn resume_all(&self) -> Result<bool, MemoryError> {
        self.with_conn(|conn| {
            let changed = write(
                conn,
                "UPDATE Tasks SET paused = 0
                 WHERE finished_at < 0 AND paused = 1
                   AND uuid IN (SELECT uuid FROM Memories WHERE is_snapshot = 0)",
                [],
            )?;
            Ok(changed > 0)
        })
    }

    /// Hard-forget every unfinished task. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, MemoryError> {
        let removed = self.with_tx(|conn| {
            let ids: Vec<MemId> = select_tasks(conn, "T.finished_at < 0", "T.created_at ASC", Vec::new())?
                .into_iter()
                .map(|t| t.id)
                .collect();
            let mut removed = 0;
            for id in &ids {
                if hard_delete(conn, id)? {
                    removed += 1;
                }
            }
            Ok(removed)
        })?;
        debug!(removed, "task stack cleared");
        Ok(removed)
    }

    /// Earliest-created active task whose action name is in `action_names`.
    pub fn find_lowest(&self, action_names: &[&str]) -> Result<Option<TaskRecord>, MemoryError> {
        if action_names.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; action_names.len()].join(", ");
        let args: Vec<SqlValue> = action_names
            .iter()
            .map(|n| SqlValue::Text(n.to_string()))
            .collect();
        self.with_conn(|conn| {
            let mut lowest = select_tasks(
                conn,
                &format!("T.finished_at < 0 AND T.paused = 0 AND T.action_name IN ({placeholders})"),
                "T.created_at ASC, T.rowid ASC LIMIT 1",
                args,
            )?;
            Ok(lowest.pop())
        })
    }

    /// Active tasks, oldest first.
    pub fn all_active(&self) -> Result<Vec<TaskRecord>, MemoryError> {
        self.with_conn(|conn| {
            select_tasks(
                conn,
                "T.finished_at < 0 AND T.paused = 0",
                "T.created_at ASC, T.rowid ASC",
                Vec::new(),
            )
        })
    }

    /// Unfinished tasks, paused or not, oldest first.
    pub fn unfinished(&self) -> Result<Vec<TaskRecord>, MemoryError> {
        self.with_conn(|conn| {
            select_tasks(
                conn,
                "T.finished_at < 0",
                "T.created_at ASC, T.rowid ASC",
                Vec::new(),
            )
        })
    }

    /// Most recently created root task that finished within `window` ticks,
    /// optionally restricted to one action name. `None` when there is none.
    pub fn last_finished_root(
        &self,
        action_name: Option<&str>,
        window: i64,
    ) -> Result<Option<TaskRecord>, MemoryError> {
        let since = self.now() - window;
        let mut clause = "T.finished_at >= 0 AND T.finished_at >= ?".to_string();
        let mut args = vec![SqlValue::Integer(since)];
        if let Some(name) = action_name {
            clause.push_str(" AND T.action_name = ?");
            args.push(SqlValue::Text(name.to_string()));
        }
        self.with_conn(|conn| {
            let candidates = select_tasks(conn, &clause, "T.created_at DESC, T.rowid DESC", args)?;
            for task in candidates {
                if parents_in(conn, &task.id)?.is_empty() {
                    return Ok(Some(task));
                }
            }
            Ok(None)
        })
    }

    /// Breadth-first walk down the parent links of `id`, stably sorted by
    /// finish time (unfinished tasks first).
    pub fn descendants(&self, id: &MemId, include_root: bool) -> Result<Vec<TaskRecord>, MemoryError> {
        self.with_conn(|conn| {
            let root = require_task(conn, id)?;
            let mut out = Vec::new();
            if include_root {
                out.push(root);
            }
            let mut seen: HashSet<MemId> = HashSet::from([id.clone()]);
            let mut queue: VecDeque<MemId> = VecDeque::from([id.clone()]);
            while let Some(next) = queue.pop_front() {
                for child in child_ids_in(conn, &next)? {
                    if !seen.insert(child.clone()) {
                        continue;
                    }
                    if let Some(task) = get_task_in(conn, &child)? {
                        out.push(task);
                    }
                    queue.push_back(child);
                }
            }
            out.sort_by_key(|t| t.finished_at.unwrap_or(-1));
            Ok(out)
        })
    }

    /// Persist new state for an unfinished task.
    pub fn update_task(&self, id: &MemId, data: &TaskData) -> Result<(), MemoryError> {
        let now = self.now();
        let payload = serde_json::to_string(data)?;
        self.with_tx(|conn| {
            let task = require_task(conn, id)?;
            if task.is_finished() {
                return Err(MemoryError::TaskFinished(id.clone()));
            }
            write(
                conn,
                "UPDATE Tasks SET action_name = ?2, payload = ?3 WHERE uuid = ?1",
                params![id.as_str(), data.action_name(), payload],
            )?;
            write(
                conn,
                "UPDATE Memories SET updated_time = ?2 WHERE uuid = ?1",
                params![id.as_str(), now],
            )?;
            Ok(())
        })
    }

    pub fn get_task(&self, id: &MemId) -> Result<Option<TaskRecord>, MemoryError> {
        self.with_conn(|conn| get_task_in(conn, id))
    }

    /// The parent task of `id`, if it has one.
    pub fn parent_of(&self, id: &MemId) -> Result<Option<MemId>, MemoryError> {
        self.with_conn(|conn| parent_in(conn, id))
    }

    /// Attach `child` under `parent`. A task has at most one parent.
    pub fn link_parent(&self, child: &MemId, parent: &MemId) -> Result<(), MemoryError> {
        if child == parent {
            return Err(MemoryError::InvalidReference(format!(
                "task {child} cannot be its own parent"
            )));
        }
        let now = self.now();
        self.with_tx(|conn| {
            require_task(conn, child)?;
            require_task(conn, parent)?;
            let mut parents = parents_in(conn, child)?;
            if !parents.is_empty() {
                parents.push(parent.clone());
                return Err(MemoryError::MultipleParents {
                    task: child.clone(),
                    parents,
                });
            }
            insert_triple(conn, now, &NodeRef::Id(child.clone()), HAS_PARENT_TASK, &NodeRef::Id(parent.clone()), 1.0)?;
            Ok(())
        })
    }

    /// Direct children of `id`, oldest first.
    pub fn children_of(&self, id: &MemId) -> Result<Vec<TaskRecord>, MemoryError> {
        self.with_conn(|conn| {
            let mut children = Vec::new();
            for child in child_ids_in(conn, id)? {
                if let Some(task) = get_task_in(conn, &child)? {
                    children.push(task);
                }
            }
            children.sort_by_key(|t| t.created_at);
            Ok(children)
        })
    }

    /// Follow parent links up to the root of `id`'s lineage.
    pub fn root_of(&self, id: &MemId) -> Result<MemId, MemoryError> {
        self.with_conn(|conn| {
            require_task(conn, id)?;
            let mut current = id.clone();
            let mut seen = HashSet::from([current.clone()]);
            while let Some(parent) = parent_in(conn, &current)? {
                if !seen.insert(parent.clone()) {
                    return Err(MemoryError::InvalidReference(format!(
                        "task lineage of {id} is cyclic"
                    )));
                }
                current = parent;
            }
            Ok(current)
        })
    }

    /// The chat whose command caused `id` to be pushed.
    pub fn chat_of(&self, id: &MemId) -> Result<Option<MemId>, MemoryError> {
        let triples = self.query(&TripleQuery::any().pred(CHAT_EFFECT).object_id(id.clone()))?;
        Ok(triples.into_iter().next().map(|t| t.subj))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use locus_types::{MoveTask, Position};
    use serde_json::json;

    fn mem() -> AgentMemory {
        AgentMemory::open_in_memory().unwrap()
    }

    fn mv(x: f64) -> TaskData {
        TaskData::Move(MoveTask::to(Position::new(x, 0.0, 0.0)))
    }

    fn push(m: &AgentMemory, data: TaskData, parent: Option<&MemId>) -> TaskRecord {
        m.add_tick(1);
        m.push(&data, parent, None).unwrap()
    }

    #[test]
    fn stack_is_reverse_creation_order() {
        let m = mem();
        let a = push(&m, mv(1.0), None);
        let b = push(&m, mv(2.0), None);
        let c = push(&m, mv(3.0), None);
        assert_eq!(m.peek().unwrap().unwrap().id, c.id);
        assert_eq!(m.pop().unwrap().id, c.id);
        assert_eq!(m.peek().unwrap().unwrap().id, b.id);
        let active: Vec<_> = m.all_active().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(active, vec![a.id, b.id]);
    }

    #[test]
    fn pop_on_empty_stack_is_an_error() {
        let m = mem();
        assert!(m.peek().unwrap().is_none());
        assert!(matches!(m.pop(), Err(MemoryError::EmptyStack)));
    }

    #[test]
    fn concurrent_pops_finish_distinct_tasks() {
        use std::sync::Arc;
        let m = Arc::new(mem());
        for i in 0..200 {
            push(&m, mv(i as f64), None);
        }
        m.add_tick(1);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    let mut popped = Vec::new();
                    while let Ok(task) = m.pop() {
                        popped.push(task.id);
                    }
                    popped
                })
            })
            .collect();
        let popped: Vec<MemId> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();

        assert_eq!(popped.len(), 200);
        assert_eq!(popped.iter().collect::<HashSet<_>>().len(), 200);
        assert!(m.peek().unwrap().is_none());
    }

    #[test]
    fn pause_and_resume_report_changes_once() {
        let m = mem();
        push(&m, mv(1.0), None);
        push(&m, mv(2.0), None);
        assert!(m.pause_all().unwrap());
        assert!(!m.pause_all().unwrap());
        assert!(m.peek().unwrap().is_none());
        assert!(m.resume_all().unwrap());
        assert!(!m.resume_all().unwrap());
        assert_eq!(m.all_active().unwrap().len(), 2);
    }

    #[test]
    fn finished_tasks_stay_finished() {
        let m = mem();
        let a = push(&m, mv(1.0), None);
        m.finish(&a.id).unwrap();
        assert!(matches!(m.finish(&a.id), Err(MemoryError::TaskFinished(_))));
        assert!(matches!(m.update_task(&a.id, &mv(5.0)), Err(MemoryError::TaskFinished(_))));
        m.pause_all().unwrap();
        assert!(!m.get_task(&a.id).unwrap().unwrap().paused);
    }

    #[test]
    fn update_task_persists_new_state() {
        let m = mem();
        let a = push(&m, mv(1.0), None);
        let data = TaskData::Move(MoveTask {
            command_sent: true,
            ..MoveTask::to(Position::new(1.0, 0.0, 0.0))
        });
        m.update_task(&a.id, &data).unwrap();
        assert_eq!(m.get_task(&a.id).unwrap().unwrap().data, data);
    }

    #[test]
    fn find_lowest_picks_earliest_matching_active_task() {
        let m = mem();
        let ext = |name: &str| TaskData::external(name, json!({}));
        let dance = push(&m, ext("DANCE"), None);
        push(&m, mv(1.0), None);
        push(&m, ext("DANCE"), None);
        assert_eq!(m.find_lowest(&["DANCE"]).unwrap().unwrap().id, dance.id);
        m.finish(&dance.id).unwrap();
        assert_ne!(m.find_lowest(&["DANCE"]).unwrap().unwrap().id, dance.id);
        assert!(m.find_lowest(&["BUILD"]).unwrap().is_none());
        assert!(m.find_lowest(&[]).unwrap().is_none());
    }

    #[test]
    fn last_finished_root_skips_children_and_old_tasks() {
        let m = mem();
        let build = TaskData::external("BUILD", json!({"what": "house"}));
        let root = push(&m, build.clone(), None);
        let child = push(&m, mv(1.0), Some(&root.id));
        m.finish(&child.id).unwrap();
        m.finish(&root.id).unwrap();
        let found = m.last_finished_root(Some("BUILD"), 100).unwrap().unwrap();
        assert_eq!(found.id, root.id);
        assert!(m.last_finished_root(Some("MOVE"), 100).unwrap().is_none());
        m.add_tick(500);
        assert!(m.last_finished_root(None, 100).unwrap().is_none());
    }

    #[test]
    fn last_finished_root_is_absent_when_nothing_finished() {
        let m = mem();
        push(&m, mv(1.0), None);
        assert!(m.last_finished_root(None, 300).unwrap().is_none());
    }

    #[test]
    fn lineage_is_navigable_both_ways() {
        let m = mem();
        let p = push(&m, mv(1.0), None);
        let c = push(&m, mv(2.0), Some(&p.id));
        let g = push(&m, mv(3.0), Some(&c.id));
        let ids = |v: Vec<TaskRecord>| v.into_iter().map(|t| t.id).collect::<Vec<_>>();

        assert_eq!(m.parent_of(&c.id).unwrap(), Some(p.id.clone()));
        assert_eq!(m.parent_of(&p.id).unwrap(), None);
        assert_eq!(ids(m.children_of(&p.id).unwrap()), vec![c.id.clone()]);
        assert_eq!(m.root_of(&g.id).unwrap(), p.id);

        m.finish(&c.id).unwrap();
        m.add_tick(1);
        m.finish(&g.id).unwrap();
        assert_eq!(
            ids(m.descendants(&p.id, false).unwrap()),
            vec![c.id.clone(), g.id.clone()]
        );
        assert_eq!(ids(m.descendants(&p.id, true).unwrap())[0], p.id);
    }

    #[test]
    fn second_parent_is_rejected() {
        let m = mem();
        let p = push(&m, mv(1.0), None);
        let q = push(&m, mv(2.0), None);
        let c = push(&m, mv(3.0), Some(&p.id));
        let err = m.link_parent(&c.id, &q.id).unwrap_err();
        assert!(matches!(err, MemoryError::MultipleParents { .. }));
        assert_eq!(m.parent_of(&c.id).unwrap(), Some(p.id));
    }

    #[test]
    fn parent_of_flags_corrupt_lineage() {
        let m = mem();
        let p = push(&m, mv(1.0), None);
        let q = push(&m, mv(2.0), None);
        let c = push(&m, mv(3.0), Some(&p.id));
        m.add_triple(NodeRef::Id(c.id.clone()), HAS_PARENT_TASK, NodeRef::Id(q.id), 1.0)
            .unwrap();
        assert!(matches!(
            m.parent_of(&c.id),
            Err(MemoryError::MultipleParents { .. })
        ));
    }

    #[test]
    fn push_records_chat_provenance() {
        let m = mem();
        let chat = m.add_chat(&m.self_id(), "move").unwrap();
        m.add_tick(1);
        let t = m.push(&mv(1.0), None, Some(&chat)).unwrap();
        assert_eq!(m.chat_of(&t.id).unwrap(), Some(chat));
    }

    #[test]
    fn push_rejects_unknown_parent() {
        let m = mem();
        let err = m.push(&mv(1.0), Some(&MemId::generate()), None).unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn clear_forgets_unfinished_tasks_only() {
        let m = mem();
        let done = push(&m, mv(1.0), None);
        m.finish(&done.id).unwrap();
        push(&m, mv(2.0), None);
        push(&m, mv(3.0), None);
        m.pause_all().unwrap();
        assert_eq!(m.clear().unwrap(), 2);
        assert!(m.unfinished().unwrap().is_empty());
        assert!(m.get_task(&done.id).unwrap().is_some());
    }

    #[test]
    fn snapshotted_tasks_never_reach_the_stack() {
        let m = mem();
        let a = push(&m, mv(1.0), None);
        m.snapshot(&a.id).unwrap();
        assert_eq!(m.all_active().unwrap().len(), 1);
        assert!(m.pause_all().unwrap());
        assert!(m.resume_all().unwrap());
    }
}
