//! Task contract, built-in tasks and the reference executor.
//!
//! The ledger stores each task as plain [`TaskData`]. To step a task the
//! executor rebuilds a live [`Task`] from that data through the
//! [`TaskRegistry`], hands it an [`AgentHandle`] carrying every
//! collaborator, and then either persists the new state or finishes it.
//!
//! # Built-in tasks
//!
//! | Action | State | Behaviour |
//! |---|---|---|
//! | `MOVE` | [`MoveTask`] | sends one command to the [`Mover`], then polls until it arrives |
//! | `LOOP` | [`LoopTask`] | expands its factory into children until the stop condition holds |
//! | `UNDO` | [`UndoTask`] | pushes compensating tasks for a finished lineage |
//!
//! Anything else is an external task: the host registers a constructor for
//! its action name.
//!
//! ```rust
//! use locus_memory::AgentMemory;
//! use locus_runtime::tasks::{SimMover, TaskRunner};
//! use locus_runtime::Resolvers;
//! use locus_types::{MoveTask, Position, TaskData};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(AgentMemory::open_in_memory().unwrap());
//! let mover = Arc::new(SimMover::new(Arc::clone(&memory)));
//! let runner = TaskRunner::new(Arc::clone(&memory), Resolvers::basic(), mover);
//!
//! memory.add_tick(1);
//! memory.push(&TaskData::Move(MoveTask::to(Position::new(2.0, 0.0, 0.0))), None, None).unwrap();
//! runner.run_until_idle(10).unwrap();
//! assert_eq!(memory.position_of(&memory.self_id()).unwrap(), Some(Position::new(2.0, 0.0, 0.0)));
//! ```

use crate::resolvers::{ResolveContext, ResolveError, Resolvers};
use locus_memory::{AgentMemory, MemoryError, NodeRef, TaskRecord, TripleQuery};
use locus_types::{LoopTask, MemId, MoveTask, Position, TaskData, TaskFactory, UndoTask};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum TaskError {
    /// No constructor is registered for the action name.
    #[error("Unknown task: {0}")]
    UnknownTask(String),
    /// The persisted state cannot drive the task.
    #[error("Invalid task state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

// ─────────────────────────────────────────────────────────────────────────────
// Task contract
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators handed to a task for one step.
pub struct AgentHandle<'a> {
    pub memory: &'a AgentMemory,
    pub resolvers: &'a Resolvers,
    pub mover: &'a dyn Mover,
    pub registry: &'a TaskRegistry,
    /// Ledger id of the task being stepped.
    pub task_id: &'a MemId,
}

impl AgentHandle<'_> {
    /// Push `data` as a child of the task being stepped.
    pub fn push_child(&self, data: &TaskData) -> Result<TaskRecord, TaskError> {
        self.memory.add_tick(1);
        Ok(self.memory.push(data, Some(self.task_id), None)?)
    }
}

/// A live task rebuilt from its ledger state.
pub trait Task: Send {
    /// Advance by one step. May push children through `agent`.
    fn step(&mut self, agent: &AgentHandle<'_>) -> Result<(), TaskError>;

    fn finished(&self) -> bool;

    /// Set when the task gave up its step to something more urgent.
    fn interrupted(&self) -> bool {
        false
    }

    /// Current state, persisted between steps.
    fn to_data(&self) -> TaskData;

    /// Tasks that compensate for this one having run. Empty when the
    /// effect cannot be reversed.
    fn undo(&self, _agent: &AgentHandle<'_>) -> Result<Vec<TaskData>, TaskError> {
        Ok(Vec::new())
    }
}

/// Physical movement, implemented by the host.
pub trait Mover: Send + Sync {
    fn move_absolute(&self, target: Position) -> Result<(), TaskError>;
    fn move_relative(&self, offset: Position) -> Result<(), TaskError>;
    /// Advance the motion; `true` once it has completed.
    fn bot_step(&self) -> Result<bool, TaskError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Move
// ─────────────────────────────────────────────────────────────────────────────

pub struct Move {
    state: MoveTask,
    finished: bool,
}

impl Move {
    pub fn new(state: MoveTask) -> Self {
        Self {
            state,
            finished: false,
        }
    }
}

impl Task for Move {
    fn step(&mut self, agent: &AgentHandle<'_>) -> Result<(), TaskError> {
        if self.state.command_sent {
            self.finished = agent.mover.bot_step()?;
            return Ok(());
        }
        self.state.origin = agent.memory.position_of(&agent.memory.self_id())?;
        if self.state.is_relative {
            agent.mover.move_relative(self.state.target)?;
        } else {
            agent.mover.move_absolute(self.state.target)?;
        }
        self.state.command_sent = true;
        debug!(memid = %agent.task_id, target = ?self.state.target, "move command sent");
        Ok(())
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn to_data(&self) -> TaskData {
        TaskData::Move(self.state.clone())
    }

    fn undo(&self, _agent: &AgentHandle<'_>) -> Result<Vec<TaskData>, TaskError> {
        Ok(self
            .state
            .origin
            .map(|origin| TaskData::Move(MoveTask::to(origin)))
            .into_iter()
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

pub struct Loop {
    state: LoopTask,
    finished: bool,
}

impl Loop {
    pub fn new(state: LoopTask) -> Self {
        Self {
            state,
            finished: false,
        }
    }
}

impl Task for Loop {
    fn step(&mut self, agent: &AgentHandle<'_>) -> Result<(), TaskError> {
        let ctx = agent.resolvers.context(agent.memory, &self.state.speaker);
        let condition = agent
            .resolvers
            .conditions
            .resolve(&ctx, &self.state.stop_condition)?;
        if condition.check(agent.memory, self.state.iterations)? {
            info!(
                memid = %agent.task_id,
                condition = condition.name(),
                iterations = self.state.iterations,
                "loop stop condition met"
            );
            self.finished = true;
            return Ok(());
        }
        let pinned = loop_target(agent.memory, agent.task_id)?;
        for child in expand(&self.state.body, &ctx, pinned)? {
            agent.push_child(&child)?;
        }
        self.state.iterations += 1;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn to_data(&self) -> TaskData {
        TaskData::Loop(self.state.clone())
    }
}

/// Run a named factory. `pinned` replaces location resolution for
/// [`TaskFactory::MoveTo`].
pub fn expand(
    factory: &TaskFactory,
    ctx: &ResolveContext<'_>,
    pinned: Option<Position>,
) -> Result<Vec<TaskData>, ResolveError> {
    match factory {
        TaskFactory::MoveTo { location, .. } => move_to_tasks(ctx, location, pinned),
        TaskFactory::Repeat { tasks } => Ok(tasks.clone()),
    }
}

/// Resolve `location` into the movement tasks that reach it.
pub fn move_to_tasks(
    ctx: &ResolveContext<'_>,
    location: &Value,
    pinned: Option<Position>,
) -> Result<Vec<TaskData>, ResolveError> {
    let candidates = match pinned {
        Some(pos) => vec![pos],
        None => ctx.resolvers.locations.reference_positions(ctx, location)?,
    };
    let step = ctx.resolvers.relative_directions.resolve(location)?;
    let target = ctx
        .resolvers
        .locations
        .specify(ctx, &candidates, step.as_ref())?
        .ok_or_else(|| {
            ResolveError::Unresolvable("I don't understand where you want me to move.".to_string())
        })?;
    Ok(vec![TaskData::Move(MoveTask::to(target))])
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop targets
// ─────────────────────────────────────────────────────────────────────────────

/// Links a running loop to the location it keeps returning to.
pub const LOOP_TARGET: &str = "_loop_target";
/// A loop target set aside by STOP, restored by RESUME.
pub const ARCHIVED_LOOP_TARGET: &str = "_archived_loop_target";

/// Pin `pos` as the target of loop `loop_id`.
pub fn pin_loop_target(memory: &AgentMemory, loop_id: &MemId, pos: Position) -> Result<(), MemoryError> {
    let location = memory.add_location(pos)?;
    memory.add_triple(NodeRef::Id(loop_id.clone()), LOOP_TARGET, NodeRef::Id(location), 1.0)?;
    Ok(())
}

pub fn loop_target(memory: &AgentMemory, loop_id: &MemId) -> Result<Option<Position>, MemoryError> {
    let pinned = memory.query(&TripleQuery::subject(loop_id.clone()).pred(LOOP_TARGET))?;
    match pinned.last() {
        Some(t) => memory.position_of(&t.obj),
        None => Ok(None),
    }
}

/// Set every live loop target aside. Returns how many were archived.
pub fn archive_loop_targets(memory: &AgentMemory) -> Result<usize, MemoryError> {
    relabel(memory, LOOP_TARGET, ARCHIVED_LOOP_TARGET)
}

/// Bring archived loop targets back. Returns how many were restored.
pub fn restore_loop_targets(memory: &AgentMemory) -> Result<usize, MemoryError> {
    relabel(memory, ARCHIVED_LOOP_TARGET, LOOP_TARGET)
}

fn relabel(memory: &AgentMemory, from: &str, to: &str) -> Result<usize, MemoryError> {
    let triples = memory.query(&TripleQuery::any().pred(from))?;
    for t in &triples {
        memory.add_triple(NodeRef::Id(t.subj.clone()), to, NodeRef::Id(t.obj.clone()), t.confidence)?;
        memory.remove_triple(&t.id)?;
    }
    Ok(triples.len())
}

// ─────────────────────────────────────────────────────────────────────────────
// Undo
// ─────────────────────────────────────────────────────────────────────────────

pub struct Undo {
    state: UndoTask,
    finished: bool,
}

impl Undo {
    pub fn new(state: UndoTask) -> Self {
        Self {
            state,
            finished: false,
        }
    }
}

impl Task for Undo {
    fn step(&mut self, agent: &AgentHandle<'_>) -> Result<(), TaskError> {
        // Earliest-finished first, so the latest effect ends on top and is
        // reversed first.
        let lineage = agent.memory.descendants(&self.state.memid, true)?;
        let mut pushed = 0;
        for record in &lineage {
            let task = match agent.registry.build(&record.data) {
                Ok(task) => task,
                Err(TaskError::UnknownTask(name)) => {
                    warn!(memid = %record.id, action = %name, "cannot undo unregistered task");
                    continue;
                }
                Err(e) => return Err(e),
            };
            for compensation in task.undo(agent)? {
                agent.push_child(&compensation)?;
                pushed += 1;
            }
        }
        info!(target_task = %self.state.memid, pushed, "undo expanded");
        self.finished = true;
        Ok(())
    }

    fn finished(&self) -> bool {
        self.finished
    }

    fn to_data(&self) -> TaskData {
        TaskData::Undo(self.state.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

type Constructor = Box<dyn Fn(&Value) -> Result<Box<dyn Task>, TaskError> + Send + Sync>;

/// Rebuilds live tasks from ledger state.
#[derive(Default)]
pub struct TaskRegistry {
    external: HashMap<String, Constructor>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor for an external action name. A later
    /// registration for the same name replaces the earlier one.
    pub fn register<F>(&mut self, action_name: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Task>, TaskError> + Send + Sync + 'static,
    {
        self.external.insert(action_name.into(), Box::new(constructor));
    }

    pub fn knows(&self, action_name: &str) -> bool {
        matches!(action_name, "MOVE" | "LOOP" | "UNDO") || self.external.contains_key(action_name)
    }

    pub fn build(&self, data: &TaskData) -> Result<Box<dyn Task>, TaskError> {
        match data {
            TaskData::Move(state) => Ok(Box::new(Move::new(state.clone()))),
            TaskData::Loop(state) => Ok(Box::new(Loop::new(state.clone()))),
            TaskData::Undo(state) => Ok(Box::new(Undo::new(state.clone()))),
            TaskData::External { action_name, state } => {
                let constructor = self
                    .external
                    .get(action_name)
                    .ok_or_else(|| TaskError::UnknownTask(action_name.clone()))?;
                constructor(state)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of one [`TaskRunner::step_once`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub task: MemId,
    pub action_name: String,
    pub finished: bool,
    pub interrupted: bool,
    /// Set when the task failed and was finished to unblock the stack.
    pub failure: Option<String>,
}

/// Reference executor: steps the top of the ledger, one task per call.
pub struct TaskRunner {
    memory: Arc<AgentMemory>,
    resolvers: Resolvers,
    mover: Arc<dyn Mover>,
    registry: TaskRegistry,
}

impl TaskRunner {
    pub fn new(memory: Arc<AgentMemory>, resolvers: Resolvers, mover: Arc<dyn Mover>) -> Self {
        Self {
            memory,
            resolvers,
            mover,
            registry: TaskRegistry::new(),
        }
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry_mut(&mut self) -> &mut TaskRegistry {
        &mut self.registry
    }

    /// Peek, rebuild, step, then persist or finish. `None` when nothing is
    /// active.
    ///
    /// A task whose step fails for a reason other than store access is
    /// finished and reported, so one bad task cannot wedge the stack.
    pub fn step_once(&self) -> Result<Option<StepReport>, TaskError> {
        self.memory.add_tick(1);
        let Some(top) = self.memory.peek()? else {
            return Ok(None);
        };
        let outcome = self.registry.build(&top.data).and_then(|mut task| {
            let handle = AgentHandle {
                memory: &self.memory,
                resolvers: &self.resolvers,
                mover: self.mover.as_ref(),
                registry: &self.registry,
                task_id: &top.id,
            };
            task.step(&handle)?;
            Ok(task)
        });
        let task = match outcome {
            Ok(task) => task,
            Err(TaskError::Memory(e)) => return Err(TaskError::Memory(e)),
            Err(e) => {
                warn!(memid = %top.id, action = %top.action_name, error = %e, "task failed");
                self.memory.finish(&top.id)?;
                return Ok(Some(StepReport {
                    task: top.id,
                    action_name: top.action_name,
                    finished: true,
                    interrupted: false,
                    failure: Some(e.to_string()),
                }));
            }
        };
        let finished = task.finished();
        if finished {
            self.memory.finish(&top.id)?;
        } else {
            self.memory.update_task(&top.id, &task.to_data())?;
        }
        debug!(memid = %top.id, action = %top.action_name, finished, "task stepped");
        Ok(Some(StepReport {
            task: top.id,
            action_name: top.action_name,
            finished,
            interrupted: task.interrupted(),
            failure: None,
        }))
    }

    /// Step until the ledger has nothing active or `max_steps` is reached.
    /// Returns the number of steps taken.
    pub fn run_until_idle(&self, max_steps: usize) -> Result<usize, TaskError> {
        let mut steps = 0;
        while steps < max_steps {
            if self.step_once()?.is_none() {
                break;
            }
            steps += 1;
        }
        Ok(steps)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Simulated mover
// ─────────────────────────────────────────────────────────────────────────────

/// Teleporting [`Mover`]: the agent arrives on the first `bot_step` after a
/// command, and its self entity is moved in memory.
pub struct SimMover {
    memory: Arc<AgentMemory>,
    pending: Mutex<Option<Position>>,
}

impl SimMover {
    pub fn new(memory: Arc<AgentMemory>) -> Self {
        Self {
            memory,
            pending: Mutex::new(None),
        }
    }

    fn set_pending(&self, target: Position) -> Result<(), TaskError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| TaskError::InvalidState("mover lock poisoned".to_string()))?;
        *pending = Some(target);
        Ok(())
    }
}

impl Mover for SimMover {
    fn move_absolute(&self, target: Position) -> Result<(), TaskError> {
        self.set_pending(target)
    }

    fn move_relative(&self, offset: Position) -> Result<(), TaskError> {
        let here = self
            .memory
            .position_of(&self.memory.self_id())?
            .unwrap_or_default();
        self.set_pending(here.offset(offset.x, offset.y, offset.z))
    }

    fn bot_step(&self) -> Result<bool, TaskError> {
        let target = self
            .pending
            .lock()
            .map_err(|_| TaskError::InvalidState("mover lock poisoned".to_string()))?
            .take();
        if let Some(pos) = target {
            self.memory.set_position(&self.memory.self_id(), pos)?;
        }
        Ok(true)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
