//! `locus-runtime` – command interpretation and task execution.
//!
//! Sits on top of [`locus_memory::AgentMemory`] and turns structured
//! commands into task-ledger operations, then steps those tasks.
//!
//! # Modules
//!
//! - [`dialogue`] – [`DialogueRouter`]: records every command as Chat and
//!   Program memories and routes it by dialogue type; also the
//!   [`SemanticParser`] contract and the phrase-table [`GroundTruthParser`].
//! - [`interpreter`] – [`Interpreter`]: the per-command state machine with
//!   the `MOVE`/`STOP`/`RESUME`/`UNDO`/`OTHERACTION` dispatch table.
//! - [`resolvers`] – pluggable reference, location, direction, condition and
//!   filter resolvers, with memory-backed basic implementations.
//! - [`tasks`] – the [`Task`] contract, built-in `Move`/`Loop`/`Undo` tasks,
//!   the [`TaskRegistry`] and the reference [`TaskRunner`].
//! - [`telemetry`] – [`init_tracing`]: subscriber setup with optional OTLP
//!   export.
//!
//! # Example
//!
//! ```rust
//! use locus_memory::AgentMemory;
//! use locus_runtime::{DialogueRouter, InterpreterConfig, Resolvers, SimMover, TaskRunner};
//! use locus_types::{ActionDict, Command, Position};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(AgentMemory::open_in_memory().unwrap());
//! let alice = memory.add_player(1, "alice", Position::default()).unwrap();
//! memory.add_attention(Position::new(3.0, 0.0, 0.0), &alice).unwrap();
//!
//! let mut router = DialogueRouter::new(Arc::clone(&memory), Resolvers::basic(), InterpreterConfig::default());
//! let reply = router
//!     .handle_command(&alice, "go there", Command::give(vec![ActionDict::new("MOVE")]))
//!     .unwrap();
//! assert_eq!(reply.pushed.len(), 1);
//!
//! let mover = Arc::new(SimMover::new(Arc::clone(&memory)));
//! TaskRunner::new(Arc::clone(&memory), Resolvers::basic(), mover).run_until_idle(10).unwrap();
//! assert_eq!(memory.position_of(&memory.self_id()).unwrap(), Some(Position::new(3.0, 0.0, 0.0)));
//! ```

pub mod dialogue;
pub mod interpreter;
pub mod resolvers;
pub mod tasks;
pub mod telemetry;

pub use dialogue::{DialogueRouter, GroundTruthParser, ParserError, Reply, SemanticParser};
pub use interpreter::{
    Clarification, Confirmation, DefaultLocation, Interpreter, InterpreterConfig, InterpreterError,
    TurnOutcome, TurnState,
};
pub use resolvers::{
    Condition, ConditionResolver, FilterResolver, LocationResolver, ReferenceObjectResolver,
    RelativeDirectionResolver, RelativeStep, ResolveContext, ResolveError, Resolvers,
};
pub use tasks::{
    AgentHandle, Mover, SimMover, StepReport, Task, TaskError, TaskRegistry, TaskRunner,
};
pub use telemetry::{TracerProviderGuard, init_tracing};
