//! `locus-memory` – the agent's persistent memory.
//!
//! Everything the agent knows lives in one SQLite database as typed
//! entities and subject-predicate-object triples. A stack of in-progress
//! tasks is kept as a view over `Task` entities.
//!
//! # Modules
//!
//! - [`clock`] – [`Clock`][clock::Clock]: the logical time source every
//!   timestamp is read from.
//! - [`store`] – [`AgentMemory`][store::AgentMemory]: entity create, read,
//!   update, delete, snapshot and recency lookups.
//! - [`nodes`] – per-kind attribute schemas plus chat, player, location,
//!   attention, time and program helpers.
//! - [`triples`] – relations, tagging and triple queries.
//! - [`task_ledger`] – push/peek/pop, pause/resume, lineage and undo lookups.
//! - [`search`] – conjunctive tag and triple search.
//!
//! # Example
//!
//! ```rust
//! use locus_memory::{AgentMemory, NodeAttrs, SpatialAttrs};
//! use locus_types::{NodeKind, Position};
//!
//! let memory = AgentMemory::open_in_memory().unwrap();
//! let attrs = NodeAttrs::Spatial(SpatialAttrs::at(Position::new(1.0, 0.0, 2.0)));
//! let id = memory.create(NodeKind::Location, attrs.clone()).unwrap();
//! assert_eq!(memory.get(&id).unwrap().attrs, attrs);
//!
//! let archive = memory.snapshot(&id).unwrap();
//! assert!(memory.get(&archive).unwrap().is_snapshot);
//! ```

pub mod clock;
pub mod error;
pub mod nodes;
pub mod search;
pub mod store;
pub mod task_ledger;
pub mod triples;

pub use clock::Clock;
pub use error::MemoryError;
pub use nodes::{ChatAttrs, ChatRecord, NodeAttrs, ProgramAttrs, SpatialAttrs, TaskAttrs};
pub use search::SearchFilter;
pub use store::{AgentMemory, MemoryRecord};
pub use task_ledger::{CHAT_EFFECT, HAS_PARENT_TASK, TaskRecord};
pub use triples::{HAS_TAG, NodeRef, Role, Triple, TripleQuery};
