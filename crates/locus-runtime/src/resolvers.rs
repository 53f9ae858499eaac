//! Pluggable sub-resolvers consumed by the interpreter and by tasks.
//!
//! Each resolver turns one sub-tree of a structured command into something
//! the store understands: memories, positions, offsets or a live stop
//! condition. They are traits so a host can swap in perception-backed or
//! learned implementations; the `Basic*` types here answer from memory alone.
//!
//! | Trait | Input sub-tree | Output |
//! |---|---|---|
//! | [`ReferenceObjectResolver`] | `reference_object` | candidate memory ids |
//! | [`LocationResolver`] | `location` | candidate positions, then one target |
//! | [`RelativeDirectionResolver`] | `location` | an axis-aligned [`RelativeStep`] |
//! | [`ConditionResolver`] | `stop_condition` | a boxed [`Condition`] |
//! | [`FilterResolver`] | `filters` | matching memory ids |

use locus_memory::{AgentMemory, MemoryError, SearchFilter};
use locus_types::{MemId, NodeKind, Position};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ResolveError {
    /// The speaker has to answer a question before resolution can go on.
    /// `key` is a JSON pointer, relative to the resolved value, naming the
    /// field the answer fills in.
    #[error("needs clarification: {question}")]
    NeedsClarification { question: String, key: String },
    /// Resolution failed; the message is fit to say to the speaker.
    #[error("{0}")]
    Unresolvable(String),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl ResolveError {
    /// Re-root a clarification key under `prefix`, for callers that resolved
    /// a sub-tree of a larger value.
    pub fn under(self, prefix: &str) -> Self {
        match self {
            ResolveError::NeedsClarification { question, key } => ResolveError::NeedsClarification {
                question,
                key: format!("{prefix}{key}"),
            },
            other => other,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver traits
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a resolver may look at while resolving one sub-tree.
pub struct ResolveContext<'a> {
    pub memory: &'a AgentMemory,
    pub speaker: &'a MemId,
    pub resolvers: &'a Resolvers,
}

pub trait ReferenceObjectResolver: Send + Sync {
    fn resolve(&self, ctx: &ResolveContext<'_>, reference: &Value) -> Result<Vec<MemId>, ResolveError>;
}

pub trait LocationResolver: Send + Sync {
    /// Positions the `location` sub-tree is anchored on.
    fn reference_positions(
        &self,
        ctx: &ResolveContext<'_>,
        location: &Value,
    ) -> Result<Vec<Position>, ResolveError>;

    /// Collapse candidates into one target, applying `step` if given.
    /// `None` when there is nothing to go on.
    fn specify(
        &self,
        ctx: &ResolveContext<'_>,
        candidates: &[Position],
        step: Option<&RelativeStep>,
    ) -> Result<Option<Position>, ResolveError>;
}

/// A direction word plus how far to go in it.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeStep {
    pub direction: String,
    pub steps: f64,
}

pub trait RelativeDirectionResolver: Send + Sync {
    fn resolve(&self, location: &Value) -> Result<Option<RelativeStep>, ResolveError>;
}

/// A live stop condition, checked once per loop iteration.
pub trait Condition: Send {
    fn name(&self) -> &str;
    /// `iterations` counts completed bodies of the enclosing loop.
    fn check(&self, memory: &AgentMemory, iterations: u32) -> Result<bool, ResolveError>;
}

pub trait ConditionResolver: Send + Sync {
    fn resolve(&self, ctx: &ResolveContext<'_>, condition: &Value) -> Result<Box<dyn Condition>, ResolveError>;
}

pub trait FilterResolver: Send + Sync {
    fn resolve(&self, ctx: &ResolveContext<'_>, filters: &Value) -> Result<Vec<MemId>, ResolveError>;
}

/// The set of resolvers handed to interpreters and tasks.
#[derive(Clone)]
pub struct Resolvers {
    pub reference_objects: Arc<dyn ReferenceObjectResolver>,
    pub locations: Arc<dyn LocationResolver>,
    pub relative_directions: Arc<dyn RelativeDirectionResolver>,
    pub conditions: Arc<dyn ConditionResolver>,
    pub filters: Arc<dyn FilterResolver>,
}

impl Resolvers {
    /// Memory-backed resolvers with axis-aligned geometry only.
    pub fn basic() -> Self {
        Self {
            reference_objects: Arc::new(BasicReferenceObjects),
            locations: Arc::new(BasicLocations),
            relative_directions: Arc::new(BasicRelativeDirections),
            conditions: Arc::new(BasicConditions),
            filters: Arc::new(BasicFilters),
        }
    }

    pub fn context<'a>(&'a self, memory: &'a AgentMemory, speaker: &'a MemId) -> ResolveContext<'a> {
        ResolveContext {
            memory,
            speaker,
            resolvers: self,
        }
    }
}

impl Default for Resolvers {
    fn default() -> Self {
        Self::basic()
    }
}

impl std::fmt::Debug for Resolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolvers").finish_non_exhaustive()
    }
}

/// `location` sub-tree for "where the speaker is looking".
pub fn speaker_look() -> Value {
    json!({"reference_object": {"special_reference": "SPEAKER_LOOK"}})
}

/// `location` sub-tree for "where the agent stands".
pub fn agent_pos() -> Value {
    json!({"reference_object": {"special_reference": "AGENT"}})
}

// ─────────────────────────────────────────────────────────────────────────────
// Basic reference objects
// ─────────────────────────────────────────────────────────────────────────────

/// Special references (`SPEAKER`, `AGENT`, `SPEAKER_LOOK`, literal
/// `coordinates`) plus `filters` delegated to the filter resolver.
pub struct BasicReferenceObjects;

impl ReferenceObjectResolver for BasicReferenceObjects {
    fn resolve(&self, ctx: &ResolveContext<'_>, reference: &Value) -> Result<Vec<MemId>, ResolveError> {
        if let Some(special) = reference.get("special_reference") {
            return special_reference(ctx, special).map(|id| vec![id]);
        }
        if let Some(filters) = reference.get("filters") {
            let ids = ctx.resolvers.filters.resolve(ctx, filters)?;
            let mut spatial = Vec::with_capacity(ids.len());
            for id in ids {
                if ctx.memory.node_kind(&id)?.is_some_and(|k| k.is_spatial()) {
                    spatial.push(id);
                }
            }
            return Ok(spatial);
        }
        Err(ResolveError::Unresolvable(
            "I don't know what you are referring to.".to_string(),
        ))
    }
}

fn special_reference(ctx: &ResolveContext<'_>, special: &Value) -> Result<MemId, ResolveError> {
    if let Some(coords) = special.get("coordinates") {
        let pos: Position = serde_json::from_value(coords.clone())
            .map_err(|_| ResolveError::Unresolvable(format!("I can't go to {coords}.")))?;
        return Ok(ctx.memory.add_location(pos)?);
    }
    match special.as_str() {
        Some("SPEAKER") => Ok(ctx.speaker.clone()),
        Some("AGENT") => Ok(ctx.memory.self_id()),
        Some("SPEAKER_LOOK") => {
            let pos = ctx.memory.attention_of(ctx.speaker)?.ok_or_else(|| {
                ResolveError::Unresolvable("I can't tell where you are looking.".to_string())
            })?;
            // A location is materialised so the target survives later looks.
            Ok(ctx.memory.add_location(pos)?)
        }
        _ => Err(ResolveError::Unresolvable(format!(
            "I don't know what {special} refers to."
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Basic locations
// ─────────────────────────────────────────────────────────────────────────────

pub struct BasicLocations;

impl LocationResolver for BasicLocations {
    fn reference_positions(
        &self,
        ctx: &ResolveContext<'_>,
        location: &Value,
    ) -> Result<Vec<Position>, ResolveError> {
        let Some(reference) = location.get("reference_object") else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for id in ctx.resolvers.reference_objects.resolve(ctx, reference)? {
            if let Some(pos) = ctx.memory.position_of(&id)? {
                out.push(pos);
            }
        }
        Ok(out)
    }

    fn specify(
        &self,
        _ctx: &ResolveContext<'_>,
        candidates: &[Position],
        step: Option<&RelativeStep>,
    ) -> Result<Option<Position>, ResolveError> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let n = candidates.len() as f64;
        let (sx, sy, sz) = candidates
            .iter()
            .fold((0.0, 0.0, 0.0), |(x, y, z), p| (x + p.x, y + p.y, z + p.z));
        let centre = Position::new(sx / n, sy / n, sz / n);
        let Some(step) = step else {
            return Ok(Some(centre));
        };
        let (dx, dy, dz) = axis_of(&step.direction).ok_or_else(|| {
            ResolveError::Unresolvable(format!("I don't know which way {} is.", step.direction))
        })?;
        Ok(Some(centre.offset(dx * step.steps, dy * step.steps, dz * step.steps)))
    }
}

/// Unit offset for a direction word.
fn axis_of(direction: &str) -> Option<(f64, f64, f64)> {
    match direction {
        "LEFT" => Some((-1.0, 0.0, 0.0)),
        "RIGHT" => Some((1.0, 0.0, 0.0)),
        "UP" => Some((0.0, 1.0, 0.0)),
        "DOWN" => Some((0.0, -1.0, 0.0)),
        "FRONT" => Some((0.0, 0.0, 1.0)),
        "BACK" => Some((0.0, 0.0, -1.0)),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Basic relative directions
// ─────────────────────────────────────────────────────────────────────────────

/// Reads `relative_direction` and `steps` (number or numeric string,
/// default 1) off a `location` sub-tree.
pub struct BasicRelativeDirections;

impl RelativeDirectionResolver for BasicRelativeDirections {
    fn resolve(&self, location: &Value) -> Result<Option<RelativeStep>, ResolveError> {
        let Some(direction) = location.get("relative_direction").and_then(Value::as_str) else {
            return Ok(None);
        };
        let steps = match location.get("steps") {
            None | Some(Value::Null) => 1.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(1.0),
            Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
                ResolveError::Unresolvable(format!("I don't know how far \"{s}\" is."))
            })?,
            Some(other) => {
                return Err(ResolveError::Unresolvable(format!(
                    "I don't know how far {other} is."
                )));
            }
        };
        Ok(Some(RelativeStep {
            direction: direction.to_string(),
            steps,
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Basic conditions
// ─────────────────────────────────────────────────────────────────────────────

/// Never holds; the loop runs until stopped.
pub struct Never;

impl Condition for Never {
    fn name(&self) -> &str {
        "NEVER"
    }

    fn check(&self, _memory: &AgentMemory, _iterations: u32) -> Result<bool, ResolveError> {
        Ok(false)
    }
}

/// Holds once the loop body has run `count` times.
pub struct Count(pub u32);

impl Condition for Count {
    fn name(&self) -> &str {
        "COUNT"
    }

    fn check(&self, _memory: &AgentMemory, iterations: u32) -> Result<bool, ResolveError> {
        Ok(iterations >= self.0)
    }
}

/// `{"condition_type": "NEVER"}` and `{"condition_type": "COUNT", "count": n}`.
pub struct BasicConditions;

impl ConditionResolver for BasicConditions {
    fn resolve(&self, _ctx: &ResolveContext<'_>, condition: &Value) -> Result<Box<dyn Condition>, ResolveError> {
        match condition.get("condition_type").and_then(Value::as_str) {
            Some("NEVER") => Ok(Box::new(Never)),
            Some("COUNT") => {
                let count = condition
                    .get("count")
                    .and_then(|c| c.as_u64().or_else(|| c.as_str()?.trim().parse().ok()))
                    .ok_or_else(|| ResolveError::NeedsClarification {
                        question: "How many times should I do it?".to_string(),
                        key: "/count".to_string(),
                    })?;
                Ok(Box::new(Count(u32::try_from(count).unwrap_or(u32::MAX))))
            }
            Some(other) => Err(ResolveError::Unresolvable(format!(
                "I don't know how to check for {other}."
            ))),
            None => Err(ResolveError::Unresolvable(
                "I don't know when to stop.".to_string(),
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Basic filters
// ─────────────────────────────────────────────────────────────────────────────

/// Translates `memory_type`, `has_tag` and `triples` into a [`SearchFilter`].
pub struct BasicFilters;

impl FilterResolver for BasicFilters {
    fn resolve(&self, ctx: &ResolveContext<'_>, filters: &Value) -> Result<Vec<MemId>, ResolveError> {
        let mut search = SearchFilter::default();
        if let Some(kind) = filters.get("memory_type").and_then(Value::as_str) {
            let kind = kind
                .parse::<NodeKind>()
                .map_err(|e| ResolveError::Unresolvable(format!("I don't know about {}.", e.value)))?;
            search.kind = Some(kind);
        }
        if let Some(tag) = filters.get("has_tag").and_then(Value::as_str) {
            search = search.tagged(tag);
        }
        for triple in filters
            .get("triples")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let pred = triple.get("pred_text").and_then(Value::as_str);
            let obj = triple.get("obj_text").and_then(Value::as_str);
            match (pred, obj) {
                (Some(p), Some(o)) => search = search.with(p, o),
                _ => {
                    return Err(ResolveError::Unresolvable(
                        "I don't understand that description.".to_string(),
                    ));
                }
            }
        }
        if search.kind.is_none() && search.tags.is_empty() && search.has.is_empty() {
            return Err(ResolveError::Unresolvable(
                "I don't know what you are referring to.".to_string(),
            ));
        }
        let ids = ctx.memory.basic_search(&search)?;
        debug!(matches = ids.len(), "filters resolved");
        Ok(ids)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_memory() -> AgentMemory {
        AgentMemory::open_in_memory().unwrap()
    }

    fn speaker(memory: &AgentMemory) -> MemId {
        memory
            .add_player(7, "alice", Position::new(0.0, 0.0, 0.0))
            .unwrap()
    }

    #[test]
    fn speaker_look_resolves_to_attention() {
        let memory = make_memory();
        let alice = speaker(&memory);
        memory.add_attention(Position::new(3.0, 0.0, 4.0), &alice).unwrap();
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let found = resolvers
            .locations
            .reference_positions(&ctx, &speaker_look())
            .unwrap();
        assert_eq!(found, vec![Position::new(3.0, 0.0, 4.0)]);
    }

    #[test]
    fn speaker_look_without_attention_is_unresolvable() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let err = resolvers
            .locations
            .reference_positions(&ctx, &speaker_look())
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable(_)));
    }

    #[test]
    fn agent_pos_is_self_position() {
        let memory = make_memory();
        memory
            .set_position(&memory.self_id(), Position::new(1.0, 2.0, 3.0))
            .unwrap();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let found = resolvers.locations.reference_positions(&ctx, &agent_pos()).unwrap();
        assert_eq!(found, vec![Position::new(1.0, 2.0, 3.0)]);
    }

    #[test]
    fn relative_step_offsets_the_centre() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let location = json!({"relative_direction": "LEFT", "steps": "3"});
        let step = resolvers.relative_directions.resolve(&location).unwrap();
        let target = resolvers
            .locations
            .specify(
                &ctx,
                &[Position::new(0.0, 0.0, 0.0), Position::new(2.0, 0.0, 2.0)],
                step.as_ref(),
            )
            .unwrap();
        assert_eq!(target, Some(Position::new(-2.0, 0.0, 1.0)));
    }

    #[test]
    fn unknown_direction_is_unresolvable() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let step = RelativeStep {
            direction: "AWAY".into(),
            steps: 1.0,
        };
        let err = resolvers
            .locations
            .specify(&ctx, &[Position::new(0.0, 0.0, 0.0)], Some(&step))
            .unwrap_err();
        assert!(matches!(err, ResolveError::Unresolvable(_)));
        assert_eq!(resolvers.locations.specify(&ctx, &[], None).unwrap(), None);
    }

    #[test]
    fn filters_find_named_objects() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let house = memory.add_location(Position::new(9.0, 0.0, 9.0)).unwrap();
        memory
            .add_triple(
                locus_memory::NodeRef::Id(house.clone()),
                "has_name",
                locus_memory::NodeRef::text("house"),
                1.0,
            )
            .unwrap();
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let reference = json!({"filters": {"triples": [{"pred_text": "has_name", "obj_text": "house"}]}});
        let ids = resolvers.reference_objects.resolve(&ctx, &reference).unwrap();
        assert_eq!(ids, vec![house]);
    }

    #[test]
    fn empty_filters_are_rejected() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        assert!(resolvers.filters.resolve(&ctx, &json!({})).is_err());
    }

    #[test]
    fn count_condition_holds_after_n_iterations() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let cond = resolvers
            .conditions
            .resolve(&ctx, &json!({"condition_type": "COUNT", "count": 2}))
            .unwrap();
        assert_eq!(cond.name(), "COUNT");
        assert!(!cond.check(&memory, 1).unwrap());
        assert!(cond.check(&memory, 2).unwrap());

        let never = resolvers
            .conditions
            .resolve(&ctx, &json!({"condition_type": "NEVER"}))
            .unwrap();
        assert!(!never.check(&memory, 1_000).unwrap());
    }

    #[test]
    fn count_without_a_number_asks_back() {
        let memory = make_memory();
        let alice = speaker(&memory);
        let resolvers = Resolvers::basic();
        let ctx = resolvers.context(&memory, &alice);
        let err = resolvers
            .conditions
            .resolve(&ctx, &json!({"condition_type": "COUNT"}))
            .err()
            .unwrap();
        assert!(matches!(
            err.under("/stop_condition"),
            ResolveError::NeedsClarification { ref key, .. } if key == "/stop_condition/count"
        ));
    }
}
