//! [`Interpreter`] – turns one structured command into ledger operations.
//!
//! An interpreter is created per incoming `HUMAN_GIVE_COMMAND` and driven by
//! repeated calls to [`Interpreter::step`]:
//!
//! 1. **Collect** – the single `action` and then every `action_sequence`
//!    entry, in original order. No actions at all fails the turn.
//! 2. **Dispatch** – each action goes through a fixed table keyed by
//!    `action_type` (`MOVE`, `STOP`, `RESUME`, `UNDO`, `OTHERACTION`).
//!    Handlers resolve references through [`Resolvers`] and push tasks.
//! 3. **Suspend** – a handler that needs the speaker to answer something
//!    first raises [`InterpreterError::NextDialogueStep`]. The turn moves to
//!    [`TurnState::AwaitingSubcommand`] with the question staged as a
//!    [`Clarification`]. [`Interpreter::answer`] writes the answer into the
//!    pending action and resumes at that same action.
//! 4. **Respond** – the last response produced wins. Errors with a sentence
//!    for the speaker end the turn as `Finished`; anything else is returned
//!    to the host.
//!
//! Every push advances the clock by one tick first and links the task to the
//! chat that caused it.
//!
//! # Example
//!
//! ```rust
//! use locus_memory::AgentMemory;
//! use locus_runtime::interpreter::{Interpreter, InterpreterConfig, TurnState};
//! use locus_runtime::Resolvers;
//! use locus_types::{ActionDict, Command};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(AgentMemory::open_in_memory().unwrap());
//! let speaker = memory.self_id();
//! let command = Command::give(vec![ActionDict::new("STOP")]);
//! let mut turn = Interpreter::new(speaker, command, memory, Resolvers::basic(), InterpreterConfig::default());
//! let outcome = turn.step().unwrap();
//! assert_eq!(outcome.state, TurnState::Finished);
//! assert_eq!(outcome.response.as_deref(), Some("I am not doing anything"));
//! ```

use std::sync::Arc;

use locus_memory::{AgentMemory, MemoryError, NodeAttrs, TaskRecord};
use locus_types::{ActionDict, Command, DialogueType, LoopTask, MemId, TaskData, TaskFactory, UndoTask};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::resolvers::{self, ResolveError, Resolvers};
use crate::tasks::{archive_loop_targets, move_to_tasks, pin_loop_target, restore_loop_targets};

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

pub const EMPTY_COMMAND_RESPONSE: &str =
    "I thought you wanted me to do something, but now I don't know what";
pub const UNSUPPORTED_RESPONSE: &str = "I don't know how to do that yet";
pub const NOTHING_TO_UNDO_RESPONSE: &str = "I have nothing to undo.";

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum InterpreterError {
    /// Ends the turn with this sentence.
    #[error("{0}")]
    WithResponse(String),
    /// Another dialogue turn has to happen before this action can go on.
    #[error("waiting for another dialogue step: {}", .0.question)]
    NextDialogueStep(Clarification),
    #[error("command has no actions")]
    EmptyCommand,
    /// Dialogue type or action type outside the dispatch table.
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl From<ResolveError> for InterpreterError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NeedsClarification { question, key } => {
                InterpreterError::NextDialogueStep(Clarification { question, key })
            }
            ResolveError::Unresolvable(text) => InterpreterError::WithResponse(text),
            ResolveError::Memory(e) => InterpreterError::Memory(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Location used by MOVE when the command names none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefaultLocation {
    #[default]
    SpeakerLook,
    AgentPos,
}

impl DefaultLocation {
    pub fn as_value(&self) -> Value {
        match self {
            DefaultLocation::SpeakerLook => resolvers::speaker_look(),
            DefaultLocation::AgentPos => resolvers::agent_pos(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterConfig {
    pub default_location: DefaultLocation,
    /// How far back UNDO looks for a finished root task, in clock units
    /// (see [`AgentMemory::round_time`]).
    pub undo_window: i64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            default_location: DefaultLocation::SpeakerLook,
            undo_window: 300,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Turn state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Running,
    Finished,
    AwaitingSubcommand,
    Failed,
}

/// A yes/no question staged by a handler. Answering yes pushes `tasks`.
#[derive(Debug, Clone, PartialEq)]
pub struct Confirmation {
    pub question: String,
    pub tasks: Vec<TaskData>,
    pub chat: Option<MemId>,
}

impl Confirmation {
    pub fn answer(self, memory: &AgentMemory, yes: bool) -> Result<TurnOutcome, MemoryError> {
        if !yes {
            info!(question = %self.question, "confirmation declined");
            return Ok(TurnOutcome::finished(Some("ok, I won't.".to_string())));
        }
        let mut pushed = Vec::with_capacity(self.tasks.len());
        for task in &self.tasks {
            memory.add_tick(1);
            pushed.push(memory.push(task, None, self.chat.as_ref())?);
        }
        info!(pushed = pushed.len(), "confirmation accepted");
        Ok(TurnOutcome {
            pushed,
            ..TurnOutcome::finished(Some("ok".to_string()))
        })
    }
}

/// A question whose answer fills in one field of the pending action.
#[derive(Debug, Clone, PartialEq)]
pub struct Clarification {
    pub question: String,
    /// JSON pointer into the pending action's fields.
    pub key: String,
}

/// What one call to [`Interpreter::step`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub state: TurnState,
    pub response: Option<String>,
    pub confirmation: Option<Confirmation>,
    /// Set while the turn is `AwaitingSubcommand` on a question.
    pub clarification: Option<Clarification>,
    /// Every task pushed so far in this turn.
    pub pushed: Vec<TaskRecord>,
}

impl TurnOutcome {
    fn finished(response: Option<String>) -> Self {
        Self {
            state: TurnState::Finished,
            response,
            confirmation: None,
            clarification: None,
            pushed: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interpreter
// ─────────────────────────────────────────────────────────────────────────────

pub struct Interpreter {
    speaker: MemId,
    command: Command,
    memory: Arc<AgentMemory>,
    resolvers: Resolvers,
    config: InterpreterConfig,
    /// Chat the command came from; every push is linked to it.
    chat: Option<MemId>,
    // ── Turn state ────────────────────────────────────────────────────────────
    state: TurnState,
    /// Index of the first action not yet fully handled.
    next_action: usize,
    response: Option<String>,
    confirmation: Option<Confirmation>,
    clarification: Option<Clarification>,
    pushed: Vec<TaskRecord>,
}

impl Interpreter {
    pub fn new(
        speaker: MemId,
        command: Command,
        memory: Arc<AgentMemory>,
        resolvers: Resolvers,
        config: InterpreterConfig,
    ) -> Self {
        Self {
            speaker,
            command,
            memory,
            resolvers,
            config,
            chat: None,
            state: TurnState::Running,
            next_action: 0,
            response: None,
            confirmation: None,
            clarification: None,
            pushed: Vec::new(),
        }
    }

    pub fn with_chat(mut self, chat: MemId) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn speaker(&self) -> &MemId {
        &self.speaker
    }

    /// The open question, if the turn is waiting on one.
    pub fn clarification(&self) -> Option<&Clarification> {
        self.clarification.as_ref()
    }

    // ------------------------------------------------------------------
    // Turn driver
    // ------------------------------------------------------------------

    /// Handle actions until the command is done or has to wait.
    ///
    /// Calling `step` on a finished or failed turn returns its final state
    /// again without doing anything.
    pub fn step(&mut self) -> Result<TurnOutcome, InterpreterError> {
        if matches!(self.state, TurnState::Finished | TurnState::Failed) {
            return Ok(self.outcome());
        }
        self.state = TurnState::Running;
        self.clarification = None;
        if self.command.dialogue_type != DialogueType::HumanGiveCommand {
            warn!(dialogue_type = %self.command.dialogue_type, "interpreter given a non-command");
            return Ok(self.end(TurnState::Finished, Some(UNSUPPORTED_RESPONSE.to_string())));
        }
        let actions: Vec<ActionDict> = self.command.actions().into_iter().cloned().collect();
        if actions.is_empty() {
            return self.fail_empty();
        }
        while let Some(action) = actions.get(self.next_action) {
            debug!(speaker = %self.speaker, action = %action.action_type, "dispatching action");
            match self.dispatch(action) {
                Ok(response) => {
                    if response.is_some() {
                        self.response = response;
                    }
                    self.next_action += 1;
                }
                Err(InterpreterError::NextDialogueStep(asked)) => {
                    debug!(question = %asked.question, key = %asked.key, "turn needs clarification");
                    self.clarification = Some(asked);
                    self.state = TurnState::AwaitingSubcommand;
                    return Ok(TurnOutcome {
                        response: None,
                        ..self.outcome()
                    });
                }
                Err(InterpreterError::WithResponse(text)) => {
                    return Ok(self.end(TurnState::Finished, Some(text)));
                }
                Err(InterpreterError::Unsupported(what)) => {
                    info!(%what, "unsupported action");
                    return Ok(self.end(TurnState::Finished, Some(UNSUPPORTED_RESPONSE.to_string())));
                }
                Err(InterpreterError::EmptyCommand) => return self.fail_empty(),
                Err(InterpreterError::Memory(e)) => match e.user_message() {
                    Some(text) => return Ok(self.end(TurnState::Finished, Some(text))),
                    None => {
                        self.state = TurnState::Failed;
                        return Err(InterpreterError::Memory(e));
                    }
                },
            }
        }
        Ok(self.end(TurnState::Finished, None))
    }

    /// Fill in the field the open clarification asked about, then step.
    ///
    /// The answer is read as JSON when it parses (so `3` is a number) and as
    /// plain text otherwise. With no open clarification this is just `step`.
    pub fn answer(&mut self, text: &str) -> Result<TurnOutcome, InterpreterError> {
        if let Some(asked) = self.clarification.take() {
            let text = text.trim();
            let value = serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()));
            let patched = self
                .command
                .action_mut(self.next_action)
                .is_some_and(|action| set_pointer(&mut action.fields, &asked.key, value));
            if patched {
                debug!(key = %asked.key, "clarification answered");
            } else {
                warn!(key = %asked.key, "answer does not fit the pending action");
            }
        }
        self.step()
    }

    fn dispatch(&mut self, action: &ActionDict) -> Result<Option<String>, InterpreterError> {
        match action.action_type.as_str() {
            "MOVE" => self.handle_move(action),
            "STOP" => self.handle_stop(),
            "RESUME" => self.handle_resume(),
            "UNDO" => self.handle_undo(action),
            "OTHERACTION" => Err(InterpreterError::Unsupported("OTHERACTION".to_string())),
            other => Err(InterpreterError::Unsupported(other.to_string())),
        }
    }

    fn fail_empty(&mut self) -> Result<TurnOutcome, InterpreterError> {
        warn!(speaker = %self.speaker, "command has no actions");
        Ok(self.end(TurnState::Failed, Some(EMPTY_COMMAND_RESPONSE.to_string())))
    }

    fn end(&mut self, state: TurnState, response: Option<String>) -> TurnOutcome {
        self.state = state;
        if response.is_some() {
            self.response = response;
        }
        self.outcome()
    }

    fn outcome(&mut self) -> TurnOutcome {
        TurnOutcome {
            state: self.state,
            response: self.response.clone(),
            confirmation: self.confirmation.take(),
            clarification: self.clarification.clone(),
            pushed: self.pushed.clone(),
        }
    }

    fn push(&mut self, data: &TaskData) -> Result<TaskRecord, MemoryError> {
        self.memory.add_tick(1);
        let record = self.memory.push(data, None, self.chat.as_ref())?;
        self.pushed.push(record.clone());
        Ok(record)
    }

    // ------------------------------------------------------------------
    // Handlers
    // ------------------------------------------------------------------

    fn handle_move(&mut self, action: &ActionDict) -> Result<Option<String>, InterpreterError> {
        let location = action
            .get("location")
            .cloned()
            .unwrap_or_else(|| self.config.default_location.as_value());
        let memory = Arc::clone(&self.memory);
        let resolvers = self.resolvers.clone();
        let speaker = self.speaker.clone();
        let ctx = resolvers.context(&memory, &speaker);

        let Some(stop_condition) = action.get("stop_condition") else {
            for task in move_to_tasks(&ctx, &location, None).map_err(|e| e.under("/location"))? {
                self.push(&task)?;
            }
            return Ok(None);
        };

        // Resolved once here so a bad condition is reported now, not when
        // the loop first runs.
        let condition = resolvers
            .conditions
            .resolve(&ctx, stop_condition)
            .map_err(|e| e.under("/stop_condition"))?;
        let anchors = resolvers
            .locations
            .reference_positions(&ctx, &location)
            .map_err(|e| e.under("/location"))?;
        let looped = self.push(&TaskData::Loop(LoopTask {
            body: TaskFactory::MoveTo {
                speaker: speaker.clone(),
                location,
            },
            stop_condition: stop_condition.clone(),
            speaker: speaker.clone(),
            iterations: 0,
        }))?;
        if let Some(anchor) = anchors.first() {
            pin_loop_target(&memory, &looped.id, *anchor)?;
        }
        info!(memid = %looped.id, condition = condition.name(), "loop pushed");
        Ok(None)
    }

    fn handle_stop(&mut self) -> Result<Option<String>, InterpreterError> {
        let archived = archive_loop_targets(&self.memory)?;
        let paused = self.memory.pause_all()?;
        info!(paused, archived, "stop requested");
        Ok(Some(if paused {
            "Stopping.  What should I do next?".to_string()
        } else {
            "I am not doing anything".to_string()
        }))
    }

    fn handle_resume(&mut self) -> Result<Option<String>, InterpreterError> {
        if !self.memory.resume_all()? {
            return Ok(Some("nothing to resume".to_string()));
        }
        let restored = restore_loop_targets(&self.memory)?;
        info!(restored, "resumed");
        Ok(Some("resuming".to_string()))
    }

    fn handle_undo(&mut self, action: &ActionDict) -> Result<Option<String>, InterpreterError> {
        let hint = action
            .get_str("undo_action")
            .and_then(|name| name.split('_').next())
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let window = self.memory.round_time(self.config.undo_window);
        let Some(old) = self.memory.last_finished_root(hint, window)? else {
            return Err(InterpreterError::WithResponse(NOTHING_TO_UNDO_RESPONSE.to_string()));
        };
        let said = self.command_text(&old)?;
        debug!(memid = %old.id, hint = ?hint, "undo candidate found");
        self.confirmation = Some(Confirmation {
            question: format!("Do you want me to undo the command: \"{said}\" ?"),
            tasks: vec![TaskData::Undo(UndoTask { memid: old.id })],
            chat: self.chat.clone(),
        });
        Ok(None)
    }

    /// What the speaker said to cause `task`; the action name when the task
    /// has no chat behind it.
    fn command_text(&self, task: &TaskRecord) -> Result<String, MemoryError> {
        if let Some(chat) = self.memory.chat_of(&task.id)? {
            if let Some(record) = self.memory.read(&chat)? {
                if let NodeAttrs::Chat(attrs) = record.attrs {
                    return Ok(attrs.text);
                }
            }
        }
        Ok(task.action_name.to_lowercase())
    }
}

/// Write `value` at JSON pointer `key` inside `fields`, creating objects on
/// the way. Fails when the path runs through a non-object.
fn set_pointer(fields: &mut Map<String, Value>, key: &str, value: Value) -> bool {
    let mut segments = key.split('/').filter(|s| !s.is_empty());
    let Some(mut last) = segments.next() else {
        return false;
    };
    let mut map = fields;
    for next in segments {
        let slot = map
            .entry(last.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(inner) = slot else {
            return false;
        };
        map = inner;
        last = next;
    }
    map.insert(last.to_string(), value);
    true
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use locus_types::{Position, TaskData};
    use serde_json::json;

    struct Fixture {
        memory: Arc<AgentMemory>,
        speaker: MemId,
    }

    fn make_fixture() -> Fixture {
        let memory = Arc::new(AgentMemory::open_in_memory().unwrap());
        let speaker = memory.add_player(1, "alice", Position::default()).unwrap();
        Fixture { memory, speaker }
    }

    impl Fixture {
        fn interpreter(&self, command: Command) -> Interpreter {
            Interpreter::new(
                self.speaker.clone(),
                command,
                Arc::clone(&self.memory),
                Resolvers::basic(),
                InterpreterConfig::default(),
            )
        }

        fn run(&self, actions: Vec<ActionDict>) -> TurnOutcome {
            self.interpreter(Command::give(actions)).step().unwrap()
        }

        fn look_at(&self, x: f64, z: f64) {
            self.memory
                .add_attention(Position::new(x, 0.0, z), &self.speaker)
                .unwrap();
        }
    }

    fn move_target(record: &TaskRecord) -> Position {
        match &record.data {
            TaskData::Move(m) => m.target,
            other => panic!("expected a move, got {other:?}"),
        }
    }

    #[test]
    fn empty_command_fails_with_fixed_response() {
        let f = make_fixture();
        let outcome = f.run(Vec::new());
        assert_eq!(outcome.state, TurnState::Failed);
        assert_eq!(outcome.response.as_deref(), Some(EMPTY_COMMAND_RESPONSE));
        assert!(outcome.pushed.is_empty());
        assert!(f.memory.peek().unwrap().is_none());
    }

    #[test]
    fn move_defaults_to_where_the_speaker_looks() {
        let f = make_fixture();
        f.look_at(4.0, 2.0);
        let outcome = f.run(vec![ActionDict::new("MOVE")]);
        assert_eq!(outcome.state, TurnState::Finished);
        assert_eq!(outcome.response, None);
        assert_eq!(outcome.pushed.len(), 1);
        assert_eq!(move_target(&outcome.pushed[0]), Position::new(4.0, 0.0, 2.0));
    }

    #[test]
    fn move_applies_relative_direction() {
        let f = make_fixture();
        let location = json!({
            "reference_object": {"special_reference": {"coordinates": [0.0, 0.0, 0.0]}},
            "relative_direction": "FRONT",
            "steps": 3
        });
        let outcome = f.run(vec![ActionDict::new("MOVE").with("location", location)]);
        assert_eq!(move_target(&outcome.pushed[0]), Position::new(0.0, 0.0, 3.0));
    }

    #[test]
    fn move_without_attention_explains_itself() {
        let f = make_fixture();
        let outcome = f.run(vec![ActionDict::new("MOVE")]);
        assert_eq!(outcome.state, TurnState::Finished);
        assert!(outcome.response.is_some());
        assert!(outcome.pushed.is_empty());
    }

    #[test]
    fn agent_pos_default_moves_in_place() {
        let f = make_fixture();
        let mut turn = Interpreter::new(
            f.speaker.clone(),
            Command::give(vec![ActionDict::new("MOVE")]),
            Arc::clone(&f.memory),
            Resolvers::basic(),
            InterpreterConfig {
                default_location: DefaultLocation::AgentPos,
                ..InterpreterConfig::default()
            },
        );
        let outcome = turn.step().unwrap();
        assert_eq!(move_target(&outcome.pushed[0]), Position::default());
    }

    #[test]
    fn move_with_stop_condition_pushes_a_pinned_loop() {
        let f = make_fixture();
        f.look_at(1.0, 1.0);
        let outcome = f.run(vec![ActionDict::new("MOVE")
            .with("stop_condition", json!({"condition_type": "NEVER"}))]);
        assert_eq!(outcome.pushed.len(), 1);
        let looped = &outcome.pushed[0];
        assert_eq!(looped.action_name, "LOOP");
        assert_eq!(
            crate::tasks::loop_target(&f.memory, &looped.id).unwrap(),
            Some(Position::new(1.0, 0.0, 1.0))
        );
    }

    #[test]
    fn pushes_tick_the_clock_and_carry_the_chat() {
        let f = make_fixture();
        f.look_at(1.0, 1.0);
        let chat = f.memory.add_chat(&f.speaker, "go there twice").unwrap();
        let mut turn = f
            .interpreter(Command::give(vec![ActionDict::new("MOVE"), ActionDict::new("MOVE")]))
            .with_chat(chat.clone());
        let outcome = turn.step().unwrap();
        assert_eq!(outcome.pushed.len(), 2);
        assert!(outcome.pushed[0].created_at < outcome.pushed[1].created_at);
        for task in &outcome.pushed {
            assert_eq!(f.memory.chat_of(&task.id).unwrap(), Some(chat.clone()));
        }
    }

    #[test]
    fn stop_and_resume_report_what_happened() {
        let f = make_fixture();
        assert_eq!(
            f.run(vec![ActionDict::new("STOP")]).response.as_deref(),
            Some("I am not doing anything")
        );
        assert_eq!(
            f.run(vec![ActionDict::new("RESUME")]).response.as_deref(),
            Some("nothing to resume")
        );

        f.look_at(2.0, 2.0);
        f.run(vec![ActionDict::new("MOVE")]);
        assert_eq!(
            f.run(vec![ActionDict::new("STOP")]).response.as_deref(),
            Some("Stopping.  What should I do next?")
        );
        assert!(f.memory.peek().unwrap().is_none());
        assert_eq!(
            f.run(vec![ActionDict::new("RESUME")]).response.as_deref(),
            Some("resuming")
        );
        assert!(f.memory.peek().unwrap().is_some());
    }

    #[test]
    fn stop_archives_loop_targets_until_resume() {
        let f = make_fixture();
        f.look_at(1.0, 1.0);
        let outcome = f.run(vec![ActionDict::new("MOVE")
            .with("stop_condition", json!({"condition_type": "NEVER"}))]);
        let looped = outcome.pushed[0].id.clone();

        f.run(vec![ActionDict::new("STOP")]);
        assert_eq!(crate::tasks::loop_target(&f.memory, &looped).unwrap(), None);
        f.run(vec![ActionDict::new("RESUME")]);
        assert!(crate::tasks::loop_target(&f.memory, &looped).unwrap().is_some());
    }

    #[test]
    fn last_response_in_a_sequence_wins() {
        let f = make_fixture();
        let outcome = f.run(vec![ActionDict::new("STOP"), ActionDict::new("RESUME")]);
        assert_eq!(outcome.response.as_deref(), Some("nothing to resume"));
    }

    #[test]
    fn other_and_unknown_actions_get_the_apology() {
        let f = make_fixture();
        for kind in ["OTHERACTION", "DANCE"] {
            let outcome = f.run(vec![ActionDict::new(kind)]);
            assert_eq!(outcome.state, TurnState::Finished);
            assert_eq!(outcome.response.as_deref(), Some(UNSUPPORTED_RESPONSE));
        }
    }

    #[test]
    fn undo_stages_a_confirmation_for_the_last_root() {
        let f = make_fixture();
        let chat = f.memory.add_chat(&f.speaker, "build a house").unwrap();
        f.memory.add_tick(1);
        let root = f
            .memory
            .push(&TaskData::external("BUILD", json!({})), None, Some(&chat))
            .unwrap();
        f.memory.add_tick(1);
        f.memory.finish(&root.id).unwrap();

        let outcome = f.run(vec![ActionDict::new("UNDO").with("undo_action", json!("BUILD_house"))]);
        assert_eq!(outcome.state, TurnState::Finished);
        assert!(outcome.pushed.is_empty());
        let confirmation = outcome.confirmation.unwrap();
        assert_eq!(
            confirmation.question,
            "Do you want me to undo the command: \"build a house\" ?"
        );
        assert_eq!(
            confirmation.tasks,
            vec![TaskData::Undo(UndoTask { memid: root.id.clone() })]
        );

        let answered = confirmation.answer(&f.memory, true).unwrap();
        assert_eq!(answered.pushed.len(), 1);
        assert_eq!(f.memory.peek().unwrap().unwrap().action_name, "UNDO");
    }

    #[test]
    fn declined_confirmation_pushes_nothing() {
        let f = make_fixture();
        let confirmation = Confirmation {
            question: "sure?".into(),
            tasks: vec![TaskData::external("BUILD", json!({}))],
            chat: None,
        };
        let answered = confirmation.answer(&f.memory, false).unwrap();
        assert!(answered.pushed.is_empty());
        assert!(f.memory.peek().unwrap().is_none());
    }

    #[test]
    fn undo_window_is_counted_in_clock_units() {
        let memory = Arc::new(AgentMemory::open_in_memory().unwrap().with_time_resolution(10));
        let speaker = memory.add_player(1, "alice", Position::default()).unwrap();
        memory.add_tick(1);
        let root = memory
            .push(&TaskData::external("BUILD", json!({})), None, None)
            .unwrap();
        memory.add_tick(1);
        memory.finish(&root.id).unwrap();
        memory.add_tick(25);

        let undo = |window| {
            Interpreter::new(
                speaker.clone(),
                Command::give(vec![ActionDict::new("UNDO")]),
                Arc::clone(&memory),
                Resolvers::basic(),
                InterpreterConfig {
                    undo_window: window,
                    ..InterpreterConfig::default()
                },
            )
            .step()
            .unwrap()
        };
        assert!(undo(3).confirmation.is_some());
        assert_eq!(undo(2).response.as_deref(), Some(NOTHING_TO_UNDO_RESPONSE));
    }

    #[test]
    fn undo_with_nothing_finished_says_so() {
        let f = make_fixture();
        let outcome = f.run(vec![ActionDict::new("UNDO")]);
        assert_eq!(outcome.response.as_deref(), Some(NOTHING_TO_UNDO_RESPONSE));
        assert!(outcome.confirmation.is_none());
        assert!(outcome.pushed.is_empty());
    }

    #[test]
    fn clarification_suspends_and_resumes_at_the_same_action() {
        let f = make_fixture();
        f.look_at(1.0, 1.0);
        let mut turn = f.interpreter(Command::give(vec![
            ActionDict::new("STOP"),
            ActionDict::new("MOVE").with("stop_condition", json!({"condition_type": "COUNT"})),
        ]));
        let first = turn.step().unwrap();
        assert_eq!(first.state, TurnState::AwaitingSubcommand);
        assert_eq!(first.response, None);
        assert_eq!(turn.state(), TurnState::AwaitingSubcommand);

        assert_eq!(
            first.clarification,
            Some(Clarification {
                question: "How many times should I do it?".into(),
                key: "/stop_condition/count".into(),
            })
        );

        // Still unanswerable, so the turn waits again without re-running STOP.
        let again = turn.step().unwrap();
        assert_eq!(again.state, TurnState::AwaitingSubcommand);
        assert!(again.pushed.is_empty());
        assert!(turn.clarification().is_some());

        let answered = turn.answer(" 3 ").unwrap();
        assert_eq!(answered.state, TurnState::Finished);
        assert_eq!(answered.clarification, None);
        assert_eq!(answered.pushed.len(), 1);
        let TaskData::Loop(looped) = &answered.pushed[0].data else {
            panic!("expected a loop");
        };
        assert_eq!(looped.stop_condition, json!({"condition_type": "COUNT", "count": 3}));
    }

    #[test]
    fn answer_that_does_not_resolve_asks_again() {
        let f = make_fixture();
        f.look_at(1.0, 1.0);
        let mut turn = f.interpreter(Command::give(vec![
            ActionDict::new("MOVE").with("stop_condition", json!({"condition_type": "COUNT"})),
        ]));
        turn.step().unwrap();
        let again = turn.answer("a few").unwrap();
        assert_eq!(again.state, TurnState::AwaitingSubcommand);
        assert!(again.clarification.is_some());
        assert!(f.memory.peek().unwrap().is_none());
    }

    #[test]
    fn set_pointer_builds_missing_objects() {
        let mut fields = Map::new();
        assert!(set_pointer(&mut fields, "/stop_condition/count", json!(2)));
        assert_eq!(fields["stop_condition"], json!({"count": 2}));
        fields.insert("location".into(), json!("here"));
        assert!(!set_pointer(&mut fields, "/location/steps", json!(1)));
        assert!(!set_pointer(&mut fields, "", json!(1)));
    }

    #[test]
    fn finished_turns_do_not_rerun() {
        let f = make_fixture();
        f.look_at(1.0, 1.0);
        let mut turn = f.interpreter(Command::give(vec![ActionDict::new("MOVE")]));
        assert_eq!(turn.step().unwrap().pushed.len(), 1);
        let again = turn.step().unwrap();
        assert_eq!(again.state, TurnState::Finished);
        assert_eq!(f.memory.all_active().unwrap().len(), 1);
    }

    #[test]
    fn non_command_dialogue_is_unsupported() {
        let f = make_fixture();
        let outcome = f
            .interpreter(Command::new(DialogueType::GetMemory))
            .step()
            .unwrap();
        assert_eq!(outcome.response.as_deref(), Some(UNSUPPORTED_RESPONSE));
    }
}
