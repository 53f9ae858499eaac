//! Dialogue routing: from raw chat to interpreter turns.
//!
//! [`DialogueRouter`] is the single entry point for speaker input. Every
//! command is recorded twice before it is acted on: the utterance as a Chat
//! entity and the structured command as a Program entity. Routing is by
//! `dialogue_type`:
//!
//! | Dialogue type | Handling |
//! |---|---|
//! | `NOOP` | fixed answer |
//! | `HUMAN_GIVE_COMMAND` | a fresh [`Interpreter`] turn |
//! | `PUT_MEMORY`, `GET_MEMORY` | unsupported apology |
//!
//! The router also holds the one suspended interpreter (re-stepped by
//! [`DialogueRouter::tick`]) and the one pending [`Confirmation`] (answered
//! by the next utterance).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use locus_memory::{AgentMemory, MemoryError, TaskRecord};
use locus_types::{Command, DialogueType, MemId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::interpreter::{
    Confirmation, Interpreter, InterpreterConfig, InterpreterError, TurnOutcome, TurnState,
    UNSUPPORTED_RESPONSE,
};
use crate::resolvers::Resolvers;

pub const NOOP_RESPONSE: &str = "I don't know how to answer that.";

// ─────────────────────────────────────────────────────────────────────────────
// Semantic parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("no parse for {0:?}")]
    Unrecognized(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: expected `text|command`")]
    MissingSeparator { line: usize },
    #[error("line {line}: {source}")]
    BadCommand {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// The external `parse(text) -> command` contract.
pub trait SemanticParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Command, ParserError>;
}

/// Exact-match phrase table loaded from `text|json` lines.
///
/// ```rust
/// use locus_runtime::dialogue::{GroundTruthParser, SemanticParser};
///
/// let parser = GroundTruthParser::from_lines(
///     r#""stop"|{"dialogue_type": "HUMAN_GIVE_COMMAND", "action": {"action_type": "STOP"}}"#,
/// ).unwrap();
/// assert!(parser.parse("  Stop ").is_ok());
/// assert!(parser.parse("dance").is_err());
/// ```
#[derive(Debug, Default)]
pub struct GroundTruthParser {
    table: HashMap<String, Command>,
}

impl GroundTruthParser {
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_lines(src: &str) -> Result<Self, ParserError> {
        let mut table = HashMap::new();
        for (idx, raw) in src.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (text, form) = line
                .split_once('|')
                .ok_or(ParserError::MissingSeparator { line: idx + 1 })?;
            let command: Command = serde_json::from_str(form)
                .map_err(|source| ParserError::BadCommand { line: idx + 1, source })?;
            table.insert(normalize(text.trim().trim_matches('"')), command);
        }
        Ok(Self { table })
    }

    /// Load one table file, or every `*.txt` file of a directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ParserError> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Self::from_lines(&std::fs::read_to_string(path)?);
        }
        let mut merged = Self::default();
        let mut files: Vec<_> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "txt"))
            .collect();
        files.sort();
        for file in files {
            let part = Self::from_lines(&std::fs::read_to_string(&file)?)?;
            merged.table.extend(part.table);
        }
        info!(phrases = merged.len(), dir = %path.display(), "ground truth loaded");
        Ok(merged)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl SemanticParser for GroundTruthParser {
    fn parse(&self, text: &str) -> Result<Command, ParserError> {
        self.table
            .get(&normalize(text))
            .cloned()
            .ok_or_else(|| ParserError::Unrecognized(text.to_string()))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn is_yes(text: &str) -> bool {
    matches!(
        normalize(text).trim_end_matches(['.', '!']),
        "yes" | "y" | "yeah" | "yep" | "sure" | "ok" | "okay" | "do it"
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// The agent's side of one exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: Option<String>,
    pub state: TurnState,
    pub pushed: Vec<TaskRecord>,
    /// A yes/no question is now waiting for the speaker.
    pub awaiting_answer: bool,
    /// The suspended turn asked an open question; the next utterance that
    /// is not itself a command answers it.
    pub clarifying: bool,
}

pub struct DialogueRouter {
    memory: Arc<AgentMemory>,
    resolvers: Resolvers,
    config: InterpreterConfig,
    // ── Open dialogue ─────────────────────────────────────────────────────────
    suspended: Option<Interpreter>,
    pending: Option<Confirmation>,
}

impl DialogueRouter {
    pub fn new(memory: Arc<AgentMemory>, resolvers: Resolvers, config: InterpreterConfig) -> Self {
        Self {
            memory,
            resolvers,
            config,
            suspended: None,
            pending: None,
        }
    }

    pub fn memory(&self) -> &Arc<AgentMemory> {
        &self.memory
    }

    pub fn has_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// The question the next utterance will answer, if any.
    pub fn pending_question(&self) -> Option<&str> {
        match &self.pending {
            Some(confirmation) => Some(confirmation.question.as_str()),
            None => self
                .suspended
                .as_ref()
                .and_then(Interpreter::clarification)
                .map(|c| c.question.as_str()),
        }
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    /// Handle free text: an answer to a pending question, or a new command
    /// looked up through `parser`. Text the parser cannot map is treated as
    /// `NOOP`, unless the suspended turn is waiting on a clarification, in
    /// which case it is the answer.
    pub fn handle_text(
        &mut self,
        speaker: &MemId,
        text: &str,
        parser: &dyn SemanticParser,
    ) -> Result<Reply, InterpreterError> {
        if let Some(confirmation) = self.pending.take() {
            self.memory.add_chat(speaker, text)?;
            let outcome = confirmation.answer(&self.memory, is_yes(text))?;
            return self.absorb(None, outcome);
        }
        let command = match parser.parse(text) {
            Ok(command) => command,
            Err(ParserError::Unrecognized(_)) => {
                debug!(%text, "no parse; treating as NOOP");
                Command::new(DialogueType::Noop)
            }
            Err(e) => {
                warn!(error = %e, "semantic parser failed");
                Command::new(DialogueType::Noop)
            }
        };
        let clarifying = self
            .suspended
            .as_ref()
            .is_some_and(|i| i.clarification().is_some());
        if clarifying
            && command.dialogue_type != DialogueType::HumanGiveCommand
            && let Some(mut interpreter) = self.suspended.take()
        {
            self.memory.add_chat(speaker, text)?;
            let outcome = interpreter.answer(text)?;
            return self.absorb(Some(interpreter), outcome);
        }
        self.handle_command(speaker, text, command)
    }

    /// Record and route one structured command.
    pub fn handle_command(
        &mut self,
        speaker: &MemId,
        text: &str,
        command: Command,
    ) -> Result<Reply, InterpreterError> {
        let chat = self.memory.add_chat(speaker, text)?;
        let logical_form = serde_json::to_value(&command).map_err(MemoryError::from)?;
        self.memory.add_program(&logical_form)?;
        info!(%speaker, dialogue_type = %command.dialogue_type, "command received");

        match command.dialogue_type {
            DialogueType::Noop => self.say(NOOP_RESPONSE),
            DialogueType::PutMemory | DialogueType::GetMemory => self.say(UNSUPPORTED_RESPONSE),
            DialogueType::HumanGiveCommand => {
                if self.suspended.take().is_some() {
                    info!("new command replaces a suspended one");
                }
                if let Some(stale) = self.pending.take() {
                    info!(question = %stale.question, "new command drops an unanswered question");
                }
                let mut interpreter = Interpreter::new(
                    speaker.clone(),
                    command,
                    Arc::clone(&self.memory),
                    self.resolvers.clone(),
                    self.config.clone(),
                )
                .with_chat(chat);
                let outcome = interpreter.step()?;
                self.absorb(Some(interpreter), outcome)
            }
        }
    }

    /// Re-step the suspended interpreter, if any. A turn waiting on a
    /// clarification only moves when the speaker answers.
    pub fn tick(&mut self) -> Result<Option<Reply>, InterpreterError> {
        if self
            .suspended
            .as_ref()
            .is_some_and(|i| i.clarification().is_some())
        {
            return Ok(None);
        }
        let Some(mut interpreter) = self.suspended.take() else {
            return Ok(None);
        };
        let outcome = interpreter.step()?;
        self.absorb(Some(interpreter), outcome).map(Some)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn absorb(
        &mut self,
        interpreter: Option<Interpreter>,
        outcome: TurnOutcome,
    ) -> Result<Reply, InterpreterError> {
        if outcome.state == TurnState::AwaitingSubcommand {
            self.suspended = interpreter;
        }
        let mut text = outcome.response;
        let awaiting_answer = outcome.confirmation.is_some();
        if let Some(confirmation) = outcome.confirmation {
            text = Some(confirmation.question.clone());
            self.pending = Some(confirmation);
        }
        let clarifying = outcome.state == TurnState::AwaitingSubcommand
            && outcome.clarification.is_some();
        if let Some(asked) = outcome.clarification.filter(|_| clarifying) {
            text = Some(asked.question);
        }
        if let Some(said) = &text {
            self.memory.add_chat(&self.memory.self_id(), said)?;
        }
        Ok(Reply {
            text,
            state: outcome.state,
            pushed: outcome.pushed,
            awaiting_answer,
            clarifying,
        })
    }

    fn say(&mut self, text: &str) -> Result<Reply, InterpreterError> {
        self.memory.add_chat(&self.memory.self_id(), text)?;
        Ok(Reply {
            text: Some(text.to_string()),
            state: TurnState::Finished,
            pushed: Vec::new(),
            awaiting_answer: false,
            clarifying: false,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
