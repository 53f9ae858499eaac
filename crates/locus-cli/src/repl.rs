//! REPL – Read-Eval-Print Loop for the locus shell.
//!
//! Plain text is spoken to the agent as the configured speaker. A line that
//! starts with `{` is taken as a structured command in JSON. Slash-commands:
//!
//!   /help             – show this list
//!   /tasks            – unfinished tasks, top of stack first
//!   /step [n]         – step the top task `n` times (default 1)
//!   /run              – step until the stack is idle
//!   /stop  /resume    – pause or resume every task
//!   /history [n]      – the last `n` chats (default 10)
//!   /recent <kind>    – entities of a kind attended recently
//!   /where            – the agent's position
//!   /look <x> <y> <z> – make the speaker look at a point
//!   /dump <path>      – copy the memory database to a file
//!   /schema           – JSON schema of structured commands
//!   /quit | /exit     – leave the shell

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use locus_memory::AgentMemory;
use locus_runtime::{DialogueRouter, Reply, SemanticParser, TaskRunner};
use locus_types::{Command, MemId, NodeKind, Position};
use tracing::warn;

/// Upper bound on steps taken by `/run`.
const RUN_STEP_LIMIT: usize = 1_000;

/// Everything one shell needs to talk to the agent.
pub struct Session {
    pub memory: Arc<AgentMemory>,
    pub router: DialogueRouter,
    pub runner: TaskRunner,
    pub parser: Box<dyn SemanticParser>,
    pub speaker: MemId,
    pub recency_window: i64,
}

/// What the loop should do after one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(mut session: Session, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "locus>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match dispatch(&mut session, input) {
            Ok((Flow::Quit, _)) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok((Flow::Continue, lines)) => {
                for l in lines {
                    println!("{l}");
                }
            }
            Err(e) => println!("{}: {}", "Error".red(), e),
        }
    }
}

/// Handle one line of input and return the text to show.
pub fn dispatch(session: &mut Session, input: &str) -> Result<(Flow, Vec<String>), String> {
    let mut words = input.split_whitespace();
    let head = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let out = match head {
        "/help" => help(),
        "/tasks" => cmd_tasks(session)?,
        "/step" => cmd_step(session, parse_count(args.first(), 1)?)?,
        "/run" => cmd_run(session)?,
        "/stop" => {
            let paused = session.memory.pause_all().map_err(|e| e.to_string())?;
            vec![if paused { "Paused all tasks." } else { "Nothing to pause." }.to_string()]
        }
        "/resume" => {
            let resumed = session.memory.resume_all().map_err(|e| e.to_string())?;
            vec![if resumed { "Resumed paused tasks." } else { "Nothing to resume." }.to_string()]
        }
        "/history" => cmd_history(session, parse_count(args.first(), 10)?)?,
        "/recent" => cmd_recent(session, &args)?,
        "/where" => {
            let pos = session
                .memory
                .position_of(&session.memory.self_id())
                .map_err(|e| e.to_string())?
                .unwrap_or_default();
            vec![format!("  agent at {}", fmt_pos(&pos))]
        }
        "/look" => cmd_look(session, &args)?,
        "/dump" => {
            let path = args.first().ok_or("usage: /dump <path>")?;
            session.memory.dump_to(path).map_err(|e| e.to_string())?;
            vec![format!("{} {}", "✓ Memory written to".green(), path.bold())]
        }
        "/schema" => {
            let schema = Command::json_schema();
            vec![serde_json::to_string_pretty(&schema).map_err(|e| e.to_string())?]
        }
        "/quit" | "/exit" => return Ok((Flow::Quit, Vec::new())),
        other if other.starts_with('/') => vec![format!(
            "{} '{}'. Type {} for available commands.",
            "Unknown command:".red(),
            other.yellow(),
            "/help".bold()
        )],
        _ if input.starts_with('{') => {
            let command: Command =
                serde_json::from_str(input).map_err(|e| format!("Bad command JSON: {e}"))?;
            let reply = session
                .router
                .handle_command(&session.speaker, input, command)
                .map_err(|e| e.to_string())?;
            reply_lines(&reply)
        }
        _ => {
            let reply = session
                .router
                .handle_text(&session.speaker, input, session.parser.as_ref())
                .map_err(|e| e.to_string())?;
            reply_lines(&reply)
        }
    };
    Ok((Flow::Continue, out))
}

// ─────────────────────────────────────────────────────────────────────────────
// Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn help() -> Vec<String> {
    let rows = [
        ("/tasks", "unfinished tasks, top of stack first"),
        ("/step [n]", "step the top task n times"),
        ("/run", "step until the stack is idle"),
        ("/stop  /resume", "pause or resume every task"),
        ("/history [n]", "recent chats"),
        ("/recent <kind>", "recently attended entities of a kind"),
        ("/where", "the agent's position"),
        ("/look <x> <y> <z>", "look at a point"),
        ("/dump <path>", "copy the memory database"),
        ("/schema", "structured command JSON schema"),
        ("/quit  /exit", "leave the shell"),
    ];
    let mut out = vec![String::new(), "locus Commands".bold().underline().to_string()];
    out.extend(
        rows.iter()
            .map(|(cmd, what)| format!("  {:<18} – {}", cmd.bold().cyan(), what)),
    );
    out.push("  Anything else is said to the agent.".dimmed().to_string());
    out.push(String::new());
    out
}

fn cmd_tasks(session: &Session) -> Result<Vec<String>, String> {
    let tasks = session.memory.unfinished().map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        return Ok(vec!["  (no unfinished tasks)".dimmed().to_string()]);
    }
    Ok(tasks
        .iter()
        .map(|t| {
            let flag = if t.paused { "paused".yellow() } else { "active".green() };
            format!("  {} {:<10} {}", flag, t.action_name.bold(), t.id.to_string().dimmed())
        })
        .collect())
}

fn cmd_step(session: &mut Session, n: usize) -> Result<Vec<String>, String> {
    let mut out = Vec::new();
    for _ in 0..n {
        let Some(report) = session.runner.step_once().map_err(|e| e.to_string())? else {
            out.push("  (idle)".dimmed().to_string());
            break;
        };
        let status = match (&report.failure, report.finished) {
            (Some(why), _) => format!("failed: {why}").red().to_string(),
            (None, true) => "finished".green().to_string(),
            (None, false) => "stepped".to_string(),
        };
        out.push(format!("  {} {}", report.action_name.bold(), status));
    }
    out.extend(tick_router(session)?);
    Ok(out)
}

fn cmd_run(session: &mut Session) -> Result<Vec<String>, String> {
    let steps = session
        .runner
        .run_until_idle(RUN_STEP_LIMIT)
        .map_err(|e| e.to_string())?;
    let mut out = vec![format!("  {steps} step(s) taken")];
    if steps == RUN_STEP_LIMIT {
        warn!(limit = RUN_STEP_LIMIT, "run stopped at the step limit");
        out.push("  step limit reached; the stack is not idle".yellow().to_string());
    }
    out.extend(tick_router(session)?);
    Ok(out)
}

fn cmd_history(session: &Session, n: usize) -> Result<Vec<String>, String> {
    let chats = session.memory.recent_chats(n).map_err(|e| e.to_string())?;
    let self_id = session.memory.self_id();
    Ok(chats
        .iter()
        .rev()
        .map(|c| {
            let who = if c.speaker == self_id { "agent".cyan() } else { "you".yellow() };
            format!("  [{:>6}] {}: {}", c.time, who, c.text)
        })
        .collect())
}

fn cmd_recent(session: &Session, args: &[&str]) -> Result<Vec<String>, String> {
    let kind: NodeKind = args
        .first()
        .ok_or("usage: /recent <kind>")?
        .parse()
        .map_err(|e| format!("{e}"))?;
    let ids = session
        .memory
        .find_by_kind_and_recency(kind, session.memory.round_time(session.recency_window))
        .map_err(|e| e.to_string())?;
    if ids.is_empty() {
        return Ok(vec![format!("  (no {kind} attended recently)").dimmed().to_string()]);
    }
    Ok(ids.iter().map(|id| format!("  {id}")).collect())
}

fn cmd_look(session: &Session, args: &[&str]) -> Result<Vec<String>, String> {
    let coords = args
        .iter()
        .map(|a| a.parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("Bad coordinate: {e}"))?;
    let [x, y, z] = coords[..] else {
        return Err("usage: /look <x> <y> <z>".to_string());
    };
    let pos = Position::new(x, y, z);
    session
        .memory
        .add_attention(pos, &session.speaker)
        .map_err(|e| e.to_string())?;
    Ok(vec![format!("  looking at {}", fmt_pos(&pos))])
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Give a suspended command another chance after the world moved on.
fn tick_router(session: &mut Session) -> Result<Vec<String>, String> {
    match session.router.tick().map_err(|e| e.to_string())? {
        Some(reply) => Ok(reply_lines(&reply)),
        None => Ok(Vec::new()),
    }
}

fn reply_lines(reply: &Reply) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(text) = &reply.text {
        out.push(format!("{} {}", "agent:".bold().green(), text));
    }
    if !reply.pushed.is_empty() {
        let names: Vec<&str> = reply.pushed.iter().map(|t| t.action_name.as_str()).collect();
        out.push(format!("  queued {}", names.join(", ")).dimmed().to_string());
    }
    if reply.awaiting_answer {
        out.push("  (answer yes or no)".dimmed().to_string());
    }
    if reply.clarifying {
        out.push("  (waiting for your answer)".dimmed().to_string());
    }
    out
}

fn parse_count(arg: Option<&&str>, default: usize) -> Result<usize, String> {
    match arg {
        None => Ok(default),
        Some(s) => s.parse().map_err(|_| format!("Not a count: '{s}'")),
    }
}

fn fmt_pos(pos: &Position) -> String {
    format!("({:.1}, {:.1}, {:.1})", pos.x, pos.y, pos.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_runtime::{GroundTruthParser, InterpreterConfig, Resolvers, SimMover};

    fn session() -> Session {
        colored::control::set_override(false);
        let memory = Arc::new(AgentMemory::open_in_memory().unwrap());
        let speaker = memory.add_player(1, "operator", Position::default()).unwrap();
        let parser = GroundTruthParser::from_lines(
            r#"go there|{"dialogue_type": "HUMAN_GIVE_COMMAND", "action": {"action_type": "MOVE"}}"#,
        )
        .unwrap();
        Session {
            router: DialogueRouter::new(Arc::clone(&memory), Resolvers::basic(), InterpreterConfig::default()),
            runner: TaskRunner::new(
                Arc::clone(&memory),
                Resolvers::basic(),
                Arc::new(SimMover::new(Arc::clone(&memory))),
            ),
            parser: Box::new(parser),
            speaker,
            recency_window: 12_000,
            memory,
        }
    }

    fn say(s: &mut Session, line: &str) -> Vec<String> {
        let (flow, out) = dispatch(s, line).unwrap();
        assert_eq!(flow, Flow::Continue);
        out
    }

    #[test]
    fn look_then_move_then_run_reaches_the_point() {
        let mut s = session();
        say(&mut s, "/look 4 0 2");
        let queued = say(&mut s, "go there");
        assert!(queued.iter().any(|l| l.contains("queued MOVE")));

        say(&mut s, "/run");
        let at = say(&mut s, "/where");
        assert_eq!(at, vec!["  agent at (4.0, 0.0, 2.0)".to_string()]);
    }

    #[test]
    fn unknown_text_gets_the_noop_answer() {
        let mut s = session();
        let out = say(&mut s, "sing a song");
        assert_eq!(out, vec![format!("agent: {}", locus_runtime::dialogue::NOOP_RESPONSE)]);
    }

    #[test]
    fn structured_json_commands_are_routed() {
        let mut s = session();
        let out = say(
            &mut s,
            r#"{"dialogue_type": "HUMAN_GIVE_COMMAND", "action": {"action_type": "STOP"}}"#,
        );
        assert_eq!(out, vec!["agent: I am not doing anything".to_string()]);
        assert!(dispatch(&mut s, "{not json").is_err());
    }

    #[test]
    fn open_questions_take_the_next_line_as_the_answer() {
        let mut s = session();
        say(&mut s, "/look 1 0 0");
        let asked = say(
            &mut s,
            r#"{"dialogue_type": "HUMAN_GIVE_COMMAND", "action": {"action_type": "MOVE", "stop_condition": {"condition_type": "COUNT"}}}"#,
        );
        assert_eq!(
            asked,
            vec![
                "agent: How many times should I do it?".to_string(),
                "  (waiting for your answer)".to_string(),
            ]
        );
        let answered = say(&mut s, "2");
        assert!(answered.iter().any(|l| l.contains("queued LOOP")));
    }

    #[test]
    fn stop_and_resume_report_whether_anything_changed() {
        let mut s = session();
        assert_eq!(say(&mut s, "/stop"), vec!["Nothing to pause.".to_string()]);
        say(&mut s, "/look 1 0 0");
        say(&mut s, "go there");
        assert_eq!(say(&mut s, "/stop"), vec!["Paused all tasks.".to_string()]);
        assert!(say(&mut s, "/tasks")[0].contains("paused"));
        assert_eq!(say(&mut s, "/resume"), vec!["Resumed paused tasks.".to_string()]);
    }

    #[test]
    fn history_lists_both_sides_oldest_first() {
        let mut s = session();
        say(&mut s, "hello");
        let out = say(&mut s, "/history 2");
        assert_eq!(out.len(), 2);
        assert!(out[0].contains("you: hello"));
        assert!(out[1].contains("agent:"));
    }

    #[test]
    fn bad_arguments_are_errors_not_panics() {
        let mut s = session();
        assert!(dispatch(&mut s, "/look 1 2").is_err());
        assert!(dispatch(&mut s, "/step many").is_err());
        assert!(dispatch(&mut s, "/recent Nonsense").is_err());
        assert!(dispatch(&mut s, "/dump").is_err());
    }

    #[test]
    fn recent_lists_attended_entities() {
        let mut s = session();
        let out = say(&mut s, "/recent Player");
        assert_eq!(out.len(), 1);
        assert!(out[0].contains(s.speaker.as_str()));
    }

    #[test]
    fn idle_step_and_quit() {
        let mut s = session();
        assert_eq!(say(&mut s, "/step"), vec!["  (idle)".to_string()]);
        assert!(say(&mut s, "/frobnicate")[0].contains("Unknown command"));
        assert_eq!(dispatch(&mut s, "/quit").unwrap().0, Flow::Quit);
    }
}
