//! `locus` – interactive shell for the agent memory and task runtime.
//!
//! 1. Loads `~/.locus/config.toml`, writing the defaults on first run.
//! 2. Opens the agent's memory (a SQLite file, or in-memory when no path is
//!    configured) and makes sure the speaking player exists.
//! 3. Loads the phrase table used to turn text into commands.
//! 4. Drops the operator into the REPL (see [`repl`]).
//! 5. On **Ctrl-C** pauses every task before exiting.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use locus_memory::AgentMemory;
use locus_runtime::{
    DialogueRouter, GroundTruthParser, Resolvers, SemanticParser, SimMover, TaskRunner,
    init_tracing,
};
use locus_types::{MemId, Position};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // The guard flushes any span exporter when `main` returns.
    let _tracing = init_tracing("locus");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = config::Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {}", "Error saving config".red(), e),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Memory ────────────────────────────────────────────────────────────
    let memory = match open_memory(&cfg) {
        Ok(memory) => Arc::new(memory),
        Err(e) => {
            eprintln!("{}: {}", "Cannot open memory".red().bold(), e);
            std::process::exit(1);
        }
    };
    let speaker = match ensure_speaker(&memory, &cfg.speaker_name) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("{}: {}", "Cannot register speaker".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Semantic parser ───────────────────────────────────────────────────
    let parser = load_parser(&cfg);

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let memory_ctrlc = Arc::clone(&memory);

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – pausing all tasks …".yellow().bold());
        match memory_ctrlc.pause_all() {
            Ok(_) => println!("{}", "  ✓ Task stack paused.".green()),
            Err(e) => warn!(error = %e, "could not pause tasks on shutdown"),
        }
        println!("{}", "  ✓ Exiting locus.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; tasks will not be paused on Ctrl-C");
    }

    println!();
    println!(
        "  Speaking as {}. Type {} for a list of commands.\n",
        cfg.speaker_name.bold(),
        "/help".bold().cyan()
    );

    let resolvers = Resolvers::basic();
    let session = repl::Session {
        router: DialogueRouter::new(
            Arc::clone(&memory),
            resolvers.clone(),
            cfg.interpreter_config(),
        ),
        runner: TaskRunner::new(
            Arc::clone(&memory),
            resolvers,
            Arc::new(SimMover::new(Arc::clone(&memory))),
        ),
        parser,
        speaker,
        recency_window: cfg.recency_window,
        memory,
    };

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(session, shutdown);
}

// ─────────────────────────────────────────────────────────────────────────────
// Startup helpers
// ─────────────────────────────────────────────────────────────────────────────

fn open_memory(cfg: &config::Config) -> Result<AgentMemory, String> {
    let memory = match &cfg.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
            }
            info!(path = %path.display(), "opening memory");
            AgentMemory::open(path).map_err(|e| e.to_string())
        }
        None => {
            println!("  {}", "No db_path configured; memory lasts for this session only.".dimmed());
            AgentMemory::open_in_memory().map_err(|e| e.to_string())
        }
    }?;
    Ok(memory.with_time_resolution(cfg.time_resolution))
}

/// Look the speaker up by name, creating the player on first use.
fn ensure_speaker(memory: &AgentMemory, name: &str) -> Result<MemId, String> {
    if let Some(id) = memory.player_by_name(name).map_err(|e| e.to_string())? {
        return Ok(id);
    }
    memory
        .add_player(1, name, Position::default())
        .map_err(|e| e.to_string())
}

fn load_parser(cfg: &config::Config) -> Box<dyn SemanticParser> {
    let Some(path) = &cfg.ground_truth_path else {
        println!(
            "  {}",
            "No ground_truth_path configured; only JSON commands will be understood.".dimmed()
        );
        return Box::new(GroundTruthParser::default());
    };
    match GroundTruthParser::load(path) {
        Ok(parser) => {
            println!(
                "  Loaded {} phrase(s) from {}",
                parser.len().to_string().bold(),
                path.display().to_string().bold()
            );
            Box::new(parser)
        }
        Err(e) => {
            println!("{}: {}", "Phrase table error".red(), e);
            Box::new(GroundTruthParser::default())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __                    "#.bold().cyan());
    println!("{}", r#"  / /  ___  ____ __ _____"#.bold().cyan());
    println!("{}", r#" / /__/ _ \/ __/ // (_-<"#.bold().cyan());
    println!("{}", r#"/____/\___/\__/\_,_/___/"#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "locus".bold(),
        concat!("v", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  {}", "Agent memory and task runtime".dimmed());
}
