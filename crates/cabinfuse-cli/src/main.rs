//! `cabinfuse` – CabinFuse Command Line Interface
//!
//! Runs the whole fusion stack in one process with a console responder, so
//! perception events can be typed in by hand and the resulting alerts,
//! acknowledgements and reminders watched live.  It:
//!
//! 1. Loads `~/.cabinfuse/config.toml`, writing the defaults on first run.
//! 2. Builds the [`FusionSystem`] from the `[fusion]` table.
//! 3. Drops the user into a REPL with slash-commands (`/gaze`, `/say`,
//!    `/voice`, `/status`, `/help`, …).
//! 4. Intercepts **Ctrl-C** to end any active session and exit.

mod config;
mod console;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use cabinfuse_runtime::{FusionSystem, telemetry};
use cabinfuse_types::EndReason;

use crate::console::ConsoleResponder;

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); CABINFUSE_LOG_FORMAT=json switches
    // to newline-delimited JSON.  User-facing output stays on println!.
    let _telemetry = match telemetry::init_tracing("cabinfuse") {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("{}: {}", "Telemetry error".red(), e);
            None
        }
    };

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
        Ok(None) => write_default_config(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    let system = match FusionSystem::with_responder(cfg.fusion.clone(), Arc::new(ConsoleResponder)) {
        Ok(system) => Arc::new(system),
        Err(e) => {
            eprintln!("{}: {}", "Startup error".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let system_ctrlc = system.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        if system_ctrlc.end_session(EndReason::Manual) {
            println!("{}", "  ✓ Active session ended.".green());
        }
        println!("{}", "  ✓ Exiting CabinFuse.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
        // The REPL is usually parked in read_line.
        std::process::exit(0);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; sessions will not be closed on Ctrl-C");
    }

    println!(
        "  Reminder after {}s · distraction timeout {}s · bus history {}",
        cfg.fusion.reminder_delay_secs,
        cfg.fusion.distraction_timeout_secs,
        cfg.fusion.bus_capacity
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&system, cfg.default_confidence, &shutdown);
}

fn write_default_config() -> config::Config {
    let cfg = config::Config::default();
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default configuration written to {}",
            "✓".green(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Could not save configuration".red(), e),
    }
    cfg
}

fn print_banner() {
    println!();
    println!("{}", "  ╔═══════════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║   CabinFuse · multimodal cockpit fusion   ║".bold().cyan());
    println!("{}", "  ╚═══════════════════════════════════════════╝".bold().cyan());
    println!("  version {}", env!("CARGO_PKG_VERSION").dimmed());
    println!();
}
