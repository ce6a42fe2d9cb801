//! REPL – drive the fusion stack by hand.
//!
//! Supported slash-commands:
//!   /gaze <dir> [conf]          – publish a gaze change (center/left/right/up/down)
//!   /gesture <name> [conf]      – publish a detected gesture
//!   /say <text>                 – publish recognised speech
//!   /intent <label> [conf]      – publish a classified intent
//!   /head <yaw> <pitch> <roll>  – publish a head pose
//!   /voice <command>            – start the voice-command scenario
//!   /control <gesture>          – start the gesture-control scenario
//!   /end                        – end the active session
//!   /status                     – print the system status as JSON
//!   /help                       – show this list
//!   /quit | /exit               – exit the CLI

use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use cabinfuse_runtime::FusionSystem;
use cabinfuse_types::{CabinError, EndReason, GazeDirection, ModalityEvent};
use colored::Colorize;

/// One parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Gaze(GazeDirection, f64),
    Gesture(String, f64),
    Say(String),
    Intent(String, f64),
    Head(f32, f32, f32),
    Voice(String),
    Control(String),
    End,
    Status,
    Help,
    Quit,
}

/// Parse `line`; `default_confidence` fills in omitted confidences.
pub fn parse(line: &str, default_confidence: f64) -> Result<Command, CabinError> {
    let line = line.trim();
    let (head, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let args: Vec<&str> = rest.split_whitespace().collect();

    let confidence = |idx: usize| -> Result<f64, CabinError> {
        match args.get(idx) {
            None => Ok(default_confidence),
            Some(raw) => raw
                .parse::<f64>()
                .map_err(|_| CabinError::InvalidInput(format!("'{raw}' is not a confidence"))),
        }
    };
    let required = |what: &str| -> Result<&str, CabinError> {
        args.first()
            .copied()
            .ok_or_else(|| CabinError::InvalidInput(format!("{head} needs a {what}")))
    };

    match head {
        "/gaze" => Ok(Command::Gaze(required("direction")?.parse()?, confidence(1)?)),
        "/gesture" => Ok(Command::Gesture(required("gesture name")?.to_string(), confidence(1)?)),
        "/intent" => Ok(Command::Intent(required("intent label")?.to_string(), confidence(1)?)),
        "/say" if !rest.is_empty() => Ok(Command::Say(rest.to_string())),
        "/voice" if !rest.is_empty() => Ok(Command::Voice(rest.to_string())),
        "/say" | "/voice" => Err(CabinError::InvalidInput(format!("{head} needs some text"))),
        "/control" => Ok(Command::Control(required("gesture name")?.to_string())),
        "/head" => {
            let angles: Result<Vec<f32>, _> = args.iter().map(|a| a.parse::<f32>()).collect();
            match angles.as_deref() {
                Ok([yaw, pitch, roll]) => Ok(Command::Head(*yaw, *pitch, *roll)),
                _ => Err(CabinError::InvalidInput(
                    "/head needs <yaw> <pitch> <roll> in degrees".to_string(),
                )),
            }
        }
        "/end" => Ok(Command::End),
        "/status" => Ok(Command::Status),
        "/help" => Ok(Command::Help),
        "/quit" | "/exit" => Ok(Command::Quit),
        other => Err(CabinError::InvalidInput(format!("unknown command '{other}'"))),
    }
}

/// Entry point for the interactive REPL.
///
/// `shutdown` is polled each iteration; when set the REPL exits cleanly.
pub fn run(system: &FusionSystem, default_confidence: f64, shutdown: &AtomicBool) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "cabinfuse>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse(&line, default_confidence) {
            Ok(Command::Quit) => {
                system.end_session(EndReason::Manual);
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(command) => execute(system, command),
            Err(e) => println!(
                "{} {}. Type {} for available commands.",
                "✗".red(),
                e.to_string().yellow(),
                "/help".bold()
            ),
        }
    }
}

fn execute(system: &FusionSystem, command: Command) {
    match command {
        Command::Gaze(direction, c) => publish(system, ModalityEvent::gaze(direction, c)),
        Command::Gesture(name, c) => publish(system, ModalityEvent::gesture(name, c)),
        Command::Say(text) => publish(system, ModalityEvent::speech(text, 1.0)),
        Command::Intent(label, c) => publish(system, ModalityEvent::intent(label, c)),
        Command::Head(yaw, pitch, roll) => publish(system, ModalityEvent::head_pose(yaw, pitch, roll, 1.0)),
        Command::Voice(text) => {
            let id = system.scenarios().trigger_voice_command_scenario(&text, 0.9);
            println!("  voice command session {}", id.short().bold());
        }
        Command::Control(gesture) => {
            let id = system.scenarios().trigger_gesture_control_scenario(&gesture, 0.8);
            println!("  gesture control session {}", id.short().bold());
        }
        Command::End => {
            if system.end_session(EndReason::Manual) {
                println!("  {}", "session ended".green());
            } else {
                println!("  {}", "no active session".dimmed());
            }
        }
        Command::Status => match serde_json::to_string_pretty(&system.system_status()) {
            Ok(json) => println!("{json}"),
            Err(e) => println!("{}: {}", "Status error".red(), e),
        },
        Command::Help => cmd_help(),
        Command::Quit => {}
    }
}

fn publish(system: &FusionSystem, event: ModalityEvent) {
    let event_type = event.event_type();
    let handled = system.publish(event);
    println!(
        "  {} {} ({} handler(s)) · state {}",
        "→".dimmed(),
        event_type.to_string().bold(),
        handled,
        system.state().current_state().to_string().cyan()
    );
}

fn cmd_help() {
    println!();
    println!("{}", "CabinFuse Commands".bold().underline());
    println!("  {}  – gaze change (center/left/right/up/down)", "/gaze <dir> [conf]".bold().cyan());
    println!("  {}  – detected gesture (thumbs_up, ok, stop, …)", "/gesture <name> [conf]".bold().cyan());
    println!("  {}  – recognised speech", "/say <text>".bold().cyan());
    println!("  {}  – classified intent (attention_confirm, busy, …)", "/intent <label> [conf]".bold().cyan());
    println!("  {}  – head pose in degrees", "/head <yaw> <pitch> <roll>".bold().cyan());
    println!("  {}  – start a voice-command session", "/voice <command>".bold().cyan());
    println!("  {}  – start a gesture-control session", "/control <gesture>".bold().cyan());
    println!("  {}  – end the active session", "/end".bold().cyan());
    println!("  {}  – system status as JSON", "/status".bold().cyan());
    println!("  {}  – exit the CLI", "/quit  /exit".bold().cyan());
    println!();
}
