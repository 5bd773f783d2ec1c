//! # Command Line Robot
//!
//! Operator shell for the command link. Connects to the motor controller and sends commands typed
//! at the prompt, for example `forward 500` or `driveleft-120-300`. Commands are checked locally
//! before they're sent so that nothing invalid reaches the wire.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Result};
use comms_if::{
    cmd::{Action, Command, ParseError},
    net::{ControlLink, NetParams},
};
use log::{info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::net::TcpStream;
use structopt::StructOpt;
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "Sergei $ ";
const HISTORY_PATH: &str = "data/history.txt";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "command_line_robot",
    about = "Issues commands directly to the motor controller"
)]
struct Opt {
    /// Address of the motor controller, overrides the parameter file.
    #[structopt(short, long)]
    endpoint: Option<String>,

    /// Send these commands then exit instead of starting the shell.
    #[structopt(short, long)]
    send: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What to do with a line typed at the prompt.
#[derive(Debug, PartialEq)]
enum Line {
    Empty,
    Help,
    Quit,
    Command(Command),
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // Logging is optional for the shell, it still works without a software root
    match Session::new("command_line_robot", "sessions") {
        Ok(session) => {
            logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?
        }
        Err(e) => println!("Logging disabled: {}", e),
    }

    let mut net_params: NetParams = match util::params::load("command_line_robot.toml") {
        Ok(p) => p,
        Err(e) => {
            warn!("Using default network parameters: {}", e);
            NetParams::default()
        }
    };
    if let Some(endpoint) = opt.endpoint {
        net_params.endpoint = endpoint;
    }

    let mut link = ControlLink::connect(&net_params)
        .wrap_err_with(|| format!("Could not connect to {}", net_params.endpoint))?;

    info!("Connected to {}", link.peer());

    if !opt.send.is_empty() {
        for s in &opt.send {
            match parse_line(s) {
                Ok(Line::Command(cmd)) => send(&mut link, &cmd)?,
                Ok(_) => (),
                Err(e) => warn!("Not sending \"{}\": {}", s, e),
            }
        }
        link.shutdown();
        return Ok(());
    }

    shell(&mut link)?;

    link.shutdown();
    Ok(())
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run the interactive shell until the user quits.
fn shell(link: &mut ControlLink<TcpStream>) -> Result<()> {
    let mut rl = DefaultEditor::new().wrap_err("Could not start the line editor")?;
    if rl.load_history(HISTORY_PATH).is_err() {
        println!("No history detected");
    }

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                warn!("Unhandled error: {:?}", e);
                break;
            }
        };

        rl.add_history_entry(line.as_str()).ok();

        match parse_line(&line) {
            Ok(Line::Empty) => (),
            Ok(Line::Help) => print_help(),
            Ok(Line::Quit) => break,
            Ok(Line::Command(cmd)) => send(link, &cmd)?,
            Err(e) => println!("{}", e),
        }
    }

    if let Some(dir) = std::path::Path::new(HISTORY_PATH).parent() {
        std::fs::create_dir_all(dir).ok();
    }
    if let Err(e) = rl.save_history(HISTORY_PATH) {
        warn!("Could not save history: {}", e);
    }

    println!("Exiting...");
    Ok(())
}

fn send(link: &mut ControlLink<TcpStream>, cmd: &Command) -> Result<()> {
    link.send(cmd).wrap_err("Control link lost")?;
    info!("Sent {}", cmd);
    Ok(())
}

/// Interpret a line typed by the operator.
///
/// Fields can be separated by whitespace as well as the wire separator, so `forward 500` and
/// `forward-500` are the same command.
fn parse_line(line: &str) -> Result<Line, ParseError> {
    let fields: Vec<&str> = line.split_whitespace().collect();

    match fields.as_slice() {
        [] => Ok(Line::Empty),
        ["help"] => Ok(Line::Help),
        ["quit"] | ["exit"] => Ok(Line::Quit),
        _ => fields.join("-").parse().map(Line::Command),
    }
}

fn print_help() {
    println!("Commands (fields separated by spaces or '-'):");
    for action in Action::ALL.iter() {
        let params = match action {
            Action::Forward | Action::Back | Action::Left | Action::Right => " [duration_ms]",
            Action::DriveLeft | Action::DriveRight => " [rate [duration_ms]]",
            Action::Lift => " [target_deg]",
            _ => "",
        };
        println!("    {}{}", action, params);
    }
    println!("    help");
    println!("    quit");
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("   "), Ok(Line::Empty));
        assert_eq!(parse_line("help"), Ok(Line::Help));
        assert_eq!(parse_line(" quit "), Ok(Line::Quit));
        assert_eq!(
            parse_line("forward 500"),
            Ok(Line::Command(Command::new(Action::Forward, vec![500])))
        );
        assert_eq!(
            parse_line("driveleft-120 300"),
            Ok(Line::Command(Command::new(Action::DriveLeft, vec![120, 300])))
        );
        assert!(matches!(
            parse_line("fly 12"),
            Err(ParseError::UnknownAction(_))
        ));
        assert!(matches!(
            parse_line("back soon"),
            Err(ParseError::InvalidParameter { .. })
        ));
    }
}
