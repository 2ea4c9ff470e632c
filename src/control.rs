//! Line-based control surface read from stdin.

use crate::sync::{SyncController, SyncSnapshot};
use log::debug;
use std::io::BufRead;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    Start,
    Stop,
    Continue,
    Tempo(f64),
    Locate(f64),
    BlockTempo(bool),
    BlockSync(bool),
    Status,
    Quit,
}

/// Result of applying a command, for the caller to print
#[derive(Debug, Clone, PartialEq)]
pub enum ControlReply {
    Done,
    Rejected(String),
    Status(SyncSnapshot),
    Quit,
}

fn parse_switch(word: Option<&str>) -> Result<bool, String> {
    match word {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        Some(other) => Err(format!("expected on or off, got '{}'", other)),
        None => Err("expected on or off".to_string()),
    }
}

fn parse_number(word: Option<&str>, what: &str) -> Result<f64, String> {
    let word = word.ok_or_else(|| format!("missing {}", what))?;
    word.parse::<f64>()
        .map_err(|_| format!("invalid {} '{}'", what, word))
}

impl FromStr for ControlCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or_else(|| "empty command".to_string())?;

        let parsed = match command.to_ascii_lowercase().as_str() {
            "start" => ControlCommand::Start,
            "stop" => ControlCommand::Stop,
            "continue" | "cont" => ControlCommand::Continue,
            "bpm" | "tempo" => ControlCommand::Tempo(parse_number(words.next(), "tempo")?),
            "locate" => ControlCommand::Locate(parse_number(words.next(), "position")?),
            "block-tempo" => ControlCommand::BlockTempo(parse_switch(words.next())?),
            "block-sync" => ControlCommand::BlockSync(parse_switch(words.next())?),
            "status" => ControlCommand::Status,
            "quit" | "exit" => ControlCommand::Quit,
            other => return Err(format!("unknown command '{}'", other)),
        };

        if let Some(extra) = words.next() {
            return Err(format!("unexpected argument '{}'", extra));
        }
        Ok(parsed)
    }
}

impl ControlCommand {
    /// Local commands always go out to the sequencer as well
    pub fn apply(self, controller: &SyncController) -> ControlReply {
        debug!("Control command {:?}", self);
        match self {
            ControlCommand::Start => controller.start(true),
            ControlCommand::Stop => controller.stop(true),
            ControlCommand::Continue => controller.continue_playback(true),
            ControlCommand::Tempo(bpm) => {
                if !controller.set_tempo(bpm) {
                    return ControlReply::Rejected(format!("tempo {} out of range", bpm));
                }
            }
            ControlCommand::Locate(quarter_notes) => controller.locate(quarter_notes, true),
            ControlCommand::BlockTempo(blocked) => controller.block_tempo_updates(blocked),
            ControlCommand::BlockSync(blocked) => controller.block_transport_sync(blocked),
            ControlCommand::Status => return ControlReply::Status(controller.snapshot()),
            ControlCommand::Quit => return ControlReply::Quit,
        }
        ControlReply::Done
    }
}

/// Reads commands until `quit` or end of input, handing every reply to `report`
pub fn run_control_loop<R, F>(input: R, controller: &SyncController, mut report: F)
where
    R: BufRead,
    F: FnMut(&ControlReply),
{
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                report(&ControlReply::Rejected(e.to_string()));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match line.parse::<ControlCommand>() {
            Ok(command) => command.apply(controller),
            Err(e) => ControlReply::Rejected(e),
        };
        report(&reply);
        if reply == ControlReply::Quit {
            break;
        }
    }
}
