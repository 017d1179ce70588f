//! Line-oriented operator console.
//!
//! The operator drives a session with short commands typed on stdin:
//! start/stop the feed, pick a detection from the buffer or type a plate by
//! hand, then save it.

use std::fmt::Write as _;

use crate::buffer::DetectionBuffer;
use crate::capture::CaptureSource;
use crate::selection::SelectionState;
use crate::session::{SessionController, SessionState, SessionUpdate};
use crate::store::{PlateEntry, PlateStore, StoreError};

pub const HELP: &str = "\
Commands:
  start [device]   start detecting (default camera if no device)
  stop             stop detecting
  show             list recent detections
  pick N           select detection N from the list
  set TEXT         type the plate by hand
  reset            clear the selection
  save [TALLY]     save the selected plate
  help             show this help
  quit             stop and exit";

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Start { device: Option<String> },
    Stop,
    Show,
    /// 1-based position in the detection list.
    Pick(usize),
    Set(String),
    Reset,
    Save { tally: Option<String> },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command '{0}' (type 'help')")]
    Unknown(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("'{0}' is not a detection number")]
    InvalidIndex(String),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<OperatorCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let arg = (!rest.is_empty()).then(|| rest.to_string());

    let command = match word.to_ascii_lowercase().as_str() {
        "start" => OperatorCommand::Start { device: arg },
        "stop" => OperatorCommand::Stop,
        "show" | "ls" => OperatorCommand::Show,
        "pick" => {
            let raw = arg.ok_or(CommandError::MissingArgument("pick"))?;
            match raw.parse::<usize>() {
                Ok(n) if n >= 1 => OperatorCommand::Pick(n),
                _ => return Err(CommandError::InvalidIndex(raw)),
            }
        }
        "set" => OperatorCommand::Set(arg.ok_or(CommandError::MissingArgument("set"))?),
        "reset" => OperatorCommand::Reset,
        "save" => OperatorCommand::Save { tally: arg },
        "help" | "?" => OperatorCommand::Help,
        "quit" | "exit" | "q" => OperatorCommand::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

/// Render the buffer oldest-first, marking entries equal to the selection.
pub fn render_detections(buffer: &DetectionBuffer, selection: &SelectionState) -> String {
    let mut out = String::new();
    if buffer.is_empty() {
        out.push_str("No detections yet.\n");
    } else {
        for (i, event) in buffer.iter().enumerate() {
            let marker = if selection.is_selected(&event.text) { '>' } else { ' ' };
            let _ = writeln!(out, "{} {:>2}. {}", marker, i + 1, event.text);
        }
    }
    if selection.is_empty() {
        out.push_str("Selected: (none)\n");
    } else {
        let _ = writeln!(out, "Selected: {}", selection.current());
    }
    out
}

/// One-line description of a session update, if the operator should see it.
pub fn describe_update(update: &SessionUpdate) -> Option<String> {
    match update {
        SessionUpdate::Ignored | SessionUpdate::FrameSent => None,
        SessionUpdate::Detecting => Some("Detecting...".to_string()),
        SessionUpdate::Detection(event) => Some(format!("Detected: {}", event.text)),
        SessionUpdate::Stopped(cause) => Some(format!("Stopped: {}", cause)),
        SessionUpdate::Reconnecting { attempt } => {
            Some(format!("Connection lost, reconnecting (attempt {})", attempt))
        }
    }
}

/// Save the current selection, then reset it and clear the buffer.
/// Nothing changes if the save fails.
pub async fn save_selection<S: CaptureSource>(
    controller: &mut SessionController<S>,
    store: &PlateStore,
    tally: Option<&str>,
) -> Result<PlateEntry, StoreError> {
    let plate = controller.selection().current().to_string();
    let entry = store.save_plate(&plate, tally).await?;
    controller.reset_selection();
    controller.clear_detections();
    Ok(entry)
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command against the controller, returning text for the operator.
pub async fn execute<S: CaptureSource>(
    command: OperatorCommand,
    controller: &mut SessionController<S>,
    store: &PlateStore,
) -> (Flow, String) {
    let message = match command {
        OperatorCommand::Start { device } => match controller.start(device.as_deref()) {
            Ok(()) => format!("Connecting to {}...", controller.config().endpoint),
            Err(e) => format!("Cannot start: {}", e),
        },
        OperatorCommand::Stop => {
            if controller.is_retry_pending() || controller.state() != SessionState::Idle {
                controller.stop();
                "Stopped.".to_string()
            } else {
                "Not running.".to_string()
            }
        }
        OperatorCommand::Show => render_detections(controller.buffer(), controller.selection()),
        OperatorCommand::Pick(n) => {
            let listed = controller.buffer().len();
            match controller.select_detection(n - 1) {
                Some(text) => format!("Selected: {}", text),
                None => format!("No detection #{} ({} in list)", n, listed),
            }
        }
        OperatorCommand::Set(text) => {
            controller.select(text);
            format!("Selected: {}", controller.selection().current())
        }
        OperatorCommand::Reset => {
            controller.reset_selection();
            "Selection cleared.".to_string()
        }
        OperatorCommand::Save { tally } => {
            match save_selection(controller, store, tally.as_deref()).await {
                Ok(entry) => format!("Saved {} (id {})", entry.plate_number, entry.id),
                Err(StoreError::EmptyPlate) => "Nothing selected to save.".to_string(),
                Err(e) => format!("Save failed: {}", e),
            }
        }
        OperatorCommand::Help => HELP.to_string(),
        OperatorCommand::Quit => {
            controller.stop();
            return (Flow::Quit, "Bye.".to_string());
        }
    };
    (Flow::Continue, message)
}
