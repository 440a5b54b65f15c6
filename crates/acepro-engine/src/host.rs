//! Contracts for the printer host and the operator console.

use std::fmt;

use crate::error::HostError;

/// Coarse print-job state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PrintState {
    #[default]
    Standby,
    Printing,
    Paused,
    Complete,
    Cancelled,
    Error,
    Other(String),
}

impl PrintState {
    pub fn as_str(&self) -> &str {
        match self {
            PrintState::Standby => "standby",
            PrintState::Printing => "printing",
            PrintState::Paused => "paused",
            PrintState::Complete => "complete",
            PrintState::Cancelled => "cancelled",
            PrintState::Error => "error",
            PrintState::Other(s) => s,
        }
    }

    pub fn is_printing(&self) -> bool {
        *self == PrintState::Printing
    }
}

impl From<&str> for PrintState {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "standby" | "idle" => PrintState::Standby,
            "printing" => PrintState::Printing,
            "paused" => PrintState::Paused,
            "complete" => PrintState::Complete,
            "cancelled" => PrintState::Cancelled,
            "error" => PrintState::Error,
            other => PrintState::Other(other.to_string()),
        }
    }
}

impl fmt::Display for PrintState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The printer the units feed.
///
/// Calls are synchronous from the engine's point of view; motion calls
/// return once the move has finished.
pub trait PrintHost: Send + Sync {
    fn print_state(&self) -> Result<PrintState, HostError>;

    /// Extruder position in mm.
    fn extruder_position(&self) -> Result<f64, HostError>;

    /// Relative extruder move in mm at mm/s. Negative retracts.
    fn extrude(&self, length: f64, speed: f64) -> Result<(), HostError>;

    /// Run a G-code script or macro.
    fn run_gcode(&self, script: &str) -> Result<(), HostError>;

    fn pause(&self) -> Result<(), HostError> {
        self.run_gcode("PAUSE")
    }

    /// Resume without the host's own purge.
    fn resume_without_purge(&self) -> Result<(), HostError> {
        self.run_gcode("RESUME PURGE=0")
    }

    /// Mirror the active tool into the `_ACE_STATE` macro.
    fn set_active_tool_variable(&self, tool: Option<usize>) -> Result<(), HostError> {
        self.run_gcode(&format!(
            "SET_GCODE_VARIABLE MACRO=_ACE_STATE VARIABLE=active VALUE={}",
            tool_value(tool)
        ))
    }
}

/// `-1` for no tool, the index otherwise.
pub fn tool_value(tool: Option<usize>) -> i64 {
    tool.map_or(-1, |t| t as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Error,
}

impl ButtonStyle {
    fn as_str(&self) -> &'static str {
        match self {
            ButtonStyle::Primary => "primary",
            ButtonStyle::Secondary => "secondary",
            ButtonStyle::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptButton {
    pub label: String,
    pub command: String,
    pub style: ButtonStyle,
    /// Rendered in the footer row.
    pub footer: bool,
}

/// Interactive operator prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub title: String,
    pub text: String,
    pub buttons: Vec<PromptButton>,
}

impl Prompt {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            buttons: Vec::new(),
        }
    }

    pub fn button(mut self, label: impl Into<String>, command: impl Into<String>, style: ButtonStyle) -> Self {
        self.buttons.push(PromptButton {
            label: label.into(),
            command: command.into(),
            style,
            footer: false,
        });
        self
    }

    pub fn footer_button(
        mut self,
        label: impl Into<String>,
        command: impl Into<String>,
        style: ButtonStyle,
    ) -> Self {
        self.buttons.push(PromptButton {
            label: label.into(),
            command: command.into(),
            style,
            footer: true,
        });
        self
    }

    /// Host `RESPOND` commands that display this prompt.
    pub fn commands(&self) -> Vec<String> {
        let respond = |action: String| format!("RESPOND TYPE=command MSG=\"action:{action}\"");
        let mut out = vec![
            respond(format!("prompt_begin {}", self.title)),
            respond(format!("prompt_text {}", self.text)),
        ];
        for button in &self.buttons {
            let kind = if button.footer {
                "prompt_footer_button"
            } else {
                "prompt_button"
            };
            out.push(respond(format!(
                "{kind} {}|{}|{}",
                button.label,
                button.command,
                button.style.as_str()
            )));
        }
        out.push(respond("prompt_show".to_string()));
        out
    }

    pub fn close_command() -> String {
        "RESPOND TYPE=command MSG=\"action:prompt_end\"".to_string()
    }
}

/// Operator-facing messages and prompts.
pub trait Console: Send + Sync {
    fn info(&self, message: &str);
    fn show_prompt(&self, prompt: &Prompt);
    fn close_prompt(&self);
}

/// Console that renders through the host's `RESPOND` command.
pub struct HostConsole<H> {
    host: H,
}

impl<H: PrintHost> HostConsole<H> {
    pub fn new(host: H) -> Self {
        Self { host }
    }

    fn run(&self, script: &str) {
        if let Err(err) = self.host.run_gcode(script) {
            tracing::warn!(%err, "console command failed");
        }
    }
}

impl<H: PrintHost> Console for HostConsole<H> {
    fn info(&self, message: &str) {
        self.run(&format!("RESPOND MSG=\"{}\"", message.replace('"', "'")));
    }

    fn show_prompt(&self, prompt: &Prompt) {
        for command in prompt.commands() {
            self.run(&command);
        }
    }

    fn close_prompt(&self) {
        self.run(&Prompt::close_command());
    }
}
