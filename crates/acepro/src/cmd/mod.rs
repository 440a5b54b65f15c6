use std::path::PathBuf;
use std::time::Duration;

use acepro_engine::EngineConfig;
use acepro_transport::SerialPort;
use clap::{Args, Subcommand};

use crate::exit::{config_error, io_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod assist;
pub mod dry;
pub mod filament;
pub mod info;
pub mod motion;
pub mod ports;
pub mod session;
pub mod status;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List connected ACE Pro units in unit order.
    Ports,
    /// Show firmware model and version.
    Info,
    /// Show device status.
    Status(StatusArgs),
    /// Show slot inventory with RFID data.
    Slots,
    /// Feed filament from a slot.
    Feed(MotionArgs),
    /// Stop feeding a slot.
    StopFeed(SlotArgs),
    /// Retract filament into a slot.
    Retract(MotionArgs),
    /// Stop retracting a slot.
    StopRetract(SlotArgs),
    /// Enable or disable feed assist on a slot.
    Assist(AssistArgs),
    /// Start the dryer.
    Dry(DryArgs),
    /// Stop the dryer.
    DryStop,
    /// Read a slot's RFID tag.
    FilamentInfo(SlotArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, connection: &ConnectionArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Ports => ports::run(format),
        Command::Version(args) => version::run(args),
        Command::Info => info::run(&connection.target()?, format),
        Command::Status(args) => status::run(args, &connection.target()?, format),
        Command::Slots => status::slots(&connection.target()?, format),
        Command::Feed(args) => motion::feed(args, &connection.target()?, format),
        Command::StopFeed(args) => motion::stop_feed(args, &connection.target()?, format),
        Command::Retract(args) => motion::retract(args, &connection.target()?, format),
        Command::StopRetract(args) => motion::stop_retract(args, &connection.target()?, format),
        Command::Assist(args) => assist::run(args, &connection.target()?, format),
        Command::Dry(args) => dry::start(args, &connection.target()?, format),
        Command::DryStop => dry::stop(&connection.target()?, format),
        Command::FilamentInfo(args) => filament::run(args, &connection.target()?, format),
    }
}

/// How to reach the unit; shared by every device command.
#[derive(Args, Debug)]
pub struct ConnectionArgs {
    /// Serial device path. Default: discover by USB location.
    #[arg(long, value_name = "PATH", global = true, env = "ACEPRO_PORT")]
    pub port: Option<PathBuf>,

    /// Baud rate.
    #[arg(long, default_value_t = SerialPort::DEFAULT_BAUD, global = true)]
    pub baud: u32,

    /// Unit index; picks the Nth discovered port and its per-unit settings.
    #[arg(long, default_value_t = 0, global = true)]
    pub unit: usize,

    /// Connect timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s", global = true)]
    pub timeout: String,

    /// Engine configuration file (JSON).
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Persist slot inventory and feed-assist state to this file.
    #[arg(long, value_name = "FILE", global = true, env = "ACEPRO_STATE")]
    pub state: Option<PathBuf>,
}

impl ConnectionArgs {
    pub fn target(&self) -> CliResult<session::Target> {
        let config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|err| io_error(&format!("failed reading {}", path.display()), err))?;
                EngineConfig::from_json(&text)
                    .map_err(|err| config_error(&format!("invalid config {}", path.display()), err))?
            }
            None => EngineConfig::default(),
        };
        Ok(session::Target {
            port: self.port.clone(),
            baud: self.baud,
            unit: self.unit,
            timeout: parse_duration(&self.timeout)?,
            config,
            state: self.state.clone(),
        })
    }
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Keep polling until interrupted.
    #[arg(long)]
    pub watch: bool,
    /// Poll interval for --watch (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s", requires = "watch")]
    pub interval: String,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct SlotArgs {
    /// Slot index (0-3).
    pub slot: usize,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct MotionArgs {
    /// Slot index (0-3).
    pub slot: usize,
    /// Length in mm.
    pub length: u32,
    /// Speed in mm/s. Default: the configured feed or retract speed.
    #[arg(long)]
    pub speed: Option<u32>,
    /// Return once the device accepted the command.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct AssistArgs {
    /// Slot index (0-3).
    pub slot: usize,
    /// Disable instead of enable.
    #[arg(long)]
    pub off: bool,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct DryArgs {
    /// Target temperature in C.
    #[arg(long)]
    pub temp: u32,
    /// Duration in minutes.
    #[arg(long, default_value_t = 240)]
    pub minutes: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
