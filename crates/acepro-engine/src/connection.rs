//! Link supervision.
//!
//! A unit whose dispatcher reports too many recent reconnects is treated as
//! a connection issue: a running print is paused and the operator gets a
//! prompt, which closes again once every link has settled.

use std::collections::BTreeMap;
use std::sync::Arc;

use acepro_dispatch::ConnectionStatus;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::HostError;
use crate::host::{ButtonStyle, PrintState, Prompt};
use crate::machine::Machine;
use crate::runout::Next;

pub const CONNECTION_PROMPT_TITLE: &str = "ACE Connection Issue";

pub struct ConnectionMonitor {
    machine: Arc<Machine>,
    last: BTreeMap<usize, ConnectionStatus>,
    issue_shown: bool,
}

impl ConnectionMonitor {
    pub fn new(machine: Arc<Machine>) -> Self {
        Self {
            machine,
            last: BTreeMap::new(),
            issue_shown: false,
        }
    }

    /// Whether the connection prompt is currently up.
    pub fn issue_shown(&self) -> bool {
        self.issue_shown
    }

    /// Last status seen for `unit`.
    pub fn status(&self, unit: usize) -> Option<&ConnectionStatus> {
        self.last.get(&unit)
    }

    /// Run one supervision cycle.
    pub fn poll_once(&mut self) -> Next {
        let cfg = &self.machine.config.connection;
        if !cfg.supervision {
            return Next::Stop;
        }
        let interval = cfg.check_interval;

        match self.check() {
            Ok(()) => Next::After(interval),
            Err(err) if err.fatal => {
                error!(%err, "host fatal, connection monitor stopped");
                Next::Stop
            }
            Err(err) => {
                warn!(%err, "connection check failed");
                Next::After(interval)
            }
        }
    }

    fn check(&mut self) -> Result<(), HostError> {
        let m = Arc::clone(&self.machine);
        let mut flapping = Vec::new();

        for unit in m.registry.iter() {
            let index = unit.index();
            let status = unit.handle().connection_status();
            let previous = self.last.insert(index, status);

            if status.is_flapping() {
                flapping.push((index, status));
            }

            let was_stable = previous.is_none_or(|p| p.stable);
            if status.stable && !was_stable && previous.is_some() {
                let up = status.time_connected.unwrap_or_default().as_secs();
                info!(unit = index, up, "connection stabilized");
                m.console
                    .info(&format!("ACE[{index}]: connection stabilized (connected for {up}s)"));

                if self.issue_shown && self.last.values().all(|s| s.stable) {
                    m.console.close_prompt();
                    m.console.info("ACE: connection restored, prompt closed");
                    self.issue_shown = false;
                }
            }
        }

        if !flapping.is_empty() && !self.issue_shown {
            self.handle_issue(&flapping)?;
            self.issue_shown = true;
        }
        Ok(())
    }

    fn handle_issue(&self, flapping: &[(usize, ConnectionStatus)]) -> Result<(), HostError> {
        let m = &*self.machine;
        let state = m.host.print_state()?;
        let in_print = matches!(state, PrintState::Printing | PrintState::Paused);

        let details: Vec<String> = flapping
            .iter()
            .map(|(unit, status)| {
                let what = if status.is_connected() {
                    format!(
                        "unstable ({}/{} reconnects)",
                        status.recent_reconnects, status.threshold
                    )
                } else {
                    "disconnected".to_string()
                };
                format!("ACE {unit}: {what}")
            })
            .collect();
        warn!(?details, %state, "connection issue");

        let text = if in_print {
            m.console.info(&format!(
                "ACE: connection issue detected during print - {}",
                details.join(", ")
            ));
            if state == PrintState::Printing {
                m.console.info("ACE: pausing print due to connection issue");
                if let Err(err) = m.host.pause() {
                    if err.fatal {
                        return Err(err);
                    }
                    warn!(%err, "pause failed");
                }
            }
            format!(
                "Print paused: ACE connection unstable. {}. \
                 Fix the connection, then RESUME to continue or CANCEL_PRINT to abort.",
                details.join(" | ")
            )
        } else {
            m.console
                .info(&format!("ACE: connection issue detected - {}", details.join(", ")));
            format!(
                "ACE connection issue detected. {}. \
                 Check the USB cable and that the unit is powered on.",
                details.join(" | ")
            )
        };

        m.console.show_prompt(
            &Prompt::new(CONNECTION_PROMPT_TITLE, text).footer_button(
                "Dismiss",
                "RESPOND TYPE=command MSG=action:prompt_end",
                ButtonStyle::Secondary,
            ),
        );
        Ok(())
    }

    /// Poll until cancelled, supervision is off, or the host goes fatal.
    pub async fn run(mut self, cancel: CancellationToken) {
        let m = Arc::clone(&self.machine);
        info!("connection monitor started");

        loop {
            let delay = match self.poll_once() {
                Next::After(delay) => delay,
                Next::Stop => break,
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = m.scheduler.sleep(delay) => {}
            }
        }

        info!("connection monitor stopped");
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("issue_shown", &self.issue_shown)
            .finish()
    }
}
