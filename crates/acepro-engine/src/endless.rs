//! Endless spool: continue a print from another slot when one runs out.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::host::{ButtonStyle, Prompt};
use crate::machine::Machine;
use crate::slot::SlotStatus;
use crate::store::{StoreExt, ENDLESS_SPOOL_ENABLED, ENDLESS_SPOOL_MATCH_MODE};
use crate::toolchange::{ChangeMode, ToolChanger};

/// How a replacement slot is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Same material and colour.
    #[default]
    Exact,
    /// Same material, any colour.
    Material,
    /// First ready slot.
    Next,
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Exact => "exact",
            MatchMode::Material => "material",
            MatchMode::Next => "next",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized match mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown match mode: {0} (expected exact, material or next)")]
pub struct ParseMatchModeError(pub String);

impl FromStr for MatchMode {
    type Err = ParseMatchModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(MatchMode::Exact),
            "material" => Ok(MatchMode::Material),
            "next" => Ok(MatchMode::Next),
            other => Err(ParseMatchModeError(other.to_string())),
        }
    }
}

/// How a swap ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// `tool` is loaded and the print resumed.
    Swapped { tool: usize, attempts: u32 },
    /// Every candidate failed. The print stays paused.
    Failed { attempts: u32, reason: String },
}

#[derive(Debug, Clone)]
pub struct EndlessSpool {
    machine: Arc<Machine>,
    changer: ToolChanger,
}

impl EndlessSpool {
    pub fn new(machine: Arc<Machine>) -> Self {
        let changer = ToolChanger::new(Arc::clone(&machine));
        Self { machine, changer }
    }

    pub fn enabled(&self) -> bool {
        self.machine.store.get_or(ENDLESS_SPOOL_ENABLED, false)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        info!(enabled, "endless spool");
        self.machine.store.save(ENDLESS_SPOOL_ENABLED, &enabled)
    }

    /// Persisted mode. Unrecognized values read as [`MatchMode::Exact`].
    pub fn match_mode(&self) -> MatchMode {
        let raw: String = self
            .machine
            .store
            .get_or(ENDLESS_SPOOL_MATCH_MODE, MatchMode::Exact.as_str().to_string());
        raw.parse().unwrap_or_else(|err: ParseMatchModeError| {
            warn!(%err, "falling back to exact match mode");
            MatchMode::Exact
        })
    }

    pub fn set_match_mode(&self, mode: MatchMode) -> Result<(), StoreError> {
        info!(%mode, "endless spool match mode");
        self.machine.store.save(ENDLESS_SPOOL_MATCH_MODE, mode.as_str())
    }

    /// Replacement for `from`, scanning ready slots in ring order after it.
    pub fn find_match(&self, from: usize) -> Option<usize> {
        self.find_match_excluding(from, &BTreeSet::new())
    }

    /// [`EndlessSpool::find_match`] skipping `excluded` tools.
    pub fn find_match_excluding(&self, from: usize, excluded: &BTreeSet<usize>) -> Option<usize> {
        let registry = &self.machine.registry;
        let (unit, slot) = registry.locate(from)?;
        let source = unit.slot(slot)?;
        let material = source.known_material();
        let mode = self.match_mode();
        debug!(from, %mode, material = ?material, color = ?source.color, "searching replacement spool");

        let total = registry.tool_count();
        for offset in 1..total {
            let tool = (from + offset) % total;
            if excluded.contains(&tool) {
                continue;
            }
            let Some(candidate) = registry.locate(tool).and_then(|(u, s)| u.slot(s)) else {
                continue;
            };
            if !candidate.status.is_ready() {
                debug!(tool, status = %candidate.status, "skipped, not ready");
                continue;
            }
            if mode == MatchMode::Next {
                info!(from, tool, "next ready spool");
                return Some(tool);
            }

            let (Some(want), Some(have)) = (material.as_deref(), candidate.known_material()) else {
                debug!(tool, "skipped, unknown material never matches");
                continue;
            };
            if want != have {
                debug!(tool, want, have, "skipped, material mismatch");
                continue;
            }
            if mode == MatchMode::Exact && candidate.color != source.color {
                debug!(tool, want = ?source.color, have = ?candidate.color, "skipped, colour mismatch");
                continue;
            }
            info!(from, tool, %mode, "replacement spool found");
            return Some(tool);
        }

        info!(from, %mode, "no replacement spool");
        None
    }

    fn mark(&self, tool: usize, status: SlotStatus) {
        if let Some((unit, slot)) = self.machine.registry.locate(tool) {
            if let Err(err) = unit.set_slot_status(slot, status) {
                warn!(tool, %err, "failed to update slot status");
            }
        }
    }

    /// Swap from the depleted `from` to `to`.
    ///
    /// A failed candidate is marked empty and pulled back, and the next one
    /// is searched from `from` again. The swap stops after
    /// `max_attempts` loads in total. On total failure `from` is marked ready
    /// again for a manual retry, the print stays paused and the operator is
    /// prompted.
    pub async fn execute_swap(&self, from: usize, to: usize) -> SwapOutcome {
        let m = &*self.machine;
        let max_attempts = m.config.endless_spool.max_attempts.max(1);
        m.console.info(&format!("ACE: endless spool swap T{from} -> T{to}"));

        let mut tried = BTreeSet::from([from]);
        let mut candidate = to;
        let mut attempts = 0;
        let reason = loop {
            attempts += 1;
            info!(from, to = candidate, attempt = attempts, max_attempts, "swap attempt");
            self.mark(from, SlotStatus::Empty);

            let err = match self.changer.change_tool(Some(candidate), ChangeMode::EndlessSpool).await {
                Ok(outcome) => {
                    info!(%outcome, "swap loaded");
                    if let Err(err) = m.host.resume_without_purge() {
                        warn!(%err, "failed to resume after swap");
                    }
                    for unit in m.registry.iter() {
                        unit.persist_inventory();
                    }
                    m.console.info(&format!("ACE: endless spool continued on T{candidate}"));
                    return SwapOutcome::Swapped {
                        tool: candidate,
                        attempts,
                    };
                }
                Err(err) => err,
            };

            warn!(from, to = candidate, attempt = attempts, %err, "swap attempt failed");
            m.console.info(&format!("ACE: swap attempt {attempts} to T{candidate} failed: {err}"));
            tried.insert(candidate);
            self.mark(candidate, SlotStatus::Empty);
            if let Some((unit, slot)) = m.registry.locate(candidate) {
                let length = unit.config().parkposition_to_toolhead_length;
                if let Err(unload_err) = self.changer.unload_slot(&unit, slot, length).await {
                    warn!(tool = candidate, %unload_err, "recovery unload failed");
                }
            }

            if attempts >= max_attempts {
                break format!("gave up after {attempts} attempts: {err}");
            }
            match self.find_match_excluding(from, &tried) {
                Some(next) => candidate = next,
                None => {
                    let tried: Vec<_> = tried.iter().collect();
                    break format!("no more matching spools (tried {tried:?}): {err}");
                }
            }
        };

        error!(from, attempts, %reason, "endless spool swap failed");
        self.mark(from, SlotStatus::Ready);

        let (material, color) = m
            .registry
            .locate(from)
            .and_then(|(u, s)| u.slot(s))
            .map(|s| (s.material, s.color))
            .unwrap_or_default();
        let short = reason.lines().next().unwrap_or_default();
        let short: String = short.chars().take(100).collect();
        m.console.info("ACE: endless spool swap failed, print stays paused; fix the spool and RESUME");
        m.console.show_prompt(
            &Prompt::new(
                "Endless Spool Swap Failed",
                format!(
                    "Endless spool swap failed for T{from} - Material: {material}, Color: RGB({},{},{}). \
                     Error: {short}. Refill the spool or load matching material, then RESUME.",
                    color[0], color[1], color[2]
                ),
            )
            .footer_button("Resume", "RESUME", ButtonStyle::Primary)
            .footer_button("Cancel Print", "CANCEL_PRINT", ButtonStyle::Error),
        );

        SwapOutcome::Failed { attempts, reason }
    }
}
