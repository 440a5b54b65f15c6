use std::sync::Arc;

use crate::unit::{Unit, SLOTS_PER_UNIT};

/// Owns every unit and maps global tool indices onto them.
///
/// Tool `t` lives on unit `t / 4`, slot `t % 4`.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    units: Vec<Arc<Unit>>,
}

impl UnitRegistry {
    /// Units must be given in index order.
    pub fn new(units: Vec<Arc<Unit>>) -> Self {
        debug_assert!(units.iter().enumerate().all(|(i, u)| u.index() == i));
        Self { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn tool_count(&self) -> usize {
        self.units.len() * SLOTS_PER_UNIT
    }

    pub fn unit(&self, index: usize) -> Option<&Arc<Unit>> {
        self.units.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Unit>> {
        self.units.iter()
    }

    /// Owning unit and local slot of `tool`.
    pub fn locate(&self, tool: usize) -> Option<(Arc<Unit>, usize)> {
        let unit = self.units.get(tool / SLOTS_PER_UNIT)?;
        Some((Arc::clone(unit), tool % SLOTS_PER_UNIT))
    }

    pub fn tool_index(unit: usize, slot: usize) -> usize {
        unit * SLOTS_PER_UNIT + slot
    }

    /// Feed assist is running on some unit.
    pub fn feed_assist_active(&self) -> bool {
        self.units.iter().any(|u| u.feed_assist().is_some())
    }
}
